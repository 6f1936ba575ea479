use crate::error::RegistryError;
use crate::types::{ServiceRecordSummary, VehicleDetails, VehicleRecord};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Read access to the store of known vehicles, keyed by license plate.
pub trait VehicleRegistry: Send + Sync {
    /// Exact match on the plate string. `Ok(None)` means the plate is not
    /// registered.
    fn lookup_vehicle_by_plate(&self, plate: &str) -> Result<Option<VehicleRecord>, RegistryError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customer (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT NOT NULL,
    email TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS service_vehicle (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER NOT NULL REFERENCES customer(id) ON DELETE CASCADE,
    license_plate TEXT NOT NULL UNIQUE,
    make TEXT NOT NULL,
    model TEXT NOT NULL,
    year INTEGER
);
CREATE TABLE IF NOT EXISTS service_record (
    id INTEGER PRIMARY KEY,
    vehicle_id INTEGER NOT NULL REFERENCES service_vehicle(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    date TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    status TEXT NOT NULL DEFAULT 'PENDING',
    parts_cost REAL NOT NULL DEFAULT 0,
    labor_cost REAL NOT NULL DEFAULT 0
);
";

pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Wraps an existing connection, creating the registry tables if needed.
    pub fn from_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteRegistry {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn.lock().unwrap())
    }
}

impl VehicleRegistry for SqliteRegistry {
    fn lookup_vehicle_by_plate(&self, plate: &str) -> Result<Option<VehicleRecord>, RegistryError> {
        let conn = self.conn.lock().map_err(|_| RegistryError::Poisoned)?;
        let found = lookup_impl(&conn, plate)?;
        debug!(
            "Registry lookup for {}: {}",
            plate,
            if found.is_some() { "match" } else { "no match" }
        );
        Ok(found)
    }
}

fn lookup_impl(conn: &Connection, plate: &str) -> rusqlite::Result<Option<VehicleRecord>> {
    let vehicle = conn
        .query_row(
            "SELECT id, license_plate, make, model, year, owner_id
             FROM service_vehicle WHERE license_plate = ?1",
            params![plate],
            |row| {
                Ok(VehicleRecord {
                    id: row.get(0)?,
                    license_plate: row.get(1)?,
                    make: row.get(2)?,
                    model: row.get(3)?,
                    year: row.get(4)?,
                    owner: row.get(5)?,
                    history: Vec::new(),
                })
            },
        )
        .optional()?;

    let mut vehicle = match vehicle {
        Some(v) => v,
        None => return Ok(None),
    };

    let (customer_name, customer_phone): (String, String) = conn.query_row(
        "SELECT name, phone FROM customer WHERE id = ?1",
        params![vehicle.owner],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let details = VehicleDetails {
        id: vehicle.id,
        license_plate: vehicle.license_plate.clone(),
        make: vehicle.make.clone(),
        model: vehicle.model.clone(),
        year: vehicle.year,
    };

    let mut stmt = conn.prepare(
        "SELECT id, date, description, status, parts_cost, labor_cost
         FROM service_record WHERE vehicle_id = ?1
         ORDER BY date DESC, id DESC",
    )?;
    vehicle.history = stmt
        .query_map(params![vehicle.id], |row| {
            let parts_cost: f64 = row.get(4)?;
            let labor_cost: f64 = row.get(5)?;
            Ok(ServiceRecordSummary {
                id: row.get(0)?,
                vehicle: details.id,
                vehicle_details: details.clone(),
                customer_name: customer_name.clone(),
                customer_phone: customer_phone.clone(),
                date: row.get(1)?,
                description: row.get(2)?,
                status: row.get(3)?,
                parts_cost,
                labor_cost,
                total_cost: parts_cost + labor_cost,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(vehicle))
}
