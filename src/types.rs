use serde::{Serialize, Serializer};
use std::fmt;

/// Value reported in place of a plate when nothing readable was found.
pub const UNKNOWN_PLATE: &str = "UNKNOWN";

/// Axis-aligned region in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One text region reported by the recognition engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionHit {
    pub bounds: BoundingBox,
    pub text: String,
    /// In [0, 1].
    pub confidence: f32,
}

impl RecognitionHit {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        RecognitionHit {
            bounds: BoundingBox::default(),
            text: text.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlateCandidate {
    /// Uppercase ASCII letters and digits only.
    pub text: String,
    pub confidence: f32,
    /// Character count of the hit text before normalization.
    pub raw_len: usize,
}

/// Outcome of candidate selection. An unreadable plate is a normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlateRead {
    Plate(String),
    Unknown,
}

impl PlateRead {
    pub fn as_str(&self) -> &str {
        match self {
            PlateRead::Plate(plate) => plate,
            PlateRead::Unknown => UNKNOWN_PLATE,
        }
    }

    pub fn plate(&self) -> Option<&str> {
        match self {
            PlateRead::Plate(plate) => Some(plate),
            PlateRead::Unknown => None,
        }
    }
}

impl fmt::Display for PlateRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlateRead {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Short form of the vehicle embedded in each service record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleDetails {
    pub id: i64,
    pub license_plate: String,
    pub make: String,
    pub model: String,
    pub year: Option<i64>,
}

/// Past service job attached to a registered vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecordSummary {
    pub id: i64,
    pub vehicle: i64,
    pub vehicle_details: VehicleDetails,
    pub customer_name: String,
    pub customer_phone: String,
    pub date: String,
    pub description: String,
    pub status: String,
    pub parts_cost: f64,
    pub labor_cost: f64,
    pub total_cost: f64,
}

/// Public representation of a vehicle found in the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub id: i64,
    pub license_plate: String,
    pub make: String,
    pub model: String,
    pub year: Option<i64>,
    pub owner: i64,
    pub history: Vec<ServiceRecordSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub plate: PlateRead,
    pub existing_vehicle: Option<VehicleRecord>,
}
