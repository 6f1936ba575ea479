//! License-plate recognition: decode an uploaded photo, run OCR over it,
//! pick the most plausible plate string and match it against the vehicle
//! registry.

pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod filter;
pub mod models;
pub mod paddle;
pub mod pipeline;
pub mod recognition;
pub mod server;
pub mod types;

pub use db::{SqliteRegistry, VehicleRegistry};
pub use decode::{decode_image, PixelGrid, RawImage};
pub use error::{DecodeError, RecognitionError, RegistryError, ScanError, UnknownFlow};
pub use filter::{filter_and_select, normalize_plate, FilterPolicy, SelectionStrategy};
pub use pipeline::{scan, FlowSettings, Flows, ScanFlow};
pub use recognition::{SharedEngine, TextRecognizer};
pub use types::{PlateRead, RecognitionHit, ScanResult, VehicleRecord, UNKNOWN_PLATE};
