use crate::db::VehicleRegistry;
use crate::decode::{decode_image, RawImage};
use crate::error::{ScanError, UnknownFlow};
use crate::filter::{filter_and_select, FilterPolicy, SelectionStrategy};
use crate::recognition::TextRecognizer;
use crate::types::ScanResult;
use log::info;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// The two calling contexts, each with its own filter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanFlow {
    /// Interactive scan from the service desk.
    #[default]
    Live,
    /// Scan of a stored vehicle photo.
    Record,
}

impl FromStr for ScanFlow {
    type Err = UnknownFlow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(ScanFlow::Live),
            "record" => Ok(ScanFlow::Record),
            other => Err(UnknownFlow(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSettings {
    pub grayscale: bool,
    pub policy: FilterPolicy,
}

impl FlowSettings {
    pub const LIVE: FlowSettings = FlowSettings {
        grayscale: false,
        policy: FilterPolicy {
            threshold: None,
            min_len: 3,
            max_len: None,
            strategy: SelectionStrategy::LongestMatch,
        },
    };

    pub const RECORD: FlowSettings = FlowSettings {
        grayscale: true,
        policy: FilterPolicy {
            threshold: Some(0.5),
            min_len: 4,
            max_len: Some(8),
            strategy: SelectionStrategy::FirstMatch,
        },
    };
}

/// Per-flow settings, adjustable from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flows {
    pub live: FlowSettings,
    pub record: FlowSettings,
}

impl Default for Flows {
    fn default() -> Self {
        Flows {
            live: FlowSettings::LIVE,
            record: FlowSettings::RECORD,
        }
    }
}

impl Flows {
    pub fn settings(&self, flow: ScanFlow) -> &FlowSettings {
        match flow {
            ScanFlow::Live => &self.live,
            ScanFlow::Record => &self.record,
        }
    }
}

/// Decode, recognize, select and match one image.
pub fn scan(
    raw: &RawImage<'_>,
    recognizer: &dyn TextRecognizer,
    registry: &dyn VehicleRegistry,
    settings: &FlowSettings,
) -> Result<ScanResult, ScanError> {
    let scan_id = Uuid::new_v4();
    let start = Instant::now();

    let mut grid = decode_image(raw)?;
    if settings.grayscale {
        grid = grid.into_grayscale();
    }
    let hits = recognizer.recognize(&grid)?;
    drop(grid);

    let plate = filter_and_select(&hits, &settings.policy);
    let existing_vehicle = match plate.plate() {
        Some(p) => registry.lookup_vehicle_by_plate(p)?,
        None => None,
    };
    info!(
        "Scan {}: {} hits, plate {}, {} in {:?}",
        scan_id,
        hits.len(),
        plate,
        if existing_vehicle.is_some() { "registered" } else { "no match" },
        start.elapsed()
    );

    Ok(ScanResult {
        plate,
        existing_vehicle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::seeded_registry;
    use crate::decode::tests::encode;
    use crate::decode::PixelGrid;
    use crate::error::{DecodeError, RecognitionError};
    use crate::recognition::tests::FakeRecognizer;
    use crate::types::{PlateRead, RecognitionHit};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::sync::Mutex;

    fn png() -> Vec<u8> {
        encode(
            DynamicImage::ImageRgb8(RgbImage::new(16, 8)),
            ImageFormat::Png,
        )
    }

    /// Records whether it was handed a gray grid.
    struct GrayRecorder {
        saw_gray: Mutex<Option<bool>>,
    }

    impl TextRecognizer for GrayRecorder {
        fn name(&self) -> &'static str {
            "gray-recorder"
        }

        fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionHit>, RecognitionError> {
            *self.saw_gray.lock().unwrap() = Some(grid.is_gray());
            Ok(vec![])
        }
    }

    struct Broken;

    impl TextRecognizer for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn recognize(&self, _grid: &PixelGrid) -> Result<Vec<RecognitionHit>, RecognitionError> {
            Err(RecognitionError::Inference("session crashed".into()))
        }
    }

    #[test]
    fn live_scan_matches_registered_vehicle() {
        let bytes = png();
        let recognizer = FakeRecognizer::new(&[("AB12", 0.9), ("AB 1234-C", 0.2)]);
        let result = scan(
            &RawImage::new(&bytes),
            &recognizer,
            &seeded_registry(),
            &FlowSettings::LIVE,
        )
        .unwrap();
        assert_eq!(result.plate, PlateRead::Plate("AB1234C".to_string()));
        assert_eq!(result.existing_vehicle.unwrap().id, 11);
    }

    #[test]
    fn record_scan_uses_first_confident_match() {
        let bytes = png();
        let recognizer = FakeRecognizer::new(&[("XY98KQ", 0.9), ("Z1", 0.3)]);
        let result = scan(
            &RawImage::new(&bytes),
            &recognizer,
            &seeded_registry(),
            &FlowSettings::RECORD,
        )
        .unwrap();
        assert_eq!(result.plate.as_str(), "XY98KQ");
        assert_eq!(result.existing_vehicle.unwrap().history.len(), 2);
    }

    #[test]
    fn unregistered_plate_still_reports_the_read() {
        let bytes = png();
        let recognizer = FakeRecognizer::new(&[("QQ-7788", 0.8)]);
        let result = scan(
            &RawImage::new(&bytes),
            &recognizer,
            &seeded_registry(),
            &FlowSettings::RECORD,
        )
        .unwrap();
        assert_eq!(result.plate.as_str(), "QQ7788");
        assert!(result.existing_vehicle.is_none());
    }

    #[test]
    fn unreadable_plate_is_unknown_not_error() {
        let bytes = png();
        let recognizer = FakeRecognizer::new(&[("ABC123", 0.2)]);
        let result = scan(
            &RawImage::new(&bytes),
            &recognizer,
            &seeded_registry(),
            &FlowSettings::RECORD,
        )
        .unwrap();
        assert_eq!(result.plate, PlateRead::Unknown);
        assert!(result.existing_vehicle.is_none());
    }

    #[test]
    fn unknown_never_matches_a_vehicle_registered_as_unknown() {
        let registry = seeded_registry();
        registry.with_conn(|conn| {
            conn.execute(
                "INSERT INTO service_vehicle (id, owner_id, license_plate, make, model, year)
                 VALUES (12, 1, 'UNKNOWN', 'Honda', 'Civic', 2015)",
                [],
            )
            .unwrap();
        });
        assert!(registry.lookup_vehicle_by_plate("UNKNOWN").unwrap().is_some());

        let bytes = png();
        let recognizer = FakeRecognizer::new(&[("A1", 0.9)]);
        let result = scan(
            &RawImage::new(&bytes),
            &recognizer,
            &registry,
            &FlowSettings::LIVE,
        )
        .unwrap();
        assert_eq!(result.plate, PlateRead::Unknown);
        assert!(result.existing_vehicle.is_none());
    }

    #[test]
    fn record_flow_feeds_grayscale_and_live_feeds_color() {
        let bytes = png();
        let registry = seeded_registry();
        for (settings, expected) in [(FlowSettings::RECORD, true), (FlowSettings::LIVE, false)] {
            let recorder = GrayRecorder {
                saw_gray: Mutex::new(None),
            };
            scan(&RawImage::new(&bytes), &recorder, &registry, &settings).unwrap();
            assert_eq!(*recorder.saw_gray.lock().unwrap(), Some(expected));
        }
    }

    #[test]
    fn bad_image_is_a_client_error() {
        let recognizer = FakeRecognizer::new(&[("XY98KQ", 0.9)]);
        let err = scan(
            &RawImage::new(b"not an image"),
            &recognizer,
            &seeded_registry(),
            &FlowSettings::LIVE,
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Decode(DecodeError::UnsupportedFormat)));
        assert!(err.is_client_error());
    }

    #[test]
    fn inference_failure_is_a_server_error() {
        let bytes = png();
        let err = scan(
            &RawImage::new(&bytes),
            &Broken,
            &seeded_registry(),
            &FlowSettings::LIVE,
        )
        .unwrap_err();
        assert!(!err.is_client_error());
    }

    #[test]
    fn flows_resolve_settings() {
        let flows = Flows::default();
        assert_eq!(flows.settings(ScanFlow::Live), &FlowSettings::LIVE);
        assert_eq!(flows.settings(ScanFlow::Record), &FlowSettings::RECORD);
        assert_eq!(ScanFlow::default(), ScanFlow::Live);
        assert_eq!("record".parse::<ScanFlow>().unwrap(), ScanFlow::Record);
        assert_eq!("live".parse::<ScanFlow>().unwrap(), ScanFlow::Live);
        assert!("Record".parse::<ScanFlow>().is_err());
    }
}
