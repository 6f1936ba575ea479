use crate::decode::PixelGrid;
use crate::error::RecognitionError;
use crate::types::RecognitionHit;
use log::info;
use once_cell::sync::OnceCell;
use std::time::Instant;

/// A text recognition backend. Implementations are built once and shared
/// read-only, so `recognize` takes `&self`.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hits in the engine's detection order. An image without text yields an
    /// empty vector, not an error.
    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionHit>, RecognitionError>;
}

/// Process-wide engine slot. The first caller builds the engine; concurrent
/// first callers block until it is ready and then share it. A failed build
/// leaves the slot empty.
pub struct SharedEngine<R> {
    cell: OnceCell<R>,
}

impl<R: TextRecognizer> SharedEngine<R> {
    pub const fn new() -> Self {
        SharedEngine {
            cell: OnceCell::new(),
        }
    }

    pub fn get_or_init<F>(&self, init: F) -> Result<&R, RecognitionError>
    where
        F: FnOnce() -> Result<R, RecognitionError>,
    {
        self.cell.get_or_try_init(|| {
            let start = Instant::now();
            let engine = init()?;
            info!(
                "Initialized {} recognition engine in {:?}",
                engine.name(),
                start.elapsed()
            );
            Ok(engine)
        })
    }

    pub fn get(&self) -> Option<&R> {
        self.cell.get()
    }
}

impl<R: TextRecognizer> Default for SharedEngine<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    /// Returns a fixed list of hits for every image.
    pub(crate) struct FakeRecognizer {
        pub hits: Vec<RecognitionHit>,
    }

    impl FakeRecognizer {
        pub(crate) fn new(hits: &[(&str, f32)]) -> Self {
            FakeRecognizer {
                hits: hits
                    .iter()
                    .map(|(text, confidence)| RecognitionHit::new(*text, *confidence))
                    .collect(),
            }
        }
    }

    impl TextRecognizer for FakeRecognizer {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn recognize(&self, _grid: &PixelGrid) -> Result<Vec<RecognitionHit>, RecognitionError> {
            Ok(self.hits.clone())
        }
    }

    #[test]
    fn engine_is_built_once_across_concurrent_first_callers() {
        const CALLERS: usize = 8;
        let shared = Arc::new(SharedEngine::<FakeRecognizer>::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let builds = Arc::clone(&builds);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let engine = shared
                        .get_or_init(|| {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(FakeRecognizer::new(&[("AB1234", 0.9)]))
                        })
                        .unwrap();
                    engine as *const FakeRecognizer as usize
                })
            })
            .collect();

        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn failed_build_can_be_retried() {
        let shared = SharedEngine::<FakeRecognizer>::new();
        let err = shared
            .get_or_init(|| Err(RecognitionError::Unavailable("no weights".into())))
            .map(|_| ())
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(shared.get().is_none());

        let engine = shared.get_or_init(|| Ok(FakeRecognizer::new(&[]))).unwrap();
        assert_eq!(engine.name(), "fake");
        assert!(shared.get().is_some());
    }
}
