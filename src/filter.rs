//! Turns raw OCR hits into a single plate read.
//!
//! Every hit is normalized to uppercase ASCII alphanumerics, then rejected if
//! it falls below the confidence threshold (when one is configured) or
//! outside the length bounds. What survives is the candidate set; the
//! selection strategy picks one of them.

use crate::types::{PlateCandidate, PlateRead, RecognitionHit};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// First survivor in engine detection order.
    FirstMatch,
    /// Longest survivor. Equal lengths keep detection order.
    LongestMatch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPolicy {
    /// Minimum confidence; `None` disables the check.
    pub threshold: Option<f32>,
    pub min_len: usize,
    /// Inclusive upper bound; `None` means unbounded.
    pub max_len: Option<usize>,
    pub strategy: SelectionStrategy,
}

impl FilterPolicy {
    fn accepts(&self, candidate: &PlateCandidate) -> bool {
        if let Some(threshold) = self.threshold {
            if candidate.confidence < threshold {
                return false;
            }
        }
        let len = candidate.text.len();
        len >= self.min_len && self.max_len.map_or(true, |max| len <= max)
    }
}

/// Uppercases and strips everything that is not an ASCII letter or digit.
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Surviving candidates in detection order.
pub fn candidates(hits: &[RecognitionHit], policy: &FilterPolicy) -> Vec<PlateCandidate> {
    hits.iter()
        .map(|hit| PlateCandidate {
            text: normalize_plate(&hit.text),
            confidence: hit.confidence,
            raw_len: hit.text.chars().count(),
        })
        .filter(|candidate| {
            let keep = policy.accepts(candidate);
            if !keep {
                debug!(
                    "Rejected candidate {:?} (confidence {:.2})",
                    candidate.text, candidate.confidence
                );
            }
            keep
        })
        .collect()
}

pub fn filter_and_select(hits: &[RecognitionHit], policy: &FilterPolicy) -> PlateRead {
    let survivors = candidates(hits, policy);
    let selected = match policy.strategy {
        SelectionStrategy::FirstMatch => survivors.into_iter().next(),
        SelectionStrategy::LongestMatch => {
            survivors.into_iter().fold(None, |best: Option<PlateCandidate>, c| match best {
                Some(b) if b.text.len() >= c.text.len() => Some(b),
                _ => Some(c),
            })
        }
    };
    match selected {
        Some(candidate) => PlateRead::Plate(candidate.text),
        None => PlateRead::Unknown,
    }
}
