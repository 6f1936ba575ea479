//! PaddleOCR text detection and recognition on ONNX Runtime.

use crate::decode::PixelGrid;
use crate::error::RecognitionError;
use crate::models::{ModelFile, ModelPaths};
use crate::recognition::{SharedEngine, TextRecognizer};
use crate::types::{BoundingBox, RecognitionHit};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use log::{debug, info};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::fmt::Display;
use std::path::Path;
use std::sync::Mutex;

const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone)]
pub struct PaddleOcrConfig {
    /// Longest side fed to the detector.
    pub det_limit_side: u32,
    /// Probability above which a map pixel counts as text.
    pub det_threshold: f32,
    /// Minimum mean probability of a text component.
    pub box_threshold: f32,
    /// DB unclip ratio used to grow the shrunk text kernels back.
    pub unclip_ratio: f32,
    pub min_box_side: u32,
    pub rec_height: u32,
    pub rec_max_width: u32,
    pub intra_threads: usize,
}

impl Default for PaddleOcrConfig {
    fn default() -> Self {
        PaddleOcrConfig {
            det_limit_side: 960,
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_box_side: 3,
            rec_height: 48,
            rec_max_width: 320,
            intra_threads: 4,
        }
    }
}

struct Model {
    session: Mutex<Session>,
    output: String,
}

impl Model {
    fn load(path: &Path, threads: usize) -> Result<Self, RecognitionError> {
        info!("Loading ONNX model from {:?}", path);
        let session = Session::builder()
            .map_err(unavailable(path))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable(path))?
            .with_intra_threads(threads)
            .map_err(unavailable(path))?
            .commit_from_file(path)
            .map_err(unavailable(path))?;
        let output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| RecognitionError::Unavailable(format!("{:?} has no outputs", path)))?;
        Ok(Model {
            session: Mutex::new(session),
            output,
        })
    }

    /// Runs the model on one NCHW tensor and hands the first output's shape
    /// and data to `read`.
    fn run<T>(
        &self,
        input: Array4<f32>,
        read: impl FnOnce(&[i64], &[f32]) -> Result<T, RecognitionError>,
    ) -> Result<T, RecognitionError> {
        let tensor = Tensor::from_array(input).map_err(inference)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| RecognitionError::Inference("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![tensor]).map_err(inference)?;
        let (shape, data) = outputs[self.output.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(inference)?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        read(&dims, data)
    }
}

static ENGINE: SharedEngine<PaddleOcrEngine> = SharedEngine::new();

/// The process-wide engine, loaded on first use.
pub fn shared_engine(
    paths: &ModelPaths,
    config: PaddleOcrConfig,
) -> Result<&'static PaddleOcrEngine, RecognitionError> {
    ENGINE.get_or_init(|| PaddleOcrEngine::load(paths, config))
}

pub struct PaddleOcrEngine {
    detector: Model,
    recognizer: Model,
    dictionary: Vec<String>,
    config: PaddleOcrConfig,
}

impl PaddleOcrEngine {
    pub fn load(paths: &ModelPaths, config: PaddleOcrConfig) -> Result<Self, RecognitionError> {
        paths.require_all()?;
        let dictionary = load_dictionary(&paths.path(ModelFile::Dictionary))?;
        let detector = Model::load(&paths.path(ModelFile::Detection), config.intra_threads)?;
        let recognizer = Model::load(&paths.path(ModelFile::Recognition), config.intra_threads)?;
        info!("Loaded dictionary with {} characters", dictionary.len());
        Ok(PaddleOcrEngine {
            detector,
            recognizer,
            dictionary,
            config,
        })
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, RecognitionError> {
        let (width, height) = image.dimensions();
        let (det_w, det_h) = det_input_size(width, height, self.config.det_limit_side);
        let resized = imageops::resize(image, det_w, det_h, FilterType::Triangle);
        let input = Array4::from_shape_fn((1, 3, det_h as usize, det_w as usize), |(_, c, y, x)| {
            let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (v - DET_MEAN[c]) / DET_STD[c]
        });

        self.detector.run(input, |shape, data| {
            let map = ProbabilityMap::from_output(shape, data)?;
            Ok(boxes_from_map(&map, (width, height), &self.config))
        })
    }

    fn read_line(
        &self,
        image: &RgbImage,
        bounds: BoundingBox,
    ) -> Result<Option<(String, f32)>, RecognitionError> {
        let crop =
            imageops::crop_imm(image, bounds.x, bounds.y, bounds.width, bounds.height).to_image();
        let rec_h = self.config.rec_height;
        let rec_w = ((rec_h as f32 * bounds.width as f32 / bounds.height as f32).ceil() as u32)
            .clamp(rec_h / 4, self.config.rec_max_width);
        let resized = imageops::resize(&crop, rec_w, rec_h, FilterType::Triangle);
        let input = Array4::from_shape_fn((1, 3, rec_h as usize, rec_w as usize), |(_, c, y, x)| {
            let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (v - 0.5) / 0.5
        });

        self.recognizer.run(input, |shape, data| {
            let (steps, classes) = sequence_dims(shape, data.len())?;
            Ok(ctc_greedy_decode(data, steps, classes, &self.dictionary))
        })
    }
}

impl TextRecognizer for PaddleOcrEngine {
    fn name(&self) -> &'static str {
        "paddleocr"
    }

    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionHit>, RecognitionError> {
        let image = grid.to_rgb();
        let boxes = self.detect(&image)?;
        debug!("Detected {} text regions", boxes.len());

        let mut hits = Vec::with_capacity(boxes.len());
        for bounds in boxes {
            if let Some((text, confidence)) = self.read_line(&image, bounds)? {
                debug!("Region {:?}: {:?} ({:.3})", bounds, text, confidence);
                hits.push(RecognitionHit {
                    bounds,
                    text,
                    confidence,
                });
            }
        }
        Ok(hits)
    }
}

fn unavailable<E: Display>(path: &Path) -> impl FnOnce(E) -> RecognitionError + '_ {
    move |e| RecognitionError::Unavailable(format!("{:?}: {}", path, e))
}

fn inference<E: Display>(e: E) -> RecognitionError {
    RecognitionError::Inference(e.to_string())
}

fn load_dictionary(path: &Path) -> Result<Vec<String>, RecognitionError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| RecognitionError::Unavailable(format!("{:?}: {}", path, e)))?;
    let dictionary: Vec<String> = contents
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if dictionary.is_empty() {
        return Err(RecognitionError::Unavailable(format!(
            "{:?} contains no characters",
            path
        )));
    }
    Ok(dictionary)
}

/// Detector input size: longest side capped at `limit`, both sides rounded
/// to a multiple of 32.
fn det_input_size(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let longest = width.max(height) as f32;
    let ratio = if longest > limit as f32 {
        limit as f32 / longest
    } else {
        1.0
    };
    let round = |side: u32| (((side as f32 * ratio) / 32.0).round() as u32).max(1) * 32;
    (round(width), round(height))
}

struct ProbabilityMap<'a> {
    data: &'a [f32],
    width: u32,
    height: u32,
}

impl<'a> ProbabilityMap<'a> {
    /// Reads a `[N, 1, H, W]` detector output, using the first map.
    fn from_output(shape: &[i64], data: &'a [f32]) -> Result<Self, RecognitionError> {
        let (height, width) = match shape {
            [.., h, w] if *h > 0 && *w > 0 => (*h as u32, *w as u32),
            _ => return Err(bad_shape("detector", shape)),
        };
        if data.len() < (width as usize) * (height as usize) {
            return Err(bad_shape("detector", shape));
        }
        Ok(ProbabilityMap {
            data,
            width,
            height,
        })
    }

    fn at(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }
}

#[derive(Clone, Copy)]
struct Component {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    score_sum: f32,
    pixels: u32,
}

/// DB post-processing: binarize, label connected components, score them and
/// grow each surviving box by the unclip distance. Boxes are returned in
/// source-image coordinates, in reading order.
fn boxes_from_map(
    map: &ProbabilityMap<'_>,
    (src_w, src_h): (u32, u32),
    config: &PaddleOcrConfig,
) -> Vec<BoundingBox> {
    let mask = GrayImage::from_fn(map.width, map.height, |x, y| {
        if map.at(x, y) > config.det_threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut components: Vec<Option<Component>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() < label {
            components.resize(label, None);
        }
        let score = map.at(x, y);
        let entry = components[label - 1].get_or_insert(Component {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            score_sum: 0.0,
            pixels: 0,
        });
        entry.min_x = entry.min_x.min(x);
        entry.min_y = entry.min_y.min(y);
        entry.max_x = entry.max_x.max(x);
        entry.max_y = entry.max_y.max(y);
        entry.score_sum += score;
        entry.pixels += 1;
    }

    let scale_x = src_w as f32 / map.width as f32;
    let scale_y = src_h as f32 / map.height as f32;
    let mut boxes: Vec<BoundingBox> = components
        .into_iter()
        .flatten()
        .filter(|c| c.score_sum / c.pixels as f32 >= config.box_threshold)
        .filter_map(|c| {
            let w = (c.max_x - c.min_x + 1) as f32;
            let h = (c.max_y - c.min_y + 1) as f32;
            if w.min(h) < config.min_box_side as f32 {
                return None;
            }
            let grow = w * h * config.unclip_ratio / (2.0 * (w + h));
            let x0 = ((c.min_x as f32 - grow) * scale_x).max(0.0);
            let y0 = ((c.min_y as f32 - grow) * scale_y).max(0.0);
            let x1 = ((c.max_x as f32 + 1.0 + grow) * scale_x).min(src_w as f32);
            let y1 = ((c.max_y as f32 + 1.0 + grow) * scale_y).min(src_h as f32);
            let bounds = BoundingBox {
                x: x0 as u32,
                y: y0 as u32,
                width: (x1 - x0).round() as u32,
                height: (y1 - y0).round() as u32,
            };
            (bounds.width > 0 && bounds.height > 0).then_some(bounds)
        })
        .collect();

    sort_reading_order(&mut boxes);
    boxes
}

/// Top-to-bottom, then left-to-right for boxes on roughly the same line.
fn sort_reading_order(boxes: &mut [BoundingBox]) {
    boxes.sort_by_key(|b| (b.y, b.x));
    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0 && boxes[j].y.abs_diff(boxes[j - 1].y) < 10 && boxes[j].x < boxes[j - 1].x {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// `(steps, classes)` of a `[N, T, C]` recognizer output.
fn sequence_dims(shape: &[i64], len: usize) -> Result<(usize, usize), RecognitionError> {
    match *shape {
        [_, steps, classes] if steps >= 0 && classes > 0 => {
            let (steps, classes) = (steps as usize, classes as usize);
            if len < steps * classes {
                return Err(bad_shape("recognizer", shape));
            }
            Ok((steps, classes))
        }
        _ => Err(bad_shape("recognizer", shape)),
    }
}

fn bad_shape(model: &str, shape: &[i64]) -> RecognitionError {
    RecognitionError::Inference(format!("unexpected {} output shape {:?}", model, shape))
}

/// Greedy CTC decode of a `[steps, classes]` probability matrix. Class 0 is
/// the blank; class `i` maps to `dictionary[i - 1]`; anything past the
/// dictionary is a space. Returns `None` when nothing was emitted.
fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    dictionary: &[String],
) -> Option<(String, f32)> {
    if classes == 0 {
        return None;
    }
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = None;
    for step in probs.chunks_exact(classes).take(steps) {
        let (index, score) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });
        if index != 0 && previous != Some(index) {
            match dictionary.get(index - 1) {
                Some(symbol) => text.push_str(symbol),
                None => text.push(' '),
            }
            scores.push(score);
        }
        previous = Some(index);
    }
    if scores.is_empty() {
        return None;
    }
    let confidence = scores.iter().sum::<f32>() / scores.len() as f32;
    Some((text, confidence.clamp(0.0, 1.0)))
}
