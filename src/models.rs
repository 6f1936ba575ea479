//! Locates the PaddleOCR model files and fetches any that are missing.

use crate::error::RecognitionError;
use log::{info, warn};
use std::path::{Path, PathBuf};

pub const DEFAULT_MIRROR: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFile {
    /// DBNet text detector.
    Detection,
    /// CTC text recognizer, English alphabet.
    Recognition,
    /// Character dictionary for the recognizer's output classes.
    Dictionary,
}

impl ModelFile {
    pub const ALL: [ModelFile; 3] = [
        ModelFile::Detection,
        ModelFile::Recognition,
        ModelFile::Dictionary,
    ];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelFile::Detection => "det.onnx",
            ModelFile::Recognition => "rec.onnx",
            ModelFile::Dictionary => "dict.txt",
        }
    }

    /// Location of this file under a mirror's base URL.
    pub fn download_url(&self, mirror: &str) -> String {
        let path = match self {
            ModelFile::Detection => "detection/v3/det.onnx",
            ModelFile::Recognition => "languages/english/rec.onnx",
            ModelFile::Dictionary => "languages/english/dict.txt",
        };
        format!("{}/{}", mirror.trim_end_matches('/'), path)
    }
}

/// Model directory layout.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    dir: PathBuf,
    mirror: String,
}

impl ModelPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ModelPaths {
            dir: dir.into(),
            mirror: DEFAULT_MIRROR.to_string(),
        }
    }

    /// Downloads from `mirror` instead of the default Hugging Face mirror.
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = mirror.into();
        self
    }

    pub fn mirror(&self) -> &str {
        &self.mirror
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: ModelFile) -> PathBuf {
        self.dir.join(file.filename())
    }

    pub fn missing(&self) -> Vec<ModelFile> {
        ModelFile::ALL
            .iter()
            .copied()
            .filter(|&file| !is_present(&self.path(file)))
            .collect()
    }

    /// Fails for the first file that is not on disk.
    pub fn require_all(&self) -> Result<(), RecognitionError> {
        match self.missing().first() {
            Some(&file) => Err(RecognitionError::Unavailable(format!(
                "model file {:?} is missing",
                self.path(file)
            ))),
            None => Ok(()),
        }
    }

    /// Downloads every missing file. Files already on disk are left alone.
    pub async fn ensure_downloaded(&self) -> Result<(), RecognitionError> {
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RecognitionError::Unavailable(format!("{:?}: {}", self.dir, e)))?;

        let client = reqwest::Client::new();
        for file in missing {
            let url = file.download_url(&self.mirror);
            let path = self.path(file);
            info!("Downloading {} to {:?}", url, path);
            if let Err(e) = download(&client, &url, &path).await {
                warn!("Download of {} failed: {}", url, e);
                return Err(RecognitionError::Unavailable(format!(
                    "could not download {}: {}",
                    file.filename(),
                    e
                )));
            }
        }
        Ok(())
    }
}

fn is_present(path: &Path) -> bool {
    std::fs::metadata(path).map_or(false, |m| m.is_file() && m.len() > 0)
}

async fn download(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let body = client.get(url).send().await?.error_for_status()?.bytes().await?;
    // Write under a temporary name so an interrupted download is never
    // mistaken for a model.
    let partial = path.with_extension("part");
    tokio::fs::write(&partial, &body).await?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dir_reports_every_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::new(dir.path());
        assert_eq!(paths.missing(), ModelFile::ALL.to_vec());
        let err = paths.require_all().unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("det.onnx"));
    }

    #[test]
    fn empty_files_count_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("det.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("rec.onnx"), b"weights").unwrap();
        std::fs::write(dir.path().join("dict.txt"), b"a\nb\n").unwrap();
        let paths = ModelPaths::new(dir.path());
        assert_eq!(paths.missing(), vec![ModelFile::Detection]);
    }

    #[tokio::test]
    async fn nothing_is_downloaded_when_all_present() {
        let dir = tempfile::tempdir().unwrap();
        for file in ModelFile::ALL {
            std::fs::write(dir.path().join(file.filename()), b"x").unwrap();
        }
        let paths = ModelPaths::new(dir.path());
        paths.ensure_downloaded().await.unwrap();
        assert!(paths.require_all().is_ok());
    }

    #[tokio::test]
    async fn unreachable_mirror_is_unavailable_and_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::new(dir.path()).with_mirror("http://127.0.0.1:9");
        let err = paths.ensure_downloaded().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(paths.missing(), ModelFile::ALL.to_vec());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[test]
    fn urls_point_at_the_english_models() {
        assert!(ModelFile::Recognition
            .download_url(DEFAULT_MIRROR)
            .ends_with("languages/english/rec.onnx"));
        assert_eq!(
            ModelFile::Detection.download_url("http://mirror.local/"),
            "http://mirror.local/detection/v3/det.onnx"
        );
        assert_eq!(ModelPaths::new("/m").mirror(), DEFAULT_MIRROR);
    }
}
