use crate::error::DecodeError;
use image::{imageops, DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage};
use log::debug;
use std::io::Cursor;

/// Encoded image as received from the caller.
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub bytes: &'a [u8],
    /// Declared format, if the caller knows it. Inferred from the data when
    /// absent.
    pub format: Option<ImageFormat>,
}

impl<'a> RawImage<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        RawImage {
            bytes,
            format: None,
        }
    }

    /// Uses the MIME type as the declared format when it names a known image
    /// codec; otherwise the format is inferred.
    pub fn with_mime_type(bytes: &'a [u8], mime: Option<&str>) -> Self {
        RawImage {
            bytes,
            format: mime.and_then(ImageFormat::from_mime_type),
        }
    }
}

/// Decoded pixels, owned by the scan that produced them.
#[derive(Debug, Clone)]
pub enum PixelGrid {
    Color(RgbImage),
    Gray(GrayImage),
}

impl PixelGrid {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            PixelGrid::Color(img) => img.dimensions(),
            PixelGrid::Gray(img) => img.dimensions(),
        }
    }

    pub fn is_gray(&self) -> bool {
        matches!(self, PixelGrid::Gray(_))
    }

    /// Luminance conversion used to normalize contrast before recognition.
    /// A grid that is already gray comes back unchanged.
    pub fn into_grayscale(self) -> PixelGrid {
        match self {
            PixelGrid::Color(img) => PixelGrid::Gray(imageops::grayscale(&img)),
            gray @ PixelGrid::Gray(_) => gray,
        }
    }

    /// Three-channel view for models that expect RGB input. Gray pixels are
    /// replicated across channels.
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            PixelGrid::Color(img) => img.clone(),
            PixelGrid::Gray(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
        }
    }
}

pub fn decode_image(raw: &RawImage<'_>) -> Result<PixelGrid, DecodeError> {
    if raw.bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = match raw.format {
        Some(format) => ImageReader::with_format(Cursor::new(raw.bytes), format),
        None => ImageReader::new(Cursor::new(raw.bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(e.into()))?,
    };
    if reader.format().is_none() {
        return Err(DecodeError::UnsupportedFormat);
    }

    let image = reader.decode().map_err(DecodeError::Malformed)?;
    debug!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );

    // Single-channel sources (with or without alpha) stay gray.
    Ok(if image.color().has_color() {
        PixelGrid::Color(image.to_rgb8())
    } else {
        PixelGrid::Gray(image.to_luma8())
    })
}
