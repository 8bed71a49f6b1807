//! Crop-then-resize derivation of fixed-size variants.
//!
//! The original is decoded and cropped once; every target is then resized
//! from that shared crop independently, so one failing target never stops
//! the others. The crop bounds check happens before any target is touched
//! and fails the whole call.

use crate::{
    errors::{ErrorKind, PipelineError, PipelineResult},
    models::{crop::CropRectangle, target::DerivationTarget},
};
use bytes::Bytes;
use fast_image_resize as fr;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::{
    collections::{BTreeMap, HashSet},
    io::Cursor,
};

/// One encoded derivative.
#[derive(Debug, Clone)]
pub struct DerivedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Per-target derivation outcome keyed by image type.
pub type DerivationOutput = BTreeMap<String, Result<DerivedImage, ErrorKind>>;

#[derive(Debug, Clone, Copy)]
pub struct DerivationEngine {
    max_target_dimension: u32,
}

impl DerivationEngine {
    pub fn new(max_target_dimension: u32) -> Self {
        Self {
            max_target_dimension,
        }
    }

    /// Reject target lists that cannot produce a well-formed result map:
    /// empty lists, empty keys or buckets, and repeated image types.
    pub fn validate_targets(targets: &[DerivationTarget]) -> PipelineResult<()> {
        if targets.is_empty() {
            return Err(PipelineError::MalformedRequest(
                "at least one target is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for target in targets {
            if target.image_type().is_empty() {
                return Err(PipelineError::MalformedRequest(format!(
                    "destination key `{}` has no image type",
                    target.destination_key.as_str()
                )));
            }
            if target.bucket.trim().is_empty() {
                return Err(PipelineError::MalformedRequest(format!(
                    "target `{}` has no bucket",
                    target.image_type()
                )));
            }
            if !seen.insert(target.image_type()) {
                return Err(PipelineError::MalformedRequest(format!(
                    "image type `{}` requested more than once",
                    target.image_type()
                )));
            }
        }
        Ok(())
    }

    /// Produce one derivative per target from `original`.
    ///
    /// Fails as a whole only for malformed target lists, undecodable
    /// originals and out-of-bounds crops; everything else is reported per
    /// target in the returned map.
    pub fn derive(
        &self,
        original: &[u8],
        crop: CropRectangle,
        targets: &[DerivationTarget],
    ) -> PipelineResult<DerivationOutput> {
        Self::validate_targets(targets)?;

        let reader = ImageReader::new(Cursor::new(original))
            .with_guessed_format()
            .map_err(|e| PipelineError::UndecodableImage(e.to_string()))?;
        let source_format = reader.format();
        let decoded = reader
            .decode()
            .map_err(|e| PipelineError::UndecodableImage(e.to_string()))?;

        let (width, height) = decoded.dimensions();
        if !crop.fits_within(width, height) {
            return Err(PipelineError::InvalidCropBounds {
                crop,
                width,
                height,
            });
        }

        let cropped = decoded
            .crop_imm(crop.x, crop.y, crop.width, crop.height)
            .to_rgba8();
        let output_format = OutputFormat::for_source(source_format);

        let mut output = DerivationOutput::new();
        for target in targets {
            let result = self.derive_target(&cropped, target, output_format);
            if let Err(kind) = &result {
                tracing::warn!(
                    image_type = target.image_type(),
                    width = target.width,
                    height = target.height,
                    error = %kind,
                    "target derivation failed"
                );
            }
            output.insert(target.image_type().to_string(), result);
        }
        Ok(output)
    }

    /// [`DerivationEngine::derive`] on the blocking thread pool.
    pub async fn derive_blocking(
        &self,
        original: Vec<u8>,
        crop: CropRectangle,
        targets: Vec<DerivationTarget>,
    ) -> PipelineResult<DerivationOutput> {
        let engine = *self;
        tokio::task::spawn_blocking(move || engine.derive(&original, crop, &targets))
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?
    }

    fn derive_target(
        &self,
        cropped: &RgbaImage,
        target: &DerivationTarget,
        format: OutputFormat,
    ) -> Result<DerivedImage, ErrorKind> {
        let (w, h) = (target.width, target.height);
        if w == 0 || h == 0 || w > self.max_target_dimension || h > self.max_target_dimension {
            return Err(ErrorKind::InvalidDimensions);
        }

        let resized = match resize_exact_fast(cropped, w, h) {
            Ok(resized) => resized,
            Err(err) => {
                tracing::warn!("fast resize failed, falling back to image::resize_exact: {}", err);
                image::imageops::resize(cropped, w, h, image::imageops::FilterType::Lanczos3)
            }
        };

        let bytes = format
            .encode(resized)
            .map_err(|_| ErrorKind::ProcessingFailed)?;
        Ok(DerivedImage {
            bytes,
            content_type: format.content_type(),
            width: w,
            height: h,
        })
    }
}

/// Stretch `source` to exactly `width` x `height` with a Lanczos3 convolution.
fn resize_exact_fast(source: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, String> {
    let (src_width, src_height) = source.dimensions();
    let src_image = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        source.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| format!("source buffer: {}", e))?;
    let mut dst_image = fr::images::Image::new(width, height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3));
    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| e.to_string())?;

    ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| "output buffer length mismatch".to_string())
}

/// Encoding used for derivatives, chosen from the original's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    fn for_source(format: Option<ImageFormat>) -> Self {
        match format {
            Some(ImageFormat::Jpeg) => Self::Jpeg,
            Some(ImageFormat::WebP) => Self::WebP,
            _ => Self::Png,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }

    fn encode(self, image: RgbaImage) -> image::ImageResult<Bytes> {
        let mut buffer = Cursor::new(Vec::new());
        match self {
            Self::Jpeg => DynamicImage::ImageRgba8(image)
                .to_rgb8()
                .write_to(&mut buffer, ImageFormat::Jpeg)?,
            Self::Png => image.write_to(&mut buffer, ImageFormat::Png)?,
            Self::WebP => image.write_to(&mut buffer, ImageFormat::WebP)?,
        }
        Ok(Bytes::from(buffer.into_inner()))
    }
}
