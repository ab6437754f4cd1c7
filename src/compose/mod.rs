//! Still-frame composition: camera frame, optional mirror, optional logo.

pub mod canvas;
pub mod watermark;

use std::io::Cursor;
use std::sync::Arc;

use image::{imageops::FilterType, ImageFormat, RgbaImage};
use kurbo::Rect;
use thiserror::Error;

use crate::config;
use crate::video::VideoSource;
use canvas::Canvas;
pub use watermark::{LoadState, WatermarkAsset, WatermarkLoader};

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Video source is not ready")]
    SourceNotReady,
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// An encoded still ready for preview and upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    /// PNG bytes
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

/// Bottom corner the watermark is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Corner {
    BottomLeft,
    #[default]
    BottomRight,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub mirror: bool,
    pub watermark: Option<WatermarkAsset>,
}

/// Draws one still from a video source and encodes it as PNG
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    /// Edge of the square box the logo is fitted into
    pub watermark_size: u32,
    pub margin: u32,
    pub corner: Corner,
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self {
            watermark_size: config::WATERMARK_SIZE,
            margin: config::WATERMARK_MARGIN,
            corner: Corner::default(),
        }
    }
}

impl FrameCompositor {
    /// Compose the source's current frame into an encoded still.
    ///
    /// The buffer is sized to the source's native resolution. Mirroring only
    /// applies to the camera frame; the watermark is always drawn upright.
    /// A watermark that is not loaded is skipped.
    pub fn compose<S>(&self, source: &S, options: &ComposeOptions) -> Result<CapturedImage, ComposeError>
    where
        S: VideoSource + ?Sized,
    {
        let (width, height) = source.native_size();
        if width == 0 || height == 0 {
            return Err(ComposeError::SourceNotReady);
        }
        let frame = source
            .current_frame()
            .filter(|f| f.width() > 0 && f.height() > 0)
            .ok_or(ComposeError::SourceNotReady)?;

        let mut canvas = Canvas::new(width, height);
        let full = Rect::new(0.0, 0.0, f64::from(width), f64::from(height));

        {
            let mut scoped = canvas.save();
            if options.mirror {
                scoped.mirror_horizontally();
            }
            scoped.draw_image(&frame, full);
        }

        if let Some(logo) = options.watermark.as_ref().and_then(WatermarkAsset::image) {
            self.draw_watermark(&mut canvas, logo);
        } else if let Some(asset) = &options.watermark {
            log::debug!("Watermark {} not ready, composing without it", asset.source);
        }

        let image = canvas.into_image();
        let bytes = encode_png(&image)?;
        log::info!("Composed {}x{} still ({} bytes)", width, height, bytes.len());

        Ok(CapturedImage {
            bytes: bytes.into(),
            width,
            height,
        })
    }

    /// Where the logo lands for a frame of the given size, in pixels
    pub fn watermark_rect(&self, frame: (u32, u32), logo: (u32, u32)) -> Option<(u32, u32, u32, u32)> {
        let (fw, fh) = frame;
        let (lw, lh) = logo;
        if lw == 0 || lh == 0 || self.watermark_size == 0 {
            return None;
        }

        // Fit into the square box, keeping the logo's aspect ratio
        let scale = f64::from(self.watermark_size) / f64::from(lw.max(lh));
        let w = ((f64::from(lw) * scale).round() as u32).max(1);
        let h = ((f64::from(lh) * scale).round() as u32).max(1);

        let y = fh.checked_sub(self.margin + h)?;
        let x = match self.corner {
            Corner::BottomLeft => self.margin,
            Corner::BottomRight => fw.checked_sub(self.margin + w)?,
        };
        Some((x, y, w, h))
    }

    fn draw_watermark(&self, canvas: &mut Canvas, logo: &RgbaImage) {
        let Some((x, y, w, h)) =
            self.watermark_rect((canvas.width(), canvas.height()), logo.dimensions())
        else {
            log::warn!(
                "Frame {}x{} too small for watermark, skipping it",
                canvas.width(),
                canvas.height()
            );
            return;
        };

        let scaled = if logo.dimensions() == (w, h) {
            logo.clone()
        } else {
            image::imageops::resize(logo, w, h, FilterType::Triangle)
        };
        let dest = Rect::new(
            f64::from(x),
            f64::from(y),
            f64::from(x + w),
            f64::from(y + h),
        );
        canvas.draw_image(&scaled, dest);
    }
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ComposeError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}
