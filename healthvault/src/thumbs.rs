//! HealthVault - Thumbnail Engine
//!
//! Renders smaller versions of image attachments.

use std::io::Cursor;

use image::{imageops::FilterType, GenericImageView};

use crate::error::{VaultError, VaultResult};

/// Resize collaborator used by the attachment pipeline
pub trait ImageResizer: Send + Sync {
    /// Scale `image` so its longest edge is `target` pixels.
    ///
    /// Fails with `SmallerThanOriginal` when the image already fits.
    fn resize(&self, image: &[u8], target: u32) -> VaultResult<Vec<u8>>;
}

/// `image`-backed resizer producing JPEG renditions
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailEngine;

impl ThumbnailEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ImageResizer for ThumbnailEngine {
    fn resize(&self, image_data: &[u8], target: u32) -> VaultResult<Vec<u8>> {
        let img = image::load_from_memory(image_data)?;
        let (width, height) = img.dimensions();

        if width.max(height) <= target {
            return Err(VaultError::SmallerThanOriginal);
        }

        // Maintain aspect ratio
        let (new_width, new_height) = if width > height {
            let ratio = target as f32 / width as f32;
            (target, ((height as f32 * ratio) as u32).max(1))
        } else {
            let ratio = target as f32 / height as f32;
            (((width as f32 * ratio) as u32).max(1), target)
        };

        let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);

        // JPEG has no alpha channel
        let rgb = image::DynamicImage::ImageRgb8(resized.to_rgb8());
        let mut output = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut output), image::ImageFormat::Jpeg)?;

        Ok(output)
    }
}
