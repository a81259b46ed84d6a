//! Face signatures: fixed-size grayscale crops used as matching references.

use crate::types::FaceRect;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use thiserror::Error;

/// Side length of every signature, in pixels.
pub const SIGNATURE_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("invalid image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face rectangle {0:?} lies outside the {1}x{2} image")]
    OutOfBounds(FaceRect, u32, u32),
}

/// A 100×100 grayscale face crop.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    image: GrayImage,
}

impl Signature {
    /// Crop `rect` out of `gray` and resize it to the signature size.
    pub fn from_face(gray: &GrayImage, rect: &FaceRect) -> Result<Self, SignatureError> {
        let (width, height) = gray.dimensions();
        let roi = rect
            .clamp_to(width, height)
            .ok_or(SignatureError::OutOfBounds(*rect, width, height))?;

        let crop = imageops::crop_imm(gray, roi.x, roi.y, roi.width, roi.height).to_image();
        Ok(Self::from_image(crop))
    }

    /// Wrap an arbitrary grayscale image, resizing it if needed.
    pub fn from_image(image: GrayImage) -> Self {
        let image = if image.dimensions() == (SIGNATURE_SIZE, SIGNATURE_SIZE) {
            image
        } else {
            imageops::resize(&image, SIGNATURE_SIZE, SIGNATURE_SIZE, FilterType::Triangle)
        };
        Self { image }
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }
}

/// Decode an encoded image (JPEG, PNG, ...) of any channel layout.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, SignatureError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Reduce a decoded image to grayscale.
///
/// Gray, gray+alpha, RGB and RGBA inputs are first normalised to 3-channel
/// RGB (alpha dropped), then converted to luma.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    rgb.to_luma8()
}
