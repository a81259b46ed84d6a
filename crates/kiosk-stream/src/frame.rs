//! Frame conversion for pull-mode sources: YUYV to RGB, resize, JPEG encode.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Output width of pull-mode frames.
pub const OUTPUT_WIDTH: u32 = 640;
/// Output height of pull-mode frames.
pub const OUTPUT_HEIGHT: u32 = 480;
/// JPEG quality of re-encoded pull-mode frames.
pub const JPEG_QUALITY: u8 = 80;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected: (width * height * 3) as usize,
        actual: 0,
    })
}

/// Wrap a packed RGB24 buffer of known dimensions.
pub fn rgb_from_raw(raw: Vec<u8>, width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    let actual = raw.len();
    RgbImage::from_raw(width, height, raw).ok_or(FrameError::InvalidLength { expected, actual })
}

/// Resize to the fixed output size (no-op when already there) and encode as JPEG.
pub fn encode_output_frame(frame: &RgbImage) -> Result<Vec<u8>, FrameError> {
    let resized;
    let frame = if frame.dimensions() == (OUTPUT_WIDTH, OUTPUT_HEIGHT) {
        frame
    } else {
        resized = imageops::resize(frame, OUTPUT_WIDTH, OUTPUT_HEIGHT, FilterType::Triangle);
        &resized
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(frame)?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_pixels() {
        // 2x1 image, neutral chroma: RGB equals luma.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_tint() {
        let yuyv = vec![128, 128, 128, 255];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let [r, g, b] = rgb.get_pixel(0, 0).0;
        assert!(r > g && r > b, "expected red dominant, got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let result = yuyv_to_rgb(&[100, 128], 2, 1);
        assert!(matches!(result, Err(FrameError::InvalidLength { expected: 4, actual: 2 })));
    }

    #[test]
    fn test_rgb_from_raw_length_check() {
        assert!(rgb_from_raw(vec![0; 11], 2, 2).is_err());
        assert!(rgb_from_raw(vec![0; 12], 2, 2).is_ok());
    }

    #[test]
    fn test_encode_resizes_to_output() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([10, 120, 200]));
        let jpeg = encode_output_frame(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (OUTPUT_WIDTH, OUTPUT_HEIGHT));
    }
}
