use image::{DynamicImage, RgbaImage};

use crate::errors::{Result, SegError};
use crate::imageops::Rotation;

const RGBA_CHANNELS: usize = 4;

/// A camera frame: RGBA pixels plus the sensor rotation needed to bring it upright.
///
/// Frames are transient; converting one into the engine image consumes it.
#[derive(Debug, Clone)]
pub struct Frame {
    buffer: RgbaImage,
    rotation: Rotation,
}

impl Frame {
    pub fn new(buffer: RgbaImage, rotation_degrees: i32) -> Result<Self> {
        Ok(Self {
            buffer,
            rotation: Rotation::from_degrees(rotation_degrees)?,
        })
    }

    /// Build a frame from a tightly packed RGBA buffer.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>, rotation_degrees: i32) -> Result<Self> {
        let expected = RGBA_CHANNELS * width as usize * height as usize;
        if data.len() != expected {
            return Err(SegError::Validation {
                field: "frame".to_string(),
                reason: format!(
                    "buffer length mismatch: expected {expected}, got {}",
                    data.len()
                ),
            });
        }

        let buffer = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            SegError::Validation {
                field: "frame".to_string(),
                reason: "buffer does not describe an RGBA image".to_string(),
            }
        })?;
        Self::new(buffer, rotation_degrees)
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub const fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Dimensions of the image the engine will see.
    pub fn upright_dimensions(&self) -> (u32, u32) {
        self.rotation.rotated_dimensions(self.width(), self.height())
    }

    /// Render the frame upright into the engine's image type.
    pub fn into_engine_image(self) -> DynamicImage {
        let upright = match self.rotation {
            Rotation::Deg0 => self.buffer,
            rotation => rotation.apply(&self.buffer),
        };
        DynamicImage::ImageRgba8(upright)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn test_from_raw_checks_length() {
        let err = Frame::from_raw(2, 2, vec![0; 15], 0).unwrap_err();
        assert!(matches!(err, SegError::Validation { .. }));
        assert!(Frame::from_raw(2, 2, vec![0; 16], 0).is_ok());
    }

    #[test]
    fn test_rotation_swaps_dimensions() -> Result<()> {
        for (degrees, expected) in [(0, (6, 4)), (90, (4, 6)), (180, (6, 4)), (270, (4, 6))] {
            let frame = Frame::from_raw(6, 4, vec![0; 6 * 4 * 4], degrees)?;
            assert_eq!(frame.upright_dimensions(), expected);
            assert_eq!(frame.into_engine_image().dimensions(), expected);
        }
        Ok(())
    }

    #[test]
    fn test_rejects_odd_rotation() {
        assert!(Frame::new(RgbaImage::new(1, 1), 30).is_err());
    }
}
