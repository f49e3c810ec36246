use image::{imageops, ImageBuffer, Pixel};

use crate::errors::{Result, SegError};

/// Clockwise sensor rotation of a frame, restricted to quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalises `degrees` modulo 360. Anything other than a quarter turn is rejected.
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            _ => Err(SegError::Validation {
                field: "rotation".to_string(),
                reason: format!("must be a multiple of 90 degrees, got {degrees}"),
            }),
        }
    }

    pub const fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub const fn swaps_dimensions(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// Dimensions of a `width` x `height` image after rotation.
    pub const fn rotated_dimensions(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Re-render `image` rotated clockwise into a new buffer.
    pub fn apply<P>(self, image: &ImageBuffer<P, Vec<P::Subpixel>>) -> ImageBuffer<P, Vec<P::Subpixel>>
    where
        P: Pixel + 'static,
    {
        match self {
            Self::Deg0 => image.clone(),
            Self::Deg90 => imageops::rotate90(image),
            Self::Deg180 => imageops::rotate180(image),
            Self::Deg270 => imageops::rotate270(image),
        }
    }
}

impl TryFrom<i32> for Rotation {
    type Error = SegError;

    fn try_from(degrees: i32) -> Result<Self> {
        Self::from_degrees(degrees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_degrees_are_normalised() -> Result<()> {
        assert_eq!(Rotation::from_degrees(0)?, Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(450)?, Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(-90)?, Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(-180)?, Rotation::Deg180);
        Ok(())
    }

    #[test]
    fn test_non_quarter_turn_is_rejected() {
        let err = Rotation::from_degrees(45).unwrap_err();
        assert!(matches!(err, SegError::Validation { ref field, .. } if field == "rotation"));
    }

    #[test]
    fn test_rotated_dimensions() {
        let image = RgbaImage::new(4, 3);
        for (rotation, expected) in [
            (Rotation::Deg0, (4, 3)),
            (Rotation::Deg90, (3, 4)),
            (Rotation::Deg180, (4, 3)),
            (Rotation::Deg270, (3, 4)),
        ] {
            assert_eq!(rotation.apply(&image).dimensions(), expected);
            assert_eq!(rotation.rotated_dimensions(4, 3), expected);
        }
    }

    #[test]
    fn test_quarter_turn_is_clockwise() {
        let a = Rgba([255, 0, 0, 255]);
        let b = Rgba([0, 0, 255, 255]);
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, a);
        image.put_pixel(1, 0, b);

        let rotated = Rotation::Deg90.apply(&image);
        assert_eq!(*rotated.get_pixel(0, 0), a);
        assert_eq!(*rotated.get_pixel(0, 1), b);

        let rotated = Rotation::Deg270.apply(&image);
        assert_eq!(*rotated.get_pixel(0, 0), b);
        assert_eq!(*rotated.get_pixel(0, 1), a);
    }
}
