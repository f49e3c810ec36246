use image::{imageops, imageops::FilterType, GenericImageView, ImageBuffer, Pixel, Primitive};
use num_traits::AsPrimitive;

/// Where the source image sits on the padded canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    TopLeft,
    Center,
}

pub fn to_position(
    width: u32,
    height: u32,
    pad_width: u32,
    pad_height: u32,
    position: Position,
) -> Option<(i64, i64)> {
    if width > pad_width || height > pad_height {
        return None;
    }

    let (x, y) = match position {
        Position::TopLeft => (0, 0),
        Position::Center => ((pad_width - width) / 2, (pad_height - height) / 2),
    };

    Some((x.as_(), y.as_()))
}

pub fn padding<I, P, S>(
    image: &I,
    pad_width: u32,
    pad_height: u32,
    position: Position,
    color: P,
) -> Option<ImageBuffer<P, Vec<S>>>
where
    I: GenericImageView<Pixel = P>,
    P: Pixel<Subpixel = S>,
    S: Primitive,
{
    let (width, height) = image.dimensions();

    to_position(width, height, pad_width, pad_height, position).map(|(x, y)| {
        let mut canvas = ImageBuffer::from_pixel(pad_width, pad_height, color);
        imageops::overlay(&mut canvas, image, x, y);
        canvas
    })
}

/// Resize `image` to fit a `size` x `size` square keeping its aspect ratio, then pad
/// the rest with `color`.
///
/// Returns the square canvas and the `[x, y, w, h]` region the image occupies on it.
pub fn letterbox<P, S>(
    image: &ImageBuffer<P, Vec<S>>,
    size: u32,
    position: Position,
    color: P,
) -> Option<(ImageBuffer<P, Vec<S>>, [u32; 4])>
where
    P: Pixel<Subpixel = S> + 'static,
    S: Primitive + 'static,
{
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || size == 0 {
        return None;
    }

    let scale = size as f32 / width.max(height) as f32;
    let w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, w, h, FilterType::Triangle);
    let (x, y) = to_position(w, h, size, size, position)?;
    let canvas = padding(&resized, size, size, position, color)?;

    Some((canvas, [x as u32, y as u32, w, h]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_to_position_rejects_oversized() {
        assert_eq!(to_position(10, 10, 5, 5, Position::TopLeft), None);
        assert_eq!(to_position(4, 2, 8, 8, Position::Center), Some((2, 3)));
    }

    #[test]
    fn test_letterbox_wide_image() {
        let image = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
        let (canvas, crop) = letterbox(&image, 64, Position::TopLeft, Rgb([0, 0, 0])).unwrap();

        assert_eq!(canvas.dimensions(), (64, 64));
        assert_eq!(crop, [0, 0, 64, 32]);
        assert_eq!(*canvas.get_pixel(10, 10), Rgb([10, 20, 30]));
        assert_eq!(*canvas.get_pixel(10, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_letterbox_centered_tall_image() {
        let image = RgbImage::from_pixel(50, 100, Rgb([255, 255, 255]));
        let (_, crop) = letterbox(&image, 32, Position::Center, Rgb([0, 0, 0])).unwrap();
        assert_eq!(crop, [8, 0, 16, 32]);
    }

    #[test]
    fn test_letterbox_empty_image() {
        let image = RgbImage::new(0, 0);
        assert!(letterbox(&image, 32, Position::TopLeft, Rgb([0, 0, 0])).is_none());
    }
}
