use image::{
    imageops, imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgba,
    RgbaImage,
};
use imageproc::map::map_colors;
use ndarray::ArrayView3;

use crate::errors::{Result, SegError};
use crate::labels;
use crate::result::ConfidenceMask;

/// Category index per pixel from `(C, H, W)` scores.
///
/// With a single channel the score is thresholded into background (0) and
/// foreground (1); otherwise the highest scoring channel wins.
pub fn category_mask(scores: ArrayView3<f32>, threshold: f32) -> GrayImage {
    let (channels, height, width) = scores.dim();

    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if channels == 1 {
            return Luma([u8::from(scores[[0, y, x]] > threshold)]);
        }

        let mut best = 0;
        for c in 1..channels.min(256) {
            if scores[[c, y, x]] > scores[[best, y, x]] {
                best = c;
            }
        }
        Luma([best as u8])
    })
}

/// One score map per channel: softmax over channels, or the clamped score for a
/// single-channel output.
pub fn confidence_masks(scores: ArrayView3<f32>) -> Vec<ConfidenceMask> {
    let (channels, height, width) = scores.dim();
    let (w, h) = (width as u32, height as u32);

    if channels == 1 {
        return vec![ConfidenceMask::from_fn(w, h, |x, y| {
            Luma([scores[[0, y as usize, x as usize]].clamp(0.0, 1.0)])
        })];
    }

    let mut masks = vec![ConfidenceMask::new(w, h); channels];
    for y in 0..height {
        for x in 0..width {
            let pixel = scores.slice(ndarray::s![.., y, x]);
            let max = pixel.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            let sum: f32 = pixel.iter().map(|&v| (v - max).exp()).sum();
            for (c, mask) in masks.iter_mut().enumerate() {
                let p = (pixel[c] - max).exp() / sum;
                mask.put_pixel(x as u32, y as u32, Luma([p]));
            }
        }
    }
    masks
}

/// Cut the `[x, y, w, h]` region out of a model-sized mask and scale it back to the
/// input image size.
pub fn restore<P>(
    mask: &ImageBuffer<P, Vec<P::Subpixel>>,
    crop: [u32; 4],
    width: u32,
    height: u32,
    filter: FilterType,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    let [x, y, w, h] = crop;
    let cropped = imageops::crop_imm(mask, x, y, w, h).to_image();
    imageops::resize(&cropped, width, height, filter)
}

/// Colour each category with the VOC palette; background stays transparent.
pub fn colorize(mask: &GrayImage, alpha: u8) -> RgbaImage {
    map_colors(mask, |Luma([index])| {
        if index == labels::BACKGROUND {
            Rgba([0, 0, 0, 0])
        } else {
            let [r, g, b] = labels::color(index);
            Rgba([r, g, b, alpha])
        }
    })
}

/// Blend the coloured mask over `image`.
pub fn overlay(image: &DynamicImage, mask: &GrayImage, alpha: u8) -> Result<RgbaImage> {
    let mut canvas = image.to_rgba8();
    if canvas.dimensions() != mask.dimensions() {
        return Err(SegError::Validation {
            field: "mask".to_string(),
            reason: format!(
                "size {:?} does not match image size {:?}",
                mask.dimensions(),
                canvas.dimensions()
            ),
        });
    }

    imageops::overlay(&mut canvas, &colorize(mask, alpha), 0, 0);
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use ndarray::Array3;

    #[test]
    fn test_category_mask_argmax() {
        let mut scores = Array3::<f32>::zeros((3, 1, 2));
        scores[[2, 0, 0]] = 4.0;
        scores[[1, 0, 1]] = 1.0;

        let mask = category_mask(scores.view(), 0.5);
        assert_eq!(mask.dimensions(), (2, 1));
        assert_eq!(mask.get_pixel(0, 0).0, [2]);
        assert_eq!(mask.get_pixel(1, 0).0, [1]);
    }

    #[test]
    fn test_category_mask_threshold_single_channel() {
        let scores = Array3::from_shape_vec((1, 1, 3), vec![0.2, 0.5, 0.9]).unwrap();
        let mask = category_mask(scores.view(), 0.5);
        assert_eq!(mask.into_raw(), vec![0, 0, 1]);
    }

    #[test]
    fn test_confidence_masks_sum_to_one() {
        let scores = Array3::from_shape_vec((2, 1, 1), vec![1.0, 3.0]).unwrap();
        let masks = confidence_masks(scores.view());
        assert_eq!(masks.len(), 2);

        let total = masks[0].get_pixel(0, 0).0[0] + masks[1].get_pixel(0, 0).0[0];
        assert!((total - 1.0).abs() < 1e-6);
        assert!(masks[1].get_pixel(0, 0).0[0] > masks[0].get_pixel(0, 0).0[0]);
    }

    #[test]
    fn test_restore_crops_then_scales() {
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(0, 0, Luma([7]));
        mask.put_pixel(1, 1, Luma([7]));

        let restored = restore(&mask, [0, 0, 2, 2], 8, 8, FilterType::Nearest);
        assert_eq!(restored.dimensions(), (8, 8));
        assert_eq!(restored.get_pixel(0, 0).0, [7]);
        assert_eq!(restored.get_pixel(7, 0).0, [0]);
    }

    #[test]
    fn test_overlay_requires_matching_sizes() -> Result<()> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])));
        assert!(overlay(&image, &GrayImage::new(2, 2), 128).is_err());

        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, Luma([15]));
        let blended = overlay(&image, &mask, 255)?;

        let Rgba([r, g, b, a]) = *blended.get_pixel(1, 1);
        assert!(r.abs_diff(192) <= 1 && g.abs_diff(128) <= 1 && b.abs_diff(128) <= 1);
        assert_eq!(a, 255);
        assert_eq!(*blended.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        Ok(())
    }
}
