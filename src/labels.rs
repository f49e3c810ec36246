//! PASCAL VOC categories, as emitted by DeepLab-v3 style models.

pub const LABELS: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tv",
];

pub const BACKGROUND: u8 = 0;

pub fn label(index: u8) -> Option<&'static str> {
    LABELS.get(index as usize).copied()
}

/// VOC colour map: the bits of the category index are spread over the high bits of
/// the three channels.
pub fn color(index: u8) -> [u8; 3] {
    let mut rgb = [0u8; 3];
    let mut c = index;
    for shift in (0..8).rev() {
        for (channel, value) in rgb.iter_mut().enumerate() {
            *value |= ((c >> channel) & 1) << shift;
        }
        c >>= 3;
    }
    rgb
}
