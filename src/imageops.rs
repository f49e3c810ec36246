pub mod mask;
pub mod padding;
pub mod rotation;

pub use rotation::Rotation;
