//! Frame buffers and the perspective correction applied to them.

pub mod frame;
pub mod homography;

pub use frame::{Frame, Rgba};
pub use homography::{apply_transform, validate_corners, Homography, DEFAULT_SQUARE_SIZE};
