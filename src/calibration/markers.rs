//! Fiducial markers
//!
//! The whiteboard carries four printed markers at its corners, from one of two
//! disjoint ID sets:
//!
//! ```text
//! 0               1    4               5
//!  ______________       ______________
//!  |            |       |            |
//!  |    LEFT    |       |   RIGHT    |
//!  |____________|       |____________|
//! 2               3    6               7
//! ```

use crate::config::DeviceSlot;
use crate::geometry::Frame;

/// A marker found in a frame.
///
/// `corners` wind top-left, top-right, bottom-right, bottom-left relative to
/// the printed marker.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedMarker {
    pub id: u32,
    pub corners: [[f32; 2]; 4],
}

impl DetectedMarker {
    pub fn new(id: u32, corners: [[f32; 2]; 4]) -> Self {
        Self { id, corners }
    }

    /// Corner `index` rounded to whole pixels
    pub fn corner(&self, index: usize) -> (i32, i32) {
        let [x, y] = self.corners[index];
        (x.round() as i32, y.round() as i32)
    }
}

/// Marker detection primitive
pub trait MarkerDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<DetectedMarker>>;
}

/// Which of the two marker arrangements a camera sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSet {
    /// IDs 0-3
    Left,
    /// IDs 4-7
    Right,
}

impl MarkerSet {
    pub fn ids(&self) -> [u32; 4] {
        match self {
            MarkerSet::Left => [0, 1, 2, 3],
            MarkerSet::Right => [4, 5, 6, 7],
        }
    }

    /// The set whose IDs are exactly `sorted_ids`
    pub fn matching(sorted_ids: &[u32]) -> Option<Self> {
        [MarkerSet::Left, MarkerSet::Right]
            .into_iter()
            .find(|set| sorted_ids == set.ids())
    }

    /// Stack order for a camera that sees this set: the left board goes first
    pub fn stack_order(&self, slot: DeviceSlot) -> [DeviceSlot; 2] {
        match self {
            MarkerSet::Left => [slot, slot.other()],
            MarkerSet::Right => [slot.other(), slot],
        }
    }
}
