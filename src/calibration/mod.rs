//! Marker calibration
//!
//! Finds the whiteboard's four corner markers in a camera frame, derives the
//! calibration corners and the stack order from them, and writes both back to
//! the configuration store.

pub mod markers;

pub use markers::{DetectedMarker, MarkerDetector, MarkerSet};

use crate::config::{CalibrationCorners, ConfigStore, DeviceSlot, Point};
use crate::geometry::frame::{Frame, GREEN, RED};
use crate::utils::error::{AppError, AppResult};

/// Outcome of a successful calibration
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    pub slot: DeviceSlot,
    pub marker_set: MarkerSet,
    pub corners: CalibrationCorners,
    pub stack_order: [DeviceSlot; 2],
    /// The input frame with marker outlines and numbered corners drawn on it
    pub debug_frame: Frame,
}

/// Derive the outer corners of the board from exactly four markers of one set.
///
/// Each marker contributes the corner that faces outwards: top-left of the
/// top-left marker, top-right of the top-right marker, and so on. The result
/// is in storage (reading) order.
pub fn locate_corners(
    slot: DeviceSlot,
    markers: &[DetectedMarker],
) -> AppResult<(CalibrationCorners, MarkerSet)> {
    let mut sorted: Vec<&DetectedMarker> = markers.iter().collect();
    sorted.sort_by_key(|marker| marker.id);
    let ids: Vec<u32> = sorted.iter().map(|marker| marker.id).collect();

    let set = MarkerSet::matching(&ids).ok_or_else(|| AppError::MarkerCountMismatch {
        slot,
        found: ids.clone(),
    })?;

    // Reading order: top-left, top-right, bottom-left, bottom-right.
    // Marker winding is TL, TR, BR, BL, so the bottom row swaps 2 and 3.
    let pick = |marker: usize, corner: usize| {
        let (x, y) = sorted[marker].corner(corner);
        Point::new(x, y)
    };
    let corners = CalibrationCorners::new([pick(0, 0), pick(1, 1), pick(2, 3), pick(3, 2)]);

    Ok((corners, set))
}

/// Detect markers in `frame`, derive corners and stack order, and persist
/// them for `slot`. Nothing is written when any step fails.
pub fn detect_corners(
    detector: &dyn MarkerDetector,
    frame: &Frame,
    slot: DeviceSlot,
    store: &ConfigStore,
) -> AppResult<CalibrationResult> {
    let markers = detector
        .detect(frame)
        .map_err(|e| AppError::CalibrationInvalid(format!("marker detection failed: {:#}", e)))?;

    tracing::debug!(
        "Detected {} markers for {}: {:?}",
        markers.len(),
        slot,
        markers.iter().map(|m| m.id).collect::<Vec<_>>()
    );

    let (corners, marker_set) = locate_corners(slot, &markers)?;
    let stack_order = marker_set.stack_order(slot);

    store.apply_calibration(slot, corners, stack_order)?;
    tracing::info!(
        "Calibrated {} from {:?} markers: corners {:?}, stack order {:?}",
        slot,
        marker_set,
        corners.points(),
        stack_order
    );

    Ok(CalibrationResult {
        slot,
        marker_set,
        corners,
        stack_order,
        debug_frame: draw_debug_frame(frame, &markers, &corners),
    })
}

fn draw_debug_frame(frame: &Frame, markers: &[DetectedMarker], corners: &CalibrationCorners) -> Frame {
    let mut debug = frame.clone();

    for marker in markers {
        let outline: Vec<(i64, i64)> = (0..4)
            .map(|i| {
                let (x, y) = marker.corner(i);
                (x as i64, y as i64)
            })
            .collect();
        debug.draw_polygon(&outline, 2, GREEN);
    }

    let scale = (debug.height() as i64 / 120).max(2);
    for (i, point) in corners.points().iter().enumerate() {
        let (x, y) = (point.x as i64, point.y as i64);
        debug.fill_circle(x, y, 5, RED);
        if let Some(digit) = char::from_digit(i as u32, 10) {
            debug.draw_digit((x + 8, y + 8), digit, scale, RED);
        }
    }

    debug
}
