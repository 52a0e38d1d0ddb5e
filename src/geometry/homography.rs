//! Perspective transform from four calibration points.
//!
//! The homography `H` maps camera pixels onto a square "bird's-eye" canvas:
//! `x' ~ H x`. Four correspondences determine `H` exactly, so it is solved
//! directly from the 8x8 linear system rather than by least squares.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use super::frame::{Frame, BLACK};
use crate::config::schema::{CalibrationCorners, Point, Resolution};
use crate::utils::error::{AppError, AppResult};

/// Side of the square canvas the whiteboard is flattened onto
pub const DEFAULT_SQUARE_SIZE: u32 = 1000;

/// A projective transform together with its inverse
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Homography {
    /// Solve `H` from four exact correspondences `src[i] -> dst[i]`.
    ///
    /// Returns `None` when the system is singular.
    pub fn from_correspondences(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for i in 0..4 {
            let [x, y] = src[i];
            let [u, v] = dst[i];
            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -x * u;
            a[(r0, 7)] = -y * u;
            b[r0] = u;

            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -x * v;
            a[(r1, 7)] = -y * v;
            b[r1] = v;
        }

        let h = a.lu().solve(&b)?;
        if h.iter().any(|value| !value.is_finite()) {
            return None;
        }

        let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        let inverse = matrix.try_inverse()?;
        Some(Self { matrix, inverse })
    }

    /// `computeTransform`: map the stored corners onto a `square_size`
    /// square. The corners are validated and put into perimeter order first.
    pub fn from_corners(corners: &CalibrationCorners, square_size: u32) -> AppResult<Self> {
        validate_corners(corners)?;

        let src = corners.solver_order().map(|p| [p.x as f64, p.y as f64]);
        let s = square_size as f64;
        let dst = [[0.0, 0.0], [s, 0.0], [s, s], [0.0, s]];

        Self::from_correspondences(&src, &dst).ok_or_else(|| {
            AppError::CalibrationInvalid(format!(
                "no perspective transform exists for corners {:?}",
                corners.points()
            ))
        })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Map a source pixel to the destination canvas
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply(&self.matrix, x, y)
    }

    /// Map a destination pixel back into the source frame
    pub fn unproject(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply(&self.inverse, x, y)
    }

    /// Warp `frame` onto a `width` x `height` canvas. Canvas pixels that map
    /// outside the source are black.
    pub fn warp(&self, frame: &Frame, width: u32, height: u32) -> Frame {
        let mut out = Frame::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let color = self
                    .unproject(x as f64, y as f64)
                    .and_then(|(sx, sy)| frame.sample_bilinear(sx, sy))
                    .unwrap_or(BLACK);
                out.put_pixel(x as i64, y as i64, color);
            }
        }
        out
    }
}

fn apply(m: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let p = m * Vector3::new(x, y, 1.0);
    if p.z.abs() < f64::EPSILON {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

/// `applyTransform`: flatten `frame` onto the square canvas, then resize to
/// the device's output resolution.
pub fn apply_transform(
    frame: &Frame,
    homography: &Homography,
    square_size: u32,
    output: Resolution,
) -> Frame {
    homography
        .warp(frame, square_size, square_size)
        .resize_area(output.width, output.height)
}

/// Reject corner sets no homography should be built from: coincident
/// points, three collinear points, or a self-intersecting quadrilateral.
pub fn validate_corners(corners: &CalibrationCorners) -> AppResult<()> {
    let quad = corners.solver_order();

    for i in 0..4 {
        for j in (i + 1)..4 {
            if quad[i] == quad[j] {
                return Err(AppError::CalibrationInvalid(format!(
                    "corners {:?} and {:?} coincide",
                    quad[i], quad[j]
                )));
            }
        }
    }

    for skip in 0..4 {
        let tri: Vec<Point> = (0..4).filter(|i| *i != skip).map(|i| quad[i]).collect();
        if cross(tri[0], tri[1], tri[2]) == 0 {
            return Err(AppError::CalibrationInvalid(format!(
                "corners {:?}, {:?} and {:?} are collinear",
                tri[0], tri[1], tri[2]
            )));
        }
    }

    if segments_cross(quad[0], quad[1], quad[2], quad[3])
        || segments_cross(quad[1], quad[2], quad[3], quad[0])
    {
        return Err(AppError::CalibrationInvalid(format!(
            "corners {:?} form a self-intersecting quadrilateral",
            corners.points()
        )));
    }

    Ok(())
}

/// Twice the signed area of triangle `abc`, exact on integer pixels
fn cross(a: Point, b: Point, c: Point) -> i64 {
    let (ax, ay) = (a.x as i64, a.y as i64);
    let (bx, by) = (b.x as i64, b.y as i64);
    let (cx, cy) = (c.x as i64, c.y as i64);
    (bx - ax) * (cy - ay) - (by - ay) * (cx - ax)
}

/// Proper intersection of segments `ab` and `cd`
fn segments_cross(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = cross(a, b, c).signum();
    let d2 = cross(a, b, d).signum();
    let d3 = cross(c, d, a).signum();
    let d4 = cross(c, d, b).signum();
    d1 * d2 < 0 && d3 * d4 < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners(points: [(i32, i32); 4]) -> CalibrationCorners {
        CalibrationCorners::new(points.map(|(x, y)| Point::new(x, y)))
    }

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-4 && (actual.1 - expected.1).abs() < 1e-4,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_corners_map_to_square() {
        // Reading order: top-left, top-right, bottom-left, bottom-right
        let c = corners([(212, 95), (1710, 130), (160, 1004), (1805, 990)]);
        let h = Homography::from_corners(&c, DEFAULT_SQUARE_SIZE).unwrap();

        let s = DEFAULT_SQUARE_SIZE as f64;
        assert_close(h.project(212.0, 95.0).unwrap(), (0.0, 0.0));
        assert_close(h.project(1710.0, 130.0).unwrap(), (s, 0.0));
        assert_close(h.project(1805.0, 990.0).unwrap(), (s, s));
        assert_close(h.project(160.0, 1004.0).unwrap(), (0.0, s));
    }

    #[test]
    fn test_unproject_inverts_project() {
        let c = corners([(10, 20), (300, 5), (40, 280), (310, 260)]);
        let h = Homography::from_corners(&c, 500).unwrap();

        let (u, v) = h.project(123.0, 77.0).unwrap();
        assert_close(h.unproject(u, v).unwrap(), (123.0, 77.0));
    }

    #[test]
    fn test_identity_square() {
        let c = corners([(0, 0), (100, 0), (0, 100), (100, 100)]);
        let h = Homography::from_corners(&c, 100).unwrap();
        let m = h.matrix();
        assert!((m - Matrix3::identity()).abs().max() < 1e-9);
    }

    #[test]
    fn test_skipping_reorder_would_twist_the_quad() {
        // Perimeter order handed in as if it were storage order
        let c = corners([(0, 0), (100, 0), (100, 100), (0, 100)]);
        assert!(matches!(
            Homography::from_corners(&c, 100),
            Err(AppError::CalibrationInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_collinear_points() {
        let c = corners([(0, 0), (50, 0), (0, 100), (100, 0)]);
        assert!(matches!(
            validate_corners(&c),
            Err(AppError::CalibrationInvalid(_))
        ));
    }

    #[test]
    fn test_rejects_default_zero_corners() {
        assert!(matches!(
            Homography::from_corners(&CalibrationCorners::default(), 1000),
            Err(AppError::CalibrationInvalid(_))
        ));
    }

    #[test]
    fn test_apply_transform_output_size_and_content() {
        // Left half red, right half green
        let mut frame = Frame::new(40, 40);
        for y in 0..40 {
            for x in 0..40 {
                let color = if x < 20 { [255, 0, 0, 255] } else { [0, 255, 0, 255] };
                frame.put_pixel(x, y, color);
            }
        }

        let c = corners([(0, 0), (39, 0), (0, 39), (39, 39)]);
        let h = Homography::from_corners(&c, 100).unwrap();
        let out = apply_transform(&frame, &h, 100, Resolution::new(64, 48));

        assert_eq!(out.width(), 64);
        assert_eq!(out.height(), 48);
        assert_eq!(out.pixel(5, 24).unwrap(), [255, 0, 0, 255]);
        assert_eq!(out.pixel(58, 24).unwrap(), [0, 255, 0, 255]);
    }
}
