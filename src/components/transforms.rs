use geo::{AffineTransform, Coord, Rect};

use crate::errors::{EnsembleError, Result};

/// Relative tolerance used when comparing transforms read from different files.
const TRANSFORM_TOLERANCE: f64 = 1e-9;

/// Affine pixel -> crs coordinate transform of a grid.
///
/// Pixel space has `x = column`, `y = row`, origin at the top left corner
/// of the top left pixel.
#[derive(Shrinkwrap, Debug, Clone, Copy)]
pub struct GridTransform(AffineTransform);

impl GridTransform {
    pub fn new(a: f64, b: f64, xoff: f64, d: f64, e: f64, yoff: f64) -> Self {
        Self(AffineTransform::new(a, b, xoff, d, e, yoff))
    }

    /// North-up transform with square-ish pixels.
    pub fn north_up(x_min: f64, y_max: f64, x_res: f64, y_res: f64) -> Self {
        Self::new(x_res, 0., x_min, 0., -y_res.abs(), y_max)
    }

    pub fn from_gdal(gdal_transform: [f64; 6]) -> Self {
        Self::new(
            gdal_transform[1],
            gdal_transform[2],
            gdal_transform[0],
            gdal_transform[4],
            gdal_transform[5],
            gdal_transform[3],
        )
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.xoff(),
            self.a(),
            self.b(),
            self.yoff(),
            self.d(),
            self.e(),
        ]
    }

    /// Derive the transform from regularly spaced cell center coordinates,
    /// as stored in the `X`/`Y` coordinate variables of gridded files.
    pub fn from_cell_centers(xs: &[f64], ys: &[f64]) -> Result<Self> {
        let x_res = regular_spacing(xs, "x")?;
        let y_res = regular_spacing(ys, "y")?;
        Ok(Self::new(
            x_res,
            0.,
            xs[0] - x_res / 2.,
            0.,
            y_res,
            ys[0] - y_res / 2.,
        ))
    }

    pub fn resolution(&self) -> (f64, f64) {
        (self.a(), self.e())
    }

    /// Crs coordinate of the center of pixel `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> Coord {
        self.0.apply(Coord {
            x: col as f64 + 0.5,
            y: row as f64 + 0.5,
        })
    }

    /// Transform of a window whose top left pixel is `(row, col)` of this grid.
    pub fn offset_by(&self, row: usize, col: usize) -> Self {
        let origin = self.0.apply(Coord {
            x: col as f64,
            y: row as f64,
        });
        Self::new(self.a(), self.b(), origin.x, self.d(), self.e(), origin.y)
    }

    /// Crs -> pixel transform.
    pub fn inverse(&self) -> Result<AffineTransform> {
        self.0
            .inverse()
            .ok_or_else(|| EnsembleError::grid_mismatch(format!("{self:?} is not invertible")))
    }

    /// Bounding rect, in crs coordinates, of a `(rows, cols)` grid.
    pub fn bounds(&self, shape: (usize, usize)) -> Rect {
        let (rows, cols) = (shape.0 as f64, shape.1 as f64);
        let corners = [(0., 0.), (cols, 0.), (0., rows), (cols, rows)]
            .map(|(x, y)| self.0.apply(Coord { x, y }));
        let (mut min, mut max) = (corners[0], corners[0]);
        for corner in &corners[1..] {
            min.x = min.x.min(corner.x);
            min.y = min.y.min(corner.y);
            max.x = max.x.max(corner.x);
            max.y = max.y.max(corner.y);
        }
        Rect::new(min, max)
    }

    pub fn approx_eq(&self, other: &Self) -> bool {
        let scale = self.a().abs().max(self.e().abs()).max(f64::MIN_POSITIVE);
        self.to_gdal()
            .iter()
            .zip(other.to_gdal())
            .all(|(lhs, rhs)| (lhs - rhs).abs() <= TRANSFORM_TOLERANCE * scale.max(lhs.abs()))
    }

    /// Bit pattern used to key caches on exact transforms.
    pub fn bits(&self) -> [u64; 6] {
        self.to_gdal().map(f64::to_bits)
    }
}

fn regular_spacing(coords: &[f64], axis: &str) -> Result<f64> {
    let [first, second, ..] = coords else {
        return Err(EnsembleError::grid_mismatch(format!(
            "need at least two {axis} coordinates to derive a transform, got {}",
            coords.len()
        )));
    };
    let step = second - first;
    if step == 0. || !step.is_finite() {
        return Err(EnsembleError::grid_mismatch(format!(
            "degenerate {axis} coordinate spacing {step}"
        )));
    }
    let irregular = coords
        .windows(2)
        .any(|pair| ((pair[1] - pair[0]) - step).abs() > 1e-6 * step.abs());
    if irregular {
        return Err(EnsembleError::grid_mismatch(format!(
            "{axis} coordinates are not regularly spaced"
        )));
    }
    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn gdal_round_trip_layout() {
        let gdal = [100_000., 1_000., 0., 7_000_000., 0., -1_000.];
        let transform = GridTransform::from_gdal(gdal);
        assert_eq!(transform.resolution(), (1_000., -1_000.));
        assert_eq!(transform.to_gdal(), gdal);
    }

    #[rstest]
    fn pixel_centers() {
        let transform = GridTransform::north_up(0., 10., 1., 1.);
        assert_eq!(transform.pixel_center(0, 0), Coord { x: 0.5, y: 9.5 });
        assert_eq!(transform.pixel_center(2, 3), Coord { x: 3.5, y: 7.5 });
    }

    #[rstest]
    fn cell_centers_with_descending_y() {
        let xs = [195_500., 196_500., 197_500.];
        let ys = [6_889_500., 6_888_500.];
        let transform = GridTransform::from_cell_centers(&xs, &ys).unwrap();
        assert!(transform.approx_eq(&GridTransform::north_up(195_000., 6_890_000., 1_000., 1_000.)));
    }

    #[rstest]
    #[case(&[1.], &[1., 2.])]
    #[case(&[1., 2., 4.], &[1., 2.])]
    #[case(&[1., 1.], &[1., 2.])]
    fn invalid_cell_centers(#[case] xs: &[f64], #[case] ys: &[f64]) {
        let error = GridTransform::from_cell_centers(xs, ys).unwrap_err();
        assert!(matches!(error, EnsembleError::GridMismatch(_)));
    }

    #[rstest]
    fn window_offset_and_bounds() {
        let transform = GridTransform::north_up(0., 10., 2., 2.);
        let window = transform.offset_by(1, 2);
        assert_eq!(window.to_gdal(), [4., 2., 0., 8., 0., -2.]);
        assert_eq!(transform.bounds((5, 3)), Rect::new((0., 0.), (6., 10.)));
    }

    #[rstest]
    fn singular_transform_is_rejected() {
        let transform = GridTransform::new(0., 0., 0., 0., 0., 0.);
        assert!(transform.inverse().is_err());
    }
}
