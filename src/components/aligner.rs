use geo::Rect;
use log::debug;
use ndarray::Array3;

use crate::{
    components::{
        grid::{GridDataset, GridSpec},
        transforms::GridTransform,
    },
    crs_geo::Crs,
    errors::{EnsembleError, Result},
    ids::PeriodId,
};

/// Projection metadata recorded next to (or inside) a raster source.
#[derive(Debug, Clone)]
pub struct Georeference {
    pub crs: Crs,
    pub transform: GridTransform,
    /// Geographic extent the source declares, if it declares one.
    pub extent: Option<Rect>,
}

/// Raster arrays as read, before any georeferencing is attached.
#[derive(Debug, Clone)]
pub struct RawGrid {
    pub name: String,
    /// (rows, cols) declared by the source header.
    pub shape: (usize, usize),
    pub periods: Vec<PeriodId>,
    pub variables: Vec<(String, Array3<f64>)>,
}

/// Attach crs and transform to `raw`.
///
/// Fails if an array disagrees with the declared shape or if the declared
/// extent is not the one implied by the transform over that shape.
pub fn attach(raw: RawGrid, georeference: Georeference) -> Result<GridDataset> {
    let RawGrid {
        name,
        shape,
        periods,
        variables,
    } = raw;
    for (variable, values) in &variables {
        let (_, rows, cols) = values.dim();
        if (rows, cols) != shape {
            return Err(EnsembleError::grid_mismatch(format!(
                "{name}: {variable} is {rows}x{cols} but the source declares {}x{}",
                shape.0, shape.1
            )));
        }
    }
    if let Some(extent) = georeference.extent {
        check_extent(&name, &extent, &georeference.transform, shape)?;
    }
    debug!("attaching {} to {name}", georeference.crs);
    GridDataset::new(
        name,
        georeference.crs,
        georeference.transform,
        periods,
        variables,
    )
}

fn check_extent(name: &str, extent: &Rect, transform: &GridTransform, shape: (usize, usize)) -> Result<()> {
    let implied = transform.bounds(shape);
    // Half a pixel of slack absorbs rounding in the declared corner coordinates.
    let (x_res, y_res) = transform.resolution();
    let (x_slack, y_slack) = (x_res.abs() / 2., y_res.abs() / 2.);
    let agrees = (implied.min().x - extent.min().x).abs() <= x_slack
        && (implied.max().x - extent.max().x).abs() <= x_slack
        && (implied.min().y - extent.min().y).abs() <= y_slack
        && (implied.max().y - extent.max().y).abs() <= y_slack;
    if agrees {
        Ok(())
    } else {
        Err(EnsembleError::grid_mismatch(format!(
            "{name}: declared extent {extent:?} does not match {implied:?} implied by the transform over {}x{}",
            shape.0, shape.1
        )))
    }
}

/// Verify that every dataset sits on the same grid and period axis as the first.
pub fn ensure_common_grid(datasets: &[GridDataset]) -> Result<()> {
    let Some((first, rest)) = datasets.split_first() else {
        return Ok(());
    };
    for other in rest {
        let (lhs, rhs): (&GridSpec, &GridSpec) = (first.grid(), other.grid());
        if lhs.crs != rhs.crs {
            return Err(EnsembleError::grid_mismatch(format!(
                "{} is in {} but {} is in {}",
                first.name(),
                lhs.crs,
                other.name(),
                rhs.crs
            )));
        }
        if lhs.shape != rhs.shape {
            return Err(EnsembleError::grid_mismatch(format!(
                "{} is {:?} but {} is {:?}",
                first.name(),
                lhs.shape,
                other.name(),
                rhs.shape
            )));
        }
        if !lhs.transform.approx_eq(&rhs.transform) {
            return Err(EnsembleError::grid_mismatch(format!(
                "{} and {} have different transforms",
                first.name(),
                other.name()
            )));
        }
        if first.periods() != other.periods() {
            return Err(EnsembleError::grid_mismatch(format!(
                "{} covers periods {:?} but {} covers {:?}",
                first.name(),
                first.periods(),
                other.name(),
                other.periods()
            )));
        }
    }
    Ok(())
}
