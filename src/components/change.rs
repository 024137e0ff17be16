use log::info;
use ndarray::Zip;

use crate::{
    components::{
        ensemble::{EnsembleStatistics, MEAN},
        grid::{is_nodata, GridDataset, NODATA},
    },
    errors::{EnsembleError, Result},
};

pub const ABSOLUTE_CHANGE: &str = "absolute_change";
pub const RELATIVE_CHANGE: &str = "relative_change";

/// Change of a future ensemble mean against the historical one.
#[derive(Shrinkwrap, Debug, Clone)]
pub struct ChangeResult(GridDataset);

impl ChangeResult {
    pub fn from_dataset(dataset: GridDataset) -> Result<Self> {
        dataset.variable(ABSOLUTE_CHANGE)?;
        dataset.variable(RELATIVE_CHANGE)?;
        Ok(Self(dataset))
    }

    pub fn dataset(&self) -> &GridDataset {
        &self.0
    }
}

fn absolute(future: f64, historical: f64) -> f64 {
    if is_nodata(future) || is_nodata(historical) {
        NODATA
    } else {
        future - historical
    }
}

/// Percent change, no data where the baseline is zero or missing.
fn relative(future: f64, historical: f64) -> f64 {
    if is_nodata(future) || is_nodata(historical) || historical == 0. {
        return NODATA;
    }
    let change = (future - historical) / historical * 100.;
    if is_nodata(change) {
        NODATA
    } else {
        change
    }
}

/// `future.mean - historical.mean`, absolute and in percent of the historical mean.
///
/// A historical summary with a single period is compared against every
/// future period. The result carries the periods of `future`.
pub fn compute_change(
    future: &EnsembleStatistics,
    historical: &EnsembleStatistics,
) -> Result<ChangeResult> {
    if future.crs() != historical.crs() || future.shape() != historical.shape() {
        return Err(EnsembleError::grid_mismatch(format!(
            "{} ({}, {:?}) and baseline {} ({}, {:?}) are on different grids",
            future.name(),
            future.crs(),
            future.shape(),
            historical.name(),
            historical.crs(),
            historical.shape()
        )));
    }
    if !future.transform().approx_eq(historical.transform()) {
        return Err(EnsembleError::grid_mismatch(format!(
            "{} and baseline {} have different transforms",
            future.name(),
            historical.name()
        )));
    }

    let future_mean = future.variable(MEAN)?;
    let historical_mean = historical.variable(MEAN)?;
    let historical_mean = match historical_mean.dim().0 {
        1 => historical_mean.broadcast(future_mean.dim()),
        periods if periods == future_mean.dim().0 => Some(historical_mean.view()),
        _ => None,
    }
    .ok_or_else(|| {
        EnsembleError::grid_mismatch(format!(
            "cannot compare {} future periods against {} baseline periods",
            future.periods().len(),
            historical.periods().len()
        ))
    })?;

    let absolute_change = Zip::from(&future_mean)
        .and(&historical_mean)
        .map_collect(|&future, &historical| absolute(future, historical));
    let relative_change = Zip::from(&future_mean)
        .and(&historical_mean)
        .map_collect(|&future, &historical| relative(future, historical));

    let change = GridDataset::new(
        future.name(),
        future.crs().clone(),
        *future.transform(),
        future.periods().to_vec(),
        [
            (ABSOLUTE_CHANGE.to_string(), absolute_change),
            (RELATIVE_CHANGE.to_string(), relative_change),
        ],
    )?;
    info!("change of {} against {}", future.name(), historical.name());
    Ok(ChangeResult(change))
}
