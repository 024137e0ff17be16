#[macro_use]
extern crate shrinkwraprs;

pub mod components;
pub mod config;
pub mod crs_geo;
pub mod errors;
pub mod ids;
mod intersection;
pub mod pipeline;

pub use components::{
    change::{compute_change, ChangeResult},
    ensemble::{aggregate, EnsembleStatistics, Percentile},
    grid::{GridDataset, GridSpec, NODATA},
    mask::{apply_mask, build_mask, Mask, MaskCache, Region},
    File,
};
pub use config::{EnsembleConfig, ScenarioFamily, ValidatedConfig};
pub use crs_geo::{Crs, CrsGeometry};
pub use errors::{EnsembleError, ErrorKind, Result};
pub use ids::{IndicatorId, PeriodId, RegionId, ScenarioId};
pub use pipeline::{Collaborators, Orchestrator, RunOptions, RunReport, UnitId};
