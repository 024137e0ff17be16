use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use crate::{
    components::{file::File, grid::GridDataset, mask::Region},
    config::{RegionSource, ScenarioFamily},
    errors::Result,
    ids::{IndicatorId, PeriodId, RegionId, ScenarioId},
};

/// What a discovery backend is asked to locate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub indicator: IndicatorId,
    pub variable: String,
    pub scenario: ScenarioId,
    pub family: ScenarioFamily,
    pub period: PeriodId,
    pub region: Option<RegionId>,
}

/// Locates the realization files of an ensemble.
pub trait Discovery: Send + Sync {
    fn discover(&self, request: &DiscoveryRequest) -> Result<Vec<PathBuf>>;
}

/// Reads one variable of a realization.
pub trait RasterLoader: Send + Sync {
    fn load(&self, path: &Path, variable: &str) -> Result<GridDataset>;
}

pub trait RegionLoader: Send + Sync {
    fn load(&self, region: &RegionId, source: &RegionSource) -> Result<Region>;
}

/// [`RasterLoader`] opening every path as an `F`.
pub struct FileLoader<F> {
    file: PhantomData<fn() -> F>,
}

impl<F> FileLoader<F> {
    pub fn new() -> Self {
        Self { file: PhantomData }
    }
}

impl<F> Default for FileLoader<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: File> RasterLoader for FileLoader<F> {
    fn load(&self, path: &Path, variable: &str) -> Result<GridDataset> {
        F::open(path)?.dataset(variable)
    }
}
