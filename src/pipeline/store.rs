use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    components::{change::ChangeResult, ensemble::EnsembleStatistics},
    errors::{EnsembleError, Result},
    pipeline::UnitId,
};

/// Written last when a unit is persisted. Only a marker carrying the same
/// identity as the current configuration counts as complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub variable: String,
    /// Output names of the percentiles, ascending.
    pub percentiles: Vec<String>,
    pub members: usize,
    /// Regional outputs were cropped to the region's window.
    #[serde(default)]
    pub crop_to_region: bool,
    pub unit: UnitId,
}

impl CompletionMarker {
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Same unit, variable, percentile set and output shape. The member count
    /// is informative only.
    pub fn matches(&self, other: &CompletionMarker) -> bool {
        self.unit == other.unit
            && self.variable == other.variable
            && self.percentiles == other.percentiles
            && self.crop_to_region == other.crop_to_region
    }
}

/// Everything produced by one unit.
#[derive(Debug, Clone)]
pub struct UnitArtifacts {
    pub marker: CompletionMarker,
    pub statistics: EnsembleStatistics,
    pub change: Option<ChangeResult>,
}

/// Persistence of unit results.
///
/// `persist` is all or nothing: either every artifact and the marker are
/// stored or nothing observable changes.
pub trait ArtifactStore: Send + Sync {
    fn marker(&self, unit: &UnitId) -> Result<Option<CompletionMarker>>;
    fn load_statistics(&self, unit: &UnitId) -> Result<EnsembleStatistics>;
    fn persist(&self, artifacts: &UnitArtifacts) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryStore {
    units: RwLock<HashMap<UnitId, UnitArtifacts>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `persist` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn artifacts(&self, unit: &UnitId) -> Option<UnitArtifacts> {
        self.units.read().get(unit).cloned()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for InMemoryStore {
    fn marker(&self, unit: &UnitId) -> Result<Option<CompletionMarker>> {
        Ok(self
            .units
            .read()
            .get(unit)
            .map(|artifacts| artifacts.marker.clone()))
    }

    fn load_statistics(&self, unit: &UnitId) -> Result<EnsembleStatistics> {
        self.units
            .read()
            .get(unit)
            .map(|artifacts| artifacts.statistics.clone())
            .ok_or_else(|| EnsembleError::compute(format!("no stored statistics for {unit}")))
    }

    fn persist(&self, artifacts: &UnitArtifacts) -> Result<()> {
        let unit = artifacts.marker.unit.clone();
        debug!("storing {unit} in memory");
        self.units.write().insert(unit, artifacts.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
