mod collaborators;
mod store;
mod unit;

pub use collaborators::{Discovery, DiscoveryRequest, FileLoader, RasterLoader, RegionLoader};
pub use store::{ArtifactStore, CompletionMarker, InMemoryStore, UnitArtifacts};
pub use unit::{RunReport, UnitId, UnitReport, UnitState};

use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::{
    components::{
        aligner::ensure_common_grid,
        change::compute_change,
        ensemble::{aggregate, EnsembleStatistics, MEAN},
        grid::GridDataset,
        mask::{apply_mask, MaskCache, Region},
    },
    config::ValidatedConfig,
    errors::{EnsembleError, ErrorKind, Result},
    ids::{IndicatorId, RegionId},
};

/// Shared flag stopping a run between units.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recompute units that already have a completion marker.
    pub force: bool,
    /// Shrink masked outputs to the region's bounding window.
    pub crop_to_region: bool,
    pub cancel: CancelToken,
}

/// Backends the orchestrator reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn Discovery>,
    pub loader: Arc<dyn RasterLoader>,
    pub regions: Arc<dyn RegionLoader>,
    pub store: Arc<dyn ArtifactStore>,
}

/// Statistics of a baseline unit as seen by its dependents, or why they are missing.
type BaselineOutcome = std::result::Result<Arc<EnsembleStatistics>, String>;

struct Baseline<'a> {
    unit: UnitId,
    outcome: Option<&'a BaselineOutcome>,
}

impl Baseline<'_> {
    fn statistics(&self) -> Result<Arc<EnsembleStatistics>> {
        match self.outcome {
            Some(Ok(statistics)) => Ok(Arc::clone(statistics)),
            Some(Err(reason)) => Err(EnsembleError::compute(format!(
                "baseline {} {reason}",
                self.unit
            ))),
            None => Err(EnsembleError::compute(format!(
                "baseline {} was not run",
                self.unit
            ))),
        }
    }
}

/// Runs units of work: mask, aggregate, compare against the baseline, persist.
pub struct Orchestrator {
    config: ValidatedConfig,
    collaborators: Collaborators,
    masks: MaskCache,
    loaded_regions: RwLock<HashMap<RegionId, Arc<Region>>>,
}

impl Orchestrator {
    pub fn new(config: ValidatedConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            masks: MaskCache::new(),
            loaded_regions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn masks(&self) -> &MaskCache {
        &self.masks
    }

    /// Every configured unit of `indicator`.
    pub fn run_indicator(&self, indicator: &IndicatorId, options: &RunOptions) -> Result<RunReport> {
        self.run(&self.config.units(indicator), options)
    }

    /// Run `units` and the baselines they depend on.
    ///
    /// Only a unit referencing something that is not configured fails the
    /// whole run, before anything executes. Every other failure is recorded
    /// in the report of its unit.
    pub fn run(&self, units: &[UnitId], options: &RunOptions) -> Result<RunReport> {
        for unit in units {
            self.config.check_unit(unit)?;
        }
        let (baselines, dependents) = self.waves(units);
        let workers = self.config.workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("ensemble-worker-{idx}"))
            .build()
            .map_err(|err| EnsembleError::config(format!("cannot start {workers} workers: {err}")))?;
        info!(
            "running {} baseline and {} dependent units on {workers} workers",
            baselines.len(),
            dependents.len()
        );

        let (mut reports, statistics): (Vec<UnitReport>, Vec<Option<EnsembleStatistics>>) =
            pool.install(|| {
                baselines
                    .par_iter()
                    .map(|unit| self.run_unit(unit, None, options))
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .unzip();

        let needed: BTreeSet<UnitId> = dependents
            .iter()
            .filter_map(|unit| self.config.baseline_unit(unit))
            .collect();
        let resolved = self.resolve_baselines(&reports, statistics, &needed);

        let dependent_reports: Vec<UnitReport> = pool.install(|| {
            dependents
                .par_iter()
                .map(|unit| {
                    let baseline = self.config.baseline_unit(unit).map(|baseline| Baseline {
                        outcome: resolved.get(&baseline),
                        unit: baseline,
                    });
                    self.run_unit(unit, baseline, options).0
                })
                .collect()
        });
        reports.extend(dependent_reports);

        let report = RunReport { units: reports };
        let io_failures = report.failures_of(ErrorKind::Io);
        if io_failures > 1 {
            error!("{io_failures} units failed on file access, check storage and input paths");
        }
        info!(
            "run finished: {} computed, {} skipped, {} failed",
            report.computed(),
            report.skipped(),
            report.failed().count()
        );
        Ok(report)
    }

    /// Historical units, including the baselines of the requested future
    /// units, then everything else.
    fn waves(&self, units: &[UnitId]) -> (Vec<UnitId>, Vec<UnitId>) {
        let (mut baselines, dependents): (BTreeSet<UnitId>, BTreeSet<UnitId>) = units
            .iter()
            .cloned()
            .partition(|unit| self.config.is_historical(&unit.period));
        baselines.extend(
            dependents
                .iter()
                .filter_map(|unit| self.config.baseline_unit(unit)),
        );
        (
            baselines.into_iter().collect(),
            dependents.into_iter().collect(),
        )
    }

    fn resolve_baselines(
        &self,
        reports: &[UnitReport],
        statistics: Vec<Option<EnsembleStatistics>>,
        needed: &BTreeSet<UnitId>,
    ) -> HashMap<UnitId, BaselineOutcome> {
        reports
            .iter()
            .zip(statistics)
            .filter(|(report, _)| needed.contains(&report.unit))
            .map(|(report, statistics)| {
                let outcome = match (report.state, statistics) {
                    (_, Some(statistics)) => Ok(Arc::new(statistics)),
                    (UnitState::Persisted, None) => self
                        .collaborators
                        .store
                        .load_statistics(&report.unit)
                        .map(Arc::new)
                        .map_err(|err| format!("could not be loaded: {err}")),
                    (UnitState::Failed, None) => Err(format!(
                        "failed: {}",
                        report
                            .error
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    )),
                    _ => Err("was not run".to_string()),
                };
                (report.unit.clone(), outcome)
            })
            .collect()
    }

    fn run_unit(
        &self,
        unit: &UnitId,
        baseline: Option<Baseline<'_>>,
        options: &RunOptions,
    ) -> (UnitReport, Option<EnsembleStatistics>) {
        let mut report = UnitReport::new(unit.clone());
        if options.cancel.is_cancelled() {
            debug!("{unit} not started, run cancelled");
            return (report, None);
        }
        match self.execute(&mut report, baseline, options) {
            Ok(statistics) => (report, statistics),
            Err(err) => {
                error!("{unit} failed in {:?}: {err}", report.state);
                report.fail(err);
                (report, None)
            }
        }
    }

    /// Statistics of the unit when computed, `None` when it was skipped.
    fn execute(
        &self,
        report: &mut UnitReport,
        baseline: Option<Baseline<'_>>,
        options: &RunOptions,
    ) -> Result<Option<EnsembleStatistics>> {
        let unit = report.unit.clone();
        let variable = self.config.variable(&unit.indicator)?;
        let mut marker = CompletionMarker {
            variable: variable.to_string(),
            percentiles: self
                .config
                .percentiles()
                .iter()
                .map(|percentile| percentile.variable_name())
                .collect(),
            members: 0,
            crop_to_region: unit.region.is_some() && options.crop_to_region,
            unit: unit.clone(),
        };

        if !options.force {
            match self.collaborators.store.marker(&unit)? {
                Some(stored) if stored.matches(&marker) => {
                    info!("{unit} already complete, skipping");
                    report.skip();
                    return Ok(None);
                }
                Some(_) => warn!("{unit} has a marker from another configuration, recomputing"),
                None => {}
            }
        }
        let historical = baseline
            .as_ref()
            .map(Baseline::statistics)
            .transpose()?;

        report.transition(UnitState::Discovering)?;
        let scenario = self.config.scenario(&unit.scenario)?;
        let request = DiscoveryRequest {
            indicator: unit.indicator.clone(),
            variable: variable.to_string(),
            scenario: unit.scenario.clone(),
            family: scenario.family,
            period: unit.period.clone(),
            region: unit.region.clone(),
        };
        let mut paths = self.collaborators.discovery.discover(&request)?;
        paths.sort();
        paths.dedup();
        if paths.is_empty() {
            return Err(EnsembleError::Discovery(unit.to_string()));
        }
        debug!("{unit}: {} realizations", paths.len());

        report.transition(UnitState::Aggregating)?;
        let region = unit.region.as_ref().map(|id| self.region(id)).transpose()?;
        let loaded = paths
            .iter()
            .map(|path| self.realization(path, variable, &unit))
            .collect::<Result<Vec<_>>>()?;
        ensure_common_grid(&loaded)?;
        let realizations = match region.as_deref() {
            Some(region) => loaded
                .iter()
                .map(|dataset| {
                    let mask = self.masks.get_or_build(region, dataset.grid())?;
                    apply_mask(dataset, &mask, options.crop_to_region)
                })
                .collect::<Result<Vec<_>>>()?,
            None => loaded,
        };
        let statistics = aggregate(&realizations, variable, self.config.percentiles())?
            .renamed(unit.to_string());
        for (period, mean) in statistics.areal_mean(MEAN)? {
            match mean {
                Some(mean) => info!("{unit} period {period}: areal mean {mean}"),
                None => warn!("{unit} period {period}: no valid cell"),
            }
        }

        let change = match historical {
            Some(historical) => {
                report.transition(UnitState::ChangeComputing)?;
                Some(compute_change(&statistics, &historical)?)
            }
            None => None,
        };

        marker.members = realizations.len();
        let artifacts = UnitArtifacts {
            marker,
            statistics,
            change,
        };
        self.collaborators.store.persist(&artifacts)?;
        report.transition(UnitState::Persisted)?;
        info!("{unit} persisted from {} realizations", artifacts.marker.members);
        Ok(Some(artifacts.statistics))
    }

    /// Load one realization and label a single period source with the
    /// unit's period.
    fn realization(&self, path: &Path, variable: &str, unit: &UnitId) -> Result<GridDataset> {
        let dataset = self.collaborators.loader.load(path, variable)?;
        if dataset.periods().len() == 1 && dataset.periods()[0] != unit.period {
            return dataset.with_periods(vec![unit.period.clone()]);
        }
        Ok(dataset)
    }

    fn region(&self, id: &RegionId) -> Result<Arc<Region>> {
        if let Some(region) = self.loaded_regions.read().get(id) {
            return Ok(Arc::clone(region));
        }
        let source = self.config.region(id)?;
        let region = Arc::new(self.collaborators.regions.load(id, source)?);
        Ok(Arc::clone(
            self.loaded_regions
                .write()
                .entry(id.clone())
                .or_insert(region),
        ))
    }
}
