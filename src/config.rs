use std::{
    collections::{BTreeMap, BTreeSet},
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    components::ensemble::Percentile,
    errors::{EnsembleError, Result},
    ids::{IndicatorId, PeriodId, RegionId, ScenarioId},
    pipeline::UnitId,
};

/// Model generation a scenario belongs to, which drives how its inputs are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioFamily {
    Cmip5,
    Cmip6,
    Historical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Variable holding the indicator in the realization files.
    pub variable: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Vector layer holding the region polygons.
    pub source: PathBuf,
    /// Feature index in the layer. Defaults to the region id read as a number.
    #[serde(default)]
    pub feature: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub id: ScenarioId,
    pub family: ScenarioFamily,
    /// Scenario providing the historical statistics this one is compared to.
    #[serde(default)]
    pub baseline: Option<ScenarioId>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub id: PeriodId,
    pub name: String,
    #[serde(default)]
    pub start: Option<i32>,
    #[serde(default)]
    pub end: Option<i32>,
    #[serde(default)]
    pub historical: bool,
}

/// Run configuration as written by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub workers: Option<usize>,
    pub indicators: BTreeMap<IndicatorId, IndicatorConfig>,
    /// Label -> percentile in (0, 100).
    pub percentiles: BTreeMap<String, f64>,
    #[serde(default)]
    pub regions: BTreeMap<RegionId, RegionConfig>,
    pub scenarios: Vec<ScenarioConfig>,
    pub periods: Vec<PeriodConfig>,
}

impl EnsembleConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| EnsembleError::config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Check every value once, before any unit runs.
    pub fn validate(self) -> Result<ValidatedConfig> {
        if self.indicators.is_empty() {
            return Err(EnsembleError::config("no indicator configured"));
        }
        if let Some((id, _)) = self
            .indicators
            .iter()
            .find(|(_, indicator)| indicator.variable.trim().is_empty())
        {
            return Err(EnsembleError::config(format!(
                "indicator {id} has no variable name"
            )));
        }

        let percentiles = self.validated_percentiles()?;
        let regions = self.validated_regions()?;

        if let Some(id) = self.scenarios.iter().map(|scenario| &scenario.id).duplicates().next() {
            return Err(EnsembleError::config(format!("scenario {id} defined twice")));
        }
        if let Some(id) = self.periods.iter().map(|period| &period.id).duplicates().next() {
            return Err(EnsembleError::config(format!("period {id} defined twice")));
        }
        let historical_periods: Vec<&PeriodConfig> =
            self.periods.iter().filter(|period| period.historical).collect();
        if historical_periods.len() > 1 {
            return Err(EnsembleError::config(format!(
                "more than one historical period: {}",
                historical_periods.iter().map(|period| &period.id).join(", ")
            )));
        }
        let historical_period = historical_periods.first().map(|period| period.id.clone());

        let baselines = self.resolve_baselines()?;
        if historical_period.is_none() {
            warn!("no historical period configured, change will not be computed");
        }

        let workers = match self.workers {
            Some(0) => return Err(EnsembleError::config("workers must be at least 1")),
            Some(workers) => workers,
            None => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        };

        debug!("validated configuration with {} percentiles", percentiles.len());
        Ok(ValidatedConfig {
            workers,
            indicators: self.indicators,
            percentiles,
            regions,
            scenarios: self.scenarios,
            periods: self.periods,
            historical_period,
            baselines,
        })
    }

    fn validated_percentiles(&self) -> Result<Vec<Percentile>> {
        if self.percentiles.is_empty() {
            return Err(EnsembleError::config("no percentile configured"));
        }
        let percentiles = self
            .percentiles
            .iter()
            .map(|(label, value)| {
                Percentile::new(*value)
                    .map_err(|err| EnsembleError::config(format!("percentile {label}: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let sorted: Vec<Percentile> = percentiles
            .into_iter()
            .sorted_by(|lhs, rhs| lhs.value().total_cmp(&rhs.value()))
            .collect();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(EnsembleError::config(format!(
                "percentile {} configured twice",
                pair[0]
            )));
        }
        Ok(sorted)
    }

    fn validated_regions(&self) -> Result<BTreeMap<RegionId, RegionSource>> {
        self.regions
            .iter()
            .map(|(id, region)| {
                let feature = match region.feature {
                    Some(feature) => feature,
                    None => id.parse().map_err(|_| {
                        EnsembleError::config(format!(
                            "region {id} needs a feature index, its id is not a number"
                        ))
                    })?,
                };
                let source = RegionSource {
                    path: region.source.clone(),
                    feature,
                };
                Ok((id.clone(), source))
            })
            .collect()
    }

    /// Baseline scenario of every non historical scenario: the explicit one,
    /// else the only historical scenario, else the scenario itself.
    fn resolve_baselines(&self) -> Result<BTreeMap<ScenarioId, ScenarioId>> {
        let historical: Vec<&ScenarioId> = self
            .scenarios
            .iter()
            .filter(|scenario| scenario.family == ScenarioFamily::Historical)
            .map(|scenario| &scenario.id)
            .collect();
        let mut baselines = BTreeMap::new();
        for scenario in &self.scenarios {
            let baseline = match (&scenario.baseline, scenario.family) {
                (_, ScenarioFamily::Historical) => scenario.id.clone(),
                (Some(baseline), _) => {
                    if !historical.contains(&baseline) {
                        return Err(EnsembleError::config(format!(
                            "baseline {baseline} of {} is not a historical scenario",
                            scenario.id
                        )));
                    }
                    baseline.clone()
                }
                (None, _) => match historical.as_slice() {
                    [] => scenario.id.clone(),
                    [only] => (*only).clone(),
                    _ => {
                        return Err(EnsembleError::config(format!(
                            "scenario {} must name its baseline, several historical scenarios exist",
                            scenario.id
                        )))
                    }
                },
            };
            baselines.insert(scenario.id.clone(), baseline);
        }
        Ok(baselines)
    }
}

/// Where to read a region polygon from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSource {
    pub path: PathBuf,
    pub feature: usize,
}

/// Configuration checked once at load time.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    workers: usize,
    indicators: BTreeMap<IndicatorId, IndicatorConfig>,
    percentiles: Vec<Percentile>,
    regions: BTreeMap<RegionId, RegionSource>,
    scenarios: Vec<ScenarioConfig>,
    periods: Vec<PeriodConfig>,
    historical_period: Option<PeriodId>,
    baselines: BTreeMap<ScenarioId, ScenarioId>,
}

impl ValidatedConfig {
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Percentiles in ascending order.
    pub fn percentiles(&self) -> &[Percentile] {
        &self.percentiles
    }

    pub fn variable(&self, indicator: &IndicatorId) -> Result<&str> {
        self.indicators
            .get(indicator)
            .map(|config| config.variable.as_str())
            .ok_or_else(|| EnsembleError::config(format!("unknown indicator {indicator}")))
    }

    pub fn region(&self, region: &RegionId) -> Result<&RegionSource> {
        self.regions
            .get(region)
            .ok_or_else(|| EnsembleError::config(format!("unknown region {region}")))
    }

    pub fn scenario(&self, scenario: &ScenarioId) -> Result<&ScenarioConfig> {
        self.scenarios
            .iter()
            .find(|config| &config.id == scenario)
            .ok_or_else(|| EnsembleError::config(format!("unknown scenario {scenario}")))
    }

    pub fn period(&self, period: &PeriodId) -> Result<&PeriodConfig> {
        self.periods
            .iter()
            .find(|config| &config.id == period)
            .ok_or_else(|| EnsembleError::config(format!("unknown period {period}")))
    }

    pub fn historical_period(&self) -> Option<&PeriodId> {
        self.historical_period.as_ref()
    }

    pub fn is_historical(&self, period: &PeriodId) -> bool {
        self.historical_period.as_ref() == Some(period)
    }

    /// Unit holding the historical statistics `unit` is compared against,
    /// `None` for historical units or when no historical period exists.
    pub fn baseline_unit(&self, unit: &UnitId) -> Option<UnitId> {
        let historical_period = self.historical_period.as_ref()?;
        if &unit.period == historical_period {
            return None;
        }
        let scenario = self.baselines.get(&unit.scenario)?;
        Some(UnitId {
            indicator: unit.indicator.clone(),
            scenario: scenario.clone(),
            period: historical_period.clone(),
            region: unit.region.clone(),
        })
    }

    /// Reject units that reference anything not configured.
    pub fn check_unit(&self, unit: &UnitId) -> Result<()> {
        self.variable(&unit.indicator)?;
        let scenario = self.scenario(&unit.scenario)?;
        self.period(&unit.period)?;
        if let Some(region) = &unit.region {
            self.region(region)?;
        }
        if scenario.family == ScenarioFamily::Historical && !self.is_historical(&unit.period) {
            return Err(EnsembleError::config(format!(
                "historical scenario {} has no period {}",
                unit.scenario, unit.period
            )));
        }
        Ok(())
    }

    /// Every unit of `indicator`: one per scenario, period and region (or
    /// the whole grid when no region is configured). Historical periods are
    /// only computed for the scenarios serving as a baseline.
    pub fn units(&self, indicator: &IndicatorId) -> Vec<UnitId> {
        let regions: Vec<Option<RegionId>> = if self.regions.is_empty() {
            vec![None]
        } else {
            self.regions.keys().cloned().map(Some).collect()
        };
        let baseline_scenarios: BTreeSet<&ScenarioId> = self.baselines.values().collect();
        self.scenarios
            .iter()
            .cartesian_product(&self.periods)
            .filter(|(scenario, period)| {
                if period.historical {
                    baseline_scenarios.contains(&scenario.id)
                } else {
                    scenario.family != ScenarioFamily::Historical
                }
            })
            .cartesian_product(&regions)
            .map(|((scenario, period), region)| UnitId {
                indicator: indicator.clone(),
                scenario: scenario.id.clone(),
                period: period.id.clone(),
                region: region.clone(),
            })
            .collect()
    }
}
