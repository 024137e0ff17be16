use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{
    errors::{EnsembleError, ErrorKind, Result},
    ids::{IndicatorId, PeriodId, RegionId, ScenarioId},
};

/// Identity of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub indicator: IndicatorId,
    pub scenario: ScenarioId,
    pub period: PeriodId,
    #[serde(default)]
    pub region: Option<RegionId>,
}

impl Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.indicator, self.scenario, self.period)?;
        match &self.region {
            Some(region) => write!(f, "/region-{region}"),
            None => f.write_str("/grid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Pending,
    Discovering,
    Aggregating,
    ChangeComputing,
    Persisted,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }

    pub fn can_transition_to(self, next: UnitState) -> bool {
        use UnitState::*;
        match (self, next) {
            _ if self.is_terminal() => false,
            (_, Failed) => true,
            (Pending, Discovering) => true,
            (Discovering, Aggregating) => true,
            (Aggregating, ChangeComputing | Persisted) => true,
            (ChangeComputing, Persisted) => true,
            _ => false,
        }
    }
}

/// Outcome of a single unit.
#[derive(Debug)]
pub struct UnitReport {
    pub unit: UnitId,
    pub state: UnitState,
    /// Found complete and not recomputed.
    pub skipped: bool,
    pub error: Option<EnsembleError>,
}

impl UnitReport {
    pub(crate) fn new(unit: UnitId) -> Self {
        Self {
            unit,
            state: UnitState::Pending,
            skipped: false,
            error: None,
        }
    }

    pub(crate) fn transition(&mut self, next: UnitState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EnsembleError::compute(format!(
                "{}: illegal transition {:?} -> {:?}",
                self.unit, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self, error: EnsembleError) {
        self.state = UnitState::Failed;
        self.error = Some(error);
    }

    pub(crate) fn skip(&mut self) {
        self.state = UnitState::Persisted;
        self.skipped = true;
    }

    pub fn is_failed(&self) -> bool {
        self.state == UnitState::Failed
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|report| report.is_failed())
    }

    pub fn unit(&self, unit: &UnitId) -> Option<&UnitReport> {
        self.units.iter().find(|report| &report.unit == unit)
    }

    pub fn computed(&self) -> usize {
        self.units
            .iter()
            .filter(|report| report.state == UnitState::Persisted && !report.skipped)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.units.iter().filter(|report| report.skipped).count()
    }

    pub fn is_success(&self) -> bool {
        self.units
            .iter()
            .all(|report| report.state == UnitState::Persisted)
    }

    /// Failures of the given kind, used to spot environment problems.
    pub fn failures_of(&self, kind: ErrorKind) -> usize {
        self.failed()
            .filter(|report| report.error.as_ref().map(EnsembleError::kind) == Some(kind))
            .count()
    }

    /// 0 when every unit was persisted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}
