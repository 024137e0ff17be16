use std::{
    collections::BTreeMap,
    fmt::Debug,
    hash::{Hash, Hasher},
};

use ndarray::{Array3, ArrayView3, Axis};

use crate::{
    components::transforms::GridTransform,
    crs_geo::Crs,
    errors::{EnsembleError, Result},
    ids::PeriodId,
};

/// Marker stored in cells without data.
pub const NODATA: f64 = f64::NAN;

pub fn is_nodata(value: f64) -> bool {
    !value.is_finite()
}

/// Georeferencing shared by every variable of a [GridDataset].
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub crs: Crs,
    pub transform: GridTransform,
    /// (rows, cols)
    pub shape: (usize, usize),
}

impl GridSpec {
    pub fn new(crs: Crs, transform: GridTransform, shape: (usize, usize)) -> Self {
        Self {
            crs,
            transform,
            shape,
        }
    }

    /// Same crs, shape and (within tolerance) transform.
    pub fn matches(&self, other: &GridSpec) -> bool {
        self.crs == other.crs && self.shape == other.shape && self.transform.approx_eq(&other.transform)
    }
}

impl PartialEq for GridSpec {
    fn eq(&self, other: &Self) -> bool {
        self.crs == other.crs && self.shape == other.shape && self.transform.bits() == other.transform.bits()
    }
}

impl Eq for GridSpec {}

impl Hash for GridSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.crs.hash(state);
        self.shape.hash(state);
        self.transform.bits().hash(state);
    }
}

/// Named variables over `(period, row, col)` on one georeferenced grid.
///
/// All variables share the grid and the period axis. Non finite values
/// are normalized to [NODATA] on construction.
#[derive(Clone)]
pub struct GridDataset {
    name: String,
    grid: GridSpec,
    periods: Vec<PeriodId>,
    variables: BTreeMap<String, Array3<f64>>,
}

impl Debug for GridDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let f = &mut f.debug_struct("GridDataset");
        let variables: Vec<&String> = self.variables.keys().collect();
        f.field("name", &self.name)
            .field("crs", &self.grid.crs.to_string())
            .field("shape", &self.grid.shape)
            .field("periods", &self.periods)
            .field("variables", &variables)
            .finish()
    }
}

impl GridDataset {
    pub fn new(
        name: impl Into<String>,
        crs: Crs,
        transform: GridTransform,
        periods: Vec<PeriodId>,
        variables: impl IntoIterator<Item = (String, Array3<f64>)>,
    ) -> Result<Self> {
        let name = name.into();
        let mut variables: BTreeMap<String, Array3<f64>> = variables.into_iter().collect();
        let Some(first) = variables.values().next() else {
            return Err(EnsembleError::grid_mismatch(format!("{name} has no variables")));
        };
        let (_, rows, cols) = first.dim();
        for (variable, values) in variables.iter_mut() {
            if values.dim() != (periods.len(), rows, cols) {
                return Err(EnsembleError::grid_mismatch(format!(
                    "{name}: variable {variable} has shape {:?}, expected {:?}",
                    values.dim(),
                    (periods.len(), rows, cols)
                )));
            }
            values.mapv_inplace(|value| if is_nodata(value) { NODATA } else { value });
        }
        Ok(Self {
            name,
            grid: GridSpec::new(crs, transform, (rows, cols)),
            periods,
            variables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn crs(&self) -> &Crs {
        &self.grid.crs
    }

    pub fn transform(&self) -> &GridTransform {
        &self.grid.transform
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape
    }

    pub fn periods(&self) -> &[PeriodId] {
        &self.periods
    }

    /// Replace the period labels, keeping the number of periods.
    pub fn with_periods(mut self, periods: Vec<PeriodId>) -> Result<Self> {
        if periods.len() != self.periods.len() {
            return Err(EnsembleError::grid_mismatch(format!(
                "{}: cannot label {} periods with {:?}",
                self.name,
                self.periods.len(),
                periods
            )));
        }
        self.periods = periods;
        Ok(self)
    }

    pub fn variable(&self, name: &str) -> Result<ArrayView3<f64>> {
        self.variables
            .get(name)
            .map(|values| values.view())
            .ok_or_else(|| {
                EnsembleError::grid_mismatch(format!("{} has no variable {name}", self.name))
            })
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, ArrayView3<f64>)> {
        self.variables
            .iter()
            .map(|(name, values)| (name.as_str(), values.view()))
    }

    pub(crate) fn into_parts(self) -> (String, GridSpec, Vec<PeriodId>, BTreeMap<String, Array3<f64>>) {
        (self.name, self.grid, self.periods, self.variables)
    }

    /// Spatial mean of `variable` per period over cells with data.
    pub fn areal_mean(&self, variable: &str) -> Result<Vec<(PeriodId, Option<f64>)>> {
        let values = self.variable(variable)?;
        Ok(values
            .axis_iter(Axis(0))
            .zip(&self.periods)
            .map(|(layer, period)| {
                let (sum, count) = layer
                    .iter()
                    .filter(|value| !is_nodata(**value))
                    .fold((0., 0usize), |(sum, count), value| (sum + value, count + 1));
                let mean = (count > 0).then(|| sum / count as f64);
                (period.clone(), mean)
            })
            .collect())
    }

    /// Number of cells holding data, over all periods of `variable`.
    pub fn valid_cells(&self, variable: &str) -> Result<usize> {
        Ok(self
            .variable(variable)?
            .iter()
            .filter(|value| !is_nodata(**value))
            .count())
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::*, *};
    use ndarray::{array, Array3};
    use rstest::rstest;

    #[rstest]
    fn normalizes_non_finite_values() {
        let data = dataset("r1", "pr", array![[1., f64::INFINITY], [f64::NAN, 4.]]);
        let values = data.variable("pr").unwrap();
        assert!(is_nodata(values[[0, 0, 1]]));
        assert!(values[[0, 0, 1]].is_nan());
        assert_eq!(data.valid_cells("pr").unwrap(), 2);
    }

    #[rstest]
    fn variables_must_share_shape() {
        let error = GridDataset::new(
            "r1",
            Crs::new(TEST_CRS),
            unit_transform(2),
            vec![PeriodId::new("1")],
            [
                ("pr".to_string(), Array3::zeros((1, 2, 2))),
                ("tas".to_string(), Array3::zeros((1, 2, 3))),
            ],
        )
        .unwrap_err();
        assert!(matches!(error, EnsembleError::GridMismatch(_)));
    }

    #[rstest]
    fn period_axis_must_match_labels() {
        let error = GridDataset::new(
            "r1",
            Crs::new(TEST_CRS),
            unit_transform(2),
            vec![PeriodId::new("1"), PeriodId::new("2")],
            [("pr".to_string(), Array3::zeros((1, 2, 2)))],
        )
        .unwrap_err();
        assert!(matches!(error, EnsembleError::GridMismatch(_)));
    }

    #[rstest]
    fn missing_variable() {
        let data = filled("r1", "pr", (2, 2), 1.);
        assert!(matches!(
            data.variable("tas").unwrap_err(),
            EnsembleError::GridMismatch(_)
        ));
    }

    #[rstest]
    fn areal_mean_ignores_nodata() {
        let data = dataset("r1", "pr", array![[1., 2.], [NODATA, 6.]]);
        let means = data.areal_mean("pr").unwrap();
        assert_eq!(means, vec![(PeriodId::new("1"), Some(3.))]);

        let empty = filled("r2", "pr", (2, 2), NODATA);
        assert_eq!(empty.areal_mean("pr").unwrap()[0].1, None);
    }

    #[rstest]
    fn relabel_periods() {
        let data = filled("r1", "pr", (1, 1), 1.);
        let data = data.with_periods(vec![PeriodId::new("2")]).unwrap();
        assert_eq!(data.periods(), &[PeriodId::new("2")]);
        assert!(data.with_periods(vec![]).is_err());
    }
}
