use std::fmt::{self, Display};

use log::{debug, info};
use ndarray::{stack, ArrayView1, ArrayView3, Axis, Zip};

use crate::{
    components::{
        aligner,
        grid::{is_nodata, GridDataset, NODATA},
    },
    errors::{EnsembleError, Result},
};

pub const MEAN: &str = "mean";
pub const STD: &str = "std";
pub const MIN: &str = "min";
pub const MAX: &str = "max";

/// Percentile in the open interval (0, 100).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentile(f64);

impl Percentile {
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0. && value < 100. {
            Ok(Self(value))
        } else {
            Err(EnsembleError::config(format!(
                "percentile {value} is outside (0, 100)"
            )))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Name of the output variable, e.g. `p10` or `p2.5`.
    pub fn variable_name(&self) -> String {
        format!("p{}", self.0)
    }

    /// Linear interpolation between the order statistics of `sorted`,
    /// which must be non empty and ascending.
    fn interpolate(&self, sorted: &[f64]) -> f64 {
        let rank = self.0 / 100. * (sorted.len() - 1) as f64;
        let (lower, upper) = (rank.floor() as usize, rank.ceil() as usize);
        sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
    }
}

impl Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ensemble summary: `mean`, `std`, `min`, `max` and one `p<value>`
/// variable per percentile.
#[derive(Shrinkwrap, Debug, Clone)]
pub struct EnsembleStatistics {
    #[shrinkwrap(main_field)]
    dataset: GridDataset,
    members: usize,
}

impl EnsembleStatistics {
    /// Wrap a dataset holding ensemble statistics, e.g. one read back from disk.
    pub fn from_dataset(dataset: GridDataset, members: usize) -> Result<Self> {
        for variable in [MEAN, STD, MIN, MAX] {
            dataset.variable(variable)?;
        }
        Ok(Self { dataset, members })
    }

    /// Number of realizations aggregated.
    pub fn members(&self) -> usize {
        self.members
    }

    pub fn dataset(&self) -> &GridDataset {
        &self.dataset
    }

    pub fn renamed(self, name: impl Into<String>) -> Self {
        Self {
            dataset: self.dataset.renamed(name),
            members: self.members,
        }
    }
}

/// Statistics of one cell across realizations, in output variable order.
fn summarize(lane: ArrayView1<f64>, percentiles: &[Percentile]) -> Vec<f64> {
    let mut summary = vec![NODATA; 4 + percentiles.len()];
    let mut values: Vec<f64> = lane.iter().copied().filter(|value| !is_nodata(*value)).collect();
    if values.is_empty() {
        return summary;
    }
    values.sort_by(f64::total_cmp);
    let count = values.len() as f64;
    let (min, max) = (values[0], values[values.len() - 1]);
    // Rounding may push the sum of equal values past them.
    let mean = (values.iter().sum::<f64>() / count).clamp(min, max);
    summary[0] = mean;
    if values.len() > 1 {
        let squares: f64 = values.iter().map(|value| (value - mean).powi(2)).sum();
        summary[1] = (squares / (count - 1.)).sqrt();
    }
    summary[2] = min;
    summary[3] = max;
    for (slot, percentile) in summary[4..].iter_mut().zip(percentiles) {
        *slot = percentile.interpolate(&values);
    }
    summary
}

/// Stack `realizations` along a new realization axis and summarize `variable`
/// at every cell and period, ignoring cells without data.
pub fn aggregate(
    realizations: &[GridDataset],
    variable: &str,
    percentiles: &[Percentile],
) -> Result<EnsembleStatistics> {
    let Some(first) = realizations.first() else {
        return Err(EnsembleError::compute(format!(
            "cannot aggregate {variable} over an empty ensemble"
        )));
    };
    aligner::ensure_common_grid(realizations)?;

    let views = realizations
        .iter()
        .map(|realization| realization.variable(variable))
        .collect::<Result<Vec<ArrayView3<f64>>>>()?;
    // (realization, period, row, col)
    let stacked = stack(Axis(0), &views)?;
    debug!("aggregating {variable} over {:?}", stacked.dim());

    let summaries = Zip::from(stacked.lanes(Axis(0)))
        .par_map_collect(|lane| summarize(lane, percentiles));

    let names = [MEAN, STD, MIN, MAX]
        .map(String::from)
        .into_iter()
        .chain(percentiles.iter().map(Percentile::variable_name));
    let variables: Vec<_> = names
        .enumerate()
        .map(|(idx, name)| (name, summaries.map(|summary| summary[idx])))
        .collect();

    let statistics = GridDataset::new(
        first.name(),
        first.crs().clone(),
        *first.transform(),
        first.periods().to_vec(),
        variables,
    )?;
    if statistics.valid_cells(MEAN)? == 0 {
        return Err(EnsembleError::compute(format!(
            "no cell holds data for {variable} in any of {} realizations",
            realizations.len()
        )));
    }
    info!(
        "aggregated {} realizations of {variable} into {statistics:?}",
        realizations.len()
    );
    Ok(EnsembleStatistics {
        dataset: statistics,
        members: realizations.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::grid::testing::*;
    use ndarray::{array, Array2};
    use rstest::{fixture, rstest};

    fn close(lhs: f64, rhs: f64) -> bool {
        (lhs - rhs).abs() < 1e-12
    }

    #[fixture]
    fn percentiles() -> Vec<Percentile> {
        [10., 50., 90.].map(|value| Percentile::new(value).unwrap()).to_vec()
    }

    /// Five members whose values at cell (0, 0) are 7, 1, 3, 9, 4.
    #[fixture]
    fn five_members() -> Vec<GridDataset> {
        [7., 1., 3., 9., 4.]
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                dataset(
                    &format!("member{idx}"),
                    "pr",
                    array![[*value, *value * 2.], [1., -*value]],
                )
            })
            .collect()
    }

    #[rstest]
    #[case(0.)]
    #[case(100.)]
    #[case(-5.)]
    #[case(f64::NAN)]
    fn percentiles_outside_open_interval(#[case] value: f64) {
        let error = Percentile::new(value).unwrap_err();
        assert!(error.is_fatal());
    }

    #[rstest]
    #[case(10., "p10")]
    #[case(2.5, "p2.5")]
    #[case(97.5, "p97.5")]
    fn percentile_names(#[case] value: f64, #[case] name: &str) {
        assert_eq!(Percentile::new(value).unwrap().variable_name(), name);
    }

    #[rstest]
    fn hand_computed_five_member_ensemble(five_members: Vec<GridDataset>, percentiles: Vec<Percentile>) {
        let statistics = aggregate(&five_members, "pr", &percentiles).unwrap();
        let at = |name: &str| statistics.variable(name).unwrap()[[0, 0, 0]];

        // sorted: 1 3 4 7 9
        assert!(close(at(MEAN), 4.8));
        assert!(close(at(STD), 10.2f64.sqrt()));
        assert_eq!(at(MIN), 1.);
        assert_eq!(at(MAX), 9.);
        assert!(close(at("p50"), 4.));
        // rank 0.4 between 1 and 3
        assert!(close(at("p10"), 1.8));
        // rank 3.6 between 7 and 9
        assert!(close(at("p90"), 8.2));
        assert_eq!(statistics.members(), 5);
    }

    #[rstest]
    fn mean_is_bracketed_by_min_and_max(five_members: Vec<GridDataset>, percentiles: Vec<Percentile>) {
        let statistics = aggregate(&five_members, "pr", &percentiles).unwrap();
        let mean = statistics.variable(MEAN).unwrap();
        let min = statistics.variable(MIN).unwrap();
        let max = statistics.variable(MAX).unwrap();
        Zip::from(&mean).and(&min).and(&max).for_each(|mean, min, max| {
            assert!(min <= mean && mean <= max);
        });
        // constant cell across members
        assert_eq!(mean[[0, 1, 0]], 1.);
        assert!(close(mean[[0, 0, 1]], 9.6));
        assert!(close(mean[[0, 1, 1]], -4.8));
    }

    #[rstest]
    fn repeated_values_keep_mean_within_range(percentiles: Vec<Percentile>) {
        let members: Vec<_> = (0..3)
            .map(|idx| filled(&format!("m{idx}"), "pr", (1, 1), 0.1))
            .collect();
        let statistics = aggregate(&members, "pr", &percentiles).unwrap();
        assert_eq!(statistics.variable(MEAN).unwrap()[[0, 0, 0]], 0.1);
    }

    #[rstest]
    fn single_member(percentiles: Vec<Percentile>) {
        let member = dataset("only", "pr", array![[2., 5.], [NODATA, 1.]]);
        let statistics = aggregate(&[member], "pr", &percentiles).unwrap();
        for cell in [[0, 0, 0], [0, 0, 1], [0, 1, 1]] {
            let mean = statistics.variable(MEAN).unwrap()[cell];
            assert!(is_nodata(statistics.variable(STD).unwrap()[cell]));
            assert_eq!(statistics.variable(MIN).unwrap()[cell], mean);
            assert_eq!(statistics.variable(MAX).unwrap()[cell], mean);
            assert_eq!(statistics.variable("p90").unwrap()[cell], mean);
        }
    }

    #[rstest]
    fn cells_without_data_stay_without_data(percentiles: Vec<Percentile>) {
        let members = [
            dataset("a", "pr", array![[NODATA, 1.], [NODATA, 2.]]),
            dataset("b", "pr", array![[NODATA, 3.], [5., NODATA]]),
        ];
        let statistics = aggregate(&members, "pr", &percentiles).unwrap();
        for (name, values) in statistics.variables() {
            assert!(is_nodata(values[[0, 0, 0]]), "{name} at empty cell");
        }
        // one contributor: mean defined, std is not
        assert_eq!(statistics.variable(MEAN).unwrap()[[0, 1, 0]], 5.);
        assert!(is_nodata(statistics.variable(STD).unwrap()[[0, 1, 0]]));
        // two contributors
        assert_eq!(statistics.variable(MEAN).unwrap()[[0, 0, 1]], 2.);
        assert!(close(statistics.variable(STD).unwrap()[[0, 0, 1]], 2f64.sqrt()));
    }

    #[rstest]
    fn empty_ensemble(percentiles: Vec<Percentile>) {
        let error = aggregate(&[], "pr", &percentiles).unwrap_err();
        assert!(matches!(error, EnsembleError::Compute(_)));
    }

    #[rstest]
    fn ensemble_without_any_data(percentiles: Vec<Percentile>) {
        let members = [filled("a", "pr", (2, 2), NODATA), filled("b", "pr", (2, 2), NODATA)];
        let error = aggregate(&members, "pr", &percentiles).unwrap_err();
        assert!(matches!(error, EnsembleError::Compute(_)));
    }

    #[rstest]
    fn extent_mismatch(percentiles: Vec<Percentile>) {
        let members = [
            filled("a", "pr", (2, 2), 1.),
            dataset("b", "pr", Array2::from_elem((2, 3), 1.)),
        ];
        let error = aggregate(&members, "pr", &percentiles).unwrap_err();
        assert!(matches!(error, EnsembleError::GridMismatch(_)));
    }

    #[rstest]
    fn missing_indicator_variable(percentiles: Vec<Percentile>) {
        let members = [filled("a", "pr", (2, 2), 1.), filled("b", "tas", (2, 2), 1.)];
        let error = aggregate(&members, "pr", &percentiles).unwrap_err();
        assert!(matches!(error, EnsembleError::GridMismatch(_)));
    }

    #[rstest]
    fn output_variables(five_members: Vec<GridDataset>, percentiles: Vec<Percentile>) {
        let statistics = aggregate(&five_members, "pr", &percentiles).unwrap();
        let mut names: Vec<&str> = statistics.variable_names().collect();
        names.sort();
        assert_eq!(names, ["max", "mean", "min", "p10", "p50", "p90", "std"]);
        assert_eq!(statistics.periods(), five_members[0].periods());
    }

    #[rstest]
    fn deterministic(five_members: Vec<GridDataset>, percentiles: Vec<Percentile>) {
        let first = aggregate(&five_members, "pr", &percentiles).unwrap();
        let second = aggregate(&five_members, "pr", &percentiles).unwrap();
        for (name, values) in first.variables() {
            let again = second.variable(name).unwrap();
            assert!(values
                .iter()
                .zip(again.iter())
                .all(|(lhs, rhs)| lhs.to_bits() == rhs.to_bits()));
        }
    }
}
