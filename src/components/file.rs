use std::{collections::HashMap, fmt::Debug, path::Path};

use geo::Rect;
use ndarray::Array3;

use crate::{
    components::{
        aligner::{self, Georeference, RawGrid},
        grid::GridDataset,
        transforms::GridTransform,
    },
    crs_geo::Crs,
    errors::Result,
    ids::PeriodId,
};

/// Values of one variable with the period label of each slice along axis 0.
#[derive(Debug, Clone)]
pub struct VariableData {
    pub periods: Vec<PeriodId>,
    pub values: Array3<f64>,
}

/// A raster source that can be opened from a path.
pub trait File: Debug + Sized {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self>;
    fn description(&self) -> Result<String>;
    /// (rows, cols)
    fn shape(&self) -> (usize, usize);
    fn crs(&self) -> Crs;
    fn transform(&self) -> Result<GridTransform>;
    /// Extent the source declares independently of its transform, if any.
    fn extent(&self) -> Option<Rect> {
        None
    }
    fn variables(&self) -> Result<Vec<String>>;
    fn read_variable(&self, name: &str) -> Result<VariableData>;
    fn metadata(&self) -> HashMap<String, String>;

    fn georeference(&self) -> Result<Georeference> {
        Ok(Georeference {
            crs: self.crs(),
            transform: self.transform()?,
            extent: self.extent(),
        })
    }

    /// Georeferenced dataset holding `variable` only.
    fn dataset(&self, variable: &str) -> Result<GridDataset> {
        let VariableData { periods, values } = self.read_variable(variable)?;
        let raw = RawGrid {
            name: self.description()?,
            shape: self.shape(),
            periods,
            variables: vec![(variable.to_string(), values)],
        };
        aligner::attach(raw, self.georeference()?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::{components::grid::testing::TEST_CRS, errors::EnsembleError};
    use std::path::PathBuf;

    /// File whose contents are derived from its path: `<value>.mem` holds a
    /// 2x2 grid filled with `value`, and `<value>x<cols>.mem` a 2xcols one.
    #[derive(Debug)]
    pub struct MemFile {
        path: PathBuf,
        value: f64,
        cols: usize,
    }

    impl File for MemFile {
        fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path = path.as_ref().to_path_buf();
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| EnsembleError::io(&path, std::io::ErrorKind::NotFound.into()))?;
            let (value, cols) = match stem.split_once('x') {
                Some((value, cols)) => (value.parse(), cols.parse().unwrap_or(2)),
                None => (stem.parse(), 2),
            };
            let value = value.map_err(|_| EnsembleError::io(&path, std::io::ErrorKind::InvalidData.into()))?;
            Ok(Self { path, value, cols })
        }
        fn description(&self) -> Result<String> {
            Ok(self.path.display().to_string())
        }
        fn shape(&self) -> (usize, usize) {
            (2, self.cols)
        }
        fn crs(&self) -> Crs {
            Crs::new(TEST_CRS)
        }
        fn transform(&self) -> Result<GridTransform> {
            Ok(GridTransform::north_up(0., 2., 1., 1.))
        }
        fn variables(&self) -> Result<Vec<String>> {
            Ok(vec!["pr".into()])
        }
        fn read_variable(&self, name: &str) -> Result<VariableData> {
            if name != "pr" {
                return Err(EnsembleError::grid_mismatch(format!("no variable {name}")));
            }
            Ok(VariableData {
                periods: vec![PeriodId::new("0")],
                values: Array3::from_elem((1, 2, self.cols), self.value),
            })
        }
        fn metadata(&self) -> HashMap<String, String> {
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::MemFile, *};
    use rstest::rstest;

    #[rstest]
    fn opens_georeferenced_dataset() {
        let file = MemFile::open("4.5.mem").unwrap();
        let dataset = file.dataset("pr").unwrap();
        assert_eq!(dataset.name(), "4.5.mem");
        assert_eq!(dataset.shape(), (2, 2));
        assert_eq!(dataset.variable("pr").unwrap()[[0, 1, 1]], 4.5);
    }

    #[rstest]
    fn unknown_variable() {
        let file = MemFile::open("1.mem").unwrap();
        assert!(file.dataset("tas").is_err());
    }
}
