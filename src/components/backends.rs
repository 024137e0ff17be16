/// Implementations for gdal
#[cfg(feature = "gdal")]
pub mod gdal_backend {
    use std::{
        collections::HashMap,
        fs, io,
        path::{Path, PathBuf},
    };

    use gdal::{
        raster::{Buffer, RasterBand},
        spatial_ref::SpatialRef,
        vector::LayerAccess,
        Dataset as GdalDataset, DriverManager, Metadata as GdalMetadata,
        MetadataEntry as GdalMetadataEntry,
    };
    use geo::{Geometry, MultiPolygon, Rect};
    use itertools::Itertools;
    use log::{debug, info, warn};
    use ndarray::{Array2, Array3, Axis};

    use crate::{
        components::{
            aligner::{self, Georeference, RawGrid},
            ensemble::EnsembleStatistics,
            file::{File, VariableData},
            grid::{GridDataset, NODATA},
            mask::Region,
            transforms::GridTransform,
        },
        config::RegionSource,
        crs_geo::Crs,
        errors::{EnsembleError, Result},
        ids::{PeriodId, RegionId},
        pipeline::{ArtifactStore, CompletionMarker, RegionLoader, UnitArtifacts, UnitId},
    };

    /// Band metadata item holding the period label.
    pub const PERIOD_ID: &str = "PERIOD_ID";
    /// Dataset metadata item holding the number of aggregated realizations.
    pub const ENSEMBLE_MEMBERS: &str = "ENSEMBLE_MEMBERS";
    const NETCDF_TIME: &str = "NETCDF_DIM_time";
    /// Metadata domain naming the datasets that hold cell center coordinates.
    const GEOLOCATION: &str = "GEOLOCATION";
    /// Global attributes declaring the lon/lat extent of a NetCDF file.
    const DECLARED_EXTENT: [&str; 4] = [
        "NC_GLOBAL#geospatial_lon_min",
        "NC_GLOBAL#geospatial_lat_min",
        "NC_GLOBAL#geospatial_lon_max",
        "NC_GLOBAL#geospatial_lat_max",
    ];

    fn filter_metadata_gdal(metadata: &impl GdalMetadata) -> HashMap<String, String> {
        GdalMetadata::metadata(metadata)
            .filter_map(|GdalMetadataEntry { domain, key, value }| {
                if domain.eq("") {
                    Some((key, value))
                } else {
                    None
                }
            })
            .collect()
    }

    /// `AUTH:CODE` when the reference has an authority, WKT otherwise.
    fn crs_from_gdal(spatial_ref: &SpatialRef) -> Crs {
        match (spatial_ref.auth_name(), spatial_ref.auth_code()) {
            (Ok(name), Ok(code)) => Crs::new(format!("{name}:{code}")),
            _ => spatial_ref
                .to_wkt()
                .map(Crs::new)
                .unwrap_or_else(|_| Crs::unknown()),
        }
    }

    fn shape_of(dataset: &GdalDataset) -> (usize, usize) {
        let (cols, rows) = dataset.raster_size();
        (rows, cols)
    }

    fn crs_of(dataset: &GdalDataset) -> Crs {
        dataset
            .spatial_ref()
            .map(|spatial_ref| crs_from_gdal(&spatial_ref))
            .unwrap_or_else(|_| Crs::unknown())
    }

    /// Values of the first band of the geolocation dataset named by `item`.
    fn geolocation(dataset: &GdalDataset, item: &str) -> Result<Option<Vec<f64>>> {
        let Some(name) = dataset.metadata_item(item, GEOLOCATION) else {
            return Ok(None);
        };
        let source = GdalDataset::open(&name)?;
        let (cols, rows) = source.raster_size();
        let buffer = source
            .rasterband(1)?
            .read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;
        Ok(Some(buffer.data().to_vec()))
    }

    /// The geotransform, or one derived from the cell center coordinates of
    /// the geolocation arrays when the source has none.
    fn transform_of(dataset: &GdalDataset) -> Result<GridTransform> {
        let err = match dataset.geo_transform() {
            Ok(transform) => return Ok(GridTransform::from_gdal(transform)),
            Err(err) => err,
        };
        let (Some(xs), Some(ys)) = (
            geolocation(dataset, "X_DATASET")?,
            geolocation(dataset, "Y_DATASET")?,
        ) else {
            return Err(err.into());
        };
        let (rows, cols) = shape_of(dataset);
        if (ys.len(), xs.len()) != (rows, cols) {
            return Err(EnsembleError::grid_mismatch(format!(
                "{} x and {} y cell centers for a {rows}x{cols} grid",
                xs.len(),
                ys.len()
            )));
        }
        debug!("deriving transform from {cols}x{rows} cell centers");
        GridTransform::from_cell_centers(&xs, &ys)
    }

    /// Lon/lat extent declared in the global attributes of a geographic source.
    fn extent_of(dataset: &GdalDataset) -> Option<Rect> {
        let geographic = dataset
            .spatial_ref()
            .is_ok_and(|spatial_ref| spatial_ref.is_geographic());
        if !geographic {
            return None;
        }
        let [x_min, y_min, x_max, y_max] = DECLARED_EXTENT
            .map(|item| dataset.metadata_item(item, "")?.trim().parse::<f64>().ok());
        Some(Rect::new((x_min?, y_min?), (x_max?, y_max?)))
    }

    fn georeference_of(dataset: &GdalDataset) -> Result<Georeference> {
        Ok(Georeference {
            crs: crs_of(dataset),
            transform: transform_of(dataset)?,
            extent: extent_of(dataset),
        })
    }

    fn period_of(band: &RasterBand, slot: usize) -> PeriodId {
        band.metadata_item(PERIOD_ID, "")
            .or_else(|| band.metadata_item(NETCDF_TIME, ""))
            .map(PeriodId::new)
            .unwrap_or_else(|| PeriodId::new(slot.to_string()))
    }

    /// 1-based indexes of the bands holding `variable`: bands described with
    /// its name, or every band when none is described.
    fn bands_of(dataset: &GdalDataset, variable: &str) -> Result<Vec<usize>> {
        let descriptions = (1..=dataset.raster_count())
            .map(|index| Ok((index, dataset.rasterband(index)?.description()?)))
            .collect::<Result<Vec<_>>>()?;
        if descriptions.iter().all(|(_, description)| description.is_empty()) {
            return Ok(descriptions.into_iter().map(|(index, _)| index).collect());
        }
        Ok(descriptions
            .into_iter()
            .filter(|(_, description)| description == variable)
            .map(|(index, _)| index)
            .collect())
    }

    /// Read bands as `f64`, turning the band's nodata value into NaN and
    /// applying its scale and offset.
    fn read_bands(dataset: &GdalDataset, path: &Path, variable: &str) -> Result<VariableData> {
        let bands = bands_of(dataset, variable)?;
        if bands.is_empty() {
            return Err(EnsembleError::grid_mismatch(format!(
                "{} has no variable {variable}",
                path.display()
            )));
        }
        let (rows, cols) = shape_of(dataset);
        let mut values = Array3::from_elem((bands.len(), rows, cols), NODATA);
        let mut periods = Vec::with_capacity(bands.len());
        for (slot, index) in bands.into_iter().enumerate() {
            let band = dataset.rasterband(index)?;
            let buffer = band.read_as::<f64>((0, 0), (cols, rows), (cols, rows), None)?;
            let mut layer = Array2::from_shape_vec((rows, cols), buffer.data().to_vec())?;
            let nodata = band.no_data_value();
            let scale = band.scale().unwrap_or(1.);
            let offset = band.offset().unwrap_or(0.);
            layer.mapv_inplace(|value| {
                if nodata.is_some_and(|nodata| value == nodata) {
                    NODATA
                } else {
                    value * scale + offset
                }
            });
            values.index_axis_mut(Axis(0), slot).assign(&layer);
            periods.push(period_of(&band, slot));
        }
        Ok(VariableData { periods, values })
    }

    /// A raster readable by gdal. NetCDF files are followed into the
    /// sub-dataset named after the requested variable.
    #[derive(Debug)]
    pub struct GdalFile {
        path: PathBuf,
        dataset: GdalDataset,
    }

    impl GdalFile {
        fn subdatasets(&self) -> impl Iterator<Item = String> + '_ {
            GdalMetadata::metadata(&self.dataset).filter_map(
                |GdalMetadataEntry { domain, key, value }| {
                    (domain == "SUBDATASETS" && key.ends_with("_NAME")).then_some(value)
                },
            )
        }

        fn with_source<T>(
            &self,
            variable: &str,
            read: impl FnOnce(&GdalDataset) -> Result<T>,
        ) -> Result<T> {
            let subdataset = self
                .subdatasets()
                .find(|name| name.rsplit(':').next() == Some(variable));
            match subdataset {
                Some(name) => {
                    debug!("reading {variable} from {name}");
                    read(&GdalDataset::open(name)?)
                }
                None => read(&self.dataset),
            }
        }
    }

    impl File for GdalFile {
        fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            Ok(GdalFile {
                path: path.as_ref().to_path_buf(),
                dataset: GdalDataset::open(&path)?,
            })
        }
        fn description(&self) -> Result<String> {
            let description = GdalMetadata::description(&self.dataset)?;
            if description.is_empty() {
                Ok(self.path.display().to_string())
            } else {
                Ok(description)
            }
        }
        fn shape(&self) -> (usize, usize) {
            shape_of(&self.dataset)
        }
        fn crs(&self) -> Crs {
            crs_of(&self.dataset)
        }
        fn transform(&self) -> Result<GridTransform> {
            transform_of(&self.dataset)
        }
        fn extent(&self) -> Option<Rect> {
            extent_of(&self.dataset)
        }
        fn variables(&self) -> Result<Vec<String>> {
            let described = (1..=self.dataset.raster_count())
                .map(|index| Ok(self.dataset.rasterband(index)?.description()?))
                .collect::<Result<Vec<_>>>()?;
            let subdatasets = self
                .subdatasets()
                .filter_map(|name| name.rsplit(':').next().map(str::to_string))
                .collect::<Vec<_>>();
            Ok(described
                .into_iter()
                .filter(|description| !description.is_empty())
                .chain(subdatasets)
                .unique()
                .collect())
        }
        fn read_variable(&self, name: &str) -> Result<VariableData> {
            self.with_source(name, |source| read_bands(source, &self.path, name))
        }
        fn metadata(&self) -> HashMap<String, String> {
            filter_metadata_gdal(&self.dataset)
        }

        fn dataset(&self, variable: &str) -> Result<GridDataset> {
            let name = self.description()?;
            self.with_source(variable, |source| {
                let VariableData { periods, values } = read_bands(source, &self.path, variable)?;
                let raw = RawGrid {
                    name,
                    shape: shape_of(source),
                    periods,
                    variables: vec![(variable.to_string(), values)],
                };
                aligner::attach(raw, georeference_of(source)?)
            })
        }
    }

    fn invalid_data(path: &Path, msg: String) -> EnsembleError {
        EnsembleError::io(path, io::Error::new(io::ErrorKind::InvalidData, msg))
    }

    /// Region polygons from feature *n* of the first layer of any OGR source.
    #[derive(Debug, Default)]
    pub struct GdalRegionLoader;

    impl RegionLoader for GdalRegionLoader {
        fn load(&self, region: &RegionId, source: &RegionSource) -> Result<Region> {
            let dataset = GdalDataset::open(&source.path)?;
            let mut layer = dataset.layer(0)?;
            let crs = layer
                .spatial_ref()
                .map(|spatial_ref| crs_from_gdal(&spatial_ref))
                .unwrap_or_else(Crs::unknown);
            let feature = layer.features().nth(source.feature).ok_or_else(|| {
                invalid_data(&source.path, format!("no feature {}", source.feature))
            })?;
            let geometry = feature
                .geometry()
                .ok_or_else(|| {
                    invalid_data(&source.path, format!("feature {} has no geometry", source.feature))
                })?
                .to_geo()?;
            let polygon: MultiPolygon = match geometry {
                Geometry::Polygon(polygon) => polygon.into(),
                Geometry::MultiPolygon(polygons) => polygons,
                other => {
                    return Err(invalid_data(
                        &source.path,
                        format!("region {region} is not a polygon: {other:?}"),
                    ))
                }
            };
            info!("loaded region {region} ({crs}) from {}", source.path.display());
            Ok(Region::new(region.clone(), crs, polygon))
        }
    }

    const STATISTICS: &str = "statistics.tif";
    const CHANGE: &str = "change.tif";
    const MARKER: &str = "complete.toml";

    /// Artifacts as GeoTIFF, one band per variable and period, under
    /// `<root>/<indicator>/<scenario>/<period>/<region>/`.
    #[derive(Debug, Clone)]
    pub struct GdalStore {
        root: PathBuf,
    }

    impl GdalStore {
        pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
            let root = root.into();
            fs::create_dir_all(&root).map_err(|err| EnsembleError::io(&root, err))?;
            Ok(Self { root })
        }

        pub fn unit_dir(&self, unit: &UnitId) -> PathBuf {
            let region = match &unit.region {
                Some(region) => format!("region-{region}"),
                None => "grid".to_string(),
            };
            self.root
                .join(unit.indicator.as_str())
                .join(unit.scenario.as_str())
                .join(unit.period.as_str())
                .join(region)
        }

        pub fn statistics_path(&self, unit: &UnitId) -> PathBuf {
            self.unit_dir(unit).join(STATISTICS)
        }

        pub fn change_path(&self, unit: &UnitId) -> PathBuf {
            self.unit_dir(unit).join(CHANGE)
        }
    }

    fn write_geotiff(path: &Path, dataset: &GridDataset, members: Option<usize>) -> Result<()> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (rows, cols) = dataset.shape();
        let count = dataset.variable_names().count() * dataset.periods().len();
        let mut out = driver.create_with_band_type::<f64, _>(path, cols, rows, count)?;
        out.set_geo_transform(&dataset.transform().to_gdal())?;
        if !dataset.crs().is_unknown() {
            out.set_spatial_ref(&SpatialRef::from_definition(dataset.crs().as_str())?)?;
        }
        if let Some(members) = members {
            out.set_metadata_item(ENSEMBLE_MEMBERS, &members.to_string(), "")?;
        }

        let mut index = 1;
        for (name, values) in dataset.variables() {
            for (period, layer) in dataset.periods().iter().zip(values.outer_iter()) {
                let mut band = out.rasterband(index)?;
                let mut buffer = Buffer::new((cols, rows), layer.iter().copied().collect());
                band.write((0, 0), (cols, rows), &mut buffer)?;
                band.set_no_data_value(Some(NODATA))?;
                band.set_description(name)?;
                band.set_metadata_item(PERIOD_ID, period.as_str(), "")?;
                index += 1;
            }
        }
        Ok(())
    }

    fn remove_if_present(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(EnsembleError::io(path, err)),
            _ => Ok(()),
        }
    }

    /// Write under a temporary name and rename, so `path` is either absent or complete.
    fn write_atomic(path: &Path, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
        let partial = path.with_extension("partial");
        if let Err(err) = write(&partial) {
            if let Err(cleanup) = fs::remove_file(&partial) {
                debug!("could not remove {}: {cleanup}", partial.display());
            }
            return Err(err);
        }
        fs::rename(&partial, path).map_err(|err| EnsembleError::io(path, err))
    }

    impl ArtifactStore for GdalStore {
        fn marker(&self, unit: &UnitId) -> Result<Option<CompletionMarker>> {
            let path = self.unit_dir(unit).join(MARKER);
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(EnsembleError::io(path, err)),
            };
            match CompletionMarker::from_toml(&source) {
                Ok(marker) => Ok(Some(marker)),
                Err(err) => {
                    warn!("ignoring unreadable marker {}: {err}", path.display());
                    Ok(None)
                }
            }
        }

        fn load_statistics(&self, unit: &UnitId) -> Result<EnsembleStatistics> {
            let file = GdalFile::open(self.statistics_path(unit))?;
            let mut periods = None;
            let mut variables = Vec::new();
            for name in file.variables()? {
                let data = file.read_variable(&name)?;
                periods.get_or_insert(data.periods);
                variables.push((name, data.values));
            }
            let members = file
                .metadata()
                .get(ENSEMBLE_MEMBERS)
                .and_then(|members| members.parse().ok())
                .unwrap_or(0);
            let raw = RawGrid {
                name: unit.to_string(),
                shape: file.shape(),
                periods: periods.unwrap_or_default(),
                variables,
            };
            EnsembleStatistics::from_dataset(aligner::attach(raw, file.georeference()?)?, members)
        }

        fn persist(&self, artifacts: &UnitArtifacts) -> Result<()> {
            let unit = &artifacts.marker.unit;
            let dir = self.unit_dir(unit);
            fs::create_dir_all(&dir).map_err(|err| EnsembleError::io(&dir, err))?;
            let (marker, statistics, change) =
                (dir.join(MARKER), dir.join(STATISTICS), dir.join(CHANGE));
            // The marker goes first so a half replaced unit never reads as complete.
            remove_if_present(&marker)?;
            remove_if_present(&change)?;

            let written = write_atomic(&statistics, |path| {
                write_geotiff(path, &artifacts.statistics, Some(artifacts.statistics.members()))
            })
            .and_then(|()| match &artifacts.change {
                Some(result) => write_atomic(&change, |path| write_geotiff(path, result, None)),
                None => Ok(()),
            })
            .and_then(|()| {
                let content = artifacts.marker.to_toml()?;
                write_atomic(&marker, |path| {
                    fs::write(path, &content).map_err(|err| EnsembleError::io(path, err))
                })
            });
            if let Err(err) = written {
                for path in [&statistics, &change] {
                    if let Err(cleanup) = remove_if_present(path) {
                        warn!("could not remove {}: {cleanup}", path.display());
                    }
                }
                return Err(err);
            }
            info!("wrote {unit} to {}", dir.display());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::components::{
            change::{compute_change, ChangeResult, ABSOLUTE_CHANGE, RELATIVE_CHANGE},
            ensemble::{aggregate, Percentile, MEAN},
            grid::testing::*,
        };
        use ndarray::array;
        use rstest::{fixture, rstest};

        /// Single band GeoTIFF without georeferencing.
        fn raster(path: &Path, (rows, cols): (usize, usize), values: Vec<f64>) -> GdalDataset {
            let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
            let out = driver
                .create_with_band_type::<f64, _>(path, cols, rows, 1)
                .unwrap();
            {
                let mut band = out.rasterband(1).unwrap();
                let mut buffer = Buffer::new((cols, rows), values);
                band.write((0, 0), (cols, rows), &mut buffer).unwrap();
            }
            out
        }

        #[fixture]
        fn unit() -> UnitId {
            UnitId {
                indicator: "102".into(),
                scenario: "historical".into(),
                period: "1".into(),
                region: Some("5".into()),
            }
        }

        fn artifacts(unit: UnitId) -> UnitArtifacts {
            let members = [
                dataset("a", "pr", array![[1., 2.], [NODATA, 4.]]),
                dataset("b", "pr", array![[3., 2.], [NODATA, 8.]]),
            ];
            let percentiles = [Percentile::new(50.).unwrap()];
            UnitArtifacts {
                marker: CompletionMarker {
                    variable: "pr".into(),
                    percentiles: vec!["p50".into()],
                    members: 2,
                    crop_to_region: false,
                    unit,
                },
                statistics: aggregate(&members, "pr", &percentiles).unwrap(),
                change: None,
            }
        }

        #[rstest]
        fn persists_and_reads_back(unit: UnitId) {
            let root = tempfile::tempdir().unwrap();
            let store = GdalStore::new(root.path()).unwrap();
            assert!(store.marker(&unit).unwrap().is_none());

            let artifacts = artifacts(unit.clone());
            store.persist(&artifacts).unwrap();
            assert_eq!(store.marker(&unit).unwrap(), Some(artifacts.marker.clone()));
            assert!(!store.change_path(&unit).exists());

            let loaded = store.load_statistics(&unit).unwrap();
            assert_eq!(loaded.members(), 2);
            assert_eq!(loaded.periods(), artifacts.statistics.periods());
            assert_eq!(loaded.crs(), &Crs::new(TEST_CRS));
            let mean = loaded.variable(MEAN).unwrap();
            assert_eq!(mean[[0, 0, 0]], 2.);
            assert!(mean[[0, 1, 0]].is_nan());
            assert!(loaded.transform().approx_eq(artifacts.statistics.transform()));
        }

        #[rstest]
        fn reads_one_variable_of_a_multi_variable_file(unit: UnitId) {
            let root = tempfile::tempdir().unwrap();
            let store = GdalStore::new(root.path()).unwrap();
            store.persist(&artifacts(unit.clone())).unwrap();

            let file = GdalFile::open(store.statistics_path(&unit)).unwrap();
            let variables = file.variables().unwrap();
            assert!(variables.contains(&"p50".to_string()));
            let dataset = file.dataset("max").unwrap();
            assert_eq!(dataset.variable_names().collect::<Vec<_>>(), ["max"]);
            assert_eq!(dataset.variable("max").unwrap()[[0, 1, 1]], 8.);
            assert!(matches!(
                file.dataset("tas").unwrap_err(),
                EnsembleError::GridMismatch(_)
            ));
        }

        #[rstest]
        fn recompute_without_change_drops_the_old_one(unit: UnitId) {
            let root = tempfile::tempdir().unwrap();
            let store = GdalStore::new(root.path()).unwrap();
            let mut with_change = artifacts(unit.clone());
            with_change.change =
                Some(compute_change(&with_change.statistics, &with_change.statistics).unwrap());
            store.persist(&with_change).unwrap();
            assert!(store.change_path(&unit).exists());

            store.persist(&artifacts(unit.clone())).unwrap();
            assert!(!store.change_path(&unit).exists());
            assert!(store.statistics_path(&unit).exists());
            assert!(store.marker(&unit).unwrap().is_some());
        }

        #[rstest]
        fn failed_change_write_leaves_no_artifact(unit: UnitId) {
            let root = tempfile::tempdir().unwrap();
            let store = GdalStore::new(root.path()).unwrap();
            let mut previous = artifacts(unit.clone());
            previous.change =
                Some(compute_change(&previous.statistics, &previous.statistics).unwrap());
            store.persist(&previous).unwrap();

            let values = Array3::zeros((1, 2, 2));
            let unwritable = GridDataset::new(
                "unwritable",
                Crs::new("NOT:A_CRS"),
                unit_transform(2),
                vec![PeriodId::new("1")],
                [
                    (ABSOLUTE_CHANGE.to_string(), values.clone()),
                    (RELATIVE_CHANGE.to_string(), values),
                ],
            )
            .unwrap();
            let mut failing = artifacts(unit.clone());
            failing.change = Some(ChangeResult::from_dataset(unwritable).unwrap());

            assert!(store.persist(&failing).is_err());
            assert!(store.marker(&unit).unwrap().is_none());
            assert!(!store.statistics_path(&unit).exists());
            assert!(!store.change_path(&unit).exists());
        }

        #[rstest]
        #[case(11., true)]
        #[case(20., false)]
        fn declared_extent_must_match_the_transform(#[case] lon_max: f64, #[case] agrees: bool) {
            let root = tempfile::tempdir().unwrap();
            let path = root.path().join("pr.tif");
            let mut out = raster(&path, (2, 2), vec![1., 2., 3., 4.]);
            out.set_geo_transform(&GridTransform::north_up(10., 62., 0.5, 0.5).to_gdal())
                .unwrap();
            out.set_spatial_ref(&SpatialRef::from_epsg(4326).unwrap())
                .unwrap();
            for (item, value) in DECLARED_EXTENT.iter().zip([10., 61., lon_max, 62.]) {
                out.set_metadata_item(item, &value.to_string(), "").unwrap();
            }
            drop(out);

            let file = GdalFile::open(&path).unwrap();
            assert_eq!(file.extent(), Some(Rect::new((10., 61.), (lon_max, 62.))));
            match file.dataset("pr") {
                Ok(dataset) => {
                    assert!(agrees);
                    assert_eq!(dataset.variable("pr").unwrap()[[0, 1, 1]], 4.);
                }
                Err(err) => {
                    assert!(!agrees);
                    assert!(matches!(err, EnsembleError::GridMismatch(_)));
                }
            }
        }

        #[rstest]
        fn transform_from_geolocation_cell_centers() {
            let root = tempfile::tempdir().unwrap();
            let values = root.path().join("values.tif");
            let (xs, ys) = (root.path().join("xs.tif"), root.path().join("ys.tif"));
            drop(raster(&values, (2, 3), vec![1., 2., 3., 4., 5., 6.]));
            drop(raster(&xs, (1, 3), vec![10.25, 10.75, 11.25]));
            drop(raster(&ys, (1, 2), vec![61.75, 61.25]));
            let vrt = root.path().join("pr.vrt");
            fs::write(
                &vrt,
                format!(
                    r#"<VRTDataset rasterXSize="3" rasterYSize="2">
                      <Metadata domain="GEOLOCATION">
                        <MDI key="X_DATASET">{}</MDI>
                        <MDI key="X_BAND">1</MDI>
                        <MDI key="Y_DATASET">{}</MDI>
                        <MDI key="Y_BAND">1</MDI>
                      </Metadata>
                      <VRTRasterBand dataType="Float64" band="1">
                        <SimpleSource>
                          <SourceFilename relativeToVRT="0">{}</SourceFilename>
                          <SourceBand>1</SourceBand>
                        </SimpleSource>
                      </VRTRasterBand>
                    </VRTDataset>"#,
                    xs.display(),
                    ys.display(),
                    values.display()
                ),
            )
            .unwrap();

            let dataset = GdalFile::open(&vrt).unwrap().dataset("pr").unwrap();
            let expected = GridTransform::north_up(10., 62., 0.5, 0.5);
            assert!(dataset.transform().approx_eq(&expected));
            assert_eq!(dataset.variable("pr").unwrap()[[0, 1, 2]], 6.);

            // a bare raster has neither a geotransform nor cell centers
            assert!(GdalFile::open(&values).unwrap().dataset("pr").is_err());
        }

        #[rstest]
        fn unreadable_marker_is_not_complete(unit: UnitId) {
            let root = tempfile::tempdir().unwrap();
            let store = GdalStore::new(root.path()).unwrap();
            let dir = store.unit_dir(&unit);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(MARKER), "not a marker").unwrap();
            assert!(store.marker(&unit).unwrap().is_none());
        }

        #[rstest]
        fn loads_region_feature() {
            let root = tempfile::tempdir().unwrap();
            let path = root.path().join("regions.geojson");
            fs::write(
                &path,
                r#"{"type": "FeatureCollection", "features": [
                    {"type": "Feature", "properties": {"name": "a"}, "geometry":
                        {"type": "Point", "coordinates": [10, 60]}},
                    {"type": "Feature", "properties": {"name": "b"}, "geometry":
                        {"type": "Polygon", "coordinates": [[[10, 60], [11, 60], [11, 61], [10, 60]]]}}
                ]}"#,
            )
            .unwrap();

            let loader = GdalRegionLoader;
            let source = |feature| RegionSource {
                path: path.clone(),
                feature,
            };
            let region = loader.load(&"b".into(), &source(1)).unwrap();
            assert_eq!(region.geometry().geometry().0.len(), 1);
            assert!(!region.geometry().crs().is_unknown());

            assert!(loader.load(&"a".into(), &source(0)).is_err());
            assert!(loader.load(&"c".into(), &source(7)).is_err());
        }
    }
}
