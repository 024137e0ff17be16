use std::{collections::HashMap, sync::Arc};

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use log::{debug, info};
use ndarray::{s, Array2, Zip};
use parking_lot::RwLock;

use crate::{
    components::{
        bounds::PixelBounds,
        grid::{GridDataset, GridSpec, NODATA},
    },
    crs_geo::{Crs, CrsGeometry},
    errors::{EnsembleError, Result},
    ids::RegionId,
};

/// Named polygon restricting an aggregation.
#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    geometry: CrsGeometry<MultiPolygon>,
}

impl Region {
    pub fn new(id: RegionId, crs: Crs, geometry: impl Into<MultiPolygon>) -> Self {
        Self {
            id,
            geometry: CrsGeometry::new(crs, geometry.into()),
        }
    }

    pub fn id(&self) -> &RegionId {
        &self.id
    }

    pub fn geometry(&self) -> &CrsGeometry<MultiPolygon> {
        &self.geometry
    }
}

/// Per pixel inclusion flags, `(rows, cols)`.
#[derive(Shrinkwrap, Debug, Clone, PartialEq)]
pub struct Mask(Array2<bool>);

impl Mask {
    pub fn from_array(selection: Array2<bool>) -> Self {
        Self(selection)
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.0.dim()
    }

    pub fn selected(&self) -> usize {
        self.0.iter().filter(|selected| **selected).count()
    }

    pub fn window(&self) -> Option<PixelBounds> {
        PixelBounds::from_selection(self.0.view())
    }
}

/// Rasterize `region` on `grid`: a pixel is selected iff its center lies
/// strictly inside the polygon. Pixels only touched by the outline are not.
///
/// Parts of a multipolygon combine by the even-odd rule, so a center
/// covered by two overlapping parts is outside.
pub fn build_mask(region: &Region, grid: &GridSpec) -> Result<Mask> {
    let polygon = region.geometry.projected_geometry(&grid.crs)?;
    let mut selection = Array2::from_elem(grid.shape, false);

    let window = match polygon.bounding_rect() {
        Some(rect) => PixelBounds::covering(&rect, &grid.transform, grid.shape)?,
        None => None,
    };
    if let Some(window) = window {
        let (row_offset, col_offset) = window.offset();
        let transform = grid.transform;
        Zip::indexed(selection.slice_mut(s![window.rows(), window.cols()])).par_for_each(
            |(row, col), selected| {
                let center = Point::from(transform.pixel_center(row + row_offset, col + col_offset));
                let containing = polygon.0.iter().filter(|part| part.contains(&center)).count();
                *selected = containing % 2 == 1;
            },
        );
    }

    let mask = Mask(selection);
    if mask.shape() != grid.shape {
        return Err(EnsembleError::grid_mismatch(format!(
            "mask for {} is {:?}, grid is {:?}",
            region.id,
            mask.shape(),
            grid.shape
        )));
    }
    debug!(
        "region {} selects {} of {} pixels",
        region.id,
        mask.selected(),
        grid.shape.0 * grid.shape.1
    );
    Ok(mask)
}

/// Set every cell outside `mask` to no data.
///
/// With `crop`, the result is shrunk to the window holding the selected
/// pixels and its transform moved accordingly. An empty selection is never
/// cropped.
pub fn apply_mask(dataset: &GridDataset, mask: &Mask, crop: bool) -> Result<GridDataset> {
    if mask.shape() != dataset.shape() {
        return Err(EnsembleError::grid_mismatch(format!(
            "mask is {:?} but {} is {:?}",
            mask.shape(),
            dataset.name(),
            dataset.shape()
        )));
    }
    let (name, grid, periods, mut variables) = dataset.clone().into_parts();
    for values in variables.values_mut() {
        for mut layer in values.outer_iter_mut() {
            Zip::from(&mut layer)
                .and(&mask.0)
                .for_each(|value, &selected| {
                    if !selected {
                        *value = NODATA
                    }
                });
        }
    }

    let mut transform = grid.transform;
    if let Some(window) = mask.window().filter(|_| crop) {
        let (rows, cols) = (window.rows(), window.cols());
        for values in variables.values_mut() {
            *values = values.slice(s![.., rows.clone(), cols.clone()]).to_owned();
        }
        let (row, col) = window.offset();
        transform = transform.offset_by(row, col);
    }
    GridDataset::new(name, grid.crs, transform, periods, variables)
}

/// Masks already built, per region and grid.
///
/// Entries are inserted once and never replaced; concurrent builders of the
/// same key all end up with the first inserted mask.
#[derive(Default)]
pub struct MaskCache {
    masks: RwLock<HashMap<(RegionId, GridSpec), Arc<Mask>>>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, region: &Region, grid: &GridSpec) -> Result<Arc<Mask>> {
        let key = (region.id.clone(), grid.clone());
        if let Some(mask) = self.masks.read().get(&key) {
            return Ok(Arc::clone(mask));
        }
        let mask = Arc::new(build_mask(region, grid)?);
        info!("built mask for region {} on {:?} grid", region.id, grid.shape);
        Ok(Arc::clone(self.masks.write().entry(key).or_insert(mask)))
    }

    pub fn len(&self) -> usize {
        self.masks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
