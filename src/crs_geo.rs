use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
    sync::Arc,
};

use geo::{BoundingRect, Rect};
use serde::{Deserialize, Serialize};

use crate::errors::{EnsembleError, Result};

/// Coordinate reference system identifier.
///
/// Either an authority code (`EPSG:32633`) or a WKT/PROJ string as reported
/// by the raster source. Comparison ignores surrounding whitespace and ASCII case.
#[derive(Shrinkwrap, Clone, Debug, Serialize, Deserialize)]
pub struct Crs(Arc<str>);

impl Crs {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref().trim()))
    }

    /// Crs of a source that carries no georeferencing.
    pub fn unknown() -> Self {
        Self(Arc::from(""))
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn normalized(&self) -> String {
        self.0.to_ascii_uppercase()
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Crs {}

impl Hash for Crs {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state)
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("<unknown crs>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Geometries that can be moved between coordinate reference systems.
pub trait Reproject: Sized + Clone {
    fn reproject(&self, from: &Crs, to: &Crs) -> Result<Self>;
}

#[cfg(feature = "proj")]
impl<G> Reproject for G
where
    G: proj::Transform<f64, Output = G> + Clone,
{
    fn reproject(&self, from: &Crs, to: &Crs) -> Result<Self> {
        let proj = proj::Proj::new_known_crs(from.as_str(), to.as_str(), None)?;
        Ok(self.transformed(&proj)?)
    }
}

#[cfg(not(feature = "proj"))]
impl<G: Clone> Reproject for G {
    fn reproject(&self, from: &Crs, to: &Crs) -> Result<Self> {
        Err(EnsembleError::grid_mismatch(format!(
            "cannot reproject from {from} to {to}: built without the `proj` feature"
        )))
    }
}

/// Geometry tagged with the crs its coordinates are expressed in.
#[derive(Shrinkwrap, Debug, Clone)]
pub struct CrsGeometry<G> {
    crs: Crs,
    #[shrinkwrap(main_field)]
    geometry: G,
}

impl<G> CrsGeometry<G> {
    pub fn new(crs: Crs, geometry: G) -> Self {
        Self { crs, geometry }
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }
}

impl<G: Reproject> CrsGeometry<G> {
    /// Clones if crs is same.
    pub fn projected_geometry(&self, crs: &Crs) -> Result<G> {
        if self.crs.is_unknown() || crs.is_unknown() {
            return Err(EnsembleError::grid_mismatch(format!(
                "cannot reproject geometry from {} to {}",
                self.crs, crs
            )));
        }
        if self.crs.eq(crs) {
            Ok(self.geometry.clone())
        } else {
            self.geometry.reproject(&self.crs, crs)
        }
    }
}

impl<G: BoundingRect<f64>> CrsGeometry<G> {
    pub fn bounding_rect(&self) -> Option<CrsGeometry<Rect>> {
        let geometry = self.geometry.bounding_rect().into()?;
        Some(CrsGeometry {
            crs: self.crs.clone(),
            geometry,
        })
    }
}
