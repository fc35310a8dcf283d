//! Digital elevation model rasters and continuous elevation sampling.
//!
//! A [`DemRaster`] is an immutable row-major grid of elevation samples placed at
//! cell centres, georeferenced by a [`GeoTransform`] whose world coordinates
//! are those of the raster's [`Crs`]: longitude / latitude for geographic
//! rasters, easting / northing for UTM rasters. [`ElevationSampler`]
//! evaluates the terrain at arbitrary continuous positions with bilinear
//! interpolation and never interpolates across missing data.
//!
//! Rasters are obtained through the [`RasterSource`] capability so the engine
//! can run against synthetic in-memory grids as well as files.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;

use crate::geo::{Crs, GeoError, GeoTransform};

pub mod ascii_grid;

pub use ascii_grid::AsciiGridSource;

#[derive(thiserror::Error, Debug)]
pub enum DemError {
    #[error("DEM '{0}' not found")]
    NotFound(String),
    #[error("Raster has {got} samples, expected {width}x{height}")]
    ShapeMismatch {
        width: usize,
        height: usize,
        got: usize,
    },
    #[error("Raster must have at least 2x2 samples")]
    TooSmall,
    #[error("Raster of {width}x{height} samples is too large")]
    TooLarge { width: usize, height: usize },
    #[error("Invalid geotransform: {0}")]
    Transform(#[from] GeoError),
    #[error("Failed to parse DEM: {0}")]
    Parse(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for DemError {
    fn from(err: std::io::Error) -> Self {
        DemError::IOError(err.to_string())
    }
}

/// Immutable elevation grid with its georeferencing.
#[derive(Debug, Clone)]
pub struct DemRaster {
    width: usize,
    height: usize,
    data: Vec<f32>,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f32>,
    min_elevation: f64,
    max_elevation: f64,
}

impl DemRaster {
    /// Builds a geographic raster from row-major samples; see
    /// [`DemRaster::with_crs`] for projected rasters.
    ///
    /// # Errors
    ///
    /// * [`DemError::TooLarge`] if `width * height` overflows.
    /// * [`DemError::ShapeMismatch`] if `data.len() != width * height`.
    /// * [`DemError::TooSmall`] if either dimension is below 2, since bilinear
    ///   sampling needs a 2x2 neighbourhood.
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
        transform: GeoTransform,
        nodata: Option<f32>,
    ) -> Result<Self, DemError> {
        let samples = width
            .checked_mul(height)
            .ok_or(DemError::TooLarge { width, height })?;
        if data.len() != samples {
            return Err(DemError::ShapeMismatch {
                width,
                height,
                got: data.len(),
            });
        }
        if width < 2 || height < 2 {
            return Err(DemError::TooSmall);
        }

        let mut raster = DemRaster {
            width,
            height,
            data,
            transform,
            crs: Crs::Geographic,
            nodata,
            min_elevation: f64::NAN,
            max_elevation: f64::NAN,
        };
        let (min, max) = raster
            .data
            .iter()
            .filter(|&&v| !raster.is_nodata(v))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v as f64), hi.max(v as f64))
            });
        raster.min_elevation = min;
        raster.max_elevation = max;

        debug!(
            "DEM raster {}x{} elevation range [{:.2}, {:.2}]",
            width, height, min, max
        );
        Ok(raster)
    }

    /// Raster of constant elevation, mostly useful for synthetic scenes.
    pub fn flat(
        width: usize,
        height: usize,
        elevation: f32,
        transform: GeoTransform,
    ) -> Result<Self, DemError> {
        let samples = width
            .checked_mul(height)
            .ok_or(DemError::TooLarge { width, height })?;
        Self::new(width, height, vec![elevation; samples], transform, None)
    }

    /// Builds a raster by evaluating `f(x, y)` at every cell centre, in the
    /// world coordinates of `transform`.
    pub fn from_fn<F>(
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: Option<f32>,
        f: F,
    ) -> Result<Self, DemError>
    where
        F: Fn(f64, f64) -> f32,
    {
        let samples = width
            .checked_mul(height)
            .ok_or(DemError::TooLarge { width, height })?;
        let mut data = Vec::with_capacity(samples);
        for row in 0..height {
            for col in 0..width {
                let (x, y) = transform.to_geo(col as f64 + 0.5, row as f64 + 0.5);
                data.push(f(x, y));
            }
        }
        Self::new(width, height, data, transform, nodata)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Declares the coordinate reference system of the raster's world
    /// coordinates.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Lowest valid sample, `+inf` when every sample is nodata.
    pub fn min_elevation(&self) -> f64 {
        self.min_elevation
    }

    /// Highest valid sample, `-inf` when every sample is nodata.
    pub fn max_elevation(&self) -> f64 {
        self.max_elevation
    }

    fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || self.nodata == Some(value)
    }

    /// Sample at integer cell `(col, row)`; `None` outside the grid or on nodata.
    pub fn sample(&self, col: i64, row: i64) -> Option<f64> {
        if col < 0 || row < 0 || col >= self.width as i64 || row >= self.height as i64 {
            return None;
        }
        let value = self.data[row as usize * self.width + col as usize];
        if self.is_nodata(value) {
            None
        } else {
            Some(value as f64)
        }
    }

    /// World position `(x, y)` of the centre of the raster.
    pub fn centre(&self) -> (f64, f64) {
        self.transform
            .to_geo(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Ground size of one cell in metres at the raster centre, taking the
    /// shorter of the two cell edges.
    pub fn cell_size_m(&self) -> f64 {
        match self.crs {
            Crs::Geographic => {
                let (_, lat) = self.centre();
                self.transform.cell_size_m(lat)
            }
            Crs::Utm { .. } => {
                let (col_edge, row_edge) = self.transform.cell_edges();
                col_edge.min(row_edge)
            }
        }
    }

    /// Whether the geodetic position falls inside the raster extent.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        let (x, y) = self.crs.project(latitude, longitude);
        x.is_finite()
            && y.is_finite()
            && self
                .transform
                .to_grid(x, y, self.width, self.height)
                .is_ok()
    }

    pub fn sampler(&self) -> ElevationSampler<'_> {
        ElevationSampler { dem: self }
    }
}

/// Bilinear terrain sampler over a borrowed [`DemRaster`].
#[derive(Debug, Clone, Copy)]
pub struct ElevationSampler<'a> {
    dem: &'a DemRaster,
}

impl<'a> ElevationSampler<'a> {
    pub fn new(dem: &'a DemRaster) -> Self {
        ElevationSampler { dem }
    }

    pub fn dem(&self) -> &'a DemRaster {
        self.dem
    }

    /// Terrain elevation at world position `(x, y)` in the raster's CRS.
    ///
    /// Returns `None` (NODATA) when the position lies outside the raster, or
    /// when any of the four samples surrounding it is missing.
    pub fn elevation_at(&self, x: f64, y: f64) -> Option<f64> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let (col, row) = self
            .dem
            .transform
            .to_grid(x, y, self.dem.width, self.dem.height)
            .ok()?;

        // Samples sit on cell centres.
        let u = col - 0.5;
        let v = row - 0.5;
        let c0 = u.floor();
        let r0 = v.floor();
        let fx = u - c0;
        let fy = v - r0;
        let (c0, r0) = (c0 as i64, r0 as i64);

        let z00 = self.dem.sample(c0, r0)?;
        let z10 = self.dem.sample(c0 + 1, r0)?;
        let z01 = self.dem.sample(c0, r0 + 1)?;
        let z11 = self.dem.sample(c0 + 1, r0 + 1)?;

        let top = z00 * (1.0 - fx) + z10 * fx;
        let bottom = z01 * (1.0 - fx) + z11 * fx;
        Some(top * (1.0 - fy) + bottom * fy)
    }

    /// Terrain elevation below a WGS84 position, projected into the raster's
    /// CRS first.
    pub fn elevation_at_geodetic(&self, latitude: f64, longitude: f64) -> Option<f64> {
        let (x, y) = self.dem.crs.project(latitude, longitude);
        self.elevation_at(x, y)
    }
}

/// Capability for loading DEM rasters by identifier.
pub trait RasterSource {
    fn load_raster(&self, id: &str) -> Result<Arc<DemRaster>, DemError>;
}

/// In-memory [`RasterSource`] holding pre-built rasters.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRasters {
    rasters: HashMap<String, Arc<DemRaster>>,
}

impl InMemoryRasters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, raster: DemRaster) {
        self.rasters.insert(id.into(), Arc::new(raster));
    }
}

impl RasterSource for InMemoryRasters {
    fn load_raster(&self, id: &str) -> Result<Arc<DemRaster>, DemError> {
        self.rasters
            .get(id)
            .cloned()
            .ok_or_else(|| DemError::NotFound(id.to_string()))
    }
}

/// Memoising wrapper around another [`RasterSource`].
///
/// Loaded rasters are shared read-only between concurrent callers.
pub struct DemCache<S> {
    inner: S,
    cache: RwLock<HashMap<String, Arc<DemRaster>>>,
}

impl<S: RasterSource> DemCache<S> {
    pub fn new(inner: S) -> Self {
        DemCache {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: RasterSource> RasterSource for DemCache<S> {
    fn load_raster(&self, id: &str) -> Result<Arc<DemRaster>, DemError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(raster) = cache.get(id) {
                return Ok(Arc::clone(raster));
            }
        }

        let raster = self.inner.load_raster(id)?;
        debug!("Caching DEM '{}'", id);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(id.to_string(), Arc::clone(&raster));
        }
        Ok(raster)
    }
}
