//! Coordinate handling: raster georeferencing and the geodetic working frame.

use serde::{Deserialize, Serialize};

pub mod crs;
pub mod frame;
pub mod transform;

pub use crs::Crs;
pub use frame::{ecef_to_geodetic, geodetic_to_ecef, LocalFrame};
pub use transform::GeoTransform;

/// Mean length of one degree of latitude in metres.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("Geotransform coefficients must be finite")]
    NonFiniteCoefficient,
    #[error("Pixel width and height must be non-zero")]
    ZeroPixelSize,
    #[error("Geotransform is not invertible")]
    SingularTransform,
    #[error("Position maps to grid cell ({col:.3}, {row:.3}) outside the raster")]
    OutOfRange { col: f64, row: f64 },
    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),
}

/// A WGS84 position: latitude and longitude in degrees, elevation in metres
/// above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, elevation_m: f64) -> Self {
        GeoPoint {
            latitude,
            longitude,
            elevation_m,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite() && self.elevation_m.is_finite()
    }
}
