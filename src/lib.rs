//! Fireloc Library
//!
//! Geolocation of image detections from ground-based or aerial cameras onto
//! WGS84 latitude, longitude and elevation using a digital elevation model.
//! The library provides:
//! - Georeferenced DEM rasters with bilinear elevation sampling
//! - Pixel-to-ray projection for cameras given by pose and field of view
//! - Single-view localization by ray / terrain intersection (TopoMono)
//! - Depth-refined single-view localization (DMT, DMT-RANSAC)
//! - Robust multi-view triangulation (FireTri)
//!
//! All geometry is computed in a local East-North-Up frame with exact
//! geodetic conversions, so results stay accurate at long range.

pub mod api;
pub mod camera;
pub mod dem;
pub mod depth;
pub mod geo;
pub mod localize;
pub mod robust;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use camera::{Camera, CameraModelError, Projection, Ray, Resolution};

pub use dem::{AsciiGridSource, DemCache, DemError, DemRaster, ElevationSampler, RasterSource};

pub use depth::{DepthEstimator, DepthMap, DepthSource, FileImageSource, ImageSource};

pub use geo::{Crs, GeoPoint, GeoTransform, LocalFrame};

pub use localize::{
    localize_multi_view, localize_single_view, Algorithm, Failure, LocalizationResult,
    LocalizeError, LocalizerConfig,
};
