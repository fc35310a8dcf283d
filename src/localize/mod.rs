//! Pixel geolocation entry points.
//!
//! A single observation is located by intersecting the pixel's line of sight
//! with the terrain ([`topomono`]), optionally fused with a monocular depth
//! estimate ([`dmt`]). Several observations of the same event are
//! triangulated ([`firetri`]).
//!
//! Geometric non-convergence is an ordinary outcome and comes back as a
//! [`LocalizationResult`] carrying a [`Failure`]. Only misuse of the API
//! (too few views, missing depth input, wrong algorithm) is an `Err`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::dem::DemRaster;
use crate::depth::DepthSource;
use crate::geo::{GeoPoint, LocalFrame};

pub mod config;
pub mod dmt;
pub mod firetri;
pub mod topomono;

pub use config::{ConfigError, DmtConfig, FireTriConfig, LocalizerConfig, TopoMonoConfig};

/// Localization method, named as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "TopoMono")]
    TopoMono,
    #[serde(rename = "DMT")]
    Dmt,
    #[serde(rename = "DMT-RANSAC")]
    DmtRansac,
    #[serde(rename = "FireTri")]
    FireTri,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TopoMono => "TopoMono",
            Algorithm::Dmt => "DMT",
            Algorithm::DmtRansac => "DMT-RANSAC",
            Algorithm::FireTri => "FireTri",
        }
    }

    pub fn needs_depth(&self) -> bool {
        matches!(self, Algorithm::Dmt | Algorithm::DmtRansac)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = LocalizeError;

    /// Case-insensitive; `_` and `-` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "topomono" => Ok(Algorithm::TopoMono),
            "dmt" => Ok(Algorithm::Dmt),
            "dmt-ransac" => Ok(Algorithm::DmtRansac),
            "firetri" => Ok(Algorithm::FireTri),
            _ => Err(LocalizeError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Why a localization produced no position.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Failure {
    #[error("No valid intersection within the search range")]
    NoIntersection,
    #[error("Ray leaves the DEM before meeting the terrain")]
    OutsideDem,
    #[error("Terrain crossing lies in a gap of the DEM")]
    DataGap,
    #[error("Rays are too close to parallel to triangulate")]
    ParallelRays,
    #[error("Fewer than {needed} of {candidates} candidates agree")]
    NoConsensus { candidates: usize, needed: usize },
    #[error("Depth estimate is not a positive finite distance")]
    InvalidDepth,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Precondition violations at the call site.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LocalizeError {
    #[error("Triangulation needs at least 2 views, got {got}")]
    NotEnoughViews { got: usize },
    #[error("{0} needs a depth source")]
    MissingDepthSource(Algorithm),
    #[error("Unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

/// Outcome of one localization call. `position` and `failure` are never both
/// set.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizationResult {
    pub algorithm: Algorithm,
    pub position: Option<GeoPoint>,
    pub failure: Option<Failure>,
}

impl LocalizationResult {
    pub fn located(algorithm: Algorithm, position: GeoPoint) -> Self {
        LocalizationResult {
            algorithm,
            position: Some(position),
            failure: None,
        }
    }

    pub fn failed(algorithm: Algorithm, failure: Failure) -> Self {
        LocalizationResult {
            algorithm,
            position: None,
            failure: Some(failure),
        }
    }

    /// Builds a result, demoting non-finite coordinates to a failure.
    pub fn from_outcome(algorithm: Algorithm, outcome: Result<GeoPoint, Failure>) -> Self {
        match outcome {
            Ok(position) if position.is_finite() => Self::located(algorithm, position),
            Ok(_) => Self::failed(
                algorithm,
                Failure::InvalidInput("computation produced non-finite coordinates".to_string()),
            ),
            Err(failure) => Self::failed(algorithm, failure),
        }
    }

    pub fn success(&self) -> bool {
        self.position.is_some()
    }
}

/// Locates `pixel` of a single camera on the terrain.
///
/// # Arguments
///
/// * `camera` - Observing camera.
/// * `pixel` - Detection in image coordinates, origin at the top-left corner.
/// * `dem` - Terrain covering the line of sight.
/// * `algorithm` - `TopoMono`, `DMT` or `DMT-RANSAC`.
/// * `depth` - Depth estimator and image, required by the DMT variants.
/// * `config` - Algorithm parameters.
///
/// # Errors
///
/// * [`LocalizeError::UnsupportedAlgorithm`] for `FireTri`.
/// * [`LocalizeError::MissingDepthSource`] for DMT without `depth`.
///
/// Invalid camera parameters or pixels are reported as
/// [`Failure::InvalidInput`] inside the result.
pub fn localize_single_view(
    camera: &Camera,
    pixel: &Point2<f64>,
    dem: &DemRaster,
    algorithm: Algorithm,
    depth: Option<DepthSource<'_>>,
    config: &LocalizerConfig,
) -> Result<LocalizationResult, LocalizeError> {
    if algorithm == Algorithm::FireTri {
        return Err(LocalizeError::UnsupportedAlgorithm(format!(
            "{algorithm} (needs multiple views)"
        )));
    }
    if algorithm.needs_depth() && depth.is_none() {
        return Err(LocalizeError::MissingDepthSource(algorithm));
    }

    if let Err(e) = camera
        .validate_params()
        .and_then(|_| camera.validate_pixel(pixel))
    {
        warn!("Rejecting {} request: {}", algorithm, e);
        return Ok(LocalizationResult::failed(
            algorithm,
            Failure::InvalidInput(e.to_string()),
        ));
    }

    let frame = LocalFrame::new(GeoPoint::new(camera.lat, camera.lon, 0.0));
    let sampler = dem.sampler();
    let outcome = match (algorithm, depth) {
        (Algorithm::TopoMono, _) => {
            let ray = camera.ray_for_pixel(&frame, pixel.x, pixel.y);
            topomono::intersect(&ray, &frame, &sampler, &config.topomono)
        }
        (Algorithm::Dmt, Some(depth)) => {
            dmt::localize(camera, &frame, pixel, &depth, &sampler, false, config)
        }
        (Algorithm::DmtRansac, Some(depth)) => {
            dmt::localize(camera, &frame, pixel, &depth, &sampler, true, config)
        }
        _ => return Err(LocalizeError::MissingDepthSource(algorithm)),
    };

    let result = LocalizationResult::from_outcome(algorithm, outcome);
    log_result(&result);
    Ok(result)
}

/// Triangulates one event seen by several cameras.
///
/// The result does not depend on the order of `views`. When `dem` is given
/// and `snap_to_dem` is enabled the elevation is taken from the terrain.
///
/// # Errors
///
/// [`LocalizeError::NotEnoughViews`] with fewer than two views.
pub fn localize_multi_view(
    views: &[(Camera, Point2<f64>)],
    dem: Option<&DemRaster>,
    config: &LocalizerConfig,
) -> Result<LocalizationResult, LocalizeError> {
    let algorithm = Algorithm::FireTri;
    if views.len() < 2 {
        return Err(LocalizeError::NotEnoughViews { got: views.len() });
    }

    for (i, (camera, pixel)) in views.iter().enumerate() {
        if let Err(e) = camera
            .validate_params()
            .and_then(|_| camera.validate_pixel(pixel))
        {
            warn!("Rejecting view {}: {}", i, e);
            return Ok(LocalizationResult::failed(
                algorithm,
                Failure::InvalidInput(format!("view {i}: {e}")),
            ));
        }
    }

    let mut ordered: Vec<&(Camera, Point2<f64>)> = views.iter().collect();
    ordered.sort_by(|a, b| compare_views(a, b));

    let positions: Vec<GeoPoint> = ordered.iter().map(|(camera, _)| camera.position()).collect();
    let frame = LocalFrame::centred_on(&positions)
        .ok_or(LocalizeError::NotEnoughViews { got: 0 })?;
    let rays: Vec<_> = ordered
        .iter()
        .map(|(camera, pixel)| camera.ray_for_pixel(&frame, pixel.x, pixel.y))
        .collect();

    let outcome = firetri::locate(&rays, &frame, dem, &config.firetri);
    let result = LocalizationResult::from_outcome(algorithm, outcome);
    log_result(&result);
    Ok(result)
}

/// Total order on views so that every permutation is processed identically.
fn compare_views(a: &(Camera, Point2<f64>), b: &(Camera, Point2<f64>)) -> Ordering {
    let key = |(camera, pixel): &(Camera, Point2<f64>)| {
        [
            camera.lat,
            camera.lon,
            camera.elevation_m,
            camera.heading_deg,
            camera.tilt_deg,
            camera.fov_h_deg,
            camera.fov_v_deg,
            pixel.x,
            pixel.y,
        ]
    };
    let (ka, kb) = (key(a), key(b));
    ka.iter()
        .zip(kb.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn log_result(result: &LocalizationResult) {
    match (&result.position, &result.failure) {
        (Some(p), _) => info!(
            "{}: located at ({:.6}, {:.6}) elevation {:.1} m",
            result.algorithm, p.latitude, p.longitude, p.elevation_m
        ),
        (None, Some(failure)) => info!("{}: no position ({})", result.algorithm, failure),
        (None, None) => {}
    }
}
