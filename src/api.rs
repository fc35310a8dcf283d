//! Request and response shapes of the localization service.
//!
//! Requests name their DEM by identifier and are resolved through a
//! [`RasterSource`]. Every outcome, including malformed requests and missing
//! data, is turned into a [`LocalizationResponse`]; nothing here panics or
//! returns an error to the caller.
//!
//! ```json
//! {
//!   "algorithm": "TopoMono",
//!   "detection_pixel": { "x": 320, "y": 240 },
//!   "camera_params": {
//!     "lat": 34.0, "lon": -118.0, "elevation_m": 500,
//!     "heading_deg": 90, "tilt_deg": -10,
//!     "fov_h_deg": 60, "fov_v_deg": 45,
//!     "resolution": { "width": 640, "height": 480 }
//!   },
//!   "dem_identifier": "santa_monica_30m"
//! }
//! ```

use image::RgbImage;
use log::{error, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::dem::RasterSource;
use crate::depth::{DepthEstimator, DepthSource, ImageSource};
use crate::localize::{
    localize_multi_view, localize_single_view, Algorithm, LocalizationResult, LocalizerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCoord {
    pub x: f64,
    pub y: f64,
}

impl PixelCoord {
    pub fn to_point(self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleViewRequest {
    /// `TopoMono`, `DMT` or `DMT-RANSAC`. Kept as text so unknown names
    /// produce an error response instead of a parse failure.
    pub algorithm: String,
    pub detection_pixel: PixelCoord,
    pub camera_params: Camera,
    pub dem_identifier: String,
    #[serde(default, alias = "image_gcs_uri")]
    pub image_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub camera_params: Camera,
    pub detection_pixel: PixelCoord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiViewRequest {
    pub camera_views: Vec<CameraView>,
    #[serde(default)]
    pub dem_identifier: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizationResponse {
    pub status: Status,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation_m: Option<f64>,
    pub method_used: String,
    pub message: Option<String>,
}

impl LocalizationResponse {
    pub fn error(method_used: impl Into<String>, message: impl Into<String>) -> Self {
        LocalizationResponse {
            status: Status::Error,
            latitude: None,
            longitude: None,
            elevation_m: None,
            method_used: method_used.into(),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl From<&LocalizationResult> for LocalizationResponse {
    fn from(result: &LocalizationResult) -> Self {
        match (&result.position, &result.failure) {
            (Some(p), _) => LocalizationResponse {
                status: Status::Success,
                latitude: Some(p.latitude),
                longitude: Some(p.longitude),
                elevation_m: Some(p.elevation_m),
                method_used: result.algorithm.to_string(),
                message: None,
            },
            (None, failure) => LocalizationResponse::error(
                result.algorithm.to_string(),
                failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "Algorithm execution failed.".to_string()),
            ),
        }
    }
}

/// Image loader and depth estimator used by the DMT variants.
#[derive(Clone, Copy)]
pub struct DepthServices<'a> {
    pub images: &'a dyn ImageSource,
    pub estimator: &'a dyn DepthEstimator,
}

/// Runs a single-camera request.
///
/// The DMT variants need `depth`. When the request carries no `image_uri`
/// the estimator is given an empty image, which suits precomputed depth maps.
pub fn handle_single(
    request: &SingleViewRequest,
    rasters: &dyn RasterSource,
    depth: Option<&DepthServices<'_>>,
    config: &LocalizerConfig,
) -> LocalizationResponse {
    let algorithm: Algorithm = match request.algorithm.parse() {
        Ok(algorithm) => algorithm,
        Err(e) => return LocalizationResponse::error(request.algorithm.clone(), e.to_string()),
    };
    info!(
        "Processing {} request: pixel ({}, {}), DEM '{}'",
        algorithm, request.detection_pixel.x, request.detection_pixel.y, request.dem_identifier
    );

    let dem = match rasters.load_raster(&request.dem_identifier) {
        Ok(dem) => dem,
        Err(e) => {
            error!("Failed to load DEM '{}': {}", request.dem_identifier, e);
            return LocalizationResponse::error(algorithm.as_str(), e.to_string());
        }
    };

    let image = match (algorithm.needs_depth(), depth, &request.image_uri) {
        (true, Some(services), Some(uri)) => match services.images.load_pixels(uri) {
            Ok(image) => image,
            Err(e) => return LocalizationResponse::error(algorithm.as_str(), e.to_string()),
        },
        _ => RgbImage::new(0, 0),
    };
    let depth_source = depth
        .filter(|_| algorithm.needs_depth())
        .map(|services| DepthSource::new(services.estimator, &image));

    let pixel = request.detection_pixel.to_point();
    match localize_single_view(
        &request.camera_params,
        &pixel,
        &dem,
        algorithm,
        depth_source,
        config,
    ) {
        Ok(result) => LocalizationResponse::from(&result),
        Err(e) => LocalizationResponse::error(algorithm.as_str(), e.to_string()),
    }
}

/// Runs a multi-camera triangulation request.
pub fn handle_multi(
    request: &MultiViewRequest,
    rasters: &dyn RasterSource,
    config: &LocalizerConfig,
) -> LocalizationResponse {
    let method = Algorithm::FireTri.as_str();
    info!(
        "Processing triangulation of {} views, DEM {:?}",
        request.camera_views.len(),
        request.dem_identifier
    );

    let dem = match request.dem_identifier.as_deref().map(|id| rasters.load_raster(id)) {
        Some(Ok(dem)) => Some(dem),
        Some(Err(e)) => {
            error!("Failed to load DEM: {}", e);
            return LocalizationResponse::error(method, e.to_string());
        }
        None => None,
    };

    let views: Vec<(Camera, Point2<f64>)> = request
        .camera_views
        .iter()
        .map(|view| (view.camera_params.clone(), view.detection_pixel.to_point()))
        .collect();

    match localize_multi_view(&views, dem.as_deref(), config) {
        Ok(result) => LocalizationResponse::from(&result),
        Err(e) => LocalizationResponse::error(method, e.to_string()),
    }
}
