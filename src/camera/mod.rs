//! Observing cameras: geodetic pose, field of view and pixel-to-ray projection.
//!
//! A [`Camera`] is an immutable value object describing where a camera is and
//! where it looks. Its [`Camera::ray_for_pixel`] method turns a pixel into a
//! [`Ray`] in a [`LocalFrame`](crate::geo::LocalFrame), which is what the
//! localization algorithms consume.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

use crate::geo::GeoPoint;

pub mod ray;

pub use ray::Ray;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Resolution must be positive")]
    ResolutionMustBePositive,
    #[error("Field of view must lie in (0, 180) degrees")]
    FieldOfViewOutOfRange,
    #[error("Camera position is out of range")]
    PositionOutOfRange,
    #[error("Tilt must lie in [-90, 90] degrees")]
    TiltOutOfRange,
    #[error("Camera parameter '{0}' must be finite")]
    NonFinite(&'static str),
    #[error("Pixel ({x}, {y}) is outside the image")]
    PixelIsOutsideImage { x: f64, y: f64 },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// How pixel offsets map onto viewing angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Angle grows linearly with the pixel offset from the image centre.
    #[default]
    Angular,
    /// Ideal pinhole: focal lengths derived from the fields of view.
    Pinhole,
}

/// Camera pose and optics.
///
/// Field names follow the request payload of the localization service
/// (`lat`, `lon`, `elevation_m`, `heading_deg`, ...).
///
/// # Examples
///
/// ```rust
/// use fireloc::camera::{Camera, Resolution};
///
/// let camera = Camera::new(34.0, -118.0, 500.0, 90.0, -10.0, 60.0, 45.0, Resolution { width: 640, height: 480 });
/// assert!(camera.validate_params().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Height above the WGS84 ellipsoid in metres.
    pub elevation_m: f64,
    /// Azimuth of the optical axis, clockwise from north.
    pub heading_deg: f64,
    /// Elevation angle of the optical axis, positive above the horizon.
    pub tilt_deg: f64,
    pub fov_h_deg: f64,
    pub fov_v_deg: f64,
    pub resolution: Resolution,
    #[serde(default)]
    pub projection: Projection,
}

impl Camera {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lat: f64,
        lon: f64,
        elevation_m: f64,
        heading_deg: f64,
        tilt_deg: f64,
        fov_h_deg: f64,
        fov_v_deg: f64,
        resolution: Resolution,
    ) -> Self {
        Camera {
            lat,
            lon,
            elevation_m,
            heading_deg,
            tilt_deg,
            fov_h_deg,
            fov_v_deg,
            resolution,
            projection: Projection::Angular,
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon, self.elevation_m)
    }

    /// Heading normalised into `[0, 360)`.
    pub fn heading(&self) -> f64 {
        self.heading_deg.rem_euclid(360.0)
    }

    /// Pixel at the image centre, which looks along the optical axis.
    pub fn principal_point(&self) -> Point2<f64> {
        Point2::new(
            self.resolution.width as f64 / 2.0,
            self.resolution.height as f64 / 2.0,
        )
    }

    /// Checks the numeric ranges the ray construction relies on.
    pub fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_finite(self)?;
        validation::validate_position(self.lat, self.lon)?;
        validation::validate_optics(self.fov_h_deg, self.fov_v_deg, &self.resolution)?;
        if !(-90.0..=90.0).contains(&self.tilt_deg) {
            return Err(CameraModelError::TiltOutOfRange);
        }
        Ok(())
    }

    /// Checks that `pixel` is finite and lies within `[0, width] × [0, height]`.
    pub fn validate_pixel(&self, pixel: &Point2<f64>) -> Result<(), CameraModelError> {
        let inside = pixel.x.is_finite()
            && pixel.y.is_finite()
            && pixel.x >= 0.0
            && pixel.x <= self.resolution.width as f64
            && pixel.y >= 0.0
            && pixel.y <= self.resolution.height as f64;
        if !inside {
            return Err(CameraModelError::PixelIsOutsideImage {
                x: pixel.x,
                y: pixel.y,
            });
        }
        Ok(())
    }

    /// Loads camera parameters from a YAML file with a top-level `camera` map.
    ///
    /// ```yaml
    /// camera:
    ///   lat: 34.07
    ///   lon: -118.2
    ///   elevation_m: 450
    ///   heading_deg: 90
    ///   tilt_deg: -10
    ///   fov_h_deg: 60
    ///   fov_v_deg: 45
    ///   resolution: [640, 480]   # or {width: 640, height: 480}
    ///   projection: pinhole   # optional
    /// ```
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::YamlError("Empty YAML document".to_string()))?;
        let cam = &doc["camera"];

        let number = |key: &str| -> Result<f64, CameraModelError> {
            let value = &cam[key];
            value
                .as_f64()
                .or_else(|| value.as_i64().map(|v| v as f64))
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!("Invalid {key}: not a number"))
                })
        };

        let resolution_yaml = &cam["resolution"];
        let (width_yaml, height_yaml) = match resolution_yaml.as_vec() {
            Some(dims) if dims.len() == 2 => (&dims[0], &dims[1]),
            Some(_) => {
                return Err(CameraModelError::InvalidParams(
                    "'resolution' must hold [width, height]".to_string(),
                ))
            }
            None if resolution_yaml.as_hash().is_some() => {
                (&resolution_yaml["width"], &resolution_yaml["height"])
            }
            None => {
                return Err(CameraModelError::InvalidParams(
                    "YAML missing 'resolution' or not an array or mapping".to_string(),
                ))
            }
        };
        let dimension = |value: &Yaml, name: &str| -> Result<u32, CameraModelError> {
            value
                .as_i64()
                .filter(|v| *v >= 0 && *v <= u32::MAX as i64)
                .map(|v| v as u32)
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!("Invalid {name}: not an integer"))
                })
        };

        let projection = match cam["projection"].as_str() {
            None | Some("angular") => Projection::Angular,
            Some("pinhole") => Projection::Pinhole,
            Some(other) => {
                return Err(CameraModelError::InvalidParams(format!(
                    "Unknown projection '{other}'"
                )))
            }
        };

        let camera = Camera {
            lat: number("lat")?,
            lon: number("lon")?,
            elevation_m: number("elevation_m")?,
            heading_deg: number("heading_deg")?,
            tilt_deg: number("tilt_deg")?,
            fov_h_deg: number("fov_h_deg")?,
            fov_v_deg: number("fov_v_deg")?,
            resolution: Resolution {
                width: dimension(width_yaml, "width")?,
                height: dimension(height_yaml, "height")?,
            },
            projection,
        };

        camera.validate_params()?;

        Ok(camera)
    }

    /// Saves the camera to a YAML file readable by [`Camera::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml_err = |e: serde_yaml::Error| CameraModelError::YamlError(e.to_string());

        let mut fields = serde_yaml::Mapping::new();
        for (key, value) in [
            ("lat", self.lat),
            ("lon", self.lon),
            ("elevation_m", self.elevation_m),
            ("heading_deg", self.heading_deg),
            ("tilt_deg", self.tilt_deg),
            ("fov_h_deg", self.fov_h_deg),
            ("fov_v_deg", self.fov_v_deg),
        ] {
            fields.insert(
                serde_yaml::Value::String(key.to_string()),
                serde_yaml::to_value(value).map_err(yaml_err)?,
            );
        }
        fields.insert(
            serde_yaml::Value::String("resolution".to_string()),
            serde_yaml::to_value(self.resolution).map_err(yaml_err)?,
        );
        fields.insert(
            serde_yaml::Value::String("projection".to_string()),
            serde_yaml::to_value(self.projection).map_err(yaml_err)?,
        );

        let yaml = serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("camera".to_string()),
            serde_yaml::Value::Mapping(fields),
        )]);
        let yaml_string = serde_yaml::to_string(&yaml).map_err(yaml_err)?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_finite(camera: &Camera) -> Result<(), CameraModelError> {
        for (name, value) in [
            ("lat", camera.lat),
            ("lon", camera.lon),
            ("elevation_m", camera.elevation_m),
            ("heading_deg", camera.heading_deg),
            ("tilt_deg", camera.tilt_deg),
            ("fov_h_deg", camera.fov_h_deg),
            ("fov_v_deg", camera.fov_v_deg),
        ] {
            if !value.is_finite() {
                return Err(CameraModelError::NonFinite(name));
            }
        }
        Ok(())
    }

    pub fn validate_position(lat: f64, lon: f64) -> Result<(), CameraModelError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CameraModelError::PositionOutOfRange);
        }
        Ok(())
    }

    pub fn validate_optics(
        fov_h_deg: f64,
        fov_v_deg: f64,
        resolution: &Resolution,
    ) -> Result<(), CameraModelError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CameraModelError::ResolutionMustBePositive);
        }
        let in_range = |fov: f64| fov > 0.0 && fov < 180.0;
        if !in_range(fov_h_deg) || !in_range(fov_v_deg) {
            return Err(CameraModelError::FieldOfViewOutOfRange);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_camera() -> Camera {
        Camera::new(
            34.0,
            -118.0,
            500.0,
            90.0,
            -10.0,
            60.0,
            45.0,
            Resolution {
                width: 640,
                height: 480,
            },
        )
    }

    #[test]
    fn test_validate_params() {
        assert!(sample_camera().validate_params().is_ok());

        let mut cam = sample_camera();
        cam.fov_h_deg = 180.0;
        assert!(matches!(
            cam.validate_params(),
            Err(CameraModelError::FieldOfViewOutOfRange)
        ));

        let mut cam = sample_camera();
        cam.resolution.height = 0;
        assert!(matches!(
            cam.validate_params(),
            Err(CameraModelError::ResolutionMustBePositive)
        ));

        let mut cam = sample_camera();
        cam.elevation_m = f64::NAN;
        assert!(matches!(
            cam.validate_params(),
            Err(CameraModelError::NonFinite("elevation_m"))
        ));

        let mut cam = sample_camera();
        cam.tilt_deg = 95.0;
        assert!(matches!(
            cam.validate_params(),
            Err(CameraModelError::TiltOutOfRange)
        ));

        let mut cam = sample_camera();
        cam.lat = 91.0;
        assert!(matches!(
            cam.validate_params(),
            Err(CameraModelError::PositionOutOfRange)
        ));
    }

    #[test]
    fn test_heading_is_normalised() {
        let mut cam = sample_camera();
        cam.heading_deg = -90.0;
        assert_eq!(cam.heading(), 270.0);
        cam.heading_deg = 720.0;
        assert_eq!(cam.heading(), 0.0);
    }

    #[test]
    fn test_validate_pixel() {
        let cam = sample_camera();
        assert!(cam.validate_pixel(&Point2::new(320.0, 240.0)).is_ok());
        assert!(cam.validate_pixel(&Point2::new(640.0, 480.0)).is_ok());
        assert!(cam.validate_pixel(&Point2::new(-1.0, 240.0)).is_err());
        assert!(cam.validate_pixel(&Point2::new(320.0, f64::INFINITY)).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let path = std::env::temp_dir().join("fireloc_camera_round_trip.yaml");
        let path = path.to_str().unwrap();

        let cam = sample_camera().with_projection(Projection::Pinhole);
        cam.save_to_yaml(path).unwrap();
        let loaded = Camera::load_from_yaml(path).unwrap();
        assert_eq!(loaded, cam);
    }

    #[test]
    fn test_load_accepts_integers_and_rejects_missing_keys() {
        let dir = std::env::temp_dir();
        let good = dir.join("fireloc_camera_ints.yaml");
        fs::write(
            &good,
            "camera:\n  lat: 34\n  lon: -118\n  elevation_m: 450\n  heading_deg: 90\n  tilt_deg: 10\n  fov_h_deg: 60\n  fov_v_deg: 45\n  resolution: [640, 480]\n",
        )
        .unwrap();
        let cam = Camera::load_from_yaml(good.to_str().unwrap()).unwrap();
        assert_eq!(cam.lat, 34.0);
        assert_eq!(cam.projection, Projection::Angular);

        let bad = dir.join("fireloc_camera_missing.yaml");
        fs::write(&bad, "camera:\n  lat: 34.07\n").unwrap();
        assert!(matches!(
            Camera::load_from_yaml(bad.to_str().unwrap()),
            Err(CameraModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_resolution_as_mapping() {
        let dir = std::env::temp_dir();
        let body = "camera:\n  lat: 34\n  lon: -118\n  elevation_m: 450\n  heading_deg: 90\n  tilt_deg: 10\n  fov_h_deg: 60\n  fov_v_deg: 45\n";

        let mapping = dir.join("fireloc_camera_mapping.yaml");
        fs::write(&mapping, format!("{body}  resolution:\n    width: 1920\n    height: 1080\n")).unwrap();
        let cam = Camera::load_from_yaml(mapping.to_str().unwrap()).unwrap();
        assert_eq!(
            cam.resolution,
            Resolution {
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(cam.principal_point(), Point2::new(960.0, 540.0));

        let partial = dir.join("fireloc_camera_mapping_partial.yaml");
        fs::write(&partial, format!("{body}  resolution:\n    width: 1920\n")).unwrap();
        assert!(matches!(
            Camera::load_from_yaml(partial.to_str().unwrap()),
            Err(CameraModelError::InvalidParams(_))
        ));

        let triple = dir.join("fireloc_camera_triple.yaml");
        fs::write(&triple, format!("{body}  resolution: [640, 480, 3]\n")).unwrap();
        assert!(matches!(
            Camera::load_from_yaml(triple.to_str().unwrap()),
            Err(CameraModelError::InvalidParams(_))
        ));
    }
}
