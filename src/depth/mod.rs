//! Monocular depth inputs.
//!
//! The depth-refined localizer never owns a model. It receives an object
//! implementing [`DepthEstimator`] together with the image it should look at,
//! bundled as a [`DepthSource`]. Estimators can be closures, precomputed
//! [`DepthMap`]s or adapters around an external inference service.

use std::path::Path;

use image::RgbImage;
use log::info;
use nalgebra::Point2;

#[derive(thiserror::Error, Debug)]
pub enum DepthError {
    #[error("Failed to load image: {0}")]
    ImageError(String),
    #[error("Failed to parse depth map: {0}")]
    Parse(String),
    #[error("Depth map rows have inconsistent lengths (row {row} has {got}, expected {expected})")]
    RaggedRows {
        row: usize,
        got: usize,
        expected: usize,
    },
    #[error("Depth map is empty")]
    Empty,
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for DepthError {
    fn from(err: std::io::Error) -> Self {
        DepthError::IOError(err.to_string())
    }
}

impl From<csv::Error> for DepthError {
    fn from(err: csv::Error) -> Self {
        DepthError::Parse(err.to_string())
    }
}

/// Distance in metres from the camera to the surface seen at `pixel`.
///
/// Implementations may return non-finite or non-positive values to signal
/// that no estimate is available; the localizer rejects those.
pub trait DepthEstimator {
    fn estimate_depth(&self, image: &RgbImage, pixel: &Point2<f64>) -> f64;
}

impl<F> DepthEstimator for F
where
    F: Fn(&RgbImage, &Point2<f64>) -> f64,
{
    fn estimate_depth(&self, image: &RgbImage, pixel: &Point2<f64>) -> f64 {
        self(image, pixel)
    }
}

/// An estimator and the image it runs on, supplied per localization call.
#[derive(Clone, Copy)]
pub struct DepthSource<'a> {
    pub estimator: &'a dyn DepthEstimator,
    pub image: &'a RgbImage,
}

impl<'a> DepthSource<'a> {
    pub fn new(estimator: &'a dyn DepthEstimator, image: &'a RgbImage) -> Self {
        DepthSource { estimator, image }
    }

    pub fn depth_at(&self, pixel: &Point2<f64>) -> f64 {
        self.estimator.estimate_depth(self.image, pixel)
    }
}

/// Precomputed per-pixel depth, row-major, one row per image line.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl DepthMap {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Result<Self, DepthError> {
        if width == 0 || height == 0 {
            return Err(DepthError::Empty);
        }
        if data.len() != width * height {
            return Err(DepthError::Parse(format!(
                "expected {} values, got {}",
                width * height,
                data.len()
            )));
        }
        Ok(DepthMap {
            width,
            height,
            data,
        })
    }

    /// Reads a headerless CSV grid of depths in metres.
    ///
    /// Empty fields and `nan` are kept as NaN (no estimate).
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, DepthError> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut width = 0;
        let mut height = 0;
        let mut data = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if row == 0 {
                width = record.len();
            } else if record.len() != width {
                return Err(DepthError::RaggedRows {
                    row,
                    got: record.len(),
                    expected: width,
                });
            }
            for field in record.iter() {
                let value = if field.is_empty() {
                    f64::NAN
                } else {
                    field
                        .parse::<f64>()
                        .map_err(|e| DepthError::Parse(format!("row {row}: '{field}': {e}")))?
                };
                data.push(value);
            }
            height += 1;
        }

        info!("Loaded {}x{} depth map from {:?}", width, height, path);
        Self::new(width, height, data)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Depth of the pixel containing `(px, py)`, `None` outside the map.
    pub fn get(&self, px: f64, py: f64) -> Option<f64> {
        if !(px >= 0.0 && py >= 0.0) {
            return None;
        }
        let (col, row) = (px.floor() as usize, py.floor() as usize);
        if col >= self.width || row >= self.height {
            return None;
        }
        Some(self.data[row * self.width + col])
    }
}

impl DepthEstimator for DepthMap {
    fn estimate_depth(&self, _image: &RgbImage, pixel: &Point2<f64>) -> f64 {
        self.get(pixel.x, pixel.y).unwrap_or(f64::NAN)
    }
}

/// Capability for loading the pixels of an observation image.
pub trait ImageSource {
    fn load_pixels(&self, uri: &str) -> Result<RgbImage, DepthError>;
}

/// [`ImageSource`] treating URIs as local file paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn load_pixels(&self, uri: &str) -> Result<RgbImage, DepthError> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let img = image::open(path).map_err(|e| DepthError::ImageError(e.to_string()))?;
        Ok(img.to_rgb8())
    }
}
