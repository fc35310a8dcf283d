//! Affine georeferencing of raster grids.
//!
//! A [`GeoTransform`] maps fractional grid coordinates `(col, row)` to world
//! coordinates `(x, y)` with the six GDAL-ordered coefficients:
//!
//! ```text
//! x = origin_x + col * pixel_width + row * row_rotation
//! y = origin_y + col * col_rotation + row * pixel_height
//! ```
//!
//! World coordinates are those of the raster's [`Crs`](crate::geo::Crs):
//! `x` is longitude and `y` latitude in degrees for geographic rasters,
//! easting and northing in metres for UTM rasters.

use serde::{Deserialize, Serialize};

use crate::geo::GeoError;

/// Determinants below this magnitude are treated as a singular transform.
const MIN_DETERMINANT: f64 = 1e-18;

/// Affine mapping between raster grid coordinates and world coordinates.
///
/// # Examples
///
/// ```rust
/// use fireloc::geo::GeoTransform;
///
/// let gt = GeoTransform::from_gdal([-118.0, 0.001, 0.0, 34.0, 0.0, -0.001]).unwrap();
/// let (lon, lat) = gt.to_geo(10.0, 20.0);
/// assert!((lon - -117.99).abs() < 1e-12);
/// assert!((lat - 33.98).abs() < 1e-12);
///
/// let (col, row) = gt.to_grid(lon, lat, 100, 100).unwrap();
/// assert!((col - 10.0).abs() < 1e-9 && (row - 20.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner of the grid.
    pub origin_x: f64,
    /// Cell size along the column axis.
    pub pixel_width: f64,
    /// X contribution of one row step (0 for north-up rasters).
    pub row_rotation: f64,
    /// Y coordinate of the upper-left corner of the grid.
    pub origin_y: f64,
    /// Y contribution of one column step (0 for north-up rasters).
    pub col_rotation: f64,
    /// Cell size along the row axis, negative for north-up rasters.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Creates a north-up transform without rotation terms.
    pub fn north_up(
        origin_x: f64,
        origin_y: f64,
        pixel_width: f64,
        pixel_height: f64,
    ) -> Result<Self, GeoError> {
        Self::from_gdal([origin_x, pixel_width, 0.0, origin_y, 0.0, pixel_height])
    }

    /// Creates a transform from a GDAL-style coefficient array
    /// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
    ///
    /// # Errors
    ///
    /// * [`GeoError::NonFiniteCoefficient`] if any coefficient is NaN or infinite.
    /// * [`GeoError::ZeroPixelSize`] if the pixel width or height is zero.
    /// * [`GeoError::SingularTransform`] if the linear part cannot be inverted.
    pub fn from_gdal(coeffs: [f64; 6]) -> Result<Self, GeoError> {
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(GeoError::NonFiniteCoefficient);
        }
        let transform = GeoTransform {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        };
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(GeoError::ZeroPixelSize);
        }
        if transform.determinant().abs() < MIN_DETERMINANT {
            return Err(GeoError::SingularTransform);
        }
        Ok(transform)
    }

    fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation
    }

    /// Maps fractional grid coordinates to world coordinates.
    pub fn to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Maps world coordinates to fractional grid coordinates without any
    /// bounds check.
    pub fn to_grid_unchecked(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.determinant();
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;

        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;
        (col, row)
    }

    /// Maps world coordinates to fractional grid coordinates of a raster with
    /// the given extent.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::OutOfRange`] when the position falls outside
    /// `[0, width) × [0, height)`. The position is never clamped.
    pub fn to_grid(
        &self,
        x: f64,
        y: f64,
        width: usize,
        height: usize,
    ) -> Result<(f64, f64), GeoError> {
        let (col, row) = self.to_grid_unchecked(x, y);
        let inside = col >= 0.0 && col < width as f64 && row >= 0.0 && row < height as f64;
        if !inside {
            return Err(GeoError::OutOfRange { col, row });
        }
        Ok((col, row))
    }

    /// Approximate ground size of one cell in metres around latitude `lat_deg`,
    /// taking the shorter of the two cell edges.
    pub fn cell_size_m(&self, lat_deg: f64) -> f64 {
        let metres_per_deg_lat = crate::geo::METRES_PER_DEGREE;
        let metres_per_deg_lon = metres_per_deg_lat * lat_deg.to_radians().cos().abs();

        let col_step = (self.pixel_width * metres_per_deg_lon).hypot(self.col_rotation * metres_per_deg_lat);
        let row_step = (self.row_rotation * metres_per_deg_lon).hypot(self.pixel_height * metres_per_deg_lat);
        col_step.min(row_step)
    }

    /// Lengths of one column step and one row step in world units.
    pub fn cell_edges(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.col_rotation),
            self.row_rotation.hypot(self.pixel_height),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_trip_north_up() {
        let gt = GeoTransform::north_up(-118.05, 34.05, 1e-4, -1e-4).unwrap();
        for &(col, row) in &[(0.0, 0.0), (12.25, 7.5), (499.9, 0.1), (3.0, 250.75)] {
            let (x, y) = gt.to_geo(col, row);
            let (c, r) = gt.to_grid_unchecked(x, y);
            assert_relative_eq!(c, col, epsilon = 1e-7);
            assert_relative_eq!(r, row, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_round_trip_rotated() {
        let gt = GeoTransform::from_gdal([500.0, 2.0, 0.5, 1000.0, -0.25, -3.0]).unwrap();
        for &(col, row) in &[(0.0, 0.0), (1.5, 2.5), (100.0, 40.0), (-3.0, 8.0)] {
            let (x, y) = gt.to_geo(col, row);
            let (c, r) = gt.to_grid_unchecked(x, y);
            assert_relative_eq!(c, col, epsilon = 1e-9);
            assert_relative_eq!(r, row, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_to_grid_rejects_out_of_range() {
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0, -1.0).unwrap();
        assert!(gt.to_grid(5.0, 5.0, 10, 10).is_ok());
        assert!(matches!(
            gt.to_grid(-0.5, 5.0, 10, 10),
            Err(GeoError::OutOfRange { .. })
        ));
        // The right and bottom edges are exclusive.
        assert!(gt.to_grid(10.0, 5.0, 10, 10).is_err());
        assert!(gt.to_grid(5.0, 0.0, 10, 10).is_err());
    }

    #[test]
    fn test_invalid_coefficients() {
        assert!(matches!(
            GeoTransform::from_gdal([0.0, 0.0, 0.0, 0.0, 0.0, -1.0]),
            Err(GeoError::ZeroPixelSize)
        ));
        assert!(matches!(
            GeoTransform::from_gdal([0.0, 1.0, 1.0, 0.0, 1.0, 1.0]),
            Err(GeoError::SingularTransform)
        ));
        assert!(matches!(
            GeoTransform::from_gdal([f64::NAN, 1.0, 0.0, 0.0, 0.0, -1.0]),
            Err(GeoError::NonFiniteCoefficient)
        ));
    }

    #[test]
    fn test_cell_size() {
        let gt = GeoTransform::from_gdal([500.0, 3.0, 0.0, 1000.0, 4.0, -30.0]).unwrap();
        let (col_edge, row_edge) = gt.cell_edges();
        assert_relative_eq!(col_edge, 5.0);
        assert_relative_eq!(row_edge, 30.0);

        let gt = GeoTransform::north_up(-118.0, 34.0, 1e-4, -1e-4).unwrap();
        let size = gt.cell_size_m(34.0);
        assert!(size > 9.0 && size < 9.3, "unexpected cell size {size}");
    }
}
