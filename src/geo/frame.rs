//! WGS84 geodetic conversions and the local East-North-Up working frame.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::geo::GeoPoint;

/// WGS84 semi-major axis in metres.
pub(crate) const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub(crate) const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 first eccentricity squared: e² = 2f - f²
const WGS84_E2: f64 = 2.0 * WGS84_F - WGS84_F * WGS84_F;

/// Fixed-point iterations of the latitude solve in [`ecef_to_geodetic`];
/// five are enough for sub-millimetre heights near the surface.
const GEODETIC_ITERATIONS: usize = 5;

/// Convert a geodetic position (degrees, metres) to Earth-centred Earth-fixed XYZ.
pub fn geodetic_to_ecef(point: &GeoPoint) -> Vector3<f64> {
    let lat = point.latitude.to_radians();
    let lon = point.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    // Radius of curvature in the prime vertical
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let h = point.elevation_m;

    Vector3::new(
        (n + h) * cos_lat * cos_lon,
        (n + h) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + h) * sin_lat,
    )
}

/// Convert ECEF XYZ back to a geodetic position.
pub fn ecef_to_geodetic(ecef: &Vector3<f64>) -> GeoPoint {
    let p = ecef.x.hypot(ecef.y);
    let lon = ecef.y.atan2(ecef.x);

    let mut lat = ecef.z.atan2(p * (1.0 - WGS84_E2));
    let mut h = 0.0;
    for _ in 0..GEODETIC_ITERATIONS {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        h = if lat.cos().abs() > 1e-10 {
            p / lat.cos() - n
        } else {
            ecef.z.abs() - n * (1.0 - WGS84_E2)
        };
        lat = ecef.z.atan2(p * (1.0 - WGS84_E2 * n / (n + h)));
    }

    GeoPoint::new(lat.to_degrees(), lon.to_degrees(), h)
}

/// Rotation taking ECEF vectors into the East-North-Up axes at `at`.
fn ecef_to_enu_rotation(at: &GeoPoint) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = at.latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = at.longitude.to_radians().sin_cos();

    #[rustfmt::skip]
    let rotation = Matrix3::new(
        -sin_lon,            cos_lon,           0.0,
        -sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat,
         cos_lat * cos_lon,  cos_lat * sin_lon, sin_lat,
    );
    rotation
}

/// Local tangent-plane East-North-Up frame anchored at a geodetic origin.
///
/// All rays and triangulated points of the engine live in one of these
/// frames; conversion to and from geodetic coordinates is exact (through
/// ECEF), so Earth curvature is accounted for at any range.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFrame {
    origin: GeoPoint,
    origin_ecef: Vector3<f64>,
    /// Rows are the East, North and Up unit vectors expressed in ECEF.
    ecef_to_enu: Matrix3<f64>,
}

impl LocalFrame {
    pub fn new(origin: GeoPoint) -> Self {
        LocalFrame {
            origin,
            origin_ecef: geodetic_to_ecef(&origin),
            ecef_to_enu: ecef_to_enu_rotation(&origin),
        }
    }

    /// Frame anchored on the ellipsoid below the ECEF centroid of `points`.
    ///
    /// Averaging in ECEF keeps the anchor between the points across the
    /// antimeridian and near the poles. Returns `None` for an empty slice, and
    /// falls back to the first point when the centroid is at the Earth's
    /// centre.
    pub fn centred_on(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let sum = points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + geodetic_to_ecef(p));
        let mean = sum / points.len() as f64;
        let radius = mean.norm();
        let anchor = if radius < 1.0 {
            *first
        } else if radius < 0.9 * WGS84_A {
            // Widely spread points: lift the centroid to the surface first.
            ecef_to_geodetic(&(mean * (WGS84_A / radius)))
        } else {
            ecef_to_geodetic(&mean)
        };
        Some(Self::new(GeoPoint::new(anchor.latitude, anchor.longitude, 0.0)))
    }

    pub fn origin(&self) -> &GeoPoint {
        &self.origin
    }

    pub fn to_enu(&self, point: &GeoPoint) -> Point3<f64> {
        Point3::from(self.ecef_to_enu * (geodetic_to_ecef(point) - self.origin_ecef))
    }

    pub fn to_geodetic(&self, point: &Point3<f64>) -> GeoPoint {
        let ecef = self.ecef_to_enu.transpose() * point.coords + self.origin_ecef;
        ecef_to_geodetic(&ecef)
    }

    /// Re-expresses a direction given in the East-North-Up axes at `at` in
    /// this frame's axes. The two differ by the angle between the local
    /// verticals, which grows with the distance between `at` and the origin.
    pub fn direction_from(&self, at: &GeoPoint, local: &Vector3<f64>) -> Vector3<f64> {
        self.ecef_to_enu * (ecef_to_enu_rotation(at).transpose() * local)
    }
}
