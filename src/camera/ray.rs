//! Pixel-to-ray projection.

use nalgebra::{Point3, Vector3};

use crate::camera::{Camera, Projection};
use crate::geo::LocalFrame;

/// Half-line in a local East-North-Up frame. `direction` is unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    /// Builds a ray, normalising `direction`.
    ///
    /// Returns `None` when the direction has zero length or any component is
    /// not finite.
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Option<Self> {
        let norm = direction.norm();
        if !norm.is_finite() || norm < f64::EPSILON || !origin.coords.iter().all(|c| c.is_finite())
        {
            return None;
        }
        Some(Ray {
            origin,
            direction: direction / norm,
        })
    }

    pub fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }

    /// Parameter of the point on the ray closest to `point` (may be negative).
    pub fn closest_parameter(&self, point: &Point3<f64>) -> f64 {
        (point - self.origin).dot(&self.direction)
    }

    /// Perpendicular distance from `point` to the infinite line of the ray.
    pub fn distance_to(&self, point: &Point3<f64>) -> f64 {
        let offset = point - self.origin;
        (offset - self.direction * offset.dot(&self.direction)).norm()
    }
}

/// Unit ENU vector for an azimuth (clockwise from north) and an elevation
/// angle, both in radians.
fn direction_from_angles(azimuth: f64, elevation: f64) -> Vector3<f64> {
    let (sin_az, cos_az) = azimuth.sin_cos();
    let (sin_el, cos_el) = elevation.sin_cos();
    Vector3::new(sin_az * cos_el, cos_az * cos_el, sin_el)
}

impl Camera {
    /// Angular offsets `(d_az, d_el)` in degrees of pixel `(px, py)` from the
    /// optical axis under the angular projection. The top of the image has a
    /// positive elevation offset.
    pub fn angular_offsets(&self, px: f64, py: f64) -> (f64, f64) {
        let centre = self.principal_point();
        let d_az = (px - centre.x) / centre.x * (self.fov_h_deg / 2.0);
        let d_el = (centre.y - py) / centre.y * (self.fov_v_deg / 2.0);
        (d_az, d_el)
    }

    /// Viewing direction of pixel `(px, py)` in ENU.
    pub fn direction_for_pixel(&self, px: f64, py: f64) -> Vector3<f64> {
        let heading = self.heading().to_radians();
        let tilt = self.tilt_deg.to_radians();

        match self.projection {
            Projection::Angular => {
                let (d_az, d_el) = self.angular_offsets(px, py);
                direction_from_angles(heading + d_az.to_radians(), tilt + d_el.to_radians())
            }
            Projection::Pinhole => {
                let centre = self.principal_point();
                let fx = centre.x / (self.fov_h_deg.to_radians() / 2.0).tan();
                let fy = centre.y / (self.fov_v_deg.to_radians() / 2.0).tan();
                let xn = (px - centre.x) / fx;
                let yn = (py - centre.y) / fy;

                // Camera basis in ENU: forward along the optical axis, right
                // stays horizontal, up completes the right-handed triad.
                let forward = direction_from_angles(heading, tilt);
                let right = Vector3::new(heading.cos(), -heading.sin(), 0.0);
                let up = right.cross(&forward);
                (forward + right * xn - up * yn).normalize()
            }
        }
    }

    /// Line of sight through pixel `(px, py)`, expressed in `frame`.
    ///
    /// Heading and tilt refer to the camera's own horizon, so the direction is
    /// rotated into `frame` when the frame is anchored elsewhere.
    pub fn ray_for_pixel(&self, frame: &LocalFrame, px: f64, py: f64) -> Ray {
        let position = self.position();
        let local = self.direction_for_pixel(px, py);
        Ray {
            origin: frame.to_enu(&position),
            direction: frame.direction_from(&position, &local).normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Resolution;
    use crate::geo::GeoPoint;
    use approx::assert_relative_eq;

    fn camera(heading: f64, tilt: f64) -> Camera {
        Camera::new(
            34.0,
            -118.0,
            500.0,
            heading,
            tilt,
            60.0,
            45.0,
            Resolution {
                width: 640,
                height: 480,
            },
        )
    }

    fn frame_below(camera: &Camera) -> LocalFrame {
        LocalFrame::new(GeoPoint::new(camera.lat, camera.lon, 0.0))
    }

    #[test]
    fn test_centre_pixel_follows_heading_and_tilt() {
        let cam = camera(90.0, 0.0);
        let ray = cam.ray_for_pixel(&frame_below(&cam), 320.0, 240.0);
        assert_relative_eq!(ray.direction, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
        assert_relative_eq!(ray.origin.z, 500.0, epsilon = 1e-6);
        assert!(ray.origin.x.abs() < 1e-6 && ray.origin.y.abs() < 1e-6);

        let cam = camera(0.0, -30.0);
        let dir = cam.direction_for_pixel(320.0, 240.0);
        assert_relative_eq!(dir.y, 30f64.to_radians().cos(), epsilon = 1e-12);
        assert_relative_eq!(dir.z, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_image_corners_reach_half_fov() {
        let cam = camera(0.0, 0.0);
        let (d_az, d_el) = cam.angular_offsets(640.0, 0.0);
        assert_relative_eq!(d_az, 30.0);
        assert_relative_eq!(d_el, 22.5);

        // Right edge of a north-facing camera looks 30 degrees east of north.
        let dir = cam.direction_for_pixel(640.0, 240.0);
        assert_relative_eq!(dir.x.atan2(dir.y).to_degrees(), 30.0, epsilon = 1e-9);
        // Top edge looks up.
        let dir = cam.direction_for_pixel(320.0, 0.0);
        assert_relative_eq!(dir.z.asin().to_degrees(), 22.5, epsilon = 1e-9);
    }

    #[test]
    fn test_directions_are_unit_length() {
        for projection in [Projection::Angular, Projection::Pinhole] {
            let cam = camera(237.0, 12.0).with_projection(projection);
            for &(px, py) in &[(0.0, 0.0), (100.0, 400.0), (639.0, 10.0)] {
                let ray = cam.ray_for_pixel(&frame_below(&cam), px, py);
                assert_relative_eq!(ray.direction.norm(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_pinhole_matches_fov_at_edges() {
        let cam = camera(0.0, 0.0).with_projection(Projection::Pinhole);
        let centre = cam.direction_for_pixel(320.0, 240.0);
        assert_relative_eq!(centre, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);

        let right = cam.direction_for_pixel(640.0, 240.0);
        assert_relative_eq!(right.x.atan2(right.y).to_degrees(), 30.0, epsilon = 1e-9);
        let bottom = cam.direction_for_pixel(320.0, 480.0);
        assert_relative_eq!(bottom.z.asin().to_degrees(), -22.5, epsilon = 1e-9);
    }

    #[test]
    fn test_ray_helpers() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 10.0), Vector3::new(2.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(ray.direction.norm(), 1.0);
        assert_relative_eq!(ray.at(3.0), Point3::new(3.0, 0.0, 10.0));
        let p = Point3::new(5.0, 4.0, 10.0);
        assert_relative_eq!(ray.closest_parameter(&p), 5.0);
        assert_relative_eq!(ray.distance_to(&p), 4.0);
        assert!(Ray::new(Point3::origin(), Vector3::zeros()).is_none());
    }
}
