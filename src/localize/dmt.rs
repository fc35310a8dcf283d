//! Depth-refined localization.
//!
//! The camera ray fixes the direction to the target and a monocular depth
//! estimate its distance. That point is combined with the terrain
//! intersection of the same ray, either by a fixed preference rule or, in
//! RANSAC mode, by consensus over the depths of a pixel window.

use log::{debug, warn};
use nalgebra::{Point2, Point3};

use crate::camera::{Camera, Ray};
use crate::dem::ElevationSampler;
use crate::depth::DepthSource;
use crate::geo::{GeoPoint, LocalFrame};
use crate::localize::{topomono, DmtConfig, Failure, LocalizerConfig};
use crate::robust::{euclidean, robust_point};

/// Point at distance `depth` along `ray`, `None` for unusable depths.
pub fn depth_candidate(ray: &Ray, depth: f64) -> Option<Point3<f64>> {
    if depth.is_finite() && depth > 0.0 {
        Some(ray.at(depth))
    } else {
        None
    }
}

/// Localizes `pixel` from its depth estimate and the terrain.
///
/// Without RANSAC the terrain intersection and the depth point are fused when
/// they lie within `fusion_tolerance_m` of each other, weighted by
/// `terrain_weight`. If they disagree, or the terrain is not hit, the depth
/// point is returned; if the depth is unusable, the terrain intersection.
///
/// With RANSAC every pixel of a `(2r + 1)²` window contributes a depth point,
/// the terrain intersection one more, and the centroid of the largest
/// consistent subset is returned.
pub fn localize(
    camera: &Camera,
    frame: &LocalFrame,
    pixel: &Point2<f64>,
    depth: &DepthSource<'_>,
    sampler: &ElevationSampler<'_>,
    use_ransac: bool,
    config: &LocalizerConfig,
) -> Result<GeoPoint, Failure> {
    let ray = camera.ray_for_pixel(frame, pixel.x, pixel.y);
    let terrain = topomono::intersect(&ray, frame, sampler, &config.topomono);
    if let Err(failure) = &terrain {
        debug!("Terrain candidate unavailable: {}", failure);
    }

    if use_ransac {
        let terrain_point = terrain.ok().map(|p| frame.to_enu(&p));
        ransac(camera, frame, pixel, depth, terrain_point, &config.dmt)
    } else {
        let depth_point = depth_candidate(&ray, depth.depth_at(pixel));
        fuse(frame, terrain, depth_point, &config.dmt)
    }
}

fn fuse(
    frame: &LocalFrame,
    terrain: Result<GeoPoint, Failure>,
    depth_point: Option<Point3<f64>>,
    config: &DmtConfig,
) -> Result<GeoPoint, Failure> {
    match (terrain, depth_point) {
        (Ok(terrain), Some(depth_point)) => {
            let terrain_point = frame.to_enu(&terrain);
            let separation = (terrain_point - depth_point).norm();
            if separation > config.fusion_tolerance_m {
                warn!(
                    "Depth and terrain disagree by {:.1} m, using the depth estimate",
                    separation
                );
                return Ok(frame.to_geodetic(&depth_point));
            }
            debug!("Depth and terrain agree within {:.1} m", separation);
            if config.terrain_weight >= 1.0 {
                return Ok(terrain);
            }
            let w = config.terrain_weight;
            let fused = Point3::from(terrain_point.coords * w + depth_point.coords * (1.0 - w));
            Ok(frame.to_geodetic(&fused))
        }
        (Err(_), Some(depth_point)) => Ok(frame.to_geodetic(&depth_point)),
        (Ok(terrain), None) => {
            debug!("Depth estimate rejected, using the terrain intersection");
            Ok(terrain)
        }
        (Err(_), None) => Err(Failure::InvalidDepth),
    }
}

fn ransac(
    camera: &Camera,
    frame: &LocalFrame,
    pixel: &Point2<f64>,
    depth: &DepthSource<'_>,
    terrain_point: Option<Point3<f64>>,
    config: &DmtConfig,
) -> Result<GeoPoint, Failure> {
    let radius = config.window_radius as i64;
    let width = camera.resolution.width as f64;
    let height = camera.resolution.height as f64;

    let mut candidates = Vec::new();
    let mut rejected = 0usize;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let neighbour = Point2::new(pixel.x + dx as f64, pixel.y + dy as f64);
            if neighbour.x < 0.0 || neighbour.y < 0.0 || neighbour.x > width || neighbour.y > height
            {
                continue;
            }
            let ray = camera.ray_for_pixel(frame, neighbour.x, neighbour.y);
            match depth_candidate(&ray, depth.depth_at(&neighbour)) {
                Some(point) => candidates.push(point),
                None => rejected += 1,
            }
        }
    }
    if rejected > 0 {
        debug!("Rejected {} window depths", rejected);
    }
    if candidates.is_empty() && terrain_point.is_none() {
        return Err(Failure::InvalidDepth);
    }
    candidates.extend(terrain_point);

    let consensus = robust_point(&candidates, euclidean, &config.consensus).ok_or(
        Failure::NoConsensus {
            candidates: candidates.len(),
            needed: config.consensus.min_inliers,
        },
    )?;
    debug!(
        "DMT-RANSAC kept {} of {} candidates",
        consensus.inliers.len(),
        candidates.len()
    );
    Ok(frame.to_geodetic(&consensus.estimate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::DepthEstimator;
    use crate::test_utils::{centre_pixel, flat_dem, frame_below, scene_camera};
    use approx::assert_relative_eq;
    use image::RgbImage;

    /// Distance along each pixel's ray to the 400 m plane of `flat_dem`.
    fn plane_depth(camera: &Camera) -> impl Fn(&RgbImage, &Point2<f64>) -> f64 + '_ {
        move |_: &RgbImage, p: &Point2<f64>| {
            let frame = frame_below(camera);
            let ray = camera.ray_for_pixel(&frame, p.x, p.y);
            (ray.origin.z - 400.0) / -ray.direction.z
        }
    }

    fn run(
        estimator: &dyn DepthEstimator,
        tilt: f64,
        use_ransac: bool,
        config: &LocalizerConfig,
    ) -> Result<GeoPoint, Failure> {
        let camera = scene_camera(90.0, tilt);
        let frame = frame_below(&camera);
        let dem = flat_dem(400.0);
        let image = RgbImage::new(640, 480);
        let depth = DepthSource::new(estimator, &image);
        localize(
            &camera,
            &frame,
            &centre_pixel(),
            &depth,
            &dem.sampler(),
            use_ransac,
            config,
        )
    }

    fn terrain_hit() -> Point3<f64> {
        let camera = scene_camera(90.0, -10.0);
        let frame = frame_below(&camera);
        let dem = flat_dem(400.0);
        let ray = camera.ray_for_pixel(&frame, 320.0, 240.0);
        let hit = topomono::intersect(&ray, &frame, &dem.sampler(), &Default::default()).unwrap();
        frame.to_enu(&hit)
    }

    fn to_enu(p: &GeoPoint) -> Point3<f64> {
        frame_below(&scene_camera(90.0, -10.0)).to_enu(p)
    }

    #[test]
    fn test_agreeing_depth_prefers_terrain() {
        let camera = scene_camera(90.0, -10.0);
        let estimator = |image: &RgbImage, p: &Point2<f64>| plane_depth(&camera)(image, p) + 20.0;
        let p = run(&estimator, -10.0, false, &LocalizerConfig::default()).unwrap();
        assert_relative_eq!(to_enu(&p), terrain_hit(), epsilon = 1e-6);
    }

    #[test]
    fn test_fusion_weight_blends() {
        let camera = scene_camera(90.0, -10.0);
        let estimator = |image: &RgbImage, p: &Point2<f64>| plane_depth(&camera)(image, p) + 20.0;
        let mut config = LocalizerConfig::default();
        config.dmt.terrain_weight = 0.5;

        let p = to_enu(&run(&estimator, -10.0, false, &config).unwrap());
        let terrain = terrain_hit();
        // Half way to a point 20 m further along the ray.
        assert_relative_eq!((p - terrain).norm(), 10.0, epsilon = 0.5);
        assert!(p.x > terrain.x);
    }

    #[test]
    fn test_disagreeing_depth_wins() {
        let estimator = |_: &RgbImage, _: &Point2<f64>| 2000.0;
        let p = to_enu(&run(&estimator, -10.0, false, &LocalizerConfig::default()).unwrap());
        let origin = Point3::new(0.0, 0.0, 500.0);
        assert_relative_eq!((p - origin).norm(), 2000.0, epsilon = 1e-3);
    }

    #[test]
    fn test_invalid_depth_falls_back_to_terrain() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let estimator = move |_: &RgbImage, _: &Point2<f64>| bad;
            let p = run(&estimator, -10.0, false, &LocalizerConfig::default()).unwrap();
            assert_relative_eq!(to_enu(&p), terrain_hit(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_invalid_depth_without_terrain_fails() {
        let estimator = |_: &RgbImage, _: &Point2<f64>| 0.0;
        let config = LocalizerConfig::default();
        assert_eq!(run(&estimator, 5.0, false, &config), Err(Failure::InvalidDepth));
        assert_eq!(run(&estimator, 5.0, true, &config), Err(Failure::InvalidDepth));
    }

    #[test]
    fn test_sky_pixel_uses_depth() {
        let estimator = |_: &RgbImage, _: &Point2<f64>| 300.0;
        let p = to_enu(&run(&estimator, 5.0, false, &LocalizerConfig::default()).unwrap());
        assert!(p.z > 500.0);
    }

    #[test]
    fn test_ransac_ignores_zero_depth_outlier() {
        let camera = scene_camera(90.0, -10.0);
        let centre = centre_pixel();
        let estimator = |image: &RgbImage, p: &Point2<f64>| {
            if *p == centre {
                0.0
            } else {
                plane_depth(&camera)(image, p)
            }
        };
        let mut config = LocalizerConfig::default();
        config.dmt.window_radius = 1;

        let p = to_enu(&run(&estimator, -10.0, true, &config).unwrap());
        // Eight neighbours and the terrain hit surround the true point.
        assert!((p - terrain_hit()).norm() < 2.0);
        assert_relative_eq!(p.z, 400.0, epsilon = 0.5);
    }

    #[test]
    fn test_ransac_ignores_wild_depth() {
        let camera = scene_camera(90.0, -10.0);
        let corner = Point2::new(319.0, 239.0);
        let estimator = |image: &RgbImage, p: &Point2<f64>| {
            if *p == corner {
                5000.0
            } else {
                plane_depth(&camera)(image, p)
            }
        };
        let mut config = LocalizerConfig::default();
        config.dmt.window_radius = 1;

        let p = to_enu(&run(&estimator, -10.0, true, &config).unwrap());
        assert!((p - terrain_hit()).norm() < 2.0);
    }

    #[test]
    fn test_ransac_without_agreement_fails() {
        // Depths scattered by hundreds of metres across the window.
        let estimator =
            |_: &RgbImage, p: &Point2<f64>| 200.0 + 150.0 * (p.x - 318.0) + 600.0 * (p.y - 238.0);
        let mut config = LocalizerConfig::default();
        config.dmt.window_radius = 1;
        config.dmt.consensus.min_inliers = 4;
        assert!(matches!(
            run(&estimator, 5.0, true, &config),
            Err(Failure::NoConsensus { needed: 4, .. })
        ));
    }
}
