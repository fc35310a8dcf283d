//! Multi-view triangulation of sight lines.
//!
//! The estimate is the point minimising the summed squared perpendicular
//! distance to all rays:
//!
//! ```text
//! A = Σ (I - d dᵀ)      b = Σ (I - d dᵀ) o      A P = b
//! ```
//!
//! With more than two rays, pairwise closest-approach midpoints are used as
//! hypotheses for a consensus search over the rays, so a single camera
//! sighting the wrong thing does not drag the result away.

use std::cmp::Ordering;

use log::{debug, warn};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};

use crate::camera::Ray;
use crate::dem::DemRaster;
use crate::geo::{GeoPoint, LocalFrame};
use crate::localize::{Failure, FireTriConfig};
use crate::robust::{consensus, ConsensusConfig};

/// Mid-point of the shortest segment between the lines of `a` and `b`, and
/// the length of that segment. `None` for (near) parallel rays.
///
/// # Examples
///
/// ```rust
/// use fireloc::camera::Ray;
/// use fireloc::localize::firetri::closest_approach;
/// use nalgebra::{Point3, Vector3};
///
/// let a = Ray::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)).unwrap();
/// let b = Ray::new(Point3::new(5.0, -5.0, 2.0), Vector3::new(0.0, 1.0, 0.0)).unwrap();
/// let (mid, gap) = closest_approach(&a, &b).unwrap();
/// assert!((mid - Point3::new(5.0, 0.0, 1.0)).norm() < 1e-12);
/// assert!((gap - 2.0).abs() < 1e-12);
/// ```
pub fn closest_approach(a: &Ray, b: &Ray) -> Option<(Point3<f64>, f64)> {
    let w0 = a.origin - b.origin;
    let cos = a.direction.dot(&b.direction);
    let d = a.direction.dot(&w0);
    let e = b.direction.dot(&w0);

    let denom = 1.0 - cos * cos;
    if denom < 1e-12 {
        return None;
    }
    let s = (cos * e - d) / denom;
    let t = (e - cos * d) / denom;

    let pa = a.at(s);
    let pb = b.at(t);
    Some((Point3::from((pa.coords + pb.coords) * 0.5), (pa - pb).norm()))
}

/// Least-squares point of the selected rays.
///
/// Returns `None` when the smallest eigenvalue of the normal matrix is below
/// `min_eigenvalue`, i.e. the rays are too close to parallel.
fn solve(rays: &[Ray], indices: &[usize], min_eigenvalue: f64) -> Option<Point3<f64>> {
    if indices.len() < 2 {
        return None;
    }
    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    for &i in indices {
        let d = rays[i].direction;
        let projector = Matrix3::identity() - d * d.transpose();
        a += projector;
        b += projector * rays[i].origin.coords;
    }

    let smallest = SymmetricEigen::new(a).eigenvalues.min();
    if !(smallest >= min_eigenvalue) {
        debug!(
            "Normal matrix is ill-conditioned: smallest eigenvalue {:.3e} < {:.3e}",
            smallest, min_eigenvalue
        );
        return None;
    }
    let x = a.cholesky()?.solve(&b);
    Some(Point3::from(x))
}

fn compare_rays(a: &Ray, b: &Ray) -> Ordering {
    a.origin
        .iter()
        .chain(a.direction.iter())
        .zip(b.origin.iter().chain(b.direction.iter()))
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Distance from `point` to the ray, infinite when the point lies behind the
/// ray's origin.
fn ray_distance(point: &Point3<f64>, ray: &Ray) -> f64 {
    if ray.closest_parameter(point) < 0.0 {
        f64::INFINITY
    } else {
        ray.distance_to(point)
    }
}

/// Triangulates `rays` into one point of their frame.
///
/// The rays are processed in a canonical order, so the output is identical
/// for every permutation of the input.
///
/// # Errors
///
/// * [`Failure::InvalidInput`] for non-finite rays.
/// * [`Failure::ParallelRays`] when the rays are closer to parallel than
///   `min_ray_angle_deg`.
/// * [`Failure::NoConsensus`] when fewer than two rays agree on a point.
/// * [`Failure::NoIntersection`] when the rays only meet behind a camera.
pub fn triangulate(rays: &[Ray], config: &FireTriConfig) -> Result<Point3<f64>, Failure> {
    let needed = config.consensus.min_inliers.max(2);
    if rays.len() < 2 {
        return Err(Failure::NoConsensus {
            candidates: rays.len(),
            needed,
        });
    }
    let finite = rays.iter().all(|r| {
        r.origin.iter().chain(r.direction.iter()).all(|c| c.is_finite())
    });
    if !finite {
        return Err(Failure::InvalidInput("ray with non-finite components".to_string()));
    }

    let mut rays = rays.to_vec();
    rays.sort_by(compare_rays);

    let min_eigenvalue = 1.0 - config.min_ray_angle_deg.to_radians().cos();
    let all: Vec<usize> = (0..rays.len()).collect();
    let overall = solve(&rays, &all, min_eigenvalue).ok_or(Failure::ParallelRays)?;

    let (point, used) = if rays.len() == 2 {
        (overall, all)
    } else {
        let mut hypotheses = Vec::new();
        for i in 0..rays.len() {
            for j in (i + 1)..rays.len() {
                if let Some((mid, gap)) = closest_approach(&rays[i], &rays[j]) {
                    debug!("Rays {} and {} pass within {:.2} m", i, j, gap);
                    hypotheses.push(mid);
                }
            }
        }

        let search = ConsensusConfig {
            min_inliers: needed,
            ..config.consensus.clone()
        };
        let found = consensus(
            &hypotheses,
            &rays,
            ray_distance,
            |indices| solve(&rays, indices, min_eigenvalue),
            &search,
        )
        .ok_or(Failure::NoConsensus {
            candidates: rays.len(),
            needed,
        })?;

        if found.inliers.len() < rays.len() {
            warn!(
                "Dropped {} of {} rays further than {:.1} m from the consensus point",
                rays.len() - found.inliers.len(),
                rays.len(),
                search.inlier_threshold_m
            );
        }
        (found.estimate, found.inliers)
    };

    if used.iter().any(|&i| rays[i].closest_parameter(&point) < 0.0) {
        debug!("Triangulated point lies behind a camera");
        return Err(Failure::NoIntersection);
    }
    Ok(point)
}

/// Triangulates `rays` and converts the result to geodetic coordinates.
///
/// With a DEM and `snap_to_dem`, the elevation is replaced by the terrain
/// elevation below the point when the DEM covers it.
pub fn locate(
    rays: &[Ray],
    frame: &LocalFrame,
    dem: Option<&DemRaster>,
    config: &FireTriConfig,
) -> Result<GeoPoint, Failure> {
    let point = triangulate(rays, config)?;
    let mut position = frame.to_geodetic(&point);
    debug!(
        "Triangulated ({:.6}, {:.6}) at {:.1} m",
        position.latitude, position.longitude, position.elevation_m
    );

    if let (true, Some(dem)) = (config.snap_to_dem, dem) {
        match dem
            .sampler()
            .elevation_at_geodetic(position.latitude, position.longitude)
        {
            Some(ground) => {
                debug!(
                    "Snapping elevation {:.1} m to terrain {:.1} m",
                    position.elevation_m, ground
                );
                position.elevation_m = ground;
            }
            None => warn!("No terrain under the triangulated point, keeping its height"),
        }
    }
    Ok(position)
}
