//! Ray / terrain intersection by fixed-step marching and bracket refinement.

use log::debug;

use crate::camera::Ray;
use crate::dem::ElevationSampler;
use crate::geo::{GeoPoint, LocalFrame};
use crate::localize::{Failure, TopoMonoConfig};

/// Refinement stops once the bracket is shorter than this, in metres.
const MIN_BRACKET_M: f64 = 1e-3;

/// Height of the ray above the terrain at a given distance along it.
struct Sight<'a> {
    ray: &'a Ray,
    frame: &'a LocalFrame,
    sampler: &'a ElevationSampler<'a>,
}

impl Sight<'_> {
    fn point(&self, t: f64) -> GeoPoint {
        self.frame.to_geodetic(&self.ray.at(t))
    }

    /// `None` where the terrain is unknown.
    fn residual(&self, t: f64) -> Option<f64> {
        let point = self.point(t);
        let ground = self
            .sampler
            .elevation_at_geodetic(point.latitude, point.longitude)?;
        Some(point.elevation_m - ground)
    }
}

/// A distance interval along the ray with the ray above the terrain at `lo`
/// and at or below it at `hi`.
#[derive(Debug, Clone, Copy)]
struct Bracket {
    lo: f64,
    r_lo: f64,
    hi: f64,
    r_hi: f64,
}

/// Finds the first point where `ray` meets the terrain.
///
/// The ray is marched in steps of about one DEM cell; missing samples are
/// stepped over. The first interval in which the ray passes from above to
/// below the terrain is refined by bisection until the vertical residual is
/// under `tolerance_m`.
///
/// Heights are exact geodetic heights of the ray points, so the curvature of
/// the Earth is taken into account at long range. Ray points are projected
/// into the CRS of the DEM before sampling.
///
/// # Errors
///
/// * [`Failure::NoIntersection`] when the ray never dips below the terrain
///   within `max_distance_m`, climbs away above the highest sample, sinks
///   under the lowest one, or the DEM holds no valid sample at all.
/// * [`Failure::OutsideDem`] when the ray crosses the DEM and leaves it
///   without meeting the terrain.
/// * [`Failure::DataGap`] when the crossing falls in missing samples and the
///   residual cannot be brought under `max_residual_m`.
pub fn intersect(
    ray: &Ray,
    frame: &LocalFrame,
    sampler: &ElevationSampler<'_>,
    config: &TopoMonoConfig,
) -> Result<GeoPoint, Failure> {
    let dem = sampler.dem();
    let top = dem.max_elevation();
    if !top.is_finite() {
        debug!("DEM has no valid samples");
        return Err(Failure::NoIntersection);
    }

    let sight = Sight {
        ray,
        frame,
        sampler,
    };
    let start_height = sight.point(0.0).elevation_m;
    if start_height > top && ray.direction.z >= 0.0 {
        debug!(
            "Ray starts {:.1} m above the highest terrain ({:.1} m) and does not descend",
            start_height, top
        );
        return Err(Failure::NoIntersection);
    }

    let bracket = march(&sight, config)?;
    debug!(
        "Bracket t = [{:.2}, {:.2}] m, residuals [{:.3}, {:.3}]",
        bracket.lo, bracket.hi, bracket.r_lo, bracket.r_hi
    );

    let (t, residual) = refine(&sight, bracket, config);
    if residual.abs() > config.max_residual_m {
        debug!(
            "Crossing near t = {:.1} m is not covered by the DEM (residual {:.2} m)",
            t, residual
        );
        return Err(Failure::DataGap);
    }

    let point = sight.point(t);
    let ground = point.elevation_m - residual;
    debug!(
        "Terrain hit at t = {:.2} m: ({:.6}, {:.6}) ground {:.2} m",
        t, point.latitude, point.longitude, ground
    );
    Ok(GeoPoint::new(point.latitude, point.longitude, ground))
}

fn march(sight: &Sight<'_>, config: &TopoMonoConfig) -> Result<Bracket, Failure> {
    let dem = sight.sampler.dem();
    let (bottom, top) = (dem.min_elevation(), dem.max_elevation());
    let step = (config.step_scale * dem.cell_size_m()).max(config.min_step_m);
    debug!("Marching with {:.2} m steps", step);

    let mut previous: Option<(f64, f64)> = None;
    let mut last_height = f64::INFINITY;
    let mut entered = false;
    let mut skipped = 0usize;

    for i in 0..=config.max_steps {
        let t = i as f64 * step;
        if t > config.max_distance_m {
            debug!("No crossing within {:.0} m", config.max_distance_m);
            return Err(Failure::NoIntersection);
        }

        let point = sight.point(t);
        // Above every sample and climbing: the ray can never come back down.
        if point.elevation_m > top && point.elevation_m > last_height {
            debug!("Ray left the terrain envelope at t = {:.1} m", t);
            return Err(Failure::NoIntersection);
        }
        // Under every sample and sinking without having been above the terrain.
        let above_before = previous.is_some_and(|(_, r)| r > 0.0);
        if point.elevation_m < bottom && point.elevation_m < last_height && !above_before {
            debug!("Ray passed under the lowest terrain at t = {:.1} m", t);
            return Err(Failure::NoIntersection);
        }
        last_height = point.elevation_m;

        if !dem.contains(point.latitude, point.longitude) {
            if entered {
                debug!("Ray left the DEM at t = {:.1} m", t);
                return Err(Failure::OutsideDem);
            }
            continue;
        }
        entered = true;

        let ground = match sight
            .sampler
            .elevation_at_geodetic(point.latitude, point.longitude)
        {
            Some(ground) => ground,
            None => {
                skipped += 1;
                continue;
            }
        };
        let residual = point.elevation_m - ground;

        if let Some((t_prev, r_prev)) = previous {
            if r_prev > 0.0 && residual <= 0.0 {
                if skipped > 0 {
                    debug!("Stepped over {} samples without terrain", skipped);
                }
                return Ok(Bracket {
                    lo: t_prev,
                    r_lo: r_prev,
                    hi: t,
                    r_hi: residual,
                });
            }
        }
        previous = Some((t, residual));
    }

    debug!("Step budget of {} exhausted", config.max_steps);
    Err(Failure::NoIntersection)
}

/// Shrinks `bracket` and returns the sampled distance with the smallest
/// residual, together with that residual.
///
/// Bisects; where the midpoint has no terrain the regula falsi point is tried
/// instead, and refinement stops when neither can be sampled.
fn refine(sight: &Sight<'_>, mut bracket: Bracket, config: &TopoMonoConfig) -> (f64, f64) {
    for iteration in 0..config.max_refine_iterations {
        if bracket.r_lo.abs() < config.tolerance_m
            || bracket.r_hi.abs() < config.tolerance_m
            || bracket.hi - bracket.lo < MIN_BRACKET_M
        {
            debug!("Refinement converged after {} iterations", iteration);
            break;
        }

        let mid = 0.5 * (bracket.lo + bracket.hi);
        let (t, r) = match sight.residual(mid) {
            Some(r) => (mid, r),
            None => {
                let falsi = bracket.lo
                    + (bracket.hi - bracket.lo) * bracket.r_lo / (bracket.r_lo - bracket.r_hi);
                let inside = falsi > bracket.lo && falsi < bracket.hi;
                match sight.residual(falsi) {
                    Some(r) if inside => (falsi, r),
                    _ => {
                        debug!("Bracket interior has no terrain, stopping refinement");
                        break;
                    }
                }
            }
        };

        if r > 0.0 {
            bracket.lo = t;
            bracket.r_lo = r;
        } else {
            bracket.hi = t;
            bracket.r_hi = r;
        }
    }

    let best = if bracket.r_lo.abs() < bracket.r_hi.abs() {
        (bracket.lo, bracket.r_lo)
    } else {
        (bracket.hi, bracket.r_hi)
    };

    // Final linear step; exact on planar terrain.
    let falsi =
        bracket.lo + (bracket.hi - bracket.lo) * bracket.r_lo / (bracket.r_lo - bracket.r_hi);
    match sight.residual(falsi) {
        Some(r) if r.abs() <= best.1.abs() => (falsi, r),
        _ => best,
    }
}
