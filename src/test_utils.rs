//! Synthetic scenes shared by the localization tests.
//!
//! Everything is placed around (34.0, -118.0): a 400x400 DEM with 1e-4 degree
//! cells (roughly 9 m east-west, 11 m north-south) and 640x480 cameras with a
//! 60x45 degree field of view.

use nalgebra::Point2;

use crate::camera::{Camera, Resolution};
use crate::dem::DemRaster;
use crate::geo::{Crs, GeoPoint, GeoTransform, LocalFrame};

pub(crate) const SCENE_LAT: f64 = 34.0;
pub(crate) const SCENE_LON: f64 = -118.0;

pub(crate) fn scene_transform() -> GeoTransform {
    GeoTransform::north_up(SCENE_LON - 0.02, SCENE_LAT + 0.02, 1e-4, -1e-4).unwrap()
}

pub(crate) fn flat_dem(elevation: f32) -> DemRaster {
    DemRaster::flat(400, 400, elevation, scene_transform()).unwrap()
}

/// DEM from a function of the offset `(east_m, north_m)` to the scene centre.
pub(crate) fn dem_from_offsets<F>(nodata: Option<f32>, f: F) -> DemRaster
where
    F: Fn(f64, f64) -> f32,
{
    let metres_per_deg_lon = crate::geo::METRES_PER_DEGREE * SCENE_LAT.to_radians().cos();
    DemRaster::from_fn(400, 400, scene_transform(), nodata, |lon, lat| {
        let east = (lon - SCENE_LON) * metres_per_deg_lon;
        let north = (lat - SCENE_LAT) * crate::geo::METRES_PER_DEGREE;
        f(east, north)
    })
    .unwrap()
}

/// Same as [`dem_from_offsets`] on a UTM zone 11N grid of 10 m cells.
pub(crate) fn utm_dem_from_offsets<F>(nodata: Option<f32>, f: F) -> DemRaster
where
    F: Fn(f64, f64) -> f32,
{
    let crs = Crs::utm_for(SCENE_LAT, SCENE_LON);
    let (x0, y0) = crs.project(SCENE_LAT, SCENE_LON);
    let transform = GeoTransform::north_up(x0 - 2000.0, y0 + 2000.0, 10.0, -10.0).unwrap();
    let frame = LocalFrame::new(GeoPoint::new(SCENE_LAT, SCENE_LON, 0.0));
    DemRaster::from_fn(400, 400, transform, nodata, |x, y| {
        let (lat, lon) = crs.unproject(x, y);
        let enu = frame.to_enu(&GeoPoint::new(lat, lon, 0.0));
        f(enu.x, enu.y)
    })
    .unwrap()
    .with_crs(crs)
}

pub(crate) fn scene_camera(heading_deg: f64, tilt_deg: f64) -> Camera {
    Camera::new(
        SCENE_LAT,
        SCENE_LON,
        500.0,
        heading_deg,
        tilt_deg,
        60.0,
        45.0,
        Resolution {
            width: 640,
            height: 480,
        },
    )
}

pub(crate) fn centre_pixel() -> Point2<f64> {
    Point2::new(320.0, 240.0)
}

/// Working frame used for single-view localization of `camera`.
pub(crate) fn frame_below(camera: &Camera) -> LocalFrame {
    LocalFrame::new(GeoPoint::new(camera.lat, camera.lon, 0.0))
}

/// Camera at `position` whose centre pixel looks exactly at `target`.
pub(crate) fn camera_aimed_at(position: GeoPoint, target: &GeoPoint) -> Camera {
    let local = LocalFrame::new(position).to_enu(target);
    let heading = local.x.atan2(local.y).to_degrees();
    let tilt = local.z.atan2(local.x.hypot(local.y)).to_degrees();
    Camera::new(
        position.latitude,
        position.longitude,
        position.elevation_m,
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
