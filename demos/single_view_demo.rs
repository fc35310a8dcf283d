//! Single-View Localization Example
//!
//! Builds a synthetic valley DEM, places a hilltop camera above it and
//! localizes one detection with TopoMono, DMT and DMT-RANSAC. The depth
//! estimator used by the DMT variants is simulated from the terrain hit with
//! a configurable bias.
//!
//! Usage:
//! ```bash
//! cargo run --example single_view_demo -- --heading 90 --tilt -8 --depth-bias 15
//! ```

use clap::Parser;
use fireloc::{
    localize_single_view, Algorithm, Camera, DemRaster, DepthSource, GeoPoint, GeoTransform,
    LocalFrame, LocalizerConfig, Resolution,
};
use image::RgbImage;
use log::info;
use nalgebra::Point2;

const CENTRE_LAT: f64 = 34.0;
const CENTRE_LON: f64 = -118.0;

/// Single-view localization on a synthetic valley
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Camera heading in degrees clockwise from north
    #[arg(long, default_value_t = 90.0)]
    heading: f64,

    /// Camera tilt in degrees, negative below the horizon
    #[arg(long, default_value_t = -8.0, allow_hyphen_values = true)]
    tilt: f64,

    /// Error added to the simulated depth estimate, in metres
    #[arg(long, default_value_t = 15.0, allow_hyphen_values = true)]
    depth_bias: f64,
}

/// A valley running north-south with its floor at 300 m.
fn valley_dem() -> Result<DemRaster, Box<dyn std::error::Error>> {
    let transform = GeoTransform::north_up(CENTRE_LON - 0.05, CENTRE_LAT + 0.05, 2e-4, -2e-4)?;
    let metres_per_deg_lon = fireloc::geo::METRES_PER_DEGREE * CENTRE_LAT.to_radians().cos();
    let dem = DemRaster::from_fn(500, 500, transform, None, |lon, _lat| {
        let east = (lon - CENTRE_LON) * metres_per_deg_lon;
        (300.0 + 0.05 * (east - 1500.0).abs()) as f32
    })?;
    Ok(dem)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let dem = valley_dem()?;
    info!(
        "DEM {}x{}, elevation range [{:.1}, {:.1}] m",
        dem.width(),
        dem.height(),
        dem.min_elevation(),
        dem.max_elevation()
    );

    let camera = Camera::new(
        CENTRE_LAT,
        CENTRE_LON,
        600.0,
        cli.heading,
        cli.tilt,
        60.0,
        45.0,
        Resolution {
            width: 1280,
            height: 960,
        },
    );
    let pixel = Point2::new(640.0, 480.0);
    let config = LocalizerConfig::default();

    let terrain = localize_single_view(&camera, &pixel, &dem, Algorithm::TopoMono, None, &config)?;
    println!("{:>10}: {}", Algorithm::TopoMono, describe(terrain.position.as_ref()));
    let Some(hit) = terrain.position else {
        println!("The ray leaves the DEM; try a steeper tilt.");
        return Ok(());
    };

    // Simulated monocular depth: true range plus a bias.
    let frame = LocalFrame::new(GeoPoint::new(camera.lat, camera.lon, 0.0));
    let eye = frame.to_enu(&camera.position());
    let range = (frame.to_enu(&hit) - eye).norm();
    info!("Range to terrain {:.1} m, simulated bias {:.1} m", range, cli.depth_bias);
    let bias = cli.depth_bias;
    let estimator = move |_: &RgbImage, _: &Point2<f64>| range + bias;
    let image = RgbImage::new(camera.resolution.width, camera.resolution.height);

    for algorithm in [Algorithm::Dmt, Algorithm::DmtRansac] {
        let depth = DepthSource::new(&estimator, &image);
        let result = localize_single_view(&camera, &pixel, &dem, algorithm, Some(depth), &config)?;
        println!("{:>10}: {}", algorithm, describe(result.position.as_ref()));
        if let Some(failure) = &result.failure {
            println!("{:>10}  {}", "", failure);
        }
    }

    Ok(())
}

fn describe(position: Option<&GeoPoint>) -> String {
    match position {
        Some(p) => format!(
            "lat {:.6}, lon {:.6}, elevation {:.1} m",
            p.latitude, p.longitude, p.elevation_m
        ),
        None => "not located".to_string(),
    }
}
