//! Multi-View Triangulation Example
//!
//! Places lookout cameras around a synthetic fire, aims each one at it and
//! triangulates the detections with FireTri. One camera can be given a
//! pointing error to show how the consensus step drops it.
//!
//! Usage:
//! ```bash
//! cargo run --example triangulate_demo -- --cameras 4 --pointing-error 30
//! ```

use clap::Parser;
use fireloc::{
    localize_multi_view, Camera, DemRaster, GeoPoint, GeoTransform, LocalFrame, LocalizerConfig,
    Resolution,
};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::info;
use nalgebra::{Point2, Point3};

const FIRE_LAT: f64 = 34.0;
const FIRE_LON: f64 = -118.0;
const GROUND_M: f32 = 350.0;

/// Triangulation of a fire seen from several lookouts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of cameras placed on a ring around the fire
    #[arg(short = 'n', long, default_value_t = 3)]
    cameras: usize,

    /// Ring radius in metres
    #[arg(short = 'r', long, default_value_t = 4000.0)]
    radius: f64,

    /// Horizontal pixel error applied to the last camera
    #[arg(short = 'e', long, default_value_t = 0.0, allow_hyphen_values = true)]
    pointing_error: f64,
}

fn lookout(fire: &GeoPoint, fire_frame: &LocalFrame, bearing_deg: f64, radius: f64) -> Camera {
    let bearing = bearing_deg.to_radians();
    let ground = fire_frame.to_enu(fire);
    let mast = Point3::new(
        ground.x + radius * bearing.sin(),
        ground.y + radius * bearing.cos(),
        ground.z + 250.0,
    );
    let position = fire_frame.to_geodetic(&mast);

    let target = LocalFrame::new(position).to_enu(fire);
    let heading = target.x.atan2(target.y).to_degrees();
    let tilt = target.z.atan2(target.x.hypot(target.y)).to_degrees();
    Camera::new(
        position.latitude,
        position.longitude,
        position.elevation_m,
        heading,
        tilt,
        50.0,
        30.0,
        Resolution {
            width: 1920,
            height: 1080,
        },
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    if cli.cameras < 2 {
        return Err("at least two cameras are needed".into());
    }

    let fire = GeoPoint::new(FIRE_LAT, FIRE_LON, GROUND_M as f64);
    let fire_frame = LocalFrame::new(GeoPoint::new(FIRE_LAT, FIRE_LON, 0.0));
    let transform = GeoTransform::north_up(FIRE_LON - 0.1, FIRE_LAT + 0.1, 5e-4, -5e-4)?;
    let dem = DemRaster::flat(400, 400, GROUND_M, transform)?;

    let centre = Point2::new(960.0, 540.0);
    let views: Vec<(Camera, Point2<f64>)> = (0..cli.cameras)
        .map(|i| {
            let bearing = 360.0 * i as f64 / cli.cameras as f64 + 20.0;
            let camera = lookout(&fire, &fire_frame, bearing, cli.radius);
            let pixel = if i + 1 == cli.cameras {
                Point2::new(centre.x + cli.pointing_error, centre.y)
            } else {
                centre
            };
            info!(
                "Camera {} at ({:.5}, {:.5}) heading {:.1} tilt {:.2}, pixel ({:.0}, {:.0})",
                i, camera.lat, camera.lon, camera.heading_deg, camera.tilt_deg, pixel.x, pixel.y
            );
            (camera, pixel)
        })
        .collect();

    let config = LocalizerConfig::default();
    for (label, dem) in [("free", None), ("snapped", Some(&dem))] {
        let result = localize_multi_view(&views, dem, &config)?;
        match &result.position {
            Some(p) => {
                let error = fire_frame.to_enu(p) - fire_frame.to_enu(&fire);
                println!(
                    "{:>8}: lat {:.6}, lon {:.6}, elevation {:.1} m (horizontal error {:.1} m)",
                    label,
                    p.latitude,
                    p.longitude,
                    p.elevation_m,
                    error.xy().norm()
                );
            }
            None => println!(
                "{:>8}: failed, {}",
                label,
                result
                    .failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_default()
            ),
        }
    }

    Ok(())
}
