//! Command line front end of the localization engine.
//!
//! Usage:
//! ```bash
//! # One camera, request as YAML or JSON, DEMs as <dem-dir>/<id>.asc
//! fireloc single --request request.yaml --dem-dir dems/
//!
//! # Depth-refined, with a precomputed depth map
//! fireloc single --request request.yaml --dem-dir dems/ --depth-map depth.csv
//!
//! # Several cameras
//! fireloc multi --request views.json --dem-dir dems/
//!
//! # Many detections of single cameras against one DEM
//! fireloc batch --input detections.csv --dem-dir dems/ --dem ridge --output located.csv
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fireloc::api::{
    handle_multi, handle_single, DepthServices, LocalizationResponse, MultiViewRequest,
    PixelCoord, SingleViewRequest, Status,
};
use fireloc::{
    AsciiGridSource, Camera, DemCache, DepthMap, FileImageSource, LocalizerConfig, Projection,
    Resolution,
};

/// Geolocate camera detections on a digital elevation model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional YAML file overriding algorithm parameters
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Localize one detection seen by one camera
    Single {
        /// Request file (YAML or JSON)
        #[arg(short = 'r', long)]
        request: PathBuf,

        /// Directory holding <dem_identifier>.asc grids
        #[arg(short = 'd', long)]
        dem_dir: PathBuf,

        /// Image for the depth estimator, overrides the request's image_uri
        #[arg(long)]
        image: Option<PathBuf>,

        /// Precomputed per-pixel depth in metres (headerless CSV), for DMT
        #[arg(long)]
        depth_map: Option<PathBuf>,
    },
    /// Triangulate one event seen by several cameras
    Multi {
        /// Request file (YAML or JSON)
        #[arg(short = 'r', long)]
        request: PathBuf,

        /// Directory holding <dem_identifier>.asc grids
        #[arg(short = 'd', long)]
        dem_dir: Option<PathBuf>,
    },
    /// Localize every row of a detections CSV against one DEM
    Batch {
        /// Detections CSV with a header row
        #[arg(short = 'i', long)]
        input: PathBuf,

        /// Directory holding <dem>.asc
        #[arg(short = 'd', long)]
        dem_dir: PathBuf,

        /// DEM identifier
        #[arg(long)]
        dem: String,

        /// Output CSV
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Single-view algorithm (TopoMono, DMT, DMT-RANSAC)
        #[arg(short = 'a', long, default_value = "TopoMono")]
        algorithm: String,

        /// Depth map shared by all rows, for DMT
        #[arg(long)]
        depth_map: Option<PathBuf>,
    },
}

/// One row of the batch input.
#[derive(Debug, Deserialize)]
struct DetectionRow {
    id: String,
    lat: f64,
    lon: f64,
    elevation_m: f64,
    heading_deg: f64,
    tilt_deg: f64,
    fov_h_deg: f64,
    fov_v_deg: f64,
    width: u32,
    height: u32,
    pixel_x: f64,
    pixel_y: f64,
    #[serde(default)]
    projection: Option<Projection>,
}

impl DetectionRow {
    fn camera(&self) -> Camera {
        Camera::new(
            self.lat,
            self.lon,
            self.elevation_m,
            self.heading_deg,
            self.tilt_deg,
            self.fov_h_deg,
            self.fov_v_deg,
            Resolution {
                width: self.width,
                height: self.height,
            },
        )
        .with_projection(self.projection.unwrap_or_default())
    }
}

/// One row of the batch output.
#[derive(Debug, Serialize)]
struct LocatedRow {
    id: String,
    status: Status,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation_m: Option<f64>,
    method_used: String,
    message: Option<String>,
}

impl LocatedRow {
    fn new(id: String, response: LocalizationResponse) -> Self {
        LocatedRow {
            id,
            status: response.status,
            latitude: response.latitude,
            longitude: response.longitude,
            elevation_m: response.elevation_m,
            method_used: response.method_used,
            message: response.message,
        }
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(path)?;
    // YAML is a superset of JSON, so one parser serves both.
    Ok(serde_yaml::from_str(&contents)?)
}

fn load_depth_map(path: Option<&PathBuf>) -> Result<Option<DepthMap>, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => Some(DepthMap::from_csv(path)?),
        None => None,
    })
}

fn print_response(response: &LocalizationResponse) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.is_success() {
        warn!(
            "{} failed: {}",
            response.method_used,
            response.message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            LocalizerConfig::load_from_yaml(path)?
        }
        None => LocalizerConfig::default(),
    };

    match cli.command {
        Command::Single {
            request,
            dem_dir,
            image,
            depth_map,
        } => {
            let mut request: SingleViewRequest = read_request(&request)?;
            if let Some(image) = image {
                request.image_uri = Some(image.to_string_lossy().into_owned());
            }
            let rasters = AsciiGridSource::new(dem_dir);
            let depth_map = load_depth_map(depth_map.as_ref())?;
            let services = depth_map.as_ref().map(|map| DepthServices {
                images: &FileImageSource,
                estimator: map,
            });

            let response = handle_single(&request, &rasters, services.as_ref(), &config);
            print_response(&response)?;
        }
        Command::Multi { request, dem_dir } => {
            let request: MultiViewRequest = read_request(&request)?;
            let rasters = AsciiGridSource::new(dem_dir.unwrap_or_else(|| PathBuf::from(".")));
            let response = handle_multi(&request, &rasters, &config);
            print_response(&response)?;
        }
        Command::Batch {
            input,
            dem_dir,
            dem,
            output,
            algorithm,
            depth_map,
        } => {
            let rasters = DemCache::new(AsciiGridSource::new(dem_dir));
            let depth_map = load_depth_map(depth_map.as_ref())?;
            let services = depth_map.as_ref().map(|map| DepthServices {
                images: &FileImageSource,
                estimator: map,
            });

            let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(&input)?;
            let mut writer = csv::Writer::from_path(&output)?;
            let (mut total, mut located) = (0usize, 0usize);

            for row in reader.deserialize() {
                let row: DetectionRow = row?;
                let request = SingleViewRequest {
                    algorithm: algorithm.clone(),
                    detection_pixel: PixelCoord {
                        x: row.pixel_x,
                        y: row.pixel_y,
                    },
                    camera_params: row.camera(),
                    dem_identifier: dem.clone(),
                    image_uri: None,
                };
                let response = handle_single(&request, &rasters, services.as_ref(), &config);
                total += 1;
                if response.is_success() {
                    located += 1;
                }
                writer.serialize(LocatedRow::new(row.id, response))?;
            }
            writer.flush()?;

            info!("Located {} of {} detections, written to {:?}", located, total, output);
            println!("Located {located} of {total} detections -> {}", output.display());
        }
    }

    Ok(())
}
