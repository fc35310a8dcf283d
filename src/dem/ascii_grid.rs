//! ESRI ASCII grid (`.asc`) DEM loader.
//!
//! ```text
//! ncols        4
//! nrows        3
//! xllcorner    -118.01
//! yllcorner    33.99
//! cellsize     0.0001
//! NODATA_value -9999
//! 412.0 413.5 ...
//! ```
//!
//! `xllcenter` / `yllcenter` are accepted in place of the corner keys.
//!
//! Grids are geographic unless a `.prj` sidecar next to the `.asc` file names
//! another CRS, e.g. `EPSG:32611` or a WKT `PROJCS["WGS 84 / UTM zone 11N", ...]`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::dem::{DemError, DemRaster, RasterSource};
use crate::geo::{Crs, GeoTransform};

/// [`RasterSource`] reading `<root>/<id>.asc` files.
#[derive(Debug, Clone)]
pub struct AsciiGridSource {
    root: PathBuf,
}

impl AsciiGridSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        AsciiGridSource { root: root.into() }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.asc"))
    }
}

impl RasterSource for AsciiGridSource {
    fn load_raster(&self, id: &str) -> Result<Arc<DemRaster>, DemError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(DemError::NotFound(id.to_string()));
        }
        Ok(Arc::new(load_ascii_grid(&path)?))
    }
}

/// Reads an ESRI ASCII grid file and its optional `.prj` sidecar.
pub fn load_ascii_grid(path: &Path) -> Result<DemRaster, DemError> {
    let contents = fs::read_to_string(path)?;
    let mut raster = parse_ascii_grid(&contents)?;

    let prj = path.with_extension("prj");
    if prj.exists() {
        let description = fs::read_to_string(&prj)?;
        let crs = Crs::parse(&description)
            .map_err(|e| DemError::Parse(format!("{}: {e}", prj.display())))?;
        raster = raster.with_crs(crs);
    }

    info!(
        "Loaded DEM {:?} ({}x{}, {}, cell {:.2} m)",
        path,
        raster.width(),
        raster.height(),
        raster.crs(),
        raster.cell_size_m()
    );
    Ok(raster)
}

#[derive(Default)]
struct Header {
    ncols: Option<usize>,
    nrows: Option<usize>,
    xll: Option<(f64, bool)>,
    yll: Option<(f64, bool)>,
    cellsize: Option<f64>,
    nodata: Option<f32>,
}

fn parse_value<T: std::str::FromStr>(key: &str, value: Option<&str>) -> Result<T, DemError> {
    value
        .and_then(|v| v.parse::<T>().ok())
        .ok_or_else(|| DemError::Parse(format!("Invalid value for '{key}'")))
}

/// Parses the textual content of an ESRI ASCII grid.
pub fn parse_ascii_grid(contents: &str) -> Result<DemRaster, DemError> {
    let mut header = Header::default();
    let mut lines = contents.lines().peekable();

    while let Some(&line) = lines.peek() {
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            lines.next();
            continue;
        };
        let lower = key.to_ascii_lowercase();
        let value = parts.next();
        match lower.as_str() {
            "ncols" => header.ncols = Some(parse_value(&lower, value)?),
            "nrows" => header.nrows = Some(parse_value(&lower, value)?),
            "xllcorner" => header.xll = Some((parse_value(&lower, value)?, false)),
            "xllcenter" => header.xll = Some((parse_value(&lower, value)?, true)),
            "yllcorner" => header.yll = Some((parse_value(&lower, value)?, false)),
            "yllcenter" => header.yll = Some((parse_value(&lower, value)?, true)),
            "cellsize" => header.cellsize = Some(parse_value(&lower, value)?),
            "nodata_value" => header.nodata = Some(parse_value(&lower, value)?),
            _ => break,
        }
        lines.next();
    }

    let missing = |key: &str| DemError::Parse(format!("Missing header key '{key}'"));
    let ncols = header.ncols.ok_or_else(|| missing("ncols"))?;
    let nrows = header.nrows.ok_or_else(|| missing("nrows"))?;
    let (xll, x_is_centre) = header.xll.ok_or_else(|| missing("xllcorner"))?;
    let (yll, y_is_centre) = header.yll.ok_or_else(|| missing("yllcorner"))?;
    let cellsize = header.cellsize.ok_or_else(|| missing("cellsize"))?;

    let west = if x_is_centre { xll - cellsize / 2.0 } else { xll };
    let south = if y_is_centre { yll - cellsize / 2.0 } else { yll };
    let north = south + nrows as f64 * cellsize;
    let transform = GeoTransform::north_up(west, north, cellsize, -cellsize)?;

    let data = lines
        .flat_map(|line| line.split_whitespace())
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|_| DemError::Parse(format!("Invalid elevation sample '{token}'")))
        })
        .collect::<Result<Vec<f32>, DemError>>()?;

    DemRaster::new(ncols, nrows, data, transform, header.nodata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const GRID: &str = "ncols 3\nnrows 2\nxllcorner -118.0\nyllcorner 34.0\ncellsize 0.5\nNODATA_value -9999\n1 2 3\n4 -9999 6\n";

    #[test]
    fn test_parse_header_and_samples() {
        let dem = parse_ascii_grid(GRID).unwrap();
        assert_eq!(dem.width(), 3);
        assert_eq!(dem.height(), 2);
        assert_eq!(dem.nodata(), Some(-9999.0));

        let (lon, lat) = dem.transform().to_geo(0.0, 0.0);
        assert_relative_eq!(lon, -118.0);
        assert_relative_eq!(lat, 35.0);

        assert_eq!(dem.sample(2, 0), Some(3.0));
        assert_eq!(dem.sample(1, 1), None);
        assert_relative_eq!(dem.max_elevation(), 6.0);
    }

    #[test]
    fn test_centre_registration() {
        let grid = "ncols 2\nnrows 2\nxllcenter 0.5\nyllcenter 0.5\ncellsize 1\n1 1\n1 1\n";
        let dem = parse_ascii_grid(grid).unwrap();
        let (lon, lat) = dem.transform().to_geo(0.0, 0.0);
        assert_relative_eq!(lon, 0.0);
        assert_relative_eq!(lat, 2.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_ascii_grid("nrows 2\n"),
            Err(DemError::Parse(_))
        ));
        let short = "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n";
        assert!(matches!(
            parse_ascii_grid(short),
            Err(DemError::ShapeMismatch { got: 3, .. })
        ));
        let garbage = "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 x 4\n";
        assert!(matches!(parse_ascii_grid(garbage), Err(DemError::Parse(_))));
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let huge = "ncols 4294967296\nnrows 4294967296\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3 4\n";
        assert!(matches!(
            parse_ascii_grid(huge),
            Err(DemError::TooLarge { .. })
        ));
        let wide = format!(
            "ncols {}\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3 4\n",
            usize::MAX
        );
        assert!(matches!(
            parse_ascii_grid(&wide),
            Err(DemError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_source_loads_from_directory() {
        let dir = std::env::temp_dir().join("fireloc_ascii_grid_test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("tile.asc"), GRID).unwrap();

        let source = AsciiGridSource::new(&dir);
        let dem = source.load_raster("tile").unwrap();
        assert_eq!(dem.width(), 3);
        assert!(matches!(
            source.load_raster("absent"),
            Err(DemError::NotFound(_))
        ));
    }

    #[test]
    fn test_projection_sidecar() {
        let dir = std::env::temp_dir().join("fireloc_ascii_grid_prj_test");
        fs::create_dir_all(&dir).unwrap();
        let grid = "ncols 2\nnrows 2\nxllcorner 407000\nyllcorner 3762000\ncellsize 30\n1 1\n1 1\n";
        fs::write(dir.join("utm.asc"), grid).unwrap();
        fs::write(
            dir.join("utm.prj"),
            "PROJCS[\"WGS_1984_UTM_Zone_11N\",GEOGCS[\"GCS_WGS_1984\"]]",
        )
        .unwrap();
        fs::write(dir.join("bad.asc"), grid).unwrap();
        fs::write(dir.join("bad.prj"), "EPSG:3857").unwrap();

        let source = AsciiGridSource::new(&dir);
        let dem = source.load_raster("utm").unwrap();
        assert_eq!(dem.crs(), Crs::Utm { zone: 11, north: true });
        assert_relative_eq!(dem.cell_size_m(), 30.0);
        assert!(matches!(source.load_raster("bad"), Err(DemError::Parse(_))));

        fs::write(dir.join("plain.asc"), GRID).unwrap();
        assert_eq!(source.load_raster("plain").unwrap().crs(), Crs::Geographic);
    }
}
