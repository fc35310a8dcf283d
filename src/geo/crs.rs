//! Coordinate reference systems of DEM rasters.
//!
//! A raster is either geographic (`x` = longitude, `y` = latitude, degrees)
//! or projected in a WGS84 UTM zone (`x` = easting, `y` = northing, metres).
//! UTM uses the Krüger series of the transverse Mercator projection to sixth
//! order in the third flattening, accurate to well below a millimetre inside
//! a zone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo::frame::{WGS84_A, WGS84_F};
use crate::geo::GeoError;

const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Coordinate reference of a raster's world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Crs {
    /// Longitude / latitude in degrees (EPSG:4326).
    #[default]
    Geographic,
    /// WGS84 UTM zone `1..=60`, northern or southern hemisphere.
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// UTM zone with validation of the zone number.
    pub fn utm(zone: u8, north: bool) -> Result<Self, GeoError> {
        if !(1..=60).contains(&zone) {
            return Err(GeoError::UnsupportedCrs(format!("UTM zone {zone}")));
        }
        Ok(Crs::Utm { zone, north })
    }

    /// UTM zone containing `longitude`.
    pub fn utm_for(latitude: f64, longitude: f64) -> Self {
        let lon = wrap_degrees(longitude);
        let zone = (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u8 + 1;
        Crs::Utm {
            zone,
            north: latitude >= 0.0,
        }
    }

    /// Supports EPSG:4326 and the WGS84 UTM codes 32601-32660 / 32701-32760.
    pub fn from_epsg(code: u32) -> Result<Self, GeoError> {
        match code {
            4326 => Ok(Crs::Geographic),
            32601..=32660 => Self::utm((code - 32600) as u8, true),
            32701..=32760 => Self::utm((code - 32700) as u8, false),
            _ => Err(GeoError::UnsupportedCrs(format!("EPSG:{code}"))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Geographic => 4326,
            Crs::Utm { zone, north: true } => 32600 + zone as u32,
            Crs::Utm { zone, north: false } => 32700 + zone as u32,
        }
    }

    /// Parses a CRS description: `EPSG:<code>`, a bare code, or WKT / proj
    /// text naming a WGS84 UTM zone (`UTM zone 11N`, `+proj=utm +zone=11`)
    /// or a geographic system.
    pub fn parse(text: &str) -> Result<Self, GeoError> {
        let trimmed = text.trim();
        let unsupported = || GeoError::UnsupportedCrs(trimmed.chars().take(80).collect());

        let upper = trimmed.to_ascii_uppercase();
        if let Some(code) = upper.strip_prefix("EPSG:") {
            return code.trim().parse().map_err(|_| unsupported()).and_then(Self::from_epsg);
        }
        if let Ok(code) = upper.parse::<u32>() {
            return Self::from_epsg(code);
        }

        if upper.contains("+PROJ=UTM") {
            let zone = upper
                .split_whitespace()
                .find_map(|token| token.strip_prefix("+ZONE="))
                .and_then(|z| z.parse::<u8>().ok())
                .ok_or_else(unsupported)?;
            return Self::utm(zone, !upper.contains("+SOUTH"));
        }

        let normalised = upper.replace(['_', '"'], " ");
        if let Some(pos) = normalised.find("UTM ZONE ") {
            let rest = &normalised[pos + "UTM ZONE ".len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            let zone = digits.parse::<u8>().map_err(|_| unsupported())?;
            let north = !matches!(rest[digits.len()..].chars().next(), Some('S'));
            return Self::utm(zone, north);
        }
        if upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS") || upper.contains("+PROJ=LONGLAT") {
            return Ok(Crs::Geographic);
        }
        Err(unsupported())
    }

    pub fn is_projected(&self) -> bool {
        !matches!(self, Crs::Geographic)
    }

    /// World coordinates `(x, y)` of a geodetic position.
    pub fn project(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        match *self {
            Crs::Geographic => (longitude, latitude),
            Crs::Utm { zone, north } => {
                let (easting, northing) =
                    TransverseMercator::wgs84().forward(latitude, longitude - central_meridian(zone));
                let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
                (
                    UTM_FALSE_EASTING + UTM_SCALE * easting,
                    false_northing + UTM_SCALE * northing,
                )
            }
        }
    }

    /// Geodetic `(latitude, longitude)` of world coordinates `(x, y)`.
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Crs::Geographic => (y, x),
            Crs::Utm { zone, north } => {
                let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
                let (lat, dlon) = TransverseMercator::wgs84().inverse(
                    (x - UTM_FALSE_EASTING) / UTM_SCALE,
                    (y - false_northing) / UTM_SCALE,
                );
                (lat, wrap_degrees(dlon + central_meridian(zone)))
            }
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Geographic => write!(f, "EPSG:4326 (geographic)"),
            Crs::Utm { zone, north } => write!(
                f,
                "EPSG:{} (UTM zone {}{})",
                self.epsg(),
                zone,
                if *north { 'N' } else { 'S' }
            ),
        }
    }
}

fn central_meridian(zone: u8) -> f64 {
    zone as f64 * 6.0 - 183.0
}

fn wrap_degrees(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Unit-scale transverse Mercator on the WGS84 ellipsoid, centred on the
/// meridian `dlon = 0`.
struct TransverseMercator {
    e: f64,
    /// Rectifying radius.
    a_rect: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
}

impl TransverseMercator {
    fn wgs84() -> Self {
        Self::new(WGS84_A, WGS84_F)
    }

    fn new(a: f64, f: f64) -> Self {
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        let n5 = n4 * n;
        let n6 = n5 * n;
        TransverseMercator {
            e: (f * (2.0 - f)).sqrt(),
            a_rect: a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0),
            alpha: [
                n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3 + 41.0 / 180.0 * n4
                    - 127.0 / 288.0 * n5
                    + 7891.0 / 37800.0 * n6,
                13.0 / 48.0 * n2 - 3.0 / 5.0 * n3 + 557.0 / 1440.0 * n4 + 281.0 / 630.0 * n5
                    - 1983433.0 / 1935360.0 * n6,
                61.0 / 240.0 * n3 - 103.0 / 140.0 * n4 + 15061.0 / 26880.0 * n5
                    + 167603.0 / 181440.0 * n6,
                49561.0 / 161280.0 * n4 - 179.0 / 168.0 * n5 + 6601661.0 / 7257600.0 * n6,
                34729.0 / 80640.0 * n5 - 3418889.0 / 1995840.0 * n6,
                212378941.0 / 319334400.0 * n6,
            ],
            beta: [
                n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3 - 1.0 / 360.0 * n4 - 81.0 / 512.0 * n5
                    + 96199.0 / 604800.0 * n6,
                1.0 / 48.0 * n2 + 1.0 / 15.0 * n3 - 437.0 / 1440.0 * n4 + 46.0 / 105.0 * n5
                    - 1118711.0 / 3870720.0 * n6,
                17.0 / 480.0 * n3 - 37.0 / 840.0 * n4 - 209.0 / 4480.0 * n5
                    + 5569.0 / 90720.0 * n6,
                4397.0 / 161280.0 * n4 - 11.0 / 504.0 * n5 - 830251.0 / 7257600.0 * n6,
                4583.0 / 161280.0 * n5 - 108847.0 / 3991680.0 * n6,
                20648693.0 / 638668800.0 * n6,
            ],
        }
    }

    /// `tan` of the conformal latitude from `tan` of the geodetic latitude.
    fn conformal_tan(&self, tau: f64) -> f64 {
        let e = self.e;
        let sigma = (e * (e * tau / tau.hypot(1.0)).atanh()).sinh();
        tau * sigma.hypot(1.0) - sigma * tau.hypot(1.0)
    }

    /// Easting and northing (unscaled, no false origin) of `(lat, dlon)`.
    fn forward(&self, lat_deg: f64, dlon_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let dlon = dlon_deg.to_radians();

        let tau_prime = self.conformal_tan(lat.tan());
        let xi_prime = tau_prime.atan2(dlon.cos());
        let eta_prime = (dlon.sin() / tau_prime.hypot(dlon.cos())).asinh();

        let (mut xi, mut eta) = (xi_prime, eta_prime);
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_prime).sin() * (k * eta_prime).cosh();
            eta += alpha * (k * xi_prime).cos() * (k * eta_prime).sinh();
        }
        (self.a_rect * eta, self.a_rect * xi)
    }

    /// `(lat, dlon)` in degrees of unscaled easting and northing.
    fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let xi = northing / self.a_rect;
        let eta = easting / self.a_rect;

        let (mut xi_prime, mut eta_prime) = (xi, eta);
        for (j, beta) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_prime -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_prime -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let tau_prime = xi_prime.sin() / eta_prime.sinh().hypot(xi_prime.cos());
        let dlon = eta_prime.sinh().atan2(xi_prime.cos());

        // Newton iteration for the geodetic latitude.
        let e2 = self.e * self.e;
        let mut tau = tau_prime;
        for _ in 0..8 {
            let tau_i = self.conformal_tan(tau);
            let step = (tau_prime - tau_i) / tau_i.hypot(1.0) * (1.0 + (1.0 - e2) * tau * tau)
                / ((1.0 - e2) * tau.hypot(1.0));
            tau += step;
            if step.abs() < 1e-14 * tau.abs().max(1.0) {
                break;
            }
        }
        (tau.atan().to_degrees(), dlon.to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoPoint, LocalFrame};
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_epsg_codes() {
        assert_eq!(Crs::from_epsg(4326), Ok(Crs::Geographic));
        assert_eq!(Crs::from_epsg(32611), Ok(Crs::Utm { zone: 11, north: true }));
        assert_eq!(Crs::from_epsg(32733), Ok(Crs::Utm { zone: 33, north: false }));
        assert!(Crs::from_epsg(3857).is_err());
        assert!(Crs::utm(0, true).is_err());
        assert!(Crs::utm(61, true).is_err());
        for code in [4326, 32601, 32660, 32701, 32760] {
            assert_eq!(Crs::from_epsg(code).unwrap().epsg(), code);
        }
    }

    #[test]
    fn test_parse_descriptions() {
        assert_eq!(Crs::parse("EPSG:32611"), Ok(Crs::Utm { zone: 11, north: true }));
        assert_eq!(Crs::parse(" epsg:4326\n"), Ok(Crs::Geographic));
        assert_eq!(Crs::parse("32756"), Ok(Crs::Utm { zone: 56, north: false }));
        assert_eq!(
            Crs::parse("+proj=utm +zone=10 +datum=WGS84 +units=m"),
            Ok(Crs::Utm { zone: 10, north: true })
        );
        assert_eq!(
            Crs::parse("+proj=utm +zone=19 +south +datum=WGS84"),
            Ok(Crs::Utm { zone: 19, north: false })
        );
        let wkt = r#"PROJCS["WGS_1984_UTM_Zone_11N",GEOGCS["GCS_WGS_1984"]]"#;
        assert_eq!(Crs::parse(wkt), Ok(Crs::Utm { zone: 11, north: true }));
        assert_eq!(
            Crs::parse(r#"PROJCS["WGS 84 / UTM zone 33S",GEOGCS["WGS 84"]]"#),
            Ok(Crs::Utm { zone: 33, north: false })
        );
        assert_eq!(Crs::parse(r#"GEOGCS["GCS_WGS_1984"]"#), Ok(Crs::Geographic));
        assert!(Crs::parse("EPSG:3857").is_err());
        assert!(Crs::parse("lambert conformal").is_err());
    }

    #[test]
    fn test_zone_lookup() {
        assert_eq!(Crs::utm_for(34.0, -118.0), Crs::Utm { zone: 11, north: true });
        assert_eq!(Crs::utm_for(-33.9, 151.2), Crs::Utm { zone: 56, north: false });
        assert_eq!(Crs::utm_for(0.0, 180.0), Crs::Utm { zone: 60, north: true });
    }

    #[test]
    fn test_central_meridian_and_equator() {
        let crs = Crs::utm(11, true).unwrap();
        let (x, y) = crs.project(0.0, -117.0);
        assert_relative_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-6);

        // On the central meridian the northing is the scaled meridian arc.
        let (x, y) = crs.project(45.0, -117.0);
        assert_relative_eq!(x, 500_000.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.9996 * 4_984_944.378, epsilon = 0.01);

        let south = Crs::utm(11, false).unwrap();
        let (_, y) = south.project(-10.0, -117.0);
        assert!(y < 10_000_000.0 && y > 8_000_000.0);
    }

    #[test]
    fn test_round_trip() {
        for crs in [Crs::utm(11, true).unwrap(), Crs::utm(56, false).unwrap()] {
            let cm = match crs {
                Crs::Utm { zone, .. } => central_meridian(zone),
                Crs::Geographic => 0.0,
            };
            let lat_sign = if matches!(crs, Crs::Utm { north: true, .. }) { 1.0 } else { -1.0 };
            for &(lat, dlon) in &[(0.5, 0.0), (34.0, -1.0), (52.3, 2.9), (71.0, -3.0)] {
                let lat = lat * lat_sign;
                let (x, y) = crs.project(lat, cm + dlon);
                let (lat2, lon2) = crs.unproject(x, y);
                assert_relative_eq!(lat2, lat, epsilon = 1e-10);
                assert_relative_eq!(lon2, cm + dlon, epsilon = 1e-10);
            }
        }
        let (lat, lon) = Crs::Geographic.unproject(-118.0, 34.0);
        assert_eq!((lat, lon), (34.0, -118.0));
    }

    #[test]
    fn test_scale_off_the_central_meridian() {
        // One degree west of the zone 11 meridian the point scale is
        // k0 (1 + cos²φ Δλ² / 2).
        let crs = Crs::utm(11, true).unwrap();
        let frame = LocalFrame::new(GeoPoint::new(34.0, -118.0, 0.0));
        let a = frame.to_geodetic(&Point3::new(-500.0, 0.0, 0.0));
        let b = frame.to_geodetic(&Point3::new(500.0, 0.0, 0.0));
        let (xa, ya) = crs.project(a.latitude, a.longitude);
        let (xb, yb) = crs.project(b.latitude, b.longitude);

        let dl = 1f64.to_radians();
        let k = 0.9996 * (1.0 + 34f64.to_radians().cos().powi(2) * dl * dl / 2.0);
        assert_relative_eq!((xb - xa).hypot(yb - ya), 1000.0 * k, epsilon = 0.01);
    }
}
