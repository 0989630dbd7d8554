//! Projection and tile-coordinate math (spec Module A).
//!
//! Closed-form transforms for the three supported projections, ported from
//! `original_source/twms/projections.py`. No generic proj library is used,
//! the spec deliberately keeps this to a small closed set.

use crate::bbox::Bbox;
use crate::error::{TwmsError, TwmsResult};

/// One of the three projections the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Projection {
    /// EPSG:4326, geographic WGS84.
    Epsg4326,
    /// EPSG:3857, spherical Web Mercator. `EPSG:900913` and `EPSG:3785`
    /// alias to this variant.
    Epsg3857,
    /// EPSG:3395, ellipsoidal Mercator.
    Epsg3395,
}

/// Semi-major axis derived constant used by the 3857 transforms.
const R3857: f64 = 20_037_508.342_789_244;
const DEG_TO_M: f64 = 111_319.490_793_273_58;
/// First eccentricity of the WGS84 ellipsoid, used by the 3395 transforms.
const ECCENTRICITY: f64 = 0.081_819_190_842_6;

impl Projection {
    /// Parses an `EPSG:xxxx` string, collapsing known aliases.
    ///
    /// # Errors
    /// Returns [`TwmsError::UnsupportedProjection`] for anything outside the
    /// closed set in spec §4.2.
    pub fn parse(s: &str) -> TwmsResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EPSG:4326" => Ok(Self::Epsg4326),
            "EPSG:3857" | "EPSG:900913" | "EPSG:3785" => Ok(Self::Epsg3857),
            "EPSG:3395" => Ok(Self::Epsg3395),
            other => Err(TwmsError::UnsupportedProjection(other.to_string())),
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Epsg4326 => "EPSG:4326",
            Self::Epsg3857 => "EPSG:3857",
            Self::Epsg3395 => "EPSG:3395",
        }
    }

    /// The projection's native extent, in EPSG:4326.
    #[must_use]
    pub fn bounds(self) -> Bbox {
        match self {
            Self::Epsg4326 => Bbox::new(-180.0, -90.0, 180.0, 90.0),
            Self::Epsg3857 => Bbox::new(-180.0, -85.051_128_779_8, 180.0, 85.051_128_779_8),
            Self::Epsg3395 => Bbox::new(-180.0, -85.084_059_155_6, 180.0, 85.084_059_050_1),
        }
    }

    /// Projects a single `(lon, lat)` point from EPSG:4326 into `self`.
    #[must_use]
    pub fn from_4326(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Self::Epsg4326 => (lon, lat),
            Self::Epsg3857 => {
                let lat_rad = lat.to_radians();
                let x = lon * DEG_TO_M;
                let y = (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI * R3857;
                (x, y)
            }
            Self::Epsg3395 => {
                let half_pi_4 = std::f64::consts::FRAC_PI_4;
                let lat_rad = lat.to_radians();
                let tmp = (half_pi_4 + lat_rad / 2.0).tan();
                let pow_tmp = (half_pi_4 + (ECCENTRICITY * lat_rad.sin()).asin() / 2.0)
                    .tan()
                    .powf(ECCENTRICITY);
                let x = lon * DEG_TO_M;
                let y = 6_378_137.0 * (tmp / pow_tmp).ln();
                (x, y)
            }
        }
    }

    /// Inverse of [`Self::from_4326`].
    #[must_use]
    pub fn to_4326(self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Self::Epsg4326 => (x, y),
            Self::Epsg3857 => {
                let lon = x / DEG_TO_M;
                let lat = (y / R3857 * std::f64::consts::PI).sinh().atan().to_degrees();
                (lon, lat)
            }
            Self::Epsg3395 => {
                let r_major = 6_378_137.0_f64;
                let flattened = 6_356_752.314_2 / r_major;
                let es = 1.0 - flattened * flattened;
                let eccent = es.sqrt();
                let ts = (-y / r_major).exp();
                let half_pi = std::f64::consts::FRAC_PI_2;
                let eccnth = 0.5 * eccent;
                let mut phi = half_pi - 2.0 * ts.atan();
                let mut dphi = 0.1_f64;
                let mut iters = 15;
                while dphi.abs() > 1e-7 && iters > 0 {
                    iters -= 1;
                    let con = eccent * phi.sin();
                    let new_dphi =
                        half_pi - 2.0 * (ts * ((1.0 - con) / (1.0 + con)).powf(eccnth)).atan() - phi;
                    dphi = new_dphi;
                    phi += dphi;
                }
                let lon = x / DEG_TO_M;
                (lon, phi.to_degrees())
            }
        }
    }

    /// Fractional slippy-map tile coordinates of a single EPSG:4326 point at
    /// zoom `z`.
    #[must_use]
    pub fn tile_by_point(self, lon: f64, lat: f64, z: u8) -> (f64, f64) {
        let bounds = self.bounds();
        let (bx0, by0) = self.from_4326(bounds.lon_min, bounds.lat_min);
        let (bx1, by1) = self.from_4326(bounds.lon_max, bounds.lat_max);
        let (px, py) = self.from_4326(lon, lat);
        let nx = (px - bx0) / (bx1 - bx0);
        let ny = (py - by0) / (by1 - by0);
        let n = f64::from(1u32 << z);
        (nx * n, (1.0 - ny) * n)
    }

    /// The EPSG:4326 coordinates of a tile grid corner, e.g. for
    /// `(z, x, y)` the top-left corner of that tile.
    #[must_use]
    pub fn point_by_tile(self, z: u8, x: f64, y: f64) -> (f64, f64) {
        let bounds = self.bounds();
        let (bx0, by0) = self.from_4326(bounds.lon_min, bounds.lat_min);
        let (bx1, by1) = self.from_4326(bounds.lon_max, bounds.lat_max);
        let n = f64::from(1u32 << z);
        let nx = x / n;
        let ny = 1.0 - y / n;
        let px = nx * (bx1 - bx0) + bx0;
        let py = ny * (by1 - by0) + by0;
        self.to_4326(px, py)
    }

    /// `(lon_min, lat_min, lon_max, lat_max)` of tile `(z, x, y)` in
    /// EPSG:4326, per spec §4.2.
    #[must_use]
    pub fn bbox_by_tile(self, z: u8, x: i64, y: i64) -> Bbox {
        #[allow(clippy::cast_precision_loss)]
        let (lon0, lat0) = self.point_by_tile(z, x as f64, (y + 1) as f64);
        #[allow(clippy::cast_precision_loss)]
        let (lon1, lat1) = self.point_by_tile(z, (x + 1) as f64, y as f64);
        Bbox::new(lon0, lat0, lon1, lat1)
    }

    /// Fractional tile coordinates `(fx, fy, tx, ty)` covering `bbox` at
    /// zoom `z`, wrapping across the antimeridian when the upper-right tile
    /// index would otherwise fall left of the lower-left one.
    #[must_use]
    pub fn tile_by_bbox(self, bbox: &Bbox, z: u8) -> (f64, f64, f64, f64) {
        let (ax, ay) = self.tile_by_point(bbox.lon_min, bbox.lat_min, z);
        let (mut bx, by) = self.tile_by_point(bbox.lon_max, bbox.lat_max, z);
        if bx < ax && z > 0 {
            bx += f64::from(1u32 << (z - 1));
        }
        (ax, ay, bx, by)
    }

    /// Smallest zoom in `[min_zoom, max_zoom)` whose tile grid covering
    /// `bbox` reaches at least `0.9 * max(size)` or half of `max_size`;
    /// falls back to `max_zoom` per spec §4.2.
    #[must_use]
    pub fn zoom_for_bbox(
        self,
        bbox: &Bbox,
        size: (u32, u32),
        min_zoom: u8,
        max_zoom: u8,
        max_size: (u32, u32),
    ) -> u8 {
        let (h, w) = size;
        for z in min_zoom..max_zoom {
            let (cx1, cy1, cx2, cy2) = self.tile_by_bbox(bbox, z);
            if w != 0 && (cx2 - cx1) * 256.0 >= f64::from(w) * 0.9 {
                return z;
            }
            if h != 0 && (cy1 - cy2) * 256.0 >= f64::from(h) * 0.9 {
                return z;
            }
            if (cy1 - cy2) * 256.0 >= f64::from(max_size.0) / 2.0 {
                return z;
            }
            if (cx2 - cx1) * 256.0 >= f64::from(max_size.1) / 2.0 {
                return z;
            }
        }
        max_zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: (f64, f64), b: (f64, f64), tol: f64) {
        assert!((a.0 - b.0).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.1 - b.1).abs() < tol, "{a:?} vs {b:?}");
    }

    #[test]
    fn parse_aliases_collapse_to_3857() {
        assert_eq!(Projection::parse("EPSG:900913").unwrap(), Projection::Epsg3857);
        assert_eq!(Projection::parse("epsg:3785").unwrap(), Projection::Epsg3857);
    }

    #[test]
    fn parse_rejects_unknown_projection() {
        assert!(Projection::parse("EPSG:32635").is_err());
    }

    #[test]
    fn roundtrip_3857() {
        for &(lon, lat) in &[(27.6, 53.2), (-122.4, 37.8), (0.0, 0.0), (179.0, 84.9)] {
            let (x, y) = Projection::Epsg3857.from_4326(lon, lat);
            let back = Projection::Epsg3857.to_4326(x, y);
            assert_close(back, (lon, lat), 1e-6);
        }
    }

    #[test]
    fn roundtrip_3395() {
        for &(lon, lat) in &[(27.6, 53.2), (-122.4, 37.8), (0.0, 0.0), (170.0, -80.0)] {
            let (x, y) = Projection::Epsg3395.from_4326(lon, lat);
            let back = Projection::Epsg3395.to_4326(x, y);
            assert_close(back, (lon, lat), 1e-6);
        }
    }

    #[test]
    fn tile_bbox_roundtrip() {
        let p = Projection::Epsg3857;
        for &(z, x, y) in &[(3u8, 3i64, 2i64), (10, 512, 340), (0, 0, 0)] {
            let bbox = p.bbox_by_tile(z, x, y);
            let (fx, fy, tx, ty) = p.tile_by_bbox(&bbox, z);
            // `fy` comes from the bbox's south edge (the larger row index),
            // `ty` from its north edge (the smaller one). Row increases
            // southward.
            assert!((fx - x as f64).abs() < 1e-6);
            assert!((fy - (y + 1) as f64).abs() < 1e-6);
            assert!((tx - (x + 1) as f64).abs() < 1e-6);
            assert!((ty - y as f64).abs() < 1e-6);
        }
    }
}
