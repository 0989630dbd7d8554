//! Layer configuration record (spec §3).
//!
//! A `Layer` is the typed, defaults-filled runtime record a [`Fetcher`] and
//! the [`Compositor`] operate against, never the raw config file. Filling
//! in defaults happens once, at config-load time, via [`LayerConfig::into_layer`],
//! per spec §9's redesign note ("typed Layer struct... defaults filled at
//! config-load, not at access").
//!
//! [`Fetcher`]: crate::fetcher::Fetcher
//! [`Compositor`]: crate::compositor::Compositor

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bbox::Bbox;
use crate::error::{TwmsError, TwmsResult};
use crate::projection::Projection;

/// Storage/output raster formats the engine understands (spec §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mimetype {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/webp")]
    WebP,
}

impl Mimetype {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Gif => ".gif",
            Self::WebP => ".webp",
        }
    }

    /// Parses a MIME string as used in WMS `format=` query params.
    ///
    /// # Errors
    /// Returns [`TwmsError::UnsupportedMimetype`] for anything outside §6.4.
    pub fn parse(s: &str) -> TwmsResult<Self> {
        match s {
            "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "image/png" => Ok(Self::Png),
            "image/gif" => Ok(Self::Gif),
            "image/webp" => Ok(Self::WebP),
            other => Err(TwmsError::UnsupportedMimetype(other.to_string())),
        }
    }
}

/// An opaque RGB(A) fill color, used for synthesised fills and overlay
/// transparency keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[must_use]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub const WHITE: Color = Color::rgb(255, 255, 255);
}

/// Which upstream protocol a [`Layer`] is fetched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    /// Plain tile-server (TMS-style) GET with placeholder substitution.
    Tms,
    /// Google Satellite's versioned `kh.google.com` endpoint, discovered
    /// lazily (spec §4.3).
    TmsGoogleSat,
}

/// A pure `(z, x, y) -> (z, x, y)` remapping applied before placeholder
/// substitution, replacing the source's arbitrary per-layer lambda with a
/// closed, serialisable set (spec §9: "typed Layer struct").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileTransform {
    /// `(z, x, y) -> (z, x, y)`.
    Identity,
    /// `(z, x, y) -> (z, y, x)`.
    SwapXy,
    /// `(z, x, y) -> (z + delta, x, y)`.
    ZoomShift { delta: i8 },
    /// `(z, x, y) -> (z, x, 2^z - y - 1)`.
    SlippyToTms,
    /// Bing quadkey numbering: the upstream wants `(z, x, y)` remapped to a
    /// quadkey string, applied at placeholder-substitution time rather than
    /// here. This variant exists so a layer can combine a quadkey upstream
    /// with a zoom shift (the `vesat` layer does not, but `{q}` substitution
    /// itself never needs a coordinate remap).
    Quadkey,
}

impl TileTransform {
    #[must_use]
    pub fn apply(self, z: u8, x: u32, y: u32) -> (u8, u32, u32) {
        match self {
            Self::Identity | Self::Quadkey => (z, x, y),
            Self::SwapXy => (z, y, x),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Self::ZoomShift { delta } => ((i16::from(z) + i16::from(delta)).max(0) as u8, x, y),
            Self::SlippyToTms => (z, x, crate::tile::tms_y(z, y)),
        }
    }
}

/// Criterion for detecting an upstream "dead tile" (spec §4.3, §8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadTileCriterion {
    /// An HTTP status code that, when returned, means "no tile here".
    pub http_status: Option<u16>,
    /// Hex-encoded MD5 digests of known dead-tile payloads.
    #[serde(default)]
    pub md5: std::collections::HashSet<String>,
}

/// Configuration record for one layer, effectively immutable at runtime
/// (spec §3).
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: std::sync::Arc<str>,
    pub display_name: String,
    pub mimetype: Mimetype,
    pub projection: Projection,
    pub bounds: Bbox,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub scalable: bool,
    pub overlay: bool,
    pub empty_color: Color,
    pub empty_color_delta: u8,
    pub cache_ttl: Option<u64>,
    pub fetch_kind: FetchKind,
    pub remote_template: String,
    pub tile_transform: Option<TileTransform>,
    pub http_headers: HashMap<String, String>,
    pub dead_tile: Option<DeadTileCriterion>,
}

/// The on-disk / wire representation of a [`Layer`], with every field the
/// operator doesn't care about left out and filled from [`ServerDefaults`]
/// at load time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerConfig {
    pub id: String,
    pub display_name: Option<String>,
    pub mimetype: Mimetype,
    pub projection: String,
    pub bounds: Option<(f64, f64, f64, f64)>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    #[serde(default)]
    pub scalable: bool,
    #[serde(default)]
    pub overlay: bool,
    pub empty_color: Option<Color>,
    #[serde(default)]
    pub empty_color_delta: u8,
    pub cache_ttl: Option<u64>,
    pub fetch_kind: FetchKind,
    pub remote_template: String,
    pub tile_transform: Option<TileTransform>,
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    pub dead_tile: Option<DeadTileCriterion>,
}

/// Process-wide defaults, filled into a [`LayerConfig`] missing a field.
#[derive(Debug, Clone)]
pub struct ServerDefaults {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub empty_color: Color,
    pub max_height: u32,
    pub max_width: u32,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 19,
            empty_color: Color::WHITE,
            max_height: 4095,
            max_width: 4095,
        }
    }
}

impl LayerConfig {
    /// Resolves this config record into a runtime [`Layer`], filling in
    /// process-wide defaults for anything left unset.
    ///
    /// # Errors
    /// Returns [`TwmsError::UnsupportedProjection`] if `projection` is
    /// outside the closed set of spec §4.2.
    pub fn into_layer(self, defaults: &ServerDefaults) -> TwmsResult<Layer> {
        let projection = Projection::parse(&self.projection)?;
        let bounds = self
            .bounds
            .map(|(a, b, c, d)| Bbox::new(a, b, c, d))
            .unwrap_or_else(|| projection.bounds());
        Ok(Layer {
            id: self.id.clone().into(),
            display_name: self.display_name.unwrap_or(self.id),
            mimetype: self.mimetype,
            projection,
            bounds,
            min_zoom: self.min_zoom.unwrap_or(defaults.min_zoom),
            max_zoom: self.max_zoom.unwrap_or(defaults.max_zoom),
            scalable: self.scalable,
            overlay: self.overlay,
            empty_color: self.empty_color.unwrap_or(defaults.empty_color),
            empty_color_delta: self.empty_color_delta,
            cache_ttl: self.cache_ttl,
            fetch_kind: self.fetch_kind,
            remote_template: self.remote_template,
            tile_transform: self.tile_transform,
            http_headers: self.http_headers,
            dead_tile: self.dead_tile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> LayerConfig {
        LayerConfig {
            id: "osm".into(),
            display_name: None,
            mimetype: Mimetype::Png,
            projection: "EPSG:3857".into(),
            bounds: None,
            min_zoom: None,
            max_zoom: Some(19),
            scalable: false,
            overlay: false,
            empty_color: None,
            empty_color_delta: 0,
            cache_ttl: Some(2_592_000),
            fetch_kind: FetchKind::Tms,
            remote_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".into(),
            tile_transform: None,
            http_headers: HashMap::new(),
            dead_tile: None,
        }
    }

    #[test]
    fn fills_defaults_at_load_time() {
        let layer = minimal_config().into_layer(&ServerDefaults::default()).unwrap();
        assert_eq!(layer.min_zoom, 0);
        assert_eq!(layer.max_zoom, 19);
        assert_eq!(layer.empty_color, Color::WHITE);
        assert_eq!(layer.projection, Projection::Epsg3857);
    }

    #[test]
    fn rejects_bad_projection() {
        let mut cfg = minimal_config();
        cfg.projection = "EPSG:32635".into();
        assert!(cfg.into_layer(&ServerDefaults::default()).is_err());
    }

    #[test]
    fn slippy_to_tms_transform() {
        assert_eq!(TileTransform::SlippyToTms.apply(4, 3, 2), (4, 3, 13));
    }
}
