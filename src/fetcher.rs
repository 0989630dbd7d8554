//! Per-layer tile fetcher (spec Module E).
//!
//! One [`Fetcher`] per layer: owns the layer's HTTP session, cache handle,
//! and a bounded worker pool. Grounded on the teacher's `HttpBackend` for
//! the "one client, many requests" shape, and on
//! `original_source/twms/fetchers.py`'s `WMS`/`Tile` functions for the
//! classify-then-validate algorithm.

use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::sync::{Mutex, Semaphore};

use crate::cache::TileFileCache;
use crate::codec;
use crate::error::TwmsResult;
use crate::http_session::HttpSession;
use crate::layer::{FetchKind, Layer, Mimetype};
use crate::tile::{quadkey, tms_y, TileKey};

/// Default number of concurrent upstream fetches per layer.
const DEFAULT_WORKERS: usize = 5;

/// Lazily-discovered state for the `tms_google_sat` fetch kind (spec §4.3).
#[derive(Debug, Default)]
struct GoogleSatState {
    remote_template: Option<String>,
}

/// Decoded RGBA raster plus the mimetype it was decoded from, returned by a
/// successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedTile {
    pub rgba: image::RgbaImage,
    pub mimetype: Mimetype,
}

/// Owns one layer's upstream access: HTTP session, on-disk cache handle, and
/// a semaphore bounding concurrent in-flight requests.
#[derive(Debug)]
pub struct Fetcher {
    layer: Arc<Layer>,
    cache: TileFileCache,
    session: HttpSession,
    workers: Semaphore,
    google_sat: Mutex<GoogleSatState>,
}

impl Fetcher {
    #[must_use]
    pub fn new(layer: Arc<Layer>, cache: TileFileCache, session: HttpSession) -> Self {
        Self {
            layer,
            cache,
            session,
            workers: Semaphore::new(DEFAULT_WORKERS),
            google_sat: Mutex::new(GoogleSatState::default()),
        }
    }

    /// Resolves `(z, x, y)` to a decoded tile, consulting the on-disk cache
    /// first and the upstream second, per spec §4.3.
    ///
    /// # Errors
    /// Only filesystem and decode errors bubble up; upstream failures,
    /// dead tiles, and out-of-range zooms are reported as `Ok(None)`.
    pub async fn fetch(&self, key: &TileKey) -> TwmsResult<Option<FetchedTile>> {
        if key.z < self.layer.min_zoom || key.z > self.layer.max_zoom {
            return Ok(None);
        }

        if !self.cache.needs_fetch(key, self.layer.mimetype, self.layer.cache_ttl.map(std::time::Duration::from_secs)) {
            return self.decode_cached(key).await;
        }

        let _permit = self.workers.acquire().await.expect("semaphore not closed");

        let (tz, tx, ty) = self
            .layer
            .tile_transform
            .map_or((key.z, key.x, key.y), |t| t.apply(key.z, key.x, key.y));

        let url = self.resolve_url(tz, tx, ty).await;
        let headers: Vec<(Arc<str>, Arc<str>)> = self
            .layer
            .http_headers
            .iter()
            .map(|(k, v)| (Arc::from(k.as_str()), Arc::from(v.as_str())))
            .collect();

        let response = match self.session.fetch(&url, &headers).await {
            Ok(r) => r,
            Err(err) => {
                log::warn!("fetch failed for layer {} tile {:?}: {err}", self.layer.id, (key.z, key.x, key.y));
                self.clear_google_sat_template().await;
                return Ok(None);
            }
        };

        match response.status.as_u16() {
            404 => {
                self.cache.write_tne(key)?;
                self.clear_google_sat_template().await;
                return Ok(None);
            }
            403 => {
                log::warn!("403 for layer {} tile {:?}, not marking TNE", self.layer.id, (key.z, key.x, key.y));
                self.clear_google_sat_template().await;
                return Ok(None);
            }
            status if Some(status) == self.layer.dead_tile.as_ref().and_then(|d| d.http_status) => {
                self.cache.write_tne(key)?;
                self.clear_google_sat_template().await;
                return Ok(None);
            }
            status if !(200..300).contains(&status) => {
                log::warn!("non-2xx {status} for layer {} tile {:?}", self.layer.id, (key.z, key.x, key.y));
                self.clear_google_sat_template().await;
                return Ok(None);
            }
            _ => {}
        }

        let digest = format!("{:x}", Md5::digest(&response.body));
        if let Some(dead) = &self.layer.dead_tile {
            if dead.md5.contains(&digest) {
                self.cache.write_tne(key)?;
                self.clear_google_sat_template().await;
                return Ok(None);
            }
        }

        let decoded = match codec::decode(&response.body) {
            Ok(img) => img,
            Err(err) => {
                log::warn!("decode failed for layer {} tile {:?}: {err}", self.layer.id, (key.z, key.x, key.y));
                return Ok(None);
            }
        };

        let persisted = if decoded.source_mimetype == self.layer.mimetype {
            response.body.to_vec()
        } else {
            codec::encode(&decoded.rgba, self.layer.mimetype, &Default::default())?
        };
        self.cache.write_image(key, self.layer.mimetype, &persisted)?;

        Ok(Some(FetchedTile { rgba: decoded.rgba, mimetype: self.layer.mimetype }))
    }

    async fn decode_cached(&self, key: &TileKey) -> TwmsResult<Option<FetchedTile>> {
        let Some(bytes) = self.cache.read(key, self.layer.mimetype) else {
            return Ok(None);
        };
        match codec::decode(&bytes) {
            Ok(decoded) => Ok(Some(FetchedTile { rgba: decoded.rgba, mimetype: self.layer.mimetype })),
            Err(err) => {
                log::warn!("decode failed reading cache for layer {} tile {:?}: {err}", self.layer.id, (key.z, key.x, key.y));
                Ok(None)
            }
        }
    }

    async fn resolve_url(&self, z: u8, x: u32, y: u32) -> String {
        let template = match self.layer.fetch_kind {
            FetchKind::Tms => self.layer.remote_template.clone(),
            FetchKind::TmsGoogleSat => self.google_sat_template(z, x, y).await,
        };
        substitute_placeholders(&template, &self.layer, z, x, y)
    }

    async fn google_sat_template(&self, z: u8, x: u32, y: u32) -> String {
        let mut state = self.google_sat.lock().await;
        if state.remote_template.is_none() {
            match self.discover_google_sat_version().await {
                Ok(version) => {
                    state.remote_template =
                        Some(format!("https://kh.google.com/kh/v={version}?x={{x}}&y={{y}}&z={{z}}"));
                }
                Err(err) => {
                    log::warn!("failed to discover google satellite version: {err}");
                    return self.layer.remote_template.clone();
                }
            }
        }
        state.remote_template.clone().unwrap_or_else(|| self.layer.remote_template.clone())
    }

    async fn discover_google_sat_version(&self) -> TwmsResult<String> {
        let response = self
            .session
            .fetch("https://maps.googleapis.com/maps/api/js", &[])
            .await?;
        let body = String::from_utf8_lossy(&response.body);
        let needle = "khms";
        let Some(start) = body.find(needle) else {
            return Err(crate::error::TwmsError::Upstream("no kh version token found".into()));
        };
        let tail = &body[start..];
        let v_idx = tail.find("?v=").map(|i| i + 3).unwrap_or(0);
        let digits: String = tail[v_idx..].chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(crate::error::TwmsError::Upstream("empty kh version".into()));
        }
        Ok(digits)
    }

    async fn clear_google_sat_template(&self) {
        if self.layer.fetch_kind == FetchKind::TmsGoogleSat {
            self.google_sat.lock().await.remote_template = None;
        }
    }
}

fn substitute_placeholders(template: &str, layer: &Layer, z: u8, x: u32, y: u32) -> String {
    let mut out = template.to_string();
    out = out.replace("{z}", &z.to_string());
    out = out.replace("{x}", &x.to_string());
    out = out.replace("{y}", &y.to_string());
    out = out.replace("{-y}", &tms_y(z, y).to_string());
    out = out.replace("{q}", &quadkey(z, x, y));
    if out.contains("{bbox}") || out.contains("{width}") || out.contains("{height}") || out.contains("{proj}") {
        let bbox = layer.projection.bbox_by_tile(z, i64::from(x), i64::from(y));
        let (minx, miny) = layer.projection.from_4326(bbox.lon_min, bbox.lat_min);
        let (maxx, maxy) = layer.projection.from_4326(bbox.lon_max, bbox.lat_max);
        out = out.replace("{bbox}", &format!("{minx},{miny},{maxx},{maxy}"));
        out = out.replace("{width}", "256");
        out = out.replace("{height}", "256");
        out = out.replace("{proj}", layer.projection.code());
    }
    out
}
