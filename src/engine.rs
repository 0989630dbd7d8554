//! Tile Engine (spec Module F): cache-then-fetch-then-synthesise resolution,
//! backed by a process-global, insertion-order-evicting LRU.
//!
//! The teacher's `HashMapCacheV2` (`src/cache.rs`) pairs an outer
//! `RwLock<HashMap<_, Arc<CacheSlot>>>` with per-slot locking for request
//! coalescing; this engine keeps the outer-map shape but deliberately
//! drops that recency-aware machinery in favor of a single `Mutex`-guarded
//! `HashMap` plus a `VecDeque` insertion queue, because spec §4.4/§5
//! require strict insertion-order eviction, not moka's recency-based
//! policy (see `DESIGN.md`).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use image::{imageops, RgbaImage};

use crate::error::TwmsResult;
use crate::fetcher::Fetcher;
use crate::layer::Layer;
use crate::tile::TileKey;

/// Default bound on the number of decoded tiles kept in memory (spec §3,
/// §4.6: "default 1024-2048").
const DEFAULT_MAX_RAM_TILES: usize = 1024;

/// A decoded 256x256 (or rescaled) raster, as held in the LRU.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub rgba: RgbaImage,
}

struct Lru {
    max_len: usize,
    map: HashMap<TileKey, DecodedImage>,
    order: VecDeque<TileKey>,
}

impl Lru {
    fn new(max_len: usize) -> Self {
        Self { max_len, map: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&self, key: &TileKey) -> Option<DecodedImage> {
        self.map.get(key).cloned()
    }

    fn insert(&mut self, key: TileKey, image: DecodedImage) {
        if self.map.insert(key.clone(), image).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.max_len {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }
}

/// Process-wide tile resolution engine. Holds one [`Fetcher`] per layer and
/// the shared in-memory LRU.
pub struct TileEngine {
    layers: HashMap<Arc<str>, (Arc<Layer>, Arc<Fetcher>)>,
    lru: Mutex<Lru>,
}

impl TileEngine {
    #[must_use]
    pub fn new(layers: HashMap<Arc<str>, (Arc<Layer>, Arc<Fetcher>)>) -> Self {
        Self::with_capacity(layers, DEFAULT_MAX_RAM_TILES)
    }

    #[must_use]
    pub fn with_capacity(layers: HashMap<Arc<str>, (Arc<Layer>, Arc<Fetcher>)>, max_ram_tiles: usize) -> Self {
        Self { layers, lru: Mutex::new(Lru::new(max_ram_tiles)) }
    }

    /// Resolves `(layer_id, z, x, y)` to a decoded image, per the spec §4.4
    /// resolution order: LRU hit, downscale-from-4, fetch, upscale-from-parent.
    ///
    /// `try_better` allows the downscale-from-4 synthesis path; `real`
    /// allows the upscale-from-parent path (the engine never upscales a
    /// tile that was itself synthesised by downscaling, to bound recursion
    /// depth to one level each direction).
    ///
    /// # Errors
    /// Only cache/fetch I/O errors propagate; missing tiles resolve to
    /// `Ok(None)`.
    pub async fn tile_image(
        &self,
        layer_id: &str,
        z: u8,
        x: i64,
        y: i64,
        try_better: bool,
        real: bool,
    ) -> TwmsResult<Option<DecodedImage>> {
        let Some((layer, fetcher)) = self.layers.get(layer_id).cloned() else {
            return Ok(None);
        };
        let Ok(key) = TileKey::new(Arc::from(layer_id), z, x, y) else {
            return Ok(None);
        };

        let tile_bbox = layer.projection.bbox_by_tile(key.z, i64::from(key.x), i64::from(key.y));
        if !layer.bounds.intersects(&tile_bbox) {
            return Ok(None);
        }

        if let Some(hit) = self.lru_get(&key) {
            return Ok(Some(hit));
        }

        if layer.scalable && key.z < layer.max_zoom && try_better {
            if let Some(image) = Box::pin(self.downscale_from_children(layer_id, key.z, key.x, key.y)).await? {
                self.lru_insert(key, image.clone());
                return Ok(Some(image));
            }
        }

        if let Some(fetched) = fetcher.fetch(&key).await? {
            let image = DecodedImage { rgba: fetched.rgba };
            self.lru_insert(key, image.clone());
            return Ok(Some(image));
        }

        if real && key.z > 0 {
            if let Some(image) = Box::pin(self.upscale_from_parent(layer_id, key.z, key.x, key.y)).await? {
                self.lru_insert(key, image.clone());
                return Ok(Some(image));
            }
        }

        Ok(None)
    }

    async fn downscale_from_children(
        &self,
        layer_id: &str,
        z: u8,
        x: u32,
        y: u32,
    ) -> TwmsResult<Option<DecodedImage>> {
        let mut children = Vec::with_capacity(4);
        for dy in 0..2u32 {
            for dx in 0..2u32 {
                let child = self
                    .tile_image(layer_id, z + 1, i64::from(2 * x + dx), i64::from(2 * y + dy), true, false)
                    .await?;
                let Some(child) = child else {
                    return Ok(None);
                };
                children.push((dx, dy, child));
            }
        }

        let mut canvas = RgbaImage::new(512, 512);
        for (dx, dy, child) in children {
            imageops::overlay(&mut canvas, &child.rgba, i64::from(dx * 256), i64::from(dy * 256));
        }
        let resized = imageops::resize(&canvas, 256, 256, imageops::FilterType::Triangle);
        Ok(Some(DecodedImage { rgba: resized }))
    }

    async fn upscale_from_parent(
        &self,
        layer_id: &str,
        z: u8,
        x: u32,
        y: u32,
    ) -> TwmsResult<Option<DecodedImage>> {
        let parent = self
            .tile_image(layer_id, z - 1, i64::from(x / 2), i64::from(y / 2), false, true)
            .await?;
        let Some(parent) = parent else {
            return Ok(None);
        };
        let quadrant_x = (x % 2) * 128;
        let quadrant_y = (y % 2) * 128;
        let cropped = imageops::crop_imm(&parent.rgba, quadrant_x, quadrant_y, 128, 128).to_image();
        let resized = imageops::resize(&cropped, 256, 256, imageops::FilterType::Triangle);
        Ok(Some(DecodedImage { rgba: resized }))
    }

    fn lru_get(&self, key: &TileKey) -> Option<DecodedImage> {
        self.lru.lock().expect("lru mutex poisoned").get(key)
    }

    fn lru_insert(&self, key: TileKey, image: DecodedImage) {
        self.lru.lock().expect("lru mutex poisoned").insert(key, image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileKey;

    fn key(n: u32) -> TileKey {
        TileKey::new(Arc::from("osm"), 10, i64::from(n), 0).unwrap()
    }

    fn dummy_image() -> DecodedImage {
        DecodedImage { rgba: RgbaImage::new(1, 1) }
    }

    #[test]
    fn lru_evicts_oldest_insertion_not_most_recently_used() {
        let mut lru = Lru::new(2);
        lru.insert(key(1), dummy_image());
        lru.insert(key(2), dummy_image());
        // Touching key 1 must not protect it from eviction (strict FIFO).
        let _ = lru.get(&key(1));
        lru.insert(key(3), dummy_image());
        assert!(lru.get(&key(1)).is_none());
        assert!(lru.get(&key(2)).is_some());
        assert!(lru.get(&key(3)).is_some());
    }

    #[test]
    fn lru_reinsertion_does_not_grow_queue() {
        let mut lru = Lru::new(2);
        lru.insert(key(1), dummy_image());
        lru.insert(key(1), dummy_image());
        lru.insert(key(2), dummy_image());
        assert!(lru.get(&key(1)).is_some());
        assert!(lru.get(&key(2)).is_some());
    }

    fn scalable_layer() -> Layer {
        crate::layer::Layer {
            id: "osm".into(),
            display_name: "Test".into(),
            mimetype: crate::layer::Mimetype::Png,
            projection: crate::projection::Projection::Epsg3857,
            bounds: crate::bbox::Bbox::new(-180.0, -85.0, 180.0, 85.0),
            min_zoom: 0,
            max_zoom: 19,
            scalable: true,
            overlay: false,
            empty_color: crate::layer::Color::WHITE,
            empty_color_delta: 0,
            cache_ttl: None,
            fetch_kind: crate::layer::FetchKind::Tms,
            // Unreachable on purpose: the downscale path must never fall
            // through to the fetcher when all four children are cached.
            remote_template: "http://127.0.0.1:1/{z}/{x}/{y}.png".into(),
            tile_transform: None,
            http_headers: std::collections::HashMap::new(),
            dead_tile: None,
        }
    }

    #[tokio::test]
    async fn downscale_from_children_stitches_four_cached_tiles() {
        let layer = Arc::new(scalable_layer());
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = crate::cache::TileFileCache::new(cache_dir.path());
        let session = crate::http_session::HttpSession::new().unwrap();
        let fetcher = Arc::new(Fetcher::new(Arc::clone(&layer), cache, session));

        let mut layers = HashMap::new();
        layers.insert(Arc::<str>::from("osm"), (Arc::clone(&layer), fetcher));
        let engine = TileEngine::new(layers);

        let colors = [
            (0u32, 0u32, image::Rgba([255, 0, 0, 255])),
            (1, 0, image::Rgba([0, 255, 0, 255])),
            (0, 1, image::Rgba([0, 0, 255, 255])),
            (1, 1, image::Rgba([255, 255, 0, 255])),
        ];
        for (dx, dy, color) in colors {
            let child_key = TileKey::new(Arc::from("osm"), 10, i64::from(8 + dx), i64::from(8 + dy)).unwrap();
            engine.lru_insert(child_key, DecodedImage { rgba: RgbaImage::from_pixel(256, 256, color) });
        }

        let tile = engine
            .tile_image("osm", 9, 4, 4, true, false)
            .await
            .unwrap()
            .expect("all four children cached, downscale must synthesize a tile");
        assert_eq!(tile.rgba.dimensions(), (256, 256));
        // Top-left should lean red (child (0,0)), bottom-right yellow (child (1,1)).
        assert_ne!(tile.rgba.get_pixel(4, 4), tile.rgba.get_pixel(251, 251));
    }
}
