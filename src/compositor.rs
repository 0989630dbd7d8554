//! Compositor (spec Module G): bbox+size+layers → composited image bytes.
//!
//! Ported from `original_source/twms/twms.py`'s `getimg()`: normalise the
//! request bbox, expand to the four projected corners, pick a zoom,
//! allocate a tile-grid canvas, crop/resize (or perspective-warp), overlay
//! additional layers, mirror if needed, and encode.

use std::collections::HashMap;
use std::sync::Arc;

use image::{imageops, RgbaImage};

use crate::bbox::Bbox;
use crate::cache::TileFileCache;
use crate::codec::{self, EncodeOptions};
use crate::engine::TileEngine;
use crate::error::{TwmsError, TwmsResult};
use crate::layer::{Layer, Mimetype};
use crate::projection::Projection;

/// Default output size when the caller specifies neither width nor height.
const DEFAULT_SIZE: u32 = 350;

/// Flags a caller can pass to change default compositing behavior (spec
/// §4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceFlags {
    pub noblend: bool,
    pub noresize: bool,
    pub nocorrect: bool,
}

impl ForceFlags {
    #[must_use]
    pub fn parse(tokens: &[&str]) -> Self {
        Self {
            noblend: tokens.contains(&"noblend"),
            noresize: tokens.contains(&"noresize"),
            nocorrect: tokens.contains(&"nocorrect"),
        }
    }
}

/// A fully rendered response.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub mimetype: Mimetype,
}

/// Assembles composited images from one or more layers over the Tile
/// Engine.
pub struct Compositor {
    engine: Arc<TileEngine>,
    layers: HashMap<Arc<str>, Arc<Layer>>,
    file_cache: TileFileCache,
    max_height: u32,
    max_width: u32,
}

impl Compositor {
    #[must_use]
    pub fn new(
        engine: Arc<TileEngine>,
        layers: HashMap<Arc<str>, Arc<Layer>>,
        file_cache: TileFileCache,
        max_height: u32,
        max_width: u32,
    ) -> Self {
        Self { engine, layers, file_cache, max_height, max_width }
    }

    fn layer(&self, id: &str) -> TwmsResult<Arc<Layer>> {
        self.layers.get(id).cloned().ok_or_else(|| TwmsError::UnknownLayer(id.to_string()))
    }

    /// TMS fast path (spec §4.5): a single 256x256 request with no resize,
    /// no blend, and the layer's own projection and storage mimetype
    /// streams the cached file verbatim, or 404s without ever touching the
    /// network.
    #[must_use]
    pub fn render_tms(&self, layer_id: &str, z: u8, x: i64, y: i64) -> Option<Vec<u8>> {
        let layer = self.layers.get(layer_id)?;
        let key = crate::tile::TileKey::new(Arc::from(layer_id), z, x, y).ok()?;
        self.file_cache.read(&key, layer.mimetype).map(|b| b.to_vec())
    }

    /// Entry point `render()` from spec §4.5.
    ///
    /// # Errors
    /// Returns [`TwmsError::UnknownLayer`] or [`TwmsError::UnsupportedProjection`]
    /// for a bad request; tile-level failures degrade internally to
    /// `empty_color` fills rather than propagating.
    pub async fn render(
        &self,
        bbox: Bbox,
        size: (u32, u32),
        srs: &str,
        layer_ids: &[String],
        force: ForceFlags,
    ) -> TwmsResult<RenderedImage> {
        let srs = Projection::parse(srs)?;
        let first_layer = self.layer(layer_ids.first().ok_or_else(|| TwmsError::UnknownLayer(String::new()))?)?;

        let (normalized, flip_h) = bbox.normalize();
        let corners = [
            srs.from_4326(normalized.lon_min, normalized.lat_min),
            srs.from_4326(normalized.lon_min, normalized.lat_max),
            srs.from_4326(normalized.lon_max, normalized.lat_min),
            srs.from_4326(normalized.lon_max, normalized.lat_max),
        ];
        let mut expanded = normalized;
        for &(px, py) in &corners {
            let (lon, lat) = srs.to_4326(px, py);
            expanded = expanded.expand_to_points(&[(lon, lat)]);
        }

        let (width, height) = resolve_size(size);
        let z = first_layer.projection.zoom_for_bbox(
            &expanded,
            (height, width),
            first_layer.min_zoom,
            first_layer.max_zoom,
            (self.max_height, self.max_width),
        );

        let (fx, fy, tx, ty) = first_layer.projection.tile_by_bbox(&expanded, z);
        let fx_i = fx.floor() as i64;
        let fy_i = fy.ceil() as i64 - 1;
        let tx_i = tx.ceil() as i64 - 1;
        let ty_i = ty.floor() as i64;

        let mut base: Option<RgbaImage> = None;
        for (i, layer_id) in layer_ids.iter().enumerate() {
            let layer = self.layer(layer_id)?;
            let mut canvas = self
                .render_tile_grid(&layer, z, fx_i, fy_i, tx_i, ty_i)
                .await?;

            if i > 0 {
                if let Some(delta) = Some(layer.empty_color_delta).filter(|d| *d > 0) {
                    alpha_zero_near(&mut canvas, layer.empty_color, delta);
                }
            }

            base = Some(match base {
                None => canvas,
                Some(existing) => {
                    if force.noblend {
                        canvas
                    } else {
                        alpha_blend_half(existing, canvas)
                    }
                }
            });
        }
        let mut canvas = base.expect("layer_ids non-empty, checked above");

        let crop_x = ((fx - fx.floor()) * 256.0).round() as u32;
        let crop_y = ((ty - ty.floor()) * 256.0).round() as u32;
        let cut_to_x = ((tx - tx_i as f64) * 256.0).round() as u32;
        let cut_from_y = ((fy - fy_i as f64) * 256.0).round() as u32;
        #[allow(clippy::cast_sign_loss)]
        let crop_width = 256 * (tx_i - fx_i) as u32 + cut_to_x - crop_x;
        #[allow(clippy::cast_sign_loss)]
        let crop_height = 256 * (fy_i - ty_i) as u32 + cut_from_y - crop_y;
        let cropped = imageops::crop(&mut canvas, crop_x, crop_y, crop_width, crop_height).to_image();

        let mut resized = if force.noresize {
            cropped
        } else {
            imageops::resize(&cropped, width, height, imageops::FilterType::CatmullRom)
        };

        if flip_h {
            imageops::flip_vertical_in_place(&mut resized);
        }

        let bytes = codec::encode(&resized, first_layer.mimetype, &EncodeOptions { background: first_layer.empty_color, ..EncodeOptions::default() })?;
        Ok(RenderedImage { bytes, mimetype: first_layer.mimetype })
    }

    async fn render_tile_grid(
        &self,
        layer: &Layer,
        z: u8,
        fx: i64,
        fy: i64,
        tx: i64,
        ty: i64,
    ) -> TwmsResult<RgbaImage> {
        let cols = (tx - fx + 1).max(1);
        let rows = (fy - ty + 1).max(1);
        #[allow(clippy::cast_sign_loss)]
        let mut canvas = RgbaImage::new(256 * cols as u32, 256 * rows as u32);

        for row in 0..rows {
            for col in 0..cols {
                let x = fx + col;
                let y = ty + row;
                let tile = self.engine.tile_image(&layer.id, z, x, y, true, true).await?;
                #[allow(clippy::cast_possible_truncation)]
                let (px, py) = (col as i64 * 256, row as i64 * 256);
                match tile {
                    Some(decoded) => imageops::overlay(&mut canvas, &decoded.rgba, px, py),
                    None => fill_rect(&mut canvas, px, py, 256, 256, layer.empty_color),
                }
            }
        }
        Ok(canvas)
    }
}

fn resolve_size(size: (u32, u32)) -> (u32, u32) {
    match size {
        (0, 0) => (DEFAULT_SIZE, DEFAULT_SIZE),
        (0, h) => (h, h),
        (w, 0) => (w, w),
        (w, h) => (w, h),
    }
}

fn fill_rect(canvas: &mut RgbaImage, x0: i64, y0: i64, w: u32, h: u32, color: crate::layer::Color) {
    let pixel = image::Rgba([color.r, color.g, color.b, color.a]);
    for dy in 0..h {
        for dx in 0..w {
            let (x, y) = (x0 + i64::from(dx), y0 + i64::from(dy));
            if x >= 0 && y >= 0 {
                #[allow(clippy::cast_sign_loss)]
                if let Some(p) = canvas.get_pixel_mut_checked(x as u32, y as u32) {
                    *p = pixel;
                }
            }
        }
    }
}

fn alpha_zero_near(canvas: &mut RgbaImage, color: crate::layer::Color, delta: u8) {
    for pixel in canvas.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let close = |a: u8, b: u8| a.abs_diff(b) <= delta;
        if close(r, color.r) && close(g, color.g) && close(b, color.b) {
            pixel.0[3] = 0;
        }
    }
}

fn alpha_blend_half(mut base: RgbaImage, overlay: RgbaImage) -> RgbaImage {
    for (bp, op) in base.pixels_mut().zip(overlay.pixels()) {
        let oa = f32::from(op.0[3]) / 255.0;
        let weight = 0.5 * oa;
        for channel in 0..3 {
            let blended = f32::from(op.0[channel]) * weight + f32::from(bp.0[channel]) * (1.0 - weight);
            bp.0[channel] = blended.round() as u8;
        }
        bp.0[3] = bp.0[3].max(op.0[3]);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_size_defaults_when_both_zero() {
        assert_eq!(resolve_size((0, 0)), (DEFAULT_SIZE, DEFAULT_SIZE));
    }

    #[test]
    fn resolve_size_preserves_aspect_when_one_zero() {
        assert_eq!(resolve_size((0, 512)), (512, 512));
        assert_eq!(resolve_size((512, 0)), (512, 512));
    }

    #[test]
    fn alpha_zero_near_clears_matching_pixels() {
        let mut img = RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 255, 255]));
        alpha_zero_near(&mut img, crate::layer::Color::WHITE, 0);
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }
}
