//! Axum router and request handlers (spec §6.2, Module L).
//!
//! Grounded on the teacher pack's only modern async web-framework example,
//! `GroundStation26`'s `backend/src/web.rs`: a `Router::new()` builder
//! wired to `Arc<AppState>`, handlers returning `impl IntoResponse`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use twms::{Bbox, Compositor, ForceFlags, Layer, Mimetype, TwmsError};

use crate::capabilities;

/// Shared state handed to every handler.
pub struct AppState {
    pub compositor: Compositor,
    pub layers: HashMap<Arc<str>, Arc<Layer>>,
}

/// Builds the router described in spec §6.2.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/wms", get(get_wms))
        .route("/wmts/1.0.0/WMTSCapabilities.xml", get(get_wmts_capabilities))
        .route("/tiles/{layer}/{z}/{x}/{y}.{ext}", get(get_tms_tile))
        .with_state(state)
}

async fn landing_page(State(state): State<Arc<AppState>>) -> Html<String> {
    let layers: Vec<&Layer> = state.layers.values().map(std::convert::AsRef::as_ref).collect();
    Html(capabilities::landing_page(&layers))
}

async fn get_wmts_capabilities(State(state): State<Arc<AppState>>) -> Response {
    let layers: Vec<&Layer> = state.layers.values().map(std::convert::AsRef::as_ref).collect();
    let xml = capabilities::wmts_capabilities(&layers);
    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

/// Normalised, case-folded WMS query parameters (spec §6.2).
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct WmsParams {
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub layers: Option<String>,
    #[serde(default, alias = "crs")]
    pub srs: Option<String>,
    #[serde(default)]
    pub bbox: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub force: Option<String>,
}

async fn get_wms(State(state): State<Arc<AppState>>, Query(params): Query<WmsParams>) -> Response {
    match handle_wms(&state, &params).await {
        Ok((mimetype, bytes)) => ([(header::CONTENT_TYPE, mimetype.as_str())], bytes).into_response(),
        Err(status_with_message) => status_with_message.into_response(),
    }
}

async fn handle_wms(state: &AppState, params: &WmsParams) -> Result<(Mimetype, Vec<u8>), (StatusCode, String)> {
    if params.request.as_deref() == Some("GetCapabilities") {
        let layers: Vec<&Layer> = state.layers.values().map(std::convert::AsRef::as_ref).collect();
        return Ok((Mimetype::Png, capabilities::wmts_capabilities(&layers).into_bytes()));
    }

    let layer_ids: Vec<String> = params
        .layers
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if layer_ids.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "missing layers parameter".into()));
    }

    let bbox = parse_bbox(params.bbox.as_deref().unwrap_or_default())
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let srs = params.srs.as_deref().unwrap_or("EPSG:3857");
    let size = (params.width.unwrap_or(0), params.height.unwrap_or(0));
    let force = ForceFlags::parse(
        &params.force.as_deref().unwrap_or_default().split(',').collect::<Vec<_>>(),
    );

    let rendered = state
        .compositor
        .render(bbox, size, srs, &layer_ids, force)
        .await
        .map_err(map_twms_error)?;
    Ok((rendered.mimetype, rendered.bytes))
}

fn parse_bbox(raw: &str) -> Result<Bbox, String> {
    let parts: Vec<f64> = raw.split(',').filter_map(|s| s.trim().parse().ok()).collect();
    match parts.as_slice() {
        [lon_min, lat_min, lon_max, lat_max] => Ok(Bbox::new(*lon_min, *lat_min, *lon_max, *lat_max)),
        _ => Err(format!("invalid bbox: {raw:?}")),
    }
}

async fn get_tms_tile(
    State(state): State<Arc<AppState>>,
    Path((layer, z, x, y, _ext)): Path<(String, u8, i64, i64, String)>,
) -> Response {
    match state.compositor.render_tms(&layer, z, x, y) {
        Some(bytes) => {
            let mimetype = state.layers.get(layer.as_str()).map_or(Mimetype::Png, |l| l.mimetype);
            ([(header::CONTENT_TYPE, mimetype.as_str())], bytes).into_response()
        }
        None => (StatusCode::NOT_FOUND, "tile not cached").into_response(),
    }
}

fn map_twms_error(err: TwmsError) -> (StatusCode, String) {
    let status = match err {
        TwmsError::UnknownLayer(_) => StatusCode::NOT_FOUND,
        TwmsError::UnsupportedProjection(_) | TwmsError::UnsupportedMimetype(_) | TwmsError::InvalidBbox(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bbox_accepts_four_floats() {
        let bbox = parse_bbox("10,20,30,40").unwrap();
        assert_eq!(bbox.as_tuple(), (10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn parse_bbox_rejects_wrong_arity() {
        assert!(parse_bbox("10,20,30").is_err());
    }
}
