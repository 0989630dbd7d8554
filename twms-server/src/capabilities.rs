//! WMTS capabilities document and HTML landing page, rendered from the
//! loaded layer table. Both are thin, string-templated adapters; the spec
//! names these as in-scope external surfaces (§1), not rendering engines.

use twms::Layer;

/// Renders a minimal WMTS 1.0.0 `GetCapabilities` document listing every
/// configured layer.
#[must_use]
pub fn wmts_capabilities(layers: &[&Layer]) -> String {
    let mut contents = String::new();
    for layer in layers {
        contents.push_str(&format!(
            r#"    <Layer>
      <ows:Title>{title}</ows:Title>
      <ows:Identifier>{id}</ows:Identifier>
      <ows:BoundingBox>
        <ows:LowerCorner>{lon_min} {lat_min}</ows:LowerCorner>
        <ows:UpperCorner>{lon_max} {lat_max}</ows:UpperCorner>
      </ows:BoundingBox>
      <Format>{mimetype}</Format>
    </Layer>
"#,
            title = xml_escape(&layer.display_name),
            id = xml_escape(&layer.id),
            lon_min = layer.bounds.lon_min,
            lat_min = layer.bounds.lat_min,
            lon_max = layer.bounds.lon_max,
            lat_max = layer.bounds.lat_max,
            mimetype = layer.mimetype.as_str(),
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
              xmlns:ows="http://www.opengis.net/ows/1.1"
              version="1.0.0">
  <Contents>
{contents}  </Contents>
</Capabilities>
"#
    )
}

/// Renders the HTML landing page listing every configured layer.
#[must_use]
pub fn landing_page(layers: &[&Layer]) -> String {
    let mut rows = String::new();
    for layer in layers {
        rows.push_str(&format!(
            "<li><strong>{id}</strong> - {title} ({mimetype}, zoom {min}-{max})</li>\n",
            id = xml_escape(&layer.id),
            title = xml_escape(&layer.display_name),
            mimetype = layer.mimetype.as_str(),
            min = layer.min_zoom,
            max = layer.max_zoom,
        ));
    }
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>twms</title></head>
<body>
<h1>twms tile server</h1>
<p>Configured layers:</p>
<ul>
{rows}</ul>
<p>
  <code>GET /wms?layers=...&amp;srs=...&amp;bbox=...&amp;width=...&amp;height=...&amp;format=...</code><br>
  <code>GET /tiles/{{layer}}/{{z}}/{{x}}/{{y}}.{{ext}}</code><br>
  <code>GET /wmts/1.0.0/WMTSCapabilities.xml</code>
</p>
</body>
</html>
"#
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use twms::bbox::Bbox;
    use twms::layer::{Color, FetchKind};
    use twms::{Mimetype, Projection};

    fn sample_layer() -> Layer {
        Layer {
            id: "osm".into(),
            display_name: "OpenStreetMap".into(),
            mimetype: Mimetype::Png,
            projection: Projection::Epsg3857,
            bounds: Bbox::new(-180.0, -85.0, 180.0, 85.0),
            min_zoom: 0,
            max_zoom: 19,
            scalable: false,
            overlay: false,
            empty_color: Color::WHITE,
            empty_color_delta: 0,
            cache_ttl: None,
            fetch_kind: FetchKind::Tms,
            remote_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".into(),
            tile_transform: None,
            http_headers: HashMap::new(),
            dead_tile: None,
        }
    }

    #[test]
    fn capabilities_includes_every_layer_identifier() {
        let layer = sample_layer();
        let xml = wmts_capabilities(&[&layer]);
        assert!(xml.contains("<ows:Identifier>osm</ows:Identifier>"));
    }

    #[test]
    fn landing_page_lists_layer_mimetype() {
        let layer = sample_layer();
        let html = landing_page(&[&layer]);
        assert!(html.contains("image/png"));
    }
}
