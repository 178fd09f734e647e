use crate::error::ReconcileError;
use crate::models::{Location, MapSettings};
use crate::profile::{EntityProfile, LocationKind, COUNT_COLUMN};
use crate::reconcile::Combined;
use log::debug;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::OnceLock;

const MATCHED_FILL: &str = "#48BB88";
const MARKER_COLOR: &str = "#006DB6";

/// A standalone Leaflet page for one map maker run.
#[derive(Debug, Clone)]
pub struct MapDocument {
    pub title: String,
    pub center: [f64; 2],
    pub zoom: u8,
    pub label: String,
    pub location_kind: LocationKind,
    pub entities: Value,
    pub outline: Option<Value>,
}

impl MapDocument {
    /// Polygon kinds carry every reference entity with its Count; point kinds only the
    /// matched locations.
    pub fn build(
        profile: &EntityProfile,
        combined: &Combined<'_>,
        settings: &MapSettings,
        outline: Option<Value>,
    ) -> Self {
        let entities = match profile.location_kind {
            LocationKind::Polygon => boundary_features(profile, combined),
            LocationKind::Point => point_markers(combined),
        };

        Self {
            title: format!("{} Map", profile.label),
            center: settings.center,
            zoom: settings.zoom,
            label: profile.label.to_string(),
            location_kind: profile.location_kind,
            entities,
            outline,
        }
    }

    pub fn render(&self) -> Result<String, ReconcileError> {
        let options = json!({
            "center": self.center,
            "zoom": self.zoom,
            "label": self.label,
            "kind": match self.location_kind {
                LocationKind::Polygon => "polygon",
                LocationKind::Point => "point",
            },
            "matchedFill": MATCHED_FILL,
            "markerColor": MARKER_COLOR,
        });

        let title = escape_html(&self.title);
        let options = embed_json(&options)?;
        let entities = embed_json(&self.entities)?;
        let outline = embed_json(self.outline.as_ref().unwrap_or(&Value::Null))?;

        // One pass, so inserted data is never rescanned for placeholders
        let page = placeholder().replace_all(PAGE_TEMPLATE, |caps: &Captures<'_>| match &caps[1] {
            "TITLE" => title.clone(),
            "OPTIONS" => options.clone(),
            "ENTITIES" => entities.clone(),
            _ => outline.clone(),
        });
        Ok(page.into_owned())
    }
}

/// Read the optional state outline drawn beneath the entities.
pub fn load_outline(path: &Path) -> Result<Option<Value>, ReconcileError> {
    if !path.exists() {
        debug!("no state outline at {}", path.display());
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn boundary_features(profile: &EntityProfile, combined: &Combined<'_>) -> Value {
    let features: Vec<Value> = combined
        .rows
        .iter()
        .map(|row| {
            let mut properties = Map::new();
            for (key, value) in &row.entity.attributes {
                properties.insert(key.clone(), Value::String(value.clone()));
            }
            for column in &combined.user_columns {
                properties.insert(column.clone(), Value::String(row.user_value(column).to_string()));
            }
            properties.insert(profile.name_column().to_string(), Value::String(row.entity.name.clone()));
            properties.insert(profile.code_column(), Value::String(row.entity.code.clone()));
            properties.insert(COUNT_COLUMN.to_string(), json!(row.count));

            let geometry = match &row.entity.location {
                Location::Polygon(geometry) => geometry.clone(),
                Location::Point { latitude, longitude } => {
                    json!({"type": "Point", "coordinates": [longitude, latitude]})
                }
                Location::None => Value::Null,
            };

            json!({
                "type": "Feature",
                "geometry": geometry,
                "properties": properties,
            })
        })
        .collect();

    json!({"type": "FeatureCollection", "features": features})
}

fn point_markers(combined: &Combined<'_>) -> Value {
    let markers: Vec<Value> = combined
        .rows
        .iter()
        .filter(|row| row.is_matched())
        .filter_map(|row| match row.entity.location {
            Location::Point { latitude, longitude } => Some(json!({
                "latitude": latitude,
                "longitude": longitude,
                "name": row.entity.name,
                "code": row.entity.code,
            })),
            _ => None,
        })
        .collect();

    Value::Array(markers)
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"__(TITLE|OPTIONS|ENTITIES|OUTLINE)__").expect("static pattern"))
}

// JSON inside <script> must not contain a closing tag
fn embed_json(value: &Value) -> Result<String, ReconcileError> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>__TITLE__</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map { height: 100%; margin: 0; }</style>
</head>
<body>
<div id="map"></div>
<script type="application/json" id="map-options">__OPTIONS__</script>
<script type="application/json" id="map-entities">__ENTITIES__</script>
<script type="application/json" id="map-outline">__OUTLINE__</script>
<script>
(function () {
  function read(id) { return JSON.parse(document.getElementById(id).textContent); }
  function escapeHtml(text) {
    var div = document.createElement("div");
    div.textContent = String(text);
    return div.innerHTML;
  }

  var options = read("map-options");
  var entities = read("map-entities");
  var outline = read("map-outline");

  var map = L.map("map").setView(options.center, options.zoom);
  L.tileLayer("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png", {
    attribution: "&copy; OpenStreetMap contributors"
  }).addTo(map);

  if (outline) {
    L.geoJSON(outline, {
      style: { color: "black", weight: 1.5, fillOpacity: 0.0, opacity: 1 }
    }).addTo(map);
  }

  if (options.kind === "polygon") {
    L.geoJSON(entities, {
      style: function (feature) {
        var count = feature.properties.Count || 0;
        return {
          fillColor: count > 0 ? options.matchedFill : "white",
          color: "black",
          weight: 0.15,
          fillOpacity: count > 0 ? 0.7 : 0.25,
          opacity: 0.4
        };
      },
      onEachFeature: function (feature, layer) {
        layer.bindTooltip(escapeHtml(options.label) + ": " + escapeHtml(feature.properties[options.label]));
      }
    }).addTo(map);
  } else {
    entities.forEach(function (entity) {
      L.circleMarker([entity.latitude, entity.longitude], {
        radius: 8,
        stroke: false,
        fill: true,
        fillColor: options.markerColor,
        fillOpacity: 0.6
      }).bindPopup(escapeHtml(entity.name)).addTo(map);
    });
  }
})();
</script>
</body>
</html>
"#;
