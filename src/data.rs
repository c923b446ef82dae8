use crate::error::LoadError;
use crate::types::{BoundaryFeature, Geometry};
use geo::{Coord, LineString};
use geojson::{Feature, GeoJson, JsonValue, Value};
use std::path::PathBuf;
use tracing::{debug, info};

/// Where the boundary feature collection is read from.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    Url(String),
    File(PathBuf),
}

impl std::fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetSource::Url(url) => write!(f, "{url}"),
            DatasetSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub async fn load_boundaries(
    source: &DatasetSource,
    name_property: &str,
) -> Result<Vec<BoundaryFeature>, LoadError> {
    info!(%source, "Loading boundary dataset");
    let document = fetch_document(source).await?;
    let boundaries = parse_boundaries(&document, name_property)?;
    info!(regions = boundaries.len(), "Boundary dataset loaded");
    Ok(boundaries)
}

pub async fn fetch_document(source: &DatasetSource) -> Result<String, LoadError> {
    match source {
        DatasetSource::Url(url) => {
            let response = reqwest::get(url)
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| LoadError::Fetch(format!("{url}: {e}")))?;
            response
                .text()
                .await
                .map_err(|e| LoadError::Fetch(format!("{url}: {e}")))
        }
        DatasetSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LoadError::Fetch(format!("{}: {e}", path.display()))),
    }
}

/// Validates a GeoJSON document into typed boundary features, preserving
/// document order.
pub fn parse_boundaries(
    document: &str,
    name_property: &str,
) -> Result<Vec<BoundaryFeature>, LoadError> {
    let geojson: GeoJson = document
        .parse()
        .map_err(|e: geojson::Error| LoadError::Parse(e.to_string()))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(LoadError::Parse(
                "document must be a FeatureCollection".to_string(),
            ))
        }
    };

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| boundary_feature(index, feature, name_property))
        .collect()
}

fn boundary_feature(
    index: usize,
    feature: Feature,
    name_property: &str,
) -> Result<BoundaryFeature, LoadError> {
    let mut properties = feature.properties.unwrap_or_default();

    let name = match properties.remove(name_property) {
        Some(JsonValue::String(s)) => s,
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => {
            return Err(LoadError::Parse(format!(
                "feature {index} has no `{name_property}` property"
            )))
        }
    };
    // Overwritten on every tick anyway.
    properties.remove("threat");

    let geometry = match feature.geometry {
        Some(geometry) => convert_geometry(index, geometry.value)?,
        None => Geometry::Missing,
    };
    if !matches!(geometry, Geometry::Polygon(_) | Geometry::MultiPolygon(_)) {
        debug!(index, %name, kind = geometry.kind(), "Region has no polygon boundary");
    }

    Ok(BoundaryFeature {
        id: feature.id,
        name,
        geometry,
        properties,
    })
}

fn convert_geometry(index: usize, value: Value) -> Result<Geometry, LoadError> {
    match value {
        Value::Polygon(rings) => Ok(Geometry::Polygon(convert_rings(index, rings)?)),
        Value::MultiPolygon(polygons) => polygons
            .into_iter()
            .map(|rings| convert_rings(index, rings))
            .collect::<Result<Vec<_>, _>>()
            .map(Geometry::MultiPolygon),
        other => Ok(Geometry::Other(other)),
    }
}

fn convert_rings(index: usize, rings: Vec<Vec<Vec<f64>>>) -> Result<Vec<LineString<f64>>, LoadError> {
    rings
        .into_iter()
        .map(|ring| {
            ring.into_iter()
                .map(|position| match position.as_slice() {
                    [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
                    _ => Err(LoadError::Parse(format!(
                        "feature {index} has an invalid position {position:?}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(LineString::new)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_REGIONS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": "ATL",
                "properties": { "name": "Atlantis", "continent": "Oceanus" },
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,2]]] }
            },
            {
                "type": "Feature",
                "properties": { "name": "Lemuria", "threat": 0.4 },
                "geometry": { "type": "MultiPolygon", "coordinates": [[[[0,0],[4,0],[4,4],[0,4]]], [[[100,100],[102,100],[102,102]]]] }
            }
        ]
    }"#;

    #[test]
    fn parses_feature_collection_in_order() {
        let boundaries = parse_boundaries(TWO_REGIONS, "name").unwrap();
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].name, "Atlantis");
        assert_eq!(boundaries[0].properties["continent"], "Oceanus");
        assert!(boundaries[0].id.is_some());
        assert!(matches!(&boundaries[0].geometry, Geometry::Polygon(rings) if rings[0].0.len() == 4));
        assert_eq!(boundaries[1].name, "Lemuria");
        assert!(!boundaries[1].properties.contains_key("threat"));
        assert!(matches!(&boundaries[1].geometry, Geometry::MultiPolygon(polys) if polys.len() == 2));
    }

    #[test]
    fn other_geometry_kinds_are_kept_not_rejected() {
        let doc = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"name":"Mu"},"geometry":{"type":"LineString","coordinates":[[1,1],[2,2]]}},
            {"type":"Feature","properties":{"name":"Hy-Brasil"},"geometry":null}
        ]}"#;
        let boundaries = parse_boundaries(doc, "name").unwrap();
        assert_eq!(boundaries[0].geometry.kind(), "LineString");
        assert_eq!(boundaries[1].geometry, Geometry::Missing);
    }

    #[test]
    fn numeric_names_are_accepted() {
        let doc = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"code":250},"geometry":null}
        ]}"#;
        let boundaries = parse_boundaries(doc, "code").unwrap();
        assert_eq!(boundaries[0].name, "250");
    }

    #[test]
    fn rejects_documents_that_are_not_collections() {
        let single = r#"{"type":"Feature","properties":{"name":"Atlantis"},"geometry":null}"#;
        assert!(matches!(parse_boundaries(single, "name"), Err(LoadError::Parse(_))));
        assert!(matches!(parse_boundaries("not json", "name"), Err(LoadError::Parse(_))));
    }

    #[test]
    fn rejects_features_without_a_name() {
        let doc = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"label":"Atlantis"},"geometry":null}
        ]}"#;
        let err = parse_boundaries(doc, "name").unwrap_err();
        assert!(matches!(err, LoadError::Parse(msg) if msg.contains("feature 0")));
    }

    #[tokio::test]
    async fn loads_from_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_REGIONS.as_bytes()).unwrap();

        let source = DatasetSource::File(file.path().to_path_buf());
        let boundaries = load_boundaries(&source, "name").await.unwrap();
        assert_eq!(boundaries.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = DatasetSource::File(dir.path().join("absent.geojson"));
        let err = load_boundaries(&source, "name").await.unwrap_err();
        assert!(matches!(err, LoadError::Fetch(_)));
    }
}
