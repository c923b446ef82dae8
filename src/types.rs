use geo::{Coord, LineString};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, JsonObject, JsonValue, Value};

/// Simulated severity for one region. Always inside `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Threat(f64);

impl Threat {
    /// Largest representable value below 1.0.
    pub const MAX: Threat = Threat(1.0 - f64::EPSILON / 2.0);

    pub fn new(value: f64) -> Option<Self> {
        (0.0..1.0).contains(&value).then_some(Self(value))
    }

    /// Pins any input into the `[0, 1)` domain. NaN maps to zero.
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() || value < 0.0 {
            Self(0.0)
        } else if value >= 1.0 {
            Self::MAX
        } else {
            Self(value)
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Boundary geometry of a region, tagged by kind.
///
/// Rings are kept exactly as they appear in the source document (a closing
/// vertex stays duplicated), since the representative point is an average
/// over the listed vertices.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Vec<LineString<f64>>),
    MultiPolygon(Vec<Vec<LineString<f64>>>),
    /// Any other GeoJSON geometry; carried through untouched.
    Other(Value),
    Missing,
}

impl Geometry {
    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::Other(value) => match value {
                Value::Point(_) => "Point",
                Value::MultiPoint(_) => "MultiPoint",
                Value::LineString(_) => "LineString",
                Value::MultiLineString(_) => "MultiLineString",
                Value::Polygon(_) => "Polygon",
                Value::MultiPolygon(_) => "MultiPolygon",
                Value::GeometryCollection(_) => "GeometryCollection",
            },
            Geometry::Missing => "None",
        }
    }

    pub fn to_geojson(&self) -> Option<geojson::Geometry> {
        let value = match self {
            Geometry::Polygon(rings) => Value::Polygon(rings_to_positions(rings)),
            Geometry::MultiPolygon(polygons) => {
                Value::MultiPolygon(polygons.iter().map(|rings| rings_to_positions(rings)).collect())
            }
            Geometry::Other(value) => value.clone(),
            Geometry::Missing => return None,
        };
        Some(geojson::Geometry::new(value))
    }
}

fn rings_to_positions(rings: &[LineString<f64>]) -> Vec<Vec<Vec<f64>>> {
    rings
        .iter()
        .map(|ring| ring.coords().map(|c| vec![c.x, c.y]).collect())
        .collect()
}

/// A validated boundary feature as read from the dataset, before any threat
/// value has been attached.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    pub id: Option<Id>,
    pub name: String,
    pub geometry: Geometry,
    /// Remaining attributes of the source feature, minus name and threat.
    pub properties: JsonObject,
}

/// One region's boundary with its current threat value.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    pub(crate) boundary: BoundaryFeature,
    pub(crate) threat: Threat,
}

impl PolygonFeature {
    pub fn name(&self) -> &str {
        &self.boundary.name
    }

    pub fn geometry(&self) -> &Geometry {
        &self.boundary.geometry
    }

    pub fn threat(&self) -> Threat {
        self.threat
    }

    fn to_geojson(&self) -> Feature {
        let mut properties = self.boundary.properties.clone();
        properties.insert("name".to_string(), JsonValue::from(self.boundary.name.clone()));
        properties.insert("threat".to_string(), JsonValue::from(self.threat.value()));
        Feature {
            bbox: None,
            geometry: self.boundary.geometry.to_geojson(),
            id: self.boundary.id.clone(),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Marker derived from a region: its representative coordinate plus a copy
/// of the region's name and threat value.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeature {
    pub(crate) name: String,
    pub(crate) position: Coord<f64>,
    pub(crate) positioned: bool,
    pub(crate) threat: Threat,
}

impl PointFeature {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Coord<f64> {
        self.position
    }

    /// False when the region had no usable geometry and sits at the fallback coordinate.
    pub fn is_positioned(&self) -> bool {
        self.positioned
    }

    pub fn threat(&self) -> Threat {
        self.threat
    }

    fn to_geojson(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("name".to_string(), JsonValue::from(self.name.clone()));
        properties.insert("threat".to_string(), JsonValue::from(self.threat.value()));
        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(Value::Point(vec![
                self.position.x,
                self.position.y,
            ]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonCollection {
    pub(crate) features: Vec<PolygonFeature>,
}

impl PolygonCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PolygonFeature> {
        self.features.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolygonFeature> {
        self.features.iter()
    }

    pub fn to_geojson(&self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features.iter().map(PolygonFeature::to_geojson).collect(),
            foreign_members: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCollection {
    pub(crate) features: Vec<PointFeature>,
}

impl PointCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PointFeature> {
        self.features.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PointFeature> {
        self.features.iter()
    }

    pub fn to_geojson(&self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features: self.features.iter().map(PointFeature::to_geojson).collect(),
            foreign_members: None,
        }
    }
}
