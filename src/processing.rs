use crate::error::LoadError;
use crate::feed::ThreatFeed;
use crate::types::{
    BoundaryFeature, Geometry, PointCollection, PointFeature, PolygonCollection, PolygonFeature,
};
use geo::{Coord, LineString};

/// Coordinate given to regions without usable geometry.
pub const UNPOSITIONED: Coord<f64> = Coord { x: 0.0, y: 0.0 };

/// Outer ring of a polygon, or of the first sub-polygon of a multi-polygon.
/// Holes and secondary landmasses are never consulted.
pub fn outer_ring(geometry: &Geometry) -> Option<&LineString<f64>> {
    let ring = match geometry {
        Geometry::Polygon(rings) => rings.first(),
        Geometry::MultiPolygon(polygons) => polygons.first().and_then(|rings| rings.first()),
        Geometry::Other(_) | Geometry::Missing => None,
    }?;
    (!ring.0.is_empty()).then_some(ring)
}

/// Vertex average of the outer ring; `UNPOSITIONED` when there is none.
pub fn representative_point(geometry: &Geometry) -> Coord<f64> {
    let Some(ring) = outer_ring(geometry) else {
        return UNPOSITIONED;
    };

    let (sum_x, sum_y) = ring
        .coords()
        .fold((0.0, 0.0), |(x, y), c| (x + c.x, y + c.y));
    let count = ring.0.len() as f64;

    Coord { x: sum_x / count, y: sum_y / count }
}

/// Boundary polygons and their derived markers, index-aligned.
///
/// Both collections are only reachable read-only from outside, and the only
/// mutation is [`AlignedDatasets::refresh`], which writes each drawn value to
/// both sides in the same step.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedDatasets {
    polygons: PolygonCollection,
    points: PointCollection,
}

impl AlignedDatasets {
    pub fn build<F: ThreatFeed + ?Sized>(
        boundaries: Vec<BoundaryFeature>,
        feed: &mut F,
    ) -> Result<Self, LoadError> {
        if boundaries.is_empty() {
            return Err(LoadError::Alignment(
                "boundary dataset contains no features".to_string(),
            ));
        }

        let mut polygons = Vec::with_capacity(boundaries.len());
        let mut points = Vec::with_capacity(boundaries.len());

        for boundary in boundaries {
            let positioned = outer_ring(&boundary.geometry).is_some();
            let position = representative_point(&boundary.geometry);
            let threat = feed.next_threat();

            points.push(PointFeature {
                name: boundary.name.clone(),
                position,
                positioned,
                threat,
            });
            polygons.push(PolygonFeature { boundary, threat });
        }

        let datasets = Self {
            polygons: PolygonCollection { features: polygons },
            points: PointCollection { features: points },
        };

        if !datasets.is_aligned() {
            return Err(LoadError::Alignment(format!(
                "{} polygons but {} markers",
                datasets.polygons.len(),
                datasets.points.len()
            )));
        }

        Ok(datasets)
    }

    /// Draws one value per region and writes it into both collections.
    /// Geometry and marker positions are left untouched.
    pub fn refresh<F: ThreatFeed + ?Sized>(&mut self, feed: &mut F) {
        let pairs = self
            .polygons
            .features
            .iter_mut()
            .zip(self.points.features.iter_mut());

        for (polygon, point) in pairs {
            let threat = feed.next_threat();
            polygon.threat = threat;
            point.threat = threat;
        }
    }

    pub fn polygons(&self) -> &PolygonCollection {
        &self.polygons
    }

    pub fn points(&self) -> &PointCollection {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn is_aligned(&self) -> bool {
        self.polygons.len() == self.points.len()
            && self
                .polygons
                .iter()
                .zip(self.points.iter())
                .all(|(polygon, point)| {
                    polygon.name() == point.name() && polygon.threat() == point.threat()
                })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::UniformFeed;
    use geo::BoundingRect;
    use geojson::{JsonObject, Value};

    fn ring(points: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(points.to_vec())
    }

    fn boundary(name: &str, geometry: Geometry) -> BoundaryFeature {
        BoundaryFeature {
            id: None,
            name: name.to_string(),
            geometry,
            properties: JsonObject::new(),
        }
    }

    #[test]
    fn polygon_point_is_mean_of_outer_ring() {
        let square = Geometry::Polygon(vec![ring(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)])]);
        assert_eq!(representative_point(&square), Coord { x: 1.0, y: 1.0 });
    }

    #[test]
    fn polygon_holes_are_ignored() {
        let with_hole = Geometry::Polygon(vec![
            ring(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]),
            ring(&[(1.5, 1.5), (1.9, 1.5), (1.9, 1.9)]),
        ]);
        assert_eq!(representative_point(&with_hole), Coord { x: 1.0, y: 1.0 });
    }

    #[test]
    fn multipolygon_uses_first_outer_ring_only() {
        let islands = Geometry::MultiPolygon(vec![
            vec![ring(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)])],
            vec![ring(&[(100.0, 100.0), (102.0, 100.0), (102.0, 102.0), (100.0, 102.0)])],
        ]);
        assert_eq!(representative_point(&islands), Coord { x: 2.0, y: 2.0 });
    }

    #[test]
    fn degenerate_geometry_falls_back_to_origin() {
        let line = Geometry::Other(Value::LineString(vec![vec![5.0, 5.0], vec![6.0, 6.0]]));
        assert_eq!(representative_point(&line), UNPOSITIONED);
        assert_eq!(representative_point(&Geometry::Polygon(vec![LineString::new(vec![])])), UNPOSITIONED);
        assert_eq!(representative_point(&Geometry::Polygon(vec![])), UNPOSITIONED);
        assert_eq!(representative_point(&Geometry::MultiPolygon(vec![vec![]])), UNPOSITIONED);
        assert_eq!(representative_point(&Geometry::Missing), UNPOSITIONED);
    }

    #[test]
    fn point_lies_within_outer_ring_extent() {
        let shapes = [
            Geometry::Polygon(vec![ring(&[(-10.0, 35.0), (-3.0, 44.0), (3.0, 42.0), (-1.0, 36.0), (-10.0, 35.0)])]),
            Geometry::MultiPolygon(vec![
                vec![ring(&[(140.0, 30.0), (146.0, 45.0), (130.0, 33.0)])],
                vec![ring(&[(-170.0, -80.0), (-160.0, -70.0), (-150.0, -80.0)])],
            ]),
        ];

        for shape in &shapes {
            let point = representative_point(shape);
            let extent = outer_ring(shape).and_then(|r| r.bounding_rect()).unwrap();
            assert!(point.x >= extent.min().x && point.x <= extent.max().x);
            assert!(point.y >= extent.min().y && point.y <= extent.max().y);
        }
    }

    #[test]
    fn build_rejects_empty_dataset() {
        let err = AlignedDatasets::build(Vec::new(), &mut UniformFeed::seeded(1)).unwrap_err();
        assert!(matches!(err, LoadError::Alignment(_)));
    }

    #[test]
    fn build_seeds_both_collections_with_the_same_values() {
        let boundaries = vec![
            boundary("Atlantis", Geometry::Polygon(vec![ring(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)])])),
            boundary("Lemuria", Geometry::Missing),
        ];
        let datasets = AlignedDatasets::build(boundaries, &mut UniformFeed::seeded(9)).unwrap();

        assert_eq!(datasets.len(), 2);
        assert!(datasets.is_aligned());
        assert_eq!(datasets.points().get(0).unwrap().position(), Coord { x: 1.0, y: 1.0 });
        assert!(datasets.points().get(0).unwrap().is_positioned());
        assert!(!datasets.points().get(1).unwrap().is_positioned());
        assert_eq!(datasets.points().get(1).unwrap().name(), "Lemuria");
    }

    #[test]
    fn refresh_keeps_alignment_domain_and_positions() {
        let boundaries = (0..25)
            .map(|i| {
                let x = i as f64;
                boundary(
                    &format!("region-{i}"),
                    Geometry::Polygon(vec![ring(&[(x, 0.0), (x + 1.0, 0.0), (x + 1.0, 1.0)])]),
                )
            })
            .collect();
        let mut feed = UniformFeed::seeded(11);
        let mut datasets = AlignedDatasets::build(boundaries, &mut feed).unwrap();
        let positions: Vec<Coord<f64>> = datasets.points().iter().map(|p| p.position()).collect();
        let geometry = datasets.polygons().clone();

        for _ in 0..50 {
            datasets.refresh(&mut feed);
            assert!(datasets.is_aligned());
            for (polygon, point) in datasets.polygons().iter().zip(datasets.points().iter()) {
                assert_eq!(polygon.threat(), point.threat());
                assert!((0.0..1.0).contains(&point.threat().value()));
            }
        }

        let after: Vec<Coord<f64>> = datasets.points().iter().map(|p| p.position()).collect();
        assert_eq!(positions, after);
        for (before, now) in geometry.iter().zip(datasets.polygons().iter()) {
            assert_eq!(before.geometry(), now.geometry());
        }
    }
}
