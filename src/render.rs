use crate::engine::{EngineError, RenderEngine, SourceHandle, SurfaceConfig};
use crate::style::{LayerSpec, Paint, THREAT_PROPERTY};
use geojson::{FeatureCollection, Value};
use image::{ImageBuffer, Rgba, RgbaImage};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Headless engine that rasterises the globe layers onto an equirectangular
/// world image and writes a PNG every time a marker source is updated.
pub struct RasterEngine {
    width: u32,
    height: u32,
    out_dir: PathBuf,
    surface: Option<SurfaceConfig>,
    sources: HashMap<String, FeatureCollection>,
    layers: Vec<LayerSpec>,
    frames: u64,
}

impl RasterEngine {
    pub fn new(width: u32, height: u32, out_dir: PathBuf) -> Self {
        Self {
            width,
            height,
            out_dir,
            surface: None,
            sources: HashMap::new(),
            layers: Vec::new(),
            frames: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Longitude/latitude to pixel, centred on the surface's longitude.
    fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let center_lon = self.surface.as_ref().map_or(0.0, |s| s.center[0]);
        let shifted = (lon - center_lon + 540.0).rem_euclid(360.0);
        let x = shifted / 360.0 * self.width as f64;
        let y = (90.0 - lat) / 180.0 * self.height as f64;
        (x, y)
    }

    fn project_position(&self, position: &[f64]) -> Option<(f64, f64)> {
        match position {
            [lon, lat, ..] => Some(self.project(*lon, *lat)),
            _ => None,
        }
    }

    pub fn render_frame(&self) -> RgbaImage {
        let mut img: RgbaImage = ImageBuffer::from_pixel(self.width, self.height, BACKGROUND);

        for layer in &self.layers {
            let Some(data) = self.sources.get(&layer.source) else {
                continue;
            };
            match &layer.paint {
                Paint::Line(line) => {
                    for ring in data.features.iter().filter_map(|f| f.geometry.as_ref()).flat_map(|g| outer_rings(&g.value)) {
                        for pair in ring.windows(2) {
                            let (Some(a), Some(b)) = (self.project_position(&pair[0]), self.project_position(&pair[1])) else {
                                continue;
                            };
                            // Skip segments that cross the antimeridian seam.
                            if (a.0 - b.0).abs() > self.width as f64 / 2.0 {
                                continue;
                            }
                            draw_line(&mut img, a, b, line.color);
                        }
                    }
                }
                Paint::Circle(circle) => {
                    for feature in &data.features {
                        let Some(Value::Point(position)) = feature.geometry.as_ref().map(|g| &g.value) else {
                            continue;
                        };
                        let [lon, lat, ..] = position.as_slice() else {
                            continue;
                        };
                        let threat = feature
                            .properties
                            .as_ref()
                            .and_then(|p| p.get(THREAT_PROPERTY))
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.0);
                        let (radius, color) = circle.resolve(threat);
                        let center = self.project(*lon, *lat);
                        fill_circle(&mut img, center, radius, color, circle.opacity);
                    }
                }
            }
        }

        img
    }

    fn write_frame(&mut self) -> Result<(), EngineError> {
        self.frames += 1;
        let path = self.out_dir.join(format!("frame_{:05}.png", self.frames));
        self.render_frame()
            .save(&path)
            .map_err(|e| EngineError::Backend(format!("failed to save {}: {e}", path.display())))?;
        debug!(path = %path.display(), "Frame written");
        Ok(())
    }

    fn draws_markers(&self, source: &str) -> bool {
        self.layers
            .iter()
            .any(|l| l.source == source && matches!(l.paint, Paint::Circle(_)))
    }
}

fn outer_rings(value: &Value) -> Vec<&Vec<Vec<f64>>> {
    match value {
        Value::Polygon(rings) => rings.first().into_iter().collect(),
        Value::MultiPolygon(polygons) => polygons.iter().filter_map(|rings| rings.first()).collect(),
        _ => Vec::new(),
    }
}

fn draw_line(img: &mut RgbaImage, a: (f64, f64), b: (f64, f64), color: Rgba<u8>) {
    let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as u32;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = a.0 + (b.0 - a.0) * t;
        let y = a.1 + (b.1 - a.1) * t;
        if x >= 0.0 && y >= 0.0 && (x as u32) < img.width() && (y as u32) < img.height() {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn fill_circle(img: &mut RgbaImage, center: (f64, f64), radius: f64, color: Rgba<u8>, opacity: f64) {
    let (cx, cy) = center;
    let min_x = (cx - radius).floor().max(0.0) as u32;
    let min_y = (cy - radius).floor().max(0.0) as u32;
    let max_x = ((cx + radius).ceil().max(0.0) as u32).min(img.width().saturating_sub(1));
    let max_y = ((cy + radius).ceil().max(0.0) as u32).min(img.height().saturating_sub(1));

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let under = *img.get_pixel(x, y);
            img.put_pixel(x, y, blend(under, color, opacity));
        }
    }
}

fn blend(under: Rgba<u8>, over: Rgba<u8>, opacity: f64) -> Rgba<u8> {
    let alpha = opacity.clamp(0.0, 1.0);
    let mix = |u: u8, o: u8| (u as f64 * (1.0 - alpha) + o as f64 * alpha).round() as u8;
    Rgba([mix(under[0], over[0]), mix(under[1], over[1]), mix(under[2], over[2]), 255])
}

pub struct RasterSource<'a> {
    engine: &'a mut RasterEngine,
    id: String,
}

impl SourceHandle for RasterSource<'_> {
    fn set_data(&mut self, data: &FeatureCollection) -> Result<(), EngineError> {
        self.engine.sources.insert(self.id.clone(), data.clone());
        if self.engine.draws_markers(&self.id) {
            self.engine.write_frame()?;
        }
        Ok(())
    }
}

impl RenderEngine for RasterEngine {
    type Source<'a> = RasterSource<'a>;

    fn create_surface(&mut self, config: &SurfaceConfig) -> Result<(), EngineError> {
        if self.surface.is_some() {
            return Err(EngineError::SurfaceExists);
        }
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::Backend("raster size must be non-zero".to_string()));
        }
        fs::create_dir_all(&self.out_dir).map_err(|e| {
            EngineError::Backend(format!("failed to create {}: {e}", self.out_dir.display()))
        })?;
        info!(width = self.width, height = self.height, out_dir = %self.out_dir.display(), "Raster surface created");
        self.surface = Some(config.clone());
        Ok(())
    }

    fn add_source(&mut self, id: &str, data: &FeatureCollection) -> Result<(), EngineError> {
        if self.surface.is_none() {
            return Err(EngineError::NoSurface);
        }
        if self.sources.contains_key(id) {
            return Err(EngineError::DuplicateSource(id.to_string()));
        }
        self.sources.insert(id.to_string(), data.clone());
        Ok(())
    }

    fn add_layer(&mut self, layer: &LayerSpec) -> Result<(), EngineError> {
        if self.surface.is_none() {
            return Err(EngineError::NoSurface);
        }
        if self.layers.iter().any(|l| l.id == layer.id) {
            return Err(EngineError::DuplicateLayer(layer.id.clone()));
        }
        if !self.sources.contains_key(&layer.source) {
            return Err(EngineError::UnknownSource(layer.source.clone()));
        }
        self.layers.push(layer.clone());
        Ok(())
    }

    fn source(&mut self, id: &str) -> Option<RasterSource<'_>> {
        if self.surface.is_none() || !self.sources.contains_key(id) {
            return None;
        }
        Some(RasterSource {
            engine: self,
            id: id.to_string(),
        })
    }

    fn release_surface(&mut self) {
        self.surface = None;
        self.sources.clear();
        self.layers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{border_layer, marker_layer, BORDER_SOURCE, MARKER_SOURCE};
    use serde_json::json;

    fn collection(value: serde_json::Value) -> FeatureCollection {
        serde_json::from_value(value).unwrap()
    }

    fn markers(threat: f64) -> FeatureCollection {
        collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "name": "Atlantis", "threat": threat },
                "geometry": { "type": "Point", "coordinates": [0.0, 0.0] }
            }]
        }))
    }

    fn mounted(dir: &std::path::Path) -> RasterEngine {
        let mut engine = RasterEngine::new(360, 180, dir.to_path_buf());
        let config = SurfaceConfig { center: [0.0, 0.0], ..SurfaceConfig::default() };
        engine.create_surface(&config).unwrap();
        engine.add_source(MARKER_SOURCE, &markers(0.0)).unwrap();
        engine.add_layer(&marker_layer()).unwrap();
        engine
    }

    #[test]
    fn marker_colour_follows_threat() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = mounted(dir.path());

        engine.source(MARKER_SOURCE).unwrap().set_data(&markers(0.99)).unwrap();
        let frame = engine.render_frame();
        let pixel = frame.get_pixel(180, 90);
        assert!(pixel[0] > 200 && pixel[2] < 80, "expected a red marker, got {pixel:?}");
        assert_eq!(*frame.get_pixel(10, 10), BACKGROUND);
    }

    #[test]
    fn each_marker_update_writes_a_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = mounted(dir.path());

        for threat in [0.1, 0.6] {
            engine.source(MARKER_SOURCE).unwrap().set_data(&markers(threat)).unwrap();
        }
        assert_eq!(engine.frames_written(), 2);
        assert!(dir.path().join("frame_00002.png").exists());
    }

    #[test]
    fn border_updates_do_not_write_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = mounted(dir.path());
        let borders = collection(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "name": "Atlantis", "threat": 0.3 },
                "geometry": { "type": "Polygon", "coordinates": [[[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, -10.0]]] }
            }]
        }));
        engine.add_source(BORDER_SOURCE, &borders).unwrap();
        engine.add_layer(&border_layer()).unwrap();

        engine.source(BORDER_SOURCE).unwrap().set_data(&borders).unwrap();
        assert_eq!(engine.frames_written(), 0);
        let frame = engine.render_frame();
        assert_eq!(*frame.get_pixel(170, 100), Rgba([34, 34, 34, 255]));
    }

    #[test]
    fn rejects_registration_before_surface_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut bare = RasterEngine::new(10, 10, dir.path().to_path_buf());
        assert_eq!(bare.add_source(MARKER_SOURCE, &markers(0.0)), Err(EngineError::NoSurface));

        let mut engine = mounted(dir.path());
        assert_eq!(
            engine.add_source(MARKER_SOURCE, &markers(0.0)),
            Err(EngineError::DuplicateSource(MARKER_SOURCE.to_string()))
        );
        engine.release_surface();
        assert!(engine.source(MARKER_SOURCE).is_none());
    }
}
