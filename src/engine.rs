//! Capabilities the session needs from a map rendering engine.

use crate::style::LayerSpec;
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("rendering surface has not been created")]
    NoSurface,
    #[error("rendering surface already exists")]
    SurfaceExists,
    #[error("unknown source `{0}`")]
    UnknownSource(String),
    #[error("source `{0}` is already registered")]
    DuplicateSource(String),
    #[error("layer `{0}` is already registered")]
    DuplicateLayer(String),
    #[error("{0}")]
    Backend(String),
}

/// Camera and style the surface is created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub style: String,
    pub access_token: String,
    /// `[longitude, latitude]`
    pub center: [f64; 2],
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
    pub projection: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            style: "mapbox://styles/mapbox/dark-v11".to_string(),
            access_token: String::new(),
            center: [0.0, 20.0],
            zoom: 1.2,
            pitch: 45.0,
            bearing: 0.0,
            projection: "globe".to_string(),
        }
    }
}

/// Update handle for a registered source.
pub trait SourceHandle {
    fn set_data(&mut self, data: &FeatureCollection) -> Result<(), EngineError>;
}

pub trait RenderEngine {
    type Source<'a>: SourceHandle
    where
        Self: 'a;

    fn create_surface(&mut self, config: &SurfaceConfig) -> Result<(), EngineError>;

    fn add_source(&mut self, id: &str, data: &FeatureCollection) -> Result<(), EngineError>;

    fn add_layer(&mut self, layer: &LayerSpec) -> Result<(), EngineError>;

    fn source(&mut self, id: &str) -> Option<Self::Source<'_>>;

    fn release_surface(&mut self);
}

/// A created rendering surface. Dropping it releases the surface.
pub struct Surface<E: RenderEngine> {
    engine: E,
}

impl<E: RenderEngine> Surface<E> {
    pub fn create(mut engine: E, config: &SurfaceConfig) -> Result<Self, EngineError> {
        engine.create_surface(config)?;
        debug!(style = %config.style, projection = %config.projection, "Rendering surface created");
        Ok(Self { engine })
    }

    pub fn release(self) {}

    pub fn push(&mut self, id: &str, data: &FeatureCollection) -> Result<(), EngineError> {
        let mut handle = self
            .engine
            .source(id)
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))?;
        handle.set_data(data)
    }
}

impl<E: RenderEngine> Deref for Surface<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.engine
    }
}

impl<E: RenderEngine> DerefMut for Surface<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: RenderEngine> Drop for Surface<E> {
    fn drop(&mut self) {
        self.engine.release_surface();
        debug!("Rendering surface released");
    }
}
