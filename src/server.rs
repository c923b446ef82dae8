use crate::config::{DashboardConfig, ServerConfig};
use crate::engine::{EngineError, RenderEngine, SourceHandle, SurfaceConfig};
use crate::style::LayerSpec;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use geojson::FeatureCollection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

/// Everything a browser client needs to draw the globe.
#[derive(Debug, Default)]
pub struct Published {
    surface: Option<SurfaceConfig>,
    layers: Vec<LayerSpec>,
    sources: BTreeMap<String, PublishedSource>,
}

#[derive(Debug)]
struct PublishedSource {
    data: FeatureCollection,
    revision: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Status {
    pub surface_ready: bool,
    pub layers: Vec<String>,
    /// Source id to number of updates received since registration.
    pub sources: BTreeMap<String, u64>,
}

/// Engine that publishes the surface, layers and sources over HTTP.
/// Clones share the same published state.
#[derive(Clone, Default)]
pub struct HttpEngine {
    published: Arc<RwLock<Published>>,
}

impl HttpEngine {
    fn read(&self) -> Result<RwLockReadGuard<'_, Published>, EngineError> {
        self.published
            .read()
            .map_err(|_| EngineError::Backend("published state lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Published>, EngineError> {
        self.published
            .write()
            .map_err(|_| EngineError::Backend("published state lock poisoned".to_string()))
    }

    pub fn status(&self) -> Result<Status, EngineError> {
        let published = self.read()?;
        Ok(Status {
            surface_ready: published.surface.is_some(),
            layers: published.layers.iter().map(|l| l.id.clone()).collect(),
            sources: published
                .sources
                .iter()
                .map(|(id, s)| (id.clone(), s.revision))
                .collect(),
        })
    }

    pub fn surface(&self) -> Result<Option<SurfaceConfig>, EngineError> {
        Ok(self.read()?.surface.clone())
    }

    pub fn layers(&self) -> Result<Vec<serde_json::Value>, EngineError> {
        Ok(self.read()?.layers.iter().map(LayerSpec::to_json).collect())
    }

    pub fn source_data(&self, id: &str) -> Result<Option<FeatureCollection>, EngineError> {
        Ok(self.read()?.sources.get(id).map(|s| s.data.clone()))
    }
}

pub struct HttpSource<'a> {
    engine: &'a HttpEngine,
    id: String,
}

impl SourceHandle for HttpSource<'_> {
    fn set_data(&mut self, data: &FeatureCollection) -> Result<(), EngineError> {
        let mut published = self.engine.write()?;
        let source = published
            .sources
            .get_mut(&self.id)
            .ok_or_else(|| EngineError::UnknownSource(self.id.clone()))?;
        source.data = data.clone();
        source.revision += 1;
        Ok(())
    }
}

impl RenderEngine for HttpEngine {
    type Source<'a> = HttpSource<'a>;

    fn create_surface(&mut self, config: &SurfaceConfig) -> Result<(), EngineError> {
        let mut published = self.write()?;
        if published.surface.is_some() {
            return Err(EngineError::SurfaceExists);
        }
        published.surface = Some(config.clone());
        Ok(())
    }

    fn add_source(&mut self, id: &str, data: &FeatureCollection) -> Result<(), EngineError> {
        let mut published = self.write()?;
        if published.surface.is_none() {
            return Err(EngineError::NoSurface);
        }
        if published.sources.contains_key(id) {
            return Err(EngineError::DuplicateSource(id.to_string()));
        }
        published.sources.insert(
            id.to_string(),
            PublishedSource {
                data: data.clone(),
                revision: 0,
            },
        );
        Ok(())
    }

    fn add_layer(&mut self, layer: &LayerSpec) -> Result<(), EngineError> {
        let mut published = self.write()?;
        if published.surface.is_none() {
            return Err(EngineError::NoSurface);
        }
        if published.layers.iter().any(|l| l.id == layer.id) {
            return Err(EngineError::DuplicateLayer(layer.id.clone()));
        }
        if !published.sources.contains_key(&layer.source) {
            return Err(EngineError::UnknownSource(layer.source.clone()));
        }
        published.layers.push(layer.clone());
        Ok(())
    }

    fn source(&mut self, id: &str) -> Option<HttpSource<'_>> {
        if !self.read().ok()?.sources.contains_key(id) {
            return None;
        }
        Some(HttpSource {
            engine: self,
            id: id.to_string(),
        })
    }

    fn release_surface(&mut self) {
        if let Ok(mut published) = self.write() {
            *published = Published::default();
        }
    }
}

struct AppState {
    engine: HttpEngine,
    dashboard: DashboardConfig,
}

pub fn router(engine: HttpEngine, dashboard: DashboardConfig, static_dir: Option<&std::path::Path>) -> Router {
    let state = Arc::new(AppState { engine, dashboard });

    let app = Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/surface", get(surface_handler))
        .route("/api/layers", get(layers_handler))
        .route("/api/sources/:id", get(source_handler))
        .route("/dashboard", get(dashboard_handler))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(CorsLayer::permissive())
}

/// Binds the configured port on localhost. Called before the session mounts
/// so a taken port fails the command up front.
pub async fn bind_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))
}

pub async fn start_server<S>(
    listener: TcpListener,
    config: &ServerConfig,
    dashboard: DashboardConfig,
    engine: HttpEngine,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = router(engine, dashboard, config.static_dir.as_deref());
    info!("Serving globe on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

fn engine_failure(err: EngineError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.status() {
        Ok(status) => Json(status).into_response(),
        Err(err) => engine_failure(err),
    }
}

async fn surface_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.surface() {
        Ok(Some(surface)) => Json(surface).into_response(),
        Ok(None) => (StatusCode::SERVICE_UNAVAILABLE, "surface not ready").into_response(),
        Err(err) => engine_failure(err),
    }
}

async fn layers_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.layers() {
        Ok(layers) => Json(layers).into_response(),
        Err(err) => engine_failure(err),
    }
}

async fn source_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.engine.source_data(&id) {
        Ok(Some(data)) => Json(data).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("unknown source `{id}`")).into_response(),
        Err(err) => engine_failure(err),
    }
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Response {
    match dashboard_link(&state.dashboard) {
        Some(url) => Redirect::temporary(url).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// The outbound dashboard link, offered only when the globe is not
/// already embedded inside that dashboard.
pub fn dashboard_link(dashboard: &DashboardConfig) -> Option<&str> {
    (!dashboard.embedded).then_some(dashboard.url.as_str())
}
