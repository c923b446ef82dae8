//! Lifecycle of one mounted globe view.
//!
//! `Uninitialized -> Loading -> Active -> Disposed`, with `Failed` reachable
//! only while loading. The session exclusively owns the rendering surface,
//! both collections and the refresh timer.

use crate::data::{self, DatasetSource};
use crate::engine::{EngineError, RenderEngine, Surface, SurfaceConfig};
use crate::error::LoadError;
use crate::feed::ThreatFeed;
use crate::processing::AlignedDatasets;
use crate::style::{self, BORDER_SOURCE, MARKER_SOURCE};
use crate::types::BoundaryFeature;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Active,
    Failed,
    Disposed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub surface: SurfaceConfig,
    pub dataset: DatasetSource,
    pub name_property: String,
    pub refresh_interval: Duration,
    pub fetch_timeout: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {action} a session that is {state:?}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed to register with the rendering engine: {0}")]
    Registration(#[source] EngineError),
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub pushed: usize,
    pub dropped: usize,
}

pub struct Session<E: RenderEngine, F: ThreatFeed> {
    config: SessionConfig,
    state: SessionState,
    engine: Option<E>,
    surface: Option<Surface<E>>,
    feed: F,
    datasets: Option<AlignedDatasets>,
    timer: Option<Interval>,
    ticks: u64,
    dropped_pushes: u64,
}

impl<E: RenderEngine, F: ThreatFeed> Session<E, F> {
    pub fn new(config: SessionConfig, engine: E, feed: F) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            engine: Some(engine),
            surface: None,
            feed,
            datasets: None,
            timer: None,
            ticks: 0,
            dropped_pushes: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The engine behind the live surface, while one exists.
    pub fn engine(&self) -> Option<&E> {
        self.surface.as_deref()
    }

    pub fn datasets(&self) -> Option<&AlignedDatasets> {
        self.datasets.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn dropped_pushes(&self) -> u64 {
        self.dropped_pushes
    }

    /// Creates the surface and loads the configured boundary dataset.
    pub async fn mount(&mut self) -> Result<(), SessionError> {
        let source = self.config.dataset.clone();
        let name_property = self.config.name_property.clone();
        self.mount_from(async move { data::load_boundaries(&source, &name_property).await })
            .await
    }

    /// Like [`Session::mount`], with the boundary features supplied by `load`.
    pub async fn mount_from<L>(&mut self, load: L) -> Result<(), SessionError>
    where
        L: Future<Output = Result<Vec<BoundaryFeature>, LoadError>>,
    {
        if self.state != SessionState::Uninitialized {
            return Err(self.invalid("mount"));
        }
        let Some(engine) = self.engine.take() else {
            return Err(self.invalid("mount"));
        };

        self.state = SessionState::Loading;
        info!("Session loading");

        match Surface::create(engine, &self.config.surface) {
            Ok(surface) => self.surface = Some(surface),
            Err(err) => return Err(self.fail(SessionError::Registration(err))),
        }

        let loaded = match self.config.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, load)
                .await
                .unwrap_or_else(|_| Err(LoadError::Fetch(format!("timed out after {limit:?}")))),
            None => load.await,
        };

        let datasets = match loaded.and_then(|b| AlignedDatasets::build(b, &mut self.feed)) {
            Ok(datasets) => datasets,
            Err(err) => return Err(self.fail(err.into())),
        };

        if let Err(err) = self.register(&datasets) {
            return Err(self.fail(SessionError::Registration(err)));
        }

        let period = self.config.refresh_interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.datasets = Some(datasets);
        self.timer = Some(timer);
        self.state = SessionState::Active;
        info!(regions = self.datasets.as_ref().map_or(0, |d| d.len()), ?period, "Session active");
        Ok(())
    }

    fn register(&mut self, datasets: &AlignedDatasets) -> Result<(), EngineError> {
        let surface = self.surface.as_mut().ok_or(EngineError::NoSurface)?;
        surface.add_source(BORDER_SOURCE, &datasets.polygons().to_geojson())?;
        surface.add_source(MARKER_SOURCE, &datasets.points().to_geojson())?;
        surface.add_layer(&style::border_layer())?;
        surface.add_layer(&style::marker_layer())?;
        Ok(())
    }

    /// `Failed` leaves nothing registered: the timer and datasets are dropped
    /// and the surface, with any sources or layers already added, is released.
    fn fail(&mut self, err: SessionError) -> SessionError {
        error!(error = %err, "Session failed to load");
        self.timer = None;
        self.datasets = None;
        if self.surface.take().map(Surface::release).is_some() {
            debug!("Rendering surface released after failed load");
        }
        self.state = SessionState::Failed;
        err
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state,
            action,
        }
    }

    /// Runs one refresh pass immediately: new values for every region,
    /// then both sources are pushed. A failed push is logged and counted
    /// but does not stop the session.
    pub fn tick(&mut self) -> Result<TickReport, SessionError> {
        let state = self.state;
        let invalid = SessionError::InvalidTransition { state, action: "tick" };
        if state != SessionState::Active {
            return Err(invalid);
        }
        let (Some(datasets), Some(surface)) = (self.datasets.as_mut(), self.surface.as_mut()) else {
            return Err(invalid);
        };

        datasets.refresh(&mut self.feed);
        self.ticks += 1;

        let updates = [
            (BORDER_SOURCE, datasets.polygons().to_geojson()),
            (MARKER_SOURCE, datasets.points().to_geojson()),
        ];
        let mut report = TickReport {
            tick: self.ticks,
            pushed: 0,
            dropped: 0,
        };
        for (id, data) in &updates {
            match surface.push(id, data) {
                Ok(()) => report.pushed += 1,
                Err(err) => {
                    warn!(tick = self.ticks, source = id, error = %err, "Dropped source update");
                    report.dropped += 1;
                }
            }
        }
        self.dropped_pushes += report.dropped as u64;

        debug!(tick = report.tick, pushed = report.pushed, "Tick");
        Ok(report)
    }

    /// Waits for the next refresh interval, then ticks.
    pub async fn next_tick(&mut self) -> Result<TickReport, SessionError> {
        let invalid = self.invalid("tick");
        if self.state != SessionState::Active {
            return Err(invalid);
        }
        let Some(timer) = self.timer.as_mut() else {
            return Err(invalid);
        };
        timer.tick().await;
        self.tick()
    }

    /// Ticks on the refresh cadence until `shutdown` resolves, then disposes.
    pub async fn run_until<S>(&mut self, shutdown: S) -> Result<(), SessionError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Ok(()),
                report = self.next_tick() => {
                    if let Err(err) = report {
                        break Err(err);
                    }
                }
            }
        };
        self.dispose();
        outcome
    }

    /// Cancels the timer, then releases the surface. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.timer.take().is_some() {
            debug!("Refresh timer cancelled");
        }
        self.surface = None;
        self.datasets = None;

        if matches!(self.state, SessionState::Loading | SessionState::Active) {
            self.state = SessionState::Disposed;
            info!(ticks = self.ticks, "Session disposed");
        }
    }
}

impl<E: RenderEngine, F: ThreatFeed> Drop for Session<E, F> {
    fn drop(&mut self) {
        self.dispose();
    }
}
