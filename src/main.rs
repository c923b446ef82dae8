use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use threat_globe::config::AppConfig;
use threat_globe::feed::UniformFeed;
use threat_globe::processing::{outer_ring, representative_point};
use threat_globe::render::RasterEngine;
use threat_globe::server::{self, HttpEngine};
use threat_globe::session::Session;
use threat_globe::data;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the live globe to a browser client
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render PNG frames of the globe for a number of refresh ticks
    Snapshot {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, default_value_t = 5)]
        ticks: u32,
    },
    /// Print each region's representative coordinate
    Inspect {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            let app_config = AppConfig::load_from_file(config)?;
            let engine = HttpEngine::default();
            let feed = UniformFeed::from_seed(app_config.refresh.seed);
            let mut session = Session::new(app_config.session_config()?, engine.clone(), feed);

            let listener = server::bind_listener(&app_config.server).await?;
            let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
            let server_config = app_config.server.clone();
            let dashboard = app_config.dashboard.clone();
            let server = tokio::spawn(async move {
                server::start_server(listener, &server_config, dashboard, engine, async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
            });

            let outcome = match session.mount().await {
                Ok(()) => session
                    .run_until(async {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            warn!("Failed to listen for Ctrl-C: {}", e);
                        }
                    })
                    .await
                    .context("Globe session stopped"),
                Err(e) => Err(e).context("Globe session failed to load"),
            };
            session.dispose();

            let _ = shutdown_tx.send(true);
            server.await.context("Server task panicked")??;
            outcome?;
        }
        Commands::Snapshot { config, ticks } => {
            let app_config = AppConfig::load_from_file(config)?;
            let snapshot = &app_config.snapshot;
            let engine = RasterEngine::new(snapshot.width, snapshot.height, snapshot.out_dir.clone());
            let feed = UniformFeed::from_seed(app_config.refresh.seed);
            let mut session = Session::new(app_config.session_config()?, engine, feed);

            session.mount().await.context("Globe session failed to load")?;
            for _ in 0..*ticks {
                session.next_tick().await?;
            }
            let frames = session.engine().map_or(0, RasterEngine::frames_written);
            session.dispose();
            info!("Wrote {} frames to {:?} ({} source updates dropped)", frames, snapshot.out_dir, session.dropped_pushes());
        }
        Commands::Inspect { config } => {
            let app_config = AppConfig::load_from_file(config)?;
            let source = app_config.dataset.source()?;
            let boundaries = data::load_boundaries(&source, &app_config.dataset.name_property).await?;

            let mut unpositioned = 0;
            for boundary in &boundaries {
                let point = representative_point(&boundary.geometry);
                if outer_ring(&boundary.geometry).is_some() {
                    println!("{:<40} {:>10.4} {:>10.4}", boundary.name, point.x, point.y);
                } else {
                    unpositioned += 1;
                    println!("{:<40} {:>21}", boundary.name, format!("unpositioned ({})", boundary.geometry.kind()));
                }
            }
            println!("{} regions, {} unpositioned", boundaries.len(), unpositioned);
        }
    }

    Ok(())
}
