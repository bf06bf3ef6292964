use anyhow::Result;
use arface_core::{AssetSlots, Labels, MobileFaceNet};
use arfaced::config::Config;
use arfaced::engine::{spawn_engine, EngineSettings};
use arfaced::loader::AssetLoader;
use arfaced::session::{self, write_output, SessionOutput};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the session protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("arfaced starting");

    let config = Config::from_env();
    let mut stdout = tokio::io::stdout();

    let labels = match Labels::load(&config.labels_path) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!(error = %e, "labels resource unavailable");
            let notice = SessionOutput::Notice {
                message: "Classifier could not be initialized".into(),
            };
            write_output(&mut stdout, &notice).await?;
            return Err(e.into());
        }
    };

    let embedder = match MobileFaceNet::load(
        &config.embedder_model_path(),
        config.input_size,
        config.embedding_dim,
    ) {
        Ok(embedder) => embedder,
        Err(e) => {
            tracing::error!(error = %e, "embedding model unavailable");
            let notice = SessionOutput::Notice {
                message: "Classifier could not be initialized".into(),
            };
            write_output(&mut stdout, &notice).await?;
            return Err(e.into());
        }
    };

    let assets = AssetSlots::new();
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let mut loader = AssetLoader::new(Arc::clone(&assets), notice_tx);
    loader.load_model(config.overlay_model.clone());
    loader.load_texture(config.overlay_texture.clone());

    let engine = match spawn_engine(
        embedder,
        labels,
        Arc::clone(&assets),
        EngineSettings {
            distance_threshold: config.distance_threshold,
            embedding_dim: config.embedding_dim,
            label: config.label.clone(),
        },
    ) {
        Ok(engine) => engine,
        Err(e) => {
            loader.shutdown().await;
            return Err(e.into());
        }
    };

    tracing::info!(
        threshold = config.distance_threshold,
        label = %config.label,
        "arfaced ready"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    if let Err(e) = session::run(&engine, stdin, &mut stdout, &mut notice_rx, interrupted()).await {
        tracing::error!(error = %e, "session I/O failed");
    }

    tracing::info!("arfaced shutting down");
    match engine.shutdown().await {
        Ok(events) if !events.is_empty() => {
            tracing::info!(detached = events.len(), "overlay nodes removed at teardown");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "engine already stopped"),
    }
    loader.shutdown().await;

    Ok(())
}

async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("interrupted"),
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await
        }
    }
}
