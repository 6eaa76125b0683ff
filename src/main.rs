use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipcam_lib::capture::SimulatedHost;
use clipcam_lib::preview::NullSink;
use clipcam_lib::{run_session_loop, settings, SessionManager};

/// How often the simulated camera produces an encoded fragment.
const FRAGMENT_INTERVAL: Duration = Duration::from_millis(250);

const HELP: &str = "commands: acquire | record | stop | view | reset | status | quit";

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipcam=debug,clipcam_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();
    init_logging();

    let settings = settings::load_settings();
    log::info!("Loaded settings: {:?}", settings);

    let host = SimulatedHost::with_fragment_interval(FRAGMENT_INTERVAL);
    let manager = SessionManager::new(Arc::new(host), Box::new(NullSink), settings)
        .on_complete(|bytes, duration_secs| {
            log::info!(
                "Recording complete: {} bytes, {}s",
                bytes.len(),
                duration_secs
            );
        });

    let handle = manager.handle();
    let mut ui = manager.subscribe();
    let status = ui.clone();
    let mut errors = manager.errors();
    let session = tokio::spawn(run_session_loop(manager));

    tokio::spawn(async move {
        while ui.changed().await.is_ok() {
            let snapshot = ui.borrow_and_update().clone();
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("{}", json),
                Err(e) => log::warn!("Failed to serialize UI state: {}", e),
            }
        }
    });

    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                Ok(err) => eprintln!("error: {}", err),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Error channel lagged, {} errors skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    handle.acquire()?;
    eprintln!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match line.trim() {
            "" => {}
            "acquire" | "retry" => handle.acquire()?,
            "record" | "start" => handle.start()?,
            "stop" => handle.stop()?,
            "view" => handle.view_artifact()?,
            "reset" => handle.reset()?,
            "status" => {
                let snapshot = status.borrow().clone();
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            "quit" | "exit" => break,
            other => eprintln!("unknown command {:?}; {}", other, HELP),
        }
    }

    if handle.exit().is_err() {
        log::warn!("Session loop already stopped");
    }
    session.await.context("Session loop panicked")?;
    Ok(())
}
