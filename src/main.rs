use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guidepost::controller::{LoopController, LoopPolicy, TaskOutcome};
use guidepost::hands::BrowserSession;
use guidepost::{Brain, Eyes, Overlay, face};

const DEFAULT_ENDPOINT: &str = "http://localhost:8000/analyze_ui";

/// Walks you through a task in your own browser, one highlighted step at a time.
#[derive(Parser, Debug)]
#[command(name = "guidepost", version, about)]
struct Cli {
    /// Guidance service endpoint. Falls back to GUIDE_ENDPOINT, then a local default.
    #[arg(long)]
    endpoint: Option<String>,

    /// Run a single task and exit instead of serving the panel.
    #[arg(long)]
    task: Option<String>,

    /// Open this page before the first task.
    #[arg(long)]
    url: Option<String>,

    /// Panel port. The first free port in a small range above it is used.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// DevTools endpoint of an already-running Chrome to attach to.
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    browser: String,

    /// Guidance service request timeout, in seconds.
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    /// How long a callout waits for the user, in seconds.
    #[arg(long, default_value_t = 10)]
    guidance_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let endpoint = cli
        .endpoint
        .clone()
        .or_else(|| std::env::var("GUIDE_ENDPOINT").ok())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

    // Chrome can take a while; keep the runtime responsive meanwhile.
    info!("connecting to Chrome");
    let debug_url = cli.browser.clone();
    let session = tokio::task::spawn_blocking(move || BrowserSession::connect_or_launch(&debug_url))
        .await
        .map_err(|e| anyhow::anyhow!("browser launch panicked: {e}"))??;

    let session = match cli.url.clone() {
        Some(url) => {
            info!("opening start page {url}");
            tokio::task::spawn_blocking(move || -> Result<BrowserSession> {
                session.navigate(&url)?;
                Ok(session)
            })
            .await
            .map_err(|e| anyhow::anyhow!("navigation panicked: {e}"))??
        }
        None => session,
    };

    let policy = LoopPolicy {
        guidance_timeout: Duration::from_secs(cli.guidance_timeout),
        ..LoopPolicy::default()
    };
    let eyes = Eyes::new(session.tab.clone());
    let brain = Brain::new(endpoint, Duration::from_secs(cli.request_timeout))?;
    let overlay = Overlay::new(session.tab.clone(), policy.guidance_timeout, policy.poll_interval);
    let controller = Arc::new(LoopController::new(eyes, brain, overlay, policy));

    if let Some(task) = cli.task {
        return match controller.start(&task).await? {
            TaskOutcome::Done => {
                info!("task complete");
                Ok(())
            }
            TaskOutcome::Cancelled => {
                info!("task cancelled");
                Ok(())
            }
        };
    }

    let mut tasks = face::start_server(cli.port, controller.events(), controller.cancel_token()).await?;
    info!("waiting for tasks from the panel");

    while let Some(task) = tasks.recv().await {
        match controller.start(&task).await {
            Ok(TaskOutcome::Done) => info!("task complete"),
            Ok(TaskOutcome::Cancelled) => info!("task cancelled"),
            // The panel already shows the failure; keep serving new tasks.
            Err(e) => warn!("task failed: {e}"),
        }
    }

    Ok(())
}
