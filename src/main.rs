use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use deskzoom_lib::agent_engine::{Task, TaskStatus};
use deskzoom_lib::config::{load_config, load_config_from, AppConfig};
use deskzoom_lib::device::remote::RemoteDesktop;
use deskzoom_lib::device::Device;
use deskzoom_lib::errors::{DeskZoomError, DeskZoomResult};
use deskzoom_lib::AgentRuntime;

/// Complete a desktop task by looking at the screen and acting on it.
#[derive(Debug, Parser)]
#[command(name = "deskzoom", version, about)]
struct Cli {
    /// What to do, in plain words.
    description: String,

    /// Base URL of the desktop agent daemon (overrides [device].base_url).
    #[arg(long)]
    desktop: Option<String>,

    /// Page to open before the first step.
    #[arg(long)]
    site: Option<String>,

    #[arg(long)]
    max_steps: Option<u32>,

    /// Path to config.toml (default: next to the executable, then the working directory).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    owner: Option<String>,

    /// Drive this machine's own desktop.
    #[cfg(feature = "local-desktop")]
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    deskzoom_lib::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "deskzoom failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> DeskZoomResult<ExitCode> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let device = build_device(&cli, &config)?;
    let runtime = AgentRuntime::from_config(&config)?;

    let mut task = Task::new(cli.description.clone());
    if let Some(site) = &cli.site {
        task = task.with_parameter("site", site.as_str());
    }
    if let Some(owner) = &cli.owner {
        task = task.with_owner(owner.as_str());
    }
    let task_id = task.id.clone();
    let max_steps = cli.max_steps.unwrap_or(config.agent.max_steps);

    let mut rx = runtime.pool.submit(task, device, max_steps).await?;
    let finished = tokio::select! {
        res = &mut rx => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(res) => res,
        None => {
            tracing::info!(task_id = %task_id, "interrupt received, cancelling at next step");
            if let Err(e) = runtime.store.request_cancel(&task_id).await {
                tracing::warn!(task_id = %task_id, error = %e, "cancel request not recorded");
            }
            rx.await
        }
    };
    let task = outcome.map_err(|_| DeskZoomError::Executor("worker dropped the task".into()))??;
    runtime.pool.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(match task.status {
        TaskStatus::Review | TaskStatus::Finished => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn build_device(cli: &Cli, config: &AppConfig) -> DeskZoomResult<Arc<dyn Device>> {
    #[cfg(feature = "local-desktop")]
    {
        if cli.local {
            return Ok(Arc::new(deskzoom_lib::device::local::LocalDesktop::new()));
        }
    }
    let url = cli
        .desktop
        .clone()
        .or_else(|| config.device.base_url.clone())
        .ok_or_else(|| {
            DeskZoomError::Config("no desktop given: pass --desktop <url> or set [device].base_url".into())
        })?;
    let device = RemoteDesktop::new(&url, Duration::from_secs(config.device.timeout_secs))?;
    Ok(Arc::new(device))
}
