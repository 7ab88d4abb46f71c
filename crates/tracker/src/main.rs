mod cli;
mod server;
mod shutdown;

use std::sync::Arc;

use clap::Parser;
use support_tracker_core::paths;
use support_tracker_core::report::ReportStore;
use support_tracker_core::secrets::{FileSecretStore, SecretStore};
use support_tracker_core::settings::SettingsStore;
use support_tracker_engine::{EngineConfig, JobStatus, QueryParams, Scheduler, StartRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let (settings_path, secrets_path, report_path) = match &args.data_dir {
        Some(dir) => (
            dir.join("settings.json"),
            dir.join("secrets.json"),
            dir.join("report.json"),
        ),
        None => (
            paths::settings_path()?,
            paths::secrets_path()?,
            paths::report_path()?,
        ),
    };

    let settings = SettingsStore::new(settings_path);
    let secrets: Arc<dyn SecretStore> = Arc::new(FileSecretStore::new(secrets_path));
    let reports = ReportStore::new(report_path);

    let verbose = args.verbose || settings.load().map(|s| s.is_verbose).unwrap_or(false);
    let default_filter = if verbose {
        "support_tracker=debug,support_tracker_engine=debug,support_tracker_core=debug"
    } else {
        "support_tracker=info,support_tracker_engine=info,support_tracker_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = EngineConfig::default();
    let scheduler = Scheduler::new(settings.clone(), secrets.clone(), reports, config.clone())?;

    if args.once {
        return run_once(&settings, &scheduler).await;
    }

    let state = server::AppState {
        settings,
        secrets,
        scheduler: scheduler.clone(),
        config,
        http: reqwest::Client::new(),
    };

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    let addr = listener.local_addr()?;
    info!("listening on http://{addr}");
    // The desktop shell reads the bound address from the first stdout line.
    println!("http://{addr}");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown::graceful_then_immediate())
        .await?;

    scheduler.cancel_all();
    Ok(())
}

/// Headless mode: one job with the settings defaults, result on stdout.
async fn run_once(settings: &SettingsStore, scheduler: &Scheduler) -> anyhow::Result<()> {
    let doc = settings.load()?;
    let id = scheduler.start(StartRequest {
        enabled_services: doc.enabled_services,
        params: QueryParams {
            number_of_days_to_query: doc.query_defaults.number_of_days_to_query,
            start_hour: doc.query_defaults.start_hour,
            push_to_tracker: doc.push_to_dev_ops,
        },
    });

    let view = loop {
        let view = scheduler
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("job {id} disappeared from the registry"))?;
        if view.status.is_terminal() {
            break view;
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    };

    println!("{}", serde_json::to_string_pretty(&view)?);
    if view.status == JobStatus::Error {
        anyhow::bail!("job failed: {}", view.error.as_deref().unwrap_or("unknown"));
    }
    Ok(())
}
