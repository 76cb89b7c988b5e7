use clap::Parser;
use curseforge::{CurseForge, UpstreamError};
use metrics_exporter_statsd::StatsdBuilder;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use widget::api::{self, ApiError};
use widget::{MemoryStore, Store, Widget};

mod config;

use config::{Config, ConfigError, LoggingConfig, MetricsConfig};

const METRICS_PREFIX: &str = "cfwidget";

#[derive(Parser)]
enum CliCommand {
    /// Serves the widget API and runs the background workers.
    Serve {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not install metrics exporter: {0}")]
    Metrics(String),
    #[error("upstream client: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("widget api: {0}")]
    Api(#[from] ApiError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Serve { config } => match run(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(error = %err, "cfwidget failed");
                eprintln!("cfwidget: {err}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run(path: &std::path::Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;

    let _sentry = init_logging(config.common.logging.as_ref())?;
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

/// Installs the fmt subscriber, plus the Sentry layer when a DSN is set. The
/// returned guard flushes Sentry on drop.
fn init_logging(
    logging: Option<&LoggingConfig>,
) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let guard = match logging {
        Some(logging) => {
            let dsn: sentry::types::Dsn = logging.sentry_dsn.parse()?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|err| CliError::Metrics(err.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|err| CliError::Metrics(err.to_string()))?;

    describe_all(curseforge::metrics_defs::ALL_METRICS);
    describe_all(widget::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd exporter installed"
    );
    Ok(())
}

async fn serve(config: Config) -> Result<(), CliError> {
    let api_key = config.api_key()?;
    let settings = config.widget;

    let client = CurseForge::new(&settings.upstream.url, &api_key, settings.upstream.timeout())?;
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let widget = Widget::new(settings.clone(), client, store);

    let admin = {
        let widget = widget.clone();
        AdminService::<_, std::io::Error>::new(move || widget.is_ready())
    };
    let admin_listener = &settings.admin_listener;

    let result = tokio::select! {
        result = api::serve(&settings.listener, widget.clone()) => result.map_err(CliError::from),
        result = run_http_service(&admin_listener.host, admin_listener.port, admin) => result.map_err(CliError::from),
        () = shutdown_signal() => Ok(()),
    };

    widget.shutdown();
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
