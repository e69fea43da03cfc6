// monitor: Ingests HL7 over MLLP, maintains patient state, and pages on
// positive AKI predictions.

use clap::{Arg, Command};
use monitor::config::MonitorConfig;
use monitor::drainer::InferenceDrainer;
use monitor::metrics::Metrics;
use monitor::pager::{PagerClient, run_pager_drainer};
use monitor::pipeline::Pipeline;
use monitor::predictor::{AkiModel, Predictor};
use monitor::storage::{PatientStore, PendingQueues};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

const STORE_FILE: &str = "aki.sqlite3";

fn validate_port_value(value: &str) -> Result<u16, String> {
    value
        .parse::<u16>()
        .map_err(|_| "Invalid port number".to_owned())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "monitor starting");

    let matches = Command::new("AKI Monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time AKI detection over an HL7/MLLP feed")
        .arg(
            Arg::new("history")
                .long("history")
                .help("Path to the historical creatinine CSV")
                .value_name("path")
                .default_value("/data/history.csv"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .help("Path to the trained classifier artifact")
                .value_name("path")
                .default_value("/model/aki-model.json"),
        )
        .arg(
            Arg::new("state-dir")
                .long("state-dir")
                .help("Directory for the patient database and persisted queues")
                .value_name("dir")
                .default_value("/state"),
        )
        .arg(
            Arg::new("metrics-port")
                .long("metrics-port")
                .help("Port for the Prometheus /metrics endpoint")
                .value_name("port")
                .value_parser(validate_port_value)
                .default_value("8000"),
        )
        .get_matches();

    let config = match MonitorConfig::from_env(
        PathBuf::from(matches.get_one::<String>("history").unwrap()),
        PathBuf::from(matches.get_one::<String>("model").unwrap()),
        PathBuf::from(matches.get_one::<String>("state-dir").unwrap()),
        *matches.get_one::<u16>("metrics-port").unwrap(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: configuration: {e}");
            std::process::exit(1);
        }
    };
    info!(mllp = %config.mllp, pager = %config.pager, "config loaded");

    // The classifier loads before anything touches the network: a bad
    // artifact must fail fast.
    let predictor: Arc<dyn Predictor + Send + Sync> = match AkiModel::load(&config.model_path) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            eprintln!("FATAL: loading model: {e}");
            std::process::exit(1);
        }
    };

    let store_path = config.state_dir.join(STORE_FILE);
    let mut store = match PatientStore::open(&store_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("FATAL: opening patient store: {e}");
            std::process::exit(1);
        }
    };

    if config.history_path.exists() {
        if let Err(e) = store.bootstrap_from_csv(&config.history_path) {
            eprintln!("FATAL: history bootstrap: {e}");
            std::process::exit(1);
        }
    } else {
        warn!(path = %config.history_path.display(), "history file not found, skipping bootstrap");
    }

    let reader_store = match PatientStore::open_read_only(&store_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("FATAL: opening read-only store handle: {e}");
            std::process::exit(1);
        }
    };

    let queues = match PendingQueues::load(&config.state_dir) {
        Ok(queues) => queues,
        Err(e) => {
            warn!(error = %e, "could not load persisted queues, starting empty");
            PendingQueues::new()
        }
    };

    let pager = match PagerClient::new(&config.pager.to_string()) {
        Ok(pager) => pager,
        Err(e) => {
            eprintln!("FATAL: building pager client: {e}");
            std::process::exit(1);
        }
    };

    let metrics = Metrics::new();
    let metrics_listener = match monitor::metrics::bind(config.metrics_port).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: binding metrics port {}: {e}", config.metrics_port);
            std::process::exit(1);
        }
    };
    tokio::spawn(monitor::metrics::serve(metrics_listener, metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received");
        let _ = signal_tx.send(true);
    });

    let drainer = InferenceDrainer::new(
        reader_store,
        predictor.clone(),
        pager.clone(),
        queues.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    );
    let drainer_task = tokio::spawn(drainer.begin());
    let pager_task = tokio::spawn(run_pager_drainer(
        pager.clone(),
        queues.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let pipeline = Pipeline::new(
        config.mllp.clone(),
        store,
        predictor,
        pager,
        queues.clone(),
        metrics,
        shutdown_rx,
    );
    let result = pipeline.begin().await;

    // A fatal pipeline error must still stop the drainers; on the graceful
    // path this is a no-op.
    let _ = shutdown_tx.send(true);

    // Let the drainers finish their current tick before persisting, so the
    // queue files reflect their final state.
    let _ = drainer_task.await;
    let _ = pager_task.await;

    if let Err(e) = queues.persist(&config.state_dir) {
        error!(error = %e, "persisting pending queues failed");
    }

    match result {
        Ok(()) => {
            info!("shutdown complete");
        }
        Err(e) => {
            error!(error = %e, "fatal store error");
            std::process::exit(1);
        }
    }
}

/// SIGTERM (the platform's stop signal) or ctrl-c interactively.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
