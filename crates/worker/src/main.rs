use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fognode_client::{RetryPolicy, TaskClient};
use fognode_comfyui::api::EngineApi;
use fognode_comfyui::channel::{EventChannel, HandleSlot};
use fognode_comfyui::gateway::ComfyUIGateway;
use fognode_comfyui::reconnect::ReconnectConfig;
use fognode_core::config::FogConfig;
use fognode_scheduler::artifacts::OutputDir;
use fognode_scheduler::history::HistoryLog;
use fognode_scheduler::scheduler::TaskScheduler;

/// Environment variable naming the config file.
const CONFIG_ENV: &str = "FOGNODE_CONFIG";
/// Fallback path, relative to the working directory.
const CONFIG_DEFAULT: &str = "fog_config.json";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fognode_worker=debug,fognode_scheduler=debug,fognode_comfyui=debug,fognode_client=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_DEFAULT.to_string());
    let config = load_config(&config_path).await;
    tracing::info!(
        enabled = config.enabled,
        task_center = %config.task_center_url,
        engine = %config.engine_api_url,
        "Loaded node configuration",
    );

    // One id for both REST submits and the socket handshake, so the
    // engine routes execution events back to this process.
    let client_id = uuid::Uuid::new_v4().to_string();

    // --- Task center client ---
    let client = TaskClient::new(
        config.task_center_url.clone(),
        RetryPolicy::from_config(&config),
    )
    .expect("Failed to build the task-center HTTP client");

    if config.task_center_url.is_empty() {
        tracing::warn!("No task center configured; the node will idle until one is set");
    } else if client.test_connection().await {
        tracing::info!(url = %client.base_url(), "Task center reachable");
    } else {
        tracing::warn!(
            url = %client.base_url(),
            "Task center unreachable at startup; polling will keep retrying",
        );
    }

    // --- Engine wiring ---
    let api = EngineApi::new(config.engine_api_url.clone(), client_id.clone());
    let gateway = Arc::new(ComfyUIGateway::new(api));

    let cancel = CancellationToken::new();
    let slot = HandleSlot::new();
    let (channel, feed) = EventChannel::start(
        config.engine_ws_url.clone(),
        client_id,
        slot.clone(),
        ReconnectConfig::default(),
        cancel.child_token(),
    );

    // --- Artifacts and history ---
    let store = Arc::new(OutputDir::new(config.output_dir.clone()));
    let history = HistoryLog::load(config.history_path.clone()).await;
    tracing::info!(entries = history.len(), "Task history loaded");

    // --- Scheduler ---
    let scheduler = TaskScheduler::new(
        config, client, gateway, channel, feed, store, history, slot,
    );
    let handle = scheduler.start(cancel.clone());
    tracing::info!("Fog node running; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for the shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    handle.stop().await;
    tracing::info!("Fog node stopped");
}

/// Read and normalize the JSON config file.
///
/// A missing file runs the node on defaults, disabled until a real
/// config is written. An unreadable or malformed file is fatal.
async fn load_config(path: &str) -> FogConfig {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<FogConfig>(&bytes) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::error!(path, error = %e, "Config file did not parse");
                std::process::exit(1);
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "No config file found, using defaults (node disabled)");
            FogConfig::default()
        }
        Err(e) => {
            tracing::error!(path, error = %e, "Config file unreadable");
            std::process::exit(1);
        }
    }
}
