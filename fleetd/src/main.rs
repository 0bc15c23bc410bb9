//! The API server core's process binary: load configuration, wire up
//! logging, register every facade before the listener binds, then run the
//! TLS listener until a shutdown signal arrives (spec §2, §4.4).

mod config;
mod dispatch;
mod pem;

use std::sync::Arc;

use fleet_core::observability::default_observability;
use fleet_core::state::StateStore;
use fleet_dispatch::registry::FacadeRegistry;
use fleet_http::object_store::{InMemoryObjectStore, ObjectStore};
use fleet_http::SideChannelContext;
use fleet_state_mem::InMemoryStateStore;
use fleet_transport::connection::{ConnectionHandlerConfig, ServerMode};
use fleet_transport::login::LoginGate;
use fleet_transport::server::Server;
use tokio_rustls::rustls::ServerConfig;

use config::FleetdConfig;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "fleetd=info,fleet_dispatch=info,fleet_transport=info,fleet_http=info".into()))
        .init();
}

fn build_tls_config(config: &FleetdConfig) -> Result<Arc<ServerConfig>, String> {
    let cert_pem = std::fs::read_to_string(&config.tls_cert_path)
        .map_err(|e| format!("reading {}: {e}", config.tls_cert_path.display()))?;
    let key_pem = std::fs::read_to_string(&config.tls_key_path)
        .map_err(|e| format!("reading {}: {e}", config.tls_key_path.display()))?;

    let chain = pem::load_cert_chain(&cert_pem);
    if chain.is_empty() {
        return Err(format!("no CERTIFICATE block found in {}", config.tls_cert_path.display()));
    }
    let key = pem::load_private_key(&key_pem)
        .ok_or_else(|| format!("no private key block found in {}", config.tls_key_path.display()))?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| format!("building TLS config: {e}"))?;
    Ok(Arc::new(server_config))
}

/// Register every facade this binary ships with. Panics on a conflicting
/// registration (`FacadeRegistry::builder().register` panics internally) —
/// a programmer error, not a runtime condition, and it happens before the
/// listener binds so the process never reaches a half-registered state
/// (spec §4.2's fail-fast rule).
fn build_registry() -> Arc<FacadeRegistry> {
    FacadeRegistry::builder()
        .register(fleet_facades::client_descriptor())
        .register(fleet_facades::uniter_descriptor())
        .register(fleet_facades::notify_watcher_descriptor())
        .build()
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    let config = match FleetdConfig::load(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fleetd: configuration error: {err}");
            std::process::exit(1);
        }
    };

    let tls_config = match build_tls_config(&config) {
        Ok(tls_config) => tls_config,
        Err(message) => {
            eprintln!("fleetd: {message}");
            std::process::exit(1);
        }
    };

    if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
        eprintln!("fleetd: creating data dir {}: {err}", config.data_dir.display());
        std::process::exit(1);
    }
    let backup_scratch_root = config.data_dir.join("backup-scratch");
    if let Err(err) = std::fs::create_dir_all(&backup_scratch_root) {
        eprintln!("fleetd: creating backup scratch dir {}: {err}", backup_scratch_root.display());
        std::process::exit(1);
    }

    let registry = build_registry();
    let state = Arc::new(InMemoryStateStore::new());
    let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let observability = default_observability();
    let login_gate = LoginGate::new(config.login_gate_capacity);

    let http_ctx = Arc::new(SideChannelContext {
        state: state.clone(),
        object_store,
        environment_uuid: config.environment_uuid.clone(),
        log_path: config.log_path.clone(),
        backup_scratch_root,
    });

    let rpc_state = state.clone();
    let rpc_registry = registry.clone();
    let rpc_observability = observability.clone();
    let ping_interval = config.ping_interval;
    let rpc_config_factory: Arc<dyn Fn() -> ConnectionHandlerConfig + Send + Sync> = Arc::new(move || ConnectionHandlerConfig {
        registry: rpc_registry.clone(),
        state: rpc_state.clone(),
        observability: rpc_observability.clone(),
        login_gate: login_gate.clone(),
        server_mode: ServerMode::Normal,
        startup_error: None,
        ping_interval,
    });

    let handler = dispatch::make_handler(rpc_config_factory, http_ctx);

    let server = match Server::spawn(config.listen_addr, tls_config, handler).await {
        Ok(server) => server,
        Err(err) => {
            eprintln!("fleetd: binding {}: {err}", config.listen_addr);
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %server.local_addr(), environment_uuid = %config.environment_uuid, "fleetd listening");

    let liveness_failed = Arc::new(tokio::sync::Notify::new());
    let liveness_state = state.clone();
    let liveness_signal = liveness_failed.clone();
    let liveness_interval = config.ping_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(liveness_interval).await;
            if let Err(err) = liveness_state.ping().await {
                tracing::error!(error = %err, "backing store failed its liveness ping, shutting down");
                liveness_signal.notify_one();
                break;
            }
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to install ctrl-c handler, shutting down anyway");
            }
            tracing::info!("shutdown signal received, draining connections");
        }
        _ = liveness_failed.notified() => {
            tracing::warn!("backing store is unreachable, draining connections");
        }
    }

    server.stop().await;
    tracing::info!("shutdown complete");
}
