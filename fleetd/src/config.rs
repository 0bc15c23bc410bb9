//! Layered configuration (spec §2.3): a TOML file is the base layer,
//! `FLEETD_*` environment variables override it, and command-line flags
//! override both. No `clap` — the grounding workspace carries no CLI
//! framework, so this parses `env::args()` by hand the way its own
//! tools do.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// The fully resolved, typed configuration `fleetd::main` runs with. Every
/// field is in its final Rust type — no raw strings survive past
/// [`FleetdConfig::load`].
#[derive(Debug, Clone)]
pub struct FleetdConfig {
    pub listen_addr: SocketAddr,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
    pub login_gate_capacity: usize,
    pub ping_interval: Duration,
    pub environment_uuid: String,
}

/// A single configuration error with the offending field name attached
/// (spec §2.3: "reported ... with the offending field name attached").
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn field_err(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError { field, message: message.into() }
}

/// The TOML base layer's shape. Every field is optional: a field absent
/// from the file simply leaves the built-in default (or a later layer) in
/// place.
#[derive(Debug, Default, Deserialize)]
struct TomlLayer {
    listen_addr: Option<String>,
    tls_cert_path: Option<String>,
    tls_key_path: Option<String>,
    data_dir: Option<String>,
    log_path: Option<String>,
    login_gate_capacity: Option<usize>,
    ping_interval_secs: Option<u64>,
    environment_uuid: Option<String>,
}

/// Mutable accumulator threaded through all three layers in priority order
/// (TOML, then env, then CLI), each one only overwriting fields it
/// actually specifies.
#[derive(Default)]
struct PartialConfig {
    listen_addr: Option<String>,
    tls_cert_path: Option<String>,
    tls_key_path: Option<String>,
    data_dir: Option<String>,
    log_path: Option<String>,
    login_gate_capacity: Option<usize>,
    ping_interval_secs: Option<u64>,
    environment_uuid: Option<String>,
}

impl PartialConfig {
    fn merge_toml(&mut self, layer: TomlLayer) {
        if layer.listen_addr.is_some() {
            self.listen_addr = layer.listen_addr;
        }
        if layer.tls_cert_path.is_some() {
            self.tls_cert_path = layer.tls_cert_path;
        }
        if layer.tls_key_path.is_some() {
            self.tls_key_path = layer.tls_key_path;
        }
        if layer.data_dir.is_some() {
            self.data_dir = layer.data_dir;
        }
        if layer.log_path.is_some() {
            self.log_path = layer.log_path;
        }
        if layer.login_gate_capacity.is_some() {
            self.login_gate_capacity = layer.login_gate_capacity;
        }
        if layer.ping_interval_secs.is_some() {
            self.ping_interval_secs = layer.ping_interval_secs;
        }
        if layer.environment_uuid.is_some() {
            self.environment_uuid = layer.environment_uuid;
        }
    }

    fn merge_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("FLEETD_LISTEN_ADDR") {
            self.listen_addr = Some(v);
        }
        if let Some(v) = get("FLEETD_TLS_CERT_PATH") {
            self.tls_cert_path = Some(v);
        }
        if let Some(v) = get("FLEETD_TLS_KEY_PATH") {
            self.tls_key_path = Some(v);
        }
        if let Some(v) = get("FLEETD_DATA_DIR") {
            self.data_dir = Some(v);
        }
        if let Some(v) = get("FLEETD_LOG_PATH") {
            self.log_path = Some(v);
        }
        if let Some(v) = get("FLEETD_LOGIN_GATE_CAPACITY") {
            self.login_gate_capacity = v.parse().ok();
        }
        if let Some(v) = get("FLEETD_PING_INTERVAL_SECS") {
            self.ping_interval_secs = v.parse().ok();
        }
        if let Some(v) = get("FLEETD_ENVIRONMENT_UUID") {
            self.environment_uuid = Some(v);
        }
    }

    /// Apply `--flag value` pairs parsed from the command line. Unknown
    /// flags are rejected outright rather than ignored, so a typo'd flag
    /// surfaces immediately instead of silently falling back to a default.
    fn merge_cli(&mut self, args: &[String]) -> Result<(), ConfigError> {
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "--listen-addr" => self.listen_addr = Some(next_value(&mut iter, flag)?),
                "--tls-cert" => self.tls_cert_path = Some(next_value(&mut iter, flag)?),
                "--tls-key" => self.tls_key_path = Some(next_value(&mut iter, flag)?),
                "--data-dir" => self.data_dir = Some(next_value(&mut iter, flag)?),
                "--log-path" => self.log_path = Some(next_value(&mut iter, flag)?),
                "--login-gate-capacity" => {
                    let raw = next_value(&mut iter, flag)?;
                    self.login_gate_capacity =
                        Some(raw.parse().map_err(|_| field_err("login_gate_capacity", format!("not a number: {raw:?}")))?);
                }
                "--ping-interval-secs" => {
                    let raw = next_value(&mut iter, flag)?;
                    self.ping_interval_secs =
                        Some(raw.parse().map_err(|_| field_err("ping_interval_secs", format!("not a number: {raw:?}")))?);
                }
                "--environment-uuid" => self.environment_uuid = Some(next_value(&mut iter, flag)?),
                "--config" => {
                    next_value(&mut iter, flag)?; // consumed by `load`, already applied
                }
                unknown => return Err(field_err("cli", format!("unrecognized flag {unknown:?}"))),
            }
        }
        Ok(())
    }
}

fn next_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String, ConfigError> {
    iter.next().cloned().ok_or_else(|| field_err("cli", format!("{flag} requires a value")))
}

impl FleetdConfig {
    /// Resolve the full layered configuration. `cli_args` is the raw
    /// argument vector excluding `argv[0]`; a leading `--config <path>` (if
    /// present) names the TOML base layer, otherwise no TOML layer is
    /// loaded and built-in defaults stand in its place.
    pub fn load(cli_args: &[String]) -> Result<Self, ConfigError> {
        let toml_path = find_config_flag(cli_args);
        let toml_layer = match toml_path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| field_err("config", format!("failed to read {path}: {e}")))?;
                toml::from_str(&contents).map_err(|e| field_err("config", format!("invalid TOML in {path}: {e}")))?
            }
            None => TomlLayer::default(),
        };

        let mut partial = PartialConfig::default();
        partial.merge_toml(toml_layer);
        partial.merge_env(|key| std::env::var(key).ok());
        partial.merge_cli(cli_args)?;

        let listen_addr = partial.listen_addr.unwrap_or_else(|| "0.0.0.0:17070".to_string());
        let listen_addr: SocketAddr =
            listen_addr.parse().map_err(|e| field_err("listen_addr", format!("{listen_addr:?} is not a socket address: {e}")))?;

        let tls_cert_path = partial.tls_cert_path.ok_or_else(|| field_err("tls_cert_path", "no TLS certificate path configured"))?;
        let tls_key_path = partial.tls_key_path.ok_or_else(|| field_err("tls_key_path", "no TLS key path configured"))?;

        let data_dir = partial.data_dir.unwrap_or_else(|| "/var/lib/fleetd".to_string());
        let log_path = partial.log_path.unwrap_or_else(|| format!("{data_dir}/all-machines.log"));

        Ok(FleetdConfig {
            listen_addr,
            tls_cert_path: PathBuf::from(tls_cert_path),
            tls_key_path: PathBuf::from(tls_key_path),
            data_dir: PathBuf::from(data_dir),
            log_path: PathBuf::from(log_path),
            login_gate_capacity: partial.login_gate_capacity.unwrap_or(fleet_transport::login::DEFAULT_LOGIN_CAPACITY),
            ping_interval: Duration::from_secs(partial.ping_interval_secs.unwrap_or(30)),
            environment_uuid: partial.environment_uuid.unwrap_or_else(|| "00000000-0000-0000-0000-000000000000".to_string()),
        })
    }
}

fn find_config_flag(args: &[String]) -> Option<String> {
    args.iter().position(|a| a == "--config").and_then(|i| args.get(i + 1)).cloned()
}
