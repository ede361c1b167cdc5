//! Process configuration.
//!
//! Settings merge from three layers, most specific first: environment
//! variables, an optional JSON config file, then built-in defaults. The one
//! mandatory setting is the pay-to address; a gate that silently defaulted the
//! recipient would route funds nowhere recoverable, so startup fails instead.

use alloy_primitives::Address;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::{env, fs, io};
use url::Url;

use crate::chains::DeploymentMode;

const ENV_HOST: &str = "HOST";
const ENV_PORT: &str = "PORT";
const ENV_MODE: &str = "DEPLOYMENT_MODE";
const ENV_PAY_TO: &str = "PAY_TO_ADDRESS";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Parser)]
#[command(name = "tollgate", about = "Payment-gated HTTP service speaking x402")]
pub struct CliArgs {
    /// Path to a JSON configuration file.
    #[arg(long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no pay-to address: set {ENV_PAY_TO} or `pay_to` in the config file")]
    MissingPayTo,
    #[error("invalid pay-to address: {0}")]
    InvalidPayTo(String),
}

/// On-disk shape. Every field optional; unknown keys are startup errors rather
/// than silent typos.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    mode: Option<DeploymentMode>,
    pay_to: Option<String>,
    rpc: HashMap<String, Url>,
}

/// Fully resolved configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mode: DeploymentMode,
    /// Address all gated routes require payment to.
    pub pay_to: Address,
    /// Per-chain RPC endpoint overrides, keyed by chain key.
    pub rpc: HashMap<String, Url>,
}

impl Config {
    pub fn load(args: &CliArgs) -> Result<Config, ConfigError> {
        let file = match &args.config {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            None => ConfigFile::default(),
        };

        let host = env::var(ENV_HOST)
            .ok()
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = env::var(ENV_PORT)
            .ok()
            .and_then(|value| value.parse().ok())
            .or(file.port)
            .unwrap_or(DEFAULT_PORT);
        let mode = mode_from_env().or(file.mode).unwrap_or(DeploymentMode::Test);

        let pay_to_raw = env::var(ENV_PAY_TO)
            .ok()
            .or(file.pay_to)
            .ok_or(ConfigError::MissingPayTo)?;
        let pay_to =
            Address::from_str(&pay_to_raw).map_err(|_| ConfigError::InvalidPayTo(pay_to_raw))?;

        Ok(Config {
            host,
            port,
            mode,
            pay_to,
            rpc: file.rpc,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn mode_from_env() -> Option<DeploymentMode> {
    let value = env::var(ENV_MODE).ok()?;
    match value.to_ascii_lowercase().as_str() {
        "production" => Some(DeploymentMode::Production),
        _ => Some(DeploymentMode::Test),
    }
}
