//! Configuration loading: CLI flags / env vars override a JSON config file,
//! which overrides built-in defaults. Mirrors the layering in the teacher's
//! `DaemonConfig::new` (`daemon/src/config/mod.rs`), with a JSON file instead
//! of TOML since the wire format this service's config uses is JSON.

use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ConcdError;

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_url_path_root() -> String {
    "/".to_string()
}

fn default_pool_size() -> i64 {
    4
}

fn default_exec_max_seconds() -> u64 {
    300
}

fn default_result_persist_seconds() -> u64 {
    3600
}

/// `apiServer` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_url_path_root")]
    pub url_path_root: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub ssl_cert_file: Option<String>,
    #[serde(default)]
    pub ssl_key_file: Option<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            url_path_root: default_url_path_root(),
            allowed_origins: Vec::new(),
            ssl_cert_file: None,
            ssl_key_file: None,
        }
    }
}

/// `cacheDb` section — the external key/value store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDbConfig {
    #[serde(default = "default_cache_db_address")]
    pub address: String,
    #[serde(default)]
    pub database: i64,
}

fn default_cache_db_address() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for CacheDbConfig {
    fn default() -> Self {
        Self {
            address: default_cache_db_address(),
            database: 0,
        }
    }
}

/// `workerMaster` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMasterConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: i64,
    pub program: String,
    #[serde(default)]
    pub program_args: Vec<String>,
    #[serde(default = "default_exec_max_seconds")]
    pub exec_max_seconds: u64,
    #[serde(default = "default_result_persist_seconds")]
    pub task_result_persist_max_seconds: u64,
}

impl Default for WorkerMasterConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            program: String::new(),
            program_args: Vec::new(),
            exec_max_seconds: default_exec_max_seconds(),
            task_result_persist_max_seconds: default_result_persist_seconds(),
        }
    }
}

/// The full JSON config file schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default)]
    pub api_server: ApiServerConfig,
    #[serde(default)]
    pub cache_db: CacheDbConfig,
    #[serde(default)]
    pub cache_root_dir: String,
    #[serde(default)]
    pub worker_master: WorkerMasterConfig,
    #[serde(default)]
    pub log_path: String,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConcdError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConcdError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConcdError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// CLI flags, layered on top of the JSON file.
#[derive(Debug, Parser)]
#[command(name = "concd", about = "Concordance notification hub + worker pool master")]
pub struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "CONCD_CONFIG")]
    pub config: Option<String>,

    /// Overrides apiServer.address.
    #[arg(long, env = "CONCD_PORT")]
    pub port: Option<u16>,

    /// Overrides logPath; empty means log to stderr.
    #[arg(long, env = "CONCD_LOG")]
    pub log: Option<String>,
}

/// Fully resolved, effective configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_server: ApiServerConfig,
    pub cache_db: CacheDbConfig,
    pub cache_root_dir: String,
    pub worker_master: WorkerMasterConfig,
    pub log_path: String,
}

impl Config {
    /// Build the effective config from CLI args layered over an optional
    /// JSON file layered over defaults. Fatal on any load/parse error —
    /// the caller should exit non-zero before serving (matches the
    /// distilled spec's "config load failure" behaviour).
    pub fn resolve(args: &Args) -> Result<Self, ConcdError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(Path::new(path))?,
            None => FileConfig::default(),
        };

        let mut api_server = file.api_server;
        if let Some(port) = args.port {
            let host = api_server
                .address
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            api_server.address = format!("{host}:{port}");
        }

        let log_path = args.log.clone().unwrap_or(file.log_path);

        Ok(Self {
            api_server,
            cache_db: file.cache_db,
            cache_root_dir: file.cache_root_dir,
            worker_master: file.worker_master,
            log_path,
        })
    }
}
