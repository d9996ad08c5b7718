//! Settings read from the environment at startup.
//!
//! Every value has a default, so an empty environment yields a working
//! configuration. Values that are present but malformed are errors rather
//! than silently replaced.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{
    DEFAULT_CHECK_TIMEOUT_SECS, DEFAULT_EXTERNAL_API_URL, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SERVER_ADDR, DEFAULT_WORKER_POOL_SIZE, default_db_path,
};
use crate::models::Verdict;
use crate::pipeline::{PipelineConfig, Policy, UnknownCheckPolicy};

pub const SERVER_ADDR: &str = "SERVER_ADDR";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const DB_PATH: &str = "GUARDIAN_DB";
pub const WORKER_POOL_SIZE: &str = "PIPELINE_WORKER_POOL_SIZE";
pub const CHECK_TIMEOUT_SECS: &str = "PIPELINE_CHECK_TIMEOUT_SECS";
pub const REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";
pub const EXTERNAL_API_URL: &str = "EXTERNAL_API_URL";
pub const ON_MISSING_CHECKS: &str = "PIPELINE_ON_MISSING_CHECKS";
pub const ON_UNKNOWN_CHECK: &str = "PIPELINE_ON_UNKNOWN_CHECK";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("PIPELINE_WORKER_POOL_SIZE must be at least 1")]
    ZeroWorkers,

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_addr: String,
    pub db_path: PathBuf,
    pub worker_pool_size: NonZeroUsize,
    /// `None` disables the per-check deadline.
    pub check_timeout: Option<Duration>,
    /// `None` lets a `/send` call run until its checks finish.
    pub request_timeout: Option<Duration>,
    pub external_api_url: String,
    pub policy: Policy,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server_addr = match (get(SERVER_ADDR), get(SERVER_PORT)) {
            (Some(addr), _) => addr,
            (None, Some(port)) => {
                let port: u16 = parse(SERVER_PORT, &port)?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_SERVER_ADDR.to_string(),
        };

        let worker_pool_size = match get(WORKER_POOL_SIZE) {
            Some(raw) => {
                let n: usize = parse(WORKER_POOL_SIZE, &raw)?;
                NonZeroUsize::new(n).ok_or(ConfigError::ZeroWorkers)?
            }
            None => NonZeroUsize::new(DEFAULT_WORKER_POOL_SIZE).ok_or(ConfigError::ZeroWorkers)?,
        };

        let check_timeout = match get(CHECK_TIMEOUT_SECS) {
            Some(raw) => match parse::<u64>(CHECK_TIMEOUT_SECS, &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => Some(Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS)),
        };

        let request_timeout = match get(REQUEST_TIMEOUT_SECS) {
            Some(raw) => match parse::<u64>(REQUEST_TIMEOUT_SECS, &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        };

        let on_missing_checks = match get(ON_MISSING_CHECKS) {
            Some(raw) => parse::<Verdict>(ON_MISSING_CHECKS, &raw)?,
            None => Verdict::Benign,
        };

        let on_unknown_check = match get(ON_UNKNOWN_CHECK) {
            Some(raw) => parse::<UnknownCheckPolicy>(ON_UNKNOWN_CHECK, &raw)?,
            None => UnknownCheckPolicy::default(),
        };

        Ok(Self {
            server_addr,
            db_path: get(DB_PATH).map(PathBuf::from).unwrap_or_else(default_db_path),
            worker_pool_size,
            check_timeout,
            request_timeout,
            external_api_url: get(EXTERNAL_API_URL)
                .unwrap_or_else(|| DEFAULT_EXTERNAL_API_URL.to_string()),
            policy: Policy {
                on_missing_checks,
                on_unknown_check,
            },
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            worker_pool_size: self.worker_pool_size,
            check_timeout: self.check_timeout,
            policy: self.policy,
        }
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
