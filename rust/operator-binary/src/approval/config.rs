use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu};

pub const DATABASE_URL_ENV: &str = "KUBEAPP_DATABASE_URL";
pub const REDIS_URL_ENV: &str = "KUBEAPP_REDIS_URL";
pub const CACHE_TTL_ENV: &str = "KUBEAPP_CACHE_TTL_SECS";
pub const OUTBOX_POLL_ENV: &str = "KUBEAPP_OUTBOX_POLL_SECS";
pub const API_ADDR_ENV: &str = "KUBEAPP_API_ADDR";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_OUTBOX_POLL: Duration = Duration::from_secs(5);
const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("required environment variable [{name}] is not set"))]
    MissingEnv { name: &'static str },
    #[snafu(display("environment variable [{name}] is not a number of seconds"))]
    InvalidSeconds {
        source: std::num::ParseIntError,
        name: &'static str,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Connection and tuning settings of the approval workflow, read from the
/// environment at startup.
#[derive(Clone, Debug)]
pub struct ApprovalConfig {
    pub database_url: String,
    pub redis_url: String,
    pub cache_ttl: Duration,
    pub outbox_poll_interval: Duration,
    pub api_listen_addr: String,
}

impl ApprovalConfig {
    pub fn from_env() -> Result<Self> {
        Ok(ApprovalConfig {
            database_url: std::env::var(DATABASE_URL_ENV)
                .ok()
                .context(MissingEnvSnafu {
                    name: DATABASE_URL_ENV,
                })?,
            redis_url: std::env::var(REDIS_URL_ENV).ok().context(MissingEnvSnafu {
                name: REDIS_URL_ENV,
            })?,
            cache_ttl: seconds_from_env(CACHE_TTL_ENV)?.unwrap_or(DEFAULT_CACHE_TTL),
            outbox_poll_interval: seconds_from_env(OUTBOX_POLL_ENV)?
                .unwrap_or(DEFAULT_OUTBOX_POLL),
            api_listen_addr: std::env::var(API_ADDR_ENV)
                .unwrap_or_else(|_| DEFAULT_API_ADDR.to_string()),
        })
    }
}

fn seconds_from_env(name: &'static str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => {
            let seconds: u64 = raw.trim().parse().context(InvalidSecondsSnafu { name })?;
            Ok(Some(Duration::from_secs(seconds)))
        }
        Err(_) => Ok(None),
    }
}
