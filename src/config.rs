//! Configuration types.
//!
//! Everything is read from the environment. A `.env` file, if present, is
//! loaded by the binary before [`RelayConfig::from_env`] runs.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::bus::AmqpConfig;
use crate::error::ConfigError;
use crate::feed::{HttpFeedConfig, RecordPolicy};
use crate::poller::{Schedule, WarmupConfig};

const DEFAULT_DB_PATH: &str = "./data/channel-relay.db";
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Where items are persisted.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Local libsql file.
    Local { path: PathBuf },
    /// Remote libsql server.
    Remote {
        url: String,
        auth_token: SecretString,
    },
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Feed identifier, also used as the channel key in the store.
    pub channel: String,
    pub feed: HttpFeedConfig,
    /// Optional cap on records examined per tick.
    pub max_scan: Option<usize>,
    pub store: StoreConfig,
    pub amqp: AmqpConfig,
    /// Exchange the batches are published to.
    pub exchange: String,
    pub routing_key: String,
    pub schedule: Schedule,
    pub warmup: WarmupConfig,
    /// Bound on each store write and publish.
    pub call_timeout: Duration,
    pub record_policy: RecordPolicy,
    /// Directory for daily-rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset. Values that are present but malformed
    /// are errors rather than silently replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let channel = env.required("CHANNEL_NAME")?;
        let call_timeout = Duration::from_secs(
            env.parsed::<u64>("CALL_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
        );
        if call_timeout.is_zero() {
            return Err(invalid("CALL_TIMEOUT_SECS", "must be greater than zero"));
        }

        let page_size = env.parsed::<usize>("FEED_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(invalid("FEED_PAGE_SIZE", "must be greater than zero"));
        }
        let feed = HttpFeedConfig {
            base_url: env.required("FEED_API_URL")?,
            token: SecretString::from(env.get("FEED_API_TOKEN").unwrap_or_default()),
            page_size,
            request_timeout: call_timeout,
        };

        let store = match env.get("DB_URL") {
            Some(url) => StoreConfig::Remote {
                url,
                auth_token: SecretString::from(env.get("DB_AUTH_TOKEN").unwrap_or_default()),
            },
            None => StoreConfig::Local {
                path: PathBuf::from(env.get("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into())),
            },
        };

        let amqp = AmqpConfig {
            host: env.get("AMQP_HOST").unwrap_or_else(|| "localhost".into()),
            port: env.parsed::<u16>("AMQP_PORT")?.unwrap_or(5672),
            user: env.get("AMQP_USER").unwrap_or_else(|| "guest".into()),
            password: SecretString::from(env.get("AMQP_PASS").unwrap_or_else(|| "guest".into())),
            vhost: env.get("AMQP_VHOST").unwrap_or_else(|| "/".into()),
        };

        let schedule = match (env.get("CRON"), env.parsed::<u64>("POLL_INTERVAL_SECS")?) {
            (Some(expression), _) => {
                Schedule::cron(&expression).map_err(|e| invalid("CRON", e.to_string()))?
            }
            (None, Some(0)) => {
                return Err(invalid("POLL_INTERVAL_SECS", "must be greater than zero"));
            }
            (None, Some(secs)) => Schedule::Interval(Duration::from_secs(secs)),
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    key: "CRON".into(),
                    hint: "Set CRON (e.g. '*/5 * * * *') or POLL_INTERVAL_SECS".into(),
                });
            }
        };

        let max_scan = env.parsed::<usize>("FEED_MAX_SCAN")?;
        if max_scan == Some(0) {
            return Err(invalid("FEED_MAX_SCAN", "must be greater than zero"));
        }

        let defaults = WarmupConfig::default();
        let warmup = WarmupConfig {
            window_days: env.parsed("WARMUP_DAYS")?.unwrap_or(defaults.window_days),
            fallback_count: env.parsed("WARMUP_COUNT")?.unwrap_or(defaults.fallback_count),
            query_timeout: call_timeout,
        };

        Ok(Self {
            channel,
            feed,
            max_scan,
            store,
            amqp,
            exchange: env.required("AMQP_EXCHANGE")?,
            routing_key: env.required("AMQP_ROUTING_KEY")?,
            schedule,
            warmup,
            call_timeout,
            record_policy: env.parsed("RECORD_POLICY")?.unwrap_or_default(),
            log_dir: env.get("LOG_DIR").map(PathBuf::from),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, format!("'{raw}': {e}"))))
            .transpose()
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
