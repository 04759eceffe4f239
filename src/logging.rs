// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Logging
//!
//! Installs the process-wide `tracing` subscriber and builds the spans used by
//! the connection manager, the publisher and the consumer.
//!
//! * `LOG_LEVEL` sets the filter directive (e.g. `info`, `debug,lapin=warn`),
//!   defaulting to `info`.
//! * `ENV` is attached to every component span as the `env` field.
//! * `APP_ENV` (or `NODE_ENV`) set to `development` switches from structured
//!   JSON to human-readable output.

use crate::errors::AmqpError;
use std::{env, sync::OnceLock};
use tracing::{info, info_span, Span};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

pub const LOG_LEVEL_ENV_KEY: &str = "LOG_LEVEL";
pub const ENV_ENV_KEY: &str = "ENV";
pub const APP_ENV_ENV_KEY: &str = "APP_ENV";
pub const NODE_ENV_ENV_KEY: &str = "NODE_ENV";

const DEFAULT_LEVEL: &str = "info";
const DEVELOPMENT: &str = "development";

static ENVIRONMENT: OnceLock<String> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub level: String,
    pub environment: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: DEFAULT_LEVEL.to_owned(),
            environment: None,
            format: LogFormat::default(),
        }
    }
}

impl LoggerConfig {
    /// Reads the logger settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let development = [APP_ENV_ENV_KEY, NODE_ENV_ENV_KEY]
            .iter()
            .filter_map(|key| lookup(key))
            .any(|value| value.eq_ignore_ascii_case(DEVELOPMENT));

        LoggerConfig {
            level: lookup(LOG_LEVEL_ENV_KEY)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LEVEL.to_owned()),
            environment: lookup(ENV_ENV_KEY).filter(|v| !v.is_empty()),
            format: if development {
                LogFormat::Pretty
            } else {
                LogFormat::Json
            },
        }
    }
}

/// Installs the global subscriber.
///
/// Only the first successful call installs a subscriber, later calls are
/// no-ops. An invalid `level` directive is reported as a configuration error.
pub fn init_logging(cfg: &LoggerConfig) -> Result<(), AmqpError> {
    let filter = EnvFilter::try_new(&cfg.level)
        .map_err(|err| AmqpError::ConfigurationError(format!("{}: {}", LOG_LEVEL_ENV_KEY, err)))?;

    let _ = ENVIRONMENT.set(cfg.environment.clone().unwrap_or_default());

    let fmt_layer = match cfg.format {
        LogFormat::Json => fmt::layer().with_target(false).json().boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        info!(level = %cfg.level, format = ?cfg.format, "tracing initialised");
    }

    Ok(())
}

/// Environment tag recorded by [`init_logging`], empty until then.
pub fn environment() -> &'static str {
    ENVIRONMENT.get().map(String::as_str).unwrap_or_default()
}

/// Span for one operation of a component, e.g. `("RabbitMQ_Consumer", "consume")`.
pub fn component_span(component: &'static str, method: &'static str) -> Span {
    info_span!("rabbitmq", component, method, env = environment())
}

/// Span wrapping the handling of a single consumed message.
pub fn message_span(queue: &str, correlation_id: Option<&str>) -> Span {
    info_span!(
        "message",
        queue,
        correlation_id = correlation_id.unwrap_or_default(),
        env = environment()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_json_at_info() {
        assert_eq!(LoggerConfig::from_lookup(lookup(&[])), LoggerConfig::default());
    }

    #[test]
    fn development_switches_to_pretty() {
        let cfg = LoggerConfig::from_lookup(lookup(&[
            (NODE_ENV_ENV_KEY, "development"),
            (LOG_LEVEL_ENV_KEY, "debug"),
            (ENV_ENV_KEY, "staging"),
        ]));

        assert_eq!(cfg.format, LogFormat::Pretty);
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn invalid_level_is_rejected() {
        let cfg = LoggerConfig {
            level: "rabbitmq=loud".to_owned(),
            ..LoggerConfig::default()
        };
        assert!(init_logging(&cfg).unwrap_err().is_configuration());
    }
}
