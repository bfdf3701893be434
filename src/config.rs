//! Process configuration from the environment
//!
//! Every setting has a default. A value that fails to parse, or a zero where
//! zero is meaningless, is logged and replaced by the default rather than
//! aborting startup.

use crate::llm::LlmConfig;
use crate::session::EngineConfig;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub engine: EngineConfig,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let engine_defaults = EngineConfig::default();
        let llm_defaults = LlmConfig::default();

        let engine = EngineConfig {
            max_round: positive_or(&lookup, "CREW_MAX_ROUND", engine_defaults.max_round),
            message_retry_ceiling: parse_or(
                &lookup,
                "CREW_MESSAGE_RETRY_CEILING",
                engine_defaults.message_retry_ceiling,
            ),
            session_restart_ceiling: parse_or(
                &lookup,
                "CREW_SESSION_RESTART_CEILING",
                engine_defaults.session_restart_ceiling,
            ),
            retry_base_delay: millis_or(
                &lookup,
                "CREW_RETRY_BASE_DELAY_MS",
                engine_defaults.retry_base_delay,
            ),
            retry_max_delay: millis_or(
                &lookup,
                "CREW_RETRY_MAX_DELAY_MS",
                engine_defaults.retry_max_delay,
            ),
            max_tokens: positive_or(&lookup, "CREW_MAX_TOKENS", engine_defaults.max_tokens),
        };

        let llm = LlmConfig {
            anthropic_api_key: non_empty(lookup("ANTHROPIC_API_KEY")),
            gateway: non_empty(lookup("LLM_GATEWAY")),
            model: non_empty(lookup("CREW_MODEL")).unwrap_or(llm_defaults.model),
            timeout: Duration::from_secs(positive_or(
                &lookup,
                "CREW_LLM_TIMEOUT_SECS",
                llm_defaults.timeout.as_secs(),
            )),
        };

        Self {
            port: parse_or(&lookup, "CREW_PORT", 8000),
            engine,
            llm,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = non_empty(lookup(name)) else {
        return default;
    };
    if let Ok(value) = raw.trim().parse() {
        value
    } else {
        tracing::warn!(variable = name, value = %raw, default = %default, "Invalid value, using default");
        default
    }
}

/// `parse_or` for settings that must be non-zero
fn positive_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + Default + PartialEq + std::fmt::Display,
{
    let value = parse_or(lookup, name, default);
    if value == T::default() {
        tracing::warn!(variable = name, default = %default, "Zero is not allowed, using default");
        default
    } else {
        value
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Duration {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_or(lookup, name, default_ms))
}
