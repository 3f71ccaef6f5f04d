use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub triage: TriageConfig,
    pub sla: SlaConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

/// Thresholds of the auto-resolve / escalate policy.
#[derive(Clone, Debug, PartialEq)]
pub struct TriageConfig {
    pub similarity_threshold: f64,
    pub informational_threshold: f64,
    pub min_answer_chars: usize,
    pub auto_resolve_confidence: f64,
    pub min_auto_confidence: f64,
    pub retrieval_k: usize,
    pub process_retrieval_k: usize,
    pub history_window: usize,
    pub source_filter: Option<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.20,
            informational_threshold: 0.15,
            min_answer_chars: 20,
            auto_resolve_confidence: 0.7,
            min_auto_confidence: 0.2,
            retrieval_k: 6,
            process_retrieval_k: 5,
            history_window: 10,
            source_filter: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlaConfig {
    pub accept_minutes: i64,
    pub remote_minutes: i64,
    pub check_interval: Duration,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            accept_minutes: 15,
            remote_minutes: 60,
            check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(1800),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get_str = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let triage_defaults = TriageConfig::default();
        let sla_defaults = SlaConfig::default();
        let session_defaults = SessionConfig::default();
        let retry_defaults = RetryConfig::default();

        let server = ServerConfig {
            host: get_str("SERVER_HOST", "127.0.0.1"),
            port: parse_or(&lookup, "SERVER_PORT", 8080)?,
        };

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .context("DATABASE_URL must be set")?,
            pool_size: parse_or(&lookup, "DATABASE_POOL_SIZE", 10)?,
        };

        let llm = LlmConfig {
            api_key: get_str("LLM_API_KEY", ""),
            base_url: get_str("LLM_BASE_URL", "https://api.openai.com/v1"),
            model: get_str("LLM_MODEL", "gpt-4o-mini"),
            embedding_model: get_str("EMBEDDING_MODEL", "text-embedding-3-small"),
            timeout: Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECS", 60)?),
        };

        let triage = TriageConfig {
            similarity_threshold: parse_or(
                &lookup,
                "TRIAGE_SIMILARITY_THRESHOLD",
                triage_defaults.similarity_threshold,
            )?,
            informational_threshold: parse_or(
                &lookup,
                "TRIAGE_INFORMATIONAL_THRESHOLD",
                triage_defaults.informational_threshold,
            )?,
            min_answer_chars: parse_or(
                &lookup,
                "TRIAGE_MIN_ANSWER_CHARS",
                triage_defaults.min_answer_chars,
            )?,
            auto_resolve_confidence: parse_or(
                &lookup,
                "TRIAGE_AUTO_RESOLVE_CONFIDENCE",
                triage_defaults.auto_resolve_confidence,
            )?,
            min_auto_confidence: triage_defaults.min_auto_confidence,
            retrieval_k: parse_or(&lookup, "TRIAGE_RETRIEVAL_K", triage_defaults.retrieval_k)?,
            process_retrieval_k: triage_defaults.process_retrieval_k,
            history_window: parse_or(
                &lookup,
                "TRIAGE_HISTORY_WINDOW",
                triage_defaults.history_window,
            )?,
            source_filter: lookup("TRIAGE_SOURCE_FILTER").filter(|v| !v.trim().is_empty()),
        };

        let sla = SlaConfig {
            accept_minutes: parse_or(&lookup, "SLA_ACCEPT_MINUTES", sla_defaults.accept_minutes)?,
            remote_minutes: parse_or(&lookup, "SLA_REMOTE_MINUTES", sla_defaults.remote_minutes)?,
            check_interval: Duration::from_secs(parse_or(
                &lookup,
                "SLA_CHECK_INTERVAL_SECS",
                sla_defaults.check_interval.as_secs(),
            )?),
        };

        let session = SessionConfig {
            capacity: parse_or(&lookup, "SESSION_CAPACITY", session_defaults.capacity)?,
            ttl: Duration::from_secs(parse_or(
                &lookup,
                "SESSION_TTL_SECS",
                session_defaults.ttl.as_secs(),
            )?),
        };

        let retry = RetryConfig {
            max_attempts: parse_or(&lookup, "PERSIST_RETRY_ATTEMPTS", retry_defaults.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "PERSIST_RETRY_BASE_MS",
                retry_defaults.base_delay.as_millis() as u64,
            )?),
        };

        let cors_origins = get_str("CORS_ORIGINS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            server,
            database,
            llm,
            triage,
            sla,
            session,
            retry,
            cors_origins,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")]))
            .expect("config");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.triage, TriageConfig::default());
        assert_eq!(config.sla.accept_minutes, 15);
        assert_eq!(config.sla.remote_minutes, 60);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_overrides_and_missing_database() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("TRIAGE_SIMILARITY_THRESHOLD", "0.3"),
            ("SLA_REMOTE_MINUTES", "90"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
        ]))
        .expect("config");
        assert!((config.triage.similarity_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.sla.remote_minutes, 90);
        assert_eq!(config.cors_origins.len(), 2);

        assert!(AppConfig::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_invalid_number_is_error() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("SLA_ACCEPT_MINUTES", "soon"),
        ]));
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("SLA_ACCEPT_MINUTES"));
    }
}
