use serde::{Deserialize, Serialize};
use tracing::warn;

/// Runtime configuration, sourced from the environment (`CODEPOD_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Image every managed container is created from.
    pub image: String,
    /// Number of idle containers the pool tries to keep ready.
    pub prewarm_count: usize,
    /// Hard cap on containers counting against capacity (idle + busy + warming).
    pub max_containers: usize,
    /// Default idle TTL for sessions without their own timeout.
    pub session_timeout_seconds: u64,
    /// Upper bound for per-session timeout overrides.
    pub max_session_timeout_seconds: u64,
    /// Default working directory for commands.
    pub work_dir: String,
    /// Namespace for all managed-container labels and names.
    pub label_prefix: String,
    pub host: String,
    pub port: u16,
    /// Docker socket override; `None` uses the engine default.
    pub docker_socket: Option<String>,
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            prewarm_count: 2,
            max_containers: 10,
            session_timeout_seconds: 1800,
            max_session_timeout_seconds: 86400,
            work_dir: "/workspace".to_string(),
            label_prefix: "codepod".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            docker_socket: None,
            log_dir: "./logs".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let mut config = Config {
            image: env_or("CODEPOD_IMAGE", defaults.image),
            prewarm_count: env_parse("CODEPOD_PREWARM_COUNT", defaults.prewarm_count),
            max_containers: env_parse("CODEPOD_MAX_CONTAINERS", defaults.max_containers),
            session_timeout_seconds: env_parse(
                "CODEPOD_SESSION_TIMEOUT_SECONDS",
                defaults.session_timeout_seconds,
            ),
            max_session_timeout_seconds: env_parse(
                "CODEPOD_MAX_SESSION_TIMEOUT_SECONDS",
                defaults.max_session_timeout_seconds,
            ),
            work_dir: env_or("CODEPOD_WORK_DIR", defaults.work_dir),
            label_prefix: env_or("CODEPOD_LABEL_PREFIX", defaults.label_prefix),
            host: env_or("CODEPOD_HOST", defaults.host),
            port: env_parse("CODEPOD_PORT", defaults.port),
            docker_socket: std::env::var("CODEPOD_DOCKER_SOCKET").ok(),
            log_dir: env_or("CODEPOD_LOG_DIR", defaults.log_dir),
        };
        config.normalize();
        config
    }

    /// Clamps inconsistent values rather than failing startup.
    fn normalize(&mut self) {
        if self.max_containers == 0 {
            warn!("CODEPOD_MAX_CONTAINERS must be at least 1, using 1");
            self.max_containers = 1;
        }
        if self.prewarm_count > self.max_containers {
            warn!(
                "prewarm count {} exceeds max containers {}, clamping",
                self.prewarm_count, self.max_containers
            );
            self.prewarm_count = self.max_containers;
        }
        if self.session_timeout_seconds == 0 {
            warn!("CODEPOD_SESSION_TIMEOUT_SECONDS must be positive, using default");
            self.session_timeout_seconds = Config::default().session_timeout_seconds;
        }
        if self.max_session_timeout_seconds < self.session_timeout_seconds {
            self.max_session_timeout_seconds = self.session_timeout_seconds;
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert!(config.prewarm_count <= config.max_containers);
        assert!(config.session_timeout_seconds <= config.max_session_timeout_seconds);
    }

    #[test]
    fn normalize_clamps_prewarm_to_cap() {
        let mut config = Config {
            prewarm_count: 20,
            max_containers: 5,
            ..Config::default()
        };
        config.normalize();
        assert_eq!(config.prewarm_count, 5);
    }

    #[test]
    fn normalize_rejects_zero_capacity() {
        let mut config = Config {
            max_containers: 0,
            ..Config::default()
        };
        config.normalize();
        assert_eq!(config.max_containers, 1);
    }
}
