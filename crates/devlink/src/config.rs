use devlink_dispatch::TickConfig;
use serde::Deserialize;

use crate::log_forward::DEFAULT_MAX_LOG_LENGTH;

/// Application-side settings.
///
/// Every field has a default, so a host can deserialize a partial document
/// from whatever format it already uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the listener binds to.
    pub bind_addr: String,
    /// Request path controllers must use in the handshake.
    pub path: String,
    /// Processing-loop rate.
    pub tick_rate_hz: u32,
    /// Forwarded log lines are cut to this many characters.
    pub max_log_length: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5637".to_string(),
            path: "/devlink".to_string(),
            tick_rate_hz: 60,
            max_log_length: DEFAULT_MAX_LOG_LENGTH,
        }
    }
}

impl AppConfig {
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn tick_rate_hz(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    pub fn max_log_length(mut self, chars: usize) -> Self {
        self.max_log_length = chars;
        self
    }

    /// Pacing for the processing loop, clamped to the supported range.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig::with_rate(self.tick_rate_hz).validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:5637");
        assert_eq!(cfg.path, "/devlink");
        assert_eq!(cfg.tick_rate_hz, 60);
        assert_eq!(cfg.max_log_length, 1024);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"tick_rate_hz": 30}"#).unwrap();
        assert_eq!(cfg.tick_rate_hz, 30);
        assert_eq!(cfg.path, "/devlink");
    }

    #[test]
    fn test_tick_config_is_clamped() {
        let cfg = AppConfig::default().tick_rate_hz(10_000);
        assert_eq!(cfg.tick_config().tick_rate_hz, TickConfig::MAX_TICK_RATE_HZ);
        let cfg = AppConfig::default().tick_rate_hz(0);
        assert_eq!(cfg.tick_config().tick_rate_hz, 1);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = AppConfig::default()
            .bind("127.0.0.1:0")
            .path("/debug")
            .max_log_length(80);
        assert_eq!(cfg.bind_addr, "127.0.0.1:0");
        assert_eq!(cfg.path, "/debug");
        assert_eq!(cfg.max_log_length, 80);
    }
}
