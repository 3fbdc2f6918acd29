//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// What the coordinator does after the resource holder connection fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HolderPolicy {
    /// Drop the holder and wait for a new one before serving more requesters
    #[default]
    Reconnect,
    /// Stop the coordinator with an error
    Shutdown,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Deadline for requester reads/writes in milliseconds (0 = wait forever)
    #[serde(rename = "requester-timeout-ms", default = "default_requester_timeout_ms")]
    pub requester_timeout_ms: u64,

    /// Deadline for resource holder reads/writes in milliseconds (0 = wait forever)
    #[serde(rename = "holder-timeout-ms", default)]
    pub holder_timeout_ms: u64,

    /// Resource holder failure policy
    #[serde(rename = "holder-policy", default)]
    pub holder_policy: HolderPolicy,
}

fn default_requester_timeout_ms() -> u64 {
    debug!("default_requester_timeout_ms: called");
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            requester_timeout_ms: default_requester_timeout_ms(),
            holder_timeout_ms: 0,
            holder_policy: HolderPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            requester: millis(self.requester_timeout_ms),
            holder: millis(self.holder_timeout_ms),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Per-peer I/O deadlines for one session; `None` waits indefinitely
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub requester: Option<Duration>,
    pub holder: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.requester_timeout_ms, 30_000);
        assert_eq!(config.holder_timeout_ms, 0);
        assert_eq!(config.holder_policy, HolderPolicy::Reconnect);
    }

    #[test]
    fn test_zero_means_no_deadline() {
        let timeouts = CoordinatorConfig::default().timeouts();
        assert_eq!(timeouts.requester, Some(Duration::from_secs(30)));
        assert_eq!(timeouts.holder, None);
    }

    #[test]
    fn test_parse_kebab_case() {
        let yaml = "requester-timeout-ms: 500\nholder-policy: shutdown\n";
        let config: CoordinatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.requester_timeout_ms, 500);
        assert_eq!(config.holder_timeout_ms, 0);
        assert_eq!(config.holder_policy, HolderPolicy::Shutdown);
    }
}
