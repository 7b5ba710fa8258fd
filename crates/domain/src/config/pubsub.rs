use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pub/sub keepalive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// How long a connection may go without a pong before it is dead.
    #[serde(default = "d_60000")]
    pub pong_wait_ms: u64,
    /// How long the liveness probe on an existing connection waits for a
    /// pong before treating it as half-open.
    #[serde(default = "d_5000")]
    pub probe_timeout_ms: u64,
    /// Upper bound on the STOMP CONNECT/CONNECTED exchange.
    #[serde(default = "d_10000")]
    pub handshake_timeout_ms: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: 60_000,
            probe_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl PubSubConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Pings go out at 90% of the pong window.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis((self.pong_wait_ms.saturating_mul(9) / 10).max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_60000() -> u64 {
    60_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_10000() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_ninety_percent_of_pong_wait() {
        let cfg = PubSubConfig::default();
        assert_eq!(cfg.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn huge_pong_wait_does_not_overflow() {
        let cfg = PubSubConfig {
            pong_wait_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(cfg.ping_period(), Duration::from_millis(u64::MAX / 10));
    }
}
