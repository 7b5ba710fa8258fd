mod dns;
mod pubsub;
mod tls;

pub use dns::*;
pub use pubsub::*;
pub use tls::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control port used when a host entry does not name one.
pub const DEFAULT_CONTROL_PORT: u16 = 8910;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PxGridConfig {
    /// Control nodes, tried in listed order.
    #[serde(default)]
    pub hosts: Vec<ControlHost>,
    /// This consumer's pxGrid node name.
    #[serde(default)]
    pub node_name: String,
    /// Sent with `AccountActivate` when set.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
}

impl PxGridConfig {
    /// Append a control host. A zero port means the default control port.
    pub fn add_host(&mut self, host: impl Into<String>, control_port: u16) {
        let control_port = if control_port == 0 {
            DEFAULT_CONTROL_PORT
        } else {
            control_port
        };
        self.hosts.push(ControlHost {
            host: host.into(),
            control_port,
        });
    }

    /// Username for control-plane and capability calls. Falls back to the
    /// node name when not configured explicitly.
    pub fn username(&self) -> &str {
        match self.auth.username.as_deref() {
            Some(u) if !u.is_empty() => u,
            _ => &self.node_name,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hosts / auth / http
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHost {
    pub host: String,
    #[serde(default = "d_control_port")]
    pub control_port: u16,
}

impl ControlHost {
    /// `https://<host>:<port>/pxgrid/control/<operation>`
    pub fn control_url(&self, operation: &str) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "https://{host}:{}/pxgrid/control/{operation}",
            self.control_port
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    /// Accept `http://` URLs. Everything pxGrid advertises is HTTPS; this
    /// only exists for local test servers.
    #[serde(default)]
    pub allow_plaintext: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            allow_plaintext: false,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
fn d_30000() -> u64 {
    30_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl PxGridConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.hosts.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "hosts".into(),
                message: "at least one control host is required".into(),
            });
        }

        for (i, host) in self.hosts.iter().enumerate() {
            if host.host.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("hosts[{i}].host"),
                    message: "host must not be empty".into(),
                });
            }
            if host.control_port == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("hosts[{i}].control_port"),
                    message: "port must be greater than 0".into(),
                });
            }
        }

        if self.node_name.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "node_name".into(),
                message: "node_name must not be empty".into(),
            });
        }

        let has_password = self
            .auth
            .password
            .as_deref()
            .is_some_and(|p| !p.is_empty());
        if !has_password && self.tls.client_cert.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.password".into(),
                message: "either a password or a client certificate is required".into(),
            });
        }

        if self.tls.client_cert.is_some() != self.tls.client_key.is_some() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "tls.client_key".into(),
                message: "client_cert and client_key must be set together".into(),
            });
        }

        if self.tls.insecure {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "tls.insecure".into(),
                message: "certificate verification is disabled".into(),
            });
        }

        if self.http.allow_plaintext {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "http.allow_plaintext".into(),
                message: "plain HTTP is accepted, credentials may be sent unencrypted".into(),
            });
        }

        if self.pubsub.pong_wait_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "pubsub.pong_wait_ms".into(),
                message: "pong_wait_ms must be greater than 0".into(),
            });
        }

        errors
    }

    /// Validation issues with [`ConfigSeverity::Error`] only.
    pub fn errors(&self) -> Vec<ConfigError> {
        self.validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PxGridConfig {
        let mut cfg = PxGridConfig {
            node_name: "px-consumer".into(),
            ..Default::default()
        };
        cfg.add_host("ise-pan-1.example.com", 0);
        cfg.auth.password = Some("pw".into());
        cfg
    }

    #[test]
    fn zero_port_means_default() {
        let cfg = valid();
        assert_eq!(cfg.hosts[0].control_port, DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn control_url_shape() {
        let host = ControlHost {
            host: "ise-pan-1".into(),
            control_port: 8910,
        };
        assert_eq!(
            host.control_url("ServiceLookup"),
            "https://ise-pan-1:8910/pxgrid/control/ServiceLookup"
        );
    }

    #[test]
    fn control_url_brackets_ipv6() {
        let host = ControlHost {
            host: "fd00::10".into(),
            control_port: 8910,
        };
        assert_eq!(
            host.control_url("AccessSecret"),
            "https://[fd00::10]:8910/pxgrid/control/AccessSecret"
        );
    }

    #[test]
    fn username_falls_back_to_node_name() {
        let mut cfg = valid();
        assert_eq!(cfg.username(), "px-consumer");
        cfg.auth.username = Some("svc-account".into());
        assert_eq!(cfg.username(), "svc-account");
    }

    #[test]
    fn valid_config_has_no_errors() {
        assert!(valid().errors().is_empty());
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let mut cfg = valid();
        cfg.auth.password = None;
        let errs = cfg.errors();
        assert!(errs.iter().any(|e| e.field == "auth.password"));
    }

    #[test]
    fn cert_without_key_is_an_error() {
        let mut cfg = valid();
        cfg.tls.client_cert = Some("client.pem".into());
        assert!(cfg.errors().iter().any(|e| e.field == "tls.client_key"));
    }

    #[test]
    fn insecure_is_only_a_warning() {
        let mut cfg = valid();
        cfg.tls.insecure = true;
        assert!(cfg.errors().is_empty());
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn plaintext_is_off_by_default_and_warned_about() {
        let mut cfg = valid();
        assert!(!cfg.http.allow_plaintext);
        cfg.http.allow_plaintext = true;
        assert!(cfg.errors().is_empty());
        assert!(cfg.validate().iter().any(|e| e.field == "http.allow_plaintext"));
    }
}
