use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TLS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Skip server certificate verification entirely.
    #[serde(default)]
    pub insecure: bool,
    /// PEM files whose certificates form the trust pool. When non-empty the
    /// system roots are not trusted.
    #[serde(default)]
    pub ca_files: Vec<PathBuf>,
    /// PEM certificate chain presented for mutual TLS.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`.
    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

/// Which certificates a connection trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    System,
    CaPool,
    Insecure,
}

impl TlsConfig {
    pub fn trust_policy(&self) -> TrustPolicy {
        if self.insecure {
            TrustPolicy::Insecure
        } else if !self.ca_files.is_empty() {
            TrustPolicy::CaPool
        } else {
            TrustPolicy::System
        }
    }
}
