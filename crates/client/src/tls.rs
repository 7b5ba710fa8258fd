//! rustls client configuration shared by the HTTPS transport and the
//! pub/sub WebSocket dialer.

use std::path::Path;
use std::sync::Arc;

use px_domain::config::{TlsConfig, TrustPolicy};
use px_domain::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// Loaded trust anchors and client identity.
pub struct TlsContext {
    policy: TrustPolicy,
    roots: Arc<RootCertStore>,
    identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
}

impl TlsContext {
    /// Read every PEM file named by `cfg` up front.
    pub fn from_config(cfg: &TlsConfig) -> Result<Self> {
        let policy = cfg.trust_policy();
        let roots = match policy {
            TrustPolicy::CaPool => {
                let mut store = RootCertStore::empty();
                for path in &cfg.ca_files {
                    for cert in read_certs(path)? {
                        store
                            .add(cert)
                            .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;
                    }
                }
                store
            }
            TrustPolicy::System | TrustPolicy::Insecure => system_roots(),
        };

        let identity = match (&cfg.client_cert, &cfg.client_key) {
            (Some(cert), Some(key)) => Some((read_certs(cert)?, read_key(key)?)),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "client_cert and client_key must be set together".into(),
                ))
            }
        };

        Ok(Self {
            policy,
            roots: Arc::new(roots),
            identity,
        })
    }

    pub fn policy(&self) -> TrustPolicy {
        self.policy
    }

    /// Client config using the configured trust policy.
    pub fn client_config(&self) -> Result<ClientConfig> {
        self.build(None)
    }

    /// Client config trusting `roots` instead of the configured pool.
    /// Ignored when verification is disabled.
    pub fn client_config_with_roots(&self, roots: Arc<RootCertStore>) -> Result<ClientConfig> {
        self.build(Some(roots))
    }

    fn build(&self, roots: Option<Arc<RootCertStore>>) -> Result<ClientConfig> {
        let builder =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| Error::Tls(e.to_string()))?;

        let builder = if self.policy == TrustPolicy::Insecure {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        } else {
            builder.with_root_certificates(roots.unwrap_or_else(|| Arc::clone(&self.roots)))
        };

        match &self.identity {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain.clone(), key.clone_key())
                .map_err(|e| Error::Tls(format!("client certificate: {e}"))),
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

fn system_roots() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("{}: failed to parse certificates: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("{}: no certificates found", path.display())));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    PrivateKeyDer::from_pem_slice(&pem)
        .map_err(|e| Error::Tls(format!("{}: failed to parse private key: {e}", path.display())))
}

/// Accepts any server certificate. Only used with `tls.insecure = true`.
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
