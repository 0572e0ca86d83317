use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;
use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::server::{AllowAnyAuthenticatedClient, UnparsedCertRevocationList};
use rustls::version::{TLS12, TLS13};
use rustls::{
    Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName,
    SupportedCipherSuite, SupportedProtocolVersion, ALL_CIPHER_SUITES, DEFAULT_CIPHER_SUITES,
};

use crate::options::{cipher_suite_name, ContextOptions, VerifyMode};

use super::error::TlsError;

/// Which end of the handshake a context drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}

/// Certificate material and TLS constraints for building a context.
///
/// Everything is optional; what a role actually requires is checked when
/// the context is built. Cipher list is a colon-separated list of suite
/// names, versions a comma-separated list of `TLSv1.2` / `TLSv1.3`.
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub ca_dir: Option<PathBuf>,
    pub crl_path: Option<PathBuf>,
    pub cipher_list: Option<String>,
    pub tls_versions: Option<String>,
    pub verify_mode: VerifyMode,
}

impl TlsMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn with_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    pub fn with_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    pub fn with_ca_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_dir = Some(path.into());
        self
    }

    pub fn with_crl(mut self, path: impl Into<PathBuf>) -> Self {
        self.crl_path = Some(path.into());
        self
    }

    pub fn with_cipher_list(mut self, list: impl Into<String>) -> Self {
        self.cipher_list = Some(list.into());
        self
    }

    pub fn with_tls_versions(mut self, versions: impl Into<String>) -> Self {
        self.tls_versions = Some(versions.into());
        self
    }

    pub fn with_verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }
}

pub(crate) enum ContextInner {
    Client {
        config: Arc<ClientConfig>,
        domain: String,
    },
    Server {
        config: Arc<ServerConfig>,
    },
}

/// Shared TLS configuration, built once and cloned into every connection.
///
/// Construction validates the material up front; a failed build leaves
/// no usable context behind.
pub struct TlsContext {
    inner: ContextInner,
    options: ContextOptions,
}

impl TlsContext {
    /// Build a client context. `domain` is the peer name presented for SNI
    /// and certificate verification.
    pub fn client(material: TlsMaterial, domain: impl Into<String>) -> Result<Self, TlsError> {
        let domain = domain.into();
        let suites = parse_cipher_list(material.cipher_list.as_deref())?;
        let versions = parse_versions(material.tls_versions.as_deref())?;

        let builder = ClientConfig::builder()
            .with_cipher_suites(&suites)
            .with_safe_default_kx_groups()
            .with_protocol_versions(&versions)
            .map_err(|err| TlsError::BadInput(err.to_string()))?;

        let verifier: Arc<dyn ServerCertVerifier> = match material.verify_mode {
            VerifyMode::Peer => {
                let roots = load_root_store(&material)?;
                Arc::new(WebPkiVerifier::new(roots, None))
            }
            VerifyMode::None => {
                debug!("certificate verification disabled");
                Arc::new(NoCertificateVerification)
            }
        };
        let builder = builder.with_custom_certificate_verifier(verifier);

        let config = match (&material.cert_path, &material.key_path) {
            (Some(cert), Some(key)) => {
                let certs = load_certs(cert)?;
                let key = load_key(key)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|err| TlsError::Certificate(err.to_string()))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(TlsError::BadInput(
                    "client cert and key must be given together".to_owned(),
                ))
            }
        };

        let options = context_options(TlsRole::Client, &suites, &versions, material.verify_mode);

        Ok(Self {
            inner: ContextInner::Client {
                config: Arc::new(config),
                domain,
            },
            options,
        })
    }

    /// Build a server context. A certificate and key are required.
    pub fn server(material: TlsMaterial) -> Result<Self, TlsError> {
        let suites = parse_cipher_list(material.cipher_list.as_deref())?;
        let versions = parse_versions(material.tls_versions.as_deref())?;

        let builder = ServerConfig::builder()
            .with_cipher_suites(&suites)
            .with_safe_default_kx_groups()
            .with_protocol_versions(&versions)
            .map_err(|err| TlsError::BadInput(err.to_string()))?;

        let builder = match material.verify_mode {
            VerifyMode::Peer => {
                let roots = load_root_store(&material)?;
                let verifier = AllowAnyAuthenticatedClient::new(roots);
                let verifier = match &material.crl_path {
                    Some(path) => {
                        let crls = load_crls(path)?;
                        verifier
                            .with_crls(crls)
                            .map_err(|err| TlsError::Certificate(format!("{:?}", err)))?
                    }
                    None => verifier,
                };
                builder.with_client_cert_verifier(verifier.boxed())
            }
            VerifyMode::None => builder.with_no_client_auth(),
        };

        let (cert_path, key_path) = match (&material.cert_path, &material.key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(TlsError::BadInput(
                    "server requires a certificate and key".to_owned(),
                ))
            }
        };

        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        let config = builder
            .with_single_cert(certs, key)
            .map_err(|err| TlsError::Certificate(err.to_string()))?;

        let options = context_options(TlsRole::Server, &suites, &versions, material.verify_mode);

        Ok(Self {
            inner: ContextInner::Server {
                config: Arc::new(config),
            },
            options,
        })
    }

    pub fn role(&self) -> TlsRole {
        match &self.inner {
            ContextInner::Client { .. } => TlsRole::Client,
            ContextInner::Server { .. } => TlsRole::Server,
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.options.verify_mode
    }

    /// Peer name for a client context, ready for the handshake.
    pub(crate) fn server_name(&self) -> Result<ServerName, TlsError> {
        match &self.inner {
            ContextInner::Client { domain, .. } => ServerName::try_from(domain.as_str())
                .map_err(|err| TlsError::BadInput(format!("invalid peer name: {}", err))),
            ContextInner::Server { .. } => Err(TlsError::BadInput(
                "server context has no peer name".to_owned(),
            )),
        }
    }

    pub(crate) fn inner(&self) -> &ContextInner {
        &self.inner
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("role", &self.role())
            .field("options", &self.options)
            .finish()
    }
}

fn context_options(
    role: TlsRole,
    suites: &[SupportedCipherSuite],
    versions: &[&'static SupportedProtocolVersion],
    verify_mode: VerifyMode,
) -> ContextOptions {
    ContextOptions {
        role,
        cipher_suites: suites.iter().map(cipher_suite_name).collect(),
        protocol_versions: versions
            .iter()
            .map(|v| crate::options::protocol_version_name(v.version))
            .collect(),
        verify_mode,
    }
}

/// Parse a comma-separated version constraint. Empty means both
/// supported versions; any token outside {TLSv1.2, TLSv1.3} is rejected
/// outright so a misconfigured factory never comes up.
fn parse_versions(
    spec: Option<&str>,
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    let spec = match spec {
        Some(spec) if !spec.trim().is_empty() => spec,
        _ => return Ok(vec![&TLS12, &TLS13]),
    };

    let mut versions = Vec::new();
    for token in spec.split(',') {
        match token.trim() {
            "TLSv1.2" => versions.push(&TLS12),
            "TLSv1.3" => versions.push(&TLS13),
            other => return Err(TlsError::UnsupportedVersion(other.to_owned())),
        }
    }
    Ok(versions)
}

/// Parse a colon-separated cipher list against the suites the library
/// supports. Empty means the library defaults; a list matching nothing
/// is an error.
fn parse_cipher_list(spec: Option<&str>) -> Result<Vec<SupportedCipherSuite>, TlsError> {
    let spec = match spec {
        Some(spec) if !spec.trim().is_empty() => spec,
        _ => return Ok(DEFAULT_CIPHER_SUITES.to_vec()),
    };

    let wanted: Vec<&str> = spec.split(':').map(str::trim).collect();
    let suites: Vec<SupportedCipherSuite> = ALL_CIPHER_SUITES
        .iter()
        .filter(|suite| wanted.iter().any(|name| *name == cipher_suite_name(suite)))
        .copied()
        .collect();

    if suites.is_empty() {
        return Err(TlsError::BadInput(format!(
            "no supported cipher in list: {}",
            spec
        )));
    }
    Ok(suites)
}

pub(crate) fn load_certs(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    let file = File::open(path)
        .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

pub(crate) fn load_key(path: &Path) -> Result<PrivateKey, TlsError> {
    let file = File::open(path)
        .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
    let mut reader = BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;

    if keys.is_empty() {
        let file = File::open(path)
            .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
        let mut reader = BufReader::new(file);
        keys = rustls_pemfile::rsa_private_keys(&mut reader)
            .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
    }

    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| TlsError::Certificate(format!("no private key found in {}", path.display())))
}

fn load_crls(path: &Path) -> Result<Vec<UnparsedCertRevocationList>, TlsError> {
    let file = File::open(path)
        .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
    let mut reader = BufReader::new(file);
    let crls = rustls_pemfile::crls(&mut reader)
        .map_err(|err| TlsError::Certificate(format!("{}: {}", path.display(), err)))?;
    Ok(crls.into_iter().map(UnparsedCertRevocationList).collect())
}

/// Trust anchors from `ca_path` plus every PEM file under `ca_dir`.
fn load_root_store(material: &TlsMaterial) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &material.ca_path {
        for cert in load_certs(path)? {
            roots
                .add(&cert)
                .map_err(|err| TlsError::Certificate(err.to_string()))?;
        }
    }

    if let Some(dir) = &material.ca_dir {
        let entries = std::fs::read_dir(dir)
            .map_err(|err| TlsError::Certificate(format!("{}: {}", dir.display(), err)))?;
        for entry in entries {
            let entry =
                entry.map_err(|err| TlsError::Certificate(format!("{}: {}", dir.display(), err)))?;
            let path = entry.path();
            let is_pem = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("pem") | Some("crt")
            );
            if is_pem {
                for cert in load_certs(&path)? {
                    roots
                        .add(&cert)
                        .map_err(|err| TlsError::Certificate(err.to_string()))?;
                }
            }
        }
    }

    Ok(roots)
}

struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        debug!("accepting server certificate without verification");
        Ok(ServerCertVerified::assertion())
    }
}
