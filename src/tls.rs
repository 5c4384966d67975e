//! TLS provisioning for the webhook listener.
//!
//! The API server calls the webhook over HTTPS. At startup we:
//! 1. Fetch the client CA bundle the cluster publishes in
//!    `kube-system/extension-apiserver-authentication`
//! 2. Load the serving certificate pair from `{certdir}/{pair}.crt|.key`
//!    and check that the key belongs to the certificate
//! 3. Build a rustls `ServerConfig` that verifies client certificates
//!    against the cluster CA
//!
//! Any failure here is fatal: the webhook never serves with partial TLS
//! material.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig};
use tracing::{debug, info, warn};

use crate::config::{ClientAuthMode, TlsSettings};
use crate::error::{Error, Result};

/// Namespace of the cluster authentication ConfigMap
pub const AUTH_CONFIGMAP_NAMESPACE: &str = "kube-system";
/// Name of the cluster authentication ConfigMap
pub const AUTH_CONFIGMAP_NAME: &str = "extension-apiserver-authentication";
/// ConfigMap entry holding the PEM client CA bundle
pub const CLIENT_CA_KEY: &str = "requestheader-client-ca-file";

/// Source of the PEM-encoded client CA bundle.
pub trait ClientCaSource {
    fn fetch_client_ca(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Reads the client CA bundle from the cluster's authentication ConfigMap.
pub struct ClusterCaSource {
    api: Api<ConfigMap>,
}

impl ClusterCaSource {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::namespaced(client, AUTH_CONFIGMAP_NAMESPACE),
        }
    }
}

impl ClientCaSource for ClusterCaSource {
    async fn fetch_client_ca(&self) -> Result<Vec<u8>> {
        let configmap = self.api.get(AUTH_CONFIGMAP_NAME).await?;
        extract_client_ca(&configmap)
    }
}

/// Pull the client CA bundle out of the authentication ConfigMap.
pub fn extract_client_ca(configmap: &ConfigMap) -> Result<Vec<u8>> {
    let pem = configmap
        .data
        .as_ref()
        .and_then(|data| data.get(CLIENT_CA_KEY))
        .ok_or_else(|| Error::MissingClientCa {
            namespace: AUTH_CONFIGMAP_NAMESPACE.to_string(),
            name: AUTH_CONFIGMAP_NAME.to_string(),
            key: CLIENT_CA_KEY.to_string(),
        })?;

    if pem.trim().is_empty() {
        return Err(Error::EmptyClientCa);
    }

    debug!(bytes = pem.len(), key = CLIENT_CA_KEY, "Found client CA bundle");
    Ok(pem.clone().into_bytes())
}

/// The webhook's serving identity, already checked to be a matching pair.
#[derive(Debug)]
pub struct ServerKeyPair {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn pem_error(path: &Path, message: impl Into<String>) -> Error {
    Error::Pem {
        what: path.display().to_string(),
        message: message.into(),
    }
}

/// Log the serving certificate's subject and warn when it is not currently valid.
fn inspect_leaf(leaf: &CertificateDer<'_>, path: &Path) -> Result<()> {
    let (_, parsed) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| pem_error(path, format!("not an X.509 certificate: {}", e)))?;

    let validity = parsed.validity();
    if validity.is_valid() {
        info!(
            subject = %parsed.subject(),
            not_after = %validity.not_after,
            "Loaded serving certificate"
        );
    } else {
        warn!(
            subject = %parsed.subject(),
            not_before = %validity.not_before,
            not_after = %validity.not_after,
            "Serving certificate is outside its validity period"
        );
    }
    Ok(())
}

/// Load `{directory}/{pair_name}.crt` and `{directory}/{pair_name}.key`.
///
/// Fails on a missing or unreadable file, on PEM without a certificate or
/// key, and when the private key does not match the leaf certificate.
pub fn load_server_key_pair(directory: &Path, pair_name: &str) -> Result<ServerKeyPair> {
    let cert_path: PathBuf = directory.join(format!("{}.crt", pair_name));
    let key_path: PathBuf = directory.join(format!("{}.key", pair_name));

    let cert_pem = read_file(&cert_path)?;
    let key_pem = read_file(&key_path)?;

    let cert_chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| pem_error(&cert_path, e.to_string()))?;
    let leaf = cert_chain
        .first()
        .ok_or_else(|| pem_error(&cert_path, "no CERTIFICATE block found"))?;
    inspect_leaf(leaf, &cert_path)?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| pem_error(&key_path, e.to_string()))?
        .ok_or_else(|| pem_error(&key_path, "no private key found"))?;

    let signing_key = crypto_provider()
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| pem_error(&key_path, format!("unsupported private key: {}", e)))?;
    CertifiedKey::new(cert_chain.clone(), signing_key)
        .keys_match()
        .map_err(|e| Error::KeyMismatch(e.to_string()))?;

    debug!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        chain_len = cert_chain.len(),
        "Verified serving key pair"
    );
    Ok(ServerKeyPair { cert_chain, key })
}

/// Parse a PEM CA bundle into a trust store. At least one certificate must be usable.
pub fn parse_ca_bundle(pem: &[u8]) -> Result<RootCertStore> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Pem {
            what: "client CA bundle".to_string(),
            message: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(Error::EmptyClientCa);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        warn!(added, ignored, "Some client CA certificates could not be parsed");
    }
    if added == 0 {
        return Err(Error::EmptyClientCa);
    }
    Ok(roots)
}

/// Combine the client CA pool and the serving identity into a server config.
pub fn build_server_tls_config(
    ca_pem: &[u8],
    pair: ServerKeyPair,
    client_auth: ClientAuthMode,
) -> Result<Arc<ServerConfig>> {
    let provider = crypto_provider();
    let roots = Arc::new(parse_ca_bundle(ca_pem)?);

    let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider.clone());
    let verifier = match client_auth {
        ClientAuthMode::Optional => verifier.allow_unauthenticated().build(),
        ClientAuthMode::Required => verifier.build(),
    }
    .map_err(|e| Error::Tls(format!("client verifier: {}", e)))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(pair.cert_chain, pair.key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Startup sequence: fetch the CA, load the key pair, build the server config.
pub async fn provision<S: ClientCaSource>(
    source: &S,
    settings: &TlsSettings,
) -> Result<Arc<ServerConfig>> {
    let ca = source.fetch_client_ca().await?;
    info!(
        namespace = AUTH_CONFIGMAP_NAMESPACE,
        name = AUTH_CONFIGMAP_NAME,
        bytes = ca.len(),
        "Fetched cluster client CA bundle"
    );

    let pair = load_server_key_pair(&settings.cert_dir, &settings.pair_name)?;
    let config = build_server_tls_config(&ca, pair, settings.client_auth)?;

    info!(client_auth = ?settings.client_auth, "TLS configuration ready");
    Ok(config)
}
