//! Process configuration.
//!
//! Flags mirror the ones the webhook deployment manifests already pass;
//! each one can also come from the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

/// Default webhook port
pub const DEFAULT_PORT: u16 = 8443;
/// Default health/metrics port
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
/// Default directory holding the serving certificate pair
pub const DEFAULT_CERT_DIR: &str = "/var/run/vn-affinity-admission-controller";

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vn-affinity-admission",
    version,
    about = "Mutating admission webhook that adds virtual-node affinity and tolerations to pods"
)]
pub struct Args {
    /// Webhook (TLS) listening port
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Certificate and key pair name
    #[arg(long = "keypairname", env = "WEBHOOK_KEY_PAIR_NAME", default_value = "tls")]
    pub key_pair_name: String,

    /// Certificate and key directory
    #[arg(long = "certdir", env = "WEBHOOK_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
    pub cert_dir: PathBuf,

    /// Node label key to match
    #[arg(long = "podaffinitykey", env = "POD_AFFINITY_KEY", default_value = "type")]
    pub pod_affinity_key: String,

    /// Node label value to match
    #[arg(
        long = "podaffinityvalue",
        env = "POD_AFFINITY_VALUE",
        default_value = "virtual-kubelet"
    )]
    pub pod_affinity_value: String,

    /// Plain HTTP port for /healthz, /readyz and /metrics
    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    pub health_port: u16,

    /// Deadline for a single admission request
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Whether callers must present a client certificate
    #[arg(long, env = "CLIENT_AUTH", value_enum, default_value_t = ClientAuthMode::Optional)]
    pub client_auth: ClientAuthMode,
}

/// Client certificate policy for the webhook listener
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientAuthMode {
    /// Verify a presented certificate against the cluster CA, allow anonymous clients
    #[default]
    Optional,
    /// Reject clients without a certificate signed by the cluster CA
    Required,
}

/// Label pair used to build the node-affinity expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub key: String,
    pub value: String,
}

impl PolicyConfig {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Location of the serving certificate and client-auth policy
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_dir: PathBuf,
    pub pair_name: String,
    pub client_auth: ClientAuthMode,
}

impl TlsSettings {
    /// `{cert_dir}/{pair_name}.crt`
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join(format!("{}.crt", self.pair_name))
    }

    /// `{cert_dir}/{pair_name}.key`
    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join(format!("{}.key", self.pair_name))
    }
}

/// Validated process configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub port: u16,
    pub health_port: u16,
    pub request_timeout: Duration,
    pub tls: TlsSettings,
    pub policy: PolicyConfig,
}

impl Args {
    /// Validate the arguments and freeze them into a [`WebhookConfig`].
    pub fn into_config(self) -> Result<WebhookConfig> {
        if self.pod_affinity_key.trim().is_empty() {
            return Err(Error::Config("podaffinitykey must not be empty".to_string()));
        }
        if self.key_pair_name.trim().is_empty() {
            return Err(Error::Config("keypairname must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request timeout must be at least one second".to_string(),
            ));
        }

        Ok(WebhookConfig {
            port: self.port,
            health_port: self.health_port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            tls: TlsSettings {
                cert_dir: self.cert_dir,
                pair_name: self.key_pair_name,
                client_auth: self.client_auth,
            },
            policy: PolicyConfig {
                key: self.pod_affinity_key,
                value: self.pod_affinity_value,
            },
        })
    }
}
