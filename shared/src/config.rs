//! Store configuration from the environment
//!
//! | Variable                        | Default         |
//! |---------------------------------|-----------------|
//! | `LIKEDSONGS_TABLE`              | `LikedSongs`    |
//! | `LIKEDSONGS_REGION`             | `eu-central-1`  |
//! | `LIKEDSONGS_ENDPOINT`           | SDK default     |
//! | `LIKEDSONGS_STATIC_CREDENTIALS` | provider chain  |
//! | `LIKEDSONGS_TIMEOUT_MS`         | none            |

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::config::Credentials;
use std::fmt;
use std::time::Duration;

use crate::errors::{Error, Result};

const TABLE_NAME_ENV: &str = "LIKEDSONGS_TABLE";
const REGION_ENV: &str = "LIKEDSONGS_REGION";
const ENDPOINT_ENV: &str = "LIKEDSONGS_ENDPOINT";
const STATIC_CREDENTIALS_ENV: &str = "LIKEDSONGS_STATIC_CREDENTIALS";
const TIMEOUT_ENV: &str = "LIKEDSONGS_TIMEOUT_MS";

pub const DEFAULT_TABLE_NAME: &str = "LikedSongs";
pub const DEFAULT_REGION: &str = "eu-central-1";
pub const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

/// Where the SDK gets its credentials
#[derive(Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// Standard AWS provider chain (env, profile, instance role, ...)
    #[default]
    ProviderChain,
    Static {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::ProviderChain => f.write_str("ProviderChain"),
            CredentialSource::Static { access_key_id, .. } => f
                .debug_struct("Static")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"** redacted **")
                .finish(),
        }
    }
}

impl CredentialSource {
    /// Parse `access:secret` or `access:secret:session`
    fn parse(value: &str) -> Result<Self> {
        let mut parts = value.splitn(3, ':');
        let access_key_id = parts.next().unwrap_or_default();
        let secret_access_key = parts.next().unwrap_or_default();
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return Err(Error::Config(format!(
                "{} must look like access:secret[:session]",
                STATIC_CREDENTIALS_ENV
            )));
        }

        Ok(CredentialSource::Static {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: parts.next().filter(|s| !s.is_empty()).map(str::to_string),
        })
    }
}

/// Connection settings for a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub table_name: String,
    pub region: String,
    /// Endpoint override, e.g. a local emulator
    pub endpoint: Option<String>,
    pub credentials: CredentialSource,
    /// Per-operation deadline
    pub timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            credentials: CredentialSource::ProviderChain,
            timeout: None,
        }
    }
}

impl StoreConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let credentials = match var(STATIC_CREDENTIALS_ENV) {
            Some(value) => CredentialSource::parse(&value)?,
            None => CredentialSource::ProviderChain,
        };

        let timeout = var(TIMEOUT_ENV)
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| Error::Config(format!("{}: {}", TIMEOUT_ENV, e)))
            })
            .transpose()?;

        Ok(Self {
            table_name: var(TABLE_NAME_ENV).unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            region: var(REGION_ENV).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: var(ENDPOINT_ENV),
            credentials,
            timeout,
        })
    }

    /// LocalStack on its default port with dummy credentials
    pub fn localstack() -> Self {
        Self {
            endpoint: Some(LOCALSTACK_ENDPOINT.to_string()),
            credentials: CredentialSource::Static {
                access_key_id: "test".to_string(),
                secret_access_key: "test".to_string(),
                session_token: None,
            },
            ..Self::default()
        }
    }

    pub async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));

        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let CredentialSource::Static {
            access_key_id,
            secret_access_key,
            session_token,
        } = &self.credentials
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                session_token.clone(),
                None,
                "likedsongs-static",
            ));
        }

        loader.load().await
    }
}
