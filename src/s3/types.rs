use thiserror::Error;

use crate::publish::PublishConfig;

/// Access key pair used to sign requests
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_key: String,
}

impl From<&PublishConfig> for Credentials {
    fn from(config: &PublishConfig) -> Self {
        Credentials {
            access_key_id: config.aws_access_key_id.clone(),
            secret_key: config.aws_secret_key.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Storage service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
    #[error("Signing error: {0}")]
    Signing(String),
}
