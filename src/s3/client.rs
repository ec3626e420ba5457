use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

use super::signing::{sign, uri_encode, SigningRequest};
use super::types::{Credentials, StorageError};

const CONTENT_TYPE: &str = "application/json";

/// Destination for published documents
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        region: &str,
    ) -> Result<(), StorageError>;
}

/// S3 `PutObject` over HTTPS with SigV4 signing
#[derive(Debug)]
pub struct S3Client {
    client: reqwest::Client,
    credentials: Credentials,
    endpoint: Option<String>,
}

impl S3Client {
    /// `endpoint` switches to path-style requests against an S3-compatible store
    pub fn new(credentials: Credentials, endpoint: Option<String>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        })
    }

    fn object_url(&self, bucket: &str, key: &str, region: &str) -> Result<Url, StorageError> {
        let encoded_key = uri_encode(key, false);

        let raw = match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, uri_encode(bucket, true), encoded_key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, encoded_key),
        };

        Url::parse(&raw).map_err(|e| StorageError::Endpoint(format!("{}: {}", raw, e)))
    }
}

/// `host[:port]` as sent in the Host header
fn host_header(url: &Url) -> Result<String, StorageError> {
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Endpoint(format!("no host in {}", url)))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        region: &str,
    ) -> Result<(), StorageError> {
        let url = self.object_url(bucket, key, region)?;
        let host = host_header(&url)?;

        let signed = sign(
            &self.credentials,
            &SigningRequest {
                method: "PUT",
                host: &host,
                canonical_uri: url.path(),
                content_type: CONTENT_TYPE,
                payload: &body,
                region,
                now: chrono::Utc::now(),
            },
        )?;

        tracing::debug!(%url, bytes = body.len(), "PUT object");

        let response = self
            .client
            .put(url)
            .header("Content-Type", CONTENT_TYPE)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("x-amz-date", signed.amz_date)
            .header("Authorization", signed.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Service {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            access_key_id: "AKID".to_string(),
            secret_key: "secret".to_string(),
        }
    }

    #[test]
    fn test_virtual_hosted_url() {
        let client = S3Client::new(credentials(), None).unwrap();
        let url = client.object_url("my-bucket", "exports/doc 1.json", "eu-west-1").unwrap();

        assert_eq!(url.as_str(), "https://my-bucket.s3.eu-west-1.amazonaws.com/exports/doc%201.json");
        assert_eq!(host_header(&url).unwrap(), "my-bucket.s3.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_endpoint_override_is_path_style() {
        let client = S3Client::new(credentials(), Some("http://localhost:9000/".to_string())).unwrap();
        let url = client.object_url("bucket", "doc.json", "us-east-1").unwrap();

        assert_eq!(url.as_str(), "http://localhost:9000/bucket/doc.json");
        assert_eq!(url.path(), "/bucket/doc.json");
        assert_eq!(host_header(&url).unwrap(), "localhost:9000");
    }

    #[test]
    fn test_bad_endpoint() {
        let client = S3Client::new(credentials(), Some("not a url".to_string())).unwrap();
        assert!(matches!(
            client.object_url("bucket", "doc.json", "us-east-1"),
            Err(StorageError::Endpoint(_))
        ));
    }
}
