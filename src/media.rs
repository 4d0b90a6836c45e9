use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::CloudinaryConfig;

const API_BASE: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid image format")]
    InvalidPayload,
    #[error("media host request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("media host rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub url: String,
    pub public_id: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
}

#[derive(Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Cloudinary client using signed REST uploads.
#[derive(Clone)]
pub struct MediaHost {
    client: reqwest::Client,
    api_base: String,
    config: CloudinaryConfig,
}

impl MediaHost {
    pub fn new(client: reqwest::Client, config: CloudinaryConfig) -> Self {
        MediaHost {
            client,
            api_base: API_BASE.to_string(),
            config,
        }
    }

    /// Points the client at another API root, e.g. a local stand-in.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/image/{}",
            self.api_base, self.config.cloud_name, action
        )
    }

    /// Uploads an inline `data:image/...;base64,` payload.
    pub async fn upload(&self, data_url: &str) -> Result<UploadedMedia, MediaError> {
        validate_data_url(data_url)?;

        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(&[("timestamp", &timestamp)], &self.config.api_secret);
        let form = [
            ("file", data_url),
            ("api_key", self.config.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let resp = self
            .client
            .post(self.endpoint("upload"))
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        let body: UploadResponse = resp.json().await?;
        Ok(UploadedMedia {
            url: body.secure_url,
            public_id: body.public_id,
        })
    }

    pub async fn destroy(&self, public_id: &str) -> Result<(), MediaError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[("public_id", public_id), ("timestamp", &timestamp)],
            &self.config.api_secret,
        );
        let form = [
            ("public_id", public_id),
            ("api_key", self.config.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let resp = self
            .client
            .post(self.endpoint("destroy"))
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }
        let body: DestroyResponse = resp.json().await?;
        match body.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(MediaError::Rejected(other.to_string())),
        }
    }
}

async fn rejection(resp: reqwest::Response) -> MediaError {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => MediaError::Rejected(format!("{}: {}", status, body.error.message)),
        Err(_) => MediaError::Rejected(status.to_string()),
    }
}

/// Accepts only base64 `data:image/*` URLs with a non-empty, decodable payload.
pub fn validate_data_url(data_url: &str) -> Result<(), MediaError> {
    let rest = data_url
        .strip_prefix("data:image/")
        .ok_or(MediaError::InvalidPayload)?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or(MediaError::InvalidPayload)?;
    match STANDARD.decode(payload.trim()) {
        Ok(bytes) if !bytes.is_empty() => Ok(()),
        _ => Err(MediaError::InvalidPayload),
    }
}

/// Cloudinary request signature: parameters sorted by name, joined as a query
/// string, suffixed with the API secret, SHA-256 hex digest.
fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{}{}", joined, api_secret).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn accepts_base64_image_data_url() {
        assert!(validate_data_url(PIXEL).is_ok());
    }

    #[test]
    fn rejects_remote_urls_and_non_images() {
        assert!(validate_data_url("https://example.com/a.png").is_err());
        assert!(validate_data_url("data:text/plain;base64,aGVsbG8=").is_err());
        assert!(validate_data_url("data:image/png;base64,").is_err());
        assert!(validate_data_url("data:image/png;base64,***").is_err());
        assert!(validate_data_url("data:image/png,rawbytes").is_err());
    }

    #[test]
    fn signature_sorts_parameters() {
        let a = sign(&[("timestamp", "1700000000"), ("public_id", "abc")], "s3cr3t");
        let b = sign(&[("public_id", "abc"), ("timestamp", "1700000000")], "s3cr3t");
        assert_eq!(a, b);
        let expected = hex::encode(Sha256::digest(b"public_id=abc&timestamp=1700000000s3cr3t"));
        assert_eq!(a, expected);
    }

    #[test]
    fn signature_depends_on_secret() {
        let params = [("timestamp", "1700000000")];
        assert_ne!(sign(&params, "one"), sign(&params, "two"));
    }

    #[test]
    fn endpoints_target_the_configured_cloud() {
        let host = MediaHost::new(
            reqwest::Client::new(),
            CloudinaryConfig {
                cloud_name: "demo".into(),
                api_key: "k".into(),
                api_secret: "s".into(),
            },
        );
        assert_eq!(
            host.endpoint("upload"),
            "https://api.cloudinary.com/v1_1/demo/image/upload"
        );
    }
}
