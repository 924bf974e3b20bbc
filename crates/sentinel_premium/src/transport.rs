//! License check transport.

use crate::error::LicenseError;
use crate::license::LicenseCheckPayload;
use async_trait::async_trait;
use std::time::Duration;

/// Raw answer of the licensing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseResponse {
    pub status: u16,
    pub body: String,
}

impl LicenseResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Talks to the licensing server.
#[async_trait]
pub trait LicenseTransport: Send + Sync {
    /// Whether a network connection is available at all.
    fn is_online(&self) -> bool {
        true
    }

    /// POSTs a license check. Errors mean no response was received.
    async fn post_license_check(
        &self,
        url: &str,
        payload: &LicenseCheckPayload,
    ) -> Result<LicenseResponse, LicenseError>;
}

/// [`LicenseTransport`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpLicenseTransport {
    client: reqwest::Client,
}

impl HttpLicenseTransport {
    pub fn new(timeout: Duration) -> Result<Self, LicenseError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LicenseError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LicenseTransport for HttpLicenseTransport {
    async fn post_license_check(
        &self,
        url: &str,
        payload: &LicenseCheckPayload,
    ) -> Result<LicenseResponse, LicenseError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(payload)
            .send()
            .await
            .map_err(|e| LicenseError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LicenseError::Transport(e.to_string()))?;

        Ok(LicenseResponse { status, body })
    }
}
