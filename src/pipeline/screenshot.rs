//! Remote headless-browser screenshot client.
//!
//! One POST per conversion: the prepared HTML goes up as JSON, a full-page
//! PNG comes back. There is no retry and no local fallback; a missing token
//! fails before any request is made.

use crate::config::ScreenshotConfig;
use crate::error::NewsletterError;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// Longest response body kept in a failure message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotRequest<'a> {
    html: &'a str,
    options: CaptureOptions,
    goto_options: GotoOptions<'a>,
    viewport: Viewport,
    wait_for_timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureOptions {
    #[serde(rename = "type")]
    kind: &'static str,
    full_page: bool,
    omit_background: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions<'a> {
    wait_until: &'a str,
    timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Viewport {
    width: u32,
    height: u32,
    device_scale_factor: u32,
}

/// Client for the screenshot REST endpoint.
#[derive(Debug, Clone)]
pub struct ScreenshotClient {
    client: reqwest::Client,
    config: ScreenshotConfig,
}

impl ScreenshotClient {
    pub fn new(config: ScreenshotConfig) -> Result<Self, NewsletterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NewsletterError::ScreenshotRequest {
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    /// Client configured from `BROWSERLESS_TOKEN` / `BROWSERLESS_ENDPOINT`.
    pub fn from_env() -> Result<Self, NewsletterError> {
        Self::new(ScreenshotConfig::from_env())
    }

    pub fn config(&self) -> &ScreenshotConfig {
        &self.config
    }

    pub fn has_token(&self) -> bool {
        self.config.token.is_some()
    }

    fn request_body<'a>(&'a self, html: &'a str) -> ScreenshotRequest<'a> {
        ScreenshotRequest {
            html,
            options: CaptureOptions {
                kind: "png",
                full_page: true,
                omit_background: false,
            },
            goto_options: GotoOptions {
                wait_until: &self.config.wait_until,
                timeout: self.config.goto_timeout_ms,
            },
            viewport: Viewport {
                width: self.config.viewport_width,
                height: self.config.viewport_height,
                device_scale_factor: self.config.device_scale_factor,
            },
            wait_for_timeout: self.config.wait_for_timeout_ms,
        }
    }

    /// Capture `html` as a full-page PNG.
    pub async fn capture(&self, html: &str) -> Result<Vec<u8>, NewsletterError> {
        let token = self
            .config
            .token
            .as_deref()
            .ok_or(NewsletterError::ScreenshotTokenMissing)?;

        debug!("Requesting screenshot of {} bytes of HTML", html.len());
        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[("token", token)])
            .json(&self.request_body(html))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = if body.is_empty() {
                "No response body".to_string()
            } else {
                body.chars().take(MAX_ERROR_BODY).collect()
            };
            error!("Screenshot request returned {}: {}", status.as_u16(), body);
            return Err(NewsletterError::ScreenshotFailed {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        info!("Screenshot captured: {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }

    fn request_error(&self, e: reqwest::Error) -> NewsletterError {
        if e.is_timeout() {
            NewsletterError::ScreenshotTimeout {
                secs: self.config.timeout_secs,
            }
        } else {
            // reqwest includes the URL, and the URL carries the token.
            NewsletterError::ScreenshotRequest {
                reason: e.without_url().to_string(),
            }
        }
    }
}
