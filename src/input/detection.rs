//! One-shot fall detection over HTTP.

use crate::config::DetectionConfig;
use crate::error::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct DetectionRequest<'a> {
    image: &'a str,
}

/// Verdict for one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct DetectionResult {
    pub fall: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
}

pub struct DetectionClient {
    client: reqwest::Client,
    url: String,
}

impl DetectionClient {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// Ask the server whether `image_base64` shows a fall.
    ///
    /// Never fails: any transport, status or decoding problem is logged and
    /// reported as "no fall".
    pub async fn detect(&self, image_base64: &str) -> DetectionResult {
        match self.request(image_base64).await {
            Ok(result) => {
                debug!("[Detect] {:?}", result);
                result
            }
            Err(e) => {
                warn!("[Detect] Request to {} failed: {}", self.url, e);
                DetectionResult::default()
            }
        }
    }

    async fn request(&self, image_base64: &str) -> Result<DetectionResult> {
        let result = self
            .client
            .post(&self.url)
            .json(&DetectionRequest {
                image: image_base64,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<DetectionResult>()
            .await?;
        Ok(result)
    }
}
