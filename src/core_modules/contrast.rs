// THEORY:
// The contrast stage turns a pair of colors (an image's dominant color and the
// background it sits on) into a number, and a policy turns that number into a
// verdict.
//
// Scoring sits behind the `ContrastScorer` trait because there are two legitimate
// sources for the number:
// 1.  `WcagContrast` computes the WCAG contrast ratio locally:
//     `(L_lighter + 0.05) / (L_darker + 0.05)` over relative luminance, ranging
//     from 1.0 (identical) to 21.0 (black on white).
// 2.  `RemoteContrastService` asks an HTTP service for the same ratio, answered as
//     a `"<value>:1"` string. Anything other than a finite, non-negative number is
//     a scoring failure for that image only.
//
// `ContrastPolicy` holds the cutoff. A score is low only when it is strictly below
// the threshold; a score exactly at the threshold passes.

use crate::core_modules::pixel::pixel::Rgb;
use crate::error::{ScanError, ScanResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONTRAST_THRESHOLD: f64 = 4.5;
pub const DEFAULT_SCORING_ENDPOINT: &str = "https://www.aremycolorsaccessible.com/api/are-they";

/// Produces a non-negative separation score for two colors; lower is worse.
pub trait ContrastScorer: Send + Sync {
    fn score<'a>(&'a self, foreground: Rgb, background: Rgb) -> BoxFuture<'a, ScanResult<f64>>;
}

/// Decides which scores are too low.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastPolicy {
    pub threshold: f64,
}

impl Default for ContrastPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONTRAST_THRESHOLD,
        }
    }
}

impl ContrastPolicy {
    pub fn is_low(&self, score: f64) -> bool {
        score < self.threshold
    }
}

/// WCAG 2.x contrast ratio, computed in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct WcagContrast;

impl WcagContrast {
    pub fn ratio(foreground: Rgb, background: Rgb) -> f64 {
        let a = foreground.relative_luminance();
        let b = background.relative_luminance();
        let (lighter, darker) = if a >= b { (a, b) } else { (b, a) };
        (lighter + 0.05) / (darker + 0.05)
    }
}

impl ContrastScorer for WcagContrast {
    fn score<'a>(&'a self, foreground: Rgb, background: Rgb) -> BoxFuture<'a, ScanResult<f64>> {
        Box::pin(async move { Ok(Self::ratio(foreground, background)) })
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest {
    colors: [String; 2],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    contrast: String,
}

/// Contrast ratio computed by an HTTP service.
pub struct RemoteContrastService {
    client: reqwest::Client,
    endpoint: Url,
}

impl RemoteContrastService {
    pub fn new(endpoint: Url, timeout: Duration) -> ScanResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn request(&self, foreground: Rgb, background: Rgb) -> ScanResult<f64> {
        let body = ScoreRequest {
            colors: [foreground.hex(), background.hex()],
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ScanError::ScoringService(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScanError::ScoringService(format!("status {}", response.status())));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ScanError::ScoringService(e.to_string()))?;
        parse_service_response(&text)
    }
}

impl ContrastScorer for RemoteContrastService {
    fn score<'a>(&'a self, foreground: Rgb, background: Rgb) -> BoxFuture<'a, ScanResult<f64>> {
        Box::pin(self.request(foreground, background))
    }
}

/// Extracts the ratio from a service body such as `{"contrast": "4.5:1"}`.
pub fn parse_service_response(body: &str) -> ScanResult<f64> {
    let response: ScoreResponse =
        serde_json::from_str(body).map_err(|e| ScanError::ScoringService(format!("malformed response: {e}")))?;
    parse_ratio(&response.contrast)
}

/// Parses `"<value>:1"` (or a bare `"<value>"`) into a finite, non-negative score.
pub fn parse_ratio(ratio: &str) -> ScanResult<f64> {
    let value = ratio.split(':').next().unwrap_or_default().trim();
    let score: f64 = value
        .parse()
        .map_err(|_| ScanError::ScoringService(format!("unreadable ratio `{ratio}`")))?;
    if !score.is_finite() || score < 0.0 {
        return Err(ScanError::ScoringService(format!("ratio out of range `{ratio}`")));
    }
    Ok(score)
}
