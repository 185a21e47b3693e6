// THEORY:
// The `scanner` module is the per-cell analysis API. It takes one `CellSnapshot` and
// returns the complete, ordered list of findings for it. It never touches the issue
// index; reconciling findings into the index is the orchestrator's job.
//
// Stages for a text cell:
// 1.  Alt-text check over markdown images (empty alt is missing) and over `<img>`
//     tags embedded as raw HTML (no `alt` attribute is missing).
// 2.  Color pipeline for every image reference: load -> sample -> cluster -> score,
//     against the cell's background.
// Code-output cells only run stage 2, against the output background.
//
// Every image's evaluation runs concurrently and the scan joins all of them before
// returning, so a caller never sees a partial result. A failure in one image
// (unreachable, undecodable, fully transparent, scoring service down) is logged and
// costs only that image's contrast finding.

use crate::cell::{CellKind, CellSnapshot};
use crate::core_modules::cluster::{DominantColorEstimator, KMeansOptions};
use crate::core_modules::color_sampler::{ColorSampler, DEFAULT_ALPHA_THRESHOLD, DEFAULT_QUANTIZE_STEP, HttpImageLoader, ImageLoader};
use crate::core_modules::contrast::{
    ContrastPolicy, ContrastScorer, DEFAULT_CONTRAST_THRESHOLD, DEFAULT_SCORING_ENDPOINT, RemoteContrastService,
    WcagContrast,
};
use crate::core_modules::finding::Finding;
use crate::core_modules::image_locator::{ImageLocator, ImageReference, scan_markdown};
use crate::core_modules::pixel::pixel::{Channel, Rgb};
use crate::error::{ScanError, ScanResult};
use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ORIGIN: &str = "http://localhost:8888/";
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HIGHLIGHT_DURATION: Duration = Duration::from_millis(800);

/// Where contrast scores come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringPolicy {
    /// WCAG ratio computed in-process.
    Local,
    /// Ratio requested from an HTTP scoring service.
    Remote { endpoint: Url },
}

impl ScoringPolicy {
    pub fn remote_default() -> Self {
        Self::Remote {
            endpoint: Url::parse(DEFAULT_SCORING_ENDPOINT).expect("default scoring endpoint is a valid url"),
        }
    }
}

/// Configuration for scanning and tracking, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of color clusters per image.
    pub clusters: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: u64,
    /// Pixels with alpha at or below this are ignored.
    pub alpha_threshold: Channel,
    pub quantize_step: Channel,
    /// Scores strictly below this are reported as low contrast.
    pub contrast_threshold: f64,
    /// Upper bound for loading one image; expiry counts as a load failure.
    pub image_timeout: Duration,
    /// Origin that notebook-relative image paths are served from.
    pub origin: Url,
    pub scoring: ScoringPolicy,
    /// How long `navigate_to` keeps a cell highlighted.
    pub highlight_duration: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let kmeans = KMeansOptions::default();
        Self {
            clusters: kmeans.clusters,
            max_iterations: kmeans.max_iterations,
            tolerance: kmeans.tolerance,
            seed: kmeans.seed,
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            quantize_step: DEFAULT_QUANTIZE_STEP,
            contrast_threshold: DEFAULT_CONTRAST_THRESHOLD,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid url"),
            scoring: ScoringPolicy::Local,
            highlight_duration: DEFAULT_HIGHLIGHT_DURATION,
        }
    }
}

impl ScanConfig {
    pub fn kmeans(&self) -> KMeansOptions {
        KMeansOptions {
            clusters: self.clusters,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            seed: self.seed,
        }
    }

    pub fn sampler(&self) -> ColorSampler {
        ColorSampler {
            alpha_threshold: self.alpha_threshold,
            quantize_step: self.quantize_step,
        }
    }

    pub fn policy(&self) -> ContrastPolicy {
        ContrastPolicy {
            threshold: self.contrast_threshold,
        }
    }
}

/// Produces the findings for one cell.
pub struct CellScanner {
    locator: ImageLocator,
    sampler: ColorSampler,
    estimator: DominantColorEstimator,
    policy: ContrastPolicy,
    image_timeout: Duration,
    loader: Arc<dyn ImageLoader>,
    scorer: Arc<dyn ContrastScorer>,
}

impl CellScanner {
    pub fn new(config: &ScanConfig, loader: Arc<dyn ImageLoader>, scorer: Arc<dyn ContrastScorer>) -> Self {
        Self {
            locator: ImageLocator::new(config.origin.clone()),
            sampler: config.sampler(),
            estimator: DominantColorEstimator::new(config.kmeans()),
            policy: config.policy(),
            image_timeout: config.image_timeout,
            loader,
            scorer,
        }
    }

    /// Wires the HTTP image loader and the scorer chosen by `config.scoring`.
    pub fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        let loader: Arc<dyn ImageLoader> = Arc::new(HttpImageLoader::new(config.image_timeout)?);
        let scorer: Arc<dyn ContrastScorer> = match &config.scoring {
            ScoringPolicy::Local => Arc::new(WcagContrast),
            ScoringPolicy::Remote { endpoint } => {
                Arc::new(RemoteContrastService::new(endpoint.clone(), config.image_timeout)?)
            }
        };
        Ok(Self::new(config, loader, scorer))
    }

    pub fn policy(&self) -> ContrastPolicy {
        self.policy
    }

    /// The full finding list for `cell` as of its snapshot.
    pub async fn scan(&self, cell: &CellSnapshot) -> Vec<Finding> {
        let mut findings = match cell.kind {
            CellKind::Text => self.missing_alt(cell),
            CellKind::CodeOutput => Vec::new(),
        };

        let references = self.locator.locate(&cell.source, cell.kind);
        let evaluations = references
            .iter()
            .map(|reference| self.evaluate_image(cell, reference, cell.background));

        for (reference, outcome) in references.iter().zip(join_all(evaluations).await) {
            match outcome {
                Ok(Some(finding)) => findings.push(finding),
                Ok(None) => {}
                Err(ScanError::ClusteringDegenerate { url }) => {
                    debug!("{}: no opaque pixels in {url}, skipping contrast", cell.id);
                }
                Err(error) => warn!("{}: contrast check skipped for {}: {error}", cell.id, reference.raw),
            }
        }

        debug!("{}: scan produced {} finding(s)", cell.id, findings.len());
        findings
    }

    fn missing_alt(&self, cell: &CellSnapshot) -> Vec<Finding> {
        let scan = scan_markdown(&cell.source);
        let markdown = scan
            .images
            .into_iter()
            .filter(|image| image.alt.trim().is_empty())
            .map(|image| image.url);
        let html = scan
            .html_images
            .into_iter()
            .filter(|image| image.alt.is_none())
            .map(|image| image.src.unwrap_or_default());

        markdown
            .chain(html)
            .map(|image| Finding::missing_alt(cell.id.clone(), image))
            .collect()
    }

    async fn evaluate_image(
        &self,
        cell: &CellSnapshot,
        reference: &ImageReference,
        background: Rgb,
    ) -> ScanResult<Option<Finding>> {
        let image = tokio::time::timeout(self.image_timeout, self.loader.load(&reference.url))
            .await
            .map_err(|_| ScanError::image_load(&reference.url, "timed out"))??;

        let sampler = self.sampler;
        let estimator = self.estimator.clone();
        let dominant = tokio::task::spawn_blocking(move || estimator.dominant(&sampler.sample(&image)))
            .await
            .map_err(|e| ScanError::image_load(&reference.url, e))?;
        let Some(color) = dominant else {
            return Err(ScanError::ClusteringDegenerate {
                url: reference.url.to_string(),
            });
        };

        let score = self.scorer.score(color, background).await?;
        debug!(
            "{}: dominant color {color} vs background {background}, contrast {score:.2}",
            cell.id
        );

        Ok(self
            .policy
            .is_low(score)
            .then(|| Finding::low_contrast(cell.id.clone(), reference.raw.clone(), score, color)))
    }
}
