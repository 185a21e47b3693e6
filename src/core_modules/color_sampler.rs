// THEORY:
// The `ColorSampler` bridges an image resource and the clustering stage. It is a
// two-step stage:
//
// 1.  **Loading** is delegated to an `ImageLoader`. Loading is the only place where
//     the scan waits on the outside world, so it sits behind a trait: the bundled
//     `HttpImageLoader` fetches `http(s)` resources and decodes inline base64 `data:`
//     URLs, and tests substitute an in-memory loader. Byte decoding is CPU-bound and
//     runs on the blocking pool, bounded by a semaphore sized to the machine.
// 2.  **Sampling** walks every pixel of the decoded image. Pixels whose alpha is at
//     or below the opacity threshold are skipped, so transparent padding cannot
//     drag the dominant color toward whatever RGB the transparent pixels happen to
//     carry. Every remaining pixel is quantized into a `ColorSample`.

use crate::core_modules::pixel::pixel::{Channel, Rgb};
use crate::error::{ScanError, ScanResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

/// Alpha must be strictly above this to count as opaque (~39% of 255).
pub const DEFAULT_ALPHA_THRESHOLD: Channel = 100;
pub const DEFAULT_QUANTIZE_STEP: Channel = 10;

/// A quantized, opaque pixel color.
pub type ColorSample = Rgb;

/// Fetches and decodes an image resource.
pub trait ImageLoader: Send + Sync {
    fn load<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, ScanResult<DynamicImage>>;
}

/// Loads images over HTTP(S) or from inline `data:` URLs.
pub struct HttpImageLoader {
    client: reqwest::Client,
    decode_permits: Arc<Semaphore>,
}

impl HttpImageLoader {
    pub fn new(timeout: Duration) -> ScanResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            decode_permits: Arc::new(Semaphore::new(num_cpus::get().max(1))),
        })
    }

    async fn fetch(&self, url: &Url) -> ScanResult<Vec<u8>> {
        match url.scheme() {
            "data" => decode_data_url(url),
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| ScanError::image_load(url, e))?;
                if !response.status().is_success() {
                    return Err(ScanError::image_load(url, format!("status {}", response.status())));
                }
                let bytes = response.bytes().await.map_err(|e| ScanError::image_load(url, e))?;
                Ok(bytes.to_vec())
            }
            other => Err(ScanError::image_load(url, format!("unsupported scheme `{other}`"))),
        }
    }

    async fn decode(&self, url: &Url, bytes: Vec<u8>) -> ScanResult<DynamicImage> {
        let _permit = self
            .decode_permits
            .acquire()
            .await
            .map_err(|e| ScanError::image_load(url, e))?;
        tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| ScanError::image_load(url, e))?
            .map_err(|e| ScanError::image_load(url, e))
    }
}

impl ImageLoader for HttpImageLoader {
    fn load<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, ScanResult<DynamicImage>> {
        Box::pin(async move {
            let bytes = self.fetch(url).await?;
            self.decode(url, bytes).await
        })
    }
}

/// Extracts the payload of a base64 `data:` URL.
pub fn decode_data_url(url: &Url) -> ScanResult<Vec<u8>> {
    let Some((header, payload)) = url.path().split_once(',') else {
        return Err(ScanError::image_load(url, "data url has no payload"));
    };
    if !header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(ScanError::image_load(url, "only base64 data urls carry raster images"));
    }
    // Notebook outputs sometimes wrap long payloads across lines.
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| ScanError::image_load(url, e))
}

/// Turns decoded pixels into quantized color samples.
#[derive(Debug, Clone, Copy)]
pub struct ColorSampler {
    pub alpha_threshold: Channel,
    pub quantize_step: Channel,
}

impl Default for ColorSampler {
    fn default() -> Self {
        Self {
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            quantize_step: DEFAULT_QUANTIZE_STEP,
        }
    }
}

impl ColorSampler {
    pub fn sample(&self, image: &DynamicImage) -> Vec<ColorSample> {
        let rgba = image.to_rgba8();
        rgba.pixels()
            .filter(|pixel| pixel.0[3] > self.alpha_threshold)
            .map(|pixel| Rgb::new(pixel.0[0], pixel.0[1], pixel.0[2]).quantized(self.quantize_step))
            .collect()
    }
}
