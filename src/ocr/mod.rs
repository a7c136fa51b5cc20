mod tesseract;
mod vision;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::settings::OcrSettings;

pub use tesseract::Tesseract;
pub use vision::Vision;

/// Confidence reported when a backend gives none.
pub const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Axis-aligned pixel rectangle, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box spanning the given extents; negative coordinates are cut at zero.
    pub fn from_extents(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        let x = min_x.max(0);
        let y = min_y.max(0);
        let width = (max_x - x).max(0);
        let height = (max_y - y).max(0);
        Self {
            x: saturate_u32(x),
            y: saturate_u32(y),
            width: saturate_u32(width),
            height: saturate_u32(height),
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Intersection with `[0, width) x [0, height)`; `None` when nothing of
    /// the box is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        if right <= x || bottom <= y {
            return None;
        }
        Some(BoundingBox {
            x,
            y,
            width: right - x,
            height: bottom - y,
        })
    }

    /// Grows the box by `padding` on every side, clamped to the image.
    pub fn expand(&self, padding: u32, width: u32, height: u32) -> BoundingBox {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = self.right().saturating_add(padding).min(width);
        let bottom = self.bottom().saturating_add(padding).min(height);
        BoundingBox {
            x,
            y,
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }
}

fn saturate_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// The image handed to OCR backends: raw bytes for remote engines and the
/// ephemeral file for engines that read from disk.
pub struct OcrInput<'a> {
    pub bytes: &'a [u8],
    pub path: &'a Path,
    pub width: u32,
    pub height: u32,
}

pub type OcrFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<TextBlock>>> + Send + 'a>>;

pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;
    fn recognize<'a>(&'a self, input: &'a OcrInput<'a>) -> OcrFuture<'a>;
}

#[derive(Debug, Clone)]
pub enum OcrBackendImpl {
    Tesseract(Tesseract),
    Vision(Vision),
}

impl OcrBackend for OcrBackendImpl {
    fn name(&self) -> &str {
        match self {
            OcrBackendImpl::Tesseract(backend) => backend.name(),
            OcrBackendImpl::Vision(backend) => backend.name(),
        }
    }

    fn recognize<'a>(&'a self, input: &'a OcrInput<'a>) -> OcrFuture<'a> {
        match self {
            OcrBackendImpl::Tesseract(backend) => backend.recognize(input),
            OcrBackendImpl::Vision(backend) => backend.recognize(input),
        }
    }
}

/// Builds the configured backends in fallback order. Backends missing a
/// credential are skipped; unknown names are a configuration error.
pub fn build_backends(settings: &OcrSettings) -> Result<Vec<OcrBackendImpl>, PipelineError> {
    let mut backends = Vec::new();
    for name in &settings.backends {
        match name.trim().to_lowercase().as_str() {
            "tesseract" | "local" => backends.push(OcrBackendImpl::Tesseract(Tesseract::new(
                settings.languages.clone(),
                settings.psm,
                settings.timeout(),
            ))),
            "vision" | "google" | "cloud" => {
                let Some(key) = settings.vision_api_key.clone() else {
                    warn!("ocr backend '{}' skipped: no GOOGLE_CLOUD_API_KEY", name);
                    continue;
                };
                let vision = Vision::new(
                    key,
                    settings.vision_endpoint.clone(),
                    settings.timeout(),
                    settings.max_retries,
                )
                .map_err(|err| PipelineError::configuration(format!("{:#}", err)))?;
                backends.push(OcrBackendImpl::Vision(vision));
            }
            other => {
                return Err(PipelineError::configuration(format!(
                    "unknown ocr backend '{}' (expected tesseract or vision)",
                    other
                )));
            }
        }
    }
    Ok(backends)
}

enum OcrAttempt {
    Found(Vec<TextBlock>),
    Empty,
    Failed(String),
}

/// Ordered fallback chain over OCR backends.
#[derive(Debug, Clone)]
pub struct OcrExtractor<B: OcrBackend> {
    backends: Vec<B>,
}

impl<B: OcrBackend> OcrExtractor<B> {
    pub fn new(backends: Vec<B>) -> Result<Self, PipelineError> {
        if backends.is_empty() {
            return Err(PipelineError::configuration("no OCR backend configured"));
        }
        Ok(Self { backends })
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    /// Runs backends in order until one finds text. "Nothing found" is an
    /// empty list; only a chain where no backend managed to run is an error.
    pub async fn extract(&self, input: &OcrInput<'_>) -> Result<Vec<TextBlock>, PipelineError> {
        let mut failures = Vec::new();
        let mut any_ran = false;
        for backend in &self.backends {
            match attempt(backend, input).await {
                OcrAttempt::Found(blocks) => {
                    debug!("ocr backend {} found {} block(s)", backend.name(), blocks.len());
                    return Ok(blocks);
                }
                OcrAttempt::Empty => {
                    debug!("ocr backend {} found no text", backend.name());
                    any_ran = true;
                }
                OcrAttempt::Failed(reason) => {
                    warn!("ocr backend {} failed: {}", backend.name(), reason);
                    failures.push(format!("{}: {}", backend.name(), reason));
                }
            }
        }
        if any_ran {
            Ok(Vec::new())
        } else {
            Err(PipelineError::OcrBackendUnavailable { attempts: failures })
        }
    }
}

async fn attempt<B: OcrBackend>(backend: &B, input: &OcrInput<'_>) -> OcrAttempt {
    match backend.recognize(input).await {
        Ok(blocks) => {
            let blocks = normalize_blocks(blocks, input.width, input.height);
            if blocks.is_empty() {
                OcrAttempt::Empty
            } else {
                OcrAttempt::Found(blocks)
            }
        }
        Err(err) => OcrAttempt::Failed(format!("{:#}", err)),
    }
}

/// Clamps every box to the image and drops blocks left without text or area.
fn normalize_blocks(blocks: Vec<TextBlock>, width: u32, height: u32) -> Vec<TextBlock> {
    blocks
        .into_iter()
        .filter_map(|block| {
            if block.text.trim().is_empty() {
                return None;
            }
            let bounding_box = block.bounding_box.clamp_to(width, height)?;
            Some(TextBlock {
                text: block.text,
                bounding_box,
                confidence: block.confidence.clamp(0.0, 1.0),
            })
        })
        .collect()
}
