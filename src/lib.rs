use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub mod codec;
pub mod error;
pub mod inpaint;
pub mod languages;
pub mod logging;
pub mod ocr;
pub mod overlay;
pub mod pipeline;
pub mod providers;
pub mod server;
pub mod settings;
pub mod storage;
#[cfg(test)]
mod test_util;
pub mod translator;

pub use error::PipelineError;
pub use inpaint::Inpainter;
pub use ocr::{BoundingBox, OcrBackend, OcrExtractor, TextBlock};
pub use overlay::TextOverlayRenderer;
pub use pipeline::{DefaultPipeline, Pipeline, PipelineResult, TranslatedTextBlock};
pub use providers::{ProviderKind, TranslationProvider};
pub use settings::Settings;
pub use translator::{BlockTranslation, Translator};

#[derive(Debug, Clone)]
pub struct Config {
    pub image: PathBuf,
    pub out: Option<PathBuf>,
    pub settings_path: Option<String>,
}

/// Translates one slide image, writes the rendered JPEG and returns the
/// result as JSON without the image bytes.
pub async fn run(config: Config) -> Result<String> {
    let settings = settings::load_settings(config.settings_path.as_deref().map(Path::new))?;
    let pipeline = DefaultPipeline::from_settings(&settings)?;
    let bytes = std::fs::read(&config.image)
        .with_context(|| format!("failed to read image: {}", config.image.display()))?;

    let mut result = pipeline.translate_slide(&bytes).await?;
    if let Some(image) = result.processed_image.take() {
        let out = config
            .out
            .clone()
            .unwrap_or_else(|| default_output_path(&config.image));
        std::fs::write(&out, image)
            .with_context(|| format!("failed to write output: {}", out.display()))?;
        info!("wrote {}", out.display());
    }
    serde_json::to_string_pretty(&result).with_context(|| "failed to serialize result")
}

pub async fn serve(settings_path: Option<&str>, addr: String) -> Result<()> {
    let settings = settings::load_settings(settings_path.map(Path::new))?;
    server::run_server(settings, addr).await
}

/// `slides/intro.png` becomes `slides/intro.translated.jpg`.
pub fn default_output_path(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "slide".to_string());
    image.with_file_name(format!("{}.translated.jpg", stem))
}
