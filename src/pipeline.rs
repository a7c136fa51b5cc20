use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::PipelineError;
use crate::inpaint::Inpainter;
use crate::languages::{self, UNKNOWN_LANGUAGE};
use crate::ocr::{self, OcrBackend, OcrBackendImpl, OcrExtractor, OcrInput, TextBlock};
use crate::overlay::TextOverlayRenderer;
use crate::providers::{self, ProviderImpl, TranslationProvider};
use crate::settings::Settings;
use crate::storage::EphemeralStore;
use crate::translator::{BlockTranslation, Translator};

/// Joins block texts in `originalText` and `translatedText`.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedTextBlock {
    #[serde(flatten)]
    pub block: TextBlock,
    /// The original text when translation failed; never empty.
    pub translated_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub original_text: String,
    pub translated_text: String,
    pub detected_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_image"
    )]
    pub processed_image: Option<Vec<u8>>,
    pub blocks: Vec<TranslatedTextBlock>,
}

impl PipelineResult {
    /// The short-circuit result for a slide without text.
    pub fn no_text() -> Self {
        Self {
            original_text: String::new(),
            translated_text: String::new(),
            detected_language: UNKNOWN_LANGUAGE.to_string(),
            target_language: None,
            processed_image: None,
            blocks: Vec::new(),
        }
    }
}

fn serialize_image<S: Serializer>(image: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match image {
        Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Extracting,
    NoText,
    Detecting,
    Translating,
    Inpainting,
    Rendering,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Extracting => "extracting",
            Stage::NoText => "no_text",
            Stage::Detecting => "detecting",
            Stage::Translating => "translating",
            Stage::Inpainting => "inpainting",
            Stage::Rendering => "rendering",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Init, Stage::Extracting)
                | (Stage::Extracting, Stage::NoText | Stage::Detecting)
                | (Stage::NoText, Stage::Done)
                | (Stage::Detecting, Stage::Translating)
                | (Stage::Translating, Stage::Inpainting)
                | (Stage::Inpainting, Stage::Rendering)
                | (Stage::Rendering, Stage::Done)
        ) || (next == Stage::Failed && !matches!(self, Stage::Done | Stage::Failed))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stage of one invocation.
#[derive(Debug)]
struct StageTracker {
    stage: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self { stage: Stage::Init }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "invalid stage transition {} -> {}",
            self.stage,
            next
        );
        debug!("pipeline stage {} -> {}", self.stage, next);
        self.stage = next;
    }
}

/// One slide in, one translated slide out. Holds no per-slide state, so a
/// single pipeline can serve concurrent invocations.
pub struct Pipeline<B: OcrBackend, P: TranslationProvider> {
    extractor: OcrExtractor<B>,
    translator: Translator<P>,
    inpainter: Inpainter,
    renderer: Arc<TextOverlayRenderer>,
    store: EphemeralStore,
    concurrency: usize,
    jpeg_quality: u8,
}

pub type DefaultPipeline = Pipeline<OcrBackendImpl, ProviderImpl>;

impl DefaultPipeline {
    /// Builds the configured backends. Missing backends fail here, before any
    /// slide is processed.
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let extractor = OcrExtractor::new(ocr::build_backends(&settings.ocr)?)?;
        let translator = Translator::new(providers::build_provider(&settings.translation)?);
        info!(
            "pipeline ready: ocr [{}], translation {}",
            extractor.backend_names().join(", "),
            translator.provider_kind()
        );
        let renderer = TextOverlayRenderer::new(&settings.render);
        Ok(Self::new(extractor, translator, renderer, settings))
    }
}

impl<B: OcrBackend, P: TranslationProvider> Pipeline<B, P> {
    pub fn new(
        extractor: OcrExtractor<B>,
        translator: Translator<P>,
        renderer: TextOverlayRenderer,
        settings: &Settings,
    ) -> Self {
        Self {
            extractor,
            translator,
            inpainter: Inpainter::new(settings.inpaint_padding),
            renderer: Arc::new(renderer),
            store: EphemeralStore::new(settings.temp_dir.clone()),
            concurrency: settings.translation.concurrency.max(1),
            jpeg_quality: settings.jpeg_quality,
        }
    }

    pub async fn translate_slide(&self, bytes: &[u8]) -> Result<PipelineResult, PipelineError> {
        let mut tracker = StageTracker::new();
        match self.run(bytes, &mut tracker).await {
            Ok(result) => Ok(result),
            Err(err) => {
                let stage = tracker.stage;
                tracker.advance(Stage::Failed);
                error!(
                    "slide translation failed during {} ({}): {}",
                    stage,
                    err.kind(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        bytes: &[u8],
        tracker: &mut StageTracker,
    ) -> Result<PipelineResult, PipelineError> {
        let owned = bytes.to_vec();
        let image = tokio::task::spawn_blocking(move || codec::decode(&owned))
            .await
            .with_context(|| "image decode task failed")??;
        let (width, height) = image.dimensions();

        // Dropped on every exit path below, which deletes the file.
        let input_file = self.store.write(bytes, ".img")?;

        tracker.advance(Stage::Extracting);
        let input = OcrInput {
            bytes,
            path: input_file.path(),
            width,
            height,
        };
        let blocks = self.extractor.extract(&input).await?;
        if blocks.is_empty() {
            tracker.advance(Stage::NoText);
            info!("no text detected on slide ({}x{})", width, height);
            input_file.delete();
            tracker.advance(Stage::Done);
            return Ok(PipelineResult::no_text());
        }

        tracker.advance(Stage::Detecting);
        let original_text = join_texts(blocks.iter().map(|block| block.text.as_str()));
        let detected = languages::detect_language(&original_text);
        let target = languages::select_target_language(detected);
        debug!("detected {}, translating to {}", detected, target);

        tracker.advance(Stage::Translating);
        let boxes = blocks.iter().map(|block| block.bounding_box).collect::<Vec<_>>();
        let (translated, fallbacks) = self.translate_blocks(blocks, target).await;

        tracker.advance(Stage::Inpainting);
        let inpainter = self.inpainter;
        let cleaned = tokio::task::spawn_blocking(move || inpainter.erase(image, &boxes))
            .await
            .with_context(|| "inpainting task failed")?;

        tracker.advance(Stage::Rendering);
        let renderer = Arc::clone(&self.renderer);
        let to_draw = translated.clone();
        let quality = self.jpeg_quality;
        let processed = tokio::task::spawn_blocking(move || {
            let rendered = renderer.render(&cleaned, &to_draw, target)?;
            codec::encode_jpeg(&rendered, quality)
        })
        .await
        .with_context(|| "rendering task failed")??;

        input_file.delete();
        tracker.advance(Stage::Done);
        info!(
            "translated slide: {} block(s) {} -> {}, {} kept original text",
            translated.len(),
            detected,
            target,
            fallbacks
        );
        Ok(PipelineResult {
            original_text,
            translated_text: join_texts(translated.iter().map(|block| block.translated_text.as_str())),
            detected_language: detected.to_string(),
            target_language: Some(target.to_string()),
            processed_image: Some(processed),
            blocks: translated,
        })
    }

    /// Output order matches input order whatever the concurrency; a failed
    /// block keeps its own text and never affects its siblings.
    async fn translate_blocks(
        &self,
        blocks: Vec<TextBlock>,
        target: &str,
    ) -> (Vec<TranslatedTextBlock>, usize) {
        let translator = &self.translator;
        let outcomes = stream::iter(blocks.into_iter().enumerate())
            .map(|(index, block)| async move {
                let outcome = translator.translate_block(&block.text, target).await;
                let fallback = outcome.is_fallback();
                if let BlockTranslation::Fallback { reason, .. } = &outcome {
                    warn!("block {} kept its original text: {}", index, reason);
                }
                let block = TranslatedTextBlock {
                    translated_text: outcome.into_text(),
                    block,
                };
                (block, fallback)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        let fallbacks = outcomes.iter().filter(|(_, fallback)| *fallback).count();
        (outcomes.into_iter().map(|(block, _)| block).collect(), fallbacks)
    }
}

fn join_texts<'a>(texts: impl Iterator<Item = &'a str>) -> String {
    texts.collect::<Vec<_>>().join(PARAGRAPH_SEPARATOR)
}
