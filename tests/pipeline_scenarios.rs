use anyhow::anyhow;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use slide_translator_rust::ocr::{OcrFuture, OcrInput};
use slide_translator_rust::providers::TranslateFuture;
use slide_translator_rust::{
    BoundingBox, Inpainter, OcrBackend, OcrExtractor, Pipeline, PipelineError, PipelineResult,
    Settings, TextBlock, TextOverlayRenderer, TranslationProvider, Translator, codec,
};

#[derive(Debug, Clone)]
struct ScriptedOcr {
    name: &'static str,
    blocks: Option<Vec<TextBlock>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedOcr {
    fn finds(name: &'static str, blocks: Vec<TextBlock>) -> Self {
        Self {
            name,
            blocks: Some(blocks),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn broken(name: &'static str) -> Self {
        Self {
            name,
            blocks: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrBackend for ScriptedOcr {
    fn name(&self) -> &str {
        self.name
    }

    fn recognize<'a>(&'a self, _input: &'a OcrInput<'a>) -> OcrFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let blocks = self.blocks.clone();
        Box::pin(async move { blocks.ok_or_else(|| anyhow!("engine crashed")) })
    }
}

#[derive(Clone, Default)]
struct Dictionary {
    entries: HashMap<String, String>,
    calls: Arc<AtomicUsize>,
}

impl Dictionary {
    fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            entries: pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            calls: Arc::default(),
        }
    }
}

impl TranslationProvider for Dictionary {
    fn kind(&self) -> &'static str {
        "dictionary"
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        _source: Option<&'a str>,
        _target: &'a str,
    ) -> TranslateFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self.entries.get(text).cloned();
        Box::pin(async move { entry.ok_or_else(|| anyhow!("request timed out after 12s")) })
    }
}

fn text_block(text: &str, x: u32, y: u32, width: u32, height: u32) -> TextBlock {
    TextBlock {
        text: text.to_string(),
        bounding_box: BoundingBox::new(x, y, width, height),
        confidence: 0.95,
    }
}

fn settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.temp_dir = Some(dir.path().to_path_buf());
    settings
}

fn renderer(settings: &Settings) -> TextOverlayRenderer {
    TextOverlayRenderer::with_database(usvg::fontdb::Database::new(), &settings.render)
}

fn build(
    backends: Vec<ScriptedOcr>,
    provider: Dictionary,
    settings: &Settings,
) -> Pipeline<ScriptedOcr, Dictionary> {
    Pipeline::new(
        OcrExtractor::new(backends).expect("extractor"),
        Translator::new(provider),
        renderer(settings),
        settings,
    )
}

/// White 200x100 slide with a black block where "Hello World" sits.
fn hello_slide() -> RgbImage {
    let mut image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
    for y in 10..40 {
        for x in 10..110 {
            image.put_pixel(x, y, Rgb([0, 0, 0]));
        }
    }
    image
}

fn png(image: &RgbImage) -> Vec<u8> {
    codec::encode_png(image).expect("png")
}

#[tokio::test]
async fn hello_world_is_translated_erased_and_redrawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(&dir);
    let pipeline = build(
        vec![ScriptedOcr::finds(
            "local",
            vec![text_block("Hello World", 10, 10, 100, 30)],
        )],
        Dictionary::with(&[("Hello World", "こんにちは世界")]),
        &settings,
    );

    let result = pipeline
        .translate_slide(&png(&hello_slide()))
        .await
        .expect("translate");

    assert_eq!(result.detected_language, "en");
    assert_eq!(result.target_language.as_deref(), Some("ja"));
    assert_eq!(result.original_text, "Hello World");
    assert_eq!(result.translated_text, "こんにちは世界");
    assert_eq!(result.blocks.len(), 1);
    assert_eq!(result.blocks[0].translated_text, "こんにちは世界");
    assert_eq!(result.blocks[0].block.bounding_box, BoundingBox::new(10, 10, 100, 30));

    // Padded sample is 120x50 with half of it black: the box becomes mid grey.
    let erased = Inpainter::default().erase(hello_slide(), &[BoundingBox::new(10, 10, 100, 30)]);
    for y in 10..40 {
        for x in 10..110 {
            assert_eq!(erased.get_pixel(x, y), &Rgb([128, 128, 128]));
        }
    }

    let processed = codec::decode(result.processed_image.as_deref().expect("image")).expect("jpeg");
    assert_eq!(processed.dimensions(), (200, 100));
    let centre = processed.get_pixel(60, 28);
    assert!(centre.0.iter().all(|channel| channel.abs_diff(128) <= 12), "{centre:?}");

    let layouts = renderer(&settings).layout(&result.blocks, "ja");
    assert_eq!(layouts[0].lines.len(), 1);
    assert_eq!(layouts[0].lines[0].text, "こんにちは世界");
    assert_eq!((layouts[0].lines[0].x, layouts[0].lines[0].y), (10.0, 10.0));
}

#[tokio::test]
async fn slide_without_text_short_circuits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(&dir);
    let provider = Dictionary::default();
    let pipeline = build(
        vec![
            ScriptedOcr::finds("local", Vec::new()),
            ScriptedOcr::finds("cloud", Vec::new()),
        ],
        provider.clone(),
        &settings,
    );

    let result = pipeline
        .translate_slide(&png(&hello_slide()))
        .await
        .expect("translate");

    assert_eq!(result, PipelineResult::no_text());
    assert!(result.processed_image.is_none());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        serde_json::to_value(&result).expect("json"),
        serde_json::json!({
            "originalText": "",
            "translatedText": "",
            "detectedLanguage": "unknown",
            "blocks": []
        })
    );
}

#[tokio::test]
async fn failed_block_keeps_its_text_without_affecting_siblings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(&dir);
    let pipeline = build(
        vec![ScriptedOcr::finds(
            "local",
            vec![
                text_block("Quarterly results", 10, 10, 150, 20),
                text_block("Revenue up 20%", 10, 50, 150, 20),
            ],
        )],
        Dictionary::with(&[("Quarterly results", "四半期決算")]),
        &settings,
    );

    let result = pipeline
        .translate_slide(&png(&hello_slide()))
        .await
        .expect("translate");

    assert_eq!(result.blocks[0].translated_text, "四半期決算");
    assert_eq!(result.blocks[1].translated_text, result.blocks[1].block.text);
    assert_eq!(result.translated_text, "四半期決算\n\nRevenue up 20%");
    assert!(result.processed_image.is_some());
}

#[tokio::test]
async fn later_ocr_backend_covers_for_a_broken_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(&dir);
    let broken = ScriptedOcr::broken("local");
    let cloud = ScriptedOcr::finds(
        "cloud",
        vec![
            text_block("こんにちは", 10, 10, 100, 30),
            text_block("ありがとう", 10, 50, 100, 30),
        ],
    );
    let spare = ScriptedOcr::finds("spare", vec![text_block("unused", 0, 0, 10, 10)]);
    let pipeline = build(
        vec![broken.clone(), cloud.clone(), spare.clone()],
        Dictionary::with(&[("こんにちは", "Hello"), ("ありがとう", "Thanks")]),
        &settings,
    );

    let result = pipeline
        .translate_slide(&png(&hello_slide()))
        .await
        .expect("translate");

    let texts = result
        .blocks
        .iter()
        .map(|block| block.block.text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["こんにちは", "ありがとう"]);
    assert_eq!(result.detected_language, "ja");
    assert_eq!(result.target_language.as_deref(), Some("en"));
    assert_eq!((broken.calls(), cloud.calls(), spare.calls()), (1, 1, 0));
}

#[tokio::test]
async fn fatal_errors_cross_the_boundary_and_leave_no_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(&dir);
    let pipeline = build(
        vec![ScriptedOcr::broken("local"), ScriptedOcr::broken("cloud")],
        Dictionary::default(),
        &settings,
    );

    let err = pipeline
        .translate_slide(&png(&hello_slide()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::OcrBackendUnavailable { ref attempts } if attempts.len() == 2));

    let err = pipeline.translate_slide(b"\x89PNG broken").await.unwrap_err();
    assert!(matches!(err, PipelineError::ImageDecode(_)));

    let leftovers = std::fs::read_dir(dir.path()).expect("read dir").count();
    assert_eq!(leftovers, 0);
}

#[test]
fn extractor_without_backends_is_a_configuration_error() {
    let err = OcrExtractor::<ScriptedOcr>::new(Vec::new()).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
}
