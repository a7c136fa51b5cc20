use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

const TRANSLATION_TIMEOUT_MIN_SECS: u64 = 10;
const TRANSLATION_TIMEOUT_MAX_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr: OcrSettings,
    pub translation: TranslationSettings,
    pub inpaint_padding: u32,
    pub render: RenderSettings,
    pub jpeg_quality: u8,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub backends: Vec<String>,
    pub languages: String,
    pub psm: u32,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub vision_endpoint: String,
    pub vision_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub provider: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub max_retries: usize,
    pub google_endpoint: String,
    pub google_api_key: Option<String>,
    pub libre_url: String,
    pub libre_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub latin_font_family: Option<String>,
    pub cjk_font_family: Option<String>,
    pub latin_font_path: Option<String>,
    pub cjk_font_path: Option<String>,
    pub max_font_size: u32,
    pub line_height: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr: OcrSettings {
                backends: vec!["tesseract".to_string(), "vision".to_string()],
                languages: "eng+jpn".to_string(),
                psm: 3,
                timeout_secs: 30,
                max_retries: 2,
                vision_endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
                vision_api_key: None,
            },
            translation: TranslationSettings {
                provider: "auto".to_string(),
                timeout_secs: 12,
                concurrency: 1,
                max_retries: 2,
                google_endpoint: "https://translation.googleapis.com/language/translate/v2"
                    .to_string(),
                google_api_key: None,
                libre_url: "https://libretranslate.com".to_string(),
                libre_api_key: None,
            },
            inpaint_padding: 10,
            render: RenderSettings {
                latin_font_family: None,
                cjk_font_family: None,
                latin_font_path: None,
                cjk_font_path: None,
                max_font_size: 72,
                line_height: 1.2,
            },
            jpeg_quality: 90,
            temp_dir: None,
        }
    }
}

impl OcrSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl TranslationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .clamp(TRANSLATION_TIMEOUT_MIN_SECS, TRANSLATION_TIMEOUT_MAX_SECS),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSection>,
    translation: Option<TranslationSection>,
    inpaint: Option<InpaintSection>,
    render: Option<RenderSection>,
    output: Option<OutputSection>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSection {
    backends: Option<Vec<String>>,
    languages: Option<String>,
    psm: Option<u32>,
    timeout_secs: Option<u64>,
    max_retries: Option<usize>,
    vision_endpoint: Option<String>,
    vision_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSection {
    provider: Option<String>,
    timeout_secs: Option<u64>,
    concurrency: Option<usize>,
    max_retries: Option<usize>,
    google_endpoint: Option<String>,
    google_api_key: Option<String>,
    libre_url: Option<String>,
    libre_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InpaintSection {
    padding: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSection {
    latin_font_family: Option<String>,
    cjk_font_family: Option<String>,
    latin_font_path: Option<String>,
    cjk_font_path: Option<String>,
    max_font_size: Option<u32>,
    line_height: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSection {
    jpeg_quality: Option<u8>,
    temp_dir: Option<String>,
}

/// Loads layered settings. Environment variables are consulted here and
/// nowhere else; the resulting value is handed to constructors explicitly.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    load_settings_with_env(extra_path, get_env)
}

fn load_settings_with_env<F>(extra_path: Option<&Path>, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = Settings::default();
    settings
        .merge_str(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse default settings")?;
    settings.apply_env(lookup);

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    /// Overrides credentials and endpoints from the environment. Applied on
    /// top of the embedded defaults and below every settings file, so a
    /// value set in any settings file wins over the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GOOGLE_CLOUD_API_KEY") {
            self.ocr.vision_api_key = Some(key.clone());
            self.translation.google_api_key = Some(key);
        }
        if let Some(url) = lookup("LIBRETRANSLATE_URL") {
            self.translation.libre_url = url.trim().to_string();
        }
        if let Some(key) = lookup("LIBRETRANSLATE_API_KEY") {
            self.translation.libre_api_key = Some(key);
        }
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(backends) = ocr.backends {
                self.ocr.backends = backends;
            }
            if let Some(languages) = non_empty(ocr.languages) {
                self.ocr.languages = languages;
            }
            if let Some(psm) = ocr.psm {
                self.ocr.psm = psm;
            }
            if let Some(secs) = ocr.timeout_secs.filter(|secs| *secs > 0) {
                self.ocr.timeout_secs = secs;
            }
            if let Some(retries) = ocr.max_retries {
                self.ocr.max_retries = retries;
            }
            if let Some(endpoint) = non_empty(ocr.vision_endpoint) {
                self.ocr.vision_endpoint = endpoint;
            }
            if let Some(key) = non_empty(ocr.vision_api_key) {
                self.ocr.vision_api_key = Some(key);
            }
        }
        if let Some(translation) = incoming.translation {
            if let Some(provider) = non_empty(translation.provider) {
                self.translation.provider = provider;
            }
            if let Some(secs) = translation.timeout_secs {
                self.translation.timeout_secs = secs;
            }
            if let Some(concurrency) = translation.concurrency.filter(|value| *value > 0) {
                self.translation.concurrency = concurrency;
            }
            if let Some(retries) = translation.max_retries {
                self.translation.max_retries = retries;
            }
            if let Some(endpoint) = non_empty(translation.google_endpoint) {
                self.translation.google_endpoint = endpoint;
            }
            if let Some(key) = non_empty(translation.google_api_key) {
                self.translation.google_api_key = Some(key);
            }
            if let Some(url) = translation.libre_url {
                self.translation.libre_url = url.trim().to_string();
            }
            if let Some(key) = non_empty(translation.libre_api_key) {
                self.translation.libre_api_key = Some(key);
            }
        }
        if let Some(inpaint) = incoming.inpaint {
            if let Some(padding) = inpaint.padding {
                self.inpaint_padding = padding;
            }
        }
        if let Some(render) = incoming.render {
            if let Some(family) = non_empty(render.latin_font_family) {
                self.render.latin_font_family = Some(family);
            }
            if let Some(family) = non_empty(render.cjk_font_family) {
                self.render.cjk_font_family = Some(family);
            }
            if let Some(path) = non_empty(render.latin_font_path) {
                self.render.latin_font_path = Some(path);
            }
            if let Some(path) = non_empty(render.cjk_font_path) {
                self.render.cjk_font_path = Some(path);
            }
            if let Some(size) = render.max_font_size.filter(|size| *size > 0) {
                self.render.max_font_size = size;
            }
            if let Some(ratio) = render.line_height.filter(|ratio| *ratio > 0.0) {
                self.render.line_height = ratio;
            }
        }
        if let Some(output) = incoming.output {
            if let Some(quality) = output.jpeg_quality {
                self.jpeg_quality = quality.clamp(1, 100);
            }
            if let Some(dir) = non_empty(output.temp_dir) {
                self.temp_dir = Some(PathBuf::from(dir));
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".slide-translator-rust"))
        }
    })
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
