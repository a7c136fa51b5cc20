use crate::providers::TranslationProvider;

/// Outcome of translating one block. A failed block keeps its original text.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockTranslation {
    Translated(String),
    Fallback { original: String, reason: String },
}

impl BlockTranslation {
    pub fn text(&self) -> &str {
        match self {
            BlockTranslation::Translated(text) => text,
            BlockTranslation::Fallback { original, .. } => original,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            BlockTranslation::Translated(text) => text,
            BlockTranslation::Fallback { original, .. } => original,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, BlockTranslation::Fallback { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Translator<P: TranslationProvider> {
    provider: P,
}

impl<P: TranslationProvider> Translator<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider_kind(&self) -> &'static str {
        self.provider.kind()
    }

    /// Never fails: backend errors and empty answers come back as
    /// [`BlockTranslation::Fallback`] for the caller to log.
    pub async fn translate_block(&self, text: &str, target: &str) -> BlockTranslation {
        match self.provider.translate(text, None, target).await {
            Ok(translated) if !translated.trim().is_empty() => {
                BlockTranslation::Translated(translated)
            }
            Ok(_) => BlockTranslation::Fallback {
                original: text.to_string(),
                reason: format!("{} returned an empty translation", self.provider.kind()),
            },
            Err(err) => BlockTranslation::Fallback {
                original: text.to_string(),
                reason: format!("{}: {:#}", self.provider.kind(), err),
            },
        }
    }
}
