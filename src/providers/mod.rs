use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::error::PipelineError;
use crate::settings::TranslationSettings;

mod google;
mod libre;
pub(crate) mod retry;

pub use google::GoogleTranslate;
pub use libre::LibreTranslate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Google,
    Libre,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Libre => "libre",
        }
    }
}

pub type TranslateFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// A machine translation backend. `source` of `None` asks the backend to
/// detect the source language itself.
pub trait TranslationProvider: Send + Sync {
    fn kind(&self) -> &'static str;
    fn translate<'a>(
        &'a self,
        text: &'a str,
        source: Option<&'a str>,
        target: &'a str,
    ) -> TranslateFuture<'a>;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    Google(GoogleTranslate),
    Libre(LibreTranslate),
}

impl TranslationProvider for ProviderImpl {
    fn kind(&self) -> &'static str {
        match self {
            ProviderImpl::Google(provider) => provider.kind(),
            ProviderImpl::Libre(provider) => provider.kind(),
        }
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        source: Option<&'a str>,
        target: &'a str,
    ) -> TranslateFuture<'a> {
        match self {
            ProviderImpl::Google(provider) => provider.translate(text, source, target),
            ProviderImpl::Libre(provider) => provider.translate(text, source, target),
        }
    }
}

/// Picks the single backend used for every block of an invocation.
pub fn resolve_provider_kind(settings: &TranslationSettings) -> Result<ProviderKind, PipelineError> {
    let has_google_key = settings.google_api_key.is_some();
    match settings.provider.trim().to_lowercase().as_str() {
        "auto" | "" => Ok(if has_google_key {
            ProviderKind::Google
        } else {
            ProviderKind::Libre
        }),
        "google" => {
            if has_google_key {
                Ok(ProviderKind::Google)
            } else {
                Err(PipelineError::configuration(
                    "translation provider 'google' requires GOOGLE_CLOUD_API_KEY",
                ))
            }
        }
        "libre" | "libretranslate" => Ok(ProviderKind::Libre),
        other => Err(PipelineError::configuration(format!(
            "unknown translation provider '{}' (expected auto, google or libre)",
            other
        ))),
    }
}

pub fn build_provider(settings: &TranslationSettings) -> Result<ProviderImpl, PipelineError> {
    let kind = resolve_provider_kind(settings)?;
    debug!("translation provider selected: {}", kind.as_str());
    let timeout = settings.timeout();
    let provider = match kind {
        ProviderKind::Google => {
            let key = settings.google_api_key.clone().unwrap_or_default();
            GoogleTranslate::new(
                key,
                settings.google_endpoint.clone(),
                timeout,
                settings.max_retries,
            )
            .map(ProviderImpl::Google)
        }
        ProviderKind::Libre => {
            if settings.libre_url.trim().is_empty() {
                return Err(PipelineError::configuration(
                    "LibreTranslate selected but no URL is configured",
                ));
            }
            LibreTranslate::new(
                settings.libre_url.clone(),
                settings.libre_api_key.clone(),
                timeout,
                settings.max_retries,
            )
            .map(ProviderImpl::Libre)
        }
    };
    provider.map_err(|err| PipelineError::configuration(format!("{:#}", err)))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .with_context(|| "failed to create HTTP client")
}
