use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::{Backoff, is_rate_limited, retry_after};
use super::{TranslateFuture, TranslationProvider, http_client};

/// Metered backend: Google Cloud Translation (v2 REST).
#[derive(Debug, Clone)]
pub struct GoogleTranslate {
    key: String,
    endpoint: String,
    max_retries: usize,
    client: reqwest::Client,
}

impl GoogleTranslate {
    pub fn new(
        key: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            endpoint: endpoint.into(),
            max_retries,
            client: http_client(timeout)?,
        })
    }
}

impl TranslationProvider for GoogleTranslate {
    fn kind(&self) -> &'static str {
        "google"
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        source: Option<&'a str>,
        target: &'a str,
    ) -> TranslateFuture<'a> {
        Box::pin(async move {
            let body = TranslateRequest {
                q: [text],
                target,
                source,
                format: "text",
            };

            let mut backoff = Backoff::new("Google Translate", self.max_retries);
            loop {
                let response = self
                    .client
                    .post(&self.endpoint)
                    .header("x-goog-api-key", self.key.as_str())
                    .json(&body)
                    .send()
                    .await
                    .with_context(|| "Google Translate request failed")?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_translation(&text);
                }
                if is_rate_limited(status, &text) && backoff.can_retry() {
                    backoff.wait(retry_after).await;
                    continue;
                }
                return Err(anyhow!(
                    "Google Translate API error ({}): {}",
                    status,
                    extract_google_error(&text).unwrap_or(text)
                ));
            }
        })
    }
}

fn extract_translation(text: &str) -> Result<String> {
    let payload: TranslateResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Google Translate response JSON: {}", err))?;
    payload
        .data
        .translations
        .into_iter()
        .next()
        .map(|translation| translation.translated_text)
        .ok_or_else(|| anyhow!("no translation returned from Google Translate"))
}

fn extract_google_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GoogleError>,
    }

    #[derive(Deserialize)]
    struct GoogleError {
        message: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let message = error.message.unwrap_or_else(|| "unknown error".to_string());
    Some(match error.code {
        Some(code) => format!("{} | code: {}", message, code),
        None => message,
    })
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: [&'a str; 1],
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}
