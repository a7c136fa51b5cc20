use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::{Backoff, is_rate_limited, retry_after};
use super::{TranslateFuture, TranslationProvider, http_client};

/// Community / self-hosted backend: a LibreTranslate instance.
#[derive(Debug, Clone)]
pub struct LibreTranslate {
    base_url: String,
    api_key: Option<String>,
    max_retries: usize,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    error: Option<String>,
}

impl LibreTranslate {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            max_retries,
            client: http_client(timeout)?,
        })
    }

    fn url(&self) -> String {
        format!("{}/translate", self.base_url.trim_end_matches('/'))
    }
}

impl TranslationProvider for LibreTranslate {
    fn kind(&self) -> &'static str {
        "libre"
    }

    fn translate<'a>(
        &'a self,
        text: &'a str,
        source: Option<&'a str>,
        target: &'a str,
    ) -> TranslateFuture<'a> {
        Box::pin(async move {
            let request = TranslateRequest {
                q: text,
                source: source.unwrap_or("auto"),
                target,
                format: "text",
                api_key: self.api_key.as_deref(),
            };
            let url = self.url();

            let mut backoff = Backoff::new("LibreTranslate", self.max_retries);
            loop {
                let response = self
                    .client
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .with_context(|| "LibreTranslate request failed")?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_translation(&body);
                }
                if is_rate_limited(status, &body) && backoff.can_retry() {
                    backoff.wait(retry_after).await;
                    continue;
                }
                let message = serde_json::from_str::<TranslateResponse>(&body)
                    .ok()
                    .and_then(|parsed| parsed.error)
                    .unwrap_or(body);
                return Err(anyhow!("LibreTranslate error ({}): {}", status, message));
            }
        })
    }
}

fn extract_translation(body: &str) -> Result<String> {
    let parsed: TranslateResponse = serde_json::from_str(body)
        .map_err(|err| anyhow!("failed to parse LibreTranslate response JSON: {}", err))?;
    if let Some(error) = parsed.error {
        return Err(anyhow!("LibreTranslate error: {}", error));
    }
    parsed
        .translated_text
        .ok_or_else(|| anyhow!("no translatedText in LibreTranslate response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use crate::translator::{BlockTranslation, Translator};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn error_field_is_a_failure() {
        assert!(extract_translation(r#"{"error":"target language not supported"}"#).is_err());
        assert_eq!(
            extract_translation(r#"{"translatedText":"Hello"}"#).unwrap(),
            "Hello"
        );
    }

    #[tokio::test]
    async fn posts_auto_source_and_api_key() {
        let router = Router::new().route(
            "/translate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["source"], "auto");
                assert_eq!(body["target"], "en");
                assert_eq!(body["api_key"], "secret");
                Json(json!({"translatedText": "Hello", "detectedLanguage": {"language": "ja"}}))
            }),
        );
        let base = serve(router).await;
        let provider = LibreTranslate::new(
            base,
            Some("secret".to_string()),
            Duration::from_secs(5),
            0,
        )
        .expect("provider");
        let translated = provider
            .translate("こんにちは", None, "en")
            .await
            .expect("translate");
        assert_eq!(translated, "Hello");
    }

    #[tokio::test]
    async fn quota_response_is_an_error_once_retries_run_out() {
        let router = Router::new().route(
            "/translate",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    r#"{"error":"Slowdown: 30 per 1 minute"}"#,
                )
            }),
        );
        let base = serve(router).await;
        let provider =
            LibreTranslate::new(base, None, Duration::from_secs(5), 0).expect("provider");
        let err = provider.translate("Hello", None, "ja").await.unwrap_err();
        assert!(err.to_string().contains("Slowdown"));
    }

    #[tokio::test]
    async fn slow_backend_times_out_and_block_keeps_original_text() {
        let router = Router::new().route(
            "/translate",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"translatedText": "too late"}))
            }),
        );
        let base = serve(router).await;
        let provider =
            LibreTranslate::new(base, None, Duration::from_millis(300), 0).expect("provider");
        let outcome = Translator::new(provider).translate_block("Hello", "ja").await;
        match outcome {
            BlockTranslation::Fallback { original, reason } => {
                assert_eq!(original, "Hello");
                assert!(reason.starts_with("libre: "), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_request_is_retried_until_it_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/translate",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::TOO_MANY_REQUESTS,
                            [("retry-after", "0")],
                            r#"{"error":"Slowdown: 30 per 1 minute"}"#.to_string(),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            [("retry-after", "0")],
                            r#"{"translatedText":"こんにちは"}"#.to_string(),
                        )
                    }
                }
            }),
        );
        let base = serve(router).await;
        let provider =
            LibreTranslate::new(base, None, Duration::from_secs(5), 1).expect("provider");
        let translated = provider
            .translate("Hello", None, "ja")
            .await
            .expect("translate after retry");
        assert_eq!(translated, "こんにちは");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
