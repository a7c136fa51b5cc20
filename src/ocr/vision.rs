use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{BoundingBox, DEFAULT_CONFIDENCE, OcrBackend, OcrFuture, OcrInput, TextBlock};
use crate::providers::http_client;
use crate::providers::retry::{Backoff, is_rate_limited, retry_after};

/// Cloud engine: Google Cloud Vision `images:annotate` with document text
/// detection.
#[derive(Debug, Clone)]
pub struct Vision {
    key: String,
    endpoint: String,
    max_retries: usize,
    client: reqwest::Client,
}

impl Vision {
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

impl OcrBackend for Vision {
    fn name(&self) -> &str {
        "vision"
    }

    fn recognize<'a>(&'a self, input: &'a OcrInput<'a>) -> OcrFuture<'a> {
        Box::pin(async move {
            let body = json!({
                "requests": [
                    {
                        "image": {"content": BASE64.encode(input.bytes)},
                        "features": [{"type": "DOCUMENT_TEXT_DETECTION"}]
                    }
                ]
            });

            let mut backoff = Backoff::new("Vision", self.max_retries);
            loop {
                let response = self
                    .client
                    .post(&self.endpoint)
                    .header("x-goog-api-key", self.key.as_str())
                    .json(&body)
                    .send()
                    .await
                    .with_context(|| "Vision request failed")?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return parse_annotate_response(&text);
                }
                if is_rate_limited(status, &text) && backoff.can_retry() {
                    backoff.wait(retry_after).await;
                    continue;
                }
                return Err(anyhow!(
                    "Vision API error ({}): {}",
                    status,
                    extract_vision_error(&text).unwrap_or(text)
                ));
            }
        })
    }
}

/// Normalises an `images:annotate` response into one block per paragraph.
pub(crate) fn parse_annotate_response(text: &str) -> Result<Vec<TextBlock>> {
    let payload: AnnotateResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Vision response JSON: {}", err))?;
    let Some(response) = payload.responses.into_iter().next() else {
        return Ok(Vec::new());
    };
    if let Some(error) = response.error {
        return Err(anyhow!(
            "Vision annotate error ({}): {}",
            error.code.unwrap_or_default(),
            error.message.unwrap_or_default()
        ));
    }
    let Some(annotation) = response.full_text_annotation else {
        return Ok(Vec::new());
    };

    let mut blocks = Vec::new();
    for page in annotation.pages {
        for block in page.blocks {
            let confidence = block.confidence.unwrap_or(DEFAULT_CONFIDENCE);
            for paragraph in block.paragraphs {
                let Some(bounding_box) = polygon_bounds(&paragraph.bounding_box) else {
                    continue;
                };
                let text = paragraph_text(&paragraph);
                if text.is_empty() {
                    continue;
                }
                blocks.push(TextBlock {
                    text,
                    bounding_box,
                    confidence,
                });
            }
        }
    }
    Ok(blocks)
}

fn polygon_bounds(polygon: &Option<BoundingPoly>) -> Option<BoundingBox> {
    let vertices = &polygon.as_ref()?.vertices;
    let min_x = vertices.iter().map(|v| v.x).min()?;
    let min_y = vertices.iter().map(|v| v.y).min()?;
    let max_x = vertices.iter().map(|v| v.x).max()?;
    let max_y = vertices.iter().map(|v| v.y).max()?;
    Some(BoundingBox::from_extents(min_x, min_y, max_x, max_y))
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    for word in &paragraph.words {
        for symbol in &word.symbols {
            text.push_str(&symbol.text);
            let detected_break = symbol
                .property
                .as_ref()
                .and_then(|property| property.detected_break.as_ref())
                .map(|detected| detected.kind.as_str());
            if matches!(
                detected_break,
                Some("SPACE" | "SURE_SPACE" | "EOL_SURE_SPACE" | "LINE_BREAK")
            ) {
                text.push(' ');
            }
        }
    }
    text.trim().to_string()
}

fn extract_vision_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<Status>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let message = error.message.filter(|value| !value.trim().is_empty())?;
    Some(match error.status {
        Some(status) => format!("{} | status: {}", message, status),
        None => message,
    })
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(rename = "fullTextAnnotation")]
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    code: Option<i32>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    confidence: Option<f32>,
    #[serde(default)]
    paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Deserialize)]
struct Paragraph {
    #[serde(rename = "boundingBox")]
    bounding_box: Option<BoundingPoly>,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

// Vision omits zero-valued coordinates.
#[derive(Debug, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: i64,
    #[serde(default)]
    y: i64,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    symbols: Vec<Symbol>,
}

#[derive(Debug, Deserialize)]
struct Symbol {
    #[serde(default)]
    text: String,
    property: Option<TextProperty>,
}

#[derive(Debug, Deserialize)]
struct TextProperty {
    #[serde(rename = "detectedBreak")]
    detected_break: Option<DetectedBreak>,
}

#[derive(Debug, Deserialize)]
struct DetectedBreak {
    #[serde(rename = "type")]
    kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use insta::assert_debug_snapshot;
    use std::path::Path;

    #[test]
    fn vision_paragraphs_snapshot() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/vision_annotate_response.json"
        ));
        let blocks = parse_annotate_response(payload).unwrap();
        let summary = blocks
            .iter()
            .map(|block| (block.text.as_str(), block.bounding_box))
            .collect::<Vec<_>>();
        assert_debug_snapshot!(summary);
    }

    #[test]
    fn block_confidence_is_used_or_defaulted() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/vision_annotate_response.json"
        ));
        let blocks = parse_annotate_response(payload).unwrap();
        assert_eq!(blocks[0].confidence, 0.98);
        assert_eq!(blocks[1].confidence, 0.98);
        assert_eq!(blocks[2].confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn response_without_annotation_is_empty() {
        assert!(parse_annotate_response(r#"{"responses":[{}]}"#).unwrap().is_empty());
        assert!(parse_annotate_response(r#"{"responses":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn per_image_error_is_a_failure() {
        let err = parse_annotate_response(
            r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Bad image data."));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{}/annotate", addr)
    }

    #[tokio::test]
    async fn recognize_posts_image_and_parses_blocks() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/vision_annotate_response.json"
        ));
        let router = Router::new().route(
            "/annotate",
            post(move |body: String| async move {
                assert!(body.contains("DOCUMENT_TEXT_DETECTION"));
                payload
            }),
        );
        let endpoint = serve(router).await;
        let vision = Vision::new("key", endpoint, Duration::from_secs(5), 0).expect("vision");
        let input = OcrInput {
            bytes: b"jpeg",
            path: Path::new("unused.jpg"),
            width: 640,
            height: 480,
        };
        let blocks = vision.recognize(&input).await.expect("recognize");
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "Hello World");
    }

    #[tokio::test]
    async fn http_error_is_reported_with_message() {
        let router = Router::new().route(
            "/annotate",
            post(|| async {
                (
                    StatusCode::FORBIDDEN,
                    r#"{"error":{"code":403,"message":"API key not valid.","status":"PERMISSION_DENIED"}}"#,
                )
            }),
        );
        let endpoint = serve(router).await;
        let vision = Vision::new("bad", endpoint, Duration::from_secs(5), 0).expect("vision");
        let input = OcrInput {
            bytes: b"jpeg",
            path: Path::new("unused.jpg"),
            width: 640,
            height: 480,
        };
        let err = vision.recognize(&input).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("403"));
        assert!(message.contains("API key not valid. | status: PERMISSION_DENIED"));
    }
}
