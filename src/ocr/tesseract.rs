use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::{BoundingBox, DEFAULT_CONFIDENCE, OcrBackend, OcrFuture, OcrInput, TextBlock};

/// Plain-text tesseract output carries no geometry, so a recognised page is
/// reported as a single block over this region.
pub(crate) const PLACEHOLDER_BOX: BoundingBox = BoundingBox {
    x: 0,
    y: 0,
    width: 100,
    height: 50,
};

/// Local engine: the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct Tesseract {
    languages: String,
    psm: u32,
    timeout: Duration,
}

impl Tesseract {
    pub fn new(languages: impl Into<String>, psm: u32, timeout: Duration) -> Self {
        Self {
            languages: languages.into(),
            psm,
            timeout,
        }
    }
}

impl OcrBackend for Tesseract {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize<'a>(&'a self, input: &'a OcrInput<'a>) -> OcrFuture<'a> {
        Box::pin(async move {
            let text = run_tesseract_text(input.path, &self.languages, self.psm, self.timeout)
                .await?;
            Ok(page_to_blocks(&text))
        })
    }
}

async fn run_tesseract_text(
    path: &Path,
    languages: &str,
    psm: u32,
    limit: Duration,
) -> Result<String> {
    let run = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--psm")
        .arg(psm.to_string())
        .kill_on_drop(true)
        .output();
    let output = timeout(limit, run)
        .await
        .map_err(|_| anyhow!("tesseract timed out after {}s", limit.as_secs()))?
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn page_to_blocks(text: &str) -> Vec<TextBlock> {
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return Vec::new();
    }
    vec![TextBlock {
        text: lines.join("\n"),
        bounding_box: PLACEHOLDER_BOX,
        confidence: DEFAULT_CONFIDENCE,
    }]
}
