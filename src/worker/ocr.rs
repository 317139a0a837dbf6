use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Callback receiving recognition progress in `0.0..=1.0`.
pub type OcrProgress<'a> = &'a (dyn Fn(f32) + Send + Sync);

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn ensure_ready(&self) -> Result<()>;

    async fn recognize(&self, image: &[u8], on_progress: OcrProgress<'_>) -> Result<String>;
}

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn ensure_ready(&self) -> Result<()>;

    /// Render one zero-based page to PNG bytes.
    async fn render_page(&self, pdf: &[u8], page: usize, scale: f32) -> Result<Vec<u8>>;
}

fn locate(binary: &str) -> Result<PathBuf> {
    which::which(binary).with_context(|| format!("`{}` not found on PATH", binary))
}

/// Tesseract CLI, fed the image on stdin.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>) -> Self {
        TesseractOcr {
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn ensure_ready(&self) -> Result<()> {
        let path = locate("tesseract")?;
        debug!("using tesseract at {}", path.display());
        Ok(())
    }

    async fn recognize(&self, image: &[u8], on_progress: OcrProgress<'_>) -> Result<String> {
        on_progress(0.0);
        let mut child = Command::new("tesseract")
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to start tesseract")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await.context("failed to send image to tesseract")?;
        }
        let out = child.wait_with_output().await?;
        if !out.status.success() {
            bail!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        on_progress(1.0);
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

/// Poppler's `pdftoppm`, rendering at `72 * scale` DPI.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdftoppmRasterizer;

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn ensure_ready(&self) -> Result<()> {
        locate("pdftoppm").map(|_| ())
    }

    async fn render_page(&self, pdf: &[u8], page: usize, scale: f32) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.pdf");
        let root = dir.path().join("page");
        tokio::fs::write(&input, pdf).await?;

        let page_no = (page + 1).to_string();
        let dpi = ((72.0 * scale).round() as u32).to_string();
        let status = Command::new("pdftoppm")
            .args(["-r", &dpi, "-png", "-singlefile"])
            .args(["-f", &page_no, "-l", &page_no])
            .arg(&input)
            .arg(&root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("failed to start pdftoppm")?;
        if !status.success() {
            bail!("pdftoppm failed on page {}", page_no);
        }

        tokio::fs::read(root.with_extension("png"))
            .await
            .with_context(|| format!("pdftoppm produced no image for page {}", page_no))
    }
}
