//! HTML-to-PDF conversion entry points.
//!
//! [`html_to_pdf`] runs the whole pipeline in memory; [`convert_file`] adds
//! input validation and an atomic write of the result.

use crate::config::{ConversionConfig, UploadPolicy};
use crate::error::NewsletterError;
use crate::pipeline::compose::{self, Layout};
use crate::pipeline::screenshot::ScreenshotClient;
use crate::pipeline::{encode, prepare};
use crate::sanitize::{sanitize_filename, split_extension};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// A rendered single-page PDF and the geometry it was built with.
#[derive(Debug, Clone)]
pub struct ConvertedPdf {
    pub pdf: Vec<u8>,
    pub layout: Layout,
    pub duration_ms: u64,
}

/// Render `html` to a single-page PDF.
///
/// # Errors
/// - [`NewsletterError::ScreenshotTokenMissing`] when the client has no token
/// - any screenshot failure, unchanged (no retry)
/// - [`NewsletterError::ImageDecode`] / [`NewsletterError::PdfEncode`]
pub async fn html_to_pdf(
    html: &str,
    config: &ConversionConfig,
    client: &ScreenshotClient,
) -> Result<ConvertedPdf, NewsletterError> {
    let start = Instant::now();

    let prepared = prepare::inject_single_page_css(html);
    let screenshot = client.capture(&prepared).await?;

    let config = config.clone();
    let (pdf, layout) = tokio::task::spawn_blocking(move || {
        let (canvas, layout) = compose::compose_page(&screenshot, &config)?;
        let pdf = encode::encode_pdf(&canvas, config.dpi)?;
        Ok::<_, NewsletterError>((pdf, layout))
    })
    .await
    .map_err(|e| NewsletterError::Internal(format!("Compose task panicked: {}", e)))??;

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Rendered PDF: {}x{} px page, {} bytes in {}ms",
        layout.page_width,
        layout.page_height,
        pdf.len(),
        duration_ms
    );
    Ok(ConvertedPdf {
        pdf,
        layout,
        duration_ms,
    })
}

/// Convert an HTML file on disk and write the PDF to `output`.
///
/// The input must be `.html` / `.htm` within the upload size limit. The
/// output is written to a temp file beside it and renamed into place, so a
/// failed conversion never leaves a partial PDF.
pub async fn convert_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
    client: &ScreenshotClient,
) -> Result<ConvertedPdf, NewsletterError> {
    let input = input.as_ref();
    let output = output.as_ref();

    let meta = tokio::fs::metadata(input)
        .await
        .map_err(|e| NewsletterError::io(input, e))?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    UploadPolicy::html_only().check(&name, meta.len())?;

    let html = tokio::fs::read(input)
        .await
        .map_err(|e| NewsletterError::io(input, e))?;
    let html = String::from_utf8_lossy(&html);

    let converted = html_to_pdf(&html, config, client).await?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| NewsletterError::io(parent, e))?;
    }

    // Atomic write: write to temp, then rename
    let tmp_path = output.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &converted.pdf)
        .await
        .map_err(|e| NewsletterError::io(&tmp_path, e))?;
    if let Err(e) = tokio::fs::rename(&tmp_path, output).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(NewsletterError::io(output, e));
    }

    debug!("Wrote {}", output.display());
    Ok(converted)
}

/// Download name for the PDF made from `filename`: the sanitised stem plus `.pdf`.
///
/// ```rust
/// use newsletter_store::convert::pdf_download_name;
///
/// assert_eq!(pdf_download_name("Report%202024.html"), "Report 2024.pdf");
/// ```
pub fn pdf_download_name(filename: &str) -> String {
    let safe = sanitize_filename(filename);
    let (stem, _) = split_extension(&safe);
    format!("{stem}.pdf")
}

/// Default output path for `input`: same directory, `.pdf` download name.
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| pdf_download_name(&n.to_string_lossy()))
        .unwrap_or_else(|| pdf_download_name(""));
    input.with_file_name(name)
}
