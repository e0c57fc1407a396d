// Text extraction for uploaded documents


use anyhow::{Context, Result, bail};
use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::RagError;
use crate::config::ExtractionConfig;

/// Supported upload formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Image,
    PlainText,
}

impl DocumentKind {
    /// Classify `filename` by its extension, case-insensitively
    #[inline]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();

        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "png" | "jpg" | "jpeg" => Some(DocumentKind::Image),
            "txt" | "md" => Some(DocumentKind::PlainText),
            _ => None,
        }
    }

    /// Name stored in the documents table
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::Image => "image",
            DocumentKind::PlainText => "text",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TextExtractor {
    max_file_size_bytes: u64,
    tesseract_command: String,
    ocr_language: String,
}

impl TextExtractor {
    #[inline]
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_bytes,
            tesseract_command: config.tesseract_command.clone(),
            ocr_language: config.ocr_language.clone(),
        }
    }

    /// Reject uploads that are too large or of an unsupported type
    #[inline]
    pub fn validate_upload(&self, filename: &str, size: u64) -> crate::Result<DocumentKind> {
        let kind = DocumentKind::from_filename(filename).ok_or_else(|| {
            RagError::Extraction(format!(
                "Unsupported file type: {} (allowed: .pdf, .docx, .png, .jpg, .jpeg, .txt, .md)",
                filename
            ))
        })?;

        if size > self.max_file_size_bytes {
            return Err(RagError::Extraction(format!(
                "File size {} bytes exceeds the limit of {} bytes",
                size, self.max_file_size_bytes
            )));
        }

        Ok(kind)
    }

    /// Extract text from `bytes`. Returns `None` for unsupported files,
    /// extraction errors and blank output.
    #[inline]
    pub fn extract_text(&self, bytes: &[u8], filename: &str) -> Option<String> {
        let Some(kind) = DocumentKind::from_filename(filename) else {
            warn!("Unsupported file type for {}", filename);
            return None;
        };

        debug!("Extracting text from {} as {}", filename, kind);

        let result = match kind {
            DocumentKind::Pdf => Self::extract_pdf(bytes),
            DocumentKind::Docx => Self::extract_docx(bytes),
            DocumentKind::Image => self.extract_image(bytes),
            DocumentKind::PlainText => Self::extract_plain(bytes),
        };

        match result {
            Ok(text) if text.trim().is_empty() => {
                warn!("No text extracted from {}", filename);
                None
            }
            Ok(text) => {
                info!(
                    "Extracted {} characters from {}",
                    text.chars().count(),
                    filename
                );
                Some(text)
            }
            Err(e) => {
                warn!("Failed to extract text from {}: {:#}", filename, e);
                None
            }
        }
    }

    fn extract_pdf(bytes: &[u8]) -> Result<String> {
        contain_parser_panic("PDF", || {
            pdf_extract::extract_text_from_mem(bytes).context("Failed to read PDF")
        })
    }

    fn extract_docx(bytes: &[u8]) -> Result<String> {
        let docx = contain_parser_panic("DOCX", || {
            docx_rs::read_docx(bytes).context("Failed to read DOCX")
        })?;

        let paragraphs: Vec<String> = docx
            .document
            .children
            .iter()
            .filter_map(|child| match child {
                docx_rs::DocumentChild::Paragraph(paragraph) => {
                    Some(paragraph_text(paragraph))
                }
                _ => None,
            })
            .collect();

        Ok(paragraphs.join("\n"))
    }

    fn extract_image(&self, bytes: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.tesseract_command)
            .args(["stdin", "stdout", "-l", &self.ocr_language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run OCR command '{}'", self.tesseract_command))?;

        let sent = match child.stdin.take() {
            Some(mut stdin) => stdin
                .write_all(bytes)
                .context("Failed to send image to OCR process"),
            None => Err(anyhow::anyhow!("OCR process has no stdin")),
        };
        if let Err(e) = sent {
            // Reap the child before reporting the write error
            if let Err(kill_error) = child.kill() {
                debug!("OCR process already exited: {}", kill_error);
            }
            let status = child.wait().context("Failed to wait for OCR process")?;
            return Err(e.context(format!("OCR process exited with {}", status)));
        }

        let output = child
            .wait_with_output()
            .context("Failed to wait for OCR process")?;

        if !output.status.success() {
            bail!(
                "OCR command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn extract_plain(bytes: &[u8]) -> Result<String> {
        let text = String::from_utf8_lossy(bytes);
        if text.contains(char::REPLACEMENT_CHARACTER) {
            debug!("Text file is not valid UTF-8, invalid bytes were replaced");
        }
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// Run a third-party parser, turning a panic on malformed input into an error
fn contain_parser_panic<T, F>(format: &str, parse: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(parse)) {
        Ok(result) => result,
        Err(payload) => bail!(
            "{} parser crashed: {}",
            format,
            panic_message(payload.as_ref())
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    for child in &paragraph.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                    docx_rs::RunChild::Tab(_) => text.push('\t'),
                    _ => {}
                }
            }
        }
    }
    text
}
