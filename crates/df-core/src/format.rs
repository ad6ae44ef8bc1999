//! Document format tags and the supported conversion matrix.
//!
//! The engine dispatches on file extension, so [`DocumentFormat::extension`]
//! must produce exactly what the engine expects. [`FormatSupport`] decides
//! which source/target pairs the service accepts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A document format the service knows how to name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Legacy Word 97-2003 binary.
    Doc,
    /// Office Open XML word-processing container.
    Docx,
    /// OpenDocument text.
    Odt,
    /// Rich Text Format.
    Rtf,
    /// Plain text.
    Txt,
    /// HTML document.
    Html,
    /// Portable Document Format.
    Pdf,
}

impl DocumentFormat {
    /// Every known format, in declaration order.
    pub const ALL: [DocumentFormat; 7] = [
        DocumentFormat::Doc,
        DocumentFormat::Docx,
        DocumentFormat::Odt,
        DocumentFormat::Rtf,
        DocumentFormat::Txt,
        DocumentFormat::Html,
        DocumentFormat::Pdf,
    ];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Doc => "doc",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Rtf => "rtf",
            DocumentFormat::Txt => "txt",
            DocumentFormat::Html => "html",
            DocumentFormat::Pdf => "pdf",
        }
    }

    /// MIME type used when returning a converted document.
    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Doc => "application/msword",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Odt => "application/vnd.oasis.opendocument.text",
            DocumentFormat::Rtf => "application/rtf",
            DocumentFormat::Txt => "text/plain; charset=utf-8",
            DocumentFormat::Html => "text/html; charset=utf-8",
            DocumentFormat::Pdf => "application/pdf",
        }
    }

    /// Export filter argument for `--convert-to` in headless office engines.
    pub fn export_filter(self) -> &'static str {
        match self {
            DocumentFormat::Doc => "doc:MS Word 97",
            DocumentFormat::Docx => "docx:MS Word 2007 XML",
            DocumentFormat::Odt => "odt:writer8",
            DocumentFormat::Rtf => "rtf:Rich Text Format",
            DocumentFormat::Txt => "txt:Text (encoded):UTF8",
            DocumentFormat::Html => "html:HTML (StarWriter)",
            DocumentFormat::Pdf => "pdf:writer_pdf_Export",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DocumentFormat {
    type Err = Error;

    /// Parse a format tag. Case-insensitive; a leading dot is tolerated and
    /// `htm` is accepted as an alias for `html`.
    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().trim_start_matches('.').to_ascii_lowercase();
        let format = match tag.as_str() {
            "doc" => DocumentFormat::Doc,
            "docx" => DocumentFormat::Docx,
            "odt" => DocumentFormat::Odt,
            "rtf" => DocumentFormat::Rtf,
            "txt" => DocumentFormat::Txt,
            "html" | "htm" => DocumentFormat::Html,
            "pdf" => DocumentFormat::Pdf,
            _ => {
                return Err(Error::UnsupportedFormat(format!(
                    "unknown format '{}'",
                    s.trim()
                )))
            }
        };
        Ok(format)
    }
}

/// The set of formats the service accepts as sources and produces as targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct FormatSupport {
    pub sources: Vec<DocumentFormat>,
    pub targets: Vec<DocumentFormat>,
}

impl Default for FormatSupport {
    fn default() -> Self {
        Self {
            sources: vec![
                DocumentFormat::Doc,
                DocumentFormat::Docx,
                DocumentFormat::Odt,
                DocumentFormat::Rtf,
            ],
            targets: vec![
                DocumentFormat::Docx,
                DocumentFormat::Odt,
                DocumentFormat::Pdf,
            ],
        }
    }
}

impl FormatSupport {
    /// Parse and check a source/target tag pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] if either tag is unknown, outside
    /// the configured sets, or both tags name the same format.
    pub fn resolve(&self, source: &str, target: &str) -> Result<(DocumentFormat, DocumentFormat)> {
        let source: DocumentFormat = source.parse()?;
        let target: DocumentFormat = target.parse()?;
        self.check(source, target)?;
        Ok((source, target))
    }

    /// Check an already-parsed pair against the matrix.
    pub fn check(&self, source: DocumentFormat, target: DocumentFormat) -> Result<()> {
        if !self.sources.contains(&source) {
            return Err(Error::UnsupportedFormat(format!(
                "'{source}' is not an accepted source format"
            )));
        }
        if !self.targets.contains(&target) {
            return Err(Error::UnsupportedFormat(format!(
                "'{target}' is not an available target format"
            )));
        }
        if source == target {
            return Err(Error::UnsupportedFormat(format!(
                "source and target are both '{source}'"
            )));
        }
        Ok(())
    }
}
