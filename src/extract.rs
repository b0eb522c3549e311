//! Format-dispatching text extraction for PDF, DOCX and RTF documents.
//!
//! Dispatch goes through an [`ExtractorRegistry`] mapping file extensions to
//! [`Extractor`] implementations, so a new format is one `register` call.
//! Every decoder runs behind a panic guard: a fault in one file yields an
//! [`ExtractError`] for that file and nothing else.

use std::collections::HashMap;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use crate::error::ExtractError;
use crate::rtf;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// A decoder turning the raw bytes of one format into plain text.
///
/// Implementations return the text as decoded; trimming and the
/// empty-content check are applied by the registry.
pub trait Extractor: Send + Sync {
    /// Short format label used in logs and error messages.
    fn format(&self) -> &'static str;

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Extension to extractor map.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn Extractor>>,
    max_file_bytes: u64,
}

impl ExtractorRegistry {
    /// An empty registry. Files above `max_file_bytes` are rejected unread.
    pub fn new(max_file_bytes: u64) -> Self {
        Self {
            by_extension: HashMap::new(),
            max_file_bytes,
        }
    }

    /// Registry with the built-in PDF, DOCX and RTF decoders.
    pub fn with_defaults(max_file_bytes: u64) -> Self {
        let mut registry = Self::new(max_file_bytes);
        registry.register("pdf", Arc::new(PdfExtractor));
        registry.register("docx", Arc::new(DocxExtractor));
        registry.register("rtf", Arc::new(RtfExtractor));
        registry
    }

    /// Registers (or replaces) the extractor for an extension. The
    /// extension is matched case-insensitively and without the dot.
    pub fn register(&mut self, extension: &str, extractor: Arc<dyn Extractor>) {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.by_extension.insert(ext, extractor);
    }

    pub fn extractor_for(&self, path: &Path) -> Option<Arc<dyn Extractor>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(&ext).cloned()
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.extractor_for(path).is_some()
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Reads `path` and extracts normalized text from it.
    pub fn extract_file(&self, path: &Path) -> Result<String, ExtractError> {
        let extractor = self.extractor_for(path).ok_or_else(|| {
            ExtractError::UnsupportedFormat(
                path.extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )
        })?;

        let size = std::fs::metadata(path)?.len();
        if size > self.max_file_bytes {
            return Err(ExtractError::TooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }

        let bytes = std::fs::read(path)?;
        extract_guarded(extractor.as_ref(), &bytes)
    }
}

/// Runs one decoder with panics converted to [`ExtractError::Panicked`],
/// then normalizes its output.
pub fn extract_guarded(extractor: &dyn Extractor, bytes: &[u8]) -> Result<String, ExtractError> {
    let text = catch_unwind(AssertUnwindSafe(|| extractor.extract(bytes)))
        .map_err(|_| ExtractError::Panicked)??;
    normalize(text)
}

/// Trims surrounding whitespace; empty results become [`ExtractError::Empty`].
pub fn normalize(text: String) -> Result<String, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }
    if trimmed.len() == text.len() {
        Ok(text)
    } else {
        Ok(trimmed.to_string())
    }
}

// ============ PDF ============

/// Page-ordered PDF text, one line break between pages. A page without
/// text contributes an empty line rather than failing the document.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn format(&self) -> &'static str {
        "pdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::decode("pdf", e))?;
        Ok(join_pages(&pages))
    }
}

fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .map(|page| page.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

// ============ DOCX ============

/// Non-empty paragraphs of `word/document.xml`, one per line.
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn format(&self) -> &'static str {
        "docx"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| ExtractError::decode("docx", e))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let paragraphs = docx_paragraphs(&xml)?;
        Ok(paragraphs
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::decode("docx", format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::decode("docx", e))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::decode(
            "docx",
            format!("ZIP entry {} exceeds size limit ({} bytes)", name, max_bytes),
        ));
    }
    Ok(out)
}

/// Collects the text of every `w:p`, honouring tabs and breaks. Paragraphs
/// nested in text boxes are emitted as their own entries.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if depth > 0 && !current.is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    depth += 1;
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" if depth > 0 => current.push('\t'),
                b"br" | b"cr" if depth > 0 => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::decode("docx", e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    paragraphs.push(std::mem::take(&mut current));
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::decode("docx", e)),
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

// ============ RTF ============

/// Plain text of an RTF document.
pub struct RtfExtractor;

impl Extractor for RtfExtractor {
    fn format(&self) -> &'static str {
        "rtf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        rtf::rtf_to_text(bytes).map_err(|e| ExtractError::decode("rtf", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    struct Panicking;

    impl Extractor for Panicking {
        fn format(&self) -> &'static str {
            "boom"
        }

        fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractError> {
            panic!("decoder bug")
        }
    }

    #[test]
    fn registry_matches_extensions_case_insensitively() {
        let registry = ExtractorRegistry::with_defaults(1024);
        assert!(registry.supports(Path::new("Report.PDF")));
        assert!(registry.supports(Path::new("memo.docx")));
        assert!(registry.supports(Path::new("notes.Rtf")));
        assert!(!registry.supports(Path::new("notes.txt")));
        assert!(!registry.supports(Path::new("README")));
        assert_eq!(registry.extensions(), vec!["docx", "pdf", "rtf"]);
    }

    #[test]
    fn docx_joins_non_empty_paragraphs() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>First</w:t></w:r><w:r><w:t xml:space=\"preserve\"> line</w:t></w:r></w:p>\
             <w:p></w:p>\
             <w:p><w:r><w:t>   </w:t></w:r></w:p>\
             <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>",
        );
        let text = DocxExtractor.extract(&bytes).unwrap();
        assert_eq!(text, "First line\nSecond & last");
    }

    #[test]
    fn docx_tabs_and_breaks() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p>",
        );
        assert_eq!(DocxExtractor.extract(&bytes).unwrap(), "a\tb\nc");
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = DocxExtractor.extract(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Decode { format: "docx", .. }));
    }

    #[test]
    fn docx_without_document_xml_is_rejected() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(DocxExtractor.extract(&buf).is_err());
    }

    #[test]
    fn truncated_docx_is_rejected() {
        let bytes = docx_with_body("<w:p><w:r><w:t>hello</w:t></w:r></w:p>");
        let cut = &bytes[..bytes.len() / 2];
        assert!(DocxExtractor.extract(cut).is_err());
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = PdfExtractor.extract(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Decode { format: "pdf", .. }));
    }

    #[test]
    fn pages_join_with_newlines_and_keep_blank_pages() {
        let pages = vec![
            "\n\none\n".to_string(),
            "   ".to_string(),
            "three".to_string(),
        ];
        assert_eq!(join_pages(&pages), "one\n\nthree");
    }

    #[test]
    fn normalize_trims_and_rejects_blank() {
        assert_eq!(normalize("  text \n".to_string()).unwrap(), "text");
        assert!(matches!(
            normalize(" \n\t ".to_string()),
            Err(ExtractError::Empty)
        ));
    }

    #[test]
    fn panicking_decoder_is_contained() {
        let err = extract_guarded(&Panicking, b"x").unwrap_err();
        assert!(matches!(err, ExtractError::Panicked));
    }

    #[test]
    fn oversized_file_is_rejected_unread() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.rtf");
        std::fs::write(&path, vec![b'x'; 64]).unwrap();
        let registry = ExtractorRegistry::with_defaults(16);
        let err = registry.extract_file(&path).unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge { size: 64, limit: 16 }));
    }

    #[test]
    fn missing_file_is_a_file_system_failure() {
        let registry = ExtractorRegistry::with_defaults(1024);
        let err = registry
            .extract_file(Path::new("/nonexistent/dir/gone.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}
