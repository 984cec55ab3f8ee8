//! Text, table, and metadata extraction from stored document files.
//!
//! [`Extractor`] is the capability seam the pipeline orchestrator calls
//! through; [`FileExtractor`] is the built-in implementation covering PDF
//! (via `pdf-extract`), OOXML (`zip` + `quick-xml`), and plain-text
//! formats. OCR has no built-in backend: the trait method exists so
//! deployments can plug one in, and the default errors when invoked.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::chunker::PageText;
use crate::error::StepError;
use crate::models::{Document, DocumentMetadata, Table};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Sheets processed per workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Lines a delimiter-aligned run must span to count as a table.
const TABLE_MIN_ROWS: usize = 2;

/// Result of the text extraction step.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    /// Set when extraction produced too little text and the document
    /// should go through the OCR step.
    pub needs_ocr: bool,
}

/// Capability seam for format-specific extraction. One call per pipeline
/// step; implementations must be safe to call concurrently for different
/// documents.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract plain text and decide whether OCR is needed.
    async fn extract(&self, document: &Document) -> Result<Extraction, StepError>;

    /// Recover text from an image-only document. No default backend.
    async fn ocr(&self, document: &Document) -> Result<String, StepError> {
        let _ = document;
        Err(StepError::Ocr("no OCR backend configured".to_string()))
    }

    /// Detect structured tables in the extracted text.
    async fn detect_tables(
        &self,
        document: &Document,
        text: &str,
    ) -> Result<Vec<Table>, StepError>;

    /// Extract document metadata, given the final extracted text.
    async fn extract_metadata(
        &self,
        document: &Document,
        text: &str,
    ) -> Result<DocumentMetadata, StepError>;

    /// Per-page text for page back-mapping. Empty for unpaged formats.
    async fn page_texts(&self, document: &Document) -> Result<Vec<PageText>, StepError> {
        let _ = document;
        Ok(Vec::new())
    }
}

/// Built-in extractor reading from each document's stored path.
pub struct FileExtractor {
    /// Minimum non-whitespace characters a PDF extraction must yield
    /// before OCR is considered unnecessary.
    ocr_text_threshold: usize,
}

impl FileExtractor {
    pub fn new(ocr_text_threshold: usize) -> Self {
        Self { ocr_text_threshold }
    }

    async fn read_bytes(&self, document: &Document) -> Result<Vec<u8>, StepError> {
        tokio::fs::read(&document.stored_path)
            .await
            .map_err(|e| {
                StepError::Extraction(format!(
                    "failed to read {}: {}",
                    document.stored_path, e
                ))
            })
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn extract(&self, document: &Document) -> Result<Extraction, StepError> {
        let bytes = self.read_bytes(document).await?;

        match document.file_type.as_str() {
            "pdf" => {
                // pdf parsing is CPU-bound; keep it off the async runtime.
                let result =
                    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                        .await
                        .map_err(|e| StepError::Extraction(e.to_string()))?;
                match result {
                    Ok(text) => {
                        let visible = text.chars().filter(|c| !c.is_whitespace()).count();
                        let needs_ocr = visible < self.ocr_text_threshold;
                        Ok(Extraction { text, needs_ocr })
                    }
                    // An unreadable text layer usually means a scanned PDF.
                    Err(_) => Ok(Extraction {
                        text: String::new(),
                        needs_ocr: true,
                    }),
                }
            }
            "docx" => {
                let text = tokio::task::spawn_blocking(move || extract_docx(&bytes))
                    .await
                    .map_err(|e| StepError::Extraction(e.to_string()))??;
                Ok(Extraction {
                    text,
                    needs_ocr: false,
                })
            }
            "xlsx" => {
                let text = tokio::task::spawn_blocking(move || extract_xlsx(&bytes))
                    .await
                    .map_err(|e| StepError::Extraction(e.to_string()))??;
                Ok(Extraction {
                    text,
                    needs_ocr: false,
                })
            }
            "txt" | "csv" | "md" => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                Ok(Extraction {
                    text,
                    needs_ocr: false,
                })
            }
            other => Err(StepError::Extraction(format!(
                "unsupported file type: {}",
                other
            ))),
        }
    }

    async fn detect_tables(
        &self,
        document: &Document,
        text: &str,
    ) -> Result<Vec<Table>, StepError> {
        if document.file_type == "csv" {
            return Ok(detect_csv_table(text).into_iter().collect());
        }
        Ok(detect_delimited_tables(text))
    }

    async fn extract_metadata(
        &self,
        document: &Document,
        text: &str,
    ) -> Result<DocumentMetadata, StepError> {
        let mut metadata = DocumentMetadata {
            content_type: Some(document.file_type.clone()),
            word_count: Some(text.split_whitespace().count()),
            ..Default::default()
        };

        metadata.title = infer_title(text);

        if let Ok(fs_meta) = std::fs::metadata(Path::new(&document.stored_path)) {
            metadata.modified_date = fs_meta
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);
            metadata.created_date = fs_meta.created().ok().map(DateTime::<Utc>::from);
        }

        if document.file_type == "pdf" {
            let pages = self.page_texts(document).await.unwrap_or_default();
            if !pages.is_empty() {
                metadata.page_count = Some(pages.len());
            }
        }

        Ok(metadata)
    }

    async fn page_texts(&self, document: &Document) -> Result<Vec<PageText>, StepError> {
        if document.file_type != "pdf" {
            return Ok(Vec::new());
        }
        let bytes = self.read_bytes(document).await?;
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await
        .map_err(|e| StepError::Extraction(e.to_string()))?
        .map_err(|e| StepError::Extraction(e.to_string()))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText {
                number: (i + 1) as u32,
                text,
                bbox: None,
            })
            .collect())
    }
}

/// First non-empty line, when it is short and not sentence-shaped.
fn infer_title(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_start_matches('#').trim();
    if line.is_empty() || line.split_whitespace().count() > 12 {
        return None;
    }
    if line.ends_with(['.', '?', '!', ':', ',', ';']) {
        return None;
    }
    Some(line.to_string())
}

/// Treat an entire CSV body as a single table with the first row as header.
fn detect_csv_table(text: &str) -> Option<Table> {
    let mut rows: Vec<Vec<String>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split(',').map(|c| c.trim().to_string()).collect())
        .collect();
    if rows.len() < TABLE_MIN_ROWS {
        return None;
    }
    let header = rows.remove(0);
    let cols = header.len();
    Some(Table {
        id: uuid::Uuid::new_v4(),
        page_number: 1,
        rows: rows.len(),
        cols,
        coordinates: None,
        caption: None,
        header: Some(header),
        data: rows,
    })
}

/// Find runs of tab- or pipe-delimited lines with a consistent column
/// count. Each qualifying run becomes one table.
fn detect_delimited_tables(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    let flush = |run: &mut Vec<Vec<String>>, tables: &mut Vec<Table>| {
        if run.len() >= TABLE_MIN_ROWS {
            let mut rows = std::mem::take(run);
            let header = rows.remove(0);
            let cols = header.len();
            tables.push(Table {
                id: uuid::Uuid::new_v4(),
                page_number: 1,
                rows: rows.len(),
                cols,
                coordinates: None,
                caption: None,
                header: Some(header),
                data: rows,
            });
        } else {
            run.clear();
        }
    };

    for line in text.lines() {
        let cells = split_table_row(line);
        match cells {
            Some(cells) if run.is_empty() || cells.len() == run[0].len() => run.push(cells),
            Some(cells) => {
                flush(&mut run, &mut tables);
                run.push(cells);
            }
            None => flush(&mut run, &mut tables),
        }
    }
    flush(&mut run, &mut tables);
    tables
}

fn split_table_row(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    let cells: Vec<String> = if trimmed.contains('\t') {
        trimmed.split('\t').map(|c| c.trim().to_string()).collect()
    } else if trimmed.contains('|') {
        trimmed
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect()
    } else {
        return None;
    };
    if cells.len() >= 2 && cells.iter().any(|c| !c.is_empty()) {
        Some(cells)
    } else {
        None
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, StepError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| StepError::Extraction(e.to_string()))?;
    let xml = read_zip_entry(&mut archive, "word/document.xml")?;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                // Paragraph ends become blank lines so the chunker sees
                // the document's paragraph structure.
                if e.local_name().as_ref() == b"p" {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(StepError::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, StepError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| StepError::Extraction(e.to_string()))?;
    let shared = read_shared_strings(&mut archive)?;

    let mut sheet_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    sheet_names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry(&mut archive, &name)?;
        let text = extract_sheet_text(&xml, &shared)?;
        if !out.is_empty() && !text.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn read_zip_entry(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, StepError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| StepError::Extraction(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| StepError::Extraction(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(StepError::Extraction(format!(
            "ZIP entry {} exceeds size limit",
            name
        )));
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, StepError> {
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(StepError::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_sheet_text(xml: &[u8], shared: &[String]) -> Result<String, StepError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_is_shared = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    if cell_is_shared {
                        if let Ok(i) = value.parse::<usize>() {
                            if let Some(s) = shared.get(i) {
                                current_row.push(s.clone());
                            }
                        }
                    } else {
                        current_row.push(value.to_string());
                    }
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => cell_is_shared = false,
                b"row" => {
                    if !current_row.is_empty() {
                        rows.push(std::mem::take(&mut current_row));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(StepError::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current_row.is_empty() {
        rows.push(current_row);
    }
    Ok(rows
        .into_iter()
        .map(|r| r.join(" "))
        .collect::<Vec<_>>()
        .join("\n"))
}
