//! Parsing layer.
//!
//! Turns a raw HTML document into the rows of the one table a schema
//! describes. Backends only have to split a document into tables, rows and
//! cells; choosing the table, tracking section markers and rejecting
//! malformed rows is shared, so every backend yields the same rows for the
//! same input.
//!
//! Backends:
//! - `DomParser` (feature `dom`): full HTML5 tree via `scraper`
//! - `TagScanner`: regex tag scanner, tolerant of unclosed and misnested tags

#[cfg(feature = "dom")]
mod dom;
mod scan;

#[cfg(feature = "dom")]
pub use dom::DomParser;
pub use scan::TagScanner;

use crate::error::{ParseError, Result};
use crate::models::CompiledSchema;

/// Text content of one table cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawCell {
    /// Whitespace-collapsed text of the whole cell
    pub text: String,
    /// Text of each link in the cell, in order, empty links skipped
    pub links: Vec<String>,
}

/// All cells of a table, row by row, as a backend found them.
pub type RawTable = Vec<Vec<RawCell>>;

/// A data row of the selected table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub cells: Vec<RawCell>,
    /// Text of the last section marker row above this one
    pub section: Option<String>,
}

/// Output of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Rows skipped for being shorter than the schema allows
    pub malformed: usize,
}

/// A parsing backend.
pub trait TableParser: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Split a document into tables, in document order of their opening tag.
    fn tables(&self, document: &str) -> std::result::Result<Vec<RawTable>, ParseError>;

    /// Extract the rows of the table matching `schema`.
    fn parse(
        &self,
        document: &str,
        schema: &CompiledSchema,
    ) -> std::result::Result<ParsedTable, ParseError> {
        select_table(self.tables(document)?, schema)
    }
}

/// Tries the primary backend, then the secondary on any failure.
pub struct FallbackParser {
    primary: Box<dyn TableParser>,
    secondary: Box<dyn TableParser>,
}

impl FallbackParser {
    pub fn new(primary: Box<dyn TableParser>, secondary: Box<dyn TableParser>) -> Self {
        Self { primary, secondary }
    }

    /// Run `op` on the primary backend, then on the secondary if it fails.
    /// When both fail the primary's error is returned.
    fn attempt<T>(
        &self,
        what: &str,
        op: impl Fn(&dyn TableParser) -> std::result::Result<T, ParseError>,
    ) -> std::result::Result<T, ParseError> {
        op(self.primary.as_ref()).or_else(|primary_err| {
            log::warn!(
                "{} parser failed for '{}': {}. Retrying with {}",
                self.primary.name(),
                what,
                primary_err,
                self.secondary.name()
            );
            op(self.secondary.as_ref()).map_err(|secondary_err| {
                log::debug!("{} parser also failed: {}", self.secondary.name(), secondary_err);
                primary_err
            })
        })
    }
}

impl TableParser for FallbackParser {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn tables(&self, document: &str) -> std::result::Result<Vec<RawTable>, ParseError> {
        self.attempt("document", |parser| parser.tables(document))
    }

    fn parse(
        &self,
        document: &str,
        schema: &CompiledSchema,
    ) -> std::result::Result<ParsedTable, ParseError> {
        self.attempt(schema.name(), |parser| parser.parse(document, schema))
    }
}

/// Pick the parsing backend for this build.
///
/// Called once at startup; callers only see `TableParser`.
pub fn select_backend() -> Result<Box<dyn TableParser>> {
    let scanner = TagScanner::new()?;

    #[cfg(feature = "dom")]
    {
        match DomParser::new() {
            Ok(dom) => {
                log::info!("HTML parser: dom (tag scanner as fallback)");
                return Ok(Box::new(FallbackParser::new(
                    Box::new(dom),
                    Box::new(scanner),
                )));
            }
            Err(e) => log::warn!("dom parser unavailable: {e}"),
        }
    }

    log::info!("HTML parser: tag scanner (dom backend not available in this build)");
    Ok(Box::new(scanner))
}

/// Choose the schema's table among `tables` and shape its rows.
///
/// Among tables whose header row satisfies the anchor rule, the one with the
/// most well-formed rows wins; ties keep the earliest.
pub fn select_table(
    tables: Vec<RawTable>,
    schema: &CompiledSchema,
) -> std::result::Result<ParsedTable, ParseError> {
    let min_len = schema.schema.min_row_len;
    let mut best: Option<ParsedTable> = None;

    for table in tables {
        let mut rows = table.into_iter();
        let Some(header_row) = rows.next() else {
            continue;
        };
        let headers: Vec<String> = header_row.into_iter().map(|c| c.text).collect();
        if !schema.matches_header(&headers) {
            continue;
        }

        let mut parsed = ParsedTable {
            headers,
            ..ParsedTable::default()
        };
        let mut section: Option<String> = None;

        for cells in rows {
            if cells.iter().all(|c| c.text.is_empty()) {
                continue;
            }
            if cells.len() < min_len {
                let text = cells
                    .iter()
                    .map(|c| c.text.as_str())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if schema.is_section_marker(&text) {
                    section = Some(text);
                } else {
                    parsed.malformed += 1;
                }
                continue;
            }
            // Repeated header rows inside long tables
            let texts: Vec<String> = cells.iter().map(|c| c.text.clone()).collect();
            if cells.iter().all(|c| c.links.is_empty()) && schema.matches_header(&texts) {
                continue;
            }
            parsed.rows.push(RawRow {
                cells,
                section: section.clone(),
            });
        }

        let better = match &best {
            None => true,
            Some(current) => parsed.rows.len() > current.rows.len(),
        };
        if better {
            best = Some(parsed);
        }
    }

    let best = best.ok_or_else(|| ParseError::NoMatchingTable {
        schema: schema.name().to_string(),
    })?;

    if best.rows.is_empty() && best.malformed > 0 {
        return Err(ParseError::MalformedRow {
            schema: schema.name().to_string(),
            count: best.malformed,
        });
    }
    if best.malformed > 0 {
        log::warn!(
            "Skipped {} malformed rows in '{}'",
            best.malformed,
            schema.name()
        );
    }
    Ok(best)
}
