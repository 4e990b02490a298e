//! Tag-scanner parsing backend.
//!
//! Walks the document's tags with a single regex instead of building a tree.
//! Open cells and rows are closed implicitly by the next sibling, the way an
//! HTML5 parser would, so sloppy markup still yields the same rows.

use regex::Regex;

use super::{RawCell, RawTable, TableParser};
use crate::error::{AppError, ParseError, Result};
use crate::utils::{decode_entities, normalize_whitespace};

const TOKEN_PATTERN: &str = r"(?is)<!--.*?-->|<(script|style)\b[^>]*>.*?</(?:script|style)\s*>|<(/?)([a-z][a-z0-9]*)\b[^>]*>";

/// Regex-driven table scanner.
pub struct TagScanner {
    token: Regex,
}

impl TagScanner {
    pub fn new() -> Result<Self> {
        let token = Regex::new(TOKEN_PATTERN)
            .map_err(|e| AppError::pattern(TOKEN_PATTERN, e.to_string()))?;
        Ok(Self { token })
    }
}

impl TableParser for TagScanner {
    fn name(&self) -> &'static str {
        "tag-scanner"
    }

    fn tables(&self, document: &str) -> std::result::Result<Vec<RawTable>, ParseError> {
        let mut state = ScanState::default();
        let mut last = 0;

        for caps in self.token.captures_iter(document) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            state.text(&document[last..whole.start()]);
            last = whole.end();

            // Comments and script/style blocks carry no cell text
            let Some(name) = caps.get(3) else {
                continue;
            };
            let closing = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
            state.tag(&name.as_str().to_ascii_lowercase(), closing);
        }
        state.text(&document[last..]);

        Ok(state.finish())
    }
}

#[derive(Default)]
struct CellBuilder {
    text: String,
    links: Vec<String>,
    link: Option<String>,
}

impl CellBuilder {
    fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            let link = normalize_whitespace(&link);
            if !link.is_empty() {
                self.links.push(link);
            }
        }
    }

    fn finish(mut self) -> RawCell {
        self.close_link();
        RawCell {
            text: normalize_whitespace(&self.text),
            links: self.links,
        }
    }
}

struct TableBuilder {
    order: usize,
    rows: RawTable,
    row: Option<Vec<RawCell>>,
    cell: Option<CellBuilder>,
}

impl TableBuilder {
    fn new(order: usize) -> Self {
        Self {
            order,
            rows: Vec::new(),
            row: None,
            cell: None,
        }
    }

    fn close_cell(&mut self) {
        if let Some(cell) = self.cell.take() {
            self.row.get_or_insert_with(Vec::new).push(cell.finish());
        }
    }

    fn close_row(&mut self) {
        self.close_cell();
        if let Some(row) = self.row.take() {
            self.rows.push(row);
        }
    }

    fn open_cell(&mut self) {
        self.close_cell();
        self.row.get_or_insert_with(Vec::new);
        self.cell = Some(CellBuilder::default());
    }
}

#[derive(Default)]
struct ScanState {
    open: Vec<TableBuilder>,
    done: Vec<(usize, RawTable)>,
    opened: usize,
}

impl ScanState {
    fn text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        // Stray text between a nested table's rows lands in the enclosing
        // cell, the way HTML5 foster parenting moves it
        let stray = !raw.trim().is_empty();
        let Some(cell) = self
            .open
            .iter_mut()
            .rev()
            .enumerate()
            .find(|(depth, t)| t.cell.is_some() && (*depth == 0 || stray))
            .and_then(|(_, t)| t.cell.as_mut())
        else {
            return;
        };
        let decoded = decode_entities(raw);
        cell.text.push_str(&decoded);
        if let Some(link) = cell.link.as_mut() {
            link.push_str(&decoded);
        }
    }

    fn tag(&mut self, name: &str, closing: bool) {
        if name == "table" {
            if closing {
                self.close_table();
            } else {
                self.open.push(TableBuilder::new(self.opened));
                self.opened += 1;
            }
            return;
        }

        let Some(table) = self.open.last_mut() else {
            return;
        };
        match (name, closing) {
            ("tr", false) => {
                table.close_row();
                table.row = Some(Vec::new());
            }
            ("tr", true) | ("thead" | "tbody" | "tfoot", _) => table.close_row(),
            ("td" | "th", false) => table.open_cell(),
            ("td" | "th", true) => table.close_cell(),
            ("a", false) => {
                if let Some(cell) = table.cell.as_mut() {
                    cell.close_link();
                    cell.link = Some(String::new());
                }
            }
            ("a", true) => {
                if let Some(cell) = table.cell.as_mut() {
                    cell.close_link();
                }
            }
            _ => {}
        }
    }

    fn close_table(&mut self) {
        if let Some(mut table) = self.open.pop() {
            table.close_row();
            self.done.push((table.order, table.rows));
        }
    }

    fn finish(mut self) -> Vec<RawTable> {
        while !self.open.is_empty() {
            self.close_table();
        }
        self.done.sort_by_key(|(order, _)| *order);
        self.done.into_iter().map(|(_, rows)| rows).collect()
    }
}
