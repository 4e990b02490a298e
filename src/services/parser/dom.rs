//! DOM parsing backend built on `scraper`.

use scraper::{ElementRef, Html, Selector};

use super::{RawCell, RawTable, TableParser};
use crate::error::ParseError;
use crate::utils::normalize_whitespace;

/// Parses documents into a full HTML5 tree.
pub struct DomParser {
    table: Selector,
    row: Selector,
    link: Selector,
}

impl DomParser {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            table: selector("table")?,
            row: selector("tr")?,
            link: selector("a")?,
        })
    }

    /// Text and links of a cell, leaving out tables nested inside it.
    fn cell(&self, element: ElementRef) -> RawCell {
        RawCell {
            text: text_of(element),
            links: element
                .select(&self.link)
                .filter(|link| !in_nested_table(*link, element))
                .map(text_of)
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl TableParser for DomParser {
    fn name(&self) -> &'static str {
        "dom"
    }

    fn tables(&self, document: &str) -> Result<Vec<RawTable>, ParseError> {
        let html = Html::parse_document(document);

        let tables = html
            .select(&self.table)
            .map(|table| {
                table
                    .select(&self.row)
                    .filter(|tr| owning_table(tr) == Some(table))
                    .map(|tr| {
                        tr.children()
                            .filter_map(ElementRef::wrap)
                            .filter(|c| matches!(c.value().name(), "td" | "th"))
                            .map(|c| self.cell(c))
                            .collect()
                    })
                    .collect()
            })
            .collect();

        Ok(tables)
    }
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Backend {
        backend: "dom".to_string(),
        message: format!("invalid selector '{css}': {e}"),
    })
}

/// Nearest enclosing `<table>` of a row.
fn owning_table<'a>(row: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "table")
}

/// Whether `element` lies inside a table nested within `root`.
fn in_nested_table(element: ElementRef, root: ElementRef) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .take_while(|e| *e != root)
        .any(|e| e.value().name() == "table")
}

/// Collapsed text of an element, ignoring script and style content and any
/// table nested inside it.
fn text_of(element: ElementRef) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let hidden = matches!(parent.value().name(), "script" | "style");
        if !hidden && !in_nested_table(parent, element) {
            out.push_str(text);
        }
    }
    normalize_whitespace(&out)
}
