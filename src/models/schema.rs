// src/models/schema.rs

//! Declarative descriptions of the upstream reward tables.
//!
//! A schema says how to recognise the right `<table>` in a page (anchor
//! header strings), what a well-formed row looks like (minimum cell count),
//! and which column carries what. Adjusting to an upstream layout change is
//! an edit to `config.toml`, not to the parsers.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{CharacterClass, SourceKind};

/// What a column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Quest name (the row's identity)
    Name,
    /// Act number
    Act,
    /// Required character level
    Level,
    /// Gems offered to the class named in `ColumnSpec::class`
    Class,
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub role: ColumnRole,

    /// Required when `role = "class"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<CharacterClass>,

    /// Header texts identifying the column (any language), case-insensitive
    #[serde(default)]
    pub headers: Vec<String>,

    /// Column index used when no header matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

/// Declarative descriptor of one upstream table format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Name referenced by `[[sources]]`
    pub name: String,

    /// Record kind produced from this table
    pub kind: SourceKind,

    /// Strings looked for in the header row
    pub anchor_headers: Vec<String>,

    /// How many anchor strings must appear for a table to match
    #[serde(default = "default_min_anchor_matches")]
    pub min_anchor_matches: usize,

    /// Rows with fewer cells are malformed
    pub min_row_len: usize,

    pub columns: Vec<ColumnSpec>,

    /// Short rows matching this carry context (e.g. "Act 3") for the rows below
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_pattern: Option<String>,

    /// Extracts the act number; first capture group must be the digits
    #[serde(default = "default_act_pattern")]
    pub act_pattern: String,
}

fn default_min_anchor_matches() -> usize {
    1
}

fn default_act_pattern() -> String {
    r"(?i)\b(?:act|ato)\s*(\d+)".to_string()
}

impl TableSchema {
    /// Check the schema for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("schema name is empty"));
        }
        if self.anchor_headers.is_empty() {
            return Err(AppError::validation(format!(
                "schema '{}' has no anchor headers",
                self.name
            )));
        }
        if self.min_anchor_matches == 0 || self.min_anchor_matches > self.anchor_headers.len() {
            return Err(AppError::validation(format!(
                "schema '{}': min_anchor_matches must be in 1..={}",
                self.name,
                self.anchor_headers.len()
            )));
        }
        if self.min_row_len == 0 {
            return Err(AppError::validation(format!(
                "schema '{}': min_row_len must be > 0",
                self.name
            )));
        }
        if !self.columns.iter().any(|c| c.role == ColumnRole::Name) {
            return Err(AppError::validation(format!(
                "schema '{}' has no name column",
                self.name
            )));
        }
        if !self.columns.iter().any(|c| c.role == ColumnRole::Class) {
            return Err(AppError::validation(format!(
                "schema '{}' has no class columns",
                self.name
            )));
        }
        for column in &self.columns {
            if (column.role == ColumnRole::Class) != column.class.is_some() {
                return Err(AppError::validation(format!(
                    "schema '{}': `class` must be set exactly on class columns",
                    self.name
                )));
            }
            if column.headers.is_empty() && column.position.is_none() {
                return Err(AppError::validation(format!(
                    "schema '{}': column {:?} has neither headers nor position",
                    self.name, column.role
                )));
            }
        }
        self.compile().map(|_| ())
    }

    /// Compile the patterns once for repeated use.
    pub fn compile(&self) -> Result<CompiledSchema> {
        let section = self
            .section_pattern
            .as_deref()
            .map(|p| Regex::new(p).map_err(|e| AppError::pattern(p, e)))
            .transpose()?;
        let act =
            Regex::new(&self.act_pattern).map_err(|e| AppError::pattern(&self.act_pattern, e))?;
        Ok(CompiledSchema {
            schema: self.clone(),
            section,
            act,
        })
    }
}

/// A schema with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub schema: TableSchema,
    section: Option<Regex>,
    act: Regex,
}

/// Column indices resolved against an actual header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub name: Option<usize>,
    pub act: Option<usize>,
    pub level: Option<usize>,
    pub classes: Vec<(CharacterClass, usize)>,
}

impl CompiledSchema {
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Number of anchor strings present in the header texts.
    pub fn anchor_hits(&self, headers: &[String]) -> usize {
        let joined = headers.join(" ").to_lowercase();
        self.schema
            .anchor_headers
            .iter()
            .filter(|anchor| joined.contains(&anchor.to_lowercase()))
            .count()
    }

    pub fn matches_header(&self, headers: &[String]) -> bool {
        self.anchor_hits(headers) >= self.schema.min_anchor_matches
    }

    pub fn is_section_marker(&self, text: &str) -> bool {
        self.section.as_ref().is_some_and(|re| re.is_match(text))
    }

    /// Act number mentioned in `text`, if any.
    pub fn act_in(&self, text: &str) -> Option<u32> {
        self.act
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Resolve column roles against a header row, falling back to positions.
    pub fn resolve_columns(&self, headers: &[String]) -> ColumnMap {
        let mut map = ColumnMap::default();
        for column in &self.schema.columns {
            let by_header = headers.iter().position(|h| {
                let h = h.trim().to_lowercase();
                column
                    .headers
                    .iter()
                    .any(|candidate| candidate.trim().to_lowercase() == h)
            });
            let index = by_header.or(column.position);
            let Some(index) = index else { continue };
            match column.role {
                ColumnRole::Name => map.name = Some(index),
                ColumnRole::Act => map.act = Some(index),
                ColumnRole::Level => map.level = Some(index),
                ColumnRole::Class => {
                    if let Some(class) = column.class {
                        map.classes.push((class, index));
                    }
                }
            }
        }
        map
    }
}
