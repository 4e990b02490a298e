//! Normalizer.
//!
//! Turns the parsed rows of one table into domain records: names cleaned,
//! identity keys canonicalized, duplicates folded and unusable rows dropped.
//! Output order is document order.

use std::collections::{BTreeSet, HashMap};

use crate::models::{
    CharacterClass, ClassSet, ColumnMap, CompiledSchema, GemColorRules, Language,
    QuestRewardRecord, Records, Requirements, RewardItem, SourceKind, VendorRewardRecord,
};
use crate::services::parser::{ParsedTable, RawCell, RawRow};
use crate::utils::{clean_name, slug};

const MAX_ACT: u32 = 10;

/// Normalized records of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    Quests(Vec<QuestRewardRecord>),
    Vendors(Vec<VendorRewardRecord>),
}

impl Batch {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Quests(_) => SourceKind::Quest,
            Self::Vendors(_) => SourceKind::Vendor,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Quests(records) => records.len(),
            Self::Vendors(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the records of this batch's kind.
    pub fn apply_to(self, records: &mut Records) {
        match self {
            Self::Quests(quests) => records.quests = quests,
            Self::Vendors(vendors) => records.vendors = vendors,
        }
    }
}

/// Row accounting of one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub rows: usize,
    pub dropped: usize,
    pub duplicates: usize,
}

/// Normalizer for one schema in one language.
pub struct Normalizer<'a> {
    schema: &'a CompiledSchema,
    colors: &'a GemColorRules,
    language: &'a Language,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        schema: &'a CompiledSchema,
        colors: &'a GemColorRules,
        language: &'a Language,
    ) -> Self {
        Self {
            schema,
            colors,
            language,
        }
    }

    /// Normalize a parsed table into the record kind its schema produces.
    pub fn normalize(&self, table: &ParsedTable) -> (Batch, NormalizeReport) {
        let (batch, report) = match self.schema.schema.kind {
            SourceKind::Quest => {
                let (records, report) = self.quests(table);
                (Batch::Quests(records), report)
            }
            SourceKind::Vendor => {
                let (records, report) = self.vendors(table);
                (Batch::Vendors(records), report)
            }
        };
        log::info!(
            "[{}] {}: {} records from {} rows ({} dropped, {} duplicates)",
            self.language,
            self.schema.name(),
            batch.len(),
            report.rows,
            report.dropped,
            report.duplicates
        );
        (batch, report)
    }

    pub fn quests(&self, table: &ParsedTable) -> (Vec<QuestRewardRecord>, NormalizeReport) {
        let columns = self.schema.resolve_columns(&table.headers);
        let mut dedup = Dedup::default();
        let mut report = NormalizeReport {
            rows: table.rows.len(),
            ..NormalizeReport::default()
        };

        for row in &table.rows {
            match self.quest_record(row, &columns) {
                Some(record) => dedup.insert(record.quest_key.clone(), record),
                None => report.dropped += 1,
            }
        }

        report.duplicates = dedup.duplicates;
        (dedup.into_records(), report)
    }

    pub fn vendors(&self, table: &ParsedTable) -> (Vec<VendorRewardRecord>, NormalizeReport) {
        let columns = self.schema.resolve_columns(&table.headers);
        let mut dedup: Dedup<VendorRewardRecord> = Dedup::default();
        let mut report = NormalizeReport {
            rows: table.rows.len(),
            ..NormalizeReport::default()
        };
        let mut current_quest: Option<String> = None;

        for row in &table.rows {
            let name_cell = columns.name.and_then(|i| row.cells.get(i));
            if let Some(quest) = name_cell
                .and_then(|c| c.links.first())
                .map(|link| clean_name(link))
                .filter(|q| !slug(q).is_empty())
            {
                current_quest = Some(quest);
            }
            let Some(quest) = current_quest.clone() else {
                report.dropped += 1;
                continue;
            };

            let act = self.act_of(row, &columns, name_cell);
            if act.is_some_and(|a| !(1..=MAX_ACT).contains(&a)) {
                report.dropped += 1;
                continue;
            }
            let level = columns
                .level
                .and_then(|i| row.cells.get(i))
                .and_then(|c| leading_number(&c.text));

            let gems = self.gems_by_class(row, &columns);
            if gems.is_empty() {
                report.dropped += 1;
                continue;
            }

            for (gem, classes) in gems {
                let item_key = vendor_key(act, &quest, &gem);
                let classes = ClassSet::from_classes(classes);
                // The same gem in another row of the same quest widens its gating
                let classes = match dedup.get(&item_key) {
                    Some(previous) => previous.requirements.classes.union(&classes),
                    None => classes,
                };
                let record = VendorRewardRecord {
                    item_key: item_key.clone(),
                    quest: quest.clone(),
                    color: self.colors.classify(&gem),
                    item: gem,
                    act: act.and_then(|a| u8::try_from(a).ok()),
                    requirements: Requirements { level, classes },
                };
                dedup.insert(item_key, record);
            }
        }

        report.duplicates = dedup.duplicates;
        (dedup.into_records(), report)
    }

    fn quest_record(&self, row: &RawRow, columns: &ColumnMap) -> Option<QuestRewardRecord> {
        let name_cell = columns.name.and_then(|i| row.cells.get(i))?;
        let name = clean_name(name_cell.links.first().unwrap_or(&name_cell.text));
        let name_slug = slug(&name);
        if name_slug.is_empty() {
            return None;
        }

        let act = self.act_of(row, columns, Some(name_cell))?;
        if !(1..=MAX_ACT).contains(&act) {
            return None;
        }

        let gems = self.gems_by_class(row, columns);
        if gems.is_empty() {
            return None;
        }

        let mut applicable = BTreeSet::new();
        let rewards = gems
            .into_iter()
            .map(|(gem, classes)| {
                applicable.extend(classes.iter().copied());
                RewardItem {
                    color: self.colors.classify(&gem),
                    gem,
                    classes: ClassSet::from_classes(classes),
                }
            })
            .collect();

        Some(QuestRewardRecord {
            quest_key: format!("act{act}/{name_slug}"),
            name,
            act: u8::try_from(act).ok()?,
            applicable_classes: ClassSet::from_classes(applicable),
            rewards,
        })
    }

    /// Act column, else the name cell, else the row's section marker.
    fn act_of(&self, row: &RawRow, columns: &ColumnMap, name_cell: Option<&RawCell>) -> Option<u32> {
        columns
            .act
            .and_then(|i| row.cells.get(i))
            .and_then(|c| leading_number(&c.text).or_else(|| self.schema.act_in(&c.text)))
            .or_else(|| name_cell.and_then(|c| self.schema.act_in(&c.text)))
            .or_else(|| row.section.as_deref().and_then(|s| self.schema.act_in(s)))
    }

    /// Gems of a row in first-seen order, each with the classes whose column lists it.
    fn gems_by_class(
        &self,
        row: &RawRow,
        columns: &ColumnMap,
    ) -> Vec<(String, BTreeSet<CharacterClass>)> {
        let mut gems: Vec<(String, BTreeSet<CharacterClass>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (class, column) in &columns.classes {
            let Some(cell) = row.cells.get(*column) else {
                continue;
            };
            for gem in cell_items(cell) {
                let key = slug(&gem);
                if key.is_empty() || is_class_name(&gem) {
                    continue;
                }
                match index.get(&key) {
                    Some(&i) => {
                        gems[i].1.insert(*class);
                    }
                    None => {
                        index.insert(key, gems.len());
                        gems.push((gem, BTreeSet::from([*class])));
                    }
                }
            }
        }
        gems
    }
}

/// Item names of a cell: its links, or comma-separated text when it has none.
fn cell_items(cell: &RawCell) -> Vec<String> {
    if !cell.links.is_empty() {
        return cell.links.iter().map(|l| clean_name(l)).collect();
    }
    cell.text
        .split(',')
        .map(clean_name)
        .filter(|item| !item.is_empty() && !matches!(item.as_str(), "-" | "—" | "–"))
        .collect()
}

fn is_class_name(text: &str) -> bool {
    text.parse::<CharacterClass>().is_ok()
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn vendor_key(act: Option<u32>, quest: &str, gem: &str) -> String {
    match act {
        Some(act) => format!("act{act}/{}/{}", slug(quest), slug(gem)),
        None => format!("{}/{}", slug(quest), slug(gem)),
    }
}

/// Last-seen-wins dedup that keeps each key at its first-seen position.
struct Dedup<T> {
    records: Vec<T>,
    positions: HashMap<String, usize>,
    duplicates: usize,
}

impl<T> Default for Dedup<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            duplicates: 0,
        }
    }
}

impl<T> Dedup<T> {
    fn get(&self, key: &str) -> Option<&T> {
        self.positions.get(key).map(|&i| &self.records[i])
    }

    fn insert(&mut self, key: String, record: T) {
        match self.positions.get(&key) {
            Some(&i) => {
                self.records[i] = record;
                self.duplicates += 1;
            }
            None => {
                self.positions.insert(key, self.records.len());
                self.records.push(record);
            }
        }
    }

    fn into_records(self) -> Vec<T> {
        self.records
    }
}
