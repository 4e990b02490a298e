//! Normalized reward records.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The seven playable classes, in the column order used by the quest table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterClass {
    Marauder,
    Witch,
    Scion,
    Ranger,
    Duelist,
    Shadow,
    Templar,
}

impl CharacterClass {
    pub const ALL: [CharacterClass; 7] = [
        Self::Marauder,
        Self::Witch,
        Self::Scion,
        Self::Ranger,
        Self::Duelist,
        Self::Shadow,
        Self::Templar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Marauder => "Marauder",
            Self::Witch => "Witch",
            Self::Scion => "Scion",
            Self::Ranger => "Ranger",
            Self::Duelist => "Duelist",
            Self::Shadow => "Shadow",
            Self::Templar => "Templar",
        }
    }
}

impl fmt::Display for CharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CharacterClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|class| class.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown class '{s}'"))
    }
}

/// Set of classes a reward applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassSet {
    All,
    Only(BTreeSet<CharacterClass>),
}

impl ClassSet {
    /// Build from a set, collapsing to `All` when every class is present.
    pub fn from_classes(classes: BTreeSet<CharacterClass>) -> Self {
        if classes.len() == CharacterClass::ALL.len() {
            Self::All
        } else {
            Self::Only(classes)
        }
    }

    pub fn contains(&self, class: CharacterClass) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&class),
        }
    }

    pub fn to_set(&self) -> BTreeSet<CharacterClass> {
        match self {
            Self::All => CharacterClass::ALL.into_iter().collect(),
            Self::Only(set) => set.clone(),
        }
    }

    pub fn union(&self, other: &ClassSet) -> ClassSet {
        let mut set = self.to_set();
        set.extend(other.to_set());
        Self::from_classes(set)
    }
}

/// Gem colour, which tells the overlay which socket the gem needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GemColor {
    Red,
    Green,
    Blue,
}

/// A single gem offered as a quest reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardItem {
    pub gem: String,
    pub classes: ClassSet,
    pub color: GemColor,
}

/// Rewards of one quest in one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestRewardRecord {
    /// `act{N}/{slug}`, stable across refreshes
    pub quest_key: String,
    pub name: String,
    pub act: u8,
    pub applicable_classes: ClassSet,
    pub rewards: Vec<RewardItem>,
}

impl QuestRewardRecord {
    /// Rewards available to a class, in source order.
    pub fn rewards_for(&self, class: CharacterClass) -> impl Iterator<Item = &RewardItem> {
        self.rewards.iter().filter(move |r| r.classes.contains(class))
    }
}

/// Level and class gating of a vendor reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub classes: ClassSet,
}

/// A gem sold by a vendor after a quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRewardRecord {
    /// `[act{N}/]{quest-slug}/{gem-slug}`
    pub item_key: String,
    pub quest: String,
    pub item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<u8>,
    pub color: GemColor,
    pub requirements: Requirements,
}
