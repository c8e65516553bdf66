//! Field paths of the system save that the unlock cross-reference reads, and
//! the collected/missing computation built on them.

use std::collections::BTreeSet;

use crate::node::Node;

pub const ENDINGS: &str = "endings";
pub const COLLECTED_ENDINGS: &str = "collectedEndings";
pub const STICKERS: &str = "sticker";
pub const CHARACTERS: &str = "characters";
pub const COLLECTED_CHARACTERS: &str = "collectedCharacters";
pub const OMAKES: &str = "omakes";
pub const MEMORY: &str = "memory";
pub const MEMORY_NAME: &str = "memory.name";
pub const JUDGE_PERFECT: &str = "judgeCounts.perfect";
pub const JUDGE_GOOD: &str = "judgeCounts.good";
pub const JUDGE_BAD: &str = "judgeCounts.bad";
pub const AUTOSAVE: &str = "system.autosave";
pub const NEO: &str = "NEO";
pub const KILL: &str = "kill";
pub const KILLED: &str = "killed";

/// Valid sticker ids as half-open ranges; id 82 does not exist.
pub const STICKER_ID_RANGES: [(u32, u32); 2] = [(1, 82), (83, 134)];

pub const TOTAL_OMAKES: [&str; 36] = [
    "1", "3", "5", "10", "15", "17", "21", "22", "9", "4", "19", "20", "23", "2", "8", "7", "6",
    "11", "12", "13", "14", "16", "18", "24", "26", "33", "25", "31", "38", "39", "41", "40", "42",
    "43", "44", "32",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    pub collected: Vec<String>,
    pub missing: Vec<String>,
}

impl Collection {
    pub fn total(&self) -> usize {
        self.collected.len() + self.missing.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionProgress {
    pub endings: Collection,
    pub stickers: Collection,
    pub characters: Collection,
    pub omakes: Collection,
    pub fanatic_route: bool,
}

pub fn collection_progress(root: &Node) -> CollectionProgress {
    let field = |name: &str| root.as_mapping().and_then(|map| map.get(name));

    let seen_endings = id_set(field(ENDINGS));
    let collected_endings = id_set(field(COLLECTED_ENDINGS));
    let endings = Collection {
        collected: sorted_numeric(collected_endings.iter().cloned()),
        missing: sorted_numeric(seen_endings.difference(&collected_endings).cloned()),
    };

    let owned_stickers = id_set(field(STICKERS));
    let all_stickers: BTreeSet<String> = STICKER_ID_RANGES
        .iter()
        .flat_map(|&(start, end)| start..end)
        .map(|id| id.to_string())
        .collect();
    let stickers = Collection {
        collected: sorted_numeric(owned_stickers.iter().cloned()),
        missing: sorted_numeric(all_stickers.difference(&owned_stickers).cloned()),
    };

    let met = non_blank(id_set(field(CHARACTERS)));
    let collected_characters = non_blank(id_set(field(COLLECTED_CHARACTERS)));
    let characters = Collection {
        collected: collected_characters.iter().cloned().collect(),
        missing: met.difference(&collected_characters).cloned().collect(),
    };

    let owned_omakes = id_set(field(OMAKES));
    let omakes = Collection {
        collected: sorted_numeric(owned_omakes.iter().cloned()),
        missing: sorted_numeric(
            TOTAL_OMAKES
                .iter()
                .filter(|id| !owned_omakes.contains(**id))
                .map(|id| id.to_string()),
        ),
    };

    let flag_set = |name: &str| field(name).and_then(Node::as_i64) == Some(1);

    CollectionProgress {
        endings,
        stickers,
        characters,
        omakes,
        fanatic_route: flag_set(KILL) || flag_set(KILLED),
    }
}

/// Ids held by a field: sequence elements, or the keys of a mapping whose
/// values are truthy.
fn id_set(node: Option<&Node>) -> BTreeSet<String> {
    match node {
        Some(Node::Sequence(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(Node::to_label)
            .collect(),
        Some(Node::Mapping(map)) => map
            .iter()
            .filter(|(_, value)| value.is_truthy())
            .map(|(key, _)| key.to_string())
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn non_blank(ids: BTreeSet<String>) -> BTreeSet<String> {
    ids.into_iter().filter(|id| !id.trim().is_empty()).collect()
}

/// Numeric ids in numeric order, then everything else alphabetically.
fn sorted_numeric(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.collect();
    ids.sort_by(|a, b| {
        let key = |s: &str| s.parse::<u64>().map_or((1, 0), |n| (0, n));
        key(a).cmp(&key(b)).then_with(|| a.cmp(b))
    });
    ids
}
