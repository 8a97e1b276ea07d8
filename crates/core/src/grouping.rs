use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::domain::PhotoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    #[default]
    Folder,
    Year,
    #[serde(rename = "month")]
    YearMonth,
}

impl FromStr for GroupMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folder" => Ok(GroupMode::Folder),
            "year" => Ok(GroupMode::Year),
            "month" | "year-month" | "yearmonth" => Ok(GroupMode::YearMonth),
            other => Err(format!("unknown group mode `{other}` (expected folder, year or month)")),
        }
    }
}

impl fmt::Display for GroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupMode::Folder => "folder",
            GroupMode::Year => "year",
            GroupMode::YearMonth => "month",
        })
    }
}

/// Group identity. Variant order gives the sort order: folders, then dates, then unknown dates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Folder(String),
    Year(i32),
    YearMonth(i32, u32),
    UnknownDate,
}

impl GroupKey {
    fn of(record: &PhotoRecord, mode: GroupMode) -> Self {
        match (mode, record.captured_at) {
            (GroupMode::Folder, _) => GroupKey::Folder(record.source_folder.to_string_lossy().into_owned()),
            (GroupMode::Year, Some(t)) => GroupKey::Year(t.year()),
            (GroupMode::YearMonth, Some(t)) => GroupKey::YearMonth(t.year(), t.month()),
            (_, None) => GroupKey::UnknownDate,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Folder(name) => f.write_str(name),
            GroupKey::Year(y) => write!(f, "{y}"),
            GroupKey::YearMonth(y, m) => write!(f, "{y}-{m:02}"),
            GroupKey::UnknownDate => f.write_str("Unknown date"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub records: Vec<PhotoRecord>,
}

impl Group {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn label(&self) -> String {
        self.key.to_string()
    }
}

/// Partition `records` by `mode`. Groups come back sorted by key; records keep their input order.
pub fn group(records: &[PhotoRecord], mode: GroupMode) -> Vec<Group> {
    let mut buckets: BTreeMap<GroupKey, Vec<PhotoRecord>> = BTreeMap::new();
    for record in records {
        buckets
            .entry(GroupKey::of(record, mode))
            .or_default()
            .push(record.clone());
    }
    buckets
        .into_iter()
        .map(|(key, records)| Group { key, records })
        .collect()
}

/// Find a group by its display label, case-insensitively.
pub fn find_by_label<'a>(groups: &'a [Group], label: &str) -> Option<&'a Group> {
    groups
        .iter()
        .find(|g| g.label().eq_ignore_ascii_case(label.trim()))
}
