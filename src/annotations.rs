//! Per-subject channel annotation tables.
//!
//! A [`ChannelTable`] maps subject ids to channel annotations (good/bad,
//! free-text description such as `"resected"`, anatomical group).  Tables
//! are loaded from JSON and handed in by the caller:
//!
//! ```json
//! {
//!   "pt1": [
//!     { "name": "POL A1", "status": "bad", "description": "resected" },
//!     { "name": "POL A2", "status": "good", "group": "hippocampus" }
//!   ]
//! }
//! ```
//!
//! Writing BIDS-style `channels.tsv` sidecars is left to a [`SidecarSink`].
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::signal::normalize_name;

/// Channel quality flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Good,
    Bad,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Good => "good",
            ChannelStatus::Bad => "bad",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAnnotation {
    pub name: String,
    #[serde(default)]
    pub status: ChannelStatus,
    /// e.g. `"resected"`, `"white matter"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Subject id → channel annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTable {
    subjects: BTreeMap<String, Vec<ChannelAnnotation>>,
}

/// Receives `(channel, column, value)` triples, one per annotated field.
pub trait SidecarSink {
    fn write(&mut self, channel: &str, column: &str, value: &str) -> Result<()>;
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parsing channel table")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading channel table {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn insert(&mut self, subject: impl Into<String>, channels: Vec<ChannelAnnotation>) {
        self.subjects.insert(subject.into(), channels);
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// Annotations of `subject`; empty for unknown subjects.
    pub fn channels(&self, subject: &str) -> &[ChannelAnnotation] {
        self.subjects.get(subject).map_or(&[], Vec::as_slice)
    }

    /// Annotation for `channel`, matched case-insensitively ignoring spaces.
    pub fn get(&self, subject: &str, channel: &str) -> Option<&ChannelAnnotation> {
        let key = normalize_name(channel);
        self.channels(subject).iter().find(|a| normalize_name(&a.name) == key)
    }

    pub fn bad_channels(&self, subject: &str) -> Vec<String> {
        self.channels(subject)
            .iter()
            .filter(|a| a.status == ChannelStatus::Bad)
            .map(|a| a.name.clone())
            .collect()
    }

    /// Channels whose description mentions resection.
    pub fn resected_channels(&self, subject: &str) -> Vec<String> {
        self.channels(subject)
            .iter()
            .filter(|a| {
                a.description.as_deref().is_some_and(|d| d.to_lowercase().contains("resect"))
            })
            .map(|a| a.name.clone())
            .collect()
    }

    /// Stream `status`, `description` and `group` of every channel of
    /// `subject` into `sink`.  Missing optional fields are written as `n/a`.
    pub fn emit(&self, subject: &str, sink: &mut dyn SidecarSink) -> Result<()> {
        for a in self.channels(subject) {
            sink.write(&a.name, "status", a.status.as_str())?;
            sink.write(&a.name, "description", a.description.as_deref().unwrap_or("n/a"))?;
            sink.write(&a.name, "group", a.group.as_deref().unwrap_or("n/a"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{
        "pt1": [
            { "name": "POL A1", "status": "bad", "description": "resected" },
            { "name": "POL A2", "description": "Resection margin", "group": "hippocampus" },
            { "name": "POL B1", "status": "bad" },
            { "name": "POL B2" }
        ]
    }"#;

    #[derive(Default)]
    struct Collect(Vec<(String, String, String)>);

    impl SidecarSink for Collect {
        fn write(&mut self, channel: &str, column: &str, value: &str) -> Result<()> {
            self.0.push((channel.into(), column.into(), value.into()));
            Ok(())
        }
    }

    #[test]
    fn parses_bad_and_resected_channels() {
        let t = ChannelTable::from_json(TABLE).unwrap();
        assert_eq!(t.bad_channels("pt1"), vec!["POL A1", "POL B1"]);
        assert_eq!(t.resected_channels("pt1"), vec!["POL A1", "POL A2"]);
        assert!(t.bad_channels("unknown").is_empty());
    }

    #[test]
    fn lookup_ignores_case_and_spaces() {
        let t = ChannelTable::from_json(TABLE).unwrap();
        let a = t.get("pt1", "pola2").unwrap();
        assert_eq!(a.group.as_deref(), Some("hippocampus"));
        assert_eq!(a.status, ChannelStatus::Good);
    }

    #[test]
    fn emit_writes_three_columns_per_channel() {
        let t = ChannelTable::from_json(TABLE).unwrap();
        let mut sink = Collect::default();
        t.emit("pt1", &mut sink).unwrap();
        assert_eq!(sink.0.len(), 12);
        assert_eq!(sink.0[0], ("POL A1".into(), "status".into(), "bad".into()));
        assert_eq!(sink.0[11], ("POL B2".into(), "group".into(), "n/a".into()));
    }

    #[test]
    fn malformed_status_is_rejected() {
        let bad = r#"{ "pt1": [ { "name": "A1", "status": "maybe" } ] }"#;
        assert!(ChannelTable::from_json(bad).is_err());
    }
}
