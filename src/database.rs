//! Study Bible database model and its single-writer JSON store

use crate::reference::VerseRef;
use crate::timestamp::ts_to_ms;
use crate::transcript::{null_as_default, Mention};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Verse reference -> videos discussing it, in aggregation order
pub type VerseIndex = BTreeMap<VerseRef, Vec<VideoEntry>>;

/// One video's mentions of one verse
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_title: Option<String>,
    #[serde(default)]
    pub video_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    /// Fields written by other tools
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VideoEntry {
    pub fn new(video_id: &str, video_file: &str, title: &str, mentions: Vec<Mention>) -> Self {
        Self {
            video_id: video_id.to_string(),
            video_file: video_file.to_string(),
            title: title.to_string(),
            mentions,
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_title.as_deref().unwrap_or(&self.video_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerseIndices {
    /// Focus chapter subset of `all`
    #[serde(rename = "genesis1", default)]
    pub focus: VerseIndex,
    #[serde(default)]
    pub all: VerseIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub video_id: String,
    pub video_file: String,
    pub title: String,
    pub occurrences: usize,
    pub timestamps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub video_id: String,
    pub video_file: String,
    pub title: String,
    pub language: String,
    pub total_segments: usize,
    pub verse_count: usize,
    #[serde(rename = "genesis1_coverage")]
    pub focus_coverage: Vec<VerseRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    #[serde(default)]
    pub total_videos: usize,
    #[serde(rename = "genesis1_videos", default)]
    pub focus_videos: usize,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub focus_chapter: String,
    #[serde(rename = "genesis1_verses", default, skip_serializing_if = "Option::is_none")]
    pub focus_verses: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_verse_refs: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A synthesized statement attributed to one video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentaryPoint {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
}

/// Aggregated commentary for one verse across videos
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerseCommentary {
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_categories")]
    pub categories: BTreeMap<String, Vec<CommentaryPoint>>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub cross_references: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_count: usize,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub source_videos: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `null` category list counts as empty
fn lenient_categories<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<CommentaryPoint>>, D::Error>
where
    D: Deserializer<'de>,
{
    let categories: Option<BTreeMap<String, Option<Vec<CommentaryPoint>>>> = Option::deserialize(deserializer)?;
    Ok(categories
        .unwrap_or_default()
        .into_iter()
        .map(|(category, points)| (category, points.unwrap_or_default()))
        .collect())
}

/// `null` lists and `null` items are dropped
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(items.unwrap_or_default().into_iter().flatten().collect())
}

impl VerseCommentary {
    pub fn point_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }
}

/// The whole database file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub metadata: DatabaseMetadata,
    #[serde(default)]
    pub verses: VerseIndices,
    #[serde(default)]
    pub cross_references: BTreeMap<VerseRef, Vec<VerseRef>>,
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<TopicEntry>>,
    #[serde(default)]
    pub videos: Vec<VideoSummary>,
    #[serde(default)]
    pub verse_commentaries: BTreeMap<VerseRef, VerseCommentary>,
    /// Top-level keys written by other tools
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Database {
    /// Every video entry, focus index first
    pub fn video_entries(&self) -> impl Iterator<Item = &VideoEntry> {
        self.verses
            .focus
            .values()
            .chain(self.verses.all.values())
            .flat_map(|entries| entries.iter())
    }

    pub fn video_entries_mut(&mut self) -> impl Iterator<Item = &mut VideoEntry> {
        let VerseIndices { focus, all } = &mut self.verses;
        focus.values_mut().chain(all.values_mut()).flat_map(|entries| entries.iter_mut())
    }

    /// Every video entry paired with the verse it is filed under
    pub fn verse_entries_mut(&mut self) -> impl Iterator<Item = (&VerseRef, &mut VideoEntry)> {
        let VerseIndices { focus, all } = &mut self.verses;
        focus
            .iter_mut()
            .chain(all.iter_mut())
            .flat_map(|(verse_ref, entries)| entries.iter_mut().map(move |entry| (verse_ref, entry)))
    }

    /// First entry per video id, in first-seen order
    pub fn unique_videos(&self) -> Vec<&VideoEntry> {
        let mut seen = HashSet::new();
        self.video_entries()
            .filter(|entry| !entry.video_id.is_empty() && seen.insert(entry.video_id.as_str()))
            .collect()
    }

    /// Describe every violated database invariant
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (verse_ref, entries) in &self.verses.focus {
            match self.verses.all.get(verse_ref) {
                None => problems.push(format!("{} is in the focus index but missing from all", verse_ref)),
                Some(all_entries) if all_entries.len() < entries.len() => problems.push(format!(
                    "{} has {} focus entries but only {} in all",
                    verse_ref,
                    entries.len(),
                    all_entries.len()
                )),
                Some(_) => {}
            }
        }

        for (verse_ref, entries) in &self.verses.all {
            for entry in entries {
                for mention in &entry.mentions {
                    let consistent = match ts_to_ms(&mention.timestamp) {
                        Ok(ms) => ms == mention.timestamp_ms,
                        Err(_) => mention.timestamp_ms == 0,
                    };
                    if !consistent {
                        problems.push(format!(
                            "{} / {}: timestamp {} does not match {} ms",
                            verse_ref, entry.video_id, mention.timestamp, mention.timestamp_ms
                        ));
                    }
                }
            }
        }

        problems
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize database: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sole reader and writer of the database file
#[derive(Debug, Clone)]
pub struct DatabaseStore {
    path: PathBuf,
}

impl DatabaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub async fn load(&self) -> Result<Database, StoreError> {
        let content = fs::read_to_string(&self.path).await.map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;

        let database = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        debug!("📂 Loaded database from {}", self.path.display());
        Ok(database)
    }

    /// Load the database, or start an empty one when the file does not exist yet
    pub async fn load_or_default(&self) -> Result<Database, StoreError> {
        if self.exists() {
            self.load().await
        } else {
            info!("📄 No database at {}, starting fresh", self.path.display());
            Ok(Database::default())
        }
    }

    /// Replace the database file through a temp file in the same directory
    pub async fn save(&self, database: &Database) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(database)?;
        let path = self.path.clone();

        let write_error = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        tokio::task::spawn_blocking(move || write_atomically(&path, json.as_bytes()))
            .await
            .map_err(|e| write_error(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            .map_err(write_error)?;

        info!("💾 Saved database to {}", self.path.display());
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(bytes)?;
    temp.write_all(b"\n")?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
