//! Transcript data model shared by the extraction and enrichment stages

pub mod segmenter;
pub mod window;

pub use segmenter::TranscriptSegmenter;

use crate::reference::VerseRef;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One timestamped transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: String,
    pub start_ms: u64,
    pub text: String,
    #[serde(default)]
    pub verses: Vec<VerseRef>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub terms: Vec<String>,
}

impl Segment {
    pub fn new(start: impl Into<String>, start_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            start_ms,
            text: text.into(),
            verses: Vec::new(),
            topics: Vec::new(),
            terms: Vec::new(),
        }
    }
}

/// A located reference to a verse inside one video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub timestamp: String,
    #[serde(default)]
    pub timestamp_ms: u64,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mention_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meaningfulness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_start_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_end_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_description: Option<String>,
}

impl Mention {
    pub fn new(timestamp: impl Into<String>, timestamp_ms: u64, context: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            timestamp_ms,
            context: context.into(),
            ..Default::default()
        }
    }

    /// Clip bounds were already written by an earlier run
    pub fn has_clip(&self) -> bool {
        self.clip_start_ms.is_some()
    }

    pub fn apply_clip(&mut self, clip: &ClipAnnotation) {
        self.clip_start_ms = Some(clip.start_ms);
        self.clip_end_ms = Some(clip.end_ms);
        self.clip_title = Some(clip.title.clone());
        self.clip_description = Some(clip.description.clone());
    }
}

/// Validated clip bounds and texts for one mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipAnnotation {
    pub start_ms: i64,
    pub end_ms: i64,
    pub title: String,
    pub description: String,
}

/// Commentary text following a verse mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentaryExcerpt {
    pub timestamp: String,
    pub timestamp_ms: u64,
    pub text: String,
}

/// Topic or term occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub timestamp: String,
    pub timestamp_ms: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMention {
    pub timestamp: String,
    pub timestamp_ms: u64,
    pub question: String,
    pub context: String,
}

/// Everything extracted from one transcript (`<id>_study_data.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStudyData {
    pub video_id: String,
    pub video_file: String,
    pub title: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub verse_mentions: BTreeMap<VerseRef, Vec<Mention>>,
    #[serde(default)]
    pub commentary: BTreeMap<VerseRef, Vec<CommentaryExcerpt>>,
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<Occurrence>>,
    #[serde(default)]
    pub terms: BTreeMap<String, Vec<Occurrence>>,
    #[serde(default)]
    pub questions: Vec<QuestionMention>,
}

pub fn default_language() -> String {
    "de".to_string()
}

/// A passage of teaching attached to a verse by the section parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeachingSection {
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verse_reference: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(default = "default_quality", deserialize_with = "quality_or_default")]
    pub quality: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

fn default_quality() -> String {
    "medium".to_string()
}

fn quality_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|q| !q.is_empty()).unwrap_or_else(default_quality))
}

/// Treat an explicit JSON `null` like a missing field
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// Study data plus stage-specific additions.
///
/// Covers both `_enhanced.json` (with `ai_summary`) and `_parsed.json`
/// (with `ai_sections`/`verse_sections`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoArtifact {
    #[serde(flatten)]
    pub study: VideoStudyData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_sections: Vec<TeachingSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub verse_sections: BTreeMap<VerseRef, Vec<TeachingSection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
}

impl From<VideoStudyData> for VideoArtifact {
    fn from(study: VideoStudyData) -> Self {
        Self {
            study,
            ..Default::default()
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_is_character_based() {
        assert_eq!(truncate_chars("Schöpfung", 4), "Schö");
        assert_eq!(truncate_chars("kurz", 200), "kurz");
    }

    #[test]
    fn test_teaching_section_tolerates_nulls() {
        let section: TeachingSection = serde_json::from_str(
            r#"{"timestamp": "00:01:00", "verse_reference": null, "quality": null, "content": "x"}"#,
        )
        .unwrap();

        assert_eq!(section.verse_reference, "");
        assert_eq!(section.quality, "medium");
        assert_eq!(section.category, "");
    }

    #[test]
    fn test_mention_optional_fields_are_omitted() {
        let mention = Mention::new("00:00:10", 10_000, "Genesis 1,1");
        let json = serde_json::to_value(&mention).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), 3);
        assert!(!mention.has_clip());
    }

    #[test]
    fn test_mention_type_uses_json_name() {
        let mention: Mention =
            serde_json::from_str(r#"{"timestamp": "00:00:01", "timestamp_ms": 1000, "context": "", "type": "ai_parsed"}"#)
                .unwrap();
        assert_eq!(mention.mention_type.as_deref(), Some("ai_parsed"));
    }

    #[test]
    fn test_artifact_flattens_study_data() {
        let json = r##"{
            "video_id": "v1", "video_file": "v1.mp4", "title": "V",
            "ai_summary": "# Titel\nInhalt",
            "unexpected": true
        }"##;
        let artifact: VideoArtifact = serde_json::from_str(json).unwrap();

        assert_eq!(artifact.study.video_id, "v1");
        assert_eq!(artifact.study.language, "de");
        assert_eq!(artifact.ai_summary.as_deref(), Some("# Titel\nInhalt"));
    }
}
