//! Folding per-video extraction results into the verse, topic and cross-reference indices

use crate::database::{Database, DatabaseMetadata, TopicEntry, VerseIndex, VerseIndices, VideoEntry, VideoSummary};
use crate::enrich::thumbnails::{extract_crn, imgix_thumb_url};
use crate::reference::VerseRef;
use crate::timestamp::ts_to_ms_or_zero;
use crate::transcript::{Mention, TeachingSection, VideoArtifact, VideoStudyData};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Phrases that mark a mention as a reading announcement rather than teaching
pub const READING_PHRASES: &[&str] = &[
    "schlagen sie auf",
    "schlag auf",
    "liest:",
    "lesen wir:",
    "ich lese",
    "wir lesen jetzt",
    "steht geschrieben:",
    "der text lautet",
];

const TOPIC_TIMESTAMPS: usize = 5;
const TITLE_MAX_CHARS: usize = 40;

/// Mention type written for sections coming from the AI parse
pub const AI_PARSED_TYPE: &str = "ai_parsed";
const IMPLICIT_AI_TYPE: &str = "implicit_ai_detected";

/// Decides which verse references belong to the focus chapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusFilter {
    label: String,
    alias: String,
}

impl FocusFilter {
    pub fn new(label: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            alias: alias.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Prefix rule used by regex extraction ("Genesis 1" also admits "Genesis 10")
    pub fn matches_prefix(&self, verse_ref: &VerseRef) -> bool {
        verse_ref.starts_with(&self.label)
    }

    /// Containment rule used when rebuilding from model-produced references
    pub fn matches_loose(&self, verse_ref: &VerseRef) -> bool {
        verse_ref.contains(&self.label) || (!self.alias.is_empty() && verse_ref.contains(&self.alias))
    }
}

impl Default for FocusFilter {
    fn default() -> Self {
        Self::new("Genesis 1", "1. Mose 1")
    }
}

/// Short readable label for a title or file name
pub fn clean_title(title: &str) -> String {
    let mut cleaned = title.replace(".mp4", "");

    if let Some((head, tail)) = cleaned.rsplit_once('_') {
        if is_crn(tail) {
            cleaned = head.to_string();
        }
    }

    let cleaned = cleaned.replace('_', " ");
    if cleaned.chars().count() <= TITLE_MAX_CHARS {
        return cleaned.trim().to_string();
    }

    let cut: String = cleaned.chars().take(TITLE_MAX_CHARS).collect();
    let shortened = match cut.rsplit_once(' ') {
        Some((head, _)) => head,
        None => cut.as_str(),
    };
    shortened.trim().to_string()
}

/// Five or more ASCII digits
pub(crate) fn is_crn(text: &str) -> bool {
    text.len() >= 5 && text.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_reading_announcement(context: &str) -> bool {
    let lowered = context.to_lowercase();
    READING_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Drop a leading `# ` heading line from a generated summary
pub fn strip_summary_heading(summary: &str) -> String {
    if summary.starts_with("# ") {
        match summary.split_once('\n') {
            Some((_, rest)) => rest.trim().to_string(),
            None => summary.trim().to_string(),
        }
    } else {
        summary.to_string()
    }
}

/// Mentions worth keeping from a legacy enhanced artifact
pub fn keep_enhanced_mention(mention: &Mention) -> bool {
    if mention.mention_type.as_deref() == Some(IMPLICIT_AI_TYPE) {
        return matches!(mention.meaningfulness.as_deref(), Some("high") | Some("medium"));
    }
    !is_reading_announcement(&mention.context)
}

/// imgix thumbnail from the first non-empty of `video_id` and `title`
fn preview_thumb(video: &VideoStudyData) -> Option<String> {
    let source = if video.video_id.is_empty() { &video.title } else { &video.video_id };
    extract_crn(source).map(imgix_thumb_url)
}

fn section_mention(section: &TeachingSection) -> Mention {
    let timestamp = if section.timestamp.is_empty() {
        "00:00:00".to_string()
    } else {
        section.timestamp.clone()
    };

    Mention {
        timestamp_ms: ts_to_ms_or_zero(&timestamp),
        timestamp,
        context: section.content.clone(),
        category: Some(section.category.clone()),
        quality: Some(section.quality.clone()),
        mention_type: Some(AI_PARSED_TYPE.to_string()),
        ..Default::default()
    }
}

/// Accumulates video entries into the focus and full verse indices
#[derive(Debug, Default)]
pub struct VerseIndexBuilder {
    filter: FocusFilter,
    focus: VerseIndex,
    all: VerseIndex,
}

impl VerseIndexBuilder {
    pub fn new(filter: FocusFilter) -> Self {
        Self {
            filter,
            focus: VerseIndex::new(),
            all: VerseIndex::new(),
        }
    }

    /// Regex extraction result; focus membership by prefix
    pub fn add_study_data(&mut self, video: &VideoStudyData) {
        for (verse_ref, mentions) in &video.verse_mentions {
            let entry = VideoEntry::new(&video.video_id, &video.video_file, &video.title, mentions.clone());
            let focus = self.filter.matches_prefix(verse_ref);
            self.push(verse_ref, entry, focus);
        }
    }

    /// AI-parsed artifact; one entry per verse with at least one section
    pub fn add_parsed(&mut self, artifact: &VideoArtifact, ai_summary: Option<&str>) {
        let video = &artifact.study;

        for (verse_ref, sections) in &artifact.verse_sections {
            let mentions: Vec<Mention> = sections.iter().map(section_mention).collect();
            if mentions.is_empty() {
                continue;
            }

            let entry = self.decorated_entry(video, mentions, ai_summary);
            let focus = self.filter.matches_loose(verse_ref);
            self.push(verse_ref, entry, focus);
        }
    }

    /// Legacy enhanced artifact, with reading announcements filtered out
    pub fn add_enhanced(&mut self, artifact: &VideoArtifact) {
        let video = &artifact.study;
        let ai_summary = artifact.ai_summary.as_deref().map(strip_summary_heading);

        for (verse_ref, mentions) in &video.verse_mentions {
            let kept: Vec<Mention> = mentions.iter().filter(|m| keep_enhanced_mention(m)).cloned().collect();
            if kept.is_empty() {
                continue;
            }

            let entry = self.decorated_entry(video, kept, ai_summary.as_deref());
            let focus = self.filter.matches_loose(verse_ref);
            self.push(verse_ref, entry, focus);
        }
    }

    fn decorated_entry(&self, video: &VideoStudyData, mentions: Vec<Mention>, ai_summary: Option<&str>) -> VideoEntry {
        let mut entry = VideoEntry::new(&video.video_id, &video.video_file, &video.title, mentions);
        entry.display_title = Some(clean_title(&video.title));
        entry.thumb = preview_thumb(video);
        entry.ai_summary = ai_summary.filter(|s| !s.is_empty()).map(str::to_string);
        entry
    }

    fn push(&mut self, verse_ref: &VerseRef, entry: VideoEntry, focus: bool) {
        if focus {
            self.focus.entry(verse_ref.clone()).or_default().push(entry.clone());
        }
        self.all.entry(verse_ref.clone()).or_default().push(entry);
    }

    pub fn finish(self) -> VerseIndices {
        VerseIndices {
            focus: self.focus,
            all: self.all,
        }
    }
}

/// Verse indices from parsed artifacts, with enhanced artifacts as fallback
/// for videos that were never parsed
pub fn rebuild_verse_indices(
    parsed: &[(String, VideoArtifact)],
    enhanced: &[(String, VideoArtifact)],
    filter: &FocusFilter,
) -> VerseIndices {
    let summaries: HashMap<&str, &str> = enhanced
        .iter()
        .filter_map(|(base, artifact)| artifact.ai_summary.as_deref().map(|s| (base.as_str(), s)))
        .collect();

    let mut builder = VerseIndexBuilder::new(filter.clone());
    let mut parsed_ids = HashSet::new();

    for (base, artifact) in parsed {
        parsed_ids.insert(base.as_str());
        parsed_ids.insert(artifact.study.video_id.as_str());

        let summary = summaries.get(base.as_str()).map(|s| strip_summary_heading(s));
        builder.add_parsed(artifact, summary.as_deref());
    }

    let mut fallback_count = 0;
    for (base, artifact) in enhanced {
        if parsed_ids.contains(base.as_str()) || parsed_ids.contains(artifact.study.video_id.as_str()) {
            continue;
        }
        builder.add_enhanced(artifact);
        fallback_count += 1;
    }

    debug!("Rebuilt from {} parsed and {} fallback artifacts", parsed.len(), fallback_count);
    builder.finish()
}

pub fn build_topic_index(videos: &[VideoStudyData]) -> BTreeMap<String, Vec<TopicEntry>> {
    let mut index: BTreeMap<String, Vec<TopicEntry>> = BTreeMap::new();

    for video in videos {
        for (topic, occurrences) in &video.topics {
            index.entry(topic.clone()).or_default().push(TopicEntry {
                video_id: video.video_id.clone(),
                video_file: video.video_file.clone(),
                title: video.title.clone(),
                occurrences: occurrences.len(),
                timestamps: occurrences
                    .iter()
                    .take(TOPIC_TIMESTAMPS)
                    .map(|o| o.timestamp.clone())
                    .collect(),
            });
        }
    }

    index
}

/// Focus reference -> non-focus references mentioned in the same video
pub fn build_cross_references(videos: &[VideoStudyData], filter: &FocusFilter) -> BTreeMap<VerseRef, Vec<VerseRef>> {
    let mut graph: BTreeMap<VerseRef, BTreeSet<VerseRef>> = BTreeMap::new();

    for video in videos {
        let (focus, other): (Vec<&VerseRef>, Vec<&VerseRef>) =
            video.verse_mentions.keys().partition(|r| filter.matches_prefix(r));

        for focus_ref in focus {
            graph
                .entry(focus_ref.clone())
                .or_default()
                .extend(other.iter().map(|r| (*r).clone()));
        }
    }

    graph
        .into_iter()
        .map(|(focus_ref, others)| (focus_ref, others.into_iter().collect()))
        .collect()
}

pub fn summarize_videos(videos: &[VideoStudyData], filter: &FocusFilter) -> Vec<VideoSummary> {
    videos
        .iter()
        .map(|video| VideoSummary {
            video_id: video.video_id.clone(),
            video_file: video.video_file.clone(),
            title: video.title.clone(),
            language: video.language.clone(),
            total_segments: video.segments.len(),
            verse_count: video.verse_mentions.len(),
            focus_coverage: video
                .verse_mentions
                .keys()
                .filter(|r| filter.matches_prefix(r))
                .cloned()
                .collect(),
        })
        .collect()
}

/// Full database from regex extraction results
pub fn build_database(videos: &[VideoStudyData], filter: &FocusFilter, generated_at: &str) -> Database {
    let mut builder = VerseIndexBuilder::new(filter.clone());
    for video in videos {
        builder.add_study_data(video);
    }

    let focus_videos = videos
        .iter()
        .filter(|v| v.verse_mentions.keys().any(|r| filter.matches_prefix(r)))
        .count();

    Database {
        metadata: DatabaseMetadata {
            total_videos: videos.len(),
            focus_videos,
            generated_at: generated_at.to_string(),
            focus_chapter: filter.label().to_string(),
            ..Default::default()
        },
        verses: builder.finish(),
        cross_references: build_cross_references(videos, filter),
        topics: build_topic_index(videos),
        videos: summarize_videos(videos, filter),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Occurrence;

    fn video(id: &str, refs: &[&str]) -> VideoStudyData {
        let mut data = VideoStudyData {
            video_id: id.to_string(),
            video_file: format!("{}.mp4", id),
            title: id.to_string(),
            language: "de".to_string(),
            ..Default::default()
        };
        for (i, r) in refs.iter().enumerate() {
            let ms = (i as u64 + 1) * 1000;
            data.verse_mentions
                .entry(VerseRef::from(*r))
                .or_default()
                .push(Mention::new(crate::timestamp::ms_to_ts(ms), ms, *r));
        }
        data
    }

    fn section(timestamp: &str, verse: &str, content: &str) -> TeachingSection {
        TeachingSection {
            timestamp: timestamp.to_string(),
            verse_reference: verse.to_string(),
            category: "theologisch".to_string(),
            quality: "high".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("Am_Anfang_schuf_Gott_12345.mp4"), "Am Anfang schuf Gott");
        assert_eq!(clean_title("Predigt_1234"), "Predigt 1234");
        assert_eq!(
            clean_title("Die_Schöpfungsgeschichte_im_Licht_der_modernen_Wissenschaft_98765"),
            "Die Schöpfungsgeschichte im Licht der"
        );
    }

    #[test]
    fn test_reading_announcements() {
        assert!(is_reading_announcement("Schlagen Sie auf: 1. Mose 1"));
        assert!(!is_reading_announcement("Gott schafft durch sein Wort"));
    }

    #[test]
    fn test_enhanced_mention_filter() {
        let mut implicit = Mention::new("00:00:01", 1000, "schlagen sie auf");
        implicit.mention_type = Some("implicit_ai_detected".to_string());
        implicit.meaningfulness = Some("medium".to_string());
        assert!(keep_enhanced_mention(&implicit));

        implicit.meaningfulness = Some("low".to_string());
        assert!(!keep_enhanced_mention(&implicit));

        assert!(!keep_enhanced_mention(&Mention::new("00:00:01", 1000, "Ich lese Genesis 1")));
    }

    #[test]
    fn test_summary_heading_is_stripped() {
        assert_eq!(strip_summary_heading("# Überblick\nGott spricht."), "Gott spricht.");
        assert_eq!(strip_summary_heading("Kein Titel"), "Kein Titel");
    }

    fn index_pairs(indices: &[VerseIndices]) -> BTreeSet<(String, VerseRef, String)> {
        let mut pairs = BTreeSet::new();
        for index in indices {
            for (name, map) in [("focus", &index.focus), ("all", &index.all)] {
                for (verse_ref, entries) in map {
                    for entry in entries {
                        pairs.insert((name.to_string(), verse_ref.clone(), entry.video_id.clone()));
                    }
                }
            }
        }
        pairs
    }

    fn index_of(videos: &[VideoStudyData]) -> VerseIndices {
        let mut builder = VerseIndexBuilder::new(FocusFilter::default());
        for video in videos {
            builder.add_study_data(video);
        }
        builder.finish()
    }

    #[test]
    fn test_preview_thumb_reads_first_non_empty_field() {
        let mut data = video("Predigt", &[]);
        data.title = "Predigt_12345".to_string();
        assert_eq!(preview_thumb(&data), None);

        data.video_id = String::new();
        assert_eq!(preview_thumb(&data).as_deref(), Some("https://bibeltv.imgix.net/12345.jpg"));

        data.video_id = "Am_Anfang_67890.mp4".to_string();
        assert_eq!(preview_thumb(&data).as_deref(), Some("https://bibeltv.imgix.net/67890.jpg"));
    }

    #[test]
    fn test_aggregation_is_associative() {
        let a = video("a", &["Genesis 1:1", "John 1:1"]);
        let b = video("b", &["Genesis 1:1", "Genesis 1:2"]);
        let c = video("c", &["John 1:1", "Genesis 1:2", "Psalm 23"]);

        let single = index_of(&[a.clone(), b.clone(), c.clone()]);
        let split = [index_of(&[a.clone(), b.clone()]), index_of(&[c.clone()])];
        let reordered = index_of(&[c, a, b]);

        let expected = index_pairs(std::slice::from_ref(&single));
        assert_eq!(index_pairs(&split), expected);
        assert_eq!(index_pairs(&[reordered]), expected);
        assert_eq!(single.all[&VerseRef::from("Genesis 1:1")].len(), 2);
        assert_eq!(single.focus[&VerseRef::from("Genesis 1:2")].len(), 2);
    }

    #[test]
    fn test_focus_is_subset_of_all() {
        let videos = vec![video("a", &["Genesis 1:1", "John 1:1"]), video("b", &["Genesis 1:1"])];
        let db = build_database(&videos, &FocusFilter::default(), "2026-01-01T00:00:00Z");

        let key = VerseRef::from("Genesis 1:1");
        assert_eq!(db.verses.focus[&key].len(), 2);
        assert_eq!(db.verses.all[&key].len(), 2);
        assert!(!db.verses.focus.contains_key(&VerseRef::from("John 1:1")));
        assert_eq!(db.metadata.focus_videos, 2);
        assert_eq!(db.metadata.focus_chapter, "Genesis 1");
        assert!(db.check_invariants().is_empty());
    }

    #[test]
    fn test_cross_references_sorted_and_deduplicated() {
        let videos = vec![
            video("a", &["Genesis 1:1", "John 1:1", "Hebrews 11:3"]),
            video("b", &["Genesis 1:1", "John 1:1"]),
        ];
        let graph = build_cross_references(&videos, &FocusFilter::default());

        assert_eq!(
            graph[&VerseRef::from("Genesis 1:1")],
            vec![VerseRef::from("Hebrews 11:3"), VerseRef::from("John 1:1")]
        );
    }

    #[test]
    fn test_topic_index_keeps_first_five_timestamps() {
        let mut data = video("a", &[]);
        data.topics.insert(
            "light".to_string(),
            (0..7)
                .map(|i| Occurrence {
                    timestamp: format!("00:00:0{}", i),
                    timestamp_ms: i * 1000,
                    text: String::new(),
                })
                .collect(),
        );

        let index = build_topic_index(&[data]);
        assert_eq!(index["light"][0].occurrences, 7);
        assert_eq!(index["light"][0].timestamps.len(), 5);
    }

    #[test]
    fn test_rebuild_prefers_parsed_artifacts() {
        let mut parsed = VideoArtifact::from(video("Predigt_12345", &[]));
        parsed.verse_sections.insert(
            "1. Mose 1:3".into(),
            vec![section("00:12:30", "1. Mose 1:3", "Licht ist die erste Schöpfungstat."), section("bad", "1. Mose 1:3", "x")],
        );

        let mut stale = VideoArtifact::from(video("Predigt_12345", &["Genesis 1:1"]));
        stale.ai_summary = Some("# Zusammenfassung\nÜber das Licht.".to_string());
        let legacy = VideoArtifact::from(video("Andacht_55555", &["Genesis 1:2"]));

        let indices = rebuild_verse_indices(
            &[("Predigt_12345".to_string(), parsed)],
            &[("Predigt_12345".to_string(), stale), ("Andacht_55555".to_string(), legacy)],
            &FocusFilter::default(),
        );

        let entry = &indices.focus[&VerseRef::from("1. Mose 1:3")][0];
        assert_eq!(entry.display_title.as_deref(), Some("Predigt"));
        assert_eq!(entry.thumb.as_deref(), Some("https://bibeltv.imgix.net/12345.jpg"));
        assert_eq!(entry.ai_summary.as_deref(), Some("Über das Licht."));
        assert_eq!(entry.mentions[0].timestamp_ms, 750_000);
        assert_eq!(entry.mentions[0].mention_type.as_deref(), Some("ai_parsed"));
        assert_eq!(entry.mentions[1].timestamp_ms, 0);

        // the stale enhanced artifact of a parsed video is ignored
        assert!(!indices.all.contains_key(&VerseRef::from("Genesis 1:1")));
        assert_eq!(indices.focus[&VerseRef::from("Genesis 1:2")][0].video_id, "Andacht_55555");
    }
}
