use crate::artifacts::{ArtifactStore, OPENING_PREFERENCE};
use crate::database::{Database, VideoEntry};
use crate::llm::{AnnotationError, Annotator};
use crate::processing::BatchReport;
use crate::transcript::{truncate_chars, Segment};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

const OPENING_SEGMENTS: usize = 20;
const OPENING_CHARS: usize = 600;

/// Speaker and series information for one video
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub speaker: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub series: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub episode: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub organization: Option<String>,
}

/// Accept strings and numbers; `null`, empty text and the word "null" mean unknown
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null")))
}

impl VideoMetadata {
    pub fn is_empty(&self) -> bool {
        self.speaker.is_none() && self.series.is_none() && self.episode.is_none() && self.organization.is_none()
    }

    /// Write known fields, leaving the others untouched
    pub fn apply_to(&self, entry: &mut VideoEntry) {
        let fields = [
            (&self.speaker, &mut entry.speaker),
            (&self.series, &mut entry.series),
            (&self.episode, &mut entry.episode),
            (&self.organization, &mut entry.organization),
        ];
        for (value, target) in fields {
            if let Some(value) = value {
                *target = Some(value.clone());
            }
        }
    }
}

/// Text of the first segments, joined and truncated
pub fn transcript_opening(segments: &[Segment]) -> String {
    let joined = segments
        .iter()
        .take(OPENING_SEGMENTS)
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&joined, OPENING_CHARS)
}

pub fn default_metadata_prompt() -> &'static str {
    r#"Du analysierst ein deutsches christliches Lehrvideo.

Videotitel: {title}
Transcript-Anfang: {opening}

Bitte identifiziere:
1. Den Namen des Sprechers/Predigers (falls genannt oder erkennbar)
2. Den Namen der Sendungsreihe/Serie (falls erkennbar)
3. Die Episodennummer (falls vorhanden)
4. Den Namen der Gemeinde/Organisation (falls genannt)

Antworte NUR mit JSON, kein anderer Text:
{
  "speaker": "Name des Sprechers oder null",
  "series": "Name der Serie oder null",
  "episode": "Episodennummer oder null",
  "organization": "Gemeinde/Organisation oder null"
}

Falls du dir nicht sicher bist, setze null. Keine Vermutungen."#
}

pub struct MetadataExtractor {
    annotator: Annotator,
    template: String,
}

impl MetadataExtractor {
    pub fn new(annotator: Annotator, template: String) -> Self {
        Self { annotator, template }
    }

    pub async fn extract(&self, title: &str, opening: &str) -> Result<VideoMetadata, AnnotationError> {
        let prompt = self.template.replace("{title}", title).replace("{opening}", opening);
        self.annotator.annotate_as(&prompt).await
    }

    /// Identify every unique video once and patch all of its entries
    pub async fn enrich_database(&self, database: &mut Database, artifacts: &ArtifactStore) -> BatchReport {
        let mut report = BatchReport::new("metadata");
        let videos: Vec<(String, String)> = database
            .unique_videos()
            .into_iter()
            .map(|entry| (entry.video_id.clone(), entry.display_name().to_string()))
            .collect();

        info!("🎙️ Extracting metadata for {} unique videos", videos.len());

        let mut by_video: HashMap<String, VideoMetadata> = HashMap::new();
        for (video_id, title) in videos {
            report.total += 1;

            let opening = match artifacts.load_segments(&video_id, OPENING_PREFERENCE).await {
                Ok(segments) => transcript_opening(&segments),
                Err(e) => {
                    warn!("⚠️ {}: {:#}", video_id, e);
                    String::new()
                }
            };

            if opening.is_empty() {
                info!("  [{}] no transcript found, skipping", video_id);
                report.skipped += 1;
                continue;
            }

            match self.extract(&title, &opening).await {
                Ok(metadata) => {
                    info!(
                        "  [{}] speaker={:?}, series={:?}, org={:?}",
                        video_id, metadata.speaker, metadata.series, metadata.organization
                    );
                    by_video.insert(video_id, metadata);
                    report.successful += 1;
                }
                Err(e) => {
                    warn!("  [{}] metadata extraction failed: {}", video_id, e);
                    report.failed += 1;
                }
            }
        }

        let mut patched = 0;
        for entry in database.video_entries_mut() {
            if let Some(metadata) = by_video.get(&entry.video_id) {
                metadata.apply_to(entry);
                patched += 1;
            }
        }
        info!("✅ {} video entries updated", patched);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLLM;
    use crate::timestamp::ms_to_ts;
    use crate::transcript::VideoArtifact;
    use std::sync::Arc;

    #[test]
    fn test_opening_limits() {
        let segments: Vec<Segment> = (0..30)
            .map(|i| Segment::new(ms_to_ts(i * 1000), i * 1000, format!("s{}", i)))
            .collect();
        let opening = transcript_opening(&segments);
        assert!(opening.starts_with("s0 s1"));
        assert!(opening.ends_with("s19"));

        let long = vec![Segment::new("00:00:00", 0, "ö".repeat(1000))];
        assert_eq!(transcript_opening(&long).chars().count(), 600);
    }

    #[test]
    fn test_null_values_are_ignored() {
        let metadata: VideoMetadata =
            serde_json::from_str(r#"{"speaker": "Anna Beispiel", "series": null, "episode": 3, "organization": "null"}"#)
                .unwrap();

        let mut entry = VideoEntry::new("v", "v.mp4", "v", vec![]);
        entry.series = Some("Bestehend".to_string());
        metadata.apply_to(&mut entry);

        assert_eq!(entry.speaker.as_deref(), Some("Anna Beispiel"));
        assert_eq!(entry.series.as_deref(), Some("Bestehend"));
        assert_eq!(entry.episode.as_deref(), Some("3"));
        assert_eq!(entry.organization, None);
    }

    #[tokio::test]
    async fn test_videos_without_transcript_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        let mut parsed = VideoArtifact::default();
        parsed.study.segments = vec![Segment::new("00:00:01", 1000, "Willkommen bei Bibel TV, ich bin Anna.")];
        artifacts
            .save("mit", crate::artifacts::ArtifactStage::Parsed, &parsed)
            .await
            .unwrap();

        let mut db = Database::default();
        db.verses.all.insert(
            "Genesis 1:1".into(),
            vec![VideoEntry::new("mit", "mit.mp4", "mit", vec![]), VideoEntry::new("ohne", "ohne.mp4", "ohne", vec![])],
        );
        db.verses.all.insert("John 1:1".into(), vec![VideoEntry::new("mit", "mit.mp4", "mit", vec![])]);

        let mock = Arc::new(MockLLM::new([r#"{"speaker": "Anna", "series": null}"#]));
        let extractor = MetadataExtractor::new(Annotator::new(mock.clone()), default_metadata_prompt().to_string());
        let report = extractor.enrich_database(&mut db, &artifacts).await;

        assert_eq!(mock.prompt_count(), 1);
        assert_eq!(report.skipped, 1);
        let speakers: Vec<Option<&str>> = db.video_entries().map(|e| e.speaker.as_deref()).collect();
        assert_eq!(speakers, vec![Some("Anna"), None, Some("Anna")]);
    }
}
