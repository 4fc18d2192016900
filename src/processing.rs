use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifacts::{discover_transcripts, ArtifactStage, ArtifactStore};
use crate::config::Config;
use crate::database::{Database, DatabaseStore};
use crate::enrich::clips::default_clip_prompt;
use crate::enrich::metadata::default_metadata_prompt;
use crate::enrich::sections::default_sections_prompt;
use crate::enrich::{thumbnails, ClipExtractor, MetadataExtractor, SectionParser, ThumbnailFetcher};
use crate::index::{build_database, rebuild_verse_indices, FocusFilter};
use crate::llm::Annotator;
use crate::reference::ReferenceMatcher;
use crate::synthesis::{default_synthesis_prompt, synthesis_sources, CommentarySynthesizer};
use crate::transcript::{truncate_chars, TranscriptSegmenter, VideoArtifact, VideoStudyData};

const SUMMARY_TRANSCRIPT_CHARS: usize = 12_000;

/// Outcome tally of one batch stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub stage: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn log_summary(&self) {
        info!(
            "📊 {}: {} total, {} successful, {} failed, {} skipped",
            self.stage, self.total, self.successful, self.failed, self.skipped
        );
    }
}

/// Regex-only extraction, or regex plus model summaries for focus videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExtractionMode {
    #[default]
    Basic,
    Enhanced,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    #[serde(default)]
    summary: Option<String>,
}

pub fn default_summary_prompt() -> &'static str {
    r##"Du analysierst ein deutsches christliches Lehrvideo.

VIDEO: {title}

TRANSKRIPT:
{transcript}

Fasse die Lehre des Sprechers in 3-5 Sätzen zusammen. Beginne mit einer Überschrift in der Form "# Titel".
Verwende nur, was tatsächlich im Transkript steht.

Antworte NUR mit gültigem JSON:
{
  "summary": "# Titel\nZusammenfassung"
}"##
}

/// Runs the batch stages against one data directory and database
pub struct Pipeline {
    config: Config,
    artifacts: ArtifactStore,
    store: DatabaseStore,
    focus: FocusFilter,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let artifacts = ArtifactStore::new(&config.paths.data_dir);
        let store = DatabaseStore::new(config.paths.database_path());
        let focus = FocusFilter::new(&config.extraction.focus_chapter, &config.extraction.focus_alias);

        Self {
            config,
            artifacts,
            store,
            focus,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn store(&self) -> &DatabaseStore {
        &self.store
    }

    async fn matcher(&self) -> Result<ReferenceMatcher> {
        match &self.config.extraction.rules_file {
            Some(path) if path.exists() => ReferenceMatcher::from_file(path).await,
            Some(path) => {
                warn!("Rules file not found: {}, using built-in tables", path.display());
                ReferenceMatcher::new()
            }
            None => ReferenceMatcher::new(),
        }
    }

    pub async fn section_parser(&self, annotator: Annotator) -> SectionParser {
        let prompts = &self.config.prompts;
        let template = prompts.load_or_default(&prompts.sections_file, default_sections_prompt()).await;
        SectionParser::new(annotator, template)
            .with_chunking(self.config.sections.chunk_size, self.config.sections.chunk_overlap)
            .with_pause(Duration::from_millis(self.config.sections.pause_ms))
    }

    pub async fn clip_extractor(&self, annotator: Annotator) -> ClipExtractor {
        let prompts = &self.config.prompts;
        let template = prompts.load_or_default(&prompts.clips_file, default_clip_prompt()).await;
        ClipExtractor::new(annotator, template).with_radius(self.config.clips.window_radius_ms)
    }

    pub async fn metadata_extractor(&self, annotator: Annotator) -> MetadataExtractor {
        let prompts = &self.config.prompts;
        let template = prompts.load_or_default(&prompts.metadata_file, default_metadata_prompt()).await;
        MetadataExtractor::new(annotator, template)
    }

    pub async fn synthesizer(&self, annotator: Annotator) -> CommentarySynthesizer {
        let prompts = &self.config.prompts;
        let template = prompts.load_or_default(&prompts.synthesis_file, default_synthesis_prompt()).await;
        CommentarySynthesizer::new(annotator, template)
    }

    /// Segment every transcript, write study data artifacts and rebuild the database indices.
    ///
    /// In enhanced mode, focus videos additionally get an `_enhanced` artifact
    /// carrying a model summary; those videos are the targets of the section parse.
    pub async fn extract(&self, mode: ExtractionMode, summarizer: Option<&Annotator>) -> Result<BatchReport> {
        let mut report = BatchReport::new("extract");
        let segmenter = TranscriptSegmenter::new(self.matcher().await?)?;
        let transcripts = discover_transcripts(&self.config.paths.transcript_dir)?;

        info!("🔍 Processing {} transcripts in {:?} mode", transcripts.len(), mode);

        let summary_template = match (mode, summarizer) {
            (ExtractionMode::Enhanced, Some(_)) => {
                let prompts = &self.config.prompts;
                Some(prompts.load_or_default(&prompts.summary_file, default_summary_prompt()).await)
            }
            (ExtractionMode::Enhanced, None) => {
                warn!("⚠️ Enhanced mode without a model, writing enhanced artifacts without summaries");
                None
            }
            (ExtractionMode::Basic, _) => None,
        };

        let mut videos = Vec::new();
        for transcript in &transcripts {
            report.total += 1;
            info!("📹 Processing {}", transcript.display());

            let video = match segmenter.process_file(transcript).await {
                Ok(video) => video,
                Err(e) => {
                    warn!("❌ Failed to process {}: {:#}", transcript.display(), e);
                    report.failed += 1;
                    continue;
                }
            };

            let artifact = VideoArtifact::from(video.clone());
            self.artifacts
                .save(&video.video_id, ArtifactStage::StudyData, &artifact)
                .await?;

            if mode == ExtractionMode::Enhanced && self.is_focus_video(&video) {
                let ai_summary = match (summarizer, &summary_template) {
                    (Some(annotator), Some(template)) => self.summarize(annotator, template, &video).await,
                    _ => None,
                };

                let enhanced = VideoArtifact { ai_summary, ..artifact };
                self.artifacts
                    .save(&video.video_id, ArtifactStage::Enhanced, &enhanced)
                    .await?;
            }

            report.successful += 1;
            videos.push(video);
        }

        let generated_at = chrono::Utc::now().to_rfc3339();
        let fresh = build_database(&videos, &self.focus, &generated_at);

        let mut database = self.store.load_or_default().await?;
        merge_extraction(&mut database, fresh);
        self.store.save(&database).await?;

        log_extraction_summary(&database);
        Ok(report)
    }

    fn is_focus_video(&self, video: &VideoStudyData) -> bool {
        video.verse_mentions.keys().any(|r| self.focus.matches_prefix(r))
    }

    async fn summarize(&self, annotator: &Annotator, template: &str, video: &VideoStudyData) -> Option<String> {
        let transcript = video
            .segments
            .iter()
            .map(|s| format!("[{}] {}", s.start, s.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = template
            .replace("{title}", &video.title)
            .replace("{transcript}", &truncate_chars(&transcript, SUMMARY_TRANSCRIPT_CHARS));

        match annotator.annotate_as::<SummaryReply>(&prompt).await {
            Ok(reply) => reply.summary.filter(|s| !s.trim().is_empty()),
            Err(e) => {
                warn!("  ⚠️ Summary for {} failed: {}", video.video_id, e);
                None
            }
        }
    }

    /// AI-parse study data of videos that have an enhanced artifact and no parse yet
    pub async fn parse_sections(&self, parser: &SectionParser) -> Result<BatchReport> {
        let mut report = BatchReport::new("parse");

        let enhanced: HashSet<String> = self.artifacts.base_names(ArtifactStage::Enhanced)?.into_iter().collect();
        let parsed: HashSet<String> = self.artifacts.base_names(ArtifactStage::Parsed)?.into_iter().collect();

        let targets: Vec<String> = self
            .artifacts
            .base_names(ArtifactStage::StudyData)?
            .into_iter()
            .filter(|base| enhanced.contains(base) && !parsed.contains(base))
            .collect();

        if targets.is_empty() {
            info!("✅ All {} focus videos already parsed", parsed.len());
            return Ok(report);
        }

        info!("🤖 AI transcript parsing for {} videos", targets.len());

        for base in targets {
            report.total += 1;

            let study = match self.artifacts.load(&base, ArtifactStage::StudyData).await {
                Ok(artifact) => artifact.study,
                Err(e) => {
                    warn!("❌ {:#}", e);
                    report.failed += 1;
                    continue;
                }
            };

            info!("📹 {}", truncate_chars(&study.title, 60));
            let parsed = parser.parse_video(&study).await;
            let path = self.artifacts.save(&base, ArtifactStage::Parsed, &parsed).await?;
            debug!("💾 Saved {}", path.display());
            report.successful += 1;
        }

        Ok(report)
    }

    /// Replace both verse indices with entries built from parsed artifacts
    pub async fn rebuild(&self) -> Result<Database> {
        let parsed = self.artifacts.load_stage(ArtifactStage::Parsed).await?;
        let enhanced = self.artifacts.load_stage(ArtifactStage::Enhanced).await?;
        info!(
            "🔄 Rebuilding from {} parsed and {} enhanced artifacts",
            parsed.len(),
            enhanced.len()
        );

        let mut database = self.store.load_or_default().await?;
        database.verses = rebuild_verse_indices(&parsed, &enhanced, &self.focus);
        database.metadata.focus_verses = Some(database.verses.focus.len());
        database.metadata.total_verse_refs = Some(database.verses.all.len());
        if database.metadata.focus_chapter.is_empty() {
            database.metadata.focus_chapter = self.focus.label().to_string();
        }

        self.store.save(&database).await?;
        info!(
            "✅ Database rebuilt: {} {} verses, {} total verse refs",
            database.verses.focus.len(),
            self.focus.label(),
            database.verses.all.len()
        );

        Ok(database)
    }

    /// Synthesize commentary for eligible focus verses; replaces all stored commentaries
    pub async fn synthesize(&self, synthesizer: &CommentarySynthesizer) -> Result<BatchReport> {
        let mut database = self.load_database().await?;

        let parsed = self.artifacts.load_stage(ArtifactStage::Parsed).await?;
        let enhanced = self.artifacts.load_stage(ArtifactStage::Enhanced).await?;
        let parsed_count = parsed.len();
        let sources = synthesis_sources(
            parsed.into_iter().map(|(_, artifact)| artifact).collect(),
            enhanced.into_iter().map(|(_, artifact)| artifact).collect(),
        );
        info!(
            "📚 Loaded {} videos ({} AI-parsed, {} legacy)",
            sources.len(),
            parsed_count,
            sources.len() - parsed_count
        );

        let (commentaries, report) = synthesizer.synthesize_all(&database, &sources).await;
        info!("✅ Synthesized commentary for {} verses", commentaries.len());

        database.verse_commentaries = commentaries;
        self.store.save(&database).await?;
        Ok(report)
    }

    pub async fn extract_clips(&self, extractor: &ClipExtractor) -> Result<BatchReport> {
        let mut database = self.load_database().await?;
        let report = extractor.enrich_database(&mut database, &self.artifacts).await;
        self.store.save(&database).await?;
        info!(
            "✅ {}/{} mentions enriched ({} already had clips)",
            report.successful, report.total, report.skipped
        );
        Ok(report)
    }

    pub async fn extract_metadata(&self, extractor: &MetadataExtractor) -> Result<BatchReport> {
        let mut database = self.load_database().await?;
        let report = extractor.enrich_database(&mut database, &self.artifacts).await;
        self.store.save(&database).await?;
        Ok(report)
    }

    pub async fn fetch_thumbnails(&self, fetcher: &ThumbnailFetcher) -> Result<BatchReport> {
        let mut database = self.load_database().await?;
        let (found, total, patched) = thumbnails::fetch_thumbnails(fetcher, &mut database).await;
        self.store.save(&database).await?;

        info!("✅ {}/{} thumbnails found, {} video entries patched", found, total, patched);
        Ok(BatchReport {
            stage: "thumbnails".to_string(),
            total,
            successful: found,
            failed: total - found,
            skipped: 0,
        })
    }

    /// Invariant violations of the stored database
    pub async fn check(&self) -> Result<Vec<String>> {
        Ok(self.load_database().await?.check_invariants())
    }

    async fn load_database(&self) -> Result<Database> {
        self.store.load().await.with_context(|| {
            format!(
                "No usable database at {} (run `extract` first)",
                self.store.path().display()
            )
        })
    }
}

/// Take fresh indices from an extraction run, keeping commentaries and foreign keys
fn merge_extraction(database: &mut Database, fresh: Database) {
    let extra = std::mem::take(&mut database.metadata.extra);
    database.metadata = fresh.metadata;
    database.metadata.extra = extra;
    database.verses = fresh.verses;
    database.cross_references = fresh.cross_references;
    database.topics = fresh.topics;
    database.videos = fresh.videos;
}

fn log_extraction_summary(database: &Database) {
    let metadata = &database.metadata;
    info!("📊 Summary:");
    info!("  Total videos: {}", metadata.total_videos);
    info!("  Videos mentioning {}: {}", metadata.focus_chapter, metadata.focus_videos);
    info!("  Total verse references: {}", database.verses.all.len());
    info!("  {} verse references: {}", metadata.focus_chapter, database.verses.focus.len());
    info!("  Topics identified: {}", database.topics.len());

    for (verse_ref, videos) in database.verses.focus.iter().take(5) {
        debug!("  {}: {} video(s)", verse_ref, videos.len());
    }

    let mut topic_counts: Vec<(&String, usize)> = database
        .topics
        .iter()
        .map(|(topic, entries)| (topic, entries.iter().map(|e| e.occurrences).sum()))
        .collect();
    topic_counts.sort_by(|a, b| b.1.cmp(&a.1));
    for (topic, count) in topic_counts.into_iter().take(10) {
        debug!("  🎯 {}: {} occurrences", topic, count);
    }
}
