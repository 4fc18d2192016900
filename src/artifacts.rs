//! Per-video intermediate files and their naming convention

use crate::transcript::{Segment, VideoArtifact};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Pipeline stage that produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactStage {
    /// Regex extraction (`_study_data.json`)
    StudyData,
    /// Legacy enhanced extraction (`_enhanced.json`)
    Enhanced,
    /// AI section parse (`_parsed.json`)
    Parsed,
}

impl ArtifactStage {
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactStage::StudyData => "_study_data.json",
            ArtifactStage::Enhanced => "_enhanced.json",
            ArtifactStage::Parsed => "_parsed.json",
        }
    }

    pub fn file_name(&self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }

    /// Base name of an artifact file of this stage
    pub fn base_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        file_name.strip_suffix(self.suffix()).filter(|base| !base.is_empty())
    }
}

/// Latest stage first, for segment lookups
pub const SEGMENT_PREFERENCE: &[ArtifactStage] = &[ArtifactStage::Parsed, ArtifactStage::StudyData];

/// Latest stage first, for transcript openings
pub const OPENING_PREFERENCE: &[ArtifactStage] =
    &[ArtifactStage::Parsed, ArtifactStage::Enhanced, ArtifactStage::StudyData];

/// Artifact files of one data directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, base: &str, stage: ArtifactStage) -> PathBuf {
        self.data_dir.join(stage.file_name(base))
    }

    pub fn exists(&self, base: &str, stage: ArtifactStage) -> bool {
        self.path_for(base, stage).is_file()
    }

    /// Base names of all artifacts of `stage`, sorted by file name
    pub fn base_names(&self, stage: ArtifactStage) -> Result<Vec<String>> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&self.data_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("Failed to scan {}", self.data_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(base) = entry.file_name().to_str().and_then(|name| stage.base_name(name)) {
                names.push(base.to_string());
            }
        }

        Ok(names)
    }

    pub async fn load(&self, base: &str, stage: ArtifactStage) -> Result<VideoArtifact> {
        let path = self.path_for(base, stage);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", path.display()))?;

        serde_json::from_str(&content).with_context(|| format!("Failed to parse artifact: {}", path.display()))
    }

    /// Every artifact of `stage` in file name order; unreadable files are skipped
    pub async fn load_stage(&self, stage: ArtifactStage) -> Result<Vec<(String, VideoArtifact)>> {
        let mut artifacts = Vec::new();

        for base in self.base_names(stage)? {
            match self.load(&base, stage).await {
                Ok(artifact) => artifacts.push((base, artifact)),
                Err(e) => warn!("⚠️ Skipping {}: {:#}", stage.file_name(&base), e),
            }
        }

        debug!("Loaded {} {:?} artifacts", artifacts.len(), stage);
        Ok(artifacts)
    }

    pub async fn save(&self, base: &str, stage: ArtifactStage, artifact: &VideoArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;

        let path = self.path_for(base, stage);
        let json = serde_json::to_string_pretty(artifact)?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write artifact: {}", path.display()))?;

        Ok(path)
    }

    /// First artifact of `preference` that exists for `base`
    pub async fn load_preferred(&self, base: &str, preference: &[ArtifactStage]) -> Result<Option<VideoArtifact>> {
        for stage in preference {
            if self.exists(base, *stage) {
                return self.load(base, *stage).await.map(Some);
            }
        }
        Ok(None)
    }

    /// Segments from the latest available artifact; empty when there is none
    pub async fn load_segments(&self, base: &str, preference: &[ArtifactStage]) -> Result<Vec<Segment>> {
        Ok(self
            .load_preferred(base, preference)
            .await?
            .map(|artifact| artifact.study.segments)
            .unwrap_or_default())
    }
}

/// Transcript files (`*.txt`) directly inside `dir`, sorted by file name
pub fn discover_transcripts(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("Transcript directory does not exist: {}", dir.display()));
    }

    let mut transcripts = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().map_or(false, |ext| ext == "txt") {
            transcripts.push(path.to_path_buf());
        }
    }

    Ok(transcripts)
}
