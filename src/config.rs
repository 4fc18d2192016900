use crate::llm::{LLMConfig, LLMProvider};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "study_bible_database.json";

/// Configuration for the study Bible builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input and output locations
    pub paths: PathsConfig,

    /// Regex extraction settings
    pub extraction: ExtractionConfig,

    /// Model provider used by every AI stage
    pub llm: LLMConfig,

    /// AI transcript parse
    pub sections: SectionConfig,

    /// Clip extraction
    pub clips: ClipConfig,

    /// Speaker and series extraction
    pub metadata: MetadataConfig,

    /// Verse commentary synthesis
    pub synthesis: SynthesisConfig,

    /// Program catalog lookups
    pub thumbnails: ThumbnailConfig,

    /// Prompt template overrides
    pub prompts: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory with `*.txt` transcripts and optional `*.json` sidecars
    pub transcript_dir: PathBuf,

    /// Directory for per-video artifacts
    pub data_dir: PathBuf,

    /// Database file; defaults to `study_bible_database.json` inside `data_dir`
    pub database: Option<PathBuf>,
}

impl PathsConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DATABASE_FILE))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Focus chapter label, matched as a prefix during extraction
    pub focus_chapter: String,

    /// German spelling of the focus chapter, also accepted during rebuild
    pub focus_alias: String,

    /// Additional `pattern -> label` rules
    pub rules_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Pause between chunk requests
    pub pause_ms: u64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Half-width of the transcript window sent per mention
    pub window_radius_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub max_tokens: u32,
    /// Summary generation for focus videos in enhanced extraction
    pub summary_max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub base_url: String,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the catalog key
    pub api_key_env: String,

    pub timeout_seconds: u64,
}

impl ThumbnailConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Directory containing prompt files
    pub prompt_dir: PathBuf,

    pub sections_file: String,
    pub clips_file: String,
    pub metadata_file: String,
    pub synthesis_file: String,
    pub summary_file: String,
}

impl PromptConfig {
    /// Load prompt content from a specific file
    pub async fn load_prompt(&self, filename: &str) -> Result<String> {
        let path = self.prompt_dir.join(filename);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) => Err(anyhow!("Failed to load prompt from {}: {}", path.display(), e)),
        }
    }

    /// Prompt file content, or the built-in template when the file is missing
    pub async fn load_or_default(&self, filename: &str, default: &str) -> String {
        let path = self.prompt_dir.join(filename);
        if !path.exists() {
            return default.to_string();
        }

        match self.load_prompt(filename).await {
            Ok(prompt) if !prompt.is_empty() => {
                tracing::debug!("📝 Using prompt override {}", path.display());
                prompt
            }
            Ok(_) => default.to_string(),
            Err(e) => {
                tracing::warn!("{}, using default prompt", e);
                default.to_string()
            }
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_paths = ["study-bible.toml", "config/study-bible.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.apply_env());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.apply_env())
    }

    /// Defaults with environment overrides
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().apply_env())
    }

    /// Apply `STUDY_BIBLE_*` environment overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(dir) = std::env::var("STUDY_BIBLE_TRANSCRIPT_DIR") {
            self.paths.transcript_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("STUDY_BIBLE_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }

        if let Ok(database) = std::env::var("STUDY_BIBLE_DATABASE") {
            self.paths.database = Some(PathBuf::from(database));
        }

        if let Ok(model) = std::env::var("STUDY_BIBLE_MODEL") {
            self.llm.model = model;
        }

        if let Ok(endpoint) = std::env::var("STUDY_BIBLE_LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }

        if let Ok(focus) = std::env::var("STUDY_BIBLE_FOCUS_CHAPTER") {
            self.extraction.focus_chapter = focus;
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.extraction.focus_chapter.trim().is_empty() {
            return Err(anyhow!("focus_chapter must not be empty"));
        }

        if self.sections.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than 0"));
        }

        if self.sections.chunk_overlap >= self.sections.chunk_size {
            return Err(anyhow!("chunk_overlap must be smaller than chunk_size"));
        }

        if self.clips.window_radius_ms == 0 {
            return Err(anyhow!("window_radius_ms must be greater than 0"));
        }

        if self.llm.timeout_seconds == 0 || self.thumbnails.timeout_seconds == 0 {
            return Err(anyhow!("timeouts must be greater than 0"));
        }

        if self.llm.provider == LLMProvider::LMStudio && self.llm.endpoint.is_none() {
            return Err(anyhow!("API endpoint required for LMStudio provider"));
        }

        url::Url::parse(&self.thumbnails.base_url)
            .with_context(|| format!("Invalid thumbnail base_url {}", self.thumbnails.base_url))?;

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Provider settings for the section parser
    pub fn section_llm(&self) -> LLMConfig {
        self.llm.with_model(&self.llm.model, self.sections.max_tokens)
    }

    pub fn clip_llm(&self) -> LLMConfig {
        self.llm.with_model(&self.clips.model, self.clips.max_tokens)
    }

    pub fn metadata_llm(&self) -> LLMConfig {
        self.llm.with_model(&self.metadata.model, self.metadata.max_tokens)
    }

    pub fn synthesis_llm(&self) -> LLMConfig {
        self.llm.with_model(&self.llm.model, self.synthesis.max_tokens)
    }

    pub fn summary_llm(&self) -> LLMConfig {
        self.llm.with_model(&self.llm.model, self.synthesis.summary_max_tokens)
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Study Bible Configuration:\n\
            - Transcripts: {}\n\
            - Data Directory: {}\n\
            - Database: {}\n\
            - Focus Chapter: {}\n\
            - LLM Provider: {:?} ({})\n\
            - Clip Model: {}\n\
            - Chunking: {} segments, {} overlap",
            self.paths.transcript_dir.display(),
            self.paths.data_dir.display(),
            self.paths.database_path().display(),
            self.extraction.focus_chapter,
            self.llm.provider,
            self.llm.model,
            self.clips.model,
            self.sections.chunk_size,
            self.sections.chunk_overlap
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            extraction: ExtractionConfig::default(),
            llm: LLMConfig::default(),
            sections: SectionConfig::default(),
            clips: ClipConfig::default(),
            metadata: MetadataConfig::default(),
            synthesis: SynthesisConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            prompts: PromptConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            transcript_dir: PathBuf::from("bibelthek_videos/transcripts"),
            data_dir: PathBuf::from("study_bible_data"),
            database: None,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            focus_chapter: "Genesis 1".to_string(),
            focus_alias: "1. Mose 1".to_string(),
            rules_file: None,
        }
    }
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 40,
            chunk_overlap: 5,
            pause_ms: 500,
            max_tokens: 4000,
        }
    }
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 300,
            window_radius_ms: 180_000,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5-20251001".to_string(),
            max_tokens: 200,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            summary_max_tokens: 1000,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            base_url: "https://bibelthek-backend.bibeltv.de/".to_string(),
            api_key: None,
            api_key_env: "BIBELTHEK_API_KEY".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            prompt_dir: PathBuf::from("prompts"),
            sections_file: "sections.txt".to_string(),
            clips_file: "clips.txt".to_string(),
            metadata_file: "metadata.txt".to_string(),
            synthesis_file: "synthesis.txt".to_string(),
            summary_file: "summary.txt".to_string(),
        }
    }
}

/// Configuration builder for programmatic use
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_transcript_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.transcript_dir = dir;
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.data_dir = dir;
        self
    }

    pub fn with_database(mut self, path: PathBuf) -> Self {
        self.config.paths.database = Some(path);
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.llm.api_key = Some(api_key);
        self
    }

    pub fn with_provider(mut self, provider: LLMProvider, endpoint: Option<String>) -> Self {
        self.config.llm.provider = provider;
        self.config.llm.endpoint = endpoint;
        self
    }

    pub fn with_focus_chapter(mut self, label: &str, alias: &str) -> Self {
        self.config.extraction.focus_chapter = label.to_string();
        self.config.extraction.focus_alias = alias.to_string();
        self
    }

    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize, pause_ms: u64) -> Self {
        self.config.sections.chunk_size = chunk_size;
        self.config.sections.chunk_overlap = overlap;
        self.config.sections.pause_ms = pause_ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.extraction.focus_chapter, "Genesis 1");
        assert_eq!(config.sections.chunk_size, 40);
        assert_eq!(config.clips.window_radius_ms, 180_000);
        assert_eq!(
            config.paths.database_path(),
            PathBuf::from("study_bible_data").join("study_bible_database.json")
        );
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_data_dir(PathBuf::from("/tmp/data"))
            .with_focus_chapter("Psalm 23", "Psalm 23")
            .with_chunking(20, 2, 0)
            .build();

        assert_eq!(config.paths.database_path(), PathBuf::from("/tmp/data/study_bible_database.json"));
        assert_eq!(config.extraction.focus_chapter, "Psalm 23");
        assert_eq!(config.sections.chunk_overlap, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let overlapping = ConfigBuilder::new().with_chunking(5, 5, 0).build();
        assert!(overlapping.validate().is_err());

        let local = ConfigBuilder::new().with_provider(LLMProvider::LMStudio, None).build();
        assert!(local.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("study-bible.toml");
        std::fs::write(&path, "[clips]\nmax_tokens = 500\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.clips.max_tokens, 500);
        assert_eq!(config.clips.model, "claude-haiku-4-5-20251001");
        assert_eq!(config.sections.chunk_size, 40);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = Config::default();
        config.llm.api_key = Some("geheim".to_string());
        config.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("geheim"));
        assert_eq!(Config::load_from(&path).unwrap().sections.pause_ms, 500);
    }

    #[tokio::test]
    async fn test_prompt_override_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let prompts = PromptConfig {
            prompt_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert_eq!(prompts.load_or_default("clips.txt", "standard").await, "standard");

        std::fs::write(dir.path().join("clips.txt"), "eigener Prompt\n").unwrap();
        assert_eq!(prompts.load_or_default("clips.txt", "standard").await, "eigener Prompt");
    }
}
