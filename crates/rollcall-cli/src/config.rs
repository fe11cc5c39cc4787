use anyhow::{bail, Context, Result};
use rollcall_extract::MAX_THUMBNAIL_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which backing holds the enrolled embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    Sqlite,
    Files,
    Memory,
}

/// Which extractor turns input files into embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    Thumbnail,
    EmbeddingFile,
}

/// CLI configuration: optional TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreKind,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for one-file-per-student embeddings.
    pub embedding_dir: PathBuf,
    /// Maximum squared unit-sphere distance accepted as a match.
    pub match_threshold: f32,
    /// Per-image extraction timeout in seconds.
    pub extract_timeout_secs: u64,
    pub extractor: ExtractorKind,
    /// Side length of the thumbnail extractor's output.
    pub thumbnail_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            store: StoreKind::Sqlite,
            db_path: data_dir.join("faces.db"),
            embedding_dir: data_dir.join("embeddings"),
            match_threshold: 0.6,
            extract_timeout_secs: 10,
            extractor: ExtractorKind::Thumbnail,
            thumbnail_size: 64,
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

impl Config {
    /// Load from `path` (or `ROLLCALL_CONFIG`), then apply env overrides.
    ///
    /// Defaults are used only when no path is given; a named file that cannot
    /// be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config at {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("ROLLCALL_STORE") {
            self.store = parse_kind(&v, "ROLLCALL_STORE")?;
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_EMBEDDING_DIR") {
            self.embedding_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_EXTRACTOR") {
            self.extractor = parse_kind(&v, "ROLLCALL_EXTRACTOR")?;
        }
        self.match_threshold = env_or("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.extract_timeout_secs =
            env_or("ROLLCALL_EXTRACT_TIMEOUT_SECS", self.extract_timeout_secs);
        self.thumbnail_size = env_or("ROLLCALL_THUMBNAIL_SIZE", self.thumbnail_size);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            bail!("match_threshold must be a non-negative number, got {}", self.match_threshold);
        }
        if self.extract_timeout_secs == 0 {
            bail!("extract_timeout_secs must be at least 1");
        }
        if self.thumbnail_size == 0 || self.thumbnail_size > MAX_THUMBNAIL_SIZE {
            bail!(
                "thumbnail_size must be between 1 and {MAX_THUMBNAIL_SIZE}, got {}",
                self.thumbnail_size
            );
        }
        Ok(())
    }
}

fn parse_kind<T: for<'de> Deserialize<'de>>(value: &str, key: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_ascii_lowercase()))
        .with_context(|| format!("invalid {key}: {value}"))
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
