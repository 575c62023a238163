//! Run configuration: defaults, JSON loading, validation.
//!
//! Every field is optional in the file; missing keys take the documented
//! defaults so a minimal `{}` config is valid. CLI flags layer on top of
//! the loaded file in `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default root for packaged books.
pub const DEFAULT_BASE_DIRECTORY: &str = "books_by_skills";

/// Default root for per-topic manifest files.
pub const DEFAULT_BOOK_IDS_DIRECTORY: &str = "book_ids";

/// Default progress file path.
pub const DEFAULT_PROGRESS_FILE: &str = "output/skillshelf_progress.json";

/// Search API dialect selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// Authenticated search, 1-indexed pages, ~15 results per page.
    V1,
    /// Unauthenticated search, 0-indexed pages, up to 100 results per page.
    #[default]
    V2,
}

/// Which e-book files a build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpubFormat {
    /// Standard profile only (compatibility alias).
    Legacy,
    /// Standard profile only.
    Enhanced,
    /// Reader-optimized profile only.
    Kindle,
    /// Both profiles in the same output folder.
    #[default]
    Dual,
}

/// A single build variant of the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpubProfile {
    Standard,
    ReaderOptimized,
}

impl EpubFormat {
    /// The profiles this format produces, in build order.
    #[must_use]
    pub fn profiles(self) -> &'static [EpubProfile] {
        match self {
            Self::Legacy | Self::Enhanced => &[EpubProfile::Standard],
            Self::Kindle => &[EpubProfile::ReaderOptimized],
            Self::Dual => &[EpubProfile::Standard, EpubProfile::ReaderOptimized],
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected schema.
    #[error("config file {path} is not valid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A field value is outside its allowed range.
    #[error("invalid config value for `{field}`: {detail}")]
    Invalid { field: &'static str, detail: String },
}

/// Run configuration consumed by the job controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output root for packaged books.
    pub base_directory: PathBuf,
    /// Output root for per-topic manifest files.
    pub book_ids_directory: PathBuf,
    /// Which search dialect discovery uses.
    pub discovery_api_version: ApiVersion,
    /// Per-topic cap on accepted books (unlimited when absent).
    pub max_books_per_skill: Option<u64>,
    /// Hard cap on search pages per topic.
    pub max_pages_per_skill: usize,
    /// Seconds between discovery requests.
    pub discovery_delay: f64,
    /// Seconds between book downloads.
    pub download_delay: f64,
    /// Seconds between new book sessions.
    pub session_reuse_delay: f64,
    /// Which e-book files to build.
    pub epub_format: EpubFormat,
    /// Honor an existing progress file.
    pub resume: bool,
    /// Ignore the on-disk existence check and re-download everything.
    pub force_redownload: bool,
    /// Persist the cookie jar every N successful book downloads.
    pub token_save_interval: u32,
    /// Progress file path.
    pub progress_file: PathBuf,
    /// Requested pipeline concurrency. Anything above 1 is refused at
    /// runtime because the provider rotates the auth token per response.
    pub concurrency: usize,
    /// Provider base URL (overridable for testing).
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from(DEFAULT_BASE_DIRECTORY),
            book_ids_directory: PathBuf::from(DEFAULT_BOOK_IDS_DIRECTORY),
            discovery_api_version: ApiVersion::V2,
            max_books_per_skill: None,
            max_pages_per_skill: 100,
            discovery_delay: 1.5,
            download_delay: 10.0,
            session_reuse_delay: 2.0,
            epub_format: EpubFormat::Dual,
            resume: true,
            force_redownload: false,
            token_save_interval: 5,
            progress_file: PathBuf::from(DEFAULT_PROGRESS_FILE),
            concurrency: 1,
            base_url: "https://learning.oreilly.com".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read,
    /// [`ConfigError::Format`] when it fails to parse, and
    /// [`ConfigError::Invalid`] when a value is out of range.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "concurrency",
                detail: "must be at least 1".to_string(),
            });
        }
        if self.max_pages_per_skill == 0 {
            return Err(ConfigError::Invalid {
                field: "max_pages_per_skill",
                detail: "must be at least 1".to_string(),
            });
        }
        if self.token_save_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "token_save_interval",
                detail: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("discovery_delay", self.discovery_delay),
            ("download_delay", self.download_delay),
            ("session_reuse_delay", self.session_reuse_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    detail: format!("{value} is not a non-negative number of seconds"),
                });
            }
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "base_url",
                detail: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Discovery inter-request delay as a [`Duration`].
    #[must_use]
    pub fn discovery_delay(&self) -> Duration {
        Duration::from_secs_f64(self.discovery_delay)
    }

    /// Book-boundary delay as a [`Duration`].
    #[must_use]
    pub fn download_delay(&self) -> Duration {
        Duration::from_secs_f64(self.download_delay)
    }

    /// Session-reuse delay as a [`Duration`].
    #[must_use]
    pub fn session_reuse_delay(&self) -> Duration {
        Duration::from_secs_f64(self.session_reuse_delay)
    }
}
