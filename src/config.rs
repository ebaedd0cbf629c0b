//! Configuration loading and scan filtering.
//!
//! Configuration lives in a TOML file with four sections:
//! - `[filters]`: which files a tree scan may return (hidden files, exact
//!   names, extensions, glob patterns, regexes, and include overrides)
//! - `[ledger]`: where the operation ledger is stored
//! - `[sidecars]`: media extensions and fuzzy-matching knobs for sidecar
//!   reconstruction
//! - `[datestamp]`: location of the external date-stamping tool
//!
//! # Configuration File Format
//!
//! ```toml
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["Thumbs.db"]
//! patterns = ["node_modules/**"]
//! extensions = ["tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//!
//! [ledger]
//! file_name = ".dirward_ledger.json"
//!
//! [sidecars]
//! similarity_threshold = 0.70
//! noise_words = ["ha editado", "ha_editado", "edited", "effects"]
//! sniff_content = false
//!
//! [datestamp]
//! exiftool_path = "/usr/local/bin/exiftool"
//! ```

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors that can occur during configuration loading and filtering.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// A numeric setting is outside its allowed range.
    InvalidSetting(String),
    /// IO error while reading configuration.
    IoError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::InvalidGlobPattern(pattern) => {
                write!(
                    f,
                    "Invalid glob pattern '{}': expected *.ext or dir/**",
                    pattern
                )
            }
            ConfigError::InvalidRegexPattern { pattern, reason } => {
                write!(f, "Invalid regex pattern '{}': {}", pattern, reason)
            }
            ConfigError::InvalidSetting(msg) => write!(f, "Invalid setting: {}", msg),
            ConfigError::IoError(msg) => write!(f, "IO error reading configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub filters: FilterRules,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub sidecars: SidecarSettings,
    #[serde(default)]
    pub datestamp: DatestampSettings,
}

/// Rules deciding which files a tree scan returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

/// Helper function for default value of `enable_hidden_files`.
fn default_enable_hidden_files() -> bool {
    false
}

/// Rules for excluding files from a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., ".DS_Store", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude, matched against the path relative to the root.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "bak", "tmp", "log").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns to exclude, matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Where the ledger lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Ledger file name, relative to the processing root unless absolute.
    #[serde(default = "default_ledger_file_name")]
    pub file_name: String,
}

fn default_ledger_file_name() -> String {
    ".dirward_ledger.json".to_string()
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            file_name: default_ledger_file_name(),
        }
    }
}

impl LedgerSettings {
    /// Resolves the ledger path for a processing root.
    pub fn path_for(&self, root: &Path) -> PathBuf {
        let configured = Path::new(&self.file_name);
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            root.join(configured)
        }
    }
}

/// Knobs for sidecar reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarSettings {
    /// Extensions (without dot, any case) treated as media files.
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,

    /// Minimum similarity for a fuzzy sidecar match to be accepted.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Substrings removed from names before fuzzy comparison.
    #[serde(default = "default_noise_words")]
    pub noise_words: Vec<String>,

    /// Detect media by content when the extension is not recognised.
    #[serde(default)]
    pub sniff_content: bool,
}

fn default_media_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "webp", "gif", "heic", "mp4", "mov", "m4v", "avi", "mts", "mkv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_similarity_threshold() -> f64 {
    0.70
}

fn default_noise_words() -> Vec<String> {
    ["ha editado", "ha_editado", "edited", "effects"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            media_extensions: default_media_extensions(),
            similarity_threshold: default_similarity_threshold(),
            noise_words: default_noise_words(),
            sniff_content: false,
        }
    }
}

/// Settings for the external date-stamping tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatestampSettings {
    /// Explicit path to `exiftool`. When unset, the binary next to the
    /// running executable is tried, then `exiftool` on `PATH`.
    #[serde(default)]
    pub exiftool_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.dirwardrc.toml` in the current directory
    /// 3. Look for `~/.config/dirward/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".dirwardrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("dirward")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.sidecars.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidSetting(format!(
                "sidecars.similarity_threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        if self.ledger.file_name.trim().is_empty() {
            return Err(ConfigError::InvalidSetting(
                "ledger.file_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Compile the filter rules into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self.filters.clone())
    }
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// All glob and regex patterns are parsed once here instead of on every file.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl Default for CompiledFilters {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Filters that let every file through, hidden ones included.
    pub fn permissive() -> Self {
        Self {
            enable_hidden_files: true,
            ..Self::default()
        }
    }

    /// Check if a file should be part of a scan.
    ///
    /// `relative_path` is the file's path relative to the processing root.
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, relative_path: &Path) -> bool {
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.matches_any(&self.include_patterns, relative_path) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = relative_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.matches_any(&self.exclude_patterns, relative_path) {
            return false;
        }

        if self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
        {
            return false;
        }

        true
    }

    fn matches_any(&self, patterns: &[Pattern], path: &Path) -> bool {
        patterns.iter().any(|pattern| pattern.matches_path(path))
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}
