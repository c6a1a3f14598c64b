//! Runtime settings
//!
//! Settings come from a TOML file, from `-key:value` command line arguments,
//! or from defaults. Name and group filters are stored trimmed and lowercased.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// File name of the source catalog inside the source directory
pub const SOURCE_CATALOG_FILE: &str = "source.json";

/// Settings of a runtime invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Directory holding `source.json`
    pub source_directory: PathBuf,
    /// Directory for resume files and per-group log files
    pub log_directory: PathBuf,
    pub no_log_to_file: bool,
    /// Skip tables listed in the resume files of a previous run
    pub resume: bool,
    /// Run connection groups concurrently
    pub parallel: bool,
    pub force: bool,
    pub silent: bool,
    pub only_schema_mode: bool,
    pub check_count_mode: bool,
    /// Overrides the model and adapter page sizes when greater than zero
    pub page_size: usize,
    pub consistency_page_size: usize,
    pub avoid_consistency_correction: bool,
    /// Runs marked in progress for longer than this are considered interrupted
    pub interrupt_after_hours: u32,
    /// Flush tables whose last two runs failed
    pub auto_fix_tables_in_error_state: bool,
    pub azure_dwh: bool,
    pub names: Vec<String>,
    pub groups: Vec<String>,
    pub exclude_names: Vec<String>,
    pub exclude_groups: Vec<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            source_directory: PathBuf::from("."),
            log_directory: PathBuf::from("."),
            no_log_to_file: false,
            resume: false,
            parallel: false,
            force: false,
            silent: false,
            only_schema_mode: false,
            check_count_mode: false,
            page_size: 0,
            consistency_page_size: 0,
            avoid_consistency_correction: false,
            interrupt_after_hours: 12,
            auto_fix_tables_in_error_state: false,
            azure_dwh: false,
            names: Vec::new(),
            groups: Vec::new(),
            exclude_names: Vec::new(),
            exclude_groups: Vec::new(),
        }
    }
}

impl RuntimeSettings {
    /// Create settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML
    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings.normalized())
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse `-key:value` arguments and presence flags
    ///
    /// Keys are matched case-insensitively. Unknown arguments are an error.
    pub fn from_args<I, S>(args: I) -> SyncResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut settings = Self::default();
        for arg in args {
            let arg = arg.as_ref().trim();
            let Some(arg) = arg.strip_prefix('-') else {
                return Err(SyncError::config(format!("Unexpected argument: {arg}")));
            };
            let (key, value) = match arg.split_once(':') {
                Some((k, v)) => (k.to_lowercase(), v.trim()),
                None => (arg.to_lowercase(), ""),
            };
            match key.as_str() {
                "name" => settings.names = filter_list(value),
                "group" => settings.groups = filter_list(value),
                "excludename" => settings.exclude_names = filter_list(value),
                "excludegroup" => settings.exclude_groups = filter_list(value),
                "sourcefiledirectory" => settings.source_directory = PathBuf::from(value),
                "logdirectory" => settings.log_directory = PathBuf::from(value),
                "pagesize" => settings.page_size = parse_number(&key, value)?,
                "consistencyfixpagesize" => settings.consistency_page_size = parse_number(&key, value)?,
                "interruptafterhours" => settings.interrupt_after_hours = parse_number(&key, value)?,
                "force" => settings.force = true,
                "silent" => settings.silent = true,
                "onlyschemamode" => settings.only_schema_mode = true,
                "checkcountmode" => settings.check_count_mode = true,
                "resume" => settings.resume = true,
                "nologtofile" => settings.no_log_to_file = true,
                "parallel" => settings.parallel = true,
                "azuredwh" => settings.azure_dwh = true,
                "avoidconsistencycorrection" => settings.avoid_consistency_correction = true,
                "autofixtablesinerrorstate" => settings.auto_fix_tables_in_error_state = true,
                _ => return Err(SyncError::config(format!("Unknown argument: -{key}"))),
            }
        }
        Ok(settings)
    }

    pub fn with_source_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_directory = dir.into();
        self
    }

    pub fn with_log_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_directory = dir.into();
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_names(mut self, names: &str) -> Self {
        self.names = filter_list(names);
        self
    }

    pub fn with_groups(mut self, groups: &str) -> Self {
        self.groups = filter_list(groups);
        self
    }

    pub fn with_exclude_names(mut self, names: &str) -> Self {
        self.exclude_names = filter_list(names);
        self
    }

    pub fn with_exclude_groups(mut self, groups: &str) -> Self {
        self.exclude_groups = filter_list(groups);
        self
    }

    /// Path of the source catalog
    pub fn catalog_path(&self) -> PathBuf {
        self.source_directory.join(SOURCE_CATALOG_FILE)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), String> {
        if self.only_schema_mode && self.check_count_mode {
            return Err("onlyschemamode and checkcountmode cannot be combined".to_string());
        }
        if self.source_directory.as_os_str().is_empty() {
            return Err("Source directory must not be empty".to_string());
        }
        Ok(())
    }

    fn normalized(mut self) -> Self {
        for list in [
            &mut self.names,
            &mut self.groups,
            &mut self.exclude_names,
            &mut self.exclude_groups,
        ] {
            *list = list
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self
    }
}

/// Split a comma separated filter into trimmed lowercase entries
pub fn filter_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> SyncResult<T> {
    value
        .parse()
        .map_err(|_| SyncError::config(format!("-{key} expects a number, got '{value}'")))
}
