//! Source catalog and resume files
//!
//! The catalog is the `source.json` array of [`ImportModel`]s. Loading it
//! orders the models (smallest expected size first, dimensions before facts),
//! applies the name and group filters, groups by connection and drops the
//! tables a previous interrupted run already finished.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::settings::RuntimeSettings;
use crate::error::{SyncError, SyncResult};
use crate::models::ImportModel;

/// Tables of one connection, run in catalog order
#[derive(Debug, Clone, PartialEq)]
pub struct ImportGroup {
    /// Trimmed, lowercased connection
    pub key: String,
    pub models: Vec<ImportModel>,
    /// Resume file of this group
    pub resume_file: PathBuf,
}

/// Loaded and filtered source catalog
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    groups: Vec<ImportGroup>,
}

impl SourceCatalog {
    /// Read the catalog named by the settings
    pub fn load(settings: &RuntimeSettings) -> SyncResult<Self> {
        let path = settings.catalog_path();
        if !path.exists() {
            return Err(SyncError::Runtime(format!(
                "Source catalog not found: {}",
                path.display()
            )));
        }
        let json = fs::read_to_string(&path)?;
        let models: Vec<ImportModel> = serde_json::from_str(&json)?;
        info!(path = %path.display(), models = models.len(), "source catalog loaded");
        Self::from_models(models, settings)
    }

    /// Build the catalog from models already in memory
    ///
    /// Without `resume` the existing resume files are deleted; with it the
    /// tables they list are skipped.
    pub fn from_models(mut models: Vec<ImportModel>, settings: &RuntimeSettings) -> SyncResult<Self> {
        models.sort_by(|a, b| {
            b.expected_size
                .code()
                .cmp(&a.expected_size.code())
                .then(b.table_type.code().cmp(&a.table_type.code()))
        });

        let mut groups: Vec<ImportGroup> = Vec::new();
        for model in models.into_iter().filter(|m| selected(m, settings)) {
            let key = model.group_key();
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => group.models.push(model),
                None => groups.push(ImportGroup {
                    resume_file: resume_file_path(&settings.log_directory, &key),
                    key,
                    models: vec![model],
                }),
            }
        }

        for group in &mut groups {
            if settings.resume {
                let done = read_resume_file(&group.resume_file)?;
                let before = group.models.len();
                group
                    .models
                    .retain(|m| !done.contains(&m.name.to_lowercase()));
                debug!(
                    group = %group.key,
                    skipped = before - group.models.len(),
                    "resume file applied"
                );
            } else if group.resume_file.exists() {
                fs::remove_file(&group.resume_file)?;
            }
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[ImportGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<ImportGroup> {
        self.groups
    }

    pub fn group(&self, key: &str) -> Option<&ImportGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Total number of tables across groups
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.models.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the resume files of every group after a full run
    pub fn cleanup_resume_files(&self) -> SyncResult<()> {
        for group in &self.groups {
            if group.resume_file.exists() {
                fs::remove_file(&group.resume_file)?;
            }
        }
        Ok(())
    }
}

fn selected(model: &ImportModel, settings: &RuntimeSettings) -> bool {
    let name = model.name.trim().to_lowercase();
    let group = model.group_key();
    (settings.names.is_empty() || settings.names.contains(&name))
        && !settings.exclude_names.contains(&name)
        && (settings.groups.is_empty() || settings.groups.contains(&group))
        && !settings.exclude_groups.contains(&group)
}

/// `resumestatus_{group}.txt` inside the log directory
pub fn resume_file_path(log_directory: &Path, group: &str) -> PathBuf {
    log_directory.join(format!("resumestatus_{group}.txt"))
}

fn read_resume_file(path: &Path) -> SyncResult<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(fs::read_to_string(path)?
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Record a finished table in its group's resume file
pub fn write_resume_line(path: &Path, name: &str) -> SyncResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", name.trim().to_lowercase())?;
    Ok(())
}
