//! Output persistence for the processed table and its artifacts.
//!
//! Every file is staged as a `.tmp` sibling first; nothing is renamed into
//! place until all staged writes succeeded. A failed commit puts the previous
//! outputs back, so a run never leaves a half-written table or a scaler
//! without its table.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::table::{ProcessedRow, write_rows};

pub const PROCESSED_FILE: &str = "processed_data.csv";
pub const SCALER_FILE: &str = "scaler.json";
pub const ENCODER_FILE: &str = "encoders.json";
pub const REPORT_FILE: &str = "report.json";

/// Logs a value as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Stages files in an output directory and commits them together.
pub struct StagedOutput {
    dir: PathBuf,
    /// `(temporary, final)` pairs in staging order.
    staged: Vec<(PathBuf, PathBuf)>,
    committed: bool,
}

impl StagedOutput {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            staged: Vec::new(),
            committed: false,
        })
    }

    fn stage_with<F>(&mut self, name: &str, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<()>,
    {
        let final_path = self.dir.join(name);
        let temp_path = self.dir.join(format!("{name}.tmp"));

        let file = File::create(&temp_path)
            .with_context(|| format!("creating {}", temp_path.display()))?;
        // Register before writing so a failed write is still cleaned up.
        self.staged.push((temp_path.clone(), final_path));

        let mut writer = BufWriter::new(file);
        write(&mut writer).with_context(|| format!("writing {}", temp_path.display()))?;
        writer
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|f| f.sync_all())
            .with_context(|| format!("flushing {}", temp_path.display()))?;

        debug!(path = %temp_path.display(), "Staged output file");
        Ok(())
    }

    pub fn stage_json(&mut self, name: &str, value: &impl Serialize) -> Result<()> {
        self.stage_with(name, |w| {
            serde_json::to_writer_pretty(&mut *w, value)?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }

    pub fn stage_table(&mut self, name: &str, rows: &[ProcessedRow]) -> Result<()> {
        self.stage_with(name, |w| write_rows(w, rows))
    }

    /// Renames every staged file into place, the first staged file last.
    ///
    /// Outputs already in the directory are moved to `.bak` siblings first.
    /// If any rename fails, the files swapped in so far are taken back out and
    /// the backups restored, so the directory never mixes two runs.
    pub fn commit(mut self) -> Result<()> {
        let backups = swap_in(&self.staged)?;
        self.committed = true;

        for backup in backups {
            if let Err(e) = fs::remove_file(&backup) {
                warn!(path = %backup.display(), error = %e, "Failed to remove backup");
            }
        }
        info!(dir = %self.dir.display(), files = self.staged.len(), "Outputs committed");
        Ok(())
    }
}

fn backup_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    dest.with_file_name(name)
}

/// Moves one staged file over `dest`; returns the backup of the old file.
fn swap_one(temp: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    let backup = if dest.exists() {
        let backup = backup_path(dest);
        fs::rename(dest, &backup)
            .with_context(|| format!("backing up {}", dest.display()))?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(temp, dest) {
        if let Some(b) = &backup {
            if let Err(restore) = fs::rename(b, dest) {
                warn!(path = %dest.display(), error = %restore, "Failed to restore backup");
            }
        }
        return Err(e).with_context(|| {
            format!("atomic rename: {} -> {}", temp.display(), dest.display())
        });
    }
    Ok(backup)
}

/// Swaps all staged files in, rolling back on the first failure.
fn swap_in(staged: &[(PathBuf, PathBuf)]) -> Result<Vec<PathBuf>> {
    let mut done: Vec<(&Path, Option<PathBuf>)> = Vec::new();
    for (temp, dest) in staged.iter().rev() {
        match swap_one(temp, dest) {
            Ok(backup) => done.push((dest.as_path(), backup)),
            Err(e) => {
                for (dest, backup) in done.iter().rev() {
                    let undone = match backup {
                        Some(b) => fs::rename(b, dest),
                        None => fs::remove_file(dest),
                    };
                    if let Err(undo) = undone {
                        warn!(path = %dest.display(), error = %undo, "Failed to roll back output");
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(done.into_iter().filter_map(|(_, b)| b).collect())
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (temp, _) in &self.staged {
            if temp.exists() {
                if let Err(e) = fs::remove_file(temp) {
                    warn!(path = %temp.display(), error = %e, "Failed to remove staged file");
                }
            }
        }
    }
}
