use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;

use cellwatch_model::CellChange;

/// Column header written once per log file.
pub const AUDIT_HEADER: [&str; 9] = [
    "Timestamp",
    "File Path",
    "Author",
    "Worksheet",
    "Cell",
    "Old Formula",
    "Old Value",
    "New Formula",
    "New Value",
];

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Append-only change log, rotated by calendar date through the file name.
///
/// Each append opens the day's file in append mode and writes a fresh gzip
/// member; readers decode the concatenated members as one stream. Durability
/// is best-effort (no fsync between records).
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AuditLog { dir: dir.into() }
    }

    pub fn log_file_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("excel_change_log_{}.csv.gz", date.format("%Y%m%d")))
    }

    /// Append one record per change to today's log file.
    pub fn append(
        &self,
        document: &Path,
        author: Option<&str>,
        changes: &[CellChange],
    ) -> Result<(), AuditError> {
        if changes.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;

        let path = self.log_file_path(Local::now().date_naive());
        let is_new = !path.exists();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = csv::Writer::from_writer(encoder);

        if is_new {
            writer.write_record(AUDIT_HEADER)?;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let document = document.display().to_string();
        let author = author.unwrap_or_default();

        for change in changes {
            writer.write_record([
                timestamp.as_str(),
                document.as_str(),
                author,
                change.worksheet.as_str(),
                change.coordinate.as_str(),
                change.old_formula.as_deref().unwrap_or_default(),
                change.old_value.as_deref().unwrap_or_default(),
                change.new_formula.as_deref().unwrap_or_default(),
                change.new_value.as_deref().unwrap_or_default(),
            ])?;
        }

        let encoder = writer
            .into_inner()
            .map_err(|err| AuditError::Io(io::Error::other(err.to_string())))?;
        encoder.finish()?;

        debug!(log = %path.display(), records = changes.len(), "audit records appended");
        Ok(())
    }
}
