use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{Destination, OutputConfig, OutputFormat, DEFAULT_FILENAME, EXIT_NOT_SAVED};
use crate::error::PersistenceError;
use crate::table::{Field, Table};

/// Upper bound on "name (N).csv" attempts before giving up.
const MAX_COLLISION_SUFFIX: usize = 10_000;

/// Turns the filename a user typed into a destination inside `directory`.
/// Empty means the default name, "skip" means don't save at all. The
/// extension always matches `format`.
pub fn resolve_destination(answer: &str, directory: &Path, format: OutputFormat) -> Destination {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("skip") {
        return Destination::Skip;
    }
    let extension = format.extension();
    let stem = match strip_extension(answer, extension) {
        "" => DEFAULT_FILENAME,
        stem => stem,
    };
    Destination::Save(directory.join(format!("{stem}.{extension}")))
}

fn strip_extension<'a>(name: &'a str, extension: &str) -> &'a str {
    let suffix_len = extension.len() + 1;
    // ASCII lowercasing keeps byte offsets intact.
    let lowered = name.to_ascii_lowercase();
    if lowered.len() >= suffix_len
        && lowered.ends_with(extension)
        && lowered.as_bytes()[lowered.len() - suffix_len] == b'.'
    {
        &name[..name.len() - suffix_len]
    } else {
        name
    }
}

/// The n-th candidate for `requested`: the path itself for 0, then
/// "name (1).ext", "name (2).ext", ...
pub fn candidate_path(requested: &Path, n: usize) -> PathBuf {
    if n == 0 {
        return requested.to_path_buf();
    }
    let Some(stem) = requested.file_stem() else {
        return requested.to_path_buf();
    };
    let mut file_name = stem.to_os_string();
    file_name.push(format!(" ({n})"));
    if let Some(extension) = requested.extension() {
        file_name.push(".");
        file_name.push(extension);
    }
    requested.with_file_name(file_name)
}

/// Creates the first candidate path that doesn't exist yet. The file is
/// opened with create_new, so a file that shows up concurrently is never
/// truncated.
fn create_collision_free(requested: &Path) -> Result<(PathBuf, File), PersistenceError> {
    for n in 0..=MAX_COLLISION_SUFFIX {
        let path = candidate_path(requested, n);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "file exists, trying next name");
            }
            Err(source) => return Err(PersistenceError::Io { path, source }),
        }
    }
    Err(PersistenceError::Exhausted(requested.to_path_buf()))
}

/// Writes `table` (header row, then one line per row) next to or at
/// `requested`, never replacing an existing file. Returns the path that was
/// actually written.
pub fn save(
    table: &Table,
    requested: &Path,
    format: OutputFormat,
) -> Result<PathBuf, PersistenceError> {
    if let Some(parent) = requested.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let (path, file) = create_collision_free(requested)?;
    let csv_error = |source: csv::Error| PersistenceError::Csv {
        path: path.clone(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(file);
    if let Some(headers) = table.headers() {
        writer.write_record(headers.names()).map_err(csv_error)?;
    }
    for row in table.rows() {
        writer
            .write_record(row.iter().map(Field::text))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|source| PersistenceError::Io {
        path: path.clone(),
        source,
    })?;

    info!(
        path = %path.display(),
        rows = table.row_count(),
        "saved table"
    );
    Ok(path)
}

/// What happened to a finished session's table.
#[derive(Debug)]
pub enum SaveStatus {
    Saved(PathBuf),
    Skipped,
    /// No header record ever arrived, there is no table to write.
    NothingToSave,
    Failed(PersistenceError),
}

impl SaveStatus {
    /// Collected data that couldn't be written is the only non-zero outcome
    /// once a session has run.
    pub fn exit_code(&self) -> u8 {
        match self {
            SaveStatus::Failed(_) => EXIT_NOT_SAVED,
            _ => 0,
        }
    }
}

/// Writes whatever a session collected to the configured destination. Runs
/// for every termination cause, so a disconnect or interrupt still keeps the
/// rows gathered so far.
pub fn store(table: &Table, output: &OutputConfig) -> SaveStatus {
    match &output.destination {
        Destination::Skip => SaveStatus::Skipped,
        Destination::Save(_) if table.headers().is_none() => SaveStatus::NothingToSave,
        Destination::Save(path) => match save(table, path, output.format) {
            Ok(actual) => SaveStatus::Saved(actual),
            Err(error) => {
                warn!(%error, "saving failed");
                SaveStatus::Failed(error)
            }
        },
    }
}
