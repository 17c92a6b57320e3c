use std::{fs, io, path::Path};

use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{error, info};

#[derive(Debug, Snafu)]
pub enum FileError {
    #[snafu(display("Failed to read {}: {}", path, source))]
    Read { path: String, source: io::Error },

    #[snafu(display("Failed to write {}: {}", path, source))]
    Write { path: String, source: io::Error },

    #[snafu(display("Failed to serialize JSON for {}: {}", path, source))]
    Serialize {
        path: String,
        source: serde_json::Error,
    },
}

/// Reads `path` as a list of trimmed, non-empty lines.
///
/// A missing or unreadable file is logged and yields an empty list.
pub fn read_lines(path: impl AsRef<Path>) -> Vec<String> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            error!(path = %path.display(), "file not found");
            Vec::new()
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to read file");
            Vec::new()
        }
    }
}

/// Reads the whole file at `path` as text.
pub fn read_text(path: impl AsRef<Path>) -> Result<String, FileError> {
    let path = path.as_ref();
    fs::read_to_string(path).context(ReadSnafu {
        path: path.display().to_string(),
    })
}

/// Writes `value` to `path` as JSON indented with four spaces.
pub fn write_json_pretty<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), FileError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer).context(SerializeSnafu {
        path: display.clone(),
    })?;

    fs::write(path, buf).context(WriteSnafu { path: display })?;
    info!(path = %path.display(), "saved JSON output");
    Ok(())
}
