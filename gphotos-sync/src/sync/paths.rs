use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use time::UtcOffset;

use super::media::MediaItem;

/// Folder under the sync root that holds the date-bucketed media tree.
pub const MEDIA_FOLDER: &str = "photos";
pub const UNKNOWN_DATE_FOLDER: &str = "unknown-date";

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path contains unsupported component")]
    UnsupportedComponent,
}

/// Maps an item to `YYYY/MM/DD/<filename>` by its capture date (UTC).
pub fn relative_path_for(item: &MediaItem) -> String {
    format!("{}/{}", date_folder(item), file_name_for(item))
}

/// Same bucket as [`relative_path_for`], with the remote id folded into the
/// file stem. `attempt` 1 gives `stem_<id>.ext`; later attempts append a
/// counter for the rare case where that name is itself taken.
pub fn disambiguated_path_for(item: &MediaItem, attempt: u32) -> String {
    let name = file_name_for(item);
    let id = sanitize_component(&item.id);
    let suffix = if attempt <= 1 {
        id
    } else {
        format!("{id}_{attempt}")
    };
    let unique = match split_extension(&name) {
        (stem, Some(ext)) => format!("{stem}_{suffix}.{ext}"),
        (stem, None) => format!("{stem}_{suffix}"),
    };
    format!("{}/{}", date_folder(item), unique)
}

pub fn local_path_for(media_root: &Path, relative_path: &str) -> Result<PathBuf, PathError> {
    if relative_path.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = media_root.to_path_buf();
    for component in Path::new(relative_path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    Ok(out)
}

/// Splits a file under `media_root` into its `/`-joined directory and name,
/// the shape the index is keyed by.
pub fn index_location(media_root: &Path, local: &Path) -> Option<(String, String)> {
    let relative = local.strip_prefix(media_root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    let name = parts.pop()?;
    Some((parts.join("/"), name))
}

fn date_folder(item: &MediaItem) -> String {
    match item.create_date {
        Some(date) => {
            let date = date.to_offset(UtcOffset::UTC);
            format!(
                "{:04}/{:02}/{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            )
        }
        None => UNKNOWN_DATE_FOLDER.to_string(),
    }
}

fn file_name_for(item: &MediaItem) -> String {
    let name = sanitize_component(&item.filename);
    if name.is_empty() {
        sanitize_component(&item.id)
    } else {
        name
    }
}

fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches('.').to_string();
    if trimmed.chars().all(|c| c == '.') {
        return String::new();
    }
    let (stem, _) = split_extension(&trimmed);
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return format!("_{trimmed}");
    }
    trimmed
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
