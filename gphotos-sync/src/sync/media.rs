use gphotos_core::RemoteMediaItem;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("media item {id} has unsupported mime type {mime_type:?}")]
    UnsupportedMedia {
        id: String,
        mime_type: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Suffix appended to a `baseUrl` to get the original bytes.
    pub fn download_suffix(&self) -> &'static str {
        match self {
            MediaKind::Photo => "=d",
            MediaKind::Video => "=dv",
        }
    }
}

/// One catalog entry, decoded once at ingestion.
///
/// Timestamps are truncated to whole seconds so they compare equal to what
/// the index stores. The short-lived `baseUrl` is deliberately not kept: the
/// download pass asks for a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub filename: String,
    pub create_date: Option<OffsetDateTime>,
    pub modify_date: OffsetDateTime,
}

impl TryFrom<RemoteMediaItem> for MediaItem {
    type Error = IngestError;

    fn try_from(raw: RemoteMediaItem) -> Result<Self, Self::Error> {
        let Some(kind) = kind_of(&raw) else {
            return Err(IngestError::UnsupportedMedia {
                id: raw.id,
                mime_type: raw.mime_type,
            });
        };
        let metadata = &raw.media_metadata;
        let create_date = parse_timestamp(metadata.creation_time.as_deref());
        let modify_date = parse_timestamp(metadata.modification_time.as_deref())
            .or(create_date)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        Ok(Self {
            id: raw.id,
            kind,
            filename: raw.filename,
            create_date,
            modify_date,
        })
    }
}

fn kind_of(raw: &RemoteMediaItem) -> Option<MediaKind> {
    match raw.mime_type.as_deref() {
        Some(mime) if mime.starts_with("image/") => Some(MediaKind::Photo),
        Some(mime) if mime.starts_with("video/") => Some(MediaKind::Video),
        _ if raw.media_metadata.video.is_some() => Some(MediaKind::Video),
        _ if raw.media_metadata.photo.is_some() => Some(MediaKind::Photo),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value?, &Rfc3339).ok()?;
    parsed.replace_nanosecond(0).ok()
}
