use crate::PathEntry;
use crate::error::{Error, ErrorKind};
use davcache_storage::path;
use exn::ResultExt;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Fixed-width so that text comparison in SQL is chronological.
const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");
/// Offset-less timestamps (written by hand or by older tooling).
const NAIVE_TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day][first [T] [ ]][hour]:[minute]:[second][optional [.[subsecond]]]");

pub(crate) fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, Error> {
    timestamp.to_offset(UtcOffset::UTC).format(TIMESTAMP).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

/// Parses a stored timestamp; values without an offset are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, Error> {
    if let Ok(timestamp) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(timestamp.to_offset(UtcOffset::UTC));
    }
    PrimitiveDateTime::parse(raw, NAIVE_TIMESTAMP)
        .map(PrimitiveDateTime::assume_utc)
        .or_raise(|| ErrorKind::InvalidData("timestamp"))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) path: String,
    pub(crate) parent: Option<String>,
    pub(crate) is_dir: bool,
    pub(crate) size: i64,
    pub(crate) fingerprint: Option<String>,
    pub(crate) updated_at: String,
}
impl TryFrom<&PathEntry> for EntryRow {
    type Error = Error;
    fn try_from(entry: &PathEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            path: entry.path.clone(),
            parent: path::parent(&entry.path).map(str::to_string),
            is_dir: entry.is_dir,
            size: if entry.is_dir { 0 } else { i64::try_from(entry.size).or_raise(|| ErrorKind::InvalidData("size"))? },
            fingerprint: if entry.is_dir { None } else { entry.fingerprint.clone() },
            updated_at: format_timestamp(entry.modified)?,
        })
    }
}
impl TryFrom<EntryRow> for PathEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            path: row.path,
            is_dir: row.is_dir,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            fingerprint: row.fingerprint,
            modified: parse_timestamp(&row.updated_at)?,
        })
    }
}
