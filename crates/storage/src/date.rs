//! HTTP date handling (RFC 1123 form, always GMT).

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const HTTP_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

/// Formats a timestamp as an HTTP date, converting it to UTC first.
///
/// ```
/// use time::macros::datetime;
/// use davcache_storage::date::format_http;
/// assert_eq!(
///     format_http(datetime!(2024-03-05 14:07:09 +02:00)).as_deref(),
///     Some("Tue, 05 Mar 2024 12:07:09 GMT")
/// );
/// ```
pub fn format_http(timestamp: OffsetDateTime) -> Option<String> {
    timestamp.to_offset(UtcOffset::UTC).format(HTTP_DATE).ok()
}

/// Parses an HTTP date, `None` if it isn't one.
pub fn parse_http(raw: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(raw.trim(), HTTP_DATE).ok().map(PrimitiveDateTime::assume_utc)
}
