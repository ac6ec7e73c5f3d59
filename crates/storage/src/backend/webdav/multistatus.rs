//! `207 Multi-Status` response parsing.
//!
//! Only the four properties requested by the backend are read. Namespace
//! prefixes are ignored (matching is on local names), since servers disagree
//! on how they declare the `DAV:` namespace.

use crate::date;
use crate::error::{ErrorKind, Result};
use crate::{ResourceMeta, path};
use exn::{OptionExt, ResultExt};
use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Url;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy)]
enum Field {
    Href,
    ContentLength,
    ETag,
    LastModified,
}

/// A `<response>` element being assembled.
#[derive(Debug, Default)]
struct Pending {
    href: String,
    collection: bool,
    content_length: String,
    etag: String,
    last_modified: String,
}
impl Pending {
    fn append(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Href => &mut self.href,
            Field::ContentLength => &mut self.content_length,
            Field::ETag => &mut self.etag,
            Field::LastModified => &mut self.last_modified,
        };
        target.push_str(text);
    }

    fn finish(self, base_path: &str) -> Result<ResourceMeta> {
        let href = Some(self.href.trim())
            .filter(|href| !href.is_empty())
            .ok_or_raise(|| ErrorKind::Protocol("response without href".to_string()))?;
        let path = relative_path(href, base_path)?;
        // Servers omit or mangle the date often enough that it isn't worth failing over.
        let modified = date::parse_http(&self.last_modified).unwrap_or_else(OffsetDateTime::now_utc);
        if self.collection {
            return Ok(ResourceMeta::directory(path, modified));
        }
        let length = self.content_length.trim();
        let size = match length {
            "" => 0,
            length => length
                .parse::<u64>()
                .or_raise(|| ErrorKind::Protocol(format!("invalid content length {length:?} for {href}")))?,
        };
        let meta = ResourceMeta::file(path, size, modified);
        Ok(match unquote_etag(&self.etag) {
            Some(etag) => meta.with_fingerprint(etag),
            None => meta,
        })
    }
}

/// Parses a multistatus body into metadata, one entry per `<response>`.
///
/// Hrefs are mapped back to normalized backend paths by stripping the base
/// URL's path component (`base_path`, decoded and without slashes).
pub(super) fn parse(body: &str, base_path: &str) -> Result<Vec<ResourceMeta>> {
    let mut reader = Reader::from_str(body);
    let mut entries = Vec::new();
    let mut current: Option<Pending> = None;
    let mut field: Option<Field> = None;
    loop {
        let event = reader
            .read_event()
            .or_raise(|| ErrorKind::Protocol(format!("malformed multistatus body at byte {}", reader.buffer_position())))?;
        match event {
            Event::Start(element) => match element.local_name().as_ref() {
                b"response" => current = Some(Pending::default()),
                b"collection" => {
                    if let Some(pending) = current.as_mut() {
                        pending.collection = true;
                    }
                },
                b"href" => field = Some(Field::Href),
                b"getcontentlength" => field = Some(Field::ContentLength),
                b"getetag" => field = Some(Field::ETag),
                b"getlastmodified" => field = Some(Field::LastModified),
                _ => {},
            },
            Event::Empty(element) => {
                if element.local_name().as_ref() == b"collection"
                    && let Some(pending) = current.as_mut()
                {
                    pending.collection = true;
                }
            },
            Event::Text(text) => {
                if let (Some(field), Some(pending)) = (field, current.as_mut()) {
                    let text = text
                        .unescape()
                        .or_raise(|| ErrorKind::Protocol("invalid escape in multistatus body".to_string()))?;
                    pending.append(field, &text);
                }
            },
            Event::CData(data) => {
                if let (Some(field), Some(pending)) = (field, current.as_mut()) {
                    pending.append(field, &String::from_utf8_lossy(&data));
                }
            },
            Event::End(element) => {
                field = None;
                if element.local_name().as_ref() == b"response"
                    && let Some(pending) = current.take()
                {
                    entries.push(pending.finish(base_path)?);
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(entries)
}

/// Maps an href (absolute URL or absolute path) to a normalized backend path.
fn relative_path(href: &str, base_path: &str) -> Result<String> {
    let raw = if href.starts_with("http://") || href.starts_with("https://") {
        Url::parse(href)
            .or_raise(|| ErrorKind::Protocol(format!("invalid href {href}")))?
            .path()
            .to_string()
    } else {
        href.to_string()
    };
    let decoded = percent_decode_str(&raw)
        .decode_utf8()
        .or_raise(|| ErrorKind::Protocol(format!("href is not UTF-8: {href}")))?;
    let trimmed = decoded.trim_matches('/');
    let relative = if base_path.is_empty() {
        trimmed
    } else if trimmed == base_path {
        ""
    } else {
        path::strip_ancestor(base_path, trimmed)
            .ok_or_raise(|| ErrorKind::Protocol(format!("href outside of base path: {href}")))?
    };
    path::normalize(relative)
}

/// Strips weak-validator prefix and quotes from an entity tag.
fn unquote_etag(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    let unquoted = raw.trim_matches('"');
    (!unquoted.is_empty()).then(|| unquoted.to_string())
}
