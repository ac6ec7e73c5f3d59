//! Multistatus body rendering for listing responses.
//!
//! Pure string building: the caller supplies the entries (typically from
//! [`ResourceManager::propfind`](crate::ResourceManager::propfind)) and owns
//! the status line and headers.

use crate::Depth;
use davcache_storage::{ResourceMeta, date, path};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use quick_xml::escape::partial_escape;

/// Characters escaped within one path segment of an `href`.
const HREF_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Whether `entry_path` falls inside the `depth` scope of `request`.
fn in_scope(request: &str, entry_path: &str, depth: Depth) -> bool {
    if entry_path == request {
        return true;
    }
    match (depth, path::strip_ancestor(request, entry_path)) {
        (Depth::Zero, _) | (_, None) => false,
        (Depth::One, Some(rest)) => !rest.contains('/'),
        (Depth::Infinity, Some(_)) => true,
    }
}

/// Absolute reference of an entry: base joined with the encoded path.
fn href(base: &str, entry: &ResourceMeta) -> String {
    let mut href = base.trim_end_matches('/').to_string();
    href.push('/');
    let encoded: Vec<String> = entry
        .path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| utf8_percent_encode(segment, HREF_SEGMENT).to_string())
        .collect();
    href.push_str(&encoded.join("/"));
    if entry.is_dir && !entry.path.is_empty() {
        href.push('/');
    }
    href
}

fn response(base: &str, request: &str, entry: &ResourceMeta) -> String {
    let mut xml = String::from("<d:response>");
    xml.push_str(&format!("<d:href>{}</d:href>", partial_escape(&href(base, entry))));
    xml.push_str("<d:propstat><d:prop>");
    let display_name = if entry.path == request { path::name(request) } else { path::name(&entry.path) };
    if !display_name.is_empty() {
        xml.push_str(&format!("<d:displayname>{}</d:displayname>", partial_escape(display_name)));
    }
    if entry.is_dir {
        xml.push_str("<d:resourcetype><d:collection/></d:resourcetype>");
    } else {
        xml.push_str("<d:resourcetype/>");
        xml.push_str(&format!("<d:getcontentlength>{}</d:getcontentlength>", entry.size));
    }
    if let Some(fingerprint) = &entry.fingerprint {
        xml.push_str(&format!("<d:getetag>\"{}\"</d:getetag>", partial_escape(fingerprint)));
    }
    if let Some(modified) = date::format_http(entry.modified) {
        xml.push_str(&format!("<d:getlastmodified>{modified}</d:getlastmodified>"));
    }
    xml.push_str("</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>");
    xml
}

/// Render a `207 Multi-Status` body for `entries`.
///
/// Entries outside the `depth` scope of `request_path` are skipped; the
/// rest are emitted in the given order. `base_url` is the externally visible
/// prefix the gateway serves the namespace under (absolute URL or path).
///
/// ```
/// use davcache_manager::{Depth, framer};
/// use davcache_storage::ResourceMeta;
/// use time::OffsetDateTime;
///
/// let entries = [ResourceMeta::directory("photos", OffsetDateTime::UNIX_EPOCH)];
/// let body = framer::render("/dav", "photos", &entries, Depth::Zero);
/// assert!(body.contains("<d:href>/dav/photos/</d:href>"));
/// assert!(body.contains("<d:displayname>photos</d:displayname>"));
/// ```
pub fn render(base_url: &str, request_path: &str, entries: &[ResourceMeta], depth: Depth) -> String {
    let request = path::normalize(request_path).unwrap_or_else(|_| request_path.trim_matches('/').to_string());
    let mut body = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    body.push_str(r#"<d:multistatus xmlns:d="DAV:">"#);
    for entry in entries.iter().filter(|entry| in_scope(&request, &entry.path, depth)) {
        body.push_str(&response(base_url, &request, entry));
    }
    body.push_str("</d:multistatus>");
    body
}
