//! WebDAV backend against an in-process fake server.

use axum::Router;
use axum::body::{Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use davcache_storage::backend::{StorageBackend, WebDavBackend, WebDavOptions};
use davcache_storage::error::ErrorKind;
use davcache_storage::{date, fingerprint};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

const PREFIX: &str = "dav";

#[derive(Default)]
struct FakeDav {
    /// `None` marks a collection.
    nodes: Mutex<BTreeMap<String, Option<Vec<u8>>>>,
    requests: Mutex<Vec<(String, String)>>,
    reject_all: bool,
    /// Answer slash-less collection URLs with a redirect, like Apache does.
    redirect_collections: bool,
}
impl FakeDav {
    fn count(&self, method: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }
}

fn key_of(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?.into_owned();
    let trimmed = decoded.trim_matches('/');
    if trimmed == PREFIX {
        return Some(String::new());
    }
    trimmed.strip_prefix(&format!("{PREFIX}/")).map(str::to_string)
}

fn parent_exists(nodes: &BTreeMap<String, Option<Vec<u8>>>, key: &str) -> bool {
    match key.rsplit_once('/') {
        Some((parent, _)) => matches!(nodes.get(parent), Some(None)),
        None => true,
    }
}

fn subtree(nodes: &BTreeMap<String, Option<Vec<u8>>>, key: &str) -> Vec<String> {
    let prefix = format!("{key}/");
    nodes.keys().filter(|k| k.as_str() == key || k.starts_with(&prefix)).cloned().collect()
}

fn href(key: &str, collection: bool) -> String {
    let mut href = format!("/{PREFIX}/");
    let encoded: Vec<String> = key.split('/').map(|s| utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()).collect();
    href.push_str(&encoded.join("/"));
    if collection && !key.is_empty() {
        href.push('/');
    }
    href
}

fn response_xml(key: &str, node: &Option<Vec<u8>>) -> String {
    let modified = date::format_http(OffsetDateTime::UNIX_EPOCH).unwrap();
    match node {
        None => format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype>\
             <d:getlastmodified>{modified}</d:getlastmodified></d:prop></d:propstat></d:response>",
            href(key, true)
        ),
        Some(data) => format!(
            "<d:response><d:href>{}</d:href><d:propstat><d:prop><d:resourcetype/>\
             <d:getcontentlength>{}</d:getcontentlength><d:getetag>\"etag-{}\"</d:getetag>\
             <d:getlastmodified>{modified}</d:getlastmodified></d:prop></d:propstat></d:response>",
            href(key, false),
            data.len(),
            data.len()
        ),
    }
}

async fn handle(State(dav): State<Arc<FakeDav>>, request: Request) -> Response {
    let method = request.method().clone();
    let raw_path = request.uri().path().to_string();
    let headers: HeaderMap = request.headers().clone();
    let body: Bytes = to_bytes(request.into_body(), usize::MAX).await.unwrap();
    dav.requests.lock().unwrap().push((method.to_string(), raw_path.clone()));

    if dav.reject_all {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(key) = key_of(&raw_path) else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let mut nodes = dav.nodes.lock().unwrap();
    if dav.redirect_collections && !key.is_empty() && !raw_path.ends_with('/') && matches!(nodes.get(&key), Some(None)) {
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, format!("{raw_path}/"))]).into_response();
    }
    match method.as_str() {
        "PROPFIND" => {
            let Some(node) = nodes.get(&key) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">"#);
            xml.push_str(&response_xml(&key, node));
            let depth = headers.get("Depth").and_then(|v| v.to_str().ok()).unwrap_or("infinity");
            if depth == "1" && node.is_none() {
                for (child, child_node) in nodes.iter() {
                    let parent = child.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                    if !child.is_empty() && parent == key {
                        xml.push_str(&response_xml(child, child_node));
                    }
                }
            }
            xml.push_str("</d:multistatus>");
            (StatusCode::MULTI_STATUS, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
        },
        "MKCOL" => {
            if nodes.contains_key(&key) {
                StatusCode::METHOD_NOT_ALLOWED.into_response()
            } else if !parent_exists(&nodes, &key) {
                StatusCode::CONFLICT.into_response()
            } else {
                nodes.insert(key, None);
                StatusCode::CREATED.into_response()
            }
        },
        "PUT" => {
            if !parent_exists(&nodes, &key) {
                return StatusCode::CONFLICT.into_response();
            }
            nodes.insert(key, Some(body.to_vec()));
            StatusCode::CREATED.into_response()
        },
        "GET" => match nodes.get(&key) {
            Some(Some(data)) => data.clone().into_response(),
            Some(None) => StatusCode::OK.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        "DELETE" => {
            let doomed = subtree(&nodes, &key);
            if doomed.is_empty() {
                return StatusCode::NOT_FOUND.into_response();
            }
            for k in doomed {
                nodes.remove(&k);
            }
            StatusCode::NO_CONTENT.into_response()
        },
        "MOVE" => {
            let destination = headers
                .get("Destination")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split_once("://").map(|(_, rest)| rest.to_string()))
                .and_then(|rest| rest.find('/').map(|slash| rest[slash..].to_string()))
                .and_then(|path| key_of(&path));
            let Some(to) = destination else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let moved = subtree(&nodes, &key);
            if moved.is_empty() {
                return StatusCode::NOT_FOUND.into_response();
            }
            if !parent_exists(&nodes, &to) {
                return StatusCode::CONFLICT.into_response();
            }
            for k in moved {
                if let Some(node) = nodes.remove(&k) {
                    nodes.insert(format!("{to}{}", &k[key.len()..]), node);
                }
            }
            StatusCode::CREATED.into_response()
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn serve(dav: FakeDav) -> (Arc<FakeDav>, WebDavBackend) {
    let dav = Arc::new(dav);
    dav.nodes.lock().unwrap().insert(String::new(), None);
    let app = Router::new().fallback(handle).with_state(dav.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    let backend = WebDavBackend::new("fake", &format!("http://{address}/{PREFIX}"), WebDavOptions::default()).unwrap();
    (dav, backend)
}

async fn staged(dir: &tempfile::TempDir, data: &[u8]) -> std::path::PathBuf {
    let source = dir.path().join("staged.bin");
    tokio::fs::write(&source, data).await.unwrap();
    source
}

#[tokio::test]
async fn test_ensure_directory_walks_ancestors() {
    let (dav, backend) = serve(FakeDav::default()).await;
    backend.ensure_directory("a/b/c").await.unwrap();
    assert_eq!(dav.count("MKCOL"), 3);
    assert!(backend.stat("a/b/c").await.unwrap().unwrap().is_dir);

    // Second run: every level answers 405, which is fine.
    backend.ensure_directory("/a/b/c/").await.unwrap();
    assert_eq!(dav.count("MKCOL"), 6);
}

#[tokio::test]
async fn test_upload_stat_and_list() {
    let staging = tempfile::tempdir().unwrap();
    let (_dav, backend) = serve(FakeDav::default()).await;
    let source = staged(&staging, b"quarterly numbers").await;

    let meta = backend.upload("reports/2024/Q1 summary.txt", &source).await.unwrap();
    assert_eq!(meta.path, "reports/2024/Q1 summary.txt");
    assert_eq!(meta.size, 17);
    assert_eq!(meta.fingerprint, Some(fingerprint::of_bytes(b"quarterly numbers")));

    let stat = backend.stat("reports/2024/Q1 summary.txt").await.unwrap().unwrap();
    assert!(!stat.is_dir);
    assert_eq!(stat.size, 17);
    assert_eq!(stat.fingerprint.as_deref(), Some("etag-17"));
    assert_eq!(stat.modified, OffsetDateTime::UNIX_EPOCH);

    let listing = backend.list_directory("reports").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].path, "reports/2024");
    assert!(listing[0].is_dir);

    let root: Vec<_> = backend.list_directory("").await.unwrap().into_iter().map(|m| m.path).collect();
    assert_eq!(root, vec!["reports"]);
}

#[tokio::test]
async fn test_stat_and_list_missing() {
    let (_dav, backend) = serve(FakeDav::default()).await;
    assert!(backend.stat("nope.txt").await.unwrap().is_none());
    assert!(backend.list_directory("nope").await.unwrap().is_empty());
    assert!(backend.stat("").await.unwrap().unwrap().is_dir);
}

#[tokio::test]
async fn test_download() {
    let staging = tempfile::tempdir().unwrap();
    let (_dav, backend) = serve(FakeDav::default()).await;
    let source = staged(&staging, b"payload").await;
    backend.upload("x/y.bin", &source).await.unwrap();

    let target = staging.path().join("mirror/x/y.bin");
    backend.download("x/y.bin", &target).await.unwrap();
    assert_eq!(tokio::fs::read(&target).await.unwrap(), b"payload");

    let err = backend.download("x/missing.bin", &target).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
}

#[tokio::test]
async fn test_delete_tolerates_missing() {
    let staging = tempfile::tempdir().unwrap();
    let (_dav, backend) = serve(FakeDav::default()).await;
    let source = staged(&staging, b"1").await;
    backend.upload("a/b/one", &source).await.unwrap();

    backend.delete("a").await.unwrap();
    assert!(backend.stat("a/b/one").await.unwrap().is_none());
    backend.delete("a").await.unwrap();
}

#[tokio::test]
async fn test_rename() {
    let staging = tempfile::tempdir().unwrap();
    let (dav, backend) = serve(FakeDav::default()).await;
    let source = staged(&staging, b"moving").await;
    backend.upload("old/file.txt", &source).await.unwrap();

    backend.rename("old/file.txt", "new/place/file.txt").await.unwrap();
    assert!(backend.stat("old/file.txt").await.unwrap().is_none());
    assert_eq!(backend.stat("new/place/file.txt").await.unwrap().unwrap().size, 6);
    assert_eq!(dav.count("MOVE"), 1);

    let err = backend.rename("old/file.txt", "elsewhere.txt").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
}

#[tokio::test]
async fn test_large_file_round_trip() {
    let staging = tempfile::tempdir().unwrap();
    let (_dav, backend) = serve(FakeDav::default()).await;
    let data: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|i| (i % 251) as u8).collect();
    let source = staged(&staging, &data).await;

    let meta = backend.upload("big/blob.bin", &source).await.unwrap();
    assert_eq!(meta.size, data.len() as u64);
    assert_eq!(meta.fingerprint, Some(fingerprint::of_bytes(&data)));

    let target = staging.path().join("copy.bin");
    backend.download("big/blob.bin", &target).await.unwrap();
    assert_eq!(tokio::fs::read(&target).await.unwrap(), data);
}

#[tokio::test]
async fn test_collection_redirects_are_retried_with_slash() {
    let (dav, backend) = serve(FakeDav {
        redirect_collections: true,
        ..FakeDav::default()
    })
    .await;
    backend.ensure_directory("photos/2024").await.unwrap();

    let stat = backend.stat("photos").await.unwrap().unwrap();
    assert!(stat.is_dir);
    let listing = backend.list_directory("photos").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].path, "photos/2024");

    backend.rename("photos/2024", "archive/2024").await.unwrap();
    assert!(backend.stat("archive/2024").await.unwrap().unwrap().is_dir);
    assert!(backend.stat("photos/2024").await.unwrap().is_none());

    backend.delete("photos").await.unwrap();
    assert!(backend.stat("photos").await.unwrap().is_none());
    // Never downgraded to GET by following the redirect.
    assert_eq!(dav.count("GET"), 0);
}

#[tokio::test]
async fn test_unauthorized_is_permission_denied() {
    let (_dav, backend) = serve(FakeDav {
        reject_all: true,
        ..FakeDav::default()
    })
    .await;
    let err = backend.stat("anything").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
}
