//! Read-only HTTP storage.
//!
//! Serves files straight from a base URL with ranged GETs; directory
//! listings are not available over plain HTTP, so subcontainers come from
//! an explicit `manifest-pattern` of type `list`.

use std::path::Path;
use std::time::Duration;

use serde_yaml::{Mapping, Value};

use common::object::ManifestPattern;

use crate::base::{
    Attr, BackendInit, File, OpenFlags, Result, StorageBackend, StorageError, Subcontainer,
};
use crate::buffered::{PagedFile, RangeReader};
use crate::subcontainers::children_links;

pub const TYPE: &str = "http";

pub struct HttpBackend {
    params: Mapping,
    base_url: String,
    client: reqwest::blocking::Client,
    manifest_pattern: Option<ManifestPattern>,
}

impl HttpBackend {
    pub fn new(init: BackendInit) -> Result<Self> {
        let base_url = init.str_param("url")?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StorageError::BackendInit(format!("http client: {e}")))?;
        let manifest_pattern = match init.params.get("manifest-pattern") {
            Some(Value::Mapping(m)) => Some(
                ManifestPattern::from_fields(m)
                    .map_err(|e| StorageError::BackendInit(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(HttpBackend {
            params: init.params,
            base_url,
            client,
            manifest_pattern,
        })
    }

    fn url_for(&self, path: &Path) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.display()
        )
    }

    fn head(&self, path: &Path) -> Result<Attr> {
        let response = self
            .client
            .head(self.url_for(path))
            .send()
            .map_err(|e| StorageError::BackendInit(format!("http head: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        if !response.status().is_success() {
            return Err(StorageError::PermissionDenied(format!(
                "http status {} for {}",
                response.status(),
                path.display()
            )));
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Attr::file_ro(size, 0))
    }
}

struct HttpRangeReader {
    client: reqwest::blocking::Client,
    url: String,
}

impl RangeReader for HttpRangeReader {
    fn read_range(&mut self, length: usize, start: u64) -> Result<Vec<u8>> {
        let end = start + length as u64 - 1;
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={start}-{end}"))
            .send()
            .map_err(|e| StorageError::BackendInit(format!("http get: {e}")))?;
        if !response.status().is_success() {
            return Err(StorageError::NotFound(self.url.clone().into()));
        }
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| StorageError::BackendInit(format!("http body: {e}")))
    }
}

impl StorageBackend for HttpBackend {
    fn backend_type(&self) -> &'static str {
        TYPE
    }

    fn params(&self) -> &Mapping {
        &self.params
    }

    fn read_only(&self) -> bool {
        true
    }

    fn open(&self, path: &Path, _flags: OpenFlags) -> Result<Box<dyn File>> {
        let attr = self.head(path)?;
        Ok(Box::new(PagedFile::new(
            Box::new(HttpRangeReader {
                client: self.client.clone(),
                url: self.url_for(path),
            }),
            attr,
        )))
    }

    fn create(&self, _path: &Path, _flags: OpenFlags, _mode: u32) -> Result<Box<dyn File>> {
        Err(StorageError::ReadOnly)
    }

    fn getattr(&self, path: &Path) -> Result<Attr> {
        if path.as_os_str().is_empty() {
            return Ok(Attr::dir(0));
        }
        self.head(path)
    }

    fn readdir(&self, _path: &Path) -> Result<Vec<String>> {
        Err(StorageError::Unsupported("readdir over http"))
    }

    fn get_children(&self, query: Option<&str>) -> Result<Vec<Subcontainer>> {
        match &self.manifest_pattern {
            Some(pattern @ ManifestPattern::List { .. }) => {
                children_links(self, pattern, query)
            }
            _ => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    const BODY: &[u8] = b"hello world";

    type Request = (String, String, Option<String>);

    /// A one-thread HTTP responder serving `/data.bin`, recording every
    /// (method, path, range header) it sees.
    struct TestServer {
        port: u16,
        requests: Arc<Mutex<Vec<Request>>>,
    }

    fn parse_range(value: &str) -> Option<(usize, usize)> {
        let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
        Some((start.parse().ok()?, end.parse().ok()?))
    }

    fn spawn_server() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = stream.read(&mut buf).unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&head);
                let mut lines = text.lines();
                let mut request_line = lines.next().unwrap_or_default().split_whitespace();
                let method = request_line.next().unwrap_or_default().to_string();
                let path = request_line.next().unwrap_or_default().to_string();
                let range = lines
                    .filter_map(|line| {
                        line.strip_prefix("Range: ")
                            .or_else(|| line.strip_prefix("range: "))
                    })
                    .next()
                    .map(str::to_string);
                seen.lock().push((method.clone(), path.clone(), range.clone()));

                let response = if path != "/data.bin" {
                    b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        .to_vec()
                } else if method == "HEAD" {
                    format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        BODY.len()
                    )
                    .into_bytes()
                } else {
                    let (slice, status) = match range.as_deref().and_then(parse_range) {
                        Some((start, end)) => {
                            (&BODY[start..=end.min(BODY.len() - 1)], "206 Partial Content")
                        }
                        None => (BODY, "200 OK"),
                    };
                    let mut out = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        slice.len()
                    )
                    .into_bytes();
                    out.extend_from_slice(slice);
                    out
                };
                let _ = stream.write_all(&response);
            }
        });
        TestServer { port, requests }
    }

    fn backend(port: u16) -> HttpBackend {
        let mut params = Mapping::new();
        params.insert("type".into(), TYPE.into());
        params.insert("url".into(), format!("http://127.0.0.1:{port}").into());
        params.insert("backend-id".into(), "http-test".into());
        HttpBackend::new(BackendInit::new(params)).unwrap()
    }

    #[test]
    fn test_getattr_via_head() {
        let server = spawn_server();
        let backend = backend(server.port);

        let attr = backend.getattr(Path::new("data.bin")).unwrap();
        assert!(!attr.is_dir());
        assert_eq!(attr.size, BODY.len() as u64);
        assert!(backend.getattr(Path::new("")).unwrap().is_dir());

        let requests = server.requests.lock();
        assert_eq!(requests[0].0, "HEAD");
        assert_eq!(requests[0].1, "/data.bin");
    }

    #[test]
    fn test_open_reads_with_range_request() {
        let server = spawn_server();
        let backend = backend(server.port);

        let mut file = backend
            .open(Path::new("data.bin"), OpenFlags::read_only())
            .unwrap();
        assert_eq!(file.read(5, 2).unwrap(), &BODY[2..7]);
        file.release().unwrap();

        let requests = server.requests.lock();
        // HEAD for the attributes, then one ranged GET covering the
        // needed pages.
        assert_eq!(requests[0].0, "HEAD");
        assert_eq!(requests[1].0, "GET");
        assert_eq!(
            requests[1].2.as_deref(),
            Some(format!("bytes=0-{}", BODY.len() - 1).as_str())
        );
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let server = spawn_server();
        let backend = backend(server.port);

        assert!(matches!(
            backend.getattr(Path::new("missing.bin")).unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            backend
                .open(Path::new("missing.bin"), OpenFlags::read_only())
                .unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[test]
    fn test_write_surface_is_read_only() {
        let server = spawn_server();
        let backend = backend(server.port);
        assert!(backend.read_only());
        assert!(matches!(
            backend
                .create(Path::new("new.bin"), OpenFlags::write_only(), 0o644)
                .unwrap_err(),
            StorageError::ReadOnly
        ));
    }
}
