//! Static file serving: conditional GET/HEAD, byte-range responses,
//! precompressed variant negotiation, and conditional PUT/DELETE.

use crate::{route::CacheControl, Handled, Request, Response, StatusCode};
use std::{
    fs,
    io::Read as _,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Metadata resolved for a single file response.
struct Resolved {
    path: PathBuf,
    len: u64,
    etag: String,
    last_modified: String,
}

/// Joins `root` with the url-supplied segments, rejecting any segment
/// that would escape the root (`..`, empty after normalization).
pub(crate) fn resolve_path(root: &Path, segments: &[&[u8]]) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in segments {
        let segment = std::str::from_utf8(segment).ok()?;
        if segment.is_empty() || segment == ".." || segment == "." {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

/// ETag value: the decimal form of `inode XOR size XOR mtime`, quoted for
/// the header and unquoted for internal comparison.
fn etag_for(ino: u64, len: u64, modified: SystemTime) -> String {
    let secs = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{}\"", ino ^ len ^ secs)
}

fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

fn resolve(path: &Path) -> std::io::Result<Resolved> {
    let meta = fs::metadata(path)?;
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(Resolved {
        path: path.to_path_buf(),
        len: meta.len(),
        etag: etag_for(meta.ino(), meta.len(), modified),
        last_modified: http_date(modified),
    })
}

/// Picks a `.br`/`.gz` precompressed sibling when the client advertises
/// support via `Accept-Encoding` and the variant exists on disk. Only
/// routes with `compressed: true` call this.
fn negotiate_variant(path: &Path, accept_encoding: Option<&[u8]>) -> (PathBuf, Option<&'static str>) {
    let Some(accept) = accept_encoding else {
        return (path.to_path_buf(), None);
    };
    let accept = String::from_utf8_lossy(accept);

    if accept.contains("br") {
        let candidate = append_extension(path, "br");
        if candidate.is_file() {
            return (candidate, Some("br"));
        }
    }
    if accept.contains("gzip") {
        let candidate = append_extension(path, "gz");
        if candidate.is_file() {
            return (candidate, Some("gzip"));
        }
    }
    (path.to_path_buf(), None)
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn if_none_match_satisfied(request: &Request, etag: &str) -> bool {
    match request.header(b"if-none-match") {
        Some(value) => header_lists_etag(value, etag),
        None => false,
    }
}

fn if_match_satisfied(request: &Request, etag: &str) -> bool {
    match request.header(b"if-match") {
        Some(b"*") => true,
        Some(value) => header_lists_etag(value, etag),
        None => true, // no If-Match means unconditional
    }
}

fn header_lists_etag(value: &[u8], etag: &str) -> bool {
    if value == b"*" {
        return true;
    }
    String::from_utf8_lossy(value)
        .split(',')
        .any(|candidate| candidate.trim() == etag)
}

fn if_modified_since_satisfied(request: &Request, modified_http_date: &str) -> bool {
    match request.header(b"if-modified-since") {
        Some(value) => std::str::from_utf8(value).ok() == Some(modified_http_date),
        None => false,
    }
}

/// A single `bytes=start-end` range, end-inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Parses a `Range: bytes=...` header against a resource of length `len`.
/// Returns `None` when absent, `Some(Err(()))` when present but
/// unsatisfiable.
fn parse_range(value: &[u8], len: u64) -> Option<Result<Vec<ByteRange>, ()>> {
    let text = std::str::from_utf8(value).ok()?;
    let spec = text.strip_prefix("bytes=")?;

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let (start_s, end_s) = part.split_once('-')?;

        let range = if start_s.is_empty() {
            // suffix range: last N bytes
            let suffix: u64 = end_s.parse().ok()?;
            if suffix == 0 || suffix > len {
                ByteRange { start: 0, end: len.saturating_sub(1) }
            } else {
                ByteRange { start: len - suffix.min(len), end: len - 1 }
            }
        } else {
            let start: u64 = start_s.parse().ok()?;
            let end: u64 = if end_s.is_empty() {
                len.saturating_sub(1)
            } else {
                end_s.parse().ok()?
            };
            ByteRange { start, end }
        };

        if range.start > range.end || range.start >= len {
            return Some(Err(()));
        }
        ranges.push(ByteRange { start: range.start, end: range.end.min(len.saturating_sub(1)) });
    }

    if ranges.is_empty() {
        Some(Err(()))
    } else {
        Some(Ok(ranges))
    }
}

fn read_range(path: &Path, range: ByteRange) -> std::io::Result<Vec<u8>> {
    use std::io::{Seek, SeekFrom};
    let mut file = fs::File::open(path)?;
    file.seek(SeekFrom::Start(range.start))?;
    let len = (range.end - range.start + 1) as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Route-derived knobs controlling how [`serve`] handles a single file.
pub(crate) struct ServeOptions<'a> {
    /// File extension (without the leading dot), used to match
    /// `cache_control`'s extension filter.
    pub extension: &'a str,
    /// Only attempt `.br`/`.gz` negotiation when `true`.
    pub compressed: bool,
    /// Write the body through the chunked `BodyWriter` instead of
    /// reading the whole file into memory.
    pub stream: bool,
    pub cache_control: Option<&'a CacheControl>,
}

/// Serves a `GET`/`HEAD` request for the file at `path` (already
/// resolved and validated against the document root).
pub(crate) fn serve(
    request: &Request,
    response: &mut Response,
    path: &Path,
    mime: &'static str,
    options: ServeOptions,
) -> Handled {
    let (variant_path, encoding) = if options.compressed {
        negotiate_variant(path, request.header(b"accept-encoding"))
    } else {
        (path.to_path_buf(), None)
    };
    let metadata_path: &Path = if variant_path.is_file() { &variant_path } else { path };

    let resolved = match resolve(metadata_path) {
        Ok(r) => r,
        Err(_) => return response.status(StatusCode::NotFound).body("not found"),
    };

    if if_none_match_satisfied(request, &resolved.etag)
        || if_modified_since_satisfied(request, &resolved.last_modified)
    {
        return response
            .status(StatusCode::NotModified)
            .header("ETag", resolved.etag)
            .body("");
    }

    if !if_match_satisfied(request, &resolved.etag) {
        return response.status(StatusCode::PreconditionFailed).body("");
    }

    response.header("ETag", resolved.etag.clone());
    response.header("Last-Modified", resolved.last_modified.clone());
    response.header("Accept-Ranges", "bytes");
    if let Some(encoding) = encoding {
        response.header("Content-Encoding", encoding);
        response.header("Vary", "Origin, Accept-Encoding");
    }
    if let Some(value) = options
        .cache_control
        .filter(|cc| cc.applies_to(options.extension))
        .and_then(CacheControl::header_value)
    {
        response.header("Cache-Control", value);
    }

    if let Some(range_header) = request.header(b"range") {
        let if_range_ok = request
            .header(b"if-range")
            .map(|v| header_lists_etag(v, &resolved.etag))
            .unwrap_or(true);

        if if_range_ok {
            return serve_range(response, &resolved, range_header, mime);
        }
    }

    if options.stream {
        return stream_file(response, &resolved, mime);
    }

    let Ok(bytes) = fs::read(&resolved.path) else {
        return response.status(StatusCode::NotFound).body("not found");
    };

    response
        .status(StatusCode::Ok)
        .header("Content-Type", mime)
        .body(bytes)
}

/// Streams `resolved`'s file content through the response's chunked
/// `BodyWriter` rather than buffering the whole file in memory first.
fn stream_file(response: &mut Response, resolved: &Resolved, mime: &'static str) -> Handled {
    let Ok(mut file) = fs::File::open(&resolved.path) else {
        return response.status(StatusCode::NotFound).body("not found");
    };

    response.status(StatusCode::Ok).header("Content-Type", mime);
    response.body_with(|writer| {
        let mut buf = [0u8; 64 * 1024];
        loop {
            match file.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => writer.write(&buf[..n]),
            }
        }
    })
}

fn serve_range(response: &mut Response, resolved: &Resolved, range_header: &[u8], mime: &'static str) -> Handled {
    let parsed = match parse_range(range_header, resolved.len) {
        None => None,
        Some(Err(())) => {
            return response
                .status(StatusCode::RangeNotSatisfiable)
                .header("Content-Range", format!("bytes */{}", resolved.len))
                .body("");
        }
        Some(Ok(ranges)) => Some(ranges),
    };

    let Some(ranges) = parsed else {
        let Ok(bytes) = fs::read(&resolved.path) else {
            return response.status(StatusCode::NotFound).body("not found");
        };
        return response.status(StatusCode::Ok).header("Content-Type", mime).body(bytes);
    };

    if ranges.len() == 1 {
        let range = ranges[0];
        let Ok(chunk) = read_range(&resolved.path, range) else {
            return response.status(StatusCode::NotFound).body("not found");
        };
        return response
            .status(StatusCode::PartialContent)
            .header("Content-Type", mime)
            .header(
                "Content-Range",
                format!("bytes {}-{}/{}", range.start, range.end, resolved.len),
            )
            .body(chunk);
    }

    let boundary = "EMBEDWEB_BYTERANGE_BOUNDARY";
    let mut multipart = Vec::new();
    for range in &ranges {
        let Ok(chunk) = read_range(&resolved.path, *range) else {
            return response.status(StatusCode::NotFound).body("not found");
        };
        multipart.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        multipart.extend_from_slice(format!("Content-Type: {mime}\r\n").as_bytes());
        multipart.extend_from_slice(
            format!("Content-Range: bytes {}-{}/{}\r\n\r\n", range.start, range.end, resolved.len).as_bytes(),
        );
        multipart.extend_from_slice(&chunk);
        multipart.extend_from_slice(b"\r\n");
    }
    multipart.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    response
        .status(StatusCode::PartialContent)
        .header("Content-Type", format!("multipart/byteranges; boundary={boundary}"))
        .body(multipart)
}

/// Serves a conditional `PUT`: writes `body` to `path` unless an
/// `If-Match`/`If-None-Match` precondition fails.
pub(crate) fn put(request: &Request, response: &mut Response, path: &Path, body: &[u8]) -> Handled {
    if path.is_file() {
        if let Ok(meta) = fs::metadata(path) {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let etag = etag_for(meta.ino(), meta.len(), modified);
            if !if_match_satisfied(request, &etag) {
                return response.status(StatusCode::PreconditionFailed).body("");
            }
            if request.header(b"if-none-match") == Some(b"*") {
                return response.status(StatusCode::PreconditionFailed).body("");
            }
        }
    }

    match fs::write(path, body) {
        Ok(()) => response.status(StatusCode::Ok).body(""),
        Err(_) => response.status(StatusCode::InternalServerError).body("write failed"),
    }
}

pub(crate) fn delete(request: &Request, response: &mut Response, path: &Path) -> Handled {
    let Ok(meta) = fs::metadata(path) else {
        return response.status(StatusCode::NotFound).body("");
    };
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let etag = etag_for(meta.ino(), meta.len(), modified);
    if !if_match_satisfied(request, &etag) {
        return response.status(StatusCode::PreconditionFailed).body("");
    }

    match fs::remove_file(path) {
        Ok(()) => response.status(StatusCode::Ok).body(""),
        Err(_) => response.status(StatusCode::InternalServerError).body("delete failed"),
    }
}
