//! Multipart/form-data upload demultiplexing.
//!
//! Request bodies are already fully buffered by the time a handler runs
//! (the connection only dispatches once `Content-Length` bytes have
//! arrived), so parsing operates directly on the body slice rather than
//! an incremental socket read.

use crate::{errors::ErrorKind, limits::UploadLimits};
use std::{collections::HashMap, io::Write as _};

/// A single decoded `multipart/form-data` part.
pub struct Upload {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    file: tempfile::NamedTempFile,
    pub size: usize,
}

impl Upload {
    /// Path to the spooled temp file backing this part's content. The
    /// file is unlinked when the `Upload` (and its `NamedTempFile`) drops.
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    pub fn reopen(&self) -> std::io::Result<std::fs::File> {
        self.file.reopen()
    }
}

/// Splits a `multipart/form-data` body into its constituent file [`Upload`]s
/// and a map of URL-decoded non-file form variables (parts with no
/// `filename=`).
pub(crate) fn demux<'a>(
    content_type: &[u8],
    body: &'a [u8],
    limits: &UploadLimits,
) -> Result<(Vec<Upload>, HashMap<String, String>), ErrorKind> {
    let boundary = extract_boundary(content_type).ok_or(ErrorKind::UploadTooLarge)?;
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut uploads = Vec::new();
    let mut form = HashMap::new();
    let mut cursor = body;

    // Skip up to and past the first boundary line.
    let Some(first) = find(cursor, delimiter) else {
        return Ok((uploads, form));
    };
    cursor = &cursor[first + delimiter.len()..];

    loop {
        if cursor.starts_with(b"--") {
            break; // closing delimiter `--boundary--`
        }
        cursor = skip_crlf(cursor);

        let Some(header_end) = find(cursor, b"\r\n\r\n") else {
            break;
        };
        let headers_raw = &cursor[..header_end];
        let part_body_start = header_end + 4;

        let Some(next_delim) = find(&cursor[part_body_start..], delimiter) else {
            break;
        };
        // Part content ends right before the `\r\n` preceding the next delimiter.
        let part_end = part_body_start + next_delim;
        let content = trim_trailing_crlf(&cursor[part_body_start..part_end]);

        let (field_name, file_name, declared_type) = parse_part_headers(headers_raw);

        match file_name {
            Some(file_name) => {
                let file_name = sanitize_filename(&file_name).ok_or(ErrorKind::InvalidUpload)?;

                if uploads.len() >= limits.max_uploads {
                    return Err(ErrorKind::TooManyUploads);
                }
                if content.len() > limits.max_upload_size {
                    return Err(ErrorKind::UploadTooLarge);
                }

                let mut tmp = tempfile::NamedTempFile::new().map_err(|_| ErrorKind::UploadTooLarge)?;
                tmp.write_all(content).map_err(|_| ErrorKind::UploadTooLarge)?;

                uploads.push(Upload {
                    field_name,
                    file_name: Some(file_name.to_string()),
                    content_type: declared_type,
                    size: content.len(),
                    file: tmp,
                });
            }
            None => {
                let value = percent_decode(content);
                form.insert(field_name, value);
            }
        }

        cursor = &cursor[part_end + delimiter.len()..];
    }

    Ok((uploads, form))
}

/// Rejects a multipart filename that attempts path traversal: a leading
/// `.` (covers both hidden files and `..`), a path separator, a control
/// character, or a percent-encoded traversal sequence (`%2e`, `%2f`,
/// `%5c`) anywhere in the raw (not yet decoded) name.
fn sanitize_filename(name: &str) -> Option<&str> {
    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    if name.bytes().any(|b| matches!(b, b'/' | b'\\') || b < 0x20 || b == 0x7f) {
        return None;
    }

    let lower = name.to_ascii_lowercase();
    if lower.contains("%2e") || lower.contains("%2f") || lower.contains("%5c") {
        return None;
    }

    Some(name)
}

/// Decodes `%XX` escapes and `+` (space) in a `multipart/form-data` text
/// part, same as a `application/x-www-form-urlencoded` value. Invalid
/// escapes are passed through unchanged rather than rejected.
fn percent_decode(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied();

    while let Some(byte) = bytes.next() {
        match byte {
            b'+' => out.push(b' '),
            b'%' => {
                let rest = bytes.clone();
                let hex: Vec<u8> = rest.take(2).collect();
                if hex.len() == 2 {
                    if let Ok(value) = u8::from_str_radix(&String::from_utf8_lossy(&hex), 16) {
                        out.push(value);
                        bytes.next();
                        bytes.next();
                        continue;
                    }
                }
                out.push(byte);
            }
            other => out.push(other),
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn extract_boundary(content_type: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(content_type).ok()?;
    let marker = "boundary=";
    let idx = text.find(marker)?;
    let rest = &text[idx + marker.len()..];
    let value = rest.split(';').next().unwrap_or(rest).trim();
    Some(value.trim_matches('"').to_string())
}

/// Parses the `Content-Disposition`/`Content-Type` header block of a
/// single part into its field name, optional filename, and declared
/// content type.
fn parse_part_headers(headers: &[u8]) -> (String, Option<String>, Option<String>) {
    let mut field_name = String::new();
    let mut file_name = None;
    let mut content_type = None;

    for line in headers.split(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        let lower = line.to_ascii_lowercase();

        if lower.starts_with("content-disposition:") {
            field_name = extract_quoted(line, "name=").unwrap_or_default();
            file_name = extract_quoted(line, "filename=");
        } else if lower.starts_with("content-type:") {
            content_type = line.split_once(':').map(|(_, v)| v.trim().to_string());
        }
    }

    (field_name, file_name, content_type)
}

fn extract_quoted(line: &str, marker: &str) -> Option<String> {
    let lower = line.to_ascii_lowercase();
    let idx = lower.find(marker)?;
    let rest = &line[idx + marker.len()..];
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

fn skip_crlf(mut s: &[u8]) -> &[u8] {
    if let [b'\r', b'\n', rest @ ..] = s {
        s = rest;
    }
    s
}

fn trim_trailing_crlf(s: &[u8]) -> &[u8] {
    match s {
        [rest @ .., b'\r', b'\n'] => rest,
        [rest @ .., b'\n'] => rest,
        _ => s,
    }
}
