//! `multipart/*` bodies: a byte-level parser and a writer.
//!
//! Parsing is lenient on purpose. Only a body without any boundary at all
//! is an error; a single malformed segment (no header block, no
//! `Content-Disposition`, no `name`) is logged and skipped so the remaining
//! parts still come through.
//!
//! ```rust
//! use bytes::Bytes;
//! use sluice::multipart::{self, MultipartWriter};
//!
//! let writer = MultipartWriter::with_boundary("XYZ")
//!     .field("title", "report")
//!     .file("doc", "a.bin", "application/octet-stream", &[0, 1, 2]);
//! let body = Bytes::from(writer.finish());
//!
//! let parts = multipart::parse(&body, "XYZ").unwrap();
//! assert_eq!(parts[0].text(), Some("report"));
//! assert!(parts[1].is_file());
//! ```

use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultipartError {
    #[error("content type carries no boundary parameter")]
    MissingBoundary,

    #[error("boundary `{0}` not found in body")]
    BoundaryNotFound(String),
}

/// Decoded body of a [`Part`]: text for plain fields, raw bytes for files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartValue {
    Text(String),
    Bytes(Bytes),
}

/// One segment of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub value: PartValue,
}

impl Part {
    /// A part is a file iff its disposition carried a `filename`.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            PartValue::Text(s) => Some(s),
            PartValue::Bytes(_) => None,
        }
    }

    pub fn bytes(&self) -> Bytes {
        match &self.value {
            PartValue::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            PartValue::Bytes(b) => b.clone(),
        }
    }

    /// Case-insensitive lookup in the part's own header block.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Extracts the `boundary` parameter of a `Content-Type` value, quoted or not.
pub fn boundary(content_type: &str) -> Option<String> {
    params(content_type).into_iter().find_map(|(key, value)| {
        (key == "boundary" && !value.is_empty()).then_some(value)
    })
}

/// Parses `body` using the boundary declared in `content_type`.
pub fn parse_with_content_type(body: &Bytes, content_type: &str) -> Result<Vec<Part>, MultipartError> {
    let boundary = boundary(content_type).ok_or(MultipartError::MissingBoundary)?;
    parse(body, &boundary)
}

/// Splits `body` into its parts, in wire order.
///
/// Stops at the terminal `--boundary--` or when no further delimiter exists.
pub fn parse(body: &Bytes, boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let first = find(body, &delimiter, 0)
        .ok_or_else(|| MultipartError::BoundaryNotFound(boundary.to_owned()))?;

    let mut parts = Vec::new();
    let mut cursor = first + delimiter.len();
    let mut index = 0usize;

    loop {
        if body[cursor..].starts_with(b"--") {
            break;
        }
        let start = if body[cursor..].starts_with(CRLF) { cursor + CRLF.len() } else { cursor };
        let Some(next) = find(body, &delimiter, start) else {
            break;
        };

        let mut end = next;
        if body[start..end].ends_with(CRLF) {
            end -= CRLF.len();
        }
        if let Some(part) = parse_part(body.slice(start..end), index) {
            parts.push(part);
        }

        index += 1;
        cursor = next + delimiter.len();
    }

    Ok(parts)
}

fn parse_part(raw: Bytes, index: usize) -> Option<Part> {
    let Some(split) = find(&raw, HEADER_END, 0) else {
        warn!(index, "multipart segment has no header block, skipped");
        return None;
    };

    let header_block = String::from_utf8_lossy(&raw[..split]);
    let headers: Vec<(String, String)> = header_block
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();

    let Some(disposition) = headers.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-disposition"))
        .map(|(_, v)| v.as_str())
    else {
        warn!(index, "multipart segment has no content-disposition, skipped");
        return None;
    };

    let disposition = params(disposition);
    let lookup = |key: &str| disposition.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    let Some(name) = lookup("name") else {
        warn!(index, "multipart segment has no name, skipped");
        return None;
    };
    let filename = lookup("filename");
    let content_type = headers.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone());

    let content = raw.slice(split + HEADER_END.len()..);
    let value = if filename.is_some() {
        PartValue::Bytes(content)
    } else {
        PartValue::Text(String::from_utf8_lossy(&content).into_owned())
    };

    Some(Part { name, filename, content_type, headers, value })
}

/// `key=value` parameters after the first `;` of a header value.
///
/// Keys are lowercased, values unquoted. A `;` inside quotes does not split.
/// `%22` in a quoted value decodes to `"`.
fn params(header: &str) -> Vec<(String, String)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in header.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments.into_iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            let value = value.trim();
            let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                // Quotes inside a quoted value travel as `%22`.
                Some(inner) => inner.replace("%22", "\""),
                None => value.to_owned(),
            };
            Some((key.trim().to_ascii_lowercase(), value))
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Builds a multipart body part by part.
///
/// Every part gets a `form-data` disposition, which is also what the parser
/// expects when reading a `multipart/mixed` body back.
pub struct MultipartWriter {
    boundary: String,
    buf: Vec<u8>,
}

impl MultipartWriter {
    /// A writer with a random boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("sluice-{}", Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into(), buf: Vec::new() }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Full `Content-Type` value, e.g. `multipart/mixed; boundary=...`.
    pub fn content_type(&self, subtype: &str) -> String {
        format!("multipart/{subtype}; boundary={}", self.boundary)
    }

    /// Plain text field.
    pub fn field(self, name: &str, value: &str) -> Self {
        self.part(name, None, None, value.as_bytes())
    }

    /// Text field with an explicit content type (e.g. `application/json`).
    pub fn typed_field(self, name: &str, content_type: &str, value: &[u8]) -> Self {
        self.part(name, None, Some(content_type), value)
    }

    pub fn file(self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.part(name, Some(filename), Some(content_type), bytes)
    }

    /// Closes the body with the terminal boundary.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.buf
    }

    fn part(mut self, name: &str, filename: Option<&str>, content_type: Option<&str>, bytes: &[u8]) -> Self {
        let mut head = format!("--{}\r\nContent-Disposition: form-data; name=\"{}\"", self.boundary, escape(name));
        if let Some(filename) = filename {
            head.push_str(&format!("; filename=\"{}\"", escape(filename)));
        }
        head.push_str("\r\n");
        if let Some(content_type) = content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        head.push_str("\r\n");

        self.buf.extend_from_slice(head.as_bytes());
        self.buf.extend_from_slice(bytes);
        self.buf.extend_from_slice(CRLF);
        self
    }
}

impl Default for MultipartWriter {
    fn default() -> Self { Self::new() }
}

fn escape(value: &str) -> String {
    value.replace('"', "%22").replace(['\r', '\n'], " ")
}

// ── Form ──────────────────────────────────────────────────────────────────────

/// A decoded `multipart/form-data` submission.
#[derive(Debug, Clone, Default)]
pub struct Form {
    parts: Vec<Part>,
}

impl Form {
    pub fn parse(content_type: &str, body: &Bytes) -> Result<Self, MultipartError> {
        Ok(Self { parts: parse_with_content_type(body, content_type)? })
    }

    /// First text field with this name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.parts.iter().filter(|p| !p.is_file()).find(|p| p.name == name).and_then(Part::text)
    }

    /// First file part with this name.
    pub fn file(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.is_file() && p.name == name)
    }

    pub fn files(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.is_file())
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(s: &str) -> Bytes {
        Bytes::from(s.replace('\n', "\r\n"))
    }

    #[test]
    fn boundary_quoted_and_unquoted() {
        assert_eq!(boundary("multipart/form-data; boundary=XYZ").as_deref(), Some("XYZ"));
        assert_eq!(boundary("multipart/form-data; boundary=\"a;b c\"").as_deref(), Some("a;b c"));
        assert_eq!(boundary("multipart/form-data; charset=utf-8; BOUNDARY=q").as_deref(), Some("q"));
        assert_eq!(boundary("multipart/form-data"), None);
        assert_eq!(boundary("multipart/form-data; boundary="), None);
    }

    #[test]
    fn parts_in_order_and_classified() {
        let raw = body(
            "--XYZ\n\
             Content-Disposition: form-data; name=\"a\"\n\
             \n\
             one\n\
             --XYZ\n\
             Content-Disposition: form-data; name=\"f\"; filename=\"x.txt\"\n\
             Content-Type: text/plain\n\
             \n\
             file body\n\
             --XYZ\n\
             Content-Disposition: form-data; name=\"b\"\n\
             \n\
             two\n\
             --XYZ--\n",
        );
        let parts = parse(&raw, "XYZ").unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["a", "f", "b"]);
        assert_eq!(parts[0].text(), Some("one"));
        assert!(!parts[0].is_file());
        assert!(parts[1].is_file());
        assert_eq!(parts[1].filename.as_deref(), Some("x.txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(parts[1].value, PartValue::Bytes(Bytes::from_static(b"file body")));
        assert_eq!(parts[2].text(), Some("two"));
    }

    #[test]
    fn file_bytes_are_exact() {
        let payload = [0u8, 13, 10, 13, 10, 255, 45, 45, 0];
        let raw = Bytes::from(
            MultipartWriter::with_boundary("B0")
                .file("bin", "blob.dat", "application/octet-stream", &payload)
                .finish(),
        );
        let parts = parse(&raw, "B0").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].bytes().as_ref(), &payload);
    }

    #[test]
    fn segment_without_disposition_is_skipped() {
        let raw = body(
            "--XYZ\n\
             Content-Type: text/plain\n\
             \n\
             orphan\n\
             --XYZ\n\
             Content-Disposition: form-data; filename=\"nameless\"\n\
             \n\
             orphan too\n\
             --XYZ\n\
             Content-Disposition: form-data; name=\"kept\"\n\
             \n\
             yes\n\
             --XYZ--\n",
        );
        let parts = parse(&raw, "XYZ").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "kept");
    }

    #[test]
    fn missing_boundary_is_an_error() {
        let raw = Bytes::from_static(b"no delimiters in here");
        assert_eq!(parse(&raw, "XYZ"), Err(MultipartError::BoundaryNotFound("XYZ".into())));
        assert_eq!(parse_with_content_type(&raw, "multipart/form-data"), Err(MultipartError::MissingBoundary));
    }

    #[test]
    fn stops_at_terminal_boundary() {
        let raw = body(
            "preamble\n\
             --XYZ\n\
             Content-Disposition: form-data; name=\"a\"\n\
             \n\
             1\n\
             --XYZ--\n\
             --XYZ\n\
             Content-Disposition: form-data; name=\"ghost\"\n\
             \n\
             2\n\
             --XYZ--\n",
        );
        let parts = parse(&raw, "XYZ").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "a");
    }

    #[test]
    fn unterminated_body_keeps_complete_parts() {
        let raw = body(
            "--XYZ\n\
             Content-Disposition: form-data; name=\"a\"\n\
             \n\
             1\n\
             --XYZ\n\
             Content-Disposition: form-data; name=\"cut\"\n\
             \n\
             trunc",
        );
        let parts = parse(&raw, "XYZ").unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn filename_with_semicolon_and_empty_value() {
        let raw = Bytes::from(
            MultipartWriter::with_boundary("k")
                .file("doc", "a;b.txt", "text/plain", b"")
                .field("empty", "")
                .finish(),
        );
        let parts = parse(&raw, "k").unwrap();
        assert_eq!(parts[0].filename.as_deref(), Some("a;b.txt"));
        assert!(parts[0].bytes().is_empty());
        assert_eq!(parts[1].text(), Some(""));
    }

    #[test]
    fn quotes_in_filenames_survive_the_writer() {
        let raw = Bytes::from(
            MultipartWriter::with_boundary("k")
                .file("say \"hi\"", "say \"hi\"; ok.txt", "text/plain", b"x")
                .finish(),
        );
        let parts = parse(&raw, "k").unwrap();
        assert_eq!(parts[0].name, "say \"hi\"");
        assert_eq!(parts[0].filename.as_deref(), Some("say \"hi\"; ok.txt"));
    }

    #[test]
    fn form_lookup() {
        let writer = MultipartWriter::with_boundary("F")
            .field("user", "ada")
            .file("avatar", "a.png", "image/png", b"\x89PNG");
        let content_type = writer.content_type("form-data");
        let form = Form::parse(&content_type, &Bytes::from(writer.finish())).unwrap();
        assert_eq!(form.field("user"), Some("ada"));
        assert_eq!(form.field("avatar"), None);
        assert_eq!(form.file("avatar").map(|p| p.bytes()), Some(Bytes::from_static(b"\x89PNG")));
        assert_eq!(form.files().count(), 1);
    }
}
