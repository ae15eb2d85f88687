//! Topic envelopes and their wire encoding.
//!
//! Request: a `multipart/form-data` body whose `body` field holds
//! `{type?, target, requestUUID?, body, files?: [{id}]}`; other parts are
//! attachments referenced from `body` as `{"$file": id}`.
//!
//! Response: `{state, target, requestUUID?, body}` as `application/json`, or
//! as `multipart/mixed` (a JSON part named `body` followed by one part per
//! attachment) when the body carries binary values.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::multipart::{self, MultipartWriter, Part};
use crate::topic::value::{Blob, Value};

const BODY_FIELD: &str = "body";

/// How a topic request is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    /// Published on the intent bus; the first responder answers.
    #[default]
    Intent,
    /// Sent to the first handler of the router module named by the target.
    Router,
}

/// A decoded, validated topic call. `$file` placeholders in `body` are
/// already replaced by their attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRequest {
    pub kind: TopicKind,
    pub target: String,
    pub request_uuid: Option<String>,
    pub body: Value,
}

#[derive(Deserialize)]
struct WireRequest {
    #[serde(rename = "type", default)]
    kind: Option<TopicKind>,
    target: String,
    #[serde(rename = "requestUUID", default)]
    request_uuid: Option<String>,
    #[serde(default)]
    body: serde_json::Value,
    #[serde(default)]
    files: Option<Vec<FileDecl>>,
}

#[derive(Deserialize)]
struct FileDecl {
    #[serde(default)]
    id: Option<String>,
}

impl TopicRequest {
    /// Decodes a topic request body.
    pub fn decode(body: &Bytes, content_type: &str) -> Result<Self, Error> {
        let parts = multipart::parse_with_content_type(body, content_type)?;
        let meta = parts.iter()
            .find(|p| p.name == BODY_FIELD)
            .ok_or_else(|| Error::ProtocolDecode("missing `body` field".to_owned()))?;

        let wire: WireRequest = envelope(&meta.bytes())?;

        let files = attachments(&parts, wire.files.as_deref());
        Ok(Self {
            kind: wire.kind.unwrap_or_default(),
            target: wire.target,
            request_uuid: wire.request_uuid,
            body: Value::from(wire.body).resolve_files(&files)?,
        })
    }

    /// Encodes this request as `(content type, body)`; the client side of
    /// [`TopicRequest::decode`].
    pub fn encode(self) -> Result<(String, Vec<u8>), Error> {
        let mut files = Vec::new();
        let body = self.body.into_json(&mut |blob| collect(&mut files, blob));

        let mut meta = serde_json::json!({ "type": self.kind, "target": self.target, "body": body });
        if let Some(uuid) = self.request_uuid {
            meta["requestUUID"] = uuid.into();
        }
        if !files.is_empty() {
            meta["files"] = files.iter().map(|(id, _)| serde_json::json!({ "id": id })).collect();
        }

        let writer = MultipartWriter::new();
        let content_type = writer.content_type("form-data");
        let writer = writer.typed_field(BODY_FIELD, "application/json", &serde_json::to_vec(&meta)?);
        Ok((content_type, attach(writer, files).finish()))
    }
}

/// Maps file ids to attachments: the declared ids when `files` is present,
/// otherwise every file part under its field name.
fn attachments(parts: &[Part], declared: Option<&[FileDecl]>) -> HashMap<String, Blob> {
    match declared {
        Some(decls) => decls.iter()
            .filter_map(|d| d.id.as_deref())
            .filter_map(|id| {
                let part = parts.iter().find(|p| p.name == id && p.name != BODY_FIELD)?;
                Some((id.to_owned(), Blob::from(part)))
            })
            .collect(),
        None => parts.iter()
            .filter(|p| p.is_file() && p.name != BODY_FIELD)
            .map(|p| (p.name.clone(), Blob::from(p)))
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicState {
    Success,
    Error,
}

/// The answer to a topic call.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicResponse {
    pub state: TopicState,
    pub target: String,
    pub request_uuid: Option<String>,
    pub body: Value,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    state: TopicState,
    target: String,
    #[serde(rename = "requestUUID", default, skip_serializing_if = "Option::is_none")]
    request_uuid: Option<String>,
    #[serde(default)]
    body: serde_json::Value,
}

impl TopicResponse {
    pub fn success(target: impl Into<String>, request_uuid: Option<String>, body: Value) -> Self {
        Self { state: TopicState::Success, target: target.into(), request_uuid, body }
    }

    /// `{state: "error", body: {message}}`.
    pub fn error(target: impl Into<String>, request_uuid: Option<String>, message: impl Into<String>) -> Self {
        let body = [("message", Value::String(message.into()))].into_iter().collect();
        Self { state: TopicState::Error, target: target.into(), request_uuid, body }
    }

    /// Encodes as `(content type, body)`: plain JSON, or `multipart/mixed`
    /// when the body holds binary values.
    pub fn encode(self) -> Result<(String, Vec<u8>), Error> {
        let mut files = Vec::new();
        let body = self.body.into_json(&mut |blob| collect(&mut files, blob));
        let meta = serde_json::to_vec(&WireResponse {
            state: self.state,
            target: self.target,
            request_uuid: self.request_uuid,
            body,
        })?;

        if files.is_empty() {
            return Ok(("application/json".to_owned(), meta));
        }
        let writer = MultipartWriter::new();
        let content_type = writer.content_type("mixed");
        let writer = writer.typed_field(BODY_FIELD, "application/json", &meta);
        Ok((content_type, attach(writer, files).finish()))
    }

    /// Decodes either response encoding; the client side of
    /// [`TopicResponse::encode`].
    pub fn decode(body: &Bytes, content_type: &str) -> Result<Self, Error> {
        let (meta, files) = if content_type.to_ascii_lowercase().starts_with("multipart/") {
            let parts = multipart::parse_with_content_type(body, content_type)?;
            let meta = parts.iter()
                .find(|p| p.name == BODY_FIELD)
                .map(Part::bytes)
                .ok_or_else(|| Error::ProtocolDecode("missing `body` part".to_owned()))?;
            (meta, attachments(&parts, None))
        } else {
            (body.clone(), HashMap::new())
        };

        let wire: WireResponse = envelope(&meta)?;
        Ok(Self {
            state: wire.state,
            target: wire.target,
            request_uuid: wire.request_uuid,
            body: Value::from(wire.body).resolve_files(&files)?,
        })
    }
}

/// Envelopes are JSON objects only. serde would also accept a struct in
/// positional array form, which is not a valid envelope.
fn envelope<T: DeserializeOwned>(raw: &[u8]) -> Result<T, Error> {
    let json: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| Error::ProtocolDecode(e.to_string()))?;
    if !json.is_object() {
        return Err(Error::ProtocolDecode("envelope must be a JSON object".to_owned()));
    }
    serde_json::from_value(json).map_err(|e| Error::ProtocolDecode(e.to_string()))
}

fn collect(files: &mut Vec<(String, Blob)>, blob: Blob) -> String {
    let id = Uuid::new_v4().simple().to_string();
    files.push((id.clone(), blob));
    id
}

fn attach(writer: MultipartWriter, files: Vec<(String, Blob)>) -> MultipartWriter {
    files.into_iter().fold(writer, |writer, (id, blob)| {
        let filename = blob.filename.unwrap_or_else(|| id.clone());
        let content_type = blob.content_type.as_deref().unwrap_or("application/octet-stream");
        writer.file(&id, &filename, content_type, &blob.bytes)
    })
}
