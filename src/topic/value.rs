//! The value model carried by topic envelopes.
//!
//! JSON plus one extra case, [`Value::Binary`], for file attachments. On the
//! wire a binary value is a `{"$file": id}` placeholder pointing at a
//! multipart part; in memory it is the bytes themselves.

use std::collections::HashMap;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::{Number, Value as Json};

use crate::error::Error;
use crate::multipart::Part;

pub(crate) const FILE_KEY: &str = "$file";

/// Raw bytes with the metadata needed to send them as a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Blob {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into(), filename: None, content_type: None }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl From<&Part> for Blob {
    fn from(part: &Part) -> Self {
        Self {
            bytes: part.bytes(),
            filename: part.filename.clone(),
            content_type: part.content_type.clone(),
        }
    }
}

/// A JSON-like tree that may contain binary leaves.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Binary(Blob),
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Binary(blob) => Some(blob),
            _ => None,
        }
    }

    /// True if a binary leaf exists anywhere in the tree.
    pub fn has_binary(&self) -> bool {
        match self {
            Self::Binary(_) => true,
            Self::Array(items) => items.iter().any(Value::has_binary),
            Self::Object(map) => map.values().any(Value::has_binary),
            _ => false,
        }
    }

    /// Replaces every `{"$file": id}` placeholder with the matching blob.
    ///
    /// A placeholder naming an id absent from `files` is a decode error.
    pub fn resolve_files(self, files: &HashMap<String, Blob>) -> Result<Self, Error> {
        match self {
            Self::Object(map) => {
                if let Some(id) = file_ref(&map) {
                    return files.get(id)
                        .cloned()
                        .map(Self::Binary)
                        .ok_or_else(|| Error::ProtocolDecode(format!("unknown file reference `{id}`")));
                }
                map.into_iter()
                    .map(|(k, v)| Ok((k, v.resolve_files(files)?)))
                    .collect::<Result<IndexMap<_, _>, Error>>()
                    .map(Self::Object)
            }
            Self::Array(items) => items.into_iter()
                .map(|v| v.resolve_files(files))
                .collect::<Result<Vec<_>, Error>>()
                .map(Self::Array),
            other => Ok(other),
        }
    }

    /// Converts to JSON, handing each binary leaf to `on_binary` and putting
    /// `{"$file": <returned id>}` in its place.
    pub fn into_json(self, on_binary: &mut dyn FnMut(Blob) -> String) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(b),
            Self::Number(n) => Json::Number(n),
            Self::String(s) => Json::String(s),
            Self::Array(items) => Json::Array(items.into_iter().map(|v| v.into_json(on_binary)).collect()),
            Self::Object(map) => Json::Object(
                map.into_iter().map(|(k, v)| (k, v.into_json(on_binary))).collect(),
            ),
            Self::Binary(blob) => {
                let id = on_binary(blob);
                let mut placeholder = serde_json::Map::new();
                placeholder.insert(FILE_KEY.to_owned(), Json::String(id));
                Json::Object(placeholder)
            }
        }
    }
}

fn file_ref(map: &IndexMap<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(FILE_KEY)?.as_str()
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<Blob> for Value {
    fn from(blob: Blob) -> Self { Self::Binary(blob) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::String(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::String(s) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Self::Number(n.into()) }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Object(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholders_resolve_anywhere() {
        let files = HashMap::from([("a".to_owned(), Blob::new("AAA").filename("a.txt"))]);
        let value = Value::from(json!({
            "top": {"$file": "a"},
            "list": [1, {"nested": {"$file": "a"}}],
            "not_a_ref": {"$file": "a", "extra": true},
        }));

        let resolved = value.resolve_files(&files).unwrap();
        assert_eq!(resolved.get("top").and_then(Value::as_blob).map(|b| b.bytes.clone()), Some(Bytes::from("AAA")));
        let Some(Value::Array(list)) = resolved.get("list") else { panic!("list") };
        assert!(list[1].get("nested").unwrap().as_blob().is_some());
        assert!(matches!(resolved.get("not_a_ref"), Some(Value::Object(m)) if m.len() == 2));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let err = Value::from(json!([{"$file": "ghost"}])).resolve_files(&HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "protocol decode: unknown file reference `ghost`");
    }

    #[test]
    fn binary_leaves_become_placeholders() {
        let value: Value = [
            ("name", Value::from("report")),
            ("pdf", Value::from(Blob::new(vec![1u8, 2]).content_type("application/pdf"))),
        ]
        .into_iter()
        .collect();
        assert!(value.has_binary());

        let mut seen = Vec::new();
        let json = value.into_json(&mut |blob| {
            seen.push(blob);
            "f0".to_owned()
        });
        assert_eq!(json, json!({"name": "report", "pdf": {"$file": "f0"}}));
        assert_eq!(seen[0].content_type.as_deref(), Some("application/pdf"));
    }
}
