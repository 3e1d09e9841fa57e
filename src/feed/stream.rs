//! Realtime Database event streams
//!
//! The REST streaming endpoint answers with `text/event-stream`. Each event
//! names an operation (`put`, `patch`, `keep-alive`, `cancel`,
//! `auth_revoked`) and carries a JSON `{path, data}` payload that is applied
//! to a locally held copy of the location.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::{FeedError, FeedResult};

/// A raw server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder
///
/// Bytes can be pushed in arbitrary chunks; lines are only decoded once
/// complete, so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct EventParser {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and return every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line[..]);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }

            // Comment line
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PathData {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Decoded database event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
    Unknown(String),
}

impl StreamEvent {
    pub fn parse(event: &ServerEvent) -> FeedResult<Self> {
        match event.event.as_str() {
            "put" => {
                let payload: PathData = serde_json::from_str(&event.data)?;
                Ok(StreamEvent::Put {
                    path: payload.path,
                    data: payload.data,
                })
            }
            "patch" => {
                let payload: PathData = serde_json::from_str(&event.data)?;
                Ok(StreamEvent::Patch {
                    path: payload.path,
                    data: payload.data,
                })
            }
            "keep-alive" => Ok(StreamEvent::KeepAlive),
            "cancel" => Ok(StreamEvent::Cancel(event.data.clone())),
            "auth_revoked" => Ok(StreamEvent::AuthRevoked),
            other => Ok(StreamEvent::Unknown(other.to_string())),
        }
    }
}

/// Replace the value at `path` (relative to the streamed location).
///
/// `null` deletes the child.
pub fn apply_put(tree: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *tree = data;
        return;
    };

    let mut node = tree;
    for segment in parents {
        node = as_object(node)
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }

    let children = as_object(node);
    if data.is_null() {
        children.remove(*last);
    } else {
        children.insert(last.to_string(), data);
    }
}

/// Merge each child of `data` into the value at `path`
pub fn apply_patch(tree: &mut Value, path: &str, data: Value) -> FeedResult<()> {
    let Value::Object(children) = data else {
        return Err(FeedError::Parse(format!("patch at {} is not an object", path)));
    };

    let base = path.trim_end_matches('/');
    for (key, value) in children {
        apply_put(tree, &format!("{}/{}", base, key), value);
    }
    Ok(())
}

/// Coerce a node into an object so children can be addressed by key.
/// Arrays keep their elements under index keys.
fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        let converted = match node.take() {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Map::new(),
        };
        *node = Value::Object(converted);
    }

    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just converted to an object"),
    }
}
