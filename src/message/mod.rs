//! Change-record envelope.
//!
//! A [`Message`] wraps one schemaless document together with the operation
//! that produced it and the namespace it belongs to. On construction the
//! identity field (`_id`, falling back to `id`) is lifted out of the working
//! body so adaptors can operate on the payload without re-keying logic; the
//! full input document can always be reconstructed with [`Message::document`].
//!
//! # Identity rule
//!
//! 1. If the document has `_id`, that is the identity (`id_key = "_id"`).
//! 2. Otherwise, if it has `id`, that is the identity (`id_key = "id"`).
//! 3. Otherwise there is no identity.
//!
//! When both fields are present `_id` wins and `id` stays in the body as an
//! ordinary field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Schemaless ordered-key document body.
pub type Document = Map<String, Value>;

/// Primary identity field used by document stores.
pub const PRIMARY_ID_KEY: &str = "_id";

/// Fallback identity field.
pub const FALLBACK_ID_KEY: &str = "id";

/// Operation kind carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
    #[default]
    Unknown,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
            Op::Command => "command",
            Op::Noop => "noop",
            Op::Unknown => "unknown",
        }
    }
}

impl From<&str> for Op {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Op::Insert,
            "update" => Op::Update,
            "delete" => Op::Delete,
            "command" => Op::Command,
            "noop" => Op::Noop,
            _ => Op::Unknown,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for a single change record.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Operation that produced the record.
    pub op: Op,
    /// Collection/table the record belongs to.
    pub namespace: String,
    /// Unix time of the record, set by the producing adaptor.
    pub timestamp: i64,
    id: Option<Value>,
    original_id: Option<Value>,
    id_key: Option<&'static str>,
    /// Position the identity held among the document's keys.
    id_index: usize,
    body: Option<Document>,
}

impl Message {
    /// Wrap `document`, lifting its identity field out of the working body.
    pub fn new(op: Op, namespace: impl Into<String>, document: Option<Document>) -> Self {
        let mut msg = Self {
            op,
            namespace: namespace.into(),
            timestamp: 0,
            id: None,
            original_id: None,
            id_key: None,
            id_index: 0,
            body: None,
        };
        msg.set_document(document);
        msg
    }

    /// Set the record timestamp (unix seconds).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Identity value, if one was found.
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Identity as it existed in the last document handed to the envelope.
    pub fn original_id(&self) -> Option<&Value> {
        self.original_id.as_ref()
    }

    /// Field name the identity was taken from.
    pub fn id_key(&self) -> Option<&'static str> {
        self.id_key
    }

    /// Working body with the identity field removed.
    pub fn body(&self) -> Option<&Document> {
        self.body.as_ref()
    }

    /// The document as it was handed in, identity field included.
    pub fn document(&self) -> Option<Document> {
        match self.id_key {
            Some(key) => self.document_with_id(key),
            None => self.body.clone(),
        }
    }

    /// Working body with the identity inserted under `key`.
    ///
    /// The identity goes back to the position it held in the input, so a
    /// round trip keeps key order. Overwrites any existing `key` field.
    /// Without an identity this is a copy of the body.
    pub fn document_with_id(&self, key: &str) -> Option<Document> {
        let mut doc = self.body.clone()?;
        let Some(id) = &self.id else {
            return Some(doc);
        };
        doc.shift_remove(key);
        let at = self.id_index.min(doc.len());
        doc.shift_insert(at, key.to_string(), id.clone());
        Some(doc)
    }

    /// Replace the document, re-deriving identity from the new input.
    pub fn set_document(&mut self, document: Option<Document>) {
        self.id = None;
        self.original_id = None;
        self.id_key = None;
        self.id_index = 0;

        let Some(mut doc) = document else {
            self.body = None;
            return;
        };

        for key in [PRIMARY_ID_KEY, FALLBACK_ID_KEY] {
            let Some(index) = doc.keys().position(|k| k == key) else {
                continue;
            };
            if let Some(id) = doc.shift_remove(key) {
                self.original_id = Some(id.clone());
                self.id = Some(id);
                self.id_key = Some(key);
                self.id_index = index;
            }
            break;
        }
        self.body = Some(doc);
    }

    /// Identity rendered for display and checkpoint records.
    ///
    /// Absent and `null` identities render as the empty string.
    pub fn id_as_string(&self) -> String {
        self.id.as_ref().map(value_to_id_string).unwrap_or_default()
    }
}

fn value_to_id_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Extended-JSON ObjectId
        Value::Object(map) if map.len() == 1 => match map.get("$oid") {
            Some(Value::String(hex)) => hex.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}
