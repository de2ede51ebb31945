//! In-memory workflow graph in the ComfyUI API format.
//!
//! A document maps opaque node ids to node records:
//!
//! ```json
//! { "3": { "class_type": "KSampler", "inputs": { "seed": 5, "steps": 20 } } }
//! ```
//!
//! Only `class_type` and `inputs` are interpreted. Everything else, including
//! entries that are not node records at all, is carried through untouched so
//! that a loaded template serializes back to the same graph.
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const SAMPLER_CLASS: &str = "KSampler";
pub const TEXT_ENCODER_CLASS: &str = "CLIPTextEncode";

/// Node kinds the injector knows how to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'a> {
    /// `KSampler`: owns the `seed` input.
    Sampler,
    /// `CLIPTextEncode`: owns the `text` input.
    TextEncoder,
    /// Any other class; passed through.
    Other(&'a str),
    /// A record without a `class_type`.
    Untyped,
}

/// `None` means the key was absent. A present `inputs: null` is kept as
/// `Some(Value::Null)`; a present `class_type: null` is not a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub class_type: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl NodeRecord {
    pub fn kind(&self) -> NodeKind<'_> {
        match self.class_type.as_deref() {
            Some(SAMPLER_CLASS) => NodeKind::Sampler,
            Some(TEXT_ENCODER_CLASS) => NodeKind::TextEncoder,
            Some(other) => NodeKind::Other(other),
            None => NodeKind::Untyped,
        }
    }

    /// The node's input mapping. `None` when `inputs` is missing or is not an
    /// object; such nodes are inert.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.inputs.as_ref().and_then(Value::as_object)
    }

    pub fn fields_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.inputs.as_mut().and_then(Value::as_object_mut)
    }
}

/// One entry of the document. Entries that do not look like node records are
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeEntry {
    Record(NodeRecord),
    Opaque(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphDocument {
    nodes: BTreeMap<String, NodeEntry>,
}

impl GraphDocument {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        // A map of records and JSON values always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        match self.nodes.get(id)? {
            NodeEntry::Record(node) => Some(node),
            NodeEntry::Opaque(_) => None,
        }
    }

    /// Iterate over every node record, skipping opaque entries.
    pub fn records_mut(&mut self) -> impl Iterator<Item = (&str, &mut NodeRecord)> {
        self.nodes.iter_mut().filter_map(|(id, entry)| match entry {
            NodeEntry::Record(node) => Some((id.as_str(), node)),
            NodeEntry::Opaque(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
