//! JSON text for Chelate documents.
//!
//! Documents are read and written with `serde_json`; object key order is
//! preserved in both directions. Readers accept both meta-key spellings
//! (`@type`/`@t`, `@id`/`@i`, `@ref`/`@r`, `@items`/`@e`, `@keys`/`@k`).

use std::io;

use chelate_core::{Codec, CodecError, Heap, MetaKeys, Node, ReadOptions, Resolved, Value, Wire, WriteOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum TextError {
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// How documents are rendered as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOptions {
    /// Write `@t`, `@i`, `@r`, `@e`, `@k` instead of the long meta keys.
    pub short_meta_keys: bool,
    /// Indent output.
    pub pretty: bool,
}

impl TextOptions {
    pub fn with_short_meta_keys(mut self, short: bool) -> Self {
        self.short_meta_keys = short;
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    fn meta_keys(&self) -> &'static MetaKeys {
        if self.short_meta_keys {
            &MetaKeys::SHORT
        } else {
            &MetaKeys::LONG
        }
    }
}

/// Compact JSON with long meta keys.
pub fn to_string(node: &Node) -> Result<String, TextError> {
    to_string_with(node, &TextOptions::default())
}

pub fn to_string_pretty(node: &Node) -> Result<String, TextError> {
    to_string_with(node, &TextOptions::default().with_pretty(true))
}

pub fn to_string_with(node: &Node, opts: &TextOptions) -> Result<String, TextError> {
    let wire = Wire::new(node, opts.meta_keys());
    let text = if opts.pretty {
        serde_json::to_string_pretty(&wire)?
    } else {
        serde_json::to_string(&wire)?
    };
    Ok(text)
}

pub fn to_writer<W: io::Write>(writer: W, node: &Node, opts: &TextOptions) -> Result<(), TextError> {
    let wire = Wire::new(node, opts.meta_keys());
    if opts.pretty {
        serde_json::to_writer_pretty(writer, &wire)?;
    } else {
        serde_json::to_writer(writer, &wire)?;
    }
    Ok(())
}

pub fn from_str(text: &str) -> Result<Node, TextError> {
    Ok(serde_json::from_str(text)?)
}

pub fn from_slice(bytes: &[u8]) -> Result<Node, TextError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn from_reader<R: io::Read>(reader: R) -> Result<Node, TextError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Serializes the graph reachable from `root` straight to JSON text.
#[instrument(skip_all)]
pub fn encode(
    codec: &Codec,
    heap: &Heap,
    root: &Value,
    write_opts: &WriteOptions,
    text_opts: &TextOptions,
) -> Result<String, TextError> {
    let node = codec.serialize(heap, root, write_opts)?;
    let text = to_string_with(&node, text_opts)?;
    debug!(bytes = text.len(), "encoded document");
    Ok(text)
}

/// Parses JSON text and builds a fresh graph from it.
#[instrument(skip_all, fields(bytes = text.len()))]
pub fn decode(codec: &Codec, text: &str, opts: &ReadOptions) -> Result<Resolved, TextError> {
    let node = from_str(text)?;
    let resolved = codec.deserialize(&node, opts)?;
    debug!(objects = resolved.heap.len(), "decoded document");
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_on_write() {
        let node = from_str(r#"{"@type": "Box", "@id": 3, "@items": [{"@ref": 3}]}"#).unwrap();
        let text = to_string_with(&node, &TextOptions::default().with_short_meta_keys(true)).unwrap();
        assert_eq!(text, r#"{"@t":"Box","@i":3,"@e":[{"@r":3}]}"#);
        assert_eq!(from_str(&text).unwrap(), node);
    }

    #[test]
    fn keeps_field_order() {
        let text = r#"{"zeta":1,"alpha":2,"mid":[true,null,"x"]}"#;
        assert_eq!(to_string(&from_str(text).unwrap()).unwrap(), text);
    }

    #[test]
    fn wire_errors_surface_as_json_errors() {
        let err = from_str(r#"{"@ref": 1, "name": "x"}"#).unwrap_err();
        assert!(matches!(err, TextError::Json(_)));
        assert!(err.to_string().contains("@ref"), "{err}");

        assert!(matches!(from_str("{"), Err(TextError::Json(_))));
    }

    #[test]
    fn text_options_from_config() {
        let opts: TextOptions = serde_json::from_str(r#"{"pretty": true}"#).unwrap();
        assert!(opts.pretty);
        assert!(!opts.short_meta_keys);
    }
}
