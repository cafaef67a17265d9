//! Index Builder
//!
//! Encodes a key → content-location map into the trie node layout read by
//! [`RadixIndexStore`](super::RadixIndexStore). Writer processes use it to
//! prepare a rebuilt index; it is also how tests lay out fixtures.
//!
//! Nodes are emitted in pre-order, so a parent always precedes its children.
//! Edges longer than 127 bytes are split into a chain of single-child nodes.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use super::layout::{
    ChildSlot, IndexFormat, NodeHeader, INDEX_HEADER_SIZE, MAX_CHILDREN, MAX_EDGE_LEN,
};
use super::region::MappedRegion;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct SlotValue {
    offset: u64,
    length: u32,
    inserted_at_millis: u64,
}

#[derive(Debug)]
struct BuildNode {
    edge: Vec<u8>,
    value: Option<SlotValue>,
    children: Vec<(u8, BuildNode)>,
    offset: u64,
}

/// Builds an encoded radix index from a set of keys
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    format: IndexFormat,
    entries: BTreeMap<Vec<u8>, SlotValue>,
}

impl IndexBuilder {
    /// Create an empty builder for the given value-slot layout
    pub fn new(format: IndexFormat) -> Self {
        Self {
            format,
            entries: BTreeMap::new(),
        }
    }

    /// Map `key` to `(offset, length)`, replacing any previous mapping
    pub fn insert(&mut self, key: &[u8], offset: u64, length: u32) -> &mut Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.insert_at(key, offset, length, now)
    }

    /// Like [`insert`](Self::insert) with an explicit insertion time (legacy layout)
    pub fn insert_at(
        &mut self,
        key: &[u8],
        offset: u64,
        length: u32,
        inserted_at_millis: u64,
    ) -> &mut Self {
        self.entries.insert(
            key.to_vec(),
            SlotValue {
                offset,
                length,
                inserted_at_millis,
            },
        );
        self
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no keys were inserted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the trie area (everything after the index header)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let entries: Vec<(&[u8], SlotValue)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_slice(), *v))
            .collect();

        let mut root = if entries.is_empty() {
            BuildNode {
                edge: Vec::new(),
                value: None,
                children: Vec::new(),
                offset: 0,
            }
        } else {
            build(&entries, 0)?
        };

        let mut next = 0u64;
        assign_offsets(&mut root, &mut next, self.format);

        let mut out = Vec::with_capacity(next as usize);
        write_node(&root, &mut out, self.format)?;
        debug_assert_eq!(out.len() as u64, next);

        debug!(keys = self.entries.len(), bytes = out.len(), "encoded index");
        Ok(out)
    }

    /// Encode and copy the trie into `region` after its header.
    ///
    /// The coordinator header is left untouched; callers hold the writer flag
    /// around this. Returns the number of trie bytes written.
    pub fn publish(&self, region: &MappedRegion) -> Result<u64> {
        let bytes = self.encode()?;
        region.ensure_len(INDEX_HEADER_SIZE + bytes.len() as u64)?;
        region
            .write_bytes(INDEX_HEADER_SIZE, &bytes)
            .ok_or_else(|| Error::IndexBuild("trie does not fit in region".into()))?;
        Ok(bytes.len() as u64)
    }
}

/// Build the subtree for `entries`, all of which share `key[..depth]`
fn build(entries: &[(&[u8], SlotValue)], depth: usize) -> Result<BuildNode> {
    let first = entries[0].0;
    let last = entries[entries.len() - 1].0;

    // Entries are sorted, so the first and last bound the common prefix.
    let lcp = first[depth..]
        .iter()
        .zip(&last[depth..])
        .take_while(|(a, b)| a == b)
        .count();
    let edge_len = lcp.min(MAX_EDGE_LEN);
    let end = depth + edge_len;

    let (value, rest) = if first.len() == end {
        (Some(entries[0].1), &entries[1..])
    } else {
        (None, entries)
    };

    let mut children = Vec::new();
    let mut start = 0;
    while start < rest.len() {
        let branch = rest[start].0[end];
        let mut stop = start + 1;
        while stop < rest.len() && rest[stop].0[end] == branch {
            stop += 1;
        }
        children.push((branch, build(&rest[start..stop], end + 1)?));
        start = stop;
    }

    if children.len() > MAX_CHILDREN {
        return Err(Error::IndexBuild(format!(
            "node at depth {} needs {} children, at most {} are encodable",
            end,
            children.len(),
            MAX_CHILDREN
        )));
    }

    Ok(BuildNode {
        edge: first[depth..end].to_vec(),
        value,
        children,
        offset: 0,
    })
}

fn header_of(node: &BuildNode) -> NodeHeader {
    NodeHeader::new(node.value.is_some(), node.edge.len(), node.children.len())
}

fn assign_offsets(node: &mut BuildNode, next: &mut u64, format: IndexFormat) {
    node.offset = *next;
    *next += header_of(node).node_size(format);
    for (_, child) in node.children.iter_mut() {
        assign_offsets(child, next, format);
    }
}

fn write_node(node: &BuildNode, out: &mut Vec<u8>, format: IndexFormat) -> Result<()> {
    debug_assert_eq!(out.len() as u64, node.offset);
    out.extend_from_slice(&header_of(node).to_bytes());

    for (branch, child) in &node.children {
        let slot = ChildSlot::new(*branch, child.offset).ok_or_else(|| {
            Error::IndexBuild(format!("child offset {} exceeds 56 bits", child.offset))
        })?;
        out.extend_from_slice(&slot.raw().to_be_bytes());
    }

    out.extend_from_slice(&node.edge);

    if let Some(v) = node.value {
        out.extend_from_slice(&v.offset.to_be_bytes());
        match format {
            IndexFormat::Current => {
                out.extend_from_slice(&v.length.to_be_bytes());
            }
            IndexFormat::Legacy => {
                out.extend_from_slice(&v.inserted_at_millis.to_be_bytes());
                out.extend_from_slice(&v.length.to_be_bytes());
                out.extend_from_slice(&0u32.to_ne_bytes());
            }
        }
    }

    for (_, child) in &node.children {
        write_node(child, out, format)?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
