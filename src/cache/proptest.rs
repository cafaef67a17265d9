//! Property-Based Tests for the Radix Index
//!
//! Builds tries from generated key sets with [`IndexBuilder`], publishes them
//! into a mapped region and checks lookups through [`RadixIndexStore`].
//!
//! # Test Properties
//!
//! 1. **Exact Hits**: every inserted key returns its own `(offset, length)`
//! 2. **Clean Misses**: keys never inserted return nothing
//! 3. **Prefix Safety**: proper prefixes of inserted keys miss unless inserted
//! 4. **Robustness**: arbitrary trie bytes never panic or loop
//! 5. **Corrupt Edges**: a flipped byte in a shared edge turns hits into
//!    misses, never into another key's locator

#![cfg(test)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;

use super::builder::IndexBuilder;
use super::entry::ColumnletKey;
use super::index::RadixIndexStore;
use super::layout::{IndexFormat, NodeHeader, CHILD_SLOT_SIZE, INDEX_HEADER_SIZE, NODE_HEADER_SIZE};
use super::region::MappedRegion;

fn publish(
    entries: &BTreeMap<Vec<u8>, (u64, u32)>,
    format: IndexFormat,
) -> (tempfile::TempDir, RadixIndexStore) {
    let mut builder = IndexBuilder::new(format);
    for (key, (offset, length)) in entries {
        builder.insert(key, *offset, *length);
    }
    let size = INDEX_HEADER_SIZE + builder.encode().unwrap().len() as u64;

    let dir = tempfile::tempdir().unwrap();
    let region = Arc::new(MappedRegion::open(dir.path().join("index"), size).unwrap());
    builder.publish(&region).unwrap();
    (dir, RadixIndexStore::new(region, format).unwrap())
}

/// Trie-relative positions of edge bytes on nodes that have children.
///
/// The encoder lays nodes out contiguously in pre-order, so a linear walk
/// visits every node.
fn shared_edge_positions(trie: &[u8], format: IndexFormat) -> Vec<u64> {
    let mut positions = Vec::new();
    let mut node = 0u64;
    while node + NODE_HEADER_SIZE <= trie.len() as u64 {
        let at = node as usize;
        let header = NodeHeader::from_bytes([trie[at], trie[at + 1]]);
        if header.children() > 0 {
            let edge_start = node + NODE_HEADER_SIZE + header.children() as u64 * CHILD_SLOT_SIZE;
            positions.extend(edge_start..edge_start + header.edge_len() as u64);
        }
        node += header.node_size(format);
    }
    positions
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Key components biased toward small ids so keys share long prefixes.
fn key_strategy() -> impl Strategy<Value = ColumnletKey> {
    (
        prop_oneof![0u64..4, any::<u64>()],
        prop_oneof![0u16..4, any::<u16>()],
        any::<u16>(),
    )
        .prop_map(|(f, r, c)| ColumnletKey::new(f, r, c))
}

fn locator_strategy() -> impl Strategy<Value = (u64, u32)> {
    (0u64..(1 << 40), any::<u32>())
}

fn key_map_strategy() -> impl Strategy<Value = BTreeMap<Vec<u8>, (u64, u32)>> {
    prop::collection::btree_map(
        key_strategy().prop_map(|k| k.to_bytes().to_vec()),
        locator_strategy(),
        1..64,
    )
}

/// Raw keys of mixed length over a tiny alphabet, so many are prefixes of others.
fn raw_key_map_strategy() -> impl Strategy<Value = BTreeMap<Vec<u8>, (u64, u32)>> {
    prop::collection::btree_map(
        prop::collection::vec(0u8..3, 0..12),
        locator_strategy(),
        1..48,
    )
}

fn format_strategy() -> impl Strategy<Value = IndexFormat> {
    prop_oneof![Just(IndexFormat::Current), Just(IndexFormat::Legacy)]
}

// =============================================================================
// Lookup Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every inserted columnlet key hits with its exact locator.
    #[test]
    fn prop_inserted_keys_hit(entries in key_map_strategy(), format in format_strategy()) {
        let (_dir, index) = publish(&entries, format);
        for (key, (offset, length)) in &entries {
            let loc = index.try_lookup(key)?;
            prop_assert!(loc.is_some(), "missing key {:?}", key);
            let loc = loc.unwrap();
            prop_assert_eq!(loc.offset(), *offset);
            prop_assert_eq!(loc.length(), *length);
        }
    }

    /// Property: keys outside the inserted set miss.
    #[test]
    fn prop_absent_keys_miss(
        entries in key_map_strategy(),
        queries in prop::collection::vec(key_strategy(), 1..32),
    ) {
        let (_dir, index) = publish(&entries, IndexFormat::Current);
        for query in queries {
            let bytes = query.to_bytes();
            if entries.contains_key(bytes.as_slice()) {
                continue;
            }
            prop_assert!(index.try_lookup(&bytes)?.is_none());
        }
    }

    /// Property: variable-length keys hit exactly, and their uninserted
    /// prefixes and extensions miss.
    #[test]
    fn prop_prefix_keys(entries in raw_key_map_strategy()) {
        let (_dir, index) = publish(&entries, IndexFormat::Current);

        let mut queries = BTreeSet::new();
        for key in entries.keys() {
            for end in 0..=key.len() {
                queries.insert(key[..end].to_vec());
            }
            let mut longer = key.clone();
            longer.push(7);
            queries.insert(longer);
        }

        for query in queries {
            let found = index.try_lookup(&query)?;
            match entries.get(&query) {
                Some((offset, length)) => {
                    let loc = found.unwrap();
                    prop_assert_eq!((loc.offset(), loc.length()), (*offset, *length));
                }
                None => prop_assert!(found.is_none(), "false hit for {:?}", query),
            }
        }
    }

    /// Property: shared prefixes longer than one edge are split and still resolve.
    #[test]
    fn prop_long_shared_prefix(
        prefix_len in 120usize..400,
        suffixes in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..4), 1..16),
    ) {
        let prefix = vec![0xA5u8; prefix_len];
        let entries: BTreeMap<Vec<u8>, (u64, u32)> = suffixes
            .iter()
            .enumerate()
            .map(|(i, s)| ([prefix.as_slice(), s.as_slice()].concat(), (i as u64 * 64, i as u32)))
            .collect();

        let (_dir, index) = publish(&entries, IndexFormat::Current);
        for (key, (offset, _)) in &entries {
            prop_assert_eq!(index.try_lookup(key)?.map(|l| l.offset()), Some(*offset));
        }
        prop_assert!(index.try_lookup(&prefix[..prefix_len - 1])?.is_none());
    }

    /// Property: a trie area of arbitrary bytes never panics or hangs a lookup.
    #[test]
    fn prop_arbitrary_bytes_never_panic(
        trie in prop::collection::vec(any::<u8>(), 2..512),
        key in prop::collection::vec(any::<u8>(), 0..32),
        format in format_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let region = Arc::new(
            MappedRegion::open(dir.path().join("index"), INDEX_HEADER_SIZE + trie.len() as u64)
                .unwrap(),
        );
        region.write_bytes(INDEX_HEADER_SIZE, &trie).unwrap();
        let index = RadixIndexStore::new(region, format)?;

        // Either outcome is fine; returning at all is the property.
        let _ = index.try_lookup(&key);
        let _ = index.lookup(&key);
    }

    /// Property: corrupting one byte of an edge shared by several keys makes
    /// those keys miss and never resolves any key to a foreign locator.
    #[test]
    fn prop_corrupt_shared_edge_never_false_hit(
        entries in prop::collection::btree_map(
            key_strategy().prop_map(|k| k.to_bytes().to_vec()),
            locator_strategy(),
            2..48,
        ),
        format in format_strategy(),
        pick in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let (_dir, index) = publish(&entries, format);
        let region = index.region();
        let trie = region
            .read_vec(INDEX_HEADER_SIZE, (region.len() - INDEX_HEADER_SIZE) as usize)
            .unwrap();

        let positions = shared_edge_positions(&trie, format);
        prop_assume!(!positions.is_empty());
        let pos = positions[pick.index(positions.len())];
        region
            .write_bytes(INDEX_HEADER_SIZE + pos, &[trie[pos as usize] ^ mask])
            .unwrap();

        let mut misses = 0;
        for (key, (offset, length)) in &entries {
            match index.try_lookup(key)? {
                Some(loc) => {
                    prop_assert_eq!((loc.offset(), loc.length()), (*offset, *length));
                }
                None => misses += 1,
            }
        }
        prop_assert!(misses >= 2, "only {} keys lost by the corrupt edge", misses);
    }
}
