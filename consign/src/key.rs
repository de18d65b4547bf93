//! Identity keys, shard routing and tag handling.

use std::hash::Hasher;

use fnv::FnvHasher;
use rustc_hash::FxHashSet;

/// Derive the identity key of a metric from its name and tags.
///
/// Tags are sorted in place so that two updates differing only in tag order
/// land in the same accumulator. Duplicates are kept: a tag list carrying the
/// same tag twice names a different identity than the deduplicated list, even
/// though both render identically after the send-time merge.
pub(crate) fn identity_key(name: &str, tags: &mut [String]) -> String {
    tags.sort_unstable();
    let mut out = String::with_capacity(name.len() + tags.iter().map(String::len).sum::<usize>());
    out.push_str(name);
    for tag in tags.iter() {
        out.push_str(tag);
    }
    out
}

/// Route a metric name to a shard index in `0..shards`.
///
/// FNV-1a over the name only -- tags never affect routing, so every
/// tag-variant of one name is serialized by the same worker.
pub(crate) fn shard_index(name: &str, shards: usize) -> usize {
    debug_assert!(shards > 0);
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    usize::try_from(hasher.finish() % shards as u64).expect("shard count exceeds usize")
}

/// Prefix `name` with `namespace` unless the namespace is empty or the name
/// already carries it.
pub(crate) fn prepend_namespace(namespace: &str, name: &str) -> String {
    if namespace.is_empty() || name.starts_with(namespace) {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Merge the global tag set into call-site tags, dropping duplicates.
///
/// First occurrence wins the position, so the result is stable for a given
/// input order.
pub(crate) fn combine_tags(global: &[String], call: &[String]) -> Vec<String> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut merged = Vec::with_capacity(global.len() + call.len());
    for tag in global.iter().chain(call) {
        if seen.insert(tag.as_str()) {
            merged.push(tag.clone());
        }
    }
    merged
}
