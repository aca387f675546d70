//! Identity types for PSYFLOW
//!
//! Chunk ids are hierarchical path strings: the root is `0-<resets>` and each
//! descendant appends `.<relative index>-<resets>`. Two passes through the
//! same loop therefore produce different ids, which is what lets data
//! queries be scoped to one iteration of a chunk.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Global trial counter, incremented once per finished trial
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TrialIndex(pub u64);

impl TrialIndex {
    pub const ZERO: TrialIndex = TrialIndex(0);

    #[inline]
    pub fn new(index: u64) -> Self {
        TrialIndex(index)
    }

    #[inline]
    pub fn next(self) -> Self {
        TrialIndex(self.0 + 1)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TrialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trial(#{})", self.0)
    }
}

impl fmt::Display for TrialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hierarchical chunk instance identity
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Id of the root chunk after `resets` resets
    pub fn root(resets: u32) -> Self {
        ChunkId(format!("0-{}", resets))
    }

    /// Id of a child chunk at `relative` position among its siblings
    pub fn child(&self, relative: usize, resets: u32) -> Self {
        ChunkId(format!("{}.{}-{}", self.0, relative, resets))
    }

    /// Parse and validate an id string
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && s.split('.').all(|segment| {
                let Some((rel, resets)) = segment.split_once('-') else {
                    return false;
                };
                !rel.is_empty()
                    && !resets.is_empty()
                    && rel.bytes().all(|b| b.is_ascii_digit())
                    && resets.bytes().all(|b| b.is_ascii_digit())
            });
        valid.then(|| ChunkId(s.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of segments (the root has depth 1)
    pub fn depth(&self) -> usize {
        self.0.split('.').count()
    }

    /// Id of the enclosing chunk instance
    pub fn parent(&self) -> Option<ChunkId> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| ChunkId(parent.to_string()))
    }

    /// True if `id` names this chunk instance or one of its descendants.
    ///
    /// Matching is segment-aware, so `0-0.1-1` contains `0-0.1-1.2-0` but
    /// not `0-0.1-10`.
    pub fn contains(&self, id: &str) -> bool {
        match id.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        ChunkId::root(0)
    }
}

impl AsRef<str> for ChunkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({})", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_hierarchy() {
        let root = ChunkId::root(0);
        let child = root.child(2, 1);
        let grandchild = child.child(0, 3);

        assert_eq!(root.as_str(), "0-0");
        assert_eq!(child.as_str(), "0-0.2-1");
        assert_eq!(grandchild.as_str(), "0-0.2-1.0-3");
        assert_eq!(grandchild.depth(), 3);
        assert_eq!(grandchild.parent(), Some(child.clone()));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_chunk_id_contains_is_segment_aware() {
        let id = ChunkId::parse("0-0.1-1").unwrap();

        assert!(id.contains("0-0.1-1"));
        assert!(id.contains("0-0.1-1.0-0"));
        assert!(!id.contains("0-0.1-10"));
        assert!(!id.contains("0-0.1-0"));
        assert!(!id.contains("0-0"));
    }

    #[test]
    fn test_chunk_id_parse_rejects_garbage() {
        assert!(ChunkId::parse("0-0.3-2").is_some());
        assert!(ChunkId::parse("").is_none());
        assert!(ChunkId::parse("0").is_none());
        assert!(ChunkId::parse("0-0.").is_none());
        assert!(ChunkId::parse("a-0").is_none());
    }

    #[test]
    fn test_trial_index_next() {
        let index = TrialIndex::ZERO.next().next();
        assert_eq!(index.get(), 2);
        assert_eq!(index.to_string(), "2");
    }
}
