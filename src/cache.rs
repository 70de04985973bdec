//! Content-addressed cache for stage artifacts.
//!
//! Keys are blake3 digests of everything that determines a stage's output, so
//! one `(stage, rendered instruction, rendered prompt, tier)` combination costs
//! at most one provider call for the lifetime of the cache. The cache is
//! constructed once per process and injected into the orchestrator.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::report::types::{Artifact, StageId, Tier};

/// Hex blake3 digest used as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Keys a full cached artifact. Tier-qualified so a standard-tier run can
    /// never read a premium artifact, or the reverse.
    pub fn result(stage: StageId, instruction: &str, prompt: &str, tier: Tier) -> Self {
        let instruction_hash = hash_text(instruction);
        let prompt_hash = hash_text(prompt);
        Self(hash_fields(&[
            "result",
            stage.as_str(),
            &instruction_hash,
            &prompt_hash,
            tier.as_str(),
        ]))
    }

    /// Keys only the system instruction. Handed to the provider as its
    /// prompt-cache hint; never used as a key in this cache.
    pub fn instruction(stage: StageId, instruction: &str) -> Self {
        let instruction_hash = hash_text(instruction);
        Self(hash_fields(&["instruction", stage.as_str(), &instruction_hash]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait ArtifactCache: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError>;
    async fn store(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError>;
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Entries {
    map: HashMap<Fingerprint, Artifact>,
    /// Insertion order, used only when a capacity is set.
    order: VecDeque<Fingerprint>,
}

/// In-process cache. Unbounded unless built with [`MemoryArtifactCache::bounded`],
/// in which case the oldest insertion is evicted first.
pub struct MemoryArtifactCache {
    entries: RwLock<Entries>,
    capacity: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MemoryArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArtifactCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn bounded(max_entries: usize) -> Self {
        Self {
            capacity: Some(max_entries.max(1)),
            ..Self::new()
        }
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(max) => Self::bounded(max),
            None => Self::new(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().map(|e| e.map.len()).unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.stats().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactCache for MemoryArtifactCache {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
        let guard = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        let hit = guard.map.get(fingerprint).cloned();
        let counter = if hit.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(hit)
    }

    async fn store(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<(), CacheError> {
        let mut guard = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        // Entries are never mutated in place: identical fingerprints carry
        // identical content, so the first value wins.
        if guard.map.contains_key(fingerprint) {
            return Ok(());
        }
        guard.map.insert(fingerprint.clone(), artifact.clone());
        if let Some(capacity) = self.capacity {
            guard.order.push_back(fingerprint.clone());
            while guard.map.len() > capacity {
                match guard.order.pop_front() {
                    Some(oldest) => {
                        guard.map.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        Ok(())
    }
}

fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(text: &str) -> Artifact {
        serde_json::from_value(json!({ "overall_summary": text })).unwrap()
    }

    #[tokio::test]
    async fn lookup_after_store_hits() {
        let cache = MemoryArtifactCache::new();
        let fp = Fingerprint::result(StageId::Summary, "sys", "user", Tier::Standard);

        assert!(cache.lookup(&fp).await.unwrap().is_none());
        cache.store(&fp, &artifact("a")).await.unwrap();
        assert_eq!(cache.lookup(&fp).await.unwrap(), Some(artifact("a")));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn first_store_wins() {
        let cache = MemoryArtifactCache::new();
        let fp = Fingerprint::result(StageId::Summary, "sys", "user", Tier::Standard);
        cache.store(&fp, &artifact("first")).await.unwrap();
        cache.store(&fp, &artifact("second")).await.unwrap();
        assert_eq!(cache.lookup(&fp).await.unwrap(), Some(artifact("first")));
    }

    #[tokio::test]
    async fn bounded_cache_evicts_oldest() {
        let cache = MemoryArtifactCache::bounded(2);
        let fps: Vec<Fingerprint> = ["a", "b", "c"]
            .iter()
            .map(|p| Fingerprint::result(StageId::Daily, "sys", p, Tier::Premium))
            .collect();
        for fp in &fps {
            cache.store(fp, &artifact(fp.short())).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&fps[0]).await.unwrap().is_none());
        assert!(cache.lookup(&fps[2]).await.unwrap().is_some());
    }

    #[test]
    fn result_fingerprint_is_tier_qualified() {
        let standard = Fingerprint::result(StageId::Emotion, "sys", "user", Tier::Standard);
        let premium = Fingerprint::result(StageId::Emotion, "sys", "user", Tier::Premium);
        assert_ne!(standard, premium);
        assert_eq!(standard.as_str().len(), 64);
        assert_eq!(standard.short().len(), 12);
    }

    #[test]
    fn instruction_fingerprint_ignores_prompt_and_differs_from_result() {
        let a = Fingerprint::instruction(StageId::Emotion, "sys");
        let b = Fingerprint::instruction(StageId::Emotion, "sys");
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::instruction(StageId::Daily, "sys"));
        assert_ne!(
            a,
            Fingerprint::result(StageId::Emotion, "sys", "", Tier::Standard)
        );
    }
}
