//! The script cache (part of C7): `{ resref, reader, optional JIT program }`
//! entries ordered by resref using a byte-wise lexicographic compare.
//!
//! Grounded on `neo-io::caching` (which backs Neo's block/transaction
//! caches), simplified: the spec's cache has no eviction besides
//! `clear_script_cache` (R3), so an LRU policy would be the wrong shape —
//! a plain ordered map is what the C# original and this spec both call for.

use crate::reader::ScriptReader;
use std::collections::BTreeMap;

/// A 32-byte ASCII resource reference, the cache key (GLOSSARY "Resref").
/// `Ord`/`PartialOrd` derive to exactly the byte-wise lexicographic compare
/// the spec requires, since `[u8; 32]` orders byte-by-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resref(pub [u8; 32]);

impl Resref {
    /// Builds a resref from a short ASCII name, NUL-padded to 32 bytes.
    /// Panics if `name` is longer than 32 bytes — script names are a
    /// compile-time/load-time concern, never attacker-controlled input here.
    pub fn from_name(name: &str) -> Self {
        assert!(
            name.len() <= 32,
            "resref '{name}' exceeds the 32-byte resref limit"
        );
        let mut bytes = [0u8; 32];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self(bytes)
    }

    /// Renders back to a display string, trimming the NUL padding.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(32);
        String::from_utf8_lossy(&self.0[..end])
    }
}

impl std::fmt::Display for Resref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One cached script: its reader plus whatever JIT artifact the host built
/// for it (`J` is the host's JIT program handle type — `nwscript-vm::host`
/// instantiates this with its own `Program` type so this crate need not
/// know about the JIT contract).
pub struct ScriptCacheEntry<J> {
    pub resref: Resref,
    pub reader: ScriptReader,
    pub jit_program: Option<J>,
}

/// Scripts keyed by resref, ordered lexicographically. First reference
/// loads and populates an entry; subsequent references reuse both the
/// reader and the JIT program (§4.7 "Caching").
pub struct ScriptCache<J> {
    entries: BTreeMap<Resref, ScriptCacheEntry<J>>,
}

impl<J> Default for ScriptCache<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J> ScriptCache<J> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, resref: &Resref) -> Option<&ScriptCacheEntry<J>> {
        self.entries.get(resref)
    }

    pub fn get_mut(&mut self, resref: &Resref) -> Option<&mut ScriptCacheEntry<J>> {
        self.entries.get_mut(resref)
    }

    pub fn insert(&mut self, entry: ScriptCacheEntry<J>) {
        self.entries.insert(entry.resref, entry);
    }

    pub fn contains(&self, resref: &Resref) -> bool {
        self.entries.contains_key(resref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The only eviction path the spec allows (R3 / §8 idempotence:
    /// calling this twice is equivalent to calling it once).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates entries in resref order — useful for deterministic
    /// diagnostics/dumps, never on the interpreter hot path.
    pub fn iter(&self) -> impl Iterator<Item = (&Resref, &ScriptCacheEntry<J>)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resrefs_order_byte_wise() {
        let a = Resref::from_name("aaa");
        let b = Resref::from_name("aab");
        let z = Resref::from_name("zzz");
        assert!(a < b);
        assert!(b < z);
    }

    #[test]
    fn cache_insert_get_clear() {
        let mut cache: ScriptCache<()> = ScriptCache::new();
        let resref = Resref::from_name("nw_s0_test");
        cache.insert(ScriptCacheEntry {
            resref,
            reader: ScriptReader::new("nw_s0_test", vec![]),
            jit_program: None,
        });
        assert!(cache.contains(&resref));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        // Idempotent: clearing an already-empty cache changes nothing.
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn display_trims_nul_padding() {
        let r = Resref::from_name("abc");
        assert_eq!(r.as_str(), "abc");
    }
}
