//! Symmetric links between processes.
//!
//! A link is stored once, as a single record with two reverse indexes by
//! process id, rather than as a pair of mutual pointers — removal is always
//! by link id, and a process's set of links is always the union of both
//! indexes' entries that mention it.

use dashmap::DashMap;
use smallvec::SmallVec;

use crate::ids::{LinkRef, ProcessId, Tag};

struct LinkRecord {
    id1: ProcessId,
    id2: ProcessId,
}

#[derive(Default)]
pub struct LinkRegistry {
    links: DashMap<LinkRef, LinkRecord>,
    by_process: DashMap<ProcessId, SmallVec<[LinkRef; 4]>>,
    next: std::sync::atomic::AtomicU64,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, a: &str, b: &str) -> LinkRef {
        let id = Tag(self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        self.links.insert(
            id,
            LinkRecord {
                id1: a.to_string(),
                id2: b.to_string(),
            },
        );
        self.by_process.entry(a.to_string()).or_default().push(id);
        self.by_process.entry(b.to_string()).or_default().push(id);
        id
    }

    pub fn remove(&self, link_ref: LinkRef) {
        if let Some((_, record)) = self.links.remove(&link_ref) {
            Self::remove_from_index(&self.by_process, &record.id1, link_ref);
            Self::remove_from_index(&self.by_process, &record.id2, link_ref);
        }
    }

    fn remove_from_index(
        index: &DashMap<ProcessId, SmallVec<[LinkRef; 4]>>,
        id: &str,
        link_ref: LinkRef,
    ) {
        if let Some(mut links) = index.get_mut(id) {
            links.retain(|l| *l != link_ref);
        }
    }

    /// Removes and returns every peer linked to `id` (both directions),
    /// atomically w.r.t. further `create`/`remove` calls on those link ids.
    pub fn drain_peers_of(&self, id: &str) -> Vec<ProcessId> {
        let Some((_, link_refs)) = self.by_process.remove(id) else {
            return Vec::new();
        };
        let mut peers = Vec::with_capacity(link_refs.len());
        for link_ref in link_refs {
            if let Some((_, record)) = self.links.remove(&link_ref) {
                let peer = if record.id1 == id { record.id2 } else { record.id1 };
                Self::remove_from_index(&self.by_process, &peer, link_ref);
                peers.push(peer);
            }
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_symmetric_and_removable() {
        let links = LinkRegistry::new();
        let l = links.create("a", "b");
        links.remove(l);
        assert!(links.drain_peers_of("a").is_empty());
        assert!(links.drain_peers_of("b").is_empty());
    }

    #[test]
    fn drain_peers_removes_both_sides() {
        let links = LinkRegistry::new();
        links.create("a", "b");
        links.create("a", "c");
        let peers = links.drain_peers_of("a");
        assert_eq!(peers.len(), 2);
        // `a`'s links are gone from `b` and `c`'s indexes too.
        assert!(links.drain_peers_of("b").is_empty());
        assert!(links.drain_peers_of("c").is_empty());
    }
}
