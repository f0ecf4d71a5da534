//! Host memory observation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of host memory readings plus a reclamation hint.
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes in use, if the host can tell.
    fn used_bytes(&self) -> Option<u64>;

    /// Ask the runtime to give memory back. Advisory only.
    fn request_reclaim(&self) {}
}

/// Reads resident set size from `/proc/self/statm`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessMemoryProbe;

const PAGE_SIZE: u64 = 4096;

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        parse_statm_resident(&statm).map(|pages| pages * PAGE_SIZE)
    }

    fn request_reclaim(&self) {
        log::debug!("memory reclaim requested");
    }
}

fn parse_statm_resident(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

/// Reports a settable reading and counts reclaim requests. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct FixedMemoryProbe {
    used: Arc<AtomicU64>,
    reclaims: Arc<AtomicU64>,
}

impl FixedMemoryProbe {
    pub fn new(used_bytes: u64) -> Self {
        Self {
            used: Arc::new(AtomicU64::new(used_bytes)),
            reclaims: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set(&self, used_bytes: u64) {
        self.used.store(used_bytes, Ordering::SeqCst);
    }

    pub fn reclaim_requests(&self) -> u64 {
        self.reclaims.load(Ordering::SeqCst)
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        Some(self.used.load(Ordering::SeqCst))
    }

    fn request_reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statm_resident_field_is_second() {
        assert_eq!(parse_statm_resident("5123 812 301 12 0 640 0\n"), Some(812));
        assert_eq!(parse_statm_resident("5123"), None);
        assert_eq!(parse_statm_resident(""), None);
    }

    #[test]
    fn fixed_probe_counts_reclaims() {
        let probe = FixedMemoryProbe::new(10);
        let shared = probe.clone();
        shared.request_reclaim();
        probe.set(99);
        assert_eq!(shared.used_bytes(), Some(99));
        assert_eq!(probe.reclaim_requests(), 1);
    }
}
