//! Process-local status counters
//!
//! Binaries opt into heap accounting by installing [`CountingAllocator`]:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: nyft::component::CountingAllocator = nyft::component::CountingAllocator;
//! ```
//!
//! Without it, [`heap_bytes`] reports 0.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

use nyft_common::{ComponentIdentity, StatusSnapshot};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);

/// System allocator wrapper that tracks bytes currently allocated
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        ALLOCATED.fetch_sub(layout.size() as u64, Ordering::Relaxed);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            ALLOCATED.fetch_add(layout.size() as u64, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            ALLOCATED.fetch_sub(layout.size() as u64, Ordering::Relaxed);
            ALLOCATED.fetch_add(new_size as u64, Ordering::Relaxed);
        }
        new_ptr
    }
}

/// Bytes currently allocated through [`CountingAllocator`]
pub fn heap_bytes() -> u64 {
    ALLOCATED.load(Ordering::Relaxed)
}

/// Build a snapshot for `identity` from the current process counters
pub fn snapshot(identity: &ComponentIdentity) -> StatusSnapshot {
    StatusSnapshot {
        kind: identity.kind.clone(),
        id: identity.id.clone(),
        process_args: std::env::args().collect(),
        heap_bytes: heap_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_carries_identity_and_args() {
        let identity = ComponentIdentity::generate("nyft-service");
        let snapshot = snapshot(&identity);

        assert_eq!(snapshot.kind, "nyft-service");
        assert_eq!(snapshot.id, identity.id);
        assert!(!snapshot.process_args.is_empty());
    }
}
