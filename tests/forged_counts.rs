//! Element counts a peer claims must not size our allocations.
//! This needs its own binary, since it replaces the global allocator.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::atomic::{AtomicUsize, Ordering},
};

use bitcoin_p2p_connector::{
    constants::{commands::Command, MAX_BLOCK_PAYLOAD, PROTOCOL_VERSION},
    MessageEncoding, Registry,
};

/// Remembers the largest single allocation.
struct Largest;

static LARGEST: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for Largest {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        LARGEST.fetch_max(layout.size(), Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        LARGEST.fetch_max(new_size, Ordering::Relaxed);
        System.realloc(ptr, layout, new_size)
    }
}

#[global_allocator]
static ALLOCATOR: Largest = Largest;

#[test]
fn block_claiming_a_transaction_per_byte() {
    let len = MAX_BLOCK_PAYLOAD as usize - 1_000;
    let mut body = vec![0u8; 80];
    let remaining = len - body.len() - 5;
    body.push(0xFE);
    body.extend_from_slice(&(remaining as u32).to_le_bytes());
    body.resize(len, 0xAA);

    let registry = Registry::<bitcoin_p2p_connector::BitcoinAdapter>::default();
    for encoding in [MessageEncoding::Base, MessageEncoding::Witness] {
        LARGEST.store(0, Ordering::Relaxed);
        let result = registry.deserialize(Command::Block, &body, PROTOCOL_VERSION, encoding);
        let largest = LARGEST.load(Ordering::Relaxed);

        assert!(result.is_err(), "{encoding}");
        // far below one transaction's worth of memory per claimed transaction
        assert!(
            largest < body.len() / 4,
            "{encoding}: largest allocation was {largest} bytes for a {} byte payload",
            body.len()
        );
    }
}
