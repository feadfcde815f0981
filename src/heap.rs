// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Global allocator for RX/TX mailboxes and the pages lent in memory management tests.

use buddy_system_allocator::LockedHeap;
use log::debug;
use spin::{
    Once,
    mutex::{SpinMutex, SpinMutexGuard},
};

const PAGE_SIZE: usize = 4096;

/// A mailbox takes two pages, and each memory sharing test lends at most one more.
const HEAP_PAGES: usize = 32;

#[repr(C, align(4096))]
struct HeapRegion([u8; HEAP_PAGES * PAGE_SIZE]);

static REGION: SpinMutex<HeapRegion> = SpinMutex::new(HeapRegion([0; HEAP_PAGES * PAGE_SIZE]));
static INITIALISED: Once = Once::new();

#[global_allocator]
static ALLOCATOR: LockedHeap<32> = LockedHeap::new();

/// Hands the heap region to the global allocator. Later calls do nothing.
pub fn init() {
    INITIALISED.call_once(|| {
        let region = &mut SpinMutexGuard::leak(REGION.lock()).0;
        let start = region.as_mut_ptr() as usize;
        // SAFETY: The region is leaked from a static, so the allocator has sole ownership of it for
        // the rest of the program.
        unsafe {
            ALLOCATOR.lock().init(start, region.len());
        }
        debug!("Heap of {HEAP_PAGES} pages at {start:#x}");
    });
}
