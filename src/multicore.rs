// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Running test bodies on secondary cores.
//!
//! The boot core powers on each secondary core in turn, passing it a pointer to a
//! [`SecondaryLaunch`] as the PSCI context ID. The secondary core runs its body, records the
//! status in its [`CoreSlot`], signals the slot's [`Event`] and powers itself off. The boot core
//! waits for that event before moving on to the next core, so at most one secondary core is running
//! a body at any time.

use crate::{
    dispatch::TestContext,
    platform::{Platform, PlatformImpl, PowerOnError},
    status::{StatusCode, TestResult},
};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use log::{debug, error};
use spin::Once;
use thiserror::Error;

/// A test body run on a secondary core.
pub type SecondaryFn = fn(&TestContext) -> TestResult;

/// A one-shot flag used by a secondary core to tell the boot core it has finished.
#[derive(Debug)]
pub struct Event {
    flag: AtomicBool,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Clears the event, ready for the next rendezvous.
    pub fn init(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Signals the event, waking any core waiting for it.
    pub fn send(&self) {
        self.flag.store(true, Ordering::Release);
        send_event_hint();
    }

    /// Blocks until the event has been sent.
    pub fn wait(&self) {
        while !self.is_set() {
            wait_event_hint();
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(target_os = "none")]
fn send_event_hint() {
    // SAFETY: `sev` only signals an event to other cores, it doesn't access memory.
    unsafe {
        core::arch::asm!("sev", options(nomem, nostack));
    }
}

#[cfg(not(target_os = "none"))]
fn send_event_hint() {}

#[cfg(target_os = "none")]
fn wait_event_hint() {
    // SAFETY: `wfe` only waits for an event or interrupt, it doesn't access memory.
    unsafe {
        core::arch::asm!("wfe", options(nomem, nostack));
    }
}

#[cfg(all(not(target_os = "none"), test))]
fn wait_event_hint() {
    std::thread::yield_now();
}

#[cfg(all(not(target_os = "none"), not(test)))]
fn wait_event_hint() {
    core::hint::spin_loop();
}

/// The rendezvous state for one secondary core.
///
/// The status is only written by the secondary core before it sends the event, and only read by
/// the boot core after the event has been received.
#[derive(Debug)]
pub struct CoreSlot {
    event: Event,
    status: AtomicU32,
}

impl CoreSlot {
    const fn new() -> Self {
        Self {
            event: Event::new(),
            status: AtomicU32::new(StatusCode::STATUS_INVALID.0),
        }
    }

    fn reset(&self) {
        self.status
            .store(StatusCode::STATUS_INVALID.0, Ordering::Relaxed);
        self.event.init();
    }

    /// Records the status of the body and signals the boot core.
    fn finish(&self, status: StatusCode) {
        self.status.store(status.0, Ordering::Relaxed);
        self.event.send();
    }

    fn status(&self) -> StatusCode {
        StatusCode(self.status.load(Ordering::Relaxed))
    }
}

/// Rendezvous state for all secondary cores, owned by a single test invocation.
#[derive(Debug)]
pub struct SecondaryCores {
    slots: [CoreSlot; PlatformImpl::CORE_COUNT],
}

impl SecondaryCores {
    pub const fn new() -> Self {
        Self {
            slots: [const { CoreSlot::new() }; PlatformImpl::CORE_COUNT],
        }
    }

    /// Powers on each secondary core in turn to run `body`, waiting for each to finish before
    /// starting the next.
    ///
    /// Returns the first failing status once all cores have run.
    pub fn run(&self, context: &TestContext, body: SecondaryFn) -> Result<(), SecondaryError> {
        for (core_index, slot) in self.slots.iter().enumerate().skip(1) {
            slot.reset();
            let launch = SecondaryLaunch {
                context,
                body,
                slot,
            };
            debug!("Powering on core {core_index}");
            PlatformImpl::power_on_core(core_index, &raw const launch as u64)?;
            slot.event.wait();
            debug!("Core {core_index} finished with status {}", slot.status());
        }

        for (core_index, slot) in self.slots.iter().enumerate().skip(1) {
            let status = slot.status();
            if status != StatusCode::SUCCESS {
                error!("Core {core_index} failed with status {status}");
                return Err(SecondaryError::Failed { core_index, status });
            }
        }
        Ok(())
    }

    /// Returns whether the given core has signalled its event.
    #[cfg(test)]
    fn finished(&self, core_index: usize) -> bool {
        self.slots[core_index].event.is_set()
    }
}

/// Running a body on the secondary cores did not succeed.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum SecondaryError {
    #[error("{0}")]
    PowerOn(#[from] PowerOnError),
    #[error("Core {core_index} failed with status {status}")]
    Failed {
        core_index: usize,
        status: StatusCode,
    },
}

/// Everything a secondary core needs to run its body, passed by address through `CPU_ON`.
///
/// This lives on the boot core's stack until the secondary core has sent its event.
struct SecondaryLaunch<'a> {
    context: &'a TestContext<'a>,
    body: SecondaryFn,
    slot: &'a CoreSlot,
}

static SECONDARY_HANDLER: Once<fn(u64)> = Once::new();

/// Overrides what secondary cores run when they start.
///
/// Secure partitions use this to serve requests on their secondary execution contexts instead.
#[cfg_attr(not(target_os = "none"), allow(unused))]
pub fn set_secondary_handler(handler: fn(u64)) {
    SECONDARY_HANDLER.call_once(|| handler);
}

/// The Rust entry point of secondary cores, called with the context ID they were started with.
pub extern "C" fn secondary_main(arg: u64) {
    match SECONDARY_HANDLER.get() {
        Some(handler) => handler(arg),
        None => run_secondary_launch(arg),
    }
}

fn run_secondary_launch(arg: u64) {
    // SAFETY: Secondary cores only run this when powered on by `SecondaryCores::run`, which
    // passes the address of a `SecondaryLaunch` that outlives the core's use of it, as the boot
    // core waits for the event below before dropping it.
    let launch = unsafe { &*(arg as *const SecondaryLaunch) };
    let status = StatusCode::from((launch.body)(launch.context));
    let slot = launch.slot;
    // The launch may be gone as soon as the event is sent.
    slot.finish(status);
    PlatformImpl::power_off_core();
}
