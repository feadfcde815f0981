// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! FF-A architecture compliance suite: test dispatch and endpoint coordination engine.
//!
//! The same engine runs in every endpoint image. VM1 drives the suite, every other endpoint serves
//! test requests in its wait loop.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod conduit;
mod config;
mod database;
mod dispatch;
mod endpoint;
#[cfg(target_os = "none")]
mod exceptions;
mod expect;
mod ffa;
mod frame;
#[cfg(target_os = "none")]
mod heap;
mod logger;
mod memory;
mod messaging;
mod multicore;
mod platform;
mod run_data;
#[cfg(target_os = "none")]
mod secondary;
mod status;

#[cfg(target_os = "none")]
use crate::{
    conduit::{Conduit, Hvc, Smc},
    database::TestDatabase,
    dispatch::{BootError, Harness},
    platform::{Platform, PlatformImpl},
};
#[cfg(target_os = "none")]
use log::{error, info};
#[cfg(target_os = "none")]
use spin::{Lazy, Once};

#[cfg(target_os = "none")]
static DATABASE: Lazy<TestDatabase> = Lazy::new(|| TestDatabase::new(&PlatformImpl::CONFIG));

#[cfg(target_os = "none")]
static HARNESS: Once<Harness<'static>> = Once::new();

#[cfg(target_os = "none")]
static SMC: Smc = Smc;

#[cfg(target_os = "none")]
static HVC: Hvc = Hvc;

/// Brings up the engine on the boot core of an endpoint: logging, heap, FF-A version negotiation
/// and endpoint identification.
#[cfg(target_os = "none")]
fn boot(conduit: &'static dyn Conduit) -> Result<&'static Harness<'static>, BootError> {
    if let Err(e) = logger::init(PlatformImpl::make_log_sink()) {
        panic!("Failed to initialise logger: {e}");
    }
    exceptions::set_exception_vector();
    heap::init();

    let harness = Harness::new(
        &PlatformImpl::CONFIG,
        PlatformImpl::ENDPOINTS,
        &DATABASE,
        conduit,
    )?;
    logger::set_endpoint_name(harness.own().name);
    info!(
        "{} booted at EL{} with FF-A id {:#x}",
        harness.own().name,
        exceptions::current_el(),
        harness.own().id
    );
    Ok(HARNESS.call_once(|| harness))
}

/// Entry point for the VM image.
///
/// VM1 runs the whole suite and then powers the system off; other VMs serve test requests.
#[cfg(target_os = "none")]
pub fn vm_main() -> ! {
    match boot(&HVC) {
        Ok(harness) => {
            if harness.is_dispatcher() {
                harness.run_suite();
            } else if let Err(e) = harness.serve() {
                error!("{e}");
            }
        }
        Err(e) => error!("Boot failed: {e}"),
    }
    PlatformImpl::system_off()
}

/// Entry point for secure partition images.
///
/// Serves test requests forever, only giving up the core through FF-A calls.
#[cfg(target_os = "none")]
pub fn sp_main() -> ! {
    match boot(&SMC) {
        Ok(harness) => {
            multicore::set_secondary_handler(sp_secondary_main);
            let entry_point = secondary::secondary_entry as usize as u64;
            // SAFETY: `secondary_entry` sets up a stack for the core it runs on before calling
            // into Rust, so it is safe for the SPMC to start execution contexts there.
            if let Err(e) = unsafe { harness.register_secondary_entry(entry_point) } {
                error!("Failed to register secondary entry point: {e}");
            }
            if let Err(e) = harness.serve() {
                error!("{e}");
            }
        }
        Err(e) => error!("Boot failed: {e}"),
    }
    panic!("Secure partition wait loop exited");
}

/// Runs on the secondary execution contexts of a secure partition.
#[cfg(target_os = "none")]
fn sp_secondary_main(_arg: u64) {
    let Some(harness) = HARNESS.get() else {
        panic!("Secondary context started before boot completed");
    };
    if let Err(e) = harness.serve_secondary() {
        error!("{e}");
    }
}
