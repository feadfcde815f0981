// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

macro_rules! select_platform {
    (platform = $condition:literal, $mod:ident::$plat_impl:ident) => {
        #[cfg(all(platform = $condition, not(test)))]
        mod $mod;

        #[cfg(all(platform = $condition, not(test)))]
        pub use $mod::$plat_impl as PlatformImpl;
    };
    (test, $mod:ident::$plat_impl:ident) => {
        #[cfg(test)]
        pub mod $mod;

        #[cfg(test)]
        pub use $mod::$plat_impl as PlatformImpl;
    };
}

select_platform!(platform = "fvp", fvp::Fvp);
select_platform!(test, test::TestPlatform);

mod sp805;

use crate::{
    config::AcsConfig,
    endpoint::EndpointInfo,
    logger::LogSink,
};
use core::cell::RefCell;
use percore::{Cores, ExceptionLock, PerCore};
#[cfg(not(test))]
pub use percore::exception_free;
#[cfg(test)]
pub use test::exception_free;
use thiserror::Error;

/// Type alias for convenience, to avoid having to use the complicated type name everywhere.
pub type LogSinkImpl = <PlatformImpl as Platform>::LogSinkImpl;

/// Per-core mutable state.
pub type PerCoreState<T> =
    PerCore<[ExceptionLock<RefCell<T>>; PlatformImpl::CORE_COUNT], CoresImpl>;

/// Implementation of the `Cores` trait to get the index of the current CPU core.
pub struct CoresImpl;

// SAFETY: This implementation never returns the same index for different cores because
// `Platform::current_core` is guaranteed not to.
unsafe impl Cores for CoresImpl {
    fn core_index() -> usize {
        PlatformImpl::current_core()
    }
}

/// A secondary core could not be powered on.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum PowerOnError {
    #[error("Core {0} does not exist")]
    InvalidCore(usize),
    #[error("CPU_ON for core {0} failed")]
    CpuOn(usize),
}

/// The hooks implemented by all platforms.
///
/// # Safety
///
/// `core_position` must be a naked function which doesn't access any memory, and must never return
/// the same index for two different valid MPIDR values. It must only clobber x0-x3.
///
/// `current_core` must never return the same index for two different cores, and must never return
/// a value greater than or equal to `CORE_COUNT`.
pub unsafe trait Platform {
    /// The number of CPU cores.
    const CORE_COUNT: usize;

    /// The configuration of the system-under-test.
    const CONFIG: AcsConfig;

    /// The endpoints deployed on the system-under-test.
    const ENDPOINTS: &'static [EndpointInfo];

    /// Platform dependent LogSink implementation type for Logger.
    type LogSinkImpl: LogSink;

    /// Returns something to which logs should be sent.
    ///
    /// This should only be called once, and may panic on subsequent calls.
    fn make_log_sink() -> Self::LogSinkImpl;

    /// Given a valid MPIDR value, returns the corresponding linear core index.
    ///
    /// It must return 0 for the primary core, i.e. the core which powers on first and runs the
    /// suite. For an invalid MPIDR value no guarantees are made about the return value.
    extern "C" fn core_position(mpidr: u64) -> usize;

    /// Given a linear core index, returns the corresponding PSCI MPIDR value.
    fn psci_mpidr_for_core(core_index: usize) -> u64;

    /// Returns the linear index of the core we are running on, 0 for the boot core.
    fn current_core() -> usize;

    /// Powers on the given secondary core, which starts at the secondary entry point and is passed
    /// `arg`.
    fn power_on_core(core_index: usize, arg: u64) -> Result<(), PowerOnError>;

    /// Powers off the current core. Only returns if that fails.
    fn power_off_core();

    /// Starts the watchdog with the given load value.
    fn watchdog_enable(load: u32);

    /// Stops the watchdog.
    fn watchdog_disable();

    /// Turns the whole system off.
    fn system_off() -> !;
}
