// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The system configuration the suite runs against.

use crate::database::Suite;
use arm_ffa::Version;

/// An Arm exception level.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ExceptionLevel {
    El0,
    El1,
    El2,
}

/// Describes the system-under-test and which tests to run, resolved once at startup.
#[derive(Clone, Debug)]
pub struct AcsConfig {
    /// The FF-A version the suite negotiates and whose tests it registers.
    pub ffa_version: Version,
    /// Runs only the tests of the given suite, or all tests if `None`.
    pub suite: Option<Suite>,
    /// Whether a hypervisor is present in the normal world, so VM2 and VM3 exist.
    pub ns_hypervisor_present: bool,
    /// The exception level of the SPMC.
    pub spmc_el: ExceptionLevel,
    /// The exception level of the FF-A secure partitions, or `None` if there are none.
    pub sp_el: Option<ExceptionLevel>,
    /// Whether secure partitions may send direct requests.
    pub sp_send_direct_req: bool,
    /// Whether VMs may send direct responses.
    pub vm_send_direct_resp: bool,
    /// Whether the suite runs as a hosted application rather than on bare metal.
    ///
    /// Tests which need to power cores on and off are skipped when hosted.
    pub hosted: bool,
    /// The value loaded into the watchdog when it is enabled for a test.
    pub watchdog_load: u32,
}

impl AcsConfig {
    /// Returns whether FF-A messaging with secure partitions is possible at all.
    pub fn has_secure_partitions(&self) -> bool {
        self.sp_el.is_some()
    }

    /// Returns whether the configured FF-A version is at least the given one.
    pub fn version_at_least(&self, version: Version) -> bool {
        self.ffa_version >= version
    }
}
