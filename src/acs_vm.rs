// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Normal world VM image of the FF-A ACS. VM1 runs the suite, other VMs serve it.

#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(target_os = "none", no_std)]

#[cfg(target_os = "none")]
aarch64_rt::entry!(acs_vm_main, 4);
#[cfg(target_os = "none")]
fn acs_vm_main(_x0: u64, _x1: u64, _x2: u64, _x3: u64) -> ! {
    ffa_acs::vm_main()
}

#[cfg(not(target_os = "none"))]
fn main() {}
