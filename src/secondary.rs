// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-core stacks and the entry point used both by cores powered on with PSCI `CPU_ON` and by
//! the secondary execution contexts the SPMC starts for a secure partition.

use crate::{
    multicore::secondary_main,
    platform::{Platform, PlatformImpl},
};
use aarch64_rt::Stack;
use core::arch::naked_asm;

/// log2 of the number of 4 KiB pages in each secondary stack.
const STACK_PAGES_LOG2: usize = 2;

/// Stacks for cores 1 onwards. Core 0 runs on the stack reserved by `aarch64-rt`.
static mut STACKS: [Stack<{ 1 << STACK_PAGES_LOG2 }>; PlatformImpl::CORE_COUNT - 1] =
    [const { Stack::new() }; PlatformImpl::CORE_COUNT - 1];

/// Sets up the stack for the calling core, then calls [`secondary_main`] with the context ID from
/// x0. The core parks if that ever returns.
#[unsafe(naked)]
pub unsafe extern "C" fn secondary_entry() -> ! {
    naked_asm!(
        // Allow FP/SIMD at EL1.
        "mrs x30, cpacr_el1",
        "orr x30, x30, #(0x3 << 20)",
        "msr cpacr_el1, x30",
        "isb",

        // Only the context ID is needed, keep it somewhere `core_position` won't touch.
        "mov x24, x0",
        "mrs x0, mpidr_el1",
        "bl {core_position}",

        // Core n uses the top of STACKS[n - 1], which is the base of STACKS[n].
        "adrp x30, {STACKS}",
        "add x30, x30, :lo12:{STACKS}",
        "add x30, x30, x0, lsl #{STACK_SHIFT}",
        "mov sp, x30",

        "mov x0, x24",
        "bl {secondary_main}",

        "1:",
        "wfe",
        "b 1b",
        core_position = sym PlatformImpl::core_position,
        STACKS = sym STACKS,
        STACK_SHIFT = const STACK_PAGES_LOG2 + 12,
        secondary_main = sym secondary_main,
    );
}
