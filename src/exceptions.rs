// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Exception vectors for endpoint images.
//!
//! Endpoints run with interrupts masked and never expect a trap, so every exception is reported
//! and then panics.

use aarch64_rt::{ExceptionHandlers, RegisterStateRef, exception_handlers};
use core::arch::asm;

/// Reads an EL1 or EL2 system register, whichever matches the current exception level.
macro_rules! read_banked {
    ($name:literal) => {{
        let value: u64;
        if current_el() == 2 {
            // SAFETY: Reading a syndrome register has no side effects.
            unsafe {
                asm!(concat!("mrs {}, ", $name, "_el2"), out(reg) value, options(nomem, nostack));
            }
        } else {
            // SAFETY: Reading a syndrome register has no side effects.
            unsafe {
                asm!(concat!("mrs {}, ", $name, "_el1"), out(reg) value, options(nomem, nostack));
            }
        }
        value
    }};
}

/// Returns the exception level the endpoint is running at.
pub fn current_el() -> u8 {
    let current_el: u64;
    // SAFETY: Reading `CurrentEL` has no side effects.
    unsafe {
        asm!(
            "mrs {current_el}, CurrentEL",
            options(nomem, nostack),
            current_el = out(reg) current_el,
        );
    }
    ((current_el >> 2) & 0b11) as u8
}

/// Points VBAR for the current exception level at the `aarch64-rt` vector table.
///
/// SPs run at S-EL1, VMs at EL1, and a VM may also be started at EL2 without a hypervisor.
pub fn set_exception_vector() {
    match current_el() {
        // SAFETY: `vector_table_el1` is a valid vector table provided by `aarch64-rt`.
        1 => unsafe {
            asm!(
                "adr x9, vector_table_el1",
                "msr vbar_el1, x9",
                "isb",
                options(nomem, nostack),
                out("x9") _,
            );
        },
        // SAFETY: `vector_table_el2` is a valid vector table provided by `aarch64-rt`.
        2 => unsafe {
            asm!(
                "adr x9, vector_table_el2",
                "msr vbar_el2, x9",
                "isb",
                options(nomem, nostack),
                out("x9") _,
            );
        },
        el => panic!("Endpoint started at EL{el}"),
    }
}

fn fatal(kind: &str, register_state: &RegisterStateRef) -> ! {
    panic!(
        "Unexpected {kind} exception at EL{}: esr={:#x} far={:#x} elr={:#x}",
        current_el(),
        read_banked!("esr"),
        read_banked!("far"),
        register_state.elr,
    );
}

exception_handlers!(Exceptions);
struct Exceptions;

impl ExceptionHandlers for Exceptions {
    extern "C" fn sync_current(register_state: RegisterStateRef) {
        fatal("sync_current", &register_state);
    }

    extern "C" fn irq_current(register_state: RegisterStateRef) {
        fatal("irq_current", &register_state);
    }

    extern "C" fn fiq_current(register_state: RegisterStateRef) {
        fatal("fiq_current", &register_state);
    }

    extern "C" fn serror_current(register_state: RegisterStateRef) {
        fatal("serror_current", &register_state);
    }

    extern "C" fn sync_lower(register_state: RegisterStateRef) {
        fatal("sync_lower", &register_state);
    }

    extern "C" fn irq_lower(register_state: RegisterStateRef) {
        fatal("irq_lower", &register_state);
    }

    extern "C" fn fiq_lower(register_state: RegisterStateRef) {
        fatal("fiq_lower", &register_state);
    }

    extern "C" fn serror_lower(register_state: RegisterStateRef) {
        fatal("serror_lower", &register_state);
    }
}
