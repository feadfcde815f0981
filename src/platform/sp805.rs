// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Driver for the Arm SP805 watchdog.

#![cfg_attr(test, allow(dead_code))]

/// Writing this to the lock register enables write access to the other registers. Writing anything
/// else disables it.
const UNLOCK_KEY: u32 = 0x1ACC_E551;

/// Enables the counter and the interrupt.
const CONTROL_INTEN: u32 = 1 << 0;
/// Enables the reset output, so that the system resets if the interrupt is not cleared in time.
const CONTROL_RESEN: u32 = 1 << 1;

#[repr(C, align(4))]
struct Registers {
    load: u32,
    value: u32,
    control: u32,
    intclr: u32,
    ris: u32,
    mis: u32,
    _reserved0: [u32; 762],
    lock: u32,
}

/// Driver for an SP805 watchdog.
#[derive(Debug)]
pub struct Sp805 {
    registers: *mut Registers,
}

impl Sp805 {
    /// Constructs a new instance of the watchdog driver for an SP805 device at the given base
    /// address.
    ///
    /// # Safety
    ///
    /// The given base address must point to the MMIO control registers of an SP805 device, which
    /// must be mapped into the address space of the process as device memory and not have any
    /// other aliases.
    pub unsafe fn new(base_address: *mut u32) -> Self {
        Self {
            registers: base_address as *mut Registers,
        }
    }

    /// Starts the watchdog counting down from `load`, resetting the system when it expires.
    pub fn enable(&mut self, load: u32) {
        self.unlocked(|registers| {
            // SAFETY: `registers` points to the control registers of an SP805 device which is
            // appropriately mapped, as promised by the caller of `Sp805::new`.
            unsafe {
                (&raw mut (*registers).load).write_volatile(load);
                (&raw mut (*registers).control).write_volatile(CONTROL_RESEN | CONTROL_INTEN);
            }
        });
    }

    /// Stops the watchdog.
    pub fn disable(&mut self) {
        self.unlocked(|registers| {
            // SAFETY: `registers` points to the control registers of an SP805 device which is
            // appropriately mapped, as promised by the caller of `Sp805::new`.
            unsafe {
                (&raw mut (*registers).control).write_volatile(0);
            }
        });
    }

    /// Runs `f` with register write access enabled, then locks the registers again.
    fn unlocked(&mut self, f: impl FnOnce(*mut Registers)) {
        // SAFETY: self.registers points to the control registers of an SP805 device which is
        // appropriately mapped, as promised by the caller of `Sp805::new`.
        unsafe {
            (&raw mut (*self.registers).lock).write_volatile(UNLOCK_KEY);
        }
        f(self.registers);
        // SAFETY: As above.
        unsafe {
            (&raw mut (*self.registers).lock).write_volatile(0);
        }
    }
}

// SAFETY: `Sp805` just contains a pointer to device memory, which can be accessed from any context.
unsafe impl Send for Sp805 {}
