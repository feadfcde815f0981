// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Calling conventions used to trap into the SPMC or hypervisor.

use crate::frame::{FRAME_REGISTERS, Frame};

/// A way of making an FF-A call: SMC for secure partitions, HVC for VMs under a hypervisor.
///
/// The call is synchronous and always returns. Failures are reported in the returned frame.
pub trait Conduit: Sync {
    /// Makes the call described by `frame` and returns the result registers.
    fn call(&self, frame: Frame) -> Frame;
}

/// Calls through the SMC instruction.
#[cfg(target_arch = "aarch64")]
pub struct Smc;

#[cfg(target_arch = "aarch64")]
impl Conduit for Smc {
    fn call(&self, frame: Frame) -> Frame {
        let mut args = [0; 17];
        args[..FRAME_REGISTERS - 1].copy_from_slice(&frame.regs()[1..]);
        let results = smccc::smc64(frame.fid(), args);
        result_frame(&results)
    }
}

/// Calls through the HVC instruction.
#[cfg(target_arch = "aarch64")]
pub struct Hvc;

#[cfg(target_arch = "aarch64")]
impl Conduit for Hvc {
    fn call(&self, frame: Frame) -> Frame {
        let mut args = [0; 17];
        args[..FRAME_REGISTERS - 1].copy_from_slice(&frame.regs()[1..]);
        let results = smccc::hvc64(frame.fid(), args);
        result_frame(&results)
    }
}

/// Keeps the first registers of a full SMCCC result, which is all FF-A uses here.
#[cfg_attr(not(target_arch = "aarch64"), allow(unused))]
fn result_frame(results: &[u64; 18]) -> Frame {
    let mut regs = [0; FRAME_REGISTERS];
    regs.copy_from_slice(&results[..FRAME_REGISTERS]);
    Frame::from_regs(regs)
}
