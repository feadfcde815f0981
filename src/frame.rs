// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Register-level argument and result records for FF-A calls.

use arm_ffa::{FfaError, FuncId};
use core::fmt::{self, Debug, Formatter};

/// The number of registers in a frame: the function ID followed by seven arguments.
pub const FRAME_REGISTERS: usize = 8;

/// The function ID returned in w0 by FFA_VERSION when the requested version is not supported.
pub const VERSION_NOT_SUPPORTED: u32 = 0xffff_ffff;

/// The argument or result registers of one FF-A call.
///
/// Register 0 holds the function ID, registers 1 to 7 hold the arguments.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct Frame {
    regs: [u64; FRAME_REGISTERS],
}

impl Frame {
    /// Creates a frame for the given function with all arguments zeroed.
    pub fn new(function: FuncId) -> Self {
        Self::from_raw_fid(function.into())
    }

    /// Creates a frame for a raw function ID, which need not be one `arm_ffa` knows about.
    pub fn from_raw_fid(fid: u32) -> Self {
        let mut regs = [0; FRAME_REGISTERS];
        regs[0] = fid.into();
        Self { regs }
    }

    /// Wraps a full set of registers as returned by a call.
    pub const fn from_regs(regs: [u64; FRAME_REGISTERS]) -> Self {
        Self { regs }
    }

    pub const fn regs(&self) -> &[u64; FRAME_REGISTERS] {
        &self.regs
    }

    /// Returns a copy of the frame with the given register set.
    pub const fn with(mut self, index: usize, value: u64) -> Self {
        self.regs[index] = value;
        self
    }

    /// Returns a copy of the frame with registers 3 to 7 set to the given payload.
    pub fn with_payload(mut self, payload: [u64; 5]) -> Self {
        self.regs[3..].copy_from_slice(&payload);
        self
    }

    pub fn set(&mut self, index: usize, value: u64) {
        self.regs[index] = value;
    }

    /// Returns the function ID in w0.
    pub fn fid(&self) -> u32 {
        self.regs[0] as u32
    }

    /// Returns the value of the given argument register.
    pub fn arg(&self, index: usize) -> u64 {
        self.regs[index]
    }

    /// Returns registers 3 to 7, the payload of a direct message.
    pub fn payload(&self) -> [u64; 5] {
        [
            self.regs[3],
            self.regs[4],
            self.regs[5],
            self.regs[6],
            self.regs[7],
        ]
    }

    /// Returns the FF-A function in w0, if it is one we know.
    pub fn function(&self) -> Option<FuncId> {
        FuncId::try_from(self.fid()).ok()
    }

    pub fn is(&self, function: FuncId) -> bool {
        self.fid() == u32::from(function)
    }

    pub fn is_error(&self) -> bool {
        self.is(FuncId::Error)
    }

    pub fn is_success(&self) -> bool {
        self.is(FuncId::Success32) || self.is(FuncId::Success64)
    }

    /// Returns the error code of an FFA_ERROR frame.
    ///
    /// Returns `None` if the frame is not an error, or the code in w2 is not one we recognise.
    pub fn error(&self) -> Option<FfaError> {
        if self.is_error() {
            error_from_code(self.regs[2] as u32 as i32)
        } else {
            None
        }
    }

    /// Returns whether the frame is FFA_ERROR with the given code.
    pub fn is_error_code(&self, code: FfaError) -> bool {
        self.error() == Some(code)
    }

    /// Returns the sender and receiver packed in w1 of a message frame.
    pub fn endpoints(&self) -> EndpointPair {
        EndpointPair::from_word(self.regs[1])
    }

    /// Returns true if any of the last `count` registers is non-zero.
    ///
    /// This is the check for reserved registers which must be zero in a response.
    pub fn reserved_nonzero(&self, count: usize) -> bool {
        let count = count.min(FRAME_REGISTERS - 1);
        self.regs[FRAME_REGISTERS - count..]
            .iter()
            .any(|&reg| reg != 0)
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.function() {
            Some(function) => write!(f, "{function:?}")?,
            None => write!(f, "{:#x}", self.fid())?,
        }
        write!(
            f,
            " [{:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}]",
            self.regs[1],
            self.regs[2],
            self.regs[3],
            self.regs[4],
            self.regs[5],
            self.regs[6],
            self.regs[7]
        )
    }
}

/// The sender and receiver of a message, packed into a single register on the wire as
/// `sender << 16 | receiver`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndpointPair {
    pub sender: u16,
    pub receiver: u16,
}

impl EndpointPair {
    pub const fn new(sender: u16, receiver: u16) -> Self {
        Self { sender, receiver }
    }

    pub const fn from_word(word: u64) -> Self {
        Self {
            sender: (word >> 16) as u16,
            receiver: word as u16,
        }
    }

    pub const fn to_word(self) -> u64 {
        (self.sender as u64) << 16 | self.receiver as u64
    }

    /// Returns the pair with sender and receiver swapped, as used by a response.
    pub const fn reversed(self) -> Self {
        Self {
            sender: self.receiver,
            receiver: self.sender,
        }
    }
}

/// Returns the FF-A error for a status code from w2 of an FFA_ERROR frame.
pub fn error_from_code(code: i32) -> Option<FfaError> {
    Some(match code {
        -1 => FfaError::NotSupported,
        -2 => FfaError::InvalidParameters,
        -3 => FfaError::NoMemory,
        -4 => FfaError::Busy,
        -5 => FfaError::Interrupted,
        -6 => FfaError::Denied,
        -7 => FfaError::Retry,
        -8 => FfaError::Aborted,
        -9 => FfaError::NoData,
        _ => return None,
    })
}

/// Returns the status code placed in w2 of an FFA_ERROR frame for the given error.
pub fn error_code(error: FfaError) -> u64 {
    error as i32 as u32 as u64
}

/// Checks that the last `count` registers of an FF-A response are zero.
///
/// Logs and returns false if any of them is not.
pub fn reserve_param_check(frame: &Frame, count: usize) -> bool {
    if frame.reserved_nonzero(count) {
        log::error!("Reserved registers must be zero: {frame:?}");
        false
    } else {
        true
    }
}
