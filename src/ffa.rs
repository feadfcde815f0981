// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Thin wrappers for the FF-A calls made by the harness and the test bodies.
//!
//! Every wrapper returns the raw result frame. Test bodies need to see exactly what the
//! system-under-test returned, so nothing here interprets the result beyond the optional
//! [`success`] helper.

use crate::{
    conduit::Conduit,
    frame::{EndpointPair, Frame},
};
use arm_ffa::{FfaError, FuncId, Version};
use thiserror::Error;
use uuid::Uuid;

/// FFA_MSG_POLL, which `arm_ffa` no longer models.
pub const MSG_POLL_32: u32 = 0x8400_006a;

/// FFA_MSG_SEND, which `arm_ffa` no longer models.
pub const MSG_SEND_32: u32 = 0x8400_006e;

/// The minimum RX/TX buffer alignment reported in w2[1:0] by FFA_FEATURES of FFA_RXTX_MAP.
pub const RXTX_MAP_ALIGNMENT_MASK: u64 = 0b11;
pub const RXTX_MAP_ALIGNMENT_4K: u64 = 0b00;
pub const RXTX_MAP_ALIGNMENT_64K: u64 = 0b01;
pub const RXTX_MAP_ALIGNMENT_16K: u64 = 0b10;

/// Whether a call uses the SMC32 or SMC64 convention.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallWidth {
    W32,
    W64,
}

impl CallWidth {
    pub fn direct_request(self) -> FuncId {
        match self {
            Self::W32 => FuncId::MsgSendDirectReq32,
            Self::W64 => FuncId::MsgSendDirectReq64,
        }
    }

    pub fn direct_response(self) -> FuncId {
        match self {
            Self::W32 => FuncId::MsgSendDirectResp32,
            Self::W64 => FuncId::MsgSendDirectResp64,
        }
    }

    /// Truncates payload words to the width of the call.
    pub fn mask(self, value: u64) -> u64 {
        match self {
            Self::W32 => value & 0xffff_ffff,
            Self::W64 => value,
        }
    }
}

/// An FF-A call did not return the success frame the caller needed.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum CallError {
    #[error("FF-A error {0:?}")]
    Ffa(FfaError),
    #[error("FF-A error with unknown code {0:#x}")]
    UnknownError(u64),
    #[error("Unexpected function ID {0:#x}")]
    Unexpected(u32),
}

/// Returns the frame if it is FFA_SUCCESS, otherwise converts it to an error.
pub fn success(frame: Frame) -> Result<Frame, CallError> {
    expect_function(frame, FuncId::Success32).or_else(|e| {
        if frame.is(FuncId::Success64) {
            Ok(frame)
        } else {
            Err(e)
        }
    })
}

/// Returns the frame if it carries the given function ID, otherwise converts it to an error.
pub fn expect_function(frame: Frame, function: FuncId) -> Result<Frame, CallError> {
    if frame.is(function) {
        Ok(frame)
    } else if frame.is_error() {
        Err(frame
            .error()
            .map_or(CallError::UnknownError(frame.arg(2)), CallError::Ffa))
    } else {
        Err(CallError::Unexpected(frame.fid()))
    }
}

/// Packs a version as `major << 16 | minor`, the encoding used by FFA_VERSION.
pub fn pack_version(version: Version) -> u32 {
    u32::from(version.0) << 16 | u32::from(version.1)
}

/// Unpacks a version returned by FFA_VERSION, ignoring bit 31.
pub fn unpack_version(value: u32) -> Version {
    Version(((value >> 16) & 0x7fff) as u16, value as u16)
}

/// Splits a UUID into the four registers used by FFA_PARTITION_INFO_GET.
fn uuid_words(uuid: &Uuid) -> [u64; 4] {
    let value = uuid.as_u128();
    [
        (value >> 96) as u32 as u64,
        (value >> 64) as u32 as u64,
        (value >> 32) as u32 as u64,
        value as u32 as u64,
    ]
}

/// Makes FF-A calls through a conduit.
#[derive(Clone, Copy)]
pub struct Ffa<'a> {
    conduit: &'a dyn Conduit,
}

impl<'a> Ffa<'a> {
    pub fn new(conduit: &'a dyn Conduit) -> Self {
        Self { conduit }
    }

    /// Makes an arbitrary call.
    pub fn call(&self, frame: Frame) -> Frame {
        self.conduit.call(frame)
    }

    /// FFA_VERSION. The result is returned in w0 rather than as a success frame.
    pub fn version(&self, input: u32) -> Frame {
        self.call(Frame::new(FuncId::Version).with(1, input.into()))
    }

    /// Negotiates the given version, returning the version the callee reports.
    pub fn negotiate_version(&self, version: Version) -> Result<Version, CallError> {
        let fid = self.version(pack_version(version)).fid();
        if fid & 0x8000_0000 != 0 {
            Err(CallError::Ffa(FfaError::NotSupported))
        } else {
            Ok(unpack_version(fid))
        }
    }

    pub fn id_get(&self) -> Frame {
        self.call(Frame::new(FuncId::IdGet))
    }

    pub fn spm_id_get(&self) -> Frame {
        self.call(Frame::new(FuncId::SpmIdGet))
    }

    /// FFA_FEATURES for a function ID, with the given input properties in w2.
    pub fn features(&self, fid: u32, input_properties: u32) -> Frame {
        self.call(
            Frame::new(FuncId::Features)
                .with(1, fid.into())
                .with(2, input_properties.into()),
        )
    }

    /// Returns whether FFA_FEATURES reports the given function as implemented.
    pub fn is_feature_supported(&self, fid: u32) -> bool {
        self.features(fid, 0).is_success()
    }

    pub fn rx_release(&self, id: u16) -> Frame {
        self.call(Frame::new(FuncId::RxRelease).with(1, id.into()))
    }

    /// FFA_RXTX_MAP_64 with the given buffer addresses and size in pages.
    pub fn rxtx_map(&self, tx: u64, rx: u64, page_count: u32) -> Frame {
        self.call(
            Frame::new(FuncId::RxTxMap64)
                .with(1, tx)
                .with(2, rx)
                .with(3, page_count.into()),
        )
    }

    pub fn rxtx_unmap(&self, id: u16) -> Frame {
        self.call(Frame::new(FuncId::RxTxUnmap).with(1, u64::from(id) << 16))
    }

    pub fn partition_info_get(&self, uuid: &Uuid) -> Frame {
        let [w1, w2, w3, w4] = uuid_words(uuid);
        self.call(
            Frame::new(FuncId::PartitionInfoGet)
                .with(1, w1)
                .with(2, w2)
                .with(3, w3)
                .with(4, w4),
        )
    }

    pub fn msg_wait(&self) -> Frame {
        self.call(Frame::new(FuncId::MsgWait))
    }

    pub fn yield_(&self) -> Frame {
        self.call(Frame::new(FuncId::Yield))
    }

    pub fn msg_poll(&self) -> Frame {
        self.call(Frame::from_raw_fid(MSG_POLL_32))
    }

    /// FFA_RUN on the given vCPU of the given endpoint.
    pub fn run(&self, endpoint: u16, vcpu: u16) -> Frame {
        self.call(Frame::new(FuncId::Run).with(1, u64::from(endpoint) << 16 | u64::from(vcpu)))
    }

    /// FFA_MSG_SEND of a message of the given size, already written to the TX buffer.
    pub fn msg_send(&self, endpoints: EndpointPair, size: u32) -> Frame {
        self.call(
            Frame::from_raw_fid(MSG_SEND_32)
                .with(1, endpoints.to_word())
                .with(3, size.into()),
        )
    }

    pub fn direct_request(
        &self,
        width: CallWidth,
        endpoints: EndpointPair,
        payload: [u64; 5],
    ) -> Frame {
        self.call(
            Frame::new(width.direct_request())
                .with(1, endpoints.to_word())
                .with_payload(payload),
        )
    }

    pub fn direct_response(
        &self,
        width: CallWidth,
        endpoints: EndpointPair,
        payload: [u64; 5],
    ) -> Frame {
        self.call(
            Frame::new(width.direct_response())
                .with(1, endpoints.to_word())
                .with_payload(payload),
        )
    }

    /// FFA_MEM_SHARE with the transaction descriptor in the TX buffer.
    pub fn mem_share(&self, width: CallWidth, total_length: u32, fragment_length: u32) -> Frame {
        let function = match width {
            CallWidth::W32 => FuncId::MemShare32,
            CallWidth::W64 => FuncId::MemShare64,
        };
        self.mem_transaction(function, total_length, fragment_length)
    }

    /// FFA_MEM_LEND with the transaction descriptor in the TX buffer.
    pub fn mem_lend(&self, width: CallWidth, total_length: u32, fragment_length: u32) -> Frame {
        let function = match width {
            CallWidth::W32 => FuncId::MemLend32,
            CallWidth::W64 => FuncId::MemLend64,
        };
        self.mem_transaction(function, total_length, fragment_length)
    }

    /// FFA_MEM_DONATE with the transaction descriptor in the TX buffer.
    pub fn mem_donate(&self, width: CallWidth, total_length: u32, fragment_length: u32) -> Frame {
        let function = match width {
            CallWidth::W32 => FuncId::MemDonate32,
            CallWidth::W64 => FuncId::MemDonate64,
        };
        self.mem_transaction(function, total_length, fragment_length)
    }

    /// FFA_MEM_RETRIEVE_REQ with the retrieve request in the TX buffer.
    pub fn mem_retrieve_req(
        &self,
        width: CallWidth,
        total_length: u32,
        fragment_length: u32,
    ) -> Frame {
        let function = match width {
            CallWidth::W32 => FuncId::MemRetrieveReq32,
            CallWidth::W64 => FuncId::MemRetrieveReq64,
        };
        self.mem_transaction(function, total_length, fragment_length)
    }

    fn mem_transaction(&self, function: FuncId, total_length: u32, fragment_length: u32) -> Frame {
        self.call(
            Frame::new(function)
                .with(1, total_length.into())
                .with(2, fragment_length.into()),
        )
    }

    /// FFA_MEM_RELINQUISH with the relinquish descriptor in the TX buffer.
    pub fn mem_relinquish(&self) -> Frame {
        self.call(Frame::new(FuncId::MemRelinquish))
    }

    pub fn mem_reclaim(&self, handle: u64, flags: u32) -> Frame {
        self.call(
            Frame::new(FuncId::MemReclaim)
                .with(1, handle & 0xffff_ffff)
                .with(2, handle >> 32)
                .with(3, flags.into()),
        )
    }

    /// FFA_SECONDARY_EP_REGISTER_64.
    ///
    /// # Safety
    ///
    /// `entry_point` must be the address of code which is safe for the SPMC to start secondary
    /// execution contexts at.
    pub unsafe fn secondary_ep_register(&self, entry_point: u64) -> Frame {
        self.call(Frame::new(FuncId::SecondaryEpRegister64).with(1, entry_point))
    }
}

/// Assembles a memory handle from w2 and w3 of a success frame.
pub fn handle_from_frame(frame: &Frame) -> u64 {
    (frame.arg(2) & 0xffff_ffff) | (frame.arg(3) & 0xffff_ffff) << 32
}
