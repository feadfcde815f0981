// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The direct messaging protocol engine.
//!
//! Every exchange between two endpoints goes through [`DirectMessaging`], which makes the FF-A
//! call and tracks where the calling execution context is in the request/response handshake.
//! Result frames are always handed back to the caller unchanged: deciding whether a frame is what
//! a test expected is up to the test body.

use crate::{
    ffa::{CallWidth, Ffa},
    frame::{EndpointPair, Frame},
    platform::{PerCoreState, Platform, PlatformImpl, exception_free},
};
use arm_ffa::FuncId;
use core::cell::RefCell;
use log::trace;
use percore::{ExceptionLock, PerCore};

/// Where an execution context is in the direct messaging handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointState {
    /// Not taking part in any exchange, or waiting for a request.
    Idle,
    /// Handling a request, or back in control after a request completed.
    Running,
    /// Blocked in a direct request to `peer`.
    AwaitingResponse { peer: u16 },
    /// A request to `peer` returned because `peer` yielded, and must be resumed with FFA_RUN.
    Preempted { peer: u16 },
    /// A request to `peer` returned because of an interrupt, and must be resumed with FFA_RUN.
    Interrupted { peer: u16 },
    /// Has sent a direct response, and is blocked until the next request arrives.
    Responded,
}

impl EndpointState {
    /// Returns the peer of a request which has been sent but not yet answered.
    fn outstanding_peer(self) -> Option<u16> {
        match self {
            Self::AwaitingResponse { peer }
            | Self::Preempted { peer }
            | Self::Interrupted { peer } => Some(peer),
            _ => None,
        }
    }

    /// Returns the state after a request to `peer` returned `frame`.
    fn after_request(frame: &Frame, peer: u16) -> Self {
        match frame.function() {
            Some(FuncId::Yield) => Self::Preempted { peer },
            Some(FuncId::Interrupt) => Self::Interrupted { peer },
            // A response completes the request. Anything else means it was never accepted.
            _ => Self::Running,
        }
    }
}

/// The direct messaging engine of one endpoint, with separate state for each execution context.
pub struct DirectMessaging {
    state: PerCoreState<EndpointState>,
}

impl DirectMessaging {
    /// Returns an engine with every execution context idle.
    pub const fn new() -> Self {
        Self {
            state: PerCore::new(
                [const { ExceptionLock::new(RefCell::new(EndpointState::Idle)) };
                    PlatformImpl::CORE_COUNT],
            ),
        }
    }

    /// Returns the state of the current execution context.
    pub fn state(&self) -> EndpointState {
        exception_free(|token| *self.state.get().borrow(token).borrow())
    }

    fn set_state(&self, state: EndpointState) {
        exception_free(|token| {
            *self.state.get().borrow_mut(token) = state;
        });
    }

    /// Returns the current execution context to idle, ready for the next test.
    pub fn reset(&self) {
        self.set_state(EndpointState::Idle);
    }

    /// Sends a direct request and blocks until the call returns.
    ///
    /// The returned frame is normally the peer's direct response, but may be an error, or FFA_YIELD
    /// or FFA_INTERRUPT if the peer was preempted. In the last two cases the request is still
    /// outstanding and must be resumed with [`DirectMessaging::resume`].
    ///
    /// # Panics
    ///
    /// Panics if a request to the same receiver is still outstanding.
    pub fn send_direct_request(
        &self,
        ffa: &Ffa,
        width: CallWidth,
        endpoints: EndpointPair,
        payload: [u64; 5],
    ) -> Frame {
        let peer = endpoints.receiver;
        let previous = self.state();
        if previous.outstanding_peer() == Some(peer) {
            panic!("Direct request to {peer:#x} while a previous one is still outstanding");
        }
        self.set_state(EndpointState::AwaitingResponse { peer });
        trace!("Direct request {endpoints:x?} {payload:#x?}");
        let result = ffa.direct_request(width, endpoints, payload);
        trace!("Direct request returned {result:?}");
        self.set_state(EndpointState::after_request(&result, peer));
        result
    }

    /// Resumes a request which returned FFA_YIELD or FFA_INTERRUPT, by running the vCPU named in
    /// w1 of that frame.
    ///
    /// If w1 is zero the peer of the outstanding request is run, on the vCPU of the current core.
    /// Returns the frame the FFA_RUN call produces, which is handled as the result of the original
    /// request.
    pub fn resume(&self, ffa: &Ffa, preempted: &Frame) -> Frame {
        let named = EndpointPair::from_word(preempted.arg(1));
        let Some(peer) = self.state().outstanding_peer() else {
            return ffa.run(named.sender, named.receiver);
        };
        let (endpoint, vcpu) = if preempted.arg(1) == 0 {
            (peer, PlatformImpl::current_core() as u16)
        } else {
            (named.sender, named.receiver)
        };
        self.set_state(EndpointState::AwaitingResponse { peer });
        let result = ffa.run(endpoint, vcpu);
        trace!("FFA_RUN of {endpoint:#x} vCPU {vcpu} returned {result:?}");
        self.set_state(EndpointState::after_request(&result, peer));
        result
    }

    /// Blocks until a request or scheduling frame arrives for this execution context.
    ///
    /// Callers must wait again if the frame is not a direct request.
    pub fn wait_for_request(&self, ffa: &Ffa) -> Frame {
        let previous = self.state();
        let frame = ffa.msg_wait();
        trace!("FFA_MSG_WAIT returned {frame:?}");
        self.set_state(Self::after_wait(&frame, previous));
        frame
    }

    /// Sends a direct response to the request being handled, and blocks until the next frame
    /// arrives.
    ///
    /// If the response is rejected the returned error frame leaves the request being handled.
    pub fn send_direct_response(
        &self,
        ffa: &Ffa,
        width: CallWidth,
        endpoints: EndpointPair,
        payload: [u64; 5],
    ) -> Frame {
        let previous = self.state();
        self.set_state(EndpointState::Responded);
        trace!("Direct response {endpoints:x?} {payload:#x?}");
        let frame = ffa.direct_response(width, endpoints, payload);
        trace!("Direct response returned {frame:?}");
        self.set_state(Self::after_wait(&frame, previous));
        frame
    }

    /// Returns the state after a call which blocks for the next request returned `frame`.
    fn after_wait(frame: &Frame, previous: EndpointState) -> EndpointState {
        if frame.is(FuncId::MsgSendDirectReq32) || frame.is(FuncId::MsgSendDirectReq64) {
            EndpointState::Running
        } else if frame.is_error() {
            previous
        } else {
            EndpointState::Idle
        }
    }
}
