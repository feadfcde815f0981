// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A fake partition manager which routes FF-A calls between endpoint threads.
//!
//! Every execution context of every endpoint is a thread, keyed by its FF-A ID and vCPU index. A
//! call which blocks in the real system, such as a direct request or FFA_MSG_WAIT, blocks the
//! calling thread until another thread delivers a frame to its inbox.

use crate::{
    conduit::Conduit,
    database::TestDatabase,
    dispatch::{Harness, WD_DISABLE, WD_ENABLE},
    endpoint::{EndpointInfo, EndpointRegistry, LogicalId, Properties},
    ffa::{CallWidth, MSG_POLL_32, MSG_SEND_32, pack_version},
    frame::{EndpointPair, Frame, VERSION_NOT_SUPPORTED, error_code},
    memory::{
        DescriptorError, FLAGS_TRANSACTION_SHARE, INSTRUCTION_ACCESS_NX, MEMORY_SECURITY_NS,
        MemoryTransaction, PAGE_SIZE, Relinquish,
    },
    platform::{
        Platform, PlatformImpl,
        test::{TestPlatform, WatchdogCounts},
    },
};
use arm_ffa::{FfaError, FuncId, Version};
use log::{debug, warn};
use std::{
    collections::BTreeMap,
    sync::{
        Condvar, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use uuid::Uuid;
use zerocopy::{Immutable, IntoBytes};

/// The FF-A version the fake implements unless told otherwise.
const FAKE_VERSION: Version = Version(1, 1);

/// The ID of the fake partition manager itself.
const SPMC_ID: u16 = 0x8000;

/// The first handle given out for a memory transaction. Only the upper bits are set so that a
/// handle split across two registers is noticed.
const FIRST_HANDLE: u64 = 0x1234_0000_0000_0001;

/// Functions every endpoint may call.
const MANDATORY: [FuncId; 17] = [
    FuncId::Error,
    FuncId::Success32,
    FuncId::Success64,
    FuncId::Interrupt,
    FuncId::Version,
    FuncId::Features,
    FuncId::RxRelease,
    FuncId::RxTxMap32,
    FuncId::RxTxMap64,
    FuncId::RxTxUnmap,
    FuncId::PartitionInfoGet,
    FuncId::IdGet,
    FuncId::MsgWait,
    FuncId::Run,
    FuncId::MemShare32,
    FuncId::MemShare64,
    FuncId::MemReclaim,
];

/// Functions which receivers of memory transactions call.
const RETRIEVE: [FuncId; 4] = [
    FuncId::MemRetrieveReq32,
    FuncId::MemRetrieveReq64,
    FuncId::MemRetrieveResp,
    FuncId::MemRelinquish,
];

/// Behaviour of the fake which tests may change.
#[derive(Clone, Copy, Debug)]
pub struct FakeOptions {
    /// Whether FFA_MSG_SEND and FFA_MSG_POLL are implemented for endpoints which declare indirect
    /// messaging support.
    pub indirect_messaging: bool,
    /// Returns FFA_YIELD from every direct request which reaches its receiver, so the sender has to
    /// resume it with FFA_RUN.
    pub preempt_direct_requests: bool,
    /// Rejects direct requests for the watchdog services with FFA_ERROR(DENIED).
    pub deny_watchdog_services: bool,
    /// The FF-A version to report. From v1.2 an endpoint can't change the version it first asked
    /// for.
    pub version: Version,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            indirect_messaging: true,
            preempt_direct_requests: false,
            deny_watchdog_services: false,
            version: FAKE_VERSION,
        }
    }
}

/// An endpoint ID and vCPU index.
type ContextKey = (u16, u16);

#[derive(Debug, Default)]
struct Context {
    /// Blocked in FFA_MSG_WAIT or after a direct response, ready for a request.
    waiting: bool,
    /// The frame the context returns with next.
    inbox: Option<Frame>,
    /// The sender of the direct request being handled.
    serving: Option<ContextKey>,
    /// A request held back until the sender runs the context.
    pending: Option<Frame>,
}

#[derive(Debug)]
struct RxTx {
    tx: u64,
    rx: u64,
    pages: u32,
    rx_full: bool,
}

impl RxTx {
    fn size(&self) -> u64 {
        u64::from(self.pages) * PAGE_SIZE as u64
    }

    fn overlaps(&self, address: u64, size: u64) -> bool {
        [self.tx, self.rx]
            .into_iter()
            .any(|start| ranges_overlap(start, self.size(), address, size))
    }

    /// Returns the TX buffer.
    ///
    /// # Safety
    ///
    /// The owner of the buffers must keep them alive until they are unmapped, and must not access
    /// them while the fake does.
    unsafe fn tx(&self) -> &[u8] {
        // SAFETY: Our caller promised that the buffer is live and not being written.
        unsafe { std::slice::from_raw_parts(self.tx as *const u8, self.size() as usize) }
    }

    /// Returns the RX buffer.
    ///
    /// # Safety
    ///
    /// The owner of the buffers must keep them alive until they are unmapped, and must not access
    /// them while the fake does.
    #[allow(clippy::mut_from_ref)]
    unsafe fn rx(&self) -> &mut [u8] {
        // SAFETY: Our caller promised that the buffer is live and not being accessed.
        unsafe { std::slice::from_raw_parts_mut(self.rx as *mut u8, self.size() as usize) }
    }
}

#[derive(Debug)]
struct Share {
    transaction: MemoryTransaction,
    retrieved: bool,
}

#[derive(Debug)]
struct State {
    shutdown: bool,
    contexts: BTreeMap<ContextKey, Context>,
    buffers: BTreeMap<u16, RxTx>,
    shares: BTreeMap<u64, Share>,
    next_handle: u64,
    /// The version each endpoint first asked for.
    requested_versions: BTreeMap<u16, u32>,
}

impl State {
    fn context(&mut self, key: ContextKey) -> &mut Context {
        self.contexts.entry(key).or_default()
    }
}

/// Partition information descriptor written to the RX buffer by FFA_PARTITION_INFO_GET.
#[derive(Clone, Copy, Debug, Immutable, IntoBytes)]
#[repr(C)]
struct PartitionInfo {
    id: u16,
    ec_count: u16,
    properties: u32,
    uuid: [u8; 16],
}

/// A fake partition manager and hypervisor for the endpoints of the test platform.
pub struct FakeSpmc {
    options: FakeOptions,
    endpoints: EndpointRegistry,
    state: Mutex<State>,
    changed: Condvar,
    calls: AtomicUsize,
}

impl FakeSpmc {
    pub fn new() -> Self {
        Self::with_options(FakeOptions::default())
    }

    pub fn with_options(options: FakeOptions) -> Self {
        Self {
            options,
            endpoints: EndpointRegistry::new(PlatformImpl::ENDPOINTS),
            state: Mutex::new(State {
                shutdown: false,
                contexts: BTreeMap::new(),
                buffers: BTreeMap::new(),
                shares: BTreeMap::new(),
                next_handle: FIRST_HANDLE,
                requested_versions: BTreeMap::new(),
            }),
            changed: Condvar::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns a conduit through which calls are made as the endpoint with the given FF-A ID.
    pub fn conduit(&self, id: u16) -> FakeConduit<'_> {
        FakeConduit { spmc: self, id }
    }

    /// Returns the number of calls made through all conduits so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every blocked and future call return FFA_ERROR(ABORTED).
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.changed.notify_all();
    }

    /// Returns the vCPU of `endpoint` which runs on the calling thread's core.
    fn vcpu(endpoint: Option<&EndpointInfo>) -> u16 {
        match endpoint {
            Some(endpoint) if endpoint.ec_count > 1 => PlatformImpl::current_core() as u16,
            _ => 0,
        }
    }

    fn properties(&self, id: u16) -> Properties {
        self.endpoints
            .by_id(id)
            .map_or(Properties::empty(), |endpoint| endpoint.properties)
    }

    fn supports_indirect(&self, id: u16) -> bool {
        self.options.indirect_messaging && self.properties(id).contains(Properties::INDIRECT_MESSAGE)
    }

    fn handle(&self, id: u16, frame: Frame) -> Frame {
        let key = (id, Self::vcpu(self.endpoints.by_id(id)));
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            return error(FfaError::Aborted);
        }

        match frame.fid() {
            MSG_SEND_32 => return self.msg_send(&mut state, key, &frame),
            MSG_POLL_32 => return self.msg_poll(&mut state, key),
            _ => {}
        }
        let Some(function) = frame.function() else {
            return error(FfaError::NotSupported);
        };
        match function {
            FuncId::Version => self.version(&mut state, id, &frame),
            FuncId::IdGet => Frame::new(FuncId::Success32).with(2, id.into()),
            FuncId::SpmIdGet => Frame::new(FuncId::Success32).with(2, SPMC_ID.into()),
            FuncId::Features => self.features(id, frame.arg(1) as u32),
            FuncId::PartitionInfoGet => self.partition_info_get(&mut state, id, &frame),
            FuncId::RxTxMap32 | FuncId::RxTxMap64 => rxtx_map(&mut state, id, &frame),
            FuncId::RxTxUnmap => rxtx_unmap(&mut state, id, &frame),
            FuncId::RxRelease => rx_release(&mut state, id),
            FuncId::MsgWait => self.msg_wait(state, key),
            FuncId::Yield => self.yield_(&mut state, key),
            FuncId::Run => self.run(state, key, &frame),
            FuncId::MsgSendDirectReq32 => self.direct_request(state, key, &frame, CallWidth::W32),
            FuncId::MsgSendDirectReq64 => self.direct_request(state, key, &frame, CallWidth::W64),
            FuncId::MsgSendDirectResp32 => {
                self.direct_response(state, key, &frame, CallWidth::W32)
            }
            FuncId::MsgSendDirectResp64 => {
                self.direct_response(state, key, &frame, CallWidth::W64)
            }
            FuncId::MemShare32 | FuncId::MemShare64 => self.mem_share(&mut state, id, &frame),
            FuncId::MemRetrieveReq32 | FuncId::MemRetrieveReq64 => {
                self.mem_retrieve(&mut state, id, &frame)
            }
            FuncId::MemRelinquish => mem_relinquish(&mut state, id),
            FuncId::MemReclaim => mem_reclaim(&mut state, id, &frame),
            FuncId::SecondaryEpRegister64 => Frame::new(FuncId::Success32),
            _ => error(FfaError::NotSupported),
        }
    }

    /// Blocks until a frame is delivered to the given context.
    fn block(&self, mut state: MutexGuard<'_, State>, key: ContextKey) -> Frame {
        loop {
            if state.shutdown {
                return error(FfaError::Aborted);
            }
            if let Some(frame) = state.context(key).inbox.take() {
                return frame;
            }
            state = self.changed.wait(state).unwrap();
        }
    }

    fn version(&self, state: &mut State, caller: u16, frame: &Frame) -> Frame {
        let requested = frame.arg(1) as u32;
        if requested & 0x8000_0000 != 0 {
            return Frame::from_raw_fid(VERSION_NOT_SUPPORTED);
        }
        if self.options.version >= Version(1, 2) {
            let first = *state.requested_versions.entry(caller).or_insert(requested);
            if first != requested {
                return Frame::from_raw_fid(VERSION_NOT_SUPPORTED);
            }
        }
        Frame::from_raw_fid(pack_version(self.options.version))
    }

    fn features(&self, caller: u16, fid: u32) -> Frame {
        let properties = self.properties(caller);
        let supported = match FuncId::try_from(fid) {
            Ok(function) if MANDATORY.contains(&function) || RETRIEVE.contains(&function) => true,
            Ok(FuncId::Yield) => self.supports_indirect(caller),
            Ok(FuncId::MsgSendDirectReq32 | FuncId::MsgSendDirectReq64) => {
                properties.contains(Properties::DIRECT_REQUEST_SEND)
            }
            Ok(FuncId::MsgSendDirectResp32 | FuncId::MsgSendDirectResp64) => {
                properties.contains(Properties::DIRECT_REQUEST_RECV)
            }
            _ => (fid == MSG_SEND_32 || fid == MSG_POLL_32) && self.supports_indirect(caller),
        };
        if supported {
            Frame::new(FuncId::Success32)
        } else {
            error(FfaError::NotSupported)
        }
    }

    fn partition_info_get(&self, state: &mut State, caller: u16, frame: &Frame) -> Frame {
        let uuid = Uuid::from_u128(
            (1..=4).fold(0, |value, index| value << 32 | u128::from(frame.arg(index) as u32)),
        );
        let partitions = self
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.logical_id.is_secure())
            .filter(|endpoint| uuid.is_nil() || endpoint.uuid == uuid)
            .collect::<Vec<_>>();
        if partitions.is_empty() {
            return error(FfaError::InvalidParameters);
        }
        let count_only = frame.arg(5) & 1 != 0;
        if !count_only {
            let Some(buffers) = state.buffers.get_mut(&caller) else {
                return error(FfaError::Denied);
            };
            if buffers.rx_full {
                return error(FfaError::Busy);
            }
            // SAFETY: The caller is blocked in this call, so isn't accessing its RX buffer.
            let rx = unsafe { buffers.rx() };
            for (index, endpoint) in partitions.iter().enumerate() {
                let info = PartitionInfo {
                    id: endpoint.id,
                    ec_count: endpoint.ec_count,
                    properties: endpoint.properties.bits(),
                    uuid: *endpoint.uuid.as_bytes(),
                };
                let offset = index * size_of::<PartitionInfo>();
                let Some(slot) = rx.get_mut(offset..offset + size_of::<PartitionInfo>()) else {
                    return error(FfaError::NoMemory);
                };
                slot.copy_from_slice(info.as_bytes());
            }
            buffers.rx_full = true;
        }
        Frame::new(FuncId::Success32)
            .with(2, partitions.len() as u64)
            .with(3, if count_only { 0 } else { size_of::<PartitionInfo>() as u64 })
    }

    fn msg_wait(&self, mut state: MutexGuard<'_, State>, key: ContextKey) -> Frame {
        let context = state.context(key);
        if context.serving.is_some() {
            return error(FfaError::Denied);
        }
        context.waiting = true;
        self.changed.notify_all();
        self.block(state, key)
    }

    fn yield_(&self, state: &mut State, key: ContextKey) -> Frame {
        if !self.supports_indirect(key.0) {
            error(FfaError::NotSupported)
        } else if state.context(key).serving.is_some() {
            error(FfaError::Denied)
        } else {
            Frame::new(FuncId::Success32)
        }
    }

    fn msg_poll(&self, state: &mut State, key: ContextKey) -> Frame {
        if !self.supports_indirect(key.0) {
            error(FfaError::NotSupported)
        } else if state.context(key).serving.is_some() {
            error(FfaError::Denied)
        } else {
            error(FfaError::Retry)
        }
    }

    fn msg_send(&self, state: &mut State, key: ContextKey, frame: &Frame) -> Frame {
        let endpoints = frame.endpoints();
        if !self.supports_indirect(key.0) {
            error(FfaError::NotSupported)
        } else if endpoints.sender != key.0 || self.endpoints.by_id(endpoints.receiver).is_none() {
            error(FfaError::InvalidParameters)
        } else if state.context(key).serving.is_some()
            || !state.buffers.contains_key(&key.0)
            || !self.supports_indirect(endpoints.receiver)
        {
            error(FfaError::Denied)
        } else {
            Frame::new(FuncId::Success32)
        }
    }

    fn direct_request(
        &self,
        mut state: MutexGuard<'_, State>,
        key: ContextKey,
        frame: &Frame,
        width: CallWidth,
    ) -> Frame {
        let endpoints = frame.endpoints();
        let receiver = self.endpoints.by_id(endpoints.receiver);
        let Some(receiver) = receiver.filter(|_| {
            endpoints.sender == key.0 && endpoints.receiver != key.0 && frame.arg(2) == 0
        }) else {
            debug!("Rejecting direct request {frame:?} from {:#x}", key.0);
            return error(FfaError::InvalidParameters);
        };

        if self.options.deny_watchdog_services
            && matches!(frame.arg(3) as u32, WD_ENABLE | WD_DISABLE)
        {
            return error(FfaError::Denied);
        }

        let target = (receiver.id, Self::vcpu(Some(receiver)));
        loop {
            if state.shutdown {
                return error(FfaError::Aborted);
            }
            let context = state.context(target);
            if context.serving.is_some() {
                return error(FfaError::Busy);
            }
            if context.waiting {
                break;
            }
            state = self.changed.wait(state).unwrap();
        }

        let request = masked(frame, width);
        let context = state.context(target);
        context.waiting = false;
        context.serving = Some(key);
        if self.options.preempt_direct_requests {
            context.pending = Some(request);
            return Frame::new(FuncId::Yield)
                .with(1, EndpointPair::new(target.0, target.1).to_word());
        }
        context.inbox = Some(request);
        self.changed.notify_all();
        self.block(state, key)
    }

    fn run(&self, mut state: MutexGuard<'_, State>, key: ContextKey, frame: &Frame) -> Frame {
        let target = EndpointPair::from_word(frame.arg(1));
        let context = state.context((target.sender, target.receiver));
        if context.serving != Some(key) {
            return error(FfaError::Denied);
        }
        let Some(request) = context.pending.take() else {
            return error(FfaError::Denied);
        };
        context.inbox = Some(request);
        self.changed.notify_all();
        self.block(state, key)
    }

    fn direct_response(
        &self,
        mut state: MutexGuard<'_, State>,
        key: ContextKey,
        frame: &Frame,
        width: CallWidth,
    ) -> Frame {
        let Some(requester) = state.context(key).serving else {
            return error(FfaError::Denied);
        };
        let endpoints = frame.endpoints();
        if endpoints.sender != key.0 || endpoints.receiver != requester.0 || frame.arg(2) != 0 {
            debug!("Rejecting direct response {frame:?} from {:#x}", key.0);
            return error(FfaError::InvalidParameters);
        }

        state.context(requester).inbox = Some(masked(frame, width));
        let context = state.context(key);
        context.serving = None;
        context.waiting = true;
        self.changed.notify_all();
        self.block(state, key)
    }

    fn mem_share(&self, state: &mut State, caller: u16, frame: &Frame) -> Frame {
        let transaction = match read_tx(state, caller, frame, |tx| {
            MemoryTransaction::decode(self.options.version, tx)
        }) {
            Ok(transaction) => transaction,
            Err(e) => return error(e),
        };
        let receiver_valid = self
            .endpoints
            .by_id(transaction.receiver)
            .is_some_and(|receiver| receiver.id != caller);
        if transaction.sender != caller || !receiver_valid || transaction.constituents.is_empty()
        {
            return error(FfaError::InvalidParameters);
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.shares.insert(
            handle,
            Share {
                transaction,
                retrieved: false,
            },
        );
        Frame::new(FuncId::Success32)
            .with(2, handle & 0xffff_ffff)
            .with(3, handle >> 32)
    }

    fn mem_retrieve(&self, state: &mut State, caller: u16, frame: &Frame) -> Frame {
        let request = match read_tx(state, caller, frame, |tx| {
            MemoryTransaction::decode(self.options.version, tx)
        }) {
            Ok(request) => request,
            Err(e) => return error(e),
        };
        let Some(share) = state.shares.get(&request.handle) else {
            return error(FfaError::InvalidParameters);
        };
        if share.transaction.receiver != caller || share.retrieved {
            return error(FfaError::Denied);
        }

        let mut response = share.transaction.clone();
        response.handle = request.handle;
        response.flags = FLAGS_TRANSACTION_SHARE;
        if !self
            .endpoints
            .logical_id(response.sender)
            .is_some_and(LogicalId::is_secure)
        {
            response.attributes |= MEMORY_SECURITY_NS;
        }
        let access = match request.permissions & 0b11 {
            0 => share.transaction.permissions & 0b11,
            access => access,
        };
        response.permissions = access | INSTRUCTION_ACCESS_NX;

        let Some(buffers) = state.buffers.get_mut(&caller) else {
            return error(FfaError::Denied);
        };
        if buffers.rx_full {
            return error(FfaError::Busy);
        }
        // SAFETY: The caller is blocked in this call, so isn't accessing its RX buffer.
        let length = match response.encode(self.options.version, unsafe { buffers.rx() }) {
            Ok(length) => length as u64,
            Err(e) => {
                warn!("Retrieve response doesn't fit: {e}");
                return error(FfaError::NoMemory);
            }
        };
        buffers.rx_full = true;
        if let Some(share) = state.shares.get_mut(&request.handle) {
            share.retrieved = true;
        }
        Frame::new(FuncId::MemRetrieveResp)
            .with(1, length)
            .with(2, length)
    }
}

/// Makes calls to a [`FakeSpmc`] as one endpoint.
pub struct FakeConduit<'a> {
    spmc: &'a FakeSpmc,
    id: u16,
}

impl Conduit for FakeConduit<'_> {
    fn call(&self, frame: Frame) -> Frame {
        self.spmc.calls.fetch_add(1, Ordering::SeqCst);
        self.spmc.handle(self.id, frame)
    }
}

fn error(error: FfaError) -> Frame {
    Frame::new(FuncId::Error).with(2, error_code(error))
}

/// Returns the frame as the receiver sees it, with the payload truncated to the call width.
fn masked(frame: &Frame, width: CallWidth) -> Frame {
    let mut frame = *frame;
    for index in 3..8 {
        frame.set(index, width.mask(frame.arg(index)));
    }
    frame
}

fn ranges_overlap(a: u64, a_size: u64, b: u64, b_size: u64) -> bool {
    a < b + b_size && b < a + a_size
}


fn rxtx_map(state: &mut State, caller: u16, frame: &Frame) -> Frame {
    let (tx, rx, pages) = (frame.arg(1), frame.arg(2), frame.arg(3) as u32);
    let page_mask = PAGE_SIZE as u64 - 1;
    if pages == 0 || tx == 0 || rx == 0 || tx & page_mask != 0 || rx & page_mask != 0 {
        return error(FfaError::InvalidParameters);
    }
    if state.buffers.contains_key(&caller) {
        return error(FfaError::Denied);
    }
    let buffers = RxTx {
        tx,
        rx,
        pages,
        rx_full: false,
    };
    let size = buffers.size();
    let in_use = state
        .buffers
        .values()
        .any(|other| other.overlaps(tx, size) || other.overlaps(rx, size));
    if ranges_overlap(tx, size, rx, size) || in_use {
        return error(FfaError::InvalidParameters);
    }
    state.buffers.insert(caller, buffers);
    Frame::new(FuncId::Success32)
}

fn rxtx_unmap(state: &mut State, caller: u16, frame: &Frame) -> Frame {
    let id = (frame.arg(1) >> 16) as u16;
    if id != caller || state.buffers.remove(&caller).is_none() {
        return error(FfaError::InvalidParameters);
    }
    Frame::new(FuncId::Success32)
}

fn rx_release(state: &mut State, caller: u16) -> Frame {
    match state.buffers.get_mut(&caller) {
        Some(buffers) if buffers.rx_full => {
            buffers.rx_full = false;
            Frame::new(FuncId::Success32)
        }
        _ => error(FfaError::Denied),
    }
}

/// Decodes a descriptor of `frame.arg(1)` bytes from the caller's TX buffer.
fn read_tx<T>(
    state: &State,
    caller: u16,
    frame: &Frame,
    decode: impl FnOnce(&[u8]) -> Result<T, DescriptorError>,
) -> Result<T, FfaError> {
    let (total, fragment) = (frame.arg(1), frame.arg(2));
    let buffers = state.buffers.get(&caller).ok_or(FfaError::Denied)?;
    if total != fragment || total > buffers.size() {
        return Err(FfaError::InvalidParameters);
    }
    // SAFETY: The caller is blocked in this call, so isn't writing its TX buffer.
    let tx = unsafe { buffers.tx() };
    decode(&tx[..total as usize]).map_err(|_| FfaError::InvalidParameters)
}

fn mem_relinquish(state: &mut State, caller: u16) -> Frame {
    let Some(buffers) = state.buffers.get(&caller) else {
        return error(FfaError::Denied);
    };
    // SAFETY: The caller is blocked in this call, so isn't writing its TX buffer.
    let relinquish = match Relinquish::decode(unsafe { buffers.tx() }) {
        Ok(relinquish) => relinquish,
        Err(_) => return error(FfaError::InvalidParameters),
    };
    if !relinquish.endpoints.contains(&caller) {
        return error(FfaError::InvalidParameters);
    }
    match state.shares.get_mut(&relinquish.handle) {
        None => error(FfaError::InvalidParameters),
        Some(share) if share.transaction.receiver != caller || !share.retrieved => {
            error(FfaError::Denied)
        }
        Some(share) => {
            share.retrieved = false;
            Frame::new(FuncId::Success32)
        }
    }
}

fn mem_reclaim(state: &mut State, caller: u16, frame: &Frame) -> Frame {
    let handle = (frame.arg(1) & 0xffff_ffff) | (frame.arg(2) & 0xffff_ffff) << 32;
    match state.shares.get(&handle) {
        Some(share) if share.transaction.sender != caller => error(FfaError::InvalidParameters),
        Some(share) if share.retrieved => error(FfaError::Denied),
        Some(_) => {
            state.shares.remove(&handle);
            Frame::new(FuncId::Success32)
        }
        None => error(FfaError::InvalidParameters),
    }
}

/// What the other endpoints saw while a system ran.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SystemReport {
    /// Watchdog operations made by SP1, which owns the watchdog.
    pub sp1_watchdog: WatchdogCounts,
}

/// Shuts the fake down when dropped, so that endpoint threads exit even if the dispatcher panics.
struct ShutdownOnDrop<'a>(&'a FakeSpmc);

impl Drop for ShutdownOnDrop<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Runs every endpoint of the test platform against a fake partition manager, and calls `f` with
/// the harness of VM1 on the current thread.
///
/// Every other endpoint serves requests on its own threads, one per execution context, until `f`
/// returns.
pub fn with_system<R>(options: FakeOptions, f: impl FnOnce(&Harness) -> R) -> (R, SystemReport) {
    let spmc = FakeSpmc::with_options(options);
    let database = TestDatabase::new(&PlatformImpl::CONFIG);
    thread::scope(|scope| {
        let servers = PlatformImpl::ENDPOINTS
            .iter()
            .filter(|endpoint| endpoint.logical_id != LogicalId::Vm1)
            .map(|endpoint| {
                let (spmc, database) = (&spmc, &database);
                let server = thread::Builder::new()
                    .name(endpoint.name.into())
                    .spawn_scoped(scope, move || serve_endpoint(spmc, database, endpoint))
                    .unwrap();
                (endpoint.logical_id, server)
            })
            .collect::<Vec<_>>();

        let result = {
            let _shutdown = ShutdownOnDrop(&spmc);
            let conduit = spmc.conduit(spmc.endpoints.id(LogicalId::Vm1));
            let harness = Harness::new(
                &PlatformImpl::CONFIG,
                PlatformImpl::ENDPOINTS,
                &database,
                &conduit,
            )
            .unwrap();
            f(&harness)
        };

        let mut report = SystemReport::default();
        for (logical_id, server) in servers {
            let watchdog = server.join().unwrap();
            if logical_id == LogicalId::Sp1 {
                report.sp1_watchdog = watchdog;
            }
        }
        (result, report)
    })
}

/// Boots one endpoint and serves requests on all its execution contexts until the fake shuts down.
fn serve_endpoint(
    spmc: &FakeSpmc,
    database: &TestDatabase,
    endpoint: &'static EndpointInfo,
) -> WatchdogCounts {
    let conduit = spmc.conduit(endpoint.id);
    let harness = Harness::new(
        &PlatformImpl::CONFIG,
        PlatformImpl::ENDPOINTS,
        database,
        &conduit,
    )
    .unwrap();
    let secondary_count = if endpoint.logical_id.is_secure() {
        usize::from(endpoint.ec_count).min(PlatformImpl::CORE_COUNT)
    } else {
        1
    };
    thread::scope(|scope| {
        for core_index in 1..secondary_count {
            let harness = &harness;
            scope.spawn(move || {
                TestPlatform::set_current_core(core_index);
                if let Err(e) = harness.serve_secondary() {
                    debug!("{} vCPU {core_index} stopped: {e}", endpoint.name);
                }
            });
        }
        if let Err(e) = harness.serve() {
            debug!("{} stopped: {e}", endpoint.name);
        }
    });
    TestPlatform::watchdog_counts()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ffa::{Ffa, handle_from_frame},
        memory::{Constituent, DATA_ACCESS_RW, Mailbox, NORMAL_WRITE_BACK_INNER_SHAREABLE, Page},
    };

    fn is_error(frame: Frame, code: FfaError) -> bool {
        frame.is_error_code(code)
    }

    #[test]
    fn version_and_ids() {
        let spmc = FakeSpmc::new();
        let conduit = spmc.conduit(0x8003);
        let ffa = Ffa::new(&conduit);
        assert_eq!(ffa.version(0x0001_0000).fid(), 0x0001_0001);
        assert_eq!(ffa.version(0x0002_0000).fid(), 0x0001_0001);
        assert_eq!(ffa.version(0x8001_0001).fid(), VERSION_NOT_SUPPORTED);
        assert_eq!(ffa.id_get().arg(2), 0x8003);
        assert_eq!(ffa.spm_id_get().arg(2), 0x8000);
        assert_eq!(spmc.call_count(), 5);
    }

    #[test]
    fn version_locked_from_v1_2() {
        let spmc = FakeSpmc::with_options(FakeOptions {
            version: Version(1, 2),
            ..FakeOptions::default()
        });
        let vm1 = spmc.conduit(1);
        let vm1 = Ffa::new(&vm1);
        assert_eq!(vm1.version(0x0001_0002).fid(), 0x0001_0002);
        assert_eq!(vm1.version(0x0001_0001).fid(), VERSION_NOT_SUPPORTED);
        assert_eq!(vm1.version(0x0001_0002).fid(), 0x0001_0002);
        // Each endpoint negotiates for itself.
        let vm2 = spmc.conduit(2);
        assert_eq!(Ffa::new(&vm2).version(0x0001_0001).fid(), 0x0001_0002);
    }

    #[test]
    fn features_follow_properties() {
        let spmc = FakeSpmc::new();
        let vm3 = spmc.conduit(3);
        let sp1 = spmc.conduit(0x8001);
        let (vm3, sp1) = (Ffa::new(&vm3), Ffa::new(&sp1));
        assert!(vm3.is_feature_supported(MSG_SEND_32));
        assert!(!vm3.is_feature_supported(FuncId::MsgSendDirectReq32.into()));
        assert!(!sp1.is_feature_supported(MSG_SEND_32));
        assert!(!sp1.is_feature_supported(FuncId::Yield.into()));
        assert!(sp1.is_feature_supported(FuncId::MsgSendDirectResp64.into()));
        assert!(!sp1.is_feature_supported(FuncId::MemLend64.into()));
        assert!(!sp1.is_feature_supported(0x8fff_ffff));

        let spmc = FakeSpmc::with_options(FakeOptions {
            indirect_messaging: false,
            ..FakeOptions::default()
        });
        let vm3 = spmc.conduit(3);
        assert!(!Ffa::new(&vm3).is_feature_supported(MSG_SEND_32));
    }

    #[test]
    fn rxtx_buffers_are_exclusive() {
        let spmc = FakeSpmc::new();
        let (vm1, vm2) = (spmc.conduit(1), spmc.conduit(2));
        let (vm1, vm2) = (Ffa::new(&vm1), Ffa::new(&vm2));
        let mailbox = Mailbox::new();
        let (tx, rx) = (mailbox.tx_address(), mailbox.rx_address());

        assert!(is_error(vm1.rxtx_unmap(1), FfaError::InvalidParameters));
        assert!(is_error(vm1.rxtx_map(tx + 0x100, rx, 1), FfaError::InvalidParameters));
        assert!(is_error(vm1.rxtx_map(tx, rx, 0), FfaError::InvalidParameters));
        assert!(is_error(vm1.rxtx_map(tx, tx, 1), FfaError::InvalidParameters));
        assert!(mailbox.map(&vm1).is_success());
        assert!(is_error(mailbox.map(&vm1), FfaError::Denied));
        assert!(is_error(vm2.rxtx_map(tx, rx, 1), FfaError::InvalidParameters));
        assert!(is_error(vm1.rx_release(1), FfaError::Denied));

        let other = Mailbox::new();
        assert!(other.map(&vm2).is_success());
        assert!(vm1.rxtx_unmap(1).is_success());
        assert!(vm2.rxtx_unmap(2).is_success());
        assert!(is_error(vm1.rxtx_unmap(1), FfaError::InvalidParameters));
    }

    #[test]
    fn partition_info() {
        let spmc = FakeSpmc::new();
        let conduit = spmc.conduit(1);
        let ffa = Ffa::new(&conduit);
        let sp2_uuid = Uuid::from_u128(0xd158_2309_f023_47b9_827c_4464_f557_8fc8);

        let all = ffa.call(Frame::new(FuncId::PartitionInfoGet).with(5, 1));
        assert_eq!(all.arg(2), 3);
        // Without the count-only flag the descriptors need an RX buffer.
        assert!(is_error(ffa.partition_info_get(&Uuid::nil()), FfaError::Denied));

        let mailbox = Mailbox::new();
        assert!(mailbox.map(&ffa).is_success());
        let one = ffa.partition_info_get(&sp2_uuid);
        assert_eq!(one.arg(2), 1);
        assert_eq!(&mailbox.rx()[..2], &0x8002u16.to_le_bytes());
        assert!(is_error(ffa.partition_info_get(&sp2_uuid), FfaError::Busy));
        assert!(ffa.rx_release(1).is_success());
        assert!(is_error(
            ffa.partition_info_get(&Uuid::from_u128(7)),
            FfaError::InvalidParameters
        ));
    }

    #[test]
    fn invalid_direct_requests() {
        let spmc = FakeSpmc::new();
        let conduit = spmc.conduit(1);
        let ffa = Ffa::new(&conduit);
        for (endpoints, w2) in [
            (EndpointPair::new(2, 0x8001), 0),
            (EndpointPair::new(1, 1), 0),
            (EndpointPair::new(1, 0x8004), 0),
            (EndpointPair::new(1, 0x8001), 0xffff),
        ] {
            let frame = Frame::new(FuncId::MsgSendDirectReq32)
                .with(1, endpoints.to_word())
                .with(2, w2);
            assert!(is_error(ffa.call(frame), FfaError::InvalidParameters));
        }
        assert!(is_error(
            ffa.direct_response(CallWidth::W32, EndpointPair::new(1, 0x8001), [0; 5]),
            FfaError::Denied
        ));
    }

    #[test]
    fn serving_context() {
        let spmc = FakeSpmc::new();
        thread::scope(|scope| {
            let server = scope.spawn(|| {
                let conduit = spmc.conduit(2);
                let ffa = Ffa::new(&conduit);
                let request = ffa.msg_wait();
                assert!(request.is(FuncId::MsgSendDirectReq32));
                assert_eq!(request.payload(), [0x5566_7788, 1, 2, 3, 4]);
                assert!(is_error(ffa.msg_wait(), FfaError::Denied));
                assert!(is_error(ffa.yield_(), FfaError::Denied));
                assert!(is_error(ffa.msg_poll(), FfaError::Denied));
                // The response must go back to the requester.
                assert!(is_error(
                    ffa.direct_response(CallWidth::W32, EndpointPair::new(2, 3), [0; 5]),
                    FfaError::InvalidParameters
                ));
                ffa.direct_response(CallWidth::W32, EndpointPair::new(2, 1), [9, 0, 0, 0, 0])
            });

            let conduit = spmc.conduit(1);
            let ffa = Ffa::new(&conduit);
            let response = ffa.direct_request(
                CallWidth::W32,
                EndpointPair::new(1, 2),
                [0x1122_3344_5566_7788, 1, 2, 3, 4],
            );
            assert!(response.is(FuncId::MsgSendDirectResp32));
            assert_eq!(response.arg(1), 0x0002_0001);
            assert_eq!(response.arg(3), 9);

            spmc.shutdown();
            assert!(is_error(server.join().unwrap(), FfaError::Aborted));
        });
    }

    #[test]
    fn preempted_request_needs_run() {
        let spmc = FakeSpmc::with_options(FakeOptions {
            preempt_direct_requests: true,
            ..FakeOptions::default()
        });
        thread::scope(|scope| {
            scope.spawn(|| {
                let conduit = spmc.conduit(3);
                let ffa = Ffa::new(&conduit);
                ffa.msg_wait();
                ffa.direct_response(CallWidth::W64, EndpointPair::new(3, 1), [7; 5])
            });

            let conduit = spmc.conduit(1);
            let ffa = Ffa::new(&conduit);
            let yielded = ffa.direct_request(CallWidth::W64, EndpointPair::new(1, 3), [0; 5]);
            assert!(yielded.is(FuncId::Yield));
            assert_eq!(yielded.arg(1), 0x0003_0000);
            let response = ffa.run(3, 0);
            assert!(response.is(FuncId::MsgSendDirectResp64));
            assert_eq!(response.payload(), [7; 5]);
            assert!(is_error(ffa.run(3, 0), FfaError::Denied));
            spmc.shutdown();
        });
    }

    #[test]
    fn share_retrieve_relinquish_reclaim() {
        let spmc = FakeSpmc::new();
        let (owner, borrower) = (spmc.conduit(1), spmc.conduit(0x8002));
        let (owner, borrower) = (Ffa::new(&owner), Ffa::new(&borrower));
        let mut owner_mailbox = Mailbox::new();
        let mut borrower_mailbox = Mailbox::new();
        let page = Page::new();
        assert!(owner_mailbox.map(&owner).is_success());
        assert!(borrower_mailbox.map(&borrower).is_success());

        let mut share = MemoryTransaction {
            sender: 1,
            receiver: 0x8002,
            attributes: NORMAL_WRITE_BACK_INNER_SHAREABLE,
            permissions: DATA_ACCESS_RW,
            ..Default::default()
        };
        share.constituents.push(Constituent::new(page.address(), 1));
        let length = owner_mailbox.write_transaction(FAKE_VERSION, &share).unwrap();
        let shared = owner.mem_share(CallWidth::W64, length, length);
        assert!(shared.is(FuncId::Success32));
        let handle = handle_from_frame(&shared);
        assert_eq!(handle, FIRST_HANDLE);

        let mut request = MemoryTransaction {
            handle,
            ..share.clone()
        };
        request.constituents.clear();
        let length = borrower_mailbox.write_transaction(FAKE_VERSION, &request).unwrap();
        let retrieved = borrower.mem_retrieve_req(CallWidth::W64, length, length);
        assert!(retrieved.is(FuncId::MemRetrieveResp));
        let response = borrower_mailbox.read_transaction(FAKE_VERSION).unwrap();
        assert_eq!(response.handle, handle);
        assert_eq!(response.flags, FLAGS_TRANSACTION_SHARE);
        assert_eq!(response.attributes & MEMORY_SECURITY_NS, MEMORY_SECURITY_NS);
        assert_eq!(response.permissions, DATA_ACCESS_RW | INSTRUCTION_ACCESS_NX);
        assert_eq!(response.constituents[0].address, page.address());

        // Still retrieved.
        assert!(is_error(owner.mem_reclaim(handle, 0), FfaError::Denied));

        let mut relinquish = Relinquish {
            handle,
            flags: 0,
            endpoints: Default::default(),
        };
        relinquish.endpoints.push(0x8002);
        relinquish.encode(borrower_mailbox.tx_mut()).unwrap();
        assert!(borrower.mem_relinquish().is_success());
        assert!(borrower.rx_release(0x8002).is_success());

        assert!(is_error(borrower.mem_reclaim(handle, 0), FfaError::InvalidParameters));
        assert!(owner.mem_reclaim(handle, 0).is_success());
        assert!(is_error(owner.mem_reclaim(handle, 0), FfaError::InvalidParameters));
    }
}
