// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Page buffers and FF-A memory management descriptors.
//!
//! Memory transaction descriptors are written to the TX buffer before FFA_MEM_SHARE, FFA_MEM_LEND,
//! FFA_MEM_DONATE and FFA_MEM_RETRIEVE_REQ, and read from the RX buffer after
//! FFA_MEM_RETRIEVE_RESP. Only a single receiver is supported, which is all the tests need.

use crate::{
    ffa::{CallWidth, Ffa},
    frame::Frame,
};
use alloc::boxed::Box;
use arm_ffa::Version;
use arrayvec::ArrayVec;
use core::cell::UnsafeCell;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const PAGE_SIZE: usize = 0x1000;

/// The most constituents a transaction may have.
pub const MAX_CONSTITUENTS: usize = 4;

/// The most endpoints a relinquish descriptor may name.
pub const MAX_RELINQUISH_ENDPOINTS: usize = 4;

/// Data access permission: read-only.
pub const DATA_ACCESS_RO: u8 = 0b01;
/// Data access permission: read-write.
pub const DATA_ACCESS_RW: u8 = 0b10;
/// Instruction access permission: not executable.
pub const INSTRUCTION_ACCESS_NX: u8 = 0b01 << 2;

/// Memory attributes for normal, write-back cacheable, inner shareable memory.
pub const NORMAL_WRITE_BACK_INNER_SHAREABLE: u16 = 0b10 << 4 | 0b11 << 2 | 0b11;
/// Memory attribute bit marking memory as non-secure, from FF-A v1.1.
pub const MEMORY_SECURITY_NS: u16 = 1 << 6;

/// Transaction type in bits [4:3] of the flags of a retrieve response: share.
pub const FLAGS_TRANSACTION_SHARE: u32 = 0b01 << 3;
/// Transaction type in bits [4:3] of the flags of a retrieve response: lend.
pub const FLAGS_TRANSACTION_LEND: u32 = 0b10 << 3;
/// Transaction type in bits [4:3] of the flags of a retrieve response: donate.
pub const FLAGS_TRANSACTION_DONATE: u32 = 0b11 << 3;
/// Mask for the transaction type.
pub const FLAGS_TRANSACTION_MASK: u32 = 0b11 << 3;

/// A memory descriptor could not be encoded or decoded.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum DescriptorError {
    #[error("Descriptor doesn't fit in the buffer")]
    BufferTooSmall,
    #[error("Descriptor offset {0:#x} is invalid")]
    InvalidOffset(u32),
    #[error("Descriptor has {0} receivers, only 1 is supported")]
    ReceiverCount(u32),
    #[error("Too many constituents: {0}")]
    TooManyConstituents(u32),
    #[error("FF-A version {0:?} has no memory descriptor layout")]
    UnsupportedVersion(Version),
}

/// The memory transaction descriptor header of FF-A v1.0.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
struct TransactionHeaderV1_0 {
    sender_id: u16,
    attributes: u8,
    reserved_0: u8,
    flags: u32,
    handle: u64,
    tag: u64,
    reserved_1: u32,
    endpoint_count: u32,
}

/// The memory transaction descriptor header of FF-A v1.1 and later.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
struct TransactionHeaderV1_1 {
    sender_id: u16,
    attributes: u16,
    flags: u32,
    handle: u64,
    tag: u64,
    endpoint_mem_access_size: u32,
    endpoint_count: u32,
    endpoint_mem_access_offset: u32,
    reserved: [u8; 12],
}

#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
struct EndpointMemoryAccess {
    endpoint_id: u16,
    permissions: u8,
    flags: u8,
    composite_offset: u32,
    reserved: u64,
}

#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
struct CompositeRegion {
    page_count: u32,
    constituent_count: u32,
    reserved: u64,
}

/// A contiguous range of pages in a memory region.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct Constituent {
    pub address: u64,
    pub page_count: u32,
    reserved: u32,
}

impl Constituent {
    pub fn new(address: u64, page_count: u32) -> Self {
        Self {
            address,
            page_count,
            reserved: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
struct RelinquishHeader {
    handle: u64,
    flags: u32,
    endpoint_count: u32,
}

/// Reads a `T` at the given offset of `buffer`.
fn read_at<T: FromBytes>(buffer: &[u8], offset: usize) -> Result<T, DescriptorError> {
    let bytes = buffer
        .get(offset..offset + size_of::<T>())
        .ok_or(DescriptorError::BufferTooSmall)?;
    T::read_from_bytes(bytes).map_err(|_| DescriptorError::BufferTooSmall)
}

/// Writes `value` at the given offset of `buffer`.
fn write_at<T: IntoBytes + Immutable>(
    buffer: &mut [u8],
    offset: usize,
    value: &T,
) -> Result<(), DescriptorError> {
    let bytes = buffer
        .get_mut(offset..offset + size_of::<T>())
        .ok_or(DescriptorError::BufferTooSmall)?;
    value
        .write_to(bytes)
        .map_err(|_| DescriptorError::BufferTooSmall)
}

/// A memory transaction with a single receiver, as sent by the owner, in a retrieve request, or in
/// a retrieve response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryTransaction {
    pub sender: u16,
    pub receiver: u16,
    /// Memory region attributes. Only the low 8 bits exist before FF-A v1.1.
    pub attributes: u16,
    pub flags: u32,
    /// The handle, which is 0 when the transaction is first sent.
    pub handle: u64,
    pub tag: u64,
    /// The receiver's data and instruction access permissions.
    pub permissions: u8,
    /// The pages of the region. A retrieve request may leave this empty.
    pub constituents: ArrayVec<Constituent, MAX_CONSTITUENTS>,
}

impl MemoryTransaction {
    /// Returns the total number of pages in the region.
    pub fn page_count(&self) -> u32 {
        self.constituents
            .iter()
            .map(|constituent| constituent.page_count)
            .sum()
    }

    /// Writes the transaction to `buffer` in the descriptor layout of the given FF-A version,
    /// returning the length of the descriptor.
    pub fn encode(&self, version: Version, buffer: &mut [u8]) -> Result<usize, DescriptorError> {
        let access_offset = match version {
            Version(1, 0) => {
                write_at(
                    buffer,
                    0,
                    &TransactionHeaderV1_0 {
                        sender_id: self.sender,
                        attributes: self.attributes as u8,
                        flags: self.flags,
                        handle: self.handle,
                        tag: self.tag,
                        endpoint_count: 1,
                        ..Default::default()
                    },
                )?;
                size_of::<TransactionHeaderV1_0>()
            }
            Version(1, _) => {
                let access_offset = size_of::<TransactionHeaderV1_1>();
                write_at(
                    buffer,
                    0,
                    &TransactionHeaderV1_1 {
                        sender_id: self.sender,
                        attributes: self.attributes,
                        flags: self.flags,
                        handle: self.handle,
                        tag: self.tag,
                        endpoint_mem_access_size: size_of::<EndpointMemoryAccess>() as u32,
                        endpoint_count: 1,
                        endpoint_mem_access_offset: access_offset as u32,
                        reserved: [0; 12],
                    },
                )?;
                access_offset
            }
            _ => return Err(DescriptorError::UnsupportedVersion(version)),
        };

        let composite_offset = access_offset + size_of::<EndpointMemoryAccess>();
        write_at(
            buffer,
            access_offset,
            &EndpointMemoryAccess {
                endpoint_id: self.receiver,
                permissions: self.permissions,
                flags: 0,
                composite_offset: if self.constituents.is_empty() {
                    0
                } else {
                    composite_offset as u32
                },
                reserved: 0,
            },
        )?;
        if self.constituents.is_empty() {
            return Ok(composite_offset);
        }

        write_at(
            buffer,
            composite_offset,
            &CompositeRegion {
                page_count: self.page_count(),
                constituent_count: self.constituents.len() as u32,
                reserved: 0,
            },
        )?;
        let mut offset = composite_offset + size_of::<CompositeRegion>();
        for constituent in &self.constituents {
            write_at(buffer, offset, constituent)?;
            offset += size_of::<Constituent>();
        }
        Ok(offset)
    }

    /// Reads a transaction in the descriptor layout of the given FF-A version from `buffer`.
    pub fn decode(version: Version, buffer: &[u8]) -> Result<Self, DescriptorError> {
        let (mut transaction, endpoint_count, access_offset) = match version {
            Version(1, 0) => {
                let header = read_at::<TransactionHeaderV1_0>(buffer, 0)?;
                (
                    Self {
                        sender: header.sender_id,
                        attributes: header.attributes.into(),
                        flags: header.flags,
                        handle: header.handle,
                        tag: header.tag,
                        ..Default::default()
                    },
                    header.endpoint_count,
                    size_of::<TransactionHeaderV1_0>() as u32,
                )
            }
            Version(1, _) => {
                let header = read_at::<TransactionHeaderV1_1>(buffer, 0)?;
                (
                    Self {
                        sender: header.sender_id,
                        attributes: header.attributes,
                        flags: header.flags,
                        handle: header.handle,
                        tag: header.tag,
                        ..Default::default()
                    },
                    header.endpoint_count,
                    header.endpoint_mem_access_offset,
                )
            }
            _ => return Err(DescriptorError::UnsupportedVersion(version)),
        };
        if endpoint_count != 1 {
            return Err(DescriptorError::ReceiverCount(endpoint_count));
        }

        let access = read_at::<EndpointMemoryAccess>(buffer, access_offset as usize)?;
        transaction.receiver = access.endpoint_id;
        transaction.permissions = access.permissions;
        if access.composite_offset == 0 {
            return Ok(transaction);
        }
        if (access.composite_offset as usize) < access_offset as usize + size_of::<EndpointMemoryAccess>()
        {
            return Err(DescriptorError::InvalidOffset(access.composite_offset));
        }

        let composite = read_at::<CompositeRegion>(buffer, access.composite_offset as usize)?;
        if composite.constituent_count as usize > MAX_CONSTITUENTS {
            return Err(DescriptorError::TooManyConstituents(
                composite.constituent_count,
            ));
        }
        let mut offset = access.composite_offset as usize + size_of::<CompositeRegion>();
        for _ in 0..composite.constituent_count {
            transaction
                .constituents
                .push(read_at::<Constituent>(buffer, offset)?);
            offset += size_of::<Constituent>();
        }
        Ok(transaction)
    }
}

/// The descriptor for FFA_MEM_RELINQUISH.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Relinquish {
    pub handle: u64,
    pub flags: u32,
    pub endpoints: ArrayVec<u16, MAX_RELINQUISH_ENDPOINTS>,
}

impl Relinquish {
    /// Writes the descriptor to `buffer`, returning its length.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, DescriptorError> {
        write_at(
            buffer,
            0,
            &RelinquishHeader {
                handle: self.handle,
                flags: self.flags,
                endpoint_count: self.endpoints.len() as u32,
            },
        )?;
        let mut offset = size_of::<RelinquishHeader>();
        for endpoint in &self.endpoints {
            write_at(buffer, offset, endpoint)?;
            offset += size_of::<u16>();
        }
        Ok(offset)
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, DescriptorError> {
        let header = read_at::<RelinquishHeader>(buffer, 0)?;
        if header.endpoint_count as usize > MAX_RELINQUISH_ENDPOINTS {
            return Err(DescriptorError::ReceiverCount(header.endpoint_count));
        }
        let mut relinquish = Self {
            handle: header.handle,
            flags: header.flags,
            endpoints: ArrayVec::new(),
        };
        let mut offset = size_of::<RelinquishHeader>();
        for _ in 0..header.endpoint_count {
            relinquish.endpoints.push(read_at::<u16>(buffer, offset)?);
            offset += size_of::<u16>();
        }
        Ok(relinquish)
    }
}

/// A single page of memory which may also be accessed by the partition manager or another
/// endpoint.
#[repr(C, align(4096))]
pub struct Page(UnsafeCell<[u8; PAGE_SIZE]>);

impl Page {
    /// Allocates a zeroed page on the heap.
    pub fn new() -> Box<Self> {
        Box::new(Self(UnsafeCell::new([0; PAGE_SIZE])))
    }

    /// Returns the address of the page, as passed to the partition manager.
    ///
    /// Addresses are identity mapped, so this is also the IPA.
    pub fn address(&self) -> u64 {
        self.0.get() as u64
    }

    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        // SAFETY: The page is only written by others while we are blocked in an FF-A call, during
        // which no references to it are used.
        unsafe { &*self.0.get() }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.0.get_mut()
    }
}

/// Returns the page at `address`, which another endpoint has shared or lent to us.
///
/// # Safety
///
/// `address` must be the identity mapped address of a page we have retrieved and not yet
/// relinquished, and nothing else may access the page while the returned reference is live.
pub unsafe fn retrieved_page<'a>(address: u64) -> &'a mut [u8; PAGE_SIZE] {
    // SAFETY: Our caller promised that the page is mapped and ours alone for now.
    unsafe { &mut *(address as *mut [u8; PAGE_SIZE]) }
}

/// A pair of TX and RX buffers, one page each.
pub struct Mailbox {
    tx: Box<Page>,
    rx: Box<Page>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            tx: Page::new(),
            rx: Page::new(),
        }
    }

    pub fn tx_address(&self) -> u64 {
        self.tx.address()
    }

    pub fn rx_address(&self) -> u64 {
        self.rx.address()
    }

    pub fn tx_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.tx.bytes_mut()
    }

    pub fn rx(&self) -> &[u8; PAGE_SIZE] {
        self.rx.bytes()
    }

    /// Maps the buffers with FFA_RXTX_MAP_64.
    pub fn map(&self, ffa: &Ffa) -> Frame {
        ffa.rxtx_map(self.tx_address(), self.rx_address(), 1)
    }

    /// Writes a memory transaction to the TX buffer, returning its length.
    pub fn write_transaction(
        &mut self,
        version: Version,
        transaction: &MemoryTransaction,
    ) -> Result<u32, DescriptorError> {
        transaction
            .encode(version, self.tx_mut())
            .map(|length| length as u32)
    }

    /// Reads a memory transaction from the RX buffer.
    pub fn read_transaction(&self, version: Version) -> Result<MemoryTransaction, DescriptorError> {
        MemoryTransaction::decode(version, self.rx())
    }
}

/// Returns the FF-A width to use for memory management calls, preferring 64-bit if supported.
///
/// Returns `None` if neither width of the given pair of functions is supported.
pub fn supported_width(ffa: &Ffa, fid_64: u32, fid_32: u32) -> Option<CallWidth> {
    if ffa.is_feature_supported(fid_64) {
        Some(CallWidth::W64)
    } else if ffa.is_feature_supported(fid_32) {
        Some(CallWidth::W32)
    } else {
        None
    }
}
