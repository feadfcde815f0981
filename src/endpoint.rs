// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Static identities of the endpoints taking part in the suite.

use crate::config::ExceptionLevel;
use bitflags::bitflags;
use core::fmt::{self, Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use uuid::Uuid;

/// The logical identity of an endpoint, independent of the FF-A ID the system assigns it.
///
/// Secure partitions come before VMs, so any ID below [`LogicalId::Vm1`] is secure.
#[derive(
    Clone, Copy, Debug, Eq, IntoPrimitive, Ord, PartialEq, PartialOrd, TryFromPrimitive,
)]
#[repr(u8)]
pub enum LogicalId {
    /// No endpoint, used as the server of client-only tests.
    NoServer = 0,
    Sp1 = 1,
    Sp2 = 2,
    Sp3 = 3,
    Sp4 = 4,
    Vm1 = 5,
    Vm2 = 6,
    Vm3 = 7,
}

impl LogicalId {
    /// All real endpoints, in logical ID order.
    pub const ALL: [Self; 7] = [
        Self::Sp1,
        Self::Sp2,
        Self::Sp3,
        Self::Sp4,
        Self::Vm1,
        Self::Vm2,
        Self::Vm3,
    ];

    /// Returns whether the endpoint is a secure partition.
    pub fn is_secure(self) -> bool {
        self != Self::NoServer && self < Self::Vm1
    }
}

impl Display for LogicalId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            Self::NoServer => "NO_SERVER_EP",
            Self::Sp1 => "SP1",
            Self::Sp2 => "SP2",
            Self::Sp3 => "SP3",
            Self::Sp4 => "SP4",
            Self::Vm1 => "VM1",
            Self::Vm2 => "VM2",
            Self::Vm3 => "VM3",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Messaging capabilities an endpoint declares in its partition properties.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Properties: u32 {
        const DIRECT_REQUEST_RECV = 1 << 0;
        const DIRECT_REQUEST_SEND = 1 << 1;
        const INDIRECT_MESSAGE = 1 << 2;
    }
}

/// Everything the harness knows about one endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointInfo {
    pub name: &'static str,
    pub logical_id: LogicalId,
    /// The FF-A ID.
    pub id: u16,
    /// The exception level the endpoint runs at, if it is a secure partition.
    pub el: Option<ExceptionLevel>,
    /// The number of execution contexts.
    pub ec_count: u16,
    pub properties: Properties,
    pub uuid: Uuid,
}

/// Looks up endpoints of the configured topology.
#[derive(Clone, Copy, Debug)]
pub struct EndpointRegistry {
    endpoints: &'static [EndpointInfo],
}

impl EndpointRegistry {
    pub const fn new(endpoints: &'static [EndpointInfo]) -> Self {
        Self { endpoints }
    }

    pub fn get(&self, logical_id: LogicalId) -> Option<&'static EndpointInfo> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.logical_id == logical_id)
    }

    /// Returns the FF-A ID of the given endpoint, or 0 if it isn't deployed.
    pub fn id(&self, logical_id: LogicalId) -> u16 {
        self.get(logical_id).map_or(0, |endpoint| endpoint.id)
    }

    pub fn by_id(&self, id: u16) -> Option<&'static EndpointInfo> {
        self.endpoints.iter().find(|endpoint| endpoint.id == id)
    }

    /// Maps an FF-A ID back to its logical ID.
    pub fn logical_id(&self, id: u16) -> Option<LogicalId> {
        self.by_id(id).map(|endpoint| endpoint.logical_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static EndpointInfo> + use<> {
        self.endpoints.iter()
    }
}
