// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The test run descriptor passed to every client and server body.
//!
//! On the wire it is a single register:
//!
//! | bits    | field              |
//! |---------|--------------------|
//! | [9:0]   | test number        |
//! | [14:11] | client logical ID  |
//! | [18:15] | server logical ID  |
//! | [22:19] | role               |

use crate::{database::TestId, endpoint::LogicalId};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

const TEST_NUM_MASK: u32 = 0x3ff;
/// The largest test number a run word can carry.
pub const MAX_TEST_ID: u16 = TEST_NUM_MASK as u16;
const FIELD_MASK: u32 = 0xf;
const CLIENT_SHIFT: u32 = 11;
const SERVER_SHIFT: u32 = 15;
const ROLE_SHIFT: u32 = 19;

/// Which side of a test an invocation runs.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum Role {
    Client = 0,
    Server = 1,
}

/// A test run word could not be decoded.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum RunDataError {
    #[error("Test run data has no test number")]
    NoTest,
    #[error("Invalid logical endpoint ID {0} in test run data")]
    Endpoint(u8),
    #[error("Invalid role {0} in test run data")]
    Role(u8),
}

/// Identifies one invocation of a test: which test, between which endpoints, in which role.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TestRunData {
    pub test: TestId,
    pub client: LogicalId,
    pub server: LogicalId,
    pub role: Role,
}

impl TestRunData {
    pub fn new(test: TestId, client: LogicalId, server: LogicalId) -> Self {
        Self {
            test,
            client,
            server,
            role: Role::Client,
        }
    }

    pub fn with_role(self, role: Role) -> Self {
        Self { role, ..self }
    }
}

impl From<TestRunData> for u32 {
    fn from(run: TestRunData) -> Self {
        (u32::from(run.test.0) & TEST_NUM_MASK)
            | (u32::from(u8::from(run.client)) & FIELD_MASK) << CLIENT_SHIFT
            | (u32::from(u8::from(run.server)) & FIELD_MASK) << SERVER_SHIFT
            | (u32::from(u8::from(run.role)) & FIELD_MASK) << ROLE_SHIFT
    }
}

impl TryFrom<u32> for TestRunData {
    type Error = RunDataError;

    fn try_from(word: u32) -> Result<Self, Self::Error> {
        let test = (word & TEST_NUM_MASK) as u16;
        if test == 0 {
            return Err(RunDataError::NoTest);
        }
        let endpoint = |shift: u32| {
            let value = ((word >> shift) & FIELD_MASK) as u8;
            LogicalId::try_from(value).map_err(|_| RunDataError::Endpoint(value))
        };
        let role = ((word >> ROLE_SHIFT) & FIELD_MASK) as u8;
        Ok(Self {
            test: TestId(test),
            client: endpoint(CLIENT_SHIFT)?,
            server: endpoint(SERVER_SHIFT)?,
            role: Role::try_from(role).map_err(|_| RunDataError::Role(role))?,
        })
    }
}
