// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The registry of conformance tests.
//!
//! Tests register themselves with [`acs_test!`]. At startup the registered tests which apply to
//! the configured FF-A version and suite filter are sorted and numbered densely from 1, so a test
//! ID can be carried in a test run word and looked up by index. ID 0 never names a test.

use crate::{
    config::AcsConfig,
    dispatch::{Runner, TestContext},
    frame::Frame,
    multicore::SecondaryFn,
    run_data::MAX_TEST_ID,
    status::TestResult,
};
use alloc::boxed::Box;
use arm_ffa::Version;
use core::fmt::{self, Display, Formatter};
use linkme::distributed_slice;

/// All registered tests, in no particular order.
#[distributed_slice]
pub static ACS_TESTS: [TestCase];

/// A group of related tests, run together.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Suite {
    SetupDiscovery,
    DirectMessaging,
    IndirectMessaging,
    MemoryManage,
}

impl Suite {
    /// Returns the line printed before the first test of the suite runs.
    pub fn banner(self) -> &'static str {
        match self {
            Self::SetupDiscovery => "Running 'setup_discovery' test suite..",
            Self::DirectMessaging => "Running 'direct_messaging' test suite..",
            Self::IndirectMessaging => "Running 'indirect_messaging' test suite..",
            Self::MemoryManage => "Running 'memory_management' test suite..",
        }
    }
}

/// The dense 1-based index of a test in the [`TestDatabase`].
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct TestId(pub u16);

impl Display for TestId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs the endpoint pairs of a test, from the dispatcher.
pub type EntryFn = fn(&mut Runner);

/// The client side of a test.
pub type ClientFn = fn(&TestContext) -> TestResult;

/// The server side of a test, given the direct request which started it.
pub type ServerFn = fn(&TestContext, &Frame) -> TestResult;

/// A single conformance test.
pub struct TestCase {
    pub name: &'static str,
    pub suite: Suite,
    /// The first FF-A version the test applies to.
    pub since: Version,
    pub entry: EntryFn,
    pub client: ClientFn,
    pub server: Option<ServerFn>,
    /// Runs on each secondary core of the client.
    pub secondary_client: Option<SecondaryFn>,
    /// Runs on the secondary execution contexts of the server.
    pub secondary_server: Option<ServerFn>,
}

impl TestCase {
    fn applies_to(&self, config: &AcsConfig) -> bool {
        config.suite.is_none_or(|suite| suite == self.suite)
            && config.version_at_least(self.since)
    }
}

/// Registers a test with the database.
///
/// The server and secondary core bodies and the minimum FF-A version are optional:
///
/// ```ignore
/// acs_test!(
///     ffa_direct_message_32,
///     suite = DirectMessaging,
///     entry = entry,
///     client = client,
///     server = server,
/// );
/// ```
macro_rules! acs_test {
    (
        $name:ident,
        suite = $suite:ident,
        $(since = ($major:literal, $minor:literal),)?
        entry = $entry:path,
        client = $client:path,
        $(server = $server:path,)?
        $(secondary_client = $secondary_client:path,)?
        $(secondary_server = $secondary_server:path,)?
    ) => {
        paste::paste! {
            #[linkme::distributed_slice($crate::database::ACS_TESTS)]
            static [<_ACS_TEST_ $name:upper>]: $crate::database::TestCase =
                $crate::database::TestCase {
                    name: ::core::stringify!($name),
                    suite: $crate::database::Suite::$suite,
                    since: $crate::database::acs_test!(@since $($major, $minor)?),
                    entry: $entry,
                    client: $client,
                    server: $crate::database::acs_test!(@option $($server)?),
                    secondary_client: $crate::database::acs_test!(@option $($secondary_client)?),
                    secondary_server: $crate::database::acs_test!(@option $($secondary_server)?),
                };
        }
    };
    (@since) => {
        arm_ffa::Version(1, 0)
    };
    (@since $major:literal, $minor:literal) => {
        arm_ffa::Version($major, $minor)
    };
    (@option) => {
        None
    };
    (@option $function:path) => {
        Some($function)
    };
}
pub(crate) use acs_test;

/// The tests selected for this run, indexed by [`TestId`].
pub struct TestDatabase {
    tests: Box<[&'static TestCase]>,
}

impl TestDatabase {
    /// Selects the registered tests which apply to the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if more tests apply than a test run word can number.
    pub fn new(config: &AcsConfig) -> Self {
        Self::select(ACS_TESTS.iter(), config)
    }

    fn select(tests: impl Iterator<Item = &'static TestCase>, config: &AcsConfig) -> Self {
        let mut tests = tests
            .filter(|test| test.applies_to(config))
            .collect::<Box<[_]>>();
        assert!(
            tests.len() <= usize::from(MAX_TEST_ID),
            "{} tests selected, but a test run word only has room for {MAX_TEST_ID}",
            tests.len()
        );
        tests.sort_by_key(|test| (test.suite, test.name));
        Self { tests }
    }

    /// Returns a database with no tests.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            tests: Box::new([]),
        }
    }

    /// Returns a database of exactly the given tests, in the given order.
    #[cfg(test)]
    pub fn from_tests(tests: &[&'static TestCase]) -> Self {
        Self {
            tests: tests.into(),
        }
    }

    /// Returns the test with the given ID, if there is one.
    pub fn lookup(&self, id: TestId) -> Option<&'static TestCase> {
        let index = usize::from(id.0).checked_sub(1)?;
        self.tests.get(index).copied()
    }

    /// Returns an iterator over all selected tests in the order they run, with their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (TestId, &'static TestCase)> + '_ {
        self.tests
            .iter()
            .enumerate()
            .map(|(index, &test)| (TestId(index as u16 + 1), test))
    }

    /// Returns the ID of the test with the given name.
    pub fn find(&self, name: &str) -> Option<TestId> {
        self.iter()
            .find(|(_, test)| test.name == name)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }
}
