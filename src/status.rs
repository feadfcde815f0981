// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Test status codes, per-test state merging and the regression report.

use crate::logger::always;
use core::fmt::{self, Display, Formatter};

/// The numeric status a test body produces, and which is exchanged in w3 of direct responses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const ERROR: Self = Self(1);
    pub const TEST_INIT_FAILED: Self = Self(101);
    pub const STATUS_INVALID: Self = Self(102);
    pub const SKIP_CHECK: Self = Self(103);
    pub const SIM_ERROR: Self = Self(104);

    /// The status of the `n`th check of a test body failing.
    pub const fn error_point(n: u32) -> Self {
        Self(n)
    }

    /// Reads a status from a response register. Only the low 32 bits are meaningful.
    pub fn from_wire(value: u64) -> Self {
        Self(value as u32)
    }

    pub fn to_wire(self) -> u64 {
        self.0.into()
    }

    /// Converts the status back into the result of a test body.
    pub fn into_result(self) -> TestResult {
        match self {
            Self::SUCCESS => Ok(()),
            Self::SKIP_CHECK => Err(TestError::Skipped),
            code => Err(TestError::Failed(code)),
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a test body did not pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestError {
    /// A precondition or optional capability is absent. This is not a conformance failure.
    Skipped,
    /// A check failed, identified by its status code.
    Failed(StatusCode),
}

impl TestError {
    pub const fn error_point(n: u32) -> Self {
        Self::Failed(StatusCode::error_point(n))
    }
}

/// The result of running a test body.
pub type TestResult = Result<(), TestError>;

impl From<TestResult> for StatusCode {
    fn from(result: TestResult) -> Self {
        match result {
            Ok(()) => Self::SUCCESS,
            Err(TestError::Skipped) => Self::SKIP_CHECK,
            Err(TestError::Failed(code)) => code,
        }
    }
}

/// The outcome of one invocation of a test on one pair of endpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Pass,
    Skip,
    Fail(StatusCode),
}

impl From<StatusCode> for Outcome {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::SUCCESS => Self::Pass,
            StatusCode::SKIP_CHECK => Self::Skip,
            code => Self::Fail(code),
        }
    }
}

/// The state of a test as recorded by the dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum TestState {
    Start = 1,
    Pass = 2,
    Fail = 3,
    Skip = 4,
    Error = 5,
    End = 6,
    Rebooting = 7,
    PassWithSkip = 0x10,
}

/// The merged status of a test across all its invocations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TestStatus {
    pub state: TestState,
    pub code: StatusCode,
}

impl TestStatus {
    /// The status a test starts with, so that a test which never records anything fails.
    pub const INITIAL: Self = Self {
        state: TestState::Fail,
        code: StatusCode::STATUS_INVALID,
    };

    /// Records a new state.
    ///
    /// A mix of passing and skipped invocations is a pass with skips; otherwise the latest state
    /// wins. The code is always replaced.
    pub fn set(&mut self, state: TestState, code: StatusCode) {
        self.state = match (self.state, state) {
            (TestState::PassWithSkip, TestState::Pass | TestState::Skip)
            | (TestState::Pass, TestState::Skip)
            | (TestState::Skip, TestState::Pass) => TestState::PassWithSkip,
            (_, state) => state,
        };
        self.code = code;
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => self.set(TestState::Pass, StatusCode::SUCCESS),
            Outcome::Skip => self.set(TestState::Skip, StatusCode::SKIP_CHECK),
            Outcome::Fail(code) => self.set(TestState::Fail, code),
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self.state {
            TestState::Pass | TestState::PassWithSkip => Verdict::Passed,
            TestState::Skip => Verdict::Skipped(self.code),
            TestState::Error => Verdict::SimError(self.code),
            _ => Verdict::Failed(self.code),
        }
    }
}

/// What is reported for a test once it has finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Passed,
    Skipped(StatusCode),
    SimError(StatusCode),
    Failed(StatusCode),
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Skipped(code) => write!(f, "SKIPPED (SKIP CODE={code})"),
            Self::SimError(code) => write!(f, "SIM ERROR (ERROR CODE={code})"),
            Self::Failed(code) => write!(f, "FAILED (ERROR CODE={code})"),
        }
    }
}

/// Prints the result line for a finished test and returns its verdict.
pub fn report_status(name: &str, status: &TestStatus) -> Verdict {
    let verdict = status.verdict();
    always!("> TEST -{name} => {verdict}");
    verdict
}

/// Totals for the regression report.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Report {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub sim_errors: u32,
}

impl Report {
    pub fn add(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Passed => self.passed += 1,
            Verdict::Skipped(_) => self.skipped += 1,
            Verdict::SimError(_) => self.sim_errors += 1,
            Verdict::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped + self.sim_errors
    }

    pub fn print(&self) {
        always!("");
        always!("REGRESSION REPORT:");
        always!("==================");
        always!("   TOTAL TESTS     : {}", self.total());
        always!("   TOTAL PASSED    : {}", self.passed);
        always!("   TOTAL FAILED    : {}", self.failed);
        always!("   TOTAL SKIPPED   : {}", self.skipped);
        always!("   TOTAL SIM ERROR : {}", self.sim_errors);
        always!("");
        always!("******* END OF ACS *******");
    }
}
