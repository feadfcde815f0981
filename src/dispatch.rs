// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Test dispatch: running test bodies on the right endpoints and collecting their status.
//!
//! The dispatcher (VM1) walks the database and asks each test's client endpoint to run the client
//! body with a direct request carrying a test run word. Every other endpoint sits in
//! [`Harness::serve`], running whichever body the run word names and answering with its status.
//! A client brings its server in with [`TestContext::select_server_fn_direct`], and collects the
//! server's status with a final call to the same function.

use crate::{
    conduit::Conduit,
    config::AcsConfig,
    database::{TestCase, TestDatabase, TestId},
    endpoint::{EndpointInfo, EndpointRegistry, LogicalId},
    ffa::{CallError, CallWidth, Ffa, success},
    frame::{EndpointPair, Frame},
    logger::always,
    messaging::DirectMessaging,
    multicore::{SecondaryCores, SecondaryError},
    platform::{Platform, PlatformImpl},
    run_data::{Role, TestRunData},
    status::{Outcome, Report, StatusCode, TestError, TestResult, TestStatus, report_status},
};
use arm_ffa::{FuncId, Version};
use log::{debug, error, info};
use thiserror::Error;

/// The version of the suite itself, printed in the banner.
const ACS_MAJOR_VERSION: u32 = 0;
const ACS_MINOR_VERSION: u32 = 9;

/// Service code in w3 of a direct request asking SP1 to start the watchdog.
pub const WD_ENABLE: u32 = 0xffcc;
/// Service code in w3 of a direct request asking SP1 to stop the watchdog.
pub const WD_DISABLE: u32 = 0xffdd;

/// The engine could not be brought up on an endpoint.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum BootError {
    #[error("FF-A version negotiation failed: {0}")]
    Version(CallError),
    #[error("FFA_ID_GET failed: {0}")]
    IdGet(CallError),
    #[error("Endpoint ID {0:#x} is not in the endpoint table")]
    UnknownEndpoint(u16),
}

/// A wait loop stopped serving requests.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum DispatchError {
    #[error("Unexpected frame in wait loop: {0:?}")]
    UnexpectedFrame(Frame),
}

/// The per-endpoint state of the engine.
pub struct Harness<'a> {
    config: &'a AcsConfig,
    endpoints: EndpointRegistry,
    database: &'a TestDatabase,
    ffa: Ffa<'a>,
    own: &'static EndpointInfo,
    version: Version,
    messaging: DirectMessaging,
}

impl<'a> Harness<'a> {
    /// Negotiates the configured FF-A version and finds out which endpoint we are.
    pub fn new(
        config: &'a AcsConfig,
        endpoints: &'static [EndpointInfo],
        database: &'a TestDatabase,
        conduit: &'a dyn Conduit,
    ) -> Result<Self, BootError> {
        let ffa = Ffa::new(conduit);
        let version = ffa
            .negotiate_version(config.ffa_version)
            .map_err(BootError::Version)?;
        let id = success(ffa.id_get()).map_err(BootError::IdGet)?.arg(2) as u16;
        let endpoints = EndpointRegistry::new(endpoints);
        let own = endpoints.by_id(id).ok_or(BootError::UnknownEndpoint(id))?;
        debug!(
            "{} negotiated FF-A version {}.{}",
            own.name, version.0, version.1
        );
        Ok(Self {
            config,
            endpoints,
            database,
            ffa,
            own,
            version,
            messaging: DirectMessaging::new(),
        })
    }

    /// Returns the endpoint this harness runs as.
    pub fn own(&self) -> &'static EndpointInfo {
        self.own
    }

    /// Returns whether this endpoint drives the suite.
    pub fn is_dispatcher(&self) -> bool {
        self.own.logical_id == LogicalId::Vm1
    }

    /// Returns the configuration of the system-under-test.
    pub fn config(&self) -> &'a AcsConfig {
        self.config
    }

    /// Returns the endpoints deployed in the system-under-test.
    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    /// Returns the tests selected for this run.
    pub fn database(&self) -> &'a TestDatabase {
        self.database
    }

    /// Returns the FF-A interface of this endpoint.
    pub fn ffa(&self) -> &Ffa<'a> {
        &self.ffa
    }

    /// Returns the direct messaging engine of this endpoint.
    pub fn messaging(&self) -> &DirectMessaging {
        &self.messaging
    }

    /// Returns the FF-A version the system-under-test agreed to.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Sends a direct request and re-drives the receiver until the request completes.
    pub fn request(&self, width: CallWidth, endpoints: EndpointPair, payload: [u64; 5]) -> Frame {
        let mut frame = self
            .messaging
            .send_direct_request(&self.ffa, width, endpoints, payload);
        while frame.is(FuncId::Yield) || frame.is(FuncId::Interrupt) {
            debug!("Resuming {:#x} after {frame:?}", endpoints.receiver);
            frame = self.messaging.resume(&self.ffa, &frame);
        }
        frame
    }

    /// Registers the entry point of our secondary execution contexts with the SPMC.
    ///
    /// Only SP1 and SP2 at EL1 have secondary execution contexts which need it.
    ///
    /// # Safety
    ///
    /// `entry_point` must be the address of code which is safe for the SPMC to start a secondary
    /// execution context at.
    pub unsafe fn register_secondary_entry(&self, entry_point: u64) -> Result<(), CallError> {
        if matches!(self.own.logical_id, LogicalId::Sp1 | LogicalId::Sp2)
            && self.config.sp_el == Some(crate::config::ExceptionLevel::El1)
        {
            // SAFETY: Our caller promised that the entry point is safe to start at.
            success(unsafe { self.ffa.secondary_ep_register(entry_point) })?;
        }
        Ok(())
    }

    /// Runs one invocation of a test between the given client and server.
    ///
    /// The dispatcher checks the pair against the configuration and has the client run its body.
    /// On the client itself the client body runs directly. Any other endpoint takes no part in
    /// starting a test, so nothing happens and `None` is returned.
    pub fn execute_test(
        &self,
        test: TestId,
        client: LogicalId,
        server: LogicalId,
    ) -> Option<StatusCode> {
        let run = TestRunData::new(test, client, server);
        if self.is_dispatcher() {
            Some(self.dispatch(run))
        } else if self.own.logical_id == client {
            Some(self.run_client(run))
        } else {
            None
        }
    }

    fn dispatch(&self, run: TestRunData) -> StatusCode {
        if run.server == LogicalId::NoServer {
            info!("\tExecuting test from client={}", run.client);
        } else {
            info!(
                "\tExecuting test from client={}, server={}",
                run.client, run.server
            );
        }

        if let Err(reason) = self.validate_test_config(run.client, run.server) {
            info!("\t{reason}, skipping the check");
            return StatusCode::SKIP_CHECK;
        }

        if run.client == self.own.logical_id {
            self.run_client(run)
        } else if run.server == self.own.logical_id {
            error!("\tUnsupported: {} can't be server_ep", run.server);
            StatusCode::ERROR
        } else {
            let endpoints = EndpointPair::new(self.own.id, self.endpoints.id(run.client));
            let frame = self.request(
                CallWidth::W32,
                endpoints,
                [u32::from(run).into(), 0, 0, 0, 0],
            );
            if frame.is(FuncId::MsgSendDirectResp32) {
                StatusCode::from_wire(frame.arg(3))
            } else {
                error!("\tInvalid fid received, {frame:?}");
                StatusCode::ERROR
            }
        }
    }

    /// Checks whether the system-under-test can run a test between the given endpoints.
    ///
    /// Returns the reason to skip the invocation if not.
    pub fn validate_test_config(
        &self,
        client: LogicalId,
        server: LogicalId,
    ) -> Result<(), &'static str> {
        use crate::config::ExceptionLevel::{El0, El1, El2};

        let config = self.config;
        let involves = |ids: &[LogicalId]| ids.contains(&client) || ids.contains(&server);
        let has_server = server != LogicalId::NoServer;

        if !config.ns_hypervisor_present && involves(&[LogicalId::Vm2, LogicalId::Vm3]) {
            return Err("No support for ns-hyp");
        }
        if !config.has_secure_partitions()
            && involves(&[LogicalId::Sp1, LogicalId::Sp2, LogicalId::Sp3])
        {
            return Err("No support for FFA S-ENDPOINT");
        }
        if involves(&[LogicalId::Sp2, LogicalId::Sp3]) {
            match (config.spmc_el, config.sp_el) {
                (El1, Some(El1)) => return Err("Both SP & SPMC at EL1 config isn't supported"),
                (El2, Some(El0)) => return Err("SP isn't support VHE config"),
                _ => {}
            }
        }
        if !config.sp_send_direct_req && client.is_secure() && has_server {
            return Err("SP doesn't support DIRECT_REQ");
        }
        if !config.vm_send_direct_resp && has_server && !server.is_secure() {
            return Err("NS-ENDPOINT doesn't support DIRECT_RESP");
        }
        if self.endpoints.get(client).is_none()
            || (has_server && self.endpoints.get(server).is_none())
        {
            return Err("Endpoint isn't deployed");
        }
        Ok(())
    }

    fn test(&self, id: TestId) -> Option<&'static TestCase> {
        let test = self.database.lookup(id);
        if test.is_none() {
            error!("\tTest {id} is not in the database");
        }
        test
    }

    fn run_client(&self, run: TestRunData) -> StatusCode {
        let Some(test) = self.test(run.test) else {
            return StatusCode::ERROR;
        };
        let context = TestContext::new(self, run);
        StatusCode::from((test.client)(&context))
    }

    fn run_server(&self, run: TestRunData, request: &Frame) -> StatusCode {
        let Some(test) = self.test(run.test) else {
            return StatusCode::ERROR;
        };
        let Some(server) = test.server else {
            panic!("Test {} has no server body", test.name);
        };
        let context = TestContext::new(self, run);
        StatusCode::from(server(&context, request))
    }

    /// Runs the body named by a test run word received in a direct request.
    fn run_body(&self, word: u32, request: &Frame) -> StatusCode {
        let run = match TestRunData::try_from(word) {
            Ok(run) => run,
            Err(e) => {
                error!("\t{e}: {word:#x}");
                return StatusCode::ERROR;
            }
        };
        match run.role {
            Role::Server if run.server == self.own.logical_id => self.run_server(run, request),
            Role::Client if run.client == self.own.logical_id => self.run_client(run),
            role => {
                error!("\t{} is not the {role:?} of {run:?}", self.own.name);
                StatusCode::ERROR
            }
        }
    }

    /// Serves test and service requests until the system-under-test returns something which isn't
    /// a request.
    ///
    /// Every request is answered with a direct response carrying the status of the body it ran, so
    /// the requester never waits forever.
    pub fn serve(&self) -> Result<(), DispatchError> {
        let mut frame = self.messaging.wait_for_request(&self.ffa);
        loop {
            if !frame.is(FuncId::MsgSendDirectReq32) {
                if is_scheduling(&frame) {
                    frame = self.messaging.wait_for_request(&self.ffa);
                    continue;
                }
                error!("\tInvalid fid received, {frame:?}");
                return Err(DispatchError::UnexpectedFrame(frame));
            }

            let word = frame.arg(3) as u32;
            let status = match word {
                WD_ENABLE | WD_DISABLE => {
                    self.watchdog(word);
                    StatusCode::SUCCESS
                }
                _ => self.run_body(word, &frame),
            };
            frame = self.messaging.send_direct_response(
                &self.ffa,
                CallWidth::W32,
                frame.endpoints().reversed(),
                [status.to_wire(), 0, 0, 0, 0],
            );
        }
    }

    /// Serves requests on a secondary execution context of a secure partition.
    ///
    /// A server-role test run word for a test with a secondary server body runs that body, and is
    /// answered with its status. Any other request is echoed back.
    pub fn serve_secondary(&self) -> Result<(), DispatchError> {
        let mut frame = self.messaging.wait_for_request(&self.ffa);
        loop {
            if !frame.is(FuncId::MsgSendDirectReq32) {
                if is_scheduling(&frame) {
                    frame = self.messaging.wait_for_request(&self.ffa);
                    continue;
                }
                error!("\tDirect request failed, {frame:?}");
                return Err(DispatchError::UnexpectedFrame(frame));
            }

            let reply = match self.secondary_server_for(frame.arg(3)) {
                Some((run, server)) => {
                    let context = TestContext::new(self, run);
                    StatusCode::from(server(&context, &frame)).to_wire()
                }
                None => frame.arg(3),
            };
            frame = self.messaging.send_direct_response(
                &self.ffa,
                CallWidth::W32,
                frame.endpoints().reversed(),
                [reply, 0, 0, 0, 0],
            );
        }
    }

    fn secondary_server_for(
        &self,
        word: u64,
    ) -> Option<(TestRunData, crate::database::ServerFn)> {
        let run = TestRunData::try_from(u32::try_from(word).ok()?).ok()?;
        if run.role != Role::Server || run.server != self.own.logical_id {
            return None;
        }
        let server = self.database.lookup(run.test)?.secondary_server?;
        Some((run, server))
    }

    /// Starts or stops the watchdog.
    ///
    /// SP1 owns the watchdog. Other endpoints ask SP1 with a service request, unless there are no
    /// secure partitions.
    ///
    /// # Panics
    ///
    /// Panics if SP1 doesn't carry out the request, as tests can't safely run unguarded.
    fn watchdog(&self, service: u32) {
        let sp1 = self.endpoints.get(LogicalId::Sp1);
        match sp1 {
            Some(sp1) if sp1.id != self.own.id && self.config.has_secure_partitions() => {
                let frame = self.request(
                    CallWidth::W32,
                    EndpointPair::new(self.own.id, sp1.id),
                    [service.into(), 0, 0, 0, 0],
                );
                if !frame.is(FuncId::MsgSendDirectResp32)
                    || StatusCode::from_wire(frame.arg(3)) != StatusCode::SUCCESS
                {
                    panic!("Watchdog service {service:#x} request to SP1 failed: {frame:?}");
                }
            }
            _ if service == WD_ENABLE => PlatformImpl::watchdog_enable(self.config.watchdog_load),
            _ => PlatformImpl::watchdog_disable(),
        }
    }

    /// Runs every test in the database and prints the regression report.
    pub fn run_suite(&self) -> Report {
        always!("");
        always!("");
        always!(
            "***** FF-A ACS Version {}.{} *****",
            ACS_MAJOR_VERSION,
            ACS_MINOR_VERSION
        );
        always!("");

        let mut report = Report::default();
        let mut suite = None;
        for (id, test) in self.database.iter() {
            if suite != Some(test.suite) {
                suite = Some(test.suite);
                always!("");
                always!("{}", test.suite.banner());
            }
            always!("");
            always!("> TEST -{} => START", test.name);

            self.messaging.reset();
            self.watchdog(WD_ENABLE);
            let mut runner = Runner::new(self, id);
            (test.entry)(&mut runner);
            self.watchdog(WD_DISABLE);

            report.add(report_status(test.name, &runner.status));
        }
        report.print();
        report
    }
}

/// Returns whether a frame returned to a waiting endpoint only hands it the CPU, rather than
/// delivering a message.
fn is_scheduling(frame: &Frame) -> bool {
    frame.is(FuncId::Run) || frame.is(FuncId::Interrupt)
}

/// Runs the endpoint pairs of one test on the dispatcher and merges their outcomes.
pub struct Runner<'a> {
    harness: &'a Harness<'a>,
    test: TestId,
    status: TestStatus,
}

impl<'a> Runner<'a> {
    /// Returns a runner for the given test, with nothing recorded yet.
    pub fn new(harness: &'a Harness<'a>, test: TestId) -> Self {
        Self {
            harness,
            test,
            status: TestStatus::INITIAL,
        }
    }

    /// Runs the test between the given endpoints, and records the outcome.
    pub fn execute(&mut self, client: LogicalId, server: LogicalId) -> Outcome {
        let status = self
            .harness
            .execute_test(self.test, client, server)
            .unwrap_or(StatusCode::SKIP_CHECK);
        let outcome = Outcome::from(status);
        self.status.record(outcome);
        outcome
    }

    /// Runs the test between each pair of endpoints in turn, stopping at the first failure.
    pub fn run_pairs(&mut self, pairs: &[(LogicalId, LogicalId)]) {
        for &(client, server) in pairs {
            if let Outcome::Fail(_) = self.execute(client, server) {
                return;
            }
        }
    }

    /// Returns the harness of the dispatcher.
    pub fn harness(&self) -> &'a Harness<'a> {
        self.harness
    }

    /// Records that the test can't run on this system at all.
    pub fn skip(&mut self, reason: &str) {
        info!("\t{reason}, skipping the test");
        self.status.record(Outcome::Skip);
    }

    /// Returns the merged status of the invocations so far.
    pub fn status(&self) -> TestStatus {
        self.status
    }
}

/// What a test body gets to work with: the harness of the endpoint it runs on, and the run word
/// it was invoked with.
pub struct TestContext<'a> {
    harness: &'a Harness<'a>,
    run: TestRunData,
}

impl<'a> TestContext<'a> {
    /// Returns the context for running a body of `run` on the endpoint of `harness`.
    pub fn new(harness: &'a Harness<'a>, run: TestRunData) -> Self {
        Self { harness, run }
    }

    /// Returns the run word this body was invoked with.
    pub fn run(&self) -> TestRunData {
        self.run
    }

    /// Returns the harness of the endpoint the body runs on.
    pub fn harness(&self) -> &'a Harness<'a> {
        self.harness
    }

    /// Shorthand for the harness's FF-A interface.
    pub fn ffa(&self) -> &Ffa<'a> {
        &self.harness.ffa
    }

    /// Shorthand for the harness's configuration.
    pub fn config(&self) -> &'a AcsConfig {
        self.harness.config
    }

    /// Shorthand for the harness's direct messaging engine.
    pub fn messaging(&self) -> &DirectMessaging {
        &self.harness.messaging
    }

    /// Shorthand for the harness's endpoint registry.
    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.harness.endpoints
    }

    /// Returns the endpoint the body runs on.
    pub fn own(&self) -> &'static EndpointInfo {
        self.harness.own
    }

    /// Returns the FF-A ID of the client of this run.
    pub fn client_id(&self) -> u16 {
        self.endpoints().id(self.run.client)
    }

    /// Returns the FF-A ID of the server of this run, or 0 if there is none.
    pub fn server_id(&self) -> u16 {
        self.endpoints().id(self.run.server)
    }

    /// Returns the client to server endpoint pair.
    pub fn client_to_server(&self) -> EndpointPair {
        EndpointPair::new(self.client_id(), self.server_id())
    }

    /// Asks the server to run its body for this test, or to report its status once its body has
    /// finished.
    ///
    /// Sends a 32-bit direct request with the server-role run word in w3 and `args` in w4 to w7,
    /// and returns the result once the server responds.
    pub fn select_server_fn_direct(&self, args: [u64; 4]) -> Frame {
        let word = u32::from(self.run.with_role(Role::Server));
        let [w4, w5, w6, w7] = args;
        self.harness.request(
            CallWidth::W32,
            self.client_to_server(),
            [word.into(), w4, w5, w6, w7],
        )
    }

    /// Sends a 32-bit direct response from the server to the client with `payload` in w3 to w7,
    /// unblocking the client, and returns the next request.
    pub fn resp_client_fn_direct(&self, payload: [u64; 5]) -> Frame {
        self.messaging().send_direct_response(
            self.ffa(),
            CallWidth::W32,
            self.client_to_server().reversed(),
            payload,
        )
    }

    /// Collects the status of the server body, once it has sent its last response to the client.
    ///
    /// A client which has brought its server in must always call this, so that the server's wait
    /// loop gets to answer.
    pub fn server_status(&self) -> TestResult {
        let frame = self.select_server_fn_direct([0; 4]);
        if frame.is(FuncId::MsgSendDirectResp32) {
            StatusCode::from_wire(frame.arg(3)).into_result()
        } else {
            error!("\tFailed to collect server status: {frame:?}");
            Err(TestError::Failed(StatusCode::ERROR))
        }
    }

    /// Sends a direct request from this endpoint, resuming the receiver until it responds.
    pub fn direct_request(
        &self,
        width: CallWidth,
        endpoints: EndpointPair,
        payload: [u64; 5],
    ) -> Frame {
        self.harness.request(width, endpoints, payload)
    }

    /// Runs the test's secondary client body on each secondary core in turn.
    ///
    /// # Panics
    ///
    /// Panics if the test has no secondary client body.
    pub fn run_on_secondary_cores(&self) -> Result<(), SecondaryError> {
        let body = self
            .harness
            .database
            .lookup(self.run.test)
            .and_then(|test| test.secondary_client);
        let Some(body) = body else {
            panic!("Test {} has no secondary client body", self.run.test);
        };
        SecondaryCores::new().run(self, body)
    }

    /// Returns the index of the core we are running on.
    pub fn current_core(&self) -> usize {
        PlatformImpl::current_core()
    }
}
