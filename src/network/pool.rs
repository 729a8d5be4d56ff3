// src/network/pool.rs

//! Mining pool client implementation
//!
//! Handles communication with a mining pool using the Stratum JSON-RPC
//! protocol over TCP or TLS. One [`PoolSession`] manages the connection
//! lifecycle, turns job pushes into [`JobState`] updates, forwards worker
//! solutions and keeps the session alive through pings, re-logins and
//! reconnects.

use crate::config::duration_secs;
use crate::miner::job::{JobState, Submission};
use crate::network::protocol::{
    self, Incoming, JobParams, LoginResult, NETWORK_ERROR_MSG, STATUS_OK, StatusResult,
};
use crate::network::transport::{Connector, Outgoing, PoolEndpoint, TcpConnector, Transport};
use crate::stats::{HashrateSample, WorkReport, format_hashrate};
use crate::utils::error::MinerError;
use crate::utils::logging::PROTOCOL_TARGET;
use arc_swap::ArcSwapOption;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How often queued submissions, pings and timers are serviced
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Wait between connect attempts and before retrying a failed login
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Ping after this long without sending a submission
    #[serde(with = "duration_secs")]
    pub ping_interval: Duration,
    /// Whether to ping at all
    pub send_ping: bool,
    /// Log in again after this long without a job while hashrate is zero
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// Give up on a single connect attempt after this long
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Agent string sent at login
    #[serde(skip, default = "protocol::agent")]
    pub agent: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            retry_delay: Duration::from_secs(10),
            ping_interval: Duration::from_secs(1),
            send_ping: true,
            idle_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            agent: protocol::agent(),
        }
    }
}

/// Protocol state of a pool session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No connection
    Disconnected = 0,
    /// Opening the socket
    Connecting = 1,
    /// Login sent, waiting for the reply
    AwaitingLogin = 2,
    /// Logged in, no job yet
    Idle = 3,
    /// Logged in with a current job
    HasJob = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::AwaitingLogin,
            3 => SessionState::Idle,
            4 => SessionState::HasJob,
            _ => SessionState::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingLogin => "awaiting login",
            SessionState::Idle => "idle",
            SessionState::HasJob => "mining",
        };
        f.write_str(name)
    }
}

/// Session state and last error, readable from any thread
#[derive(Debug)]
pub struct SessionStatus {
    state: AtomicU8,
    last_error: ArcSwapOption<String>,
}

impl SessionStatus {
    /// Disconnected, no error
    pub fn new() -> Self {
        SessionStatus {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            last_error: ArcSwapOption::empty(),
        }
    }

    /// Current protocol state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Updates the protocol state
    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Last error, `None` once cleared
    pub fn last_error(&self) -> Option<String> {
        self.last_error.load_full().map(|e| e.as_ref().clone())
    }

    /// Records an error for display
    pub fn set_error(&self, message: impl Into<String>) {
        self.last_error.store(Some(Arc::new(message.into())));
    }

    /// Clears the last error
    pub fn clear_error(&self) {
        self.last_error.store(None);
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state a pool session writes and the orchestrator reads
#[derive(Debug, Clone)]
pub struct SessionHandles {
    /// Job cell polled by the workers
    pub job_state: Arc<JobState>,
    /// Share counters
    pub work: Arc<WorkReport>,
    /// State and last error
    pub status: Arc<SessionStatus>,
    /// Latest aggregate hashrate, consulted by idle recovery
    pub total_hashrate: Arc<HashrateSample>,
}

/// Outstanding request awaiting a reply
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Login,
    Submit { job_id: String },
}

enum Event {
    Line(Option<String>),
    Tick,
}

/// Client for one mining pool
///
/// Runs until the shutdown token is cancelled. Transport failures are
/// never fatal: the session invalidates the job, drops queued solutions
/// and reconnects.
pub struct PoolSession {
    endpoint: PoolEndpoint,
    options: SessionOptions,
    handles: SessionHandles,
    submissions: Receiver<Submission>,
    shutdown: CancellationToken,
    connector: Arc<dyn Connector>,
    next_id: u64,
    pending: HashMap<u64, Pending>,
    login_id: Option<String>,
    difficulty: Option<f64>,
    idle_since: Instant,
    next_ping_at: Instant,
    relogin_at: Option<Instant>,
}

impl PoolSession {
    /// Creates a session using the TCP/TLS connector
    ///
    /// # Arguments
    /// * `endpoint` - Pool address and credentials
    /// * `options` - Retry, ping and idle policy
    /// * `handles` - Shared state with the workers and the orchestrator
    /// * `submissions` - Solutions found by the workers
    /// * `shutdown` - Cancelled to end the session
    pub fn new(
        endpoint: PoolEndpoint,
        options: SessionOptions,
        handles: SessionHandles,
        submissions: Receiver<Submission>,
        shutdown: CancellationToken,
    ) -> Self {
        let connector = Arc::new(TcpConnector::new(options.connect_timeout));
        let now = Instant::now();
        PoolSession {
            endpoint,
            options,
            handles,
            submissions,
            shutdown,
            connector,
            next_id: 1,
            pending: HashMap::new(),
            login_id: None,
            difficulty: None,
            idle_since: now,
            next_ping_at: now,
            relogin_at: None,
        }
    }

    /// Replaces the connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Main event loop
    ///
    /// Connects, logs in and serves the connection; on any transport or
    /// fatal pool error starts over. Returns once shut down.
    pub async fn run(mut self) {
        while !self.shutdown.is_cancelled() {
            let Some(mut transport) = self.connect().await else {
                break;
            };

            self.set_state(SessionState::AwaitingLogin);
            let result = match self.login(transport.as_mut()).await {
                Ok(()) => {
                    self.handles.status.clear_error();
                    self.serve(transport.as_mut()).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => break,
                Err(e) => self.connection_lost(e),
            }
        }

        self.handles.job_state.invalidate();
        self.pending.clear();
        self.set_state(SessionState::Disconnected);
        log::info!("Pool session {} stopped", self.endpoint);
    }

    /// Opens a transport, retrying forever; `None` on shutdown
    async fn connect(&mut self) -> Option<Box<dyn Transport>> {
        let shutdown = self.shutdown.clone();
        loop {
            self.set_state(SessionState::Connecting);
            log::info!("Connecting to pool {}...", self.endpoint);

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return None,
                attempt = self.connector.connect(&self.endpoint) => attempt,
            };

            match attempt {
                Ok(transport) => {
                    let now = Instant::now();
                    self.next_id = 1;
                    self.idle_since = now;
                    self.next_ping_at = now + self.options.ping_interval;
                    return Some(transport);
                }
                Err(e) => {
                    log::error!("{} ({})", NETWORK_ERROR_MSG, e);
                    self.handles.status.set_error(NETWORK_ERROR_MSG);
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = time::sleep(self.options.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Resets per-connection state after a failure
    fn connection_lost(&mut self, error: MinerError) {
        if error.is_transport() {
            log::error!("{}: {} ({})", self.endpoint, NETWORK_ERROR_MSG, error);
        } else {
            log::error!("{}: reconnecting after {}", self.endpoint, error);
        }
        self.handles.status.set_error(lost_connection_message(error));

        // workers must stop before anything else happens
        self.handles.job_state.invalidate();

        let dropped = self.submissions.try_iter().count();
        if dropped > 0 {
            log::warn!("Discarded {} unsent submissions", dropped);
        }

        self.pending.clear();
        self.login_id = None;
        self.relogin_at = None;
        self.set_state(SessionState::Disconnected);
    }

    async fn serve(&mut self, transport: &mut dyn Transport) -> Result<(), MinerError> {
        let shutdown = self.shutdown.clone();
        let mut tick = time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = transport.read_line() => Event::Line(line?),
                _ = tick.tick() => Event::Tick,
            };

            match event {
                Event::Line(Some(line)) => self.handle_line(&line)?,
                Event::Line(None) => return Err(MinerError::Disconnected),
                Event::Tick => self.on_tick(transport).await?,
            }
        }
    }

    /// Periodic duties: flush solutions, ping, re-login, idle recovery
    async fn on_tick(&mut self, transport: &mut dyn Transport) -> Result<(), MinerError> {
        let mut submitted = false;
        while let Ok(submission) = self.submissions.try_recv() {
            submitted |= self.submit(transport, submission).await?;
        }

        let now = Instant::now();
        if submitted {
            self.next_ping_at = now + self.options.ping_interval;
        } else if self.options.send_ping && now >= self.next_ping_at {
            transport.write(Outgoing::Ping).await?;
            log::debug!("Ping sent");
            self.next_ping_at = now + self.options.ping_interval;
        }

        if self.relogin_at.is_some_and(|at| now >= at) {
            self.relogin_at = None;
            self.login(transport).await?;
        }

        if now.duration_since(self.idle_since) >= self.options.idle_timeout {
            if self.handles.total_hashrate.read() == 0.0 {
                log::warn!(
                    "No new job for {}s and hashrate is zero, logging in again",
                    self.options.idle_timeout.as_secs()
                );
                self.login(transport).await?;
            }
            self.idle_since = now;
        }

        Ok(())
    }

    async fn login(&mut self, transport: &mut dyn Transport) -> Result<(), MinerError> {
        log::info!("Logging in to {} ...", self.endpoint);
        let params = protocol::login_params(
            &self.endpoint.login,
            &self.endpoint.password,
            &self.options.agent,
        );
        self.send(transport, "login", params, Pending::Login).await?;
        self.idle_since = Instant::now();
        Ok(())
    }

    /// Sends a solution; `false` when it belonged to an older login
    async fn submit(
        &mut self,
        transport: &mut dyn Transport,
        submission: Submission,
    ) -> Result<bool, MinerError> {
        if self.login_id.as_deref() != Some(submission.login_id.as_str()) {
            log::debug!(
                "Dropping solution for job {} from a previous login",
                submission.job_id
            );
            return Ok(false);
        }

        log::debug!("Submitting solution for job {}", submission.job_id);
        let params = protocol::submit_params(&submission);
        let pending = Pending::Submit {
            job_id: submission.job_id,
        };
        self.send(transport, "submit", params, pending).await?;
        Ok(true)
    }

    async fn send(
        &mut self,
        transport: &mut dyn Transport,
        method: &str,
        params: serde_json::Value,
        pending: Pending,
    ) -> Result<u64, MinerError> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = protocol::request(id, method, params).to_string();
        log::trace!(target: PROTOCOL_TARGET, "{} < {}", self.endpoint, frame);
        transport.write(Outgoing::Frame(frame)).await?;

        self.pending.insert(id, pending);
        Ok(id)
    }

    /// Handles one received line; an error means reconnect
    fn handle_line(&mut self, line: &str) -> Result<(), MinerError> {
        log::trace!(target: PROTOCOL_TARGET, "{} > {}", self.endpoint, line);

        let incoming = match Incoming::parse(line) {
            Ok(incoming) => incoming,
            Err(e) => {
                log::error!("Failed to parse JSON {:?} (skipping): {}", line, e);
                return Ok(());
            }
        };

        let pending = incoming.reply_id().and_then(|id| self.pending.remove(&id));
        match pending {
            Some(Pending::Login) => {
                self.on_login_reply(&incoming);
                Ok(())
            }
            Some(Pending::Submit { job_id }) => self.on_submit_reply(&incoming, &job_id),
            None => self.on_notification(&incoming),
        }
    }

    fn on_login_reply(&mut self, incoming: &Incoming) {
        let login = match incoming.rpc_error() {
            Some(e) => Err(e.message),
            None => incoming
                .result_as::<LoginResult>()
                .map_err(|e| e.to_string())
                .and_then(|login| {
                    if login.status.as_deref() == Some(STATUS_OK) {
                        Ok(login)
                    } else {
                        Err(login
                            .status
                            .unwrap_or_else(|| "login reply has no status".to_string()))
                    }
                }),
        };

        let login = match login {
            Ok(login) => login,
            Err(message) => {
                log::error!(
                    "Login to {} failed: {}, retrying in {}s",
                    self.endpoint,
                    message,
                    self.options.retry_delay.as_secs()
                );
                self.handles.status.set_error(message);
                self.relogin_at = Some(Instant::now() + self.options.retry_delay);
                return;
            }
        };

        log::info!("Logged in to {}", self.endpoint);
        self.login_id = Some(login.id);
        self.handles.status.clear_error();

        match login.job {
            Some(job) => self.install_job(job),
            None => {
                if self.handles.status.state() != SessionState::HasJob {
                    self.set_state(SessionState::Idle);
                }
            }
        }
    }

    fn on_submit_reply(&mut self, incoming: &Incoming, job_id: &str) -> Result<(), MinerError> {
        let work = &self.handles.work;
        work.record_submitted();

        if let Some(e) = incoming.rpc_error() {
            log::error!("Share for job {} rejected: {}", job_id, e.message);
            if protocol::is_fatal_pool_error(&e.message) {
                return Err(e.into());
            }
            self.handles.status.set_error(e.message);
            return Ok(());
        }

        let accepted = incoming
            .result_as::<StatusResult>()
            .is_ok_and(|status| status.is_ok());
        if accepted {
            work.record_accepted();
            self.handles.status.clear_error();
            log::info!(
                "accepted {}/{} ({:.2}%), {}",
                work.accepted(),
                work.submitted(),
                work.acceptance(),
                format_hashrate(self.handles.total_hashrate.read())
            );
        } else {
            log::warn!("Share for job {} not accepted", job_id);
        }
        Ok(())
    }

    fn on_notification(&mut self, incoming: &Incoming) -> Result<(), MinerError> {
        if let Some(e) = incoming.rpc_error() {
            log::error!("Pool error: {}", e.message);
            if protocol::is_fatal_pool_error(&e.message) {
                return Err(e.into());
            }
            self.handles.status.set_error(e.message);
            return Ok(());
        }

        match incoming.method.as_deref() {
            Some("job") => match incoming.params_as::<JobParams>() {
                Ok(params) => self.install_job(params),
                Err(e) => log::error!("Discarding malformed job: {}", e),
            },
            Some(other) => log::debug!("Ignoring pool method {}", other),
            None => log::debug!("Unmatched reply {:?}", incoming.id),
        }
        Ok(())
    }

    fn install_job(&mut self, params: JobParams) {
        let Some(login_id) = self.login_id.as_deref() else {
            log::warn!("Ignoring job {} received before login", params.job_id);
            return;
        };

        let (job, difficulty) = match params.into_job(login_id, self.endpoint.algorithm) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::error!("Discarding job: {}", e);
                return;
            }
        };

        log::info!("New job {} from {}", job.job_id, self.endpoint);
        if self.difficulty != Some(difficulty) {
            log::info!("Stratum difficulty set to {:.0}", difficulty);
            self.difficulty = Some(difficulty);
            self.handles.work.set_difficulty(difficulty);
        }

        self.handles.job_state.publish(job);
        self.idle_since = Instant::now();
        self.set_state(SessionState::HasJob);
    }

    fn set_state(&self, state: SessionState) {
        self.handles.status.set_state(state);
    }
}

/// Last-error text shown after a connection is given up
///
/// Fatal pool errors keep the pool's own message; anything else, transport
/// failures included, reads as a network error.
fn lost_connection_message(error: MinerError) -> String {
    match error {
        e if e.is_transport() => NETWORK_ERROR_MSG.to_string(),
        MinerError::PoolError { message, .. } => message,
        _ => NETWORK_ERROR_MSG.to_string(),
    }
}
