//! Solarman V5 client
//!
//! One client owns one stick: its transport, sequence counter, idle
//! watchdog, and connection state. Requests are serialized through a fair
//! async mutex, so at most one request is ever in flight — the protocol is
//! half-duplex and the stick answers exactly one frame per request frame.
//!
//! A single attempt walks the whole pipeline: ensure connected (per the
//! reconnect policy), draw a sequence number, build the Modbus RTU frame,
//! wrap it in a V5 envelope, register the response awaiter, write, race the
//! response against the configured deadline, validate the envelope, match
//! the sequence low byte, and hand the embedded RTU frame to the Modbus
//! layer. Retryable failures tear the transport down and run the next
//! attempt; protocol failures surface immediately.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{ReconnectStrategy, SolarmanConfig};
use crate::constants::*;
use crate::error::{Result, SolarmanError};
use crate::frame::{self, V5Response};
use crate::metrics::{MetricsHooks, NoopMetrics};
use crate::rtu::{self, RtuParseError, RtuResponse};
use crate::sequence::SequenceNumber;
use crate::transport::{TransportStats, V5Transport};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Check if state represents an active connection
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Disconnecting => write!(f, "DISCONNECTING"),
        }
    }
}

struct ClientShared {
    config: SolarmanConfig,
    sequence: SequenceNumber,
    state: StdMutex<ConnectionState>,
    /// Present only while connected
    transport: Mutex<Option<Arc<V5Transport>>>,
    /// Serializes requests; tokio's mutex queues waiters FIFO, so
    /// concurrent callers are served in arrival order
    request_lock: Mutex<()>,
    last_activity: StdMutex<Instant>,
    idle_timer: StdMutex<Option<JoinHandle<()>>>,
    /// Current exponential-backoff delay; `None` until the first failure
    /// and again after any successful connect
    reconnect_delay: StdMutex<Option<Duration>>,
    metrics: Arc<dyn MetricsHooks>,
}

impl ClientShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn get_state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the transport (if any) and land in `Disconnected`
    async fn teardown_transport(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(transport) = transport {
            transport.close().await;
            self.metrics.disconnect();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Stamp the last-activity instant and re-arm the idle watchdog
    fn touch_activity(this: &Arc<Self>) {
        *this
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        Self::schedule_idle_close(this);
    }

    fn schedule_idle_close(this: &Arc<Self>) {
        let Some(idle) = this.config.idle_timeout() else {
            return;
        };

        // Weak so the watchdog never outlives the last client handle
        let shared = Arc::downgrade(this);
        let mut timer = this
            .idle_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        *timer = Some(tokio::spawn(async move {
            sleep(idle).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let elapsed = shared
                .last_activity
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed();
            // A touch that raced this timer already re-armed a fresh one
            if elapsed >= idle {
                info!("Idle for {:?}, closing connection", elapsed);
                shared.teardown_transport().await;
            }
        }));
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        if let Ok(timer) = self.idle_timer.get_mut() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
        // Dropping the transport aborts its read loop and wakes any awaiter
    }
}

/// Async client for a Solarman V5 data-logging stick
///
/// Cheap to clone; clones share the same connection, sequence counter and
/// request serialization.
#[derive(Clone)]
pub struct SolarmanClient {
    shared: Arc<ClientShared>,
}

impl SolarmanClient {
    /// Create a client; no I/O happens until [`connect`](Self::connect) or
    /// the first request under a reconnecting policy
    pub fn new(config: SolarmanConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a client with a telemetry sink
    pub fn with_metrics(config: SolarmanConfig, metrics: Arc<dyn MetricsHooks>) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                config,
                sequence: SequenceNumber::new(),
                state: StdMutex::new(ConnectionState::Disconnected),
                transport: Mutex::new(None),
                request_lock: Mutex::new(()),
                last_activity: StdMutex::new(Instant::now()),
                idle_timer: StdMutex::new(None),
                reconnect_delay: StdMutex::new(None),
                metrics,
            }),
        }
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &SolarmanConfig {
        &self.shared.config
    }

    /// Current lifecycle state
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.get_state()
    }

    /// Whether the client is in `Connected`
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Transport counters for the current connection (zero when
    /// disconnected; counters reset on reconnect)
    pub async fn stats(&self) -> TransportStats {
        match &*self.shared.transport.lock().await {
            Some(transport) => transport.stats(),
            None => TransportStats::default(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the TCP connection to the stick
    ///
    /// Requires `Disconnected`; fails with `AlreadyConnected` when called
    /// on a connected client.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match *state {
                ConnectionState::Connected => return Err(SolarmanError::AlreadyConnected),
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    return Err(SolarmanError::connection_failed(format!(
                        "connect while {}",
                        *state
                    )))
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        let config = &self.shared.config;
        match V5Transport::connect(&config.host, config.port, config.timeout()).await {
            Ok(transport) => {
                *self.shared.transport.lock().await = Some(Arc::new(transport));
                self.shared.set_state(ConnectionState::Connected);
                self.shared.metrics.connect();
                ClientShared::touch_activity(&self.shared);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the connection
    ///
    /// Idempotent and safe from any state: cancels the idle watchdog,
    /// closes the transport best-effort, and always ends `Disconnected`.
    pub async fn close(&self) -> Result<()> {
        self.shared.set_state(ConnectionState::Disconnecting);

        let timer = self
            .shared
            .idle_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = timer {
            handle.abort();
        }

        self.shared.teardown_transport().await;
        Ok(())
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// Read holding registers (FC03)
    pub async fn read_holding_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        validate_count(quantity as usize, MAX_READ_REGISTERS, "register count")?;
        let request =
            rtu::build_read_request(self.unit_id(), FC_READ_HOLDING_REGISTERS, address, quantity);
        let response = self.execute_typed(FC_READ_HOLDING_REGISTERS, &request).await?;
        response.registers().map_err(map_rtu_error)
    }

    /// Read input registers (FC04)
    pub async fn read_input_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        validate_count(quantity as usize, MAX_READ_REGISTERS, "register count")?;
        let request =
            rtu::build_read_request(self.unit_id(), FC_READ_INPUT_REGISTERS, address, quantity);
        let response = self.execute_typed(FC_READ_INPUT_REGISTERS, &request).await?;
        response.registers().map_err(map_rtu_error)
    }

    /// Read coils (FC01)
    pub async fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<bool>> {
        validate_count(quantity as usize, MAX_READ_COILS, "coil count")?;
        let request = rtu::build_read_request(self.unit_id(), FC_READ_COILS, address, quantity);
        let response = self.execute_typed(FC_READ_COILS, &request).await?;
        response.bits(quantity).map_err(map_rtu_error)
    }

    /// Read discrete inputs (FC02)
    pub async fn read_discrete_inputs(&self, address: u16, quantity: u16) -> Result<Vec<bool>> {
        validate_count(quantity as usize, MAX_READ_COILS, "input count")?;
        let request =
            rtu::build_read_request(self.unit_id(), FC_READ_DISCRETE_INPUTS, address, quantity);
        let response = self.execute_typed(FC_READ_DISCRETE_INPUTS, &request).await?;
        response.bits(quantity).map_err(map_rtu_error)
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Write a single holding register (FC06)
    pub async fn write_single_register(&self, address: u16, value: u16) -> Result<()> {
        let request = rtu::build_write_single_register(self.unit_id(), address, value);
        self.execute_typed(FC_WRITE_SINGLE_REGISTER, &request).await?;
        Ok(())
    }

    /// Write multiple holding registers (FC16)
    pub async fn write_multiple_registers(&self, address: u16, values: &[u16]) -> Result<()> {
        validate_count(values.len(), MAX_WRITE_REGISTERS, "register count")?;
        let request = rtu::build_write_multiple_registers(self.unit_id(), address, values);
        self.execute_typed(FC_WRITE_MULTIPLE_REGISTERS, &request).await?;
        Ok(())
    }

    /// Write a single coil (FC05)
    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<()> {
        let request = rtu::build_write_single_coil(self.unit_id(), address, value);
        self.execute_typed(FC_WRITE_SINGLE_COIL, &request).await?;
        Ok(())
    }

    /// Write multiple coils (FC15)
    pub async fn write_multiple_coils(&self, address: u16, values: &[bool]) -> Result<()> {
        validate_count(values.len(), MAX_WRITE_COILS, "coil count")?;
        let request = rtu::build_write_multiple_coils(self.unit_id(), address, values);
        self.execute_typed(FC_WRITE_MULTIPLE_COILS, &request).await?;
        Ok(())
    }

    /// Mask-write a holding register (FC22)
    pub async fn mask_write_register(
        &self,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<()> {
        let request = rtu::build_mask_write_register(self.unit_id(), address, and_mask, or_mask);
        self.execute_typed(FC_MASK_WRITE_REGISTER, &request).await?;
        Ok(())
    }

    // ========================================================================
    // Raw Operations
    // ========================================================================

    /// Send a caller-built RTU frame, appending the CRC16
    ///
    /// The frame must carry at least the unit id and function code. Returns
    /// the raw RTU response frame (CRC included) after envelope, sequence
    /// and CRC validation.
    pub async fn send_raw_modbus(&self, modbus_frame: &[u8]) -> Result<Vec<u8>> {
        if modbus_frame.len() < 2 {
            return Err(SolarmanError::invalid_parameter(
                "raw frame needs at least unit id and function code",
            ));
        }
        let function = modbus_frame[1];
        let mut request = modbus_frame.to_vec();
        rtu::append_crc(&mut request);
        self.execute(function, &request, |client, mb| client.interpret_raw(mb))
            .await
    }

    /// Send a caller-built RTU frame verbatim (CRC already included)
    pub async fn send_raw_modbus_with_crc(&self, modbus_frame: &[u8]) -> Result<Vec<u8>> {
        if modbus_frame.len() < 4 {
            return Err(SolarmanError::invalid_parameter(
                "raw frame needs unit id, function code and CRC",
            ));
        }
        let function = modbus_frame[1];
        self.execute(function, modbus_frame, |client, mb| client.interpret_raw(mb))
            .await
    }

    // ========================================================================
    // Request Engine
    // ========================================================================

    fn unit_id(&self) -> u8 {
        self.shared.config.unit_id
    }

    async fn execute_typed(&self, function: u8, rtu_request: &[u8]) -> Result<RtuResponse> {
        self.execute(function, rtu_request, move |client, mb| {
            client.interpret_typed(mb, function)
        })
        .await
    }

    /// Retry loop around [`attempt`](Self::attempt)
    ///
    /// Holds the request lock for the whole loop so retries of one request
    /// are not interleaved with another caller's attempts.
    async fn execute<T, F>(&self, function: u8, rtu_request: &[u8], interpret: F) -> Result<T>
    where
        F: Fn(&Self, &[u8]) -> Result<T>,
    {
        let _guard = self.shared.request_lock.lock().await;

        let started = Instant::now();
        let max_attempts = self.shared.config.retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(rtu_request, &interpret).await {
                Ok(value) => {
                    self.shared.metrics.request_ok(function, started.elapsed());
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Attempt {}/{} failed (FC={:02X}): {} - retrying",
                        attempt, max_attempts, function, e
                    );
                    self.shared.metrics.retry(function);
                    // Next attempt reconnects per policy
                    self.shared.teardown_transport().await;
                }
                Err(e) => {
                    self.shared.metrics.request_err(function, e.label());
                    return Err(e);
                }
            }
        }
    }

    /// One request/response round trip
    async fn attempt<T, F>(&self, rtu_request: &[u8], interpret: &F) -> Result<T>
    where
        F: Fn(&Self, &[u8]) -> Result<T>,
    {
        self.ensure_connected().await?;
        let transport = self
            .current_transport()
            .await
            .ok_or(SolarmanError::NotConnected)?;

        let sequence = self.shared.sequence.next();
        let v5_request = frame::build_request(
            self.shared.config.logger_serial,
            sequence,
            rtu_request,
        );

        // Register before the write: the response cannot arrive unclaimed,
        // and a timeout or cancellation drops the guard and clears the slot
        let pending = transport.gate().register();
        transport.send(&v5_request).await?;
        ClientShared::touch_activity(&self.shared);

        let raw = match timeout(self.shared.config.timeout(), pending.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                debug!("Request timed out after {:?}", self.shared.config.timeout());
                return Err(SolarmanError::Timeout);
            }
        };
        ClientShared::touch_activity(&self.shared);

        let response = V5Response::parse(raw)?;

        // The stick increments the high byte per response; only the low
        // byte correlates request and response
        if response.sequence() as u8 != sequence as u8 {
            return Err(SolarmanError::SequenceMismatch {
                expected: sequence,
                actual: response.sequence(),
            });
        }

        interpret(self, response.modbus_frame())
    }

    fn interpret_typed(&self, modbus_frame: &[u8], function: u8) -> Result<RtuResponse> {
        let unit_id = self.unit_id();

        // A doubled CRC leaves the whole frame CRC-valid (the residue over
        // a valid-CRC frame is zero), so the corrector cannot be gated on a
        // CRC failure; it is tried first and only ever strips a candidate
        // that re-validates
        if self.shared.config.error_correction {
            if let Some(fixed) = frame::fix_double_crc(modbus_frame) {
                return rtu::parse_response(fixed, unit_id, function).map_err(map_rtu_error);
            }
        }

        rtu::parse_response(modbus_frame, unit_id, function).map_err(map_rtu_error)
    }

    fn interpret_raw(&self, modbus_frame: &[u8]) -> Result<Vec<u8>> {
        if modbus_frame.len() < 4 {
            return Err(SolarmanError::rtu(format!(
                "raw response too short: {} bytes",
                modbus_frame.len()
            )));
        }

        // Strip a doubled CRC before the plain verdict: the doubled frame
        // passes the whole-frame CRC check with a zero residue and would
        // otherwise be returned with the spurious trailing bytes attached
        if self.shared.config.error_correction {
            if let Some(fixed) = frame::fix_double_crc(modbus_frame) {
                return Ok(fixed.to_vec());
            }
        }

        let stored = u16::from_le_bytes([
            modbus_frame[modbus_frame.len() - 2],
            modbus_frame[modbus_frame.len() - 1],
        ]);
        let computed = rtu::crc16(&modbus_frame[..modbus_frame.len() - 2]);
        if stored == computed {
            return Ok(modbus_frame.to_vec());
        }

        Err(SolarmanError::rtu(format!(
            "crc mismatch: expected 0x{computed:04X}, got 0x{stored:04X}"
        )))
    }

    // ========================================================================
    // Reconnect Policy
    // ========================================================================

    async fn current_transport(&self) -> Option<Arc<V5Transport>> {
        self.shared.transport.lock().await.clone()
    }

    /// Make sure a live transport exists, consulting the reconnect policy
    async fn ensure_connected(&self) -> Result<()> {
        if let Some(transport) = self.current_transport().await {
            if transport.is_active() {
                return Ok(());
            }
            debug!("Transport inactive, tearing down before reconnect");
        }

        match &self.shared.config.reconnect {
            ReconnectStrategy::Disabled => {
                // A dead transport under a non-reconnecting policy still
                // needs cleanup so state reflects reality
                self.shared.teardown_transport().await;
                Err(SolarmanError::NotConnected)
            }
            ReconnectStrategy::Immediate => {
                self.shared.metrics.reconnect_attempt();
                self.reconnect().await
            }
            &ReconnectStrategy::ExponentialBackoff { initial_ms, max_ms } => {
                let current = *self
                    .shared
                    .reconnect_delay
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(delay) = current {
                    debug!("Reconnect backoff: sleeping {:?}", delay);
                    sleep(delay).await;
                }

                self.shared.metrics.reconnect_attempt();
                let result = self.reconnect().await;

                let mut slot = self
                    .shared
                    .reconnect_delay
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                match &result {
                    Ok(()) => *slot = None,
                    Err(_) => {
                        *slot = Some(match current {
                            None => Duration::from_millis(initial_ms),
                            Some(delay) => (delay * 2).min(Duration::from_millis(max_ms)),
                        });
                    }
                }
                result
            }
        }
    }

    async fn reconnect(&self) -> Result<()> {
        self.shared.teardown_transport().await;
        self.connect().await
    }
}

/// Create a client, connect, run the block, and always close
///
/// The transport is closed whether the block succeeds or fails.
pub async fn with_client<F, Fut, T>(config: SolarmanConfig, f: F) -> Result<T>
where
    F: FnOnce(SolarmanClient) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let client = SolarmanClient::new(config);
    client.connect().await?;
    let result = f(client.clone()).await;
    let _ = client.close().await;
    result
}

fn validate_count(quantity: usize, max: u16, what: &str) -> Result<()> {
    if quantity < 1 || quantity > max as usize {
        return Err(SolarmanError::invalid_parameter(format!(
            "{what} out of range: {quantity} (valid 1..={max})"
        )));
    }
    Ok(())
}

fn map_rtu_error(err: RtuParseError) -> SolarmanError {
    match err {
        RtuParseError::Exception(code) => {
            warn!(
                "Device rejected request: {} (0x{:02X})",
                rtu::exception_description(code),
                code
            );
            SolarmanError::ModbusException(code)
        }
        other => SolarmanError::Rtu(other.to_string()),
    }
}
