//! Connection lifecycle and the state it owns.
//!
//! `LinkState` is the one container for everything a renderer may read:
//! connection state, relay state, applied voltage and the sample window.
//! Its methods are the only mutation entry points; the link task calls them
//! and the controller uses the `check_*` methods to reject commands early.

use embassy_time::{Duration, Instant};

use crate::control::LinkConfig;
use crate::error::CommandError;
use crate::telemetry::{Sample, SampleWindow, Sampler};
use crate::validation::can_toggle_output;

/// Network address of a converter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConverterTarget {
    host: String,
    port: u16,
}

impl ConverterTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, CommandError> {
        let host = host.into();
        let host = host.trim();
        if host.is_empty() {
            return Err(CommandError::InvalidTarget("host is empty".to_string()));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(CommandError::InvalidTarget(format!("host {:?} is not a plain host name", host)));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Build a target from operator text, where the port is still a string.
    pub fn parse(host: &str, port: &str) -> Result<Self, CommandError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| CommandError::InvalidTarget(format!("port {:?} is not in 0..=65535", port)))?;
        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ConverterTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where the link is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting(ConverterTarget),
    Connected(ConverterTarget),
    /// Probe failed; reverts to `Disconnected` on its own.
    Failed(ConverterTarget),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn target(&self) -> Option<&ConverterTarget> {
        match self {
            ConnectionState::Disconnected => None,
            ConnectionState::Connecting(target) | ConnectionState::Connected(target) | ConnectionState::Failed(target) => Some(target),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting(target) => write!(f, "Connecting to {}...", target),
            ConnectionState::Connected(target) => write!(f, "Connected to {}", target),
            ConnectionState::Failed(target) => write!(f, "Connection to {} failed", target),
        }
    }
}

/// Consistent copy of everything a status display shows.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub connection: ConnectionState,
    pub output_on: bool,
    /// Last setpoint the device acknowledged, `0.0` if none.
    pub applied_voltage: f32,
    pub measurement_enabled: bool,
    pub last_measurement: Option<f32>,
    pub voltage_pending: bool,
    pub output_pending: bool,
    pub sample_count: usize,
}

impl LinkStatus {
    /// Last measurement with one decimal, or `--` when there is none.
    pub fn measurement_display(&self) -> String {
        match self.last_measurement {
            Some(voltage) => format!("{:.1}", voltage),
            None => "--".to_string(),
        }
    }
}

pub struct LinkState {
    connection: ConnectionState,
    /// Bumped on every connect attempt and disconnect; tags device requests.
    session: u64,
    output_on: bool,
    applied_voltage: f32,
    measurement_enabled: bool,
    last_measurement: Option<f32>,
    pending_voltage: Option<f32>,
    pending_output: Option<bool>,
    revert_at: Option<Instant>,
    failed_revert: Duration,
    window: SampleWindow,
    sampler: Sampler,
}

impl LinkState {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            session: 0,
            output_on: false,
            applied_voltage: 0.0,
            measurement_enabled: false,
            last_measurement: None,
            pending_voltage: None,
            pending_output: None,
            revert_at: None,
            failed_revert: config.failed_revert(),
            window: SampleWindow::for_sampling(config.window(), config.sampling_period()),
            sampler: Sampler::new(config.sampling_period()),
        }
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            connection: self.connection.clone(),
            output_on: self.output_on,
            applied_voltage: self.applied_voltage,
            measurement_enabled: self.measurement_enabled,
            last_measurement: self.last_measurement,
            voltage_pending: self.pending_voltage.is_some(),
            output_pending: self.pending_output.is_some(),
            sample_count: self.window.len(),
        }
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.window.snapshot()
    }

    pub fn sampler_active(&self) -> bool {
        self.sampler.is_active()
    }

    /// Earliest instant the link task has to wake up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.revert_at, self.sampler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn sync_sampler(&mut self, now: Instant) {
        let active = self.measurement_enabled && self.connection.is_connected();
        if self.sampler.update(active, now) {
            log::debug!("Sampler {} (generation {})", if active { "started" } else { "stopped" }, self.sampler.generation());
        }
    }

    pub fn check_connect(&self) -> Result<(), CommandError> {
        match self.connection {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connected(_) => Err(CommandError::AlreadyConnected),
            ConnectionState::Connecting(_) | ConnectionState::Failed(_) => Err(CommandError::ConnectionInProgress),
        }
    }

    /// `Disconnected -> Connecting`. Returns the session to tag the probe with.
    pub fn begin_connect(&mut self, target: ConverterTarget) -> Result<u64, CommandError> {
        self.check_connect()?;
        self.session = self.session.wrapping_add(1);
        self.window.clear();
        self.connection = ConnectionState::Connecting(target);
        Ok(self.session)
    }

    /// Apply a probe result. Returns `false` if it belongs to another attempt.
    pub fn finish_probe(&mut self, session: u64, reachable: bool, now: Instant) -> bool {
        if session != self.session {
            return false;
        }
        let target = match &self.connection {
            ConnectionState::Connecting(target) => target.clone(),
            _ => return false,
        };
        if reachable {
            self.connection = ConnectionState::Connected(target);
            self.revert_at = None;
        } else {
            self.connection = ConnectionState::Failed(target);
            self.revert_at = Some(now + self.failed_revert);
        }
        self.sync_sampler(now);
        true
    }

    /// `Failed -> Disconnected` once the revert delay has passed.
    pub fn revert_failed(&mut self, now: Instant) -> bool {
        match (&self.connection, self.revert_at) {
            (ConnectionState::Failed(_), Some(at)) if now >= at => {
                self.connection = ConnectionState::Disconnected;
                self.revert_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn check_disconnect(&self) -> Result<(), CommandError> {
        if self.connection.is_connected() { Ok(()) } else { Err(CommandError::NotConnected) }
    }

    /// `Connected -> Disconnected`, resetting everything owned by the session.
    pub fn disconnect(&mut self, now: Instant) -> Result<(), CommandError> {
        self.check_disconnect()?;
        self.session = self.session.wrapping_add(1);
        self.connection = ConnectionState::Disconnected;
        self.output_on = false;
        self.applied_voltage = 0.0;
        self.measurement_enabled = false;
        self.last_measurement = None;
        self.pending_voltage = None;
        self.pending_output = None;
        self.window.clear();
        self.sync_sampler(now);
        Ok(())
    }

    pub fn check_apply_voltage(&self) -> Result<(), CommandError> {
        if !self.connection.is_connected() {
            return Err(CommandError::NotConnected);
        }
        if self.pending_voltage.is_some() {
            return Err(CommandError::CommandPending);
        }
        Ok(())
    }

    pub fn begin_apply_voltage(&mut self, voltage: f32) -> Result<u64, CommandError> {
        self.check_apply_voltage()?;
        self.pending_voltage = Some(voltage);
        Ok(self.session)
    }

    /// Record the device's answer to a set-voltage request.
    pub fn finish_apply_voltage(&mut self, session: u64, voltage: f32, accepted: bool) -> bool {
        if session != self.session {
            return false;
        }
        self.pending_voltage = None;
        if accepted {
            self.applied_voltage = voltage;
        }
        true
    }

    pub fn check_set_output(&self) -> Result<(), CommandError> {
        if !can_toggle_output(self.connection.is_connected(), self.applied_voltage) {
            return Err(if self.connection.is_connected() {
                CommandError::NoVoltageApplied
            } else {
                CommandError::NotConnected
            });
        }
        if self.pending_output.is_some() {
            return Err(CommandError::CommandPending);
        }
        Ok(())
    }

    pub fn begin_set_output(&mut self, on: bool) -> Result<u64, CommandError> {
        self.check_set_output()?;
        self.pending_output = Some(on);
        Ok(self.session)
    }

    /// Record the device's answer to a set-output request.
    pub fn finish_set_output(&mut self, session: u64, on: bool, accepted: bool) -> bool {
        if session != self.session {
            return false;
        }
        self.pending_output = None;
        if accepted {
            self.output_on = on;
        }
        true
    }

    pub fn check_measurement_enabled(&self, enabled: bool) -> Result<(), CommandError> {
        if enabled && !self.connection.is_connected() {
            return Err(CommandError::NotConnected);
        }
        Ok(())
    }

    pub fn set_measurement_enabled(&mut self, enabled: bool, now: Instant) -> Result<(), CommandError> {
        self.check_measurement_enabled(enabled)?;
        self.measurement_enabled = enabled;
        self.sync_sampler(now);
        Ok(())
    }

    /// Advance the sampler; `Some(generation)` means a measurement is due.
    pub fn on_sampler_tick(&mut self, now: Instant) -> Option<u64> {
        self.sampler.on_tick(now)
    }

    /// Record a finished measurement request.
    ///
    /// Returns `true` if a sample was appended. Results from a stopped or
    /// restarted sampler and empty reads leave the window untouched.
    pub fn record_measurement(&mut self, generation: u64, voltage: Option<f32>, now: Instant) -> bool {
        if !self.sampler.accept(generation) {
            return false;
        }
        let Some(voltage) = voltage else {
            return false;
        };
        self.last_measurement = Some(voltage);
        self.window.append(Sample { timestamp: now, voltage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn target() -> ConverterTarget {
        ConverterTarget::new("192.168.4.1", 80).expect("valid target")
    }

    fn connected_state() -> LinkState {
        let mut state = LinkState::new(&LinkConfig::default());
        let session = state.begin_connect(target()).expect("disconnected");
        assert!(state.finish_probe(session, true, at(0)));
        state
    }

    #[test]
    fn target_parses_operator_text() {
        let target = ConverterTarget::parse(" 10.0.0.2 ", "8080").expect("valid");
        assert_eq!(target.host(), "10.0.0.2");
        assert_eq!(target.base_url(), "http://10.0.0.2:8080");
        assert!(matches!(ConverterTarget::parse("10.0.0.2", "65536"), Err(CommandError::InvalidTarget(_))));
        assert!(matches!(ConverterTarget::parse("10.0.0.2", "http"), Err(CommandError::InvalidTarget(_))));
        assert!(matches!(ConverterTarget::parse("", "80"), Err(CommandError::InvalidTarget(_))));
        assert!(matches!(ConverterTarget::parse("a b", "80"), Err(CommandError::InvalidTarget(_))));
    }

    #[test]
    fn successful_probe_connects() {
        let state = connected_state();
        assert_eq!(state.connection(), &ConnectionState::Connected(target()));
        assert_eq!(state.next_deadline(), None);
    }

    #[test]
    fn failed_probe_reverts_after_delay() {
        let mut state = LinkState::new(&LinkConfig::default());
        let session = state.begin_connect(target()).expect("disconnected");
        assert!(state.finish_probe(session, false, at(1_000)));
        assert_eq!(state.connection(), &ConnectionState::Failed(target()));
        assert_eq!(state.next_deadline(), Some(at(3_000)));

        assert_eq!(state.check_connect(), Err(CommandError::ConnectionInProgress));
        assert!(!state.revert_failed(at(2_999)));
        assert!(state.revert_failed(at(3_000)));
        assert_eq!(state.connection(), &ConnectionState::Disconnected);
        assert_eq!(state.next_deadline(), None);
        assert_eq!(state.check_connect(), Ok(()));
    }

    #[test]
    fn connect_is_rejected_unless_disconnected() {
        let mut state = LinkState::new(&LinkConfig::default());
        let session = state.begin_connect(target()).expect("disconnected");
        assert_eq!(state.begin_connect(target()), Err(CommandError::ConnectionInProgress));
        assert_eq!(state.session(), session);
        state.finish_probe(session, true, at(0));
        assert_eq!(state.begin_connect(target()), Err(CommandError::AlreadyConnected));
    }

    #[test]
    fn stale_probe_result_is_ignored() {
        let mut state = LinkState::new(&LinkConfig::default());
        let session = state.begin_connect(target()).expect("disconnected");
        assert!(!state.finish_probe(session + 1, true, at(0)));
        assert!(matches!(state.connection(), ConnectionState::Connecting(_)));
    }

    #[test]
    fn output_needs_applied_voltage() {
        let mut state = connected_state();
        assert_eq!(state.begin_set_output(true), Err(CommandError::NoVoltageApplied));

        let session = state.begin_apply_voltage(24.5).expect("connected");
        assert_eq!(state.begin_apply_voltage(30.0), Err(CommandError::CommandPending));
        assert!(state.finish_apply_voltage(session, 24.5, true));
        assert_eq!(state.status().applied_voltage, 24.5);

        let session = state.begin_set_output(true).expect("voltage applied");
        assert!(state.finish_set_output(session, true, true));
        assert!(state.status().output_on);
    }

    #[test]
    fn rejected_write_keeps_previous_values() {
        let mut state = connected_state();
        let session = state.begin_apply_voltage(48.0).expect("connected");
        assert!(state.finish_apply_voltage(session, 48.0, false));
        let status = state.status();
        assert_eq!(status.applied_voltage, 0.0);
        assert!(!status.voltage_pending);
    }

    #[test]
    fn disconnect_resets_session_state() {
        let mut state = connected_state();
        let session = state.begin_apply_voltage(60.0).expect("connected");
        state.finish_apply_voltage(session, 60.0, true);
        let session = state.begin_set_output(true).expect("voltage applied");
        state.finish_set_output(session, true, true);
        state.set_measurement_enabled(true, at(0)).expect("connected");
        let generation = state.on_sampler_tick(at(100)).expect("tick due");
        assert!(state.record_measurement(generation, Some(59.8), at(130)));

        state.disconnect(at(200)).expect("connected");
        let status = state.status();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert!(!status.output_on);
        assert_eq!(status.applied_voltage, 0.0);
        assert!(!status.measurement_enabled);
        assert_eq!(status.measurement_display(), "--");
        assert!(state.samples().is_empty());
        assert!(!state.sampler_active());
    }

    #[test]
    fn write_result_after_disconnect_is_discarded() {
        let mut state = connected_state();
        let session = state.begin_apply_voltage(60.0).expect("connected");
        state.disconnect(at(10)).expect("connected");
        assert!(!state.finish_apply_voltage(session, 60.0, true));
        assert_eq!(state.status().applied_voltage, 0.0);
    }

    #[test]
    fn sampler_runs_only_while_enabled_and_connected() {
        let mut state = LinkState::new(&LinkConfig::default());
        assert_eq!(state.set_measurement_enabled(true, at(0)), Err(CommandError::NotConnected));

        let mut state = connected_state();
        state.set_measurement_enabled(true, at(0)).expect("connected");
        assert!(state.sampler_active());
        assert_eq!(state.next_deadline(), Some(at(100)));

        let generation = state.on_sampler_tick(at(100)).expect("tick due");
        assert!(state.record_measurement(generation, Some(24.46), at(140)));
        assert_eq!(state.status().measurement_display(), "24.5");

        state.set_measurement_enabled(false, at(150)).expect("disable always allowed");
        assert!(!state.sampler_active());
        assert_eq!(state.on_sampler_tick(at(200)), None);
        assert_eq!(state.samples().len(), 1);
    }

    #[test]
    fn in_flight_measurement_after_disconnect_is_dropped() {
        let mut state = connected_state();
        state.set_measurement_enabled(true, at(0)).expect("connected");
        let generation = state.on_sampler_tick(at(100)).expect("tick due");
        state.disconnect(at(120)).expect("connected");
        assert!(!state.record_measurement(generation, Some(12.0), at(180)));
        assert!(state.samples().is_empty());
        assert_eq!(state.status().last_measurement, None);
    }

    #[test]
    fn missing_reading_is_a_skipped_tick() {
        let mut state = connected_state();
        state.set_measurement_enabled(true, at(0)).expect("connected");
        let generation = state.on_sampler_tick(at(100)).expect("tick due");
        assert!(!state.record_measurement(generation, None, at(110)));
        assert!(state.samples().is_empty());
        // The next tick is not blocked by the empty read
        assert!(state.on_sampler_tick(at(200)).is_some());
    }
}
