//! Operator-facing handle on the converter link.
//!
//! `ConverterController` is what a renderer or console holds. Commands are
//! checked against the current state and queued for the link task; they
//! return as soon as they are queued and the device's answer shows up in
//! [`ConverterController::status`] once it arrives.

use embassy_executor::{Executor, SendSpawner};
use std::cell::RefCell;
use std::io;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use super::state::{ConnectionState, ConverterTarget, LinkState, LinkStatus};
use super::task::{LinkChannels, LinkCommand, LinkFactory, SharedLinkState, link_task};
use crate::control::{ConverterApi, DeviceLink, LinkConfig};
use crate::error::CommandError;
use crate::telemetry::Sample;
use crate::validation::{can_apply_voltage, format_voltage, parse_voltage};

/// Spawner of the process-wide executor hosting every link task.
static LINK_SPAWNER: OnceLock<SendSpawner> = OnceLock::new();
static LINK_SPAWNER_INIT: Mutex<()> = Mutex::new(());

/// Return the link executor's spawner, starting its thread on first use.
fn link_spawner() -> io::Result<SendSpawner> {
    if let Some(spawner) = LINK_SPAWNER.get() {
        return Ok(*spawner);
    }
    let _guard = LINK_SPAWNER_INIT
        .lock()
        .map_err(|_| io::Error::other("link executor start-up panicked"))?;
    if let Some(spawner) = LINK_SPAWNER.get() {
        return Ok(*spawner);
    }

    let (spawner_tx, spawner_rx) = std::sync::mpsc::channel();
    thread::Builder::new().name("link-executor".to_string()).spawn(move || {
        // Leak the executor to satisfy the 'static lifetime required by run()
        let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
        executor.run(|spawner| {
            if spawner_tx.send(spawner.make_send()).is_err() {
                log::error!("Link executor started without a caller");
            }
        });
    })?;

    let spawner = spawner_rx
        .recv()
        .map_err(|_| io::Error::other("link executor exited during start-up"))?;
    Ok(*LINK_SPAWNER.get_or_init(|| spawner))
}

pub struct ConverterController {
    config: LinkConfig,
    state: Arc<SharedLinkState>,
    channels: Arc<LinkChannels>,
}

impl ConverterController {
    /// Start a link that talks HTTP to the converter.
    pub fn new(config: LinkConfig) -> io::Result<Self> {
        let link_config = config.clone();
        let factory: Arc<LinkFactory> = Arc::new(move |target: &ConverterTarget| -> Result<Arc<dyn ConverterApi>, String> {
            let link = DeviceLink::new(target, &link_config)?;
            Ok(Arc::new(link) as Arc<dyn ConverterApi>)
        });
        Self::with_link_factory(config, factory)
    }

    /// Start a link whose device clients come from `factory`.
    ///
    /// Fails if the executor thread cannot be started or every link task
    /// slot is taken.
    pub fn with_link_factory(config: LinkConfig, factory: Arc<LinkFactory>) -> io::Result<Self> {
        let state = Arc::new(SharedLinkState::new(RefCell::new(LinkState::new(&config))));
        let channels = Arc::new(LinkChannels::new());

        link_spawner()?
            .spawn(link_task(state.clone(), factory, channels.clone()))
            .map_err(|e| io::Error::other(format!("Failed to spawn link task: {}", e)))?;

        Ok(Self { config, state, channels })
    }

    fn with_state<R>(&self, f: impl FnOnce(&LinkState) -> R) -> R {
        self.state.lock(|s| f(&s.borrow()))
    }

    fn send(&self, command: LinkCommand) -> Result<(), CommandError> {
        self.channels.try_send_command(command).map_err(|_| CommandError::LinkStopped)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Target built from the configured host and port.
    pub fn default_target(&self) -> Result<ConverterTarget, CommandError> {
        ConverterTarget::new(self.config.host.clone(), self.config.port)
    }

    /// Start a connection attempt. Only valid while disconnected.
    pub fn connect(&self, target: ConverterTarget) -> Result<(), CommandError> {
        self.with_state(|s| s.check_connect())?;
        self.send(LinkCommand::Connect(target))
    }

    pub fn disconnect(&self) -> Result<(), CommandError> {
        self.with_state(|s| s.check_disconnect())?;
        self.send(LinkCommand::Disconnect)
    }

    /// Validate `raw`, quantize it to 0.1 V and send it to the device.
    ///
    /// Returns the quantized setpoint. The applied voltage only changes once
    /// the device acknowledges it.
    pub fn apply_voltage(&self, raw: &str) -> Result<f32, CommandError> {
        let parsed = parse_voltage(raw, self.config.voltage_limits());
        let connected = self.with_state(|s| s.is_connected());
        let voltage = match parsed {
            Some(voltage) if can_apply_voltage(true, connected) => format_voltage(voltage),
            Some(_) => return Err(CommandError::NotConnected),
            None => return Err(CommandError::InvalidVoltage(raw.to_string())),
        };
        self.with_state(|s| s.check_apply_voltage())?;
        self.send(LinkCommand::ApplyVoltage(voltage))?;
        Ok(voltage)
    }

    /// Request the output relay on or off.
    pub fn set_output(&self, on: bool) -> Result<(), CommandError> {
        self.with_state(|s| s.check_set_output())?;
        self.send(LinkCommand::SetOutput(on))
    }

    /// Request the opposite of the current relay state. Returns the requested state.
    pub fn toggle_output(&self) -> Result<bool, CommandError> {
        let on = !self.output_on();
        self.set_output(on)?;
        Ok(on)
    }

    pub fn set_measurement_enabled(&self, enabled: bool) -> Result<(), CommandError> {
        self.with_state(|s| s.check_measurement_enabled(enabled))?;
        self.send(LinkCommand::SetMeasurementEnabled(enabled))
    }

    pub fn status(&self) -> LinkStatus {
        self.with_state(|s| s.status())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.with_state(|s| s.connection().clone())
    }

    pub fn output_on(&self) -> bool {
        self.status().output_on
    }

    pub fn applied_voltage(&self) -> f32 {
        self.status().applied_voltage
    }

    pub fn measurement_enabled(&self) -> bool {
        self.status().measurement_enabled
    }

    /// Last measurement with one decimal, or `--`.
    pub fn measurement_display(&self) -> String {
        self.status().measurement_display()
    }

    /// Copy of the sample window, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.with_state(|s| s.samples())
    }
}

impl Drop for ConverterController {
    fn drop(&mut self) {
        self.channels.request_shutdown();
    }
}
