//! Link task: the single writer of `LinkState`.
//!
//! Each loop iteration:
//! 1) Compute the next deadline (Failed revert or sampler tick).
//! 2) `select4` waits for: a shutdown request, an operator command, a
//!    finished device request, or the deadline.
//! 3) Commands mutate state and dispatch device requests to worker threads;
//!    results come back as `LinkEvent`s tagged with the session or sampler
//!    generation they were issued for.

use embassy_futures::select::{Either4, select4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::TrySendError;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use std::cell::RefCell;
use std::sync::Arc;
use std::thread;

use super::state::{ConverterTarget, LinkState};
use crate::control::ConverterApi;

/// Depth of the operator command channel (controller -> link task).
pub const LINK_COMMAND_QUEUE_SIZE: usize = 16;
/// Bounded channel carrying operator commands to the link task.
pub type LinkCommandQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, LinkCommand, LINK_COMMAND_QUEUE_SIZE>;

/// Depth of the device result channel (workers -> link task). At most one
/// probe, one write of each kind and one measurement are outstanding.
pub const LINK_EVENT_QUEUE_SIZE: usize = 16;
/// Bounded channel carrying device results back to the link task.
pub type LinkEventQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_SIZE>;

/// State shared between the link task (writer) and readers.
pub type SharedLinkState = embassy_sync::blocking_mutex::Mutex<CriticalSectionRawMutex, RefCell<LinkState>>;

/// Builds the device client for one connection attempt.
pub type LinkFactory = dyn Fn(&ConverterTarget) -> Result<Arc<dyn ConverterApi>, String> + Send + Sync;

/// Concurrently running link tasks across all controllers.
pub const LINK_TASK_POOL_SIZE: usize = 32;

/// Operator commands, already validated by the controller.
#[derive(Debug)]
pub enum LinkCommand {
    Connect(ConverterTarget),
    Disconnect,
    /// Quantized setpoint to send.
    ApplyVoltage(f32),
    SetOutput(bool),
    SetMeasurementEnabled(bool),
}

/// Results posted by device worker threads.
#[derive(Debug)]
pub enum LinkEvent {
    ProbeFinished { session: u64, reachable: bool },
    VoltageApplied { session: u64, voltage: f32, accepted: bool },
    OutputSwitched { session: u64, on: bool, accepted: bool },
    MeasurementRead { generation: u64, voltage: Option<f32> },
}

/// Everything one link task listens on. Shared by the controller, the task
/// and its device workers; freed when the last of them lets go.
pub struct LinkChannels {
    commands: LinkCommandQueue,
    events: LinkEventQueue,
    shutdown: Signal<CriticalSectionRawMutex, ()>,
}

impl LinkChannels {
    pub fn new() -> Self {
        Self {
            commands: LinkCommandQueue::new(),
            events: LinkEventQueue::new(),
            shutdown: Signal::new(),
        }
    }

    /// Queue an operator command without waiting.
    pub fn try_send_command(&self, command: LinkCommand) -> Result<(), TrySendError<LinkCommand>> {
        self.commands.try_send(command)
    }

    /// Ask the link task to return. Never blocks and never fails.
    pub fn request_shutdown(&self) {
        self.shutdown.signal(());
    }

    /// Hand a device result to the link task, waiting for room in the queue.
    ///
    /// Only called from worker threads; every result must arrive or the
    /// pending flag it clears would stay set.
    fn deliver(&self, event: LinkEvent) {
        embassy_futures::block_on(self.events.send(event));
    }
}

impl Default for LinkChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Long-lived task owning the converter link.
///
/// # Parameters
///
/// * `state` - Shared state container, written only from here
/// * `factory` - Creates the device client when a connection attempt starts
/// * `channels` - Commands, device results and the shutdown signal
#[embassy_executor::task(pool_size = LINK_TASK_POOL_SIZE)]
pub async fn link_task(state: Arc<SharedLinkState>, factory: Arc<LinkFactory>, channels: Arc<LinkChannels>) {
    log::info!("Link task started");

    // Device client scoped to the current connection attempt
    let mut device: Option<Arc<dyn ConverterApi>> = None;

    loop {
        let deadline = state
            .lock(|s| s.borrow().next_deadline())
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        match select4(
            channels.shutdown.wait(),
            channels.commands.receive(),
            channels.events.receive(),
            Timer::at(deadline),
        )
        .await
        {
            Either4::First(()) => {
                log::info!("Link task shutting down");
                return;
            }
            Either4::Second(command) => handle_command(command, &state, factory.as_ref(), &mut device, &channels),
            Either4::Third(event) => handle_event(event, &state),
            Either4::Fourth(_) => handle_deadline(&state, device.as_ref(), &channels),
        }
    }
}

fn handle_command(
    command: LinkCommand,
    state: &SharedLinkState,
    factory: &LinkFactory,
    device: &mut Option<Arc<dyn ConverterApi>>,
    channels: &Arc<LinkChannels>,
) {
    let now = Instant::now();
    match command {
        LinkCommand::Connect(target) => {
            let session = match state.lock(|s| s.borrow_mut().begin_connect(target.clone())) {
                Ok(session) => session,
                Err(e) => {
                    log::debug!("Ignoring connect to {}: {}", target, e);
                    return;
                }
            };
            log::info!("Connecting to {}", target);

            match factory(&target) {
                Ok(link) => {
                    *device = Some(link.clone());
                    dispatch(
                        "converter-probe",
                        channels,
                        state,
                        move || LinkEvent::ProbeFinished {
                            session,
                            reachable: link.probe(),
                        },
                        LinkEvent::ProbeFinished { session, reachable: false },
                    );
                }
                Err(e) => {
                    log::warn!("Cannot create client for {}: {}", target, e);
                    *device = None;
                    handle_event(LinkEvent::ProbeFinished { session, reachable: false }, state);
                }
            }
        }
        LinkCommand::Disconnect => match state.lock(|s| s.borrow_mut().disconnect(now)) {
            Ok(()) => {
                *device = None;
                log::info!("Disconnected");
            }
            Err(e) => log::debug!("Ignoring disconnect: {}", e),
        },
        LinkCommand::ApplyVoltage(voltage) => {
            let session = match state.lock(|s| s.borrow_mut().begin_apply_voltage(voltage)) {
                Ok(session) => session,
                Err(e) => {
                    log::debug!("Ignoring set-voltage {}: {}", voltage, e);
                    return;
                }
            };
            let failed = LinkEvent::VoltageApplied {
                session,
                voltage,
                accepted: false,
            };
            match device.clone() {
                Some(link) => dispatch(
                    "converter-set-voltage",
                    channels,
                    state,
                    move || LinkEvent::VoltageApplied {
                        session,
                        voltage,
                        accepted: link.set_voltage(voltage),
                    },
                    failed,
                ),
                None => handle_event(failed, state),
            }
        }
        LinkCommand::SetOutput(on) => {
            let session = match state.lock(|s| s.borrow_mut().begin_set_output(on)) {
                Ok(session) => session,
                Err(e) => {
                    log::debug!("Ignoring set-output {}: {}", on, e);
                    return;
                }
            };
            let failed = LinkEvent::OutputSwitched { session, on, accepted: false };
            match device.clone() {
                Some(link) => dispatch(
                    "converter-set-output",
                    channels,
                    state,
                    move || LinkEvent::OutputSwitched {
                        session,
                        on,
                        accepted: link.set_output(on),
                    },
                    failed,
                ),
                None => handle_event(failed, state),
            }
        }
        LinkCommand::SetMeasurementEnabled(enabled) => {
            match state.lock(|s| s.borrow_mut().set_measurement_enabled(enabled, now)) {
                Ok(()) => log::info!("Measurement {}", if enabled { "enabled" } else { "disabled" }),
                Err(e) => log::debug!("Ignoring measurement toggle: {}", e),
            }
        }
    }
}

fn handle_event(event: LinkEvent, state: &SharedLinkState) {
    let now = Instant::now();
    match event {
        LinkEvent::ProbeFinished { session, reachable } => {
            let applied = state.lock(|s| {
                let mut s = s.borrow_mut();
                let applied = s.finish_probe(session, reachable, now);
                (applied, s.connection().clone())
            });
            match applied {
                (true, connection) => log::info!("{}", connection),
                (false, _) => log::debug!("Discarding stale probe result (session {})", session),
            }
        }
        LinkEvent::VoltageApplied { session, voltage, accepted } => {
            if !state.lock(|s| s.borrow_mut().finish_apply_voltage(session, voltage, accepted)) {
                log::debug!("Discarding stale set-voltage result (session {})", session);
            } else if accepted {
                log::info!("Output voltage set to {:.1} V", voltage);
            } else {
                log::warn!("Set-voltage {:.1} V failed", voltage);
            }
        }
        LinkEvent::OutputSwitched { session, on, accepted } => {
            if !state.lock(|s| s.borrow_mut().finish_set_output(session, on, accepted)) {
                log::debug!("Discarding stale set-output result (session {})", session);
            } else if accepted {
                log::info!("Output switched {}", if on { "on" } else { "off" });
            } else {
                log::warn!("Switching output {} failed", if on { "on" } else { "off" });
            }
        }
        LinkEvent::MeasurementRead { generation, voltage } => {
            if !state.lock(|s| s.borrow_mut().record_measurement(generation, voltage, now)) && voltage.is_some() {
                log::debug!("Measurement not recorded (generation {})", generation);
            }
        }
    }
}

fn handle_deadline(state: &SharedLinkState, device: Option<&Arc<dyn ConverterApi>>, channels: &Arc<LinkChannels>) {
    let now = Instant::now();
    let (reverted, due) = state.lock(|s| {
        let mut s = s.borrow_mut();
        (s.revert_failed(now), s.on_sampler_tick(now))
    });

    if reverted {
        log::info!("Connection failure cleared, link is disconnected");
    }

    if let Some(generation) = due {
        let failed = LinkEvent::MeasurementRead { generation, voltage: None };
        match device.cloned() {
            Some(link) => dispatch(
                "converter-measure",
                channels,
                state,
                move || LinkEvent::MeasurementRead {
                    generation,
                    voltage: link.get_measurement(),
                },
                failed,
            ),
            None => handle_event(failed, state),
        }
    }
}

/// Run a blocking device request on its own thread and deliver its result.
///
/// `fallback` is applied right away if the thread cannot be started.
fn dispatch<F>(name: &str, channels: &Arc<LinkChannels>, state: &SharedLinkState, job: F, fallback: LinkEvent)
where
    F: FnOnce() -> LinkEvent + Send + 'static,
{
    let channels = channels.clone();
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || channels.deliver(job()));
    if let Err(e) = spawned {
        log::error!("Failed to start {} worker: {}", name, e);
        handle_event(fallback, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LinkConfig;
    use std::time::Duration as StdDuration;

    fn measurement(generation: u64) -> LinkEvent {
        LinkEvent::MeasurementRead {
            generation,
            voltage: Some(48.0),
        }
    }

    #[test]
    fn worker_result_waits_for_room_instead_of_dropping() {
        let channels = Arc::new(LinkChannels::new());
        for generation in 0..LINK_EVENT_QUEUE_SIZE as u64 {
            channels.events.try_send(measurement(generation)).expect("queue has room");
        }

        let worker_channels = channels.clone();
        let worker = thread::spawn(move || worker_channels.deliver(measurement(99)));
        thread::sleep(StdDuration::from_millis(50));
        assert!(!worker.is_finished());

        assert!(channels.events.try_receive().is_ok());
        worker.join().expect("worker finishes");
        assert_eq!(channels.events.len(), LINK_EVENT_QUEUE_SIZE);

        let mut last = None;
        while let Ok(LinkEvent::MeasurementRead { generation, .. }) = channels.events.try_receive() {
            last = Some(generation);
        }
        assert_eq!(last, Some(99));
    }

    #[test]
    fn measurement_result_clears_in_flight_tick() {
        let state = SharedLinkState::new(RefCell::new(LinkState::new(&LinkConfig::default())));
        let target = ConverterTarget::new("converter.local", 80).expect("valid target");
        let generation = state.lock(|s| {
            let mut s = s.borrow_mut();
            let session = s.begin_connect(target).expect("disconnected");
            s.finish_probe(session, true, Instant::from_millis(0));
            s.set_measurement_enabled(true, Instant::from_millis(0)).expect("connected");
            s.on_sampler_tick(Instant::from_millis(100)).expect("tick due")
        });

        handle_event(measurement(generation), &state);

        let next = state.lock(|s| s.borrow_mut().on_sampler_tick(Instant::from_millis(200)));
        assert_eq!(next, Some(generation));
        assert_eq!(state.lock(|s| s.borrow().samples().len()), 1);
    }
}
