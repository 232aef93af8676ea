//! Scriptable in-memory converter for exercising the link without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::state::ConverterTarget;
use super::task::LinkFactory;
use crate::control::ConverterApi;

pub struct FakeConverter {
    reachable: AtomicBool,
    accept_writes: AtomicBool,
    measurement: Mutex<Option<f32>>,
    probe_delay: Mutex<Duration>,
    measurement_delay: Mutex<Duration>,
    probes: AtomicUsize,
    measurements: AtomicUsize,
    last_setpoint: Mutex<Option<f32>>,
    last_output: Mutex<Option<bool>>,
    last_target: Mutex<Option<ConverterTarget>>,
}

impl FakeConverter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(true),
            accept_writes: AtomicBool::new(true),
            measurement: Mutex::new(Some(0.0)),
            probe_delay: Mutex::new(Duration::ZERO),
            measurement_delay: Mutex::new(Duration::ZERO),
            probes: AtomicUsize::new(0),
            measurements: AtomicUsize::new(0),
            last_setpoint: Mutex::new(None),
            last_output: Mutex::new(None),
            last_target: Mutex::new(None),
        })
    }

    /// Factory handing out this converter for every target.
    pub fn factory(self: &Arc<Self>) -> Arc<LinkFactory> {
        let fake = self.clone();
        Arc::new(move |target: &ConverterTarget| -> Result<Arc<dyn ConverterApi>, String> {
            *fake.last_target.lock().unwrap() = Some(target.clone());
            Ok(fake.clone() as Arc<dyn ConverterApi>)
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_accept_writes(&self, accept: bool) {
        self.accept_writes.store(accept, Ordering::SeqCst);
    }

    pub fn set_measurement(&self, voltage: Option<f32>) {
        *self.measurement.lock().unwrap() = voltage;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = delay;
    }

    pub fn set_measurement_delay(&self, delay: Duration) {
        *self.measurement_delay.lock().unwrap() = delay;
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.load(Ordering::SeqCst)
    }

    pub fn last_setpoint(&self) -> Option<f32> {
        *self.last_setpoint.lock().unwrap()
    }

    pub fn last_output(&self) -> Option<bool> {
        *self.last_output.lock().unwrap()
    }

    pub fn last_target(&self) -> Option<ConverterTarget> {
        self.last_target.lock().unwrap().clone()
    }
}

impl ConverterApi for FakeConverter {
    fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock().unwrap();
        thread::sleep(delay);
        self.reachable.load(Ordering::SeqCst)
    }

    fn set_voltage(&self, voltage: f32) -> bool {
        *self.last_setpoint.lock().unwrap() = Some(voltage);
        self.accept_writes.load(Ordering::SeqCst)
    }

    fn set_output(&self, on: bool) -> bool {
        *self.last_output.lock().unwrap() = Some(on);
        self.accept_writes.load(Ordering::SeqCst)
    }

    fn get_measurement(&self) -> Option<f32> {
        self.measurements.fetch_add(1, Ordering::SeqCst);
        let delay = *self.measurement_delay.lock().unwrap();
        thread::sleep(delay);
        *self.measurement.lock().unwrap()
    }
}
