use cdc::types::Record;
use chrono::{DateTime, Utc};
use rand::Rng;

/// Produces plausible battery readings for a fixed fleet of vehicles.
#[derive(Debug)]
pub struct ReadingGenerator<R> {
    rng: R,
    devices: usize,
    next_device: usize,
}

impl<R: Rng> ReadingGenerator<R> {
    pub fn new(rng: R, devices: usize) -> Self {
        Self {
            rng,
            devices: devices.max(1),
            next_device: 0,
        }
    }

    /// Returns a reading for the next vehicle, cycling through the fleet.
    pub fn next_reading(&mut self, entry_time: DateTime<Utc>) -> Record {
        let device = self.next_device;
        self.next_device = (self.next_device + 1) % self.devices;

        let voltage = self.rng.gen_range(44.0f32..52.0);
        let current = self.rng.gen_range(0.0f32..10.0);

        Record {
            id: vehicle_id(device),
            entry_time,
            voltage,
            current,
            capacity: self.rng.gen_range(0.0f32..100.0),
            power: (voltage * current).round() as i32,
            temperature: self.rng.gen_range(15.0f32..45.0),
            soc: self.rng.gen_range(0..=100),
            internal_resistance: self.rng.gen_range(0.1f32..0.5),
        }
    }
}

pub fn vehicle_id(device: usize) -> String {
    format!("vehicle-{device:04}")
}
