use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{EnumCount, IntoEnumIterator};

use crate::defs::{Circuit, Field, Mode};

/* === Definitions === */

/// Last known state of every registered circuit.
///
/// Reads never block and never touch the device. Slots are seeded with
/// plausible defaults at startup and overwritten by the drain loop as
/// command results come back. Values are stored as raw `f32` bits, so
/// readers and the loop need no locking.
pub struct StateCache {
    entries: Vec<(Circuit, CircuitEntry)>,
}

pub struct CircuitEntry {
    values: [AtomicU32; Field::COUNT],
    updated: AtomicI64,
}

/// Point-in-time copy of one circuit, as served over the API.
#[derive(Clone, Debug, Serialize)]
pub struct CircuitSnapshot {
    pub circuit: Circuit,
    pub mode: Mode,
    pub current_mode: f32,
    pub target_mode: f32,
    pub current_temperature: f32,
    pub target_temperature: f32,
    pub display_unit: f32,
    pub updated_at: Option<DateTime<Utc>>,
}

/* == Public API == */

impl StateCache {
    pub fn new(circuits: impl IntoIterator<Item = Circuit>) -> Self {
        Self {
            entries: circuits
                .into_iter()
                .map(|circuit| (circuit, CircuitEntry::new()))
                .collect(),
        }
    }

    pub fn circuits(&self) -> impl Iterator<Item = Circuit> + '_ {
        self.entries.iter().map(|(circuit, _)| *circuit)
    }

    pub fn get(&self, circuit: Circuit, field: Field) -> Option<f32> {
        self.entry(circuit).map(|entry| entry.get(field))
    }

    /// Write-through destination for completed commands. Results for
    /// circuits that are not registered are dropped.
    pub fn store(&self, circuit: Circuit, field: Field, value: f32) {
        match self.entry(circuit) {
            Some(entry) => entry.set(field, value),
            None => tracing::debug!("Dropping result for unregistered circuit {circuit}"),
        }
    }

    pub fn snapshot(&self, circuit: Circuit) -> Option<CircuitSnapshot> {
        self.entry(circuit).map(|entry| entry.snapshot(circuit))
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.entries
            .iter()
            .map(|(circuit, entry)| entry.snapshot(*circuit))
            .collect()
    }

    fn entry(&self, circuit: Circuit) -> Option<&CircuitEntry> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == circuit)
            .map(|(_, entry)| entry)
    }
}

impl CircuitEntry {
    fn new() -> Self {
        let mut seeds = [0.; Field::COUNT];

        for field in Field::iter() {
            seeds[field as usize] = field.seeded_default();
        }

        Self {
            values: seeds.map(|value| AtomicU32::new(value.to_bits())),
            updated: AtomicI64::new(0),
        }
    }

    pub fn get(&self, field: Field) -> f32 {
        f32::from_bits(self.values[field as usize].load(Ordering::Relaxed))
    }

    pub fn set(&self, field: Field, value: f32) {
        self.values[field as usize].store(value.to_bits(), Ordering::Relaxed);
        self.updated
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time of the last device round trip, `None` before the first one.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self.updated.load(Ordering::Relaxed) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    fn snapshot(&self, circuit: Circuit) -> CircuitSnapshot {
        let current_mode = self.get(Field::CurrentMode);

        CircuitSnapshot {
            circuit,
            mode: Mode::from_raw(current_mode),
            current_mode,
            target_mode: self.get(Field::TargetMode),
            current_temperature: self.get(Field::CurrentTemperature),
            target_temperature: self.get(Field::TargetTemperature),
            display_unit: self.get(Field::DisplayUnit),
            updated_at: self.updated_at(),
        }
    }
}

/* === Tests === */
