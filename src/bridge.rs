use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;

use crate::{
    cache::{CircuitSnapshot, StateCache},
    channel::CommandChannel,
    config::Config,
    defs::{Circuit, CommandTable, Field, Mode},
    queue::{CacheSlot, Command, CommandError, CommandQueue},
};

/* === Definitions === */

/// Mediates between API-facing callers and the command queue.
///
/// Holds the per-circuit command tables and setpoint limits from the
/// configuration, validates requests and translates them into queued
/// commands. Cheap to clone, all state is shared.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    queue: CommandQueue,
    cache: Arc<StateCache>,
    circuits: Vec<CircuitHandle>,
}

struct CircuitHandle {
    circuit: Circuit,
    table: CommandTable,
    min_setpoint: f32,
    max_setpoint: f32,
    off_value: f32,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("circuit {0} is not configured")]
    UnknownCircuit(Circuit),

    #[error("{field} cannot be read from the device")]
    NotReadable { field: Field },

    #[error("{field} cannot be written")]
    NotWritable { field: Field },

    #[error("value {value} is outside the allowed {min}..={max}")]
    OutOfRange { value: f32, min: f32, max: f32 },

    #[error("{value} is not an operating mode of this circuit")]
    UnknownMode { value: f32 },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/* == Public API == */

impl Bridge {
    pub fn new(config: &Config, channel: Arc<dyn CommandChannel>) -> Self {
        let circuits: Vec<_> = config
            .circuits
            .iter()
            .map(|circuit| CircuitHandle {
                circuit: circuit.circuit,
                table: circuit.command_table(),
                min_setpoint: circuit.min_setpoint,
                max_setpoint: circuit.max_setpoint,
                off_value: circuit.off_value(),
            })
            .collect();

        let cache = Arc::new(StateCache::new(circuits.iter().map(|handle| handle.circuit)));
        let queue = CommandQueue::new(channel, cache.clone());

        Self {
            inner: Arc::new(Inner {
                queue,
                cache,
                circuits,
            }),
        }
    }

    pub fn circuits(&self) -> impl Iterator<Item = Circuit> + '_ {
        self.inner.circuits.iter().map(|handle| handle.circuit)
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.depth()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.queue.is_draining()
    }

    pub fn snapshot(&self, circuit: Circuit) -> Result<CircuitSnapshot, BridgeError> {
        self.inner
            .cache
            .snapshot(circuit)
            .ok_or(BridgeError::UnknownCircuit(circuit))
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.inner.cache.snapshots()
    }

    /// Last known value, straight from the cache.
    pub fn cached(&self, circuit: Circuit, field: Field) -> Result<f32, BridgeError> {
        self.inner
            .cache
            .get(circuit, field)
            .ok_or(BridgeError::UnknownCircuit(circuit))
    }

    /// Reads a field from the device, updating the cache on the way.
    pub async fn read_fresh(&self, circuit: Circuit, field: Field) -> Result<f32, BridgeError> {
        let handle = self.inner.handle(circuit)?;

        let target = handle
            .table
            .read_target(field)
            .ok_or(BridgeError::NotReadable { field })?;

        let command = Command::read(target).with_update(CacheSlot { circuit, field });

        let value = self
            .inner
            .queue
            .request(command)
            .await
            .map_err(|_| CommandError::Aborted)??;

        Ok(value)
    }

    /// Writes the room temperature setpoint after validating it against the
    /// configured limits.
    pub async fn set_target_temperature(
        &self,
        circuit: Circuit,
        value: f32,
    ) -> Result<(), BridgeError> {
        let handle = self.inner.handle(circuit)?;

        if !value.is_finite() || value < handle.min_setpoint || value > handle.max_setpoint {
            return Err(BridgeError::OutOfRange {
                value,
                min: handle.min_setpoint,
                max: handle.max_setpoint,
            });
        }

        self.write(handle, Field::TargetTemperature, value).await
    }

    /// Switches the circuit on or off. Off maps to the configured raw
    /// value, which by default keeps hot water running on HK1.
    pub async fn set_target_mode(&self, circuit: Circuit, mode: Mode) -> Result<(), BridgeError> {
        let handle = self.inner.handle(circuit)?;

        self.write(handle, Field::TargetMode, mode.to_raw(handle.off_value))
            .await
    }

    /// The controller only reports degrees Celsius, so the unit never
    /// reaches the device and anything but Celsius (0) is rejected.
    pub fn set_display_unit(&self, circuit: Circuit, value: f32) -> Result<(), BridgeError> {
        self.inner.handle(circuit)?;

        if value != 0. {
            return Err(BridgeError::OutOfRange {
                value,
                min: 0.,
                max: 0.,
            });
        }

        self.inner.cache.store(circuit, Field::DisplayUnit, value);

        Ok(())
    }

    /// Writes a raw value to any writable field. The typed setters are
    /// preferred, this is the escape hatch for the command line. Their
    /// validation still applies here: an operating mode number must be
    /// one the circuit actually uses.
    pub async fn write_raw(
        &self,
        circuit: Circuit,
        field: Field,
        value: f32,
    ) -> Result<(), BridgeError> {
        match field {
            Field::TargetMode => {
                let mode = self.parse_raw_mode(circuit, value)?;
                self.set_target_mode(circuit, mode).await
            }

            Field::TargetTemperature => self.set_target_temperature(circuit, value).await,
            Field::DisplayUnit => self.set_display_unit(circuit, value),

            _ => {
                let handle = self.inner.handle(circuit)?;
                self.write(handle, field, value).await
            }
        }
    }

    /// Reads every observed field of the circuit and waits for the batch,
    /// returning the refreshed snapshot. Individual failures are logged and
    /// the affected slots keep their previous value.
    pub async fn refresh_circuit(&self, circuit: Circuit) -> Result<CircuitSnapshot, BridgeError> {
        let handle = self.inner.handle(circuit)?;

        let receivers: Vec<_> = handle
            .table
            .observed_fields()
            .filter_map(|field| {
                let target = handle.table.read_target(field)?;
                let command = Command::read(target).with_update(CacheSlot { circuit, field });

                Some(self.inner.queue.request(command))
            })
            .collect();

        for result in join_all(receivers).await {
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::warn!("Refresh command failed: {err}"),
                Err(_) => tracing::warn!("Refresh command aborted"),
            }
        }

        self.snapshot(circuit)
    }

    /// Queues a read of every observed field on every circuit without
    /// waiting for completion. Results land in the cache as they arrive.
    pub fn enqueue_refresh(&self) {
        for handle in &self.inner.circuits {
            for field in handle.table.observed_fields() {
                if let Some(target) = handle.table.read_target(field) {
                    let command = Command::read(target).with_update(CacheSlot {
                        circuit: handle.circuit,
                        field,
                    });

                    self.inner.queue.submit(command);
                }
            }
        }
    }

    /// Maps a raw number back to the external mode, accepting only the
    /// two values the circuit ever writes: its off value and 2 (heating).
    fn parse_raw_mode(&self, circuit: Circuit, value: f32) -> Result<Mode, BridgeError> {
        let handle = self.inner.handle(circuit)?;

        if value == handle.off_value {
            Ok(Mode::Off)
        } else if value == Mode::Heat.to_raw(handle.off_value) {
            Ok(Mode::Heat)
        } else {
            Err(BridgeError::UnknownMode { value })
        }
    }

    async fn write(
        &self,
        handle: &CircuitHandle,
        field: Field,
        value: f32,
    ) -> Result<(), BridgeError> {
        let target = handle
            .table
            .write_target(field)
            .ok_or(BridgeError::NotWritable { field })?;

        let command = Command::write(target, value).with_update(CacheSlot {
            circuit: handle.circuit,
            field,
        });

        self.inner
            .queue
            .request(command)
            .await
            .map_err(|_| CommandError::Aborted)??;

        Ok(())
    }
}

impl Inner {
    fn handle(&self, circuit: Circuit) -> Result<&CircuitHandle, BridgeError> {
        self.circuits
            .iter()
            .find(|handle| handle.circuit == circuit)
            .ok_or(BridgeError::UnknownCircuit(circuit))
    }
}

/* === Tests === */
