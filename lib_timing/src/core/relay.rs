//! # Relay Router
//!
//! Keyed, bidirectional message multiplexer between car-side devices and
//! their pit crews. Each (track, car, direction) pair owns one bounded
//! queue; many conversations share the router without sharing queues.
//!
//! Queue capacity is small and fixed on purpose: a full queue blocks the
//! producer until the consumer drains, which is backpressure, not loss.
//! Closed queues are never resurrected — the next send or receive replaces
//! the binding and starts a fresh FIFO sequence.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::bus::EventBus;
use crate::core::events::{EventKind, RaceEvent};

/// Which way a binding carries traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayDirection {
    /// Car-originated telemetry and events, consumed by the pit crew.
    CarToPit,
    /// Pit-originated commands, consumed by the car-side device.
    PitToCar,
}

/// Per-call relay failures. These never affect other bindings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The live binding was created under a different authentication key.
    #[error("mismatched key")]
    MismatchedKey,
    /// A pit command carried none of the known payload shapes.
    #[error("unable to determine target car")]
    UnableToDetermineTarget,
    /// The queue closed while the message was in flight.
    #[error("relay queue closed")]
    Closed,
}

/// Opaque relayed payload, addressed to one car.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub car: String,
    pub body: Value,
}

/// Pit-originated command envelope. Exactly one of the sub-payloads is
/// expected to be present; the router reads nothing but the addressed car
/// number out of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PitCommand {
    pub message: Option<DriverNote>,
    pub target_set: Option<TargetSet>,
    pub fast_lap_reset: Option<CarRef>,
    pub reboot: Option<CarRef>,
    pub fuel_set: Option<FuelSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverNote {
    pub car_number: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSet {
    pub car_number: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarRef {
    pub car_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelSet {
    pub car_number: String,
    pub liters: f64,
}

impl PitCommand {
    /// The car this command addresses, from whichever sub-payload is
    /// present. An empty envelope is a per-call fatal error.
    pub fn target_car(&self) -> Result<&str, RelayError> {
        if let Some(note) = &self.message {
            return Ok(&note.car_number);
        }
        if let Some(targets) = &self.target_set {
            return Ok(&targets.car_number);
        }
        if let Some(reset) = &self.fast_lap_reset {
            return Ok(&reset.car_number);
        }
        if let Some(reboot) = &self.reboot {
            return Ok(&reboot.car_number);
        }
        if let Some(fuel) = &self.fuel_set {
            return Ok(&fuel.car_number);
        }
        Err(RelayError::UnableToDetermineTarget)
    }
}

struct Binding {
    /// Key adopted at creation (keyed send) or on the first keyed send after
    /// a receiver created the binding.
    key: Option<String>,
    sender: mpsc::Sender<RelayMessage>,
    /// Receiver parked here until a consumer claims it.
    receiver: Option<mpsc::Receiver<RelayMessage>>,
}

impl Binding {
    fn new(capacity: usize, key: Option<String>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            key,
            sender,
            receiver: Some(receiver),
        }
    }
}

type BindingKey = (String, String, RelayDirection);

/// The shared relay state: one binding table per direction, multiplexed in
/// a single map keyed by (track, car, direction).
pub struct RelayRouter {
    bindings: Mutex<HashMap<BindingKey, Binding>>,
    capacity: usize,
    bus: Arc<EventBus>,
}

impl RelayRouter {
    /// Builds a router and couples it to the bus: a `RaceDisconnected`
    /// event closes every binding of that track.
    pub fn new(bus: Arc<EventBus>, capacity: usize) -> Arc<Self> {
        let router = Arc::new(Self {
            bindings: Mutex::new(HashMap::new()),
            capacity,
            bus: Arc::clone(&bus),
        });

        let weak: Weak<RelayRouter> = Arc::downgrade(&router);
        bus.register(&[EventKind::RaceDisconnected], None, move |event| {
            if let Some(router) = weak.upgrade() {
                router.close_track(event.track());
            }
        });
        router
    }

    /// Queues a message on the (track, car, direction) binding.
    ///
    /// A missing binding is created and bound to `key`. A live binding with
    /// a different key is rejected — that smells like hijack or misrouting.
    /// A closed binding is replaced transparently, any key: the previous
    /// conversation is over and this is a fresh connection. Blocks while the
    /// queue is full.
    pub async fn send(
        &self,
        track: &str,
        car: &str,
        key: &str,
        direction: RelayDirection,
        message: RelayMessage,
    ) -> Result<(), RelayError> {
        let mut fresh_car_endpoint = false;
        let sender = {
            let mut bindings = self.bindings.lock().expect("relay lock poisoned");
            let slot = bindings.entry((track.to_string(), car.to_string(), direction));
            match slot {
                Entry::Vacant(vacant) => {
                    let binding = Binding::new(self.capacity, Some(key.to_string()));
                    let sender = binding.sender.clone();
                    vacant.insert(binding);
                    fresh_car_endpoint = direction == RelayDirection::CarToPit;
                    sender
                }
                Entry::Occupied(mut occupied) => {
                    if occupied.get().sender.is_closed() {
                        log::debug!(
                            "relay binding {}/{} {:?} closed, replacing",
                            track,
                            car,
                            direction
                        );
                        let binding = Binding::new(self.capacity, Some(key.to_string()));
                        let sender = binding.sender.clone();
                        occupied.insert(binding);
                        fresh_car_endpoint = direction == RelayDirection::CarToPit;
                        sender
                    } else {
                        let binding = occupied.get_mut();
                        match &binding.key {
                            None => binding.key = Some(key.to_string()),
                            Some(bound) if bound != key => return Err(RelayError::MismatchedKey),
                            Some(_) => {}
                        }
                        binding.sender.clone()
                    }
                }
            }
        };

        if fresh_car_endpoint {
            // A car endpoint starting (or restarting) a conversation is the
            // connection-lifecycle signal the rest of the pipeline keys on.
            self.bus.emit(RaceEvent::CarConnected {
                track: track.to_string(),
                car: car.to_string(),
            });
        }

        sender.send(message).await.map_err(|_| RelayError::Closed)
    }

    /// Claims the consuming end of the (track, car, direction) binding.
    ///
    /// The first receive on a binding takes its parked receiver. A later
    /// receive replaces the binding wholesale — sequential consumers are
    /// supported by replacement, never by concurrent fan-out — and the
    /// replacement starts unkeyed, to be claimed by the next keyed send.
    pub fn receive(
        &self,
        track: &str,
        car: &str,
        direction: RelayDirection,
    ) -> mpsc::Receiver<RelayMessage> {
        let mut bindings = self.bindings.lock().expect("relay lock poisoned");
        let slot = bindings.entry((track.to_string(), car.to_string(), direction));
        match slot {
            Entry::Vacant(vacant) => {
                let mut binding = Binding::new(self.capacity, None);
                let receiver = binding.receiver.take().expect("fresh binding has receiver");
                vacant.insert(binding);
                receiver
            }
            Entry::Occupied(mut occupied) => {
                if let Some(receiver) = occupied.get_mut().receiver.take() {
                    receiver
                } else {
                    let mut binding = Binding::new(self.capacity, None);
                    let receiver = binding.receiver.take().expect("fresh binding has receiver");
                    occupied.insert(binding);
                    receiver
                }
            }
        }
    }

    /// Closes every binding belonging to a track. Consumers observe their
    /// queue ending; the next send or receive creates fresh bindings.
    pub fn close_track(&self, track: &str) {
        let mut bindings = self.bindings.lock().expect("relay lock poisoned");
        let before = bindings.len();
        bindings.retain(|(bound_track, _, _), _| bound_track != track);
        let closed = before - bindings.len();
        if closed > 0 {
            log::info!("closed {} relay bindings for track {}", closed, track);
        }
    }

    /// Number of live bindings, for diagnostics.
    pub fn binding_count(&self) -> usize {
        self.bindings.lock().expect("relay lock poisoned").len()
    }
}
