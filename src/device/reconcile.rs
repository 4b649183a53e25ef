//! The local mirror of the device document and the bookkeeping of writes
//! that have been dispatched but not yet acknowledged.
//!
//! The mirror is always the last remote snapshot with the values of in-flight
//! writes laid over it. An in-flight entry belongs to exactly one write
//! (identified by its sequence number); a newer write of the same field
//! replaces it, and an acknowledgment or failure only settles entries it
//! still owns.

use super::{
    gate::{self, MutationKind},
    patch::{DeviceStatePatch, ServerTimestamp},
    pwm::{PwmMapping, MAX_BRIGHTNESS},
    state::{DeviceState, Field},
};
use crate::error::Rejection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    TurnOn,
    TurnOff,
    SetBrightness(u8),
    SetAutoMode(bool),
}

impl Intent {
    pub fn kind(&self) -> MutationKind {
        match self {
            Intent::TurnOn | Intent::TurnOff => MutationKind::SetPowered,
            Intent::SetBrightness(_) => MutationKind::SetBrightness,
            Intent::SetAutoMode(_) => MutationKind::SetAutoMode,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct InFlight<T> {
    seq: u64,
    value: T,
    /// A snapshot has shown the store holding `value`
    echoed: bool,
}

impl<T> InFlight<T> {
    fn new(seq: u64, value: T) -> Self {
        InFlight {
            seq,
            value,
            echoed: false,
        }
    }
}

fn settle<T>(slot: &mut Option<InFlight<T>>, seq: u64) {
    if matches!(slot, Some(in_flight) if in_flight.seq == seq) {
        *slot = None;
    }
}

fn mark_echo<T: PartialEq>(slot: &mut Option<InFlight<T>>, remote: &T) {
    if let Some(in_flight) = slot {
        if in_flight.value == *remote {
            in_flight.echoed = true;
        }
    }
}

// The value an acknowledged write leaves in the store, unless a snapshot
// already reported it (later snapshots may have superseded it since).
fn acknowledged_value<T: Copy>(slot: &Option<InFlight<T>>, seq: u64) -> Option<T> {
    match slot {
        Some(in_flight) if in_flight.seq == seq && !in_flight.echoed => Some(in_flight.value),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreparedWrite {
    pub seq: u64,
    pub patch: DeviceStatePatch,
}

#[derive(Debug)]
pub struct Reconciler {
    mapping: PwmMapping,
    default_on_brightness: u8,

    remote: DeviceState,
    mirror: DeviceState,
    received_snapshot: bool,

    powered: Option<InFlight<bool>>,
    brightness: Option<InFlight<u8>>,
    auto_mode: Option<InFlight<bool>>,

    // Restored when turning on a light whose brightness is 0
    last_lit_brightness: Option<u8>,
    next_seq: u64,
}

impl Reconciler {
    pub fn new(mapping: PwmMapping, default_on_brightness: u8) -> Self {
        Reconciler {
            mapping,
            default_on_brightness: default_on_brightness.clamp(1, MAX_BRIGHTNESS),
            remote: DeviceState::default(),
            mirror: DeviceState::default(),
            received_snapshot: false,
            powered: None,
            brightness: None,
            auto_mode: None,
            last_lit_brightness: None,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.mirror
    }

    pub fn mapping(&self) -> &PwmMapping {
        &self.mapping
    }

    pub fn has_snapshot(&self) -> bool {
        self.received_snapshot
    }

    pub fn is_in_flight(&self, field: Field) -> bool {
        match field {
            Field::Powered => self.powered.is_some(),
            Field::Brightness => self.brightness.is_some(),
            Field::AutoMode => self.auto_mode.is_some(),
        }
    }

    pub fn has_in_flight(&self) -> bool {
        self.powered.is_some() || self.brightness.is_some() || self.auto_mode.is_some()
    }

    /// Validates `intent` against the current mirror and, if accepted,
    /// records it as in flight and returns the patch to send. This is the
    /// last point before dispatch, so the mode gate is evaluated here.
    pub fn prepare(&mut self, intent: Intent) -> Result<PreparedWrite, Rejection> {
        gate::check(&self.mirror, intent.kind())?;

        let mut builder = DeviceStatePatch::builder();

        match intent {
            Intent::TurnOn => {
                if self.mirror.powered {
                    return Err(Rejection::NoChange);
                }

                builder.powered(true);

                if self.mirror.brightness == 0 {
                    let brightness = self.last_lit_brightness.unwrap_or(self.default_on_brightness);
                    builder
                        .brightness(brightness)
                        .pwm_value(self.mapping.pwm_for(brightness));
                }
            }
            Intent::TurnOff => {
                if !self.mirror.powered {
                    return Err(Rejection::NoChange);
                }

                builder.powered(false);
            }
            Intent::SetBrightness(brightness) => {
                if brightness > MAX_BRIGHTNESS {
                    return Err(Rejection::OutOfRange(i64::from(brightness)));
                }
                if brightness == self.mirror.brightness {
                    return Err(Rejection::NoChange);
                }

                builder
                    .brightness(brightness)
                    .pwm_value(self.mapping.pwm_for(brightness));
            }
            Intent::SetAutoMode(auto_mode) => {
                if auto_mode == self.mirror.auto_mode {
                    return Err(Rejection::NoChange);
                }

                builder.auto_mode(auto_mode);
            }
        }

        let patch = builder.last_changed_at(ServerTimestamp::now()).build();

        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(value) = patch.powered {
            self.powered = Some(InFlight::new(seq, value));
        }
        if let Some(value) = patch.brightness {
            self.brightness = Some(InFlight::new(seq, value));
        }
        if let Some(value) = patch.auto_mode {
            self.auto_mode = Some(InFlight::new(seq, value));
        }

        self.rebuild_mirror();

        Ok(PreparedWrite { seq, patch })
    }

    /// Replaces the remote copy. Returns whether the mirror changed (the
    /// first snapshot always counts as a change).
    pub fn on_snapshot(&mut self, remote: DeviceState) -> bool {
        let first = !self.received_snapshot;
        self.received_snapshot = true;

        mark_echo(&mut self.powered, &remote.powered);
        mark_echo(&mut self.brightness, &remote.brightness);
        mark_echo(&mut self.auto_mode, &remote.auto_mode);
        self.remote = remote;

        self.rebuild_mirror() || first
    }

    /// The store accepted write `seq`. If its echo has not been seen yet,
    /// the fields it still owns become part of the remote copy so the mirror
    /// holds the value until the echo arrives. Once the echo has been seen the
    /// latest snapshot stays authoritative, including writes by other clients
    /// that landed after ours. Returns whether the mirror changed.
    pub fn on_write_acknowledged(&mut self, seq: u64) -> bool {
        if let Some(powered) = acknowledged_value(&self.powered, seq) {
            self.remote.powered = powered;
        }
        if let Some(brightness) = acknowledged_value(&self.brightness, seq) {
            self.remote.set_brightness(brightness, &self.mapping);
        }
        if let Some(auto_mode) = acknowledged_value(&self.auto_mode, seq) {
            self.remote.auto_mode = auto_mode;
        }

        self.settle(seq)
    }

    /// The store refused write `seq` (or it never left). Fields it still
    /// owns fall back to the remote value. Returns whether the mirror changed.
    pub fn on_write_failed(&mut self, seq: u64) -> bool {
        self.settle(seq)
    }

    fn settle(&mut self, seq: u64) -> bool {
        settle(&mut self.powered, seq);
        settle(&mut self.brightness, seq);
        settle(&mut self.auto_mode, seq);

        self.rebuild_mirror()
    }

    fn rebuild_mirror(&mut self) -> bool {
        let mut mirror = self.remote.clone();

        if let Some(powered) = self.powered {
            mirror.powered = powered.value;
        }
        if let Some(brightness) = self.brightness {
            mirror.set_brightness(brightness.value, &self.mapping);
        }
        if let Some(auto_mode) = self.auto_mode {
            mirror.auto_mode = auto_mode.value;
        }

        if mirror.brightness > 0 {
            self.last_lit_brightness = Some(mirror.brightness);
        }

        let changed = mirror != self.mirror;
        self.mirror = mirror;

        changed
    }
}
