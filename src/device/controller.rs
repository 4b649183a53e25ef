use std::time::{Duration, SystemTime};

use log::{debug, error, info};
use tokio::time::Instant;

use super::{
    edit_buffer::EditBuffer,
    gate::{self, MutationKind},
    pwm::MAX_BRIGHTNESS,
    reconcile::Intent,
    state::{DeviceState, Field},
    sync::{SyncEvent, SyncOptions, Synchronizer, WriteTicket},
};
use crate::{
    error::{Rejection, SyncError, TransportError},
    settings::Settings,
    store::SharedStore,
};

/// How long to wait before subscribing again after the stream ends.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Everything a dashboard needs to draw the light card.
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardView {
    pub state: DeviceState,
    /// Slider position: the in-progress edit if any, else the mirrored value
    pub preview_brightness: u8,
    /// When the last remote change was received
    pub last_updated: Option<SystemTime>,
    /// A write is waiting for the store
    pub busy: bool,
    /// Last write failure, until dismissed
    pub error: Option<String>,
    pub loaded: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ControllerEvent {
    StateChanged,
    Committed { brightness: u8, seq: u64 },
    CommitDropped { brightness: u8, reason: Rejection },
    CommitFailed { brightness: u8, error: TransportError },
    WriteAcknowledged { seq: u64 },
    WriteFailed { seq: u64, error: TransportError },
    SubscriptionClosed,
}

/// Light card logic: routes user input through the mode gate and the edit
/// buffer into the synchronizer, and keeps the view model current.
pub struct LightController {
    sync: Synchronizer,
    buffer: EditBuffer,
    last_updated: Option<SystemTime>,
    error: Option<String>,
    resubscribe_at: Option<Instant>,
}

impl LightController {
    pub fn new(sync: Synchronizer, buffer: EditBuffer) -> Self {
        LightController {
            sync,
            buffer,
            last_updated: None,
            error: None,
            resubscribe_at: None,
        }
    }

    pub fn from_settings(store: SharedStore, settings: &Settings, actor: &str) -> Self {
        LightController::new(
            Synchronizer::new(store, SyncOptions::from_settings(settings, actor)),
            EditBuffer::from_settings(&settings.control),
        )
    }

    pub async fn start(&mut self) -> Result<(), SyncError> {
        self.resubscribe_at = None;
        self.sync.subscribe().await
    }

    pub fn stop(&mut self) {
        self.resubscribe_at = None;
        self.buffer.cancel();
        self.sync.unsubscribe();
    }

    pub fn state(&self) -> &DeviceState {
        self.sync.state()
    }

    pub fn view(&self) -> DashboardView {
        let state = self.sync.state().clone();

        DashboardView {
            preview_brightness: self.buffer.preview().unwrap_or(state.brightness),
            state,
            last_updated: self.last_updated,
            busy: self.sync.writes_in_flight() > 0,
            error: self.error.clone(),
            loaded: self.sync.has_snapshot(),
        }
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn turn_on(&mut self) -> Result<WriteTicket, SyncError> {
        self.sync.apply_local_intent(Intent::TurnOn)
    }

    pub fn turn_off(&mut self) -> Result<WriteTicket, SyncError> {
        self.sync.apply_local_intent(Intent::TurnOff)
    }

    pub fn set_auto_mode(&mut self, auto_mode: bool) -> Result<WriteTicket, SyncError> {
        if auto_mode {
            if let Some(dropped) = self.buffer.cancel() {
                info!("Dropping pending brightness {dropped}, switching to automatic mode");
            }
        }

        self.sync.apply_local_intent(Intent::SetAutoMode(auto_mode))
    }

    fn check_slider(&self, value: u8) -> Result<(), SyncError> {
        gate::check(self.sync.state(), MutationKind::SetBrightness)?;

        if value > MAX_BRIGHTNESS {
            return Err(Rejection::OutOfRange(i64::from(value)).into());
        }

        Ok(())
    }

    /// The slider moved. Only the preview changes until a commit fires.
    pub fn slider_input(&mut self, value: u8) -> Result<(), SyncError> {
        self.check_slider(value)?;
        self.buffer.on_input(value, Instant::now());

        Ok(())
    }

    pub fn slider_press(&mut self, value: u8) -> Result<(), SyncError> {
        self.check_slider(value)?;
        self.buffer.on_press(value, Instant::now());

        Ok(())
    }

    /// Pointer released on the control.
    pub fn slider_release(&mut self) -> Result<Option<WriteTicket>, SyncError> {
        match self.buffer.release() {
            Some(brightness) => self.commit(brightness),
            None => Ok(None),
        }
    }

    /// Pointer released anywhere, including outside the control.
    pub fn global_release(&mut self) -> Result<Option<WriteTicket>, SyncError> {
        if !self.buffer.is_active() {
            return Ok(None);
        }

        self.slider_release()
    }

    // A value the mirror already holds is not an error for a slider
    fn commit(&mut self, brightness: u8) -> Result<Option<WriteTicket>, SyncError> {
        match self.sync.apply_local_intent(Intent::SetBrightness(brightness)) {
            Ok(ticket) => Ok(Some(ticket)),
            Err(SyncError::Rejected(Rejection::NoChange)) => {
                self.buffer.set_baseline(brightness);
                Ok(None)
            }
            Err(e) => {
                self.buffer.set_baseline(self.sync.state().brightness);
                Err(e)
            }
        }
    }

    fn commit_due(&mut self) -> Option<ControllerEvent> {
        let brightness = self.buffer.poll_due(Instant::now())?;

        match self.sync.apply_local_intent(Intent::SetBrightness(brightness)) {
            Ok(ticket) => Some(ControllerEvent::Committed {
                brightness,
                seq: ticket.seq(),
            }),
            Err(SyncError::Rejected(reason)) => {
                debug!("Not committing brightness {brightness}: {reason}");
                self.buffer.set_baseline(self.sync.state().brightness);
                Some(ControllerEvent::CommitDropped { brightness, reason })
            }
            Err(SyncError::Transport(error)) => {
                self.buffer.set_baseline(self.sync.state().brightness);
                self.error = Some(error.to_string());
                Some(ControllerEvent::CommitFailed { brightness, error })
            }
        }
    }

    fn handle_sync_event(&mut self, event: SyncEvent) -> ControllerEvent {
        match event {
            SyncEvent::StateChanged(state) => {
                self.last_updated = Some(SystemTime::now());

                if state.auto_mode {
                    if let Some(dropped) = self.buffer.cancel() {
                        info!("Device switched to automatic mode, dropping pending brightness {dropped}");
                    }
                }

                if !self.sync.is_in_flight(Field::Brightness) {
                    self.buffer.set_baseline(state.brightness);
                }

                ControllerEvent::StateChanged
            }
            SyncEvent::WriteAcknowledged { seq } => ControllerEvent::WriteAcknowledged { seq },
            SyncEvent::WriteFailed { seq, error } => {
                self.error = Some(error.to_string());

                // Let the same value be committed again
                if !self.sync.is_in_flight(Field::Brightness) {
                    self.buffer.set_baseline(self.sync.state().brightness);
                }

                ControllerEvent::WriteFailed { seq, error }
            }
            SyncEvent::SubscriptionClosed => {
                self.resubscribe_at = Some(Instant::now() + RESUBSCRIBE_DELAY);
                ControllerEvent::SubscriptionClosed
            }
        }
    }

    // The retry deadline is only cleared once subscribing succeeds, so a
    // cancelled attempt is retried on the next call.
    async fn resubscribe(&mut self) {
        match self.sync.subscribe().await {
            Ok(()) => self.resubscribe_at = None,
            Err(e) => {
                error!("Failed to resubscribe to device state: {e}. Retrying in 5 seconds...");
                self.resubscribe_at = Some(Instant::now() + RESUBSCRIBE_DELAY);
            }
        }
    }

    /// Waits for the next thing that changes what the dashboard shows:
    /// a remote change, a write outcome, or a debounced commit coming due.
    /// A lost subscription is re-established after [`RESUBSCRIBE_DELAY`].
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        loop {
            let deadline = self.buffer.deadline();
            let resubscribe_at = self.resubscribe_at;

            tokio::select! {
                event = self.sync.next_event() => {
                    return event.map(|event| self.handle_sync_event(event));
                }
                _ = sleep_until(deadline) => {
                    if let Some(event) = self.commit_due() {
                        return Some(event);
                    }
                }
                _ = sleep_until(resubscribe_at) => self.resubscribe().await,
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
