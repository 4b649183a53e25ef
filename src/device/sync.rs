use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::{
    audit::AuditLog,
    pwm::PwmMapping,
    reconcile::{Intent, Reconciler},
    state::{DeviceState, Field},
};
use crate::{
    error::{SyncError, TransportError},
    settings::Settings,
    store::{SharedStore, Subscription},
};

#[derive(Clone, Debug, PartialEq)]
pub struct SyncOptions {
    pub state_path: String,
    pub audit_path: String,
    /// Tag stored with audit records, e.g. `dashboard:<email>`
    pub actor: String,
    pub mapping: PwmMapping,
    pub default_on_brightness: u8,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            state_path: "Sensor".to_string(),
            audit_path: "DebugLog".to_string(),
            actor: "dashboard".to_string(),
            mapping: PwmMapping::default(),
            default_on_brightness: 50,
        }
    }
}

impl SyncOptions {
    pub fn from_settings(settings: &Settings, actor: &str) -> Self {
        SyncOptions {
            state_path: settings.device.state_path.clone(),
            audit_path: settings.device.audit_path.clone(),
            actor: actor.to_string(),
            mapping: settings.pwm.into(),
            default_on_brightness: settings.control.default_on_brightness,
        }
    }
}

/// Something the caller may want to re-render for. After any event the
/// current mirror is available from [`Synchronizer::state`].
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    StateChanged(DeviceState),
    WriteAcknowledged { seq: u64 },
    WriteFailed { seq: u64, error: TransportError },
    SubscriptionClosed,
}

#[derive(Debug)]
struct WriteOutcome {
    seq: u64,
    result: Result<(), TransportError>,
}

/// Resolves when the store has answered a dispatched write.
#[derive(Debug)]
pub struct WriteTicket {
    seq: u64,
    rx: oneshot::Receiver<Result<(), TransportError>>,
}

impl WriteTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn acknowledged(self) -> Result<(), SyncError> {
        match self.rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Closed.into()),
        }
    }
}

/// Keeps the local mirror of the device document in step with the store and
/// turns local intents into patches.
///
/// All state lives behind `&mut self`; writes run as spawned tasks and their
/// outcomes are folded back in by [`Synchronizer::next_event`].
pub struct Synchronizer {
    store: SharedStore,
    options: SyncOptions,
    audit: AuditLog,
    reconciler: Reconciler,
    subscription: Option<Subscription>,
    outcomes_tx: mpsc::UnboundedSender<WriteOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<WriteOutcome>,
    writes_in_flight: usize,
}

impl Synchronizer {
    pub fn new(store: SharedStore, options: SyncOptions) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        Synchronizer {
            audit: AuditLog::new(store.clone(), &options.audit_path, &options.actor),
            reconciler: Reconciler::new(options.mapping, options.default_on_brightness),
            store,
            options,
            subscription: None,
            outcomes_tx,
            outcomes_rx,
            writes_in_flight: 0,
        }
    }

    pub fn state(&self) -> &DeviceState {
        self.reconciler.state()
    }

    pub fn has_snapshot(&self) -> bool {
        self.reconciler.has_snapshot()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }

    pub fn is_in_flight(&self, field: Field) -> bool {
        self.reconciler.is_in_flight(field)
    }

    pub fn writes_in_flight(&self) -> usize {
        self.writes_in_flight
    }

    /// (Re)starts the stream of snapshots. Any previous subscription is
    /// dropped; the store delivers the current document again first.
    pub async fn subscribe(&mut self) -> Result<(), SyncError> {
        self.unsubscribe();

        let subscription = self.store.subscribe(&self.options.state_path).await?;
        self.subscription = Some(subscription);
        info!("Subscribed to device state at {}", self.options.state_path);

        Ok(())
    }

    pub fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
            info!("Unsubscribed from device state at {}", self.options.state_path);
        }
    }

    /// Validates `intent` against the current mirror and dispatches the
    /// resulting patch. Rejections are returned immediately and nothing is
    /// sent; the ticket reports the store's answer.
    pub fn apply_local_intent(&mut self, intent: Intent) -> Result<WriteTicket, SyncError> {
        let prepared = self.reconciler.prepare(intent)?;

        let document = match prepared.patch.to_document() {
            Ok(document) => document,
            Err(e) => {
                self.reconciler.on_write_failed(prepared.seq);
                return Err(TransportError::from(e).into());
            }
        };

        debug!("Dispatching write #{} for {:?}: {}", prepared.seq, intent, document);

        let (ticket_tx, ticket_rx) = oneshot::channel();
        let store = self.store.clone();
        let path = self.options.state_path.clone();
        let outcomes_tx = self.outcomes_tx.clone();
        let seq = prepared.seq;

        self.writes_in_flight += 1;

        tokio::spawn(async move {
            let result = store.patch(&path, document).await;

            // The caller may have dropped its ticket
            let _ = ticket_tx.send(result.clone());
            let _ = outcomes_tx.send(WriteOutcome { seq, result });
        });

        if let Some(auto_mode) = prepared.patch.auto_mode {
            self.audit.record_auto_mode(auto_mode);
        }

        Ok(WriteTicket { seq, rx: ticket_rx })
    }

    /// Waits for the next remote change or write outcome and folds it into
    /// the mirror. Snapshots that leave the mirror unchanged are skipped.
    /// Cancel safe.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        loop {
            tokio::select! {
                Some(outcome) = self.outcomes_rx.recv() => {
                    return Some(self.handle_outcome(outcome));
                }
                snapshot = next_snapshot(&mut self.subscription) => {
                    match snapshot {
                        Some(document) => {
                            if let Some(state) = self.merge_snapshot(&document) {
                                return Some(SyncEvent::StateChanged(state));
                            }
                        }
                        None => {
                            error!("Device state subscription at {} ended", self.options.state_path);
                            self.subscription = None;
                            return Some(SyncEvent::SubscriptionClosed);
                        }
                    }
                }
            }
        }
    }

    fn merge_snapshot(&mut self, document: &Value) -> Option<DeviceState> {
        let remote = DeviceState::from_document(document, self.reconciler.mapping());
        let changed = self.reconciler.on_snapshot(remote);

        if changed {
            debug!("Device state is now {:?}", self.reconciler.state());
            Some(self.reconciler.state().clone())
        } else {
            None
        }
    }

    fn handle_outcome(&mut self, outcome: WriteOutcome) -> SyncEvent {
        self.writes_in_flight = self.writes_in_flight.saturating_sub(1);

        match outcome.result {
            Ok(()) => {
                self.reconciler.on_write_acknowledged(outcome.seq);
                debug!("Write #{} acknowledged", outcome.seq);
                SyncEvent::WriteAcknowledged { seq: outcome.seq }
            }
            Err(error) => {
                self.reconciler.on_write_failed(outcome.seq);
                warn!("Write #{} failed: {}", outcome.seq, error);
                SyncEvent::WriteFailed {
                    seq: outcome.seq,
                    error,
                }
            }
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn next_snapshot(subscription: &mut Option<Subscription>) -> Option<Value> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}
