pub mod audit;
pub mod controller;
pub mod edit_buffer;
pub mod gate;
pub mod patch;
pub mod pwm;
pub mod reconcile;
pub mod state;
pub mod sync;

pub use controller::{ControllerEvent, DashboardView, LightController};
pub use reconcile::Intent;
pub use state::DeviceState;
pub use sync::{SyncEvent, SyncOptions, Synchronizer, WriteTicket};
