use super::state::DeviceState;
use crate::error::Rejection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    SetBrightness,
    SetPowered,
    SetAutoMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    Manual,
    Auto,
}

impl From<&DeviceState> for ControlMode {
    fn from(state: &DeviceState) -> Self {
        if state.auto_mode {
            ControlMode::Auto
        } else {
            ControlMode::Manual
        }
    }
}

/// While the device runs its own sensor loop, only the mode itself may be
/// changed from here.
pub fn check(state: &DeviceState, kind: MutationKind) -> Result<(), Rejection> {
    match (ControlMode::from(state), kind) {
        (ControlMode::Auto, MutationKind::SetBrightness | MutationKind::SetPowered) => {
            Err(Rejection::AutoModeActive)
        }
        _ => Ok(()),
    }
}
