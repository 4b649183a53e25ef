use crate::settings::PwmSettings;

pub const MAX_BRIGHTNESS: u8 = 100;
pub const MAX_PWM: u8 = 255;

/// Brightness percentage to LED driver duty cycle, as agreed with the
/// firmware: `round(255 * (b / 100) ^ gamma)`, mirrored for active-low
/// drivers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PwmMapping {
    gamma: f64,
    inverted: bool,
}

impl Default for PwmMapping {
    fn default() -> Self {
        PwmMapping {
            gamma: 1.0,
            inverted: false,
        }
    }
}

impl From<PwmSettings> for PwmMapping {
    fn from(settings: PwmSettings) -> Self {
        PwmMapping::new(settings.gamma, settings.inverted)
    }
}

impl PwmMapping {
    /// Non-positive or non-finite gamma would break monotonicity and falls
    /// back to a linear curve.
    pub fn new(gamma: f64, inverted: bool) -> Self {
        let gamma = if gamma.is_finite() && gamma > 0.0 { gamma } else { 1.0 };

        PwmMapping { gamma, inverted }
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn pwm_for(&self, brightness: u8) -> u8 {
        let fraction = f64::from(brightness.min(MAX_BRIGHTNESS)) / f64::from(MAX_BRIGHTNESS);
        let duty = (fraction.powf(self.gamma) * f64::from(MAX_PWM)).round() as u8;

        if self.inverted {
            MAX_PWM - duty
        } else {
            duty
        }
    }
}
