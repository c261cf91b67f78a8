//! Hardware abstraction consumed by the engine
//!
//! The board support crate implements [`Platform`] for its button and LED.
//! Flash access lives in [`crate::storage::Flash`].

use crate::status::{Result, StatusCode};

/// LED patterns the engine asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    On,
    /// Idle heartbeat
    BlinkSlow,
    /// Waiting for a touch
    BlinkFast,
}

/// Button and LED of the device
pub trait Platform {
    /// Block until the button is pressed or `timeout_ms` elapses
    ///
    /// Returns `true` on a press. Implementations that run under a watchdog
    /// must keep feeding it while they wait.
    fn button_wait_press(&mut self, timeout_ms: u32) -> bool;

    fn set_led(&mut self, state: LedState);
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn button_wait_press(&mut self, timeout_ms: u32) -> bool {
        (**self).button_wait_press(timeout_ms)
    }

    fn set_led(&mut self, state: LedState) {
        (**self).set_led(state)
    }
}

/// Ask for a touch, driving the LED while waiting
///
/// The LED is left on after a press and off after a timeout.
pub fn wait_for_user_presence<P: Platform + ?Sized>(
    platform: &mut P,
    timeout_ms: u32,
) -> Result<()> {
    platform.set_led(LedState::BlinkFast);
    if platform.button_wait_press(timeout_ms) {
        platform.set_led(LedState::On);
        Ok(())
    } else {
        platform.set_led(LedState::Off);
        log::warn!("User presence not confirmed within {} ms", timeout_ms);
        Err(StatusCode::UserActionTimeout)
    }
}
