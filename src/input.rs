//! Edge-triggered button events.
//!
//! The control loop re-samples button level every tick; turning the sampled
//! level into explicit edges here means a press is acted on exactly once no
//! matter how many loop iterations it spans.

use std::sync::Arc;

use crate::hal::PushButton;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Rising edge.
    Pressed,
    /// The press crossed the hold threshold. At most once per press.
    Held,
    /// Falling edge. `was_held` distinguishes a short press from the tail
    /// of a hold.
    Released { was_held: bool },
}

/// Per-button sampler state machine.
pub struct ButtonEvents {
    button: Arc<dyn PushButton>,
    was_pressed: bool,
    held_this_press: bool,
}

impl ButtonEvents {
    pub fn new(button: Arc<dyn PushButton>) -> Self {
        Self {
            button,
            was_pressed: false,
            held_this_press: false,
        }
    }

    /// Samples the button once and returns the edges crossed since the last
    /// poll, in occurrence order.
    pub fn poll(&mut self) -> Vec<ButtonEvent> {
        let pressed = self.button.is_pressed();
        let mut events = Vec::new();

        if pressed && !self.was_pressed {
            self.held_this_press = false;
            events.push(ButtonEvent::Pressed);
        }
        if pressed && !self.held_this_press && self.button.is_held() {
            self.held_this_press = true;
            events.push(ButtonEvent::Held);
        }
        if !pressed && self.was_pressed {
            events.push(ButtonEvent::Released {
                was_held: self.held_this_press,
            });
            self.held_this_press = false;
        }

        self.was_pressed = pressed;
        events
    }
}
