//! Hardware capability traits and the sysfs GPIO backend.
//!
//! The orchestrator only ever talks to [`SignalLamp`] and [`PushButton`];
//! the sysfs implementations below are what the appliance wires them to.
//! Tests substitute the mock implementations at the same seam.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::errors::CopyResult;

/// An indicator lamp: steady on/off plus background blinking.
///
/// `blink` replaces any running pattern; `repeats = None` blinks until the
/// next call.
pub trait SignalLamp: Send + Sync {
    fn on(&self);
    fn off(&self);
    fn blink(&self, on_time: Duration, off_time: Duration, repeats: Option<u32>);
}

/// A momentary push button.
///
/// A press surfaces through `is_pressed` immediately and through `is_held`
/// once it has stayed asserted past the hold threshold.
pub trait PushButton: Send + Sync {
    fn is_pressed(&self) -> bool;
    fn is_held(&self) -> bool;
    /// Blocks until the button is released or the timeout elapses.
    fn wait_for_release(&self, timeout: Duration);
}

// ============================================================================
// Sysfs GPIO implementations
// ============================================================================

const GPIO_ROOT: &str = "/sys/class/gpio";

fn sysfs_export(pin: u32, direction: &str) -> CopyResult<PathBuf> {
    let base = PathBuf::from(GPIO_ROOT);
    let pin_dir = base.join(format!("gpio{pin}"));
    if !pin_dir.exists() {
        std::fs::write(base.join("export"), pin.to_string())?;
    }
    // the kernel creates the attribute files asynchronously after export
    let deadline = Instant::now() + Duration::from_millis(500);
    while !pin_dir.join("direction").exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::fs::write(pin_dir.join("direction"), direction)?;
    Ok(pin_dir.join("value"))
}

fn write_level(value_path: &std::path::Path, high: bool) {
    let _ = std::fs::write(value_path, if high { "1" } else { "0" });
}

/// Lamp driven through `/sys/class/gpio`. Blinking runs on a background
/// task owned by the lamp; a new command aborts the previous pattern.
pub struct SysfsLamp {
    value_path: PathBuf,
    blink_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SysfsLamp {
    pub fn new(pin: u32) -> CopyResult<Self> {
        let value_path = sysfs_export(pin, "out")?;
        write_level(&value_path, false);
        Ok(Self {
            value_path,
            blink_task: Mutex::new(None),
        })
    }

    fn stop_blink(&self) {
        if let Some(task) = self.blink_task.lock().take() {
            task.abort();
        }
    }
}

impl SignalLamp for SysfsLamp {
    fn on(&self) {
        self.stop_blink();
        write_level(&self.value_path, true);
    }

    fn off(&self) {
        self.stop_blink();
        write_level(&self.value_path, false);
    }

    fn blink(&self, on_time: Duration, off_time: Duration, repeats: Option<u32>) {
        self.stop_blink();
        let value_path = self.value_path.clone();
        let task = tokio::spawn(async move {
            let mut remaining = repeats;
            loop {
                match remaining {
                    Some(0) => break,
                    Some(ref mut n) => *n -= 1,
                    None => {}
                }
                write_level(&value_path, true);
                tokio::time::sleep(on_time).await;
                write_level(&value_path, false);
                tokio::time::sleep(off_time).await;
            }
        });
        *self.blink_task.lock() = Some(task);
    }
}

impl Drop for SysfsLamp {
    fn drop(&mut self) {
        self.stop_blink();
        write_level(&self.value_path, false);
    }
}

/// Button read through `/sys/class/gpio`. Wired active-low (pressed pulls
/// the line to ground against an internal pull-up).
pub struct SysfsButton {
    value_path: PathBuf,
    hold_threshold: Duration,
    pressed_since: Mutex<Option<Instant>>,
}

impl SysfsButton {
    pub fn new(pin: u32, hold_threshold: Duration) -> CopyResult<Self> {
        let value_path = sysfs_export(pin, "in")?;
        Ok(Self {
            value_path,
            hold_threshold,
            pressed_since: Mutex::new(None),
        })
    }

    fn read_raw(&self) -> bool {
        match std::fs::read_to_string(&self.value_path) {
            Ok(contents) => contents.trim() == "0",
            Err(_) => false,
        }
    }

    /// Reads the line and keeps the press-start timestamp current.
    fn sample(&self) -> bool {
        let pressed = self.read_raw();
        let mut since = self.pressed_since.lock();
        if pressed {
            if since.is_none() {
                *since = Some(Instant::now());
            }
        } else {
            *since = None;
        }
        pressed
    }
}

impl PushButton for SysfsButton {
    fn is_pressed(&self) -> bool {
        self.sample()
    }

    fn is_held(&self) -> bool {
        if !self.sample() {
            return false;
        }
        self.pressed_since
            .lock()
            .map_or(false, |since| since.elapsed() >= self.hold_threshold)
    }

    fn wait_for_release(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.sample() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

// ============================================================================
// Test doubles
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum LampCommand {
        On,
        Off,
        Blink {
            on_ms: u64,
            off_ms: u64,
            repeats: Option<u32>,
        },
    }

    /// Records every command; clones share the same log.
    #[derive(Clone, Default)]
    pub struct MockLamp {
        commands: Arc<Mutex<Vec<LampCommand>>>,
    }

    impl MockLamp {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn commands(&self) -> Vec<LampCommand> {
            self.commands.lock().clone()
        }

        pub fn last(&self) -> Option<LampCommand> {
            self.commands.lock().last().cloned()
        }
    }

    impl SignalLamp for MockLamp {
        fn on(&self) {
            self.commands.lock().push(LampCommand::On);
        }

        fn off(&self) {
            self.commands.lock().push(LampCommand::Off);
        }

        fn blink(&self, on_time: Duration, off_time: Duration, repeats: Option<u32>) {
            self.commands.lock().push(LampCommand::Blink {
                on_ms: on_time.as_millis() as u64,
                off_ms: off_time.as_millis() as u64,
                repeats,
            });
        }
    }

    /// Button whose state the test sets directly.
    #[derive(Clone, Default)]
    pub struct MockButton {
        state: Arc<Mutex<(bool, bool)>>,
    }

    impl MockButton {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, pressed: bool, held: bool) {
            *self.state.lock() = (pressed, held);
        }

        pub fn release(&self) {
            self.set(false, false);
        }
    }

    impl PushButton for MockButton {
        fn is_pressed(&self) -> bool {
            self.state.lock().0
        }

        fn is_held(&self) -> bool {
            self.state.lock().1
        }

        fn wait_for_release(&self, timeout: Duration) {
            let deadline = Instant::now() + timeout;
            while self.state.lock().0 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}
