//! Lamp patterns for the operator-facing indicator panel.
//!
//! Five lamps carry the whole user interface: status, progress, error, and
//! one presence lamp per volume role. Every state and every failure class
//! has a pattern distinguishable without a screen.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::CopyError;
use crate::hal::SignalLamp;
use crate::orchestrator::SystemState;
use crate::volumes::VolumeRole;

/// Failure classes with a dedicated error-lamp blink code. Ambiguity repeats
/// longer than absence so the two are tellable apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SourceAbsent,
    SourceAmbiguous,
    DestAbsent,
    DestAmbiguous,
    InsufficientSpace,
    ReadFault,
    VerificationParse,
    CancelTimeout,
}

impl ErrorCode {
    pub fn for_error(err: &CopyError) -> Option<ErrorCode> {
        match err {
            CopyError::AbsentVolume {
                role: VolumeRole::Source,
            } => Some(ErrorCode::SourceAbsent),
            CopyError::AbsentVolume {
                role: VolumeRole::Destination,
            } => Some(ErrorCode::DestAbsent),
            CopyError::AmbiguousVolume {
                role: VolumeRole::Source,
                ..
            } => Some(ErrorCode::SourceAmbiguous),
            CopyError::AmbiguousVolume {
                role: VolumeRole::Destination,
                ..
            } => Some(ErrorCode::DestAmbiguous),
            CopyError::InsufficientSpace { .. } => Some(ErrorCode::InsufficientSpace),
            CopyError::SourceRead { .. } | CopyError::DestinationStat { .. } => {
                Some(ErrorCode::ReadFault)
            }
            CopyError::VerificationParse(_) => Some(ErrorCode::VerificationParse),
            CopyError::CancelTimeout => Some(ErrorCode::CancelTimeout),
            _ => None,
        }
    }

    /// (blinks per group, group repeats)
    pub fn pattern(&self) -> (u32, u32) {
        match self {
            ErrorCode::SourceAbsent => (3, 2),
            ErrorCode::SourceAmbiguous => (3, 4),
            ErrorCode::DestAbsent => (4, 2),
            ErrorCode::DestAmbiguous => (4, 4),
            ErrorCode::InsufficientSpace => (5, 2),
            ErrorCode::ReadFault => (6, 2),
            ErrorCode::VerificationParse => (7, 2),
            ErrorCode::CancelTimeout => (8, 2),
        }
    }
}

pub struct IndicatorPanel {
    status: Arc<dyn SignalLamp>,
    progress: Arc<dyn SignalLamp>,
    error: Arc<dyn SignalLamp>,
    source_mounted: Arc<dyn SignalLamp>,
    dest_mounted: Arc<dyn SignalLamp>,
    flash_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    mounted: Mutex<Option<(bool, bool)>>,
}

impl IndicatorPanel {
    pub fn new(
        status: Arc<dyn SignalLamp>,
        progress: Arc<dyn SignalLamp>,
        error: Arc<dyn SignalLamp>,
        source_mounted: Arc<dyn SignalLamp>,
        dest_mounted: Arc<dyn SignalLamp>,
    ) -> Self {
        Self {
            status,
            progress,
            error,
            source_mounted,
            dest_mounted,
            flash_task: Mutex::new(None),
            mounted: Mutex::new(None),
        }
    }

    fn stop_flash(&self) {
        if let Some(task) = self.flash_task.lock().take() {
            task.abort();
        }
    }

    /// Re-renders the whole panel for a state. Cancels any running error
    /// flash since the error lamp is owned by the new state.
    pub fn apply_state(&self, state: SystemState) {
        self.stop_flash();

        match state {
            SystemState::Idle => {
                self.status
                    .blink(Duration::from_millis(100), Duration::from_millis(2900), None);
                self.progress.off();
            }
            SystemState::ReadyToCopy => {
                self.status
                    .blink(Duration::from_secs(1), Duration::from_secs(1), None);
                self.progress.off();
            }
            SystemState::Copying => {
                self.status
                    .blink(Duration::from_millis(250), Duration::from_millis(250), None);
            }
            SystemState::CheckingTransfer => {
                self.status
                    .blink(Duration::from_millis(250), Duration::from_millis(250), None);
                self.progress
                    .blink(Duration::from_millis(250), Duration::from_millis(250), None);
            }
            SystemState::Complete => {
                self.status.on();
                self.progress.on();
            }
            SystemState::Incomplete => {
                self.status.off();
                self.progress.off();
            }
        }

        if state == SystemState::Incomplete {
            self.error.on();
        } else {
            self.error.off();
        }
    }

    /// Flashes an error code on the error lamp: groups of N short blinks,
    /// repeated, with a gap between groups. Replaces any previous flash and
    /// settles the lamp at `resting_on` afterwards.
    pub fn flash_error(&self, code: ErrorCode, resting_on: bool) {
        self.stop_flash();
        let (blinks, repeats) = code.pattern();
        let lamp = self.error.clone();
        let task = tokio::spawn(async move {
            for _ in 0..repeats {
                for _ in 0..blinks {
                    lamp.on();
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    lamp.off();
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            if resting_on {
                lamp.on();
            }
        });
        *self.flash_task.lock() = Some(task);
    }

    /// Pulses the progress lamp ceil(fraction * 10) times out of ten.
    /// `fraction` must already be clamped to [0, 1].
    pub fn pulse_progress(&self, fraction: f64) {
        let pulses = (fraction * 10.0).ceil() as u32;
        if pulses == 0 {
            return;
        }
        self.progress.blink(
            Duration::from_millis(100),
            Duration::from_millis(150),
            Some(pulses),
        );
    }

    /// Updates the presence lamps, writing only on change.
    pub fn set_mounted(&self, source_present: bool, dest_present: bool) {
        let mut mounted = self.mounted.lock();
        if *mounted == Some((source_present, dest_present)) {
            return;
        }
        *mounted = Some((source_present, dest_present));

        if source_present {
            self.source_mounted.on();
        } else {
            self.source_mounted.off();
        }
        if dest_present {
            self.dest_mounted.on();
        } else {
            self.dest_mounted.off();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{LampCommand, MockLamp};

    struct Rig {
        panel: IndicatorPanel,
        status: MockLamp,
        progress: MockLamp,
        error: MockLamp,
        source_mounted: MockLamp,
        dest_mounted: MockLamp,
    }

    fn rig() -> Rig {
        let status = MockLamp::new();
        let progress = MockLamp::new();
        let error = MockLamp::new();
        let source_mounted = MockLamp::new();
        let dest_mounted = MockLamp::new();
        let panel = IndicatorPanel::new(
            Arc::new(status.clone()),
            Arc::new(progress.clone()),
            Arc::new(error.clone()),
            Arc::new(source_mounted.clone()),
            Arc::new(dest_mounted.clone()),
        );
        Rig {
            panel,
            status,
            progress,
            error,
            source_mounted,
            dest_mounted,
        }
    }

    #[tokio::test]
    async fn idle_is_a_slow_status_blip() {
        let rig = rig();
        rig.panel.apply_state(SystemState::Idle);
        assert_eq!(
            rig.status.last(),
            Some(LampCommand::Blink {
                on_ms: 100,
                off_ms: 2900,
                repeats: None
            })
        );
        assert_eq!(rig.progress.last(), Some(LampCommand::Off));
        assert_eq!(rig.error.last(), Some(LampCommand::Off));
    }

    #[tokio::test]
    async fn complete_is_solid_status_and_progress() {
        let rig = rig();
        rig.panel.apply_state(SystemState::Complete);
        assert_eq!(rig.status.last(), Some(LampCommand::On));
        assert_eq!(rig.progress.last(), Some(LampCommand::On));
        assert_eq!(rig.error.last(), Some(LampCommand::Off));
    }

    #[tokio::test]
    async fn incomplete_lights_the_error_lamp() {
        let rig = rig();
        rig.panel.apply_state(SystemState::Incomplete);
        assert_eq!(rig.status.last(), Some(LampCommand::Off));
        assert_eq!(rig.error.last(), Some(LampCommand::On));
    }

    #[tokio::test]
    async fn checking_blinks_status_and_progress_fast() {
        let rig = rig();
        rig.panel.apply_state(SystemState::CheckingTransfer);
        let fast = LampCommand::Blink {
            on_ms: 250,
            off_ms: 250,
            repeats: None,
        };
        assert_eq!(rig.status.last(), Some(fast.clone()));
        assert_eq!(rig.progress.last(), Some(fast));
    }

    #[tokio::test]
    async fn progress_pulses_scale_with_fraction() {
        let rig = rig();
        rig.panel.pulse_progress(0.42);
        assert_eq!(
            rig.progress.last(),
            Some(LampCommand::Blink {
                on_ms: 100,
                off_ms: 150,
                repeats: Some(5)
            })
        );

        rig.panel.pulse_progress(0.0);
        // zero progress adds no pulse command
        assert_eq!(rig.progress.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_flash_runs_the_coded_group_count() {
        let rig = rig();
        rig.panel.flash_error(ErrorCode::SourceAbsent, false);
        // 3 blinks x 2 repeats = 6 on/off pairs
        tokio::time::sleep(Duration::from_secs(4)).await;
        let ons = rig
            .error
            .commands()
            .iter()
            .filter(|c| **c == LampCommand::On)
            .count();
        assert_eq!(ons, 6);
        assert_eq!(rig.error.last(), Some(LampCommand::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn error_flash_can_settle_back_to_solid_on() {
        let rig = rig();
        rig.panel.flash_error(ErrorCode::CancelTimeout, true);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(rig.error.last(), Some(LampCommand::On));
    }

    #[tokio::test]
    async fn mount_lamps_write_only_on_change() {
        let rig = rig();
        rig.panel.set_mounted(true, false);
        rig.panel.set_mounted(true, false);
        rig.panel.set_mounted(true, true);

        assert_eq!(rig.source_mounted.commands(), vec![LampCommand::On]);
        assert_eq!(
            rig.dest_mounted.commands(),
            vec![LampCommand::Off, LampCommand::On]
        );
    }

    #[test]
    fn ambiguity_codes_repeat_longer_than_absence() {
        let (_, absent_reps) = ErrorCode::SourceAbsent.pattern();
        let (_, ambiguous_reps) = ErrorCode::SourceAmbiguous.pattern();
        assert!(ambiguous_reps > absent_reps);

        let (absent_blinks, _) = ErrorCode::DestAbsent.pattern();
        let (source_blinks, _) = ErrorCode::SourceAbsent.pattern();
        assert_ne!(absent_blinks, source_blinks);
    }

    #[test]
    fn every_taxonomy_error_maps_to_a_code() {
        use crate::errors::CopyError;
        let cases = vec![
            CopyError::AbsentVolume {
                role: VolumeRole::Source,
            },
            CopyError::AmbiguousVolume {
                role: VolumeRole::Destination,
                count: 2,
            },
            CopyError::InsufficientSpace {
                required: 2,
                available: 1,
            },
            CopyError::SourceRead {
                path: "/x".into(),
                reason: "bad".into(),
            },
            CopyError::VerificationParse("missing".into()),
            CopyError::CancelTimeout,
        ];
        for err in &cases {
            assert!(ErrorCode::for_error(err).is_some(), "{err}");
        }
    }
}
