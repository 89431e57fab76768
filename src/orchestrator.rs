//! The copy orchestration state machine.
//!
//! One control task owns all mutable state and converts button edges and
//! background completion events into transitions. Background tasks talk
//! back exclusively through one-way channels, so no locking is needed on
//! this path. The awaited phase-1 copy is the single deliberate suspension
//! of the loop.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::errors::{CopyError, CopyResult};
use crate::hal::PushButton;
use crate::indicators::{ErrorCode, IndicatorPanel};
use crate::input::{ButtonEvent, ButtonEvents};
use crate::power;
use crate::progress::{self, ProgressSample};
use crate::space::{Admission, CapacityGuard, DiskSpace};
use crate::transfer::{CancelOutcome, TransferExecutor, TransferSession};
use crate::verify::{self, TransferOutcome, Verifier};
use crate::volumes::{VolumeDescriptor, VolumeResolver, VolumeRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    ReadyToCopy,
    Copying,
    CheckingTransfer,
    Complete,
    Incomplete,
}

/// The four operator buttons, already wired to hardware (or mocks).
pub struct Buttons {
    pub go: Arc<dyn PushButton>,
    pub cancel: Arc<dyn PushButton>,
    pub eject: Arc<dyn PushButton>,
    pub power: Arc<dyn PushButton>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    resolver: VolumeResolver,
    guard: CapacityGuard,
    executor: TransferExecutor,
    verifier: Verifier,
    space: Arc<dyn DiskSpace>,
    panel: IndicatorPanel,
    go: ButtonEvents,
    cancel: ButtonEvents,
    eject: ButtonEvents,
    power: ButtonEvents,
    state: SystemState,
    /// Volumes admitted while ReadyToCopy, consumed on confirmation.
    ready: Option<(VolumeDescriptor, VolumeDescriptor)>,
    session: Option<TransferSession>,
    progress_rx: Option<mpsc::UnboundedReceiver<ProgressSample>>,
    outcome_rx: Option<oneshot::Receiver<CopyResult<TransferOutcome>>>,
    pending_flash: Option<ErrorCode>,
    last_mount_check: Option<Instant>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        space: Arc<dyn DiskSpace>,
        panel: IndicatorPanel,
        buttons: Buttons,
    ) -> Self {
        Self {
            resolver: VolumeResolver::new(&config),
            guard: CapacityGuard::new(space.clone()),
            executor: TransferExecutor::new(config.clone()),
            verifier: Verifier::new(config.clone()),
            space,
            panel,
            go: ButtonEvents::new(buttons.go),
            cancel: ButtonEvents::new(buttons.cancel),
            eject: ButtonEvents::new(buttons.eject),
            power: ButtonEvents::new(buttons.power),
            state: SystemState::Idle,
            ready: None,
            session: None,
            progress_rx: None,
            outcome_rx: None,
            pending_flash: None,
            last_mount_check: None,
            config,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub async fn run(&mut self) {
        info!("appliance ready, state: {:?}", self.state);
        self.panel.apply_state(self.state);
        loop {
            tokio::time::sleep(self.config.poll_interval()).await;
            self.tick().await;
        }
    }

    /// One control-loop iteration. Everything here is non-blocking except
    /// the transitions that are specified as synchronous (phase-1 copy,
    /// cancel grace wait).
    pub async fn tick(&mut self) {
        let prev = self.state;

        self.handle_input().await;
        self.service_session();
        self.poll_verification();
        self.refresh_mount_lamps();

        if self.state != prev {
            info!("state: {:?} -> {:?}", prev, self.state);
            self.panel.apply_state(self.state);
        }
        if let Some(code) = self.pending_flash.take() {
            self.panel
                .flash_error(code, self.state == SystemState::Incomplete);
        }

        if self.state == SystemState::Copying {
            self.drain_copy_feedback();
        }
    }

    async fn handle_input(&mut self) {
        for event in self.cancel.poll() {
            if event == ButtonEvent::Held {
                self.handle_cancel().await;
            }
        }

        for event in self.go.poll() {
            match (self.state, event) {
                (SystemState::Idle, ButtonEvent::Pressed) => self.prepare_copy(),
                (SystemState::ReadyToCopy, ButtonEvent::Pressed) => self.begin_copy().await,
                (SystemState::Complete, ButtonEvent::Pressed) => {
                    info!("transfer acknowledged");
                    self.state = SystemState::Idle;
                }
                (SystemState::Incomplete, ButtonEvent::Held) => {
                    info!("incomplete transfer acknowledged");
                    self.state = SystemState::Idle;
                }
                _ => {}
            }
        }

        let eject_events = self.eject.poll();
        for event in eject_events {
            self.handle_eject(event).await;
        }

        for event in self.power.poll() {
            if event == ButtonEvent::Held {
                self.handle_power().await;
            }
        }
    }

    /// Checks volumes and capacity; on success arms the confirmation step.
    fn prepare_copy(&mut self) {
        match self.try_prepare() {
            Ok((source, dest)) => {
                info!(
                    "ready to copy {} -> {}",
                    source.path.display(),
                    dest.path.display()
                );
                self.ready = Some((source, dest));
                self.state = SystemState::ReadyToCopy;
            }
            Err(err) => {
                warn!("cannot prepare copy: {err}");
                self.pending_flash = ErrorCode::for_error(&err);
                self.ready = None;
                self.state = SystemState::Idle;
            }
        }
    }

    fn try_prepare(&self) -> CopyResult<(VolumeDescriptor, VolumeDescriptor)> {
        let source = self.resolver.resolve_source()?;
        let dest = self.resolver.resolve_destination()?;
        match self.guard.admit(&source.path, &dest.path)? {
            Admission::Ready {
                required,
                available,
            } => {
                debug!("admission: need {required} bytes, {available} free");
                Ok((source, dest))
            }
            Admission::InsufficientSpace {
                required,
                available,
            } => Err(CopyError::InsufficientSpace {
                required,
                available,
            }),
        }
    }

    /// Confirmation: runs phase 1 to completion, then goes live on phase 2
    /// with its drain and progress tasks.
    async fn begin_copy(&mut self) {
        let Some((source, dest)) = self.ready.take() else {
            self.state = SystemState::Idle;
            return;
        };

        info!(
            "copying {} -> {}",
            source.path.display(),
            dest.path.display()
        );
        match self.executor.start(&source.path, &dest.path).await {
            Ok(session) => {
                self.progress_rx = Some(progress::monitor(
                    self.space.clone(),
                    source.path.clone(),
                    dest.path.clone(),
                    session.alive_handle(),
                    self.config.progress_interval(),
                ));
                self.session = Some(session);
                self.state = SystemState::Copying;
            }
            Err(err) => {
                error!("could not start transfer: {err}");
                self.pending_flash = ErrorCode::for_error(&err);
                self.state = SystemState::Idle;
            }
        }
    }

    /// Sustained cancel press. During Copying this aborts the session; a
    /// cancelled session is never verified. Anywhere else it just returns
    /// to Idle.
    async fn handle_cancel(&mut self) {
        if self.state == SystemState::Copying {
            info!("cancel requested");
            if let Some(mut session) = self.session.take() {
                match self.executor.cancel(&mut session).await {
                    CancelOutcome::Terminated => info!("copy process terminated"),
                    CancelOutcome::TimeoutExceeded => {
                        warn!("copy process did not terminate within the grace period");
                        self.pending_flash = Some(ErrorCode::CancelTimeout);
                    }
                }
            }
            self.progress_rx = None;
            self.outcome_rx = None;
            self.state = SystemState::Incomplete;
        } else {
            self.ready = None;
            self.state = SystemState::Idle;
        }
    }

    async fn handle_eject(&mut self, event: ButtonEvent) {
        if matches!(
            self.state,
            SystemState::Copying | SystemState::CheckingTransfer
        ) {
            return;
        }

        match event {
            ButtonEvent::Pressed => {
                if self.state == SystemState::ReadyToCopy {
                    self.ready = None;
                    self.state = SystemState::Idle;
                }
            }
            // hold ejects the destination, a short press the source
            ButtonEvent::Held => power::eject(&self.resolver, VolumeRole::Destination).await,
            ButtonEvent::Released { was_held: false } => {
                power::eject(&self.resolver, VolumeRole::Source).await
            }
            ButtonEvent::Released { was_held: true } => {}
        }
    }

    async fn handle_power(&mut self) {
        if matches!(
            self.state,
            SystemState::Copying | SystemState::CheckingTransfer
        ) {
            return;
        }
        match power::power_off(&self.resolver).await {
            Ok(true) => {}
            Ok(false) => info!("power off refused; eject all volumes first"),
            Err(err) => error!("power off failed: {err}"),
        }
    }

    /// Detects the end of the phase-2 process and hands the session over
    /// to background verification.
    fn service_session(&mut self) {
        if self.state != SystemState::Copying {
            return;
        }
        let finished = matches!(&self.session, Some(s) if !s.is_alive());
        if !finished {
            return;
        }
        if let Some(mut session) = self.session.take() {
            info!("copy process finished, checking transfer");
            while let Some(line) = session.try_output_line() {
                debug!("rsync: {}", line.trim_end());
            }
            self.progress_rx = None;
            self.outcome_rx = Some(verify::spawn_verification(
                self.verifier.clone(),
                session.source.clone(),
                session.dest_save_dir.clone(),
            ));
            self.state = SystemState::CheckingTransfer;
        }
    }

    fn poll_verification(&mut self) {
        if self.state != SystemState::CheckingTransfer {
            return;
        }
        let Some(rx) = self.outcome_rx.as_mut() else {
            error!("checking transfer with no verifier attached");
            self.state = SystemState::Incomplete;
            return;
        };

        match rx.try_recv() {
            Ok(Ok(TransferOutcome::Complete)) => {
                info!("transfer complete; press go to acknowledge");
                self.outcome_rx = None;
                self.state = SystemState::Complete;
            }
            Ok(Ok(TransferOutcome::Incomplete { out_of_sync })) => {
                warn!("transfer incomplete: {out_of_sync} files out of sync; hold go to acknowledge");
                self.outcome_rx = None;
                self.state = SystemState::Incomplete;
            }
            Ok(Err(err)) => {
                error!("verification failed: {err}");
                self.pending_flash = ErrorCode::for_error(&err);
                self.outcome_rx = None;
                self.state = SystemState::Incomplete;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                error!("verifier task ended without a result");
                self.outcome_rx = None;
                self.state = SystemState::Incomplete;
            }
        }
    }

    /// At most one output line and one progress sample per iteration, both
    /// non-blocking; absent data is not an error.
    fn drain_copy_feedback(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Some(line) = session.try_output_line() {
                debug!("rsync: {}", line.trim_end());
            }
        }
        if let Some(rx) = self.progress_rx.as_mut() {
            if let Ok(sample) = rx.try_recv() {
                self.panel.pulse_progress(sample.clamped());
            }
        }
    }

    fn refresh_mount_lamps(&mut self) {
        let due = self
            .last_mount_check
            .map_or(true, |at| at.elapsed() >= self.config.mount_check_interval());
        if !due {
            return;
        }
        self.last_mount_check = Some(Instant::now());
        self.panel.set_mounted(
            self.resolver.present(VolumeRole::Source),
            self.resolver.present(VolumeRole::Destination),
        );
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: SystemState) {
        self.state = state;
    }
}
