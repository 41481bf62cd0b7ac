//! Live-state engine.
//!
//! One task owns everything mutable: the live and simulated early-warning
//! reconcilers, the last finalized report, the viewport, the display mode,
//! and the wave animator's cancellation token. Feeds push [`Inbound`]
//! records in, callers send [`Command`]s through an [`EngineHandle`], and
//! readers get immutable [`DisplaySnapshot`]s from a watch channel plus a
//! broadcast of [`RenderFrame`]s for the rendering surface.
//!
//! Every path that deactivates the displayed alert (cancel, timeout,
//! reset, leaving live mode, shutdown) stops the animator in the same
//! step. The staleness timer is only polled while an alert is active.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::gazetteer::Gazetteer;
use crate::ingest::{ConnectionStatus, FeedKind, Inbound};
use crate::models::{EewAlert, SeismicReport};
use crate::reconcile::{EewPhase, EewReconciler, EewState, Transition};
use crate::viewport::{GeoBounds, ViewportController, ViewportTransform, ViewportTransition};
use crate::wave::{Playback, WaveAnimator, WaveFrame};

/// Capacity of the render-frame broadcast.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the command queue.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// What the display is following.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Live feeds drive the display
    #[default]
    Live,
    /// An externally selected historical report
    Manual,
    /// Injected alerts drive the display
    Simulation,
}

impl DisplayMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Manual => "manual",
            Self::Simulation => "simulation",
        }
    }
}

impl std::str::FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "manual" => Ok(Self::Manual),
            "simulation" | "sim" => Ok(Self::Simulation),
            _ => Err(format!("unknown mode: {s} (expected: live, manual, simulation)")),
        }
    }
}

/// Connectivity of both feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeedStatuses {
    pub report: ConnectionStatus,
    pub eew: ConnectionStatus,
}

/// Everything the display shows, as of one update.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DisplaySnapshot {
    pub mode: DisplayMode,
    pub phase: EewPhase,
    pub eew: EewState,
    pub report: Option<SeismicReport>,
    pub feeds: FeedStatuses,
    pub viewport: ViewportTransform,
    /// Geographic extent `viewport` shows
    pub bounds: GeoBounds,
    /// Wave playback is running
    pub playing: bool,
}

/// What the rendering surface receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderFrame {
    Display(DisplaySnapshot),
    Viewport(ViewportTransition),
    Waves(WaveFrame),
}

impl RenderFrame {
    /// The serialized `kind` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Display(_) => "display",
            Self::Viewport(_) => "viewport",
            Self::Waves(_) => "waves",
        }
    }
}

/// Requests from outside the engine task.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode(DisplayMode),
    /// Clear the displayed alert (and manual selection)
    Reset,
    /// Show a historical report; switches to manual mode
    ShowReport(Box<SeismicReport>),
    /// Feed the simulation reconciler
    Simulate(Box<EewAlert>),
}

/// Cloneable access to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<DisplaySnapshot>,
    frames: broadcast::Sender<RenderFrame>,
}

impl EngineHandle {
    /// Current display state.
    #[must_use]
    pub fn snapshot(&self) -> DisplaySnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that wakes on every display change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<DisplaySnapshot> {
        self.snapshots.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RenderFrame> {
        self.frames.subscribe()
    }

    /// Queue a command. Returns `false` if the engine has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub async fn set_mode(&self, mode: DisplayMode) -> bool {
        self.send(Command::SetMode(mode)).await
    }
}

/// The single owner of live state.
pub struct Engine {
    config: EngineConfig,
    mode: DisplayMode,
    live: EewReconciler,
    sim: EewReconciler,
    live_report: Option<SeismicReport>,
    manual_report: Option<SeismicReport>,
    feeds: FeedStatuses,
    viewport: ViewportController,
    animator: Option<WaveAnimator>,
    /// Parent of every animator token; cancelled on shutdown
    playback_cancel: CancellationToken,
    snapshots: watch::Sender<DisplaySnapshot>,
    frames: broadcast::Sender<RenderFrame>,
}

/// Engine clock. Goes through tokio so paused-time tests line up.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig, gazetteer: Gazetteer) -> Self {
        let (snapshots, _) = watch::channel(DisplaySnapshot::default());
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        debug!(places = gazetteer.len(), "gazetteer loaded");

        let engine = Self {
            live: EewReconciler::new(config.eew, gazetteer),
            sim: EewReconciler::new(config.eew, gazetteer),
            viewport: ViewportController::new(config.viewport, gazetteer),
            config,
            mode: DisplayMode::Live,
            live_report: None,
            manual_report: None,
            feeds: FeedStatuses::default(),
            animator: None,
            playback_cancel: CancellationToken::new(),
            snapshots,
            frames,
        };
        engine.snapshots.send_replace(engine.snapshot());
        engine
    }

    /// Run the engine on its own task.
    #[must_use]
    pub fn spawn(
        self,
        inbound: mpsc::Receiver<Inbound>,
        cancel: CancellationToken,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = EngineHandle {
            commands: commands_tx,
            snapshots: self.snapshots.subscribe(),
            frames: self.frames.clone(),
        };
        let task = tokio::spawn(self.run(inbound, commands_rx, cancel));
        (handle, task)
    }

    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) {
        let mut staleness = tokio::time::interval(self.config.eew.check_interval);
        staleness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(mode = self.mode.as_str(), "engine started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command, now()),
                Some(record) = inbound.recv() => self.handle_inbound(record, now()),
                _ = staleness.tick(), if self.alert_active() => self.tick(now()),
            }
        }

        self.playback_cancel.cancel();
        if let Some(mut animator) = self.animator.take() {
            let frames = animator.stop().await;
            debug!(frames, "wave playback joined");
        }
        self.publish();
        info!("engine stopped");
    }

    /// Apply one record from the feeds.
    pub fn handle_inbound(&mut self, record: Inbound, now: Instant) {
        match record {
            Inbound::Status { feed, status } => {
                match feed {
                    FeedKind::Report => self.feeds.report = status,
                    FeedKind::Eew => self.feeds.eew = status,
                }
                if status == ConnectionStatus::Disconnected {
                    debug!(feed = feed.as_str(), "feed marked disconnected");
                }
            }
            Inbound::Report(report) => self.accept_report(report, now),
            Inbound::Alert(alert) => {
                let transition = self.live.apply(&alert, now);
                if self.mode == DisplayMode::Live {
                    self.follow(&transition, now);
                }
            }
        }
        self.publish();
    }

    /// Apply one external command.
    pub fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::SetMode(mode) => self.set_mode(mode, now),
            Command::Reset => {
                self.stop_playback();
                match self.mode {
                    DisplayMode::Live => {
                        self.live.reset(now);
                    }
                    DisplayMode::Simulation => {
                        self.sim.reset(now);
                    }
                    DisplayMode::Manual => self.manual_report = None,
                }
            }
            Command::ShowReport(report) => {
                self.manual_report = Some(*report);
                if self.mode == DisplayMode::Manual {
                    if let Some(report) = self.manual_report.clone() {
                        self.fit(|v| v.fit_report(&report, now));
                    }
                } else {
                    // Switching frames the new selection
                    self.set_mode(DisplayMode::Manual, now);
                }
            }
            Command::Simulate(alert) => {
                let transition = self.sim.apply(&alert, now);
                if self.mode == DisplayMode::Simulation {
                    self.follow(&transition, now);
                }
            }
        }
        self.publish();
    }

    /// Run the staleness check for both reconcilers.
    pub fn tick(&mut self, now: Instant) {
        let live = self.live.check_staleness(now);
        let sim = self.sim.check_staleness(now);

        let shown = match self.mode {
            DisplayMode::Live => live,
            DisplayMode::Simulation => sim,
            DisplayMode::Manual => Transition::Ignored,
        };
        if shown.is_change() {
            self.follow(&shown, now);
            self.publish();
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> DisplaySnapshot {
        let (eew, report) = match self.mode {
            DisplayMode::Live => (self.live.state().clone(), self.live_report.clone()),
            DisplayMode::Simulation => (self.sim.state().clone(), None),
            DisplayMode::Manual => (EewState::default(), self.manual_report.clone()),
        };
        DisplaySnapshot {
            mode: self.mode,
            phase: eew.phase(),
            eew,
            report,
            feeds: self.feeds,
            viewport: self.viewport.transform(),
            bounds: self.viewport.bounds(),
            playing: self.animator.as_ref().is_some_and(WaveAnimator::is_running),
        }
    }

    fn accept_report(&mut self, report: SeismicReport, now: Instant) {
        if self.live_report.as_ref().is_some_and(|r| r.id == report.id) {
            debug!(id = %report.id, "duplicate report ignored");
            return;
        }
        info!(
            id = %report.id,
            hypocenter = %report.hypocenter.name,
            max_intensity = %report.max_intensity,
            "earthquake report received"
        );
        // A live alert keeps the viewport; the report only reframes when idle
        if self.mode == DisplayMode::Live && !self.live.state().active {
            self.fit(|v| v.fit_report(&report, now));
        }
        self.live_report = Some(report);
    }

    /// React to a transition of the displayed reconciler.
    fn follow(&mut self, transition: &Transition, now: Instant) {
        if transition.deactivates() {
            self.stop_playback();
            return;
        }
        if transition.starts_playback() {
            self.start_playback();
        }
        if transition.reframes() {
            let state = self.displayed_state().clone();
            self.fit(|v| v.fit_eew(&state, now));
        }
    }

    /// Whether either reconciler holds an alert the staleness check can expire.
    fn alert_active(&self) -> bool {
        self.live.state().active || self.sim.state().active
    }

    fn set_mode(&mut self, mode: DisplayMode, now: Instant) {
        if mode == self.mode {
            return;
        }
        info!(from = self.mode.as_str(), to = mode.as_str(), "display mode changed");
        self.stop_playback();
        self.mode = mode;

        // Promote whatever the new mode is following
        match mode {
            DisplayMode::Live | DisplayMode::Simulation => {
                let state = self.displayed_state().clone();
                if state.active {
                    self.start_playback();
                    self.fit(|v| v.fit_eew(&state, now));
                } else if mode == DisplayMode::Live {
                    if let Some(report) = self.live_report.clone() {
                        self.fit(|v| v.fit_report(&report, now));
                    }
                }
            }
            DisplayMode::Manual => {
                if let Some(report) = self.manual_report.clone() {
                    self.fit(|v| v.fit_report(&report, now));
                }
            }
        }
    }

    fn displayed_state(&self) -> &EewState {
        match self.mode {
            DisplayMode::Simulation => self.sim.state(),
            _ => self.live.state(),
        }
    }

    fn fit<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ViewportController) -> Option<ViewportTransition>,
    {
        if let Some(transition) = f(&mut self.viewport) {
            let _ = self.frames.send(RenderFrame::Viewport(transition));
        }
    }

    /// (Re)start wave playback for the displayed alert.
    fn start_playback(&mut self) {
        self.stop_playback();

        let state = self.displayed_state();
        let (Some(origin), Some(origin_time)) = (state.epicenter, state.origin_time) else {
            debug!(event_id = %state.event_id, "no epicenter or origin time, skipping playback");
            return;
        };
        let playback = Playback {
            event_id: state.event_id.clone(),
            origin,
            origin_time,
            observer: self.config.observer,
        };

        let frames = self.frames.clone();
        self.animator = Some(WaveAnimator::spawn(
            playback,
            self.config.wave,
            self.playback_cancel.child_token(),
            move |frame| {
                let _ = frames.send(RenderFrame::Waves(frame));
            },
        ));
    }

    fn stop_playback(&mut self) {
        if let Some(animator) = self.animator.take() {
            animator.cancel();
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        let changed = self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                current.clone_from(&snapshot);
                true
            }
        });
        if changed {
            let _ = self.frames.send(RenderFrame::Display(snapshot));
        }
    }
}
