// Module: Engine
// The capture & playback synchronization engine.
//
// All mutable state (live sequence, recording session, playback progress)
// is owned by one actor task. External callers request transitions through
// an EngineHandle; effects leave as EngineEvents, so hosting layers render
// without reaching into engine internals. Suspension points are exclusively
// timers, and every timer is an owned handle that dies with the state that
// armed it.

mod playback;
mod preview;
mod session;
mod timer;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::ErrorCode;
use crate::gateway::{
    ExecuteTestRequest, ExecuteTestResponse, ExecutionGateway, GatewayError,
    RecordedActionsResponse, StartRecordingResponse, StopRecordingResponse,
};
use crate::geometry::{self, RenderGeometry, ScaledBox};
use crate::mapper;
use crate::protocol::{
    same_sequence_shape, DetectedElement, Session, StepResult, StepStatus, TestStep,
};
use crate::timing::EngineTiming;
use crate::validation;

use playback::{PlaybackDriver, PlaybackUpdate};
use preview::PreviewScheduler;
use session::RecordingState;
use timer::TimerHandle;

/// Test name attached to scheduler-triggered preview executions.
pub const PREVIEW_TEST_NAME: &str = "Live Preview";

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+$").expect("valid url regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-facing notification. Session endings are informational, validation
/// problems are warnings, backend failures are errors.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub code: Option<ErrorCode>,
    pub message: String,
}

/// Effects the engine asks its host to render.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The live sequence was replaced wholesale.
    SequenceReplaced(Vec<TestStep>),
    /// The backend re-detected the page's elements.
    ElementsDetected(Vec<DetectedElement>),
    /// Base64 screenshot to display.
    Screenshot(String),
    /// Highlight box for the hovered element, already scaled to the
    /// rendered container (None clears the overlay).
    Highlight(Option<ScaledBox>),
    RecordingStarted { session_id: String },
    RecordingStopped,
    /// A fresh execution's full result list, installed just before playback
    /// starts stepping through it.
    ResultsInstalled(Vec<StepResult>),
    PlaybackStep {
        index: usize,
        total: usize,
        name: String,
        status: StepStatus,
    },
    PlaybackFinished { passed: bool },
    Notice(Notice),
}

/// Point-in-time view of the engine, for hosts and tests.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub recording: bool,
    pub session_id: Option<String>,
    pub sequence_len: usize,
    pub playing: bool,
    pub current_index: Option<usize>,
    pub last_overall: Option<bool>,
    pub preview_pending: bool,
    pub execution_in_flight: bool,
}

enum Msg {
    // External commands.
    UpdateSequence(Vec<TestStep>),
    ClearSequence,
    SetSite { url: String, elements: Vec<DetectedElement> },
    SetRenderGeometry(RenderGeometry),
    Hover { element_id: Option<String> },
    StartRecording { url: String },
    StopRecording,
    RunNow { name: Option<String> },
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown,

    // Timer firings and resolved backend calls, stamped so stale ones are
    // discarded instead of reviving dead state.
    PollTick { epoch: u64 },
    PollResolved { epoch: u64, result: Result<RecordedActionsResponse, GatewayError> },
    StartResolved { epoch: u64, result: Result<StartRecordingResponse, GatewayError> },
    StopResolved { result: Result<StopRecordingResponse, GatewayError> },
    PreviewFire { generation: u64 },
    PlaybackTick { generation: u64 },
    ExecutionResolved { generation: u64, result: Result<ExecuteTestResponse, GatewayError> },
}

/// Cheap cloneable front door to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Msg>,
}

impl EngineHandle {
    pub fn update_sequence(&self, sequence: Vec<TestStep>) {
        self.send(Msg::UpdateSequence(sequence));
    }

    pub fn clear_sequence(&self) {
        self.send(Msg::ClearSequence);
    }

    /// Reports that the hosting layer loaded a target site (and which
    /// elements the backend detected on it).
    pub fn set_site(&self, url: impl Into<String>, elements: Vec<DetectedElement>) {
        self.send(Msg::SetSite { url: url.into(), elements });
    }

    pub fn set_render_geometry(&self, geometry: RenderGeometry) {
        self.send(Msg::SetRenderGeometry(geometry));
    }

    pub fn hover(&self, element_id: Option<String>) {
        self.send(Msg::Hover { element_id });
    }

    pub fn start_recording(&self, url: impl Into<String>) {
        self.send(Msg::StartRecording { url: url.into() });
    }

    pub fn stop_recording(&self) {
        self.send(Msg::StopRecording);
    }

    pub fn run_now(&self, name: Option<String>) {
        self.send(Msg::RunNow { name });
    }

    pub fn shutdown(&self) {
        self.send(Msg::Shutdown);
    }

    /// Round-trips through the actor, so it doubles as a "previous commands
    /// were processed" barrier.
    pub async fn snapshot(&self) -> Option<EngineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Msg::Snapshot(reply));
        rx.await.ok()
    }

    fn send(&self, msg: Msg) {
        let _ = self.tx.send(msg);
    }
}

/// Spawns the engine actor. Returns the command handle, the event stream,
/// and the actor's join handle.
pub fn spawn(
    gateway: Arc<dyn ExecutionGateway>,
    timing: EngineTiming,
) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let engine = Engine {
        gateway,
        preview: PreviewScheduler::new(timing.preview_debounce),
        playback: PlaybackDriver::new(timing.playback_step_delay),
        timing,
        rx,
        tx: tx.clone(),
        events: events_tx,
        sequence: Vec::new(),
        elements: Vec::new(),
        site_url: None,
        render_geometry: None,
        hovered: None,
        recording: RecordingState::Idle,
        epoch: 0,
        exec_generation: 0,
        execution_in_flight: false,
    };
    let task = tokio::spawn(engine.run());

    (EngineHandle { tx }, events_rx, task)
}

struct Engine {
    gateway: Arc<dyn ExecutionGateway>,
    timing: EngineTiming,
    rx: mpsc::UnboundedReceiver<Msg>,
    tx: mpsc::UnboundedSender<Msg>,
    events: mpsc::UnboundedSender<EngineEvent>,

    sequence: Vec<TestStep>,
    elements: Vec<DetectedElement>,
    site_url: Option<String>,
    render_geometry: Option<RenderGeometry>,
    hovered: Option<String>,

    recording: RecordingState,
    epoch: u64,
    preview: PreviewScheduler,
    playback: PlaybackDriver,
    exec_generation: u64,
    execution_in_flight: bool,
}

impl Engine {
    async fn run(mut self) {
        info!("engine started");
        while let Some(msg) = self.rx.recv().await {
            if !self.handle(msg) {
                break;
            }
        }
        info!("engine stopped");
    }

    /// The single transition function; returns false on shutdown.
    fn handle(&mut self, msg: Msg) -> bool {
        match msg {
            Msg::UpdateSequence(sequence) => self.replace_sequence(sequence),
            Msg::ClearSequence => self.replace_sequence(Vec::new()),
            Msg::SetSite { url, elements } => self.on_set_site(url, elements),
            Msg::SetRenderGeometry(geometry) => {
                self.render_geometry = Some(geometry);
                self.emit_highlight();
            }
            Msg::Hover { element_id } => self.on_hover(element_id),
            Msg::StartRecording { url } => self.on_start_recording(url),
            Msg::StopRecording => self.on_stop_recording(),
            Msg::RunNow { name } => self.on_run_now(name),
            Msg::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Msg::Shutdown => return false,
            Msg::PollTick { epoch } => self.on_poll_tick(epoch),
            Msg::PollResolved { epoch, result } => self.on_poll_resolved(epoch, result),
            Msg::StartResolved { epoch, result } => self.on_start_resolved(epoch, result),
            Msg::StopResolved { result } => self.on_stop_resolved(result),
            Msg::PreviewFire { generation } => self.on_preview_fire(generation),
            Msg::PlaybackTick { generation } => {
                let update = self.playback.tick(generation, &self.tx);
                self.apply_playback_update(update);
            }
            Msg::ExecutionResolved { generation, result } => {
                self.on_execution_resolved(generation, result)
            }
        }
        true
    }

    // ---- sequence & preview scheduling ----

    fn replace_sequence(&mut self, sequence: Vec<TestStep>) {
        self.sequence = sequence;
        self.emit(EngineEvent::SequenceReplaced(self.sequence.clone()));
        self.on_sequence_changed();
    }

    fn on_sequence_changed(&mut self) {
        if self.sequence.is_empty() {
            self.preview.cancel();
            self.playback.clear();
            return;
        }
        if !validation::sequence_is_complete(&self.sequence) {
            self.preview.cancel();
            return;
        }
        if self.site_url.is_none() {
            debug!("sequence complete but no site loaded; preview not scheduled");
            return;
        }
        debug!(steps = self.sequence.len(), "arming preview debounce");
        self.preview.schedule(&self.tx);
    }

    fn on_preview_fire(&mut self, generation: u64) {
        if !self.preview.accept(generation) {
            return;
        }
        // Fire-time recheck: an execution or playback may have started from
        // another trigger while the timer was pending.
        if self.execution_in_flight || self.playback.is_playing() {
            debug!("preview suppressed; execution or playback already active");
            return;
        }
        if self.sequence.is_empty() || !validation::sequence_is_complete(&self.sequence) {
            return;
        }
        let Some(url) = self.site_url.clone() else {
            return;
        };
        self.issue_execution(url, PREVIEW_TEST_NAME.to_string());
    }

    fn on_run_now(&mut self, name: Option<String>) {
        let Some(url) = self.site_url.clone() else {
            self.notice(
                NoticeLevel::Error,
                Some(ErrorCode::SITE_NOT_LOADED),
                "load the target site before running the test",
            );
            return;
        };
        if self.sequence.is_empty() {
            self.notice(
                NoticeLevel::Warning,
                Some(ErrorCode::EMPTY_SEQUENCE),
                "the sequence has no steps to run",
            );
            return;
        }
        let incomplete = validation::incomplete_indices(&self.sequence);
        if !incomplete.is_empty() {
            self.notice(
                NoticeLevel::Warning,
                Some(ErrorCode::INCOMPLETE_SEQUENCE),
                format!("steps {incomplete:?} are missing a target element or value"),
            );
            return;
        }
        self.preview.cancel();
        self.issue_execution(url, name.unwrap_or_else(|| "Manual Run".to_string()));
    }

    fn issue_execution(&mut self, url: String, name: String) {
        self.exec_generation += 1;
        let generation = self.exec_generation;
        self.execution_in_flight = true;

        let request = ExecuteTestRequest {
            url,
            sequence: self.sequence.clone(),
            elements: self.elements.clone(),
            name: Some(name),
        };
        info!(generation, steps = request.sequence.len(), "issuing direct execution");

        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = gateway.execute_direct(&request).await;
            let _ = tx.send(Msg::ExecutionResolved { generation, result });
        });
    }

    fn on_execution_resolved(
        &mut self,
        generation: u64,
        result: Result<ExecuteTestResponse, GatewayError>,
    ) {
        // Last-request-wins: a response is only applied if it belongs to the
        // most recently issued request.
        if generation != self.exec_generation {
            debug!(generation, "discarding stale execution response");
            return;
        }
        self.execution_in_flight = false;

        match result {
            Ok(response) if response.success => {
                if let Some(elements) = response.detected_elements {
                    self.elements = elements;
                    self.emit(EngineEvent::ElementsDetected(self.elements.clone()));
                }
                let steps = response.steps.unwrap_or_default();
                let passed = steps.iter().all(|s| s.status == StepStatus::Passed);
                self.emit(EngineEvent::ResultsInstalled(steps.clone()));
                let update = self.playback.begin(steps, passed, &self.tx);
                self.apply_playback_update(update);
            }
            Ok(response) => {
                let reason = response
                    .error
                    .unwrap_or_else(|| "execution failed".to_string());
                self.fail_execution(ErrorCode::EXECUTION_FAILED, reason);
            }
            Err(e) => {
                self.fail_execution(e.code(), format!("execution request failed: {e}"));
            }
        }
    }

    /// Execution failures never enter playback: detected elements are
    /// cleared and the overall result is recorded as failed.
    fn fail_execution(&mut self, code: ErrorCode, reason: String) {
        self.elements.clear();
        self.emit(EngineEvent::ElementsDetected(Vec::new()));
        self.playback.mark_failed();
        self.notice(NoticeLevel::Error, Some(code), reason);
        self.emit(EngineEvent::PlaybackFinished { passed: false });
    }

    fn apply_playback_update(&mut self, update: PlaybackUpdate) {
        match update {
            PlaybackUpdate::Step { index, total, name, status, screenshot } => {
                if let Some(shot) = screenshot {
                    self.emit(EngineEvent::Screenshot(shot));
                }
                self.emit(EngineEvent::PlaybackStep { index, total, name, status });
            }
            PlaybackUpdate::Finished { passed } => {
                self.emit(EngineEvent::PlaybackFinished { passed });
                if passed {
                    self.notice(NoticeLevel::Info, None, "preview finished: passed");
                } else {
                    self.notice(
                        NoticeLevel::Warning,
                        Some(ErrorCode::EXECUTION_FAILED),
                        "preview finished: failed",
                    );
                }
            }
            PlaybackUpdate::Ignored => {}
        }
    }

    // ---- recording session ----

    fn on_start_recording(&mut self, url: String) {
        if !self.recording.is_idle() {
            self.notice(
                NoticeLevel::Warning,
                Some(ErrorCode::ALREADY_RECORDING),
                "a recording session is already in progress",
            );
            return;
        }
        if !URL_RE.is_match(&url) {
            self.notice(
                NoticeLevel::Error,
                Some(ErrorCode::MISSING_URL),
                "recording needs a valid http(s) URL",
            );
            return;
        }
        if self.site_url.is_none() {
            self.notice(
                NoticeLevel::Error,
                Some(ErrorCode::SITE_NOT_LOADED),
                "load the target site before recording",
            );
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.recording = RecordingState::Starting { epoch };
        info!(%url, "starting recording session");

        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = gateway.start_recording(&url).await;
            let _ = tx.send(Msg::StartResolved { epoch, result });
        });
    }

    fn on_start_resolved(
        &mut self,
        epoch: u64,
        result: Result<StartRecordingResponse, GatewayError>,
    ) {
        let still_starting =
            matches!(self.recording, RecordingState::Starting { epoch: e } if e == epoch);
        if !still_starting {
            // The controller left Starting before the backend answered. If a
            // session was created anyway, release it instead of leaking it.
            if let Ok(response) = &result {
                if response.success {
                    if let Some(id) = response.session_id.clone() {
                        info!(session_id = %id, "releasing session that started after stop");
                        let gateway = Arc::clone(&self.gateway);
                        tokio::spawn(async move {
                            let _ = gateway.stop_recording(&id).await;
                        });
                    }
                }
            }
            return;
        }

        match result {
            Ok(response) if response.success => match response.session_id {
                Some(id) => {
                    info!(session_id = %id, "recording session active");
                    self.emit(EngineEvent::RecordingStarted { session_id: id.clone() });
                    let poller = TimerHandle::interval(
                        self.timing.poll_interval,
                        self.tx.clone(),
                        move || Msg::PollTick { epoch },
                    );
                    self.recording = RecordingState::Recording {
                        session: Session { id, active: true },
                        epoch,
                        poller,
                    };
                    self.notice(NoticeLevel::Info, None, "recording started");
                }
                None => {
                    self.recording = RecordingState::Idle;
                    self.notice(
                        NoticeLevel::Error,
                        Some(ErrorCode::BACKEND_REJECTED),
                        "backend accepted the recording but returned no session id",
                    );
                }
            },
            Ok(response) => {
                self.recording = RecordingState::Idle;
                let reason = response
                    .error
                    .unwrap_or_else(|| "recording could not be started".to_string());
                self.notice(NoticeLevel::Error, Some(ErrorCode::BACKEND_REJECTED), reason);
            }
            Err(e) => {
                self.recording = RecordingState::Idle;
                self.notice(
                    NoticeLevel::Error,
                    Some(e.code()),
                    format!("failed to start recording: {e}"),
                );
            }
        }
    }

    fn on_poll_tick(&mut self, epoch: u64) {
        let RecordingState::Recording { session, epoch: current, .. } = &self.recording else {
            return;
        };
        if *current != epoch {
            return;
        }

        let session_id = session.id.clone();
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = gateway.recorded_actions(&session_id).await;
            let _ = tx.send(Msg::PollResolved { epoch, result });
        });
    }

    fn on_poll_resolved(
        &mut self,
        epoch: u64,
        result: Result<RecordedActionsResponse, GatewayError>,
    ) {
        // A poll that resolves after recording stopped must not revive it.
        if self.recording.epoch() != Some(epoch) || !self.recording.is_recording() {
            debug!("discarding poll result for an ended session");
            return;
        }

        match result {
            Ok(response) if response.success => {
                let mapped = mapper::map_sequence(&response.sequence.unwrap_or_default());
                if !same_sequence_shape(&mapped, &self.sequence) {
                    debug!(steps = mapped.len(), "reconciled recorded actions");
                    self.replace_sequence(mapped);
                }
            }
            Ok(response) if response.session_ended => {
                if let Some(actions) = response.sequence {
                    let mapped = mapper::map_sequence(&actions);
                    if !same_sequence_shape(&mapped, &self.sequence) {
                        self.replace_sequence(mapped);
                    }
                }
                self.end_session("the backend ended the recording session");
            }
            Ok(response) => {
                // Logical failure without session end: keep what we have and
                // stay in Recording for the next tick.
                let reason = response
                    .error
                    .unwrap_or_else(|| "backend rejected the poll".to_string());
                self.notice(NoticeLevel::Warning, Some(ErrorCode::BACKEND_REJECTED), reason);
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "poll failed; keeping last known sequence");
            }
            Err(_) => {
                self.end_session("recording session no longer exists");
            }
        }
    }

    fn on_stop_recording(&mut self) {
        match std::mem::replace(&mut self.recording, RecordingState::Idle) {
            RecordingState::Idle => {
                self.notice(
                    NoticeLevel::Info,
                    Some(ErrorCode::NO_ACTIVE_SESSION),
                    "no active recording session",
                );
            }
            RecordingState::Starting { .. } => {
                self.epoch += 1;
                self.emit(EngineEvent::RecordingStopped);
                self.notice(NoticeLevel::Info, None, "recording start cancelled");
            }
            RecordingState::Recording { session, .. } => {
                // The poller died with the state we just replaced; bumping
                // the epoch rejects any of its in-flight results.
                self.epoch += 1;
                self.emit(EngineEvent::RecordingStopped);
                info!(session_id = %session.id, "stopping recording session");

                let gateway = Arc::clone(&self.gateway);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = gateway.stop_recording(&session.id).await;
                    let _ = tx.send(Msg::StopResolved { result });
                });
            }
        }
    }

    fn on_stop_resolved(&mut self, result: Result<StopRecordingResponse, GatewayError>) {
        match result {
            Ok(response) => {
                // The response's batch (or nothing) is the authoritative
                // final sequence.
                let mapped = mapper::map_sequence(&response.sequence.unwrap_or_default());
                self.replace_sequence(mapped);
                if response.success {
                    self.notice(NoticeLevel::Info, None, "recording stopped");
                } else {
                    let reason = response.error.unwrap_or_else(|| {
                        "backend reported an error stopping the recording".to_string()
                    });
                    self.notice(NoticeLevel::Warning, Some(ErrorCode::BACKEND_REJECTED), reason);
                }
            }
            Err(e) => {
                self.notice(
                    NoticeLevel::Error,
                    Some(e.code()),
                    format!("failed to stop recording: {e}"),
                );
            }
        }
    }

    fn end_session(&mut self, reason: &str) {
        self.epoch += 1;
        self.recording = RecordingState::Idle;
        self.emit(EngineEvent::RecordingStopped);
        self.notice(NoticeLevel::Info, Some(ErrorCode::SESSION_ENDED), reason);
    }

    // ---- site, hover, highlight ----

    fn on_set_site(&mut self, url: String, elements: Vec<DetectedElement>) {
        info!(%url, elements = elements.len(), "target site loaded");
        self.site_url = Some(url);
        self.elements = elements;
        self.emit(EngineEvent::ElementsDetected(self.elements.clone()));
    }

    fn on_hover(&mut self, element_id: Option<String>) {
        // The screenshot/highlight pair is single-writer: playback owns it
        // while playing.
        if self.playback.is_playing() {
            debug!("ignoring hover while playback is active");
            return;
        }
        self.hovered = element_id;
        self.emit_highlight();
    }

    fn emit_highlight(&self) {
        let scaled = match (&self.hovered, &self.render_geometry) {
            (Some(id), Some(geometry)) => self
                .elements
                .iter()
                .find(|el| &el.id == id)
                .and_then(|el| geometry::scaled_box(geometry, el)),
            _ => None,
        };
        self.emit(EngineEvent::Highlight(scaled));
    }

    // ---- plumbing ----

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            recording: self.recording.is_recording(),
            session_id: self.recording.session_id().map(str::to_string),
            sequence_len: self.sequence.len(),
            playing: self.playback.is_playing(),
            current_index: self.playback.current_index(),
            last_overall: self.playback.overall(),
            preview_pending: self.preview.is_pending(),
            execution_in_flight: self.execution_in_flight,
        }
    }

    fn notice(&self, level: NoticeLevel, code: Option<ErrorCode>, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Info => info!(code = ?code, %message, "notice"),
            NoticeLevel::Warning => warn!(code = ?code, %message, "notice"),
            NoticeLevel::Error => tracing::error!(code = ?code, %message, "notice"),
        }
        self.emit(EngineEvent::Notice(Notice { level, code, message }));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ActionKind;
    use serde_json::Value;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    enum ExecResponder {
        Now(Result<ExecuteTestResponse, GatewayError>),
        Wait(oneshot::Receiver<Result<ExecuteTestResponse, GatewayError>>),
    }

    /// Scripted gateway: responses are consumed front-to-back per operation.
    #[derive(Default)]
    struct FakeGateway {
        start_queue: Mutex<VecDeque<Result<StartRecordingResponse, GatewayError>>>,
        poll_queue: Mutex<VecDeque<Result<RecordedActionsResponse, GatewayError>>>,
        stop_queue: Mutex<VecDeque<Result<StopRecordingResponse, GatewayError>>>,
        exec_requests: Mutex<Vec<ExecuteTestRequest>>,
        exec_queue: Mutex<VecDeque<ExecResponder>>,
    }

    #[async_trait::async_trait]
    impl ExecutionGateway for FakeGateway {
        async fn start_recording(
            &self,
            _url: &str,
        ) -> Result<StartRecordingResponse, GatewayError> {
            self.start_queue.lock().unwrap().pop_front().unwrap_or(Ok(
                StartRecordingResponse {
                    success: true,
                    session_id: Some("sess-1".to_string()),
                    error: None,
                },
            ))
        }

        async fn recorded_actions(
            &self,
            _session_id: &str,
        ) -> Result<RecordedActionsResponse, GatewayError> {
            // Unscripted polls fail logically, which keeps the sequence and
            // the session untouched.
            self.poll_queue.lock().unwrap().pop_front().unwrap_or(Ok(
                RecordedActionsResponse {
                    success: false,
                    sequence: None,
                    error: Some("no scripted poll".to_string()),
                    session_ended: false,
                },
            ))
        }

        async fn stop_recording(
            &self,
            _session_id: &str,
        ) -> Result<StopRecordingResponse, GatewayError> {
            self.stop_queue.lock().unwrap().pop_front().unwrap_or(Ok(
                StopRecordingResponse {
                    success: true,
                    sequence: Some(Vec::new()),
                    error: None,
                },
            ))
        }

        async fn execute_direct(
            &self,
            request: &ExecuteTestRequest,
        ) -> Result<ExecuteTestResponse, GatewayError> {
            self.exec_requests.lock().unwrap().push(request.clone());
            let responder = self
                .exec_queue
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted execute response");
            match responder {
                ExecResponder::Now(result) => result,
                ExecResponder::Wait(rx) => rx.await.expect("execute responder dropped"),
            }
        }
    }

    fn kind(id: &str) -> ActionKind {
        ActionKind {
            id: id.to_string(),
            display_name: id.to_string(),
            description: String::new(),
        }
    }

    fn target(selector: &str) -> DetectedElement {
        DetectedElement {
            id: format!("el-{selector}"),
            selector: selector.to_string(),
            tag: "button".to_string(),
            text: selector.to_string(),
            attributes: HashMap::new(),
            bounding_box: None,
        }
    }

    fn click_step(selector: &str) -> TestStep {
        TestStep {
            id: format!("step-{selector}"),
            action_kind: kind("click"),
            target_element: Some(target(selector)),
            value: None,
        }
    }

    fn incomplete_input_step(selector: &str) -> TestStep {
        TestStep {
            id: format!("step-{selector}"),
            action_kind: kind("input"),
            target_element: Some(target(selector)),
            value: None,
        }
    }

    fn passed_result(name: &str, screenshot: Option<&str>) -> StepResult {
        StepResult {
            name: name.to_string(),
            action_kind: "click".to_string(),
            selector: None,
            value: None,
            status: StepStatus::Passed,
            screenshot: screenshot.map(str::to_string),
            error: None,
            details: Value::Null,
        }
    }

    fn ok_exec(steps: Vec<StepResult>) -> ExecuteTestResponse {
        ExecuteTestResponse {
            success: true,
            steps: Some(steps),
            detected_elements: None,
            error: None,
            duration: Some(42),
        }
    }

    fn recorded(kind: &str, selector: Option<&str>, value: Option<&str>) -> crate::protocol::RecordedAction {
        crate::protocol::RecordedAction {
            kind: kind.to_string(),
            selector: selector.map(str::to_string),
            value: value.map(str::to_string),
            timestamp: chrono::Utc::now(),
            target_tag: None,
            target_text: None,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn notices(events: &[EngineEvent]) -> Vec<&Notice> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Notice(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_preview_coalesces_rapid_edits() {
        let gateway = Arc::new(FakeGateway::default());
        gateway
            .exec_queue
            .lock()
            .unwrap()
            .push_back(ExecResponder::Now(Ok(ok_exec(vec![]))));
        let (handle, _events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.update_sequence(vec![click_step("#one")]);
        sleep(Duration::from_millis(50)).await;
        handle.update_sequence(vec![click_step("#two")]);
        sleep(Duration::from_millis(50)).await;
        handle.update_sequence(vec![click_step("#three")]);

        sleep(Duration::from_millis(2000)).await;

        let requests = gateway.exec_requests.lock().unwrap();
        assert_eq!(requests.len(), 1, "three edits must coalesce into one call");
        let sent = requests[0].sequence[0].target_element.as_ref().unwrap();
        assert_eq!(sent.selector, "#three", "the latest edit wins");
        assert_eq!(requests[0].name.as_deref(), Some(PREVIEW_TEST_NAME));
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_or_cleared_sequences_never_execute() {
        let gateway = Arc::new(FakeGateway::default());
        let (handle, _events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![]);

        // Incomplete: input step without a value.
        handle.update_sequence(vec![incomplete_input_step("#email")]);
        sleep(Duration::from_millis(1000)).await;
        assert!(gateway.exec_requests.lock().unwrap().is_empty());

        // Complete but cleared before the quiet period elapses.
        handle.update_sequence(vec![click_step("#go")]);
        handle.clear_sequence();
        sleep(Duration::from_millis(1000)).await;
        assert!(gateway.exec_requests.lock().unwrap().is_empty());

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.sequence_len, 0);
        assert!(!snap.preview_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_advances_on_the_step_delay_and_reports_overall() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.exec_queue.lock().unwrap().push_back(ExecResponder::Now(Ok(ok_exec(vec![
            passed_result("Step 1", Some("shot-1")),
            passed_result("Step 2", Some("shot-2")),
            passed_result("Step 3", None),
        ]))));
        let (handle, mut events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.update_sequence(vec![click_step("#go")]);

        // Debounce fires at 750ms; playback shows step 0 immediately after.
        sleep(Duration::from_millis(1000)).await;
        let snap = handle.snapshot().await.unwrap();
        assert!(snap.playing);
        assert_eq!(snap.current_index, Some(0));

        // Three steps at 1500ms each.
        sleep(Duration::from_millis(5000)).await;
        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.playing);
        assert_eq!(snap.current_index, None);
        assert_eq!(snap.last_overall, Some(true));

        let seen = drain(&mut events);
        let screenshots: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Screenshot(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(screenshots, vec!["shot-1", "shot-2"]);

        let steps_played: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::PlaybackStep { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(steps_played, vec![0, 1, 2]);

        assert!(seen
            .iter()
            .any(|e| matches!(e, EngineEvent::PlaybackFinished { passed: true })));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_execution_response_is_discarded() {
        let gateway = Arc::new(FakeGateway::default());
        let (resolve_a, rx_a) = oneshot::channel();
        let (resolve_b, rx_b) = oneshot::channel();
        {
            let mut queue = gateway.exec_queue.lock().unwrap();
            queue.push_back(ExecResponder::Wait(rx_a));
            queue.push_back(ExecResponder::Wait(rx_b));
        }
        let (handle, mut events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.update_sequence(vec![click_step("#go")]);

        handle.run_now(Some("run A".to_string()));
        sleep(Duration::from_millis(1)).await;
        handle.run_now(Some("run B".to_string()));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(gateway.exec_requests.lock().unwrap().len(), 2);

        // B resolves first and owns the outcome; A resolves late and must be
        // discarded.
        resolve_b
            .send(Ok(ok_exec(vec![passed_result("from B", Some("shot-b"))])))
            .unwrap();
        sleep(Duration::from_millis(5)).await;
        resolve_a
            .send(Ok(ok_exec(vec![passed_result("from A", Some("shot-a"))])))
            .unwrap();
        sleep(Duration::from_millis(5)).await;

        let seen = drain(&mut events);
        let screenshots: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Screenshot(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(screenshots, vec!["shot-b"], "A's late result must not apply");

        let snap = handle.snapshot().await.unwrap();
        assert!(snap.playing);
        assert_eq!(snap.current_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn preview_fire_is_suppressed_while_playback_is_active() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.exec_queue.lock().unwrap().push_back(ExecResponder::Now(Ok(ok_exec(vec![
            passed_result("Step 1", None),
            passed_result("Step 2", None),
        ]))));
        let (handle, _events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.update_sequence(vec![click_step("#go")]);
        sleep(Duration::from_millis(1000)).await; // first preview starts playing

        // An edit mid-playback arms a debounce whose firing must be skipped.
        handle.update_sequence(vec![click_step("#other")]);
        sleep(Duration::from_millis(4000)).await;

        assert_eq!(gateway.exec_requests.lock().unwrap().len(), 1);
        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_execution_clears_elements_and_skips_playback() {
        let gateway = Arc::new(FakeGateway::default());
        gateway
            .exec_queue
            .lock()
            .unwrap()
            .push_back(ExecResponder::Now(Ok(ExecuteTestResponse {
                success: false,
                steps: None,
                detected_elements: None,
                error: Some("element not found".to_string()),
                duration: None,
            })));
        let (handle, mut events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![target("#stale")]);
        handle.update_sequence(vec![click_step("#go")]);
        sleep(Duration::from_millis(1000)).await;

        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.playing);
        assert_eq!(snap.last_overall, Some(false));

        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            EngineEvent::ElementsDetected(els) if els.is_empty()
        )));
        assert!(seen
            .iter()
            .any(|e| matches!(e, EngineEvent::PlaybackFinished { passed: false })));
        let all_notices = notices(&seen);
        assert!(all_notices
            .iter()
            .any(|n| n.code == Some(ErrorCode::EXECUTION_FAILED)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_recording_while_idle_surfaces_a_notice_only() {
        let gateway = Arc::new(FakeGateway::default());
        let (handle, mut events, _task) = spawn(gateway, EngineTiming::default());

        handle.stop_recording();
        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.recording);
        assert_eq!(snap.sequence_len, 0);

        let seen = drain(&mut events);
        assert!(!seen.iter().any(|e| matches!(e, EngineEvent::RecordingStopped)));
        let all_notices = notices(&seen);
        assert_eq!(all_notices.len(), 1);
        assert_eq!(all_notices[0].level, NoticeLevel::Info);
        assert_eq!(all_notices[0].code, Some(ErrorCode::NO_ACTIVE_SESSION));
    }

    #[tokio::test(start_paused = true)]
    async fn recording_polls_reconcile_and_survive_transient_failures() {
        let gateway = Arc::new(FakeGateway::default());
        {
            let mut polls = gateway.poll_queue.lock().unwrap();
            // Tick 1: one recorded action (incomplete once mapped, so no
            // preview executes during this test).
            polls.push_back(Ok(RecordedActionsResponse {
                success: true,
                sequence: Some(vec![recorded("input", Some("#email"), None)]),
                error: None,
                session_ended: false,
            }));
            // Tick 2: transient HTTP failure keeps the sequence.
            polls.push_back(Err(GatewayError::Status { status: 503 }));
            // Tick 3: logical failure without session end keeps recording.
            polls.push_back(Ok(RecordedActionsResponse {
                success: false,
                sequence: None,
                error: Some("busy".to_string()),
                session_ended: false,
            }));
            // Tick 4: session ends with a final batch of two actions.
            polls.push_back(Ok(RecordedActionsResponse {
                success: false,
                sequence: Some(vec![
                    recorded("input", Some("#email"), None),
                    recorded("input", Some("#password"), None),
                ]),
                error: None,
                session_ended: true,
            }));
        }
        let (handle, mut events, _task) = spawn(gateway, EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.start_recording("https://example.com");
        sleep(Duration::from_millis(10)).await;
        assert!(handle.snapshot().await.unwrap().recording);

        sleep(Duration::from_millis(3100)).await; // tick 1
        assert_eq!(handle.snapshot().await.unwrap().sequence_len, 1);

        sleep(Duration::from_millis(3000)).await; // tick 2 (transient)
        let snap = handle.snapshot().await.unwrap();
        assert!(snap.recording);
        assert_eq!(snap.sequence_len, 1);

        sleep(Duration::from_millis(3000)).await; // tick 3 (logical failure)
        assert!(handle.snapshot().await.unwrap().recording);

        sleep(Duration::from_millis(3000)).await; // tick 4 (session ended)
        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.recording);
        assert_eq!(snap.sequence_len, 2, "final batch must be applied");

        let seen = drain(&mut events);
        assert!(seen
            .iter()
            .any(|e| matches!(e, EngineEvent::RecordingStarted { .. })));
        assert!(seen.iter().any(|e| matches!(e, EngineEvent::RecordingStopped)));
        assert!(notices(&seen)
            .iter()
            .any(|n| n.code == Some(ErrorCode::SESSION_ENDED) && n.level == NoticeLevel::Info));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_not_found_forces_idle() {
        let gateway = Arc::new(FakeGateway::default());
        gateway
            .poll_queue
            .lock()
            .unwrap()
            .push_back(Err(GatewayError::SessionNotFound));
        let (handle, _events, _task) = spawn(gateway, EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.start_recording("https://example.com");
        sleep(Duration::from_millis(10)).await;
        assert!(handle.snapshot().await.unwrap().recording);

        sleep(Duration::from_millis(3100)).await;
        assert!(!handle.snapshot().await.unwrap().recording);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_recording_applies_the_final_response_sequence() {
        let gateway = Arc::new(FakeGateway::default());
        gateway
            .stop_queue
            .lock()
            .unwrap()
            .push_back(Ok(StopRecordingResponse {
                success: true,
                sequence: Some(vec![recorded("input", Some("#email"), None)]),
                error: None,
            }));
        let (handle, _events, _task) = spawn(gateway, EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.start_recording("https://example.com");
        sleep(Duration::from_millis(10)).await;

        handle.stop_recording();
        // The transition out of Recording is synchronous with the command.
        let snap = handle.snapshot().await.unwrap();
        assert!(!snap.recording);

        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.snapshot().await.unwrap().sequence_len, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_returns_to_idle_with_an_error_notice() {
        let gateway = Arc::new(FakeGateway::default());
        gateway
            .start_queue
            .lock()
            .unwrap()
            .push_back(Ok(StartRecordingResponse {
                success: false,
                session_id: None,
                error: Some("browser pool exhausted".to_string()),
            }));
        let (handle, mut events, _task) = spawn(gateway, EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.start_recording("https://example.com");
        sleep(Duration::from_millis(10)).await;

        assert!(!handle.snapshot().await.unwrap().recording);
        let seen = drain(&mut events);
        assert!(notices(&seen).iter().any(|n| {
            n.level == NoticeLevel::Error
                && n.code == Some(ErrorCode::BACKEND_REJECTED)
                && n.message.contains("browser pool exhausted")
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn start_recording_requires_a_loaded_site_and_a_url() {
        let gateway = Arc::new(FakeGateway::default());
        let (handle, mut events, _task) = spawn(gateway, EngineTiming::default());

        handle.start_recording("not a url");
        handle.snapshot().await.unwrap();
        let seen = drain(&mut events);
        assert!(notices(&seen)
            .iter()
            .any(|n| n.code == Some(ErrorCode::MISSING_URL)));

        handle.start_recording("https://example.com");
        handle.snapshot().await.unwrap();
        let seen = drain(&mut events);
        assert!(notices(&seen)
            .iter()
            .any(|n| n.code == Some(ErrorCode::SITE_NOT_LOADED)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_now_gates_on_completeness() {
        let gateway = Arc::new(FakeGateway::default());
        let (handle, mut events, _task) = spawn(gateway.clone(), EngineTiming::default());

        handle.set_site("https://example.com", vec![]);
        handle.run_now(None);
        handle.snapshot().await.unwrap();
        let seen = drain(&mut events);
        assert!(notices(&seen)
            .iter()
            .any(|n| n.code == Some(ErrorCode::EMPTY_SEQUENCE)));

        handle.update_sequence(vec![incomplete_input_step("#email")]);
        handle.run_now(None);
        handle.snapshot().await.unwrap();
        let seen = drain(&mut events);
        assert!(notices(&seen)
            .iter()
            .any(|n| n.code == Some(ErrorCode::INCOMPLETE_SEQUENCE)));

        assert!(gateway.exec_requests.lock().unwrap().is_empty());
    }
}
