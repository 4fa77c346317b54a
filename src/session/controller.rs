use super::config::SessionConfig;
use super::conversation::{detect_tags, CompanionTag, ConversationMessage};
use super::stats::SessionStats;
use crate::assistant::FALLBACK_REPLY;
use crate::audio::{AudioCapture, BackendProvider, CaptureEvent, CaptureHandle};
use crate::error::{Result, VoiceError};
use crate::playback::{AudioSink, ClipDecoder, PlaybackEvent, PlaybackQueue, SymphoniaDecoder};
use crate::transport::{SessionEvent, Transport, TransportEvent, TransportState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where the session is in the turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    Idle,
    Recording,
    /// Utterance sent, waiting for the completion marker
    Awaiting,
    Playing,
}

/// Broadcast to subscribers (UI screens, the application store)
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(VoiceState),
    Message(ConversationMessage),
    Tags(Vec<CompanionTag>),
    /// Recoverable failure; the session is idle and can be retried
    Error(VoiceError),
}

/// Result of a start/stop/toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted,
    /// Not applicable in the current state, or a transition was in progress
    Ignored,
}

type Reply = oneshot::Sender<Result<CommandOutcome>>;

enum Command {
    Start(Reply),
    Stop(Reply),
    Toggle(Reply),
    Shutdown,
}

/// State shared between the handle and the controller task
struct Shared {
    state_tx: watch::Sender<VoiceState>,
    updates: broadcast::Sender<SessionUpdate>,
    history: Mutex<Vec<ConversationMessage>>,
    transitioning: AtomicBool,
    mic_disabled: AtomicBool,
    utterances_sent: AtomicUsize,
    turns_completed: AtomicUsize,
    started_at: DateTime<Utc>,
}

/// Handle to a running voice session
///
/// All audio, transport and playback work happens on one controller task;
/// the handle only sends commands and reads shared state.
pub struct VoiceSession {
    session_id: String,
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceSession {
    /// Spawn the controller task. Must be called inside a tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        backends: Arc<dyn BackendProvider>,
        transport: Box<dyn Transport>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        Self::spawn_with_decoder(config, backends, transport, sink, Arc::new(SymphoniaDecoder))
    }

    pub fn spawn_with_decoder(
        config: SessionConfig,
        backends: Arc<dyn BackendProvider>,
        transport: Box<dyn Transport>,
        sink: Box<dyn AudioSink>,
        decoder: Arc<dyn ClipDecoder>,
    ) -> Self {
        info!("Creating voice session: {}", config.session_id);

        let (state_tx, _) = watch::channel(VoiceState::Idle);
        let (updates, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            state_tx,
            updates,
            history: Mutex::new(Vec::new()),
            transitioning: AtomicBool::new(false),
            mic_disabled: AtomicBool::new(false),
            utterances_sent: AtomicUsize::new(0),
            turns_completed: AtomicUsize::new(0),
            started_at: Utc::now(),
        });

        let (playback, playback_events) = PlaybackQueue::spawn(sink, decoder);
        let (command_tx, command_rx) = mpsc::channel(16);

        let controller = Controller {
            session_id: config.session_id.clone(),
            config,
            backends,
            transport,
            transport_events: None,
            capture: None,
            playback,
            playback_events,
            state: VoiceState::Idle,
            shared: Arc::clone(&shared),
            response_deadline: None,
            resume_at: None,
            mic_disabled: None,
        };

        let session_id = controller.session_id.clone();
        let task = tokio::spawn(controller.run(command_rx));

        Self {
            session_id,
            commands: command_tx,
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Begin listening (no-op unless idle)
    pub async fn start(&self) -> Result<CommandOutcome> {
        self.request(Command::Start).await
    }

    /// Finish the current utterance manually (no-op unless recording)
    pub async fn stop(&self) -> Result<CommandOutcome> {
        self.request(Command::Stop).await
    }

    /// Mic button: start when idle, stop when recording, ignored otherwise
    pub async fn toggle(&self) -> Result<CommandOutcome> {
        self.request(Command::Toggle).await
    }

    async fn request(&self, command: fn(Reply) -> Command) -> Result<CommandOutcome> {
        if self.shared.transitioning.load(Ordering::SeqCst) {
            debug!("Ignoring mic request: transition in progress");
            return Ok(CommandOutcome::Ignored);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| VoiceError::SessionClosed)?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    pub fn state(&self) -> VoiceState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<VoiceState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.shared.updates.subscribe()
    }

    /// Conversation history in conversation order
    pub async fn conversation(&self) -> Vec<ConversationMessage> {
        let history = self.shared.history.lock().await;
        history.clone()
    }

    /// Get current session statistics
    pub async fn get_stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.shared.started_at);
        let messages_count = self.shared.history.lock().await.len();

        SessionStats {
            state: self.state(),
            mic_disabled: self.shared.mic_disabled.load(Ordering::SeqCst),
            started_at: self.shared.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            utterances_sent: self.shared.utterances_sent.load(Ordering::SeqCst),
            turns_completed: self.shared.turns_completed.load(Ordering::SeqCst),
            messages_count,
        }
    }

    /// Stop the controller, releasing the microphone and closing the transport
    pub async fn shutdown(&self) {
        info!("Shutting down voice session: {}", self.session_id);
        let _ = self.commands.send(Command::Shutdown).await;

        let mut handle = self.task.lock().await;
        if let Some(task) = handle.take() {
            if let Err(e) = task.await {
                error!("Voice session task panicked: {}", e);
            }
        }
    }
}

struct Controller {
    session_id: String,
    config: SessionConfig,
    backends: Arc<dyn BackendProvider>,
    transport: Box<dyn Transport>,
    transport_events: Option<mpsc::Receiver<TransportEvent>>,
    capture: Option<CaptureHandle>,
    playback: PlaybackQueue,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    state: VoiceState,
    shared: Arc<Shared>,
    response_deadline: Option<Instant>,
    resume_at: Option<Instant>,
    mic_disabled: Option<VoiceError>,
}

async fn next_capture_event(capture: &mut Option<CaptureHandle>) -> Option<CaptureEvent> {
    match capture {
        Some(capture) => capture.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_transport_event(
    events: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Controller {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Voice session controller started: {}", self.session_id);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start(reply)) => {
                        let result = self.start_recording().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop(reply)) => {
                        let result = self.stop_recording().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Toggle(reply)) => {
                        let result = match self.state {
                            VoiceState::Idle => self.start_recording().await,
                            VoiceState::Recording => self.stop_recording().await,
                            _ => {
                                debug!("Ignoring toggle while {:?}", self.state);
                                Ok(CommandOutcome::Ignored)
                            }
                        };
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = next_capture_event(&mut self.capture) => {
                    self.on_capture_event(event).await;
                }
                event = next_transport_event(&mut self.transport_events) => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => self.on_transport_closed("event channel closed".to_string()).await,
                },
                Some(event) = self.playback_events.recv() => {
                    self.on_playback_event(event);
                }
                _ = sleep_until_opt(self.response_deadline) => {
                    self.on_response_timeout().await;
                }
                _ = sleep_until_opt(self.resume_at) => {
                    self.resume_at = None;
                    if let Err(e) = self.start_recording().await {
                        debug!("Continuous listening did not resume: {}", e);
                    }
                }
            }
        }

        self.teardown().await;
    }

    fn set_state(&mut self, state: VoiceState) {
        if self.state == state {
            return;
        }
        debug!("Voice state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.shared.state_tx.send_replace(state);
        self.publish(SessionUpdate::State(state));
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine.
        let _ = self.shared.updates.send(update);
    }

    async fn push_message(&mut self, message: ConversationMessage) {
        {
            let mut history = self.shared.history.lock().await;
            history.push(message.clone());
        }
        self.publish(SessionUpdate::Message(message));
    }

    /// Report a recoverable failure and return to idle
    fn fail(&mut self, error: VoiceError) {
        warn!("Voice session {}: {}", self.session_id, error);
        if matches!(error, VoiceError::PermissionDenied(_)) {
            self.mic_disabled = Some(error.clone());
            self.shared.mic_disabled.store(true, Ordering::SeqCst);
        }
        self.response_deadline = None;
        self.resume_at = None;
        self.publish(SessionUpdate::Error(error));
        self.set_state(VoiceState::Idle);
    }

    fn set_transitioning(&self, on: bool) {
        self.shared.transitioning.store(on, Ordering::SeqCst);
    }

    async fn start_recording(&mut self) -> Result<CommandOutcome> {
        if self.state != VoiceState::Idle {
            debug!("Already {:?}; start ignored", self.state);
            return Ok(CommandOutcome::Ignored);
        }
        if let Some(error) = &self.mic_disabled {
            return Err(error.clone());
        }

        self.resume_at = None;
        self.set_transitioning(true);
        let result = self.begin_recording().await;
        self.set_transitioning(false);

        match result {
            Ok(()) => Ok(CommandOutcome::Accepted),
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn begin_recording(&mut self) -> Result<()> {
        let backend = self.backends.create_backend()?;
        let capture = AudioCapture::start(backend, self.config.silence.clone()).await?;

        if self.transport.state() != TransportState::Open {
            match self.transport.connect().await {
                Ok(events) => self.transport_events = Some(events),
                Err(e) => {
                    if let Err(stop_err) = capture.stop().await {
                        warn!("Failed to release capture: {}", stop_err);
                    }
                    return Err(e);
                }
            }
        }

        self.capture = Some(capture);
        self.set_state(VoiceState::Recording);
        info!("Listening ({})", self.session_id);
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<CommandOutcome> {
        match self.state {
            VoiceState::Recording => {
                self.set_transitioning(true);
                let result = self.finish_utterance().await;
                self.set_transitioning(false);
                match result {
                    Ok(()) => Ok(CommandOutcome::Accepted),
                    Err(e) => {
                        self.fail(e.clone());
                        Err(e)
                    }
                }
            }
            VoiceState::Idle if self.resume_at.is_some() => {
                debug!("Cancelled pending resume");
                self.resume_at = None;
                Ok(CommandOutcome::Accepted)
            }
            _ => Ok(CommandOutcome::Ignored),
        }
    }

    /// Stop capture and send the utterance
    async fn finish_utterance(&mut self) -> Result<()> {
        let Some(capture) = self.capture.take() else {
            return Ok(());
        };

        let utterance = capture.stop().await?;
        if utterance.is_empty() {
            info!("Nothing was captured; back to idle");
            self.set_state(VoiceState::Idle);
            return Ok(());
        }

        self.transport.send(utterance.bytes.clone())?;
        self.shared.utterances_sent.fetch_add(1, Ordering::SeqCst);

        // Leftovers from an abandoned turn must not prefix this reply.
        self.playback.discard();
        self.response_deadline = Some(Instant::now() + self.config.response_timeout);
        self.set_state(VoiceState::Awaiting);
        Ok(())
    }

    async fn on_capture_event(&mut self, event: CaptureEvent) {
        if self.state != VoiceState::Recording {
            return;
        }
        debug!("Capture finished: {:?}", event);

        self.set_transitioning(true);
        if let Err(e) = self.finish_utterance().await {
            self.fail(e);
        }
        self.set_transitioning(false);
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        let event = match event {
            TransportEvent::Event(event) => event,
            TransportEvent::Closed { reason } => {
                self.on_transport_closed(reason).await;
                return;
            }
        };

        match event {
            SessionEvent::Transcription { text } => {
                if text.trim().is_empty() {
                    return;
                }
                let tags = detect_tags(&text);
                self.push_message(ConversationMessage::user(text)).await;
                if !tags.is_empty() {
                    self.publish(SessionUpdate::Tags(tags));
                }
            }
            SessionEvent::ReplyText { text } => {
                if !text.trim().is_empty() {
                    self.push_message(ConversationMessage::ai(text)).await;
                }
            }
            SessionEvent::AudioFrame(bytes) => self.playback.enqueue(bytes),
            SessionEvent::Complete { response_text } => {
                debug!("Turn complete ({:?})", response_text);
                self.on_complete();
            }
            SessionEvent::ServerError { message } => {
                if self.state == VoiceState::Awaiting {
                    self.playback.discard();
                    self.fail(VoiceError::Server(message));
                } else {
                    warn!("Voice endpoint error outside a turn: {}", message);
                }
            }
            SessionEvent::Status { message } => debug!("Voice endpoint status: {}", message),
        }
    }

    fn on_complete(&mut self) {
        if self.state != VoiceState::Awaiting {
            let dropped = self.playback.discard();
            debug!("Completion outside a turn; dropped {} frames", dropped);
            return;
        }

        self.response_deadline = None;
        self.shared.turns_completed.fetch_add(1, Ordering::SeqCst);

        match self.playback.flush() {
            Some(clip) => {
                info!("Playing reply clip {} ({} bytes)", clip.id, clip.bytes.len());
                self.set_state(VoiceState::Playing);
            }
            None => self.finish_turn(),
        }
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        match &event {
            PlaybackEvent::Started { clip_id, duration_ms } => {
                debug!("Clip {} started ({}ms)", clip_id, duration_ms)
            }
            PlaybackEvent::Ended { clip_id } => debug!("Clip {} ended", clip_id),
            PlaybackEvent::DecodeFailed { error, .. } | PlaybackEvent::SinkFailed { error, .. } => {
                self.publish(SessionUpdate::Error(error.clone()));
            }
        }

        if event.is_terminal() && self.state == VoiceState::Playing && self.playback.is_idle() {
            self.finish_turn();
        }
    }

    fn finish_turn(&mut self) {
        self.set_state(VoiceState::Idle);
        if self.config.continuous && self.mic_disabled.is_none() {
            self.resume_at = Some(Instant::now() + self.config.resume_delay);
        }
    }

    async fn on_transport_closed(&mut self, reason: String) {
        self.transport_events = None;
        let dropped = self.playback.discard();

        match self.state {
            VoiceState::Recording | VoiceState::Awaiting => {
                if let Some(capture) = self.capture.take() {
                    if let Err(e) = capture.stop().await {
                        warn!("Failed to release capture: {}", e);
                    }
                }
                if dropped > 0 {
                    info!("Dropped {} partial reply frames", dropped);
                }
                self.fail(VoiceError::Connection(reason));
            }
            state => info!("Voice transport closed while {:?}: {}", state, reason),
        }
    }

    async fn on_response_timeout(&mut self) {
        self.response_deadline = None;
        if self.state != VoiceState::Awaiting {
            return;
        }

        self.playback.discard();
        self.transport.close().await;
        self.transport_events = None;

        self.push_message(ConversationMessage::ai(FALLBACK_REPLY)).await;
        self.fail(VoiceError::ResponseTimeout(
            self.config.response_timeout.as_millis() as u64,
        ));
    }

    async fn teardown(self) {
        let Controller {
            session_id,
            mut transport,
            capture,
            playback,
            ..
        } = self;

        if let Some(capture) = capture {
            if let Err(e) = capture.stop().await {
                warn!("Failed to release capture: {}", e);
            }
        }
        transport.close().await;
        playback.shutdown().await;
        info!("Voice session controller stopped: {}", session_id);
    }
}
