//! Session lifecycle controller.
//!
//! One task owns everything a live session is made of: the capture gate,
//! the playback scheduler, the agent session, the order draft, and the
//! finalization flow. All mutations happen inside that task, driven by the
//! agent's ordered event stream interleaved with user commands; the outside
//! world only ever talks to it through a [`SessionHandle`] and observes it
//! through state and update channels.

use crate::capture::{CaptureConfig, CaptureGate, FrameCallback};
use crate::config::SessionConfig;
use crate::ledger::{OrderLedger, OrderNotifier, OrderRecord};
use crate::menu::{self, CustomerIdentity, MenuCatalog};
use crate::order::{
    guidance_prompt, CartLine, DeliveryMethod, FinalizationFlow, FinalizationState, FlowChange,
    OrderDraft, ToolDispatcher,
};
use crate::playback::{CpalPlayback, PlaybackScheduler, PlaybackSink};
use crate::session::{self, AgentEvent, AgentSession};
use crate::transcript::{Transcript, TranscriptEntry};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use strum::Display;
use tokio::sync::{broadcast, mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Error,
    Closed,
}

/// Everything the presentation layer needs to render a live session.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    State(SessionState),
    Transcript(TranscriptEntry),
    Cart { lines: Vec<CartLine>, total: f64 },
    Finalization(FinalizationState),
    Submitted(OrderRecord),
    /// Terminal failure, worth showing with a retry affordance.
    Failed(String),
}

#[derive(Debug)]
enum Command {
    Mute(bool),
    SendText(String),
    SelectDelivery(DeliveryMethod, Option<String>),
    ConfirmSubmit,
    CancelAutoSubmit,
    AutoSubmit,
    Close,
}

/// Cloneable handle to a running session. Every method is non-blocking;
/// outcomes show up on the update stream.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch receiver for state transitions, for callers that want to
    /// await a particular state instead of polling.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn mute(&self, muted: bool) {
        self.send(Command::Mute(muted));
    }

    /// Types a message into the conversation as the customer.
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Command::SendText(text.into()));
    }

    /// Records a delivery choice made in the UI rather than spoken.
    pub fn select_delivery(&self, method: DeliveryMethod, address: Option<String>) {
        self.send(Command::SelectDelivery(method, address));
    }

    pub fn confirm_submit(&self) {
        self.send(Command::ConfirmSubmit);
    }

    pub fn cancel_auto_submit(&self) {
        self.send(Command::CancelAutoSubmit);
    }

    /// Ends the session. Safe to call at any point, any number of times,
    /// including while the connection is still being established.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    fn send(&self, command: Command) {
        if self.commands.try_send(command).is_err() {
            log::debug!("Session command dropped, session is gone");
        }
    }
}

/// Builds and launches sessions. Construction is cheap; nothing happens
/// until [`start`](Self::start).
pub struct SessionController {
    config: SessionConfig,
    menu: MenuCatalog,
    customer: Option<CustomerIdentity>,
    capture_config: CaptureConfig,
    mic_enabled: bool,
    record_path: Option<PathBuf>,
    ledger: Arc<dyn OrderLedger>,
    notifier: Arc<dyn OrderNotifier>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        menu: MenuCatalog,
        ledger: Arc<dyn OrderLedger>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        SessionController {
            config,
            menu,
            customer: None,
            capture_config: CaptureConfig::default(),
            mic_enabled: true,
            record_path: None,
            ledger,
            notifier,
        }
    }

    pub fn with_customer(mut self, customer: CustomerIdentity) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_capture_config(mut self, capture_config: CaptureConfig) -> Self {
        self.capture_config = capture_config;
        self
    }

    /// Runs the session without opening a microphone. The customer talks
    /// through [`SessionHandle::send_text`] instead.
    pub fn without_microphone(mut self) -> Self {
        self.mic_enabled = false;
        self
    }

    /// Tap the agent's audio into a WAV file for debugging.
    pub fn with_recording(mut self, path: PathBuf) -> Self {
        self.record_path = Some(path);
        self
    }

    /// Starts the session against the default output device.
    pub fn start(self) -> SessionHandle {
        let (handle, commands_rx, state_tx) = self.channels();
        let updates = handle.updates.clone();
        let commands_tx = handle.commands.clone();
        tokio::spawn(async move {
            let sink = match CpalPlayback::start() {
                Ok(sink) => sink,
                Err(e) => {
                    log::error!("❌ Audio output unavailable: {e}");
                    let _ = updates.send(SessionUpdate::Failed(e.to_string()));
                    let _ = state_tx.send(SessionState::Error);
                    let _ = updates.send(SessionUpdate::State(SessionState::Error));
                    return;
                }
            };
            self.run(sink, commands_rx, commands_tx, state_tx, updates).await;
        });
        handle
    }

    /// Starts the session with a caller-provided sink, for headless use
    /// and tests.
    pub fn start_with_sink<S: PlaybackSink + 'static>(self, sink: S) -> SessionHandle {
        let (handle, commands_rx, state_tx) = self.channels();
        let updates = handle.updates.clone();
        let commands_tx = handle.commands.clone();
        tokio::spawn(async move {
            self.run(sink, commands_rx, commands_tx, state_tx, updates).await;
        });
        handle
    }

    fn channels(
        &self,
    ) -> (
        SessionHandle,
        mpsc::Receiver<Command>,
        watch::Sender<SessionState>,
    ) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (updates_tx, _) = broadcast::channel(64);
        let handle = SessionHandle {
            commands: commands_tx,
            state: state_rx,
            updates: updates_tx,
        };
        (handle, commands_rx, state_tx)
    }

    async fn run<S: PlaybackSink>(
        self,
        sink: S,
        mut commands_rx: mpsc::Receiver<Command>,
        commands_tx: mpsc::Sender<Command>,
        state_tx: watch::Sender<SessionState>,
        updates: broadcast::Sender<SessionUpdate>,
    ) {
        let _ = state_tx.send(SessionState::Connecting);
        let _ = updates.send(SessionUpdate::State(SessionState::Connecting));
        log::info!("📞 Starting voice ordering session");

        let mut scheduler = PlaybackScheduler::new(sink);
        if let Some(path) = &self.record_path {
            if let Err(e) = scheduler.record_to(path) {
                log::warn!("Recording disabled: {e}");
            }
        }

        // The gate starts before the connection exists; frames just fall
        // through until the session lands in the cell and reports open.
        let session_cell: Arc<OnceLock<AgentSession>> = Arc::new(OnceLock::new());
        let callback_cell = Arc::clone(&session_cell);
        let on_frame: FrameCallback = Box::new(move |frame| {
            if let Some(session) = callback_cell.get() {
                if session.is_open() {
                    session.send_audio(&frame);
                }
            }
        });

        let mut gate = if self.mic_enabled {
            match CaptureGate::start(self.capture_config.clone(), on_frame).await {
                Ok(gate) => Some(gate),
                Err(e) => {
                    log::error!("❌ Microphone unavailable: {e}");
                    scheduler.flush();
                    let _ = updates.send(SessionUpdate::Failed(format!(
                        "Microphone access denied: {e}"
                    )));
                    let _ = state_tx.send(SessionState::Error);
                    let _ = updates.send(SessionUpdate::State(SessionState::Error));
                    return;
                }
            }
        } else {
            None
        };

        let instructions = menu::build_instructions(&self.menu, self.customer.as_ref());
        let connect = session::connect(&self.config, instructions);
        tokio::pin!(connect);

        // Close must work mid-connect; mute is worth honoring early too.
        let (session, mut events) = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(connected) => break connected,
                    Err(e) => {
                        log::error!("❌ Could not reach the ordering agent: {e}");
                        if let Some(gate) = &mut gate {
                            gate.stop();
                        }
                        scheduler.flush();
                        let _ = updates.send(SessionUpdate::Failed(format!(
                            "Agent connection failed: {e}"
                        )));
                        let _ = state_tx.send(SessionState::Error);
                        let _ = updates.send(SessionUpdate::State(SessionState::Error));
                        return;
                    }
                },
                command = commands_rx.recv() => match command {
                    Some(Command::Mute(muted)) => {
                        if let Some(gate) = &gate {
                            gate.set_muted(muted);
                        }
                    }
                    Some(Command::Close) | None => {
                        log::info!("Session closed before the connection completed");
                        if let Some(gate) = &mut gate {
                            gate.stop();
                        }
                        scheduler.flush();
                        let _ = state_tx.send(SessionState::Closed);
                        let _ = updates.send(SessionUpdate::State(SessionState::Closed));
                        return;
                    }
                    Some(other) => log::debug!("Ignoring {other:?} while connecting"),
                }
            }
        };
        let _ = session_cell.set(session.clone());

        let draft = match &self.customer {
            Some(customer) => OrderDraft::for_customer(customer),
            None => OrderDraft::new(),
        };
        let mut active = ActiveSession {
            session,
            scheduler,
            gate,
            draft,
            dispatcher: ToolDispatcher::new(self.menu),
            flow: FinalizationFlow::new(self.config.auto_submit_grace),
            transcript: Transcript::new(),
            customer: self.customer,
            state: SessionState::Connecting,
            state_tx,
            updates,
            commands_tx,
            ledger: self.ledger,
            notifier: self.notifier,
        };

        let final_state = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(exit) = active.handle_event(event) {
                            break exit;
                        }
                    }
                    None => break SessionState::Closed,
                },
                command = commands_rx.recv() => match command {
                    Some(command) => {
                        if let Some(exit) = active.handle_command(command) {
                            break exit;
                        }
                    }
                    None => break SessionState::Closed,
                }
            }
        };
        active.release(final_state);
    }
}

struct ActiveSession<S: PlaybackSink> {
    session: AgentSession,
    scheduler: PlaybackScheduler<S>,
    gate: Option<CaptureGate>,
    draft: OrderDraft,
    dispatcher: ToolDispatcher,
    flow: FinalizationFlow,
    transcript: Transcript,
    customer: Option<CustomerIdentity>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    updates: broadcast::Sender<SessionUpdate>,
    commands_tx: mpsc::Sender<Command>,
    ledger: Arc<dyn OrderLedger>,
    notifier: Arc<dyn OrderNotifier>,
}

impl<S: PlaybackSink> ActiveSession<S> {
    /// Returns the terminal state once the session should wind down.
    fn handle_event(&mut self, event: AgentEvent) -> Option<SessionState> {
        match event {
            AgentEvent::Opened => {
                log::info!("✅ Agent session open, listening");
                self.set_state(SessionState::Listening);
                self.session
                    .send_text(&menu::greeting_prompt(self.customer.as_ref()));
            }
            AgentEvent::AudioChunk(frame) => {
                self.mark_agent_turn();
                self.scheduler.enqueue(&frame);
            }
            AgentEvent::TextChunk(text) => {
                self.mark_agent_turn();
                if let Some(entry) = self.transcript.push_agent_fragment(&text) {
                    let entry = entry.clone();
                    self.publish(SessionUpdate::Transcript(entry));
                }
            }
            AgentEvent::ToolCalls(calls) => {
                let outcome = self.dispatcher.dispatch_batch(&mut self.draft, &calls);
                // The whole batch is acknowledged in one message, after
                // every call has been applied.
                self.session.send_tool_results(outcome.results);
                if outcome.cart_changed {
                    self.publish_cart();
                }
                if outcome.finalization_touched {
                    let change = self.flow.refresh(&self.draft);
                    self.apply_flow_change(change);
                }
            }
            AgentEvent::TurnComplete => {
                self.transcript.seal_turn();
                if self.state == SessionState::Speaking {
                    self.set_state(SessionState::Listening);
                }
            }
            AgentEvent::Interrupted => {
                log::info!("✋ Customer interrupted, flushing playback");
                self.scheduler.flush();
            }
            AgentEvent::Error(message) => {
                log::error!("❌ Agent error: {message}");
                self.publish(SessionUpdate::Failed(message));
                return Some(SessionState::Error);
            }
            AgentEvent::Closed => {
                log::info!("Agent closed the session");
                return Some(SessionState::Closed);
            }
        }
        None
    }

    fn handle_command(&mut self, command: Command) -> Option<SessionState> {
        match command {
            Command::Mute(muted) => {
                if let Some(gate) = &self.gate {
                    gate.set_muted(muted);
                }
            }
            Command::SendText(text) => {
                if let Some(entry) = self.transcript.push_customer(&text) {
                    let entry = entry.clone();
                    self.publish(SessionUpdate::Transcript(entry));
                }
                self.session.send_text(&text);
            }
            Command::SelectDelivery(method, address) => {
                self.dispatcher
                    .apply_delivery_choice(&mut self.draft, method, address.clone());
                // Keep the conversation coherent with what the UI did.
                let note = match (method, address) {
                    (DeliveryMethod::Delivery, Some(address)) => {
                        format!("The customer chose delivery to: {address}.")
                    }
                    (DeliveryMethod::Delivery, None) => {
                        "The customer chose delivery.".to_string()
                    }
                    (DeliveryMethod::Pickup, _) => "The customer chose pickup.".to_string(),
                };
                self.session.send_text(&note);
                let change = self.flow.refresh(&self.draft);
                self.apply_flow_change(change);
            }
            Command::ConfirmSubmit => {
                if self.flow.confirm() {
                    if let Some(prompt) = guidance_prompt(FinalizationState::Submitted) {
                        self.session.send_text(prompt);
                    }
                    self.publish(SessionUpdate::Finalization(FinalizationState::Submitted));
                    self.submit();
                }
            }
            Command::CancelAutoSubmit => self.flow.cancel_auto_submit(),
            Command::AutoSubmit => {
                // No prompt here; the grace period existed so the agent's
                // goodbye could finish playing.
                if self.flow.auto_submit_fired() {
                    self.publish(SessionUpdate::Finalization(FinalizationState::Submitted));
                    self.submit();
                }
            }
            Command::Close => return Some(SessionState::Closed),
        }
        None
    }

    fn mark_agent_turn(&mut self) {
        if self.state == SessionState::Listening {
            self.set_state(SessionState::Speaking);
        }
    }

    fn apply_flow_change(&mut self, change: FlowChange) {
        if let Some(entered) = change.entered {
            self.publish(SessionUpdate::Finalization(entered));
        }
        if let Some(prompt) = change.prompt {
            self.session.send_text(prompt);
        }
        if let Some((token, grace)) = change.arm_auto_submit {
            let commands = self.commands_tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(grace) => {
                        let _ = commands.send(Command::AutoSubmit).await;
                    }
                }
            });
        }
    }

    fn submit(&mut self) {
        let record = OrderRecord::from_draft(&self.draft);
        self.publish(SessionUpdate::Submitted(record.clone()));
        let ledger = Arc::clone(&self.ledger);
        let notifier = Arc::clone(&self.notifier);
        // Off the event loop so a slow ledger cannot stall the session.
        tokio::spawn(async move {
            if let Err(e) = ledger.submit(&record).await {
                log::error!("❌ Ledger submission failed: {e}");
            }
            if let Err(e) = notifier.deliver(&record.summary()).await {
                log::error!("❌ Summary hand-off failed: {e}");
            }
        });
    }

    /// The one teardown path: capture first, then playback, then the
    /// network session, then any pending timer. Runs exactly once, on
    /// every way out of the event loop.
    fn release(&mut self, final_state: SessionState) {
        if let Some(gate) = &mut self.gate {
            gate.stop();
        }
        self.scheduler.flush();
        self.scheduler.finish_recording();
        self.session.close();
        self.flow.shutdown();
        self.set_state(final_state);
        log::info!("📴 Session released ({final_state})");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("Session state: {} -> {}", self.state, state);
        self.state = state;
        let _ = self.state_tx.send(state);
        self.publish(SessionUpdate::State(state));
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine; updates are advisory.
        let _ = self.updates.send(update);
    }

    fn publish_cart(&self) {
        self.publish(SessionUpdate::Cart {
            lines: self.draft.lines().to_vec(),
            total: self.draft.total(),
        });
    }
}
