// Typing-indicator coalescing.
//
// `TypingDebounce` is the pure state machine; `TypingNotifier` drives it
// from a task with a timer and pushes the resulting signals through a
// `HubClient`.

use std::time::Duration;

use intelhub_common::protocol::ws::ClientMessage;
use intelhub_common::types::{ContextId, ContextKind};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::manager::{ConnectionState, HubClient};

type Context = (ContextKind, Option<ContextId>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingSignal {
    Start(ContextKind, Option<ContextId>),
    End(ContextKind, Option<ContextId>),
}

impl TypingSignal {
    pub fn into_message(self) -> ClientMessage {
        match self {
            Self::Start(kind, id) => ClientMessage::typing_start(kind, id),
            Self::End(kind, id) => ClientMessage::typing_end(kind, id),
        }
    }
}

#[derive(Debug)]
pub struct TypingDebounce {
    window: Duration,
    active: Option<Context>,
    deadline: Option<Instant>,
}

impl TypingDebounce {
    pub fn new(window: Duration) -> Self {
        Self { window, active: None, deadline: None }
    }

    /// Record a keystroke. Starts typing on the first input for a context,
    /// ends the previous context on a switch, and otherwise only pushes the
    /// deadline out.
    pub fn input(&mut self, kind: ContextKind, id: Option<ContextId>, now: Instant) -> Vec<TypingSignal> {
        self.deadline = Some(now + self.window);
        let context = (kind, id);
        if self.active.as_ref() == Some(&context) {
            return Vec::new();
        }

        let mut signals = Vec::with_capacity(2);
        if let Some((kind, id)) = self.active.take() {
            signals.push(TypingSignal::End(kind, id));
        }
        signals.push(TypingSignal::Start(context.0, context.1.clone()));
        self.active = Some(context);
        signals
    }

    /// Ends typing once the inactivity window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.stop(),
            _ => None,
        }
    }

    /// Ends typing immediately, if active.
    pub fn stop(&mut self) -> Option<TypingSignal> {
        self.deadline = None;
        self.active.take().map(|(kind, id)| TypingSignal::End(kind, id))
    }

    /// The `Start` to replay on a fresh link while still typing.
    pub fn resume(&self) -> Option<TypingSignal> {
        self.active.clone().map(|(kind, id)| TypingSignal::Start(kind, id))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_typing(&self) -> bool {
        self.active.is_some()
    }
}

/// Keystroke sink for one editor. Dropping it sends any pending
/// `typing_end` and cancels the debounce timer. Active typing is announced
/// again on every new hub link.
#[derive(Debug)]
pub struct TypingNotifier {
    inputs: mpsc::UnboundedSender<Context>,
}

impl TypingNotifier {
    pub(crate) fn spawn(client: HubClient, window: Duration) -> Self {
        let (inputs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_notifier(client, TypingDebounce::new(window), rx));
        Self { inputs }
    }

    pub fn input(&self, kind: ContextKind, id: Option<ContextId>) {
        let _ = self.inputs.send((kind, id));
    }
}

async fn run_notifier(
    client: HubClient,
    mut debounce: TypingDebounce,
    mut inputs: mpsc::UnboundedReceiver<Context>,
) {
    let mut state = client.state_changes();
    state.borrow_and_update();
    let mut watching = true;

    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            input = inputs.recv() => match input {
                Some((kind, id)) => {
                    for signal in debounce.input(kind, id, Instant::now()) {
                        emit(&client, signal);
                    }
                }
                None => {
                    if let Some(signal) = debounce.stop() {
                        emit(&client, signal);
                    }
                    return;
                }
            },
            _ = wait_until(deadline) => {
                if let Some(signal) = debounce.poll(Instant::now()) {
                    emit(&client, signal);
                }
            }
            changed = state.changed(), if watching => match changed {
                Ok(()) => {
                    let connected = *state.borrow_and_update() == ConnectionState::Connected;
                    if let Some(signal) = debounce.resume().filter(|_| connected) {
                        emit(&client, signal);
                    }
                }
                Err(_) => watching = false,
            },
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn emit(client: &HubClient, signal: TypingSignal) {
    if client.send(signal.into_message()).is_err() {
        debug!("typing signal dropped: hub client closed");
    }
}
