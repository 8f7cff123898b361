//! # Streaming Session
//!
//! [`StreamingSession`] tracks one streaming RPC on the client side: it forwards the call and its
//! control signals to a [`Transport`], and buffers everything that was sent or received as an
//! ordered list of [`StreamEntry`]s.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start──▶ Active ──End signal / End event──▶ Ended
//!                   │ ──Cancel signal─────────────▶ Cancelled
//!                   └──Error event────────────────▶ Failed
//! ```
//!
//! Terminal states are only left by starting a new call or by [`StreamingSession::clear`].
//! Inbound events are recorded in arrival order whatever the state is.
use crate::transport::{
    EventReceiver, StreamEvent, StreamSignal, StreamingCall, Transport, TransportError,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Method '{0}' is unary, it cannot be started as a stream")]
    NotStreaming(String),
    #[error("No active stream, messages can only be sent while the stream is active")]
    NotActive,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    Ended,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// One line of a stream's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEntry {
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Absent on end and error markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub terminal: bool,
}

impl StreamEntry {
    pub fn sent(payload: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            payload: Some(payload),
            direction: Some(Direction::Sent),
            terminal: false,
        }
    }

    pub fn received(payload: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            payload: Some(payload),
            direction: Some(Direction::Received),
            terminal: false,
        }
    }

    pub fn error(payload: Value) -> Self {
        Self {
            outcome: Outcome::Failure,
            payload: Some(payload),
            direction: None,
            terminal: true,
        }
    }

    pub fn end() -> Self {
        Self {
            outcome: Outcome::Success,
            payload: None,
            direction: None,
            terminal: true,
        }
    }
}

/// The buffered history of the current streaming call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamSession {
    pub entries: Vec<StreamEntry>,
    pub state: SessionState,
}

impl StreamSession {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Whether the call reported an error.
    ///
    /// An error that arrives after the client closed its side leaves the state `Ended`, so the
    /// recorded entries are checked as well.
    pub fn failed(&self) -> bool {
        self.state == SessionState::Failed
            || self
                .entries
                .iter()
                .any(|entry| entry.outcome == Outcome::Failure)
    }
}

/// Identifies the running call for follow-up signals and messages.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CallTarget {
    address: String,
    full_method: String,
}

pub struct StreamingSession<T> {
    transport: T,
    events: EventReceiver,
    record: StreamSession,
    target: Option<CallTarget>,
}

impl<T: Transport> StreamingSession<T> {
    /// `events` must be the receiving half of the channel `transport` publishes to.
    pub fn new(transport: T, events: EventReceiver) -> Self {
        Self {
            transport,
            events,
            record: StreamSession::default(),
            target: None,
        }
    }

    pub fn record(&self) -> &StreamSession {
        &self.record
    }

    pub fn state(&self) -> SessionState {
        self.record.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Starts a streaming call, discarding the history of the previous one.
    ///
    /// If the transport refuses the call the session falls back to `Idle`.
    pub async fn start(&mut self, call: StreamingCall) -> Result<(), SessionError> {
        if !call.call_shape.is_streaming() {
            return Err(SessionError::NotStreaming(call.full_method));
        }

        self.record = StreamSession {
            entries: Vec::new(),
            state: SessionState::Active,
        };
        self.target = Some(CallTarget {
            address: call.address.clone(),
            full_method: call.full_method.clone(),
        });

        let method = call.full_method.clone();
        let shape = call.call_shape;

        if let Err(err) = self.transport.start_streaming_call(call).await {
            tracing::warn!(method = %method, error = %err, "failed to start streaming call");
            self.record.state = SessionState::Idle;
            return Err(err.into());
        }

        tracing::debug!(method = %method, %shape, "stream session active");
        Ok(())
    }

    /// Forwards a control signal for the current call.
    ///
    /// Signals always reach the transport. Once acknowledged, `Cancel` and `End` close an active
    /// session; in any other state the local state is left as it is.
    pub async fn signal(&mut self, signal: StreamSignal) -> Result<(), SessionError> {
        let (address, full_method) = self.target_parts();
        self.transport
            .send_streaming_signal(&address, &full_method, signal)
            .await?;

        if self.record.is_active() {
            match signal {
                StreamSignal::Cancel => self.transition(SessionState::Cancelled),
                StreamSignal::End => self.transition(SessionState::Ended),
                StreamSignal::Pause | StreamSignal::Resume => {}
            }
        }
        Ok(())
    }

    /// Sends one more message on the active call.
    ///
    /// The message is recorded before the transport is asked to send it and stays recorded
    /// if the transport fails.
    pub async fn send(&mut self, message: Value) -> Result<(), SessionError> {
        if !self.record.is_active() {
            return Err(SessionError::NotActive);
        }

        self.record.entries.push(StreamEntry::sent(message.clone()));

        let (address, full_method) = self.target_parts();
        self.transport
            .send_streaming_message(&address, &full_method, message)
            .await?;
        Ok(())
    }

    /// Records an inbound event.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Data(payload) => {
                self.record.entries.push(StreamEntry::received(payload));
            }
            StreamEvent::Error(payload) => {
                self.record.entries.push(StreamEntry::error(payload));
                if self.record.is_active() {
                    self.transition(SessionState::Failed);
                }
            }
            StreamEvent::End => {
                self.record.entries.push(StreamEntry::end());
                if self.record.is_active() {
                    self.transition(SessionState::Ended);
                }
            }
        }
    }

    /// Waits for the next inbound event and records it.
    ///
    /// Returns `None` once the transport side of the channel is gone.
    pub async fn next_event(&mut self) -> Option<&StreamEntry> {
        let event = self.events.recv().await?;
        self.apply(event);
        self.record.entries.last()
    }

    /// Records every event that is already waiting, without blocking.
    ///
    /// Returns how many events were applied.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Forgets the current call and its history.
    pub fn clear(&mut self) {
        self.record = StreamSession::default();
        self.target = None;
    }

    fn target_parts(&self) -> (String, String) {
        self.target
            .as_ref()
            .map(|t| (t.address.clone(), t.full_method.clone()))
            .unwrap_or_default()
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.record.state, to = ?next, "stream session transition");
        self.record.state = next;
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockTransport, Recorded};
    use super::*;
    use crate::schema::CallShape;
    use crate::transport::event_channel;
    use serde_json::json;

    const ADDRESS: &str = "localhost:50051";
    const METHOD: &str = "orders.OrderService.UploadOrders";

    fn call(shape: CallShape) -> StreamingCall {
        StreamingCall {
            address: ADDRESS.to_string(),
            full_method: METHOD.to_string(),
            request: None,
            streaming_data: None,
            proto_source: None,
            call_shape: shape,
            insecure: true,
        }
    }

    fn session(transport: MockTransport) -> StreamingSession<MockTransport> {
        let (_tx, rx) = event_channel();
        StreamingSession::new(transport, rx)
    }

    #[tokio::test]
    async fn test_client_streaming_walkthrough() {
        let mut session = session(MockTransport::default());

        session.start(call(CallShape::ClientStreaming)).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.record().entries.is_empty());

        session.send(json!({"x": 1})).await.unwrap();
        assert_eq!(
            session.record().entries,
            vec![StreamEntry::sent(json!({"x": 1}))]
        );

        session.apply(StreamEvent::Error(json!({"message": "boom"})));
        assert_eq!(session.state(), SessionState::Failed);
        let last = session.record().entries.last().unwrap();
        assert_eq!(last.outcome, Outcome::Failure);
        assert!(last.terminal);

        session.signal(StreamSignal::Cancel).await.unwrap();
        assert_eq!(session.state(), SessionState::Failed);

        let calls = session.transport().calls();
        assert_eq!(
            calls.last(),
            Some(&Recorded::Signal(
                ADDRESS.to_string(),
                METHOD.to_string(),
                StreamSignal::Cancel
            ))
        );
    }

    #[tokio::test]
    async fn test_unary_shape_is_rejected() {
        let mut session = session(MockTransport::default());

        let err = session.start(call(CallShape::Unary)).await.unwrap_err();

        assert!(matches!(err, SessionError::NotStreaming(m) if m == METHOD));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_reverts_to_idle() {
        let mut session = session(MockTransport::failing("unreachable"));

        let err = session.start(call(CallShape::Bidirectional)).await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(TransportError::Backend(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_send_requires_active_session() {
        let mut session = session(MockTransport::default());

        let err = session.send(json!({"x": 1})).await.unwrap_err();

        assert!(matches!(err, SessionError::NotActive));
        assert!(session.record().entries.is_empty());
        assert!(session.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_keeps_optimistic_entry() {
        let (_tx, rx) = event_channel();
        let mut session = StreamingSession::new(MockTransport::default(), rx);
        session.start(call(CallShape::ClientStreaming)).await.unwrap();

        session.transport.fail_with = Some("stream closed".to_string());
        let err = session.send(json!({"x": 2})).await.unwrap_err();

        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(
            session.record().entries,
            vec![StreamEntry::sent(json!({"x": 2}))]
        );
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_signals_close_active_session() {
        let mut session = session(MockTransport::default());

        session.start(call(CallShape::Bidirectional)).await.unwrap();
        session.signal(StreamSignal::Pause).await.unwrap();
        session.signal(StreamSignal::Resume).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);

        session.signal(StreamSignal::End).await.unwrap();
        assert_eq!(session.state(), SessionState::Ended);

        session.start(call(CallShape::Bidirectional)).await.unwrap();
        session.signal(StreamSignal::Cancel).await.unwrap();
        assert_eq!(session.state(), SessionState::Cancelled);

        // A late end marker is still recorded, but never reopens or changes the state.
        session.apply(StreamEvent::End);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.record().entries, vec![StreamEntry::end()]);
    }

    #[tokio::test]
    async fn test_error_after_end_signal_counts_as_failure() {
        let mut session = session(MockTransport::default());

        session.start(call(CallShape::ClientStreaming)).await.unwrap();
        session.send(json!({"x": 1})).await.unwrap();
        session.signal(StreamSignal::End).await.unwrap();
        assert!(!session.record().failed());

        session.apply(StreamEvent::Error(json!({"code": "Aborted", "message": "gave up"})));

        assert_eq!(session.state(), SessionState::Ended);
        assert!(session.record().failed());
        assert_eq!(
            session.record().entries.last(),
            Some(&StreamEntry::error(
                json!({"code": "Aborted", "message": "gave up"})
            ))
        );
    }

    #[tokio::test]
    async fn test_events_are_recorded_in_arrival_order() {
        let (tx, rx) = event_channel();
        let mut session = StreamingSession::new(MockTransport::default(), rx);
        session.start(call(CallShape::ServerStreaming)).await.unwrap();

        tx.send(StreamEvent::Data(json!({"n": 1}))).unwrap();
        tx.send(StreamEvent::Data(json!({"n": 1}))).unwrap();
        tx.send(StreamEvent::End).unwrap();

        let first = session.next_event().await.cloned();
        assert_eq!(first, Some(StreamEntry::received(json!({"n": 1}))));
        assert_eq!(session.drain_events(), 2);

        assert_eq!(
            session.record().entries,
            vec![
                StreamEntry::received(json!({"n": 1})),
                StreamEntry::received(json!({"n": 1})),
                StreamEntry::end(),
            ]
        );
        assert_eq!(session.state(), SessionState::Ended);

        drop(tx);
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_new_call_discards_previous_record() {
        let mut session = session(MockTransport::default());

        session.start(call(CallShape::ServerStreaming)).await.unwrap();
        session.apply(StreamEvent::Data(json!({"n": 1})));
        session.apply(StreamEvent::End);

        session.start(call(CallShape::ServerStreaming)).await.unwrap();
        assert!(session.record().entries.is_empty());
        assert_eq!(session.state(), SessionState::Active);

        session.clear();
        assert_eq!(session.record(), &StreamSession::default());
    }
}
