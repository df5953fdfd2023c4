//! Per-session dispatch queue and worker loop
//!
//! One logical worker per session drains that session's queue in enqueue
//! order: pace (typing indicator plus hold for text), send via the
//! transport, apply the retry policy on failure, then hold again for a
//! randomized inter-message delay. At most one worker task per session is
//! a structural guarantee: the active/paused flags are only ever mutated
//! under the session-map write lock, a worker is spawned in the same
//! critical section that flips `worker_active`, and re-registering a
//! session bumps a generation id that outstanding workers re-check each
//! iteration, so a worker started for a dropped registration exits instead
//! of racing the replacement's worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{ConfigError, GatewayConfig};
use crate::limiter::RateLimiter;
use crate::queue::{
    EnqueueReceipt, MessageDraft, MessageId, MessageKind, MessageStatus, QueueCounters,
    QueueError, QueueSnapshot, QueuedMessage,
};
use crate::transport::{DynTransport, TransportClient, TransportError, TransportResult};

/// Runtime state for one session's queue.
struct SessionQueueState {
    /// Distinguishes this registration from any earlier one under the same
    /// id; a worker holding a stale generation exits at its next iteration
    generation: u64,
    /// Append-only; entries transition status in place, they are never removed
    messages: Vec<QueuedMessage>,
    counters: QueueCounters,
    /// A worker task is currently running for this session
    worker_active: bool,
    /// Cooperative stop: the worker observes this at its next iteration
    /// boundary and exits without losing unprocessed messages
    paused: bool,
}

impl SessionQueueState {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            messages: Vec::new(),
            counters: QueueCounters::default(),
            worker_active: false,
            paused: false,
        }
    }
}

struct Shared {
    config: GatewayConfig,
    limiter: Arc<RateLimiter>,
    transport: DynTransport,
    sessions: RwLock<HashMap<String, SessionQueueState>>,
    generations: AtomicU64,
}

/// Ordered outbound buffers keyed by session id, each drained by a single
/// sequential worker.
#[derive(Clone)]
pub struct DispatchQueue {
    shared: Arc<Shared>,
}

impl DispatchQueue {
    /// Build a dispatch queue over a validated configuration.
    pub fn new(
        config: GatewayConfig,
        limiter: Arc<RateLimiter>,
        transport: DynTransport,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                limiter,
                transport,
                sessions: RwLock::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        })
    }

    /// Open a queue for a session. Idempotent; an existing queue is kept.
    pub fn register_session(&self, session_id: &str) {
        let mut sessions = self.shared.sessions.write();
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            SessionQueueState::new(self.shared.generations.fetch_add(1, Ordering::Relaxed))
        });
    }

    /// Drop a session's queue, including its completed/failed history. A
    /// running worker exits at its next iteration boundary.
    pub fn unregister_session(&self, session_id: &str) {
        let mut sessions = self.shared.sessions.write();
        sessions.remove(session_id);
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.shared.sessions.read().contains_key(session_id)
    }

    /// Admit a message into a session's queue.
    ///
    /// Fails synchronously — with no message created — on an unknown
    /// session, an empty recipient, missing kind-specific fields, or a rate
    /// limit denial. On success the send already counts toward the rate
    /// windows (attempted sends, not successful ones) and a worker is
    /// started if none is active.
    pub fn enqueue(
        &self,
        session_id: &str,
        draft: MessageDraft,
    ) -> Result<EnqueueReceipt, QueueError> {
        if draft.recipient.trim().is_empty() {
            return Err(QueueError::EmptyRecipient);
        }
        let needs_media = matches!(
            draft.kind,
            MessageKind::Image | MessageKind::Document | MessageKind::Sticker
        );
        if needs_media && draft.media_ref.as_deref().unwrap_or("").is_empty() {
            return Err(QueueError::MissingMediaRef(draft.kind));
        }
        if draft.kind == MessageKind::Document
            && draft.file_name.as_deref().unwrap_or("").is_empty()
        {
            return Err(QueueError::MissingFileName);
        }

        let (start, receipt) = {
            let mut sessions = self.shared.sessions.write();
            let state = sessions
                .get_mut(session_id)
                .ok_or_else(|| QueueError::UnknownSession(session_id.to_string()))?;

            self.shared
                .limiter
                .check_admission(session_id, &draft.recipient)?;
            self.shared.limiter.record(session_id, &draft.recipient);

            let message = QueuedMessage::new(session_id, draft);
            let receipt = EnqueueReceipt {
                message_id: message.id.clone(),
                queue_position: state.messages.len() + 1,
            };
            state.messages.push(message);
            state.counters.pending += 1;

            let start = if !state.worker_active && !state.paused {
                state.worker_active = true;
                Some(state.generation)
            } else {
                None
            };
            (start, receipt)
        };

        if let Some(generation) = start {
            debug!(session = %session_id, "starting dispatch worker");
            spawn_worker(Arc::clone(&self.shared), session_id.to_string(), generation);
        }
        Ok(receipt)
    }

    /// Point-in-time snapshot of a session's queue and counters.
    pub fn get_status(&self, session_id: &str) -> Result<QueueSnapshot, QueueError> {
        let sessions = self.shared.sessions.read();
        let state = sessions
            .get(session_id)
            .ok_or_else(|| QueueError::UnknownSession(session_id.to_string()))?;
        Ok(QueueSnapshot {
            pending: state.counters.pending,
            processing: state.counters.processing,
            completed: state.counters.completed,
            failed: state.counters.failed,
            queue: state.messages.clone(),
        })
    }

    /// Stop draining this session. Cooperative: an in-flight send finishes;
    /// the worker exits at its next iteration boundary.
    pub fn pause(&self, session_id: &str) -> Result<(), QueueError> {
        let mut sessions = self.shared.sessions.write();
        let state = sessions
            .get_mut(session_id)
            .ok_or_else(|| QueueError::UnknownSession(session_id.to_string()))?;
        state.paused = true;
        debug!(session = %session_id, "queue paused");
        Ok(())
    }

    /// Resume draining. Idempotent: if a worker is already active this is a
    /// no-op.
    pub fn resume(&self, session_id: &str) -> Result<(), QueueError> {
        let start = {
            let mut sessions = self.shared.sessions.write();
            let state = sessions
                .get_mut(session_id)
                .ok_or_else(|| QueueError::UnknownSession(session_id.to_string()))?;
            state.paused = false;
            if state.worker_active {
                None
            } else {
                state.worker_active = true;
                Some(state.generation)
            }
        };
        if let Some(generation) = start {
            debug!(session = %session_id, "resuming dispatch worker");
            spawn_worker(Arc::clone(&self.shared), session_id.to_string(), generation);
        }
        Ok(())
    }
}

fn spawn_worker(shared: Arc<Shared>, session_id: String, generation: u64) {
    tokio::spawn(run_worker(shared, session_id, generation));
}

/// Sequential drain loop for one session registration. Exits when the
/// queue has no pending message, when the session is paused, or when the
/// registration it was started for is gone (unregistered, or replaced by a
/// newer generation whose own worker takes over); `worker_active` is
/// cleared on the way out in the first two cases so a later enqueue or
/// resume can start a fresh worker.
async fn run_worker(shared: Arc<Shared>, session_id: String, generation: u64) {
    loop {
        let claimed = {
            let mut sessions = shared.sessions.write();
            let Some(state) = sessions.get_mut(&session_id) else {
                debug!(session = %session_id, "session unregistered, worker exiting");
                return;
            };
            if state.generation != generation {
                debug!(session = %session_id, "session re-registered, stale worker exiting");
                return;
            }
            if state.paused {
                state.worker_active = false;
                debug!(session = %session_id, "worker observed pause, exiting");
                return;
            }
            match state
                .messages
                .iter_mut()
                .find(|m| m.status == MessageStatus::Pending)
            {
                Some(message) => {
                    message.status = MessageStatus::Processing;
                    state.counters.pending -= 1;
                    state.counters.processing += 1;
                    Some(message.clone())
                }
                None => {
                    state.worker_active = false;
                    None
                }
            }
        };
        let Some(message) = claimed else {
            debug!(session = %session_id, "queue drained, worker idle");
            return;
        };

        // Human pacing: only text gets the typing indicator and hold; media
        // kinds go straight to the send
        if message.kind == MessageKind::Text {
            let typing_ms = shared
                .config
                .typing_duration_ms(message.body.chars().count());
            if let Err(e) = shared
                .transport
                .send_typing(&session_id, &message.recipient, typing_ms, message.is_group)
                .await
            {
                debug!(session = %session_id, error = %e, "typing indicator failed");
            }
            sleep(Duration::from_millis(typing_ms)).await;
        }

        let result = deliver(shared.transport.as_ref(), &message).await;
        apply_outcome(&shared, &session_id, &message.id, result);

        // Uniform jitter between sends, independent of the hard ceilings
        let delay_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(shared.config.message_delay_min..=shared.config.message_delay_max)
        };
        sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// Dispatch to the kind-specific transport call.
async fn deliver(transport: &dyn TransportClient, message: &QueuedMessage) -> TransportResult<()> {
    match message.kind {
        MessageKind::Text => {
            transport
                .send_text(
                    &message.session_id,
                    &message.recipient,
                    &message.body,
                    message.is_group,
                )
                .await
        }
        MessageKind::Image => {
            let media = require_media(message)?;
            transport
                .send_image(
                    &message.session_id,
                    &message.recipient,
                    media,
                    &message.body,
                    message.is_group,
                )
                .await
        }
        MessageKind::Document => {
            let media = require_media(message)?;
            let file_name = message.file_name.as_deref().ok_or_else(|| {
                TransportError::SendFailed("document message has no file name".to_string())
            })?;
            transport
                .send_document(
                    &message.session_id,
                    &message.recipient,
                    media,
                    file_name,
                    message.is_group,
                )
                .await
        }
        MessageKind::Sticker => {
            let media = require_media(message)?;
            transport
                .send_sticker(&message.session_id, &message.recipient, media, message.is_group)
                .await
        }
    }
}

fn require_media(message: &QueuedMessage) -> TransportResult<&str> {
    message.media_ref.as_deref().ok_or_else(|| {
        TransportError::SendFailed(format!("{} message has no media reference", message.kind))
    })
}

/// Record the delivery result on the message and counters. A transient
/// failure reverts the message to pending — it stays first in list order,
/// so the worker retries it before anything enqueued later.
fn apply_outcome(
    shared: &Shared,
    session_id: &str,
    message_id: &MessageId,
    result: TransportResult<()>,
) {
    let mut sessions = shared.sessions.write();
    let Some(state) = sessions.get_mut(session_id) else {
        return;
    };
    let Some(entry) = state.messages.iter_mut().find(|m| m.id == *message_id) else {
        return;
    };
    match result {
        Ok(()) => {
            entry.status = MessageStatus::Completed;
            state.counters.processing -= 1;
            state.counters.completed += 1;
            debug!(session = %session_id, id = %message_id, "message delivered");
        }
        Err(e) => {
            entry.retry_count += 1;
            entry.last_error = Some(e.to_string());
            if entry.retry_count >= shared.config.max_retry_attempts {
                entry.status = MessageStatus::Failed;
                state.counters.processing -= 1;
                state.counters.failed += 1;
                warn!(
                    session = %session_id,
                    id = %message_id,
                    retries = entry.retry_count,
                    error = %e,
                    "message failed terminally"
                );
            } else {
                entry.status = MessageStatus::Pending;
                state.counters.processing -= 1;
                state.counters.pending += 1;
                warn!(
                    session = %session_id,
                    id = %message_id,
                    attempt = entry.retry_count,
                    error = %e,
                    "send failed, message requeued"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Mock transport that records calls and can be told to always fail.
    struct MockTransport {
        sent: Mutex<Vec<(String, String)>>,
        typing_count: AtomicU32,
        image_count: AtomicU32,
        document_count: AtomicU32,
        sticker_count: AtomicU32,
        fail_sends: bool,
        /// Extra latency per send, to widen observation windows
        send_delay: Duration,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                typing_count: AtomicU32::new(0),
                image_count: AtomicU32::new(0),
                document_count: AtomicU32::new(0),
                sticker_count: AtomicU32::new(0),
                fail_sends: false,
                send_delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                fail_sends: true,
                ..Self::new()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                send_delay: delay,
                ..Self::new()
            }
        }

        fn sent_bodies(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, b)| b.clone()).collect()
        }

        fn send_count(&self) -> usize {
            self.sent.lock().len()
        }

        async fn attempt(&self, recipient: &str, body: &str) -> TransportResult<()> {
            if !self.send_delay.is_zero() {
                sleep(self.send_delay).await;
            }
            if self.fail_sends {
                return Err(TransportError::SendFailed("mock failure".to_string()));
            }
            self.sent
                .lock()
                .push((recipient.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl TransportClient for MockTransport {
        async fn session_exists(&self, _session_id: &str) -> bool {
            false
        }

        async fn send_typing(
            &self,
            _session_id: &str,
            _recipient: &str,
            _duration_ms: u64,
            _is_group: bool,
        ) -> TransportResult<()> {
            self.typing_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn send_text(
            &self,
            _session_id: &str,
            recipient: &str,
            body: &str,
            _is_group: bool,
        ) -> TransportResult<()> {
            self.attempt(recipient, body).await
        }

        async fn send_image(
            &self,
            _session_id: &str,
            recipient: &str,
            media_ref: &str,
            _caption: &str,
            _is_group: bool,
        ) -> TransportResult<()> {
            self.image_count.fetch_add(1, Ordering::Relaxed);
            self.attempt(recipient, media_ref).await
        }

        async fn send_document(
            &self,
            _session_id: &str,
            recipient: &str,
            media_ref: &str,
            _file_name: &str,
            _is_group: bool,
        ) -> TransportResult<()> {
            self.document_count.fetch_add(1, Ordering::Relaxed);
            self.attempt(recipient, media_ref).await
        }

        async fn send_sticker(
            &self,
            _session_id: &str,
            recipient: &str,
            media_ref: &str,
            _is_group: bool,
        ) -> TransportResult<()> {
            self.sticker_count.fetch_add(1, Ordering::Relaxed);
            self.attempt(recipient, media_ref).await
        }

        async fn delete_session(&self, _session_id: &str) -> TransportResult<()> {
            Ok(())
        }
    }

    /// Config with sub-millisecond pacing so tests drain quickly.
    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            max_messages_per_minute: 1_000,
            max_messages_per_hour: 10_000,
            max_messages_per_recipient_per_hour: 10_000,
            max_retry_attempts: 3,
            message_delay_min: 1,
            message_delay_max: 2,
            typing_min_ms: 1,
            typing_max_ms: 2,
        }
    }

    fn make_queue(config: GatewayConfig, transport: Arc<MockTransport>) -> DispatchQueue {
        let limiter = Arc::new(RateLimiter::from_config(&config));
        DispatchQueue::new(config, limiter, transport).expect("valid config")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 5s");
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let config = GatewayConfig {
            message_delay_min: 5_000,
            message_delay_max: 2_000,
            ..fast_config()
        };
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let result = DispatchQueue::new(config, limiter, Arc::new(MockTransport::new()));
        assert!(matches!(result, Err(ConfigError::InvertedRange(..))));
    }

    #[tokio::test]
    async fn enqueue_unknown_session_fails() {
        let queue = make_queue(fast_config(), Arc::new(MockTransport::new()));
        let err = queue
            .enqueue("ghost", MessageDraft::text("r1", "hello"))
            .unwrap_err();
        assert_eq!(err, QueueError::UnknownSession("ghost".to_string()));
    }

    #[tokio::test]
    async fn enqueue_validates_recipient_and_media_fields() {
        let queue = make_queue(fast_config(), Arc::new(MockTransport::new()));
        queue.register_session("s1");

        assert_eq!(
            queue.enqueue("s1", MessageDraft::text("  ", "hello")),
            Err(QueueError::EmptyRecipient)
        );

        let mut image = MessageDraft::image("r1", "", "caption");
        image.media_ref = None;
        assert_eq!(
            queue.enqueue("s1", image),
            Err(QueueError::MissingMediaRef(MessageKind::Image))
        );

        let mut doc = MessageDraft::document("r1", "file://x.pdf", "x.pdf");
        doc.file_name = None;
        assert_eq!(queue.enqueue("s1", doc), Err(QueueError::MissingFileName));

        // Nothing was created by the rejected enqueues
        assert!(queue.get_status("s1").unwrap().queue.is_empty());
    }

    #[tokio::test]
    async fn text_message_completes_with_typing_pacing() {
        let transport = Arc::new(MockTransport::new());
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");

        queue
            .enqueue("s1", MessageDraft::text("r1", "hello"))
            .unwrap();

        let q = queue.clone();
        wait_until(move || q.get_status("s1").unwrap().completed == 1).await;

        let snapshot = queue.get_status("s1").unwrap();
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.processing, 0);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.queue.len(), 1);
        assert_eq!(snapshot.queue[0].status, MessageStatus::Completed);
        assert_eq!(transport.typing_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn media_kinds_map_to_distinct_calls_without_typing() {
        let transport = Arc::new(MockTransport::new());
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");

        queue
            .enqueue("s1", MessageDraft::image("r1", "http://img", "pic"))
            .unwrap();
        queue
            .enqueue("s1", MessageDraft::document("r1", "file://a.pdf", "a.pdf"))
            .unwrap();
        queue
            .enqueue("s1", MessageDraft::sticker("r1", "sticker://wave"))
            .unwrap();

        let q = queue.clone();
        wait_until(move || q.get_status("s1").unwrap().completed == 3).await;

        assert_eq!(transport.image_count.load(Ordering::Relaxed), 1);
        assert_eq!(transport.document_count.load(Ordering::Relaxed), 1);
        assert_eq!(transport.sticker_count.load(Ordering::Relaxed), 1);
        // No typing indicator for media kinds
        assert_eq!(transport.typing_count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn rate_limited_enqueue_creates_no_message() {
        let config = GatewayConfig {
            max_messages_per_minute: 1,
            ..fast_config()
        };
        let queue = make_queue(config, Arc::new(MockTransport::new()));
        queue.register_session("s1");

        queue
            .enqueue("s1", MessageDraft::text("r1", "first"))
            .unwrap();
        let err = queue
            .enqueue("s1", MessageDraft::text("r2", "second"))
            .unwrap_err();
        assert!(matches!(err, QueueError::RateLimited(_)));
        assert!(err.to_string().contains("per minute"));

        // Only the admitted message exists
        assert_eq!(queue.get_status("s1").unwrap().queue.len(), 1);
    }

    #[tokio::test]
    async fn retry_exhaustion_marks_failed_with_final_count() {
        let transport = Arc::new(MockTransport::failing());
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");

        queue
            .enqueue("s1", MessageDraft::text("r1", "doomed"))
            .unwrap();

        let q = queue.clone();
        wait_until(move || q.get_status("s1").unwrap().failed == 1).await;

        let snapshot = queue.get_status("s1").unwrap();
        let msg = &snapshot.queue[0];
        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.retry_count, 3);
        assert!(msg.last_error.as_deref().unwrap().contains("mock failure"));
        // Terminal: the worker goes idle and never retries it again
        sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.get_status("s1").unwrap().queue[0].retry_count, 3);
    }

    #[tokio::test]
    async fn messages_complete_in_enqueue_order() {
        let transport = Arc::new(MockTransport::new());
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");

        for i in 0..5 {
            queue
                .enqueue("s1", MessageDraft::text("r1", format!("msg-{i}")))
                .unwrap();
        }

        let q = queue.clone();
        wait_until(move || q.get_status("s1").unwrap().completed == 5).await;

        let bodies = transport.sent_bodies();
        assert_eq!(bodies, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }

    #[tokio::test]
    async fn pause_buffers_and_resume_drains_in_order() {
        let transport = Arc::new(MockTransport::new());
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");

        queue.pause("s1").unwrap();
        for i in 0..3 {
            queue
                .enqueue("s1", MessageDraft::text("r1", format!("held-{i}")))
                .unwrap();
        }

        // Paused: nothing is delivered
        sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.send_count(), 0);
        assert_eq!(queue.get_status("s1").unwrap().pending, 3);

        queue.resume("s1").unwrap();
        let q = queue.clone();
        wait_until(move || q.get_status("s1").unwrap().completed == 3).await;
        assert_eq!(transport.sent_bodies(), vec!["held-0", "held-1", "held-2"]);
    }

    #[tokio::test]
    async fn resume_is_idempotent_and_processing_never_exceeds_one() {
        let transport = Arc::new(MockTransport::slow(Duration::from_millis(20)));
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");

        for i in 0..4 {
            queue
                .enqueue("s1", MessageDraft::text("r1", format!("msg-{i}")))
                .unwrap();
        }

        // Hammer resume while the worker drains; extra workers would show up
        // as processing > 1 or duplicate sends
        for _ in 0..20 {
            queue.resume("s1").unwrap();
            let snapshot = queue.get_status("s1").unwrap();
            assert!(
                snapshot.processing <= 1,
                "more than one message in flight: {}",
                snapshot.processing
            );
            sleep(Duration::from_millis(10)).await;
        }

        let q = queue.clone();
        wait_until(move || q.get_status("s1").unwrap().completed == 4).await;
        assert_eq!(transport.send_count(), 4);
    }

    #[tokio::test]
    async fn sessions_drain_independently() {
        let transport = Arc::new(MockTransport::new());
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("a");
        queue.register_session("b");
        queue.pause("a").unwrap();

        queue.enqueue("a", MessageDraft::text("r1", "stuck")).unwrap();
        queue.enqueue("b", MessageDraft::text("r1", "flows")).unwrap();

        let q = queue.clone();
        wait_until(move || q.get_status("b").unwrap().completed == 1).await;
        // Session a stays untouched by b's progress
        assert_eq!(queue.get_status("a").unwrap().pending, 1);
    }

    #[tokio::test]
    async fn unregister_drops_queue_and_stops_worker() {
        let transport = Arc::new(MockTransport::slow(Duration::from_millis(20)));
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");
        for i in 0..10 {
            queue
                .enqueue("s1", MessageDraft::text("r1", format!("msg-{i}")))
                .unwrap();
        }

        queue.unregister_session("s1");
        assert!(!queue.is_registered("s1"));
        assert!(matches!(
            queue.get_status("s1"),
            Err(QueueError::UnknownSession(_))
        ));

        // The worker exits at its next boundary instead of draining all ten
        sleep(Duration::from_millis(300)).await;
        assert!(transport.send_count() < 10);
    }

    #[tokio::test]
    async fn stale_worker_exits_after_session_reregistration() {
        let transport = Arc::new(MockTransport::slow(Duration::from_millis(100)));
        let queue = make_queue(fast_config(), transport.clone());
        queue.register_session("s1");
        queue
            .enqueue("s1", MessageDraft::text("r1", "old"))
            .unwrap();

        // Re-register while the first worker's send is still in flight
        sleep(Duration::from_millis(20)).await;
        queue.unregister_session("s1");
        queue.register_session("s1");
        for i in 0..3 {
            queue
                .enqueue("s1", MessageDraft::text("r1", format!("new-{i}")))
                .unwrap();
        }

        // Only the new registration's worker may claim messages: the old
        // worker must exit at its next iteration rather than drain the new
        // queue alongside it
        let q = queue.clone();
        wait_until(move || {
            let snapshot = q.get_status("s1").unwrap();
            assert!(
                snapshot.processing <= 1,
                "more than one message in flight: {}",
                snapshot.processing
            );
            snapshot.completed == 3
        })
        .await;
    }
}
