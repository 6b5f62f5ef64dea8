//! Shared fixtures for the in-memory integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use ticketq::engine::{Engine, RetryPolicy, Shutdown, SubmissionRequest, Worker, WorkerConfig};
use ticketq::error::{Error, Result};
use ticketq::model::{NewTicket, SubmissionId, Ticket, TicketId};
use ticketq::queue::{Dispatch, DispatchQueue, MemoryQueue};
use ticketq::store::{MemorySubmissionStore, MemoryTicketStore, TicketStore};

/// Ticket collaborator that fails its first `n` creates.
#[derive(Default)]
pub struct FlakyTickets {
    inner: MemoryTicketStore,
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl FlakyTickets {
    pub fn failing(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Create attempts seen, successful or not.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn stored(&self) -> Vec<Ticket> {
        self.inner.all().await
    }
}

#[async_trait]
impl TicketStore for FlakyTickets {
    async fn create(&self, new: NewTicket) -> Result<Ticket> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Other("ticket service unavailable".into()));
        }
        self.inner.create(new).await
    }

    async fn get(&self, id: TicketId) -> Result<Ticket> {
        self.inner.get(id).await
    }

    async fn find_by_submission(&self, id: SubmissionId) -> Result<Option<Ticket>> {
        self.inner.find_by_submission(id).await
    }
}

/// Queue that refuses every enqueue.
pub struct BrokenQueue;

#[async_trait]
impl DispatchQueue for BrokenQueue {
    async fn enqueue(&self, _: SubmissionId, _: Duration) -> Result<i64> {
        Err(Error::Queue("broker unreachable".into()))
    }

    async fn dequeue(&self, _: Duration) -> Result<Option<Dispatch>> {
        Ok(None)
    }

    async fn ack(&self, _: &Dispatch) -> Result<()> {
        Ok(())
    }
}

/// In-memory stores, queue and engine wired together.
pub struct Harness {
    pub submissions: Arc<MemorySubmissionStore>,
    pub tickets: Arc<FlakyTickets>,
    pub queue: Arc<MemoryQueue>,
    pub engine: Engine,
    pub shutdown: Shutdown,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ticket_failures(0)
    }

    pub fn with_ticket_failures(n: u32) -> Self {
        let submissions = Arc::new(MemorySubmissionStore::new());
        let tickets = Arc::new(FlakyTickets::failing(n));
        let queue = Arc::new(MemoryQueue::new());
        let engine = Engine::new(submissions.clone(), tickets.clone(), queue.clone());
        Self {
            submissions,
            tickets,
            queue,
            engine,
            shutdown: Shutdown::new(),
        }
    }

    pub fn worker(&self, retry: RetryPolicy) -> Worker {
        Worker::new(
            self.submissions.clone(),
            self.tickets.clone(),
            self.queue.clone(),
            WorkerConfig {
                visibility_timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(20),
                retry,
            },
            &self.shutdown,
        )
    }

    /// Process dispatches until none is visible. Returns how many ran.
    pub async fn drain(&self, worker: &Worker) -> usize {
        let mut handled = 0;
        while worker.process_next().await.unwrap() {
            handled += 1;
            assert!(handled < 100, "queue never drained");
        }
        handled
    }
}

/// Retries without waiting between attempts.
pub fn no_backoff(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

pub fn laptop() -> Value {
    json!({"title": "Laptop provisioning", "form_id": 1, "priority": "high"})
}

pub fn request(body: Value) -> SubmissionRequest {
    SubmissionRequest::from_json(body).unwrap()
}

pub fn with_reference(reference: &str) -> SubmissionRequest {
    request(laptop()).client_reference(reference)
}
