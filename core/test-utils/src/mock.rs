use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lxs_interfaces::LightPeerConnection;
use lxs_types::{Bytes, OdrReply, OdrRequest, WireError};
use parking_lot::Mutex;

/// What a [`MockConnection`] does with a request.
#[derive(Clone, Debug)]
pub enum Behavior {
    Reply(OdrReply),
    Delayed(Duration, OdrReply),
    Fail(WireError),
    /// Never answer.
    Hang,
}

type Responder = Box<dyn Fn(&OdrRequest) -> Behavior + Send + Sync>;

/// A scripted light server session.
pub struct MockConnection {
    responder: Responder,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<OdrRequest>>,
    transactions: Mutex<Vec<Bytes>>,
    send_attempts: AtomicUsize,
    send_error: Mutex<Option<WireError>>,
}

impl MockConnection {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&OdrRequest) -> Behavior + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            transactions: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            send_error: Mutex::new(None),
        })
    }

    /// Answers every request with the same reply.
    pub fn replying(reply: OdrReply) -> Arc<Self> {
        Self::new(move |_| Behavior::Reply(reply.clone()))
    }

    pub fn hanging() -> Arc<Self> {
        Self::new(|_| Behavior::Hang)
    }

    pub fn failing(error: WireError) -> Arc<Self> {
        Self::new(move |_| Behavior::Fail(error.clone()))
    }

    /// Make every following transaction send fail with `error`.
    pub fn fail_sends(&self, error: WireError) {
        *self.send_error.lock() = Some(error);
    }

    /// Let transaction sends succeed again.
    pub fn heal_sends(&self) {
        *self.send_error.lock() = None;
    }

    /// Number of transaction sends, failed ones included.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Number of requests this connection received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were outstanding at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<OdrRequest> {
        self.seen.lock().clone()
    }

    pub fn transactions(&self) -> Vec<Bytes> {
        self.transactions.lock().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LightPeerConnection for MockConnection {
    async fn request(&self, request: OdrRequest) -> Result<OdrReply, WireError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let behavior = (self.responder)(&request);
        self.seen.lock().push(request);
        match behavior {
            Behavior::Reply(reply) => Ok(reply),
            Behavior::Delayed(delay, reply) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            },
            Behavior::Fail(error) => Err(error),
            Behavior::Hang => futures::future::pending().await,
        }
    }

    async fn send_transactions(&self, transactions: Vec<Bytes>) -> Result<(), WireError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.send_error.lock().clone() {
            return Err(error);
        }
        self.transactions.lock().extend(transactions);
        Ok(())
    }
}
