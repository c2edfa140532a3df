use crate::error::{CoapCode, Error, Result};
use crate::token::Token;
use std::sync::mpsc;
use std::time::Instant;

/// A decoded application-layer response: the CoAP response code plus payload bytes.
#[derive(Debug, Clone)]
pub struct Response {
    pub code: CoapCode,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// Result handed to a request's completion callback or synchronous waiter.
pub type Outcome = Result<Response>;

/// Called once per notification for `observe`, or once for any non-blockwise request.
pub type Callback = Box<dyn FnMut(Outcome) + Send>;

/// Called once per received block on a blockwise download. `is_last` mirrors the
/// "more" bit inverted; the callback runs on the worker thread and must return
/// quickly (per spec §4.E).
pub type BlockReadCallback = Box<dyn FnMut(BlockEvent) + Send>;

/// Called to pull the next chunk to send on a blockwise upload. Returns the chunk
/// bytes and whether it is the last one.
pub type BlockWriteCallback = Box<dyn FnMut(u32) -> Result<(Vec<u8>, bool)> + Send>;

#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub index: u32,
    pub block_size: u16,
    pub data: Vec<u8>,
    pub is_last: bool,
}

/// The request's type tag (spec §3, "Request message").
pub enum RequestKind {
    /// Empty CoAP message: handshake kick or keepalive probe. No callback fires.
    Empty,
    Get {
        accept: u16,
    },
    GetBlock {
        accept: u16,
        block_size: u16,
        on_block: BlockReadCallback,
    },
    Post {
        content_type: u16,
        payload: Vec<u8>,
    },
    PostBlock {
        content_type: u16,
        block_size: u16,
        on_block: BlockWriteCallback,
    },
    Delete,
    Observe {
        accept: u16,
    },
    /// Cancels whichever observation is registered under this request's own
    /// `path_prefix`/`path`; the engine looks the token up itself, since it is the
    /// only side that ever learns it (spec §3, "observation table").
    ObserveRelease,
}

impl std::fmt::Debug for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestKind::Empty => "Empty",
            RequestKind::Get { .. } => "Get",
            RequestKind::GetBlock { .. } => "GetBlock",
            RequestKind::Post { .. } => "Post",
            RequestKind::PostBlock { .. } => "PostBlock",
            RequestKind::Delete => "Delete",
            RequestKind::Observe { .. } => "Observe",
            RequestKind::ObserveRelease { .. } => "ObserveRelease",
        };
        write!(f, "RequestKind::{name}")
    }
}

/// A request message as it sits in the mailbox or pending table. Payload buffers are
/// owned by whichever side last held them: the enqueuer until the worker sends it,
/// the worker afterward.
pub struct Request {
    pub kind: RequestKind,
    pub path_prefix: &'static str,
    pub path: String,
    pub token: Token,
    pub deadline: Instant,
    callback: Option<Callback>,
    sync_tx: Option<mpsc::Sender<Outcome>>,
}

impl Request {
    pub fn new(
        kind: RequestKind,
        path_prefix: &'static str,
        path: String,
        token: Token,
        deadline: Instant,
    ) -> Self {
        Request {
            kind,
            path_prefix,
            path,
            token,
            deadline,
            callback: None,
            sync_tx: None,
        }
    }

    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Attaches a synchronous waiter. Returns the receiving half the caller blocks
    /// on. Because `mpsc::Sender::send` on a dropped receiver simply errors instead
    /// of touching freed memory, this sidesteps the event/ack teardown handshake the
    /// reference implementation needs in C (see DESIGN.md).
    pub fn with_sync_waiter(mut self) -> (Self, mpsc::Receiver<Outcome>) {
        let (tx, rx) = mpsc::channel();
        self.sync_tx = Some(tx);
        (self, rx)
    }

    pub fn full_path(&self) -> String {
        format!("{}{}", self.path_prefix, self.path)
    }

    /// Validates the path length against the configured ceiling. Programming errors
    /// like this are returned synchronously and never enqueue anything (spec §7).
    pub fn validate_path_len(path: &str, max_len: usize) -> Result<()> {
        if path.len() > max_len {
            Err(Error::BadRequest)
        } else {
            Ok(())
        }
    }

    /// Delivers the outcome to whichever waiter is attached, exactly once.
    pub fn complete(&mut self, outcome: Outcome) {
        if let Some(tx) = self.sync_tx.take() {
            let _ = tx.send(outcome.clone());
        }
        if let Some(callback) = self.callback.as_mut() {
            callback(outcome);
        }
    }

    pub fn has_waiter(&self) -> bool {
        self.sync_tx.is_some() || self.callback.is_some()
    }

    /// Hands back the completion callback, leaving `None` in its place. Used once,
    /// when an `Observe` registration's first reply succeeds: the same callback that
    /// received that first value becomes the notification sink the engine holds in
    /// the observation registry for every value after it.
    pub fn into_callback(mut self) -> Option<Callback> {
        self.callback.take()
    }
}
