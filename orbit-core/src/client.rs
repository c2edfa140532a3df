//! The public handle feature APIs and applications build on: owns the mailbox,
//! the worker thread, and the shared connection-state atomics (spec §3, "Client").

use crate::coap::{BlockReadCallback, BlockWriteCallback, Callback, Outcome, Request, RequestKind, Response};
use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::engine::{ClientEvent, Engine};
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::token::TokenAllocator;
use crate::transport::DtlsTransport;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One DTLS session and one CoAP request pipeline (spec §1). Construct with
/// [`Client::create`], hand it a transport factory and event callback through
/// [`Client::start`], and issue requests with the `get`/`post`/`delete`/`observe`
/// family below. Dropping a started client stops its worker thread.
pub struct Client {
    config: ClientConfig,
    credential: Credential,
    mailbox: Arc<Mailbox<Request>>,
    token_allocator: Arc<TokenAllocator>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Client {
    /// Allocates the mailbox, token allocator, and connection-state atomics. The
    /// worker thread does not exist yet; call [`Client::start`] to bring it up.
    pub fn create(config: ClientConfig, credential: Credential) -> Result<Self> {
        if config.request_queue_max_items < 16 {
            return Err(Error::BadRequest);
        }
        Ok(Client {
            mailbox: Arc::new(Mailbox::new(config.request_queue_max_items)),
            token_allocator: Arc::new(TokenAllocator::new()),
            running: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            worker: None,
            config,
            credential,
        })
    }

    /// Spawns the worker thread. `transport_factory` is called once per (re)connect
    /// attempt to open a fresh DTLS session; `event_callback` fires on every
    /// connect/disconnect transition. Fails with `NotAllowed` if already started.
    pub fn start<F, E>(&mut self, transport_factory: F, event_callback: E) -> Result<()>
    where
        F: FnMut() -> io::Result<Box<dyn DtlsTransport>> + Send + 'static,
        E: FnMut(ClientEvent) + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(Error::NotAllowed);
        }
        self.running.store(true, Ordering::Relaxed);
        let mut engine = Engine::new(
            self.config.clone(),
            Arc::clone(&self.mailbox),
            Arc::clone(&self.running),
            Arc::clone(&self.connected),
            Arc::clone(&self.token_allocator),
            Box::new(transport_factory),
            Box::new(event_callback),
        );
        self.worker = Some(thread::spawn(move || engine.run()));
        Ok(())
    }

    /// Clears the run gate and waits for the worker to finish its current
    /// iteration and exit. Safe to call on an already-stopped client.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn validate_path(&self, path: &str) -> Result<()> {
        Request::validate_path_len(path, self.config.max_path_len)
    }

    fn deadline_for(&self, timeout: Option<Duration>) -> Instant {
        Instant::now() + timeout.unwrap_or_else(|| self.config.response_timeout())
    }

    fn enqueue(&self, request: Request) -> Result<()> {
        self.mailbox.try_send(request)
    }

    fn enqueue_sync(&self, request: Request, timeout: Duration) -> Result<Response> {
        let (request, rx) = request.with_sync_waiter();
        self.enqueue(request)?;
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Fire-and-forget GET; the outcome arrives through `callback` on the worker
    /// thread.
    pub fn get(&self, path_prefix: &'static str, path: impl Into<String>, accept: u16, callback: Callback) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Get { accept },
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        )
        .with_callback(callback);
        self.enqueue(request)
    }

    /// Blocks until the response arrives or `timeout` elapses, whichever is first.
    /// If the caller's own timeout wins, the request still completes in the
    /// background and the late response is discarded (spec §7).
    pub fn get_sync(&self, path_prefix: &'static str, path: impl Into<String>, accept: u16, timeout: Duration) -> Result<Response> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Get { accept },
            path_prefix,
            path,
            self.token_allocator.next(),
            Instant::now() + timeout,
        );
        self.enqueue_sync(request, timeout)
    }

    pub fn post(
        &self,
        path_prefix: &'static str,
        path: impl Into<String>,
        content_type: u16,
        payload: Vec<u8>,
        callback: Callback,
    ) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Post { content_type, payload },
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        )
        .with_callback(callback);
        self.enqueue(request)
    }

    pub fn post_sync(
        &self,
        path_prefix: &'static str,
        path: impl Into<String>,
        content_type: u16,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Response> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Post { content_type, payload },
            path_prefix,
            path,
            self.token_allocator.next(),
            Instant::now() + timeout,
        );
        self.enqueue_sync(request, timeout)
    }

    pub fn delete(&self, path_prefix: &'static str, path: impl Into<String>, callback: Callback) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Delete,
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        )
        .with_callback(callback);
        self.enqueue(request)
    }

    pub fn delete_sync(&self, path_prefix: &'static str, path: impl Into<String>, timeout: Duration) -> Result<Response> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Delete,
            path_prefix,
            path,
            self.token_allocator.next(),
            Instant::now() + timeout,
        );
        self.enqueue_sync(request, timeout)
    }

    /// Blockwise download. `on_block` runs on the worker thread once per received
    /// block; it must return promptly. `block_size` is the caller's preferred
    /// Block2 SZX, renegotiated downward if the server asks for less.
    pub fn get_block(
        &self,
        path_prefix: &'static str,
        path: impl Into<String>,
        accept: u16,
        block_size: u16,
        on_block: BlockReadCallback,
    ) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::GetBlock { accept, block_size, on_block },
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        );
        self.enqueue(request)
    }

    /// Blockwise upload. `on_block` is called with the next block index and must
    /// return that block's bytes plus whether it is the last one.
    pub fn post_block(
        &self,
        path_prefix: &'static str,
        path: impl Into<String>,
        content_type: u16,
        block_size: u16,
        on_block: BlockWriteCallback,
    ) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::PostBlock { content_type, block_size, on_block },
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        );
        self.enqueue(request)
    }

    /// Registers a server-push subscription. `callback` fires once per notification
    /// (including the first). Rejected with `NotAllowed` if `(path_prefix, path)` is
    /// already observed, `MemAlloc` if the observation table is full.
    pub fn observe(&self, path_prefix: &'static str, path: impl Into<String>, accept: u16, callback: Callback) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::Observe { accept },
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        )
        .with_callback(callback);
        self.enqueue(request)
    }

    /// Cancels an observation. A no-op if `(path_prefix, path)` is not observed.
    pub fn observe_release(&self, path_prefix: &'static str, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        self.validate_path(&path)?;
        let request = Request::new(
            RequestKind::ObserveRelease,
            path_prefix,
            path,
            self.token_allocator.next(),
            self.deadline_for(None),
        );
        self.enqueue(request)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Helper so application code (and `orbit-agent`) can build a no-op callback when
/// it only cares about the synchronous path or doesn't need one at all.
pub fn discard_outcome() -> Callback {
    Box::new(|_: Outcome| {})
}
