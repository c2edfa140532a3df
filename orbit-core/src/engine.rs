//! The single worker thread that owns the DTLS socket and drives every CoAP
//! exchange (spec §4.F). One `Engine` per `Client`; nothing about it is shared
//! across threads except through the `Mailbox` and the atomics the `Client`
//! handle reads.

use crate::blockwise::{BlockwiseDownload, BlockwiseUpload};
use crate::coap::{
    BlockOption, Code, MessageType, Method, ObserveOption, Packet, Request, RequestKind, Response,
};
use crate::config::ClientConfig;
use crate::error::{CoapCode, Error};
use crate::mailbox::Mailbox;
use crate::observation::ObservationRegistry;
use crate::pending::{PendingTable, RetransmitOutcome};
use crate::token::{Token, TokenAllocator};
use crate::transport::DtlsTransport;
use hashbrown::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The worker's coarse state (spec §4.F): `Idle` when stopped, `Connecting` while
/// (re)establishing the session, `Running` once the handshake kick got a reply,
/// `Draining` while tearing everything in-flight down before reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Connecting,
    Running,
    Draining,
}

/// Delivered to the client's event callback on every connect/disconnect transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
}

/// Per-token bookkeeping for an in-progress blockwise transfer. Lives alongside
/// (not inside) the pending-table entry, since a transfer outlives any single
/// confirmable exchange -- each block is its own request/response round trip that
/// reuses the same token (spec §3, §4.E).
enum BlockwiseJob {
    Download(BlockwiseDownload),
    Upload {
        state: BlockwiseUpload,
        last_sent: BlockOption,
        last_was_final: bool,
    },
}

const HANDSHAKE_RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub struct Engine {
    config: ClientConfig,
    mailbox: Arc<Mailbox<Request>>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    transport_factory: Box<dyn FnMut() -> io::Result<Box<dyn DtlsTransport>> + Send>,
    token_allocator: Arc<TokenAllocator>,
    event_callback: Box<dyn FnMut(ClientEvent) + Send>,

    state: WorkerState,
    transport: Option<Box<dyn DtlsTransport>>,
    pending: PendingTable,
    observations: ObservationRegistry,
    blockwise: HashMap<Token, BlockwiseJob>,
    next_message_id: u16,
    last_activity: Instant,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ClientConfig,
        mailbox: Arc<Mailbox<Request>>,
        running: Arc<AtomicBool>,
        connected: Arc<AtomicBool>,
        token_allocator: Arc<TokenAllocator>,
        transport_factory: Box<dyn FnMut() -> io::Result<Box<dyn DtlsTransport>> + Send>,
        event_callback: Box<dyn FnMut(ClientEvent) + Send>,
    ) -> Self {
        let max_observations = config.max_num_observations;
        Engine {
            config,
            mailbox,
            running,
            connected,
            transport_factory,
            token_allocator,
            event_callback,
            state: WorkerState::Idle,
            transport: None,
            pending: PendingTable::new(),
            observations: ObservationRegistry::new(max_observations),
            blockwise: HashMap::new(),
            next_message_id: 1,
            last_activity: Instant::now(),
        }
    }

    /// The worker thread body. Returns once `running` is cleared and every
    /// in-flight request has been drained.
    pub fn run(&mut self) {
        loop {
            match self.state {
                WorkerState::Idle => {
                    if !self.running.load(Ordering::Relaxed) {
                        return;
                    }
                    self.state = WorkerState::Connecting;
                }
                WorkerState::Connecting => {
                    if !self.running.load(Ordering::Relaxed) {
                        return;
                    }
                    self.do_connect();
                }
                WorkerState::Running => {
                    if !self.running.load(Ordering::Relaxed) {
                        self.state = WorkerState::Draining;
                        continue;
                    }
                    self.run_once();
                }
                WorkerState::Draining => {
                    self.do_drain();
                }
            }
        }
    }

    fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    /// Opens a fresh transport, sends the empty-message handshake kick, and waits
    /// for any decodable reply. Any failure backs off one second and stays in
    /// `Connecting` -- there is no separate "disconnected" event here because the
    /// session was never up.
    fn do_connect(&mut self) {
        let mut transport = match (self.transport_factory)() {
            Ok(t) => t,
            Err(error) => {
                debug!(%error, "transport factory failed, retrying");
                thread::sleep(HANDSHAKE_RETRY_BACKOFF);
                return;
            }
        };

        let message_id = self.next_message_id();
        let kick = Packet::empty_delete(MessageType::Confirmable, message_id);
        if transport.send(&kick.encode()).is_err() {
            thread::sleep(HANDSHAKE_RETRY_BACKOFF);
            return;
        }

        match transport.recv(self.config.ack_timeout()) {
            Ok(Some(bytes)) if Packet::decode(&bytes).is_ok() => {
                self.transport = Some(transport);
                self.last_activity = Instant::now();
                self.connected.store(true, Ordering::Relaxed);
                info!("session established");
                (self.event_callback)(ClientEvent::Connected);
                self.reissue_observations();
                self.state = WorkerState::Running;
            }
            _ => {
                debug!("handshake kick got no reply within ack_timeout, retrying");
                thread::sleep(HANDSHAKE_RETRY_BACKOFF);
            }
        }
    }

    /// One iteration of the steady-state loop: drain the mailbox, wait (bounded)
    /// for an inbound datagram, run due retransmits, maybe probe with a keepalive.
    fn run_once(&mut self) {
        while let Some(request) = self.mailbox.try_recv() {
            self.send_request(request, Instant::now());
        }

        let now = Instant::now();
        let mut wake = now + Duration::from_millis(self.config.request_queue_timeout_ms);
        if let Some(deadline) = self.pending.next_deadline() {
            wake = wake.min(deadline);
        }
        if let Some(interval) = self.config.keepalive_interval() {
            wake = wake.min(self.last_activity + interval);
        }
        let slice = wake
            .saturating_duration_since(now)
            .min(Duration::from_millis(self.config.request_queue_timeout_ms));

        let recv_result = match self.transport.as_mut() {
            Some(transport) => transport.recv(slice),
            None => {
                self.state = WorkerState::Draining;
                return;
            }
        };

        match recv_result {
            Ok(Some(bytes)) => {
                self.last_activity = Instant::now();
                self.handle_datagram(&bytes);
            }
            Ok(None) => {}
            Err(_) => {
                self.state = WorkerState::Draining;
                return;
            }
        }

        self.run_retransmits(Instant::now());
        self.maybe_send_keepalive(Instant::now());
    }

    fn maybe_send_keepalive(&mut self, now: Instant) {
        let Some(interval) = self.config.keepalive_interval() else {
            return;
        };
        if now.duration_since(self.last_activity) < interval {
            return;
        }
        let message_id = self.next_message_id();
        let probe = Packet::empty_delete(MessageType::Confirmable, message_id);
        if let Some(transport) = self.transport.as_mut() {
            let _ = transport.send(&probe.encode());
        }
        self.last_activity = now;
    }

    /// Tears down every in-flight request, drops the transport, fires the
    /// `Disconnected` event if the session was actually up, and either sleeps and
    /// reconnects or goes `Idle` depending on whether the client asked to stop.
    fn do_drain(&mut self) {
        for mut entry in self.pending.take_all() {
            entry.request.complete(Err(Error::Timeout));
        }
        self.blockwise.clear();
        self.transport = None;

        if self.connected.swap(false, Ordering::Relaxed) {
            warn!("session lost, tearing down and reconnecting");
            (self.event_callback)(ClientEvent::Disconnected);
        }

        if self.running.load(Ordering::Relaxed) {
            thread::sleep(HANDSHAKE_RETRY_BACKOFF);
            self.state = WorkerState::Connecting;
        } else {
            self.state = WorkerState::Idle;
        }
    }

    /// Assigns every surviving observation slot a fresh token and re-sends its
    /// Observe=0 GET. Notifications route straight back to the slot by its new
    /// token; there is no pending-table entry for the re-registration itself, so a
    /// lost re-registration datagram is silently absorbed by the next notification
    /// gap rather than retried (documented simplification, see DESIGN.md).
    fn reissue_observations(&mut self) {
        let allocator = Arc::clone(&self.token_allocator);
        let reissued = self.observations.reissue_all(|| allocator.next());
        for (path_prefix, path, accept, token) in reissued {
            let message_id = self.next_message_id();
            let mut packet = Packet::request(MessageType::Confirmable, Method::Get, message_id, token);
            packet.add_uri_path(&format!("{path_prefix}{path}"));
            packet.set_accept(accept);
            packet.set_observe(ObserveOption::Register);
            if let Some(transport) = self.transport.as_mut() {
                let _ = transport.send(&packet.encode());
            }
        }
    }

    /// Builds the wire packet for a freshly dequeued request and sends it. Aged-out
    /// requests (past their deadline before ever reaching the wire) are failed
    /// without touching the socket (spec §7).
    fn send_request(&mut self, mut request: Request, now: Instant) {
        if now >= request.deadline {
            request.complete(Err(Error::Timeout));
            return;
        }
        if self.transport.is_none() {
            request.complete(Err(Error::InvalidState));
            return;
        }

        let token = request.token;
        let message_id = self.next_message_id();

        if matches!(request.kind, RequestKind::ObserveRelease) {
            if let Some(released_token) = self.observations.release(request.path_prefix, &request.path) {
                let mut packet =
                    Packet::request(MessageType::NonConfirmable, Method::Get, message_id, released_token);
                packet.add_uri_path(&request.full_path());
                if let Some(transport) = self.transport.as_mut() {
                    let _ = transport.send(&packet.encode());
                }
            }
            let mut request = request;
            request.complete(Ok(Response { code: CoapCode::new(2, 2), payload: Vec::new() }));
            return;
        }

        let mut packet = Packet::new(MessageType::Confirmable, Code::Empty, message_id, token);
        packet.add_uri_path(&request.full_path());

        match &mut request.kind {
            RequestKind::Empty => {
                request.complete(Err(Error::NotImplemented));
                return;
            }
            RequestKind::Get { accept } => {
                packet.code = Code::Method(Method::Get);
                packet.set_accept(*accept);
            }
            RequestKind::Observe { accept } => {
                packet.code = Code::Method(Method::Get);
                packet.set_accept(*accept);
                packet.set_observe(ObserveOption::Register);
            }
            RequestKind::Post { content_type, payload } => {
                packet.code = Code::Method(Method::Post);
                packet.set_content_format(*content_type);
                packet.set_payload(payload.clone());
            }
            RequestKind::Delete => {
                packet.code = Code::Method(Method::Delete);
            }
            RequestKind::GetBlock { accept, block_size, .. } => {
                let download = match BlockwiseDownload::new(*block_size) {
                    Ok(d) => d,
                    Err(e) => {
                        request.complete(Err(e));
                        return;
                    }
                };
                packet.code = Code::Method(Method::Get);
                packet.set_accept(*accept);
                packet.set_block2(download.next_block_option());
                self.blockwise.insert(token, BlockwiseJob::Download(download));
            }
            RequestKind::PostBlock { content_type, block_size, on_block } => {
                let upload = match BlockwiseUpload::new(*block_size) {
                    Ok(u) => u,
                    Err(e) => {
                        request.complete(Err(e));
                        return;
                    }
                };
                let (data, is_last) = match on_block(0) {
                    Ok(v) => v,
                    Err(e) => {
                        request.complete(Err(e));
                        return;
                    }
                };
                let block0 = upload.block_option(0, !is_last);
                packet.code = Code::Method(Method::Post);
                packet.set_content_format(*content_type);
                packet.set_block1(block0);
                packet.set_payload(data);
                self.blockwise.insert(
                    token,
                    BlockwiseJob::Upload {
                        state: upload,
                        last_sent: block0,
                        last_was_final: is_last,
                    },
                );
            }
            RequestKind::ObserveRelease => unreachable!("handled above"),
        }

        self.send_packet_and_track(request, packet, token, now);
    }

    /// Common tail for sending a (re)built packet: on success it becomes a pending
    /// entry awaiting a reply; on transport failure the request fails immediately
    /// and any blockwise state for its token is dropped.
    fn send_packet_and_track(&mut self, request: Request, packet: Packet, token: Token, now: Instant) {
        let message_id = packet.message_id;
        let encoded = packet.encode();
        let send_result = self.transport.as_mut().map(|t| t.send(&encoded));
        match send_result {
            Some(Ok(())) => {
                self.pending
                    .insert(request, message_id, Some(packet), &self.config, now);
            }
            _ => {
                self.blockwise.remove(&token);
                let mut request = request;
                request.complete(Err(Error::Io("transport send failed".to_string())));
            }
        }
    }

    fn handle_datagram(&mut self, bytes: &[u8]) {
        let packet = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(_) => return,
        };

        if packet.mtype == MessageType::Confirmable && packet.code != Code::Empty {
            let ack = Packet::empty(MessageType::Acknowledgement, packet.message_id);
            if let Some(transport) = self.transport.as_mut() {
                let _ = transport.send(&ack.encode());
            }
        }

        if packet.token_len == 0 {
            // Empty ACK carrying no token: the server has only confirmed receipt and
            // will send the real response separately, matched by message id rather
            // than token (spec §4.C, "piggybacked ACK"). Silence further retransmits
            // for that entry until its own deadline rather than completing it here.
            if packet.mtype == MessageType::Acknowledgement && packet.code == Code::Empty {
                if let Some(token) = self.pending.token_for_message_id(packet.message_id) {
                    if let Some(entry) = self.pending.get_mut(&token) {
                        entry.next_deadline = entry.request.deadline;
                    }
                }
            }
            return;
        }

        let token = packet.token;
        if let Some(entry) = self.pending.remove_by_token(&token) {
            self.resolve_pending(entry.request, token, packet);
            return;
        }

        if let Some(slot) = self.observations.find_by_token_mut(&token) {
            let code = packet.response_code().unwrap_or(CoapCode::new(5, 0));
            let response = Response { code, payload: packet.payload };
            if response.is_success() {
                (slot.callback)(Ok(response));
            } else {
                (slot.callback)(Err(Error::CoapResponse(code)));
            }
        }
    }

    fn resolve_pending(&mut self, request: Request, token: Token, packet: Packet) {
        let code = packet.response_code().unwrap_or(CoapCode::new(5, 0));
        match &request.kind {
            RequestKind::GetBlock { .. } => self.resolve_get_block(request, token, code, packet),
            RequestKind::PostBlock { .. } => self.resolve_post_block(request, token, code, packet),
            RequestKind::Observe { .. } => self.resolve_observe(request, token, code, packet),
            _ => {
                let mut request = request;
                if code.is_success() {
                    request.complete(Ok(Response { code, payload: packet.payload }));
                } else {
                    request.complete(Err(Error::CoapResponse(code)));
                }
            }
        }
    }

    fn resolve_observe(&mut self, mut request: Request, token: Token, code: CoapCode, packet: Packet) {
        let response = Response { code, payload: packet.payload };
        let success = response.is_success();
        request.complete(if success {
            Ok(response)
        } else {
            Err(Error::CoapResponse(code))
        });
        if !success {
            return;
        }
        let accept = match &request.kind {
            RequestKind::Observe { accept } => *accept,
            _ => return,
        };
        let path_prefix = request.path_prefix;
        let path = request.path.clone();
        if let Some(callback) = request.into_callback() {
            if let Err((err, mut callback)) = self.observations.register(path_prefix, path, accept, token, callback) {
                warn!(error = %err, path_prefix, "observe registration rejected after first reply, notifying caller");
                callback(Err(err));
            }
        }
    }

    fn resolve_get_block(&mut self, mut request: Request, token: Token, code: CoapCode, packet: Packet) {
        if !code.is_success() {
            self.blockwise.remove(&token);
            request.complete(Err(Error::CoapResponse(code)));
            return;
        }
        let block_opt = match packet.block2() {
            Ok(v) => v,
            Err(_) => {
                self.blockwise.remove(&token);
                request.complete(Err(Error::InvalidFormat));
                return;
            }
        };
        let Some(BlockwiseJob::Download(download)) = self.blockwise.get_mut(&token) else {
            request.complete(Err(Error::InvalidState));
            return;
        };
        match download.on_response(block_opt, packet.payload) {
            Ok((event, more)) => {
                if let RequestKind::GetBlock { on_block, .. } = &mut request.kind {
                    on_block(event);
                }
                if more {
                    self.resend_get_block(request, token, Instant::now());
                } else {
                    self.blockwise.remove(&token);
                    request.complete(Ok(Response { code, payload: Vec::new() }));
                }
            }
            Err(e) => {
                self.blockwise.remove(&token);
                request.complete(Err(e));
            }
        }
    }

    fn resend_get_block(&mut self, request: Request, token: Token, now: Instant) {
        let accept = match &request.kind {
            RequestKind::GetBlock { accept, .. } => *accept,
            _ => return,
        };
        let block_option = match self.blockwise.get(&token) {
            Some(BlockwiseJob::Download(d)) => d.next_block_option(),
            _ => return,
        };
        let message_id = self.next_message_id();
        let mut packet = Packet::request(MessageType::Confirmable, Method::Get, message_id, token);
        packet.add_uri_path(&request.full_path());
        packet.set_accept(accept);
        packet.set_block2(block_option);
        self.send_packet_and_track(request, packet, token, now);
    }

    fn resolve_post_block(&mut self, mut request: Request, token: Token, code: CoapCode, packet: Packet) {
        if !code.is_success() {
            self.blockwise.remove(&token);
            request.complete(Err(Error::CoapResponse(code)));
            return;
        }
        let echoed = packet.block1().ok().flatten();

        let (finished, next_index) = match self.blockwise.get_mut(&token) {
            Some(BlockwiseJob::Upload { state, last_sent, last_was_final }) => {
                if *last_was_final {
                    (true, 0)
                } else {
                    (false, state.on_response(*last_sent, echoed))
                }
            }
            _ => {
                request.complete(Err(Error::InvalidState));
                return;
            }
        };

        if finished {
            self.blockwise.remove(&token);
            request.complete(Ok(Response { code, payload: Vec::new() }));
            return;
        }

        let pulled = match &mut request.kind {
            RequestKind::PostBlock { on_block, .. } => on_block(next_index),
            _ => {
                request.complete(Err(Error::InvalidState));
                return;
            }
        };
        match pulled {
            Ok((data, is_last)) => {
                self.resend_post_block(request, token, next_index, data, is_last, Instant::now());
            }
            Err(e) => {
                self.blockwise.remove(&token);
                request.complete(Err(e));
            }
        }
    }

    fn resend_post_block(
        &mut self,
        request: Request,
        token: Token,
        next_index: u32,
        data: Vec<u8>,
        is_last: bool,
        now: Instant,
    ) {
        let content_type = match &request.kind {
            RequestKind::PostBlock { content_type, .. } => *content_type,
            _ => return,
        };
        let block_option = match self.blockwise.get_mut(&token) {
            Some(BlockwiseJob::Upload { state, last_sent, last_was_final }) => {
                let opt = state.block_option(next_index, !is_last);
                *last_sent = opt;
                *last_was_final = is_last;
                opt
            }
            _ => return,
        };
        let message_id = self.next_message_id();
        let mut packet = Packet::request(MessageType::Confirmable, Method::Post, message_id, token);
        packet.add_uri_path(&request.full_path());
        packet.set_content_format(content_type);
        packet.set_block1(block_option);
        packet.set_payload(data);
        self.send_packet_and_track(request, packet, token, now);
    }

    /// Resends every retransmit-table entry whose deadline has passed, doubling its
    /// timeout, and fails+drops any entry that has exhausted `MAX_RETRANSMIT`. Any
    /// exhaustion is treated as session loss: the worker moves to `Draining` rather
    /// than trying to keep going on what is probably a dead DTLS session.
    fn run_retransmits(&mut self, now: Instant) {
        let due = self.pending.tokens_due(now);
        let mut lost_connection = false;

        for token in due {
            match self.pending.advance_retransmit(&token, now) {
                RetransmitOutcome::Retry => {
                    if let Some(entry) = self.pending.get(&token) {
                        if let Some(packet) = entry.block2_base.clone() {
                            let encoded = packet.encode();
                            if let Some(transport) = self.transport.as_mut() {
                                if transport.send(&encoded).is_err() {
                                    lost_connection = true;
                                }
                            }
                        }
                    }
                }
                RetransmitOutcome::Exhausted => {
                    warn!(?token, "retransmits exhausted, failing request");
                    if let Some(mut entry) = self.pending.remove_by_token(&token) {
                        self.blockwise.remove(&token);
                        entry.request.complete(Err(Error::Timeout));
                    }
                    lost_connection = true;
                }
            }
        }

        if lost_connection {
            self.state = WorkerState::Draining;
        }
    }
}
