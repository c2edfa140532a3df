use crate::coap::{Packet, Request};
use crate::config::ClientConfig;
use crate::token::Token;
use hashbrown::HashMap;
use rand::Rng;
use std::time::{Duration, Instant};

/// A confirmable request the worker is waiting on a reply for (spec §3, §4.C).
pub struct PendingRequest {
    pub request: Request,
    pub message_id: u16,
    pub first_transmit: Instant,
    pub next_deadline: Instant,
    pub timeout: Duration,
    pub retries_left: u32,
    /// For blockwise downloads: the packet as it was before the Block2 option was
    /// set, so a retry can re-derive the option with whatever block state applies
    /// by the time it fires (spec §3: "saved copy of the CoAP packet prior to the
    /// Block2 option").
    pub block2_base: Option<Packet>,
}

pub enum RetransmitOutcome {
    /// Retransmit timeout doubled, retries decremented; caller should resend.
    Retry,
    /// Retries exhausted; caller should invoke the request's callback with
    /// `Error::Timeout` and tear down the session.
    Exhausted,
}

/// Tracks every in-flight confirmable request, keyed by token, with a secondary
/// index by CoAP message id so piggybacked empty ACKs (same message id, no token)
/// can still be matched to the outstanding request.
pub struct PendingTable {
    by_token: HashMap<Token, PendingRequest>,
    by_message_id: HashMap<u16, Token>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            by_token: HashMap::new(),
            by_message_id: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Registers a freshly transmitted confirmable request, with a randomized
    /// initial retransmit timeout in `[ACK_TIMEOUT, ACK_TIMEOUT * RANDOM_FACTOR]`.
    pub fn insert(
        &mut self,
        request: Request,
        message_id: u16,
        block2_base: Option<Packet>,
        config: &ClientConfig,
        now: Instant,
    ) {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        let timeout = config.initial_retransmit_timeout(jitter);
        let token = request.token;
        self.by_token.insert(
            token,
            PendingRequest {
                request,
                message_id,
                first_transmit: now,
                next_deadline: now + timeout,
                timeout,
                retries_left: config.max_retransmit,
                block2_base,
            },
        );
        self.by_message_id.insert(message_id, token);
    }

    pub fn remove_by_token(&mut self, token: &Token) -> Option<PendingRequest> {
        let entry = self.by_token.remove(token);
        if let Some(entry) = &entry {
            self.by_message_id.remove(&entry.message_id);
        }
        entry
    }

    pub fn token_for_message_id(&self, message_id: u16) -> Option<Token> {
        self.by_message_id.get(&message_id).copied()
    }

    pub fn get(&self, token: &Token) -> Option<&PendingRequest> {
        self.by_token.get(token)
    }

    pub fn get_mut(&mut self, token: &Token) -> Option<&mut PendingRequest> {
        self.by_token.get_mut(token)
    }

    /// The earliest retransmit deadline across every pending entry, used to size
    /// the worker's next wait slice.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_token.values().map(|p| p.next_deadline).min()
    }

    pub fn tokens_due(&self, now: Instant) -> Vec<Token> {
        self.by_token
            .iter()
            .filter(|(_, p)| p.next_deadline <= now)
            .map(|(token, _)| *token)
            .collect()
    }

    /// Applies the retransmit policy to one entry: doubles the timeout, decrements
    /// retries, and reports whether the caller should resend or give up.
    pub fn advance_retransmit(&mut self, token: &Token, now: Instant) -> RetransmitOutcome {
        let entry = self
            .by_token
            .get_mut(token)
            .expect("advance_retransmit called on unknown token");

        if entry.retries_left == 0 {
            return RetransmitOutcome::Exhausted;
        }

        entry.retries_left -= 1;
        entry.timeout *= 2;
        entry.next_deadline = now + entry.timeout;
        RetransmitOutcome::Retry
    }

    pub fn take_all(&mut self) -> Vec<PendingRequest> {
        self.by_message_id.clear();
        self.by_token.drain().map(|(_, p)| p).collect()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap::RequestKind;

    fn dummy_request(token: Token) -> Request {
        Request::new(
            RequestKind::Get { accept: 50 },
            ".d/",
            "x".into(),
            token,
            Instant::now() + Duration::from_secs(30),
        )
    }

    #[test]
    fn retransmit_interval_is_non_decreasing_until_exhaustion() {
        let config = ClientConfig::default();
        let mut table = PendingTable::new();
        let token = Token([1; 8]);
        let now = Instant::now();
        table.insert(dummy_request(token), 1, None, &config, now);

        let mut last_timeout = table.get(&token).unwrap().timeout;
        let mut transmissions = 1u32;

        loop {
            match table.advance_retransmit(&token, now) {
                RetransmitOutcome::Retry => {
                    transmissions += 1;
                    let timeout = table.get(&token).unwrap().timeout;
                    assert!(timeout >= last_timeout);
                    last_timeout = timeout;
                }
                RetransmitOutcome::Exhausted => break,
            }
        }

        // default max_retransmit = 3 -> at most 4 total transmissions.
        assert!(transmissions <= config.max_retransmit + 1);
    }

    #[test]
    fn message_id_resolves_to_token_for_piggybacked_ack() {
        let config = ClientConfig::default();
        let mut table = PendingTable::new();
        let token = Token([2; 8]);
        table.insert(dummy_request(token), 77, None, &config, Instant::now());
        assert_eq!(table.token_for_message_id(77), Some(token));
    }

    #[test]
    fn message_id_index_survives_until_explicit_removal_so_empty_acks_can_match() {
        let config = ClientConfig::default();
        let mut table = PendingTable::new();
        let token = Token([9; 8]);
        let now = Instant::now();
        table.insert(dummy_request(token), 42, None, &config, now);

        let resolved = table.token_for_message_id(42).unwrap();
        assert_eq!(resolved, token);
        let entry = table.get_mut(&resolved).unwrap();
        entry.next_deadline = entry.request.deadline;
        assert_eq!(table.get(&token).unwrap().next_deadline, table.get(&token).unwrap().request.deadline);
    }

    #[test]
    fn removing_a_token_also_clears_the_message_id_index() {
        let config = ClientConfig::default();
        let mut table = PendingTable::new();
        let token = Token([3; 8]);
        table.insert(dummy_request(token), 5, None, &config, Instant::now());
        table.remove_by_token(&token);
        assert_eq!(table.token_for_message_id(5), None);
        assert!(table.is_empty());
    }
}
