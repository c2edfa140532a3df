use crate::coap::Callback;
use crate::error::Error;
use crate::token::Token;

/// One active server-push subscription. The full request -- including its token and
/// callback -- is stored inline so the engine can both route inbound notifications
/// and re-issue the observe after a reconnect (spec §3, §4.D).
pub struct ObservationSlot {
    pub path_prefix: &'static str,
    pub path: String,
    pub token: Token,
    pub accept: u16,
    pub callback: Callback,
}

impl ObservationSlot {
    fn matches(&self, path_prefix: &str, path: &str) -> bool {
        self.path_prefix == path_prefix && self.path == path
    }
}

/// Fixed-capacity table of observation slots. Never contains two entries with the
/// same `(path_prefix, path)` pair. Entries survive a disconnect; only the token is
/// refreshed on reconnect.
pub struct ObservationRegistry {
    slots: Vec<ObservationSlot>,
    capacity: usize,
}

impl ObservationRegistry {
    pub fn new(capacity: usize) -> Self {
        ObservationRegistry {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocates a new slot. Fails with `NotAllowed` if the (prefix, path) pair is
    /// already registered, or `MemAlloc` if the table is full. On failure the
    /// `callback` is handed back alongside the error rather than dropped, so the
    /// caller (the engine, which has already delivered the first reply through it)
    /// can still invoke it once with the failure instead of silently going quiet.
    pub fn register(
        &mut self,
        path_prefix: &'static str,
        path: String,
        accept: u16,
        token: Token,
        callback: Callback,
    ) -> std::result::Result<(), (Error, Callback)> {
        if self.slots.iter().any(|s| s.matches(path_prefix, &path)) {
            return Err((Error::NotAllowed, callback));
        }
        if self.slots.len() >= self.capacity {
            return Err((Error::MemAlloc, callback));
        }
        self.slots.push(ObservationSlot {
            path_prefix,
            path,
            token,
            accept,
            callback,
        });
        Ok(())
    }

    /// Eagerly releases an observation: the caller sends the cancel GET using the
    /// returned token, then this frees the slot. Cancelling an unknown
    /// (prefix, path) is a no-op and does not mutate the registry.
    pub fn release(&mut self, path_prefix: &str, path: &str) -> Option<Token> {
        let index = self.slots.iter().position(|s| s.matches(path_prefix, path))?;
        Some(self.slots.remove(index).token)
    }

    pub fn find_by_token_mut(&mut self, token: &Token) -> Option<&mut ObservationSlot> {
        self.slots.iter_mut().find(|s| &s.token == token)
    }

    /// Assigns a freshly generated token to every slot, returning the
    /// `(path_prefix, path, accept, new_token)` tuples the engine must re-send as
    /// fresh Observe=0 GETs. Called once per reconnect.
    pub fn reissue_all<F: FnMut() -> Token>(
        &mut self,
        mut next_token: F,
    ) -> Vec<(&'static str, String, u16, Token)> {
        let mut reissued = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            slot.token = next_token();
            reissued.push((slot.path_prefix, slot.path.clone(), slot.accept, slot.token));
        }
        reissued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> Callback {
        Box::new(|_| {})
    }

    #[test]
    fn rejects_duplicate_prefix_and_path() {
        let mut registry = ObservationRegistry::new(4);
        registry
            .register(".c/", "desired".into(), 60, Token([1; 8]), noop_callback())
            .unwrap();
        let (err, _callback) = registry
            .register(".c/", "desired".into(), 60, Token([2; 8]), noop_callback())
            .unwrap_err();
        assert!(matches!(err, Error::NotAllowed));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut registry = ObservationRegistry::new(1);
        registry
            .register(".c/", "a".into(), 60, Token([1; 8]), noop_callback())
            .unwrap();
        let (err, _callback) = registry
            .register(".c/", "b".into(), 60, Token([2; 8]), noop_callback())
            .unwrap_err();
        assert!(matches!(err, Error::MemAlloc));
    }

    #[test]
    fn release_of_unknown_token_is_a_no_op() {
        let mut registry = ObservationRegistry::new(4);
        registry
            .register(".c/", "a".into(), 60, Token([1; 8]), noop_callback())
            .unwrap();
        assert_eq!(registry.release(".c/", "nonexistent"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reissue_gives_every_slot_a_fresh_distinct_token() {
        let mut registry = ObservationRegistry::new(4);
        registry
            .register(".c/", "a".into(), 60, Token([1; 8]), noop_callback())
            .unwrap();
        registry
            .register(".u/", "desired".into(), 60, Token([2; 8]), noop_callback())
            .unwrap();

        let mut counter = 10u8;
        let reissued = registry.reissue_all(|| {
            counter += 1;
            Token([counter; 8])
        });

        assert_eq!(reissued.len(), 2);
        let tokens: Vec<_> = reissued.iter().map(|(_, _, _, t)| *t).collect();
        assert_ne!(tokens[0].0, tokens[1].0);
        assert_ne!(tokens[0].0, [1u8; 8]);
    }
}
