use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Mutex;

/// An 8-byte CoAP token. Tokens are compared and hashed as opaque byte strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub [u8; 8]);

impl Token {
    pub const EMPTY: Token = Token([0u8; 8]);

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Generates unique-with-overwhelming-probability 8-byte tokens for the lifetime of a
/// client session. Thread-safe: any producer thread may call `next()`.
///
/// Seeded once from the OS RNG at construction, then advanced with a fast PRNG -- the
/// same "seed once, draw many" discipline the reference SDK uses for its token source.
pub struct TokenAllocator {
    rng: Mutex<StdRng>,
}

impl TokenAllocator {
    pub fn new() -> Self {
        TokenAllocator {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn next(&self) -> Token {
        let mut rng = self.rng.lock().expect("token rng mutex poisoned");
        let mut bytes = [0u8; 8];
        rng.fill_bytes(&mut bytes);
        Token(bytes)
    }
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new()
    }
}
