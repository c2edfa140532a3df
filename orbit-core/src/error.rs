use std::io;

/// CoAP response code, split into class and detail the way RFC 7252 packs them into
/// a single byte (`code = (class << 5) | detail`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoapCode {
    pub class: u8,
    pub detail: u8,
}

impl CoapCode {
    pub const fn new(class: u8, detail: u8) -> Self {
        CoapCode { class, detail }
    }

    pub fn is_success(self) -> bool {
        self.class == 2
    }

    pub fn from_byte(byte: u8) -> Self {
        CoapCode {
            class: byte >> 5,
            detail: byte & 0x1f,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.class << 5) | (self.detail & 0x1f)
    }
}

/// Every error the request engine, blockwise transfer, and feature APIs can surface.
///
/// `Ok` is intentionally not a variant here: callers use `Result<T, Error>` directly,
/// unlike the C enumeration this is ported from (see DESIGN.md).
///
/// Carries its `Io` variant as a formatted string rather than `io::Error` itself so
/// the whole enum stays `Clone` -- the sync-call handshake in `Request::complete`
/// needs to hand the exact same outcome to both a callback and a waiting receiver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("operation failed")]
    Fail,
    #[error("dns lookup failed")]
    DnsLookup,
    #[error("not implemented")]
    NotImplemented,
    #[error("memory allocation failed")]
    MemAlloc,
    #[error("null argument")]
    Null,
    #[error("invalid format")]
    InvalidFormat,
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("request timed out")]
    Timeout,
    #[error("request queue is full")]
    QueueFull,
    #[error("operation not allowed in current state")]
    NotAllowed,
    #[error("invalid worker state for this operation")]
    InvalidState,
    #[error("no more data")]
    NoMoreData,
    #[error("coap response: {0:?}")]
    CoapResponse(CoapCode),
    #[error("invalid block size")]
    InvalidBlockSize,
    #[error("bad request")]
    BadRequest,
    #[error("request was negatively acknowledged")]
    Nack,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
