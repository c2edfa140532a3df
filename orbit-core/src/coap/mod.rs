pub mod packet;
pub mod request;

pub use packet::{BlockOption, Code, MessageType, Method, ObserveOption, Packet};
pub use request::{
    BlockEvent, BlockReadCallback, BlockWriteCallback, Callback, Outcome, Request, RequestKind,
    Response,
};
