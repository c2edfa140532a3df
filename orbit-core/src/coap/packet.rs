//! Minimal CoAP (RFC 7252) packet codec: just enough of the wire format to drive
//! the request engine -- header, token, the options this SDK actually sends
//! (Uri-Path, Content-Format, Accept, Observe, Block1, Block2), and payload.

use crate::error::{CoapCode, Error, Result};
use crate::token::Token;
use byteorder::{BigEndian, ByteOrder};

pub const VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }

    fn from_bits(bits: u8) -> Result<Self> {
        Ok(match bits {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            3 => MessageType::Reset,
            _ => return Err(Error::InvalidFormat),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn code(self) -> CoapCode {
        match self {
            Method::Get => CoapCode::new(0, 1),
            Method::Post => CoapCode::new(0, 2),
            Method::Put => CoapCode::new(0, 3),
            Method::Delete => CoapCode::new(0, 4),
        }
    }
}

/// Either an outbound request code or an inbound response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Empty,
    Method(Method),
    Response(CoapCode),
}

impl Code {
    fn to_byte(self) -> u8 {
        match self {
            Code::Empty => 0,
            Code::Method(m) => m.code().to_byte(),
            Code::Response(c) => c.to_byte(),
        }
    }

    fn from_byte(byte: u8) -> Code {
        if byte == 0 {
            return Code::Empty;
        }
        let code = CoapCode::from_byte(byte);
        if code.class == 0 {
            let method = match code.detail {
                1 => Method::Get,
                2 => Method::Post,
                3 => Method::Put,
                4 => Method::Delete,
                _ => return Code::Response(code),
            };
            Code::Method(method)
        } else {
            Code::Response(code)
        }
    }
}

/// CoAP option numbers used by this SDK (RFC 7252 §12.2, RFC 7959, RFC 7641).
pub mod option {
    pub const OBSERVE: u16 = 6;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOption {
    Register,
    Cancel,
}

impl ObserveOption {
    pub fn value(self) -> u32 {
        match self {
            ObserveOption::Register => 0,
            ObserveOption::Cancel => 1,
        }
    }
}

/// A Block1/Block2 option value: block number, more-blocks flag, and SZX
/// (`block_size = 1 << (szx + 4)`, 16..=1024 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

impl BlockOption {
    pub fn block_size(self) -> usize {
        1usize << (self.szx as u32 + 4)
    }

    pub fn szx_for_size(size: u16) -> Option<u8> {
        match size {
            16 => Some(0),
            32 => Some(1),
            64 => Some(2),
            128 => Some(3),
            256 => Some(4),
            512 => Some(5),
            1024 => Some(6),
            _ => None,
        }
    }

    fn encode(self) -> Vec<u8> {
        let value: u32 = (self.num << 4) | ((self.more as u32) << 3) | (self.szx as u32 & 0x7);
        encode_uint(value)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > 3 {
            return Err(Error::InvalidFormat);
        }
        let value = decode_uint(bytes);
        Ok(BlockOption {
            num: value >> 4,
            more: (value & 0x8) != 0,
            szx: (value & 0x7) as u8,
        })
    }
}

fn encode_uint(mut value: u32) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut bytes = Vec::new();
    while value > 0 {
        bytes.push((value & 0xff) as u8);
        value >>= 8;
    }
    bytes.reverse();
    bytes
}

fn decode_uint(bytes: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &byte in bytes {
        value = (value << 8) | byte as u32;
    }
    value
}

#[derive(Debug, Clone)]
struct RawOption {
    number: u16,
    value: Vec<u8>,
}

/// A fully decoded/to-be-encoded CoAP message.
#[derive(Debug, Clone)]
pub struct Packet {
    pub mtype: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Token,
    pub token_len: u8,
    options: Vec<RawOption>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(mtype: MessageType, code: Code, message_id: u16, token: Token) -> Self {
        Packet {
            mtype,
            code,
            message_id,
            token,
            token_len: 8,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// An empty CoAP message (Code 0.00, zero-length token): an ACK to a
    /// confirmable message this SDK doesn't otherwise act on.
    pub fn empty(mtype: MessageType, message_id: u16) -> Self {
        Packet {
            mtype,
            code: Code::Empty,
            message_id,
            token: Token::EMPTY,
            token_len: 0,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// The handshake kick and keepalive probe: an empty-payload DELETE with no
    /// token (spec §6, "the client sends an empty CoAP DELETE at startup and again
    /// every `KEEPALIVE_INTERVAL` idle seconds").
    pub fn empty_delete(mtype: MessageType, message_id: u16) -> Self {
        Packet {
            mtype,
            code: Code::Method(Method::Delete),
            message_id,
            token: Token::EMPTY,
            token_len: 0,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn request(mtype: MessageType, method: Method, message_id: u16, token: Token) -> Self {
        Packet::new(mtype, Code::Method(method), message_id, token)
    }

    pub fn add_uri_path(&mut self, path: &str) {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options.push(RawOption {
                number: option::URI_PATH,
                value: segment.as_bytes().to_vec(),
            });
        }
    }

    pub fn uri_path(&self) -> String {
        let mut segments = Vec::new();
        for opt in &self.options {
            if opt.number == option::URI_PATH {
                segments.push(String::from_utf8_lossy(&opt.value).into_owned());
            }
        }
        segments.join("/")
    }

    pub fn set_content_format(&mut self, format: u16) {
        self.options.push(RawOption {
            number: option::CONTENT_FORMAT,
            value: encode_uint(format as u32),
        });
    }

    pub fn content_format(&self) -> Option<u16> {
        self.find_option(option::CONTENT_FORMAT)
            .map(|v| decode_uint(v) as u16)
    }

    pub fn set_accept(&mut self, format: u16) {
        self.options.push(RawOption {
            number: option::ACCEPT,
            value: encode_uint(format as u32),
        });
    }

    pub fn set_observe(&mut self, observe: ObserveOption) {
        self.options.push(RawOption {
            number: option::OBSERVE,
            value: encode_uint(observe.value()),
        });
    }

    pub fn observe_value(&self) -> Option<u32> {
        self.find_option(option::OBSERVE).map(decode_uint)
    }

    pub fn set_block1(&mut self, block: BlockOption) {
        self.options.push(RawOption {
            number: option::BLOCK1,
            value: block.encode(),
        });
    }

    pub fn block1(&self) -> Result<Option<BlockOption>> {
        self.find_option(option::BLOCK1)
            .map(|v| BlockOption::decode(v))
            .transpose()
    }

    pub fn set_block2(&mut self, block: BlockOption) {
        self.options.push(RawOption {
            number: option::BLOCK2,
            value: block.encode(),
        });
    }

    pub fn block2(&self) -> Result<Option<BlockOption>> {
        self.find_option(option::BLOCK2)
            .map(|v| BlockOption::decode(v))
            .transpose()
    }

    fn find_option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    pub fn response_code(&self) -> Option<CoapCode> {
        match self.code {
            Code::Response(code) => Some(code),
            _ => None,
        }
    }

    /// Serializes the packet to its RFC 7252 wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.payload.len());

        let first = (VERSION << 6) | (self.mtype.bits() << 4) | self.token_len;
        out.push(first);
        out.push(self.code.to_byte());
        let mut mid_bytes = [0u8; 2];
        BigEndian::write_u16(&mut mid_bytes, self.message_id);
        out.extend_from_slice(&mid_bytes);
        out.extend_from_slice(&self.token.as_bytes()[..self.token_len as usize]);

        let mut sorted_options = self.options.clone();
        sorted_options.sort_by_key(|o| o.number);

        let mut last_number = 0u16;
        for opt in &sorted_options {
            let delta = opt.number - last_number;
            last_number = opt.number;
            encode_option_header(&mut out, delta, opt.value.len() as u16);
            out.extend_from_slice(&opt.value);
        }

        if !self.payload.is_empty() {
            out.push(0xff);
            out.extend_from_slice(&self.payload);
        }

        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        if bytes.len() < 4 {
            return Err(Error::InvalidFormat);
        }
        let first = bytes[0];
        let version = first >> 6;
        if version != VERSION {
            return Err(Error::InvalidFormat);
        }
        let mtype = MessageType::from_bits((first >> 4) & 0x3)?;
        let token_len = first & 0xf;
        if token_len > 8 {
            return Err(Error::InvalidFormat);
        }
        let code = Code::from_byte(bytes[1]);
        let message_id = BigEndian::read_u16(&bytes[2..4]);

        let mut cursor = 4usize;
        let token_len = token_len as usize;
        if bytes.len() < cursor + token_len {
            return Err(Error::InvalidFormat);
        }
        let mut token = [0u8; 8];
        token[..token_len].copy_from_slice(&bytes[cursor..cursor + token_len]);
        cursor += token_len;

        let mut options = Vec::new();
        let mut last_number = 0u16;
        while cursor < bytes.len() {
            if bytes[cursor] == 0xff {
                cursor += 1;
                break;
            }
            let (number, value, consumed) = decode_option(&bytes[cursor..], last_number)?;
            last_number = number;
            cursor += consumed;
            options.push(RawOption { number, value });
        }

        let payload = bytes[cursor..].to_vec();

        Ok(Packet {
            mtype,
            code,
            message_id,
            token: Token(token),
            token_len: token_len as u8,
            options,
            payload,
        })
    }
}

fn encode_option_header(out: &mut Vec<u8>, delta: u16, length: u16) {
    let (delta_nibble, delta_ext) = split_option_value(delta);
    let (length_nibble, length_ext) = split_option_value(length);
    out.push((delta_nibble << 4) | length_nibble);
    if let Some(ext) = delta_ext {
        push_ext(out, ext);
    }
    if let Some(ext) = length_ext {
        push_ext(out, ext);
    }
}

fn split_option_value(value: u16) -> (u8, Option<u16>) {
    if value < 13 {
        (value as u8, None)
    } else if value < 269 {
        (13, Some(value - 13))
    } else {
        (14, Some(value - 269))
    }
}

fn push_ext(out: &mut Vec<u8>, ext: u16) {
    if ext < 256 {
        out.push(ext as u8);
    } else {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, ext);
        out.extend_from_slice(&bytes);
    }
}

fn decode_option(bytes: &[u8], last_number: u16) -> Result<(u16, Vec<u8>, usize)> {
    if bytes.is_empty() {
        return Err(Error::InvalidFormat);
    }
    let header = bytes[0];
    let delta_nibble = header >> 4;
    let length_nibble = header & 0xf;
    let mut cursor = 1usize;

    let delta = read_ext_value(delta_nibble, bytes, &mut cursor)?;
    let length = read_ext_value(length_nibble, bytes, &mut cursor)? as usize;

    if bytes.len() < cursor + length {
        return Err(Error::InvalidFormat);
    }
    let value = bytes[cursor..cursor + length].to_vec();
    cursor += length;

    Ok((last_number + delta, value, cursor))
}

fn read_ext_value(nibble: u8, bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    match nibble {
        15 => Err(Error::InvalidFormat),
        14 => {
            if bytes.len() < *cursor + 2 {
                return Err(Error::InvalidFormat);
            }
            let ext = BigEndian::read_u16(&bytes[*cursor..*cursor + 2]);
            *cursor += 2;
            Ok(ext + 269)
        }
        13 => {
            if bytes.len() < *cursor + 1 {
                return Err(Error::InvalidFormat);
            }
            let ext = bytes[*cursor] as u16;
            *cursor += 1;
            Ok(ext + 13)
        }
        n => Ok(n as u16),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(byte: u8) -> Token {
        Token([byte; 8])
    }

    #[test]
    fn round_trips_a_get_with_path_and_accept() {
        let mut packet = Packet::request(MessageType::Confirmable, Method::Get, 0x1234, token(7));
        packet.add_uri_path(".d/my_int");
        packet.set_accept(50);

        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).unwrap();

        assert_eq!(decoded.mtype, MessageType::Confirmable);
        assert_eq!(decoded.code, Code::Method(Method::Get));
        assert_eq!(decoded.message_id, 0x1234);
        assert_eq!(decoded.token.0[..7], [7u8; 7]);
        assert_eq!(decoded.uri_path(), ".d/my_int");
        assert_eq!(decoded.content_format(), None);
    }

    #[test]
    fn round_trips_post_with_payload_and_content_format() {
        let mut packet = Packet::request(MessageType::Confirmable, Method::Post, 1, token(1));
        packet.add_uri_path(".s/events");
        packet.set_content_format(60);
        packet.set_payload(vec![1, 2, 3, 4, 5]);

        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.content_format(), Some(60));
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn round_trips_block2_option() {
        let mut packet = Packet::request(MessageType::Confirmable, Method::Get, 2, token(2));
        packet.set_block2(BlockOption {
            num: 5,
            more: true,
            szx: 6,
        });

        let decoded = Packet::decode(&packet.encode()).unwrap();
        let block = decoded.block2().unwrap().unwrap();
        assert_eq!(block.num, 5);
        assert!(block.more);
        assert_eq!(block.szx, 6);
        assert_eq!(block.block_size(), 1024);
    }

    #[test]
    fn large_option_delta_uses_extended_encoding() {
        // Observe (6) then a large synthetic option number to force the 13/14 path.
        let mut packet = Packet::request(MessageType::NonConfirmable, Method::Get, 3, token(3));
        packet.set_observe(ObserveOption::Register);
        packet.add_uri_path("a/b/c/d/e/f/g");

        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.observe_value(), Some(0));
        assert_eq!(decoded.uri_path(), "a/b/c/d/e/f/g");
    }

    #[test]
    fn empty_message_has_zero_token_length() {
        let packet = Packet::empty(MessageType::Confirmable, 9);
        let encoded = packet.encode();
        assert_eq!(encoded.len(), 4);
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.code, Code::Empty);
        assert_eq!(decoded.token_len, 0);
    }

    #[test]
    fn empty_delete_has_zero_token_and_delete_code() {
        let packet = Packet::empty_delete(MessageType::Confirmable, 11);
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.code, Code::Method(Method::Delete));
        assert_eq!(decoded.token_len, 0);
    }

    #[test]
    fn rejects_truncated_packet() {
        assert!(Packet::decode(&[0x40]).is_err());
    }

    #[test]
    fn block_option_szx_table_matches_rfc7959() {
        assert_eq!(BlockOption::szx_for_size(16), Some(0));
        assert_eq!(BlockOption::szx_for_size(1024), Some(6));
        assert_eq!(BlockOption::szx_for_size(100), None);
    }
}
