//! SIMP wire format.
//!
//! A SIMP datagram is a fixed 39-byte header followed by an ASCII payload:
//!
//! ```text
//! ┌──────┬──────┬──────┬───────────────────────┬──────────────┬─────────┐
//! │ kind │  op  │ seq  │ user (32, NUL-padded) │ payload_size │ payload │
//! │  1   │  1   │  1   │          32           │   4 (u32 BE) │  0..N   │
//! └──────┴──────┴──────┴───────────────────────┴──────────────┴─────────┘
//! ```
//!
//! The codec is pure: encoding and decoding never touch a socket, and both
//! directions enforce the same validity rules so a datagram that decodes is
//! always re-encodable.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 39;

/// Width of the NUL-right-padded user field.
pub const USER_FIELD_LEN: usize = 32;

/// Top-level datagram kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Control = 0x01,
    Chat = 0x02,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(MessageKind::Control),
            0x02 => Some(MessageKind::Chat),
            _ => None,
        }
    }
}

/// Control operation.
///
/// Chat datagrams reuse `Err` (0x01) in the operation field; the value is a
/// wire-compatibility requirement, not an error condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Err = 0x01,
    Syn = 0x02,
    Ack = 0x04,
    SynAck = 0x06,
    Fin = 0x08,
    FinErr = 0x09,
}

impl Operation {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Operation::Err),
            0x02 => Some(Operation::Syn),
            0x04 => Some(Operation::Ack),
            0x06 => Some(Operation::SynAck),
            0x08 => Some(Operation::Fin),
            0x09 => Some(Operation::FinErr),
            _ => None,
        }
    }

    /// Control operations that must carry a human-readable reason payload.
    pub fn carries_reason(self) -> bool {
        matches!(self, Operation::Err | Operation::FinErr)
    }
}

/// Flips an alternating-bit sequence number.
pub fn toggle_seq(seq: u8) -> u8 {
    seq ^ 0x01
}

/// A decoded SIMP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub kind: MessageKind,
    pub op: Operation,
    /// Alternating-bit sequence number, 0x00 or 0x01.
    pub seq: u8,
    /// Sender's user name, at most 32 ASCII characters.
    pub user: String,
    /// ASCII payload; empty for SYN/ACK/SYNACK/FIN.
    pub payload: String,
}

impl Datagram {
    /// A payload-free control datagram (SYN, ACK, SYNACK, FIN).
    pub fn control(op: Operation, seq: u8, user: &str) -> Self {
        Datagram {
            kind: MessageKind::Control,
            op,
            seq,
            user: user.to_string(),
            payload: String::new(),
        }
    }

    /// A control datagram carrying a reason (ERR, FINERR).
    pub fn control_reason(op: Operation, seq: u8, user: &str, reason: &str) -> Self {
        Datagram {
            kind: MessageKind::Control,
            op,
            seq,
            user: user.to_string(),
            payload: reason.to_string(),
        }
    }

    /// A chat datagram. The operation field carries `Err` (0x01) on the wire.
    pub fn chat(seq: u8, user: &str, text: &str) -> Self {
        Datagram {
            kind: MessageKind::Chat,
            op: Operation::Err,
            seq,
            user: user.to_string(),
            payload: text.to_string(),
        }
    }

    /// Serializes into header + payload bytes.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        if self.seq > 0x01 {
            return Err(EncodeError::BadSequence(self.seq));
        }
        if self.user.len() > USER_FIELD_LEN {
            return Err(EncodeError::UserTooLong(self.user.len()));
        }
        if !self.user.is_ascii() || self.user.bytes().any(|b| b == 0) {
            return Err(EncodeError::NotAscii("user"));
        }
        if !self.payload.is_ascii() {
            return Err(EncodeError::NotAscii("payload"));
        }
        check_shape(self.kind, self.op, self.payload.is_empty()).map_err(EncodeError::Shape)?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.op as u8);
        buf.put_u8(self.seq);
        buf.put_slice(self.user.as_bytes());
        buf.put_bytes(0, USER_FIELD_LEN - self.user.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(self.payload.as_bytes());
        Ok(buf.freeze())
    }

    /// Parses a datagram from raw bytes.
    pub fn decode(data: &[u8]) -> Result<Datagram, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::Truncated(data.len()));
        }
        let kind = MessageKind::from_u8(data[0]).ok_or(DecodeError::UnknownKind(data[0]))?;
        let op = Operation::from_u8(data[1]).ok_or(DecodeError::UnknownOperation(data[1]))?;
        let seq = data[2];
        if seq > 0x01 {
            return Err(DecodeError::BadSequence(seq));
        }

        let user_field = &data[3..3 + USER_FIELD_LEN];
        let user_len = user_field
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let user_bytes = &user_field[..user_len];
        if !user_bytes.is_ascii() || user_bytes.contains(&0) {
            return Err(DecodeError::NotAscii("user"));
        }

        let declared = u32::from_be_bytes([data[35], data[36], data[37], data[38]]) as usize;
        let payload_bytes = &data[HEADER_LEN..];
        if declared != payload_bytes.len() {
            return Err(DecodeError::PayloadSizeMismatch {
                declared,
                actual: payload_bytes.len(),
            });
        }
        if !payload_bytes.is_ascii() {
            return Err(DecodeError::NotAscii("payload"));
        }
        check_shape(kind, op, payload_bytes.is_empty()).map_err(DecodeError::Shape)?;

        Ok(Datagram {
            kind,
            op,
            seq,
            user: String::from_utf8_lossy(user_bytes).into_owned(),
            payload: String::from_utf8_lossy(payload_bytes).into_owned(),
        })
    }
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} seq={} user={:?} payload={:?}",
            self.kind, self.op, self.seq, self.user, self.payload
        )
    }
}

/// Kind/operation/payload combination rules shared by encode and decode.
fn check_shape(kind: MessageKind, op: Operation, payload_empty: bool) -> Result<(), ShapeError> {
    match kind {
        MessageKind::Control => {
            if op.carries_reason() {
                if payload_empty {
                    return Err(ShapeError::ReasonRequired(op));
                }
            } else if !payload_empty {
                return Err(ShapeError::PayloadForbidden(op));
            }
        }
        MessageKind::Chat => {
            if op != Operation::Err {
                return Err(ShapeError::BadChatOperation(op));
            }
            if payload_empty {
                return Err(ShapeError::EmptyChat);
            }
        }
    }
    Ok(())
}

/// A kind/operation/payload combination the wire format forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeError {
    /// ERR/FINERR must carry a reason payload.
    ReasonRequired(Operation),
    /// SYN/ACK/SYNACK/FIN must not carry a payload.
    PayloadForbidden(Operation),
    /// Chat datagrams must carry operation 0x01.
    BadChatOperation(Operation),
    /// Chat datagrams must have a payload.
    EmptyChat,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::ReasonRequired(op) => {
                write!(f, "{op:?} control datagrams must carry a reason payload")
            }
            ShapeError::PayloadForbidden(op) => {
                write!(f, "{op:?} control datagrams must not carry a payload")
            }
            ShapeError::BadChatOperation(op) => {
                write!(f, "chat datagrams must carry operation 0x01, got {op:?}")
            }
            ShapeError::EmptyChat => write!(f, "chat datagrams must have a payload"),
        }
    }
}

/// Rejected encode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    BadSequence(u8),
    UserTooLong(usize),
    NotAscii(&'static str),
    Shape(ShapeError),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::BadSequence(s) => write!(f, "sequence must be 0x00 or 0x01, got {s:#04x}"),
            EncodeError::UserTooLong(n) => {
                write!(f, "user name must be at most {USER_FIELD_LEN} bytes, got {n}")
            }
            EncodeError::NotAscii(field) => write!(f, "{field} must be ASCII"),
            EncodeError::Shape(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Malformed input rejected by decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated(usize),
    UnknownKind(u8),
    UnknownOperation(u8),
    BadSequence(u8),
    PayloadSizeMismatch { declared: usize, actual: usize },
    NotAscii(&'static str),
    Shape(ShapeError),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated(n) => {
                write!(f, "datagram shorter than the {HEADER_LEN}-byte header, got {n}")
            }
            DecodeError::UnknownKind(b) => write!(f, "unknown message kind {b:#04x}"),
            DecodeError::UnknownOperation(b) => write!(f, "unknown operation {b:#04x}"),
            DecodeError::BadSequence(s) => write!(f, "sequence must be 0x00 or 0x01, got {s:#04x}"),
            DecodeError::PayloadSizeMismatch { declared, actual } => {
                write!(f, "payload size field says {declared}, datagram carries {actual}")
            }
            DecodeError::NotAscii(field) => write!(f, "{field} must be ASCII"),
            DecodeError::Shape(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(d: &Datagram) -> Datagram {
        Datagram::decode(&d.encode().unwrap()).unwrap()
    }

    #[test]
    fn control_roundtrips() {
        for op in [
            Operation::Syn,
            Operation::Ack,
            Operation::SynAck,
            Operation::Fin,
        ] {
            for seq in [0x00, 0x01] {
                let d = Datagram::control(op, seq, "alice");
                assert_eq!(roundtrip(&d), d);
            }
        }
    }

    #[test]
    fn reason_roundtrips() {
        for op in [Operation::Err, Operation::FinErr] {
            let d = Datagram::control_reason(op, 0x01, "bob", "Chat invitation rejected.");
            assert_eq!(roundtrip(&d), d);
        }
    }

    #[test]
    fn chat_roundtrips() {
        let d = Datagram::chat(0x00, "carol", "Hello, world!");
        assert_eq!(roundtrip(&d), d);
        assert_eq!(d.op, Operation::Err);
    }

    #[test]
    fn header_layout() {
        let d = Datagram::chat(0x01, "u", "hi");
        let bytes = d.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(bytes[0], 0x02); // kind: chat
        assert_eq!(bytes[1], 0x01); // op: ERR by convention
        assert_eq!(bytes[2], 0x01); // seq
        assert_eq!(bytes[3], b'u');
        assert_eq!(&bytes[4..35], &[0u8; 31][..]); // NUL padding
        assert_eq!(&bytes[35..39], &2u32.to_be_bytes());
        assert_eq!(&bytes[39..], b"hi");
    }

    #[test]
    fn user_padding_stripped_on_decode() {
        let d = Datagram::control(Operation::Syn, 0x00, "alice");
        assert_eq!(roundtrip(&d).user, "alice");
    }

    #[test]
    fn max_length_user_accepted() {
        let user = "x".repeat(USER_FIELD_LEN);
        let d = Datagram::control(Operation::Syn, 0x00, &user);
        assert_eq!(roundtrip(&d).user, user);
    }

    #[test]
    fn encode_rejects_bad_arguments() {
        let too_long = "x".repeat(USER_FIELD_LEN + 1);
        assert_eq!(
            Datagram::control(Operation::Syn, 0x00, &too_long).encode(),
            Err(EncodeError::UserTooLong(33))
        );
        assert_eq!(
            Datagram::control(Operation::Syn, 0x02, "a").encode(),
            Err(EncodeError::BadSequence(0x02))
        );
        assert_eq!(
            Datagram::chat(0x00, "émile", "hi").encode(),
            Err(EncodeError::NotAscii("user"))
        );
        assert_eq!(
            Datagram::chat(0x00, "a", "héllo").encode(),
            Err(EncodeError::NotAscii("payload"))
        );
    }

    #[test]
    fn encode_rejects_bad_shapes() {
        // SYN must not carry a payload.
        assert_eq!(
            Datagram::control_reason(Operation::Syn, 0x00, "a", "x").encode(),
            Err(EncodeError::Shape(ShapeError::PayloadForbidden(
                Operation::Syn
            )))
        );
        // FINERR must carry one.
        assert_eq!(
            Datagram::control(Operation::FinErr, 0x00, "a").encode(),
            Err(EncodeError::Shape(ShapeError::ReasonRequired(
                Operation::FinErr
            )))
        );
        // Chat with a control operation.
        let d = Datagram {
            kind: MessageKind::Chat,
            op: Operation::Syn,
            seq: 0x00,
            user: "a".into(),
            payload: "hi".into(),
        };
        assert_eq!(
            d.encode(),
            Err(EncodeError::Shape(ShapeError::BadChatOperation(
                Operation::Syn
            )))
        );
        // Empty chat.
        let d = Datagram::chat(0x00, "a", "");
        assert_eq!(d.encode(), Err(EncodeError::Shape(ShapeError::EmptyChat)));
    }

    #[test]
    fn decode_rejects_short_input() {
        assert_eq!(
            Datagram::decode(&[0x01; 10]),
            Err(DecodeError::Truncated(10))
        );
    }

    #[test]
    fn decode_rejects_unknown_bytes() {
        let mut bytes = Datagram::control(Operation::Syn, 0x00, "a")
            .encode()
            .unwrap()
            .to_vec();
        bytes[0] = 0x7f;
        assert_eq!(Datagram::decode(&bytes), Err(DecodeError::UnknownKind(0x7f)));

        let mut bytes = Datagram::control(Operation::Syn, 0x00, "a")
            .encode()
            .unwrap()
            .to_vec();
        bytes[1] = 0x03;
        assert_eq!(
            Datagram::decode(&bytes),
            Err(DecodeError::UnknownOperation(0x03))
        );

        let mut bytes = Datagram::control(Operation::Syn, 0x00, "a")
            .encode()
            .unwrap()
            .to_vec();
        bytes[2] = 0x05;
        assert_eq!(Datagram::decode(&bytes), Err(DecodeError::BadSequence(0x05)));
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let mut bytes = Datagram::chat(0x00, "a", "hi").encode().unwrap().to_vec();
        bytes[38] = 5; // declared size no longer matches the trailing bytes
        assert_eq!(
            Datagram::decode(&bytes),
            Err(DecodeError::PayloadSizeMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn decode_rejects_non_ascii_payload() {
        let mut bytes = Datagram::chat(0x00, "a", "hi").encode().unwrap().to_vec();
        bytes[39] = 0xff;
        assert_eq!(Datagram::decode(&bytes), Err(DecodeError::NotAscii("payload")));
    }

    #[test]
    fn decode_enforces_shape_rules() {
        // Hand-build a SYN with a payload.
        let mut bytes = Datagram::control(Operation::Syn, 0x00, "a")
            .encode()
            .unwrap()
            .to_vec();
        bytes[35..39].copy_from_slice(&1u32.to_be_bytes());
        bytes.push(b'x');
        assert_eq!(
            Datagram::decode(&bytes),
            Err(DecodeError::Shape(ShapeError::PayloadForbidden(
                Operation::Syn
            )))
        );
    }

    #[test]
    fn sequence_toggles() {
        assert_eq!(toggle_seq(0x00), 0x01);
        assert_eq!(toggle_seq(0x01), 0x00);
    }
}
