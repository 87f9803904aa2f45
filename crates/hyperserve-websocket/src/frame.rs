//! # Frame codec
//!
//! Wire-level framing per RFC 6455 section 5: the two-byte header, extended
//! length encodings, masking, and close-frame payloads.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{WsError, WsResult};

/// Frame opcode. Reserved values (3–7, 11–15) are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// UTF-8 text message
    Text = 0x1,
    /// Binary message
    Binary = 0x2,
    /// Close control frame
    Close = 0x8,
    /// Ping control frame
    Ping = 0x9,
    /// Pong control frame
    Pong = 0xA,
}

impl Opcode {
    /// Parse a wire opcode, rejecting reserved values.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Control frames are close, ping, and pong.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Data frames start or continue a message.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// Close status code carried in a close-frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000 - normal closure
    pub const NORMAL: Self = Self(1000);
    /// 1001 - endpoint going away
    pub const GOING_AWAY: Self = Self(1001);
    /// 1002 - protocol error
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// 1005 - no status present (never sent on the wire)
    pub const NO_STATUS: Self = Self(1005);
    /// 1007 - payload not valid UTF-8
    pub const INVALID_DATA: Self = Self(1007);
    /// 1009 - message too big
    pub const TOO_LARGE: Self = Self(1009);
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Opcode
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a final (unfragmented) frame.
    pub fn message(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            payload,
        }
    }

    /// Build a close frame with code and reason.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.0.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::message(Opcode::Close, payload)
    }

    /// Extract `(code, reason)` from a close-frame payload. An empty
    /// payload means no status was given (1005); a one-byte payload is a
    /// protocol error.
    pub fn parse_close_payload(payload: &[u8]) -> WsResult<(CloseCode, String)> {
        match payload.len() {
            0 => Ok((CloseCode::NO_STATUS, String::new())),
            1 => Err(WsError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "close payload of one byte",
            )),
            _ => {
                let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| {
                        WsError::protocol(CloseCode::INVALID_DATA, "close reason not UTF-8")
                    })?
                    .to_string();
                Ok((code, reason))
            }
        }
    }
}

/// XOR-mask `payload` in place with the 4-byte key. Masking is an
/// involution: applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Read one frame from `reader`, unmasking the payload in place.
///
/// `require_mask` is true on the server side (client frames must be
/// masked) and false on the client side (server frames must not be).
/// `max_payload` bounds a single frame; the session separately bounds the
/// assembled message.
pub async fn read_frame<R>(reader: &mut R, require_mask: bool, max_payload: usize) -> WsResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    let fin = head[0] & 0x80 != 0;
    let rsv = head[0] & 0x70;
    let opcode_bits = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    let len7 = (head[1] & 0x7F) as u64;

    if rsv != 0 {
        return Err(WsError::protocol(
            CloseCode::PROTOCOL_ERROR,
            "nonzero RSV bits without negotiated extension",
        ));
    }

    let opcode = Opcode::from_wire(opcode_bits).ok_or_else(|| {
        WsError::protocol(
            CloseCode::PROTOCOL_ERROR,
            format!("reserved opcode 0x{opcode_bits:X}"),
        )
    })?;

    if opcode.is_control() {
        if !fin {
            return Err(WsError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "fragmented control frame",
            ));
        }
        if len7 > 125 {
            return Err(WsError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "control frame payload exceeds 125 bytes",
            ));
        }
    }

    let len = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u64::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        n => n,
    };

    if len > max_payload as u64 {
        return Err(WsError::protocol(
            CloseCode::TOO_LARGE,
            format!("frame payload of {len} bytes exceeds limit"),
        ));
    }

    if masked != require_mask {
        let reason = if require_mask {
            "unmasked frame from client"
        } else {
            "masked frame from server"
        };
        return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, reason));
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Write one frame to `writer`, choosing the narrowest length encoding.
/// When `mask_key` is set (client role) the payload is masked on the wire;
/// the caller's buffer is not modified.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, mask_key: Option<[u8; 4]>) -> WsResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = frame.payload.len();
    let mut head = Vec::with_capacity(14);

    let mut first = frame.opcode as u8;
    if frame.fin {
        first |= 0x80;
    }
    head.push(first);

    let mask_bit = if mask_key.is_some() { 0x80 } else { 0x00 };
    if len <= 125 {
        head.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        head.push(mask_bit | 126);
        head.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        head.push(mask_bit | 127);
        head.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if let Some(key) = mask_key {
        head.extend_from_slice(&key);
        writer.write_all(&head).await?;
        let mut masked = frame.payload.clone();
        apply_mask(&mut masked, key);
        writer.write_all(&masked).await?;
    } else {
        writer.write_all(&head).await?;
        writer.write_all(&frame.payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    async fn round_trip(frame: &Frame, mask: Option<[u8; 4]>) -> Frame {
        let mut wire = Vec::new();
        write_frame(&mut wire, frame, mask).await.unwrap();
        let mut cursor = std::io::Cursor::new(wire);
        read_frame(&mut cursor, mask.is_some(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn text_frame_round_trip_unmasked() {
        let frame = Frame::message(Opcode::Text, b"hello".to_vec());
        assert_eq!(round_trip(&frame, None).await, frame);
    }

    #[tokio::test]
    async fn text_frame_round_trip_masked() {
        let frame = Frame::message(Opcode::Text, b"hello".to_vec());
        assert_eq!(round_trip(&frame, Some([1, 2, 3, 4])).await, frame);
    }

    #[tokio::test]
    async fn extended_length_encodings() {
        for len in [125usize, 126, 65535, 65536] {
            let frame = Frame::message(Opcode::Binary, vec![0xAB; len]);
            assert_eq!(round_trip(&frame, None).await.payload.len(), len);
        }
    }

    #[tokio::test]
    async fn reserved_opcode_rejected() {
        // FIN + opcode 0x3, empty payload
        let wire = vec![0x83, 0x00];
        let mut cursor = std::io::Cursor::new(wire);
        let err = read_frame(&mut cursor, false, usize::MAX).await.unwrap_err();
        match err {
            WsError::Protocol { code, .. } => assert_eq!(code, CloseCode::PROTOCOL_ERROR),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fragmented_control_rejected() {
        // FIN=0, opcode ping
        let wire = vec![0x09, 0x00];
        let mut cursor = std::io::Cursor::new(wire);
        assert!(read_frame(&mut cursor, false, usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn oversize_control_rejected() {
        let frame = Frame::message(Opcode::Ping, vec![0; 126]);
        let mut wire = Vec::new();
        write_frame(&mut wire, &frame, None).await.unwrap();
        let mut cursor = std::io::Cursor::new(wire);
        assert!(read_frame(&mut cursor, false, usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn unmasked_client_frame_rejected() {
        let frame = Frame::message(Opcode::Text, b"x".to_vec());
        let mut wire = Vec::new();
        write_frame(&mut wire, &frame, None).await.unwrap();
        let mut cursor = std::io::Cursor::new(wire);
        let err = read_frame(&mut cursor, true, usize::MAX).await.unwrap_err();
        match err {
            WsError::Protocol { code, .. } => assert_eq!(code, CloseCode::PROTOCOL_ERROR),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn close_payload_parsing() {
        let frame = Frame::close(CloseCode::NORMAL, "bye");
        let (code, reason) = Frame::parse_close_payload(&frame.payload).unwrap();
        assert_eq!(code, CloseCode::NORMAL);
        assert_eq!(reason, "bye");

        let (code, reason) = Frame::parse_close_payload(&[]).unwrap();
        assert_eq!(code, CloseCode::NO_STATUS);
        assert!(reason.is_empty());

        assert!(Frame::parse_close_payload(&[0x03]).is_err());
    }

    proptest! {
        #[test]
        fn mask_is_an_involution(payload in proptest::collection::vec(any::<u8>(), 0..512),
                                 key in any::<[u8; 4]>()) {
            let mut masked = payload.clone();
            apply_mask(&mut masked, key);
            apply_mask(&mut masked, key);
            prop_assert_eq!(masked, payload);
        }
    }
}
