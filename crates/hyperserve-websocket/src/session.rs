//! # WebSocket sessions
//!
//! The connection object layered over the frame codec: message assembly
//! from fragments, inline control-frame handling, the close handshake,
//! and independent read/write deadlines.
//!
//! One reader and one writer may operate concurrently; the two halves are
//! guarded by independent locks. Control responses (pong, close echo) are
//! written from the read path through the shared writer half.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{WsError, WsResult};
use crate::frame::{self, CloseCode, Frame, Opcode};
use crate::DEFAULT_MAX_MESSAGE_SIZE;

/// Which side of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Masks outbound frames; requires unmasked inbound frames.
    Client,
    /// Requires masked inbound frames; sends unmasked.
    Server,
}

/// An assembled data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text
    Text(String),
    /// Binary payload
    Binary(Vec<u8>),
}

impl Message {
    /// The payload bytes, for either kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

struct ReadState<S> {
    io: ReadHalf<S>,
    /// Fragments of the in-progress message
    assembly: Vec<u8>,
    /// Opcode of the first fragment, while assembling
    pending: Option<Opcode>,
}

struct WriteState<S> {
    io: WriteHalf<S>,
    close_sent: bool,
}

/// A live WebSocket connection over any byte stream.
pub struct WebSocket<S> {
    role: Role,
    max_message_size: usize,
    read_deadline: deadline::Slot,
    write_deadline: deadline::Slot,
    reader: Mutex<ReadState<S>>,
    writer: Arc<Mutex<WriteState<S>>>,
}

/// Atomic duration slot so deadlines are settable without a lock.
mod deadline {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// 0 encodes "no deadline".
    #[derive(Debug, Default)]
    pub struct Slot(AtomicU64);

    impl Slot {
        pub fn set(&self, d: Option<Duration>) {
            self.0
                .store(d.map_or(0, |d| d.as_millis().max(1) as u64), Ordering::Relaxed);
        }

        pub fn get(&self) -> Option<Duration> {
            match self.0.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            }
        }
    }
}

impl<S> std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("role", &self.role)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a stream as the server side of an established connection.
    pub fn server(stream: S) -> Self {
        Self::new(stream, Role::Server)
    }

    /// Wrap a stream as the client side of an established connection.
    pub fn client(stream: S) -> Self {
        Self::new(stream, Role::Client)
    }

    fn new(stream: S, role: Role) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            role,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_deadline: Default::default(),
            write_deadline: Default::default(),
            reader: Mutex::new(ReadState {
                io: read,
                assembly: Vec::new(),
                pending: None,
            }),
            writer: Arc::new(Mutex::new(WriteState {
                io: write,
                close_sent: false,
            })),
        }
    }

    /// Override the maximum assembled message size (default 1 MiB).
    #[must_use]
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Set or clear the read deadline applied to each `read_message` call.
    pub fn set_read_deadline(&self, deadline: Option<Duration>) {
        self.read_deadline.set(deadline);
    }

    /// Set or clear the write deadline applied to each outbound frame.
    pub fn set_write_deadline(&self, deadline: Option<Duration>) {
        self.write_deadline.set(deadline);
    }

    fn mask_key(&self) -> Option<[u8; 4]> {
        match self.role {
            Role::Client => Some(fastrand::u32(..).to_be_bytes()),
            Role::Server => None,
        }
    }

    /// Read the next complete data message.
    ///
    /// Control frames arriving in between are handled inline: pings are
    /// answered with pongs, pongs are discarded, and a close frame is
    /// echoed once before `WsError::Closed` is returned.
    ///
    /// # Errors
    ///
    /// `WsError::Closed` after the close handshake, `WsError::Protocol`
    /// or `WsError::MessageTooLarge` on violations (a close frame with
    /// the matching code is sent first), `WsError::Timeout` when the read
    /// deadline elapses.
    pub async fn read_message(&self) -> WsResult<Message> {
        let mut reader = self.reader.lock().await;
        loop {
            let frame = match self.read_one(&mut reader).await {
                Ok(frame) => frame,
                Err(WsError::Protocol { code, reason }) => {
                    self.send_close_frame(code, &reason).await.ok();
                    return Err(WsError::Protocol { code, reason });
                }
                Err(other) => return Err(other),
            };

            match frame.opcode {
                Opcode::Ping => {
                    trace!(len = frame.payload.len(), "ping; echoing pong");
                    self.write(Frame::message(Opcode::Pong, frame.payload)).await?;
                }
                Opcode::Pong => {}
                Opcode::Close => {
                    let (code, reason) = match Frame::parse_close_payload(&frame.payload) {
                        Ok(pair) => pair,
                        Err(err) => {
                            if let WsError::Protocol { code, .. } = &err {
                                self.send_close_frame(*code, "bad close payload").await.ok();
                            }
                            return Err(err);
                        }
                    };
                    // Echo the close once, then surface the peer's code.
                    let echo = if code == CloseCode::NO_STATUS {
                        CloseCode::NORMAL
                    } else {
                        code
                    };
                    self.send_close_frame(echo, "").await.ok();
                    return Err(WsError::Closed { code, reason });
                }
                Opcode::Text | Opcode::Binary => {
                    if reader.pending.is_some() {
                        let err = WsError::protocol(
                            CloseCode::PROTOCOL_ERROR,
                            "data frame while a fragmented message is in progress",
                        );
                        self.send_close_frame(CloseCode::PROTOCOL_ERROR, "interleaved data")
                            .await
                            .ok();
                        return Err(err);
                    }
                    if frame.fin {
                        return self.finish(frame.opcode, frame.payload).await;
                    }
                    reader.pending = Some(frame.opcode);
                    reader.assembly = frame.payload;
                    self.check_assembly_size(&mut reader).await?;
                }
                Opcode::Continuation => {
                    let Some(opcode) = reader.pending else {
                        let err = WsError::protocol(
                            CloseCode::PROTOCOL_ERROR,
                            "continuation with no message in progress",
                        );
                        self.send_close_frame(CloseCode::PROTOCOL_ERROR, "unexpected continuation")
                            .await
                            .ok();
                        return Err(err);
                    };
                    reader.assembly.extend_from_slice(&frame.payload);
                    self.check_assembly_size(&mut reader).await?;
                    if frame.fin {
                        reader.pending = None;
                        let payload = std::mem::take(&mut reader.assembly);
                        return self.finish(opcode, payload).await;
                    }
                }
            }
        }
    }

    async fn read_one(&self, reader: &mut ReadState<S>) -> WsResult<Frame> {
        let require_mask = self.role == Role::Server;
        let read = frame::read_frame(&mut reader.io, require_mask, self.max_message_size);
        match self.read_deadline.get() {
            Some(deadline) => tokio::time::timeout(deadline, read)
                .await
                .map_err(|_| WsError::Timeout)?,
            None => read.await,
        }
    }

    async fn check_assembly_size(&self, reader: &mut ReadState<S>) -> WsResult<()> {
        if reader.assembly.len() > self.max_message_size {
            reader.pending = None;
            reader.assembly = Vec::new();
            self.send_close_frame(CloseCode::TOO_LARGE, "message too large")
                .await
                .ok();
            return Err(WsError::MessageTooLarge {
                limit: self.max_message_size,
            });
        }
        Ok(())
    }

    async fn finish(&self, opcode: Opcode, payload: Vec<u8>) -> WsResult<Message> {
        if payload.len() > self.max_message_size {
            self.send_close_frame(CloseCode::TOO_LARGE, "message too large")
                .await
                .ok();
            return Err(WsError::MessageTooLarge {
                limit: self.max_message_size,
            });
        }
        match opcode {
            Opcode::Text => match String::from_utf8(payload) {
                Ok(text) => Ok(Message::Text(text)),
                Err(_) => {
                    let err =
                        WsError::protocol(CloseCode::INVALID_DATA, "text message not UTF-8");
                    self.send_close_frame(CloseCode::INVALID_DATA, "invalid UTF-8")
                        .await
                        .ok();
                    Err(err)
                }
            },
            Opcode::Binary => Ok(Message::Binary(payload)),
            _ => unreachable!("finish called for data opcodes only"),
        }
    }

    /// Send a text message.
    pub async fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.write(Frame::message(Opcode::Text, text.into().into_bytes())).await
    }

    /// Send a binary message.
    pub async fn send_binary(&self, payload: Vec<u8>) -> WsResult<()> {
        self.write(Frame::message(Opcode::Binary, payload)).await
    }

    /// Send a ping with the given payload (≤ 125 bytes).
    pub async fn send_ping(&self, payload: Vec<u8>) -> WsResult<()> {
        self.write(Frame::message(Opcode::Ping, payload)).await
    }

    /// Initiate (or complete) the close handshake. Idempotent: only the
    /// first call emits a frame.
    pub async fn close(&self, code: CloseCode, reason: &str) -> WsResult<()> {
        self.send_close_frame(code, reason).await
    }

    async fn send_close_frame(&self, code: CloseCode, reason: &str) -> WsResult<()> {
        let mut writer = self.writer.lock().await;
        if writer.close_sent {
            return Ok(());
        }
        writer.close_sent = true;
        let frame = Frame::close(code, reason);
        let mask = self.mask_key();
        self.write_locked(&mut writer, &frame, mask).await
    }

    async fn write(&self, frame: Frame) -> WsResult<()> {
        let mut writer = self.writer.lock().await;
        if writer.close_sent {
            return Err(WsError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "close already sent",
            )));
        }
        let mask = self.mask_key();
        self.write_locked(&mut writer, &frame, mask).await
    }

    async fn write_locked(
        &self,
        writer: &mut WriteState<S>,
        frame: &Frame,
        mask: Option<[u8; 4]>,
    ) -> WsResult<()> {
        let write = frame::write_frame(&mut writer.io, frame, mask);
        match self.write_deadline.get() {
            Some(deadline) => tokio::time::timeout(deadline, write)
                .await
                .map_err(|_| WsError::Timeout)?,
            None => write.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{read_frame, write_frame};
    use tokio::io::duplex;

    fn pair() -> (WebSocket<tokio::io::DuplexStream>, WebSocket<tokio::io::DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        (WebSocket::client(a), WebSocket::server(b))
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let (client, server) = pair();

        client.send_text("hello").await.unwrap();
        let received = server.read_message().await.unwrap();
        assert_eq!(received, Message::Text("hello".to_string()));

        server.send_text("hello").await.unwrap();
        let echoed = client.read_message().await.unwrap();
        assert_eq!(echoed, Message::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn close_handshake_both_sides() {
        let (client, server) = pair();

        client.close(CloseCode::NORMAL, "done").await.unwrap();
        // Second close is a no-op.
        client.close(CloseCode::NORMAL, "again").await.unwrap();

        let err = server.read_message().await.unwrap_err();
        match err {
            WsError::Closed { code, reason } => {
                assert_eq!(code, CloseCode::NORMAL);
                assert_eq!(reason, "done");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // The server echoed the close; the client sees it too.
        let err = client.read_message().await.unwrap_err();
        assert!(err.is_normal_close());
    }

    #[tokio::test]
    async fn ping_answered_inline() {
        let (client, server) = pair();

        client.send_ping(b"ka".to_vec()).await.unwrap();
        client.send_text("after-ping").await.unwrap();

        // The server answers the ping internally and yields the text.
        let received = server.read_message().await.unwrap();
        assert_eq!(received, Message::Text("after-ping".to_string()));
    }

    #[tokio::test]
    async fn fragmented_message_assembled() {
        let (client_raw, server_raw) = duplex(64 * 1024);
        let server = WebSocket::server(server_raw);
        let (_, mut client_write) = tokio::io::split(client_raw);

        let first = Frame {
            fin: false,
            opcode: Opcode::Text,
            payload: b"he".to_vec(),
        };
        let rest = Frame {
            fin: true,
            opcode: Opcode::Continuation,
            payload: b"llo".to_vec(),
        };
        write_frame(&mut client_write, &first, Some([9, 9, 9, 9])).await.unwrap();
        write_frame(&mut client_write, &rest, Some([7, 7, 7, 7])).await.unwrap();

        let received = server.read_message().await.unwrap();
        assert_eq!(received, Message::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn continuation_without_start_is_protocol_error() {
        let (client_raw, server_raw) = duplex(64 * 1024);
        let server = WebSocket::server(server_raw);
        let (mut client_read, mut client_write) = tokio::io::split(client_raw);

        let orphan = Frame {
            fin: true,
            opcode: Opcode::Continuation,
            payload: b"lost".to_vec(),
        };
        write_frame(&mut client_write, &orphan, Some([1, 1, 1, 1])).await.unwrap();

        let err = server.read_message().await.unwrap_err();
        match err {
            WsError::Protocol { code, .. } => assert_eq!(code, CloseCode::PROTOCOL_ERROR),
            other => panic!("unexpected: {other:?}"),
        }

        // The server sent a close frame with code 1002.
        let close = read_frame(&mut client_read, false, usize::MAX).await.unwrap();
        assert_eq!(close.opcode, Opcode::Close);
        let (code, _) = Frame::parse_close_payload(&close.payload).unwrap();
        assert_eq!(code, CloseCode::PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn oversize_message_closes_1009() {
        let (client_raw, server_raw) = duplex(64 * 1024);
        let server = WebSocket::server(server_raw).with_max_message_size(8);
        let (mut client_read, mut client_write) = tokio::io::split(client_raw);

        let big = Frame::message(Opcode::Binary, vec![0u8; 9]);
        write_frame(&mut client_write, &big, Some([2, 4, 6, 8])).await.unwrap();

        let err = server.read_message().await.unwrap_err();
        // Single oversized frame is caught at the codec layer.
        match err {
            WsError::Protocol { code, .. } | WsError::Closed { code, .. } => {
                assert_eq!(code, CloseCode::TOO_LARGE)
            }
            WsError::MessageTooLarge { limit } => assert_eq!(limit, 8),
            other => panic!("unexpected: {other:?}"),
        }

        let close = read_frame(&mut client_read, false, usize::MAX).await.unwrap();
        let (code, _) = Frame::parse_close_payload(&close.payload).unwrap();
        assert_eq!(code, CloseCode::TOO_LARGE);
    }

    #[tokio::test]
    async fn server_frames_are_unmasked_on_the_wire() {
        let (client_raw, server_raw) = duplex(64 * 1024);
        let server = WebSocket::server(server_raw);
        let (mut client_read, _client_write) = tokio::io::split(client_raw);

        server.send_text("plain").await.unwrap();
        // Reading with require_mask=false succeeds, proving no mask bit.
        let frame = read_frame(&mut client_read, false, usize::MAX).await.unwrap();
        assert_eq!(frame.payload, b"plain");
    }

    #[tokio::test]
    async fn read_deadline_times_out() {
        let (_client_raw, server_raw) = duplex(64);
        let server = WebSocket::server(server_raw);
        server.set_read_deadline(Some(Duration::from_millis(20)));

        let err = server.read_message().await.unwrap_err();
        assert!(matches!(err, WsError::Timeout));
    }
}
