use crate::connection::{lock_writer_or_closed, race_closed, AccessGuard, Shared, WSConnection};
use crate::error::Error;
use crate::frame::{FrameHeader, MaskCursor, OpCode, MAX_CONTROL_PAYLOAD};
use crate::stream::SocketWireStream;
use bytes::BytesMut;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncWriteExt, BufWriter, WriteHalf};
use tokio::sync::MutexGuard;

#[derive(Clone, Copy)]
pub(crate) enum WriterKind {
    Client,
    Server,
}

/// The buffered write half of the stream. Every producer of wire bytes
/// goes through this type, under the connection's writer mutex.
pub(crate) struct WireWriter {
    write_half: BufWriter<WriteHalf<SocketWireStream>>,
    kind: WriterKind,
}

impl WireWriter {
    pub(crate) fn new(write_half: BufWriter<WriteHalf<SocketWireStream>>, kind: WriterKind) -> Self {
        Self { write_half, kind }
    }

    // Frames sent from the client to the server are masked with a fresh
    // random key each, the server direction goes out in the clear.
    pub(crate) fn fresh_mask(&self) -> Option<[u8; 4]> {
        match self.kind {
            WriterKind::Client => Some(rand::random()),
            WriterKind::Server => None,
        }
    }

    pub(crate) async fn write_header(&mut self, header: &FrameHeader) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(14);
        header.encode(&mut buf);
        self.write_half.write_all(&buf).await
    }

    /// Emits one complete frame (header plus payload, masked when the
    /// role requires it) and flushes.
    pub(crate) async fn write_whole_frame(
        &mut self,
        final_fragment: bool,
        opcode: OpCode,
        payload: &[u8],
    ) -> io::Result<()> {
        let mask_key = self.fresh_mask();
        let header = FrameHeader {
            final_fragment,
            opcode,
            length: payload.len() as u64,
            mask_key,
        };
        self.write_header(&header).await?;
        match mask_key {
            Some(key) => {
                let mut masked = payload.to_vec();
                MaskCursor::new(key).apply(&mut masked);
                self.write_half.write_all(&masked).await?;
            }
            None => self.write_half.write_all(payload).await?,
        }
        self.write_half.flush().await
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_half.write_all(buf).await
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.write_half.flush().await
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.write_half.shutdown().await
    }
}

impl Shared {
    /// Sends a control frame under the control-send slot. The writer
    /// mutex is taken first: control senders queue on it behind any data
    /// frame in flight, so the keepalive ping and a receive-path pong
    /// echo serialize instead of tripping the detector on each other.
    pub(crate) async fn control_send(&self, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFramePayloadSize);
        }
        self.control_send_lenient(opcode, payload).await
    }

    // Same as control_send minus the 125-byte cap, used to echo oversized
    // pings the lenient way.
    pub(crate) async fn control_send_lenient(
        &self,
        opcode: OpCode,
        payload: &[u8],
    ) -> Result<(), Error> {
        let mut writer = lock_writer_or_closed(self).await?;
        let _slot = self.control_sender.acquire();
        race_closed(
            &self.closed,
            writer.write_whole_frame(true, opcode, payload),
        )
        .await
    }
}

enum SendMode<'a> {
    /// The whole frame was declared up front; the writer mutex stays held
    /// from the header until `end`.
    Sized {
        writer: MutexGuard<'a, WireWriter>,
        remaining: u64,
        mask: Option<MaskCursor>,
    },
    /// Every `write` becomes its own continuation fragment, and the mutex
    /// is only held per fragment, which is what lets the keepalive slip
    /// pings in between fragments of a long message.
    Stream,
}

/// An in-progress outgoing message, created by the `start_*` family on
/// [`WSConnection`]. Dropping one without a successful `end` leaves a
/// half-written message on the wire, so the connection is poisoned and
/// every later operation fails `AlreadyClosed`.
pub struct MessageWriter<'a> {
    shared: &'a Shared,
    _slot: AccessGuard<'a>,
    mode: SendMode<'a>,
    finished: bool,
}

impl MessageWriter<'_> {
    /// Writes payload bytes. In sized mode this continues the declared
    /// frame and writing past the declared length fails `FrameOverflow`;
    /// in stream mode it emits one continuation fragment.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        match &mut self.mode {
            SendMode::Sized {
                writer,
                remaining,
                mask,
            } => {
                if (data.len() as u64) > *remaining {
                    return Err(Error::FrameOverflow);
                }
                match mask {
                    Some(cursor) => {
                        let mut chunk = data.to_vec();
                        cursor.apply(&mut chunk);
                        race_closed(&self.shared.closed, writer.write_all(&chunk)).await?;
                    }
                    None => {
                        race_closed(&self.shared.closed, writer.write_all(data)).await?;
                    }
                }
                *remaining -= data.len() as u64;
                Ok(())
            }
            SendMode::Stream => {
                let mut writer = lock_writer_or_closed(self.shared).await?;
                race_closed(
                    &self.shared.closed,
                    writer.write_whole_frame(false, OpCode::Continue, data),
                )
                .await
            }
        }
    }

    /// Finishes the message. A sized frame must have exactly its declared
    /// length by now; a stream gets its empty terminator fragment.
    pub async fn end(mut self) -> Result<(), Error> {
        match &mut self.mode {
            SendMode::Sized {
                writer, remaining, ..
            } => {
                if *remaining != 0 {
                    return Err(Error::IncompleteFrame);
                }
                race_closed(&self.shared.closed, writer.flush()).await?;
            }
            SendMode::Stream => {
                let mut writer = lock_writer_or_closed(self.shared).await?;
                race_closed(
                    &self.shared.closed,
                    writer.write_whole_frame(true, OpCode::Continue, &[]),
                )
                .await?;
            }
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for MessageWriter<'_> {
    fn drop(&mut self) {
        // An abandoned message leaves the wire in a state no further
        // frame can repair.
        if !self.finished {
            self.shared.closed.fire();
        }
    }
}

impl WSConnection {
    /// Opens a single-frame text message of exactly `len` payload bytes.
    pub async fn start_text(&self, len: u64) -> Result<MessageWriter<'_>, Error> {
        self.start_sized(OpCode::Text, len).await
    }

    /// Opens a single-frame binary message of exactly `len` payload bytes.
    pub async fn start_binary(&self, len: u64) -> Result<MessageWriter<'_>, Error> {
        self.start_sized(OpCode::Binary, len).await
    }

    /// Opens a streamed text message; each `write` becomes a fragment and
    /// the total length never needs to be declared.
    pub async fn start_text_stream(&self) -> Result<MessageWriter<'_>, Error> {
        self.start_stream(OpCode::Text).await
    }

    /// Opens a streamed binary message.
    pub async fn start_binary_stream(&self) -> Result<MessageWriter<'_>, Error> {
        self.start_stream(OpCode::Binary).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        let mut writer = self.start_text(text.len() as u64).await?;
        writer.write(text.as_bytes()).await?;
        writer.end().await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<(), Error> {
        let mut writer = self.start_binary(data.len() as u64).await?;
        writer.write(data).await?;
        writer.end().await
    }

    /// Sends `value` as a JSON text message. Streamed, so the encoded
    /// size never has to be known up front.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        let encoded = serde_json::to_vec(value)?;
        let mut writer = self.start_text_stream().await?;
        writer.write(&encoded).await?;
        writer.end().await
    }

    pub async fn send_ping(&self, payload: &[u8]) -> Result<(), Error> {
        self.shared.control_send(OpCode::Ping, payload).await
    }

    pub async fn send_pong(&self, payload: &[u8]) -> Result<(), Error> {
        self.shared.control_send(OpCode::Pong, payload).await
    }

    async fn start_sized(&self, opcode: OpCode, len: u64) -> Result<MessageWriter<'_>, Error> {
        let shared = &*self.shared;
        if shared.closed.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        let slot = shared.data_sender.acquire();
        let mut writer = lock_writer_or_closed(shared).await?;
        let mask_key = writer.fresh_mask();
        let header = FrameHeader {
            final_fragment: true,
            opcode,
            length: len,
            mask_key,
        };
        if let Err(err) = race_closed(&shared.closed, writer.write_header(&header)).await {
            // The header may be partially on the wire already.
            shared.closed.fire();
            return Err(err);
        }
        Ok(MessageWriter {
            shared,
            _slot: slot,
            mode: SendMode::Sized {
                writer,
                remaining: len,
                mask: mask_key.map(MaskCursor::new),
            },
            finished: false,
        })
    }

    async fn start_stream(&self, opcode: OpCode) -> Result<MessageWriter<'_>, Error> {
        let shared = &*self.shared;
        if shared.closed.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        let slot = shared.data_sender.acquire();
        {
            let mut writer = lock_writer_or_closed(shared).await?;
            let mask_key = writer.fresh_mask();
            let header = FrameHeader {
                final_fragment: false,
                opcode,
                length: 0,
                mask_key,
            };
            let opened = race_closed(&shared.closed, async {
                writer.write_header(&header).await?;
                writer.flush().await
            })
            .await;
            if let Err(err) = opened {
                shared.closed.fire();
                return Err(err);
            }
        }
        Ok(MessageWriter {
            shared,
            _slot: slot,
            mode: SendMode::Stream,
            finished: false,
        })
    }
}
