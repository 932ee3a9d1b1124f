use crate::connection::{race_closed, Shared, WSConnection};
use crate::error::Error;
use crate::frame::{
    decode_close_payload, FrameHeader, FrameType, MaskCursor, OpCode, MAX_CONTROL_PAYLOAD,
    MAX_LENIENT_PING_PAYLOAD,
};
use crate::message::Message;
use crate::stream::SocketWireStream;
use log::debug;
use serde::de::DeserializeOwned;
use std::io;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncReadExt, BufReader, ReadHalf};

/// Receive-side state: the buffered read half plus the cursor over the
/// frame currently being drained. Protected by the reader mutex, which
/// the data-receive detector keeps uncontended.
pub(crate) struct ReadState {
    reader: BufReader<ReadHalf<SocketWireStream>>,
    current: Option<RecvCursor>,
}

impl ReadState {
    pub(crate) fn new(reader: BufReader<ReadHalf<SocketWireStream>>) -> Self {
        Self {
            reader,
            current: None,
        }
    }
}

// Cursor over the fragment being drained. The mask index rolls across
// read calls within one fragment and resets on the next one.
struct RecvCursor {
    fin: bool,
    remaining: u64,
    mask: Option<MaskCursor>,
}

impl RecvCursor {
    fn start(header: &FrameHeader) -> Self {
        Self {
            fin: header.final_fragment,
            remaining: header.length,
            mask: header.mask_key.map(MaskCursor::new),
        }
    }

    fn advance(&mut self, header: &FrameHeader) {
        self.fin = header.final_fragment;
        self.remaining = header.length;
        self.mask = header.mask_key.map(MaskCursor::new);
    }
}

impl WSConnection {
    /// Advances to the next message-bearing frame and returns its type,
    /// or `None` once the connection has ended.
    ///
    /// Pings are answered transparently and close frames run the close
    /// handshake, neither reaches the caller. The previous message must
    /// be fully drained before calling this again.
    pub async fn next_frame(&self) -> Result<Option<FrameType>, Error> {
        match self.next_frame_inner().await {
            // A teardown observed mid-read is the normal end of stream.
            Err(Error::AlreadyClosed) => Ok(None),
            other => other,
        }
    }

    async fn next_frame_inner(&self) -> Result<Option<FrameType>, Error> {
        let shared = &*self.shared;
        if shared.closed.is_closed() {
            return Ok(None);
        }
        let _slot = shared.data_receiver.acquire();
        let mut state = shared.reader.lock().await;
        let state = &mut *state;

        if let Some(cursor) = &state.current {
            if cursor.remaining > 0 || !cursor.fin {
                return Err(Error::MessageInProgress);
            }
        }
        state.current = None;

        loop {
            let header =
                race_closed(&shared.closed, FrameHeader::read_from(&mut state.reader)).await?;

            match header.opcode {
                OpCode::Text | OpCode::Binary => {
                    let frame_type = if header.opcode == OpCode::Text {
                        FrameType::Text
                    } else {
                        FrameType::Binary
                    };
                    state.current = Some(RecvCursor::start(&header));
                    return Ok(Some(frame_type));
                }
                // Between messages there is nothing a continuation frame
                // could continue.
                OpCode::Continue => return Err(Error::InvalidContinuationFrame),
                OpCode::Ping => {
                    if header.length as usize > MAX_LENIENT_PING_PAYLOAD {
                        self.force_close().await;
                        return Err(Error::ControlFramePayloadSize);
                    }
                    let payload =
                        read_control_payload(shared, &mut state.reader, &header).await?;
                    debug!("ping received ({} bytes), echoing a pong", payload.len());
                    shared.control_send_lenient(OpCode::Pong, &payload).await?;
                }
                OpCode::Pong => {
                    if shared.expose_pongs {
                        state.current = Some(RecvCursor::start(&header));
                        return Ok(Some(FrameType::Pong));
                    }
                    if header.length as usize > MAX_CONTROL_PAYLOAD {
                        return Err(Error::ControlFramePayloadSize);
                    }
                    let payload =
                        read_control_payload(shared, &mut state.reader, &header).await?;
                    register_pong(shared, &payload)?;
                }
                OpCode::Close => {
                    if header.length as usize > MAX_CONTROL_PAYLOAD {
                        self.force_close().await;
                        return Err(Error::ControlFramePayloadSize);
                    }
                    let payload =
                        read_control_payload(shared, &mut state.reader, &header).await?;

                    if shared.close_sent.load(Ordering::Acquire) {
                        // The peer is acknowledging our close.
                        debug!("peer acknowledged the close, connection done");
                        self.force_close().await;
                        return Ok(None);
                    }

                    let close_frame = decode_close_payload(&payload);
                    *shared.peer_close.lock().await = Some(close_frame.clone());
                    // Echo the close back before tearing the stream down;
                    // if the write fails the teardown happens regardless.
                    let _ = shared.control_send_lenient(OpCode::Close, &payload).await;
                    self.force_close().await;
                    return Err(Error::ClosedByPeer {
                        code: close_frame.code,
                        reason: close_frame.reason,
                    });
                }
            }
        }
    }

    /// Reads payload bytes of the current frame into `buf`, returning how
    /// many were read; 0 means the message is complete. Continuation
    /// headers of a fragmented message are consumed transparently.
    pub async fn read_payload(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let shared = &*self.shared;
        if shared.closed.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        let _slot = shared.data_receiver.acquire();
        let mut state = shared.reader.lock().await;
        let state = &mut *state;

        loop {
            let Some(cursor) = state.current.as_mut() else {
                return Err(Error::NoActiveFrame);
            };

            if cursor.remaining == 0 {
                if cursor.fin {
                    return Ok(0);
                }
                // The fragment is drained but the message is not: the
                // next frame on the wire has to be its continuation.
                let header =
                    race_closed(&shared.closed, FrameHeader::read_from(&mut state.reader))
                        .await?;
                if header.opcode != OpCode::Continue {
                    return Err(Error::InvalidFrameFragmentation);
                }
                cursor.advance(&header);
                continue;
            }

            let take = buf.len().min(cursor.remaining.min(usize::MAX as u64) as usize);
            let read = race_closed(&shared.closed, state.reader.read(&mut buf[..take])).await?;
            if read == 0 {
                return Err(Error::from(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended in the middle of a frame",
                )));
            }
            if let Some(mask) = cursor.mask.as_mut() {
                mask.apply(&mut buf[..read]);
            }
            cursor.remaining -= read as u64;
            return Ok(read);
        }
    }

    /// Drains the current message and decodes it as JSON.
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let data = self.read_to_end().await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Convenience receive loop step: advances to the next text or binary
    /// message, drains it whole and returns it. `None` once the
    /// connection ends; exposed pong frames are drained and skipped.
    pub async fn receive(&self) -> Result<Option<Message>, Error> {
        loop {
            let Some(frame_type) = self.next_frame().await? else {
                return Ok(None);
            };
            let data = self.read_to_end().await?;
            match frame_type {
                FrameType::Text => return Ok(Some(Message::Text(String::from_utf8(data)?))),
                FrameType::Binary => return Ok(Some(Message::Binary(data))),
                FrameType::Pong => continue,
            }
        }
    }

    async fn read_to_end(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = self.read_payload(&mut chunk).await?;
            if read == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&chunk[..read]);
        }
    }
}

async fn read_control_payload(
    shared: &Shared,
    reader: &mut BufReader<ReadHalf<SocketWireStream>>,
    header: &FrameHeader,
) -> Result<Vec<u8>, Error> {
    let mut payload = vec![0u8; header.length as usize];
    race_closed(&shared.closed, reader.read_exact(&mut payload)).await?;
    if let Some(key) = header.mask_key {
        MaskCursor::new(key).apply(&mut payload);
    }
    Ok(payload)
}

// Keepalive bookkeeping: a pong must carry the decimal number of the ping
// it answers, and pongs must arrive in order. Anything else means the
// peer is fabricating or reordering control traffic.
fn register_pong(shared: &Shared, payload: &[u8]) -> Result<(), Error> {
    let number: u32 = std::str::from_utf8(payload)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(Error::InvalidPongPayload)?;
    shared
        .last_pong
        .compare_exchange(
            number.wrapping_sub(1),
            number,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map_err(|_| Error::InvalidPongPayload)?;
    debug!("pong {number} acknowledged");
    Ok(())
}
