use crate::connection::WSConnection;
use crate::error::Error;
use crate::message::Message;
use futures::Stream;
use rand::random;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::Receiver;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

pub type ID = Uuid;

// Every client the server accepts gets a fresh random id.
pub fn generate_new_uuid() -> Uuid {
    let buf: [u8; 16] = random();
    Uuid::new_v8(buf)
}

/// Everything a running server can tell the end-user about: connects,
/// messages, disconnects and per-connection errors.
pub enum Event {
    NewClient(ID, WSConnection),
    NewMessage(ID, Message),
    Disconnect(ID),
    Error(ID, Error),
}

/// Stream of server events, so the end-user never touches the underlying
/// mpsc channel directly.
pub struct EventStream {
    receiver: ReceiverStream<Event>,
}

impl EventStream {
    pub fn new(receiver: Receiver<Event>) -> Self {
        Self {
            receiver: ReceiverStream::new(receiver),
        }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll_next(cx)
    }
}
