use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // General errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("{source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    // Connection lifecycle
    #[error("connection already closed")]
    AlreadyClosed,

    #[error("connection closed by peer with code {code}: {reason}")]
    ClosedByPeer { code: u16, reason: String },

    #[error("timed out waiting for the peer to acknowledge the close frame")]
    CloseTimeout,

    // Local API misuse. Concurrent misuse of the send/receive paths
    // panics instead, these are the recoverable-looking variants that
    // still leave the connection unusable.
    #[error("write exceeds the declared frame length")]
    FrameOverflow,

    #[error("frame ended with undelivered payload bytes")]
    IncompleteFrame,

    #[error("no frame is being read, call next_frame first")]
    NoActiveFrame,

    #[error("previous message has not been fully read")]
    MessageInProgress,

    // Framing errors
    #[error("Invalid Opcode")]
    InvalidOpcode,

    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("pong payload does not acknowledge the last ping sent")]
    InvalidPongPayload,

    // Handshake errors
    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("peer selected subprotocol `{0}` which was never offered")]
    InvalidSubProtocol(String),

    #[error("subprotocol name `{0}` must be alphabetic")]
    InvalidSubProtocolName(String),

    #[error("unsupported websocket version, the server supports: {0}")]
    UnsupportedVersion(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("mismatched Sec-WebSocket-Version header")]
    VersionMismatch,

    #[error("handshake failed with status {0} {1}")]
    HandshakeStatus(u16, String),

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    // HTTP / URL errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    // TLS errors
    #[error("{source}")]
    TLSError {
        #[from]
        source: rustls::Error,
    },

    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    #[error("no private key found in the key file")]
    NoPrivateKey,
}
