use thiserror::Error;

/// Errors that end a connection or the accept loop.
///
/// Per-frame problems never surface here; they are answered with an `error`
/// frame and the session continues.
#[derive(Error, Debug)]
pub enum ParleysError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The connection was closed by the remote peer or refused by a limit.
    #[error("connection closed")]
    ConnectionClosed,
    /// The client did not authenticate in time.
    #[error("authentication timed out")]
    AuthTimeout,
}

/// Reasons a `message` frame is rejected before anything is stored.
#[derive(Error, Debug)]
pub enum RouteError {
    /// A required field is absent or blank.
    #[error("missing {0}")]
    MissingField(&'static str),
    /// The frame names a sender other than the authenticated identity.
    #[error("sender does not match authenticated identity")]
    SenderMismatch,
    /// The content exceeds the configured maximum.
    #[error("content too large: max {max}, got {actual}")]
    TooLarge {
        /// Maximum allowed content length in bytes.
        max: usize,
        /// Actual content length in bytes.
        actual: usize,
    },
    /// The delivery frame could not be encoded.
    #[error(transparent)]
    Frame(#[from] parley_common::FrameError),
}
