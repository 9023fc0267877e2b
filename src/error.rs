use thiserror::Error;

/// All errors produced by the link layer and the file-transfer layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no acknowledgement after {0} attempts")]
    RetriesExhausted(u32),

    #[error("link is not established")]
    NotEstablished,

    #[error("{0} called on the wrong endpoint role")]
    WrongRole(&'static str),

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("receive buffer too small: {needed} bytes needed")]
    BufferTooSmall { needed: usize },

    #[error("unknown packet control byte: 0x{0:02x}")]
    UnknownPacket(u8),

    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("transfer did not begin with a START packet")]
    MissingStart,

    #[error("unexpected {0} packet")]
    UnexpectedPacket(&'static str),

    #[error("END packet disagrees with START on {0}")]
    TransferMismatch(&'static str),

    #[error("file size mismatch: announced {announced} bytes, received {actual}")]
    SizeMismatch { announced: u32, actual: u32 },

    #[error("file too large for a 4-byte size field: {0} bytes")]
    FileTooLarge(u64),

    #[error("file name too long for a packet field: {0} bytes")]
    NameTooLong(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
