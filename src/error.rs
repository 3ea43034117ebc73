use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Payload plus its length prefix exceeds the topic's segment size.
    #[error("event does not fit into a single segment")]
    TooLargeEvent,
    /// Record does not fit into the remaining capacity of one segment.
    #[error("record does not fit into the segment")]
    DataTooLarge,
    /// No record starts at the given address.
    #[error("no record at the given address")]
    WrongAddress,
    #[error("corrupt data: {0}")]
    SegmentCorrupted(&'static str),
    #[error("corrupt event envelope: {0}")]
    CorruptEnvelope(&'static str),
    #[error("topic closed")]
    Closed,
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
