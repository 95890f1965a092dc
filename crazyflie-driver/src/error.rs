use std::num::ParseIntError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid URI")]
    InvalidUri,
    #[error("Callback {0} is mandatory")]
    MissingCallback(&'static str),
    #[error("A radio link is already open, disconnect first")]
    LinkAlreadyOpen,
    #[error("No radio link open")]
    NotConnected,
    #[error("No Crazyradio dongle found")]
    NoDongleFound,
    #[error("Timeout")]
    Timeout,
    /// Failure reported by a [Radio](crate::Radio) implementation
    #[error("Radio transport error: {0}")]
    Transport(String),
    #[cfg(feature = "native")]
    #[error("Crazyradio error: {0:?}")]
    CrazyradioError(crate::crazyradio::Error),
    #[error("Variable {0} not found in TOC")]
    VariableNotFound(String),
    #[error("Malformed TOC element")]
    MalformedTocElement,
    #[error("Packet payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("TOC cache error: {0}")]
    Cache(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "native")]
impl From<crate::crazyradio::Error> for Error {
    fn from(error: crate::crazyradio::Error) -> Self {
        Error::CrazyradioError(error)
    }
}

impl From<url::ParseError> for Error {
    fn from(_error: url::ParseError) -> Self {
        Error::InvalidUri
    }
}

impl From<ParseIntError> for Error {
    fn from(_error: ParseIntError) -> Self {
        Error::InvalidUri
    }
}

impl From<hex::FromHexError> for Error {
    fn from(_error: hex::FromHexError) -> Self {
        Error::InvalidUri
    }
}
