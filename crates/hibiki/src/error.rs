use thiserror::Error;

#[derive(Error, Debug)]
pub enum HibikiError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("Unknown template identifier in {0:?}")]
    UnknownTemplateIdentifier(String),

    #[error("Invalid media range: {0:?}")]
    InvalidMediaRange(String),

    #[error("Invalid segment index: {0}")]
    InvalidIndex(String),

    #[error("Invalid segment reference: start {0} >= end {1}")]
    InvalidSegmentReference(f64, f64),

    #[error("Numeric overflow in {0}")]
    NumericOverflow(&'static str),

    #[error("Read out of bounds: needed {needed} bytes, {remaining} remaining")]
    ReadOutOfBounds { needed: usize, remaining: usize },

    #[error("Invalid string data: {0}")]
    InvalidStringData(String),

    #[error("Invalid AES-128 key: {0:?}")]
    InvalidAes128Key(Vec<u8>),

    #[error("Invalid timing schema: {0:?}")]
    InvalidTimingSchema(String),

    #[error("Failed to parse datetime: {0}")]
    DateTimeParsing(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    ChronoParseError(#[from] chrono::ParseError),
}

pub type HibikiResult<T> = Result<T, HibikiError>;
