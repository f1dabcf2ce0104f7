//! Error types for the cluster networking layer.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("peer is not connected")]
    NotConnected,

    #[error("reply timed out")]
    ReplyTimeout,

    #[error("cannot connect to self")]
    SelfConnect,

    #[error("peer presented no certificates")]
    NoPeerCertificate,

    #[error("stream closed")]
    StreamClosed,

    #[error("frame codec error: {0}")]
    Codec(String),

    #[error("ring error: {0}")]
    Ring(#[from] trinity_core::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
