use thiserror::Error;

/// Failures between the provider and a normalized record set.
///
/// Inside a bulk chunk these are isolated per ticker; on the
/// single-ticker path they surface to the caller unchanged.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("[{0}] no usable financial statements")]
    NoFinancials(String),

    #[error("[{0}] carries ETF data; ETFs are out of scope")]
    EtfDataPresent(String),

    #[error("[{0}] not known to the provider")]
    NotFound(String),

    #[error("provider request failed: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

/// Failures in either persistence destination. The two sinks fail
/// independently; a `Document` error says nothing about the warehouse
/// and vice versa.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("document store write failed: {0}")]
    Document(String),

    #[error("analytical store write failed: {0}")]
    Analytical(String),
}

impl From<tokio_postgres::Error> for SinkError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Analytical(err.to_string())
    }
}
