//! Crate-level error type.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("endpoint is no longer running")]
    EndpointClosed,

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_wrap_io_errors() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "I/O error: port taken");
    }
}
