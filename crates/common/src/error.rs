//! Common error types

use thiserror::Error;

/// Errors raised while loading configuration and key material
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("no api keys configured".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: no api keys configured"
        );

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "keys file not found",
        ));
        assert!(
            io_err.to_string().starts_with("I/O error:"),
            "got: {}",
            io_err
        );
    }

    #[test]
    fn toml_error_converts() {
        let parse_err = toml::from_str::<toml::Value>("not valid {{{{ toml").unwrap_err();
        let err: Error = parse_err.into();
        assert!(err.to_string().starts_with("TOML parse error:"), "got: {err}");
    }
}
