use std::fmt;

pub type Result<R, E = Error> = std::result::Result<R, E>;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Spawn { service: String, source: std::io::Error },
    UnknownService(String),
    CircularDependencyDetected,
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Spawn { service, source } => {
                write!(f, "failed to spawn service `{service}`: {source}")
            }
            Error::UnknownService(key) => write!(f, "unknown service `{key}`"),
            Error::CircularDependencyDetected => write!(f, "circular service dependency detected"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::Spawn { source: err, .. } => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
