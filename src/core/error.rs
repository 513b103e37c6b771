use std::error::Error as StdError;
use thiserror::Error;

pub type ReplayResult<T> = Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay buffer has no init segment or no data segments")]
    CacheEmpty,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no frame available: {reason}")]
    DecodeUnavailable { reason: String },
    #[error("invalid config: {message}")]
    Config { message: String },
    #[error("{context}: {source}")]
    Library {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ReplayError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::DecodeUnavailable {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn library<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Library {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
