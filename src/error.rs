use thiserror::Error;

/// The kind of resource a [`SfuError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Room,
    Transport,
    Stream,
    Producer,
    Consumer,
    Cabin,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotFoundKind::Room => "room",
            NotFoundKind::Transport => "transport",
            NotFoundKind::Stream => "stream",
            NotFoundKind::Producer => "producer",
            NotFoundKind::Consumer => "consumer",
            NotFoundKind::Cabin => "cabin",
        };
        f.write_str(s)
    }
}

/// Fatal/structured error kinds for the SFU core, per spec §7.
///
/// `AdmissionDenied`, `AlreadyConnected`, and cabin "still in use" are
/// deliberately *not* variants here — those are successful outcomes with an
/// explanatory payload, not errors. Mapping them to `Err(..)` would be wrong.
#[derive(Debug, Error)]
pub enum SfuError {
    #[error("{0} {1} not found")]
    NotFound(NotFoundKind, String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("router cannot consume this producer with the given rtp capabilities")]
    CannotConsume,

    #[error("exhausted stream id collision retries: {0}")]
    ResourceExhausted(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("worker {0} died")]
    WorkerDied(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SfuResult<T> = Result<T, SfuError>;
