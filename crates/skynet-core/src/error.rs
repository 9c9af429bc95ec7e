use thiserror::Error;

/// `skynet-core` only ever fails at configuration load. Event-codec,
/// provider, memory, and session failures each have their own taxonomy in
/// their owning crate (`skynet-protocol::EventError`,
/// `skynet-agent::ProviderError`, `skynet-memory::MemoryError`,
/// `skynet-sessions::SessionError`).
#[derive(Debug, Error)]
pub enum SkynetError {
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SkynetError>;
