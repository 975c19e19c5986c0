use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("No channel for session: {0}")]
    NoChannel(String),
}
