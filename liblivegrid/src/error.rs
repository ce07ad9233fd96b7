use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has invalid grid dimensions {0}x{1}; both must be at least 1")]
    BadGridSize(usize, usize),
    #[error("Config has an empty array counter channel name")]
    EmptyCounterKey,
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Read of channel {channel} timed out after {timeout:?}")]
    ReadTimeout { channel: String, timeout: Duration },
    #[error("Read of channel {channel} failed: {reason}")]
    ReadFailure { channel: String, reason: String },
    #[error("Channel {0} could not be connected")]
    NotConnected(String),
    #[error("Channel {0} was read after its handle was closed")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Could not open a rendering surface for run {0}")]
    OpenFailed(String),
    #[error("Rendering surface failed to draw: {0}")]
    RenderFailed(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Tracker for run {run_uid} received single event {event_uid}; only event pages are supported")]
    UnexpectedEvent { run_uid: String, event_uid: String },
    #[error("Tracker for run {run_uid} received a {kind} document before its start document")]
    NotStarted { run_uid: String, kind: String },
    #[error("Event page {page_uid} on the array counter stream is missing the {key} column")]
    MissingColumn { page_uid: String, key: String },
    #[error("Tracker failed due to rendering error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Tracker failed due to channel error: {0}")]
    ChannelError(#[from] ChannelError),
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("The document subscription was closed by the transport")]
    SourceClosed,
    #[error("Transport failure while polling for documents: {0}")]
    Transport(String),
}
