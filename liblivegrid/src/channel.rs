//! The hardware channel-access boundary.
//!
//! The worker reads one live detector value per counter event. The underlying
//! connection context may be shared process-wide, but every tracker owns its
//! own handle to the channels it reads; handles are never shared between runs.

use std::time::Duration;

use super::error::ChannelError;

/// The shared connection context. One instance serves all trackers.
pub trait ChannelReader: Send + Sync {
    /// Open a fresh handle on a channel by its symbolic address
    fn open(&self, name: &str) -> Result<Box<dyn ChannelHandle>, ChannelError>;
}

/// An exclusively owned connection to a single channel
pub trait ChannelHandle: Send {
    fn name(&self) -> &str;

    /// Blocking read of the current channel value.
    ///
    /// Must return within the given timeout; a timeout is reported as
    /// [`ChannelError::ReadTimeout`], never by blocking indefinitely.
    fn read(&mut self, timeout: Duration) -> Result<f64, ChannelError>;

    /// Release the handle. Reads after close fail with [`ChannelError::Closed`].
    fn close(&mut self);
}
