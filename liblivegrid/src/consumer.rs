//! The transport boundary and the single consumer loop.
//!
//! The worker never talks to the broker client directly; it polls a
//! [`DocumentSource`] and hands whatever arrives to the dispatcher, in
//! delivery order. While nothing is arriving it invokes a cooperative idle
//! callback, the only yield point in the system. Rendering surfaces that need
//! an event-loop tick to repaint hook it there.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use super::dispatcher::RunDispatcher;
use super::document::Document;
use super::error::ConsumerError;

/// A subscription delivering a total order of documents per partition
pub trait DocumentSource {
    /// Wait up to `timeout` for the next document. `Ok(None)` means nothing
    /// arrived in time; `Err(SourceClosed)` means the subscription ended.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Document>, ConsumerError>;
}

/// Source backed by an in-process channel. Used to hand documents over from
/// a producer thread, be that a broker client wrapper or the simulator.
pub struct ChannelSource {
    rx: Receiver<Document>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Document>) -> Self {
        Self { rx }
    }
}

impl DocumentSource for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Document>, ConsumerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(doc) => Ok(Some(doc)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ConsumerError::SourceClosed),
        }
    }
}

/// Consume documents until the source closes, then release every tracker.
///
/// `idle` runs once per empty poll and never from inside document handling.
pub fn run_consumer<S: DocumentSource>(
    source: &mut S,
    dispatcher: &mut RunDispatcher,
    poll_timeout: Duration,
    mut idle: impl FnMut(),
) {
    loop {
        match source.poll(poll_timeout) {
            Ok(Some(doc)) => {
                log::debug!("dispatching {} document {}", doc.kind(), doc.uid());
                dispatcher.route(&doc);
            }
            Ok(None) => idle(),
            Err(ConsumerError::SourceClosed) => {
                log::info!("document source closed");
                break;
            }
            Err(e) => {
                log::error!("document source failed: {e}");
                break;
            }
        }
    }
    dispatcher.shutdown();
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sim::{publish_demo_run, CaptureSinkProvider, SimChannelReader, ROI_SOURCE};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn test_consumer_drives_a_full_run() {
        let config = Config::default();
        let reader = SimChannelReader::new();
        reader.set_value(ROI_SOURCE, 5.0);
        let sinks = CaptureSinkProvider::new();
        let mut dispatcher = RunDispatcher::new(
            config.clone(),
            Arc::new(reader),
            Arc::new(sinks.clone()),
        );

        let (tx, rx) = mpsc::channel();
        let run_uid = publish_demo_run(&tx, &config).unwrap();
        drop(tx); // close the subscription once the run is published

        let mut source = ChannelSource::new(rx);
        let mut idle_ticks = 0usize;
        run_consumer(
            &mut source,
            &mut dispatcher,
            Duration::from_millis(1),
            || idle_ticks += 1,
        );

        // The run was fully processed and released on shutdown
        assert_eq!(dispatcher.active_runs(), 0);
        let last = sinks.last_frame(&run_uid).unwrap();
        for col in 0..9 {
            assert_eq!(last.get(0, col), 5.0);
            assert_eq!(last.get(1, col), 5.0);
        }
        assert_eq!(last.get(0, 9), 5.0);
        assert_eq!(last.get(1, 9), 0.0);
    }

    #[test]
    fn test_idle_callback_runs_while_waiting() {
        let (tx, rx) = mpsc::channel::<Document>();
        let mut source = ChannelSource::new(rx);
        let mut dispatcher = RunDispatcher::new(
            Config::default(),
            Arc::new(SimChannelReader::new()),
            Arc::new(CaptureSinkProvider::new()),
        );

        let mut idle_ticks = 0usize;
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            drop(tx);
        });
        run_consumer(
            &mut source,
            &mut dispatcher,
            Duration::from_millis(5),
            || idle_ticks += 1,
        );
        assert!(idle_ticks > 0);
    }
}
