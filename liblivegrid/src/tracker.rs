//! The per-run state machine at the heart of the worker.
//!
//! A tracker owns exactly one run from its start document to its stop. It
//! watches the run's descriptors for the stream carrying the array counter
//! channel, and on every counter sample maps the counter to a grid cell,
//! reads the live ROI channel, and pushes the updated grid to its surface.
//!
//! Per-sample failures (out-of-range counter, read timeout) are logged and
//! skipped; they never unwind the run. Only a protocol violation terminates
//! the tracker, and it terminates only its own run.

use std::sync::Arc;
use std::time::Duration;

use super::channel::{ChannelHandle, ChannelReader};
use super::config::{Config, RoiChannel};
use super::document::{DescriptorDoc, EventDoc, EventPageDoc, StartDoc, StopDoc};
use super::error::TrackerError;
use super::grid::Grid;
use super::sink::{GridSink, GridSinkProvider};

/// Tracker lifecycle. Stopped is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    AwaitingStart,
    Active,
    Stopped,
}

/// RunTracker consumes the document stream for exactly one run and drives
/// its grid and rendering surface.
pub struct RunTracker {
    run_uid: String,
    state: TrackerState,
    counter_key: String,
    roi_channel: RoiChannel,
    read_timeout: Duration,
    reader: Arc<dyn ChannelReader>,
    sinks: Arc<dyn GridSinkProvider>,
    grid: Grid,
    counter_stream_uid: Option<String>,
    roi_handle: Option<Box<dyn ChannelHandle>>,
    sink: Option<Box<dyn GridSink>>,
}

impl RunTracker {
    /// Create a tracker bound to a run identifier. The grid is allocated
    /// zeroed; the surface and the ROI handle are opened by `start`.
    pub fn new(
        run_uid: &str,
        config: &Config,
        reader: Arc<dyn ChannelReader>,
        sinks: Arc<dyn GridSinkProvider>,
    ) -> Self {
        Self {
            run_uid: run_uid.to_string(),
            state: TrackerState::AwaitingStart,
            counter_key: config.array_counter_key.clone(),
            roi_channel: config.roi_channel.clone(),
            read_timeout: config.read_timeout(),
            reader,
            sinks,
            grid: Grid::new(config.grid_rows, config.grid_cols),
            counter_stream_uid: None,
            roi_handle: None,
            sink: None,
        }
    }

    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The uid of the stream identified as carrying the array counter,
    /// once one has been found
    pub fn counter_stream_uid(&self) -> Option<&str> {
        self.counter_stream_uid.as_deref()
    }

    /// Begin the run: open the rendering surface and, for a statically
    /// configured ROI channel, the ROI handle. The only legal first document.
    pub fn start(&mut self, doc: &StartDoc) -> Result<(), TrackerError> {
        if self.state != TrackerState::AwaitingStart {
            log::warn!(
                "run {}: duplicate start document {} dropped",
                self.run_uid,
                doc.uid
            );
            return Ok(());
        }
        log::info!(
            "starting a live grid for run {} (plan {})",
            self.run_uid,
            doc.plan_name
        );

        self.sink = Some(self.sinks.open(&self.run_uid)?);
        if let RoiChannel::Static(name) = &self.roi_channel {
            self.roi_handle = Some(self.reader.open(name)?);
            log::info!("run {}: opened ROI channel {}", self.run_uid, name);
        }
        self.state = TrackerState::Active;
        Ok(())
    }

    /// Inspect a stream descriptor. Identifies the array counter stream on
    /// first match and, in descriptor-discovery mode, the ROI channel.
    /// Idempotent; repeated or unrelated descriptors change nothing.
    pub fn descriptor(&mut self, doc: &DescriptorDoc) {
        if self.state != TrackerState::Active {
            log::warn!(
                "run {}: descriptor {} dropped in state {:?}",
                self.run_uid,
                doc.uid,
                self.state
            );
            return;
        }
        if doc.run_uid != self.run_uid {
            log::debug!(
                "run {}: ignoring descriptor {} for run {}",
                self.run_uid,
                doc.uid,
                doc.run_uid
            );
            return;
        }

        if self.counter_stream_uid.is_none() && doc.data_keys.contains_key(&self.counter_key) {
            log::info!(
                "run {}: stream {} ({}) carries {}",
                self.run_uid,
                doc.uid,
                doc.name,
                self.counter_key
            );
            self.counter_stream_uid = Some(doc.uid.clone());
        }

        if let RoiChannel::FromDescriptor(key) = &self.roi_channel {
            if self.roi_handle.is_none() {
                if let Some(data_key) = doc.data_keys.get(key) {
                    match self.reader.open(&data_key.source) {
                        Ok(handle) => {
                            log::info!(
                                "run {}: found the ROI channel {}",
                                self.run_uid,
                                data_key.source
                            );
                            self.roi_handle = Some(handle);
                        }
                        Err(e) => {
                            // Reads are skipped until a later descriptor connects
                            log::warn!(
                                "run {}: could not open ROI channel {}: {}",
                                self.run_uid,
                                data_key.source,
                                e
                            );
                        }
                    }
                }
            }
        }
    }

    /// Handle a batch of samples. Pages on streams other than the array
    /// counter stream are accepted and ignored.
    pub fn event_page(&mut self, doc: &EventPageDoc) -> Result<(), TrackerError> {
        if self.state == TrackerState::Stopped {
            log::warn!(
                "run {}: event page {} arrived after stop, dropped",
                self.run_uid,
                doc.uid
            );
            return Ok(());
        }
        if self.state != TrackerState::Active {
            return Err(TrackerError::NotStarted {
                run_uid: self.run_uid.clone(),
                kind: String::from("event_page"),
            });
        }
        match &self.counter_stream_uid {
            Some(uid) if *uid == doc.descriptor_uid => (),
            _ => {
                log::debug!(
                    "run {}: event page {} is not on the array counter stream",
                    self.run_uid,
                    doc.uid
                );
                return Ok(());
            }
        }

        let samples = doc
            .column(&self.counter_key)
            .ok_or_else(|| TrackerError::MissingColumn {
                page_uid: doc.uid.clone(),
                key: self.counter_key.clone(),
            })?
            .to_vec();
        for sample in samples {
            self.plot_sample(sample);
        }
        Ok(())
    }

    /// Map one counter sample to a cell, fuse in a live ROI read and push
    /// the grid to the surface. Every failure here is local to the sample.
    fn plot_sample(&mut self, sample: f64) {
        if !sample.is_finite() {
            log::warn!(
                "run {}: non-finite counter sample {sample}, skipped",
                self.run_uid
            );
            return;
        }
        let counter = sample.round() as i64;
        let Some((row, col)) = self.grid.map_counter(counter) else {
            log::warn!(
                "run {}: counter {counter} is outside the {}x{} grid, skipped",
                self.run_uid,
                self.grid.rows(),
                self.grid.cols()
            );
            return;
        };

        let Some(handle) = self.roi_handle.as_mut() else {
            log::warn!(
                "run {}: counter {counter} arrived before the ROI channel was identified, skipped",
                self.run_uid
            );
            return;
        };
        let value = match handle.read(self.read_timeout) {
            Ok(v) => v,
            Err(e) => {
                log::warn!(
                    "run {}: ROI read for counter {counter} failed, skipped: {e}",
                    self.run_uid
                );
                return;
            }
        };

        log::debug!(
            "run {}: counter {counter} -> ({row}, {col}) = {value}",
            self.run_uid
        );
        self.grid.set(row, col, value);
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.render(&self.grid) {
                log::warn!("run {}: render failed: {e}", self.run_uid);
            }
            sink.request_redraw();
        }
    }

    /// Single unbatched events are not part of this protocol
    pub fn event(&mut self, doc: &EventDoc) -> Result<(), TrackerError> {
        if self.state == TrackerState::Stopped {
            log::warn!(
                "run {}: event {} arrived after stop, dropped",
                self.run_uid,
                doc.uid
            );
            return Ok(());
        }
        Err(TrackerError::UnexpectedEvent {
            run_uid: self.run_uid.clone(),
            event_uid: doc.uid.clone(),
        })
    }

    /// End the run. The surface may stay visible but is never updated again.
    pub fn stop(&mut self, doc: &StopDoc) {
        if self.state == TrackerState::Stopped {
            log::warn!(
                "run {}: stop document {} arrived after stop, dropped",
                self.run_uid,
                doc.uid
            );
            return;
        }
        log::info!(
            "run {} finished with status {} after {} events",
            self.run_uid,
            doc.exit_status,
            doc.num_events
        );
        self.teardown();
    }

    /// Teardown path for fatal errors and transport shutdown. No background
    /// work survives the transition to Stopped.
    pub fn abort(&mut self) {
        if self.state != TrackerState::Stopped {
            log::info!("run {}: tracker released", self.run_uid);
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if let Some(handle) = self.roi_handle.as_mut() {
            handle.close();
        }
        self.roi_handle = None;
        self.state = TrackerState::Stopped;
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DataKey, DescriptorDoc, EventPageDoc, StartDoc, StopDoc};
    use crate::sim::{CaptureSinkProvider, SimChannelReader};

    const ROI_PV: &str = "PV:XF:08BM-ES{Xsp:1}:C1_ROI1:Value_RBV";

    fn test_config() -> Config {
        Config::default()
    }

    fn counter_descriptor(run_uid: &str) -> DescriptorDoc {
        DescriptorDoc::new(run_uid, "array_counter_monitor").with_data_key(
            "ArrayCounter",
            DataKey::scalar("PV:XF:08BM-ES{Xsp:1}:C1_ROI1:ArrayCounter_RBV"),
        )
    }

    fn roi_descriptor(run_uid: &str) -> DescriptorDoc {
        DescriptorDoc::new(run_uid, "ROI_01_monitor")
            .with_data_key("xs_channel1_rois_roi1_value", DataKey::scalar(ROI_PV))
    }

    fn started_tracker() -> (RunTracker, StartDoc, SimChannelReader, CaptureSinkProvider) {
        let reader = SimChannelReader::new();
        reader.set_value(ROI_PV, 5.0);
        let sinks = CaptureSinkProvider::new();
        let start = StartDoc::new("list_scan");
        let mut tracker = RunTracker::new(
            &start.uid,
            &test_config(),
            Arc::new(reader.clone()),
            Arc::new(sinks.clone()),
        );
        tracker.start(&start).unwrap();
        (tracker, start, reader, sinks)
    }

    #[test]
    fn test_stream_identification_is_idempotent() {
        let (mut tracker, start, _reader, _sinks) = started_tracker();
        let first = counter_descriptor(&start.uid);
        let second = counter_descriptor(&start.uid);

        tracker.descriptor(&first);
        assert_eq!(tracker.counter_stream_uid(), Some(first.uid.as_str()));

        // The same descriptor again, a second matching one, and an unrelated
        // one all leave the recorded stream unchanged
        tracker.descriptor(&first);
        tracker.descriptor(&second);
        tracker.descriptor(&roi_descriptor(&start.uid));
        assert_eq!(tracker.counter_stream_uid(), Some(first.uid.as_str()));
    }

    #[test]
    fn test_descriptor_for_other_run_ignored() {
        let (mut tracker, _start, _reader, _sinks) = started_tracker();
        tracker.descriptor(&counter_descriptor("some-other-run"));
        assert_eq!(tracker.counter_stream_uid(), None);
    }

    #[test]
    fn test_idle_run_leaves_grid_zeroed() {
        let (mut tracker, start, _reader, _sinks) = started_tracker();
        tracker.descriptor(&roi_descriptor(&start.uid));
        tracker.stop(&StopDoc::success(&start.uid, 0));
        assert!(tracker.grid().is_zero());
        assert_eq!(tracker.state(), TrackerState::Stopped);
    }

    #[test]
    fn test_counter_samples_fuse_roi_reads() {
        let (mut tracker, start, reader, sinks) = started_tracker();
        let desc = counter_descriptor(&start.uid);
        tracker.descriptor(&roi_descriptor(&start.uid));
        tracker.descriptor(&desc);

        tracker
            .event_page(&EventPageDoc::single(&desc.uid, "ArrayCounter", 1.0, 0))
            .unwrap();
        reader.set_value(ROI_PV, 7.5);
        tracker
            .event_page(&EventPageDoc::single(&desc.uid, "ArrayCounter", 12.0, 1))
            .unwrap();

        assert_eq!(tracker.grid().get(0, 0), 5.0);
        assert_eq!(tracker.grid().get(1, 1), 7.5);
        assert_eq!(sinks.frames(&start.uid).len(), 2);
        assert_eq!(sinks.redraws(&start.uid), 2);
    }

    #[test]
    fn test_out_of_range_counter_is_skipped() {
        let (mut tracker, start, _reader, sinks) = started_tracker();
        let desc = counter_descriptor(&start.uid);
        tracker.descriptor(&roi_descriptor(&start.uid));
        tracker.descriptor(&desc);

        for bad in [0.0, -4.0, 101.0, f64::NAN] {
            tracker
                .event_page(&EventPageDoc::single(&desc.uid, "ArrayCounter", bad, 0))
                .unwrap();
        }
        assert!(tracker.grid().is_zero());
        assert!(sinks.frames(&start.uid).is_empty());
    }

    #[test]
    fn test_read_timeout_skips_only_that_sample() {
        let (mut tracker, start, reader, _sinks) = started_tracker();
        let desc = counter_descriptor(&start.uid);
        tracker.descriptor(&roi_descriptor(&start.uid));
        tracker.descriptor(&desc);

        reader.fail_next_reads(ROI_PV, 1);
        tracker
            .event_page(&EventPageDoc::single(&desc.uid, "ArrayCounter", 3.0, 0))
            .unwrap();
        tracker
            .event_page(&EventPageDoc::single(&desc.uid, "ArrayCounter", 4.0, 1))
            .unwrap();

        // Sample 3 timed out and kept its prior value; sample 4 landed
        assert_eq!(tracker.grid().get(0, 2), 0.0);
        assert_eq!(tracker.grid().get(0, 3), 5.0);
    }

    #[test]
    fn test_page_before_stream_identified_is_skipped() {
        let (mut tracker, _start, _reader, _sinks) = started_tracker();
        // No descriptor seen yet; the page cannot be on the counter stream
        tracker
            .event_page(&EventPageDoc::single("unknown", "ArrayCounter", 1.0, 0))
            .unwrap();
        assert!(tracker.grid().is_zero());
    }

    #[test]
    fn test_single_event_is_a_protocol_violation() {
        let (mut tracker, _start, _reader, _sinks) = started_tracker();
        let event = EventDoc {
            uid: crate::document::new_uid(),
            descriptor_uid: String::from("whatever"),
            seq_num: 0,
            data: Default::default(),
            timestamps: Default::default(),
            time: 0.0,
        };
        assert!(matches!(
            tracker.event(&event),
            Err(TrackerError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn test_documents_after_stop_are_dropped() {
        let (mut tracker, start, _reader, _sinks) = started_tracker();
        let desc = counter_descriptor(&start.uid);
        tracker.descriptor(&roi_descriptor(&start.uid));
        tracker.descriptor(&desc);
        tracker.stop(&StopDoc::success(&start.uid, 0));

        let page = EventPageDoc::single(&desc.uid, "ArrayCounter", 1.0, 0);
        assert!(tracker.event_page(&page).is_ok());
        assert!(tracker.grid().is_zero());
        assert_eq!(tracker.state(), TrackerState::Stopped);
    }

    #[test]
    fn test_static_roi_channel_opens_at_start() {
        let reader = SimChannelReader::new();
        reader.set_value("PV:SIM:ROI", 2.5);
        let sinks = CaptureSinkProvider::new();
        let mut config = test_config();
        config.roi_channel = RoiChannel::Static(String::from("PV:SIM:ROI"));

        let start = StartDoc::new("list_scan");
        let mut tracker = RunTracker::new(
            &start.uid,
            &config,
            Arc::new(reader.clone()),
            Arc::new(sinks),
        );
        tracker.start(&start).unwrap();

        let desc = counter_descriptor(&start.uid);
        tracker.descriptor(&desc);
        tracker
            .event_page(&EventPageDoc::single(&desc.uid, "ArrayCounter", 1.0, 0))
            .unwrap();
        assert_eq!(tracker.grid().get(0, 0), 2.5);
    }
}
