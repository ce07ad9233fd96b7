//! Simulation utilities: an in-memory channel-access fake, a frame-capturing
//! sink, and a scripted run publisher shaped like the documents the beamline
//! actually emits. Used by the worker's demo mode and by the test suite.

use std::sync::mpsc::{SendError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fxhash::FxHashMap;

use super::channel::{ChannelHandle, ChannelReader};
use super::config::{Config, PlanMatch, RoiChannel};
use super::document::{DataKey, DescriptorDoc, Document, EventPageDoc, StartDoc, StopDoc};
use super::error::{ChannelError, SinkError};
use super::grid::Grid;
use super::sink::{GridSink, GridSinkProvider};

/// ROI readback address used by the scripted demo run, matching the Xspress3
/// detector at the 08BM endstation
pub const ROI_SOURCE: &str = "PV:XF:08BM-ES{Xsp:1}:C1_ROI1:Value_RBV";

/// Array counter readback address used by the scripted demo run
pub const COUNTER_SOURCE: &str = "PV:XF:08BM-ES{Xsp:1}:C1_ROI1:ArrayCounter_RBV";

#[derive(Debug, Default)]
struct SimChannelState {
    value: f64,
    fail_next: u32,
    refuse_connect: bool,
}

/// In-memory channel-access context. Values are settable from outside while
/// handles read them, like a real control system.
#[derive(Clone, Default)]
pub struct SimChannelReader {
    channels: Arc<Mutex<FxHashMap<String, SimChannelState>>>,
}

impl SimChannelReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, name: &str, value: f64) {
        let mut channels = self.channels.lock().unwrap();
        channels.entry(name.to_string()).or_default().value = value;
    }

    /// Make the next `count` reads of a channel time out
    pub fn fail_next_reads(&self, name: &str, count: u32) {
        let mut channels = self.channels.lock().unwrap();
        channels.entry(name.to_string()).or_default().fail_next = count;
    }

    /// Make open() fail for a channel
    pub fn refuse_connect(&self, name: &str) {
        let mut channels = self.channels.lock().unwrap();
        channels.entry(name.to_string()).or_default().refuse_connect = true;
    }
}

impl ChannelReader for SimChannelReader {
    fn open(&self, name: &str) -> Result<Box<dyn ChannelHandle>, ChannelError> {
        let mut channels = self.channels.lock().unwrap();
        let state = channels.entry(name.to_string()).or_default();
        if state.refuse_connect {
            return Err(ChannelError::NotConnected(name.to_string()));
        }
        Ok(Box::new(SimChannelHandle {
            name: name.to_string(),
            channels: self.channels.clone(),
            closed: false,
        }))
    }
}

struct SimChannelHandle {
    name: String,
    channels: Arc<Mutex<FxHashMap<String, SimChannelState>>>,
    closed: bool,
}

impl ChannelHandle for SimChannelHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, timeout: Duration) -> Result<f64, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed(self.name.clone()));
        }
        let mut channels = self.channels.lock().unwrap();
        let state = channels.entry(self.name.clone()).or_default();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ChannelError::ReadTimeout {
                channel: self.name.clone(),
                timeout,
            });
        }
        Ok(state.value)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Default)]
struct CaptureState {
    frames: FxHashMap<String, Vec<Grid>>,
    redraws: FxHashMap<String, usize>,
}

/// Sink provider that records every rendered frame and redraw request,
/// keyed by run uid
#[derive(Clone, Default)]
pub struct CaptureSinkProvider {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureSinkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// All frames rendered for a run, in order
    pub fn frames(&self, run_uid: &str) -> Vec<Grid> {
        let state = self.state.lock().unwrap();
        state.frames.get(run_uid).cloned().unwrap_or_default()
    }

    pub fn last_frame(&self, run_uid: &str) -> Option<Grid> {
        self.frames(run_uid).pop()
    }

    pub fn redraws(&self, run_uid: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.redraws.get(run_uid).copied().unwrap_or(0)
    }

    pub fn was_opened(&self, run_uid: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.frames.contains_key(run_uid)
    }
}

impl GridSinkProvider for CaptureSinkProvider {
    fn open(&self, run_uid: &str) -> Result<Box<dyn GridSink>, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.frames.entry(run_uid.to_string()).or_default();
        Ok(Box::new(CaptureSink {
            run_uid: run_uid.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct CaptureSink {
    run_uid: String,
    state: Arc<Mutex<CaptureState>>,
}

impl GridSink for CaptureSink {
    fn render(&mut self, grid: &Grid) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state
            .frames
            .entry(self.run_uid.clone())
            .or_default()
            .push(grid.clone());
        Ok(())
    }

    fn request_redraw(&mut self) {
        let mut state = self.state.lock().unwrap();
        *state.redraws.entry(self.run_uid.clone()).or_default() += 1;
    }
}

/// A start document the configured predicate will recognize
fn demo_start(config: &Config) -> StartDoc {
    match &config.plan_match {
        PlanMatch::PlanName(name) => StartDoc::new(name).with_scan_id(1),
        PlanMatch::MetadataKey(key) => StartDoc::new("list_scan")
            .with_scan_id(1)
            .with_metadata(key, "1"),
    }
}

/// Publish one scripted scan: a recognized start, the ROI and array counter
/// monitor descriptors, 19 single-sample counter pages with values 1..=19,
/// and a stop. Returns the run uid.
pub fn publish_demo_run(
    tx: &Sender<Document>,
    config: &Config,
) -> Result<String, SendError<Document>> {
    let start = demo_start(config);
    let run_uid = start.uid.clone();
    tx.send(Document::Start(start))?;

    let roi_key = match &config.roi_channel {
        RoiChannel::FromDescriptor(key) => key.clone(),
        RoiChannel::Static(_) => String::from("xs_channel1_rois_roi1_value"),
    };
    tx.send(Document::Descriptor(
        DescriptorDoc::new(&run_uid, "ROI_01_monitor")
            .with_data_key(&roi_key, DataKey::scalar(ROI_SOURCE).with_precision(4)),
    ))?;

    let counter_desc = DescriptorDoc::new(&run_uid, "array_counter_monitor").with_data_key(
        &config.array_counter_key,
        DataKey::scalar(COUNTER_SOURCE).with_precision(4),
    );
    let counter_stream = counter_desc.uid.clone();
    tx.send(Document::Descriptor(counter_desc))?;

    for counter in 1..=19u64 {
        tx.send(Document::EventPage(EventPageDoc::single(
            &counter_stream,
            &config.array_counter_key,
            counter as f64,
            counter - 1,
        )))?;
    }

    tx.send(Document::Stop(StopDoc::success(&run_uid, 19)))?;
    Ok(run_uid)
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_reads_track_set_values() {
        let reader = SimChannelReader::new();
        reader.set_value("PV:SIM:A", 3.0);
        let mut handle = reader.open("PV:SIM:A").unwrap();
        assert_eq!(handle.read(Duration::from_millis(10)).unwrap(), 3.0);
        reader.set_value("PV:SIM:A", 4.0);
        assert_eq!(handle.read(Duration::from_millis(10)).unwrap(), 4.0);
    }

    #[test]
    fn test_sim_injected_failures_expire() {
        let reader = SimChannelReader::new();
        reader.set_value("PV:SIM:A", 1.5);
        reader.fail_next_reads("PV:SIM:A", 2);
        let mut handle = reader.open("PV:SIM:A").unwrap();
        let timeout = Duration::from_millis(10);
        assert!(matches!(
            handle.read(timeout),
            Err(ChannelError::ReadTimeout { .. })
        ));
        assert!(handle.read(timeout).is_err());
        assert_eq!(handle.read(timeout).unwrap(), 1.5);
    }

    #[test]
    fn test_closed_handle_rejects_reads() {
        let reader = SimChannelReader::new();
        let mut handle = reader.open("PV:SIM:A").unwrap();
        handle.close();
        assert!(matches!(
            handle.read(Duration::from_millis(10)),
            Err(ChannelError::Closed(_))
        ));
    }

    #[test]
    fn test_refused_connect() {
        let reader = SimChannelReader::new();
        reader.refuse_connect("PV:SIM:B");
        assert!(matches!(
            reader.open("PV:SIM:B"),
            Err(ChannelError::NotConnected(_))
        ));
    }

    #[test]
    fn test_demo_run_shape() {
        let config = Config::default();
        let (tx, rx) = std::sync::mpsc::channel();
        let run_uid = publish_demo_run(&tx, &config).unwrap();
        let docs: Vec<Document> = rx.try_iter().collect();

        assert_eq!(docs.len(), 1 + 2 + 19 + 1);
        assert!(matches!(&docs[0], Document::Start(s) if s.uid == run_uid));
        assert!(matches!(&docs[1], Document::Descriptor(_)));
        assert!(matches!(&docs[2], Document::Descriptor(_)));
        assert!(matches!(docs.last(), Some(Document::Stop(s)) if s.run_uid == run_uid));
    }
}
