//! The document vocabulary shared by every component of the worker.
//!
//! A run is described by an ordered stream of documents:
//!
//! ```text
//! StartDoc (1)
//!    ├── DescriptorDoc (0+, one per data stream)
//!    │       └── EventPageDoc (N, batched samples)
//! StopDoc (1)
//! ```
//!
//! Documents are linked by identifier: a descriptor carries the uid of its
//! run's start document, and an event page carries the uid of its descriptor.
//! The start document's own uid *is* the run identifier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a fresh document uid
pub fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time as epoch seconds, matching the timestamp
/// convention used by the beamline document producers
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The kind tag of a document, used for routing and log context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Start,
    Descriptor,
    Event,
    EventPage,
    Stop,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Start => write!(f, "start"),
            DocumentKind::Descriptor => write!(f, "descriptor"),
            DocumentKind::Event => write!(f, "event"),
            DocumentKind::EventPage => write!(f, "event_page"),
            DocumentKind::Stop => write!(f, "stop"),
        }
    }
}

/// A single document as delivered by the transport.
///
/// One explicit variant per document kind; every component routes with a
/// single match over this enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Document {
    Start(StartDoc),
    Descriptor(DescriptorDoc),
    Event(EventDoc),
    EventPage(EventPageDoc),
    Stop(StopDoc),
}

impl Document {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Start(_) => DocumentKind::Start,
            Document::Descriptor(_) => DocumentKind::Descriptor,
            Document::Event(_) => DocumentKind::Event,
            Document::EventPage(_) => DocumentKind::EventPage,
            Document::Stop(_) => DocumentKind::Stop,
        }
    }

    /// The uid of the document itself
    pub fn uid(&self) -> &str {
        match self {
            Document::Start(d) => &d.uid,
            Document::Descriptor(d) => &d.uid,
            Document::Event(d) => &d.uid,
            Document::EventPage(d) => &d.uid,
            Document::Stop(d) => &d.uid,
        }
    }

    /// The run this document belongs to, when the document carries it
    /// directly. Events and event pages only reference their descriptor;
    /// their run is resolved through the dispatcher's stream map.
    pub fn run_uid(&self) -> Option<&str> {
        match self {
            Document::Start(d) => Some(&d.uid),
            Document::Descriptor(d) => Some(&d.run_uid),
            Document::Event(_) | Document::EventPage(_) => None,
            Document::Stop(d) => Some(&d.run_uid),
        }
    }
}

/// Emitted once at the beginning of a run. Its uid is the run identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDoc {
    pub uid: String,
    pub time: f64,
    /// Name of the plan that produced this run, e.g. "list_scan"
    pub plan_name: String,
    pub scan_id: Option<i64>,
    pub metadata: HashMap<String, String>,
}

impl StartDoc {
    pub fn new(plan_name: &str) -> Self {
        Self {
            uid: new_uid(),
            time: now(),
            plan_name: plan_name.to_string(),
            scan_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_scan_id(mut self, scan_id: i64) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Metadata for one channel within a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataKey {
    /// Symbolic address of the hardware channel backing this key,
    /// e.g. "PV:XF:08BM-ES{Xsp:1}:C1_ROI1:Value_RBV"
    pub source: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub units: String,
    pub precision: Option<i32>,
}

impl DataKey {
    /// A scalar numeric channel
    pub fn scalar(source: &str) -> Self {
        Self {
            source: source.to_string(),
            dtype: String::from("number"),
            shape: Vec::new(),
            units: String::new(),
            precision: None,
        }
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = units.to_string();
        self
    }

    pub fn with_precision(mut self, precision: i32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Defines one named data stream within a run: which channels it samples
/// and what they look like
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorDoc {
    pub uid: String,
    pub run_uid: String,
    /// Stream name, e.g. "array_counter_monitor"
    pub name: String,
    pub data_keys: HashMap<String, DataKey>,
    pub time: f64,
}

impl DescriptorDoc {
    pub fn new(run_uid: &str, name: &str) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            name: name.to_string(),
            data_keys: HashMap::new(),
            time: now(),
        }
    }

    pub fn with_data_key(mut self, name: &str, key: DataKey) -> Self {
        self.data_keys.insert(name.to_string(), key);
        self
    }
}

/// A batch of one or more samples belonging to one stream.
///
/// Columns are keyed by channel name; every column has one entry per sequence
/// number in `seq_nums`, in delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPageDoc {
    pub uid: String,
    pub descriptor_uid: String,
    pub seq_nums: Vec<u64>,
    pub data: HashMap<String, Vec<f64>>,
    pub timestamps: HashMap<String, Vec<f64>>,
    pub time: f64,
}

impl EventPageDoc {
    /// A page holding a single sample of a single channel; the shape the
    /// beamline monitor streams actually emit
    pub fn single(descriptor_uid: &str, key: &str, value: f64, seq_num: u64) -> Self {
        let ts = now();
        Self {
            uid: new_uid(),
            descriptor_uid: descriptor_uid.to_string(),
            seq_nums: vec![seq_num],
            data: HashMap::from([(key.to_string(), vec![value])]),
            timestamps: HashMap::from([(key.to_string(), vec![ts])]),
            time: ts,
        }
    }

    /// The sample column for a channel, if the page carries it
    pub fn column(&self, key: &str) -> Option<&[f64]> {
        self.data.get(key).map(|v| v.as_slice())
    }
}

/// A single unbatched sample. Not part of this worker's protocol; the
/// vocabulary carries it so the tracker can reject it explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
    pub uid: String,
    pub descriptor_uid: String,
    pub seq_num: u64,
    pub data: HashMap<String, f64>,
    pub timestamps: HashMap<String, f64>,
    pub time: f64,
}

/// Emitted once at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDoc {
    pub uid: String,
    pub run_uid: String,
    /// "success", "abort" or "fail"
    pub exit_status: String,
    pub reason: String,
    pub num_events: u64,
    pub time: f64,
}

impl StopDoc {
    pub fn success(run_uid: &str, num_events: u64) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            exit_status: String::from("success"),
            reason: String::new(),
            num_events,
            time: now(),
        }
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_uid_links() {
        let start = StartDoc::new("list_scan").with_scan_id(4);
        let run_uid = start.uid.clone();
        let desc = DescriptorDoc::new(&run_uid, "array_counter_monitor")
            .with_data_key("ArrayCounter", DataKey::scalar("PV:SIM:ArrayCounter_RBV"));
        let page = EventPageDoc::single(&desc.uid, "ArrayCounter", 1.0, 0);
        let stop = StopDoc::success(&run_uid, 1);

        assert_eq!(Document::Start(start).run_uid(), Some(run_uid.as_str()));
        assert_eq!(
            Document::Descriptor(desc.clone()).run_uid(),
            Some(run_uid.as_str())
        );
        // Pages only know their descriptor; the run is resolved elsewhere
        assert_eq!(Document::EventPage(page).run_uid(), None);
        assert_eq!(Document::Stop(stop).run_uid(), Some(run_uid.as_str()));
        assert_eq!(Document::Descriptor(desc).kind(), DocumentKind::Descriptor);
    }

    #[test]
    fn test_event_page_column() {
        let page = EventPageDoc::single("abc", "ArrayCounter", 7.0, 3);
        assert_eq!(page.column("ArrayCounter"), Some(&[7.0][..]));
        assert_eq!(page.column("SomethingElse"), None);
        assert_eq!(page.seq_nums, vec![3]);
    }

    #[test]
    fn test_document_tagged_serialization() {
        let doc = Document::Start(StartDoc::new("list_scan"));
        let yaml = serde_yaml::to_string(&doc).unwrap();
        assert!(yaml.contains("type: start"));
        assert!(yaml.contains("plan_name: list_scan"));
    }
}
