//! # livegrid
//!
//! livegrid is a live-visualization worker for the beamline document stream.
//! It subscribes to the run documents published by the data acquisition
//! (start/descriptor/event_page/stop), picks out scans of a recognized plan
//! type, and renders a 2-D intensity grid for each one as it happens: the
//! detector's monotonically increasing array counter gives the grid position,
//! and a live read of the ROI channel at the moment each counter event
//! arrives gives the intensity.
//!
//! ## Components
//!
//! - [`document`]: the start/descriptor/event-page/stop vocabulary linking a
//!   run's documents by identifier.
//! - [`dispatcher`]: matches start documents against the configured plan
//!   predicate and routes every document to the tracker owning its run.
//! - [`tracker`]: the per-run state machine; identifies the array counter
//!   stream, maps counter values to grid cells one-based and row-major, and
//!   fuses in the synchronous ROI read.
//! - [`channel`] and [`sink`]: the hardware channel-access and rendering
//!   boundaries. The worker ships a logging sink and in-memory simulation
//!   implementations; real surfaces and broker clients plug in at these seams.
//! - [`consumer`]: the poll loop gluing a [`consumer::DocumentSource`] to the
//!   dispatcher, with a cooperative idle callback driven only while no
//!   documents are arriving.
//!
//! ## Configuration
//!
//! Workers are configured with a YAML file (see `livegrid_cli new` for a
//! template):
//!
//! ```yml
//! topics:
//! - tes.bluesky.documents
//! bootstrap_servers: 10.0.137.8:9092
//! group_id: tes-livegrid-worker
//! plan_match: !plan_name list_scan
//! array_counter_key: ArrayCounter
//! grid_rows: 10
//! grid_cols: 10
//! roi_channel: !from_descriptor xs_channel1_rois_roi1_value
//! read_timeout_ms: 1000
//! ```
//!
//! `plan_match` selects the predicate deciding which runs get a grid: exact
//! plan-name equality (`!plan_name`) or presence of a metadata sentinel key
//! (`!metadata_key`). `roi_channel` selects how the ROI channel address is
//! found: a fixed address (`!static`) or discovery from the `source` field of
//! the named data key on whichever descriptor carries it (`!from_descriptor`).
//!
//! ## Operational notes
//!
//! A run that never receives its stop document keeps its tracker and grid
//! alive for the life of the process. This is a known operational risk of
//! the document protocol; the log will show the leak at shutdown.
pub mod channel;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod grid;
pub mod sim;
pub mod sink;
pub mod tracker;
