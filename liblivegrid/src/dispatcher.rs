//! Routes the mixed document stream to per-run trackers.
//!
//! The dispatcher inspects every start document against the configured plan
//! predicate, spins up a tracker for each recognized run, and forwards the
//! run's remaining documents to it by identifier. Events and event pages only
//! carry their descriptor uid, so the dispatcher keeps a stream-to-run map
//! built from the descriptors it forwards.
//!
//! Documents for runs it never created are dropped, never an error. A fatal
//! tracker error aborts that run alone; the dispatcher itself outlives every
//! run it routes.

use std::sync::Arc;

use fxhash::FxHashMap;

use super::channel::ChannelReader;
use super::config::Config;
use super::document::{DescriptorDoc, Document, StartDoc, StopDoc};
use super::sink::GridSinkProvider;
use super::tracker::RunTracker;

pub struct RunDispatcher {
    config: Config,
    reader: Arc<dyn ChannelReader>,
    sinks: Arc<dyn GridSinkProvider>,
    /// Live trackers keyed by run uid. Single-writer: only the consumer
    /// thread calls route, so registration and lookup never race.
    trackers: FxHashMap<String, RunTracker>,
    /// descriptor uid -> run uid, for resolving events to their run
    streams: FxHashMap<String, String>,
}

impl RunDispatcher {
    pub fn new(
        config: Config,
        reader: Arc<dyn ChannelReader>,
        sinks: Arc<dyn GridSinkProvider>,
    ) -> Self {
        Self {
            config,
            reader,
            sinks,
            trackers: FxHashMap::default(),
            streams: FxHashMap::default(),
        }
    }

    /// Number of runs currently tracked
    pub fn active_runs(&self) -> usize {
        self.trackers.len()
    }

    pub fn tracker(&self, run_uid: &str) -> Option<&RunTracker> {
        self.trackers.get(run_uid)
    }

    /// Route one document to the tracker owning its run, if any
    pub fn route(&mut self, doc: &Document) {
        match doc {
            Document::Start(start) => self.handle_start(start),
            Document::Descriptor(desc) => self.handle_descriptor(desc),
            Document::Event(event) => {
                let Some(run_uid) = self.streams.get(&event.descriptor_uid).cloned() else {
                    log::debug!("event {} references an untracked stream, dropped", event.uid);
                    return;
                };
                let Some(tracker) = self.trackers.get_mut(&run_uid) else {
                    return;
                };
                if let Err(e) = tracker.event(event) {
                    log::error!("aborting run {run_uid}: {e}");
                    self.abort_run(&run_uid);
                }
            }
            Document::EventPage(page) => {
                let Some(run_uid) = self.streams.get(&page.descriptor_uid).cloned() else {
                    log::debug!(
                        "event page {} references an untracked stream, dropped",
                        page.uid
                    );
                    return;
                };
                let Some(tracker) = self.trackers.get_mut(&run_uid) else {
                    return;
                };
                if let Err(e) = tracker.event_page(page) {
                    log::error!("aborting run {run_uid}: {e}");
                    self.abort_run(&run_uid);
                }
            }
            Document::Stop(stop) => self.handle_stop(stop),
        }
    }

    /// Transport teardown: releases every live tracker
    pub fn shutdown(&mut self) {
        if !self.trackers.is_empty() {
            log::info!("shutting down with {} run(s) still live", self.trackers.len());
        }
        for (_, mut tracker) in self.trackers.drain() {
            tracker.abort();
        }
        self.streams.clear();
    }

    fn handle_start(&mut self, start: &StartDoc) {
        if self.trackers.contains_key(&start.uid) {
            log::warn!("run {} is already tracked, start dropped", start.uid);
            return;
        }
        if !self.config.plan_match.matches(start) {
            log::info!(
                "run {} (plan {}) is not a recognized scan, ignoring",
                start.uid,
                start.plan_name
            );
            return;
        }

        let mut tracker = RunTracker::new(
            &start.uid,
            &self.config,
            self.reader.clone(),
            self.sinks.clone(),
        );
        match tracker.start(start) {
            Ok(()) => {
                self.trackers.insert(start.uid.clone(), tracker);
            }
            Err(e) => {
                // Only this run's setup fails; the dispatcher carries on
                log::error!("could not set up a tracker for run {}: {e}", start.uid);
                tracker.abort();
            }
        }
    }

    fn handle_descriptor(&mut self, desc: &DescriptorDoc) {
        let Some(tracker) = self.trackers.get_mut(&desc.run_uid) else {
            log::debug!(
                "descriptor {} references untracked run {}, dropped",
                desc.uid,
                desc.run_uid
            );
            return;
        };
        self.streams.insert(desc.uid.clone(), desc.run_uid.clone());
        tracker.descriptor(desc);
    }

    fn handle_stop(&mut self, stop: &StopDoc) {
        // Forward before deregistering so teardown runs exactly once
        let Some(tracker) = self.trackers.get_mut(&stop.run_uid) else {
            log::debug!(
                "stop {} references untracked run {}, dropped",
                stop.uid,
                stop.run_uid
            );
            return;
        };
        tracker.stop(stop);
        self.forget_run(&stop.run_uid);
    }

    fn abort_run(&mut self, run_uid: &str) {
        if let Some(mut tracker) = self.trackers.remove(run_uid) {
            tracker.abort();
        }
        self.streams.retain(|_, run| run != run_uid);
    }

    fn forget_run(&mut self, run_uid: &str) {
        self.trackers.remove(run_uid);
        self.streams.retain(|_, run| run != run_uid);
    }
}
