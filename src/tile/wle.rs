use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use serde::Deserialize;

use crate::graph::data::WorkListItem;
use crate::graph::workload::GraphWorkload;
use crate::sim::clock::Tick;
use crate::sim::config::Config;
use crate::tile::coalesce::CoalesceEngine;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WlConfig {
    pub update_queue_size: usize,
    pub reads_per_cycle: usize,
}

impl Config for WlConfig {}

impl Default for WlConfig {
    fn default() -> Self {
        Self {
            update_queue_size: 64,
            reads_per_cycle: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WlStats {
    pub updates_received: u64,
    pub updates_coalesced: u64,
    pub update_rejects: u64,
    pub reads_issued: u64,
    pub read_rejects: u64,
    pub reduces_done: u64,
}

/// The work-list engine: front door for vertex updates.  Updates for the
/// same address coalesce in the queue (and into reads already in flight), so
/// at most one read per address is ever outstanding against the cache.
pub struct WorkListEngine {
    config: Arc<WlConfig>,
    updates: VecDeque<(u64, u32)>,
    inflight: HashMap<u64, u32>,
    responses: VecDeque<(u64, WorkListItem)>,
    stats: WlStats,
}

impl WorkListEngine {
    pub fn new(config: Arc<WlConfig>) -> Self {
        Self {
            config,
            updates: VecDeque::new(),
            inflight: HashMap::new(),
            responses: VecDeque::new(),
            stats: WlStats::default(),
        }
    }

    pub fn stats(&self) -> &WlStats {
        &self.stats
    }

    pub fn done(&self) -> bool {
        self.updates.is_empty() && self.inflight.is_empty() && self.responses.is_empty()
    }

    /// Accept one update from the push engine.  Returns false on
    /// backpressure; the caller retries.
    pub fn recv_update(&mut self, addr: u64, value: u32, workload: &GraphWorkload) -> bool {
        self.stats.updates_received += 1;
        if let Some(pending) = self.inflight.get_mut(&addr) {
            *pending = workload.reduce(value, *pending);
            self.stats.updates_coalesced += 1;
            return true;
        }
        if let Some(entry) = self.updates.iter_mut().find(|(a, _)| *a == addr) {
            entry.1 = workload.reduce(value, entry.1);
            self.stats.updates_coalesced += 1;
            return true;
        }
        if self.updates.len() >= self.config.update_queue_size {
            self.stats.update_rejects += 1;
            return false;
        }
        self.updates.push_back((addr, value));
        true
    }

    /// Cache response for an address we asked about.
    pub fn recv_wl_response(&mut self, addr: u64, item: WorkListItem) {
        self.responses.push_back((addr, item));
    }

    pub fn tick(&mut self, now: Tick, engine: &mut CoalesceEngine, workload: &GraphWorkload) {
        // Returned items first: reduce the pending update in and hand the
        // mutation back to the cache.
        while let Some((addr, mut item)) = self.responses.pop_front() {
            let update = self
                .inflight
                .remove(&addr)
                .expect("response for an address with no read in flight");
            item.temp_prop = workload.reduce(update, item.temp_prop);
            debug!("reduced {:#x} -> {}", addr, workload.print(&item));
            engine.recv_wl_write(now, addr, item, workload);
            self.stats.reduces_done += 1;
        }

        // Then issue reads for the head of the update queue.  A rejected
        // head stays put; order is preserved.
        for _ in 0..self.config.reads_per_cycle {
            let Some(&(addr, value)) = self.updates.front() else {
                break;
            };
            if engine.recv_wl_read(now, addr) {
                self.updates.pop_front();
                self.inflight.insert(addr, value);
                self.stats.reads_issued += 1;
            } else {
                self.stats.read_rejects += 1;
                break;
            }
        }
    }
}
