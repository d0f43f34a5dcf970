use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;

use crate::graph::data::{Edge, EDGE_BYTES};
use crate::graph::workload::GraphWorkload;
use crate::sim::clock::Tick;
use crate::sim::config::Config;
use crate::sim::mem::FlatMem;
use crate::tile::coalesce::CoalesceEngine;
use crate::tile::wle::WorkListEngine;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub queue_size: usize,
    pub edges_per_cycle: usize,
}

impl Config for PushConfig {}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            queue_size: 8,
            edges_per_cycle: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PushStats {
    pub pulls_requested: u64,
    pub pushes_received: u64,
    pub corrections: u64,
    pub edges_walked: u64,
    pub updates_sent: u64,
}

#[derive(Debug, Clone, Copy)]
struct PushWork {
    delta: u32,
    next_edge: u32,
    end_edge: u32,
}

/// The push engine: turns pulled vertices into per-edge updates.  It keeps
/// pull credits against its bounded work queue and walks one vertex's edge
/// range at a time, a few edges per cycle.
pub struct PushEngine {
    config: Arc<PushConfig>,
    edge_base: u64,
    running: bool,
    queue: VecDeque<PushWork>,
    current: Option<PushWork>,
    pending_pulls: usize,
    stats: PushStats,
}

impl PushEngine {
    pub fn new(config: Arc<PushConfig>, edge_base: u64) -> Self {
        Self {
            config,
            edge_base,
            running: false,
            queue: VecDeque::new(),
            current: None,
            pending_pulls: 0,
            stats: PushStats::default(),
        }
    }

    pub fn stats(&self) -> &PushStats {
        &self.stats
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        debug!("push engine started");
        self.running = true;
    }

    pub fn stop(&mut self) {
        debug!("push engine stopped");
        self.running = false;
    }

    pub fn done(&self) -> bool {
        self.queue.is_empty() && self.current.is_none() && self.pending_pulls == 0
    }

    pub fn recv_vertex_push(&mut self, addr: u64, delta: u32, edge_index: u32, degree: u32) {
        assert!(self.pending_pulls > 0);
        self.pending_pulls -= 1;
        self.stats.pushes_received += 1;
        debug!(
            "push of vertex {:#x}: delta {}, edges [{}, {})",
            addr,
            delta,
            edge_index,
            edge_index + degree
        );
        self.queue.push_back(PushWork {
            delta,
            next_edge: edge_index,
            end_edge: edge_index + degree,
        });
    }

    /// The pull we issued earlier found nothing left to push.
    pub fn recv_prev_pull_correction(&mut self) {
        assert!(self.pending_pulls > 0);
        self.pending_pulls -= 1;
        self.stats.corrections += 1;
    }

    pub fn tick(
        &mut self,
        now: Tick,
        engine: &mut CoalesceEngine,
        workload: &GraphWorkload,
        wle: &mut WorkListEngine,
        mem: &FlatMem,
    ) {
        // Ask for more work, one pull credit per free queue slot, but never
        // more pulls than the cache has active vertices.
        while self.running
            && self.queue.len() + self.pending_pulls < self.config.queue_size
            && self.pending_pulls < engine.work_count()
        {
            engine.recv_vertex_pull(now);
            self.pending_pulls += 1;
            self.stats.pulls_requested += 1;
        }

        // Expand edges of the vertex in hand.
        let mut budget = self.config.edges_per_cycle;
        while budget > 0 {
            if self.current.is_none() {
                self.current = self.queue.pop_front();
            }
            let Some(work) = self.current.as_mut() else {
                break;
            };
            if work.next_edge >= work.end_edge {
                self.current = None;
                continue;
            }
            let edge_addr = self.edge_base + work.next_edge as u64 * EDGE_BYTES as u64;
            let edge = Edge::from_bytes(mem.read(edge_addr, EDGE_BYTES).expect("edge read"));
            let update = workload.propagate(work.delta, edge.weight);
            if !wle.recv_update(edge.neighbor, update, workload) {
                // Work-list backpressure; resume mid-range next cycle.
                break;
            }
            work.next_edge += 1;
            budget -= 1;
            self.stats.edges_walked += 1;
            self.stats.updates_sent += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_queues_edge_range() {
        let mut pe = PushEngine::new(Arc::new(PushConfig::default()), 0x1000);
        pe.start();
        pe.pending_pulls = 1;
        pe.recv_vertex_push(0x40, 2, 10, 3);
        assert_eq!(pe.queue.len(), 1);
        assert_eq!(pe.pending_pulls, 0);
        assert!(!pe.done());
    }

    #[test]
    fn correction_refunds_credit() {
        let mut pe = PushEngine::new(Arc::new(PushConfig::default()), 0x1000);
        pe.pending_pulls = 2;
        pe.recv_prev_pull_correction();
        assert_eq!(pe.pending_pulls, 1);
        assert_eq!(pe.stats().corrections, 1);
    }
}
