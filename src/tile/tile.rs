use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::graph::builder::{load_graph, GraphLayout};
use crate::graph::data::{WorkListItem, WORK_ITEM_BYTES};
use crate::graph::workload::GraphWorkload;
use crate::sim::clock::{Tick, TICKS_PER_CYCLE};
use crate::sim::config::MemConfig;
use crate::sim::mem::MemCtrl;
use crate::tile::coalesce::{CoalesceConfig, CoalesceEngine, CoalesceSink};
use crate::tile::push::{PushConfig, PushEngine};
use crate::tile::wle::{WlConfig, WorkListEngine};

/// Routes coalescer callbacks to the work-list and push engines.
struct EngineSink<'a> {
    wle: &'a mut WorkListEngine,
    pe: &'a mut PushEngine,
}

impl CoalesceSink for EngineSink<'_> {
    fn handle_incoming_wl(&mut self, addr: u64, item: WorkListItem) {
        self.wle.recv_wl_response(addr, item);
    }

    fn recv_vertex_push(&mut self, addr: u64, delta: u32, edge_index: u32, degree: u32) {
        self.pe.recv_vertex_push(addr, delta, edge_index, degree);
    }

    fn recv_prev_pull_correction(&mut self) {
        self.pe.recv_prev_pull_correction();
    }

    fn running(&self) -> bool {
        self.pe.running()
    }

    fn start(&mut self) {
        self.pe.start();
    }

    fn recv_done_signal(&mut self) {
        self.pe.stop();
    }
}

/// One accelerator tile: work-list engine, coalescing cache, push engine and
/// an external memory port, advanced one cycle per `tick_one`.
pub struct Tile {
    now: Tick,
    pub engine: CoalesceEngine,
    pub wle: WorkListEngine,
    pub pe: PushEngine,
    pub mem: MemCtrl,
    pub workload: GraphWorkload,
    pub layout: GraphLayout,
}

impl Tile {
    pub fn new(
        cache_config: Arc<CoalesceConfig>,
        wl_config: Arc<WlConfig>,
        push_config: Arc<PushConfig>,
        mem_config: MemConfig,
        workload: GraphWorkload,
        num_vertices: usize,
        edges: &[(usize, usize, u64)],
    ) -> Result<Self> {
        let mut mem = MemCtrl::new(mem_config);
        let layout = load_graph(mem.store_mut(), num_vertices, edges)?;
        let engine = CoalesceEngine::new(cache_config, num_vertices);
        let wle = WorkListEngine::new(wl_config);
        let pe = PushEngine::new(push_config, layout.edge_base);
        let mut tile = Self {
            now: 0,
            engine,
            wle,
            pe,
            mem,
            workload,
            layout,
        };
        tile.seed_workload()?;
        Ok(tile)
    }

    /// Apply the workload's initial per-vertex state and mark the vertices
    /// that start with outbound work.
    fn seed_workload(&mut self) -> Result<()> {
        for v in 0..self.layout.num_vertices {
            let addr = self.layout.vertex_addr(v);
            let mut item =
                WorkListItem::from_bytes(self.mem.store().read(addr, WORK_ITEM_BYTES)?);
            let active = self.workload.init_item(addr, &mut item);
            self.mem.store_mut().write(addr, &item.to_bytes())?;
            if active {
                self.engine.mark_active(v);
            }
        }
        if self.engine.work_count() > 0 {
            self.pe.start();
        }
        info!(
            "seeded workload {}: {} vertices start active",
            self.workload.name(),
            self.engine.work_count()
        );
        Ok(())
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn tick_one(&mut self) {
        self.now += TICKS_PER_CYCLE;
        let now = self.now;

        // Memory responses land first.
        for pkt in self.mem.tick(now) {
            let mut sink = EngineSink {
                wle: &mut self.wle,
                pe: &mut self.pe,
            };
            self.engine.handle_mem_resp(now, pkt, &self.workload, &mut sink);
        }

        // Engine events (memory function, responses, apply).
        {
            let mut sink = EngineSink {
                wle: &mut self.wle,
                pe: &mut self.pe,
            };
            self.engine.tick(now, &self.workload, &mut sink);
        }

        // Work-list engine issues reads and returns mutations.
        self.wle.tick(now, &mut self.engine, &self.workload);

        // Push engine requests pulls and expands edges.
        self.pe.tick(
            now,
            &mut self.engine,
            &self.workload,
            &mut self.wle,
            self.mem.store(),
        );

        // Drain the engine's port into the memory controller.
        if self.engine.port_mut().flush_into(&mut self.mem, now) {
            self.engine.recv_mem_retry(now);
        }
    }

    pub fn done(&self) -> bool {
        self.engine.done()
            && self.wle.done()
            && self.pe.done()
            && self.mem.outstanding() == 0
            && self.engine.port_ref_is_empty()
    }

    /// Run until quiescent or the cycle budget runs out.  Returns the number
    /// of cycles simulated.
    pub fn run(&mut self, max_cycles: u64) -> u64 {
        let mut cycles = 0;
        while cycles < max_cycles {
            self.tick_one();
            cycles += 1;
            if self.done() {
                break;
            }
        }
        if self.pe.running() {
            self.pe.stop();
        }
        cycles
    }

    /// Authoritative view of one vertex: the cache wins over memory.
    pub fn read_vertex(&self, v: usize) -> WorkListItem {
        let addr = self.layout.vertex_addr(v);
        if let Some(item) = self.engine.peek_item(addr) {
            return item;
        }
        WorkListItem::from_bytes(
            self.mem
                .store()
                .read(addr, WORK_ITEM_BYTES)
                .expect("vertex read out of range"),
        )
    }
}
