use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use serde::Deserialize;

use crate::graph::data::{WorkListItem, WORK_ITEM_BYTES};
use crate::graph::workload::GraphWorkload;
use crate::sim::clock::{next_cycle, EventState, Tick, HALF_CYCLE};
use crate::sim::config::Config;
use crate::sim::mem::{MemCmd, MemPacket, MemPort};
use crate::tile::block::Block;
use crate::tile::mshr::MshrTable;
use crate::tile::queues::{MemFn, MemFnEntry, PostPushWbQueue, ResponseQueue};
use crate::tile::work::WorkTracker;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    pub cache_size: u64,
    pub line_bytes: u64,
    pub num_mshr_entry: usize,
    pub num_tgts_per_mshr: usize,
    pub max_resp_per_cycle: usize,
    pub post_push_wb_queue_size: usize,
}

impl Config for CoalesceConfig {}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            cache_size: 16384,
            line_bytes: 64,
            num_mshr_entry: 16,
            num_tgts_per_mshr: 8,
            max_resp_per_cycle: 4,
            post_push_wb_queue_size: 8,
        }
    }
}

impl CoalesceConfig {
    pub fn num_lines(&self) -> usize {
        (self.cache_size / self.line_bytes) as usize
    }

    pub fn elems_per_line(&self) -> usize {
        (self.line_bytes as usize) / WORK_ITEM_BYTES
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoalesceStats {
    pub vertex_reads: u64,
    pub vertex_writes: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub read_hit_under_misses: u64,
    pub mshr_entry_shortage: u64,
    pub mshr_target_shortage: u64,
    pub response_port_shortage: u64,
    pub memory_blocks: u64,
    pub vertices_pulled: u64,
    pub vertices_pushed: u64,
    pub pull_corrections: u64,
    pub invalid_applies: u64,
    pub invalid_write_backs: u64,
    pub invalid_reads: u64,
    pub pull_pending_read: u64,
    pub pull_in_cache: u64,
    pub pull_in_memory: u64,
    pub pull_garbage: u64,
}

impl CoalesceStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.read_hits + self.read_hit_under_misses;
        let total = hits + self.read_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Where the next pushable vertex was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkLocation {
    PendingRead { addr: u64, offset: usize },
    InCache { line: usize, offset: usize },
    InMemory { addr: u64, offset: usize },
    Garbage,
}

/// Callbacks out of the coalescer into the rest of the tile.
pub trait CoalesceSink {
    fn handle_incoming_wl(&mut self, addr: u64, item: WorkListItem);
    fn recv_vertex_push(&mut self, addr: u64, delta: u32, edge_index: u32, degree: u32);
    fn recv_prev_pull_correction(&mut self);
    fn running(&self) -> bool;
    fn start(&mut self);
    fn recv_done_signal(&mut self);
}

/// The coalescing cache: groups work-list accesses into line-granularity
/// memory traffic, tracks per-vertex sub-state within each line, sequences
/// fills, applies and writebacks through a single memory port, and schedules
/// pull work for the push engine.
pub struct CoalesceEngine {
    config: Arc<CoalesceConfig>,
    blocks: Vec<Block>,
    mshr: MshrTable,
    response_queue: ResponseQueue,
    apply_queue: VecDeque<usize>,
    mem_fn_queue: VecDeque<MemFnEntry>,
    post_push_wb: PostPushWbQueue,
    pending_pull_reads: HashMap<u64, u64>,
    work: WorkTracker,
    pulls_received: usize,
    on_the_fly_reqs: usize,
    max_potential_post_push_wb: usize,
    port: MemPort,
    next_memory_event: EventState,
    next_response_event: EventState,
    next_pre_wb_apply_event: EventState,
    stats: CoalesceStats,
}

impl CoalesceEngine {
    pub fn new(config: Arc<CoalesceConfig>, num_vertices: usize) -> Self {
        let num_lines = config.num_lines();
        let elems = config.elems_per_line();
        assert!(num_lines.is_power_of_two(), "line count must be a power of two");
        assert!(elems.is_power_of_two(), "slots per line must be a power of two");
        assert!(elems <= 64);
        // The bit vector covers whole lines; the apply pass walks every slot
        // of a line, padding included.
        let num_bits = (num_vertices + elems - 1) / elems * elems;
        Self {
            blocks: (0..num_lines).map(|_| Block::new(elems)).collect(),
            mshr: MshrTable::new(config.num_mshr_entry, config.num_tgts_per_mshr),
            response_queue: ResponseQueue::default(),
            apply_queue: Default::default(),
            mem_fn_queue: Default::default(),
            post_push_wb: PostPushWbQueue::new(config.post_push_wb_queue_size),
            pending_pull_reads: HashMap::new(),
            work: WorkTracker::new(num_bits),
            pulls_received: 0,
            on_the_fly_reqs: 0,
            max_potential_post_push_wb: 0,
            port: MemPort::default(),
            next_memory_event: EventState::default(),
            next_response_event: EventState::default(),
            next_pre_wb_apply_event: EventState::default(),
            stats: CoalesceStats::default(),
            config,
        }
    }

    pub fn stats(&self) -> &CoalesceStats {
        &self.stats
    }

    pub fn port_mut(&mut self) -> &mut MemPort {
        &mut self.port
    }

    pub fn port_ref_is_empty(&self) -> bool {
        self.port.is_empty()
    }

    /// Functional read: the cached copy of an item if the line is present
    /// and usable, bypassing all timing.
    pub fn peek_item(&self, addr: u64) -> Option<WorkListItem> {
        let aligned_addr = self.align(addr);
        let block_index = self.block_index(aligned_addr);
        let block = &self.blocks[block_index];
        (block.addr == aligned_addr && block.valid)
            .then(|| block.items[self.wl_offset(addr, aligned_addr)])
    }

    pub fn block(&self, index: usize) -> &Block {
        &self.blocks[index]
    }

    pub fn work_count(&self) -> usize {
        self.work.work_count()
    }

    /// Seed a vertex's needs-push bit at workload init time.
    pub fn mark_active(&mut self, bit_index: usize) {
        self.work.set(bit_index);
    }

    /// System quiescence from the cache's point of view.
    pub fn done(&self) -> bool {
        self.apply_queue.is_empty()
            && self.work.none()
            && self.mem_fn_queue.is_empty()
            && self.on_the_fly_reqs == 0
    }

    fn align(&self, addr: u64) -> u64 {
        addr - (addr % self.config.line_bytes)
    }

    fn block_index(&self, aligned_addr: u64) -> usize {
        assert_eq!(aligned_addr % self.config.line_bytes, 0);
        (aligned_addr / self.config.line_bytes) as usize % self.blocks.len()
    }

    fn wl_offset(&self, addr: u64, aligned_addr: u64) -> usize {
        ((addr - aligned_addr) as usize) / WORK_ITEM_BYTES
    }

    fn bit_index_base(&self, aligned_addr: u64) -> usize {
        assert_eq!(aligned_addr % self.config.line_bytes, 0);
        (aligned_addr as usize) / WORK_ITEM_BYTES
    }

    fn block_addr_from_bit_index(&self, index: usize) -> u64 {
        assert_eq!(index % self.config.elems_per_line(), 0);
        (index * WORK_ITEM_BYTES) as u64
    }

    fn schedule_memory_event(&mut self, now: Tick) {
        if !self.next_memory_event.scheduled() && !self.next_memory_event.asleep() {
            self.next_memory_event.schedule(next_cycle(now));
        }
    }

    fn schedule_response_event(&mut self, now: Tick) {
        if !self.next_response_event.scheduled() && !self.response_queue.is_empty() {
            self.next_response_event.schedule(next_cycle(now));
        }
    }

    fn schedule_apply_event(&mut self, now: Tick) {
        if !self.next_pre_wb_apply_event.scheduled() && !self.apply_queue.is_empty() {
            self.next_pre_wb_apply_event.schedule(next_cycle(now));
        }
    }

    fn push_mem_fn(&mut self, func: MemFn, now: Tick) {
        self.mem_fn_queue.push_back(MemFnEntry {
            func,
            scheduled_at: now,
        });
        self.schedule_memory_event(now);
    }

    /// Work-list engine read request.  Returns false when MSHR resources are
    /// exhausted; the caller retries.
    pub fn recv_wl_read(&mut self, now: Tick, addr: u64) -> bool {
        let aligned_addr = self.align(addr);
        let block_index = self.block_index(aligned_addr);
        let wl_offset = self.wl_offset(addr, aligned_addr);
        assert!(wl_offset < self.config.elems_per_line());

        let hit = self.blocks[block_index].addr == aligned_addr && self.blocks[block_index].valid;
        let hit_under_miss =
            self.blocks[block_index].addr == aligned_addr && self.blocks[block_index].pending_data;

        if hit {
            debug!("read {:#x}: hit in line {}", addr, block_index);
            self.stats.read_hits += 1;
            let block = &mut self.blocks[block_index];
            assert!(!block.pending_data);
            assert!(!(block.pending_apply && block.pending_wb));
            self.response_queue.push(addr, block.items[wl_offset], now);
            block.busy_mask |= 1 << wl_offset;
            // Any apply/writeback scheduled for this line is now stale.  The
            // half-cycle bump also invalidates schedules made earlier on this
            // same tick.
            block.pending_apply = false;
            block.pending_wb = false;
            block.last_changed_tick = now + HALF_CYCLE;
            self.schedule_response_event(now);
            self.stats.vertex_reads += 1;
            true
        } else if hit_under_miss {
            debug!("read {:#x}: hit under miss in line {}", addr, block_index);
            let block = &self.blocks[block_index];
            assert!(!block.valid);
            assert!(block.busy_mask == 0);
            assert!(!block.needs_wb && !block.needs_apply);
            assert!(!block.pending_apply && !block.pending_wb);
            assert!(self.mshr.has_entry(block_index));
            if self.mshr.targets_full(block_index) {
                self.stats.mshr_target_shortage += 1;
                return false;
            }
            self.stats.read_hit_under_misses += 1;
            self.mshr.push_target(block_index, addr);
            self.stats.vertex_reads += 1;
            true
        } else if !self.mshr.has_entry(block_index) {
            if self.mshr.full() {
                debug!("read {:#x}: out of MSHR entries", addr);
                self.stats.mshr_entry_shortage += 1;
                return false;
            }
            let occupied =
                self.blocks[block_index].valid || self.blocks[block_index].pending_data;
            if occupied {
                // Conflict miss.  An idle occupant starts its eviction right
                // away; a busy one is chased out once it quiesces.
                debug!(
                    "read {:#x}: conflict with {:#x} in line {}",
                    addr, self.blocks[block_index].addr, block_index
                );
                if self.blocks[block_index].is_idle() {
                    assert!(!self.blocks[block_index].needs_apply);
                    assert!(!self.blocks[block_index].pending_data);
                    if self.blocks[block_index].needs_wb {
                        self.blocks[block_index].pending_wb = true;
                        self.blocks[block_index].last_changed_tick = now;
                        self.push_mem_fn(MemFn::WriteBack(block_index), now);
                    } else {
                        self.blocks[block_index].retarget(aligned_addr, now);
                        self.push_mem_fn(MemFn::Fill(block_index), now);
                    }
                }
                self.mshr.push_target(block_index, addr);
                self.stats.read_misses += 1;
                self.stats.vertex_reads += 1;
                true
            } else {
                // Cold miss: claim the empty slot.
                debug!("read {:#x}: cold miss into line {}", addr, block_index);
                let block = &mut self.blocks[block_index];
                assert!(block.busy_mask == 0);
                assert!(!block.needs_wb && !block.needs_apply);
                assert!(!block.pending_apply && !block.pending_wb);
                block.retarget(aligned_addr, now);
                self.mshr.push_target(block_index, addr);
                self.push_mem_fn(MemFn::Fill(block_index), now);
                self.stats.read_misses += 1;
                self.stats.vertex_reads += 1;
                true
            }
        } else {
            // The line already has outstanding work for another address.
            if self.mshr.targets_full(block_index) {
                debug!("read {:#x}: out of targets for line {}", addr, block_index);
                self.stats.mshr_target_shortage += 1;
                return false;
            }
            self.mshr.push_target(block_index, addr);
            self.stats.read_misses += 1;
            self.stats.vertex_reads += 1;
            true
        }
    }

    /// Work-list engine write-back of a previously read item.  Infallible;
    /// the slot's busy bit must be set.
    pub fn recv_wl_write(
        &mut self,
        now: Tick,
        addr: u64,
        item: WorkListItem,
        workload: &GraphWorkload,
    ) {
        let aligned_addr = self.align(addr);
        let block_index = self.block_index(aligned_addr);
        let wl_offset = self.wl_offset(addr, aligned_addr);
        debug!(
            "write {:#x}: {} into line {}",
            addr,
            workload.print(&item),
            block_index
        );

        let block = &mut self.blocks[block_index];
        assert_eq!(block.addr, aligned_addr, "write misses are not allowed");
        assert!(block.valid);
        assert!(block.busy_mask != 0);
        assert!(!block.pending_data && !block.pending_apply && !block.pending_wb);
        assert!(block.busy_mask & (1 << wl_offset) != 0);

        if item.temp_prop != block.items[wl_offset].temp_prop {
            block.needs_wb = true;
            self.stats.vertex_writes += 1;
        }
        block.items[wl_offset] = item;
        if workload.apply_condition(&block.items[wl_offset]) {
            block.needs_apply = true;
            block.needs_wb = true;
        }
        block.busy_mask &= !(1 << wl_offset);
        block.last_changed_tick = now;

        if block.busy_mask != 0 {
            return;
        }
        // Line quiesced: apply first, then resolve any pending conflict.
        if block.needs_apply {
            block.pending_apply = true;
            block.last_changed_tick = now;
            self.apply_queue.push_back(block_index);
            self.schedule_apply_event(now);
        } else if self.mshr.has_entry(block_index) {
            if block.needs_wb {
                block.pending_wb = true;
                block.last_changed_tick = now;
                self.push_mem_fn(MemFn::WriteBack(block_index), now);
            } else {
                // Clean line: skip the writeback and refill directly for the
                // first waiting target.
                let miss_addr = self.mshr.front_target(block_index).unwrap();
                let aligned_miss_addr = self.align(miss_addr);
                self.blocks[block_index].retarget(aligned_miss_addr, now);
                self.push_mem_fn(MemFn::Fill(block_index), now);
            }
        }
    }

    /// Memory port response, either a cache fill or a pull read.
    pub fn handle_mem_resp(
        &mut self,
        now: Tick,
        pkt: MemPacket,
        workload: &GraphWorkload,
        sink: &mut dyn CoalesceSink,
    ) {
        assert!(pkt.is_response());
        if pkt.cmd == MemCmd::WriteResp {
            // Write responses are acknowledged and dropped.
            return;
        }

        self.on_the_fly_reqs -= 1;
        let addr = pkt.addr;
        let block_index = self.block_index(addr);
        let mut items = WorkListItem::slice_from_bytes(&pkt.data);
        let mut do_wb = false;

        if pkt.pull {
            assert!(
                !(self.blocks[block_index].addr == addr && self.blocks[block_index].valid),
                "pull reads are only issued for uncached lines"
            );
            debug!("pull read response for {:#x}", addr);
            let bit_base = self.bit_index_base(addr);
            let send_mask = self
                .pending_pull_reads
                .remove(&addr)
                .expect("pull response without a pending entry");
            for i in 0..self.config.elems_per_line() {
                if send_mask & (1 << i) == 0 {
                    continue;
                }
                assert!(self.work.is_set(bit_base + i));
                self.work.clear(bit_base + i);
                let vertex_addr = addr + (i * WORK_ITEM_BYTES) as u64;
                let (delta, do_push, do_wb_v) = workload.pre_push_apply(&mut items[i]);
                do_wb |= do_wb_v;
                if do_push {
                    sink.recv_vertex_push(vertex_addr, delta, items[i].edge_index, items[i].degree);
                } else {
                    self.stats.pull_corrections += 1;
                    sink.recv_prev_pull_correction();
                }
                self.stats.vertices_pushed += 1;
            }
            self.max_potential_post_push_wb -= 1;
        }

        let fills_line =
            self.blocks[block_index].addr == addr && self.blocks[block_index].pending_data;
        if !pkt.pull {
            assert!(fills_line, "unexpected fill response for {addr:#x}");
        }

        if fills_line {
            debug!("fill response for line {} at {:#x}", block_index, addr);
            let block = &mut self.blocks[block_index];
            assert!(!block.valid);
            assert!(block.busy_mask == 0);
            assert!(!block.needs_wb && !block.needs_apply);
            assert!(!block.pending_apply && !block.pending_wb);
            assert!(self.mshr.has_entry(block_index));
            block.items.copy_from_slice(&items);
            block.valid = true;
            block.needs_wb |= do_wb;
            block.pending_data = false;
            // Stamp just before now so a function legitimately re-scheduled
            // on this same tick is not cancelled.
            block.last_changed_tick = now - HALF_CYCLE;

            for miss_addr in self
                .mshr
                .drain_matching(block_index, addr, self.config.line_bytes)
            {
                let offset = self.wl_offset(miss_addr, addr);
                self.response_queue
                    .push(miss_addr, self.blocks[block_index].items[offset], now);
                self.blocks[block_index].busy_mask |= 1 << offset;
            }
            self.schedule_response_event(now);
        } else if do_wb {
            // The pulled line was mutated and is not cached: queue a
            // post-push writeback of the updated image.
            let wb_pkt = MemPacket::write_req(addr, WorkListItem::slice_to_bytes(&items));
            self.post_push_wb.push(wb_pkt, now);
            self.push_mem_fn(MemFn::PostPushWb, now);
        }
    }

    /// Push engine asks for one more vertex to push.
    pub fn recv_vertex_pull(&mut self, now: Tick) {
        let should_schedule = self.pulls_received == 0;
        self.pulls_received += 1;
        self.stats.vertices_pulled += 1;
        if should_schedule {
            self.push_mem_fn(MemFn::VertexPull, now);
        }
    }

    /// The memory port reports that blocking has cleared.
    pub fn recv_mem_retry(&mut self, now: Tick) {
        if !self.next_memory_event.asleep() {
            return;
        }
        assert!(!self.next_memory_event.scheduled());
        self.next_memory_event.wake();
        self.next_memory_event.schedule(next_cycle(now));
    }

    /// Run every event due at `now`.
    pub fn tick(&mut self, now: Tick, workload: &GraphWorkload, sink: &mut dyn CoalesceSink) {
        if self.next_memory_event.due(now) {
            self.next_memory_event.clear();
            self.process_next_memory_event(now, workload, sink);
        }
        if self.next_response_event.due(now) {
            self.next_response_event.clear();
            self.process_next_response_event(now, sink);
        }
        if self.next_pre_wb_apply_event.due(now) {
            self.next_pre_wb_apply_event.clear();
            self.process_next_pre_wb_apply_event(now, workload, sink);
        }
    }

    /// Consume one deferred memory function.  The single-issue port is the
    /// serialization point for all memory-side actions.
    fn process_next_memory_event(
        &mut self,
        now: Tick,
        workload: &GraphWorkload,
        sink: &mut dyn CoalesceSink,
    ) {
        if self.port.blocked() {
            self.stats.memory_blocks += 1;
            self.next_memory_event.sleep();
            return;
        }

        let entry = self
            .mem_fn_queue
            .pop_front()
            .expect("memory event fired with an empty function queue");
        match entry.func {
            MemFn::Fill(block_index) => self.process_next_read(now, block_index, entry.scheduled_at),
            MemFn::WriteBack(block_index) => {
                self.process_next_write_back(now, block_index, entry.scheduled_at)
            }
            MemFn::PostPushWb => self.process_next_post_push_wb(entry.scheduled_at),
            MemFn::VertexPull => self.process_next_vertex_pull(now, workload, sink),
        }

        assert!(!self.next_memory_event.scheduled());
        if !self.mem_fn_queue.is_empty() {
            self.next_memory_event.schedule(next_cycle(now));
        }
    }

    /// Issue the fill for a line claimed by a miss.
    fn process_next_read(&mut self, now: Tick, block_index: usize, scheduled_at: Tick) {
        if self.blocks[block_index].last_changed_tick != scheduled_at {
            self.stats.invalid_reads += 1;
            return;
        }
        let block = &self.blocks[block_index];
        assert!(!block.valid);
        assert!(block.busy_mask == 0);
        assert!(!block.needs_wb && !block.needs_apply);
        assert!(block.pending_data);
        assert!(!block.pending_apply && !block.pending_wb);
        let addr = block.addr;

        let mut need_send_pkt = true;
        // A pending post-push writeback for this address supersedes the
        // memory image: complete the fill from it instead of reading stale
        // data underneath it.
        if let Some(wb_pkt) = self.post_push_wb.take_matching(addr) {
            debug!("fill of line {} satisfied by pending post-push WB", block_index);
            let items = WorkListItem::slice_from_bytes(&wb_pkt.data);
            let block = &mut self.blocks[block_index];
            block.items.copy_from_slice(&items);
            block.valid = true;
            block.needs_wb = true;
            block.pending_data = false;
            block.last_changed_tick = now;
            for miss_addr in self
                .mshr
                .drain_matching(block_index, addr, self.config.line_bytes)
            {
                let offset = self.wl_offset(miss_addr, addr);
                self.response_queue
                    .push(miss_addr, self.blocks[block_index].items[offset], now);
                self.blocks[block_index].busy_mask |= 1 << offset;
                self.blocks[block_index].last_changed_tick = now;
            }
            self.schedule_response_event(now);
            need_send_pkt = false;
        }

        // A pull read already in flight for this address will double as the
        // fill when its response arrives.
        if self.pending_pull_reads.contains_key(&addr) {
            need_send_pkt = false;
        }

        if need_send_pkt {
            debug!("issuing fill read for line {} at {:#x}", block_index, addr);
            self.port
                .send(MemPacket::read_req(addr, self.config.line_bytes as usize));
            self.on_the_fly_reqs += 1;
        }
    }

    /// Write an evicted line back, then start the refill for the first
    /// waiting target.  The fill is only queued after the writeback has been
    /// dispatched, so the two cannot reorder.
    fn process_next_write_back(&mut self, now: Tick, block_index: usize, scheduled_at: Tick) {
        if self.blocks[block_index].last_changed_tick != scheduled_at {
            debug!(
                "line {} touched since writeback was scheduled; dropping",
                block_index
            );
            self.stats.invalid_write_backs += 1;
            return;
        }
        let block = &self.blocks[block_index];
        assert!(block.valid);
        assert!(block.busy_mask == 0);
        assert!(block.needs_wb && !block.needs_apply);
        assert!(!block.pending_data && !block.pending_apply);
        assert!(block.pending_wb);
        // A writeback is only ever scheduled to resolve a conflict.
        assert!(self.mshr.has_entry(block_index));

        debug!(
            "writing back line {} at {:#x}",
            block_index, self.blocks[block_index].addr
        );
        let data = WorkListItem::slice_to_bytes(&self.blocks[block_index].items);
        self.port
            .send(MemPacket::write_req(self.blocks[block_index].addr, data));

        let miss_addr = self.mshr.front_target(block_index).unwrap();
        let aligned_miss_addr = self.align(miss_addr);
        self.blocks[block_index].retarget(aligned_miss_addr, now);
        self.mem_fn_queue.push_back(MemFnEntry {
            func: MemFn::Fill(block_index),
            scheduled_at: now,
        });
    }

    fn process_next_post_push_wb(&mut self, scheduled_at: Tick) {
        if let Some(pkt) = self.post_push_wb.pop_if_scheduled(scheduled_at) {
            debug!("issuing post-push writeback for {:#x}", pkt.addr);
            self.port.send(pkt);
        }
    }

    /// Walk the active list once, looking for a pushable vertex.
    fn get_optimal_pull_addr(&mut self) -> WorkLocation {
        let mut visited_bits = 0;
        let num_initial_active_bits = self.work.active_len();
        while visited_bits < num_initial_active_bits {
            let Some(index) = self.work.active_head() else {
                break;
            };
            let elems = self.config.elems_per_line();
            let base_index = index - (index % elems);
            let index_offset = index - base_index;
            let addr = self.block_addr_from_bit_index(base_index);
            let block_index = self.block_index(addr);

            if let Some(&send_mask) = self.pending_pull_reads.get(&addr) {
                assert!(send_mask & (1 << index_offset) == 0);
                self.work.pop_head();
                return WorkLocation::PendingRead {
                    addr,
                    offset: index_offset,
                };
            }
            let resident =
                self.blocks[block_index].addr == addr && !self.blocks[block_index].is_empty();
            if resident && self.blocks[block_index].is_idle() {
                assert!(!self.blocks[block_index].needs_apply);
                assert!(!self.blocks[block_index].pending_data);
                self.work.pop_head();
                return WorkLocation::InCache {
                    line: block_index,
                    offset: index_offset,
                };
            }
            if !resident {
                // Pull reads dirty lines behind the cache's back; take the
                // memory path only while the writeback budget holds out.
                if self.post_push_wb.len() + self.max_potential_post_push_wb
                    < self.post_push_wb.capacity()
                {
                    self.work.pop_head();
                    return WorkLocation::InMemory {
                        addr,
                        offset: index_offset,
                    };
                }
            }
            // Cached but transiently untouchable; try again later.
            self.work.rotate_head();
            visited_bits += 1;
        }
        WorkLocation::Garbage
    }

    fn process_next_vertex_pull(
        &mut self,
        now: Tick,
        workload: &GraphWorkload,
        sink: &mut dyn CoalesceSink,
    ) {
        let location = self.get_optimal_pull_addr();
        match location {
            WorkLocation::PendingRead { addr, offset } => {
                self.stats.pull_pending_read += 1;
                let send_mask = self.pending_pull_reads.get_mut(&addr).unwrap();
                assert!(*send_mask & (1 << offset) == 0);
                *send_mask |= 1 << offset;
                self.pulls_received -= 1;
            }
            WorkLocation::InCache { line, offset } => {
                self.stats.pull_in_cache += 1;
                let addr = self.blocks[line].addr;
                let vertex_addr = addr + (offset * WORK_ITEM_BYTES) as u64;
                let bit_base = self.bit_index_base(addr);
                assert!(self.work.clear(bit_base + offset));
                let (delta, do_push, do_wb) =
                    workload.pre_push_apply(&mut self.blocks[line].items[offset]);
                self.blocks[line].needs_wb |= do_wb;
                if do_push {
                    sink.recv_vertex_push(
                        vertex_addr,
                        delta,
                        self.blocks[line].items[offset].edge_index,
                        self.blocks[line].items[offset].degree,
                    );
                } else {
                    self.stats.pull_corrections += 1;
                    sink.recv_prev_pull_correction();
                }
                self.stats.vertices_pushed += 1;
                self.pulls_received -= 1;
            }
            WorkLocation::InMemory { addr, offset } => {
                self.stats.pull_in_memory += 1;
                assert!(!self.pending_pull_reads.contains_key(&addr));
                debug!("issuing pull read for {:#x}", addr);
                self.port
                    .send(MemPacket::pull_read_req(addr, self.config.line_bytes as usize));
                self.on_the_fly_reqs += 1;
                self.max_potential_post_push_wb += 1;
                self.pending_pull_reads.insert(addr, 1 << offset);
                self.pulls_received -= 1;
            }
            WorkLocation::Garbage => {
                self.stats.pull_garbage += 1;
            }
        }

        if self.pulls_received > 0 {
            self.mem_fn_queue.push_back(MemFnEntry {
                func: MemFn::VertexPull,
                scheduled_at: now,
            });
        }
    }

    /// Deliver queued responses to the work-list engine, oldest first, at
    /// most `max_resp_per_cycle` per tick and never on the tick they were
    /// queued.
    fn process_next_response_event(&mut self, now: Tick, sink: &mut dyn CoalesceSink) {
        let mut num_responses_sent = 0;
        while self.response_queue.front_ready(now) {
            let (addr, item) = self.response_queue.pop().unwrap();
            sink.handle_incoming_wl(addr, item);
            num_responses_sent += 1;
            if num_responses_sent >= self.config.max_resp_per_cycle {
                if !self.response_queue.is_empty() {
                    self.stats.response_port_shortage += 1;
                }
                break;
            }
        }
        self.schedule_response_event(now);
    }

    /// Apply pass over a quiescent line, activating any vertices that now
    /// have outbound work.
    fn process_next_pre_wb_apply_event(
        &mut self,
        now: Tick,
        workload: &GraphWorkload,
        sink: &mut dyn CoalesceSink,
    ) {
        let block_index = self
            .apply_queue
            .pop_front()
            .expect("apply event fired with an empty queue");
        let block = &self.blocks[block_index];
        assert!(block.valid);
        assert!(block.needs_apply);
        assert!(!block.pending_data && !block.pending_wb);

        if self.blocks[block_index].pending_apply {
            assert!(self.blocks[block_index].busy_mask == 0);
            let bit_base = self.bit_index_base(self.blocks[block_index].addr);
            let mut became_active = false;
            for index in 0..self.config.elems_per_line() {
                let do_push = workload.pre_wb_apply(&mut self.blocks[block_index].items[index]);
                if do_push && self.work.set(bit_base + index) {
                    became_active = true;
                }
            }
            if became_active && !sink.running() {
                sink.start();
            }

            let block = &mut self.blocks[block_index];
            assert!(block.needs_wb);
            block.needs_apply = false;
            block.pending_apply = false;
            block.last_changed_tick = now;
            debug!("applied line {}", block_index);

            if self.mshr.has_entry(block_index) {
                block.pending_wb = true;
                block.last_changed_tick = now;
                self.push_mem_fn(MemFn::WriteBack(block_index), now);
            }
        } else {
            // The apply was cancelled by an intervening read.
            self.stats.invalid_applies += 1;
        }

        self.schedule_apply_event(now);

        if self.done() {
            sink.recv_done_signal();
        }
    }

    /// Structural invariants that must hold at every tick boundary.
    pub fn check_invariants(&self) {
        for (i, block) in self.blocks.iter().enumerate() {
            assert!(
                !(block.valid && block.pending_data),
                "line {i}: valid and pending_data are exclusive"
            );
            assert!(
                !(block.pending_apply && block.pending_wb),
                "line {i}: pending_apply and pending_wb are exclusive"
            );
            if block.busy_mask != 0 {
                assert!(
                    block.valid && !block.pending_apply && !block.pending_wb,
                    "line {i}: busy lines must be valid with no pending transitions"
                );
            }
            if block.needs_apply {
                assert!(block.valid, "line {i}: needs_apply requires valid");
            }
            if block.pending_data {
                assert!(
                    block.busy_mask == 0 && !block.needs_wb && !block.needs_apply,
                    "line {i}: pending_data lines carry no dirty or busy state"
                );
            }
            // A line with a conflicting waiter never sits idle.
            if let Some(front) = self.mshr.front_target(i) {
                if self.align(front) != block.addr {
                    assert!(
                        block.pending_data
                            || block.pending_wb
                            || block.pending_apply
                            || block.busy_mask != 0,
                        "line {i}: conflicting target against an idle line"
                    );
                }
            }
        }
    }
}
