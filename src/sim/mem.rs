use std::collections::VecDeque;

use anyhow::{bail, Result};
use log::debug;

use crate::sim::clock::{Tick, TICKS_PER_CYCLE};
use crate::sim::config::MemConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemCmd {
    ReadReq,
    WriteReq,
    ReadResp,
    WriteResp,
}

/// One line-sized transaction on the external memory port.  Pull reads carry
/// a tag so the coalescer can tell them apart from cache fills on response.
#[derive(Debug, Clone)]
pub struct MemPacket {
    pub cmd: MemCmd,
    pub addr: u64,
    pub data: Vec<u8>,
    pub pull: bool,
}

impl MemPacket {
    pub fn read_req(addr: u64, size: usize) -> Self {
        Self {
            cmd: MemCmd::ReadReq,
            addr,
            data: vec![0; size],
            pull: false,
        }
    }

    pub fn pull_read_req(addr: u64, size: usize) -> Self {
        Self {
            cmd: MemCmd::ReadReq,
            addr,
            data: vec![0; size],
            pull: true,
        }
    }

    pub fn write_req(addr: u64, data: Vec<u8>) -> Self {
        Self {
            cmd: MemCmd::WriteReq,
            addr,
            data,
            pull: false,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self.cmd, MemCmd::ReadReq | MemCmd::ReadResp)
    }

    pub fn is_response(&self) -> bool {
        matches!(self.cmd, MemCmd::ReadResp | MemCmd::WriteResp)
    }

    fn into_response(mut self, data: Vec<u8>) -> Self {
        self.cmd = match self.cmd {
            MemCmd::ReadReq => MemCmd::ReadResp,
            MemCmd::WriteReq => MemCmd::WriteResp,
            _ => panic!("response for a response packet"),
        };
        self.data = data;
        self
    }
}

/// Request-side outbox of the coalescer's memory port.  Packets queue here in
/// issue order; the tile drains them into the controller each cycle.  A drain
/// that cannot complete marks the port blocked, and the drain that empties it
/// again reports that a retry should be delivered.
#[derive(Debug, Default)]
pub struct MemPort {
    outbox: VecDeque<MemPacket>,
    blocked: bool,
}

impl MemPort {
    pub fn send(&mut self, pkt: MemPacket) {
        self.outbox.push_back(pkt);
    }

    pub fn blocked(&self) -> bool {
        self.blocked
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.is_empty()
    }

    /// Push as much of the outbox as the controller will take.  Returns true
    /// when a previously blocked port fully drained (the retry signal).
    pub fn flush_into(&mut self, ctrl: &mut MemCtrl, now: Tick) -> bool {
        let was_blocked = self.blocked;
        while let Some(front) = self.outbox.front() {
            if !ctrl.can_accept() {
                if !self.blocked {
                    debug!("mem port blocked at tick {} (addr {:#x})", now, front.addr);
                }
                self.blocked = true;
                return false;
            }
            let pkt = self.outbox.pop_front().unwrap();
            ctrl.accept(now, pkt);
        }
        if was_blocked {
            self.blocked = false;
            return true;
        }
        false
    }
}

/// Flat byte-addressed backing store for the simulated memory space.
#[derive(Debug, Clone)]
pub struct FlatMem {
    bytes: Vec<u8>,
}

impl FlatMem {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn read(&self, addr: u64, n: usize) -> Result<&[u8]> {
        let addr = addr as usize;
        if addr + n > self.bytes.len() {
            bail!("read of {} bytes at {:#x} past end of memory", n, addr);
        }
        Ok(&self.bytes[addr..addr + n])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        let addr = addr as usize;
        if addr + data.len() > self.bytes.len() {
            bail!(
                "write of {} bytes at {:#x} past end of memory",
                data.len(),
                addr
            );
        }
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Fixed-latency FIFO memory controller with a bounded outstanding-request
/// window.  Requests are serviced against the backing store at accept time;
/// the response is released `latency_cycles` later, in accept order.
pub struct MemCtrl {
    config: MemConfig,
    store: FlatMem,
    inflight: VecDeque<(Tick, MemPacket)>,
    trace: Vec<(Tick, MemCmd, u64)>,
}

impl MemCtrl {
    pub fn new(config: MemConfig) -> Self {
        Self {
            store: FlatMem::new(config.size_bytes),
            config,
            inflight: VecDeque::new(),
            trace: Vec::new(),
        }
    }

    /// Accepted requests in arrival order, for inspection and debugging.
    pub fn trace(&self) -> &[(Tick, MemCmd, u64)] {
        &self.trace
    }

    pub fn can_accept(&self) -> bool {
        self.inflight.len() < self.config.depth
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn depth(&self) -> usize {
        self.config.depth
    }

    pub fn store(&self) -> &FlatMem {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FlatMem {
        &mut self.store
    }

    pub fn accept(&mut self, now: Tick, pkt: MemPacket) {
        assert!(self.can_accept(), "memory controller over depth");
        self.trace.push((now, pkt.cmd, pkt.addr));
        let data = match pkt.cmd {
            MemCmd::ReadReq => self
                .store
                .read(pkt.addr, pkt.data.len())
                .expect("simulated read out of range")
                .to_vec(),
            MemCmd::WriteReq => {
                self.store
                    .write(pkt.addr, &pkt.data)
                    .expect("simulated write out of range");
                Vec::new()
            }
            _ => panic!("controller received a response packet"),
        };
        let ready = now + self.config.latency_cycles * TICKS_PER_CYCLE;
        self.inflight.push_back((ready, pkt.into_response(data)));
    }

    /// Release every response whose latency has elapsed, in FIFO order.
    pub fn tick(&mut self, now: Tick) -> Vec<MemPacket> {
        let mut out = Vec::new();
        while let Some((ready, _)) = self.inflight.front() {
            if *ready > now {
                break;
            }
            out.push(self.inflight.pop_front().unwrap().1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl(depth: usize, latency: u64) -> MemCtrl {
        MemCtrl::new(MemConfig {
            size_bytes: 4096,
            latency_cycles: latency,
            depth,
        })
    }

    #[test]
    fn read_returns_written_bytes_after_latency() {
        let mut mem = ctrl(4, 3);
        mem.store_mut().write(64, &[1, 2, 3, 4]).unwrap();
        mem.accept(0, MemPacket::read_req(64, 4));
        assert!(mem.tick(4).is_empty());
        let resps = mem.tick(6);
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].cmd, MemCmd::ReadResp);
        assert_eq!(resps[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn depth_bounds_outstanding_requests() {
        let mut mem = ctrl(2, 10);
        assert!(mem.can_accept());
        mem.accept(0, MemPacket::read_req(0, 4));
        mem.accept(0, MemPacket::read_req(4, 4));
        assert!(!mem.can_accept());
        mem.tick(20);
        assert!(mem.can_accept());
    }

    #[test]
    fn port_blocks_and_retries() {
        let mut mem = ctrl(1, 5);
        let mut port = MemPort::default();
        port.send(MemPacket::read_req(0, 4));
        port.send(MemPacket::read_req(4, 4));
        assert!(!port.flush_into(&mut mem, 0));
        assert!(port.blocked());
        // Nothing drains until the first response frees the window.
        assert!(!port.flush_into(&mut mem, 2));
        mem.tick(10);
        assert!(port.flush_into(&mut mem, 12));
        assert!(!port.blocked());
        assert!(port.is_empty());
    }

    #[test]
    fn responses_keep_fifo_order() {
        let mut mem = ctrl(4, 2);
        mem.accept(0, MemPacket::read_req(0, 4));
        mem.accept(0, MemPacket::write_req(8, vec![9; 4]));
        let resps = mem.tick(4);
        assert_eq!(resps.len(), 2);
        assert_eq!(resps[0].cmd, MemCmd::ReadResp);
        assert_eq!(resps[1].cmd, MemCmd::WriteResp);
    }

    #[test]
    fn pull_tag_round_trips() {
        let mut mem = ctrl(1, 1);
        mem.accept(0, MemPacket::pull_read_req(32, 4));
        let resps = mem.tick(2);
        assert!(resps[0].pull);
    }
}
