use std::fmt;

use crate::graph::data::WorkListItem;
use crate::sim::clock::Tick;

/// One direct-mapped line descriptor.
///
/// `valid` means the items may answer reads/writes; `pending_data` marks the
/// transient between taking a miss and receiving its fill, so the two are
/// mutually exclusive.  `busy_mask` has one bit per slot handed to the
/// work-list engine and not yet written back.  `last_changed_tick` stamps the
/// most recent mutation; deferred memory functions compare their scheduling
/// tick against it and discard themselves on mismatch.
#[derive(Debug, Clone)]
pub struct Block {
    pub addr: u64,
    pub items: Vec<WorkListItem>,
    pub busy_mask: u64,
    pub valid: bool,
    pub needs_wb: bool,
    pub needs_apply: bool,
    pub pending_data: bool,
    pub pending_apply: bool,
    pub pending_wb: bool,
    pub last_changed_tick: Tick,
}

impl Block {
    pub fn new(num_elements: usize) -> Self {
        assert!(num_elements <= 64, "busy mask is 64 bits wide");
        Self {
            addr: 0,
            items: vec![WorkListItem::default(); num_elements],
            busy_mask: 0,
            valid: false,
            needs_wb: false,
            needs_apply: false,
            pending_data: false,
            pending_apply: false,
            pending_wb: false,
            last_changed_tick: 0,
        }
    }

    /// Idle: present and touchable by a conflicting miss.
    pub fn is_idle(&self) -> bool {
        self.valid && self.busy_mask == 0 && !self.pending_apply && !self.pending_wb
    }

    /// Empty: never allocated, or fully released.
    pub fn is_empty(&self) -> bool {
        !self.valid && !self.pending_data && self.busy_mask == 0
    }

    /// Claim the slot for a new aligned address and start waiting for data.
    pub fn retarget(&mut self, aligned_addr: u64, now: Tick) {
        self.addr = aligned_addr;
        self.valid = false;
        self.busy_mask = 0;
        self.needs_wb = false;
        self.needs_apply = false;
        self.pending_data = true;
        self.pending_apply = false;
        self.pending_wb = false;
        self.last_changed_tick = now;
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block{{addr: {:#x}, busy_mask: {:#b}, valid: {}, needs_wb: {}, \
             needs_apply: {}, pending_data: {}, pending_apply: {}, pending_wb: {}, \
             last_changed_tick: {}}}",
            self.addr,
            self.busy_mask,
            self.valid,
            self.needs_wb,
            self.needs_apply,
            self.pending_data,
            self.pending_apply,
            self.pending_wb,
            self.last_changed_tick
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_block_is_empty_not_idle() {
        let b = Block::new(4);
        assert!(b.is_empty());
        assert!(!b.is_idle());
    }

    #[test]
    fn retarget_enters_pending_data() {
        let mut b = Block::new(4);
        b.valid = true;
        b.needs_wb = true;
        b.retarget(0x40, 6);
        assert!(b.pending_data);
        assert!(!b.valid);
        assert!(!b.needs_wb);
        assert_eq!(b.addr, 0x40);
        assert_eq!(b.last_changed_tick, 6);
        assert!(!b.is_empty());
    }

    #[test]
    fn idle_requires_quiescence() {
        let mut b = Block::new(4);
        b.valid = true;
        assert!(b.is_idle());
        b.busy_mask = 0b10;
        assert!(!b.is_idle());
        b.busy_mask = 0;
        b.pending_wb = true;
        assert!(!b.is_idle());
    }
}
