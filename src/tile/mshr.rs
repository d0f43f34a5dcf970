use std::collections::VecDeque;

/// Miss-status handling registers: one entry per line with outstanding work,
/// each holding the ordered list of request addresses waiting on that line.
/// Both the number of entries and the targets per entry are bounded; the
/// caller rejects requests that would overflow either.
#[derive(Debug)]
pub struct MshrTable {
    num_entries: usize,
    num_targets: usize,
    entries: Vec<MshrEntry>,
}

#[derive(Debug)]
struct MshrEntry {
    line: usize,
    targets: VecDeque<u64>,
}

impl MshrTable {
    pub fn new(num_entries: usize, num_targets: usize) -> Self {
        assert!(num_entries > 0 && num_targets > 0);
        Self {
            num_entries,
            num_targets,
            entries: Vec::new(),
        }
    }

    pub fn has_entry(&self, line: usize) -> bool {
        self.entries.iter().any(|e| e.line == line)
    }

    pub fn full(&self) -> bool {
        self.entries.len() >= self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn target_count(&self, line: usize) -> usize {
        self.find(line).map(|e| e.targets.len()).unwrap_or(0)
    }

    pub fn targets_full(&self, line: usize) -> bool {
        self.target_count(line) >= self.num_targets
    }

    /// Queue a request address under its line, allocating the entry if
    /// needed.  The caller must have checked `full`/`targets_full`.
    pub fn push_target(&mut self, line: usize, addr: u64) {
        let num_targets = self.num_targets;
        if let Some(entry) = self.find_mut(line) {
            assert!(entry.targets.len() < num_targets);
            entry.targets.push_back(addr);
            return;
        }
        assert!(self.entries.len() < self.num_entries);
        let mut targets = VecDeque::new();
        targets.push_back(addr);
        self.entries.push(MshrEntry { line, targets });
    }

    pub fn front_target(&self, line: usize) -> Option<u64> {
        self.find(line).and_then(|e| e.targets.front().copied())
    }

    /// Pull out every target whose aligned address matches a completed fill,
    /// preserving order, and drop the entry if it empties.
    pub fn drain_matching(&mut self, line: usize, aligned_addr: u64, atom: u64) -> Vec<u64> {
        let Some(idx) = self.entries.iter().position(|e| e.line == line) else {
            return Vec::new();
        };
        let entry = &mut self.entries[idx];
        let mut serviced = Vec::new();
        entry.targets.retain(|&addr| {
            if addr - (addr % atom) == aligned_addr {
                serviced.push(addr);
                false
            } else {
                true
            }
        });
        if entry.targets.is_empty() {
            self.entries.swap_remove(idx);
        }
        serviced
    }

    pub fn remove_if_empty(&mut self, line: usize) {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|e| e.line == line && e.targets.is_empty())
        {
            self.entries.swap_remove(idx);
        }
    }

    fn find(&self, line: usize) -> Option<&MshrEntry> {
        self.entries.iter().find(|e| e.line == line)
    }

    fn find_mut(&mut self, line: usize) -> Option<&mut MshrEntry> {
        self.entries.iter_mut().find(|e| e.line == line)
    }
}
