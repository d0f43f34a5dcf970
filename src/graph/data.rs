use std::fmt;

/// Size of one packed WorkListItem in simulated memory.  Line occupancy and
/// all address arithmetic in the tile derive from this.
pub const WORK_ITEM_BYTES: usize = 16;

/// Size of one packed Edge in simulated memory.
pub const EDGE_BYTES: usize = 16;

pub const INF: u32 = u32::MAX;

/// Per-vertex state.  `temp_prop` accumulates reductions from inbound
/// updates; `prop` is the value at the start of the current round; `degree`
/// and `edge_index` locate the vertex's out-edge range in edge memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkListItem {
    pub temp_prop: u32,
    pub prop: u32,
    pub degree: u32,
    pub edge_index: u32,
}

impl WorkListItem {
    pub fn new(temp_prop: u32, prop: u32, degree: u32, edge_index: u32) -> Self {
        Self {
            temp_prop,
            prop,
            degree,
            edge_index,
        }
    }

    pub fn to_bytes(&self) -> [u8; WORK_ITEM_BYTES] {
        let mut out = [0u8; WORK_ITEM_BYTES];
        out[0..4].copy_from_slice(&self.temp_prop.to_le_bytes());
        out[4..8].copy_from_slice(&self.prop.to_le_bytes());
        out[8..12].copy_from_slice(&self.degree.to_le_bytes());
        out[12..16].copy_from_slice(&self.edge_index.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), WORK_ITEM_BYTES);
        Self {
            temp_prop: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            prop: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            degree: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            edge_index: u32::from_le_bytes(data[12..16].try_into().unwrap()),
        }
    }

    /// Decode a whole memory line into items.
    pub fn slice_from_bytes(data: &[u8]) -> Vec<WorkListItem> {
        assert_eq!(data.len() % WORK_ITEM_BYTES, 0);
        data.chunks_exact(WORK_ITEM_BYTES)
            .map(WorkListItem::from_bytes)
            .collect()
    }

    pub fn slice_to_bytes(items: &[WorkListItem]) -> Vec<u8> {
        let mut out = Vec::with_capacity(items.len() * WORK_ITEM_BYTES);
        for item in items {
            out.extend_from_slice(&item.to_bytes());
        }
        out
    }
}

impl fmt::Display for WorkListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WorkListItem{{temp_prop: {}, prop: {}, degree: {}, edge_index: {}}}",
            self.temp_prop, self.prop, self.degree, self.edge_index
        )
    }
}

/// One out-edge: the neighbor field holds the destination vertex's address
/// in work-list memory, not its index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Edge {
    pub weight: u64,
    pub neighbor: u64,
}

impl Edge {
    pub fn new(weight: u64, neighbor: u64) -> Self {
        Self { weight, neighbor }
    }

    pub fn to_bytes(&self) -> [u8; EDGE_BYTES] {
        let mut out = [0u8; EDGE_BYTES];
        out[0..8].copy_from_slice(&self.weight.to_le_bytes());
        out[8..16].copy_from_slice(&self.neighbor.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), EDGE_BYTES);
        Self {
            weight: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            neighbor: u64::from_le_bytes(data[8..16].try_into().unwrap()),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Edge{{weight: {}, neighbor: {}}}",
            self.weight, self.neighbor
        )
    }
}
