pub mod builder;
pub mod data;
pub mod workload;

pub use builder::{load_graph, synthetic_edges, GraphLayout};
pub use data::{Edge, WorkListItem, EDGE_BYTES, INF, WORK_ITEM_BYTES};
pub use workload::GraphWorkload;
