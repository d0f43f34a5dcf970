use crate::graph::data::{WorkListItem, INF, WORK_ITEM_BYTES};

const BC_DEPTH_SHIFT: u32 = 24;
const BC_COUNT_MASK: u32 = 0x00ff_ffff;

fn bc_depth(v: u32) -> u32 {
    v >> BC_DEPTH_SHIFT
}

fn bc_count(v: u32) -> u32 {
    v & BC_COUNT_MASK
}

fn bc_pack(depth: u32, count: u32) -> u32 {
    (depth.min(0xff) << BC_DEPTH_SHIFT) | count.min(BC_COUNT_MASK)
}

/// The per-workload algebra, one variant per workload.  The coalescer only
/// calls `apply_condition`, `pre_wb_apply`, `pre_push_apply` and `print`;
/// reduction and propagation belong to the work-list and push engines, and
/// the iteration hooks to the bulk-synchronous outer driver.
#[derive(Debug, Clone)]
pub enum GraphWorkload {
    Bfs { init_addr: u64, init_value: u32 },
    BfsVisited { init_addr: u64, init_value: u32 },
    Cc,
    Sssp { init_addr: u64, init_value: u32 },
    Pr { alpha: f32, threshold: f32 },
    BspPr { num_nodes: u32, alpha: f32, error: f32, prev_error: f32 },
    BspBc { init_addr: u64, init_value: u32, current_depth: u32 },
}

impl GraphWorkload {
    pub fn from_name(name: &str, num_nodes: u32, root_addr: u64) -> Option<Self> {
        match name {
            "bfs" => Some(Self::Bfs {
                init_addr: root_addr,
                init_value: 0,
            }),
            "bfs_visited" => Some(Self::BfsVisited {
                init_addr: root_addr,
                init_value: 0,
            }),
            "cc" => Some(Self::Cc),
            "sssp" => Some(Self::Sssp {
                init_addr: root_addr,
                init_value: 0,
            }),
            "pr" => Some(Self::Pr {
                alpha: 0.85,
                threshold: 1e-4,
            }),
            "bsp_pr" => Some(Self::BspPr {
                num_nodes,
                alpha: 0.85,
                error: 0.0,
                prev_error: 0.0,
            }),
            "bsp_bc" => Some(Self::BspBc {
                init_addr: root_addr,
                init_value: bc_pack(0, 1),
                current_depth: 0,
            }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bfs { .. } => "bfs",
            Self::BfsVisited { .. } => "bfs_visited",
            Self::Cc => "cc",
            Self::Sssp { .. } => "sssp",
            Self::Pr { .. } => "pr",
            Self::BspPr { .. } => "bsp_pr",
            Self::BspBc { .. } => "bsp_bc",
        }
    }

    /// Fold an inbound update into an accumulated temp value.
    pub fn reduce(&self, update: u32, value: u32) -> u32 {
        match self {
            Self::Bfs { .. } | Self::BfsVisited { .. } | Self::Cc | Self::Sssp { .. } => {
                update.min(value)
            }
            Self::Pr { .. } | Self::BspPr { .. } => {
                (f32::from_bits(update) + f32::from_bits(value)).to_bits()
            }
            Self::BspBc { .. } => {
                if bc_depth(update) < bc_depth(value) {
                    update
                } else if bc_depth(update) == bc_depth(value) {
                    bc_pack(bc_depth(update), bc_count(update) + bc_count(value))
                } else {
                    value
                }
            }
        }
    }

    /// Value carried along one out-edge given the pushed delta.
    pub fn propagate(&self, value: u32, weight: u64) -> u32 {
        match self {
            Self::Bfs { .. } => value.saturating_add(1),
            Self::BfsVisited { .. } | Self::Cc => value,
            Self::Sssp { .. } => value.saturating_add(weight as u32),
            Self::Pr { .. } | Self::BspPr { .. } => value,
            Self::BspBc { .. } => bc_pack(bc_depth(value).saturating_add(1), bc_count(value)),
        }
    }

    /// After a work-list write: does this item now need a pre-writeback
    /// apply pass?
    pub fn apply_condition(&self, item: &WorkListItem) -> bool {
        match self {
            Self::Bfs { .. } | Self::BfsVisited { .. } | Self::Cc | Self::Sssp { .. } => {
                item.temp_prop < item.prop
            }
            Self::Pr { alpha: _, threshold } => f32::from_bits(item.temp_prop) > *threshold,
            Self::BspPr { .. } | Self::BspBc { .. } => item.temp_prop != item.prop,
        }
    }

    /// Quiescent-line apply.  Returns whether the vertex now has an unpushed
    /// update (sets its needs-push bit).
    pub fn pre_wb_apply(&self, item: &mut WorkListItem) -> bool {
        match self {
            Self::Bfs { .. } | Self::BfsVisited { .. } | Self::Cc | Self::Sssp { .. } => {
                if item.temp_prop < item.prop {
                    item.prop = item.temp_prop;
                    true
                } else {
                    false
                }
            }
            // The residual folds into the rank at push time; here we only
            // decide whether it is worth pushing.
            Self::Pr { alpha: _, threshold } => f32::from_bits(item.temp_prop) > *threshold,
            Self::BspPr { .. } => item.temp_prop != item.prop,
            Self::BspBc { .. } => {
                if item.temp_prop != item.prop {
                    item.prop = item.temp_prop;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Push-time apply.  Returns `(delta, do_push, do_wb)`: the value handed
    /// to the push engine, whether the push should happen at all, and
    /// whether the item was mutated and must reach memory again.
    pub fn pre_push_apply(&self, item: &mut WorkListItem) -> (u32, bool, bool) {
        match self {
            Self::Bfs { .. } | Self::BfsVisited { .. } | Self::Cc | Self::Sssp { .. } => {
                let mut do_wb = false;
                if item.temp_prop < item.prop {
                    item.prop = item.temp_prop;
                    do_wb = true;
                }
                let do_push = item.degree > 0 && item.prop != INF;
                (item.prop, do_push, do_wb)
            }
            Self::Pr { alpha, threshold: _ } => {
                let residual = f32::from_bits(item.temp_prop);
                item.prop = (f32::from_bits(item.prop) + residual).to_bits();
                item.temp_prop = 0f32.to_bits();
                let degree = item.degree.max(1) as f32;
                let delta = (alpha * residual / degree).to_bits();
                (delta, item.degree > 0, true)
            }
            Self::BspPr { alpha, .. } => {
                let degree = item.degree.max(1) as f32;
                let delta = (alpha * f32::from_bits(item.prop) / degree).to_bits();
                (delta, item.degree > 0, false)
            }
            Self::BspBc { .. } => {
                let mut do_wb = false;
                if item.temp_prop != item.prop {
                    item.prop = item.temp_prop;
                    do_wb = true;
                }
                let do_push = item.degree > 0 && item.prop != INF;
                (item.prop, do_push, do_wb)
            }
        }
    }

    /// Full apply of the accumulated temp into the property.  Used by the
    /// bulk-synchronous driver between rounds.
    pub fn apply(&mut self, item: &mut WorkListItem) -> u32 {
        match self {
            Self::Bfs { .. } | Self::BfsVisited { .. } | Self::Cc | Self::Sssp { .. } => {
                item.prop = item.prop.min(item.temp_prop);
                item.prop
            }
            Self::Pr { .. } => {
                item.prop = (f32::from_bits(item.prop) + f32::from_bits(item.temp_prop)).to_bits();
                item.temp_prop = 0f32.to_bits();
                item.prop
            }
            Self::BspPr { error, .. } => {
                let old = f32::from_bits(item.prop);
                let new = f32::from_bits(item.temp_prop);
                *error += (new - old).abs();
                item.prop = item.temp_prop;
                item.prop
            }
            Self::BspBc { .. } => {
                item.prop = item.temp_prop;
                item.prop
            }
        }
    }

    pub fn iterate(&mut self) {
        match self {
            Self::BspPr {
                error, prev_error, ..
            } => {
                *prev_error = *error;
                *error = 0.0;
            }
            Self::BspBc { current_depth, .. } => *current_depth += 1,
            _ => {}
        }
    }

    pub fn inter_iteration_init(&self, item: &mut WorkListItem) {
        match self {
            Self::BspPr {
                num_nodes, alpha, ..
            } => {
                item.temp_prop = ((1.0 - alpha) / *num_nodes as f32).to_bits();
            }
            _ => {}
        }
    }

    pub fn active_condition(&self, new: &WorkListItem, old: &WorkListItem) -> bool {
        match self {
            Self::Bfs { .. } | Self::BfsVisited { .. } | Self::Cc | Self::Sssp { .. } => {
                new.prop < old.prop
            }
            _ => new.prop != old.prop,
        }
    }

    /// Seed one vertex's initial state.  Returns whether the vertex starts
    /// with pending outbound work.
    pub fn init_item(&self, addr: u64, item: &mut WorkListItem) -> bool {
        match self {
            Self::Bfs {
                init_addr,
                init_value,
            }
            | Self::BfsVisited {
                init_addr,
                init_value,
            }
            | Self::Sssp {
                init_addr,
                init_value,
            }
            | Self::BspBc {
                init_addr,
                init_value,
                ..
            } => {
                item.prop = INF;
                if addr == *init_addr {
                    item.temp_prop = *init_value;
                    true
                } else {
                    item.temp_prop = INF;
                    false
                }
            }
            Self::Cc => {
                item.temp_prop = (addr / WORK_ITEM_BYTES as u64) as u32;
                item.prop = INF;
                true
            }
            Self::Pr { alpha, threshold } => {
                item.temp_prop = (1.0 - alpha).to_bits();
                item.prop = 0f32.to_bits();
                (1.0 - alpha) > *threshold
            }
            Self::BspPr {
                num_nodes, alpha, ..
            } => {
                let n = *num_nodes as f32;
                item.prop = (1.0 / n).to_bits();
                item.temp_prop = ((1.0 - alpha) / n).to_bits();
                true
            }
        }
    }

    pub fn print(&self, item: &WorkListItem) -> String {
        match self {
            Self::Pr { .. } | Self::BspPr { .. } => format!(
                "WorkListItem{{temp_prop: {:.6}, prop: {:.6}, degree: {}, edge_index: {}}}",
                f32::from_bits(item.temp_prop),
                f32::from_bits(item.prop),
                item.degree,
                item.edge_index
            ),
            Self::BspBc { .. } => format!(
                "WorkListItem{{depth: {}, count: {}, degree: {}, edge_index: {}}}",
                bc_depth(item.prop),
                bc_count(item.prop),
                item.degree,
                item.edge_index
            ),
            _ => item.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bfs() -> GraphWorkload {
        GraphWorkload::Bfs {
            init_addr: 0,
            init_value: 0,
        }
    }

    #[test]
    fn bfs_reduce_keeps_minimum() {
        let wl = bfs();
        assert_eq!(wl.reduce(3, 5), 3);
        assert_eq!(wl.reduce(9, 2), 2);
        assert_eq!(wl.reduce(INF, INF), INF);
    }

    #[test]
    fn bfs_propagate_increments_hop_count() {
        let wl = bfs();
        assert_eq!(wl.propagate(0, 99), 1);
        assert_eq!(wl.propagate(INF, 0), INF);
    }

    #[test]
    fn sssp_propagate_adds_weight() {
        let wl = GraphWorkload::Sssp {
            init_addr: 0,
            init_value: 0,
        };
        assert_eq!(wl.propagate(4, 3), 7);
    }

    #[test]
    fn bfs_apply_folds_improvement_and_activates() {
        let wl = bfs();
        let mut item = WorkListItem::new(2, INF, 1, 0);
        assert!(wl.apply_condition(&item));
        assert!(wl.pre_wb_apply(&mut item));
        assert_eq!(item.prop, 2);
        // Second pass sees nothing new.
        assert!(!wl.pre_wb_apply(&mut item));
    }

    #[test]
    fn bfs_pre_push_apply_pushes_applied_value() {
        let wl = bfs();
        let mut item = WorkListItem::new(1, 1, 2, 0);
        let (delta, do_push, do_wb) = wl.pre_push_apply(&mut item);
        assert_eq!(delta, 1);
        assert!(do_push);
        assert!(!do_wb);
    }

    #[test]
    fn bfs_pre_push_apply_folds_unapplied_value() {
        let wl = bfs();
        let mut item = WorkListItem::new(1, INF, 2, 0);
        let (delta, do_push, do_wb) = wl.pre_push_apply(&mut item);
        assert_eq!(delta, 1);
        assert!(do_push);
        assert!(do_wb);
        assert_eq!(item.prop, 1);
    }

    #[test]
    fn zero_degree_vertex_does_not_push() {
        let wl = bfs();
        let mut item = WorkListItem::new(1, INF, 0, 0);
        let (_, do_push, _) = wl.pre_push_apply(&mut item);
        assert!(!do_push);
    }

    #[test]
    fn pr_residual_hands_off_on_push() {
        let wl = GraphWorkload::Pr {
            alpha: 0.85,
            threshold: 1e-4,
        };
        let mut item = WorkListItem::new(0.15f32.to_bits(), 0f32.to_bits(), 3, 0);
        assert!(wl.apply_condition(&item));
        let (delta, do_push, do_wb) = wl.pre_push_apply(&mut item);
        assert!(do_push);
        assert!(do_wb);
        assert!((f32::from_bits(item.prop) - 0.15).abs() < 1e-6);
        assert_eq!(f32::from_bits(item.temp_prop), 0.0);
        let expect = 0.85 * 0.15 / 3.0;
        assert!((f32::from_bits(delta) - expect).abs() < 1e-6);
    }

    #[test]
    fn bc_reduce_merges_counts_at_equal_depth() {
        let wl = GraphWorkload::BspBc {
            init_addr: 0,
            init_value: bc_pack(0, 1),
            current_depth: 0,
        };
        let a = bc_pack(2, 3);
        let b = bc_pack(2, 4);
        assert_eq!(wl.reduce(a, b), bc_pack(2, 7));
        // A shallower depth replaces the value outright.
        let c = bc_pack(1, 1);
        assert_eq!(wl.reduce(c, a), c);
    }

    #[test]
    fn cc_seeds_every_vertex_active() {
        let wl = GraphWorkload::Cc;
        let mut item = WorkListItem::new(0, 0, 0, 0);
        assert!(wl.init_item(32, &mut item));
        assert_eq!(item.temp_prop, 2);
        assert_eq!(item.prop, INF);
    }
}
