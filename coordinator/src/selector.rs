use chunkmesh_node::NodeStatus;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// Load-aware chunk placement.
///
/// Picks the candidate with the lowest last-known utilization. Candidates that
/// are known to lack room for the chunk are skipped unless nothing else is
/// left. Ties are broken round-robin so equal nodes share successive chunks.
///
/// Given the same candidates, snapshots and call sequence the choices are
/// always the same.
pub struct LoadBalancer {
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pick the node that should receive a chunk of `required_bytes`.
    ///
    /// Nodes without a snapshot are treated as empty with unknown capacity.
    pub fn select(
        &self,
        candidates: &[&str],
        statuses: &BTreeMap<String, NodeStatus>,
        required_bytes: u64,
    ) -> Result<String> {
        let mut ordered: Vec<&str> = candidates.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        if ordered.is_empty() {
            return Err(Error::NoAvailableNodes);
        }

        let fitting: Vec<&str> = ordered
            .iter()
            .copied()
            .filter(|id| {
                statuses
                    .get(*id)
                    .map(|s| s.remaining_bytes() >= required_bytes)
                    .unwrap_or(true)
            })
            .collect();

        // Nobody has room: let the node's own capacity check reject the chunk
        let pool = if fitting.is_empty() { ordered } else { fitting };

        let load = |id: &str| Load::of(statuses.get(id));
        let lowest = pool
            .iter()
            .map(|id| load(*id))
            .min_by(Load::compare)
            .unwrap_or(Load { used: 0, total: 1 });

        let tied: Vec<&str> = pool
            .into_iter()
            .filter(|id| Load::compare(&load(*id), &lowest) == CmpOrdering::Equal)
            .collect();

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(tied[idx % tied.len()].to_string())
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

/// Utilization as an exact fraction, so equal loads compare equal
#[derive(Debug, Clone, Copy)]
struct Load {
    used: u64,
    total: u64,
}

impl Load {
    fn of(status: Option<&NodeStatus>) -> Self {
        match status {
            // A node that cannot hold anything counts as full
            Some(s) if s.total_bytes == 0 => Self { used: 1, total: 1 },
            Some(s) => Self {
                used: s.used_bytes.min(s.total_bytes),
                total: s.total_bytes,
            },
            None => Self { used: 0, total: 1 },
        }
    }

    fn compare(a: &Self, b: &Self) -> CmpOrdering {
        (a.used as u128 * b.total as u128).cmp(&(b.used as u128 * a.total as u128))
    }
}
