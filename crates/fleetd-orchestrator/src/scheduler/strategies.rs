//! The placement strategy chain (spec.md §4.2). Pure functions over a
//! candidate Node set so they're unit-testable without a database; kept as
//! plain functions rather than trait objects since the strategy chain is a
//! hot path run once per queued Run.

use std::sync::atomic::{AtomicUsize, Ordering};

use fleetd_shared::config::StrategyName;
use fleetd_shared::models::{Node, RunSnapshot};

/// Nodes whose current `{assigned,running,paused}` count has reached
/// `capacity.max_concurrent` are excluded from every strategy.
pub fn apply_capacity_filter(nodes: Vec<Node>, active_counts: &[(uuid::Uuid, i64)]) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|n| {
            let active = active_counts
                .iter()
                .find(|(id, _)| *id == n.id)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            active < n.capacity.max_concurrent()
        })
        .collect()
}

fn smallest_id(nodes: &[Node]) -> Option<Node> {
    nodes.iter().min_by_key(|n| n.id).cloned()
}

/// If the snapshot names a `node_hint`, pick exactly that Node if eligible.
pub fn try_direct(candidates: &[Node], snapshot: &RunSnapshot) -> Option<Node> {
    let hint = snapshot.node_hint.as_ref()?;
    let hint_id: uuid::Uuid = hint.parse().ok()?;
    candidates.iter().find(|n| n.id == hint_id).cloned()
}

/// If the snapshot names an agent binding resolved to a Node id, pick that
/// Node if eligible. This core treats `agent_binding` as already resolved
/// to a Node id string by the caller (worker-side agent-instance binding is
/// out of this core's scope).
pub fn try_affinity(candidates: &[Node], snapshot: &RunSnapshot) -> Option<Node> {
    let binding = snapshot.agent_binding.as_ref()?;
    let bound_id: uuid::Uuid = binding.parse().ok()?;
    candidates.iter().find(|n| n.id == bound_id).cloned()
}

/// Require every key in the Run's labels to be present on the Node with an
/// equal value. Among matches, break ties by least-loaded when
/// `load_balance` is set, otherwise by lexicographically smallest id.
pub fn try_label_match(
    candidates: &[Node],
    snapshot: &RunSnapshot,
    active_counts: &[(uuid::Uuid, i64)],
    load_balance: bool,
) -> Option<Node> {
    if snapshot.labels.is_empty() {
        return None;
    }
    let matching: Vec<Node> = candidates
        .iter()
        .filter(|n| {
            snapshot
                .labels
                .iter()
                .all(|(k, v)| n.labels.get(k) == Some(v))
        })
        .cloned()
        .collect();

    if matching.is_empty() {
        return None;
    }

    if load_balance {
        matching
            .into_iter()
            .min_by_key(|n| {
                active_counts
                    .iter()
                    .find(|(id, _)| *id == n.id)
                    .map(|(_, c)| *c)
                    .unwrap_or(0)
            })
    } else {
        smallest_id(&matching)
    }
}

/// Stateful per-scheduler-process rotation cursor. Cross-process
/// coordination is not required (spec.md §5 calls this an acceptable
/// approximation).
#[derive(Debug, Default)]
pub struct RoundRobinCursor {
    next: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick(&self, candidates: &[Node]) -> Option<Node> {
        if candidates.is_empty() {
            return None;
        }
        let mut sorted = candidates.to_vec();
        sorted.sort_by_key(|n| n.id);
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % sorted.len();
        sorted.into_iter().nth(idx)
    }
}

pub fn try_random(candidates: &[Node]) -> Option<Node> {
    if candidates.is_empty() {
        return None;
    }
    let idx = fastrand::usize(0..candidates.len());
    candidates.get(idx).cloned()
}

/// Prefer the Node with the largest `max_concurrent - active` remaining
/// capacity; tie-break by lexicographically smallest id.
pub fn try_capacity_weighted(candidates: &[Node], active_counts: &[(uuid::Uuid, i64)]) -> Option<Node> {
    if candidates.is_empty() {
        return None;
    }
    let remaining = |n: &Node| {
        let active = active_counts
            .iter()
            .find(|(id, _)| *id == n.id)
            .map(|(_, c)| *c)
            .unwrap_or(0);
        n.capacity.max_concurrent() - active
    };
    let max_remaining = candidates.iter().map(remaining).max()?;
    let tied: Vec<Node> = candidates
        .iter()
        .filter(|n| remaining(n) == max_remaining)
        .cloned()
        .collect();
    smallest_id(&tied)
}

/// Runs the configured strategy chain in order; the first strategy to
/// return a Node wins (spec.md §4.2: `direct` always precedes `affinity`,
/// per spec.md §9's explicit pin).
pub fn run_strategy_chain(
    chain: &[StrategyName],
    candidates: &[Node],
    snapshot: &RunSnapshot,
    active_counts: &[(uuid::Uuid, i64)],
    label_match_load_balance: bool,
    round_robin: &RoundRobinCursor,
) -> Option<Node> {
    for strategy in chain {
        let picked = match strategy {
            StrategyName::Direct => try_direct(candidates, snapshot),
            StrategyName::Affinity => try_affinity(candidates, snapshot),
            StrategyName::LabelMatch => {
                try_label_match(candidates, snapshot, active_counts, label_match_load_balance)
            }
            StrategyName::RoundRobin => round_robin.pick(candidates),
            StrategyName::Random => try_random(candidates),
            StrategyName::CapacityWeighted => try_capacity_weighted(candidates, active_counts),
        };
        if picked.is_some() {
            return picked;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetd_shared::models::{NodeCapacity, NodeStatus};
    use std::collections::HashMap;

    fn node(id: uuid::Uuid, labels: &[(&str, &str)]) -> Node {
        Node {
            id,
            status: NodeStatus::Online,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            capacity: NodeCapacity {
                values: HashMap::from([("max_concurrent".to_string(), 5)]),
            },
            last_heartbeat: Some(chrono::Utc::now()),
        }
    }

    fn snapshot(labels: &[(&str, &str)]) -> RunSnapshot {
        RunSnapshot {
            prompt: None,
            workspace: None,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            node_hint: None,
            agent_binding: None,
            extra: serde_json::json!({}),
        }
    }

    #[test]
    fn direct_overrides_affinity() {
        let n_a = node(uuid::Uuid::new_v4(), &[]);
        let n_b = node(uuid::Uuid::new_v4(), &[]);
        let mut snap = snapshot(&[]);
        snap.node_hint = Some(n_b.id.to_string());
        snap.agent_binding = Some(n_a.id.to_string());

        let chain = vec![StrategyName::Direct, StrategyName::Affinity, StrategyName::LabelMatch];
        let candidates = vec![n_a.clone(), n_b.clone()];
        let cursor = RoundRobinCursor::new();
        let picked = run_strategy_chain(&chain, &candidates, &snap, &[], true, &cursor).unwrap();
        assert_eq!(picked.id, n_b.id);
    }

    #[test]
    fn label_match_requires_every_key() {
        let n1 = node(uuid::Uuid::new_v4(), &[("env", "prod")]);
        let n2 = node(uuid::Uuid::new_v4(), &[("env", "staging")]);
        let snap = snapshot(&[("env", "prod")]);
        let picked = try_label_match(&[n1.clone(), n2], &snap, &[], true).unwrap();
        assert_eq!(picked.id, n1.id);
    }

    #[test]
    fn no_match_returns_none() {
        let n1 = node(uuid::Uuid::new_v4(), &[("env", "staging")]);
        let snap = snapshot(&[("env", "prod")]);
        assert!(try_label_match(&[n1], &snap, &[], true).is_none());
    }

    #[test]
    fn capacity_filter_excludes_full_nodes() {
        let n1 = node(uuid::Uuid::new_v4(), &[]);
        let active = vec![(n1.id, 5)];
        let filtered = apply_capacity_filter(vec![n1], &active);
        assert!(filtered.is_empty());
    }

    #[test]
    fn capacity_weighted_prefers_most_headroom() {
        let n1 = node(uuid::Uuid::new_v4(), &[]);
        let n2 = node(uuid::Uuid::new_v4(), &[]);
        let active = vec![(n1.id, 4), (n2.id, 1)];
        let picked = try_capacity_weighted(&[n1.clone(), n2.clone()], &active).unwrap();
        assert_eq!(picked.id, n2.id);
    }

    #[test]
    fn round_robin_rotates() {
        let n1 = node(uuid::Uuid::new_v4(), &[]);
        let n2 = node(uuid::Uuid::new_v4(), &[]);
        let mut sorted = vec![n1, n2];
        sorted.sort_by_key(|n| n.id);
        let cursor = RoundRobinCursor::new();
        let first = cursor.pick(&sorted).unwrap();
        let second = cursor.pick(&sorted).unwrap();
        assert_ne!(first.id, second.id);
        let third = cursor.pick(&sorted).unwrap();
        assert_eq!(first.id, third.id);
    }
}
