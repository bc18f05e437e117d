//! Node retirement and spin-up decisions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use herd_model::Node;

fn age(node: &Node, now: DateTime<Utc>) -> Duration {
    (now - node.provider_creation_timestamp)
        .to_std()
        .unwrap_or_default()
}

/// Returns true if an idle node is old enough to be deleted.
pub fn should_retire(
    node: &Node,
    hosts_reserved_pods: bool,
    now: DateTime<Utc>,
    min_age: Duration,
) -> bool {
    !hosts_reserved_pods && age(node, now) > min_age
}

/// Returns true if a node of `size` was created within the grace period and
/// is presumably still spinning up.
pub fn already_spinning_up(
    existing: &[Node],
    size: &str,
    now: DateTime<Utc>,
    min_age: Duration,
) -> bool {
    existing
        .iter()
        .any(|node| node.size == size && age(node, now) <= min_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MIN_AGE_TO_EXIST;

    fn node_aged(size: &str, minutes: i64) -> Node {
        let mut node = Node::new("kube-1", size);
        node.provider_creation_timestamp = Utc::now() - chrono::Duration::minutes(minutes);
        node
    }

    #[test]
    fn test_young_idle_node_is_kept() {
        let node = node_aged("2gb", 5);
        assert!(!should_retire(&node, false, Utc::now(), MIN_AGE_TO_EXIST));
    }

    #[test]
    fn test_old_idle_node_is_retired() {
        let node = node_aged("2gb", 25);
        assert!(should_retire(&node, false, Utc::now(), MIN_AGE_TO_EXIST));
    }

    #[test]
    fn test_busy_node_is_kept() {
        let node = node_aged("2gb", 120);
        assert!(!should_retire(&node, true, Utc::now(), MIN_AGE_TO_EXIST));
    }

    #[test]
    fn test_already_spinning_up() {
        let existing = vec![node_aged("2gb", 5), node_aged("4gb", 60)];
        let now = Utc::now();

        assert!(already_spinning_up(&existing, "2gb", now, MIN_AGE_TO_EXIST));
        assert!(!already_spinning_up(&existing, "4gb", now, MIN_AGE_TO_EXIST));
        assert!(!already_spinning_up(&existing, "8gb", now, MIN_AGE_TO_EXIST));
    }

    #[test]
    fn test_future_timestamp_counts_as_new() {
        let node = node_aged("2gb", -3);
        assert!(!should_retire(&node, false, Utc::now(), MIN_AGE_TO_EXIST));
    }
}
