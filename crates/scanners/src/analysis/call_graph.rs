//! Call Graph
//!
//! Internal call edges between the functions of one contract version, keyed
//! by function signature. Used to follow guards, writes and parameter flows
//! through helper functions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallGraph {
    callees: BTreeMap<String, BTreeSet<String>>,
    callers: BTreeMap<String, BTreeSet<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_call(&mut self, caller: &str, callee: &str) {
        self.callees
            .entry(caller.to_string())
            .or_default()
            .insert(callee.to_string());
        self.callers
            .entry(callee.to_string())
            .or_default()
            .insert(caller.to_string());
    }

    pub fn callees_of(&self, function: &str) -> impl Iterator<Item = &str> {
        self.callees
            .get(function)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn calls(&self, caller: &str, callee: &str) -> bool {
        self.callees
            .get(caller)
            .is_some_and(|set| set.contains(callee))
    }

    /// Every function transitively called from `start`, excluding `start`
    /// unless it is reached again through recursion.
    pub fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        Self::walk(&self.callees, start)
    }

    /// Every function that transitively calls `target`.
    pub fn callers_reaching(&self, target: &str) -> BTreeSet<String> {
        Self::walk(&self.callers, target)
    }

    pub fn find_call_path(&self, start: &str, target: &str) -> Option<Vec<String>> {
        let mut previous: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for next in self.callees_of(current) {
                if next == start || previous.contains_key(next) {
                    continue;
                }
                previous.insert(next, current);
                if next == target {
                    let mut path = vec![target.to_string()];
                    let mut cursor = target;
                    while let Some(prev) = previous.get(cursor) {
                        path.push(prev.to_string());
                        if *prev == start {
                            break;
                        }
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    fn walk(edges: &BTreeMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::from([start.to_string()]);

        while let Some(current) = queue.pop_front() {
            if let Some(next) = edges.get(&current) {
                for n in next {
                    if reached.insert(n.clone()) {
                        queue.push_back(n.clone());
                    }
                }
            }
        }

        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> CallGraph {
        let mut graph = CallGraph::new();
        graph.add_call("initialize(address)", "__Ownable_init(address)");
        graph.add_call("__Ownable_init(address)", "_transferOwnership(address)");
        graph.add_call("transferOwnership(address)", "_transferOwnership(address)");
        graph
    }

    #[test]
    fn test_reachability() {
        let graph = graph();
        let reached = graph.reachable_from("initialize(address)");
        assert!(reached.contains("_transferOwnership(address)"));
        assert!(!reached.contains("initialize(address)"));

        let callers = graph.callers_reaching("_transferOwnership(address)");
        assert_eq!(callers.len(), 3);
        assert!(graph.calls("transferOwnership(address)", "_transferOwnership(address)"));
    }

    #[test]
    fn test_call_path() {
        let graph = graph();
        let path = graph
            .find_call_path("initialize(address)", "_transferOwnership(address)")
            .unwrap();
        assert_eq!(
            path,
            vec![
                "initialize(address)",
                "__Ownable_init(address)",
                "_transferOwnership(address)"
            ]
        );
        assert!(graph
            .find_call_path("_transferOwnership(address)", "initialize(address)")
            .is_none());
    }
}
