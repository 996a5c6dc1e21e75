//! Directed view over a step list

use crate::model::Step;
use std::collections::{HashMap, HashSet};

/// Adjacency view of a workflow's steps, built from `connections`.
///
/// Node order follows the step list. Edges naming unknown ids are kept in the
/// adjacency of their source but never create nodes.
#[derive(Debug, Clone)]
pub struct StepGraph<'a> {
    /// Steps in declaration order
    nodes: Vec<&'a Step>,
    /// step_id -> downstream step_ids
    adjacency: HashMap<&'a str, Vec<&'a str>>,
    /// step_id -> upstream step_ids (self-edges excluded)
    reverse_adjacency: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> StepGraph<'a> {
    pub fn new(steps: &'a [Step]) -> Self {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut reverse_adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

        for step in steps {
            adjacency.entry(step.id.as_str()).or_default();
            reverse_adjacency.entry(step.id.as_str()).or_default();
        }

        for step in steps {
            for target in &step.connections {
                adjacency
                    .entry(step.id.as_str())
                    .or_default()
                    .push(target.as_str());
                if target != &step.id {
                    reverse_adjacency
                        .entry(target.as_str())
                        .or_default()
                        .push(step.id.as_str());
                }
            }
        }

        Self {
            nodes: steps.iter().collect(),
            adjacency,
            reverse_adjacency,
        }
    }

    pub fn nodes(&self) -> &[&'a Step] {
        &self.nodes
    }

    /// Downstream ids for a step
    pub fn downstream(&self, step_id: &str) -> &[&'a str] {
        self.adjacency
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Upstream ids for a step, not counting the step itself
    pub fn upstream(&self, step_id: &str) -> &[&'a str] {
        self.reverse_adjacency
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Number of other steps pointing at `step_id`
    pub fn in_degree(&self, step_id: &str) -> usize {
        self.upstream(step_id).len()
    }

    /// Steps no other step points at, in declaration order
    pub fn entry_points(&self) -> Vec<&'a Step> {
        self.nodes
            .iter()
            .copied()
            .filter(|s| self.in_degree(&s.id) == 0)
            .collect()
    }

    /// Ids referenced by some other step's connections
    pub fn referenced_ids(&self) -> HashSet<&'a str> {
        self.reverse_adjacency
            .iter()
            .filter(|(_, upstream)| !upstream.is_empty())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Connections naming ids that are not in the step list, as (from, to)
    pub fn dangling_edges(&self) -> Vec<(&'a str, &'a str)> {
        let known: HashSet<&str> = self.nodes.iter().map(|s| s.id.as_str()).collect();
        self.nodes
            .iter()
            .copied()
            .flat_map(|s| {
                s.connections
                    .iter()
                    .filter(|target| !known.contains(target.as_str()))
                    .map(move |target| (s.id.as_str(), target.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepType;

    fn steps() -> Vec<Step> {
        vec![
            Step::new("t1", StepType::Trigger).with_connections(["c1"]),
            Step::new("c1", StepType::Condition).with_connections(["a1", "a2"]),
            Step::new("a1", StepType::Action),
            Step::new("a2", StepType::Action).with_connections(["a2"]),
            Step::new("d1", StepType::Delay).with_connections(["a1", "ghost"]),
        ]
    }

    #[test]
    fn test_adjacency() {
        let steps = steps();
        let graph = StepGraph::new(&steps);
        assert_eq!(graph.downstream("c1"), &["a1", "a2"]);
        assert_eq!(graph.upstream("a1"), &["c1", "d1"]);
        assert!(graph.downstream("missing").is_empty());
    }

    #[test]
    fn test_self_edge_does_not_count_as_incoming() {
        let steps = steps();
        let graph = StepGraph::new(&steps);
        assert_eq!(graph.in_degree("a2"), 1);
        assert_eq!(graph.upstream("a2"), &["c1"]);
    }

    #[test]
    fn test_entry_points_in_declaration_order() {
        let steps = steps();
        let graph = StepGraph::new(&steps);
        let ids: Vec<_> = graph.entry_points().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "d1"]);
    }

    #[test]
    fn test_referenced_ids() {
        let steps = steps();
        let graph = StepGraph::new(&steps);
        let referenced = graph.referenced_ids();
        assert!(referenced.contains("c1"));
        assert!(referenced.contains("a1"));
        assert!(referenced.contains("ghost"));
        assert!(!referenced.contains("t1"));
        assert!(!referenced.contains("d1"));
    }

    #[test]
    fn test_dangling_edges() {
        let steps = steps();
        let graph = StepGraph::new(&steps);
        assert_eq!(graph.dangling_edges(), vec![("d1", "ghost")]);
    }
}
