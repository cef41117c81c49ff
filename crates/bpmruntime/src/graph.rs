use bpmcore::{ProcessConfig, ProcessError, StepConfig};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::HashMap;

/// Validated step graph of one process definition
pub struct ProcessGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl ProcessGraph {
    /// Build the graph, rejecting duplicate ids, dangling references and cycles
    pub fn build(config: &ProcessConfig) -> Result<Self, ProcessError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for step in &config.steps {
            if index.contains_key(&step.public_id) {
                return Err(ProcessError::DuplicateStep(step.public_id.clone()));
            }
            let idx = graph.add_node(step.public_id.clone());
            index.insert(step.public_id.clone(), idx);
        }

        for step in &config.steps {
            let from = index[&step.public_id];
            for next in &step.next_step_ids {
                let to = index.get(next).ok_or_else(|| ProcessError::UnknownStep {
                    process_id: config.public_id.clone(),
                    step_id: next.clone(),
                })?;
                graph.add_edge(from, *to, ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(ProcessError::CyclicDependency(config.public_id.clone()));
        }

        Ok(Self { graph, index })
    }

    /// Number of edges pointing at a step
    pub fn in_degree(&self, step_id: &str) -> usize {
        self.index
            .get(step_id)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Incoming edge count per step, counting only edges whose source is
    /// reachable from `start`. A join waits for exactly this many arrivals.
    pub fn arrival_counts(&self, start: &str) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        let Some(&root) = self.index.get(start) else {
            return counts;
        };

        let mut dfs = Dfs::new(&self.graph, root);
        while let Some(node) = dfs.next(&self.graph) {
            counts.entry(self.graph[node].clone()).or_insert(0);
            for target in self.graph.neighbors_directed(node, Direction::Outgoing) {
                *counts.entry(self.graph[target].clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Resolve where a run begins.
    ///
    /// An explicit `start_step_id` must name a step. Otherwise exactly one
    /// step may be left unreferenced by every `next_step_ids`.
    pub fn start_step<'c>(&self, config: &'c ProcessConfig) -> Result<&'c StepConfig, ProcessError> {
        if let Some(start_id) = config.start_step_id.as_deref().filter(|id| !id.is_empty()) {
            return config
                .find_step(start_id)
                .ok_or_else(|| ProcessError::StartStepNotFound {
                    process_id: config.public_id.clone(),
                    step_id: start_id.to_string(),
                });
        }

        let roots: Vec<&StepConfig> = config
            .steps
            .iter()
            .filter(|s| self.in_degree(&s.public_id) == 0)
            .collect();

        match roots.as_slice() {
            [only] => Ok(*only),
            [] => Err(ProcessError::NoStartStep(config.public_id.clone())),
            many => Err(ProcessError::AmbiguousStartStep {
                process_id: config.public_id.clone(),
                candidates: many.iter().map(|s| s.public_id.clone()).collect(),
            }),
        }
    }
}
