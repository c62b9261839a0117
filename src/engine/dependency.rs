// ABOUTME: Dependency graph over a worker's tasks built with petgraph
// ABOUTME: Detects cycles and unknown edges, computes upstream closures and validates goal/start tasks

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::{HashMap, HashSet, VecDeque};

use super::error::{Result, WorkerError};
use super::worker::TaskMap;

pub struct DependencyGraph {
    graph: Graph<String, ()>,
    task_indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Create a dependency graph from the forward edges of a task map
    pub fn from_tasks(tasks: &TaskMap) -> Result<Self> {
        let mut graph = Graph::new();
        let mut task_indices = HashMap::new();

        for key in tasks.keys() {
            let node_index = graph.add_node(key.clone());
            task_indices.insert(key.clone(), node_index);
        }

        for (key, task) in tasks {
            let task_node = task_indices[key];

            for dependency in &task.depends_on {
                if dependency == key {
                    return Err(WorkerError::InvalidTask {
                        task: key.clone(),
                        reason: "task depends on itself".to_string(),
                    });
                }
                match task_indices.get(dependency) {
                    // dependency -> task
                    Some(&dep_node) => {
                        graph.add_edge(dep_node, task_node, ());
                    }
                    None => {
                        return Err(WorkerError::UnknownDependency {
                            task: key.clone(),
                            dependency: dependency.clone(),
                        })
                    }
                }
            }
        }

        Ok(Self {
            graph,
            task_indices,
        })
    }

    /// Build a graph from `(task, depends_on)` pairs, skipping self and unknown edges.
    ///
    /// Used where those edges are reported separately rather than rejected.
    pub fn from_edges<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let edges: Vec<_> = edges.into_iter().collect();
        let mut graph = Graph::new();
        let mut task_indices = HashMap::new();

        for (key, _) in &edges {
            let node_index = graph.add_node(key.to_string());
            task_indices.insert(key.to_string(), node_index);
        }

        for (key, depends_on) in &edges {
            let task_node = task_indices[*key];
            for dependency in depends_on.iter().filter(|dep| dep.as_str() != *key) {
                if let Some(&dep_node) = task_indices.get(dependency) {
                    graph.add_edge(dep_node, task_node, ());
                }
            }
        }

        Self {
            graph,
            task_indices,
        }
    }

    /// Tasks in an order where every dependency precedes its dependents
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let sorted =
            toposort(&self.graph, None).map_err(|cycle| WorkerError::CircularDependency {
                tasks: vec![self.graph[cycle.node_id()].clone()],
            })?;
        Ok(sorted
            .into_iter()
            .map(|node| self.graph[node].clone())
            .collect())
    }

    /// Every task reachable backwards from `task_id`, in topological order
    pub fn upstream_of(&self, task_id: &str, order: &[String]) -> Vec<String> {
        let Some(&start) = self.task_indices.get(task_id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for dep in self.graph.neighbors_directed(current, Direction::Incoming) {
                if visited.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }

        order
            .iter()
            .filter(|key| {
                self.task_indices
                    .get(*key)
                    .is_some_and(|node| visited.contains(node))
            })
            .cloned()
            .collect()
    }
}

/// Fill `all_depends_on` for tasks that declare forward dependencies but no closure.
pub fn complete_closures(tasks: &mut TaskMap) -> Result<()> {
    let graph = DependencyGraph::from_tasks(tasks)?;
    let order = graph.topological_order()?;

    for (key, task) in tasks.iter_mut() {
        if !task.depends_on.is_empty() && task.all_depends_on.is_empty() {
            task.all_depends_on = graph.upstream_of(key, &order);
        }
    }
    Ok(())
}

/// Validate a task map against its goal and start tasks.
pub fn validate(tasks: &TaskMap, goal: &str, start_tasks: &[String]) -> Result<()> {
    if tasks.is_empty() {
        return Err(WorkerError::InvalidWorker("no tasks defined".to_string()));
    }
    if !tasks.contains_key(goal) {
        return Err(WorkerError::InvalidWorker(format!(
            "goal task '{}' is not defined",
            goal
        )));
    }
    if start_tasks.is_empty() {
        return Err(WorkerError::InvalidWorker(
            "at least one start task is required".to_string(),
        ));
    }
    for start in start_tasks {
        let task = tasks
            .get(start)
            .ok_or_else(|| WorkerError::InvalidWorker(format!(
                "start task '{}' is not defined",
                start
            )))?;
        if !task.depends_on.is_empty() {
            return Err(WorkerError::InvalidTask {
                task: start.clone(),
                reason: "start tasks cannot have forward dependencies".to_string(),
            });
        }
    }

    let graph = DependencyGraph::from_tasks(tasks)?;
    let order = graph.topological_order()?;

    for (key, task) in tasks {
        if task.forward.action.is_empty() {
            return Err(WorkerError::InvalidTask {
                task: key.clone(),
                reason: "no forward action configured".to_string(),
            });
        }
        for reverse in &task.reverse_depends_on {
            if !tasks.contains_key(reverse) {
                return Err(WorkerError::UnknownDependency {
                    task: key.clone(),
                    dependency: reverse.clone(),
                });
            }
        }
        for upstream in graph.upstream_of(key, &order) {
            if !task.all_depends_on.contains(&upstream) {
                return Err(WorkerError::IncompleteClosure {
                    task: key.clone(),
                    missing: upstream,
                });
            }
        }
    }

    Ok(())
}
