//! Task graph resolution using petgraph.
//!
//! [`GraphResolver::resolve`] turns a flat list of tasks into a validated
//! [`TaskGraph`]:
//!
//! 1. Rejects duplicate ids and references to ids that are not in the list.
//! 2. Reconciles declared links so that every parent/child pair is
//!    registered on both sides.
//! 3. Rejects cycles (three-color depth-first search).
//! 4. Computes a topological order with Kahn's algorithm, breaking ties by
//!    declaration order.

use crate::error::StructureError;
use crate::task::{Task, TaskId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Validated, ordered view of a structure's tasks.
#[derive(Clone, Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Tasks in execution order: every parent precedes its children.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Tasks without parents, in topological order.
    pub fn input_tasks(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| self.degree(id, Direction::Incoming) == 0)
            .cloned()
            .collect()
    }

    /// Tasks without children, in topological order.
    pub fn output_tasks(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| self.degree(id, Direction::Outgoing) == 0)
            .cloned()
            .collect()
    }

    /// First source in topological order.
    pub fn input_task(&self) -> Option<&TaskId> {
        self.order
            .iter()
            .find(|id| self.degree(id, Direction::Incoming) == 0)
    }

    /// Last sink in topological order.
    pub fn output_task(&self) -> Option<&TaskId> {
        self.order
            .iter()
            .rev()
            .find(|id| self.degree(id, Direction::Outgoing) == 0)
    }

    /// Direct parents of a task.
    pub fn parents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct children of a task.
    pub fn children(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Whether the graph has an edge `from -> to`.
    pub fn has_edge(&self, from: &TaskId, to: &TaskId) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn degree(&self, id: &TaskId, direction: Direction) -> usize {
        self.index
            .get(id)
            .map(|&idx| self.graph.neighbors_directed(idx, direction).count())
            .unwrap_or(0)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort();
        found.into_iter().map(|n| self.graph[n].clone()).collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Builds and validates task graphs.
pub struct GraphResolver;

impl GraphResolver {
    /// Resolves the graph of `tasks`, completing missing back-links in place.
    ///
    /// # Errors
    ///
    /// - `StructureError::DuplicateTask` if two tasks share an id
    /// - `StructureError::MissingNode` naming the first unknown reference
    /// - `StructureError::Cycle` with the ids along the cycle
    ///
    /// # Example
    ///
    /// ```
    /// use weave_agent::graph::GraphResolver;
    /// use weave_agent::task::{Task, TaskId};
    ///
    /// let mut tasks = vec![Task::prompt("a").with_child("b"), Task::prompt("b")];
    /// let graph = GraphResolver::resolve(&mut tasks).unwrap();
    /// assert_eq!(graph.topological_order(), &[TaskId::new("a"), TaskId::new("b")]);
    /// assert!(tasks[1].parent_ids().contains(&TaskId::new("a")));
    /// ```
    pub fn resolve(tasks: &mut [Task]) -> Result<TaskGraph, StructureError> {
        let mut positions: HashMap<TaskId, usize> = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if positions.insert(task.id.clone(), i).is_some() {
                return Err(StructureError::DuplicateTask(task.id.clone()));
            }
        }

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (i, task) in tasks.iter().enumerate() {
            for parent in &task.parent_ids {
                let p = *positions.get(parent).ok_or_else(|| StructureError::MissingNode {
                    task: task.id.clone(),
                    missing: parent.clone(),
                })?;
                edges.push((p, i));
            }
            for child in &task.child_ids {
                let c = *positions.get(child).ok_or_else(|| StructureError::MissingNode {
                    task: task.id.clone(),
                    missing: child.clone(),
                })?;
                edges.push((i, c));
            }
        }

        for &(from, to) in &edges {
            let from_id = tasks[from].id.clone();
            let to_id = tasks[to].id.clone();
            tasks[from].child_ids.insert(to_id);
            tasks[to].parent_ids.insert(from_id);
        }

        let mut graph: DiGraph<TaskId, ()> = DiGraph::with_capacity(tasks.len(), edges.len());
        let mut index: HashMap<TaskId, NodeIndex> = HashMap::with_capacity(tasks.len());
        for task in tasks.iter() {
            let idx = graph.add_node(task.id.clone());
            index.insert(task.id.clone(), idx);
        }

        let adjacency: Vec<Vec<usize>> = tasks
            .iter()
            .map(|task| task.child_ids.iter().map(|c| positions[c]).collect())
            .collect();
        for (from, children) in adjacency.iter().enumerate() {
            for &to in children {
                graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
            }
        }

        if let Some(cycle) = find_cycle(&adjacency) {
            let ids = cycle.into_iter().map(|i| tasks[i].id.clone()).collect();
            return Err(StructureError::Cycle(ids));
        }

        let order = kahn_order(&adjacency)
            .into_iter()
            .map(|i| tasks[i].id.clone())
            .collect();

        Ok(TaskGraph {
            graph,
            index,
            order,
        })
    }
}

/// Three-color DFS. Returns the node path of the first cycle found, with the
/// entry node repeated at the end.
fn find_cycle(adjacency: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut color = vec![Color::White; adjacency.len()];

    for root in 0..adjacency.len() {
        if color[root] != Color::White {
            continue;
        }
        color[root] = Color::Gray;
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if frame.1 < adjacency[node].len() {
                let child = adjacency[node][frame.1];
                frame.1 += 1;
                match color[child] {
                    Color::White => {
                        color[child] = Color::Gray;
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|&(n, _)| n == child).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                        cycle.push(child);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            } else {
                color[node] = Color::Black;
                stack.pop();
            }
        }
    }
    None
}

/// Kahn's algorithm; among ready nodes the lowest declaration index goes first.
fn kahn_order(adjacency: &[Vec<usize>]) -> Vec<usize> {
    let mut indegree = vec![0usize; adjacency.len()];
    for children in adjacency {
        for &child in children {
            indegree[child] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(adjacency.len());

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &child in &adjacency[node] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }
    order
}
