//! Road network graph for routing
//!
//! Intersections and boundary entry/exit points are graph nodes; every road
//! is a pair of directed edges. Routes are shortest paths converted into
//! waypoint lists for vehicles.

use anyhow::{Context, Result};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

use super::types::{Direction, IntersectionId, Position};
use super::vehicle::RouteWaypoint;

/// A node of the road graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKey {
    Intersection(IntersectionId),
    Boundary(usize),
}

/// A point on the edge of the grid where vehicles enter and leave
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryPoint {
    pub index: usize,
    pub position: Position,
    /// The intersection this stub road connects to
    pub attached: IntersectionId,
    /// Direction of travel for vehicles entering here
    pub inbound: Direction,
}

/// Edge data for the road network graph
#[derive(Debug, Clone, Copy)]
pub struct RoadEdge {
    pub length: f32,
    pub weight: u32, // Road length scaled for integer weights
}

impl RoadEdge {
    pub fn between(a: &Position, b: &Position) -> Self {
        let length = a.distance(b);
        Self {
            length,
            weight: ((length * 100.0) as u32).max(1),
        }
    }
}

/// Road network graph with cached shortest paths
#[derive(Debug, Default)]
pub struct GridNetwork {
    graph: DiGraph<NodeKey, RoadEdge>,
    key_to_node: HashMap<NodeKey, NodeIndex>,
    positions: HashMap<NodeKey, Position>,
    path_cache: HashMap<(NodeKey, NodeKey), Vec<NodeKey>>,
    boundaries: Vec<BoundaryPoint>,
}

impl GridNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the network graph
    pub fn add_node(&mut self, key: NodeKey, position: Position) {
        if self.key_to_node.contains_key(&key) {
            return;
        }
        let index = self.graph.add_node(key);
        self.key_to_node.insert(key, index);
        self.positions.insert(key, position);
        self.path_cache.clear();
    }

    /// Register a boundary point and connect it both ways to its intersection
    pub fn add_boundary(
        &mut self,
        position: Position,
        attached: IntersectionId,
        inbound: Direction,
    ) -> Result<usize> {
        let index = self.boundaries.len();
        self.add_node(NodeKey::Boundary(index), position);
        self.add_two_way_road(NodeKey::Boundary(index), NodeKey::Intersection(attached))?;
        self.boundaries.push(BoundaryPoint {
            index,
            position,
            attached,
            inbound,
        });
        Ok(index)
    }

    /// Adds a road in both directions between two existing nodes
    pub fn add_two_way_road(&mut self, a: NodeKey, b: NodeKey) -> Result<()> {
        let a_node = *self
            .key_to_node
            .get(&a)
            .with_context(|| format!("Node {:?} not found", a))?;
        let b_node = *self
            .key_to_node
            .get(&b)
            .with_context(|| format!("Node {:?} not found", b))?;
        let a_pos = self.positions[&a];
        let b_pos = self.positions[&b];

        self.graph.add_edge(a_node, b_node, RoadEdge::between(&a_pos, &b_pos));
        self.graph.add_edge(b_node, a_node, RoadEdge::between(&b_pos, &a_pos));
        self.path_cache.clear();
        Ok(())
    }

    pub fn position(&self, key: NodeKey) -> Option<&Position> {
        self.positions.get(&key)
    }

    pub fn boundaries(&self) -> &[BoundaryPoint] {
        &self.boundaries
    }

    pub fn boundary(&self, index: usize) -> Option<&BoundaryPoint> {
        self.boundaries.get(index)
    }

    /// Number of directed road edges
    pub fn road_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Nodes adjacent to `key`
    pub fn neighbours(&self, key: NodeKey) -> Vec<NodeKey> {
        let Some(index) = self.key_to_node.get(&key) else {
            return Vec::new();
        };
        self.graph
            .edges(*index)
            .map(|edge| self.graph[edge.target()])
            .collect()
    }

    /// Finds a path between two nodes using A* (Dijkstra with null heuristic).
    /// The start node is excluded from the result.
    pub fn find_path(&mut self, start: NodeKey, end: NodeKey) -> Option<Vec<NodeKey>> {
        if start == end {
            return Some(vec![]);
        }

        if let Some(path) = self.path_cache.get(&(start, end)) {
            return Some(path.clone());
        }

        let start_node = *self.key_to_node.get(&start)?;
        let end_node = *self.key_to_node.get(&end)?;

        let (_, node_path) = astar(
            &self.graph,
            start_node,
            |node| node == end_node,
            |edge| edge.weight().weight,
            |_| 0, // Null heuristic = Dijkstra
        )?;

        let path: Vec<NodeKey> = node_path
            .iter()
            .skip(1)
            .map(|index| self.graph[*index])
            .collect();

        self.path_cache.insert((start, end), path.clone());
        Some(path)
    }

    /// Waypoint route from one boundary point to another
    pub fn route_between(&mut self, from: usize, to: usize) -> Result<Vec<RouteWaypoint>> {
        let path = self
            .find_path(NodeKey::Boundary(from), NodeKey::Boundary(to))
            .with_context(|| format!("No path from boundary {} to boundary {}", from, to))?;
        if path.is_empty() {
            anyhow::bail!("Empty route between boundary {} and {}", from, to);
        }

        path.into_iter()
            .map(|key| {
                let position = *self
                    .positions
                    .get(&key)
                    .with_context(|| format!("Node {:?} has no position", key))?;
                Ok(match key {
                    NodeKey::Intersection(id) => RouteWaypoint::intersection(position, id),
                    NodeKey::Boundary(_) => RouteWaypoint::boundary(position),
                })
            })
            .collect()
    }
}
