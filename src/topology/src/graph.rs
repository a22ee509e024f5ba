// Copyright 2024 ProtoSim Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Network topology graph (SPEC_FULL §15, grounded on the original's
//! `backend/src/simulation/network.py` `NetworkTopology`): nodes and
//! links with per-link latency/jitter/bandwidth, shortest-path latency
//! lookup, and topology statistics. The original holds a `networkx.Graph`
//! alongside its own `nodes`/`links` dicts; this keeps a single
//! adjacency-list graph over node ids (Design Notes: avoid a
//! parent-pointer-style cyclic structure, store edges by id and resolve
//! through the node table) and computes shortest latency path with a
//! plain Dijkstra rather than pulling in a graph-library dependency for
//! one algorithm.

use std::collections::{BTreeMap, BinaryHeap};
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Gateway,
    Sensor,
    Actuator,
    Plc,
    Server,
    Cloud,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Wired,
    Wireless,
    Cellular,
    Satellite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    pub address: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "online".to_string()
}

impl NetworkNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType, address: impl Into<String>) -> Self {
        NetworkNode {
            id: id.into(),
            name: name.into(),
            node_type,
            address: address.into(),
            protocols: Vec::new(),
            status: default_status(),
        }
    }

    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkLink {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default = "default_link_type")]
    pub link_type: LinkType,
    #[serde(default = "default_latency")]
    pub latency_ms: f64,
    #[serde(default = "default_jitter")]
    pub jitter_ms: f64,
    #[serde(default)]
    pub packet_loss_percent: f64,
    #[serde(default = "default_bandwidth")]
    pub bandwidth_kbps: f64,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_link_type() -> LinkType {
    LinkType::Wired
}
fn default_latency() -> f64 {
    10.0
}
fn default_jitter() -> f64 {
    2.0
}
fn default_bandwidth() -> f64 {
    1000.0
}

impl NetworkLink {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>, latency_ms: f64) -> Self {
        NetworkLink {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            link_type: default_link_type(),
            latency_ms,
            jitter_ms: default_jitter(),
            packet_loss_percent: 0.0,
            bandwidth_kbps: default_bandwidth(),
            status: default_status(),
        }
    }
}

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("node '{0}' not found")]
    NodeNotFound(String),
    #[error("link '{0}' not found")]
    LinkNotFound(String),
}

pub type TopologyResult<T> = Result<T, TopologyError>;

#[derive(Debug, Clone, Serialize)]
pub struct TopologyStats {
    pub nodes: usize,
    pub links: usize,
    pub gateways: usize,
    pub sensors: usize,
    pub plcs: usize,
    pub edge_nodes: usize,
    pub cloud_nodes: usize,
    pub connected: bool,
    pub average_degree: f64,
}

/// An undirected graph of `NetworkNode`s connected by `NetworkLink`s,
/// keyed by node id so no node ever holds a pointer back to its
/// neighbors -- adjacency is derived from the link table on demand.
#[derive(Debug, Default)]
pub struct NetworkTopology {
    nodes: BTreeMap<String, NetworkNode>,
    links: BTreeMap<String, NetworkLink>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        NetworkTopology::default()
    }

    /// The default topology the original seeds on startup: one gateway,
    /// one cloud server, one edge node, ten sensors and three PLCs, wired
    /// up with the same link latencies.
    pub fn with_default_topology() -> Self {
        let mut topo = NetworkTopology::new();

        topo.add_node(NetworkNode::new("gateway-1", "Main Gateway", NodeType::Gateway, "192.168.1.1").with_protocols(["mqtt", "tcp", "modbus"]));
        topo.add_node(NetworkNode::new("cloud-1", "Cloud Server", NodeType::Cloud, "cloud.iot-platform.com").with_protocols(["mqtt", "https", "opcua"]));
        topo.add_node(NetworkNode::new("edge-1", "Edge Node", NodeType::Edge, "192.168.1.100").with_protocols(["mqtt", "bacnet"]));

        for i in 1..=10 {
            topo.add_node(
                NetworkNode::new(format!("sensor-{i}"), format!("Temperature Sensor {i}"), NodeType::Sensor, format!("192.168.1.{}", 9 + i))
                    .with_protocols(["mqtt", "coap"]),
            );
        }
        for i in 1..=3 {
            topo.add_node(
                NetworkNode::new(format!("plc-{i}"), format!("PLC {i}"), NodeType::Plc, format!("192.168.2.{}", 9 + i)).with_protocols(["modbus", "opcua"]),
            );
        }

        topo.add_link(NetworkLink { link_type: LinkType::Cellular, ..NetworkLink::new("link-gw-cloud", "gateway-1", "cloud-1", 50.0) });
        topo.add_link(NetworkLink::new("link-gw-edge", "gateway-1", "edge-1", 5.0));
        topo.add_link(NetworkLink::new("link-edge-plc1", "edge-1", "plc-1", 2.0));
        for i in 1..=10 {
            topo.add_link(NetworkLink::new(format!("link-sensor-{i}"), format!("sensor-{i}"), "gateway-1", 1.0 + i as f64));
        }

        topo
    }

    pub fn add_node(&mut self, node: NetworkNode) {
        tracing::info!(node = %node.name, "added topology node");
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn remove_node(&mut self, node_id: &str) {
        self.links.retain(|_, link| link.source != node_id && link.target != node_id);
        self.nodes.remove(node_id);
    }

    pub fn add_link(&mut self, link: NetworkLink) {
        self.links.insert(link.id.clone(), link);
    }

    pub fn remove_link(&mut self, link_id: &str) {
        self.links.remove(link_id);
    }

    pub fn node(&self, id: &str) -> Option<&NetworkNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    pub fn links(&self) -> impl Iterator<Item = &NetworkLink> {
        self.links.values()
    }

    fn neighbors(&self, node_id: &str) -> Vec<(&NetworkLink, &str)> {
        self.links
            .values()
            .filter_map(|link| {
                if link.source == node_id {
                    Some((link, link.target.as_str()))
                } else if link.target == node_id {
                    Some((link, link.source.as_str()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Shortest path (by hop count with latency as the tie-break weight)
    /// between two nodes, computed with Dijkstra over link latency.
    /// Empty when no path exists, matching `nx.shortest_path`'s
    /// `NetworkXNoPath` -> `[]` behavior in the original.
    pub fn shortest_path(&self, source: &str, target: &str) -> Vec<String> {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return Vec::new();
        }
        if source == target {
            return vec![source.to_string()];
        }

        #[derive(PartialEq)]
        struct HeapEntry(f64, String);
        impl Eq for HeapEntry {}
        impl Ord for HeapEntry {
            fn cmp(&self, other: &Self) -> Ordering {
                other.0.partial_cmp(&self.0).unwrap_or(Ordering::Equal)
            }
        }
        impl PartialOrd for HeapEntry {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut dist: BTreeMap<String, f64> = BTreeMap::new();
        let mut prev: BTreeMap<String, String> = BTreeMap::new();
        let mut heap = BinaryHeap::new();

        dist.insert(source.to_string(), 0.0);
        heap.push(HeapEntry(0.0, source.to_string()));

        while let Some(HeapEntry(d, node)) = heap.pop() {
            if node == target {
                break;
            }
            if d > *dist.get(&node).unwrap_or(&f64::INFINITY) {
                continue;
            }
            for (link, neighbor) in self.neighbors(&node) {
                let next_dist = d + link.latency_ms.max(0.0);
                if next_dist < *dist.get(neighbor).unwrap_or(&f64::INFINITY) {
                    dist.insert(neighbor.to_string(), next_dist);
                    prev.insert(neighbor.to_string(), node.clone());
                    heap.push(HeapEntry(next_dist, neighbor.to_string()));
                }
            }
        }

        if !dist.contains_key(target) {
            return Vec::new();
        }

        let mut path = vec![target.to_string()];
        let mut cur = target.to_string();
        while let Some(p) = prev.get(&cur) {
            path.push(p.clone());
            cur = p.clone();
        }
        path.reverse();
        path
    }

    /// Sum of link latencies along the shortest path, `f64::INFINITY`
    /// when unreachable.
    pub fn latency_between(&self, source: &str, target: &str) -> f64 {
        let path = self.shortest_path(source, target);
        if path.is_empty() {
            return f64::INFINITY;
        }
        let mut total = 0.0;
        for pair in path.windows(2) {
            let [a, b] = [&pair[0], &pair[1]];
            let latency = self
                .links
                .values()
                .find(|l| (l.source == *a && l.target == *b) || (l.source == *b && l.target == *a))
                .map(|l| l.latency_ms)
                .unwrap_or(0.0);
            total += latency;
        }
        total
    }

    pub fn update_link_latency(&mut self, link_id: &str, latency_ms: f64) -> TopologyResult<()> {
        let link = self.links.get_mut(link_id).ok_or_else(|| TopologyError::LinkNotFound(link_id.to_string()))?;
        link.latency_ms = latency_ms;
        Ok(())
    }

    pub fn set_link_packet_loss(&mut self, link_id: &str, loss_percent: f64) -> TopologyResult<()> {
        let link = self.links.get_mut(link_id).ok_or_else(|| TopologyError::LinkNotFound(link_id.to_string()))?;
        link.packet_loss_percent = loss_percent.clamp(0.0, 100.0);
        Ok(())
    }

    /// True when every node in the graph is reachable from every other
    /// (an empty or single-node graph is vacuously connected).
    fn is_connected(&self) -> bool {
        let Some(start) = self.nodes.keys().next() else {
            return true;
        };
        let mut visited = std::collections::BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(node) = stack.pop() {
            if !visited.insert(node.clone()) {
                continue;
            }
            for (_, neighbor) in self.neighbors(&node) {
                if !visited.contains(neighbor) {
                    stack.push(neighbor.to_string());
                }
            }
        }
        visited.len() == self.nodes.len()
    }

    pub fn stats(&self) -> TopologyStats {
        let mut degree: BTreeMap<&str, usize> = BTreeMap::new();
        for link in self.links.values() {
            *degree.entry(link.source.as_str()).or_insert(0) += 1;
            *degree.entry(link.target.as_str()).or_insert(0) += 1;
        }
        let average_degree = if self.nodes.is_empty() {
            0.0
        } else {
            degree.values().sum::<usize>() as f64 / self.nodes.len() as f64
        };

        TopologyStats {
            nodes: self.nodes.len(),
            links: self.links.len(),
            gateways: self.count_type(NodeType::Gateway),
            sensors: self.count_type(NodeType::Sensor),
            plcs: self.count_type(NodeType::Plc),
            edge_nodes: self.count_type(NodeType::Edge),
            cloud_nodes: self.count_type(NodeType::Cloud),
            connected: self.is_connected(),
            average_degree,
        }
    }

    fn count_type(&self, node_type: NodeType) -> usize {
        self.nodes.values().filter(|n| n.node_type == node_type).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_has_expected_node_counts() {
        let topo = NetworkTopology::with_default_topology();
        let stats = topo.stats();
        assert_eq!(stats.nodes, 1 + 1 + 1 + 10 + 3);
        assert_eq!(stats.sensors, 10);
        assert_eq!(stats.plcs, 3);
        assert!(stats.connected);
    }

    #[test]
    fn shortest_path_accumulates_expected_latency() {
        let topo = NetworkTopology::with_default_topology();
        let path = topo.shortest_path("plc-1", "gateway-1");
        assert_eq!(path, vec!["plc-1".to_string(), "edge-1".to_string(), "gateway-1".to_string()]);
        assert_eq!(topo.latency_between("plc-1", "gateway-1"), 2.0 + 5.0);
    }

    #[test]
    fn unreachable_nodes_return_empty_path_and_infinite_latency() {
        let mut topo = NetworkTopology::new();
        topo.add_node(NetworkNode::new("a", "A", NodeType::Sensor, "10.0.0.1"));
        topo.add_node(NetworkNode::new("b", "B", NodeType::Sensor, "10.0.0.2"));
        assert_eq!(topo.shortest_path("a", "b"), Vec::<String>::new());
        assert_eq!(topo.latency_between("a", "b"), f64::INFINITY);
        assert!(!topo.stats().connected);
    }

    #[test]
    fn remove_node_drops_its_links() {
        let mut topo = NetworkTopology::with_default_topology();
        topo.remove_node("plc-1");
        assert!(topo.node("plc-1").is_none());
        assert!(topo.links().all(|l| l.source != "plc-1" && l.target != "plc-1"));
    }

    #[test]
    fn update_link_latency_is_reflected_in_path_cost() {
        let mut topo = NetworkTopology::with_default_topology();
        topo.update_link_latency("link-gw-edge", 500.0).unwrap();
        assert_eq!(topo.latency_between("plc-1", "gateway-1"), 2.0 + 500.0);
    }

    #[test]
    fn unknown_link_update_is_an_error() {
        let mut topo = NetworkTopology::new();
        assert!(topo.update_link_latency("missing", 1.0).is_err());
    }
}
