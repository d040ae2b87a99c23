use crate::storage::TraceCache;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// First line of every diagram description
pub const DIAGRAM_HEADER: &str = "graph LR";

/// Edge separator inside a description line: `parent -->|count| child`
pub const EDGE_ARROW: &str = "-->";

/// Aggregated calls from one service to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub parent: String,
    pub child: String,
    pub call_count: usize,
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub service_name: String,
}

/// Service call graph derived from parent/child span relationships.
///
/// Nodes live in the petgraph arena and are addressed by service name;
/// parents are incoming edges, so no node holds a reference to another.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<DependencyNode, usize>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single pass over the span index. Self-calls and spans whose parent is
    /// not cached are skipped.
    pub fn build(cache: &TraceCache) -> Self {
        let mut graph = Self::new();
        for span in cache.iter_spans() {
            if span.is_root() {
                continue;
            }
            let Some(parent) = cache.span_by_id(&span.parent_span_id()) else {
                continue;
            };
            let parent_service = parent.service_name();
            let child_service = span.service_name();
            if parent_service == child_service {
                continue;
            }
            graph.record_call(parent_service, child_service);
        }
        graph
    }

    /// Count one call; the first call between two services links their nodes
    pub fn record_call(&mut self, parent: &str, child: &str) {
        let from = self.node(parent);
        let to = self.node(child);
        match self.graph.find_edge(from, to) {
            Some(edge) => self.graph[edge] += 1,
            None => {
                self.graph.add_edge(from, to, 1);
            }
        }
    }

    fn node(&mut self, service_name: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(service_name) {
            return index;
        }
        let index = self.graph.add_node(DependencyNode {
            service_name: service_name.to_string(),
        });
        self.nodes.insert(service_name.to_string(), index);
        index
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    pub fn service_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Edges in first-seen order
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.graph
            .edge_references()
            .map(|edge| DependencyEdge {
                parent: self.graph[edge.source()].service_name.clone(),
                child: self.graph[edge.target()].service_name.clone(),
                call_count: *edge.weight(),
            })
            .collect()
    }

    pub fn parents(&self, service_name: &str) -> Vec<&str> {
        self.neighbors(service_name, Direction::Incoming)
    }

    pub fn children(&self, service_name: &str) -> Vec<&str> {
        self.neighbors(service_name, Direction::Outgoing)
    }

    fn neighbors(&self, service_name: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.nodes.get(service_name) else {
            return Vec::new();
        };
        let mut found: Vec<(usize, &str)> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (edge.id().index(), self.graph[other].service_name.as_str())
            })
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found.into_iter().map(|(_, name)| name).collect()
    }

    /// Longest chain of services below `service_name`, counting itself (leaf = 1)
    pub fn subtree_depth(&self, service_name: &str) -> Option<usize> {
        let index = *self.nodes.get(service_name)?;
        Some(self.depth(index, &mut HashMap::new(), &mut HashSet::new()))
    }

    fn depth(
        &self,
        node: NodeIndex,
        memo: &mut HashMap<NodeIndex, usize>,
        on_path: &mut HashSet<NodeIndex>,
    ) -> usize {
        if let Some(&depth) = memo.get(&node) {
            return depth;
        }
        on_path.insert(node);
        let mut deepest = 0;
        for child in self.graph.neighbors_directed(node, Direction::Outgoing) {
            if on_path.contains(&child) {
                continue;
            }
            deepest = deepest.max(self.depth(child, memo, on_path));
        }
        on_path.remove(&node);

        let depth = deepest + 1;
        memo.insert(node, depth);
        depth
    }

    /// Services without callers, deepest subtree first. Nodes reachable only
    /// through a cycle are appended as extra roots.
    pub fn roots(&self) -> Vec<&str> {
        self.root_order()
            .into_iter()
            .map(|index| self.graph[index].service_name.as_str())
            .collect()
    }

    fn root_order(&self) -> Vec<NodeIndex> {
        let mut roots: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();

        let mut reached = HashSet::new();
        for &root in &roots {
            self.mark_reachable(root, &mut reached);
        }
        for node in self.graph.node_indices() {
            if !reached.contains(&node) {
                roots.push(node);
                self.mark_reachable(node, &mut reached);
            }
        }

        let mut memo = HashMap::new();
        let mut ranked: Vec<(NodeIndex, usize)> = roots
            .into_iter()
            .map(|root| (root, self.depth(root, &mut memo, &mut HashSet::new())))
            .collect();
        ranked.sort_by_key(|(_, depth)| Reverse(*depth));
        ranked.into_iter().map(|(root, _)| root).collect()
    }

    fn mark_reachable(&self, start: NodeIndex, reached: &mut HashSet<NodeIndex>) {
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            reached.insert(node);
        }
    }

    /// Chains of calls from each root, `a -->|2| b -->|1| c`, lines with
    /// more edges first; equal lengths keep traversal order.
    ///
    /// A chain only extends through edges no earlier line has emitted, so
    /// every edge ends exactly one line and there are at most as many lines
    /// as edges.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut emitted = HashSet::new();
        for root in self.root_order() {
            let mut path = vec![root];
            self.walk(root, &mut path, &mut emitted, &mut lines);
        }
        lines.sort_by_key(|line| Reverse(line.matches(EDGE_ARROW).count()));
        lines
    }

    fn walk(
        &self,
        node: NodeIndex,
        path: &mut Vec<NodeIndex>,
        emitted: &mut HashSet<EdgeIndex>,
        lines: &mut Vec<String>,
    ) {
        let mut children: Vec<(EdgeIndex, NodeIndex)> = self
            .graph
            .edges(node)
            .filter(|edge| !emitted.contains(&edge.id()))
            .map(|edge| (edge.id(), edge.target()))
            .collect();
        children.sort_by_key(|(id, _)| id.index());

        if children.is_empty() {
            if path.len() > 1 {
                lines.push(self.render_path(path));
            }
            return;
        }

        for (edge, child) in children {
            if !emitted.insert(edge) {
                continue;
            }
            let closes_cycle = path.contains(&child);
            path.push(child);
            if closes_cycle {
                lines.push(self.render_path(path));
            } else {
                self.walk(child, path, emitted, lines);
            }
            path.pop();
        }
    }

    fn render_path(&self, path: &[NodeIndex]) -> String {
        let mut line = self.graph[path[0]].service_name.clone();
        for hop in path.windows(2) {
            let count = self
                .graph
                .find_edge(hop[0], hop[1])
                .map(|edge| self.graph[edge])
                .unwrap_or_default();
            line.push_str(&format!(
                " {EDGE_ARROW}|{count}| {}",
                self.graph[hop[1]].service_name
            ));
        }
        line
    }

    /// Full description handed to a [`crate::diagram::DiagramRenderer`]
    pub fn to_mermaid(&self) -> String {
        let mut text = String::from(DIAGRAM_HEADER);
        text.push('\n');
        for line in self.describe() {
            text.push_str("    ");
            text.push_str(&line);
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Resource, Scope, Span, SpanId, SpanRecord, TraceId};
    use std::sync::Arc;

    fn add(cache: &mut TraceCache, trace_id: TraceId, service: &str, id: u64, parent: u64) {
        let span = Span::new(
            trace_id,
            SpanId::from_u64(id),
            SpanId::from_u64(parent),
            format!("op-{id}"),
        );
        let record = Arc::new(SpanRecord::new(
            span,
            Arc::new(Resource::with_service_name(service)),
            Arc::new(Scope::default()),
        ));
        cache.insert(service, record);
    }

    fn edge(parent: &str, child: &str, call_count: usize) -> DependencyEdge {
        DependencyEdge {
            parent: parent.into(),
            child: child.into(),
            call_count,
        }
    }

    #[test]
    fn chain_skips_same_service_hops() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        add(&mut cache, trace_id, "svc1", 1, 0);
        add(&mut cache, trace_id, "svc2", 2, 1);
        add(&mut cache, trace_id, "svc2", 3, 2);
        add(&mut cache, trace_id, "svc3", 4, 3);

        let graph = DependencyGraph::build(&cache);
        assert_eq!(
            graph.edges(),
            vec![edge("svc1", "svc2", 1), edge("svc2", "svc3", 1)]
        );
        assert_eq!(graph.roots(), vec!["svc1"]);
        assert_eq!(graph.subtree_depth("svc1"), Some(3));
        assert_eq!(graph.subtree_depth("svc3"), Some(1));
        assert_eq!(graph.parents("svc3"), vec!["svc2"]);
        assert_eq!(
            graph.describe(),
            vec!["svc1 -->|1| svc2 -->|1| svc3".to_string()]
        );
    }

    #[test]
    fn repeated_transitions_share_one_edge() {
        let mut cache = TraceCache::new();
        let first = TraceId::random();
        let second = TraceId::random();
        add(&mut cache, first, "svc1", 1, 0);
        add(&mut cache, first, "svc2", 2, 1);
        add(&mut cache, second, "svc1", 10, 0);
        add(&mut cache, second, "svc2", 11, 10);

        let graph = DependencyGraph::build(&cache);
        assert_eq!(graph.edges(), vec![edge("svc1", "svc2", 2)]);
        assert_eq!(graph.describe(), vec!["svc1 -->|2| svc2".to_string()]);
    }

    #[test]
    fn missing_parent_is_a_graph_root() {
        let mut cache = TraceCache::new();
        let trace_id = TraceId::random();
        add(&mut cache, trace_id, "api", 5, 99);
        add(&mut cache, trace_id, "db", 6, 5);

        let graph = DependencyGraph::build(&cache);
        assert_eq!(graph.edges(), vec![edge("api", "db", 1)]);
        assert!(graph.parents("api").is_empty());
    }

    #[test]
    fn longer_chains_are_described_first() {
        let mut graph = DependencyGraph::new();
        graph.record_call("gateway", "auth");
        graph.record_call("web", "api");
        graph.record_call("api", "db");
        graph.record_call("api", "cache");
        graph.record_call("api", "cache");

        assert_eq!(graph.roots(), vec!["web", "gateway"]);
        assert_eq!(
            graph.describe(),
            vec![
                "web -->|1| api -->|1| db".to_string(),
                "web -->|1| api -->|2| cache".to_string(),
                "gateway -->|1| auth".to_string(),
            ]
        );
    }

    #[test]
    fn shared_downstream_is_described_once() {
        let mut graph = DependencyGraph::new();
        graph.record_call("web", "auth");
        graph.record_call("web", "orders");
        graph.record_call("auth", "db");
        graph.record_call("orders", "db");
        graph.record_call("db", "disk");

        assert_eq!(
            graph.describe(),
            vec![
                "web -->|1| auth -->|1| db -->|1| disk".to_string(),
                "web -->|1| orders -->|1| db".to_string(),
            ]
        );
    }

    #[test]
    fn layered_graph_emits_at_most_one_line_per_edge() {
        let mut graph = DependencyGraph::new();
        let layers = 18;
        for layer in 0..layers - 1 {
            for from in 0..2 {
                for to in 0..2 {
                    graph.record_call(
                        &format!("svc-{layer}-{from}"),
                        &format!("svc-{}-{to}", layer + 1),
                    );
                }
            }
        }

        let edge_count = graph.edges().len();
        assert_eq!(edge_count, 4 * (layers - 1));

        let lines = graph.describe();
        assert!(lines.len() <= edge_count);

        // every edge still shows up somewhere
        for edge in graph.edges() {
            let hop = format!("{} {EDGE_ARROW}|1| {}", edge.parent, edge.child);
            assert!(
                lines.iter().any(|line| line.contains(&hop)),
                "missing {hop}"
            );
        }
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = DependencyGraph::new();
        graph.record_call("a", "b");
        graph.record_call("b", "a");

        assert_eq!(graph.roots(), vec!["a"]);
        assert_eq!(graph.describe(), vec!["a -->|1| b -->|1| a".to_string()]);
    }

    #[test]
    fn empty_cache_yields_header_only() {
        let graph = DependencyGraph::build(&TraceCache::new());
        assert!(graph.is_empty());
        assert_eq!(graph.to_mermaid(), format!("{DIAGRAM_HEADER}\n"));
    }

    #[test]
    fn mermaid_description_lists_paths() {
        let mut graph = DependencyGraph::new();
        graph.record_call("web", "api");
        assert_eq!(graph.to_mermaid(), "graph LR\n    web -->|1| api\n");
    }
}
