/*
 * Directed graph with strongly-connected-component computation (Tarjan).
 * Used for the per-module call graph and for ordering modules by their imports.
 */
use std::cmp::min;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

type NodeIndex = usize;
type SccId = usize;

const UNVISITED: usize = usize::MAX;

struct Node<T> {
    t: T,
    edges: Vec<NodeIndex>,
    index: usize,
    lowlink: usize,
    on_stack: bool,
}

pub struct Graph<T: Eq + Hash + Clone> {
    h: HashMap<T, NodeIndex>,
    nodes: Vec<Node<T>>,
    has_run: bool,
    stack: Vec<NodeIndex>,
    next_index: usize,
    // each component lists its members; the first member is the representative
    sccs: Vec<Vec<NodeIndex>>,
    scc_of: Vec<SccId>,
}

impl<T: Eq + Hash + Clone> Graph<T> {
    pub fn new() -> Self {
        Graph {
            h: HashMap::new(),
            nodes: Vec::new(),
            has_run: false,
            stack: Vec::new(),
            next_index: 0,
            sccs: Vec::new(),
            scc_of: Vec::new(),
        }
    }

    pub fn add_node(&mut self, t: T) {
        self.get_or_add(t);
    }

    fn get_or_add(&mut self, t: T) -> NodeIndex {
        if let Some(i) = self.h.get(&t) {
            return *i;
        }
        let i = self.nodes.len();
        self.h.insert(t.clone(), i);
        self.nodes.push(Node { t, edges: Vec::new(), index: UNVISITED, lowlink: UNVISITED, on_stack: false });
        i
    }

    pub fn add_edge(&mut self, src: T, dst: T) {
        assert!(!self.has_run);
        let v = self.get_or_add(src);
        let w = self.get_or_add(dst);
        if !self.nodes[v].edges.contains(&w) {
            self.nodes[v].edges.push(w);
        }
    }

    pub fn contains_node(&self, t: &T) -> bool {
        self.h.contains_key(t)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn strongconnect(&mut self, v: NodeIndex) {
        self.nodes[v].index = self.next_index;
        self.nodes[v].lowlink = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.nodes[v].on_stack = true;

        for k in 0..self.nodes[v].edges.len() {
            let w = self.nodes[v].edges[k];
            if self.nodes[w].index == UNVISITED {
                self.strongconnect(w);
                self.nodes[v].lowlink = min(self.nodes[v].lowlink, self.nodes[w].lowlink);
            } else if self.nodes[w].on_stack {
                self.nodes[v].lowlink = min(self.nodes[v].lowlink, self.nodes[w].index);
            }
        }

        if self.nodes[v].lowlink == self.nodes[v].index {
            let id = self.sccs.len();
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.nodes[w].on_stack = false;
                self.scc_of[w] = id;
                component.push(w);
                if w == v {
                    break;
                }
            }
            // keep members in insertion order so the representative is deterministic
            component.sort();
            self.sccs.push(component);
        }
    }

    pub fn compute_sccs(&mut self) {
        assert!(!self.has_run);
        self.has_run = true;
        self.scc_of = vec![UNVISITED; self.nodes.len()];
        for v in 0..self.nodes.len() {
            if self.nodes[v].index == UNVISITED {
                self.strongconnect(v);
            }
        }
    }

    pub fn has_run(&self) -> bool {
        self.has_run
    }

    /// Components in dependency order: a component only has edges into itself and
    /// components that come before it.
    /// Tarjan emits components in exactly this order.
    pub fn sorted_components(&self) -> Vec<Vec<T>> {
        assert!(self.has_run);
        self.sccs.iter().map(|c| c.iter().map(|i| self.nodes[*i].t.clone()).collect()).collect()
    }

    /// One representative per component, in dependency order
    pub fn sort_sccs(&self) -> Vec<T> {
        assert!(self.has_run);
        self.sccs.iter().map(|c| self.nodes[c[0]].t.clone()).collect()
    }

    fn scc_id(&self, t: &T) -> Option<SccId> {
        assert!(self.has_run);
        self.h.get(t).map(|i| self.scc_of[*i])
    }

    pub fn node_has_direct_edge_to_itself(&self, t: &T) -> bool {
        match self.h.get(t) {
            Some(v) => self.nodes[*v].edges.contains(v),
            None => false,
        }
    }

    pub fn get_scc_size(&self, t: &T) -> usize {
        match self.scc_id(t) {
            Some(id) => self.sccs[id].len(),
            None => 1,
        }
    }

    /// Is `t` on a cycle (including a self-loop)?
    pub fn node_is_in_cycle(&self, t: &T) -> bool {
        self.node_has_direct_edge_to_itself(t) || self.get_scc_size(t) > 1
    }

    pub fn get_scc_rep(&self, t: &T) -> Option<T> {
        self.scc_id(t).map(|id| self.nodes[self.sccs[id][0]].t.clone())
    }

    pub fn in_same_scc(&self, t1: &T, t2: &T) -> bool {
        t1 == t2 || (self.scc_id(t1).is_some() && self.scc_id(t1) == self.scc_id(t2))
    }

    pub fn get_scc_nodes(&self, t: &T) -> Vec<T> {
        match self.scc_id(t) {
            Some(id) => self.sccs[id].iter().map(|i| self.nodes[*i].t.clone()).collect(),
            None => vec![],
        }
    }

    /// Position of the component of `t` in `sorted_components`
    pub fn scc_position(&self, t: &T) -> Option<usize> {
        self.scc_id(t)
    }

    /// Breadth-first search for the shortest path from `t` back to itself.
    /// The returned path starts with `t`; empty when `t` is not on a cycle.
    pub fn shortest_cycle_back_to_self(&self, t: &T) -> Vec<T> {
        let root = match self.h.get(t) {
            Some(root) => *root,
            None => return vec![],
        };
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut reached: HashSet<NodeIndex> = HashSet::new();
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for v in frontier {
                for w in self.nodes[v].edges.iter() {
                    if *w == root {
                        let mut path = vec![v];
                        let mut cur = v;
                        while let Some(p) = parent.get(&cur) {
                            path.push(*p);
                            cur = *p;
                        }
                        path.reverse();
                        return path.into_iter().map(|i| self.nodes[i].t.clone()).collect();
                    }
                    if reached.insert(*w) {
                        parent.insert(*w, v);
                        next.push(*w);
                    }
                }
            }
            frontier = next;
        }
        vec![]
    }
}

impl<T: Eq + Hash + Clone + std::fmt::Debug> std::fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph:")?;
        for node in self.nodes.iter() {
            writeln!(f, "    {:?}", node.t)?;
            for idx in node.edges.iter() {
                writeln!(f, "     -> {:?}", self.nodes[*idx].t)?;
            }
        }
        if self.has_run {
            writeln!(f, "SCCs:")?;
            for component in self.sorted_components() {
                writeln!(f, "    {:?}", component)?;
            }
        } else {
            write!(f, "SCC not yet run")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&'static str, &'static str)]) -> Graph<&'static str> {
        let mut g = Graph::new();
        for (a, b) in edges {
            g.add_edge(*a, *b);
        }
        g.compute_sccs();
        g
    }

    #[test]
    fn components_come_after_their_dependencies() {
        // a -> b -> c -> b, c -> d
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "b"), ("c", "d")]);
        let order = g.sorted_components();
        let pos = |x: &str| order.iter().position(|c| c.contains(&x)).unwrap();
        assert!(pos("d") < pos("b"));
        assert!(pos("b") < pos("a"));
        assert_eq!(pos("b"), pos("c"));
        assert!(g.in_same_scc(&"b", &"c"));
        assert!(!g.in_same_scc(&"a", &"b"));
    }

    #[test]
    fn cycles_and_self_loops() {
        let g = graph(&[("f", "f"), ("g", "h"), ("h", "g"), ("k", "f")]);
        assert!(g.node_is_in_cycle(&"f"));
        assert!(g.node_is_in_cycle(&"g"));
        assert!(!g.node_is_in_cycle(&"k"));
        assert_eq!(g.shortest_cycle_back_to_self(&"g"), vec!["g", "h"]);
        assert_eq!(g.shortest_cycle_back_to_self(&"f"), vec!["f"]);
        assert!(g.shortest_cycle_back_to_self(&"k").is_empty());
    }
}
