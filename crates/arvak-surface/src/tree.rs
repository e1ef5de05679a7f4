//! Resource tree.
//!
//! A spanning tree over the routable part of a [`Qcb`]. Register, I/O and
//! extern segments are leaves; they hang off routing segments, which are
//! joined bottom-up by intermediate nodes. Slots are handed out top-down:
//! each node sends a request to the heaviest child that still has a free
//! slot of the requested kind, so symbols spread over the segments with the
//! most routing access first.

use std::collections::{BTreeMap, VecDeque};

use petgraph::graph::{NodeIndex as PetNodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{Coord, ExternHandle, Qcb, SegmentId, SegmentState};

/// Kind of slot a leaf offers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    Register,
    Io,
    /// An instance of the named extern template.
    Extern(String),
}

/// Role of a tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNodeKind {
    /// A register or I/O segment; hands out its cells row-major.
    RegisterLeaf {
        segment: SegmentId,
        slot: SlotKind,
        cells: VecDeque<Coord>,
    },
    /// One extern instance.
    ExternLeaf {
        segment: SegmentId,
        handle: ExternHandle,
        template: String,
        port: Coord,
        taken: bool,
    },
    /// A routing segment.
    Route { segment: SegmentId },
    /// Joins clusters of routing segments.
    Intermediate,
}

/// A node of the resource tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub kind: TreeNodeKind,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub weight: f64,
    /// Children in request order.
    queue: VecDeque<usize>,
    free: BTreeMap<SlotKind, usize>,
}

impl TreeNode {
    fn new(kind: TreeNodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            weight: 0.0,
            queue: VecDeque::new(),
            free: BTreeMap::new(),
        }
    }

    /// Free slots of a kind below this node.
    pub fn free(&self, kind: &SlotKind) -> usize {
        self.free.get(kind).copied().unwrap_or(0)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self.kind,
            TreeNodeKind::RegisterLeaf { .. } | TreeNodeKind::ExternLeaf { .. }
        )
    }
}

/// A slot handed out by the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSlot {
    pub coord: Coord,
    /// Set for extern slots.
    pub handle: Option<ExternHandle>,
}

/// Which segment pairs share an edge in the routing graph.
fn connects(a: SegmentState, b: SegmentState, vertical: bool) -> bool {
    match (a.is_route(), b.is_route()) {
        (true, true) => true,
        (true, false) => terminal_reach(b, vertical),
        (false, true) => terminal_reach(a, vertical),
        (false, false) => false,
    }
}

fn terminal_reach(state: SegmentState, vertical: bool) -> bool {
    match state {
        SegmentState::Register | SegmentState::Io => vertical,
        SegmentState::Extern(_) => true,
        _ => false,
    }
}

/// Resource tree over one layout.
#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    nodes: Vec<TreeNode>,
    root: Option<usize>,
}

impl ResourceTree {
    /// Build the tree for a layout.
    pub fn build(qcb: &Qcb) -> Self {
        let set = qcb.segments();

        let mut graph: UnGraph<SegmentId, ()> = UnGraph::default();
        let mut index: FxHashMap<SegmentId, PetNodeIndex> = FxHashMap::default();
        for seg in set.iter() {
            if seg.state.is_route() || seg.state.is_terminal() {
                index.insert(seg.id, graph.add_node(seg.id));
            }
        }
        for seg in set.iter() {
            let Some(&a) = index.get(&seg.id) else { continue };
            for (side, n) in seg.all_neighbours() {
                let (Some(&b), Some(other)) = (index.get(&n), set.get(n)) else {
                    continue;
                };
                if seg.id < n && connects(seg.state, other.state, side.is_vertical()) {
                    graph.update_edge(a, b, ());
                }
            }
        }

        let mut components = UnionFind::<usize>::new(graph.node_count());
        for edge in graph.edge_indices() {
            if let Some((a, b)) = graph.edge_endpoints(edge) {
                components.union(a.index(), b.index());
            }
        }
        let state_of = |n: PetNodeIndex| set.get(graph[n]).map(|s| s.state);
        let mut route_count: BTreeMap<usize, usize> = BTreeMap::new();
        for n in graph.node_indices() {
            if state_of(n).is_some_and(SegmentState::is_route) {
                *route_count.entry(components.find_mut(n.index())).or_default() += 1;
            }
        }
        let Some((&main, _)) = route_count
            .iter()
            .max_by_key(|(comp, count)| (**count, std::cmp::Reverse(**comp)))
        else {
            return Self::default();
        };
        let in_main: Vec<PetNodeIndex> = graph
            .node_indices()
            .filter(|n| components.find_mut(n.index()) == main)
            .collect();

        let mut tree = Self::default();
        let mut route_node: FxHashMap<PetNodeIndex, usize> = FxHashMap::default();
        for &n in &in_main {
            if state_of(n).is_some_and(SegmentState::is_route) {
                let id = tree.push(TreeNodeKind::Route { segment: graph[n] });
                route_node.insert(n, id);
            }
        }

        // each routing segment's unit weight is shared by its leaves
        let leaf_count = |r: PetNodeIndex| {
            graph
                .neighbors(r)
                .filter(|&m| !route_node.contains_key(&m))
                .count()
        };
        for &n in &in_main {
            let Some(state) = state_of(n) else { continue };
            if state.is_route() {
                continue;
            }
            let mut routes: Vec<(f64, PetNodeIndex)> = graph
                .neighbors(n)
                .filter(|m| route_node.contains_key(m))
                .map(|m| (1.0 / leaf_count(m).max(1) as f64, m))
                .collect();
            routes.sort_by(|a, b| b.0.total_cmp(&a.0).then(graph[a.1].cmp(&graph[b.1])));
            let Some(&(_, primary)) = routes.first() else {
                continue;
            };
            let Some(kind) = leaf_kind(qcb, graph[n], state) else {
                continue;
            };
            let leaf = tree.push(kind);
            tree.nodes[leaf].weight = routes.iter().map(|r| r.0).sum();
            if let Some(&parent) = route_node.get(&primary) {
                tree.attach(parent, leaf);
            }
        }

        let routes: Vec<(PetNodeIndex, usize)> = {
            let mut v: Vec<_> = route_node.iter().map(|(&n, &id)| (n, id)).collect();
            v.sort_by_key(|(n, _)| graph[*n]);
            v
        };
        tree.root = tree.cluster(&graph, &routes);
        tree.collapse();
        if let Some(root) = tree.root {
            tree.accumulate(root);
        }
        debug!(
            "Resource tree: {} nodes, {} leaves",
            tree.nodes.len(),
            tree.nodes.iter().filter(|n| n.is_leaf()).count()
        );
        tree
    }

    fn push(&mut self, kind: TreeNodeKind) -> usize {
        self.nodes.push(TreeNode::new(kind));
        self.nodes.len() - 1
    }

    fn attach(&mut self, parent: usize, child: usize) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        self.nodes[parent].queue.push_back(child);
    }

    /// Union-find rounds over the routing graph. Each routing segment starts
    /// as a cluster of its own under a fresh intermediate. Every round each
    /// cluster picks its smallest outgoing edge; clusters joined in the same
    /// round get one new intermediate parent. The result is unreduced until
    /// [`collapse`](Self::collapse) runs.
    fn cluster(
        &mut self,
        graph: &UnGraph<SegmentId, ()>,
        routes: &[(PetNodeIndex, usize)],
    ) -> Option<usize> {
        let local: FxHashMap<PetNodeIndex, usize> =
            routes.iter().enumerate().map(|(i, (n, _))| (*n, i)).collect();
        let mut uf = UnionFind::<usize>::new(routes.len());
        let mut top: Vec<usize> = Vec::with_capacity(routes.len());
        for &(_, id) in routes {
            let node = self.push(TreeNodeKind::Intermediate);
            self.attach(node, id);
            top.push(node);
        }

        for _ in 0..routes.len() {
            let mut chosen: BTreeMap<usize, (SegmentId, SegmentId, usize, usize)> = BTreeMap::new();
            for (i, (n, _)) in routes.iter().enumerate() {
                let ci = uf.find_mut(i);
                for m in graph.neighbors(*n) {
                    let Some(&j) = local.get(&m) else { continue };
                    let cj = uf.find_mut(j);
                    if ci == cj {
                        continue;
                    }
                    let key = (graph[*n].min(graph[m]), graph[*n].max(graph[m]), i, j);
                    let better = chosen.get(&ci).is_none_or(|cur| key < *cur);
                    if better {
                        chosen.insert(ci, key);
                    }
                }
            }
            if chosen.is_empty() {
                break;
            }

            let before: Vec<usize> = (0..routes.len()).map(|i| uf.find_mut(i)).collect();
            for &(_, _, i, j) in chosen.values() {
                uf.union(i, j);
            }
            let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for (i, &old) in before.iter().enumerate() {
                if old == i {
                    groups.entry(uf.find_mut(i)).or_default().push(top[i]);
                }
            }
            for (new_root, members) in groups {
                let joined = if members.len() > 1 {
                    let node = self.push(TreeNodeKind::Intermediate);
                    for m in members {
                        self.attach(node, m);
                    }
                    node
                } else {
                    members[0]
                };
                top[new_root] = joined;
            }
        }

        let roots: Vec<usize> = (0..routes.len())
            .filter(|&i| uf.find_mut(i) == i)
            .map(|i| top[i])
            .collect();
        // disconnected leftovers cannot happen inside one component
        roots.first().copied()
    }

    /// Promote the only child of every single-child intermediate into its
    /// place. Children are pushed before their parents, so one ascending
    /// sweep also unwinds chains.
    fn collapse(&mut self) {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].kind != TreeNodeKind::Intermediate || self.nodes[idx].children.len() != 1
            {
                continue;
            }
            let child = self.nodes[idx].children[0];
            let parent = self.nodes[idx].parent;
            self.nodes[child].parent = parent;
            match parent {
                Some(p) => {
                    for c in &mut self.nodes[p].children {
                        if *c == idx {
                            *c = child;
                        }
                    }
                    for c in &mut self.nodes[p].queue {
                        if *c == idx {
                            *c = child;
                        }
                    }
                }
                None => {
                    if self.root == Some(idx) {
                        self.root = Some(child);
                    }
                }
            }
            let node = &mut self.nodes[idx];
            node.children.clear();
            node.queue.clear();
            node.parent = None;
        }
    }

    /// Fill in weights and free counts bottom-up.
    fn accumulate(&mut self, root: usize) {
        let mut order = vec![root];
        let mut i = 0;
        while i < order.len() {
            order.extend(self.nodes[order[i]].children.iter().copied());
            i += 1;
        }
        for &idx in order.iter().rev() {
            let own = match &self.nodes[idx].kind {
                TreeNodeKind::RegisterLeaf { slot, cells, .. } => Some((slot.clone(), cells.len())),
                TreeNodeKind::ExternLeaf { template, .. } => {
                    Some((SlotKind::Extern(template.clone()), 1))
                }
                TreeNodeKind::Route { .. } | TreeNodeKind::Intermediate => None,
            };
            let mut free: BTreeMap<SlotKind, usize> = BTreeMap::new();
            if let Some((kind, n)) = own {
                free.insert(kind, n);
            } else {
                let mut weight = 0.0;
                for &c in &self.nodes[idx].children {
                    weight += self.nodes[c].weight;
                    for (k, v) in &self.nodes[c].free {
                        *free.entry(k.clone()).or_default() += v;
                    }
                }
                self.nodes[idx].weight = weight;
            }
            self.nodes[idx].free = free;
        }
    }

    /// All nodes, including collapsed ones.
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    /// Free slots of a kind in the whole tree.
    pub fn capacity(&self, kind: &SlotKind) -> usize {
        self.root.map_or(0, |r| self.nodes[r].free(kind))
    }

    /// Hand out one slot of `kind`.
    pub fn alloc(&mut self, kind: &SlotKind) -> Option<TreeSlot> {
        let root = self.root?;
        if self.nodes[root].free(kind) == 0 {
            return None;
        }

        let mut path = vec![root];
        let mut node = root;
        while !self.nodes[node].is_leaf() {
            let queue = &self.nodes[node].queue;
            let mut pick: Option<(usize, f64)> = None;
            for (pos, &c) in queue.iter().enumerate() {
                if self.nodes[c].free(kind) == 0 {
                    continue;
                }
                let w = self.nodes[c].weight;
                if pick.is_none_or(|(_, best)| w > best) {
                    pick = Some((pos, w));
                }
            }
            let (pos, _) = pick?;
            let child = self.nodes[node].queue.remove(pos)?;
            // reinserted below once the slot is taken
            path.push(child);
            node = child;
        }

        let slot = match &mut self.nodes[node].kind {
            TreeNodeKind::RegisterLeaf { cells, .. } => TreeSlot {
                coord: cells.pop_front()?,
                handle: None,
            },
            TreeNodeKind::ExternLeaf {
                handle, port, taken, ..
            } => {
                *taken = true;
                TreeSlot {
                    coord: *port,
                    handle: Some(*handle),
                }
            }
            _ => return None,
        };

        for &n in &path {
            if let Some(f) = self.nodes[n].free.get_mut(kind) {
                *f -= 1;
            }
        }
        for pair in path.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            if self.nodes[child].free(kind) > 0 {
                self.nodes[parent].queue.push_front(child);
            } else {
                self.nodes[parent].queue.push_back(child);
            }
        }
        Some(slot)
    }

    /// Take a specific register or I/O cell out of circulation.
    ///
    /// Returns `false` if no leaf still offers the cell.
    pub fn take(&mut self, coord: Coord) -> bool {
        let found = self.nodes.iter().position(|n| match &n.kind {
            TreeNodeKind::RegisterLeaf { cells, .. } => cells.contains(&coord),
            _ => false,
        });
        let Some(leaf) = found else {
            return false;
        };
        let kind = match &mut self.nodes[leaf].kind {
            TreeNodeKind::RegisterLeaf { cells, slot, .. } => {
                cells.retain(|c| *c != coord);
                slot.clone()
            }
            _ => return false,
        };
        let mut cur = Some(leaf);
        while let Some(n) = cur {
            if let Some(f) = self.nodes[n].free.get_mut(&kind) {
                *f = f.saturating_sub(1);
            }
            cur = self.nodes[n].parent;
        }
        true
    }
}

fn leaf_kind(qcb: &Qcb, segment: SegmentId, state: SegmentState) -> Option<TreeNodeKind> {
    let rect = qcb.segments().get(segment)?.rect;
    match state {
        SegmentState::Register | SegmentState::Io => Some(TreeNodeKind::RegisterLeaf {
            segment,
            slot: if state == SegmentState::Io {
                SlotKind::Io
            } else {
                SlotKind::Register
            },
            cells: rect.cells().collect(),
        }),
        SegmentState::Extern(handle) => {
            let inst = qcb.extern_instance(handle)?;
            Some(TreeNodeKind::ExternLeaf {
                segment,
                handle,
                template: inst.template.clone(),
                port: qcb.extern_port(handle)?,
                taken: false,
            })
        }
        _ => None,
    }
}
