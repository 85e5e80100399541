use crate::error::{CalcError, Result};
use crate::network::{Cable, Node};
use num_traits::Zero;
use std::collections::{HashMap, VecDeque};

/// Topology is the radial tree induced by the cables, rooted at the source.
///
/// Nodes keep the index they have in the input node list (internal
/// numbering). Cables are referred to by their index in the cable list.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Node id to internal index.
    pub index: HashMap<String, usize>,

    pub source: usize,

    /// Parent of each node, `None` for the source and unreachable nodes.
    pub parent: Vec<Option<usize>>,

    /// Cable joining each node to its parent.
    pub parent_cable: Vec<Option<usize>>,

    pub children: Vec<Vec<usize>>,

    /// Breadth-first order from the source (reachable nodes only).
    pub order: Vec<usize>,

    pub reachable: Vec<bool>,
}

impl Topology {
    /// Builds the tree from an edge list and the single source node.
    ///
    /// Cables referencing unknown node ids are skipped. A cable reaching an
    /// already visited node closes a loop and is rejected.
    pub fn build(nodes: &[Node], cables: &[Cable]) -> Result<Topology> {
        let sources: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_source)
            .map(|(i, _)| i)
            .collect();
        if sources.len() != 1 {
            return Err(CalcError::SourceCount {
                found: sources.len(),
            });
        }
        let source = sources[0];

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, n) in nodes.iter().enumerate() {
            if index.insert(n.id.clone(), i).is_some() {
                return Err(CalcError::DuplicateNode { node: n.id.clone() });
            }
        }

        // adjacency: (neighbour, cable index)
        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); nodes.len()];
        for (c, cable) in cables.iter().enumerate() {
            match (index.get(&cable.node_a), index.get(&cable.node_b)) {
                (Some(&a), Some(&b)) => {
                    adjacency[a].push((b, c));
                    adjacency[b].push((a, c));
                }
                _ => {
                    log::warn!(
                        "cable '{}' ignored: unknown node '{}' or '{}'",
                        cable.id,
                        cable.node_a,
                        cable.node_b
                    );
                }
            }
        }

        let nb = nodes.len();
        let mut parent = vec![None; nb];
        let mut parent_cable = vec![None; nb];
        let mut children = vec![Vec::new(); nb];
        let mut reachable = vec![false; nb];
        let mut order = Vec::with_capacity(nb);

        let mut queue = VecDeque::from([source]);
        reachable[source] = true;
        while let Some(u) = queue.pop_front() {
            order.push(u);
            for &(v, c) in &adjacency[u] {
                if parent_cable[u] == Some(c) {
                    continue;
                }
                if reachable[v] {
                    return Err(CalcError::NotRadial {
                        cable: cables[c].id.clone(),
                    });
                }
                reachable[v] = true;
                parent[v] = Some(u);
                parent_cable[v] = Some(c);
                children[u].push(v);
                queue.push_back(v);
            }
        }

        Ok(Topology {
            index,
            source,
            parent,
            parent_cable,
            children,
            order,
            reachable,
        })
    }

    pub fn node_count(&self) -> usize {
        self.parent.len()
    }

    /// Depth-first post-order of the reachable nodes: every node comes after
    /// all of its descendants.
    pub fn post_order(&self) -> Vec<usize> {
        let mut post = Vec::with_capacity(self.order.len());
        let mut stack = vec![(self.source, false)];
        while let Some((u, expanded)) = stack.pop() {
            if expanded {
                post.push(u);
            } else {
                stack.push((u, true));
                for &v in self.children[u].iter().rev() {
                    stack.push((v, false));
                }
            }
        }
        post
    }

    /// Sum of `own` over the subtree of every node. Unreachable nodes get zero.
    pub fn subtree_sum<T>(&self, own: &[T]) -> Vec<T>
    where
        T: Copy + Zero,
    {
        let mut total = vec![T::zero(); self.node_count()];
        for u in self.post_order() {
            let mut acc = own[u];
            for &v in &self.children[u] {
                acc = acc + total[v];
            }
            total[u] = acc;
        }
        total
    }

    /// Nodes of the subtree rooted at `root`, root first.
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        let mut nodes = vec![root];
        let mut k = 0;
        while k < nodes.len() {
            let u = nodes[k];
            nodes.extend_from_slice(&self.children[u]);
            k += 1;
        }
        nodes
    }

    /// Nodes from the source (excluded) down to `node`.
    pub fn path(&self, node: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut u = node;
        while let Some(p) = self.parent[u] {
            path.push(u);
            u = p;
        }
        path.reverse();
        path
    }

    /// Departures: children of the source, in cable order.
    pub fn feeders(&self) -> &[usize] {
        &self.children[self.source]
    }

    /// One-based feeder number of every node, `None` for the source and
    /// unreachable nodes.
    pub fn feeder_numbers(&self) -> Vec<Option<usize>> {
        let mut numbers = vec![None; self.node_count()];
        for (k, &head) in self.feeders().iter().enumerate() {
            for u in self.subtree(head) {
                numbers[u] = Some(k + 1);
            }
        }
        numbers
    }
}
