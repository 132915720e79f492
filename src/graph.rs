use crate::symbols::{Fn1, Fn2, Fn3};

/// Index of a node inside one compilation's [`ExprGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the residual expression graph.
///
/// The parser's folding layer guarantees there is no division variant:
/// `a/b` arrives here as `Mul(a, Recip(b))`, and chained divisors share a
/// single `Recip` over their product. `Var` embeds the absolute address of
/// a symbol-table slot that is pinned for the lifetime of the engine, so
/// generated code can load it on every evaluation.
///
/// The graph is a DAG, not a tree: the parser caches one `Var` node per
/// identifier, so the same `NodeId` may appear under several parents.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Node {
    Imm(f64),
    Var(*const f64),
    Neg(NodeId),
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Recip(NodeId),
    Call1(Fn1, NodeId),
    Call2(Fn2, NodeId, NodeId),
    Call3(Fn3, NodeId, NodeId, NodeId),
}

/// Arena owning every node of one compilation. Dropped wholesale when the
/// next compilation replaces it; nodes are never mutated after insertion.
pub(crate) struct ExprGraph {
    nodes: Vec<Node>,
}

impl ExprGraph {
    pub(crate) fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> Node {
        self.nodes[id.index()]
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}
