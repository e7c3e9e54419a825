//! Run-level list of one coefficient group
//!
//! Nodes live in a fixed arena reused for every CG and are linked by index,
//! so splicing a pair out is O(1) and nothing is allocated per block.

use super::level::LevelInfo;
use crate::scan::CG_SIZE;

/// Arena capacity: one node per coefficient plus bookkeeping
pub const MAX_NODES: usize = CG_SIZE + 4;

/// Arena slot
pub type NodeIdx = u8;

/// Node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeKind {
    /// Head of the CG holding the block's last significant coefficient
    LastPosition,
    /// Head of any other CG
    #[default]
    LastRun,
    /// A coefficient that may be coded nonzero
    RunLevelPair,
}

/// One list element
///
/// `run` counts the zero coefficients directly below this node in scan
/// order. For a head it counts the zeros above the first pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub kind: NodeKind,
    pub prev: Option<NodeIdx>,
    pub next: Option<NodeIdx>,
    /// Block scan index of the coefficient (pairs only)
    pub scan_pos: u16,
    /// Position inside the CG (pairs only)
    pub pos: u8,
    pub run: u8,
    /// Chosen absolute level
    pub level: i32,
}

/// Fixed-capacity node storage
#[derive(Debug, Clone)]
pub struct NodeArena {
    nodes: [Node; MAX_NODES],
    len: usize,
}

impl Default for NodeArena {
    fn default() -> Self {
        Self {
            nodes: [Node::default(); MAX_NODES],
            len: 0,
        }
    }
}

impl NodeArena {
    /// Drop every node
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of nodes allocated since the last clear
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn alloc(&mut self, node: Node) -> NodeIdx {
        debug_assert!(self.len < MAX_NODES, "node arena exhausted");
        let idx = self.len;
        self.nodes[idx] = node;
        self.len += 1;
        idx as NodeIdx
    }

    /// Append `node` after `tail`
    fn append(&mut self, tail: NodeIdx, mut node: Node) -> NodeIdx {
        node.prev = Some(tail);
        node.next = None;
        let idx = self.alloc(node);
        self.nodes[tail as usize].next = Some(idx);
        idx
    }

    /// Unlink a node, returning its successor
    pub fn unlink(&mut self, idx: NodeIdx) -> Option<NodeIdx> {
        let Node { prev, next, .. } = self.nodes[idx as usize];
        if let Some(p) = prev {
            self.nodes[p as usize].next = next;
        }
        if let Some(n) = next {
            self.nodes[n as usize].prev = prev;
        }
        let node = &mut self.nodes[idx as usize];
        node.prev = None;
        node.next = None;
        next
    }

    #[inline]
    pub fn get(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx as usize]
    }
}

/// Handle to the list of one CG inside a [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgList {
    pub head: NodeIdx,
    pub tail: NodeIdx,
    /// Pairs created by the builder
    pub pairs: usize,
}

/// Build the run-level list of CG `cg`
///
/// `infos` holds the whole block in scan order. In the CG holding the
/// block's last significant coefficient, `top` is that coefficient's
/// position and the list starts with a [`NodeKind::LastPosition`] head;
/// every other CG starts at position 15 with a [`NodeKind::LastRun`] head.
pub fn build_cg_list(
    arena: &mut NodeArena,
    infos: &[LevelInfo],
    cg: usize,
    top: Option<usize>,
) -> CgList {
    arena.clear();

    let (kind, top) = match top {
        Some(top) => (NodeKind::LastPosition, top),
        None => (NodeKind::LastRun, CG_SIZE - 1),
    };
    let head = arena.alloc(Node {
        kind,
        run: (CG_SIZE - 1 - top) as u8,
        ..Node::default()
    });

    let base = cg * CG_SIZE;
    let mut tail = head;
    let mut pairs = 0;
    for pos in (0..=top).rev() {
        if infos[base + pos].can_be_nonzero() {
            tail = arena.append(
                tail,
                Node {
                    kind: NodeKind::RunLevelPair,
                    scan_pos: (base + pos) as u16,
                    pos: pos as u8,
                    ..Node::default()
                },
            );
            pairs += 1;
        } else {
            arena.get_mut(tail).run += 1;
        }
    }

    CgList { head, tail, pairs }
}
