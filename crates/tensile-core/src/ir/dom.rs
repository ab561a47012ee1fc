//! Block reachability and dominance.
//!
//! The verifier uses this to check that every use of a value is dominated
//! by its definition; the type refiner uses the reverse postorder as its
//! forward visitation order.

use crate::ids::BlockId;
use crate::ir::program::Function;

/// Predecessor lists, indexed by block.
pub fn predecessors(func: &Function) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); func.blocks.len()];
    for b in 0..func.blocks.len() {
        let block = BlockId::new(b as u32);
        for succ in func.successors(block) {
            preds[succ.index()].push(block);
        }
    }
    preds
}

/// Dominator tree over the blocks reachable from the entry.
///
/// Built with the iterative two-finger algorithm over reverse postorder;
/// unreachable blocks have no dominator and dominate nothing.
pub struct DomTree {
    /// Postorder number per block; `usize::MAX` marks unreachable blocks.
    postorder: Vec<usize>,
    /// Immediate dominator per block; the entry's is itself.
    idom: Vec<Option<BlockId>>,
    rpo: Vec<BlockId>,
}

impl DomTree {
    pub fn build(func: &Function) -> DomTree {
        let n = func.blocks.len();
        let succs: Vec<Vec<BlockId>> =
            (0..n).map(|b| func.successors(BlockId::new(b as u32))).collect();

        // Iterative postorder DFS from the entry.
        let mut visited = vec![false; n];
        let mut order: Vec<BlockId> = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(BlockId::ENTRY.index(), 0)];
        visited[BlockId::ENTRY.index()] = true;
        while let Some(top) = stack.last_mut() {
            let (block, cursor) = *top;
            if cursor < succs[block].len() {
                top.1 += 1;
                let next = succs[block][cursor].index();
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                order.push(BlockId::new(block as u32));
                stack.pop();
            }
        }

        let mut postorder = vec![usize::MAX; n];
        for (i, &block) in order.iter().enumerate() {
            postorder[block.index()] = i;
        }
        let rpo: Vec<BlockId> = order.iter().rev().copied().collect();

        let preds = predecessors(func);
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        idom[BlockId::ENTRY.index()] = Some(BlockId::ENTRY);

        let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| {
            while a != b {
                while postorder[a.index()] < postorder[b.index()] {
                    a = idom[a.index()].unwrap();
                }
                while postorder[b.index()] < postorder[a.index()] {
                    b = idom[b.index()].unwrap();
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &preds[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        DomTree { postorder, idom, rpo }
    }

    #[inline]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.postorder[block.index()] != usize::MAX
    }

    /// Whether `a` dominates `b`. Reflexive; false if either is unreachable.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == BlockId::ENTRY {
                return false;
            }
            current = self.idom[current.index()].unwrap();
        }
    }

    /// Reachable blocks in reverse postorder (entry first).
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }
}
