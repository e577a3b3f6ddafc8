//! Pipeline builder and arena
//!
//! The chain is assembled one stage at a time, kind-checked at every edge,
//! then sealed with a terminal. Sealing consumes the builder, so a second
//! terminal cannot be attached. The sealed pipeline stays structurally
//! inspectable and rewritable until execution begins.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::exec::{ChunkPartitioner, Partitioner};
use crate::node::{Node, NodeOp, Stage, Terminal};
use crate::types::{Kind, NodeId, TerminalState};

/// Assembles a chain from source to frontier.
pub struct PipelineBuilder {
    nodes: Vec<Node>,
}

impl PipelineBuilder {
    /// Start a chain with a source node of the given element kind. The
    /// concrete backing sequence is supplied at execution time.
    pub fn source(kind: Kind) -> Self {
        let node = Node {
            id: NodeId(0),
            upstream: None,
            op: NodeOp::Source(kind),
            out_kind: kind,
        };
        debug!(%kind, "pipeline source declared");
        Self { nodes: vec![node] }
    }

    /// Append one operation, returning the new frontier handle. Rejects the
    /// stage if its input kind disagrees with the current frontier.
    pub fn append(&mut self, stage: Stage) -> Result<NodeId> {
        let frontier = self.frontier();
        let upstream_kind = self.nodes[frontier.0].out_kind;
        let out_kind = stage.check(upstream_kind)?;
        let id = NodeId(self.nodes.len());
        debug!(node = %id, category = %stage.category(), kind = %out_kind, "stage appended");
        self.nodes.push(Node {
            id,
            upstream: Some(frontier),
            op: NodeOp::Stage(stage),
            out_kind,
        });
        Ok(id)
    }

    /// Current frontier node handle.
    pub fn frontier(&self) -> NodeId {
        NodeId(self.nodes.len() - 1)
    }

    /// Element kind at the current frontier.
    pub fn frontier_kind(&self) -> Kind {
        self.nodes[self.frontier().0].out_kind
    }

    /// Seal the chain with a terminal. The parallel flag is fixed here and
    /// immutable for the pipeline's lifetime.
    pub fn terminal(self, terminal: Terminal, parallel: bool) -> Result<Pipeline> {
        let tail = self.frontier();
        terminal.check(self.nodes[tail.0].out_kind)?;
        debug!(
            terminal = %terminal.category(),
            parallel,
            nodes = self.nodes.len(),
            "pipeline sealed"
        );
        Ok(Pipeline {
            nodes: self.nodes,
            tail,
            terminal,
            parallel,
            state: TerminalState::Unexecuted,
            partitioner: Arc::new(ChunkPartitioner),
            partitions: None,
        })
    }
}

/// A sealed pipeline: the node arena, the terminal, and the execution
/// state machine.
///
/// The arena may hold nodes that a rewrite has detached; the live chain is
/// whatever is reachable by upstream handles from the tail. Structural
/// inspection is read-only and safe from multiple observers; mutation
/// (rewriting, re-arming) requires exclusive access.
pub struct Pipeline {
    pub(crate) nodes: Vec<Node>,
    /// Node feeding the terminal.
    pub(crate) tail: NodeId,
    pub(crate) terminal: Terminal,
    pub(crate) parallel: bool,
    pub(crate) state: TerminalState,
    pub(crate) partitioner: Arc<dyn Partitioner>,
    pub(crate) partitions: Option<usize>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline[nodes={}, tail={}, terminal={:?}, parallel={}, state={:?}]",
            self.nodes.len(),
            self.tail,
            self.terminal,
            self.parallel,
            self.state
        )
    }
}

impl Pipeline {
    /// Live chain in source→terminal order.
    pub fn chain(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut cursor = Some(self.tail);
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.nodes[id.0].upstream;
        }
        ids.reverse();
        ids
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Element kind flowing out of a node.
    pub fn kind_at(&self, id: NodeId) -> Kind {
        self.nodes[id.0].out_kind
    }

    /// Kind the terminal consumes.
    pub fn tail_kind(&self) -> Kind {
        self.nodes[self.tail.0].out_kind
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    /// Number of nodes in the live chain, source included.
    pub fn len(&self) -> usize {
        self.chain().len()
    }

    pub fn is_empty(&self) -> bool {
        false // a sealed pipeline always has at least its source
    }

    /// Reset a completed or failed terminal so the pipeline can run again.
    pub fn rearm(&mut self) {
        debug!(state = ?self.state, "pipeline rearmed");
        self.state = TerminalState::Unexecuted;
    }

    /// Override the number of partitions used in parallel mode. Defaults to
    /// the rayon thread count.
    pub fn set_partitions(&mut self, parts: usize) {
        self.partitions = Some(parts.max(1));
    }

    /// Swap in a different partitioning strategy.
    pub fn set_partitioner(&mut self, partitioner: Arc<dyn Partitioner>) {
        self.partitioner = partitioner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ops::{MapFn, Predicate};
    use crate::types::OpCategory;

    #[test]
    fn test_chain_order() {
        let mut b = PipelineBuilder::source(Kind::Double);
        b.append(Stage::Filter(Predicate::double(|x| x > 0.0))).unwrap();
        b.append(Stage::Map(MapFn::double(|x| x * 2.0))).unwrap();
        let p = b.terminal(Terminal::Count, false).unwrap();

        let chain = p.chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(p.node(chain[0]).category(), OpCategory::Source);
        assert_eq!(p.node(chain[1]).category(), OpCategory::Filter);
        assert_eq!(p.node(chain[2]).category(), OpCategory::Map);
        assert_eq!(p.state(), TerminalState::Unexecuted);
    }

    #[test]
    fn test_append_rejects_kind_mismatch() {
        let mut b = PipelineBuilder::source(Kind::Int);
        let err = b
            .append(Stage::Filter(Predicate::double(|x| x > 0.0)))
            .unwrap_err();
        assert!(matches!(err, Error::KindMismatch { .. }));
        // Builder is still usable with a matching stage.
        b.append(Stage::Filter(Predicate::int(|x| x > 0))).unwrap();
    }

    #[test]
    fn test_kind_conversion_tracked_through_chain() {
        let mut b = PipelineBuilder::source(Kind::Obj);
        let id = b
            .append(Stage::Map(MapFn::obj_to_double(|_| 1.0)))
            .unwrap();
        assert_eq!(b.frontier_kind(), Kind::Double);
        let p = b.terminal(Terminal::Sum, false).unwrap();
        assert_eq!(p.kind_at(id), Kind::Double);
        assert_eq!(p.tail_kind(), Kind::Double);
    }

    #[test]
    fn test_pipeline_debug_summary() {
        let b = PipelineBuilder::source(Kind::Double);
        let p = b.terminal(Terminal::Count, true).unwrap();
        let rendered = format!("{p:?}");
        assert!(rendered.contains("terminal=count"), "{rendered}");
        assert!(rendered.contains("parallel=true"), "{rendered}");
    }

    #[test]
    fn test_terminal_kind_check() {
        let b = PipelineBuilder::source(Kind::Obj);
        let err = b.terminal(Terminal::Sum, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTerminal { .. }));
    }
}
