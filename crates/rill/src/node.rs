//! Pipeline nodes
//!
//! A node is one operation in the chain: the source, an intermediate stage,
//! or (held separately by the pipeline) the terminal that seals it. Nodes
//! live in an arena and point upstream by handle, so a rewrite is just a
//! handle swap.

use std::fmt;

use crate::error::{Error, Result};
use crate::ops::{Combiner, Comparator, FlatMapFn, MapFn, Predicate};
use crate::types::{Batch, Kind, NodeId, OpCategory, Outcome};

/// An intermediate operation. Closed set, matched exhaustively by the
/// engine and the rewriter.
#[derive(Clone)]
pub enum Stage {
    Filter(Predicate),
    Map(MapFn),
    /// Full materialization + ordering. `None` means natural order, which
    /// only primitive lanes have.
    Sorted(Option<Comparator>),
    Limit(u64),
    Skip(u64),
    FlatMap(FlatMapFn),
}

impl Stage {
    pub fn category(&self) -> OpCategory {
        match self {
            Stage::Filter(_) => OpCategory::Filter,
            Stage::Map(_) => OpCategory::Map,
            Stage::Sorted(_) => OpCategory::Sorted,
            Stage::Limit(_) => OpCategory::Limit,
            Stage::Skip(_) => OpCategory::Skip,
            Stage::FlatMap(_) => OpCategory::FlatMap,
        }
    }

    /// The input kind this stage demands, or `None` if it accepts any kind.
    pub fn input_kind(&self) -> Option<Kind> {
        match self {
            Stage::Filter(p) => Some(p.kind()),
            Stage::Map(m) => Some(m.input_kind()),
            Stage::Sorted(Some(c)) => Some(c.kind()),
            Stage::Sorted(None) | Stage::Limit(_) | Stage::Skip(_) => None,
            Stage::FlatMap(f) => Some(f.kind()),
        }
    }

    /// Output kind given the upstream kind. Only maps convert.
    pub fn output_kind(&self, input: Kind) -> Kind {
        match self {
            Stage::Map(m) => m.output_kind(),
            _ => input,
        }
    }

    /// True for stages whose semantics depend on global element order or
    /// position. These force sequential realization.
    pub fn order_sensitive(&self) -> bool {
        matches!(self, Stage::Sorted(_) | Stage::Limit(_) | Stage::Skip(_))
    }

    /// Validate this stage against its upstream kind and return the kind
    /// flowing out of it. Shared by the builder and the rewriter.
    pub(crate) fn check(&self, upstream: Kind) -> Result<Kind> {
        if let Some(expected) = self.input_kind() {
            if expected != upstream {
                return Err(Error::KindMismatch {
                    expected,
                    found: upstream,
                    at: self.category(),
                });
            }
        }
        if matches!(self, Stage::Sorted(None)) && upstream == Kind::Obj {
            return Err(Error::ComparatorRequired {
                category: OpCategory::Sorted,
                kind: Kind::Obj,
            });
        }
        Ok(self.output_kind(upstream))
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Limit(n) => write!(f, "limit({n})"),
            Stage::Skip(n) => write!(f, "skip({n})"),
            other => write!(f, "{}", other.category()),
        }
    }
}

/// Payload of an arena node
#[derive(Clone, Debug)]
pub enum NodeOp {
    /// Declares the element kind the backing sequence will supply.
    Source(Kind),
    Stage(Stage),
}

/// One entry in the pipeline arena. Immutable once constructed except for
/// the upstream handle, which only the rewriter swaps.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub(crate) upstream: Option<NodeId>,
    pub op: NodeOp,
    pub(crate) out_kind: Kind,
}

impl Node {
    /// Upstream handle; `None` only for the source.
    pub fn upstream(&self) -> Option<NodeId> {
        self.upstream
    }

    /// Element kind flowing out of this node.
    pub fn kind(&self) -> Kind {
        self.out_kind
    }

    pub fn category(&self) -> OpCategory {
        match &self.op {
            NodeOp::Source(_) => OpCategory::Source,
            NodeOp::Stage(s) => s.category(),
        }
    }

    pub fn stage(&self) -> Option<&Stage> {
        match &self.op {
            NodeOp::Source(_) => None,
            NodeOp::Stage(s) => Some(s),
        }
    }
}

/// A terminal reduction. Consumes the upstream lane and produces a single
/// [`Outcome`].
#[derive(Clone)]
pub enum Terminal {
    AnyMatch(Predicate),
    Count,
    Sum,
    Average,
    Min(Option<Comparator>),
    Max(Option<Comparator>),
    Collect,
    Reduce(Combiner),
    FindFirst,
}

impl Terminal {
    pub fn category(&self) -> OpCategory {
        match self {
            Terminal::AnyMatch(_) => OpCategory::AnyMatch,
            Terminal::Count => OpCategory::Count,
            Terminal::Sum => OpCategory::Sum,
            Terminal::Average => OpCategory::Average,
            Terminal::Min(_) => OpCategory::Min,
            Terminal::Max(_) => OpCategory::Max,
            Terminal::Collect => OpCategory::Collect,
            Terminal::Reduce(_) => OpCategory::Reduce,
            Terminal::FindFirst => OpCategory::FindFirst,
        }
    }

    /// Whether execution may stop pulling before the upstream is exhausted.
    pub fn short_circuits(&self) -> bool {
        matches!(self, Terminal::AnyMatch(_) | Terminal::FindFirst)
    }

    /// Validate the terminal against the kind its upstream produces.
    pub(crate) fn check(&self, upstream: Kind) -> Result<()> {
        match self {
            Terminal::AnyMatch(p) => {
                if p.kind() != upstream {
                    return Err(Error::KindMismatch {
                        expected: p.kind(),
                        found: upstream,
                        at: OpCategory::AnyMatch,
                    });
                }
            }
            Terminal::Sum | Terminal::Average => {
                if !upstream.is_numeric() {
                    return Err(Error::UnsupportedTerminal {
                        terminal: self.category(),
                        kind: upstream,
                    });
                }
            }
            Terminal::Min(cmp) | Terminal::Max(cmp) => match cmp {
                Some(c) if c.kind() != upstream => {
                    return Err(Error::KindMismatch {
                        expected: c.kind(),
                        found: upstream,
                        at: self.category(),
                    });
                }
                None if upstream == Kind::Obj => {
                    return Err(Error::ComparatorRequired {
                        category: self.category(),
                        kind: Kind::Obj,
                    });
                }
                _ => {}
            },
            Terminal::Reduce(c) => {
                if c.kind() != upstream {
                    return Err(Error::KindMismatch {
                        expected: c.kind(),
                        found: upstream,
                        at: OpCategory::Reduce,
                    });
                }
            }
            Terminal::Count | Terminal::Collect | Terminal::FindFirst => {}
        }
        Ok(())
    }

    /// The documented result for an empty upstream.
    pub fn empty_outcome(&self, kind: Kind) -> Outcome {
        match self {
            Terminal::AnyMatch(_) => Outcome::Bool(false),
            Terminal::Count => Outcome::Count(0),
            Terminal::Sum => match kind {
                Kind::Double => Outcome::Double(0.0),
                _ => Outcome::Long(0),
            },
            Terminal::Average => Outcome::MaybeDouble(None),
            Terminal::Min(_) | Terminal::Max(_) | Terminal::Reduce(_) | Terminal::FindFirst => {
                match kind {
                    Kind::Obj => Outcome::MaybeObj(None),
                    Kind::Double => Outcome::MaybeDouble(None),
                    Kind::Int => Outcome::MaybeInt(None),
                    Kind::Long => Outcome::MaybeLong(None),
                }
            }
            Terminal::Collect => Outcome::Seq(Batch::empty(kind)),
        }
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category())
    }
}
