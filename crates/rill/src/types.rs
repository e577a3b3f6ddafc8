//! Core pipeline types
//!
//! Element kinds, operation categories, arena handles and the terminal
//! result sum type shared by every module.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An object element. Primitive kinds flow unboxed; everything else is an
/// opaque shared handle the caller downcasts on the way out.
pub type Obj = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an object element.
pub fn obj<T: Any + Send + Sync>(value: T) -> Obj {
    Arc::new(value)
}

/// Element representation a node operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Obj,
    Double,
    Int,
    Long,
}

impl Kind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Kind::Obj)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Obj => "obj",
            Kind::Double => "double",
            Kind::Int => "int",
            Kind::Long => "long",
        };
        write!(f, "{name}")
    }
}

/// Handle to a node in the pipeline arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Operation category of a node or terminal, used for error tagging and
/// rewrite pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCategory {
    Source,
    Filter,
    Map,
    Sorted,
    Limit,
    Skip,
    FlatMap,
    AnyMatch,
    Count,
    Sum,
    Average,
    Min,
    Max,
    Collect,
    Reduce,
    FindFirst,
}

impl fmt::Display for OpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCategory::Source => "source",
            OpCategory::Filter => "filter",
            OpCategory::Map => "map",
            OpCategory::Sorted => "sorted",
            OpCategory::Limit => "limit",
            OpCategory::Skip => "skip",
            OpCategory::FlatMap => "flatMap",
            OpCategory::AnyMatch => "anyMatch",
            OpCategory::Count => "count",
            OpCategory::Sum => "sum",
            OpCategory::Average => "average",
            OpCategory::Min => "min",
            OpCategory::Max => "max",
            OpCategory::Collect => "collect",
            OpCategory::Reduce => "reduce",
            OpCategory::FindFirst => "findFirst",
        };
        write!(f, "{name}")
    }
}

/// A materialized sequence, specialized per element kind so primitive
/// elements stay unboxed.
#[derive(Clone)]
pub enum Batch {
    Obj(Vec<Obj>),
    Double(Vec<f64>),
    Int(Vec<i32>),
    Long(Vec<i64>),
}

impl Batch {
    pub fn empty(kind: Kind) -> Self {
        match kind {
            Kind::Obj => Batch::Obj(Vec::new()),
            Kind::Double => Batch::Double(Vec::new()),
            Kind::Int => Batch::Int(Vec::new()),
            Kind::Long => Batch::Long(Vec::new()),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Batch::Obj(_) => Kind::Obj,
            Batch::Double(_) => Kind::Double,
            Batch::Int(_) => Kind::Int,
            Batch::Long(_) => Kind::Long,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Obj(v) => v.len(),
            Batch::Double(v) => v.len(),
            Batch::Int(v) => v.len(),
            Batch::Long(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append another batch of the same kind (partition merge order).
    pub(crate) fn append(&mut self, other: Batch) {
        match (self, other) {
            (Batch::Obj(a), Batch::Obj(b)) => a.extend(b),
            (Batch::Double(a), Batch::Double(b)) => a.extend(b),
            (Batch::Int(a), Batch::Int(b)) => a.extend(b),
            (Batch::Long(a), Batch::Long(b)) => a.extend(b),
            _ => unreachable!("batch kind mismatch on append"),
        }
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch::{}[len={}]", self.kind(), self.len())
    }
}

/// Result of a terminal reduction
#[derive(Clone)]
pub enum Outcome {
    /// anyMatch
    Bool(bool),
    /// count
    Count(u64),
    /// sum over a double lane
    Double(f64),
    /// sum over an int or long lane (int sums widen to i64)
    Long(i64),
    /// average, or min/max/findFirst/reduce over a double lane
    MaybeDouble(Option<f64>),
    /// min/max/findFirst/reduce over an int lane
    MaybeInt(Option<i32>),
    /// min/max/findFirst/reduce over a long lane
    MaybeLong(Option<i64>),
    /// min/max/findFirst/reduce over an object lane
    MaybeObj(Option<Obj>),
    /// collect
    Seq(Batch),
}

impl Outcome {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Outcome::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Outcome::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Outcome::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Outcome::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_maybe_double(&self) -> Option<Option<f64>> {
        match self {
            Outcome::MaybeDouble(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_maybe_int(&self) -> Option<Option<i32>> {
        match self {
            Outcome::MaybeInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_maybe_long(&self) -> Option<Option<i64>> {
        match self {
            Outcome::MaybeLong(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_maybe_obj(&self) -> Option<Option<Obj>> {
        match self {
            Outcome::MaybeObj(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&Batch> {
        match self {
            Outcome::Seq(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Bool(b) => write!(f, "Bool({b})"),
            Outcome::Count(n) => write!(f, "Count({n})"),
            Outcome::Double(v) => write!(f, "Double({v})"),
            Outcome::Long(v) => write!(f, "Long({v})"),
            Outcome::MaybeDouble(v) => write!(f, "MaybeDouble({v:?})"),
            Outcome::MaybeInt(v) => write!(f, "MaybeInt({v:?})"),
            Outcome::MaybeLong(v) => write!(f, "MaybeLong({v:?})"),
            Outcome::MaybeObj(v) => {
                write!(f, "MaybeObj({})", if v.is_some() { "Some(..)" } else { "None" })
            }
            Outcome::Seq(b) => write!(f, "Seq({b:?})"),
        }
    }
}

/// Terminal lifecycle. One-way once execution starts; `rearm` is the only
/// path back to `Unexecuted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Unexecuted,
    Executing,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_append_keeps_order() {
        let mut a = Batch::Int(vec![1, 2]);
        a.append(Batch::Int(vec![3]));
        match a {
            Batch::Int(v) => assert_eq!(v, vec![1, 2, 3]),
            _ => panic!("kind changed"),
        }
    }

    #[test]
    #[should_panic(expected = "batch kind mismatch")]
    fn test_batch_append_rejects_kind_mismatch() {
        let mut a = Batch::Int(vec![1]);
        a.append(Batch::Double(vec![1.0]));
    }

    #[test]
    fn test_obj_downcast_roundtrip() {
        let o = obj(42.5_f64);
        assert_eq!(o.downcast_ref::<f64>(), Some(&42.5));
        assert!(o.downcast_ref::<i32>().is_none());
    }

    #[test]
    fn test_empty_batch_kind() {
        for kind in [Kind::Obj, Kind::Double, Kind::Int, Kind::Long] {
            let b = Batch::empty(kind);
            assert_eq!(b.kind(), kind);
            assert!(b.is_empty());
        }
    }
}
