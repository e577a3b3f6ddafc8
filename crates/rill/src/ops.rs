//! Kind-specialized function families
//!
//! Caller-supplied predicates, transforms, comparators and combiners are
//! stored as closed enums with one variant per supported kind signature.
//! The builder and rewriter check edge kinds through the `input_kind` /
//! `output_kind` metadata; the engine dispatches exhaustively so primitive
//! elements never box.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::OpError;
use crate::types::{Kind, Obj};

type ObjPredFn = Arc<dyn Fn(&Obj) -> Result<bool, OpError> + Send + Sync>;
type DoublePredFn = Arc<dyn Fn(f64) -> Result<bool, OpError> + Send + Sync>;
type IntPredFn = Arc<dyn Fn(i32) -> Result<bool, OpError> + Send + Sync>;
type LongPredFn = Arc<dyn Fn(i64) -> Result<bool, OpError> + Send + Sync>;

/// Per-kind element predicate (filter stages, anyMatch terminals)
#[derive(Clone)]
pub enum Predicate {
    Obj(ObjPredFn),
    Double(DoublePredFn),
    Int(IntPredFn),
    Long(LongPredFn),
}

impl Predicate {
    pub fn obj<F: Fn(&Obj) -> bool + Send + Sync + 'static>(f: F) -> Self {
        Predicate::Obj(Arc::new(move |x| Ok(f(x))))
    }

    pub fn double<F: Fn(f64) -> bool + Send + Sync + 'static>(f: F) -> Self {
        Predicate::Double(Arc::new(move |x| Ok(f(x))))
    }

    pub fn int<F: Fn(i32) -> bool + Send + Sync + 'static>(f: F) -> Self {
        Predicate::Int(Arc::new(move |x| Ok(f(x))))
    }

    pub fn long<F: Fn(i64) -> bool + Send + Sync + 'static>(f: F) -> Self {
        Predicate::Long(Arc::new(move |x| Ok(f(x))))
    }

    /// Fallible variants for predicates backed by external collaborators.
    pub fn try_double<F>(f: F) -> Self
    where
        F: Fn(f64) -> Result<bool, OpError> + Send + Sync + 'static,
    {
        Predicate::Double(Arc::new(f))
    }

    pub fn try_obj<F>(f: F) -> Self
    where
        F: Fn(&Obj) -> Result<bool, OpError> + Send + Sync + 'static,
    {
        Predicate::Obj(Arc::new(f))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Predicate::Obj(_) => Kind::Obj,
            Predicate::Double(_) => Kind::Double,
            Predicate::Int(_) => Kind::Int,
            Predicate::Long(_) => Kind::Long,
        }
    }

    /// Conjunction of two same-kind predicates, left evaluated first and
    /// short-circuiting. This is what filter fusion produces.
    pub fn and(&self, other: &Predicate) -> Option<Predicate> {
        match (self, other) {
            (Predicate::Obj(p), Predicate::Obj(q)) => {
                let (p, q) = (p.clone(), q.clone());
                Some(Predicate::Obj(Arc::new(move |x| Ok(p(x)? && q(x)?))))
            }
            (Predicate::Double(p), Predicate::Double(q)) => {
                let (p, q) = (p.clone(), q.clone());
                Some(Predicate::Double(Arc::new(move |x| Ok(p(x)? && q(x)?))))
            }
            (Predicate::Int(p), Predicate::Int(q)) => {
                let (p, q) = (p.clone(), q.clone());
                Some(Predicate::Int(Arc::new(move |x| Ok(p(x)? && q(x)?))))
            }
            (Predicate::Long(p), Predicate::Long(q)) => {
                let (p, q) = (p.clone(), q.clone());
                Some(Predicate::Long(Arc::new(move |x| Ok(p(x)? && q(x)?))))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate<{}>", self.kind())
    }
}

/// A single element of any kind. Used only when recomposing fused maps;
/// the execution lanes stay monomorphic.
#[derive(Clone)]
pub(crate) enum Cell {
    Obj(Obj),
    Double(f64),
    Int(i32),
    Long(i64),
}

type CellFn = Arc<dyn Fn(Cell) -> Result<Cell, OpError> + Send + Sync>;

type ObjMap = Arc<dyn Fn(Obj) -> Result<Obj, OpError> + Send + Sync>;
type DoubleMap = Arc<dyn Fn(f64) -> Result<f64, OpError> + Send + Sync>;
type IntMap = Arc<dyn Fn(i32) -> Result<i32, OpError> + Send + Sync>;
type LongMap = Arc<dyn Fn(i64) -> Result<i64, OpError> + Send + Sync>;
type ObjToDoubleMap = Arc<dyn Fn(Obj) -> Result<f64, OpError> + Send + Sync>;
type ObjToIntMap = Arc<dyn Fn(Obj) -> Result<i32, OpError> + Send + Sync>;
type ObjToLongMap = Arc<dyn Fn(Obj) -> Result<i64, OpError> + Send + Sync>;
type DoubleToObjMap = Arc<dyn Fn(f64) -> Result<Obj, OpError> + Send + Sync>;
type IntToObjMap = Arc<dyn Fn(i32) -> Result<Obj, OpError> + Send + Sync>;
type LongToObjMap = Arc<dyn Fn(i64) -> Result<Obj, OpError> + Send + Sync>;
type IntToLongMap = Arc<dyn Fn(i32) -> Result<i64, OpError> + Send + Sync>;
type IntToDoubleMap = Arc<dyn Fn(i32) -> Result<f64, OpError> + Send + Sync>;
type LongToDoubleMap = Arc<dyn Fn(i64) -> Result<f64, OpError> + Send + Sync>;

/// Per-kind element transform. Same-kind variants for all four kinds plus
/// the sanctioned kind conversions (to/from object, and the numeric
/// widenings int→long, int→double, long→double).
#[derive(Clone)]
pub enum MapFn {
    Obj(ObjMap),
    Double(DoubleMap),
    Int(IntMap),
    Long(LongMap),
    ObjToDouble(ObjToDoubleMap),
    ObjToInt(ObjToIntMap),
    ObjToLong(ObjToLongMap),
    DoubleToObj(DoubleToObjMap),
    IntToObj(IntToObjMap),
    LongToObj(LongToObjMap),
    IntToLong(IntToLongMap),
    IntToDouble(IntToDoubleMap),
    LongToDouble(LongToDoubleMap),
}

impl MapFn {
    pub fn obj<F: Fn(Obj) -> Obj + Send + Sync + 'static>(f: F) -> Self {
        MapFn::Obj(Arc::new(move |x| Ok(f(x))))
    }

    pub fn double<F: Fn(f64) -> f64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::Double(Arc::new(move |x| Ok(f(x))))
    }

    pub fn int<F: Fn(i32) -> i32 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::Int(Arc::new(move |x| Ok(f(x))))
    }

    pub fn long<F: Fn(i64) -> i64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::Long(Arc::new(move |x| Ok(f(x))))
    }

    pub fn obj_to_double<F: Fn(Obj) -> f64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::ObjToDouble(Arc::new(move |x| Ok(f(x))))
    }

    pub fn obj_to_int<F: Fn(Obj) -> i32 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::ObjToInt(Arc::new(move |x| Ok(f(x))))
    }

    pub fn obj_to_long<F: Fn(Obj) -> i64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::ObjToLong(Arc::new(move |x| Ok(f(x))))
    }

    pub fn double_to_obj<F: Fn(f64) -> Obj + Send + Sync + 'static>(f: F) -> Self {
        MapFn::DoubleToObj(Arc::new(move |x| Ok(f(x))))
    }

    pub fn int_to_obj<F: Fn(i32) -> Obj + Send + Sync + 'static>(f: F) -> Self {
        MapFn::IntToObj(Arc::new(move |x| Ok(f(x))))
    }

    pub fn long_to_obj<F: Fn(i64) -> Obj + Send + Sync + 'static>(f: F) -> Self {
        MapFn::LongToObj(Arc::new(move |x| Ok(f(x))))
    }

    pub fn int_to_long<F: Fn(i32) -> i64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::IntToLong(Arc::new(move |x| Ok(f(x))))
    }

    pub fn int_to_double<F: Fn(i32) -> f64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::IntToDouble(Arc::new(move |x| Ok(f(x))))
    }

    pub fn long_to_double<F: Fn(i64) -> f64 + Send + Sync + 'static>(f: F) -> Self {
        MapFn::LongToDouble(Arc::new(move |x| Ok(f(x))))
    }

    pub fn try_double<F>(f: F) -> Self
    where
        F: Fn(f64) -> Result<f64, OpError> + Send + Sync + 'static,
    {
        MapFn::Double(Arc::new(f))
    }

    pub fn try_obj<F>(f: F) -> Self
    where
        F: Fn(Obj) -> Result<Obj, OpError> + Send + Sync + 'static,
    {
        MapFn::Obj(Arc::new(f))
    }

    pub fn input_kind(&self) -> Kind {
        match self {
            MapFn::Obj(_) | MapFn::ObjToDouble(_) | MapFn::ObjToInt(_) | MapFn::ObjToLong(_) => {
                Kind::Obj
            }
            MapFn::Double(_) | MapFn::DoubleToObj(_) => Kind::Double,
            MapFn::Int(_)
            | MapFn::IntToObj(_)
            | MapFn::IntToLong(_)
            | MapFn::IntToDouble(_) => Kind::Int,
            MapFn::Long(_) | MapFn::LongToObj(_) | MapFn::LongToDouble(_) => Kind::Long,
        }
    }

    pub fn output_kind(&self) -> Kind {
        match self {
            MapFn::Obj(_) | MapFn::DoubleToObj(_) | MapFn::IntToObj(_) | MapFn::LongToObj(_) => {
                Kind::Obj
            }
            MapFn::Double(_)
            | MapFn::ObjToDouble(_)
            | MapFn::IntToDouble(_)
            | MapFn::LongToDouble(_) => Kind::Double,
            MapFn::Int(_) | MapFn::ObjToInt(_) => Kind::Int,
            MapFn::Long(_) | MapFn::ObjToLong(_) | MapFn::IntToLong(_) => Kind::Long,
        }
    }

    /// Compose `first` then `second`. Returns `None` when the kinds do not
    /// chain, or when the composite (input, output) pair has no variant
    /// (e.g. double→int).
    pub fn compose(first: &MapFn, second: &MapFn) -> Option<MapFn> {
        if first.output_kind() != second.input_kind() {
            return None;
        }
        let (f, g) = (first.clone(), second.clone());
        MapFn::from_cell_fn(
            first.input_kind(),
            second.output_kind(),
            move |cell| g.apply_cell(f.apply_cell(cell)?),
        )
    }

    /// Apply to a cell of the matching input kind.
    pub(crate) fn apply_cell(&self, cell: Cell) -> Result<Cell, OpError> {
        match (self, cell) {
            (MapFn::Obj(f), Cell::Obj(x)) => f(x).map(Cell::Obj),
            (MapFn::Double(f), Cell::Double(x)) => f(x).map(Cell::Double),
            (MapFn::Int(f), Cell::Int(x)) => f(x).map(Cell::Int),
            (MapFn::Long(f), Cell::Long(x)) => f(x).map(Cell::Long),
            (MapFn::ObjToDouble(f), Cell::Obj(x)) => f(x).map(Cell::Double),
            (MapFn::ObjToInt(f), Cell::Obj(x)) => f(x).map(Cell::Int),
            (MapFn::ObjToLong(f), Cell::Obj(x)) => f(x).map(Cell::Long),
            (MapFn::DoubleToObj(f), Cell::Double(x)) => f(x).map(Cell::Obj),
            (MapFn::IntToObj(f), Cell::Int(x)) => f(x).map(Cell::Obj),
            (MapFn::LongToObj(f), Cell::Long(x)) => f(x).map(Cell::Obj),
            (MapFn::IntToLong(f), Cell::Int(x)) => f(x).map(Cell::Long),
            (MapFn::IntToDouble(f), Cell::Int(x)) => f(x).map(Cell::Double),
            (MapFn::LongToDouble(f), Cell::Long(x)) => f(x).map(Cell::Double),
            _ => Err(OpError::new("element kind does not match map function")),
        }
    }

    /// Wrap a cell-level function into the variant for (input, output),
    /// if one exists.
    fn from_cell_fn<F>(input: Kind, output: Kind, f: F) -> Option<MapFn>
    where
        F: Fn(Cell) -> Result<Cell, OpError> + Send + Sync + 'static,
    {
        let f: CellFn = Arc::new(f);
        match (input, output) {
            (Kind::Obj, Kind::Obj) => Some(MapFn::Obj(Arc::new(move |x| {
                unwrap_obj(f(Cell::Obj(x))?)
            }))),
            (Kind::Obj, Kind::Double) => Some(MapFn::ObjToDouble(Arc::new(move |x| {
                unwrap_double(f(Cell::Obj(x))?)
            }))),
            (Kind::Obj, Kind::Int) => Some(MapFn::ObjToInt(Arc::new(move |x| {
                unwrap_int(f(Cell::Obj(x))?)
            }))),
            (Kind::Obj, Kind::Long) => Some(MapFn::ObjToLong(Arc::new(move |x| {
                unwrap_long(f(Cell::Obj(x))?)
            }))),
            (Kind::Double, Kind::Double) => Some(MapFn::Double(Arc::new(move |x| {
                unwrap_double(f(Cell::Double(x))?)
            }))),
            (Kind::Double, Kind::Obj) => Some(MapFn::DoubleToObj(Arc::new(move |x| {
                unwrap_obj(f(Cell::Double(x))?)
            }))),
            (Kind::Int, Kind::Int) => Some(MapFn::Int(Arc::new(move |x| {
                unwrap_int(f(Cell::Int(x))?)
            }))),
            (Kind::Int, Kind::Obj) => Some(MapFn::IntToObj(Arc::new(move |x| {
                unwrap_obj(f(Cell::Int(x))?)
            }))),
            (Kind::Int, Kind::Long) => Some(MapFn::IntToLong(Arc::new(move |x| {
                unwrap_long(f(Cell::Int(x))?)
            }))),
            (Kind::Int, Kind::Double) => Some(MapFn::IntToDouble(Arc::new(move |x| {
                unwrap_double(f(Cell::Int(x))?)
            }))),
            (Kind::Long, Kind::Long) => Some(MapFn::Long(Arc::new(move |x| {
                unwrap_long(f(Cell::Long(x))?)
            }))),
            (Kind::Long, Kind::Obj) => Some(MapFn::LongToObj(Arc::new(move |x| {
                unwrap_obj(f(Cell::Long(x))?)
            }))),
            (Kind::Long, Kind::Double) => Some(MapFn::LongToDouble(Arc::new(move |x| {
                unwrap_double(f(Cell::Long(x))?)
            }))),
            _ => None,
        }
    }
}

impl fmt::Debug for MapFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapFn<{} -> {}>", self.input_kind(), self.output_kind())
    }
}

fn unwrap_obj(cell: Cell) -> Result<Obj, OpError> {
    match cell {
        Cell::Obj(x) => Ok(x),
        _ => Err(OpError::new("kind drift in fused map")),
    }
}

fn unwrap_double(cell: Cell) -> Result<f64, OpError> {
    match cell {
        Cell::Double(x) => Ok(x),
        _ => Err(OpError::new("kind drift in fused map")),
    }
}

fn unwrap_int(cell: Cell) -> Result<i32, OpError> {
    match cell {
        Cell::Int(x) => Ok(x),
        _ => Err(OpError::new("kind drift in fused map")),
    }
}

fn unwrap_long(cell: Cell) -> Result<i64, OpError> {
    match cell {
        Cell::Long(x) => Ok(x),
        _ => Err(OpError::new("kind drift in fused map")),
    }
}

type ObjCmpFn = Arc<dyn Fn(&Obj, &Obj) -> Ordering + Send + Sync>;
type DoubleCmpFn = Arc<dyn Fn(f64, f64) -> Ordering + Send + Sync>;
type IntCmpFn = Arc<dyn Fn(i32, i32) -> Ordering + Send + Sync>;
type LongCmpFn = Arc<dyn Fn(i64, i64) -> Ordering + Send + Sync>;

/// Per-kind ordering. Primitive lanes fall back to natural order when no
/// comparator is given; object lanes always require one.
#[derive(Clone)]
pub enum Comparator {
    Obj(ObjCmpFn),
    Double(DoubleCmpFn),
    Int(IntCmpFn),
    Long(LongCmpFn),
}

impl Comparator {
    pub fn obj<F: Fn(&Obj, &Obj) -> Ordering + Send + Sync + 'static>(f: F) -> Self {
        Comparator::Obj(Arc::new(f))
    }

    pub fn double<F: Fn(f64, f64) -> Ordering + Send + Sync + 'static>(f: F) -> Self {
        Comparator::Double(Arc::new(f))
    }

    pub fn int<F: Fn(i32, i32) -> Ordering + Send + Sync + 'static>(f: F) -> Self {
        Comparator::Int(Arc::new(f))
    }

    pub fn long<F: Fn(i64, i64) -> Ordering + Send + Sync + 'static>(f: F) -> Self {
        Comparator::Long(Arc::new(f))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Comparator::Obj(_) => Kind::Obj,
            Comparator::Double(_) => Kind::Double,
            Comparator::Int(_) => Kind::Int,
            Comparator::Long(_) => Kind::Long,
        }
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comparator<{}>", self.kind())
    }
}

type ObjFlatFn = Arc<dyn Fn(Obj) -> Result<Vec<Obj>, OpError> + Send + Sync>;
type DoubleFlatFn = Arc<dyn Fn(f64) -> Result<Vec<f64>, OpError> + Send + Sync>;
type IntFlatFn = Arc<dyn Fn(i32) -> Result<Vec<i32>, OpError> + Send + Sync>;
type LongFlatFn = Arc<dyn Fn(i64) -> Result<Vec<i64>, OpError> + Send + Sync>;

/// Per-kind one-to-many expansion (kind preserving)
#[derive(Clone)]
pub enum FlatMapFn {
    Obj(ObjFlatFn),
    Double(DoubleFlatFn),
    Int(IntFlatFn),
    Long(LongFlatFn),
}

impl FlatMapFn {
    pub fn obj<F: Fn(Obj) -> Vec<Obj> + Send + Sync + 'static>(f: F) -> Self {
        FlatMapFn::Obj(Arc::new(move |x| Ok(f(x))))
    }

    pub fn double<F: Fn(f64) -> Vec<f64> + Send + Sync + 'static>(f: F) -> Self {
        FlatMapFn::Double(Arc::new(move |x| Ok(f(x))))
    }

    pub fn int<F: Fn(i32) -> Vec<i32> + Send + Sync + 'static>(f: F) -> Self {
        FlatMapFn::Int(Arc::new(move |x| Ok(f(x))))
    }

    pub fn long<F: Fn(i64) -> Vec<i64> + Send + Sync + 'static>(f: F) -> Self {
        FlatMapFn::Long(Arc::new(move |x| Ok(f(x))))
    }

    pub fn kind(&self) -> Kind {
        match self {
            FlatMapFn::Obj(_) => Kind::Obj,
            FlatMapFn::Double(_) => Kind::Double,
            FlatMapFn::Int(_) => Kind::Int,
            FlatMapFn::Long(_) => Kind::Long,
        }
    }
}

impl fmt::Debug for FlatMapFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlatMapFn<{}>", self.kind())
    }
}

type ObjCombineFn = Arc<dyn Fn(Obj, Obj) -> Result<Obj, OpError> + Send + Sync>;
type DoubleCombineFn = Arc<dyn Fn(f64, f64) -> Result<f64, OpError> + Send + Sync>;
type IntCombineFn = Arc<dyn Fn(i32, i32) -> Result<i32, OpError> + Send + Sync>;
type LongCombineFn = Arc<dyn Fn(i64, i64) -> Result<i64, OpError> + Send + Sync>;

/// Per-kind binary reduce operator. Must be associative for the parallel
/// merge to agree with sequential execution.
#[derive(Clone)]
pub enum Combiner {
    Obj(ObjCombineFn),
    Double(DoubleCombineFn),
    Int(IntCombineFn),
    Long(LongCombineFn),
}

impl Combiner {
    pub fn obj<F: Fn(Obj, Obj) -> Obj + Send + Sync + 'static>(f: F) -> Self {
        Combiner::Obj(Arc::new(move |a, b| Ok(f(a, b))))
    }

    pub fn double<F: Fn(f64, f64) -> f64 + Send + Sync + 'static>(f: F) -> Self {
        Combiner::Double(Arc::new(move |a, b| Ok(f(a, b))))
    }

    pub fn int<F: Fn(i32, i32) -> i32 + Send + Sync + 'static>(f: F) -> Self {
        Combiner::Int(Arc::new(move |a, b| Ok(f(a, b))))
    }

    pub fn long<F: Fn(i64, i64) -> i64 + Send + Sync + 'static>(f: F) -> Self {
        Combiner::Long(Arc::new(move |a, b| Ok(f(a, b))))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Combiner::Obj(_) => Kind::Obj,
            Combiner::Double(_) => Kind::Double,
            Combiner::Int(_) => Kind::Int,
            Combiner::Long(_) => Kind::Long,
        }
    }
}

impl fmt::Debug for Combiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Combiner<{}>", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::obj;

    #[test]
    fn test_predicate_and_short_circuits_left_to_right() {
        let p = Predicate::double(|x| x > 0.0);
        let q = Predicate::try_double(|x| {
            if x < 0.0 {
                Err(OpError::new("negative"))
            } else {
                Ok(x > 10.0)
            }
        });
        let fused = p.and(&q).unwrap();
        match fused {
            Predicate::Double(f) => {
                // Left predicate rejects -1.0 before the fallible right runs.
                assert_eq!(f(-1.0).unwrap(), false);
                assert_eq!(f(20.0).unwrap(), true);
                assert_eq!(f(5.0).unwrap(), false);
            }
            _ => panic!("fused predicate changed kind"),
        }
    }

    #[test]
    fn test_predicate_and_rejects_kind_mismatch() {
        let p = Predicate::double(|x| x > 0.0);
        let q = Predicate::int(|x| x > 0);
        assert!(p.and(&q).is_none());
    }

    #[test]
    fn test_map_compose_same_kind() {
        let f = MapFn::double(|x| x + 1.0);
        let g = MapFn::double(|x| x * 2.0);
        let fused = MapFn::compose(&f, &g).unwrap();
        match fused {
            MapFn::Double(h) => assert_eq!(h(3.0).unwrap(), 8.0),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_map_compose_through_obj() {
        // int -> obj -> long composes to the int->long variant
        let f = MapFn::int_to_obj(|x| obj(x));
        let g = MapFn::obj_to_long(|o| *o.downcast_ref::<i32>().unwrap() as i64);
        let fused = MapFn::compose(&f, &g).unwrap();
        assert_eq!(fused.input_kind(), Kind::Int);
        assert_eq!(fused.output_kind(), Kind::Long);
        match fused {
            MapFn::IntToLong(h) => assert_eq!(h(7).unwrap(), 7),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_map_compose_unrepresentable_pair() {
        // double -> obj -> int would need a double->int variant
        let f = MapFn::double_to_obj(|x| obj(x));
        let g = MapFn::obj_to_int(|o| *o.downcast_ref::<f64>().unwrap() as i32);
        assert!(MapFn::compose(&f, &g).is_none());
    }

    #[test]
    fn test_map_compose_disconnected_kinds() {
        let f = MapFn::double(|x| x);
        let g = MapFn::int(|x| x);
        assert!(MapFn::compose(&f, &g).is_none());
    }
}
