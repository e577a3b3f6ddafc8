//! Execution engine
//!
//! Realizes a sealed pipeline against a concrete backing source. Sequential
//! mode threads one element at a time through per-kind lazy lanes, so
//! short-circuiting terminals stop pulling the instant they are satisfied.
//! Parallel mode materializes the source, partitions it, evaluates the
//! chain per partition on rayon, and merges partial terminal results under
//! the terminal's combine operation.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, instrument, trace};

use crate::error::{Error, OpError, Result};
use crate::node::{Stage, Terminal};
use crate::ops::{Combiner, Comparator, MapFn, Predicate};
use crate::pipeline::Pipeline;
use crate::types::{Batch, Kind, NodeId, Obj, OpCategory, Outcome, TerminalState};

type SrcIter<T> = Box<dyn Iterator<Item = Result<T, OpError>> + Send>;

enum Feed {
    Obj(SrcIter<Obj>),
    Double(SrcIter<f64>),
    Int(SrcIter<i32>),
    Long(SrcIter<i64>),
}

/// A concrete backing sequence, supplied at execution time. The pipeline
/// core is agnostic to where elements originate; generators may block on
/// external collaborators when pulled.
pub struct DataSource {
    feed: Feed,
    bounded: bool,
}

impl DataSource {
    pub fn kind(&self) -> Kind {
        match &self.feed {
            Feed::Obj(_) => Kind::Obj,
            Feed::Double(_) => Kind::Double,
            Feed::Int(_) => Kind::Int,
            Feed::Long(_) => Kind::Long,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.bounded
    }

    pub fn from_batch(batch: Batch) -> Self {
        let feed = match batch {
            Batch::Obj(v) => Feed::Obj(Box::new(v.into_iter().map(Ok))),
            Batch::Double(v) => Feed::Double(Box::new(v.into_iter().map(Ok))),
            Batch::Int(v) => Feed::Int(Box::new(v.into_iter().map(Ok))),
            Batch::Long(v) => Feed::Long(Box::new(v.into_iter().map(Ok))),
        };
        Self { feed, bounded: true }
    }

    pub fn objs(items: Vec<Obj>) -> Self {
        Self::from_batch(Batch::Obj(items))
    }

    pub fn doubles(items: Vec<f64>) -> Self {
        Self::from_batch(Batch::Double(items))
    }

    pub fn ints(items: Vec<i32>) -> Self {
        Self::from_batch(Batch::Int(items))
    }

    pub fn longs(items: Vec<i64>) -> Self {
        Self::from_batch(Batch::Long(items))
    }

    /// A possibly unbounded generator. Only sequential execution accepts
    /// these; parallel mode needs to materialize the whole source.
    pub fn generator_doubles(iter: impl Iterator<Item = f64> + Send + 'static) -> Self {
        Self {
            feed: Feed::Double(Box::new(iter.map(Ok))),
            bounded: false,
        }
    }

    pub fn generator_ints(iter: impl Iterator<Item = i32> + Send + 'static) -> Self {
        Self {
            feed: Feed::Int(Box::new(iter.map(Ok))),
            bounded: false,
        }
    }

    pub fn generator_longs(iter: impl Iterator<Item = i64> + Send + 'static) -> Self {
        Self {
            feed: Feed::Long(Box::new(iter.map(Ok))),
            bounded: false,
        }
    }

    pub fn generator_objs(iter: impl Iterator<Item = Obj> + Send + 'static) -> Self {
        Self {
            feed: Feed::Obj(Box::new(iter.map(Ok))),
            bounded: false,
        }
    }

    /// A bounded source whose pulls can fail (e.g. backed by I/O).
    pub fn try_doubles(
        iter: impl Iterator<Item = Result<f64, OpError>> + Send + 'static,
    ) -> Self {
        Self {
            feed: Feed::Double(Box::new(iter)),
            bounded: true,
        }
    }

    pub fn try_objs(iter: impl Iterator<Item = Result<Obj, OpError>> + Send + 'static) -> Self {
        Self {
            feed: Feed::Obj(Box::new(iter)),
            bounded: true,
        }
    }

    /// Materialize the whole source, failing fast on a pull error.
    fn drain(self) -> Result<Batch> {
        let tag = op_err(OpCategory::Source);
        match self.feed {
            Feed::Obj(it) => it
                .collect::<Result<Vec<_>, OpError>>()
                .map(Batch::Obj)
                .map_err(tag),
            Feed::Double(it) => it
                .collect::<Result<Vec<_>, OpError>>()
                .map(Batch::Double)
                .map_err(tag),
            Feed::Int(it) => it
                .collect::<Result<Vec<_>, OpError>>()
                .map(Batch::Int)
                .map_err(tag),
            Feed::Long(it) => it
                .collect::<Result<Vec<_>, OpError>>()
                .map(Batch::Long)
                .map_err(tag),
        }
    }
}

/// Cooperative cancellation shared by partition workers. Checked between
/// element pulls; once set, no new work is scheduled, though in-flight
/// partition work may still complete (its results are discarded on merge).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

/// Stop signals shared by the workers of one parallel run. The token halts
/// every partition (errors, anyMatch hits). `first_hit` carries the lowest
/// partition index that found a findFirst element and halts only partitions
/// later in source order, so an earlier partition can still produce the
/// globally first match.
#[derive(Clone)]
struct PartitionSignal {
    token: CancelToken,
    first_hit: Arc<AtomicUsize>,
    index: usize,
}

impl PartitionSignal {
    fn should_stop(&self) -> bool {
        self.token.is_cancelled() || self.first_hit.load(AtomicOrdering::Relaxed) < self.index
    }

    fn halt_all(&self) {
        self.token.cancel();
    }

    fn record_hit(&self) {
        self.first_hit.fetch_min(self.index, AtomicOrdering::Relaxed);
    }
}

/// Pluggable partitioning strategy for parallel execution.
pub trait Partitioner: Send + Sync {
    fn partition(&self, batch: Batch, parts: usize) -> Vec<Batch>;
}

/// Default strategy: contiguous chunks in source order, at most `parts` of
/// them. Keeping chunks contiguous makes the in-order merge deterministic.
pub struct ChunkPartitioner;

impl Partitioner for ChunkPartitioner {
    fn partition(&self, batch: Batch, parts: usize) -> Vec<Batch> {
        match batch {
            Batch::Obj(v) => chunked(v, parts).into_iter().map(Batch::Obj).collect(),
            Batch::Double(v) => chunked(v, parts).into_iter().map(Batch::Double).collect(),
            Batch::Int(v) => chunked(v, parts).into_iter().map(Batch::Int).collect(),
            Batch::Long(v) => chunked(v, parts).into_iter().map(Batch::Long).collect(),
        }
    }
}

fn chunked<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = items.len().div_ceil(parts.max(1));
    let mut out = Vec::new();
    let mut it = items.into_iter();
    loop {
        let chunk: Vec<T> = it.by_ref().take(size).collect();
        if chunk.is_empty() {
            break;
        }
        out.push(chunk);
    }
    out
}

type LaneIter<T> = Box<dyn Iterator<Item = Result<T>>>;

/// A kind-specialized lazy element stream. Primitive items flow unboxed.
enum Lane {
    Obj(LaneIter<Obj>),
    Double(LaneIter<f64>),
    Int(LaneIter<i32>),
    Long(LaneIter<i64>),
}

impl Lane {
    fn kind(&self) -> Kind {
        match self {
            Lane::Obj(_) => Kind::Obj,
            Lane::Double(_) => Kind::Double,
            Lane::Int(_) => Kind::Int,
            Lane::Long(_) => Kind::Long,
        }
    }

    fn from_feed(feed: Feed) -> Lane {
        let tag = op_err(OpCategory::Source);
        match feed {
            Feed::Obj(it) => Lane::Obj(Box::new(it.map(move |r| r.map_err(tag)))),
            Feed::Double(it) => Lane::Double(Box::new(it.map(move |r| r.map_err(tag)))),
            Feed::Int(it) => Lane::Int(Box::new(it.map(move |r| r.map_err(tag)))),
            Feed::Long(it) => Lane::Long(Box::new(it.map(move |r| r.map_err(tag)))),
        }
    }

    /// Partition lane: yields nothing further once its stop signal fires.
    fn from_batch(batch: Batch, signal: PartitionSignal) -> Lane {
        match batch {
            Batch::Obj(v) => Lane::Obj(cancellable(v, signal)),
            Batch::Double(v) => Lane::Double(cancellable(v, signal)),
            Batch::Int(v) => Lane::Int(cancellable(v, signal)),
            Batch::Long(v) => Lane::Long(cancellable(v, signal)),
        }
    }
}

fn cancellable<T: 'static>(items: Vec<T>, signal: PartitionSignal) -> LaneIter<T> {
    let mut it = items.into_iter();
    Box::new(std::iter::from_fn(move || {
        if signal.should_stop() {
            return None;
        }
        it.next().map(Ok)
    }))
}

fn op_err(category: OpCategory) -> impl Fn(OpError) -> Error + Copy {
    move |source| Error::Op { category, source }
}

fn filter_items<T: 'static>(
    it: LaneIter<T>,
    p: impl Fn(&T) -> Result<bool, OpError> + 'static,
) -> LaneIter<T> {
    Box::new(it.filter_map(move |r| match r {
        Ok(x) => match p(&x) {
            Ok(true) => Some(Ok(x)),
            Ok(false) => None,
            Err(e) => Some(Err(op_err(OpCategory::Filter)(e))),
        },
        Err(e) => Some(Err(e)),
    }))
}

fn map_items<T: 'static, U: 'static>(
    it: LaneIter<T>,
    f: impl Fn(T) -> Result<U, OpError> + 'static,
) -> LaneIter<U> {
    Box::new(it.map(move |r| r.and_then(|x| f(x).map_err(op_err(OpCategory::Map)))))
}

fn limit_items<T: 'static>(it: LaneIter<T>, n: u64) -> LaneIter<T> {
    let mut it = it;
    let mut taken = 0u64;
    Box::new(std::iter::from_fn(move || {
        if taken >= n {
            return None;
        }
        match it.next()? {
            Ok(x) => {
                taken += 1;
                Some(Ok(x))
            }
            Err(e) => Some(Err(e)),
        }
    }))
}

fn skip_items<T: 'static>(it: LaneIter<T>, n: u64) -> LaneIter<T> {
    let mut it = it;
    let mut skipped = 0u64;
    Box::new(std::iter::from_fn(move || loop {
        match it.next()? {
            Ok(_) if skipped < n => skipped += 1,
            other => return Some(other),
        }
    }))
}

fn flat_items<T: 'static>(
    it: LaneIter<T>,
    f: impl Fn(T) -> Result<Vec<T>, OpError> + 'static,
) -> LaneIter<T> {
    Box::new(it.flat_map(move |r| match r {
        Ok(x) => match f(x) {
            Ok(many) => many.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(op_err(OpCategory::FlatMap)(e))],
        },
        Err(e) => vec![Err(e)],
    }))
}

fn collect_items<T>(it: LaneIter<T>) -> Result<Vec<T>> {
    it.collect()
}

fn replay<T: 'static>(items: Vec<T>) -> LaneIter<T> {
    Box::new(items.into_iter().map(Ok))
}

fn lane_mismatch(expected: Kind, lane: &Lane, at: OpCategory) -> Error {
    Error::KindMismatch {
        expected,
        found: lane.kind(),
        at,
    }
}

fn apply_stage(lane: Lane, stage: &Stage) -> Result<Lane> {
    match stage {
        Stage::Filter(pred) => match (lane, pred) {
            (Lane::Obj(it), Predicate::Obj(p)) => {
                let p = p.clone();
                Ok(Lane::Obj(filter_items(it, move |x| p(x))))
            }
            (Lane::Double(it), Predicate::Double(p)) => {
                let p = p.clone();
                Ok(Lane::Double(filter_items(it, move |x| p(*x))))
            }
            (Lane::Int(it), Predicate::Int(p)) => {
                let p = p.clone();
                Ok(Lane::Int(filter_items(it, move |x| p(*x))))
            }
            (Lane::Long(it), Predicate::Long(p)) => {
                let p = p.clone();
                Ok(Lane::Long(filter_items(it, move |x| p(*x))))
            }
            (lane, pred) => Err(lane_mismatch(pred.kind(), &lane, OpCategory::Filter)),
        },
        Stage::Map(map) => apply_map(lane, map),
        Stage::Sorted(cmp) => apply_sorted(lane, cmp.as_ref()),
        Stage::Limit(n) => Ok(match lane {
            Lane::Obj(it) => Lane::Obj(limit_items(it, *n)),
            Lane::Double(it) => Lane::Double(limit_items(it, *n)),
            Lane::Int(it) => Lane::Int(limit_items(it, *n)),
            Lane::Long(it) => Lane::Long(limit_items(it, *n)),
        }),
        Stage::Skip(n) => Ok(match lane {
            Lane::Obj(it) => Lane::Obj(skip_items(it, *n)),
            Lane::Double(it) => Lane::Double(skip_items(it, *n)),
            Lane::Int(it) => Lane::Int(skip_items(it, *n)),
            Lane::Long(it) => Lane::Long(skip_items(it, *n)),
        }),
        Stage::FlatMap(f) => match (lane, f) {
            (Lane::Obj(it), crate::ops::FlatMapFn::Obj(f)) => {
                let f = f.clone();
                Ok(Lane::Obj(flat_items(it, move |x| f(x))))
            }
            (Lane::Double(it), crate::ops::FlatMapFn::Double(f)) => {
                let f = f.clone();
                Ok(Lane::Double(flat_items(it, move |x| f(x))))
            }
            (Lane::Int(it), crate::ops::FlatMapFn::Int(f)) => {
                let f = f.clone();
                Ok(Lane::Int(flat_items(it, move |x| f(x))))
            }
            (Lane::Long(it), crate::ops::FlatMapFn::Long(f)) => {
                let f = f.clone();
                Ok(Lane::Long(flat_items(it, move |x| f(x))))
            }
            (lane, f) => Err(lane_mismatch(f.kind(), &lane, OpCategory::FlatMap)),
        },
    }
}

fn apply_map(lane: Lane, map: &MapFn) -> Result<Lane> {
    match (lane, map) {
        (Lane::Obj(it), MapFn::Obj(f)) => {
            let f = f.clone();
            Ok(Lane::Obj(map_items(it, move |x| f(x))))
        }
        (Lane::Double(it), MapFn::Double(f)) => {
            let f = f.clone();
            Ok(Lane::Double(map_items(it, move |x| f(x))))
        }
        (Lane::Int(it), MapFn::Int(f)) => {
            let f = f.clone();
            Ok(Lane::Int(map_items(it, move |x| f(x))))
        }
        (Lane::Long(it), MapFn::Long(f)) => {
            let f = f.clone();
            Ok(Lane::Long(map_items(it, move |x| f(x))))
        }
        (Lane::Obj(it), MapFn::ObjToDouble(f)) => {
            let f = f.clone();
            Ok(Lane::Double(map_items(it, move |x| f(x))))
        }
        (Lane::Obj(it), MapFn::ObjToInt(f)) => {
            let f = f.clone();
            Ok(Lane::Int(map_items(it, move |x| f(x))))
        }
        (Lane::Obj(it), MapFn::ObjToLong(f)) => {
            let f = f.clone();
            Ok(Lane::Long(map_items(it, move |x| f(x))))
        }
        (Lane::Double(it), MapFn::DoubleToObj(f)) => {
            let f = f.clone();
            Ok(Lane::Obj(map_items(it, move |x| f(x))))
        }
        (Lane::Int(it), MapFn::IntToObj(f)) => {
            let f = f.clone();
            Ok(Lane::Obj(map_items(it, move |x| f(x))))
        }
        (Lane::Long(it), MapFn::LongToObj(f)) => {
            let f = f.clone();
            Ok(Lane::Obj(map_items(it, move |x| f(x))))
        }
        (Lane::Int(it), MapFn::IntToLong(f)) => {
            let f = f.clone();
            Ok(Lane::Long(map_items(it, move |x| f(x))))
        }
        (Lane::Int(it), MapFn::IntToDouble(f)) => {
            let f = f.clone();
            Ok(Lane::Double(map_items(it, move |x| f(x))))
        }
        (Lane::Long(it), MapFn::LongToDouble(f)) => {
            let f = f.clone();
            Ok(Lane::Double(map_items(it, move |x| f(x))))
        }
        (lane, map) => Err(lane_mismatch(map.input_kind(), &lane, OpCategory::Map)),
    }
}

fn apply_sorted(lane: Lane, cmp: Option<&Comparator>) -> Result<Lane> {
    match lane {
        Lane::Obj(it) => {
            let Some(Comparator::Obj(c)) = cmp else {
                return Err(Error::ComparatorRequired {
                    category: OpCategory::Sorted,
                    kind: Kind::Obj,
                });
            };
            let c = c.clone();
            let mut items = collect_items(it)?;
            items.sort_by(move |a, b| c(a, b));
            Ok(Lane::Obj(replay(items)))
        }
        Lane::Double(it) => {
            let mut items = collect_items(it)?;
            match cmp {
                None => items.sort_by(f64::total_cmp),
                Some(Comparator::Double(c)) => {
                    let c = c.clone();
                    items.sort_by(move |a, b| c(*a, *b));
                }
                Some(other) => {
                    return Err(Error::KindMismatch {
                        expected: other.kind(),
                        found: Kind::Double,
                        at: OpCategory::Sorted,
                    })
                }
            }
            Ok(Lane::Double(replay(items)))
        }
        Lane::Int(it) => {
            let mut items = collect_items(it)?;
            match cmp {
                None => items.sort_unstable(),
                Some(Comparator::Int(c)) => {
                    let c = c.clone();
                    items.sort_by(move |a, b| c(*a, *b));
                }
                Some(other) => {
                    return Err(Error::KindMismatch {
                        expected: other.kind(),
                        found: Kind::Int,
                        at: OpCategory::Sorted,
                    })
                }
            }
            Ok(Lane::Int(replay(items)))
        }
        Lane::Long(it) => {
            let mut items = collect_items(it)?;
            match cmp {
                None => items.sort_unstable(),
                Some(Comparator::Long(c)) => {
                    let c = c.clone();
                    items.sort_by(move |a, b| c(*a, *b));
                }
                Some(other) => {
                    return Err(Error::KindMismatch {
                        expected: other.kind(),
                        found: Kind::Long,
                        at: OpCategory::Sorted,
                    })
                }
            }
            Ok(Lane::Long(replay(items)))
        }
    }
}

/// Per-partition terminal result. Everything but average merges in its
/// final `Outcome` shape.
enum Partial {
    Done(Outcome),
    Avg { sum: f64, n: u64 },
}

fn any_match_items<T>(
    it: LaneIter<T>,
    p: impl Fn(&T) -> Result<bool, OpError>,
) -> Result<bool> {
    for r in it {
        let x = r?;
        if p(&x).map_err(op_err(OpCategory::AnyMatch))? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn count_items<T>(it: LaneIter<T>) -> Result<u64> {
    let mut n = 0;
    for r in it {
        r?;
        n += 1;
    }
    Ok(n)
}

fn best_items<T>(
    it: LaneIter<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
    want_max: bool,
) -> Result<Option<T>> {
    let mut best: Option<T> = None;
    for r in it {
        let x = r?;
        best = Some(match best {
            None => x,
            Some(b) => {
                if keep_challenger(cmp(&x, &b), want_max) {
                    x
                } else {
                    b
                }
            }
        });
    }
    Ok(best)
}

fn keep_challenger(ord: Ordering, want_max: bool) -> bool {
    match ord {
        Ordering::Less => !want_max,
        Ordering::Greater => want_max,
        Ordering::Equal => false,
    }
}

fn reduce_items<T>(
    it: LaneIter<T>,
    f: impl Fn(T, T) -> Result<T, OpError>,
) -> Result<Option<T>> {
    let mut acc: Option<T> = None;
    for r in it {
        let x = r?;
        acc = Some(match acc {
            None => x,
            Some(a) => f(a, x).map_err(op_err(OpCategory::Reduce))?,
        });
    }
    Ok(acc)
}

fn first_item<T>(mut it: LaneIter<T>) -> Result<Option<T>> {
    match it.next() {
        None => Ok(None),
        Some(r) => r.map(Some),
    }
}

fn eval_terminal(
    terminal: &Terminal,
    lane: Lane,
    signal: Option<&PartitionSignal>,
) -> Result<Partial> {
    match terminal {
        Terminal::AnyMatch(pred) => {
            let found = match (lane, pred) {
                (Lane::Obj(it), Predicate::Obj(p)) => any_match_items(it, |x| p(x))?,
                (Lane::Double(it), Predicate::Double(p)) => any_match_items(it, |x| p(*x))?,
                (Lane::Int(it), Predicate::Int(p)) => any_match_items(it, |x| p(*x))?,
                (Lane::Long(it), Predicate::Long(p)) => any_match_items(it, |x| p(*x))?,
                (lane, pred) => {
                    return Err(lane_mismatch(pred.kind(), &lane, OpCategory::AnyMatch))
                }
            };
            if found {
                if let Some(s) = signal {
                    s.halt_all();
                }
            }
            Ok(Partial::Done(Outcome::Bool(found)))
        }
        Terminal::Count => {
            let n = match lane {
                Lane::Obj(it) => count_items(it)?,
                Lane::Double(it) => count_items(it)?,
                Lane::Int(it) => count_items(it)?,
                Lane::Long(it) => count_items(it)?,
            };
            Ok(Partial::Done(Outcome::Count(n)))
        }
        Terminal::Sum => match lane {
            Lane::Double(it) => {
                let mut sum = 0.0;
                for r in it {
                    sum += r?;
                }
                Ok(Partial::Done(Outcome::Double(sum)))
            }
            Lane::Int(it) => {
                let mut sum = 0i64;
                for r in it {
                    sum += i64::from(r?);
                }
                Ok(Partial::Done(Outcome::Long(sum)))
            }
            Lane::Long(it) => {
                let mut sum = 0i64;
                for r in it {
                    sum += r?;
                }
                Ok(Partial::Done(Outcome::Long(sum)))
            }
            Lane::Obj(_) => Err(Error::UnsupportedTerminal {
                terminal: OpCategory::Sum,
                kind: Kind::Obj,
            }),
        },
        Terminal::Average => {
            let (mut sum, mut n) = (0.0, 0u64);
            match lane {
                Lane::Double(it) => {
                    for r in it {
                        sum += r?;
                        n += 1;
                    }
                }
                Lane::Int(it) => {
                    for r in it {
                        sum += f64::from(r?);
                        n += 1;
                    }
                }
                Lane::Long(it) => {
                    for r in it {
                        sum += r? as f64;
                        n += 1;
                    }
                }
                Lane::Obj(_) => {
                    return Err(Error::UnsupportedTerminal {
                        terminal: OpCategory::Average,
                        kind: Kind::Obj,
                    })
                }
            }
            Ok(Partial::Avg { sum, n })
        }
        Terminal::Min(cmp) | Terminal::Max(cmp) => {
            let want_max = matches!(terminal, Terminal::Max(_));
            let outcome = match lane {
                Lane::Obj(it) => {
                    let Some(Comparator::Obj(c)) = cmp else {
                        return Err(Error::ComparatorRequired {
                            category: terminal.category(),
                            kind: Kind::Obj,
                        });
                    };
                    Outcome::MaybeObj(best_items(it, |a, b| c(a, b), want_max)?)
                }
                Lane::Double(it) => match cmp {
                    None => Outcome::MaybeDouble(best_items(it, |a, b| a.total_cmp(b), want_max)?),
                    Some(Comparator::Double(c)) => {
                        Outcome::MaybeDouble(best_items(it, |a, b| c(*a, *b), want_max)?)
                    }
                    Some(other) => {
                        return Err(Error::KindMismatch {
                            expected: other.kind(),
                            found: Kind::Double,
                            at: terminal.category(),
                        })
                    }
                },
                Lane::Int(it) => match cmp {
                    None => Outcome::MaybeInt(best_items(it, |a, b| a.cmp(b), want_max)?),
                    Some(Comparator::Int(c)) => {
                        Outcome::MaybeInt(best_items(it, |a, b| c(*a, *b), want_max)?)
                    }
                    Some(other) => {
                        return Err(Error::KindMismatch {
                            expected: other.kind(),
                            found: Kind::Int,
                            at: terminal.category(),
                        })
                    }
                },
                Lane::Long(it) => match cmp {
                    None => Outcome::MaybeLong(best_items(it, |a, b| a.cmp(b), want_max)?),
                    Some(Comparator::Long(c)) => {
                        Outcome::MaybeLong(best_items(it, |a, b| c(*a, *b), want_max)?)
                    }
                    Some(other) => {
                        return Err(Error::KindMismatch {
                            expected: other.kind(),
                            found: Kind::Long,
                            at: terminal.category(),
                        })
                    }
                },
            };
            Ok(Partial::Done(outcome))
        }
        Terminal::Collect => {
            let batch = match lane {
                Lane::Obj(it) => Batch::Obj(collect_items(it)?),
                Lane::Double(it) => Batch::Double(collect_items(it)?),
                Lane::Int(it) => Batch::Int(collect_items(it)?),
                Lane::Long(it) => Batch::Long(collect_items(it)?),
            };
            Ok(Partial::Done(Outcome::Seq(batch)))
        }
        Terminal::Reduce(comb) => {
            let outcome = match (lane, comb) {
                (Lane::Obj(it), Combiner::Obj(f)) => {
                    Outcome::MaybeObj(reduce_items(it, |a, b| f(a, b))?)
                }
                (Lane::Double(it), Combiner::Double(f)) => {
                    Outcome::MaybeDouble(reduce_items(it, |a, b| f(a, b))?)
                }
                (Lane::Int(it), Combiner::Int(f)) => {
                    Outcome::MaybeInt(reduce_items(it, |a, b| f(a, b))?)
                }
                (Lane::Long(it), Combiner::Long(f)) => {
                    Outcome::MaybeLong(reduce_items(it, |a, b| f(a, b))?)
                }
                (lane, comb) => {
                    return Err(lane_mismatch(comb.kind(), &lane, OpCategory::Reduce))
                }
            };
            Ok(Partial::Done(outcome))
        }
        Terminal::FindFirst => {
            let outcome = match lane {
                Lane::Obj(it) => Outcome::MaybeObj(first_item(it)?),
                Lane::Double(it) => Outcome::MaybeDouble(first_item(it)?),
                Lane::Int(it) => Outcome::MaybeInt(first_item(it)?),
                Lane::Long(it) => Outcome::MaybeLong(first_item(it)?),
            };
            let found = !matches!(
                outcome,
                Outcome::MaybeObj(None)
                    | Outcome::MaybeDouble(None)
                    | Outcome::MaybeInt(None)
                    | Outcome::MaybeLong(None)
            );
            // A hit here only stops partitions later in source order; an
            // earlier partition may still hold the globally first match.
            if found {
                if let Some(s) = signal {
                    s.record_hit();
                }
            }
            Ok(Partial::Done(outcome))
        }
    }
}

fn pick<T>(
    a: Option<T>,
    b: Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
    want_max: bool,
) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if keep_challenger(cmp(&y, &x), want_max) { y } else { x }),
        (x, y) => x.or(y),
    }
}

/// Merge two partition partials in partition order. The combine operation
/// per terminal is the documented one: OR for anyMatch, addition for
/// count/sum/average, comparator for min/max, first-nonempty for
/// findFirst, concatenation for collect, the caller's combiner for reduce.
fn merge_partials(terminal: &Terminal, a: Partial, b: Partial) -> Result<Partial> {
    let merged = match (terminal, a, b) {
        (Terminal::AnyMatch(_), Partial::Done(Outcome::Bool(x)), Partial::Done(Outcome::Bool(y))) => {
            Partial::Done(Outcome::Bool(x || y))
        }
        (Terminal::Count, Partial::Done(Outcome::Count(x)), Partial::Done(Outcome::Count(y))) => {
            Partial::Done(Outcome::Count(x + y))
        }
        (Terminal::Sum, Partial::Done(Outcome::Double(x)), Partial::Done(Outcome::Double(y))) => {
            Partial::Done(Outcome::Double(x + y))
        }
        (Terminal::Sum, Partial::Done(Outcome::Long(x)), Partial::Done(Outcome::Long(y))) => {
            Partial::Done(Outcome::Long(x + y))
        }
        (Terminal::Average, Partial::Avg { sum: s1, n: n1 }, Partial::Avg { sum: s2, n: n2 }) => {
            Partial::Avg {
                sum: s1 + s2,
                n: n1 + n2,
            }
        }
        (Terminal::Min(cmp), Partial::Done(x), Partial::Done(y))
        | (Terminal::Max(cmp), Partial::Done(x), Partial::Done(y)) => {
            let want_max = matches!(terminal, Terminal::Max(_));
            Partial::Done(merge_best(cmp.as_ref(), want_max, x, y))
        }
        (Terminal::Collect, Partial::Done(Outcome::Seq(mut x)), Partial::Done(Outcome::Seq(y))) => {
            x.append(y);
            Partial::Done(Outcome::Seq(x))
        }
        (Terminal::Reduce(comb), Partial::Done(x), Partial::Done(y)) => {
            Partial::Done(merge_reduced(comb, x, y)?)
        }
        (Terminal::FindFirst, Partial::Done(x), Partial::Done(y)) => Partial::Done(match (x, y) {
            (Outcome::MaybeObj(a), Outcome::MaybeObj(b)) => Outcome::MaybeObj(a.or(b)),
            (Outcome::MaybeDouble(a), Outcome::MaybeDouble(b)) => Outcome::MaybeDouble(a.or(b)),
            (Outcome::MaybeInt(a), Outcome::MaybeInt(b)) => Outcome::MaybeInt(a.or(b)),
            (Outcome::MaybeLong(a), Outcome::MaybeLong(b)) => Outcome::MaybeLong(a.or(b)),
            _ => unreachable!("findFirst partials share one kind"),
        }),
        _ => unreachable!("partition partials share the terminal's shape"),
    };
    Ok(merged)
}

fn merge_best(cmp: Option<&Comparator>, want_max: bool, a: Outcome, b: Outcome) -> Outcome {
    match (a, b, cmp) {
        (Outcome::MaybeObj(x), Outcome::MaybeObj(y), Some(Comparator::Obj(c))) => {
            Outcome::MaybeObj(pick(x, y, |a, b| c(a, b), want_max))
        }
        (Outcome::MaybeDouble(x), Outcome::MaybeDouble(y), Some(Comparator::Double(c))) => {
            Outcome::MaybeDouble(pick(x, y, |a, b| c(*a, *b), want_max))
        }
        (Outcome::MaybeDouble(x), Outcome::MaybeDouble(y), None) => {
            Outcome::MaybeDouble(pick(x, y, |a, b| a.total_cmp(b), want_max))
        }
        (Outcome::MaybeInt(x), Outcome::MaybeInt(y), Some(Comparator::Int(c))) => {
            Outcome::MaybeInt(pick(x, y, |a, b| c(*a, *b), want_max))
        }
        (Outcome::MaybeInt(x), Outcome::MaybeInt(y), None) => {
            Outcome::MaybeInt(pick(x, y, |a, b| a.cmp(b), want_max))
        }
        (Outcome::MaybeLong(x), Outcome::MaybeLong(y), Some(Comparator::Long(c))) => {
            Outcome::MaybeLong(pick(x, y, |a, b| c(*a, *b), want_max))
        }
        (Outcome::MaybeLong(x), Outcome::MaybeLong(y), None) => {
            Outcome::MaybeLong(pick(x, y, |a, b| a.cmp(b), want_max))
        }
        _ => unreachable!("min/max partials share one kind"),
    }
}

fn merge_reduced(comb: &Combiner, a: Outcome, b: Outcome) -> Result<Outcome> {
    let merged = match (a, b, comb) {
        (Outcome::MaybeObj(x), Outcome::MaybeObj(y), Combiner::Obj(f)) => {
            Outcome::MaybeObj(match (x, y) {
                (Some(a), Some(b)) => Some(f(a, b).map_err(op_err(OpCategory::Reduce))?),
                (a, b) => a.or(b),
            })
        }
        (Outcome::MaybeDouble(x), Outcome::MaybeDouble(y), Combiner::Double(f)) => {
            Outcome::MaybeDouble(match (x, y) {
                (Some(a), Some(b)) => Some(f(a, b).map_err(op_err(OpCategory::Reduce))?),
                (a, b) => a.or(b),
            })
        }
        (Outcome::MaybeInt(x), Outcome::MaybeInt(y), Combiner::Int(f)) => {
            Outcome::MaybeInt(match (x, y) {
                (Some(a), Some(b)) => Some(f(a, b).map_err(op_err(OpCategory::Reduce))?),
                (a, b) => a.or(b),
            })
        }
        (Outcome::MaybeLong(x), Outcome::MaybeLong(y), Combiner::Long(f)) => {
            Outcome::MaybeLong(match (x, y) {
                (Some(a), Some(b)) => Some(f(a, b).map_err(op_err(OpCategory::Reduce))?),
                (a, b) => a.or(b),
            })
        }
        _ => unreachable!("reduce partials share one kind"),
    };
    Ok(merged)
}

/// Whether a partial already decides an anyMatch or findFirst run.
fn short_circuit_satisfied(partial: &Partial) -> bool {
    matches!(
        partial,
        Partial::Done(Outcome::Bool(true))
            | Partial::Done(Outcome::MaybeObj(Some(_)))
            | Partial::Done(Outcome::MaybeDouble(Some(_)))
            | Partial::Done(Outcome::MaybeInt(Some(_)))
            | Partial::Done(Outcome::MaybeLong(Some(_)))
    )
}

fn finish(partial: Partial) -> Outcome {
    match partial {
        Partial::Done(outcome) => outcome,
        Partial::Avg { sum, n } => Outcome::MaybeDouble((n > 0).then(|| sum / n as f64)),
    }
}

impl Pipeline {
    /// Realize the pipeline against a backing source and produce the
    /// terminal's result. Drives the terminal state machine: `Unexecuted →
    /// Executing → Completed` on success, `→ Failed` on error. Re-entry is
    /// rejected until [`Pipeline::rearm`].
    #[instrument(skip_all, fields(parallel = self.parallel, terminal = %self.terminal.category()))]
    pub fn execute(&mut self, source: DataSource) -> Result<Outcome> {
        if self.state != TerminalState::Unexecuted {
            return Err(Error::AlreadyExecuted);
        }
        let chain = self.chain();
        let src_kind = self.kind_at(chain[0]);
        if source.kind() != src_kind {
            return Err(Error::KindMismatch {
                expected: src_kind,
                found: source.kind(),
                at: OpCategory::Source,
            });
        }
        self.state = TerminalState::Executing;
        trace!(nodes = chain.len(), "execution start");
        let result = self.run(&chain, source);
        match &result {
            Ok(outcome) => {
                trace!(?outcome, "execution complete");
                self.state = TerminalState::Completed;
            }
            Err(err) => {
                debug!(%err, "execution failed");
                self.state = TerminalState::Failed;
            }
        }
        result
    }

    fn run(&self, chain: &[NodeId], source: DataSource) -> Result<Outcome> {
        let order_sensitive = chain
            .iter()
            .filter_map(|id| self.node(*id).stage())
            .any(Stage::order_sensitive);
        if self.parallel && order_sensitive {
            debug!("order-sensitive stage present; realizing sequentially");
        }
        if self.parallel && !order_sensitive {
            self.run_parallel(chain, source)
        } else {
            self.run_sequential(chain, source)
        }
    }

    fn run_sequential(&self, chain: &[NodeId], source: DataSource) -> Result<Outcome> {
        let mut lane = Lane::from_feed(source.feed);
        for id in &chain[1..] {
            let stage = self.node(*id).stage().expect("non-source nodes carry a stage");
            lane = apply_stage(lane, stage)?;
        }
        let partial = eval_terminal(&self.terminal, lane, None)?;
        Ok(finish(partial))
    }

    fn run_parallel(&self, chain: &[NodeId], source: DataSource) -> Result<Outcome> {
        if !source.bounded {
            return Err(Error::UnboundedParallelSource);
        }
        let batch = source.drain()?;
        let parts = self
            .partitions
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);
        let partitions = self.partitioner.partition(batch, parts);
        trace!(partitions = partitions.len(), "partitioned source");

        let token = CancelToken::default();
        let first_hit = Arc::new(AtomicUsize::new(usize::MAX));
        let partials: Vec<Result<Partial>> = partitions
            .into_par_iter()
            .enumerate()
            .map(|(index, part)| {
                let signal = PartitionSignal {
                    token: token.clone(),
                    first_hit: first_hit.clone(),
                    index,
                };
                let mut lane = Lane::from_batch(part, signal.clone());
                for id in &chain[1..] {
                    let stage = self
                        .node(*id)
                        .stage()
                        .expect("non-source nodes carry a stage");
                    lane = apply_stage(lane, stage)?;
                }
                let result = eval_terminal(&self.terminal, lane, Some(&signal));
                if result.is_err() {
                    // Stop scheduling pulls in sibling partitions.
                    signal.halt_all();
                }
                result
            })
            .collect();

        let mut acc: Option<Partial> = None;
        for r in partials {
            let p = r?;
            let decisive = self.terminal.short_circuits() && short_circuit_satisfied(&p);
            acc = Some(match acc {
                None => p,
                Some(prev) => merge_partials(&self.terminal, prev, p)?,
            });
            // In source order, nothing past a satisfied short-circuit
            // result can change it; stale sibling errors are discarded.
            if decisive {
                break;
            }
        }
        match acc {
            Some(p) => Ok(finish(p)),
            None => Ok(self.terminal.empty_outcome(self.tail_kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::node::{Stage, Terminal};
    use crate::ops::{Combiner, Comparator, FlatMapFn, MapFn, Predicate};
    use crate::pipeline::PipelineBuilder;
    use crate::types::obj;

    fn sealed(
        kind: Kind,
        stages: Vec<Stage>,
        terminal: Terminal,
        parallel: bool,
    ) -> Pipeline {
        let mut b = PipelineBuilder::source(kind);
        for s in stages {
            b.append(s).unwrap();
        }
        b.terminal(terminal, parallel).unwrap()
    }

    #[test]
    fn test_filter_then_any_match() {
        let mut p = sealed(
            Kind::Double,
            vec![Stage::Filter(Predicate::double(|x| x > 2.0))],
            Terminal::AnyMatch(Predicate::double(|x| x == 4.0)),
            false,
        );
        let out = p.execute(DataSource::doubles(vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(out.as_bool(), Some(true));
        assert_eq!(p.state(), TerminalState::Completed);
    }

    #[test]
    fn test_any_match_unchanged_by_terminal_fusion() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let build = || {
            sealed(
                Kind::Double,
                vec![Stage::Filter(Predicate::double(|x| x > 2.0))],
                Terminal::AnyMatch(Predicate::double(|x| x == 4.0)),
                false,
            )
        };
        let mut plain = build();
        let before = plain.execute(DataSource::doubles(data.clone())).unwrap();

        let mut fused = build();
        assert!(fused.fuse_filter_into_any_match().unwrap());
        let after = fused.execute(DataSource::doubles(data)).unwrap();
        assert_eq!(before.as_bool(), after.as_bool());
        assert_eq!(after.as_bool(), Some(true));
    }

    #[test]
    fn test_any_match_short_circuits_unbounded_source() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        let generated = (0..).map(move |x: i32| {
            counter.fetch_add(1, AtomicOrdering::Relaxed);
            x
        });
        let mut p = sealed(
            Kind::Int,
            vec![],
            Terminal::AnyMatch(Predicate::int(|x| x == 5)),
            false,
        );
        let out = p.execute(DataSource::generator_ints(generated)).unwrap();
        assert_eq!(out.as_bool(), Some(true));
        assert!(pulls.load(AtomicOrdering::Relaxed) <= 6);
    }

    #[test]
    fn test_sequential_matches_naive_reference() {
        let data: Vec<i32> = (1..=20).collect();
        let expected: Vec<i32> = data
            .iter()
            .copied()
            .filter(|x| x % 2 == 0)
            .map(|x| x + 1)
            .collect();

        let mut p = sealed(
            Kind::Int,
            vec![
                Stage::Filter(Predicate::int(|x| x % 2 == 0)),
                Stage::Map(MapFn::int(|x| x + 1)),
            ],
            Terminal::Collect,
            false,
        );
        let out = p.execute(DataSource::ints(data)).unwrap();
        match out.as_seq().unwrap() {
            Batch::Int(v) => assert_eq!(*v, expected),
            other => panic!("unexpected batch {other:?}"),
        }
    }

    #[test]
    fn test_parallel_agrees_with_sequential() {
        let data: Vec<f64> = (1..=100).map(f64::from).collect();
        let run = |terminal: Terminal, parallel: bool, parts: Option<usize>| {
            let mut p = sealed(
                Kind::Double,
                vec![Stage::Filter(Predicate::double(|x| x > 10.0))],
                terminal,
                parallel,
            );
            if let Some(n) = parts {
                p.set_partitions(n);
            }
            p.execute(DataSource::doubles(data.clone())).unwrap()
        };
        let any = || Terminal::AnyMatch(Predicate::double(|x| x == 42.0));

        let sum = run(Terminal::Sum, false, None).as_double().unwrap();
        assert_eq!(run(Terminal::Count, false, None).as_count(), Some(90));
        assert_eq!(run(any(), false, None).as_bool(), Some(true));
        for parts in [1, 2, 7] {
            assert_eq!(run(Terminal::Sum, true, Some(parts)).as_double(), Some(sum));
            assert_eq!(run(Terminal::Count, true, Some(parts)).as_count(), Some(90));
            assert_eq!(run(any(), true, Some(parts)).as_bool(), Some(true));
        }
    }

    #[test]
    fn test_parallel_find_first_prefers_earliest_partition() {
        // The back partition matches instantly; the front one is slowed so
        // its match lands last. Source order must still win.
        let run = |parallel: bool| {
            let mut p = sealed(
                Kind::Int,
                vec![Stage::Filter(Predicate::int(|x| {
                    if x <= 2 {
                        std::thread::sleep(std::time::Duration::from_millis(20));
                    }
                    x >= 2
                }))],
                Terminal::FindFirst,
                parallel,
            );
            if parallel {
                p.set_partitions(2);
            }
            p.execute(DataSource::ints(vec![1, 2, 3, 4])).unwrap()
        };
        assert_eq!(run(false).as_maybe_int(), Some(Some(2)));
        assert_eq!(run(true).as_maybe_int(), Some(Some(2)));
    }

    #[test]
    fn test_any_match_hit_outranks_later_partition_error() {
        let mut p = sealed(
            Kind::Double,
            vec![],
            Terminal::AnyMatch(Predicate::try_double(|x| {
                if x == 4.0 {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    Err(OpError::new("flaky collaborator"))
                } else {
                    Ok(x == 1.0)
                }
            })),
            true,
        );
        p.set_partitions(2);
        // The first partition is satisfied by 1.0 before the second one can
        // fail on 4.0; the stale error must not surface.
        let out = p
            .execute(DataSource::doubles(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        assert_eq!(out.as_bool(), Some(true));
        assert_eq!(p.state(), TerminalState::Completed);
    }

    #[test]
    fn test_parallel_collect_preserves_source_order() {
        let mut p = sealed(
            Kind::Int,
            vec![Stage::Map(MapFn::int(|x| x * 2))],
            Terminal::Collect,
            true,
        );
        p.set_partitions(3);
        let out = p.execute(DataSource::ints((1..=10).collect())).unwrap();
        match out.as_seq().unwrap() {
            Batch::Int(v) => assert_eq!(*v, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]),
            other => panic!("unexpected batch {other:?}"),
        }
    }

    #[test]
    fn test_order_sensitive_stage_realized_sequentially() {
        // limit must be global, not per partition
        let mut p = sealed(
            Kind::Int,
            vec![Stage::Limit(3)],
            Terminal::Count,
            true,
        );
        p.set_partitions(4);
        let out = p.execute(DataSource::ints((1..=12).collect())).unwrap();
        assert_eq!(out.as_count(), Some(3));
    }

    #[test]
    fn test_unbounded_parallel_source_rejected() {
        let mut p = sealed(Kind::Int, vec![], Terminal::Count, true);
        let err = p
            .execute(DataSource::generator_ints((0..).take(10)))
            .unwrap_err();
        assert!(matches!(err, Error::UnboundedParallelSource));
        assert_eq!(p.state(), TerminalState::Failed);
    }

    #[test]
    fn test_empty_source_defaults() {
        let cases: Vec<(Terminal, fn(&Outcome) -> bool)> = vec![
            (
                Terminal::AnyMatch(Predicate::double(|_| true)),
                |o| o.as_bool() == Some(false),
            ),
            (Terminal::Count, |o| o.as_count() == Some(0)),
            (Terminal::Sum, |o| o.as_double() == Some(0.0)),
            (Terminal::Average, |o| o.as_maybe_double() == Some(None)),
            (Terminal::Min(None), |o| o.as_maybe_double() == Some(None)),
            (Terminal::Max(None), |o| o.as_maybe_double() == Some(None)),
            (Terminal::FindFirst, |o| o.as_maybe_double() == Some(None)),
            (
                Terminal::Reduce(Combiner::double(|a, b| a + b)),
                |o| o.as_maybe_double() == Some(None),
            ),
            (Terminal::Collect, |o| o.as_seq().is_some_and(Batch::is_empty)),
        ];
        for (terminal, check) in cases {
            let label = format!("{terminal:?}");
            let mut p = sealed(Kind::Double, vec![], terminal, false);
            let out = p.execute(DataSource::doubles(vec![])).unwrap();
            assert!(check(&out), "{label} produced {out:?}");
        }
    }

    #[test]
    fn test_op_error_tagged_with_category() {
        let mut p = sealed(
            Kind::Double,
            vec![Stage::Filter(Predicate::try_double(|x| {
                if x == 3.0 {
                    Err(OpError::new("collaborator unavailable"))
                } else {
                    Ok(true)
                }
            }))],
            Terminal::Count,
            false,
        );
        let err = p
            .execute(DataSource::doubles(vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Op {
                category: OpCategory::Filter,
                ..
            }
        ));
        assert_eq!(p.state(), TerminalState::Failed);
    }

    #[test]
    fn test_reentry_rejected_until_rearm() {
        let mut p = sealed(Kind::Int, vec![], Terminal::Count, false);
        assert_eq!(
            p.execute(DataSource::ints(vec![1, 2, 3])).unwrap().as_count(),
            Some(3)
        );
        assert!(matches!(
            p.execute(DataSource::ints(vec![1])),
            Err(Error::AlreadyExecuted)
        ));
        p.rearm();
        assert_eq!(
            p.execute(DataSource::ints(vec![4, 5])).unwrap().as_count(),
            Some(2)
        );
    }

    #[test]
    fn test_source_kind_mismatch_rejected() {
        let mut p = sealed(Kind::Int, vec![], Terminal::Count, false);
        let err = p.execute(DataSource::doubles(vec![1.0])).unwrap_err();
        assert!(matches!(
            err,
            Error::KindMismatch {
                expected: Kind::Int,
                found: Kind::Double,
                at: OpCategory::Source,
            }
        ));
    }

    #[test]
    fn test_skip_then_limit_window() {
        let mut p = sealed(
            Kind::Int,
            vec![Stage::Skip(2), Stage::Limit(3)],
            Terminal::Collect,
            false,
        );
        let out = p.execute(DataSource::ints((1..=10).collect())).unwrap();
        match out.as_seq().unwrap() {
            Batch::Int(v) => assert_eq!(*v, vec![3, 4, 5]),
            other => panic!("unexpected batch {other:?}"),
        }
    }

    #[test]
    fn test_sorted_natural_and_custom_order() {
        let data = vec![3.0, 1.0, 2.0];
        let mut natural = sealed(
            Kind::Double,
            vec![Stage::Sorted(None)],
            Terminal::Collect,
            false,
        );
        let out = natural.execute(DataSource::doubles(data.clone())).unwrap();
        match out.as_seq().unwrap() {
            Batch::Double(v) => assert_eq!(*v, vec![1.0, 2.0, 3.0]),
            other => panic!("unexpected batch {other:?}"),
        }

        let mut reversed = sealed(
            Kind::Double,
            vec![Stage::Sorted(Some(Comparator::double(|a, b| {
                b.total_cmp(&a)
            })))],
            Terminal::Collect,
            false,
        );
        let out = reversed.execute(DataSource::doubles(data)).unwrap();
        match out.as_seq().unwrap() {
            Batch::Double(v) => assert_eq!(*v, vec![3.0, 2.0, 1.0]),
            other => panic!("unexpected batch {other:?}"),
        }
    }

    #[test]
    fn test_flat_map_expands_elements() {
        let mut p = sealed(
            Kind::Int,
            vec![Stage::FlatMap(FlatMapFn::int(|x| vec![x, x]))],
            Terminal::Count,
            false,
        );
        let out = p.execute(DataSource::ints((1..=5).collect())).unwrap();
        assert_eq!(out.as_count(), Some(10));
    }

    #[test]
    fn test_object_lane_round_trip_through_double() {
        let mut p = sealed(
            Kind::Obj,
            vec![
                Stage::Map(MapFn::obj_to_double(|o| {
                    *o.downcast_ref::<f64>().unwrap()
                })),
                Stage::Map(MapFn::double(|x| x + 0.5)),
                Stage::Map(MapFn::double_to_obj(|x| obj(x))),
            ],
            Terminal::Collect,
            false,
        );
        let source = DataSource::objs(vec![obj(1.0_f64), obj(2.0_f64)]);
        let out = p.execute(source).unwrap();
        match out.as_seq().unwrap() {
            Batch::Obj(v) => {
                let values: Vec<f64> = v
                    .iter()
                    .map(|o| *o.downcast_ref::<f64>().unwrap())
                    .collect();
                assert_eq!(values, vec![1.5, 2.5]);
            }
            other => panic!("unexpected batch {other:?}"),
        }
    }

    #[test]
    fn test_fused_filters_agree_with_unfused() {
        let data: Vec<i64> = (0..50).collect();
        let build = || {
            sealed(
                Kind::Long,
                vec![
                    Stage::Filter(Predicate::long(|x| x % 2 == 0)),
                    Stage::Filter(Predicate::long(|x| x % 3 == 0)),
                ],
                Terminal::Count,
                false,
            )
        };
        let mut plain = build();
        let before = plain.execute(DataSource::longs(data.clone())).unwrap();

        let mut fused = build();
        assert_eq!(fused.fuse_adjacent_filters().unwrap(), 1);
        let after = fused.execute(DataSource::longs(data)).unwrap();
        assert_eq!(before.as_count(), after.as_count());
    }

    #[test]
    fn test_fused_maps_agree_with_unfused() {
        let data: Vec<f64> = vec![1.0, 2.0, 3.0];
        let build = || {
            sealed(
                Kind::Double,
                vec![
                    Stage::Map(MapFn::double(|x| x + 1.0)),
                    Stage::Map(MapFn::double(|x| x * 2.0)),
                ],
                Terminal::Sum,
                false,
            )
        };
        let mut plain = build();
        let before = plain.execute(DataSource::doubles(data.clone())).unwrap();

        let mut fused = build();
        assert_eq!(fused.fuse_adjacent_maps().unwrap(), 1);
        let after = fused.execute(DataSource::doubles(data)).unwrap();
        assert_eq!(before.as_double(), after.as_double());
        assert_eq!(after.as_double(), Some(18.0));
    }

    #[test]
    fn test_int_sum_widens_to_long() {
        let mut p = sealed(Kind::Int, vec![], Terminal::Sum, false);
        let out = p
            .execute(DataSource::ints(vec![i32::MAX, i32::MAX]))
            .unwrap();
        assert_eq!(out.as_long(), Some(2 * i64::from(i32::MAX)));
    }

    #[test]
    fn test_average_and_min_max() {
        let data = vec![4.0, 1.0, 3.0];
        let mut avg = sealed(Kind::Double, vec![], Terminal::Average, false);
        let out = avg.execute(DataSource::doubles(data.clone())).unwrap();
        assert_eq!(out.as_maybe_double(), Some(Some(8.0 / 3.0)));

        let mut min = sealed(Kind::Double, vec![], Terminal::Min(None), false);
        let out = min.execute(DataSource::doubles(data.clone())).unwrap();
        assert_eq!(out.as_maybe_double(), Some(Some(1.0)));

        let mut max = sealed(Kind::Double, vec![], Terminal::Max(None), false);
        let out = max.execute(DataSource::doubles(data)).unwrap();
        assert_eq!(out.as_maybe_double(), Some(Some(4.0)));
    }

    #[test]
    fn test_reduce_sequential_and_parallel() {
        let data: Vec<i64> = (1..=10).collect();
        let run = |parallel: bool| {
            let mut p = sealed(
                Kind::Long,
                vec![],
                Terminal::Reduce(Combiner::long(|a, b| a + b)),
                parallel,
            );
            if parallel {
                p.set_partitions(3);
            }
            p.execute(DataSource::longs(data.clone())).unwrap()
        };
        assert_eq!(run(false).as_maybe_long(), Some(Some(55)));
        assert_eq!(run(true).as_maybe_long(), Some(Some(55)));
    }

    #[test]
    fn test_find_first_takes_chain_order() {
        let mut p = sealed(
            Kind::Int,
            vec![Stage::Filter(Predicate::int(|x| x > 2))],
            Terminal::FindFirst,
            false,
        );
        let out = p.execute(DataSource::ints(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(out.as_maybe_int(), Some(Some(3)));
    }

    #[test]
    fn test_failing_source_pull_tagged_as_source() {
        let mut p = sealed(Kind::Double, vec![], Terminal::Count, false);
        let feed = vec![Ok(1.0), Err(OpError::new("read failed"))].into_iter();
        let err = p.execute(DataSource::try_doubles(feed)).unwrap_err();
        assert!(matches!(
            err,
            Error::Op {
                category: OpCategory::Source,
                ..
            }
        ));
    }

    #[test]
    fn test_chunk_partitioner_covers_all_elements() {
        let batch = Batch::Int((1..=10).collect());
        let parts = ChunkPartitioner.partition(batch, 3);
        assert_eq!(parts.len(), 3);
        let total: usize = parts.iter().map(Batch::len).sum();
        assert_eq!(total, 10);
        // More partitions than elements collapses to one per element.
        let parts = ChunkPartitioner.partition(Batch::Int(vec![1, 2]), 8);
        assert_eq!(parts.len(), 2);
    }
}
