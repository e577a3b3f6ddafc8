//! Mutable stream pipeline intermediate representation
//!
//! A pipeline is built one stage at a time from a typed source, sealed with
//! a terminal reduction, and stays structurally inspectable and rewritable
//! right up until execution. Rewrites replace matched sub-chains with
//! equivalent fused nodes (adjacent filters become one conjunction,
//! adjacent maps one composition) without changing what the pipeline
//! computes. Execution then realizes the chain against a concrete backing
//! sequence, either sequentially with lazy short-circuiting pulls or in
//! parallel over partitions of a materialized source.
//!
//! Elements carry one of four kinds: boxed objects or unboxed `f64` / `i32`
//! / `i64` primitives. Kind checking happens at build and rewrite time, so
//! by execution every edge of the chain is known to agree.
//!
//! ```
//! use rill::{DataSource, Predicate, PipelineBuilder, Stage, Terminal};
//! use rill::types::Kind;
//!
//! # fn main() -> rill::Result<()> {
//! let mut builder = PipelineBuilder::source(Kind::Double);
//! builder.append(Stage::Filter(Predicate::double(|x| x > 2.0)))?;
//! let mut pipeline = builder.terminal(
//!     Terminal::AnyMatch(Predicate::double(|x| x == 4.0)),
//!     false,
//! )?;
//!
//! pipeline.fuse_filter_into_any_match()?;
//! let outcome = pipeline.execute(DataSource::doubles(vec![1.0, 2.0, 3.0, 4.0]))?;
//! assert_eq!(outcome.as_bool(), Some(true));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod exec;
pub mod node;
pub mod ops;
pub mod pipeline;
pub mod rewrite;
pub mod types;

pub use error::{Error, OpError, Result};
pub use exec::{CancelToken, ChunkPartitioner, DataSource, Partitioner};
pub use node::{Node, NodeOp, Stage, Terminal};
pub use ops::{Combiner, Comparator, FlatMapFn, MapFn, Predicate};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use rewrite::Pattern;
pub use types::{obj, Batch, Kind, NodeId, Obj, OpCategory, Outcome, TerminalState};
