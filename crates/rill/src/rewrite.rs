//! Structural rewriting
//!
//! A rewrite replaces a contiguous matched sub-chain with a single
//! equivalent node before execution. Matching is structural: a pattern is a
//! sequence of operation categories compared against the live chain in
//! source→terminal order. The replacement must preserve the segment's input
//! and output kinds, otherwise the whole call is rejected and the pipeline
//! is left untouched.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::node::{Node, NodeOp, Stage, Terminal};
use crate::pipeline::Pipeline;
use crate::types::{Kind, NodeId, OpCategory, TerminalState};

/// A contiguous sequence of operation categories to match.
#[derive(Debug, Clone)]
pub struct Pattern {
    categories: Vec<OpCategory>,
}

impl Pattern {
    pub fn new(categories: impl Into<Vec<OpCategory>>) -> Self {
        Self {
            categories: categories.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    fn matches(&self, nodes: &[&Node]) -> bool {
        nodes.len() == self.categories.len()
            && nodes
                .iter()
                .zip(&self.categories)
                .all(|(n, c)| n.category() == *c)
    }
}

struct Planned {
    upstream: NodeId,
    last: NodeId,
    downstream: Option<NodeId>,
    stage: Stage,
    out_kind: Kind,
}

impl Pipeline {
    /// Walk the live chain and replace every non-overlapping match of
    /// `pattern` with the single stage the factory returns. The factory
    /// sees the matched nodes in chain order and may decline an occurrence
    /// by returning `None`. Returns the number of segments replaced.
    #[instrument(skip_all, fields(pattern = ?pattern))]
    pub fn rewrite<F>(&mut self, pattern: &Pattern, mut factory: F) -> Result<usize>
    where
        F: FnMut(&[&Node]) -> Option<Stage>,
    {
        if self.state != TerminalState::Unexecuted {
            return Err(Error::AlreadyExecuted);
        }
        if pattern.is_empty() {
            return Err(Error::RewriteRejected {
                reason: "empty pattern".to_string(),
            });
        }
        if pattern.categories.contains(&OpCategory::Source) {
            return Err(Error::RewriteRejected {
                reason: "the source node cannot be replaced".to_string(),
            });
        }

        let chain = self.chain();
        let m = pattern.len();
        let mut plans: Vec<Planned> = Vec::new();

        // Plan first, apply after: a rejected replacement must leave the
        // pipeline untouched.
        let mut j = 1; // chain[0] is the source
        while j + m <= chain.len() {
            let window: Vec<&Node> = chain[j..j + m].iter().map(|id| self.node(*id)).collect();
            if !pattern.matches(&window) {
                j += 1;
                continue;
            }
            let first = window[0];
            let last_id = window[m - 1].id;
            let seg_in = self.kind_at(first.upstream.expect("stage nodes have an upstream"));
            let seg_out = self.kind_at(last_id);

            let Some(stage) = factory(&window) else {
                j += 1;
                continue;
            };

            let out = stage.check(seg_in).map_err(|e| Error::RewriteRejected {
                reason: e.to_string(),
            })?;
            if out != seg_out {
                return Err(Error::RewriteRejected {
                    reason: format!(
                        "replacement changes segment output kind from {seg_out} to {out}"
                    ),
                });
            }

            plans.push(Planned {
                upstream: first.upstream.expect("stage nodes have an upstream"),
                last: last_id,
                downstream: chain.get(j + m).copied(),
                stage,
                out_kind: seg_out,
            });
            j += m;
        }

        let replaced = plans.len();
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        for plan in plans {
            // Adjacent segments: the upstream seam may itself have been
            // replaced already.
            let upstream = remap.get(&plan.upstream).copied().unwrap_or(plan.upstream);
            let id = NodeId(self.nodes.len());
            self.nodes.push(Node {
                id,
                upstream: Some(upstream),
                op: NodeOp::Stage(plan.stage),
                out_kind: plan.out_kind,
            });
            remap.insert(plan.last, id);
            match plan.downstream {
                Some(d) => self.nodes[d.0].upstream = Some(id),
                None => self.tail = id,
            }
            debug!(node = %id, "segment replaced");
        }

        Ok(replaced)
    }

    /// Fuse every run of adjacent filters into one conjunction predicate,
    /// repeating until a fixpoint. Returns the total number of fusions.
    pub fn fuse_adjacent_filters(&mut self) -> Result<usize> {
        let pattern = Pattern::new(vec![OpCategory::Filter, OpCategory::Filter]);
        let mut total = 0;
        loop {
            let n = self.rewrite(&pattern, |nodes| {
                let (Some(Stage::Filter(p)), Some(Stage::Filter(q))) =
                    (nodes[0].stage(), nodes[1].stage())
                else {
                    return None;
                };
                p.and(q).map(Stage::Filter)
            })?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Fuse adjacent maps into one composed map, repeating until a
    /// fixpoint. Pairs whose composite kind signature has no variant are
    /// left in place.
    pub fn fuse_adjacent_maps(&mut self) -> Result<usize> {
        let pattern = Pattern::new(vec![OpCategory::Map, OpCategory::Map]);
        let mut total = 0;
        loop {
            let n = self.rewrite(&pattern, |nodes| {
                let (Some(Stage::Map(f)), Some(Stage::Map(g))) =
                    (nodes[0].stage(), nodes[1].stage())
                else {
                    return None;
                };
                crate::ops::MapFn::compose(f, g).map(Stage::Map)
            })?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// If the chain ends in a filter feeding an anyMatch terminal, drop the
    /// filter and conjoin its predicate into the terminal. Returns whether
    /// the fusion applied.
    pub fn fuse_filter_into_any_match(&mut self) -> Result<bool> {
        if self.state != TerminalState::Unexecuted {
            return Err(Error::AlreadyExecuted);
        }
        let tail = self.node(self.tail);
        let Some(Stage::Filter(p)) = tail.stage() else {
            return Ok(false);
        };
        let Terminal::AnyMatch(q) = &self.terminal else {
            return Ok(false);
        };
        // Kinds agree because sealing validated the terminal's input.
        let Some(fused) = p.and(q) else {
            return Ok(false);
        };
        let new_tail = tail.upstream.expect("stage nodes have an upstream");
        debug!(dropped = %self.tail, "filter fused into anyMatch terminal");
        self.terminal = Terminal::AnyMatch(fused);
        self.tail = new_tail;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{MapFn, Predicate};
    use crate::pipeline::PipelineBuilder;
    use crate::types::Kind;

    fn double_chain(stages: Vec<Stage>, terminal: Terminal) -> Pipeline {
        let mut b = PipelineBuilder::source(Kind::Double);
        for s in stages {
            b.append(s).unwrap();
        }
        b.terminal(terminal, false).unwrap()
    }

    #[test]
    fn test_fuse_adjacent_filters_collapses_run() {
        let mut p = double_chain(
            vec![
                Stage::Filter(Predicate::double(|x| x > 0.0)),
                Stage::Filter(Predicate::double(|x| x < 10.0)),
                Stage::Filter(Predicate::double(|x| x != 5.0)),
            ],
            Terminal::Count,
        );
        assert_eq!(p.len(), 4);
        let fused = p.fuse_adjacent_filters().unwrap();
        assert_eq!(fused, 2);
        // source + one fused filter
        assert_eq!(p.len(), 2);
        assert_eq!(
            p.node(p.chain()[1]).category(),
            OpCategory::Filter
        );
    }

    #[test]
    fn test_fuse_adjacent_maps_preserves_conversion_contract() {
        let mut p = {
            let mut b = PipelineBuilder::source(Kind::Obj);
            b.append(Stage::Map(MapFn::obj_to_double(|o| {
                *o.downcast_ref::<f64>().unwrap()
            })))
            .unwrap();
            b.append(Stage::Map(MapFn::double(|x| x * 3.0))).unwrap();
            b.terminal(Terminal::Sum, false).unwrap()
        };
        let fused = p.fuse_adjacent_maps().unwrap();
        assert_eq!(fused, 1);
        let chain = p.chain();
        assert_eq!(chain.len(), 2);
        let node = p.node(chain[1]);
        assert_eq!(node.category(), OpCategory::Map);
        assert_eq!(node.kind(), Kind::Double);
    }

    #[test]
    fn test_rewrite_rejects_kind_change() {
        let mut p = double_chain(
            vec![
                Stage::Filter(Predicate::double(|x| x > 0.0)),
                Stage::Filter(Predicate::double(|x| x < 10.0)),
            ],
            Terminal::Count,
        );
        let pattern = Pattern::new(vec![OpCategory::Filter, OpCategory::Filter]);
        let err = p
            .rewrite(&pattern, |_| Some(Stage::Map(MapFn::double_to_obj(|x| crate::types::obj(x)))))
            .unwrap_err();
        assert!(matches!(err, Error::RewriteRejected { .. }));
        // Pipeline untouched on rejection.
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_rewrite_skips_declined_occurrences() {
        let mut p = double_chain(
            vec![
                Stage::Filter(Predicate::double(|x| x > 0.0)),
                Stage::Filter(Predicate::double(|x| x < 10.0)),
            ],
            Terminal::Count,
        );
        let pattern = Pattern::new(vec![OpCategory::Filter, OpCategory::Filter]);
        let n = p.rewrite(&pattern, |_| None).unwrap();
        assert_eq!(n, 0);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_rewrite_cannot_touch_source() {
        let mut p = double_chain(vec![], Terminal::Count);
        let pattern = Pattern::new(vec![OpCategory::Source]);
        let err = p.rewrite(&pattern, |_| None).unwrap_err();
        assert!(matches!(err, Error::RewriteRejected { .. }));
    }

    #[test]
    fn test_fuse_filter_into_any_match_rewires_tail() {
        let mut p = double_chain(
            vec![Stage::Filter(Predicate::double(|x| x > 2.0))],
            Terminal::AnyMatch(Predicate::double(|x| x == 4.0)),
        );
        assert_eq!(p.len(), 2);
        assert!(p.fuse_filter_into_any_match().unwrap());
        assert_eq!(p.len(), 1);
        assert!(matches!(p.terminal(), Terminal::AnyMatch(_)));
        // No trailing filter left; nothing further to fuse.
        assert!(!p.fuse_filter_into_any_match().unwrap());
    }

    #[test]
    fn test_unaffected_nodes_keep_ids() {
        let mut p = double_chain(
            vec![
                Stage::Map(MapFn::double(|x| x + 1.0)),
                Stage::Filter(Predicate::double(|x| x > 0.0)),
                Stage::Filter(Predicate::double(|x| x < 10.0)),
            ],
            Terminal::Count,
        );
        let map_id = p.chain()[1];
        p.fuse_adjacent_filters().unwrap();
        // The map node survives the rewrite untouched, same handle.
        assert_eq!(p.chain()[1], map_id);
        assert_eq!(p.node(map_id).category(), OpCategory::Map);
    }
}
