//! Rank-based evaluation for collaborative-filtering embeddings.
//!
//! For a test triple `(u, r, i)` the model scores `(u, r, ?)` against every
//! item in the candidate set and we record the rank of the true item.
//!
//! # Filtered Ranking
//!
//! | Setting | Description | Use Case |
//! |---------|-------------|----------|
//! | Raw | All items as negatives | Pessimistic estimate |
//! | Filtered | Remove known true triples | Standard benchmark |
//!
//! Filtered is the default: other items the user is already known to
//! interact with through `r` are not counted as negatives.
//!
//! # Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | MRR | (0, 1] | Mean Reciprocal Rank: average of 1/rank |
//! | MR | [1, N] | Mean Rank |
//! | Hits@k | [0, 1] | Fraction with rank <= k |
//!
//! Ties are ranked pessimistically: `rank = 1 + #(strictly higher scores)`.

use crate::dataset::{to_tensor, TripleIds};
use crate::error::{Error, Result};
use crate::model::CfModel;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Rank-based evaluation results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankMetrics {
    /// Mean Reciprocal Rank: E\[1/rank\]
    pub mrr: f64,
    /// Mean Rank: E\[rank\]
    pub mr: f64,
    /// Hits@1: P(rank = 1)
    pub hits_at_1: f64,
    /// Hits@3: P(rank <= 3)
    pub hits_at_3: f64,
    /// Hits@10: P(rank <= 10)
    pub hits_at_10: f64,
    /// Number of test triples evaluated
    pub num_triples: usize,
}

impl RankMetrics {
    /// Compute metrics from a list of ranks.
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }

        let n = ranks.len() as f64;
        let hits = |k: usize| ranks.iter().filter(|&&r| r <= k).count() as f64 / n;

        Self {
            mrr: ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
            mr: ranks.iter().map(|&r| r as f64).sum::<f64>() / n,
            hits_at_1: hits(1),
            hits_at_3: hits(3),
            hits_at_10: hits(10),
            num_triples: ranks.len(),
        }
    }

    /// Merge metrics from several evaluation runs, weighted by triple count.
    pub fn merge(metrics: &[Self]) -> Self {
        let total: usize = metrics.iter().map(|m| m.num_triples).sum();
        if total == 0 {
            return Self::default();
        }

        let total_f = total as f64;
        let weighted = |f: fn(&Self) -> f64| {
            metrics
                .iter()
                .map(|m| f(m) * m.num_triples as f64)
                .sum::<f64>()
                / total_f
        };

        Self {
            mrr: weighted(|m| m.mrr),
            mr: weighted(|m| m.mr),
            hits_at_1: weighted(|m| m.hits_at_1),
            hits_at_3: weighted(|m| m.hits_at_3),
            hits_at_10: weighted(|m| m.hits_at_10),
            num_triples: total,
        }
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | MR: {:.1} | H@1: {:.3} | H@3: {:.3} | H@10: {:.3} (n={})",
            self.mrr, self.mr, self.hits_at_1, self.hits_at_3, self.hits_at_10, self.num_triples
        )
    }
}

/// Filtered link-prediction evaluator.
///
/// Holds the known `(head, relation) -> tails` index used for filtering.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    known: HashMap<(u32, u32), HashSet<u32>>,
}

impl Evaluator {
    /// Create an evaluator with no known triples (raw ranking).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an evaluator that filters `known` triples.
    pub fn with_known<'a>(known: impl IntoIterator<Item = &'a TripleIds>) -> Self {
        let mut eval = Self::new();
        eval.add_known_triples(known);
        eval
    }

    pub fn add_known_triple(&mut self, triple: TripleIds) {
        self.known
            .entry((triple.head, triple.relation))
            .or_default()
            .insert(triple.tail);
    }

    pub fn add_known_triples<'a>(&mut self, triples: impl IntoIterator<Item = &'a TripleIds>) {
        for t in triples {
            self.add_known_triple(*t);
        }
    }

    pub fn is_known(&self, triple: &TripleIds) -> bool {
        self.known
            .get(&(triple.head, triple.relation))
            .is_some_and(|tails| tails.contains(&triple.tail))
    }

    /// Filtered rank of `triple.tail` among `scores`, one per entry of `item_ids`.
    ///
    /// `target` is the score of the true tail.
    pub fn filtered_rank(
        &self,
        triple: &TripleIds,
        target: f32,
        scores: &[f32],
        item_ids: &[u32],
    ) -> usize {
        let known = self.known.get(&(triple.head, triple.relation));
        let mut rank = 1;
        for (&item, &score) in item_ids.iter().zip(scores) {
            if item == triple.tail {
                continue;
            }
            if known.is_some_and(|tails| tails.contains(&item)) {
                continue;
            }
            if score > target {
                rank += 1;
            }
        }
        rank
    }

    /// Rank every triple's tail against the model's item set.
    pub fn ranks(
        &self,
        model: &dyn CfModel,
        triples: &[TripleIds],
        batch_size: usize,
    ) -> Result<Vec<usize>> {
        if batch_size == 0 {
            return Err(Error::Validation("batch_size must be > 0".into()));
        }
        let tables = model.tables();
        let item_ids = tables.item_ids();
        let position: HashMap<u32, usize> =
            item_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut ranks = Vec::with_capacity(triples.len());
        for batch in triples.chunks(batch_size) {
            let input = to_tensor(batch, tables.device())?;
            let all_scores = model.score_all_items(&input)?;
            let single = model.score_triples(&input)?;

            for ((triple, scores), own) in batch.iter().zip(&all_scores).zip(single) {
                let target = match position.get(&triple.tail) {
                    Some(&col) => scores[col],
                    None => own,
                };
                ranks.push(self.filtered_rank(triple, target, scores, item_ids));
            }
        }
        Ok(ranks)
    }

    /// Evaluate `triples` in batches of `batch_size`.
    pub fn evaluate(
        &self,
        model: &dyn CfModel,
        triples: &[TripleIds],
        batch_size: usize,
    ) -> Result<RankMetrics> {
        let ranks = self.ranks(model, triples, batch_size)?;
        Ok(RankMetrics::from_ranks(&ranks))
    }
}
