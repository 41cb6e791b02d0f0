//! Shared model interface for collaborative-filtering KG embeddings.
//!
//! Every model is a *scoring head* over the same embedding tables. The
//! training driver only needs three operations:
//!
//! ```text
//! lhs   = get_lhs(input)                  // query side:     B x d
//! rhs   = get_rhs(input)                  // candidate side: B x d
//! score = similarity_score(lhs, rhs, all_items)
//! ```
//!
//! `input` is always a `B x 3` `u32` tensor of `(head, relation, tail)` ids.
//! In collaborative filtering the head is typically a user and the tail an
//! item, but nothing here assumes it.
//!
//! [`CfModel::forward`] adds the head and tail biases on top of the
//! similarity. With `all_items = true` the tail column is ignored and every
//! item in the item set is scored, giving a `B x N` matrix.
//!
//! # Design
//!
//! Abstraction is at the model level, not the tensor level: each head owns an
//! [`EmbeddingTables`] plus whatever per-relation parameters it needs, all
//! stored as candle `Var`s in one `VarMap` so a single optimizer trains them.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Init, Module, VarBuilder};
use serde::{Deserialize, Serialize};

/// Column of the head entity in an input batch.
pub const HEAD: usize = 0;
/// Column of the relation in an input batch.
pub const RELATION: usize = 1;
/// Column of the tail entity in an input batch.
pub const TAIL: usize = 2;

/// Shape of the embedding tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of entities (users and items together).
    pub num_entities: usize,
    /// Number of relations.
    pub num_relations: usize,
    /// Embedding dimension.
    pub dim: usize,
    /// Standard deviation of the normal initialization.
    #[serde(default = "default_init_size")]
    pub init_size: f64,
}

fn default_init_size() -> f64 {
    1e-3
}

impl ModelConfig {
    pub fn new(num_entities: usize, num_relations: usize, dim: usize) -> Self {
        Self {
            num_entities,
            num_relations,
            dim,
            init_size: default_init_size(),
        }
    }

    pub fn with_init_size(mut self, init_size: f64) -> Self {
        self.init_size = init_size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::Validation("embedding dimension must be > 0".into()));
        }
        if self.num_entities == 0 || self.num_relations == 0 {
            return Err(Error::Validation(format!(
                "empty vocabulary: {} entities, {} relations",
                self.num_entities, self.num_relations
            )));
        }
        Ok(())
    }
}

/// A ranked item.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Item entity id.
    pub item: u32,
    /// Plausibility score (higher = more plausible).
    pub score: f32,
}

/// Entity, relation and bias tables shared by all heads.
#[derive(Debug, Clone)]
pub struct EmbeddingTables {
    config: ModelConfig,
    entities: Embedding,
    relations: Embedding,
    bias_head: Embedding,
    bias_tail: Embedding,
    item_ids: Vec<u32>,
    item_tensor: Tensor,
}

impl EmbeddingTables {
    /// Create the tables under `vb`.
    ///
    /// `item_ids` is the candidate set scored when `all_items = true`.
    pub fn new(config: &ModelConfig, item_ids: &[u32], vb: &VarBuilder) -> Result<Self> {
        config.validate()?;
        if item_ids.is_empty() {
            return Err(Error::Validation("item set is empty".into()));
        }
        if let Some(&bad) = item_ids
            .iter()
            .find(|&&id| id as usize >= config.num_entities)
        {
            return Err(Error::NotFound(format!(
                "item id {} out of range for {} entities",
                bad, config.num_entities
            )));
        }

        let init = Init::Randn {
            mean: 0.0,
            stdev: config.init_size,
        };
        let entities = embedding_table(config.num_entities, config.dim, init, &vb.pp("entities"))?;
        let relations =
            embedding_table(config.num_relations, config.dim, init, &vb.pp("relations"))?;
        let bias_head = embedding_table(config.num_entities, 1, Init::Const(0.0), &vb.pp("bias_head"))?;
        let bias_tail = embedding_table(config.num_entities, 1, Init::Const(0.0), &vb.pp("bias_tail"))?;
        let item_tensor = Tensor::new(item_ids, vb.device())?;

        Ok(Self {
            config: config.clone(),
            entities,
            relations,
            bias_head,
            bias_tail,
            item_ids: item_ids.to_vec(),
            item_tensor,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }

    pub fn device(&self) -> &Device {
        self.item_tensor.device()
    }

    /// Item ids in candidate order.
    pub fn item_ids(&self) -> &[u32] {
        &self.item_ids
    }

    /// Entity lookup: `ids` of shape `S` gives `S x d`.
    pub fn entities(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.entities.forward(ids)?)
    }

    /// Relation lookup: `ids` of shape `S` gives `S x d`.
    pub fn relations(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.relations.forward(ids)?)
    }

    /// The whole relation table, `R x d`.
    pub fn all_relations(&self) -> &Tensor {
        self.relations.embeddings()
    }

    /// Embeddings of every item, `N x d`.
    pub fn items(&self) -> Result<Tensor> {
        self.entities(&self.item_tensor)
    }

    /// Head biases for `B` ids, `B x 1`.
    pub fn head_bias(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.bias_head.forward(ids)?)
    }

    /// Tail biases for `B` ids, `B x 1`.
    pub fn tail_bias(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.bias_tail.forward(ids)?)
    }

    /// Tail bias of every item as a row, `1 x N`.
    pub fn item_biases(&self) -> Result<Tensor> {
        Ok(self.bias_tail.forward(&self.item_tensor)?.t()?)
    }
}

fn embedding_table(rows: usize, dim: usize, init: Init, vb: &VarBuilder) -> Result<Embedding> {
    let weight = vb.get_with_hints((rows, dim), "weight", init)?;
    Ok(Embedding::new(weight, dim))
}

/// Extracts column `idx` of a `B x 3` input batch as a `B` tensor.
pub fn column(input: &Tensor, idx: usize) -> Result<Tensor> {
    let (_, cols) = input.dims2()?;
    if cols != 3 {
        return Err(Error::DimensionMismatch {
            expected: 3,
            got: cols,
        });
    }
    Ok(input.narrow(1, idx, 1)?.squeeze(1)?.contiguous()?)
}

/// Builds a `B x 3` input batch from `(head, relation, tail)` id triples.
pub fn input_tensor(triples: &[(u32, u32, u32)], device: &Device) -> Result<Tensor> {
    let flat: Vec<u32> = triples.iter().flat_map(|&(h, r, t)| [h, r, t]).collect();
    Ok(Tensor::from_vec(flat, (triples.len(), 3), device)?)
}

/// Scoring head over embedding tables.
///
/// Implementors provide `get_lhs`, `get_rhs` and `similarity_score`; batching,
/// biases and ranking come from the default methods.
pub trait CfModel: Send + Sync {
    /// Model name (e.g. "TransE").
    fn name(&self) -> &'static str;

    /// The shared tables.
    fn tables(&self) -> &EmbeddingTables;

    /// Query-side representation, `B x d`.
    fn get_lhs(&self, input: &Tensor) -> Result<Tensor>;

    /// Candidate-side representation of the tail column, `B x d`.
    fn get_rhs(&self, input: &Tensor) -> Result<Tensor>;

    /// Similarity of `lhs` and `rhs`.
    ///
    /// `B x 1` when `all_items = false`; `B x N` otherwise, where `rhs` is
    /// whatever [`CfModel::get_all_rhs`] returned.
    fn similarity_score(&self, lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor>;

    /// Query used when scoring against all items.
    fn get_lhs_for_all_items(&self, input: &Tensor) -> Result<Tensor> {
        self.get_lhs(input)
    }

    /// Representation of every item (`N x d` unless the head conditions
    /// items on the query).
    fn get_all_rhs(&self, _input: &Tensor) -> Result<Tensor> {
        self.tables().items()
    }

    /// Biased scores: `similarity + head_bias + tail_bias`.
    fn forward(&self, input: &Tensor, all_items: bool) -> Result<Tensor> {
        let tables = self.tables();
        let head_bias = tables.head_bias(&column(input, HEAD)?)?;

        if all_items {
            let lhs = self.get_lhs_for_all_items(input)?;
            let rhs = self.get_all_rhs(input)?;
            let score = self.similarity_score(&lhs, &rhs, true)?;
            Ok(score
                .broadcast_add(&head_bias)?
                .broadcast_add(&tables.item_biases()?)?)
        } else {
            let lhs = self.get_lhs(input)?;
            let rhs = self.get_rhs(input)?;
            let score = self.similarity_score(&lhs, &rhs, false)?;
            let tail_bias = tables.tail_bias(&column(input, TAIL)?)?;
            Ok(((score + head_bias)? + tail_bias)?)
        }
    }

    /// Scores of each triple in the batch.
    fn score_triples(&self, input: &Tensor) -> Result<Vec<f32>> {
        let scores = self.forward(input, false)?.squeeze(1)?;
        Ok(scores.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    /// Scores of every item for each query in the batch (`B` rows of `N`).
    fn score_all_items(&self, input: &Tensor) -> Result<Vec<Vec<f32>>> {
        let scores = self.forward(input, true)?;
        Ok(scores.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }

    /// Top-k items for `(head, relation, ?)`, sorted by descending score.
    fn predict_tail(&self, head: u32, relation: u32, k: usize) -> Result<Vec<Prediction>> {
        let tables = self.tables();
        let input = input_tensor(&[(head, relation, 0)], tables.device())?;
        let scores = self.forward(&input, true)?.squeeze(0)?;
        let (sorted, order) = scores.sort_last_dim(false)?;
        let sorted = sorted.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        let order = order.to_vec1::<u32>()?;

        Ok(order
            .into_iter()
            .zip(sorted)
            .take(k)
            .map(|(idx, score)| Prediction {
                item: tables.item_ids()[idx as usize],
                score,
            })
            .collect())
    }

    /// Embedding dimension.
    fn dim(&self) -> usize {
        self.tables().dim()
    }

    /// Number of entities.
    fn num_entities(&self) -> usize {
        self.tables().config().num_entities
    }

    /// Number of relations.
    fn num_relations(&self) -> usize {
        self.tables().config().num_relations
    }
}
