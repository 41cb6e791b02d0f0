//! MuR: Multi-relational embeddings with relation-specific scaling.
//!
//! The Euclidean counterpart of MuRP ([Balazevic et al. 2019](https://arxiv.org/abs/1905.09791)).
//! Each relation has a diagonal transform `R_r` that rescales the head and a
//! translation `r` applied on the tail side:
//!
//! ```text
//! score = -||R_r ⊙ h - (t + r)||² + b_h + b_t
//! ```
//!
//! Different relations can emphasize different dimensions of the same entity.
//!
//! When scoring against all items the translation is moved to the query side,
//! `-||(R_r ⊙ h - r) - t||²`, so the candidates stay a plain `N x d` table.

use super::euclidean_similarity;
use crate::error::Result;
use crate::model::{column, CfModel, EmbeddingTables, ModelConfig, HEAD, RELATION, TAIL};
use candle_core::Tensor;
use candle_nn::{Embedding, Init, Module, VarBuilder};

/// MuR scoring head.
#[derive(Debug, Clone)]
pub struct MuR {
    tables: EmbeddingTables,
    /// Diagonal relation transforms, `R x d`.
    transforms: Embedding,
}

impl MuR {
    pub fn new(config: &ModelConfig, item_ids: &[u32], vb: &VarBuilder) -> Result<Self> {
        let tables = EmbeddingTables::new(config, item_ids, vb)?;
        let weight = vb.pp("transforms").get_with_hints(
            (config.num_relations, config.dim),
            "weight",
            Init::Uniform { lo: -1.0, up: 1.0 },
        )?;
        Ok(Self {
            tables,
            transforms: Embedding::new(weight, config.dim),
        })
    }

    /// Diagonal transforms for the relations in `ids`.
    pub fn transforms(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.transforms.forward(ids)?)
    }
}

impl CfModel for MuR {
    fn name(&self) -> &'static str {
        "MuR"
    }

    fn tables(&self) -> &EmbeddingTables {
        &self.tables
    }

    fn get_lhs(&self, input: &Tensor) -> Result<Tensor> {
        let heads = self.tables.entities(&column(input, HEAD)?)?;
        let transforms = self.transforms(&column(input, RELATION)?)?;
        Ok((transforms * heads)?)
    }

    fn get_rhs(&self, input: &Tensor) -> Result<Tensor> {
        let tails = self.tables.entities(&column(input, TAIL)?)?;
        let additions = self.tables.relations(&column(input, RELATION)?)?;
        Ok((tails + additions)?)
    }

    fn get_lhs_for_all_items(&self, input: &Tensor) -> Result<Tensor> {
        let additions = self.tables.relations(&column(input, RELATION)?)?;
        Ok((self.get_lhs(input)? - additions)?)
    }

    fn similarity_score(&self, lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor> {
        euclidean_similarity(lhs, rhs, all_items)
    }
}
