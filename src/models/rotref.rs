//! RotRef: attention over relation-specific rotations and reflections.
//!
//! The Euclidean counterpart of AttH ([Chami et al. 2020](https://arxiv.org/abs/2005.00545)).
//! Each relation owns three `d`-dimensional parameters:
//!
//! - a Givens **rotation** (good for composition and anti-symmetry)
//! - a Givens **reflection** (good for symmetric relations)
//! - a **context** vector that decides how much of each to use
//!
//! ```text
//! q_rot = Rot_r(h)            q_ref = Ref_r(h)
//! α     = softmax(<c_r, q_ref> / √d, <c_r, q_rot> / √d)
//! lhs   = α_ref q_ref + α_rot q_rot + r
//! score = -||lhs - t||² + b_h + b_t
//! ```
//!
//! The dimension must be even since Givens transforms act on pairs.

use super::{euclidean_rhs, euclidean_similarity};
use crate::error::{Error, Result};
use crate::math::{givens_reflection, givens_rotations};
use crate::model::{column, CfModel, EmbeddingTables, ModelConfig, HEAD, RELATION};
use candle_core::{Tensor, D};
use candle_nn::{Embedding, Init, Module, VarBuilder};

/// Rotation/reflection attention head.
#[derive(Debug, Clone)]
pub struct RotRef {
    tables: EmbeddingTables,
    rotations: Embedding,
    reflections: Embedding,
    context: Embedding,
    scale: f64,
}

impl RotRef {
    pub fn new(config: &ModelConfig, item_ids: &[u32], vb: &VarBuilder) -> Result<Self> {
        if config.dim % 2 != 0 {
            return Err(Error::Validation(format!(
                "RotRef needs an even dimension, got {}",
                config.dim
            )));
        }
        let tables = EmbeddingTables::new(config, item_ids, vb)?;
        let shape = (config.num_relations, config.dim);

        let uniform = Init::Uniform { lo: -1.0, up: 1.0 };
        let rotations = vb.pp("rotations").get_with_hints(shape, "weight", uniform)?;
        let reflections = vb.pp("reflections").get_with_hints(shape, "weight", uniform)?;
        let context = vb.pp("context").get_with_hints(
            shape,
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: config.init_size,
            },
        )?;

        Ok(Self {
            tables,
            rotations: Embedding::new(rotations, config.dim),
            reflections: Embedding::new(reflections, config.dim),
            context: Embedding::new(context, config.dim),
            scale: 1.0 / (config.dim as f64).sqrt(),
        })
    }

    /// Reflected and rotated heads stacked as `B x 2 x d` (reflection first).
    fn candidates(&self, input: &Tensor) -> Result<(Tensor, Tensor)> {
        let relation_ids = column(input, RELATION)?;
        let heads = self.tables.entities(&column(input, HEAD)?)?;

        let rot_q = givens_rotations(&self.rotations.forward(&relation_ids)?, &heads)?;
        let ref_q = givens_reflection(&self.reflections.forward(&relation_ids)?, &heads)?;
        let candidates = Tensor::stack(&[&ref_q, &rot_q], 1)?;
        Ok((candidates, relation_ids))
    }

    /// Attention weights over `[reflection, rotation]`, `B x 2`.
    pub fn attention_weights(&self, input: &Tensor) -> Result<Tensor> {
        let (candidates, relation_ids) = self.candidates(input)?;
        self.weights(&candidates, &relation_ids)
    }

    fn weights(&self, candidates: &Tensor, relation_ids: &Tensor) -> Result<Tensor> {
        let context = self.context.forward(relation_ids)?.unsqueeze(1)?;
        let logits = candidates
            .broadcast_mul(&context)?
            .sum(D::Minus1)?
            .affine(self.scale, 0.0)?;
        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
    }

    /// Attention-weighted combination of the transformed heads, `B x d`.
    pub fn get_heads(&self, input: &Tensor) -> Result<Tensor> {
        let (candidates, relation_ids) = self.candidates(input)?;
        let weights = self.weights(&candidates, &relation_ids)?.unsqueeze(2)?;
        Ok(candidates.broadcast_mul(&weights)?.sum(1)?)
    }
}

impl CfModel for RotRef {
    fn name(&self) -> &'static str {
        "RotRef"
    }

    fn tables(&self) -> &EmbeddingTables {
        &self.tables
    }

    fn get_lhs(&self, input: &Tensor) -> Result<Tensor> {
        let heads = self.get_heads(input)?;
        let relations = self.tables.relations(&column(input, RELATION)?)?;
        Ok((heads + relations)?)
    }

    fn get_rhs(&self, input: &Tensor) -> Result<Tensor> {
        euclidean_rhs(&self.tables, input)
    }

    fn similarity_score(&self, lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor> {
        euclidean_similarity(lhs, rhs, all_items)
    }
}
