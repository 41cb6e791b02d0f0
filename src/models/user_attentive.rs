//! UserAttentive: user-conditioned item representations.
//!
//! The relation table is treated as a set of item *aspects*. Each user looks
//! at an item through the aspects the pair shares:
//!
//! ```text
//! α_k      = softmax_k(<u ⊙ t, r_k> / √d)
//! rhs(u,t) = Σ_k α_k (t + r_k) = t + Σ_k α_k r_k
//! score    = -||u - rhs(u,t)||² + b_u + b_t
//! ```
//!
//! The weights depend on both the user and the item, so the same item is
//! shifted differently for different users and vice versa.
//!
//! Unlike the Euclidean heads the candidate side depends on the query, so
//! scoring against all items produces a `B x N x d` tensor and the
//! similarity uses the batched all-pairs distance:
//!
//! | `all_items` | lhs | rhs | score |
//! |-------------|-----|-----|-------|
//! | false | `B x d` | `B x d` | `B x 1` |
//! | true | `B x d` | `B x N x d` | `B x N` |

use crate::error::Result;
use crate::math::{euclidean_sq_distance, euclidean_sq_distance_batched_all_pairs};
use crate::model::{column, CfModel, EmbeddingTables, ModelConfig, HEAD, TAIL};
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

/// User-attentive scoring head.
#[derive(Debug, Clone)]
pub struct UserAttentive {
    tables: EmbeddingTables,
    scale: f64,
}

impl UserAttentive {
    pub fn new(config: &ModelConfig, item_ids: &[u32], vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            tables: EmbeddingTables::new(config, item_ids, vb)?,
            scale: 1.0 / (config.dim as f64).sqrt(),
        })
    }

    /// Attention of each user over the aspects of its own item, `B x R`.
    pub fn aspect_weights(&self, input: &Tensor) -> Result<Tensor> {
        let users = self.tables.entities(&column(input, HEAD)?)?;
        let items = self.tables.entities(&column(input, TAIL)?)?;
        let aspects = self.tables.all_relations();

        let logits = (users * items)?
            .matmul(&aspects.t()?)?
            .affine(self.scale, 0.0)?;
        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
    }
}

impl CfModel for UserAttentive {
    fn name(&self) -> &'static str {
        "UserAttentive"
    }

    fn tables(&self) -> &EmbeddingTables {
        &self.tables
    }

    fn get_lhs(&self, input: &Tensor) -> Result<Tensor> {
        self.tables.entities(&column(input, HEAD)?)
    }

    fn get_rhs(&self, input: &Tensor) -> Result<Tensor> {
        let items = self.tables.entities(&column(input, TAIL)?)?;
        let weights = self.aspect_weights(input)?;
        let shift = weights.matmul(self.tables.all_relations())?;
        Ok((items + shift)?)
    }

    fn get_all_rhs(&self, input: &Tensor) -> Result<Tensor> {
        let users = self.tables.entities(&column(input, HEAD)?)?;
        let items = self.tables.items()?;
        let aspects = self.tables.all_relations();
        let (batch, dim) = users.dims2()?;
        let num_items = items.dim(0)?;
        let num_aspects = aspects.dim(0)?;

        // <u ⊙ t, r_k> = <u ⊙ r_k, t>: B x R x d against N x d, then B x N x R
        let user_aspect = users.unsqueeze(1)?.broadcast_mul(&aspects.unsqueeze(0)?)?;
        let logits = user_aspect
            .broadcast_matmul(&items.t()?)?
            .transpose(1, 2)?
            .contiguous()?
            .affine(self.scale, 0.0)?;
        let weights = candle_nn::ops::softmax(&logits, D::Minus1)?;

        let shift = weights
            .reshape((batch * num_items, num_aspects))?
            .matmul(aspects)?
            .reshape((batch, num_items, dim))?;
        Ok(shift.broadcast_add(&items.unsqueeze(0)?)?)
    }

    fn similarity_score(&self, lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor> {
        if all_items {
            Ok(euclidean_sq_distance_batched_all_pairs(lhs, rhs)?.neg()?)
        } else {
            Ok(euclidean_sq_distance(lhs, rhs, false)?.neg()?)
        }
    }
}
