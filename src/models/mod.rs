//! Euclidean scoring heads.
//!
//! | Model | lhs | rhs | similarity |
//! |-------|-----|-----|------------|
//! | [`SimpleFactor`] | h ⊙ r | t | ⟨lhs, rhs⟩ |
//! | [`TransE`] | h + r | t | -‖lhs - rhs‖² |
//! | [`MuR`] | R_r ⊙ h | t + r | -‖lhs - rhs‖² |
//! | [`RotRef`] | att(rot_r(h), ref_r(h)) + r | t | -‖lhs - rhs‖² |
//! | [`UserAttentive`] | u | Σ_k α_k (t + r_k) | -‖lhs - rhs‖² |
//!
//! All heads except `UserAttentive` share the Euclidean base: the candidate
//! side is the tail embedding and similarity is the negative squared
//! distance ([`euclidean_rhs`], [`euclidean_similarity`]).

use crate::error::Result;
use crate::math::euclidean_sq_distance;
use crate::model::{column, CfModel, EmbeddingTables, ModelConfig, TAIL};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

mod mur;
mod rotref;
mod simple_factor;
mod transe;
mod user_attentive;

pub use mur::MuR;
pub use rotref::RotRef;
pub use simple_factor::SimpleFactor;
pub use transe::TransE;
pub use user_attentive::UserAttentive;

/// Euclidean candidate side: the tail embedding.
pub fn euclidean_rhs(tables: &EmbeddingTables, input: &Tensor) -> Result<Tensor> {
    tables.entities(&column(input, TAIL)?)
}

/// Euclidean similarity: negative squared distance.
pub fn euclidean_similarity(lhs: &Tensor, rhs: &Tensor, all_items: bool) -> Result<Tensor> {
    Ok(euclidean_sq_distance(lhs, rhs, all_items)?.neg()?)
}

/// Available scoring heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum ModelKind {
    #[serde(rename = "simple_factor")]
    #[value(name = "simple-factor")]
    SimpleFactor,
    #[serde(rename = "transe")]
    #[value(name = "transe")]
    TransE,
    #[serde(rename = "mur")]
    #[value(name = "mur")]
    MuR,
    #[serde(rename = "rotref")]
    #[value(name = "rotref")]
    RotRef,
    #[serde(rename = "user_attentive")]
    #[value(name = "user-attentive")]
    UserAttentive,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SimpleFactor => "SimpleFactor",
            Self::TransE => "TransE",
            Self::MuR => "MuR",
            Self::RotRef => "RotRef",
            Self::UserAttentive => "UserAttentive",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a scoring head with its parameters registered under `vb`.
pub fn build_model(
    kind: ModelKind,
    config: &ModelConfig,
    item_ids: &[u32],
    vb: &VarBuilder,
) -> Result<Box<dyn CfModel>> {
    let model: Box<dyn CfModel> = match kind {
        ModelKind::SimpleFactor => Box::new(SimpleFactor::new(config, item_ids, vb)?),
        ModelKind::TransE => Box::new(TransE::new(config, item_ids, vb)?),
        ModelKind::MuR => Box::new(MuR::new(config, item_ids, vb)?),
        ModelKind::RotRef => Box::new(RotRef::new(config, item_ids, vb)?),
        ModelKind::UserAttentive => Box::new(UserAttentive::new(config, item_ids, vb)?),
    };
    Ok(model)
}
