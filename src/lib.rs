//! # cf-kge
//!
//! Euclidean knowledge-graph embeddings for collaborative filtering, on
//! [candle](https://github.com/huggingface/candle).
//!
//! Users, items and their interactions form a knowledge graph of
//! `(user, relation, item)` triples. Each model here is a scoring head that
//! maps a batch of id triples to plausibility scores, so recommendation is
//! link prediction: rank every item for `(user, relation, ?)`.
//!
//! ## Models
//!
//! | Model | Query | Similarity |
//! |-------|-------|------------|
//! | [`SimpleFactor`] | h ⊙ r | dot product |
//! | [`TransE`] | h + r | -‖q - t‖² |
//! | [`MuR`] | R_r ⊙ h (tail shifted by r) | -‖q - (t + r)‖² |
//! | [`RotRef`] | attention over Givens rotation/reflection of h, + r | -‖q - t‖² |
//! | [`UserAttentive`] | u (item viewed through user-weighted aspects) | -‖u - t_u‖² |
//!
//! Every score also carries a learned head bias and tail bias.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cf_kge::{build_model, Dataset, Evaluator, ModelConfig, ModelKind, Trainer, TrainingConfig};
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//!
//! let data = Dataset::from_tsv_files("train.tsv".as_ref(), Some("valid.tsv".as_ref()), None)?;
//! let config = TrainingConfig::default().with_dim(32);
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let model_config = ModelConfig::new(data.num_entities(), data.num_relations(), config.dim);
//! let model = build_model(ModelKind::RotRef, &model_config, &data.items, &vb)?;
//!
//! Trainer::new(config).fit(model.as_ref(), &varmap, &data)?;
//! let metrics = Evaluator::with_known(data.all_triples()).evaluate(model.as_ref(), &data.valid, 256)?;
//! println!("{}", metrics.summary());
//! ```

pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod math;
pub mod model;
pub mod models;
pub mod training;

pub use checkpoint::{Checkpoint, ModelMeta};
pub use dataset::{Dataset, Triple, TripleIds, Vocab};
pub use error::{Error, Result};
pub use evaluation::{Evaluator, RankMetrics};
pub use model::{CfModel, EmbeddingTables, ModelConfig, Prediction};
pub use models::{build_model, ModelKind, MuR, RotRef, SimpleFactor, TransE, UserAttentive};
pub use training::{LossKind, OptimizerKind, Trainer, TrainingConfig, TrainingReport};
