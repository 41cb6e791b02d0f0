//! Saving and restoring trained models.
//!
//! A checkpoint is a directory with two files:
//!
//! | File | Contents |
//! |------|----------|
//! | `weights.safetensors` | every `Var` in the model's `VarMap` |
//! | `meta.json` | model kind, table shapes, item set, vocabulary |
//!
//! Loading rebuilds the head from `meta.json` (which registers variables
//! with the right names and shapes) and then overwrites them from the
//! safetensors file.

use crate::dataset::Vocab;
use crate::error::{Error, Result};
use crate::model::{CfModel, ModelConfig};
use crate::models::{build_model, ModelKind};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const META_FILE: &str = "meta.json";

/// Everything needed to rebuild a head before loading its weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub kind: ModelKind,
    pub config: ModelConfig,
    /// Candidate items in scoring order.
    pub items: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct MetaFile {
    #[serde(flatten)]
    meta: ModelMeta,
    vocab: Vocab,
}

/// A restored model with its parameters and vocabulary.
pub struct Checkpoint {
    pub model: Box<dyn CfModel>,
    pub varmap: VarMap,
    pub vocab: Vocab,
    pub meta: ModelMeta,
}

/// Write `varmap` and the metadata to `dir`, creating it if needed.
pub fn save(dir: &Path, varmap: &VarMap, vocab: &Vocab, meta: &ModelMeta) -> Result<()> {
    fs::create_dir_all(dir)?;
    varmap.save(dir.join(WEIGHTS_FILE))?;

    let file = MetaFile {
        meta: meta.clone(),
        vocab: vocab.clone(),
    };
    fs::write(dir.join(META_FILE), serde_json::to_string_pretty(&file)?)?;
    tracing::info!("saved {} checkpoint to {}", meta.kind, dir.display());
    Ok(())
}

/// Rebuild the model stored in `dir` on `device`.
pub fn load(dir: &Path, device: &Device) -> Result<Checkpoint> {
    let meta_path = dir.join(META_FILE);
    if !meta_path.exists() {
        return Err(Error::NotFound(format!("{}", meta_path.display())));
    }
    let file: MetaFile = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
    let vocab = file.vocab;
    let meta = file.meta;

    if vocab.num_entities() != meta.config.num_entities
        || vocab.num_relations() != meta.config.num_relations
    {
        return Err(Error::Validation(format!(
            "vocabulary ({} entities, {} relations) does not match model ({}, {})",
            vocab.num_entities(),
            vocab.num_relations(),
            meta.config.num_entities,
            meta.config.num_relations
        )));
    }

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = build_model(meta.kind, &meta.config, &meta.items, &vb)?;
    varmap.load(dir.join(WEIGHTS_FILE))?;
    tracing::info!("loaded {} checkpoint from {}", meta.kind, dir.display());

    Ok(Checkpoint {
        model,
        varmap,
        vocab,
        meta,
    })
}
