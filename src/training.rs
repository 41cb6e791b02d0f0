//! Training loop for the scoring heads.
//!
//! Training follows the standard negative-sampling paradigm:
//! 1. Shuffle the training triples with a seeded RNG
//! 2. For each positive `(u, r, i)` draw `negative_samples` corrupted tails
//!    uniformly from the item set
//! 3. Score positives and negatives with [`CfModel::forward`]
//! 4. Minimize the loss with a candle optimizer
//!
//! # Losses
//!
//! | Loss | Formula |
//! |------|---------|
//! | BCE | `mean(softplus(-pos)) + mean(softplus(neg))` |
//! | Hinge | `mean(relu(margin - pos + neg))` |
//!
//! Validation MRR is computed every `validate_every` epochs when a
//! validation split is present; `early_stopping` is the number of
//! validation rounds without improvement before training stops. With
//! `restore_best` the parameters of the best validation round are copied
//! back into the `VarMap` when training ends.
//!
//! # Example
//!
//! ```rust,ignore
//! use cf_kge::training::{Trainer, TrainingConfig};
//!
//! let config = TrainingConfig::default()
//!     .with_learning_rate(0.01)
//!     .with_epochs(50);
//! let report = Trainer::new(config).fit(model.as_ref(), &varmap, &dataset)?;
//! println!("final loss {:.4}", report.final_loss().unwrap_or(0.0));
//! ```

use crate::dataset::{to_tensor, Dataset, TripleIds};
use crate::error::{Error, Result};
use crate::evaluation::{Evaluator, RankMetrics};
use crate::math::softplus;
use crate::model::{input_tensor, CfModel};
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap, SGD};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LossKind {
    /// Binary cross-entropy on logits.
    Bce,
    /// Margin ranking loss.
    Hinge { margin: f64 },
}

/// Optimizer choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Adam with decoupled weight decay.
    #[serde(rename = "adamw")]
    AdamW,
    /// Plain SGD.
    Sgd,
}

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Embedding dimension (default: 32).
    pub dim: usize,
    /// Std of the normal initialization (default: 1e-3).
    pub init_size: f64,
    /// Learning rate (default: 0.01).
    pub learning_rate: f64,
    /// Number of training epochs (default: 100).
    pub epochs: usize,
    /// Batch size (default: 256).
    pub batch_size: usize,
    /// Negative samples per positive (default: 5).
    pub negative_samples: usize,
    /// Loss (default: BCE).
    pub loss: LossKind,
    /// Optimizer (default: AdamW).
    pub optimizer: OptimizerKind,
    /// Decoupled weight decay, AdamW only (default: 0.0).
    pub weight_decay: f64,
    /// Random seed (default: 42).
    pub seed: u64,
    /// Validation rounds without improvement before stopping (None = never).
    pub early_stopping: Option<usize>,
    /// Validate every this many epochs; 0 disables validation (default: 5).
    pub validate_every: usize,
    /// Reload the best validation round's parameters at the end (default: true).
    pub restore_best: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dim: 32,
            init_size: 1e-3,
            learning_rate: 0.01,
            epochs: 100,
            batch_size: 256,
            negative_samples: 5,
            loss: LossKind::Bce,
            optimizer: OptimizerKind::AdamW,
            weight_decay: 0.0,
            seed: 42,
            early_stopping: Some(5),
            validate_every: 5,
            restore_best: true,
        }
    }
}

impl TrainingConfig {
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    pub fn with_init_size(mut self, init_size: f64) -> Self {
        self.init_size = init_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_negative_samples(mut self, n: usize) -> Self {
        self.negative_samples = n;
        self
    }

    pub fn with_loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_early_stopping(mut self, patience: Option<usize>) -> Self {
        self.early_stopping = patience;
        self
    }

    pub fn with_validate_every(mut self, every: usize) -> Self {
        self.validate_every = every;
        self
    }

    pub fn with_restore_best(mut self, restore: bool) -> Self {
        self.restore_best = restore;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Validation("batch_size must be > 0".into()));
        }
        if self.negative_samples == 0 {
            return Err(Error::Validation("negative_samples must be > 0".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::Validation(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if let LossKind::Hinge { margin } = self.loss {
            if margin < 0.0 {
                return Err(Error::Validation(format!("negative margin {}", margin)));
            }
        }
        Ok(())
    }
}

/// Per-epoch progress passed to [`Trainer::fit_with_callback`].
#[derive(Debug, Clone)]
pub struct EpochStats {
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Mean batch loss.
    pub loss: f32,
    /// Validation metrics, when this epoch validated.
    pub validation: Option<RankMetrics>,
}

/// Training results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Mean loss per epoch.
    pub loss_history: Vec<f32>,
    /// Validation MRR per validation round.
    pub validation_mrr: Vec<f64>,
    /// Best epoch based on validation MRR (last epoch without validation).
    pub best_epoch: usize,
    /// Metrics at the best epoch.
    pub best_validation: Option<RankMetrics>,
    pub epochs_completed: usize,
    pub early_stopped: bool,
    /// The parameters were reset to those of `best_epoch` after training.
    #[serde(default)]
    pub restored_best: bool,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.loss_history.last().copied()
    }
}

enum Optim {
    AdamW(AdamW),
    Sgd(SGD),
}

impl Optim {
    fn new(config: &TrainingConfig, varmap: &VarMap) -> Result<Self> {
        let vars = varmap.all_vars();
        Ok(match config.optimizer {
            OptimizerKind::AdamW => Self::AdamW(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: config.learning_rate,
                    weight_decay: config.weight_decay,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => {
                if config.weight_decay > 0.0 {
                    tracing::warn!("weight_decay is ignored by SGD");
                }
                Self::Sgd(SGD::new(vars, config.learning_rate)?)
            }
        })
    }

    fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::AdamW(opt) => opt.backward_step(loss)?,
            Self::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }
}

/// Loss of `pos` (`B x 1`) against `neg` (`B x K`).
pub fn compute_loss(loss: LossKind, pos: &Tensor, neg: &Tensor) -> Result<Tensor> {
    match loss {
        LossKind::Bce => {
            let pos_term = softplus(&pos.neg()?)?.mean_all()?;
            let neg_term = softplus(neg)?.mean_all()?;
            Ok((pos_term + neg_term)?)
        }
        LossKind::Hinge { margin } => Ok(neg
            .broadcast_sub(pos)?
            .affine(1.0, margin)?
            .relu()?
            .mean_all()?),
    }
}

/// Draw `k` corrupted tails for each triple. The true tail is avoided when
/// the item set has another candidate.
///
/// Fails when `items` is empty.
pub fn sample_negatives(
    batch: &[TripleIds],
    items: &[u32],
    k: usize,
    rng: &mut impl Rng,
) -> Result<Vec<(u32, u32, u32)>> {
    if items.is_empty() {
        return Err(Error::Validation(
            "cannot sample negatives from an empty item set".into(),
        ));
    }
    let mut out = Vec::with_capacity(batch.len() * k);
    for t in batch {
        for _ in 0..k {
            let mut tail = items[rng.random_range(0..items.len())];
            if items.len() > 1 {
                while tail == t.tail {
                    tail = items[rng.random_range(0..items.len())];
                }
            }
            out.push((t.head, t.relation, tail));
        }
    }
    Ok(out)
}

/// Copy of every parameter in `varmap`, keyed by variable name.
fn snapshot_vars(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Validation("parameter store lock poisoned".into()))?;
    let mut snapshot = HashMap::with_capacity(data.len());
    for (name, var) in data.iter() {
        snapshot.insert(name.clone(), var.as_tensor().copy()?);
    }
    Ok(snapshot)
}

/// Overwrite the parameters in `varmap` with a snapshot.
fn restore_vars(varmap: &VarMap, snapshot: &HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Validation("parameter store lock poisoned".into()))?;
    for (name, var) in data.iter() {
        match snapshot.get(name) {
            Some(saved) => var.set(saved)?,
            None => return Err(Error::NotFound(format!("snapshot of '{}'", name))),
        }
    }
    Ok(())
}

/// Mini-batch trainer.
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model`, whose parameters live in `varmap`.
    pub fn fit(&self, model: &dyn CfModel, varmap: &VarMap, dataset: &Dataset) -> Result<TrainingReport> {
        self.fit_with_callback(model, varmap, dataset, |_| {})
    }

    /// Like [`Trainer::fit`], calling `on_epoch` after every epoch.
    pub fn fit_with_callback(
        &self,
        model: &dyn CfModel,
        varmap: &VarMap,
        dataset: &Dataset,
        mut on_epoch: impl FnMut(&EpochStats),
    ) -> Result<TrainingReport> {
        self.config.validate()?;
        if dataset.train.is_empty() || dataset.items.is_empty() {
            return Err(Error::Validation("nothing to train on".into()));
        }

        let config = &self.config;
        let device = model.tables().device().clone();
        let mut optim = Optim::new(config, varmap)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let evaluator = Evaluator::with_known(dataset.all_triples());
        let validating = config.validate_every > 0 && !dataset.valid.is_empty();

        let mut order: Vec<TripleIds> = dataset.train.clone();
        let mut report = TrainingReport::default();
        let mut rounds_without_improvement = 0;
        let mut best_vars: Option<HashMap<String, Tensor>> = None;

        tracing::info!(
            "training {} on {} triples ({} items, dim {}, {:?}, {:?})",
            model.name(),
            order.len(),
            dataset.items.len(),
            model.dim(),
            config.loss,
            config.optimizer
        );

        for epoch in 0..config.epochs {
            order.shuffle(&mut rng);

            let mut epoch_loss = 0.0f32;
            let mut num_batches = 0usize;
            for batch in order.chunks(config.batch_size) {
                let pos_input = to_tensor(batch, &device)?;
                let negatives =
                    sample_negatives(batch, &dataset.items, config.negative_samples, &mut rng)?;
                let neg_input = input_tensor(&negatives, &device)?;

                let pos = model.forward(&pos_input, false)?;
                let neg = model
                    .forward(&neg_input, false)?
                    .reshape((batch.len(), config.negative_samples))?;
                let loss = compute_loss(config.loss, &pos, &neg)?;
                optim.backward_step(&loss)?;

                let value = loss.to_scalar::<f32>()?;
                tracing::debug!("epoch {} batch {}: loss={:.4}", epoch, num_batches, value);
                epoch_loss += value;
                num_batches += 1;
            }

            let avg_loss = epoch_loss / num_batches.max(1) as f32;
            if !avg_loss.is_finite() {
                return Err(Error::Validation(format!(
                    "loss diverged at epoch {}: {}",
                    epoch, avg_loss
                )));
            }
            report.loss_history.push(avg_loss);
            report.epochs_completed = epoch + 1;
            tracing::info!("Epoch {}/{}: loss={:.4}", epoch + 1, config.epochs, avg_loss);

            let mut validation = None;
            if validating && (epoch + 1) % config.validate_every == 0 {
                let metrics = evaluator.evaluate(model, &dataset.valid, config.batch_size)?;
                tracing::info!("Validation: {}", metrics.summary());
                report.validation_mrr.push(metrics.mrr);

                let is_better = report
                    .best_validation
                    .as_ref()
                    .map(|best| metrics.mrr > best.mrr)
                    .unwrap_or(true);
                if is_better {
                    report.best_epoch = epoch;
                    report.best_validation = Some(metrics.clone());
                    rounds_without_improvement = 0;
                    if config.restore_best {
                        best_vars = Some(snapshot_vars(varmap)?);
                    }
                } else {
                    rounds_without_improvement += 1;
                }
                validation = Some(metrics);
            } else if !validating {
                report.best_epoch = epoch;
            }

            on_epoch(&EpochStats {
                epoch,
                loss: avg_loss,
                validation,
            });

            if let Some(patience) = config.early_stopping {
                if validating && rounds_without_improvement >= patience {
                    tracing::warn!(
                        "early stopping at epoch {}: {} validation rounds without improvement",
                        epoch + 1,
                        rounds_without_improvement
                    );
                    report.early_stopped = true;
                    break;
                }
            }
        }

        if let Some(saved) = best_vars {
            restore_vars(varmap, &saved)?;
            report.restored_best = true;
            tracing::info!("restored parameters from epoch {}", report.best_epoch + 1);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_config_serde_defaults() {
        let config: TrainingConfig =
            serde_json::from_str(r#"{"dim": 16, "loss": {"type": "hinge", "margin": 2.0}}"#)
                .unwrap();
        assert_eq!(config.dim, 16);
        assert_eq!(config.loss, LossKind::Hinge { margin: 2.0 });
        assert_eq!(config.optimizer, OptimizerKind::AdamW);
        assert_eq!(config.batch_size, TrainingConfig::default().batch_size);

        let kind: OptimizerKind = serde_json::from_str("\"sgd\"").unwrap();
        assert_eq!(kind, OptimizerKind::Sgd);
        assert_eq!(serde_json::to_string(&OptimizerKind::AdamW).unwrap(), "\"adamw\"");
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        assert!(TrainingConfig::default().with_batch_size(0).validate().is_err());
        assert!(TrainingConfig::default().with_negative_samples(0).validate().is_err());
        assert!(TrainingConfig::default().with_learning_rate(0.0).validate().is_err());
        assert!(TrainingConfig::default()
            .with_loss(LossKind::Hinge { margin: -1.0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_bce_loss_value() {
        let dev = Device::Cpu;
        let pos = Tensor::new(&[[0.0f32], [0.0]], &dev).unwrap();
        let neg = Tensor::new(&[[0.0f32, 0.0], [0.0, 0.0]], &dev).unwrap();
        let loss = compute_loss(LossKind::Bce, &pos, &neg)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        // 2 * ln 2
        assert!((loss - 2.0 * std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_hinge_loss_value() {
        let dev = Device::Cpu;
        let pos = Tensor::new(&[[1.0f32], [0.0]], &dev).unwrap();
        let neg = Tensor::new(&[[0.0f32, 2.0], [-5.0, 0.5]], &dev).unwrap();
        let loss = compute_loss(LossKind::Hinge { margin: 1.0 }, &pos, &neg)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        // relu(1 - 1 + 0) = 0, relu(1 - 1 + 2) = 2, relu(1 - 0 - 5) = 0, relu(1 - 0 + 0.5) = 1.5
        assert!((loss - 3.5 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_negatives_avoid_true_tail() {
        let mut rng = StdRng::seed_from_u64(7);
        let batch = [TripleIds::new(0, 0, 5), TripleIds::new(1, 1, 6)];
        let negatives = sample_negatives(&batch, &[5, 6, 7], 10, &mut rng).unwrap();
        assert_eq!(negatives.len(), 20);
        for (i, &(h, r, t)) in negatives.iter().enumerate() {
            let pos = &batch[i / 10];
            assert_eq!((h, r), (pos.head, pos.relation));
            assert_ne!(t, pos.tail);
            assert!([5, 6, 7].contains(&t));
        }
    }

    #[test]
    fn test_single_item_negatives_fall_back_to_true_tail() {
        let mut rng = StdRng::seed_from_u64(7);
        let negatives = sample_negatives(&[TripleIds::new(0, 0, 3)], &[3], 2, &mut rng).unwrap();
        assert_eq!(negatives, vec![(0, 0, 3), (0, 0, 3)]);
    }

    #[test]
    fn test_negatives_from_empty_items_is_error() {
        let mut rng = StdRng::seed_from_u64(7);
        let err = sample_negatives(&[TripleIds::new(0, 0, 3)], &[], 2, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_restore_vars_rolls_back_updates() {
        let varmap = VarMap::new();
        let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &Device::Cpu);
        let w = vb
            .get_with_hints((2,), "w", candle_nn::Init::Const(1.0))
            .unwrap();
        let saved = snapshot_vars(&varmap).unwrap();

        let vars = varmap.all_vars();
        vars[0].set(&Tensor::new(&[5.0f32, 5.0], &Device::Cpu).unwrap()).unwrap();
        assert_eq!(w.to_vec1::<f32>().unwrap(), vec![5.0, 5.0]);

        restore_vars(&varmap, &saved).unwrap();
        assert_eq!(w.to_vec1::<f32>().unwrap(), vec![1.0, 1.0]);
    }
}
