//! cf-kge CLI - train and evaluate collaborative-filtering KG embeddings.
//!
//! # Usage
//!
//! ```bash
//! # Train RotRef and write a checkpoint directory
//! cf-kge train train.tsv --valid valid.tsv --model rotref -o out/
//!
//! # Override a JSON training config from the command line
//! cf-kge train train.tsv --config train.json --epochs 20 -o out/
//!
//! # Filtered ranking metrics on a held-out split
//! cf-kge evaluate out/ test.tsv --known train.tsv --known valid.tsv
//!
//! # Top items for a user
//! cf-kge predict out/ --head u1 --relation likes --top 10
//! ```
//!
//! Logging goes through `tracing`; set `RUST_LOG=cf_kge=debug` for per-batch losses.

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use cf_kge::checkpoint::{self, ModelMeta};
use cf_kge::dataset::read_tsv;
use cf_kge::{build_model, Dataset, Evaluator, ModelConfig, ModelKind, Trainer, TrainingConfig};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "cf-kge")]
#[command(about = "Knowledge graph embeddings for collaborative filtering", long_about = None)]
struct Cli {
    /// Compute device
    #[arg(long, global = true, default_value = "cpu")]
    device: DeviceArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and save a checkpoint
    Train {
        /// Training triples (TSV: head, relation, tail)
        train: PathBuf,

        /// Validation triples
        #[arg(long)]
        valid: Option<PathBuf>,

        /// Test triples, evaluated after training
        #[arg(long)]
        test: Option<PathBuf>,

        /// Scoring head
        #[arg(short, long, default_value = "rotref")]
        model: ModelKind,

        /// Training config (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Checkpoint directory
        #[arg(short, long)]
        output: PathBuf,

        /// Embedding dimension
        #[arg(long)]
        dim: Option<usize>,

        /// Number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Filtered ranking metrics for a checkpoint
    Evaluate {
        /// Checkpoint directory
        checkpoint: PathBuf,

        /// Triples to rank
        input: PathBuf,

        /// Extra known triples to filter (repeatable)
        #[arg(long)]
        known: Vec<PathBuf>,

        /// Rank against all items without filtering
        #[arg(long)]
        raw: bool,

        #[arg(long, default_value = "256")]
        batch_size: usize,
    },

    /// Show the top-k items for (head, relation, ?)
    Predict {
        /// Checkpoint directory
        checkpoint: PathBuf,

        #[arg(long)]
        head: String,

        #[arg(long)]
        relation: String,

        /// Number of items to show
        #[arg(short, long, default_value = "10")]
        top: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceArg {
    Cpu,
    /// First CUDA device (requires the `cuda` feature)
    Cuda,
    /// First Metal device (requires the `metal` feature)
    Metal,
}

impl DeviceArg {
    fn device(self) -> Result<Device> {
        Ok(match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda => Device::new_cuda(0).context("CUDA device unavailable")?,
            Self::Metal => Device::new_metal(0).context("Metal device unavailable")?,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("cf_kge=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let device = cli.device.device()?;

    match cli.command {
        Commands::Train {
            train,
            valid,
            test,
            model,
            config,
            output,
            dim,
            epochs,
            lr,
            batch_size,
            seed,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dim) = dim {
                config.dim = dim;
            }
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(lr) = lr {
                config.learning_rate = lr;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            cmd_train(
                &train,
                valid.as_deref(),
                test.as_deref(),
                model,
                config,
                &output,
                &device,
            )
        }
        Commands::Evaluate {
            checkpoint,
            input,
            known,
            raw,
            batch_size,
        } => cmd_evaluate(&checkpoint, &input, &known, raw, batch_size, &device),
        Commands::Predict {
            checkpoint,
            head,
            relation,
            top,
        } => cmd_predict(&checkpoint, &head, &relation, top, &device),
    }
}

fn load_config(path: Option<&Path>) -> Result<TrainingConfig> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", p.display()))
        }
        None => Ok(TrainingConfig::default()),
    }
}

fn cmd_train(
    train: &Path,
    valid: Option<&Path>,
    test: Option<&Path>,
    kind: ModelKind,
    config: TrainingConfig,
    output: &Path,
    device: &Device,
) -> Result<()> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", train.display()));
    let data = Dataset::from_tsv_files(train, valid, test)
        .with_context(|| format!("loading triples from {}", train.display()))?;
    pb.finish_with_message(format!(
        "Loaded {} entities, {} relations, {} items in {:.2?}",
        data.num_entities(),
        data.num_relations(),
        data.items.len(),
        start.elapsed()
    ));

    let model_config = ModelConfig::new(data.num_entities(), data.num_relations(), config.dim)
        .with_init_size(config.init_size);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = build_model(kind, &model_config, &data.items, &vb)?;

    let start = Instant::now();
    let pb = ProgressBar::new(config.epochs as u64);
    let trainer = Trainer::new(config);
    let report = trainer.fit_with_callback(model.as_ref(), &varmap, &data, |stats| {
        let mut message = format!("loss {:.4}", stats.loss);
        if let Some(metrics) = &stats.validation {
            message.push_str(&format!(" | valid MRR {:.4}", metrics.mrr));
        }
        pb.set_message(message);
        pb.inc(1);
    })?;
    pb.finish_with_message(format!(
        "Trained {} epochs in {:.2?}",
        report.epochs_completed,
        start.elapsed()
    ));

    let meta = ModelMeta {
        kind,
        config: model_config,
        items: data.items.clone(),
    };
    checkpoint::save(output, &varmap, &data.vocab, &meta)?;
    fs::write(
        output.join("report.json"),
        serde_json::to_string_pretty(&report)?,
    )?;

    println!("Model:       {}", model.name());
    if let Some(loss) = report.final_loss() {
        println!("Final loss:  {:.4}", loss);
    }
    if let Some(best) = &report.best_validation {
        let weights = if report.restored_best {
            "weights restored".to_string()
        } else {
            format!("saved weights are from epoch {}", report.epochs_completed)
        };
        println!(
            "Best valid:  {} (epoch {}, {})",
            best.summary(),
            report.best_epoch + 1,
            weights
        );
    }

    if !data.test.is_empty() {
        let evaluator = Evaluator::with_known(data.all_triples());
        let metrics = evaluator.evaluate(model.as_ref(), &data.test, trainer.config().batch_size)?;
        println!("Test:        {}", metrics.summary());
    }
    println!("Saved to {}", output.display());
    Ok(())
}

fn cmd_evaluate(
    dir: &Path,
    input: &Path,
    known: &[PathBuf],
    raw: bool,
    batch_size: usize,
    device: &Device,
) -> Result<()> {
    let ckpt = checkpoint::load(dir, device)
        .with_context(|| format!("loading checkpoint {}", dir.display()))?;

    let encode = |path: &Path| -> Result<Vec<cf_kge::TripleIds>> {
        read_tsv(path)
            .with_context(|| format!("reading {}", path.display()))?
            .iter()
            .map(|t| ckpt.vocab.encode(t).map_err(anyhow::Error::from))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("encoding {}", path.display()))
    };

    let triples = encode(input)?;
    if triples.is_empty() {
        bail!("no triples in {}", input.display());
    }

    let mut evaluator = Evaluator::new();
    if !raw {
        evaluator.add_known_triples(&triples);
        for path in known {
            evaluator.add_known_triples(&encode(path)?);
        }
    }

    let start = Instant::now();
    let metrics = evaluator.evaluate(ckpt.model.as_ref(), &triples, batch_size)?;
    println!("{} ({})", ckpt.model.name(), if raw { "raw" } else { "filtered" });
    println!("{}", metrics.summary());
    println!("Evaluated in {:.2?}", start.elapsed());
    Ok(())
}

fn cmd_predict(dir: &Path, head: &str, relation: &str, top: usize, device: &Device) -> Result<()> {
    let ckpt = checkpoint::load(dir, device)
        .with_context(|| format!("loading checkpoint {}", dir.display()))?;
    let head_id = ckpt
        .vocab
        .entity_id(head)
        .with_context(|| format!("unknown entity '{}'", head))?;
    let relation_id = ckpt
        .vocab
        .relation_id(relation)
        .with_context(|| format!("unknown relation '{}'", relation))?;

    let predictions = ckpt.model.predict_tail(head_id, relation_id, top)?;
    println!("Top {} for ({}, {}, ?):", predictions.len(), head, relation);
    for (rank, p) in predictions.iter().enumerate() {
        let label = ckpt.vocab.entity_label(p.item).unwrap_or("?");
        println!("{:>4}. {:<30} {:.4}", rank + 1, label, p.score);
    }
    Ok(())
}
