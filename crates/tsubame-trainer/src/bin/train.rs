//! Command-line driver: train, decode and evaluate CRF models.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tsubame_core::{CrfModel, ModelConfig, TagSet, TransitionConfig};
use tsubame_trainer::{
    OptimizerKind, SequenceRecord, Trainer, TrainerConfig, evaluate, load_labeled_dataset,
    read_records, write_records,
};

#[derive(Parser)]
#[command(name = "tsubame-train")]
#[command(about = "Train and run linear-chain CRF sequence labelers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a labeled JSONL file
    Train(TrainArgs),
    /// Label every record of a JSONL file with a saved model
    Decode {
        /// Model directory
        #[arg(short, long, env = "TSUBAME_MODEL")]
        model: PathBuf,
        /// Input records
        #[arg(short, long)]
        input: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report accuracy and entity-token F1 of a saved model
    Evaluate {
        /// Model directory
        #[arg(short, long, env = "TSUBAME_MODEL")]
        model: PathBuf,
        /// Labeled records
        #[arg(short, long)]
        data: PathBuf,
    },
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Labeled training records
    #[arg(long)]
    train: PathBuf,

    /// Labeled records evaluated after training
    #[arg(long)]
    dev: Option<PathBuf>,

    /// Width of one label block of the weight vector
    #[arg(long, env = "TSUBAME_NUM_FEATURES")]
    num_features: Option<usize>,

    /// Active features carried by every token
    #[arg(long, env = "TSUBAME_FEATURES_PER_TOKEN")]
    features_per_token: Option<usize>,

    /// Comma-separated label names (CoNLL-2003 tags if omitted)
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 0.1)]
    lr: f64,

    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adagrad)]
    optimizer: OptimizerKind,

    #[arg(long, env = "TSUBAME_SEED", default_value_t = 11)]
    seed: u64,

    /// Keep the file order every epoch
    #[arg(long)]
    no_shuffle: bool,

    /// Compute batch gradients on all cores
    #[arg(long)]
    parallel: bool,

    /// Learn the unconstrained transition scores too
    #[arg(long)]
    train_transitions: bool,

    /// Checkpoint directory (written after every epoch)
    #[arg(short, long, env = "TSUBAME_MODEL", default_value = "tsubame-model")]
    output: PathBuf,

    /// Continue from a checkpoint (model and optimizer state) instead of a
    /// fresh model
    #[arg(long)]
    resume: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => train(args),
        Commands::Decode {
            model,
            input,
            output,
        } => decode(model, input, output),
        Commands::Evaluate { model, data } => {
            let model = CrfModel::load(&model)
                .with_context(|| format!("loading model from {}", model.display()))?;
            let examples = load_labeled_dataset(&data, model.tags())?;
            let eval = evaluate(&model, &examples)?;
            println!("{eval}");
            Ok(())
        }
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let model = match &args.resume {
        Some(dir) => {
            if args.train_transitions || !args.labels.is_empty() {
                warn!(
                    "--labels and --train-transitions are taken from the saved model \
                     when resuming"
                );
            }
            CrfModel::load(dir).with_context(|| format!("resuming from {}", dir.display()))?
        }
        None => {
            let (Some(num_features), Some(features_per_token)) =
                (args.num_features, args.features_per_token)
            else {
                bail!("--num-features and --features-per-token are required for a new model");
            };
            let tags = if args.labels.is_empty() {
                TagSet::conll()
            } else {
                TagSet::new(&args.labels)?
            };
            let config = ModelConfig::new(num_features, features_per_token)
                .with_tags(tags)
                .with_transitions(TransitionConfig::new().with_trainable(args.train_transitions))
                .with_seed(args.seed);
            CrfModel::new(config)?
        }
    };

    let train_set = load_labeled_dataset(&args.train, model.tags())?;
    let dev_set = match &args.dev {
        Some(path) => Some(load_labeled_dataset(path, model.tags())?),
        None => None,
    };
    info!(
        train = train_set.len(),
        dev = dev_set.as_ref().map_or(0, Vec::len),
        labels = %model.tags(),
        "loaded data"
    );

    let config = TrainerConfig::new()
        .with_epochs(args.epochs)
        .with_learning_rate(args.lr)
        .with_batch_size(args.batch_size)
        .with_optimizer(args.optimizer)
        .with_shuffle(!args.no_shuffle)
        .with_seed(args.seed)
        .with_parallel(args.parallel)
        .with_checkpoint_dir(&args.output);

    let mut trainer = Trainer::new(model, config);
    if let Some(dir) = &args.resume {
        trainer.restore_optimizer_state(dir)?;
    }
    let report = trainer.train(&train_set)?;
    let model = trainer.into_model();
    // Checkpoints are written per epoch; zero epochs still leaves a model.
    if report.epochs.is_empty() {
        model.save(&args.output)?;
    }
    info!(output = %args.output.display(), "model saved");

    println!("train: {}", evaluate(&model, &train_set)?);
    if let Some(dev) = &dev_set {
        println!("dev:   {}", evaluate(&model, dev)?);
    }
    Ok(())
}

fn decode(model_dir: PathBuf, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let model = CrfModel::load(&model_dir)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;

    let records = read_records(&input)?
        .into_iter()
        .enumerate()
        .map(|(i, record)| -> Result<SequenceRecord> {
            let labels = model
                .predict(&record.input())
                .with_context(|| format!("{}: record {}", input.display(), i + 1))?;
            Ok(SequenceRecord {
                labels: Some(labels),
                ..record
            })
        })
        .collect::<Result<Vec<_>>>()?;

    match output {
        Some(path) => write_records(&path, &records)?,
        None => {
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
    }
    info!(records = records.len(), "decoded");
    Ok(())
}
