use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};

use cifar_finetune::data::extract_images;
use cifar_finetune::{init_logging, pipeline, FinetuneConfig};

/// Fine-tune a pretrained CIFAR ResNet-20 head on CIFAR-10 and report its predictions.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train (or restore) the fine-tuned model and write the HTML report.
    Run(RunArgs),
    /// Unpack a CIFAR-10 binary batch into `image{i}.png` files.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Optional JSON settings; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    pretrained: Option<PathBuf>,

    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Train without writing the checkpoint afterwards.
    #[arg(long)]
    no_save: bool,

    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    report_limit: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<i64>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<i64>,

    /// Stay on the CPU even when CUDA is available.
    #[arg(long)]
    cpu: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long, default_value = "data/cifar-10-batches-bin/test_batch.bin")]
    batch: PathBuf,

    #[arg(long, default_value = "data/cifar-10-batches-bin/batches.meta.txt")]
    meta: PathBuf,

    #[arg(long, default_value = "data/test")]
    out: PathBuf,
}

fn resolve_config(args: RunArgs) -> Result<FinetuneConfig> {
    let mut config = match &args.config {
        Some(path) => FinetuneConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => FinetuneConfig::default(),
    };
    if let Some(v) = args.data_dir {
        config.data_dir = v;
    }
    if let Some(v) = args.pretrained {
        config.pretrained = v;
    }
    if let Some(v) = args.checkpoint {
        config.checkpoint = v;
    }
    if let Some(v) = args.report {
        config.report = v;
    }
    if let Some(v) = args.report_limit {
        config.report_limit = Some(v);
    }
    if let Some(v) = args.epochs {
        config.train.epochs = v;
    }
    if let Some(v) = args.batch_size {
        config.train.batch_size = v;
    }
    if let Some(v) = args.learning_rate {
        config.train.learning_rate = v;
    }
    if args.seed.is_some() {
        config.train.seed = args.seed;
    }
    if args.no_save {
        config.save_checkpoint = false;
    }
    if args.cpu {
        config.use_cuda = false;
    }
    config.validate()?;
    Ok(config)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Command::Run(args) => {
            let config = resolve_config(args)?;
            let outcome = pipeline::run(&config).context("fine-tuning run failed")?;
            info!(
                "done ({}), accuracy {:.2}%, report at {}",
                if outcome.trained { "trained" } else { "restored" },
                outcome.accuracy * 100.0,
                config.report.display()
            );
        }
        Command::Extract(args) => {
            let extracted = extract_images(&args.batch, &args.meta, &args.out)
                .with_context(|| format!("extracting {}", args.batch.display()))?;
            info!("{} images written to {}", extracted.len(), args.out.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    run()?;

    Ok(())
}
