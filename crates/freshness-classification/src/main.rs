use crate::category::Category;
use crate::data::{build_loader, FreshnessBatcher, FreshnessDataset, LoaderConfig, Split};
use crate::error::Result;
use crate::model::FreshnessModelConfig;
use crate::train::TrainingConfig;
use burn::backend::Autodiff;
use burn::optim::SgdConfig;
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, LevelFilter};
use rand::thread_rng;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

mod category;
mod data;
mod error;
mod infer;
mod model;
mod preview;
mod train;

#[cfg(feature = "tch")]
type TrainBackend = Autodiff<burn_tch::LibTorch>;
#[cfg(not(feature = "tch"))]
type TrainBackend = Autodiff<burn::backend::NdArray>;

type InferBackend = <TrainBackend as AutodiffBackend>::InnerBackend;
type Device = <TrainBackend as Backend>::Device;

const DATA_DIR: &str = "/srv/freshnessmodel/dataset";
const ARTIFACT_DIR: &str = "/srv/freshnessmodel/artifacts";

#[derive(Parser)]
#[command(about = "Train and run a fresh/rotten produce classifier")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on <data-dir>/Train, validating on <data-dir>/Test after every epoch
    Train {
        #[arg(long, default_value = DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long, default_value = ARTIFACT_DIR)]
        artifact_dir: String,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        num_workers: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long)]
        no_shuffle: bool,
        /// Category folders to train on, defaults to all fourteen
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
    },
    /// Report loss and accuracy of a trained model on one split
    Evaluate {
        #[arg(long, default_value = DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long, default_value = ARTIFACT_DIR)]
        artifact_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = SplitArg::Test)]
        split: SplitArg,
    },
    /// Classify images as fresh or rotten
    Infer {
        #[arg(long, default_value = ARTIFACT_DIR)]
        artifact_dir: PathBuf,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Write a grid of random dataset samples to a PNG
    Preview {
        #[arg(long, default_value = DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = SplitArg::Test)]
        split: SplitArg,
        #[arg(long, default_value_t = 5)]
        rows: u32,
        #[arg(long, default_value_t = 5)]
        cols: u32,
        #[arg(long, default_value = "preview.png")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitArg {
    Train,
    Test,
}

impl From<SplitArg> for Split {
    fn from(split: SplitArg) -> Self {
        match split {
            SplitArg::Train => Split::Train,
            SplitArg::Test => Split::Test,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(err) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Could not initialise logging: {err}");
    }

    let time = SystemTime::now();

    match run(cli.command) {
        Ok(()) => {
            if let Ok(elapsed) = time.elapsed() {
                info!("Finished in {}s", elapsed.as_millis() as f64 / 1000.0);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "tch")]
fn select_device() -> Device {
    use burn_tch::LibTorchDevice;

    if tch::utils::has_cuda() {
        LibTorchDevice::Cuda(0)
    } else {
        LibTorchDevice::Cpu
    }
}

#[cfg(not(feature = "tch"))]
fn select_device() -> Device {
    burn::backend::ndarray::NdArrayDevice::Cpu
}

fn run(command: Command) -> Result<()> {
    let device = select_device();
    info!("Using {:?} device", device);

    match command {
        Command::Train {
            data_dir,
            artifact_dir,
            epochs,
            batch_size,
            num_workers,
            seed,
            learning_rate,
            no_shuffle,
            categories,
        } => {
            let mut config = TrainingConfig::new(FreshnessModelConfig::new(), SgdConfig::new())
                .with_shuffle(!no_shuffle);

            if let Some(epochs) = epochs {
                config = config.with_num_epochs(epochs);
            }
            if let Some(batch_size) = batch_size {
                config = config.with_batch_size(batch_size);
            }
            if let Some(num_workers) = num_workers {
                config = config.with_num_workers(num_workers);
            }
            if let Some(seed) = seed {
                config = config.with_seed(seed);
            }
            if let Some(learning_rate) = learning_rate {
                config = config.with_learning_rate(learning_rate);
            }
            if !categories.is_empty() {
                config = config.with_categories(categories);
            }

            train::train_run::<TrainBackend>(&data_dir, &artifact_dir, config, device)?;
        }
        Command::Evaluate { data_dir, artifact_dir, split } => {
            let config = TrainingConfig::load_from(&artifact_dir)?;
            let categories = Category::parse_all(&config.categories)?;
            let model = infer::load_model::<InferBackend, _>(&artifact_dir, &device)?;

            let split = Split::from(split);
            let dataset = FreshnessDataset::load(&data_dir, split, &categories)?;
            let loader = build_loader(
                FreshnessBatcher::<InferBackend>::new(device),
                &LoaderConfig::new().with_batch_size(config.batch_size),
                dataset,
            );

            info!("{split} split: {}", train::evaluate(&model, loader));
        }
        Command::Infer { artifact_dir, images } => {
            let model = infer::load_model::<InferBackend, _>(&artifact_dir, &device)?;

            for path in images {
                let prediction = infer::predict_file(&model, &path, &device)?;
                println!("{}: {prediction}", path.display());
            }
        }
        Command::Preview { data_dir, split, rows, cols, output } => {
            let dataset = FreshnessDataset::load(&data_dir, split.into(), &Category::ALL)?;
            let (grid, _) = preview::sample_grid(&dataset, rows, cols, &mut thread_rng())?;

            grid.save(&output).map_err(|source| error::FreshnessError::Image {
                path: output.clone(),
                source,
            })?;
            info!("Wrote preview to {}", output.display());
        }
    }

    Ok(())
}
