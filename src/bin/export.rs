//! Export a trained model as a self-contained serving artifact: weights,
//! alphabets and the input contract, loadable with `ExportedModel::load`.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crnn_ocr::train::predictor::DEFAULT_MIN_WIDTH;
use crnn_ocr::train::CONFIG_FILE;
use crnn_ocr::{OcrError, Trainer, TrainingConfig};

#[derive(Debug, Parser)]
#[command(name = "export", about = "Export the latest checkpoint for serving")]
struct Args {
    /// Training output directory holding config.json and the checkpoints.
    #[arg(long)]
    model_dir: PathBuf,
    /// Destination directory for the serving artifact.
    #[arg(long)]
    output_dir: PathBuf,
    /// Narrowest image width the exported model will accept without padding.
    #[arg(long, default_value_t = DEFAULT_MIN_WIDTH)]
    min_width: usize,
}

fn run(args: &Args) -> Result<(), OcrError> {
    let config = TrainingConfig::load(&args.model_dir.join(CONFIG_FILE))?;
    let mut trainer = Trainer::new(config, &args.model_dir)?;
    let step = trainer
        .resume_from_latest()?
        .ok_or_else(|| OcrError::config("no checkpoint found to export"))?;
    trainer.export(&args.output_dir, args.min_width)?;
    tracing::info!(
        step,
        output_dir = %args.output_dir.display(),
        "export complete"
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        tracing::error!(error = %err, "export failed");
        std::process::exit(1);
    }
}
