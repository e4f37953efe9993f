use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser)]
#[command(
    name = "ufonorm",
    version,
    about = "Normalize the XML formatting, data structure and file naming of a UFO"
)]
struct Args {
    /// Path to a UFO to normalize
    input: PathBuf,

    /// Output path. If not given, the input path will be used
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Normalize all files. By default, only files modified since the
    /// previous normalization are processed
    #[arg(short, long)]
    all: bool,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbosity.log_level_filter())
        .init();
    if !args.input.exists() {
        log::error!("Input path does not exist: {}", args.input.display());
        std::process::exit(1);
    }
    let is_ufo = args
        .input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("ufo"));
    if !is_ufo {
        log::error!("{}", ufonorm::NormalizerError::NotAUfo { path: args.input });
        std::process::exit(1);
    }
    let start = std::time::Instant::now();
    if let Err(error) = ufonorm::normalize_ufo(&args.input, args.output.as_deref(), !args.all) {
        log::error!("{}", error);
        std::process::exit(1);
    }
    log::info!("Normalization complete ({:.2?})", start.elapsed());
}
