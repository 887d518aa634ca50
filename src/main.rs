//! Command-line front end: clean a recording, analyze its noise or print the
//! effective settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use breath_clean::analysis::analyze_noise;
use breath_clean::{
    AudioFormat, ConfigError, DecodeError, Pipeline, PipelineConfig, ProcessingError,
    ProcessingOptions, QualityLevel, VadAggressiveness,
};

/// Inputs above this size are rejected before decoding.
const MAX_INPUT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(
    name = "breath-clean",
    version,
    about = "Background noise suppression for breathing and voice recordings"
)]
struct Cli {
    /// JSON file with stage tunables; defaults are used if missing or invalid
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean a recording and print its metrics as JSON
    Process {
        input: PathBuf,
        /// Output WAV path (a fresh file in the temp dir by default)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Describe the noise in a recording without changing it
    Analyze {
        input: PathBuf,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Print the effective options and stage settings as JSON
    Settings {
        #[command(flatten)]
        options: OptionArgs,
    },
}

#[derive(Args, Debug)]
struct OptionArgs {
    /// standard (22050 Hz), high (44100 Hz) or premium (48000 Hz)
    #[arg(long, default_value = "standard")]
    quality: String,
    /// Container format: wav, mp3, webm or m4a (default: from the file extension)
    #[arg(long)]
    format: Option<String>,
    /// 0 (permissive) to 3 (aggressive)
    #[arg(long, default_value_t = 2)]
    vad_aggressiveness: u8,
    /// Working sample rate, overrides --quality
    #[arg(long)]
    sample_rate: Option<u32>,
}

impl OptionArgs {
    fn to_options(&self) -> Result<ProcessingOptions, ConfigError> {
        let options = ProcessingOptions {
            quality_level: self.quality.parse::<QualityLevel>()?,
            audio_format: match &self.format {
                Some(f) => f.parse()?,
                None => AudioFormat::default(),
            },
            vad_aggressiveness: VadAggressiveness::try_from(self.vad_aggressiveness)?,
            sample_rate: self.sample_rate,
        };
        options.validate()?;
        Ok(options)
    }

    /// Explicit --format wins, then the input's extension.
    fn format_hint(&self, input: &Path) -> Option<AudioFormat> {
        if self.format.is_some() {
            return None;
        }
        AudioFormat::from_path(input)
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is {size} bytes, the limit is {}", path.display(), MAX_INPUT_BYTES)]
    TooLarge { path: PathBuf, size: u64 },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load_or_default(path),
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Process {
            input,
            output,
            options,
        } => {
            let hint = options.format_hint(&input);
            let pipeline = Pipeline::new(options.to_options()?, config);
            let bytes = read_input(&input)?;

            let result = pipeline.process(&bytes, hint)?;
            let output = output.unwrap_or_else(temp_output_path);
            fs::write(&output, &result.wav_bytes).map_err(|source| CliError::Io {
                path: output.clone(),
                source,
            })?;
            log::info!("Wrote cleaned audio to {}", output.display());

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "output": output.display().to_string(),
                    "metrics": result.metrics,
                }))?
            );
        }
        Command::Analyze { input, options } => {
            let hint = options.format_hint(&input);
            let opts = options.to_options()?;
            let bytes = read_input(&input)?;

            let analysis = analyze_noise(&bytes, hint, &opts, &config)?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Settings { options } => {
            let opts = options.to_options()?;
            let pipeline = Pipeline::new(opts, config);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "sampleRate": pipeline.options().target_sample_rate(),
                    "options": pipeline.options(),
                    "processingSteps": pipeline.stage_names(),
                    "config": pipeline.config(),
                }))?
            );
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>, CliError> {
    let io_err = |source| CliError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size = fs::metadata(path).map_err(io_err)?.len();
    if size > MAX_INPUT_BYTES {
        return Err(CliError::TooLarge {
            path: path.to_path_buf(),
            size,
        });
    }
    fs::read(path).map_err(io_err)
}

/// Temporary path for cleaned audio
fn temp_output_path() -> PathBuf {
    let uuid = uuid::Uuid::new_v4();
    std::env::temp_dir().join(format!("cleaned_{}.wav", uuid))
}
