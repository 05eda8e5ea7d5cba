use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};
use std::io::Write;
use std::sync::Arc;

use petsort::analytics::{BatchReport, ImageReport};
use petsort::color_utils::{colors, init_color_config, progress::create_batch_progress_bar, symbols};
use petsort::config::{GlobalArgs, PipelineConfig, PredictCommand, ServeCommand, ServerConfig};
use petsort::image_input::{collect_images_from_sources, ImageInputConfig, PredictError};
use petsort::pipeline::ModelContext;
use petsort::progress::remove_progress_bar;
use petsort::server::run_server;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP prediction service
    Serve(ServeCommand),

    /// Classify bottles in image files and print a batch report
    Predict(PredictCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "petsort")]
#[command(about = "Bottle detection and PET/brand/color/size classification")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    // -q -> ERROR, default -> WARN, -v -> INFO, -vv -> DEBUG, -vvv -> TRACE
    if verbosity.is_silent() {
        return log::LevelFilter::Error;
    }
    match verbosity.log_level_filter() {
        log::LevelFilter::Off => log::LevelFilter::Off,
        log::LevelFilter::Error => log::LevelFilter::Warn,
        log::LevelFilter::Warn => log::LevelFilter::Info,
        log::LevelFilter::Info => log::LevelFilter::Debug,
        log::LevelFilter::Debug | log::LevelFilter::Trace => log::LevelFilter::Trace,
    }
}

fn init_logging(global: &GlobalArgs) {
    // If user didn't pass -v/-q and RUST_LOG is set, honor the env var.
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(get_log_level_from_verbosity(global.verbosity.clone()));
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

fn serve(global: &GlobalArgs, cmd: &ServeCommand) -> Result<()> {
    let config = PipelineConfig::resolve(global, &cmd.pipeline)?;
    let server_config = ServerConfig::from_args(cmd);
    let ctx = Arc::new(ModelContext::load(config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run_server(&server_config, ctx))
}

fn predict(global: &GlobalArgs, cmd: &PredictCommand) -> Result<()> {
    let config = PipelineConfig::resolve(global, &cmd.pipeline)?;
    let input_config = if cmd.permissive {
        ImageInputConfig::permissive()
    } else {
        ImageInputConfig::strict()
    };
    let paths = collect_images_from_sources(&cmd.sources, &input_config)?;
    info!("{}Found {} image(s)", symbols::resources_found(), paths.len());

    let ctx = ModelContext::load(config)?;
    let pb = create_batch_progress_bar(paths.len());

    let mut images = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let filename = path.display().to_string();
        if let Some(pb) = &pb {
            pb.set_message(filename.clone());
        }

        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {filename}"))?;
        let report = match ctx.predict_bytes(&bytes) {
            Ok((dimensions, response)) => {
                ImageReport::processed(index, filename, dimensions, response)
            }
            Err(PredictError::InvalidImage) => {
                log::warn!("{}{filename} is not a valid image", symbols::warning());
                ImageReport::failed(index, filename, "Invalid Image")
            }
            Err(PredictError::Inference(e)) => {
                return Err(e.context(format!("Inference failed on {filename}")));
            }
        };
        images.push(report);

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = &pb {
        pb.finish_and_clear();
        remove_progress_bar(pb);
    }

    let report = BatchReport::new(images);
    info!(
        "{}Processed {} image(s): {} bottle(s), {}% PET",
        symbols::completed_successfully(),
        report.total_images,
        report.batch_analytics.total_bottles,
        report.batch_analytics.pet_purity_percent
    );

    let json = serde_json::to_string_pretty(&report)?;
    match &cmd.output {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_color_config(cli.global.no_color);
    init_logging(&cli.global);

    let result = match &cli.command {
        Some(Commands::Serve(cmd)) => {
            info!(
                "{}Starting server on {} | device: {}",
                symbols::system_setup(),
                cmd.bind,
                cli.global.device.as_deref().unwrap_or("auto")
            );
            serve(&cli.global, cmd)
        }
        Some(Commands::Predict(cmd)) => {
            let sources_desc = if cmd.sources.len() == 1 {
                cmd.sources[0].clone()
            } else {
                format!("{} inputs", cmd.sources.len())
            };
            info!("{}Bottle classification: {sources_desc}", symbols::detection_start());
            predict(&cli.global, cmd)
        }
        Some(Commands::Version) => {
            println!("petsort v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            use clap::CommandFactory;
            Cli::command()
                .print_help()
                .map_err(|e| anyhow!("Failed to print help: {e}"))
        }
    };

    if let Err(e) = result {
        error!("{}{e:#}", symbols::operation_failed());
        std::process::exit(1);
    }
}
