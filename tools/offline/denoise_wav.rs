use anyhow::{Context, Result};
use poise::dsp::utils::gain_to_db;
use poise::{PassthroughEngine, SessionConfig, SessionController, WavCapture, WavPlayback};
use std::path::{Path, PathBuf};

const USAGE: &str = "usage: poise_offline <input.wav> <output.wav> [config.json]";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let input = args.next().map(PathBuf::from).context(USAGE)?;
    let output = args.next().map(PathBuf::from).context(USAGE)?;
    let mut config = match args.next() {
        Some(path) => SessionConfig::load(Path::new(&path))
            .with_context(|| format!("failed to load config '{}'", path))?,
        None => SessionConfig::default(),
    };

    let capture = WavCapture::open(&input)?;
    config.capture_rate = capture.sample_rate();
    config.playback_rate = capture.sample_rate();
    config.validate()?;
    let playback = WavPlayback::create(&output, config.playback_rate)?;

    // identity model: exercises gate, resampling, transforms and the safety stage
    let engine = PassthroughEngine::new(config.model.domain);
    let model_name = config.model.name.clone();
    let frames = capture.frames();
    let mut controller = SessionController::new(config, Box::new(engine))?;
    controller.start(capture, playback)?;
    let summary = controller.wait()?;
    let out_peak = controller.meters().get_output_peak();
    let stats = controller.stats()?;
    controller.stop()?;

    println!("Offline run for '{}' ({} frames, model {}):", input.display(), frames, model_name);
    if let Some(summary) = summary {
        println!("  exit        : {:?}", summary.exit);
        println!("  samples in  : {}", summary.samples_in);
        println!("  samples out : {}", summary.samples_out);
        println!("  I/O errors  : {}", summary.io_errors);
    }
    println!("  last peak   : {:.1} dBFS", gain_to_db(out_peak));
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
