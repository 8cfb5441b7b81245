mod devices;
mod error;
mod options;
mod recorder;

use std::io::Write;

use anyhow::Result;

use crate::options::RecordingOptions;
use crate::recorder::Recorder;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("list-audio-devices") => {
            // Devices go to stderr; stdout is reserved for the recording
            // handshake
            let devices = devices::list_audio_devices()?;
            eprintln!("{}", serde_json::to_string(&devices)?);
            Ok(())
        }
        Some("list-displays") => {
            let displays = devices::list_displays()?;
            eprintln!("{}", serde_json::to_string(&displays)?);
            Ok(())
        }
        Some(json) => record(json),
        None => {
            usage();
            std::process::exit(1);
        }
    }
}

fn record(json: &str) -> Result<()> {
    let options = RecordingOptions::from_json(json)?;
    let mut recorder = Recorder::configure(&options)?;
    recorder.start()?;

    // Handshake: a supervising process waits for this before trusting that
    // samples are flowing
    print!("R");
    std::io::stdout().flush()?;

    // Blocks until a termination signal, then finalizes before returning;
    // exiting any earlier would truncate the container
    recorder.run_until_stopped()?;

    log::info!("Saved recording to {}", options.destination.display());
    Ok(())
}

fn usage() {
    println!(
        "Usage:\n  peacast <options-json>\n  peacast list-audio-devices\n  peacast list-displays"
    );
}
