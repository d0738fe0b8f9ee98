use anyhow::{Context, Result, anyhow};
use cpal::Device;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vocalmix::audio::device::{
    choose_output, default_input_device, default_output_device, find_input_device,
    find_loopback_input, find_output_device, list_devices, output_candidates,
};
use vocalmix::audio::{
    AudioConfig, CpalBackend, DeviceInfo, ParameterStore, Session, StopReason,
};
use vocalmix::ui::TerminalKeys;
use vocalmix::ui::terminal::{
    console_sink, print_banner, print_device_list, print_status, prompt_output_choice,
};

const DEBUG_LOG: &str = "vocalmix-debug.log";

fn print_help() {
    println!("vocalmix - Real-time vocal removal / center mixer");
    println!();
    println!("USAGE:");
    println!("    vocalmix [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help           Print this help message");
    println!("    --debug              Write debug logging to {}", DEBUG_LOG);
    println!("    --list-devices       List audio devices and exit");
    println!("    --config <PATH>      Load audio settings from a TOML file");
    println!();
    println!("DESCRIPTION:");
    println!("    Captures stereo audio from a loopback device (e.g. VB-CABLE's");
    println!("    \"CABLE Output\" or \"Stereo Mix\"), mixes a vocal-cancelled");
    println!("    (L - R) signal with an attenuated center (L + R) / 2 signal,");
    println!("    and plays the result on the selected output device.");
    println!();
    println!("CONTROLS:");
    println!("    1/2    Decrease/Increase center attenuation (5%)");
    println!("    3/4    Decrease/Increase vocal removal mix (10%)");
    println!("    5/6    Decrease/Increase master volume (5%)");
    println!("    R      Reset to defaults");
    println!("    Q      Quit");
    println!();
    println!("CONFIG FILE KEYS:");
    println!("    sample_rate, block_size, buffer_blocks, prefill_blocks,");
    println!("    input_device, output_device, key_poll_ms, idle_poll_ms");
}

fn init_logging(debug_mode: bool) -> Result<()> {
    let default_filter = if debug_mode {
        "vocalmix=debug"
    } else {
        "vocalmix=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // The terminal is in raw mode while running, so debug output goes to a file
    if debug_mode {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(DEBUG_LOG)
            .with_context(|| format!("Failed to open {}", DEBUG_LOG))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

fn select_input(host: &cpal::Host, config: &AudioConfig, devices: &[DeviceInfo]) -> Result<Device> {
    if let Some(name) = &config.input_device {
        println!("\nUsing INPUT: {}", name);
        return Ok(find_input_device(host, name)?);
    }

    if let Some(loopback) = find_loopback_input(devices) {
        println!("\nAuto-detected INPUT: {}", loopback.name);
        return Ok(find_input_device(host, &loopback.name)?);
    }

    println!("\nWarning: Couldn't find CABLE Output or Stereo Mix.");
    println!("Make sure VB-CABLE is installed. Falling back to the default input.");
    Ok(default_input_device(host)?)
}

fn select_output(
    host: &cpal::Host,
    config: &AudioConfig,
    devices: &[DeviceInfo],
) -> Result<Device> {
    if let Some(name) = &config.output_device {
        println!("Using OUTPUT: {}", name);
        return Ok(find_output_device(host, name)?);
    }

    let candidates = output_candidates(devices);
    let answer = prompt_output_choice(&candidates, io::stdin().lock())
        .context("Failed to read output device choice")?;

    match choose_output(&candidates, &answer) {
        Some(choice) => {
            println!("\nUsing OUTPUT: {}", choice.name);
            if let Some(rate) = choice.default_sample_rate {
                println!("Sample rate: {} Hz\n", rate);
            }
            Ok(find_output_device(host, &choice.name)?)
        }
        None => {
            println!("\nUsing default output device\n");
            Ok(default_output_device(host)?)
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_help();
        return Ok(());
    }

    let debug_mode = args.contains(&"--debug".to_string());
    init_logging(debug_mode)?;

    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--config requires a path"))?;
            AudioConfig::load(path).with_context(|| format!("Failed to load {}", path))?
        }
        None => AudioConfig::default(),
    };
    info!("Audio config: {:?}", config);

    let host = cpal::default_host();
    let devices = list_devices(&host)?;

    if args.contains(&"--list-devices".to_string()) {
        print_device_list(&devices);
        return Ok(());
    }

    let input = select_input(&host, &config, &devices)?;
    let output = select_output(&host, &config, &devices)?;
    let backend = CpalBackend::new(input, output);
    info!(
        "Routing {} -> {}",
        backend.input_device_name(),
        backend.output_device_name()
    );

    let params = ParameterStore::default();
    print_banner(&params.snapshot());

    let keys = TerminalKeys::new().context("Failed to enable raw terminal mode")?;
    print_status("Processing... (Press Q to quit)");
    print_status("");

    let mut session = Session::new(backend, config, params);
    let (reason, stats) = session.run(keys, console_sink())?;

    match reason {
        StopReason::QuitKey => println!("Stopped."),
        StopReason::Interrupted => println!("Stopping audio processor..."),
        StopReason::StreamFault(message) => {
            return Err(anyhow!("Audio stream failed: {}", message));
        }
        StopReason::ControlLost(message) => {
            return Err(anyhow!("Keyboard input failed: {}", message));
        }
    }

    if debug_mode {
        println!(
            "Blocks: {} captured, {} played, {} dropped, {} underruns",
            stats.blocks_captured, stats.blocks_played, stats.blocks_dropped, stats.underruns
        );
    }
    Ok(())
}
