//! RTT Microphone Capture - Main Entry Point

use clap::Parser;
use tracing::{info, error, debug};
use tracing_subscriber::{EnvFilter, fmt};

use rtt_mic_capture::{
    Config,
    CaptureError,
    CapturePipeline,
    ProbeSession,
    capture::{connect_or_cancel, Interrupt},
    config::Args,
    probe::ProbeDiscovery,
};

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(CaptureError::Cancelled) => {
            info!("Capture cancelled, probe closed");
            0
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run() -> rtt_mic_capture::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Handle special flags first
    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // Load configuration
    let mut config = Config::load(args.config.as_ref())?;

    // Merge command line arguments into configuration
    config.merge_args(&args);

    init_logging(&config)?;

    info!("Starting RTT microphone capture v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    config.validate()
        .map_err(|e| {
            error!("Configuration validation failed: {}", e);
            e
        })?;

    if args.list_probes {
        let probes = ProbeDiscovery::list_probes();
        if config.output.json_report {
            println!("{}", serde_json::to_string_pretty(&probes)?);
        } else {
            for probe in &probes {
                println!("{}\t{}\t{:04X}:{:04X}\t{}",
                         probe.identifier, probe.probe_type,
                         probe.vendor_id, probe.product_id,
                         probe.serial_number.as_deref().unwrap_or("-"));
            }
        }
        return Ok(());
    }

    let interrupt = Interrupt::ctrl_c().await;

    let probe_config = config.probe.clone();
    let rtt_config = config.rtt.clone();
    let session = connect_or_cancel(
        move || ProbeSession::connect(&probe_config, &rtt_config),
        interrupt.clone().wait(),
    )
    .await?;

    let pipeline = CapturePipeline::new(config.clone());
    let report = pipeline.run(session, interrupt.wait()).await?;

    info!("Raw capture: {}", report.raw_path.display());
    info!("WAV file:    {}", report.wav_path.display());
    if config.output.json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.raw_path.display());
        println!("{}", report.wav_path.display());
    }
    Ok(())
}

/// Initialize logging system
fn init_logging(config: &Config) -> rtt_mic_capture::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    // Configure output destination
    if let Some(log_file) = &config.logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        subscriber
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        subscriber
            .with_writer(std::io::stderr)
            .init();
    }

    debug!("Logging initialized with level: {}", config.logging.level);
    Ok(())
}
