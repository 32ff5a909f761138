// Simulated capture example
//
// Runs the full acquisition pipeline against a simulated DDS120, waits for a
// number of triggered frames and optionally writes the last one to CSV.

use buudai_rs::{
    BuudaiScope, EdgeTrigger, Model, ScopeEvent, ScopeSettings, Signal, SimulatedTransport,
};
use clap::Parser;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "simulated_capture")]
#[command(version = "1.0")]
#[command(about = "Capture triggered frames from a simulated DDS120")]
struct Args {
    /// Requested sample rate in S/s
    #[arg(short, long, default_value_t = 240_000)]
    rate: u64,

    /// Requested buffer size in samples
    #[arg(short, long, default_value_t = 2048)]
    buffer_size: u64,

    /// Trigger level in V
    #[arg(short, long, default_value_t = 0.0, allow_negative_numbers = true)]
    level: f64,

    /// Trigger on the falling edge instead of the rising one
    #[arg(long)]
    falling: bool,

    /// Frames to capture before exiting
    #[arg(short, long, default_value_t = 10)]
    frames: u64,

    /// Square wave on CH1 instead of a sine
    #[arg(long)]
    square: bool,

    /// Write the last frame to this CSV file
    #[arg(short, long)]
    output: Option<std::path::PathBuf>,

    /// TOML file with calibration and tuning
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let settings = match &args.config {
        Some(path) => ScopeSettings::load_from(path)?,
        None => ScopeSettings::default(),
    };

    let ch1 = if args.square {
        Signal::Square {
            low: 96,
            high: 176,
            period: 400,
        }
    } else {
        Signal::Sine {
            center: 136.0,
            amplitude: 60.0,
            period: 480,
        }
    };
    let ch2 = Signal::Sine {
        center: 132.0,
        amplitude: 20.0,
        period: 960,
    };

    println!("Buudai Simulated Capture");
    println!("========================");

    let mut scope = BuudaiScope::connect(
        Box::new(SimulatedTransport::new(ch1, ch2)),
        Model::Dds120,
        &settings,
    )?;
    println!("✓ Connected to simulated {}", scope.model().as_str());

    let rate = scope.set_sample_rate(args.rate)?;
    let size = scope.set_buffer_size(args.buffer_size)?;
    println!("Sample rate: {} S/s", rate);
    println!("Buffer size: {} samples", size);

    let builder = EdgeTrigger::start_capturing_when(args.level).on_channel(0);
    let trigger = if args.falling {
        builder.falling_edge()
    } else {
        builder.rising_edge()
    };
    scope.apply_trigger(trigger)?;
    println!("Trigger: {:?} edge at {:.3}V on CH1\n", trigger.slope, trigger.level);

    let events = scope.subscribe();
    scope.start_sampling()?;
    let start_time = Instant::now();

    let mut received = 0;
    while received < args.frames {
        match events.recv_timeout(Duration::from_secs(2))? {
            ScopeEvent::SamplesAvailable { cycle, samples, .. } => {
                received += 1;
                let buffers = samples.lock();
                let ch1 = buffers.channel(0);
                let (min, max) = ch1
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                println!(
                    "Frame {:>4}: {} / {} samples | CH1 {:.3}V .. {:.3}V | first {:.3}V",
                    cycle,
                    ch1.len(),
                    buffers.channel(1).len(),
                    min,
                    max,
                    ch1.first().copied().unwrap_or_default()
                );
            }
            ScopeEvent::Status(message) => println!("Status: {}", message),
            ScopeEvent::Disconnected => {
                println!("Device disconnected");
                break;
            }
        }
    }

    let elapsed = start_time.elapsed();
    println!(
        "\n{} frames in {:.2}s ({:.1} Hz)",
        received,
        elapsed.as_secs_f64(),
        received as f64 / elapsed.as_secs_f64()
    );

    scope.stop_sampling()?;
    if let Some(path) = &args.output {
        let frame = scope.samples().snapshot();
        frame.write_csv(std::fs::File::create(path)?)?;
        println!("✓ Wrote frame {} to {}", frame.cycle, path.display());
    }

    scope.disconnect();
    Ok(())
}
