use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workcell_core::{Signal, Worker, WorkerConfig};

use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "workcell")]
#[command(about = "Single-thread worker demonstration driver", long_about = None)]
struct Args {
    /// Simulated work duration in milliseconds
    #[arg(short, long, default_value = "1000")]
    work_ms: u64,

    /// How long to let repeated work run before killing, in milliseconds
    #[arg(long, default_value = "4000")]
    repeat_window_ms: u64,

    /// Path to a worker configuration file
    #[arg(long)]
    config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    let mut worker = Worker::with_config(config);
    let work_ms = args.work_ms;

    info!("setting work handler");
    worker.set_work_fn(move |handle| {
        info!(flags = %handle.flags(), "work started");
        thread::sleep(Duration::from_millis(work_ms));
        info!(flags = %handle.flags(), "work completed");
        0
    });

    info!("starting worker thread");
    worker.start()?;
    thread::sleep(Duration::from_millis(100));
    info!(flags = %worker.flags(), "flags after start");

    worker.enable_work_repeat();

    info!("requesting work (repeat enabled)");
    worker.request_work();
    thread::sleep(Duration::from_millis(500));
    info!(flags = %worker.flags(), "flags during work");

    thread::sleep(Duration::from_millis(args.repeat_window_ms));
    info!(flags = %worker.flags(), "flags before kill");

    info!("sending kill signal");
    worker.send_signal(Signal::Kill);
    while worker.is_thread_active() {
        thread::sleep(Duration::from_millis(50));
    }
    info!(flags = %worker.flags(), "final flags before reusing object");

    // Second phase: detached termination with the same, reused object.
    info!("=== detached mode with reused worker ===");

    worker.set_detach_on_terminate(true);
    worker.disable_work_repeat();
    worker.start()?;

    thread::sleep(Duration::from_millis(100));
    info!(flags = %worker.flags(), "flags after restart (detached)");

    info!("requesting work");
    worker.request_work();
    thread::sleep(Duration::from_millis(args.work_ms + 200));
    info!(flags = %worker.flags(), "flags after single run");

    info!("sending kill signal");
    worker.send_signal(Signal::Kill);
    while worker.is_thread_active() {
        thread::sleep(Duration::from_millis(50));
    }

    info!(flags = %worker.flags(), "detached test complete, worker exited cleanly");

    Ok(())
}
