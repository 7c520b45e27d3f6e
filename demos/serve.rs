// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    io::{self, Write},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use clap::Parser;
use pprof_plugin::{
    runtime::{
        process::CountingAlloc, ExecutionTracer, OutputSink, Profile, ProfileSet, RuntimeError,
    },
    server::DebugServer,
    Plugin,
};

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc::system();

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer().pretty();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Serve the pprof plugin on its own port
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:6060")]
    listen: SocketAddr,
    #[arg(long)]
    token: String,
    #[arg(long, default_value = "/debug/pprof/")]
    entrypoint: String,
}

/// Lists the threads the demo keeps busy.
struct Workers(usize);

impl Profile for Workers {
    fn name(&self) -> &str {
        "workers"
    }

    fn count(&self) -> usize {
        self.0
    }

    fn write_to(&self, sink: &mut dyn io::Write, debug: i32) -> Result<(), RuntimeError> {
        if debug == 0 {
            sink.write_all(&(self.0 as u32).to_le_bytes())?;
        } else {
            for i in 0..self.0 {
                writeln!(sink, "worker {i}: sleeping")?;
            }
        }
        Ok(())
    }
}

/// Writes a timestamped line every 100ms while recording.
#[derive(Default)]
struct TickTracer {
    running: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ExecutionTracer for TickTracer {
    fn is_enabled(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn start(&self, mut sink: OutputSink) -> Result<(), RuntimeError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyActive);
        }
        let running = self.running.clone();
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                let now = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default();
                if writeln!(sink, "tick {}", now.as_millis()).is_err() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        });
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop(&self) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            handle
                .join()
                .map_err(|_| RuntimeError::Failed("tick thread panicked".into()))?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    set_up_tracing();
    let args = Args::parse();

    let plugin = Plugin::builder(args.token)
        .with_entrypoint(args.entrypoint)
        .with_profiles(ProfileSet::new().with_profile(Workers(4)))
        .with_tracer(Arc::new(TickTracer::default()))
        .build();
    let server = DebugServer::start(args.listen, &plugin).await?;

    tracing::info!(
        "open http://{}{}?token=<your token>",
        server.addr(),
        plugin.routes().entrypoint(),
    );

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
