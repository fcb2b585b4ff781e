use anyhow::{Context, Result};
use clap::Parser;
use softstop::app::DemoApp;
use softstop::config::{Cli, Commands, Settings, WorkerKind};
use softstop::drain::{DrainProtocol, ProcessExit, ShutdownState};
use softstop::jobs::NoPendingJobs;
use softstop::monitor::LogMonitor;
use softstop::registry::ConnectionRegistry;
use softstop::signals;
use softstop::worker::WorkerLoop;
use std::net::TcpListener;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;

    if let Some(Commands::Config) = cli.command {
        // Only machine output goes to stdout
        print!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let state = Arc::new(ShutdownState::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let drain = Arc::new(DrainProtocol::new(
        Arc::clone(&state),
        Arc::clone(&registry),
        Arc::new(NoPendingJobs),
        Arc::new(LogMonitor),
        Arc::new(ProcessExit),
    ));

    match settings.worker {
        WorkerKind::Graceful => {
            // Before the first accept, so no signal arrives unhandled
            signals::install(drain, settings.quiet_term_notice)?;
        }
        WorkerKind::Plain => {
            eprintln!("[softstop] Plain worker selected: signals keep their default disposition.");
        }
    }

    let listener = TcpListener::bind(&settings.bind)
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    eprintln!(
        "[softstop] Worker (pid {}) listening on {} ({} workers configured for the manager)",
        std::process::id(),
        listener.local_addr()?,
        settings.workers
    );

    let worker = WorkerLoop::new(
        listener,
        registry,
        state,
        Box::new(DemoApp),
        settings.write_timeout(),
    );
    worker.run()
}
