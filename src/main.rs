mod cli;

use clap::Parser;
use cli::Cli;
use infiloc_tunnel::control::{self, ControlChannel};
use infiloc_tunnel::logger::{Event, Logger, SharedLogger};
use infiloc_tunnel::monitor::classifier::ProtocolClassifier;
use infiloc_tunnel::monitor::matcher::DomainMatcher;
use infiloc_tunnel::monitor::types::{SessionStats, SharedStats, Timings};
use infiloc_tunnel::notify::NotificationEmitter;
use infiloc_tunnel::store::{DetectionStore, SharedDefaults};
use infiloc_tunnel::tunnel::pcap_source::{CaptureSource, PcapProvider};
use infiloc_tunnel::tunnel::{NetworkSettings, TunnelLifecycle, TunnelProvider};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    let session_start = Instant::now();

    let logger: SharedLogger = match Logger::new(cli.json, cli.log_file.as_deref()) {
        Ok(l) => Arc::new(l),
        Err(e) => {
            eprintln!("Failed to open log file: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let stats = SessionStats::new();

    // ── Shared store ─────────────────────────────────────────────────────────
    let defaults = match &cli.store {
        Some(path) => match SharedDefaults::open(path) {
            Ok(d) => d,
            Err(e) => {
                logger.log(&Event::StoreError {
                    message: &format!("cannot open {} ({}); using in-memory store", path, e),
                });
                SharedDefaults::in_memory()
            }
        },
        None => SharedDefaults::in_memory(),
    };

    // ── Core services, built once and passed by handle ───────────────────────
    let emitter = Arc::new(NotificationEmitter::new(Arc::clone(&logger)));
    let store = Arc::new(DetectionStore::new(
        Arc::new(defaults),
        Arc::clone(&emitter),
        Arc::clone(&logger),
    ));
    let classifier = Arc::new(ProtocolClassifier::new(
        DomainMatcher::default(),
        Arc::clone(&store),
        Arc::clone(&logger),
        Arc::clone(&stats),
    ));

    let source = match &cli.pcap_file {
        Some(path) => CaptureSource::File(PathBuf::from(path)),
        None => CaptureSource::Interface(cli.interface.clone()),
    };
    let replay = matches!(source, CaptureSource::File(_));
    let provider = Arc::new(PcapProvider::new(source, Arc::clone(&logger)));

    let lifecycle = Arc::new(TunnelLifecycle::new(
        Arc::clone(&provider) as Arc<dyn TunnelProvider>,
        classifier,
        NetworkSettings::default(),
        build_timings(&cli),
        Arc::clone(&logger),
        Arc::clone(&stats),
    ));

    // Stand-in for the host UI: surface every detection event in the log.
    let ui_logger = Arc::clone(&logger);
    emitter.subscribe(move |ev| {
        ui_logger.log(&Event::Info {
            message: &format!("{}: {} contacted {}", ev.name, ev.service, ev.domain),
        });
    });

    register_shutdown_handler(Arc::clone(&shutdown));

    let control_thread = match &cli.control_addr {
        Some(addr) => {
            let channel = Arc::new(ControlChannel::new(
                Arc::clone(&lifecycle),
                Arc::clone(&store),
                Arc::clone(&logger),
            ));
            match TcpListener::bind(addr).and_then(|l| control::serve(l, channel, Arc::clone(&shutdown))) {
                Ok(handle) => {
                    logger.log(&Event::Info { message: &format!("Control channel on {}", addr) });
                    Some(handle)
                }
                Err(e) => {
                    logger.log(&Event::Info {
                        message: &format!("Control channel disabled: cannot bind {}: {}", addr, e),
                    });
                    None
                }
            }
        }
        None => None,
    };

    // ── Run ──────────────────────────────────────────────────────────────────
    logger.log(&Event::Info { message: "Starting tunnel" });
    let code = match lifecycle.start() {
        Ok(()) => {
            wait_for_exit(&shutdown, replay, provider.as_ref(), &lifecycle);
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger.log(&Event::Info { message: &format!("Tunnel failed to start: {}", e) });
            ExitCode::FAILURE
        }
    };

    lifecycle.stop();
    shutdown.store(true, Ordering::SeqCst);
    if let Some(handle) = control_thread {
        let _ = handle.join();
    }

    logger.log(&Event::Info {
        message: &format!("{} detections in history", store.len()),
    });
    print_summary(&logger, &stats, session_start);
    code
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Blocks until Ctrl+C, or in replay mode until the capture is exhausted.
fn wait_for_exit(
    shutdown:  &AtomicBool,
    replay:    bool,
    provider:  &PcapProvider,
    lifecycle: &TunnelLifecycle,
) {
    while !shutdown.load(Ordering::SeqCst) {
        if replay && !provider.is_available() && !lifecycle.read_loop_alive() {
            break;
        }
        thread::sleep(Duration::from_millis(200));
    }
}

/// Registers a signal handler for graceful shutdown on Ctrl+C.
fn register_shutdown_handler(shutdown: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\n[!] Ctrl+C received, shutting down...");
        shutdown.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Failed to register Ctrl+C handler: {}", e);
    }
}

/// Emits the session summary.
fn print_summary(logger: &SharedLogger, stats: &SharedStats, session_start: Instant) {
    logger.log(&Event::SessionSummary {
        duration_secs:       session_start.elapsed().as_secs(),
        packets_total:       stats.packets_total.load(Ordering::Relaxed),
        hostnames_extracted: stats.hostnames_extracted.load(Ordering::Relaxed),
        detections_recorded: stats.detections_recorded.load(Ordering::Relaxed),
        read_loop_restarts:  stats.read_loop_restarts.load(Ordering::Relaxed),
    });
}

/// Builds lifecycle timings from command-line arguments.
fn build_timings(cli: &Cli) -> Timings {
    Timings {
        retry_delay:     Duration::from_millis(cli.retry_delay_ms),
        health_interval: Duration::from_secs(cli.health_interval.max(1)),
        ..Timings::default()
    }
}
