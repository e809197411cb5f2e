//! # Tessera Terrain Server
//!
//! Runs the authoritative streaming service with a walking local viewer
//! and, optionally, a remote replica fed through the replication hub.
//!
//! ## Usage
//!
//! ```bash
//! tessera_server --config terrain.toml --tick-rate 60 --duration 30 --speed 40 --remote
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use tessera_shared::{Rect, TerrainConfig, Vec2};
use tessera_streaming::{
    RemoteTerrain, Scheduler, StreamingService, TerrainViewer, TickPhase, ViewerUpdate,
};

fn main() -> ExitCode {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TESSERA TERRAIN SERVER                                   ║");
    println!("║         THE AUTHORITATIVE WORLD                                  ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut tick_rate: Option<u32> = None;
    let mut duration_secs: Option<u64> = None;
    let mut speed = 40.0f32;
    let mut remote = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--tick-rate" | "-t" => {
                if i + 1 < args.len() {
                    tick_rate = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--speed" | "-s" => {
                if i + 1 < args.len() {
                    speed = args[i + 1].parse().unwrap_or(40.0);
                    i += 1;
                }
            }
            "--remote" | "-r" => remote = true,
            "--help" | "-h" => {
                println!("Usage: tessera_server [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>        Terrain config (TOML, default: built-in)");
                println!("  -t, --tick-rate <RATE>     Update rate in Hz (default: from config)");
                println!("  -d, --duration <SECS>      Run for N seconds then exit (default: 30)");
                println!("  -s, --speed <UNITS>        Viewer walk speed per second (default: 40)");
                println!("  -r, --remote               Attach a remote replica viewer");
                println!("  -h, --help                 Show this help");
                return ExitCode::SUCCESS;
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match &config_path {
        Some(path) => match TerrainConfig::from_toml_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => TerrainConfig::default(),
    };
    if let Some(rate) = tick_rate {
        config.streaming.tick_rate = rate.max(1);
    }
    let duration = Duration::from_secs(duration_secs.unwrap_or(30));

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Seed:               {:#018x}", config.seed);
    println!("│ Tile Size:          {} units", config.tile_size);
    println!("│ Resolution:         {} cells (+{} margin)", config.interior_resolution, config.blend_margin);
    println!("│ Biomes:             {}", config.biomes.len());
    println!("│ Load Radius:        {} tiles", config.load_radius_tiles());
    println!("│ Tick Rate:          {} Hz", config.streaming.tick_rate);
    println!("│ Duration:           {} seconds", duration.as_secs());
    println!("│ Remote Replica:     {}", if remote { "yes" } else { "no" });
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let service = match StreamingService::new(config.clone()) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Failed to start streaming service: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut replica = remote.then(|| (RemoteTerrain::connect(service.hub()), TerrainViewer::from_config(&config)));
    let mut scheduler = Scheduler::new(service);
    let walker = scheduler.add_viewer(Vec2::ZERO);

    // A building pad near spawn, like a placement system would request.
    let pad = Rect::new(20.0, 20.0, 30.0, 30.0);
    scheduler.service_mut().flatten_area(pad, 12.0);
    println!("Flattened pad at ({}, {}): height {}", pad.min.x, pad.min.y, scheduler.service_mut().height_at(pad.center()));
    println!();

    let tick_rate = config.streaming.tick_rate;
    let stats_interval = u64::from(tick_rate) * 5;
    let step = speed / tick_rate as f32;
    let start = Instant::now();
    let mut position = Vec2::ZERO;
    let mut activations = 0u64;
    let mut requests = 0u64;

    scheduler.run_for(duration, |scheduler, tick| {
        for update in &tick.viewers {
            match update {
                ViewerUpdate::Activated(_) => activations += 1,
                ViewerUpdate::Requested { .. } => requests += 1,
                ViewerUpdate::Idle => {}
            }
        }

        position.x += step;
        scheduler.set_viewer_position(walker, position);

        if let Some((terrain, viewer)) = replica.as_mut() {
            terrain.poll();
            viewer.update(Vec2::new(position.x, position.y + 150.0), terrain);
        }

        let current_tick = scheduler.tick_count();
        if current_tick % stats_interval == 0 {
            let stats = scheduler.tick_stats();
            let service = scheduler.service();
            let counters = service.stats();

            println!("┌─ SERVER STATUS (Tick {}) ────────────────────────────────────", current_tick);
            println!("│ Uptime:             {:.1}s", start.elapsed().as_secs_f64());
            println!("│ Viewer:             ({:.1}, {:.1})", position.x, position.y);
            println!("│ Tiles:              {} ({} outstanding)", service.tile_count(), service.outstanding());
            println!("│ Drained:            {} (stale {})", counters.drained, counters.stale_rejected);
            println!("│ Evicted:            {}", counters.evicted);
            println!("│ Payloads Sent:      {}", counters.payloads_sent);
            if let Some((terrain, _)) = replica.as_ref() {
                println!("│ Replica Tiles:      {}", terrain.len());
            }
            println!("│ Avg Tick Time:      {} μs (service {} / viewers {} / eviction {})",
                stats.mean_tick().as_micros(),
                stats.mean(TickPhase::Service).as_micros(),
                stats.mean(TickPhase::Viewers).as_micros(),
                stats.mean(TickPhase::Eviction).as_micros());
            println!("│ Late Ticks:         {} ({:.2}%), {} skipped",
                stats.overruns,
                stats.overrun_percent(),
                stats.skipped);
            println!("└──────────────────────────────────────────────────────────────────");
            println!();
        }
    });

    let final_stats = *scheduler.tick_stats();
    let counters = *scheduler.service().stats();
    let result = scheduler.shutdown();

    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SERVER SHUTDOWN                               ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!("║ Total Ticks:        {:>10}                                   ║", final_stats.ticks);
    println!("║ Avg Tick Time:      {:>10} μs                                ║", final_stats.mean_tick().as_micros());
    println!("║ Slowest Drain:      {:>10} μs                                ║", final_stats.slowest.service.as_micros());
    println!("║ Late Ticks:         {:>10}                                   ║", final_stats.overruns);
    println!("║ Skipped Ticks:      {:>10}                                   ║", final_stats.skipped);
    println!("║ Activations:        {:>10}                                   ║", activations);
    println!("║ Ring Requests:      {:>10}                                   ║", requests);
    println!("║ Tiles Drained:      {:>10}                                   ║", counters.drained);
    println!("║ Tiles Evicted:      {:>10}                                   ║", counters.evicted);
    println!("╚══════════════════════════════════════════════════════════════════╝");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Shutdown failed: {e}");
            ExitCode::FAILURE
        }
    }
}
