use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;

use gyrotron::graph::builder::synthetic_edges;
use gyrotron::graph::workload::GraphWorkload;
use gyrotron::sim::config::{Config, MemConfig, SimConfig};
use gyrotron::tile::coalesce::CoalesceConfig;
use gyrotron::tile::push::PushConfig;
use gyrotron::tile::tile::Tile;
use gyrotron::tile::wle::WlConfig;

#[derive(Parser)]
#[command(version, about)]
struct GyrotronArgs {
    /// Optional TOML config with [sim], [cache], [memory], [wle], [push]
    /// sections.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workload: bfs, bfs_visited, cc, sssp, pr, bsp_pr, bsp_bc.
    #[arg(long, default_value = "bfs")]
    workload: String,

    #[arg(long, default_value_t = 1024)]
    vertices: usize,

    /// Extra hashed out-edges per vertex on top of the connectivity ring.
    #[arg(long, default_value_t = 3)]
    degree: usize,

    /// Root vertex for traversal workloads.
    #[arg(long, default_value_t = 0)]
    root: usize,

    #[arg(long)]
    max_cycles: Option<u64>,
}

pub fn main() -> Result<()> {
    env_logger::init();
    let argv = GyrotronArgs::parse();

    let table = match &argv.config {
        Some(path) => std::fs::read_to_string(path)?.parse::<toml::Table>()?,
        None => toml::Table::new(),
    };
    let sim_config = SimConfig::from_section(table.get("sim"));
    let cache_config = CoalesceConfig::from_section(table.get("cache"));
    let mem_config = MemConfig::from_section(table.get("memory"));
    let wl_config = WlConfig::from_section(table.get("wle"));
    let push_config = PushConfig::from_section(table.get("push"));
    let max_cycles = argv.max_cycles.unwrap_or(sim_config.max_cycles);

    let root_addr = (argv.root * 16) as u64;
    let workload = GraphWorkload::from_name(&argv.workload, argv.vertices as u32, root_addr)
        .ok_or_else(|| anyhow!("unknown workload {}", argv.workload))?;

    let edges = synthetic_edges(argv.vertices, argv.degree);
    info!(
        "running {} on {} vertices / {} edges",
        workload.name(),
        argv.vertices,
        edges.len()
    );

    let mut tile = Tile::new(
        Arc::new(cache_config),
        Arc::new(wl_config),
        Arc::new(push_config),
        mem_config,
        workload,
        argv.vertices,
        &edges,
    )?;

    let cycles = tile.run(max_cycles);
    if !tile.done() {
        println!("did not quiesce within {max_cycles} cycles");
    }

    let stats = tile.engine.stats();
    println!("cycles:            {cycles}");
    println!("vertex reads:      {}", stats.vertex_reads);
    println!("vertex writes:     {}", stats.vertex_writes);
    println!(
        "hit rate:          {:.3} ({} hits, {} hum, {} misses)",
        stats.hit_rate(),
        stats.read_hits,
        stats.read_hit_under_misses,
        stats.read_misses
    );
    println!("vertices pulled:   {}", stats.vertices_pulled);
    println!("vertices pushed:   {}", stats.vertices_pushed);
    println!(
        "rejects:           {} mshr entry, {} mshr target",
        stats.mshr_entry_shortage, stats.mshr_target_shortage
    );
    println!(
        "stale schedules:   {} writebacks, {} fills, {} applies",
        stats.invalid_write_backs, stats.invalid_reads, stats.invalid_applies
    );
    println!(
        "pull locations:    {} cached, {} memory, {} folded, {} empty",
        stats.pull_in_cache, stats.pull_in_memory, stats.pull_pending_read, stats.pull_garbage
    );

    let sample = argv.root.min(argv.vertices - 1);
    println!(
        "root vertex state: {}",
        tile.workload.print(&tile.read_vertex(sample))
    );
    Ok(())
}
