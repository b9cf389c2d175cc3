use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path, path::PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use animato::{CallEvent, FrameTime, GraphDoc, NodeGraph};

#[derive(Parser, Debug)]
#[command(name = "animato", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and validate a graph document.
    Check(CheckArgs),
    /// Drive a graph for a number of frames, printing one JSON line each.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Input graph JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Input graph JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Display refresh rate in frames per second.
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

#[derive(Debug, serde::Serialize)]
struct FrameReport {
    frame: u64,
    time_ms: f64,
    values: BTreeMap<i64, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<CallEvent>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Check(args) => cmd_check(args),
        Command::Run(args) => cmd_run(args),
    }
}

fn read_graph_json(path: &Path) -> anyhow::Result<GraphDoc> {
    let f = File::open(path).with_context(|| format!("open graph '{}'", path.display()))?;
    let r = BufReader::new(f);
    let doc: GraphDoc = serde_json::from_reader(r).with_context(|| "parse graph JSON")?;
    Ok(doc)
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let doc = read_graph_json(&args.in_path)?;
    doc.validate()?;
    eprintln!("ok: {} nodes", doc.nodes.len());
    Ok(())
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.fps > 0, "fps must be > 0");

    let doc = read_graph_json(&args.in_path)?;
    let mut graph = NodeGraph::from_doc(&doc)?;
    let frame_ms = 1000.0 / f64::from(args.fps);

    for frame in 0..args.frames {
        let now = FrameTime(frame as f64 * frame_ms);
        graph.run_frame(now);
        graph.update_all()?;

        let values = graph
            .tags()
            .filter_map(|tag| graph.node_value(tag).map(|v| (tag.0, v)))
            .collect();
        let report = FrameReport {
            frame,
            time_ms: now.0,
            values,
            events: graph.drain_events(),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    eprintln!("ran {} frames", args.frames);
    Ok(())
}
