use anyhow::{Context, bail};
use panel_linkage::core_modules::label_files::read_label_lines;
use panel_linkage::parallel_pipeline::{InspectionBatch, VideoJob};
use panel_linkage::pipeline::{
    ConditionBreakdown, InspectionConfig, inspect_image, run_video_session,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  inspection_runner image <panel_labels.txt> <anomaly_labels.txt> [config.json]
  inspection_runner video <panel_labels_dir> <anomaly_labels_dir> [config.json]
  inspection_runner batch <videos_root> [config.json]

In batch mode every subdirectory of <videos_root> holding `panel/` and `anomaly/`
label directories is inspected as its own video.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // --- 1. Argument Parsing ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        println!("{USAGE}");
        return Ok(());
    }
    let mode = args[1].as_str();

    // --- 2. Dispatch ---
    let output = match mode {
        "image" | "video" => {
            if args.len() < 4 {
                println!("{USAGE}");
                return Ok(());
            }
            let config = load_config(args.get(4))?;
            let panel = Path::new(&args[2]);
            let anomaly = Path::new(&args[3]);
            if mode == "image" {
                inspect_single_image(&config, panel, anomaly)?
            } else {
                let summary = run_video_session(&config, panel, anomaly)
                    .with_context(|| format!("inspecting video labels in {}", panel.display()))?;
                serde_json::json!({
                    "summary": summary,
                    "conditions": summary.condition_breakdown(),
                })
            }
        }
        "batch" => {
            let config = load_config(args.get(3))?;
            inspect_batch(config, Path::new(&args[2])).await?
        }
        other => bail!("unknown mode `{other}`\n{USAGE}"),
    };

    // --- 3. Report ---
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&String>) -> anyhow::Result<InspectionConfig> {
    match path {
        Some(path) => InspectionConfig::from_json_file(Path::new(path))
            .with_context(|| format!("loading config {path}")),
        None => Ok(InspectionConfig::default()),
    }
}

fn inspect_single_image(
    config: &InspectionConfig,
    panel: &Path,
    anomaly: &Path,
) -> anyhow::Result<serde_json::Value> {
    let panel_lines = read_label_lines(panel)?;
    let anomaly_lines = read_label_lines(anomaly)?;
    let map = inspect_image(config, &panel_lines, &anomaly_lines)
        .with_context(|| format!("linking {} with {}", panel.display(), anomaly.display()))?;
    Ok(serde_json::json!({
        "panels": map,
        "conditions": ConditionBreakdown::from_map(&map),
    }))
}

async fn inspect_batch(config: InspectionConfig, root: &Path) -> anyhow::Result<serde_json::Value> {
    let mut jobs = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
        let dir: PathBuf = entry?.path();
        let (panel_dir, anomaly_dir) = (dir.join("panel"), dir.join("anomaly"));
        if panel_dir.is_dir() && anomaly_dir.is_dir() {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            jobs.push(VideoJob {
                name,
                panel_dir,
                anomaly_dir,
            });
        }
    }
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    info!(videos = jobs.len(), "discovered videos");

    let outcomes = InspectionBatch::new(config).run(jobs).await;

    let mut report = serde_json::Map::new();
    for outcome in outcomes {
        let value = match outcome.result {
            Ok(summary) => serde_json::json!({
                "summary": summary,
                "conditions": summary.condition_breakdown(),
            }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        report.insert(outcome.name, value);
    }
    Ok(serde_json::Value::Object(report))
}
