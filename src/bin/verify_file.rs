//! One-shot run over a JSON file of candidates; prints `{events, report}`.
//!
//! Usage: verify-file <candidates.json> [--max N]

use anyhow::{bail, Context};
use event_verifier::{init_tracing, EventCandidate, PipelineConfig, TrustPipeline};
use std::path::PathBuf;

fn parse_args() -> anyhow::Result<(PathBuf, Option<usize>)> {
    let mut path = None;
    let mut max = None;
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--max" => {
                let v = args.next().context("--max needs a value")?;
                max = Some(v.parse::<usize>().with_context(|| format!("--max {v} is not a count"))?);
            }
            "-h" | "--help" => bail!("usage: verify-file <candidates.json> [--max N]"),
            _ if path.is_none() => path = Some(PathBuf::from(a)),
            other => bail!("unexpected argument `{other}`"),
        }
    }
    let path = path.context("usage: verify-file <candidates.json> [--max N]")?;
    Ok((path, max))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let (path, max) = parse_args()?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading candidates from {}", path.display()))?;
    let candidates: Vec<EventCandidate> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing candidates in {}", path.display()))?;

    let cfg = PipelineConfig::load()?;
    let pipeline = TrustPipeline::from_config(&cfg)?;
    let outcome = pipeline.run(candidates, max).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
