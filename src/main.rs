//! MedQuery CLI
//!
//! 使用内置的演示语料（ScriptedSource）执行一次查询，按行输出事件 JSON，最后输出综合结果。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use medquery::core::{Frame, Intent};
use medquery::events::EventEmitter;
use medquery::sources::demo_registry;
use medquery::{observability, GraphBuilder};

#[derive(Parser, Debug)]
#[command(name = "medquery")]
#[command(about = "MedQuery - biomedical query orchestration over the demo corpus", long_about = None)]
#[command(version)]
struct CliArgs {
    /// Query intent (decides which sources are searched)
    #[arg(long, value_enum, default_value_t = IntentArg::General)]
    intent: IntentArg,

    /// Time budget in milliseconds (defaults to the configured budget)
    #[arg(long)]
    budget_ms: Option<u64>,

    /// Config file (defaults to config/default.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Query text
    #[arg(required = true, trailing_var_arg = true)]
    query: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum IntentArg {
    Literature,
    Trials,
    Drug,
    General,
}

impl From<IntentArg> for Intent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Literature => Intent::LiteratureReview,
            IntentArg::Trials => Intent::ClinicalTrials,
            IntentArg::Drug => Intent::DrugInformation,
            IntentArg::General => Intent::General,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = CliArgs::parse();
    let query = args.query.join(" ");

    let graph = GraphBuilder::from_config_file(args.config)
        .context("Failed to load config")?
        .with_registry(demo_registry())
        .build();

    let mut frame = Frame::new(args.intent.into()).with_entity("topic", query.clone());
    if let Some(ms) = args.budget_ms {
        frame = frame.with_time_budget_ms(ms);
    }

    let query_id = uuid::Uuid::new_v4().to_string();
    let (emitter, mut rx) = EventEmitter::channel(query_id);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("event serialization failed: {}", e),
            }
        }
    });

    let run = graph.execute_with_events(&query, frame, &emitter).await;
    drop(emitter);
    printer.await.context("event printer panicked")?;

    let summary = serde_json::json!({
        "outcome": run.outcome,
        "fan_in": run.fan_in,
        "budget": run.budget,
        "node_path": run.state.node_path,
        "errors": run.state.errors,
        "synthesis": run.synthesis,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if run.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_words_are_joined_after_flags() {
        let args = CliArgs::try_parse_from([
            "medquery",
            "--intent",
            "trials",
            "--budget-ms",
            "5000",
            "metformin",
            "ageing",
        ])
        .unwrap();
        assert_eq!(args.query.join(" "), "metformin ageing");
        assert_eq!(Intent::from(args.intent), Intent::ClinicalTrials);
        assert_eq!(args.budget_ms, Some(5000));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_defaults_and_rejections() {
        let args = CliArgs::try_parse_from(["medquery", "statins"]).unwrap();
        assert_eq!(args.intent, IntentArg::General);
        assert!(CliArgs::try_parse_from(["medquery"]).is_err());
        assert!(CliArgs::try_parse_from(["medquery", "--intent", "astrology", "q"]).is_err());
        assert!(CliArgs::try_parse_from(["medquery", "--budget-ms", "soon", "q"]).is_err());
    }
}
