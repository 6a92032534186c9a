mod repl;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use supportbot_core::{
    evaluate_cases, load_corpus_jsonl, sample_corpus, EmbeddingProvider, EvalCase,
    HashEmbeddingProvider, KnowledgeBase, Matcher, MatcherConfig, MiniLmEmbeddingProvider,
    SerializedProvider, DEFAULT_FALLBACK_TEXT, DEFAULT_THRESHOLD, MINILM_DIMENSION,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "supportbot", version)]
#[command(about = "FAQ support bot backed by sentence embeddings")]
struct Cli {
    /// all-MiniLM-L6-v2 weights (.safetensors). Without it a hashed
    /// bag-of-words embedding is used.
    #[arg(long, global = true, env = "SUPPORTBOT_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// tokenizer.json matching the model. Required when --model-path is set.
    #[arg(long, global = true, env = "SUPPORTBOT_TOKENIZER_PATH")]
    tokenizer_path: Option<PathBuf>,

    /// JSONL file with one {"question", "answer"} object per line. Defaults
    /// to the built-in sample FAQ.
    #[arg(long, global = true, env = "SUPPORTBOT_CORPUS")]
    corpus: Option<PathBuf>,

    /// Minimum cosine similarity for answering instead of falling back.
    #[arg(long, global = true, env = "SUPPORTBOT_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Reply used when no question clears the threshold.
    #[arg(
        long,
        global = true,
        env = "SUPPORTBOT_FALLBACK_TEXT",
        default_value = DEFAULT_FALLBACK_TEXT
    )]
    fallback_text: String,

    /// HTTP listen address.
    #[arg(long, global = true, env = "SUPPORTBOT_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Per-request time limit for /chat, in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    request_timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive question/answer loop.
    Chat,
    /// HTTP API only.
    Serve,
    /// Answer a single question and print match details.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Run labelled cases and report the pass rate.
    Eval {
        #[arg(long)]
        cases: PathBuf,
        #[arg(long, default_value_t = 0.85)]
        min_pass_rate: f32,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn make_embedder(cli: &Cli) -> Result<Box<dyn EmbeddingProvider>> {
    match (&cli.model_path, &cli.tokenizer_path) {
        (Some(model), Some(tokenizer)) => {
            info!(model = %model.display(), "loading embedding model");
            let provider = MiniLmEmbeddingProvider::load(model, tokenizer)?;
            Ok(Box::new(SerializedProvider::new(provider)))
        }
        (None, None) => {
            warn!("no model configured; using hashed bag-of-words embeddings");
            Ok(Box::new(HashEmbeddingProvider::new(MINILM_DIMENSION)))
        }
        _ => anyhow::bail!("--model-path and --tokenizer-path must both be provided"),
    }
}

fn build_matcher(cli: &Cli) -> Result<Arc<Matcher>> {
    let config = MatcherConfig {
        threshold: cli.threshold,
        fallback_text: cli.fallback_text.clone(),
    };
    config.validate()?;

    let embedder = make_embedder(cli)?;
    let entries = match &cli.corpus {
        Some(path) => load_corpus_jsonl(path)?,
        None => sample_corpus(),
    };

    info!(entries = entries.len(), "encoding FAQ questions");
    let kb = KnowledgeBase::build(entries, &embedder)?;
    let matcher = Matcher::new(Arc::new(kb), embedder, config)?;
    Ok(Arc::new(matcher))
}

fn read_eval_cases_json(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let cases: Vec<EvalCase> = serde_json::from_reader(file).context("parse eval cases json")?;
    Ok(cases)
}

fn server_state(cli: &Cli, matcher: Arc<Matcher>) -> server::AppState {
    server::AppState::new(matcher, Duration::from_secs(cli.request_timeout))
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let matcher = build_matcher(&cli)?;

    match &cli.command {
        Some(Commands::Chat) => {
            tokio::task::spawn_blocking(move || repl::run_repl(&matcher))
                .await
                .context("repl task panicked")??;
        }
        Some(Commands::Serve) => {
            server::serve(cli.bind, server_state(&cli, matcher), server::shutdown_signal())
                .await?;
        }
        Some(Commands::Ask { question }) => {
            let result = matcher.lookup(question)?;
            println!(
                "decision={:?} score={:.4} entry={}",
                result.reply.decision(),
                result.score,
                result.entry_index
            );
            println!("answer={}", result.reply.text());
        }
        Some(Commands::Eval {
            cases,
            min_pass_rate,
        }) => {
            let run_id = format!("eval-{}", chrono::Utc::now().timestamp_millis());
            let loaded = read_eval_cases_json(cases)?;
            let summary = evaluate_cases(matcher.as_ref(), &loaded)?;

            println!(
                "run_id={} total={} passed={} failed={} pass_rate={:.4} required={:.4} meets_threshold={}",
                run_id,
                summary.total,
                summary.passed,
                summary.failed,
                summary.pass_rate,
                min_pass_rate,
                summary.meets(*min_pass_rate)
            );
            for o in &summary.outcomes {
                println!(
                    "case={} passed={} decision={:?} entry={} score={:.4} latency={:.1}ms",
                    o.case_id, o.passed, o.actual_decision, o.actual_entry, o.score, o.latency_ms
                );
            }
            println!("avg_latency={:.1}ms", summary.mean_latency_ms());
        }
        None => {
            // HTTP in the background, REPL in the foreground. The server goes
            // down with the process once the REPL exits.
            let state = server_state(&cli, matcher.clone());
            let bind = cli.bind;
            tokio::spawn(async move {
                if let Err(err) = server::serve(bind, state, std::future::pending()).await {
                    warn!(error = %format!("{err:#}"), "http server stopped");
                }
            });
            tokio::task::spawn_blocking(move || repl::run_repl(&matcher))
                .await
                .context("repl task panicked")??;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
