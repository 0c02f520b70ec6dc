//! Headless chat host for the fusion engine.
//!
//! Reads chat lines as newline-delimited JSON from stdin, runs them through
//! a fusion orchestrator and writes every transcript message to stdout.
//! Sensor adapters are not wired here; only typed chat drives cycles.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use consens::agent::{CannedAgent, ChatAgent, OpenAiChatAgent};
use consens::config::FusionConfig;
use consens::host::StdioBridge;
use consens::pipeline::coordinator::FusionOrchestrator;
use consens::prompt::{AnimationCatalogue, EmotionPromptBuilder};
use consens::sink::ConsoleSink;
use consens::stream::StreamSource;
use consens::transcript::Transcript;
use std::path::PathBuf;
use std::sync::Arc;

fn load_config() -> anyhow::Result<FusionConfig> {
    let (path, explicit) = match std::env::var_os("CONSENS_CONFIG") {
        Some(path) => (PathBuf::from(path), true),
        None => (FusionConfig::default_config_path(), false),
    };
    if path.exists() {
        tracing::info!(path = %path.display(), "loading config");
        return Ok(FusionConfig::from_file(&path)?);
    }
    if explicit {
        anyhow::bail!("config file {} does not exist", path.display());
    }
    tracing::info!("no config file found; using defaults");
    Ok(FusionConfig::default())
}

fn build_agent(config: &FusionConfig) -> anyhow::Result<Arc<dyn ChatAgent>> {
    if config.agent.mock {
        tracing::info!("agent.mock set; answering with a canned reply");
        return Ok(Arc::new(CannedAgent::default()));
    }
    Ok(Arc::new(OpenAiChatAgent::from_config(&config.agent)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("consens=info")),
        )
        .init();

    tracing::info!("consens-host starting");

    let config = load_config()?;
    let transcript = Transcript::new(config.transcript.history_capacity);
    let agent = build_agent(&config)?;
    let sink = Arc::new(ConsoleSink::new());

    // Chat-only: the primary source has no adapter and no auxiliary
    // streams feed the prompt, so emotion fields fall back to their
    // "nothing detected" sentences.
    let questions = StreamSource::<String>::new("questions");
    // Before the orchestrator, so typed lines are echoed ahead of the answer.
    let bridge = StdioBridge::attach(&transcript);
    let prompt = EmotionPromptBuilder::new(config.emotion.threshold)
        .animations(AnimationCatalogue::from_config(&config.animations));
    let orchestrator = FusionOrchestrator::builder(&questions, &transcript, agent, sink)
        .prompt_builder(prompt)
        .config(config.cycle.clone())
        .build()?;

    let result = bridge.run_stdio(config.cycle.user_sender.clone()).await;
    orchestrator.dispose();

    result.map_err(|e| {
        tracing::error!(error = %e, "consens-host exited with error");
        anyhow::anyhow!("consens-host failed: {e}")
    })?;

    tracing::info!("consens-host shut down cleanly");
    Ok(())
}
