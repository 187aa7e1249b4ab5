//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use sleuth_core::brain::{InvokeOptions, LlmClient};
use sleuth_core::config::{SleuthConfig, load_config, workspace_config_path};
use sleuth_core::research::{OverallState, ResearchCallback, ResearchGraph};
use sleuth_core::server::{ServerState, SharedServer};
use sleuth_core::types::StreamEvent;
use sleuth_core::{create_provider, diagnostics, persistence};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Global flags that adjust the loaded configuration.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub quiet: bool,
}

impl Overrides {
    fn apply(&self, config: &mut SleuthConfig) {
        if let Some(provider) = &self.provider {
            config.llm.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
            config.research.query_generator_model = model.clone();
            config.research.reflection_model = model.clone();
            config.research.answer_model = model.clone();
        }
    }
}

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        Commands::InitEnv { api_key, force } => handle_init_env(workspace, api_key, force),
        command => {
            let mut config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            overrides.apply(&mut config);
            for warning in config.validate() {
                tracing::warn!("{}", warning);
            }
            match command {
                Commands::Research {
                    question,
                    initial_queries,
                    max_loops,
                    reasoning_model,
                    json,
                    output,
                } => {
                    let state = OverallState {
                        initial_search_query_count: initial_queries,
                        max_research_loops: max_loops,
                        reasoning_model,
                        ..OverallState::from_question(question)
                    };
                    let show_progress = !(json || overrides.quiet);
                    handle_research(&config, state, json, output.as_deref(), show_progress).await
                }
                Commands::Ask { prompt, grounded } => handle_ask(&config, prompt, grounded).await,
                Commands::Serve { host, port } => {
                    let host = host.unwrap_or_else(|| config.server.host.clone());
                    let port = port.unwrap_or(config.server.port);
                    handle_serve(&config, &format!("{host}:{port}")).await
                }
                Commands::Doctor { offline } => handle_doctor(&config, offline).await,
                Commands::Config { .. } | Commands::InitEnv { .. } => Ok(()),
            }
        }
    }
}

fn build_client(config: &SleuthConfig) -> anyhow::Result<Arc<LlmClient>> {
    let provider = create_provider(&config.llm)?;
    Ok(Arc::new(LlmClient::new(provider, &config.llm)))
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&SleuthConfig::default())?;
            persistence::atomic_write(&config_path, toml_str.as_bytes())?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", redacted_toml(&config)?);
            Ok(())
        }
    }
}

/// Render the config as TOML with any inline API key masked.
fn redacted_toml(config: &SleuthConfig) -> anyhow::Result<String> {
    let mut config = config.clone();
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("********".to_string());
    }
    Ok(toml::to_string_pretty(&config)?)
}

fn handle_init_env(
    workspace: &Path,
    api_key: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let key_var = load_config(Some(workspace), None)
        .map(|c| c.llm.api_key_env)
        .unwrap_or_else(|_| "GEMINI_API_KEY".to_string());
    let path = diagnostics::write_env_file(workspace, &key_var, api_key.as_deref(), force)?;
    println!("Wrote {}", path.display());
    if api_key.is_none() {
        println!("Edit it and set {key_var} to your Gemini API key.");
    }
    Ok(())
}

/// Prints graph progress to stderr.
struct ProgressPrinter;

impl ResearchCallback for ProgressPrinter {
    fn on_node_start(&self, node: &str) {
        eprintln!("  > {}", node);
    }

    fn on_node_finish(&self, _node: &str) {}

    fn on_query_complete(&self, query: &str, sources_found: usize) {
        eprintln!("    searched {:?} ({} sources)", query, sources_found);
    }

    fn on_complete(&self, state: &OverallState) {
        eprintln!(
            "  done: {} loops, {} queries\n",
            state.research_loop_count,
            state.search_query.len()
        );
    }
}

/// Final answer followed by a numbered source list.
fn format_research_output(state: &OverallState) -> String {
    let mut out = state
        .answer()
        .map(|m| m.content.clone())
        .unwrap_or_default();
    if !state.sources_gathered.is_empty() {
        out.push_str("\n\nSources:\n");
        for (i, source) in state.sources_gathered.iter().enumerate() {
            out.push_str(&format!("  [{}] {} - {}\n", i + 1, source.label, source.value));
        }
    }
    out
}

async fn handle_research(
    config: &SleuthConfig,
    state: OverallState,
    json: bool,
    output: Option<&Path>,
    show_progress: bool,
) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let mut graph = ResearchGraph::new(Arc::clone(&client), config.research.clone());
    if show_progress {
        graph = graph.with_callback(Arc::new(ProgressPrinter));
    }

    let state = graph.invoke(state).await?;

    if let Some(path) = output {
        persistence::atomic_write_json(path, &state)?;
        tracing::info!(path = %path.display(), "Research state written");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        println!("{}", format_research_output(&state));
    }

    let usage = client.total_usage();
    tracing::info!(
        calls = client.call_count(),
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "Token usage"
    );
    Ok(())
}

async fn handle_ask(config: &SleuthConfig, prompt: String, grounded: bool) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let mut options = InvokeOptions::default().temperature(config.llm.temperature);
    if grounded {
        options = options.grounded();
    }

    let (tx, mut rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(text) => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                }
                StreamEvent::Done { usage } => {
                    let _ = writeln!(stdout);
                    tracing::debug!(total_tokens = usage.total(), "Stream finished");
                }
                StreamEvent::Error(e) => eprintln!("\nstream error: {}", e),
            }
        }
    });

    let result = client.stream(prompt, options, tx).await;
    let _ = printer.await;
    result?;
    Ok(())
}

async fn handle_serve(config: &SleuthConfig, addr: &str) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let shared: SharedServer = Arc::new(ServerState::new(client, config.research.clone()));
    println!("Sleuth research API on http://{}", addr);
    println!("Routes: http://{}/docs", addr);
    sleuth_core::server::run(shared, addr).await?;
    Ok(())
}

async fn handle_doctor(config: &SleuthConfig, offline: bool) -> anyhow::Result<()> {
    let report = diagnostics::run_diagnostics(config, offline).await;
    print!("{}", report.render());
    if report.has_failures() {
        anyhow::bail!("diagnostics found problems");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sleuth_core::research::CitationSegment;
    use sleuth_core::types::Message;

    #[test]
    fn test_overrides_apply_model_everywhere() {
        let mut config = SleuthConfig::default();
        Overrides {
            model: Some("gemini-2.5-pro".into()),
            provider: Some("mock".into()),
            quiet: false,
        }
        .apply(&mut config);
        assert_eq!(config.llm.provider, "mock");
        assert_eq!(config.llm.model, "gemini-2.5-pro");
        assert_eq!(config.research.reflection_model, "gemini-2.5-pro");
        assert_eq!(config.research.answer_model, "gemini-2.5-pro");
    }

    #[test]
    fn test_format_research_output() {
        let mut state = OverallState::from_question("q");
        state
            .messages
            .push(Message::assistant("Spain won [uefa](https://uefa.example).").with_name("researcher"));
        state.sources_gathered = vec![CitationSegment {
            label: "uefa".into(),
            short_url: "https://short/0-0".into(),
            value: "https://uefa.example".into(),
        }];
        assert_eq!(
            format_research_output(&state),
            "Spain won [uefa](https://uefa.example).\n\nSources:\n  [1] uefa - https://uefa.example\n"
        );
    }

    #[test]
    fn test_redacted_toml_masks_key() {
        let mut config = SleuthConfig::default();
        config.llm.api_key = Some("AIzaSecret".into());
        let rendered = redacted_toml(&config).unwrap();
        assert!(!rendered.contains("AIzaSecret"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn test_config_init_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        handle_config(ConfigAction::Init, dir.path()).unwrap();
        let written = std::fs::read_to_string(workspace_config_path(dir.path())).unwrap();
        let parsed: SleuthConfig = toml::from_str(&written).unwrap();
        assert_eq!(parsed.research.max_research_loops, 2);
    }

    #[tokio::test]
    async fn test_research_with_mock_provider_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out").join("state.json");
        let mut config = SleuthConfig::default();
        config.llm.provider = "mock".into();

        handle_research(
            &config,
            OverallState::from_question("anything"),
            false,
            Some(&output),
            false,
        )
        .await
        .unwrap();

        let saved: OverallState =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert!(saved.answer().is_some());
    }
}
