//! `toolloop run`: Send one prompt through the tool loop.

use clap::Args;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use toolloop_agent::{GenerateRequest, GenerateResult, StreamEvent, Termination, ToolLoop};
use toolloop_config::AppConfig;
use toolloop_core::provider::{Provider, ToolChoice};
use toolloop_providers::ScriptedProvider;
use tracing::debug;

/// Providers that run locally and need no API key.
const LOCAL_PROVIDERS: &[&str] = &["ollama", "vllm", "llamacpp", "llama.cpp"];

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The user prompt
    pub prompt: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Model reference, optionally provider-prefixed (e.g. `ollama:llama3.2`)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Step ceiling (defaults to `[loop] max_steps`)
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// `auto`, `required`, `none`, or the name of a tool to force
    #[arg(long)]
    pub tool_choice: Option<String>,

    /// Comma-separated subset of tools to offer (all when omitted)
    #[arg(long, value_delimiter = ',')]
    pub tools: Vec<String>,

    /// Print events as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Replay model turns from a JSON script instead of calling a provider
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Machine-readable output (the aggregate, or one event per line with --stream)
    #[arg(long)]
    pub json: bool,
}

pub async fn run(config: AppConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (provider, model) = resolve_provider(&config, &args)?;
    debug!(provider = provider.name(), model = %model, "Resolved provider");
    let request = build_request(&config, &args, model);

    let catalog = toolloop_tools::default_catalog()?;
    let tool_loop =
        ToolLoop::new(provider, catalog).with_tool_concurrency(config.loop_config.tool_concurrency);

    let result = if args.stream {
        let mut stream = tool_loop.stream(request)?;
        while let Some(event) = stream.next().await {
            print_event(&event, args.json)?;
        }
        stream.finish().await?
    } else {
        tool_loop.generate(request).await?
    };

    if args.json {
        if !args.stream {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    } else {
        if !args.stream {
            println!("{}", result.text);
        }
        print_summary(&result);
    }

    Ok(())
}

/// Pick the provider and the model name to send it.
fn resolve_provider(
    config: &AppConfig,
    args: &RunArgs,
) -> Result<(Arc<dyn Provider>, String), Box<dyn std::error::Error>> {
    let model_ref = args.model.clone().unwrap_or_else(|| config.default_model.clone());

    if let Some(script) = &args.script {
        let provider = ScriptedProvider::from_json_file(script)?;
        return Ok((Arc::new(provider), model_ref));
    }

    let router = toolloop_providers::build_from_config(config);
    let (provider, model) = router
        .resolve(&model_ref)
        .ok_or("No default provider configured")?;

    let keyed = config.has_api_key()
        || config
            .providers
            .get(provider.name())
            .is_some_and(|p| p.api_key.is_some());
    if !keyed && !LOCAL_PROVIDERS.contains(&provider.name()) {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{}'!", provider.name());
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY = 'sk-or-v1-...'   (recommended)");
        eprintln!("    OPENAI_API_KEY     = 'sk-...'         (for OpenAI direct)");
        eprintln!("    TOOLLOOP_API_KEY   = 'sk-...'         (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    Ok((provider, model))
}

/// Merge command-line flags over the `[loop]` defaults.
fn build_request(config: &AppConfig, args: &RunArgs, model: String) -> GenerateRequest {
    let tool_choice = args
        .tool_choice
        .as_deref()
        .map(ToolChoice::from)
        .unwrap_or_else(|| config.loop_config.tool_choice.clone());

    let mut request = GenerateRequest::new(model)
        .with_prompt(&args.prompt)
        .with_max_steps(args.max_steps.unwrap_or(config.loop_config.max_steps))
        .with_tool_choice(tool_choice)
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_tool_call_streaming(config.loop_config.tool_call_streaming);

    if let Some(system) = &args.system {
        request = request.with_system(system);
    }
    if !args.tools.is_empty() {
        request = request.with_active_tools(args.tools.iter().cloned());
    }
    request
}

fn print_event(event: &StreamEvent, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        StreamEvent::TextDelta { text_delta } => {
            print!("{text_delta}");
            std::io::stdout().flush()?;
        }
        StreamEvent::ToolCall { tool_name, args, .. } => {
            eprintln!("\n  → {tool_name} {args}");
        }
        StreamEvent::ToolResult { tool_name, result, .. } => {
            eprintln!("  ← {tool_name} {result}");
        }
        StreamEvent::Finish { .. } => println!(),
        StreamEvent::Error { message } => eprintln!("\n  [Error] {message}"),
        _ => {}
    }
    Ok(())
}

fn print_summary(result: &GenerateResult) {
    eprintln!();
    eprintln!(
        "  Steps: {}  Termination: {}  Tokens: {}",
        result.steps.len(),
        result.termination,
        result.usage.total_tokens
    );

    match result.termination {
        Termination::StepLimitReached => {
            eprintln!("  The model still wanted tools; raise --max-steps to let it continue.");
        }
        Termination::AwaitingToolResults => {
            eprintln!("  Waiting on client-side tools:");
            for call in &result.pending_tool_calls {
                eprintln!("    {} ({}) {}", call.name, call.id, call.arguments);
            }
        }
        Termination::Completed => {}
    }
}
