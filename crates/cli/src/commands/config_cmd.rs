//! `toolloop config`: Configuration management commands.

use std::path::Path;
use toolloop_config::{AppConfig, ConfigError};

const REDACTED: &str = "[REDACTED]";

fn target(path: Option<&Path>) -> std::path::PathBuf {
    path.map(Path::to_path_buf).unwrap_or_else(AppConfig::config_path)
}

pub fn init(path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = target(path);
    AppConfig::write_default(&path, force)?;
    println!("✅ Created config.toml at: {}", path.display());
    println!("\n📝 Next steps:");
    println!("   1. Edit {} and add your API key", path.display());
    println!("   2. Run: toolloop run \"What is the weather in Paris?\"");
    Ok(())
}

pub fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

/// A copy of the config that is safe to print.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    config
}

pub fn validate(
    path: Option<&Path>,
    loaded: Result<AppConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {}", target(path).display());

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Provider:     {}", config.default_provider);
    println!("   Model:        {}", config.default_model);
    println!("   Max steps:    {}", config.loop_config.max_steps);
    println!("   Tool choice:  {}", config.loop_config.tool_choice);
    println!("   Concurrency:  {}", config.loop_config.tool_concurrency);
    Ok(())
}

/// Problems that do not make the config invalid but will likely bite.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.has_api_key() && config.providers.values().all(|p| p.api_key.is_none()) {
        warnings.push(
            "No API key set (set TOOLLOOP_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)".into(),
        );
    }

    if let Some(forced) = config.loop_config.tool_choice.forced_tool()
        && let Ok(catalog) = toolloop_tools::default_catalog()
        && !catalog.contains(forced)
    {
        warnings.push(format!("loop.tool_choice forces unknown tool '{forced}'"));
    }

    if config.loop_config.max_steps == 1 {
        warnings.push("loop.max_steps = 1: tool results never reach the model".into());
    }

    warnings
}

pub fn path(path: Option<&Path>) {
    println!("{}", target(path).display());
}
