//! `toolloop tools`: List the built-in tools.

use toolloop_core::tool::ToolCatalog;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = toolloop_tools::default_catalog()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog.definitions())?);
        return Ok(());
    }

    println!("🔧 Built-in Tools");
    println!("=================");
    println!();
    for line in describe(&catalog) {
        println!("{line}");
    }
    println!();
    println!("  Client-side tools are returned to the caller instead of being run.");
    Ok(())
}

/// One line per tool: name, where it runs, and its description.
fn describe(catalog: &ToolCatalog) -> Vec<String> {
    catalog
        .names()
        .into_iter()
        .filter_map(|name| catalog.get(name))
        .map(|tool| {
            let runs = if tool.has_executor() { "local" } else { "client" };
            format!(
                "  {:<22} {:<7} {}",
                tool.name(),
                runs,
                tool.description().unwrap_or("")
            )
        })
        .collect()
}
