use super::{json_pretty, CommandError, Output, EXIT_PREREQ_MISSING, EXIT_SUCCESS};
use console::style;
use squashenv_core::Engine;
use squashenv_runtime::{format_missing, ToolStatus};

pub fn run(engine: &Engine, out: Output) -> Result<u8, CommandError> {
    let tools = engine.prereqs();
    let all_found = tools.iter().all(ToolStatus::found);

    if out.json {
        let payload = serde_json::json!({
            "ok": all_found,
            "tools": tools,
        });
        println!("{}", json_pretty(&payload)?);
    } else if !out.quiet {
        for tool in &tools {
            print_tool(tool);
        }
        if !all_found {
            let missing: Vec<ToolStatus> =
                tools.iter().filter(|t| !t.found()).cloned().collect();
            println!();
            println!("{}", format_missing(&missing));
        }
    }

    Ok(if all_found {
        EXIT_SUCCESS
    } else {
        EXIT_PREREQ_MISSING
    })
}

fn print_tool(tool: &ToolStatus) {
    let ops: Vec<String> = tool
        .needed_for
        .iter()
        .map(ToString::to_string)
        .collect();
    match &tool.path {
        Some(path) => println!(
            "{} {:<12} {} ({})",
            style("✓").green(),
            tool.name,
            path.display(),
            ops.join(", ")
        ),
        None => println!(
            "{} {:<12} not found, needed for {} (install: {})",
            style("✗").red(),
            tool.name,
            ops.join(", "),
            tool.install_hint
        ),
    }
}
