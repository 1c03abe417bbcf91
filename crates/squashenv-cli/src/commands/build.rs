use super::{json_pretty, CommandError, Output, EXIT_SUCCESS};
use console::style;
use squashenv_core::{install_signal_handler, BuildOptions, Engine, StepSelection};

pub fn run(
    engine: &Engine,
    steps: Option<&str>,
    keep_staging: bool,
    out: Output,
) -> Result<u8, CommandError> {
    let steps = match steps {
        Some(s) => StepSelection::parse(s)?,
        None => StepSelection::all(),
    };
    let config = engine.load()?;
    install_signal_handler();

    if out.human() {
        let which = if steps.is_all() {
            "all steps".to_owned()
        } else {
            format!("steps {steps}")
        };
        println!(
            "{} {} ({which})",
            style("building").bold(),
            config.image_path(engine.project_dir()).display()
        );
    }

    let options = BuildOptions {
        steps,
        keep_staging,
    };
    let report = match engine.build(&config, &options) {
        Ok(r) => r,
        Err(e) => {
            if out.human() {
                println!("{} build failed", style("✗").red());
            }
            return Err(e.into());
        }
    };

    if out.json {
        println!("{}", json_pretty(&report)?);
    } else if out.human() {
        let ran: Vec<&str> = report.steps.iter().map(|s| s.name()).collect();
        if report.simulated {
            println!(
                "{} dry run finished, nothing was changed ({})",
                style("✓").green(),
                ran.join(", ")
            );
        } else {
            println!("{} build finished ({})", style("✓").green(), ran.join(", "));
            if report.image.is_file() {
                println!("image: {}", report.image.display());
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
