use super::{colorize_state, json_pretty, CommandError, Output, EXIT_SUCCESS};
use squashenv_core::Engine;

pub fn run(engine: &Engine, out: Output) -> Result<u8, CommandError> {
    let config = engine.load()?;
    let status = engine.status(&config)?;

    if out.json {
        println!("{}", json_pretty(&status)?);
    } else if !out.quiet {
        let image = if status.image_present { "present" } else { "absent" };
        println!("project:        {}", status.project_dir.display());
        println!("id:             {}", status.id);
        println!("canonical path: {}", status.canonical_path.display());
        println!(
            "image:          {} ({})",
            status.image_path.display(),
            colorize_state(image)
        );
        println!("state:          {}", colorize_state(&status.state.to_string()));
    }
    Ok(EXIT_SUCCESS)
}
