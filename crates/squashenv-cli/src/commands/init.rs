use super::{json_pretty, CommandError, Output, EXIT_SUCCESS};
use squashenv_core::Engine;
use squashenv_schema::{config_path, INSTALLER_ENV};

pub fn run(engine: &Engine, out: Output) -> Result<u8, CommandError> {
    let installer = std::env::var(INSTALLER_ENV).ok().filter(|s| !s.is_empty());
    let config = engine.init(installer)?;
    let dir = engine.project_dir();

    if out.json {
        let payload = serde_json::json!({
            "id": config.id,
            "config": config_path(dir),
            "canonical_path": config.canonical_path(),
            "image": config.image_path(dir),
            "manifest": config.manifest_path(dir),
            "dry_run": engine.simulated(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if out.human() {
        println!("initialized project {}", config.id.short());
        println!("  config:         {}", config_path(dir).display());
        println!("  canonical path: {}", config.canonical_path().display());
        println!("  image:          {}", config.image_path(dir).display());
        println!(
            "edit {} and run 'squashenv build'",
            config.manifest_path(dir).display()
        );
    }
    Ok(EXIT_SUCCESS)
}
