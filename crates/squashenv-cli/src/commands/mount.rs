use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, CommandError, Output, EXIT_SUCCESS};
use squashenv_core::{Engine, MountOutcome};
use squashenv_runtime::activation::{activate_command, deactivate_command};

pub fn run(engine: &Engine, out: Output) -> Result<u8, CommandError> {
    let config = engine.load()?;
    let canonical = config.canonical_path();

    let pb = maybe_spinner(out, "mounting...");
    let outcome = match engine.mount(&config) {
        Ok(o) => o,
        Err(e) => {
            spin_fail(pb.as_ref(), "mount failed");
            return Err(e.into());
        }
    };
    let msg = match outcome {
        MountOutcome::Mounted => format!("mounted at {}", canonical.display()),
        MountOutcome::AlreadyMounted => format!("already mounted at {}", canonical.display()),
    };
    spin_ok(pb.as_ref(), &msg);

    if out.human() {
        println!(
            "enable with:  {}",
            activate_command(&canonical, &config.env_name)
        );
        println!("disable with: {}", deactivate_command());
    }

    if out.json {
        let payload = serde_json::json!({
            "outcome": outcome,
            "canonical_path": canonical,
            "dry_run": engine.simulated(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
