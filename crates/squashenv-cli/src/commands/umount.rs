use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, CommandError, Output, EXIT_SUCCESS};
use squashenv_core::{Engine, UnmountOutcome};

pub fn run(engine: &Engine, out: Output) -> Result<u8, CommandError> {
    let config = engine.load()?;
    let canonical = config.canonical_path();

    let pb = maybe_spinner(out, "unmounting...");
    let outcome = match engine.umount(&config) {
        Ok(o) => o,
        Err(e) => {
            spin_fail(pb.as_ref(), "unmount failed");
            return Err(e.into());
        }
    };
    let msg = match outcome {
        UnmountOutcome::Unmounted => format!("unmounted {}", canonical.display()),
        UnmountOutcome::NotMounted => format!("{} was not mounted", canonical.display()),
    };
    spin_ok(pb.as_ref(), &msg);

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
