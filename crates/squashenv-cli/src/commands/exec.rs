use super::{CommandError, EXIT_FAILURE};
use squashenv_core::Engine;

/// Exits with the wrapped command's own status.
pub fn run(engine: &Engine, command: &[String]) -> Result<u8, CommandError> {
    let config = engine.load()?;
    let code = engine.exec(&config, command)?;
    Ok(u8::try_from(code).unwrap_or(EXIT_FAILURE))
}
