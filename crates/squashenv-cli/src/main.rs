mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{CommandError, Output};
use squashenv_core::Engine;
use squashenv_runtime::{select_executor, MountTable, BACKEND_ENV};
use squashenv_schema::INSTALLER_ENV;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "squashenv",
    version,
    about = "Build, mount and run compressed read-only software environments"
)]
struct Cli {
    /// Report every action that would be taken without changing anything.
    #[arg(long, default_value_t = false, global = true)]
    dry_run: bool,

    /// Project directory (defaults to the current directory).
    #[arg(short = 'd', long, global = true)]
    directory: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Print nothing on success.
    #[arg(short, long, default_value_t = false, global = true)]
    quiet: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create squashenv.toml and a template environment.yml.
    Init,
    /// Build the environment image.
    Build {
        /// Steps to run, e.g. "1,3-5" or "compress" (default: all).
        #[arg(long)]
        steps: Option<String>,
        /// Keep the staging tree when a step fails.
        #[arg(long, default_value_t = false)]
        keep_staging: bool,
    },
    /// Mount the image at its canonical path.
    Mount,
    /// Unmount the image.
    Umount,
    /// Run a command from the environment, mounting it for the duration if needed.
    Exec {
        /// Command and arguments to run.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show identifier, paths, image presence and mount state.
    Status,
    /// Check that the external tools squashenv drives are installed.
    Prereq,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SQUASHENV_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => make_engine(cli.directory, cli.dry_run)
            .and_then(|engine| dispatch(&engine, command, out)),
    };
    finish(result)
}

fn dispatch(engine: &Engine, command: Commands, out: Output) -> Result<u8, CommandError> {
    match command {
        Commands::Init => commands::init::run(engine, out),
        Commands::Build {
            steps,
            keep_staging,
        } => commands::build::run(engine, steps.as_deref(), keep_staging, out),
        Commands::Mount => commands::mount::run(engine, out),
        Commands::Umount => commands::umount::run(engine, out),
        Commands::Exec { command } => commands::exec::run(engine, &command),
        Commands::Status => commands::status::run(engine, out),
        Commands::Prereq => commands::prereq::run(engine, out),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn make_engine(directory: Option<PathBuf>, dry_run: bool) -> Result<Engine, CommandError> {
    let cwd = std::env::current_dir()
        .map_err(|e| CommandError::general(format!("cannot determine current directory: {e}")))?;
    let project_dir = match directory {
        Some(d) if d.is_absolute() => d,
        Some(d) => cwd.join(d),
        None => cwd,
    };

    let mounts = MountTable::system();
    let backend = std::env::var(BACKEND_ENV).unwrap_or_else(|_| "host".to_owned());
    let executor = select_executor(&backend, mounts.path(), dry_run)
        .map_err(|e| CommandError::general(e.to_string()))?;
    let installer_override = std::env::var_os(INSTALLER_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    Ok(Engine::new(project_dir, executor, mounts).with_installer_override(installer_override))
}

fn finish(result: Result<u8, CommandError>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {}", e.message);
            ExitCode::from(e.code)
        }
    }
}
