use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use selspeak::app::{
    EXIT_FAILURE, EXIT_OK, Overrides, SpeakOptions, TextSource, run_speak, run_status, run_stop,
    run_test_tone,
};
use selspeak::audio::cpal_output::list_output_devices;
use selspeak::cli::{Cli, Commands, ConfigAction};
use selspeak::config::Config;
use selspeak::diagnostics::check_dependencies;
use selspeak::lock::InstanceLock;
use selspeak::selection::SelectionSource;
use std::path::Path;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // Exit codes matter to hotkey daemons, so errors are mapped here rather
    // than by returning from main.
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("Error: {e:#}").red());
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match cli.command {
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "selspeak", &mut std::io::stdout());
            return Ok(EXIT_OK);
        }
        Some(Commands::Config {
            action: ConfigAction::Path,
        }) => {
            println!("{}", config_path.display());
            return Ok(EXIT_OK);
        }
        Some(Commands::Config {
            action: ConfigAction::Init { force },
        }) => {
            init_config(&config_path, force)?;
            return Ok(EXIT_OK);
        }
        _ => {}
    }

    let config = load_config(cli.config.as_deref())?;
    // Keep the guard alive until the command finishes so the log file is flushed.
    let _log_guard = selspeak::logging::init(cli.verbose, cli.quiet, &config.logging);
    tracing::debug!("selspeak {}", selspeak::version_string());

    let mut config = config.with_env_overrides();
    Overrides {
        voice: cli.voice,
        speed: cli.speed,
        device: cli.device,
        compute: cli.compute,
    }
    .apply(&mut config);
    config.validate()?;

    let lock_path = InstanceLock::default_path();

    let code = match cli.command {
        None => {
            let source = TextSource::Selection(config.selection.source);
            run_speak(
                config,
                SpeakOptions {
                    source,
                    toggle: cli.toggle,
                    quiet: cli.quiet,
                    verbosity: cli.verbose,
                    lock_path,
                },
            )
            .await?
        }
        Some(Commands::Speak {
            text,
            stdin,
            clipboard,
        }) => {
            let source = match (text, stdin, clipboard) {
                (Some(text), _, _) => TextSource::Argument(text),
                (None, true, _) => TextSource::Stdin,
                (None, false, true) => TextSource::Selection(SelectionSource::Clipboard),
                (None, false, false) => TextSource::Selection(config.selection.source),
            };
            run_speak(
                config,
                SpeakOptions {
                    source,
                    toggle: cli.toggle,
                    quiet: cli.quiet,
                    verbosity: cli.verbose,
                    lock_path,
                },
            )
            .await?
        }
        Some(Commands::Stop { grace }) => run_stop(&lock_path, grace, cli.quiet)?,
        Some(Commands::Status) => run_status(&lock_path),
        Some(Commands::Devices) => list_audio_devices()?,
        Some(Commands::TestTone { chunks }) => {
            run_test_tone(config, chunks, cli.quiet, cli.verbose).await?
        }
        Some(Commands::Check) => {
            if check_dependencies(&config) {
                EXIT_OK
            } else {
                EXIT_FAILURE
            }
        }
        Some(Commands::Config {
            action: ConfigAction::Show,
        }) => {
            print!("{}", config.to_toml_string()?);
            EXIT_OK
        }
        Some(Commands::Config { .. }) | Some(Commands::Completions { .. }) => EXIT_OK,
    };

    Ok(code)
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/selspeak/config.toml)
/// 3. Built-in defaults
///
/// Environment and flag overrides are applied by the caller.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    Ok(config)
}

/// Write the default configuration file.
fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            path.display().yellow()
        );
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, Config::default().to_toml_string()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}

/// List available audio output devices.
fn list_audio_devices() -> Result<i32> {
    let devices = list_output_devices()?;

    if devices.is_empty() {
        eprintln!("No audio output devices found");
        return Ok(EXIT_FAILURE);
    }

    println!("Available audio output devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(EXIT_OK)
}
