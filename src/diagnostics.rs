//! System diagnostics and dependency checking.
//!
//! Verifies that the selection tool, the synthesis command and an audio output
//! device are available.

use crate::config::Config;
use crate::defaults;
use crate::synth::command::find_in_path;
use crate::sys;

/// Result of a dependency check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Tool is installed and working
    Ok,
    /// Tool is not found
    NotFound,
    /// Tool is found but has issues
    Warning(String),
}

/// Check that an executable is on PATH.
pub fn check_tool(command: &str) -> CheckResult {
    if command.trim().is_empty() {
        return CheckResult::Warning("no command configured".to_string());
    }
    match find_in_path(command) {
        Some(_) => CheckResult::Ok,
        None => CheckResult::NotFound,
    }
}

/// Check that at least one audio output device is present.
#[cfg(feature = "cpal-audio")]
pub fn check_output_devices(preferred: Option<&str>) -> CheckResult {
    match crate::audio::cpal_output::list_output_devices() {
        Ok(devices) if devices.is_empty() => CheckResult::NotFound,
        Ok(devices) => match preferred {
            Some(name) if !devices.iter().any(|d| d.starts_with(name)) => CheckResult::Warning(
                format!("configured device '{name}' not found, the default device will be used"),
            ),
            _ => CheckResult::Ok,
        },
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

fn print_result(label: &str, result: &CheckResult, install_hint: &[&str]) {
    print!("{label}: ");
    match result {
        CheckResult::Ok => println!("✓ OK"),
        CheckResult::NotFound => {
            println!("✗ NOT FOUND");
            for line in install_hint {
                println!("  {line}");
            }
        }
        CheckResult::Warning(msg) => println!("⚠ WARNING: {msg}"),
    }
}

/// Run all dependency checks and print results.
///
/// Returns true when everything needed to speak a selection is present.
pub fn check_dependencies(config: &Config) -> bool {
    println!("Checking system dependencies...\n");

    let selection = check_tool(defaults::SELECTION_TOOL);
    print_result(
        "wl-paste (selection)",
        &selection,
        &[
            "Install: sudo apt install wl-clipboard  (Debian/Ubuntu)",
            "         sudo pacman -S wl-clipboard    (Arch)",
        ],
    );

    let command = &config.synthesis.command;
    let synthesis = check_tool(command);
    print_result(
        &format!("{command} (synthesis)"),
        &synthesis,
        &["Install piper: https://github.com/rhasspy/piper/releases"],
    );

    #[cfg(feature = "cpal-audio")]
    let output = {
        let result = check_output_devices(config.playback.device.as_deref());
        print_result("Audio output", &result, &["No output device found"]);
        result
    };
    #[cfg(not(feature = "cpal-audio"))]
    let output = CheckResult::Warning("built without audio support".to_string());

    println!();
    println!("Compute:");
    let compute = config.synthesis.compute;
    if sys::gpu_available() {
        println!("  NVIDIA driver: ✓ found (compute = {compute})");
    } else {
        println!("  NVIDIA driver: - not found, synthesis runs on the CPU (compute = {compute})");
    }

    println!();
    let ready = selection == CheckResult::Ok
        && synthesis == CheckResult::Ok
        && output != CheckResult::NotFound;
    if ready {
        println!("✓ Ready to speak selections.");
    } else {
        println!("⚠ Some dependencies are missing; see above.");
    }
    ready
}
