//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `fusenotes_core` linkage.
//! - Generate and validate private key strings for manual setup.
//!
//! # Usage
//! - `fusenotes_cli [--log-dir <dir>] [--log-level <level>] [command]`
//! - `version` (default) prints ping and version.
//! - `gen-key` prints a fresh private key string.
//! - `check-key <key>` reports whether a key string is valid.

use fusenotes_core::{init_logging, LogLevel, LoggingConfig};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str =
    "usage: fusenotes_cli [--log-dir <dir>] [--log-level <level>] [version|gen-key|check-key <key>]";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Version,
    GenKey,
    CheckKey(String),
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    logging: Option<LoggingConfig>,
    command: Command,
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    if let Some(config) = args.logging.as_ref() {
        if let Err(err) = init_logging(config) {
            eprintln!("logging disabled: {err}");
        }
    }
    run(args.command)
}

fn run(command: Command) -> ExitCode {
    match command {
        Command::Version => {
            info!("event=cli_command module=cli status=ok command=version");
            println!("fusenotes_core ping={}", fusenotes_core::ping());
            println!("fusenotes_core version={}", fusenotes_core::core_version());
            ExitCode::SUCCESS
        }
        Command::GenKey => {
            info!("event=cli_command module=cli status=ok command=gen-key");
            println!("{}", fusenotes_core::generate_private_key());
            ExitCode::SUCCESS
        }
        Command::CheckKey(key) => {
            let valid = fusenotes_core::check_key_valid(&key);
            info!(
                "event=cli_command module=cli status=ok command=check-key valid={}",
                valid
            );
            if valid {
                println!("key=valid");
                ExitCode::SUCCESS
            } else {
                println!("key=invalid");
                ExitCode::FAILURE
            }
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut log_dir: Option<PathBuf> = None;
    let mut log_level: Option<LogLevel> = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-dir" => {
                let value = args.next().ok_or("--log-dir needs a value")?;
                log_dir = Some(absolute(PathBuf::from(value))?);
            }
            "--log-level" => {
                let value = args.next().ok_or("--log-level needs a value")?;
                log_level = Some(value.parse::<LogLevel>().map_err(|err| err.to_string())?);
            }
            _ => positional.push(arg),
        }
    }

    let logging = match (log_dir, log_level) {
        (Some(dir), level) => Some(LoggingConfig::new(dir, level.unwrap_or_default())),
        (None, Some(_)) => return Err("--log-level requires --log-dir".to_string()),
        (None, None) => None,
    };

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("version") => Command::Version,
        Some("gen-key") => Command::GenKey,
        Some("check-key") => {
            Command::CheckKey(positional.next().ok_or("check-key needs a key argument")?)
        }
        Some(other) => return Err(format!("unknown command `{other}`")),
    };

    Ok(CliArgs { logging, command })
}

fn absolute(path: PathBuf) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path);
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| format!("cannot resolve log directory: {err}"))
}

#[cfg(test)]
mod tests {
    use super::{parse_args, CliArgs, Command};
    use fusenotes_core::{LogLevel, LoggingConfig};

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        parse_args(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn no_arguments_print_the_version_without_logging() {
        assert_eq!(
            parse(&[]).unwrap(),
            CliArgs {
                logging: None,
                command: Command::Version,
            }
        );
    }

    #[test]
    fn log_flags_build_a_logging_config() {
        let args = parse(&[
            "--log-dir",
            "/tmp/fusenotes",
            "--log-level",
            "warn",
            "gen-key",
        ])
        .unwrap();
        assert_eq!(
            args.logging,
            Some(LoggingConfig::new("/tmp/fusenotes", LogLevel::Warn))
        );
        assert_eq!(args.command, Command::GenKey);
    }

    #[test]
    fn relative_log_dir_is_resolved_against_the_working_directory() {
        let args = parse(&["--log-dir", "logs"]).unwrap();
        let dir = args.logging.unwrap().dir;
        assert!(dir.is_absolute());
        assert!(dir.ends_with("logs"));
    }

    #[test]
    fn malformed_invocations_are_rejected() {
        assert!(parse(&["--log-level", "info"]).is_err());
        assert!(parse(&["--log-dir", "/tmp/x", "--log-level", "loud"]).is_err());
        assert!(parse(&["check-key"]).is_err());
        assert!(parse(&["frobnicate"]).is_err());
        assert_eq!(
            parse(&["check-key", "abc"]).unwrap().command,
            Command::CheckKey("abc".to_string())
        );
    }
}
