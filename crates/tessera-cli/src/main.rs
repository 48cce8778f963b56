//! tessera - interactive shell for incremental snippet evaluation.

mod completion;
mod feedback;
mod interrupt;
mod shell;

use std::path::PathBuf;

use clap::Parser;
use tessera_core::{EngineConfig, Feedback};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Evaluate Java-flavoured snippets one at a time")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Execution control spec, e.g. `remote(launch=true),direct`
    #[arg(long)]
    execution: Option<String>,

    /// Feedback mode: normal, concise or silent
    #[arg(long)]
    feedback: Option<Feedback>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Default config location, used when `--config` is not given.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("tessera").join("config.json"))
        .filter(|path| path.is_file())
}

fn load_config(cli: &Cli) -> tessera_core::Result<EngineConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(execution) = &cli.execution {
        config.execution = execution.clone();
    }
    if let Some(feedback) = cli.feedback {
        config.feedback = feedback;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format_error = |err: tessera_core::Error| anyhow::anyhow!("{}", err.with_hint());

    let config = load_config(&cli).map_err(format_error)?;
    let mut shell = shell::Shell::start(config).map_err(format_error)?;
    shell.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"execution": "remote", "feedback": "silent", "launch_timeout_ms": 100}"#,
        )
        .unwrap();
        let cli = Cli::parse_from([
            "tessera",
            "--config",
            file.path().to_str().unwrap(),
            "--execution",
            "direct",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.execution, "direct");
        assert_eq!(config.feedback, Feedback::Silent);
        assert_eq!(config.launch_timeout_ms, 100);
    }

    #[test]
    fn test_bad_feedback_flag_rejected() {
        assert!(Cli::try_parse_from(["tessera", "--feedback", "loud"]).is_err());
    }
}
