//! tessera-worker - remote execution agent.
//!
//! Launched by the engine it talks over stdin/stdout; with `--connect` it
//! dials an engine listening on TCP instead. Logs go to stderr.

use clap::Parser;
use tessera_core::ipc::agent;

#[derive(Parser)]
#[command(name = "tessera-worker")]
#[command(about = "Execute tessera snippets on behalf of an engine")]
#[command(version)]
struct Cli {
    /// Connect to an engine listening at host:port instead of using stdio
    #[arg(long, value_name = "ADDR")]
    connect: Option<String>,

    /// Session token presented in the hello message
    #[arg(long, default_value = "")]
    token: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
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

    ignore_interrupts();

    let result = match &cli.connect {
        Some(addr) => agent::connect(addr, &cli.token),
        None => agent::serve(
            Box::new(std::io::stdin()),
            Box::new(std::io::stdout()),
            &cli.token,
        ),
    };
    result.map_err(|e| anyhow::anyhow!("{}", e.with_hint()))
}

/// Ctrl-C in the shell's terminal reaches the worker too; stopping is the
/// engine's job.
#[cfg(unix)]
fn ignore_interrupts() {
    // SAFETY: installing SIG_IGN has no handler code to run.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_interrupts() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_flag() {
        let cli = Cli::parse_from(["tessera-worker", "--connect", "127.0.0.1:4000", "--token", "t"]);
        assert_eq!(cli.connect.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(cli.token, "t");
        assert!(!cli.verbose);
    }
}
