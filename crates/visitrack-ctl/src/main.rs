//! visitrack-ctl — command-line interface for the visitrackd admin API.

use anyhow::{Context, Result};

mod cmd;

use cmd::sessions::{cmd_session_drop, cmd_session_inspect, cmd_sessions};
use cmd::status::cmd_status;

const DEFAULT_PORT: u16 = 8801;

fn print_usage() {
    println!("Usage: visitrack-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                  Show instance status, session counts, and limits");
    println!("  sessions                List active sessions across all instances");
    println!("  sessions inspect <id>   Show one session in full");
    println!("  sessions drop <id>      Remove a session and notify viewers");
    println!();
    println!("Options:");
    println!("  --port <port>   Admin API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(port).await,
        ["sessions"] => cmd_sessions(port).await,
        ["sessions", "inspect", id] => cmd_session_inspect(port, id).await,
        ["sessions", "drop", id] => cmd_session_drop(port, id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
