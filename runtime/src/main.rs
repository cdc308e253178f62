//! `outboxctl` - maintenance tool for a device's offline queues.
//!
//! ```text
//! outboxctl status
//! outboxctl prune <max-age-secs> <limit-bytes>
//! ```

use outbox_runtime::{Config, OfflineEngine};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: outboxctl status | outboxctl prune <max-age-secs> <limit-bytes>";

enum Command {
    Status,
    Prune { max_age_secs: u64, limit_bytes: u64 },
}

fn parse_args(args: &[String]) -> Option<Command> {
    match args {
        [cmd] if cmd == "status" => Some(Command::Status),
        [cmd, max_age, limit] if cmd == "prune" => Some(Command::Prune {
            max_age_secs: max_age.parse().ok()?,
            limit_bytes: limit.parse().ok()?,
        }),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outbox_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    };

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let engine = OfflineEngine::open(config).await?;

    match command {
        Command::Status => {
            println!("node {} ({:?} store)", engine.node_id(), engine.backend_kind());
            for queue in engine.queues() {
                println!("{:<12} {}", queue.domain().to_string(), queue.pending_count().await?);
            }
        }
        Command::Prune {
            max_age_secs,
            limit_bytes,
        } => {
            let expired = engine
                .enforcer()
                .apply_retention(max_age_secs.saturating_mul(1000))
                .await?;
            let evicted = engine.enforcer().enforce_cache_budget(limit_bytes).await?;
            println!("expired {expired}, evicted {evicted}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert!(matches!(parse_args(&args(&["status"])), Some(Command::Status)));
        assert!(matches!(
            parse_args(&args(&["prune", "60", "1024"])),
            Some(Command::Prune {
                max_age_secs: 60,
                limit_bytes: 1024
            })
        ));
        assert!(parse_args(&args(&["prune", "soon", "1024"])).is_none());
        assert!(parse_args(&args(&[])).is_none());
    }
}
