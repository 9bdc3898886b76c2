//! ForumDB command line
//!
//! Opens the database named by `FORUMDB_PATH` and runs one maintenance
//! command against it.
//!
//! ```bash
//! forumdb status   # row counts, after folding pending forum post counts
//! forumdb flush    # fold pending forum post counts only
//! forumdb clear    # delete all data
//! ```

use forumdb::{ForumConfig, ForumDb};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: forumdb [status|flush|clear]";

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forumdb=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let command = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "status".to_string());
    if matches!(command.as_str(), "-h" | "--help") {
        println!("{USAGE}");
        return;
    }

    if let Err(e) = run(&command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: &str) -> forumdb::Result<()> {
    let config = ForumConfig::from_env()?;
    let db = ForumDb::open_with_config(config).await?;

    let outcome = match command {
        "status" => db.status().await.map(|status| {
            println!("users:   {}", status.user);
            println!("forums:  {}", status.forum);
            println!("threads: {}", status.thread);
            println!("posts:   {}", status.post);
        }),
        "flush" => db.flush_if_dirty().await.map(|flushed| {
            println!("{}", if flushed { "flushed" } else { "nothing pending" });
        }),
        "clear" => db.clear().await.map(|()| println!("cleared")),
        other => Err(forumdb::Error::Config(format!(
            "unknown command '{other}'. {USAGE}"
        ))),
    };

    db.shutdown().await;
    outcome
}
