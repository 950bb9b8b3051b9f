//! Basic download example
//!
//! Downloads one URL through the configured provider and prints every state
//! transition. Pass `--ranged` to use the pausable `http-ranged` provider.
//!
//! ```bash
//! RUST_LOG=taskfetch=debug cargo run --example basic_download -- https://example.com/file.bin
//! ```

use taskfetch::{Config, DownloadConfig, DownloadManager, TaskParams, TaskState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut url = None;
    let mut provider = "http".to_string();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--ranged" => provider = "http-ranged".to_string(),
            _ => url = Some(arg),
        }
    }
    let Some(url) = url else {
        eprintln!("usage: basic_download [--ranged] <url>");
        std::process::exit(2);
    };

    let config = Config {
        download: DownloadConfig {
            provider,
            cache_dir: "downloads".into(),
            ..Default::default()
        },
    };
    let manager = DownloadManager::new(config)?;

    // Subscribe to events
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event.update.state {
                TaskState::Downloading(progress) => {
                    println!(
                        "⬇ {}: {:.1}% @ {:.2} MB/s",
                        event.id,
                        progress.percent(),
                        progress.speed_bps as f64 / 1_048_576.0
                    );
                }
                TaskState::Error(message) => println!("✗ {}: {}", event.id, message),
                state => println!(
                    "• {}: {} (allowed: {:?})",
                    event.id,
                    state.kind(),
                    event.update.allowed_commands
                ),
            }
        }
    });

    let task = manager.create_task(TaskParams {
        url,
        file_name: String::new(),
        total_size: 0,
        integrity: None,
    });
    task.start().await?;

    if let Some(meta) = task.meta() {
        println!("✓ saved to {}", meta.target_path().display());
    }
    Ok(())
}
