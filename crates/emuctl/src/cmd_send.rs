use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use emu_power::SessionBuilder;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::common::{self, CommandArgs, NotificationRecord};

pub async fn run(
    device: PathBuf,
    name: String,
    args: CommandArgs,
    wait_ms: u64,
    json: bool,
) -> Result<()> {
    // Validate before touching the port.
    let command = common::build_command(&name, &args)?;
    let (reader, writer) = common::open_device(&device).await?;
    let session = SessionBuilder::new(reader, writer)
        .build()
        .context("build session")?;
    let mut notifications = common::forward_notifications(&session);
    session.start().await.context("start read loop")?;
    session
        .issue_command(&command)
        .await
        .with_context(|| format!("send {name}"))?;
    info!(command = %name, wait_ms, "command sent; collecting replies");

    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    let mut replies = Vec::new();
    while let Ok(Some(notification)) =
        tokio::time::timeout_at(deadline, notifications.recv()).await
    {
        if !json {
            println!("#{:04} {}", replies.len() + 1, common::summarize(&notification));
        }
        replies.push(notification);
    }

    if let Err(err) = session.stop().await {
        warn!(error = %err, "read loop ended with an error");
    }
    if json {
        let records: Vec<_> = replies
            .iter()
            .enumerate()
            .map(|(idx, n)| NotificationRecord::new(idx + 1, n))
            .collect();
        common::print_json(&records)?;
    } else if replies.is_empty() {
        println!("no reply within {wait_ms} ms");
    }
    Ok(())
}
