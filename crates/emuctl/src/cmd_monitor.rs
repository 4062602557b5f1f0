use std::path::PathBuf;

use anyhow::{Context, Result};
use emu_power::SessionBuilder;
use tracing::{info, warn};

use crate::common::{self, NotificationRecord};

pub async fn run(device: PathBuf, count: usize, json: bool) -> Result<()> {
    let (reader, writer) = common::open_device(&device).await?;
    let session = SessionBuilder::new(reader, writer)
        .build()
        .context("build session")?;
    let mut notifications = common::forward_notifications(&session);
    session.start().await.context("start read loop")?;
    info!(device = %device.display(), "monitoring");

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            next = notifications.recv() => {
                let Some(notification) = next else { break };
                seen += 1;
                if json {
                    common::print_json(&NotificationRecord::new(seen, &notification))?;
                } else {
                    println!("#{seen:04} {}", common::summarize(&notification));
                }
                if count > 0 && seen >= count {
                    break;
                }
            }
        }
    }

    if let Err(err) = session.stop().await {
        warn!(error = %err, "read loop ended with an error");
    }
    let stats = session.stats().snapshot();
    info!(
        lines = stats.lines,
        notifications = stats.dispatched,
        failures = stats.failures,
        "monitor finished"
    );
    Ok(())
}
