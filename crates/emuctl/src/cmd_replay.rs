use std::path::PathBuf;

use anyhow::{Context, Result};
use emu_power::{SessionBuilder, StatsSnapshot};
use serde::Serialize;
use tracing::info;

use crate::common::{self, NotificationRecord};

#[derive(Serialize)]
struct ReplayReport<'a> {
    notifications: Vec<NotificationRecord<'a>>,
    stats: StatsSnapshot,
}

pub async fn run(file: PathBuf, lf: bool, json: bool) -> Result<()> {
    let capture = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("open capture {}", file.display()))?;
    let terminator: &[u8] = if lf { b"\n" } else { b"\r\n" };
    let session = SessionBuilder::new(capture, tokio::io::sink())
        .line_terminator(terminator)
        .exit_on_eof(true)
        .build()
        .context("build session")?;
    let mut rx = common::forward_notifications(&session);
    session.on_failure(|failure| eprintln!("skipped: {failure}"));

    session.start().await.context("start replay")?;
    session
        .wait()
        .await
        .with_context(|| format!("replay {}", file.display()))?;

    let mut notifications = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        notifications.push(notification);
    }
    let stats = session.stats().snapshot();
    info!(file = %file.display(), notifications = notifications.len(), "replay finished");

    if json {
        let report = ReplayReport {
            notifications: notifications
                .iter()
                .enumerate()
                .map(|(idx, n)| NotificationRecord::new(idx + 1, n))
                .collect(),
            stats,
        };
        common::print_json(&report)?;
    } else {
        for (idx, notification) in notifications.iter().enumerate() {
            println!("#{:04} {}", idx + 1, common::summarize(notification));
        }
        println!(
            "lines={} malformed={} fragments={} notifications={} failures={}",
            stats.lines, stats.malformed_lines, stats.fragments, stats.dispatched, stats.failures
        );
    }
    Ok(())
}
