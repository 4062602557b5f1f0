//! Echo every notification except demand readings, and ask the device for its
//! reporting schedule once it has had time to wake up.
//!
//! `cargo run --example non_blocking_usage -- /dev/ttyACM0`

use std::env;
use std::error::Error;
use std::time::Duration;

use emu_power::{Command, NotificationKind, SessionBuilder, Target};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let path = env::args().nth(1).unwrap_or_else(|| "/dev/ttyACM0".to_string());
    let reader = tokio::fs::File::open(&path).await?;
    let writer = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
    let session = SessionBuilder::new(reader, writer).build()?;

    session.callback(Target::Global, |notification| {
        if notification.kind() != NotificationKind::InstantaneousDemand {
            println!("{notification}");
        }
    });
    session.on_failure(|failure| eprintln!("{failure}"));
    session.start().await?;

    // The EMU can take a few seconds before it answers commands.
    tokio::time::sleep(Duration::from_secs(5)).await;

    println!("issuing get_schedule");
    session.issue_command(&Command::get_schedule_for(None)).await?;

    tokio::signal::ctrl_c().await?;
    session.stop().await?;
    let stats = session.stats().snapshot();
    println!(
        "{} notifications, {} decode failures",
        stats.dispatched, stats.failures
    );
    Ok(())
}
