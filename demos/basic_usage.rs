//! Print every instantaneous demand reading until interrupted.
//!
//! `cargo run --example basic_usage -- /dev/ttyACM0`, or `-- --mock` to read
//! from a simulated device.

use std::env;
use std::error::Error;
use std::time::Duration;

use emu_power::types::Body;
use emu_power::{NotificationKind, Session, SessionBuilder};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let arg = env::args().nth(1).unwrap_or_else(|| "/dev/ttyACM0".to_string());
    if arg == "--mock" {
        let (client, device) = tokio::io::duplex(4096);
        tokio::spawn(simulate_device(device));
        let session = SessionBuilder::from_stream(client).build()?;
        run(session).await
    } else {
        let reader = tokio::fs::File::open(&arg).await?;
        let writer = tokio::fs::OpenOptions::new().write(true).open(&arg).await?;
        let session = SessionBuilder::new(reader, writer).build()?;
        run(session).await
    }
}

async fn run<R, W>(session: Session<R, W>) -> Result<(), Box<dyn Error>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    session.callback(NotificationKind::InstantaneousDemand, |notification| {
        let Body::InstantaneousDemand(reading) = &notification.body else {
            return;
        };
        match (reading.demand, notification.timestamp) {
            (Some(kw), Some(ts)) => println!("demand was {kw:.3} kW at unix time {ts}"),
            (Some(kw), None) => println!("demand was {kw:.3} kW"),
            (None, _) => println!("unknown demand"),
        }
    });

    session.start().await?;
    tokio::signal::ctrl_c().await?;
    session.stop().await?;
    Ok(())
}

async fn simulate_device(mut port: tokio::io::DuplexStream) -> std::io::Result<()> {
    let mut demand = 0x0400u32;
    loop {
        let fragment = format!(
            "<InstantaneousDemand>\r\n\
             <DeviceMacId>0xd8d5b90000001234</DeviceMacId>\r\n\
             <MeterMacId>0x00135003000abcde</MeterMacId>\r\n\
             <TimeStamp>0x{:08x}</TimeStamp>\r\n\
             <Demand>0x{demand:06x}</Demand>\r\n\
             <Multiplier>0x00000001</Multiplier>\r\n\
             <Divisor>0x000003e8</Divisor>\r\n\
             <DigitsRight>0x03</DigitsRight>\r\n\
             <DigitsLeft>0x0f</DigitsLeft>\r\n\
             <SuppressLeadingZero>Y</SuppressLeadingZero>\r\n\
             </InstantaneousDemand>\r\n",
            0x2a00_0000u32 + demand
        );
        port.write_all(fragment.as_bytes()).await?;
        demand = (demand * 3 / 2) % 0x4000 + 0x100;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
