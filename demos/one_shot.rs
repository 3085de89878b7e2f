//! Run a single rotation cycle against one BlockClock and print every event.
//!
//! Run with:
//! ```sh
//! BLOCKCLOCK_ADDRESS=192.168.0.177 cargo run --example one_shot
//! ```

use blockclock_rotate::{Device, HttpDeviceClient, RotationConfig, Scheduler};

#[tokio::main]
async fn main() -> Result<(), blockclock_rotate::Error> {
    tracing_subscriber::fmt().with_target(false).init();

    let address = std::env::var("BLOCKCLOCK_ADDRESS").unwrap_or_else(|_| "192.168.0.177".into());
    let config = RotationConfig {
        texts: vec!["_HODL_".into(), "SATOSHI".into()],
        devices: vec![Device::new("BlockClock", address)],
        ..RotationConfig::default()
    };

    let mut scheduler = Scheduler::new(config, HttpDeviceClient::new())?;
    let mut events = scheduler.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("{:>24?} | {}", event.phase, event.message);
        }
    });

    // Two boundary checks: the initial sync and one full cycle.
    let mut boundaries = 0;
    let report = scheduler
        .run(|| {
            boundaries += 1;
            boundaries <= 2
        })
        .await?;

    println!("Finished {} cycle(s)", report.cycles_completed);
    Ok(())
}
