//! Validation client: connect to a Heart Rate Service peripheral and print
//! its measurements
//!
//! Run with: cargo run --example heart_rate_monitor
//!
//! Scans for 10 seconds and connects to the strongest 0x180D advertiser.

use hr_peripheral::ble::client::{default_adapter, HeartRateClient};
use hr_peripheral::protocol::SensorContact;
use hr_peripheral::Result;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,hr_peripheral=info")
        .init();

    println!("Heart Rate Monitor");
    println!("==================\n");
    println!("Scanning for heart rate sensors...\n");

    let adapter = default_adapter().await?;
    let client = HeartRateClient::find_nearest(&adapter, Duration::from_secs(10)).await?;

    client.connect().await?;

    match client.read_body_sensor_location().await {
        Ok(location) => println!("Body sensor location: {}", location),
        Err(e) => println!("Body sensor location unavailable: {}", e),
    }

    let mut measurements = client.measurements();
    client.subscribe().await?;
    println!("Subscribed. Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            received = measurements.recv() => {
                let Ok(measurement) = received else {
                    println!("Measurement stream closed");
                    break;
                };

                let contact = match measurement.sensor_contact {
                    SensorContact::Detected => " (contact)",
                    SensorContact::NotDetected => " (no contact)",
                    SensorContact::NotSupported => "",
                };
                print!("{:3} bpm{}", measurement.bpm, contact);
                if let Some(energy) = measurement.energy_expended {
                    print!("  {} kJ", energy);
                }
                let rr = measurement.rr_intervals_ms();
                if !rr.is_empty() {
                    print!("  RR {:?} ms", rr);
                }
                println!();
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
