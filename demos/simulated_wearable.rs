//! Simulated wearable: run the full peripheral on the in-memory driver
//!
//! Demonstrates:
//! - Advertising and a central subscribing through the CCCD
//! - Heart-rate notifications
//! - Auto-pause when the watch is taken off and resume when it is put back
//!
//! Run with: cargo run --example simulated_wearable

use hr_peripheral::{
    AccelerometerReading, ControllerUpdate, DeviceIdentifier, HeartRateReading, HeartRateService,
    LoopbackDriver, ManualSensorHub, OffBodyReading, Result, SensorEvent, ServiceConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,hr_peripheral=info")
        .init();

    println!("Simulated Wearable");
    println!("==================\n");

    let driver = Arc::new(LoopbackDriver::new());
    let sensors = Arc::new(ManualSensorHub::new(true));
    let service = Arc::new(HeartRateService::new(
        driver.clone(),
        sensors,
        ServiceConfig::ephemeral(),
    )?);

    let _updates = service.controller().on_update(|update| match update {
        ControllerUpdate::StateChanged(status) => {
            println!("[status] {} since {}", status.text, status.since.format("%H:%M:%S"));
        }
        ControllerUpdate::HeartRate { bpm, kcal } => {
            println!("[sample] {:3} bpm, {:.2} kcal", bpm, kcal);
        }
    });

    if !service.start().await {
        println!("Advertising failed to start");
        return Ok(());
    }

    // A phone connects and enables notifications.
    let phone = DeviceIdentifier::parse("5C:F3:70:12:34:56").ok_or_else(|| {
        hr_peripheral::Error::InvalidParameter {
            name: "address".to_string(),
            value: "5C:F3:70:12:34:56".to_string(),
        }
    })?;
    driver.connect(&phone);
    driver.enable_notifications(&phone);
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("Subscriber: {:?}\n", service.engine().subscriber());

    let (tx, rx) = tokio::sync::mpsc::channel(32);
    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.run(rx).await })
    };

    println!("Streaming for 10 seconds (Ctrl+C to stop)...\n");

    let started = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            _ = interval.tick() => {
                let elapsed = started.elapsed().as_secs();
                if elapsed >= 10 {
                    break;
                }
                let now = Instant::now();

                // Off the wrist between seconds 4 and 6.
                match elapsed {
                    4 => {
                        let _ = tx.send(SensorEvent::OffBody(OffBodyReading { on_body: false, timestamp: now })).await;
                    }
                    6 => {
                        let _ = tx.send(SensorEvent::OffBody(OffBodyReading { on_body: true, timestamp: now })).await;
                        // Re-enable after the server was reopened.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        driver.enable_notifications(&phone);
                    }
                    _ => {}
                }

                let _ = tx
                    .send(SensorEvent::Accelerometer(AccelerometerReading {
                        x: 0.3 * (elapsed % 3) as f32,
                        y: 0.0,
                        z: 9.81,
                        timestamp: now,
                    }))
                    .await;
                let _ = tx
                    .send(SensorEvent::HeartRate(HeartRateReading {
                        bpm: 70.0 + (elapsed * 3 % 11) as f32,
                        timestamp: now,
                    }))
                    .await;
            }
        }
    }

    drop(tx);
    let _ = runner.await;

    println!("\nNotifications delivered: {}", driver.notifications().len());
    println!("Known devices: {:?}", service.known_devices());

    service.shutdown().await;
    Ok(())
}
