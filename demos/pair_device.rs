//! Basic example: Pair with the first nearby Q device
//!
//! Run with: cargo run --example pair_device

use qpair_ble::{ConnectionState, PairingManager, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qpair_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Starting Q device discovery...");
    println!("Make sure the device is switched on and advertising!\n");

    let manager = PairingManager::new().await?;

    // Print every state change
    let _handle = manager.on_state_changed(|snapshot| {
        println!(
            "[{}] adapter={} scanning={} devices={}",
            snapshot.connection_state,
            snapshot.adapter_state,
            snapshot.is_scanning,
            snapshot.devices.len()
        );
        if let Some(name) = &snapshot.connected_name {
            println!("  Connected to: {}", name);
        }
    });

    let mut updates = manager.subscribe();

    println!("Waiting up to 30 seconds for a device...");
    println!("Press Ctrl+C to exit early.\n");

    let wait_for_device = async {
        loop {
            if let Some(device) = manager.devices().into_iter().next() {
                return Some(device);
            }
            if manager.is_connected() {
                return None;
            }
            if updates.recv().await.is_err() {
                return None;
            }
        }
    };

    let device = tokio::select! {
        device = wait_for_device => device,
        _ = tokio::time::sleep(Duration::from_secs(30)) => None,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
            manager.shutdown().await?;
            return Ok(());
        }
    };

    if let Some(device) = device {
        println!(
            "\nConnecting to {} (RSSI: {:?} dBm)",
            device.name.as_deref().unwrap_or("Unknown"),
            device.rssi
        );
        manager.connect(device.id).await?;
    } else if !manager.is_connected() {
        println!("\nNo Q device found.");
        manager.shutdown().await?;
        return Ok(());
    }

    println!("Accept the pairing request on this system when prompted.\n");

    let mut updates = manager.subscribe();
    let wait_for_pairing = async {
        while let Ok(snapshot) = updates.recv().await {
            if snapshot.connection_state == ConnectionState::Ready {
                return true;
            }
        }
        false
    };

    tokio::select! {
        paired = wait_for_pairing => {
            if paired {
                println!("\n--- Paired with {} ---", manager.connected_name().unwrap_or_default());
            }
        }
        _ = tokio::time::sleep(Duration::from_secs(60)) => {
            println!("\nPairing did not complete within 60 seconds.");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
        }
    }

    manager.shutdown().await?;
    println!("\nDone!");

    Ok(())
}
