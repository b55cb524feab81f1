use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solarman_v5::{
    MetricsHooks, ReconnectStrategy, Result, SolarmanClient, SolarmanConfig,
};

/// Minimal metrics sink that counts request outcomes
#[derive(Default)]
struct DemoMetrics {
    ok: AtomicU64,
    err: AtomicU64,
    retries: AtomicU64,
}

impl MetricsHooks for DemoMetrics {
    fn request_ok(&self, _function: u8, _duration: Duration) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }
    fn request_err(&self, _function: u8, _error: &'static str) {
        self.err.fetch_add(1, Ordering::Relaxed);
    }
    fn retry(&self, _function: u8) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; RUST_LOG=debug shows frame-level hex dumps
    tracing_subscriber::fmt::init();

    println!("=== Solarman V5 Inverter Read Demo ===");

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.50".to_string());
    let serial: u32 = std::env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(2712345678);

    let config = SolarmanConfig::new(&host, serial)
        .with_timeout(Duration::from_secs(10))
        .with_retries(2)
        .with_reconnect(ReconnectStrategy::ExponentialBackoff {
            initial_ms: 500,
            max_ms: 8000,
        })
        .with_error_correction(true);

    let metrics = Arc::new(DemoMetrics::default());
    let client = SolarmanClient::with_metrics(config, metrics.clone());

    println!("Connecting to {}:8899 (logger serial {})", host, serial);
    match client.connect().await {
        Ok(()) => println!("Connected"),
        Err(e) => {
            println!("Failed to connect: {}", e);
            println!("This is expected if no data-logging stick is reachable at {}", host);
            return Ok(());
        }
    }

    // Typical Deye/Sunsynk-style register map: device state and ratings
    // live in the low holding registers
    println!("\n=== Reading holding registers 0x0000..0x0010 ===");
    match client.read_holding_registers(0x0000, 16).await {
        Ok(registers) => {
            for (i, value) in registers.iter().enumerate() {
                println!("  reg {:#06X} = {:#06X} ({})", i, value, value);
            }
        }
        Err(e) => println!("Read failed: {}", e),
    }

    println!("\n=== Reading input registers 0x0056..0x0058 (AC output) ===");
    match client.read_input_registers(0x0056, 2).await {
        Ok(registers) => println!("  values: {:?}", registers),
        Err(e) => println!("Read failed: {}", e),
    }

    // Raw passthrough for anything the typed API does not cover
    println!("\n=== Raw RTU passthrough (FC03, addr 0, qty 1) ===");
    match client.send_raw_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]).await {
        Ok(frame) => println!("  response frame: {:02X?}", frame),
        Err(e) => println!("Raw request failed: {}", e),
    }

    client.close().await?;

    println!("\n=== Demo complete ===");
    println!(
        "requests ok={} err={} retries={}",
        metrics.ok.load(Ordering::Relaxed),
        metrics.err.load(Ordering::Relaxed),
        metrics.retries.load(Ordering::Relaxed)
    );

    Ok(())
}
