//! Coordinator simulator: accepts TCP connections and streams telemetry
//! lines in the wire formats a real radio coordinator emits, with a
//! configurable share of malformed lines and low-battery devices.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[derive(Debug, Parser, Clone)]
#[command(name = "hive-simulator", about = "Emit coordinator telemetry lines over TCP")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:7654")]
    listen: String,

    /// Milliseconds between lines.
    #[arg(long, env = "INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Number of simulated routers, ids starting at 107.
    #[arg(long, env = "DEVICES", default_value_t = 4)]
    devices: u32,

    /// Share of lines emitted as garbage, 0.0 to 1.0.
    #[arg(long, env = "MALFORMED_SHARE", default_value_t = 0.05)]
    malformed_share: f64,

    /// Share of readings reporting a low battery.
    #[arg(long, env = "LOW_BATTERY_SHARE", default_value_t = 0.02)]
    low_battery_share: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!(
        "Simulator listening on {} ({} devices, one line every {}ms)",
        args.listen, args.devices, args.interval_ms
    );

    let listener = TcpListener::bind(&args.listen)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", args.listen));

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        info!(%peer, "ingestor connected");
        let args = args.clone();
        tokio::spawn(async move {
            if let Err(e) = stream_lines(socket, args).await {
                info!("connection closed: {}", e);
            }
        });
    }
}

async fn stream_lines(mut socket: TcpStream, args: Args) -> std::io::Result<()> {
    let mut rng = StdRng::from_entropy();
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut counter = 0u64;

    loop {
        interval.tick().await;
        let line = next_line(&mut rng, &args, counter);
        socket.write_all(line.as_bytes()).await?;
        socket.write_all(b"\n").await?;
        counter += 1;
        if counter % 100 == 0 {
            info!("emitted {} lines", counter);
        }
    }
}

fn next_line(rng: &mut StdRng, args: &Args, counter: u64) -> String {
    if rng.gen_bool(args.malformed_share.clamp(0.0, 1.0)) {
        return garbage_line(rng);
    }

    let router = 107 + (counter % args.devices.max(1) as u64) as u32;
    let battery = if rng.gen_bool(args.low_battery_share.clamp(0.0, 1.0)) {
        rng.gen_range(1..20)
    } else {
        rng.gen_range(40..100)
    };
    let signal = rng.gen_range(-95..-40);

    match router {
        // bmp280 routers alternate between the compact delimited shape and
        // the verbose key-tagged one, like the firmware in the field does
        107 if rng.gen_bool(0.5) => format!(
            "RID:107; SID:{}; WT: {:.2}",
            1000 + rng.gen_range(0..20),
            rng.gen_range(15.0..38.0)
        ),
        108 => format!(
            "RID:108; SID:{}; CO: {:.2}",
            1000 + rng.gen_range(0..20),
            rng.gen_range(5.0..60.0)
        ),
        109 => format!(
            "RID:109; SID:{}; WG: {:.2}",
            1000 + rng.gen_range(0..20),
            rng.gen_range(20.0..60.0)
        ),
        _ => {
            let temperature = rng.gen_range(15.0..38.0);
            let humidity = rng.gen_range(30.0..80.0);
            let weight = rng.gen_range(20.0..60.0);
            if rng.gen_bool(0.3) {
                let gas = rng.gen_range(0.0..120.0);
                format!(
                    "BT{router}:{temperature:.1},{humidity:.1},{weight:.1},{gas:.1}:{battery}:{signal}"
                )
            } else {
                format!("BT{router}:{temperature:.1},{humidity:.1},{weight:.1}:{battery}:{signal}")
            }
        }
    }
}

fn garbage_line(rng: &mut StdRng) -> String {
    const SAMPLES: [&str; 4] = [
        "coordinator boot ok",
        "BT107:not,numbers,here:85:-60",
        "RID:; SID:",
        "###",
    ];
    SAMPLES[rng.gen_range(0..SAMPLES.len())].to_string()
}
