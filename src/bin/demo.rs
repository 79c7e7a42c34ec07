use clap::Parser;
use nbredis::{Client, Config, ConnState, Descriptor, Outcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port(s); one connection is opened per port
    #[arg(short, long, default_values_t = vec![6379u16])]
    port: Vec<u16>,

    /// Connect timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Print one reply the way the callback receives it
fn print_reply(tag: &str, outcome: Outcome, args: &[bytes::Bytes], private: &[u8]) {
    println!(
        "[{}] outcome:{:?} private:[{}] argc:{}",
        tag,
        outcome,
        String::from_utf8_lossy(private),
        args.len()
    );
    for (i, arg) in args.iter().enumerate() {
        println!("  <{}>{}<{}>", i, String::from_utf8_lossy(arg), arg.len());
    }
}

/// Check every descriptor, kicking failed ones back into a reconnect
///
/// Returns true once all of them are connected.
fn check_connect(client: &mut Client, descriptors: &[Descriptor]) -> bool {
    let mut all_connected = true;
    for &d in descriptors {
        match client.state(d).unwrap_or(ConnState::Failed) {
            ConnState::Connected => {}
            ConnState::Connecting => {
                all_connected = false;
            }
            ConnState::Idle | ConnState::Failed | ConnState::Closed => {
                warn!("{} not connected, trying reconnect", d);
                if let Err(err) = client.reconnect(d) {
                    error!("reconnect of {} failed: {}", d, err);
                }
                all_connected = false;
            }
        }
    }
    all_connected
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("nbredis={}", log_level))
        .init();

    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config {
            log_level: log_level.to_string(),
            ..Default::default()
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        stop_flag.store(true, Ordering::Release);
    })?;

    let mut client = Client::new(config)?;
    let timeout = Duration::from_secs(args.timeout);

    let mut descriptors = Vec::new();
    for port in &args.port {
        match client.open(&args.host, *port, timeout) {
            Ok(d) => {
                info!("opened {} to {}:{}", d, args.host, port);
                descriptors.push(d);
            }
            Err(err) => {
                error!("open {}:{} failed: {}", args.host, port, err);
                for d in descriptors.iter().copied() {
                    let _ = client.close(d);
                }
                return Err(err.into());
            }
        }
    }

    let mut sent = false;
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));

        client.tick()?;

        if !check_connect(&mut client, &descriptors) {
            continue;
        }

        // One-shot command batch once everything is connected
        if !sent {
            let d = descriptors[0];

            client.exec(
                d,
                "PING",
                Some(Box::new(|o, a, p| print_reply("PING", o, a, p))),
                b"PING:",
            )?;
            client.exec(d, "PING", None, &[])?; // no callback
            client.exec(
                d,
                "SET demo 1",
                Some(Box::new(|o, a, p| print_reply("SET", o, a, p))),
                b"SET demo 1",
            )?;
            client.exec(
                d,
                "GET demo",
                Some(Box::new(|o, a, p| print_reply("GET", o, a, p))),
                b"GET demo",
            )?;
            client.exec(
                d,
                "SADD fruit pear banana",
                Some(Box::new(|o, a, p| print_reply("SADD", o, a, p))),
                b"SADD fruit pear banana",
            )?;
            client.exec(
                d,
                "SMEMBERS fruit",
                Some(Box::new(|o, a, p| print_reply("SMEMBERS", o, a, p))),
                b"SMEMBERS fruit",
            )?;
            client.exec(
                d,
                "GET no_such_key",
                Some(Box::new(|o, a, p| print_reply("GET-MISS", o, a, p))),
                b"GET no_such_key",
            )?;
            client.exec(
                d,
                "HGET tank",
                Some(Box::new(|o, a, p| print_reply("HGET-ERR", o, a, p))),
                b"HGET tank",
            )?; // deliberate arity error
            sent = true;
        }
    }

    for d in descriptors {
        if let Err(err) = client.close(d) {
            error!("close {} failed: {}", d, err);
        }
    }
    info!("demo shutdown complete");
    Ok(())
}
