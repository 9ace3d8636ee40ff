//! # FPGA Device Monitor
//!
//! Connects to an FPGA device server, lists the attached devices and then prints every
//! device and register event the server reports until the connection ends.
use std::error::Error;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use fpga_client::{
    Builder, Client, DEFAULT_PORT, Notification, TcpTransport, Transport,
    faout::{ADDR_REGS, Faout, FaoutRegisters, REG_STATUS},
};

#[derive(Parser)]
#[command(
    about = "Lists the devices of an FPGA device server and follows their events",
    long_about = None
)]
struct Args {
    #[arg(default_value = "localhost")]
    host: String,

    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Read timeout in milliseconds", default_value = "5000")]
    timeout_ms: u64,

    #[arg(long, help = "Read the status register of every FAOUT board on startup")]
    status: bool,
}

fn print_devices(client: &mut Client<TcpTransport>, status: bool) {
    let serials: Vec<String> = client.devices().into_iter().map(str::to_owned).collect();
    if serials.is_empty() {
        println!("No devices attached");
    }
    for serial in serials {
        let kind = client
            .device(&serial)
            .and_then(|device| device.capability_name())
            .unwrap_or("generic")
            .to_owned();
        println!("{} [{}]", serial, kind);

        if status && client.device(&serial).and_then(|d| d.capability::<Faout>()).is_some() {
            let result = client
                .device_mut(&serial)
                .and_then(|mut device| device.device_status());
            match result {
                Ok(status) => println!("    {}", status),
                Err(e) => log::warn!("Reading status of {} failed: {}", serial, e),
            }
        }
    }
}

/// One line per notification, followed by the decoded status on FAOUT status changes.
fn describe<T: Transport>(client: &Client<T>, notification: &Notification) -> String {
    let mut line = notification.to_string();
    if let Notification::RegisterChanged {
        serial, addr, port, ..
    } = notification
        && (*addr, *port) == (ADDR_REGS, REG_STATUS)
        && let Some(status) = client
            .device(serial)
            .and_then(|device| device.capability::<Faout>())
            .and_then(Faout::last_status)
    {
        line.push_str(&format!("\n    {}", status));
    }
    line
}

/// Describes the notifications queued so far, without reading from the server.
fn queued_events<T: Transport>(client: &mut Client<T>) -> Vec<String> {
    let notifications = client.take_notifications();
    notifications
        .iter()
        .map(|notification| describe(client, notification))
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: host={}, port={}, timeout_ms={}",
        args.host,
        args.port,
        args.timeout_ms
    );

    Faout::register();

    let mut client = Builder::new()
        .read_timeout(Duration::from_millis(args.timeout_ms))
        .connect((args.host.as_str(), args.port))?;
    // The devices reported on connect are listed by print_devices.
    client.take_notifications();
    print_devices(&mut client, args.status);

    // Events that arrived while the devices were listed.
    for line in queued_events(&mut client) {
        println!("{}", line);
    }
    loop {
        for notification in client.poll_events()? {
            println!("{}", describe(&client, &notification));
        }
    }
}
