//! Probe heat pump registers.
//!
//! ```text
//! thermia-registers                          # dump known registers
//! thermia-registers --address 22             # read input + holding register 22
//! thermia-registers --write --address 22 --value 4400
//! ```
//!
//! Addresses are 0-based protocol addresses, same as the daemon.
//! The endpoint comes from `--endpoint HOST:PORT` or `HEATPUMP_HOST`/`HEATPUMP_PORT`.

use log::{error, info};
use std::time::Duration;
use thermia_tibber::config::{DEFAULT_HEATPUMP_PORT, DEFAULT_HEATPUMP_UNIT_ID, DEFAULT_REGISTER_TIMEOUT_SECS};
use thermia_tibber::registers::{self, ModbusTcpClient, RegisterClient, RegisterError, RegisterKind, address};
use tokio_modbus::Address;

#[derive(Debug, Default)]
struct Args {
    endpoint: Option<String>,
    address: Option<Address>,
    value: Option<u16>,
    write: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| args.next().ok_or_else(|| format!("`{}` requires a value", flag));
        match arg.as_str() {
            "--write" => parsed.write = true,
            "--endpoint" => parsed.endpoint = Some(value_for("--endpoint")?),
            "--address" => {
                let v = value_for("--address")?;
                parsed.address = Some(v.parse().map_err(|_| format!("invalid address '{}'", v))?);
            }
            "--value" => {
                let v = value_for("--value")?;
                parsed.value = Some(v.parse().map_err(|_| format!("invalid raw value '{}'", v))?);
            }
            other => return Err(format!("unrecognised argument: {}", other)),
        }
    }
    if parsed.write && (parsed.address.is_none() || parsed.value.is_none()) {
        return Err("`--write` needs both `--address` and `--value`".to_string());
    }
    Ok(parsed)
}

fn endpoint(args: &Args) -> Result<String, String> {
    if let Some(e) = args.endpoint.as_ref() {
        return Ok(e.clone());
    }
    let host = std::env::var("HEATPUMP_HOST").map_err(|_| "set HEATPUMP_HOST or pass --endpoint".to_string())?;
    let port = std::env::var("HEATPUMP_PORT").unwrap_or_else(|_| DEFAULT_HEATPUMP_PORT.to_string());
    Ok(format!("{}:{}", host, port))
}

fn debug_value(client: &mut ModbusTcpClient, label: &str, addr: Address) -> Result<(), RegisterError> {
    for kind in [RegisterKind::Input, RegisterKind::Holding] {
        let words = client.read_registers(kind, addr, 1)?;
        let word = words.first().copied().ok_or(RegisterError::ShortResponse { address: addr })?;
        let raw = registers::decode_word(word);
        info!(
            "{:?} {} ({}): raw={} decoded={:.2}",
            kind,
            label,
            addr,
            raw,
            registers::from_centi(raw)
        );
    }
    Ok(())
}

fn probe(args: &Args) -> Result<(), String> {
    let endpoint = endpoint(args)?;
    let mut client = ModbusTcpClient::new(
        endpoint,
        DEFAULT_HEATPUMP_UNIT_ID,
        Duration::from_secs(DEFAULT_REGISTER_TIMEOUT_SECS),
    );

    if args.write {
        if let (Some(addr), Some(value)) = (args.address, args.value) {
            client.write_register(addr, value).map_err(|e| e.to_string())?;
            info!("Wrote raw {} to holding register {} at {}", value, addr, client.endpoint());
        }
        return Ok(());
    }

    let targets = match args.address {
        Some(addr) => vec![("", addr)],
        None => vec![
            ("Start temperature tap water", address::START_SETPOINT),
            ("Stop temperature tap water", address::STOP_SETPOINT),
            ("Tap water weighted temperature", address::TANK_TEMPERATURE),
        ],
    };
    for (label, addr) in targets {
        if let Err(e) = debug_value(&mut client, label, addr) {
            error!("register {}: {}", addr, e);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    if let Err(e) = parse_args().and_then(|args| probe(&args)) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
