//! Heat pump register access.
//!
//! Values are signed 16-bit, big-endian, scaled ×100 (one register unit is
//! 0.01 °C). Addresses are 0-based protocol addresses everywhere, including
//! the probe binary; never subtract or add one at a call site.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio_modbus::client::sync::{self, Reader, Writer};
use tokio_modbus::{Address, Slave};

pub mod address {
    use tokio_modbus::Address;

    /// Tap water start temperature (holding).
    pub const START_SETPOINT: Address = 22;
    /// Tap water stop temperature (holding).
    pub const STOP_SETPOINT: Address = 23;
    /// Tap water weighted tank temperature (input, read-only).
    pub const TANK_TEMPERATURE: Address = 17;
}

pub const SCALE: i16 = 100;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterKind {
    Holding,
    Input,
}

#[derive(Debug)]
pub enum RegisterError {
    Connect(String),
    Transport(String),
    Exception { address: Address, message: String },
    ShortResponse { address: Address },
    OutOfRange { value: i16 },
    /// Some registers of a multi-register update were written before a failure.
    PartialWrite {
        written: Vec<Address>,
        failed: Address,
        source: Box<RegisterError>,
    },
}

impl core::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegisterError::Connect(s) => write!(f, "connect failed: {}", s),
            RegisterError::Transport(s) => write!(f, "transport error: {}", s),
            RegisterError::Exception { address, message } => {
                write!(f, "device exception at register {}: {}", address, message)
            }
            RegisterError::ShortResponse { address } => write!(f, "empty response reading register {}", address),
            RegisterError::OutOfRange { value } => {
                write!(f, "{} does not fit a register after x{} scaling", value, SCALE)
            }
            RegisterError::PartialWrite { written, failed, source } => write!(
                f,
                "partial write: registers {:?} written, register {} failed: {}",
                written, failed, source
            ),
        }
    }
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegisterError::PartialWrite { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Minimal register transport: read a run of registers, write one register.
pub trait RegisterClient {
    fn read_registers(&mut self, kind: RegisterKind, address: Address, count: u16) -> Result<Vec<u16>, RegisterError>;
    fn write_register(&mut self, address: Address, value: u16) -> Result<(), RegisterError>;
}

/// Interpret two big-endian bytes as a signed 16-bit value.
pub fn decode(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

pub fn decode_word(word: u16) -> i16 {
    decode(word.to_be_bytes())
}

pub fn from_centi(raw: i16) -> f64 {
    f64::from(raw) / f64::from(SCALE)
}

/// Raw register value for a whole-degree setpoint.
pub fn to_raw(whole: i16) -> Result<u16, RegisterError> {
    let centi = whole.checked_mul(SCALE).ok_or(RegisterError::OutOfRange { value: whole })?;
    Ok(u16::from_be_bytes(centi.to_be_bytes()))
}

fn read_one<C: RegisterClient + ?Sized>(client: &mut C, kind: RegisterKind, address: Address) -> Result<f64, RegisterError> {
    let words = client.read_registers(kind, address, 1)?;
    let word = words.first().copied().ok_or(RegisterError::ShortResponse { address })?;
    Ok(from_centi(decode_word(word)))
}

pub fn read_input_register<C: RegisterClient + ?Sized>(client: &mut C, address: Address) -> Result<f64, RegisterError> {
    read_one(client, RegisterKind::Input, address)
}

pub fn read_holding_register<C: RegisterClient + ?Sized>(client: &mut C, address: Address) -> Result<f64, RegisterError> {
    read_one(client, RegisterKind::Holding, address)
}

pub fn write_setpoint<C: RegisterClient + ?Sized>(client: &mut C, address: Address, whole: i16) -> Result<(), RegisterError> {
    client.write_register(address, to_raw(whole)?)
}

/// Current tap water state as read from the heat pump, in °C.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Readings {
    pub start: f64,
    pub stop: f64,
    pub tank: f64,
}

pub fn read_readings<C: RegisterClient + ?Sized>(client: &mut C) -> Result<Readings, RegisterError> {
    Ok(Readings {
        start: read_holding_register(client, address::START_SETPOINT)?,
        stop: read_holding_register(client, address::STOP_SETPOINT)?,
        tank: read_input_register(client, address::TANK_TEMPERATURE)?,
    })
}

/// Write both setpoints, start first. A failure on the stop register is
/// reported as `PartialWrite` so the caller knows the device is inconsistent
/// until the next reconciliation.
pub fn write_setpoints<C: RegisterClient + ?Sized>(client: &mut C, start: i16, stop: i16) -> Result<(), RegisterError> {
    // Validate both before touching the device.
    to_raw(start)?;
    to_raw(stop)?;

    write_setpoint(client, address::START_SETPOINT, start)?;
    write_setpoint(client, address::STOP_SETPOINT, stop).map_err(|e| RegisterError::PartialWrite {
        written: vec![address::START_SETPOINT],
        failed: address::STOP_SETPOINT,
        source: Box::new(e),
    })
}

/// Modbus TCP transport with lazy (re)connection.
///
/// The connection is dropped after any transport error and re-established
/// on the next call.
pub struct ModbusTcpClient {
    endpoint: String,
    unit: u8,
    timeout: Duration,
    ctx: Option<sync::Context>,
}

impl ModbusTcpClient {
    pub fn new(endpoint: impl Into<String>, unit: u8, timeout: Duration) -> Self {
        ModbusTcpClient {
            endpoint: endpoint.into(),
            unit,
            timeout,
            ctx: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn resolve(&self) -> Result<SocketAddr, RegisterError> {
        self.endpoint
            .to_socket_addrs()
            .map_err(|e| RegisterError::Connect(format!("resolve {}: {}", self.endpoint, e)))?
            .next()
            .ok_or_else(|| RegisterError::Connect(format!("{} resolved to no address", self.endpoint)))
    }

    fn context(&mut self) -> Result<&mut sync::Context, RegisterError> {
        if self.ctx.is_none() {
            let addr = self.resolve()?;
            let ctx = sync::tcp::connect_slave_with_timeout(addr, Slave(self.unit), Some(self.timeout))
                .map_err(|e| RegisterError::Connect(format!("{}: {}", addr, e)))?;
            log::debug!("Connected to heat pump at {}", addr);
            self.ctx = Some(ctx);
        }
        self.ctx
            .as_mut()
            .ok_or_else(|| RegisterError::Connect(format!("{}: not connected", self.endpoint)))
    }

    fn settle<T>(&mut self, result: tokio_modbus::Result<T>, address: Address) -> Result<T, RegisterError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(code)) => Err(RegisterError::Exception {
                address,
                message: code.to_string(),
            }),
            Err(e) => {
                self.ctx = None;
                Err(RegisterError::Transport(e.to_string()))
            }
        }
    }
}

impl RegisterClient for ModbusTcpClient {
    fn read_registers(&mut self, kind: RegisterKind, address: Address, count: u16) -> Result<Vec<u16>, RegisterError> {
        let ctx = self.context()?;
        let result = match kind {
            RegisterKind::Holding => ctx.read_holding_registers(address, count),
            RegisterKind::Input => ctx.read_input_registers(address, count),
        };
        self.settle(result, address)
    }

    fn write_register(&mut self, address: Address, value: u16) -> Result<(), RegisterError> {
        let ctx = self.context()?;
        let result = ctx.write_single_register(address, value);
        self.settle(result, address)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory register bank recording every write.
    #[derive(Debug, Default)]
    pub struct FakeRegisters {
        pub holding: BTreeMap<Address, u16>,
        pub input: BTreeMap<Address, u16>,
        pub writes: Vec<(Address, u16)>,
        pub fail_reads: bool,
        pub fail_write_at: Option<Address>,
    }

    impl FakeRegisters {
        pub fn with_setpoints(start: i16, stop: i16, tank_centi: i16) -> Self {
            let mut fake = FakeRegisters::default();
            fake.holding.insert(address::START_SETPOINT, to_raw(start).unwrap());
            fake.holding.insert(address::STOP_SETPOINT, to_raw(stop).unwrap());
            fake.input
                .insert(address::TANK_TEMPERATURE, u16::from_be_bytes(tank_centi.to_be_bytes()));
            fake
        }
    }

    impl RegisterClient for FakeRegisters {
        fn read_registers(&mut self, kind: RegisterKind, address: Address, count: u16) -> Result<Vec<u16>, RegisterError> {
            if self.fail_reads {
                return Err(RegisterError::Transport("connection reset".into()));
            }
            let bank = match kind {
                RegisterKind::Holding => &self.holding,
                RegisterKind::Input => &self.input,
            };
            Ok((address..address + count).map(|a| bank.get(&a).copied().unwrap_or(0)).collect())
        }

        fn write_register(&mut self, address: Address, value: u16) -> Result<(), RegisterError> {
            if self.fail_write_at == Some(address) {
                return Err(RegisterError::Exception {
                    address,
                    message: "illegal data value".into(),
                });
            }
            self.holding.insert(address, value);
            self.writes.push((address, value));
            Ok(())
        }
    }
}
