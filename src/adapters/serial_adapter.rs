//! Serial port transport built on `tokio-serial`.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

use super::{ScaleLink, ScaleTransport};
use crate::error::{AppResult, ScaleError};
use crate::framing::LineSettings;

#[cfg(feature = "instrument_serial")]
use crate::framing::Parity;
#[cfg(feature = "instrument_serial")]
use tokio_serial::SerialPortBuilderExt;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Opens RS-232 / USB-serial ports with the line settings of a framing mode.
#[derive(Clone, Debug, Default)]
pub struct SerialPortTransport;

impl SerialPortTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScaleTransport for SerialPortTransport {
    fn name(&self) -> &str {
        "serial"
    }

    #[cfg(feature = "instrument_serial")]
    async fn open(&self, endpoint: &str, line: &LineSettings) -> AppResult<Box<dyn ScaleLink>> {
        let open_error = |source: std::io::Error| ScaleError::Open {
            endpoint: endpoint.to_string(),
            source,
        };

        let data_bits = data_bits(line.data_bits).map_err(open_error)?;
        let stop_bits = stop_bits(line.stop_bits).map_err(open_error)?;

        // Opening a device node is a blocking syscall; keep it off the actor's worker.
        let builder = tokio_serial::new(endpoint, line.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity(line.parity))
            .flow_control(tokio_serial::FlowControl::None);
        let runtime = tokio::runtime::Handle::current();
        let stream = tokio::task::spawn_blocking(move || {
            let _guard = runtime.enter();
            builder.open_native_async()
        })
        .await
        .map_err(|e| open_error(std::io::Error::other(e)))?
        .map_err(|e| open_error(e.into()))?;

        debug!(endpoint, line = %line, "Opened serial port");
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn open(&self, _endpoint: &str, _line: &LineSettings) -> AppResult<Box<dyn ScaleLink>> {
        Err(ScaleError::SerialFeatureDisabled)
    }
}

#[cfg(feature = "instrument_serial")]
fn data_bits(bits: u8) -> std::io::Result<tokio_serial::DataBits> {
    use tokio_serial::DataBits;
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported data bits: {}", other),
        )),
    }
}

#[cfg(feature = "instrument_serial")]
fn stop_bits(bits: u8) -> std::io::Result<tokio_serial::StopBits> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported stop bits: {}", other),
        )),
    }
}

#[cfg(feature = "instrument_serial")]
fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

/// A serial port visible to the operating system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Device path or name ("/dev/ttyUSB0", "COM4").
    pub name: String,
    /// Port type ("usb", "pci", "bluetooth" or "unknown").
    pub kind: String,
    /// USB manufacturer and product strings, when reported.
    pub description: Option<String>,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{} ({}, {})", self.name, self.kind, desc),
            None => write!(f, "{} ({})", self.name, self.kind),
        }
    }
}

/// Enumerates the serial ports currently available.
#[cfg(feature = "instrument_serial")]
pub fn list_ports() -> AppResult<Vec<PortInfo>> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (kind, description) = match p.port_type {
                SerialPortType::UsbPort(usb) => {
                    let desc = [usb.manufacturer, usb.product]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ");
                    ("usb", (!desc.is_empty()).then_some(desc))
                }
                SerialPortType::PciPort => ("pci", None),
                SerialPortType::BluetoothPort => ("bluetooth", None),
                SerialPortType::Unknown => ("unknown", None),
            };
            PortInfo {
                name: p.port_name,
                kind: kind.to_string(),
                description,
            }
        })
        .collect())
}

#[cfg(not(feature = "instrument_serial"))]
pub fn list_ports() -> AppResult<Vec<PortInfo>> {
    Err(ScaleError::SerialFeatureDisabled)
}
