//! The real serial backend, built on the `serialport` crate.
//!
//! A blocked `read_line()` can't be unblocked by writing bytes into one's
//! own inbound stream (there's no loopback at the wire level), so instead
//! the port is opened with a short read timeout and `read_line()` rechecks
//! a shutdown flag on every timeout tick — the same technique used
//! elsewhere in this codebase's ancestry for exactly this reason.

use crate::machines::grbl::error::TransportError;
use crate::machines::grbl::transport::{ReadOutcome, Transport};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Information about an available serial port, returned by [`list_ports`].
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub device: String,
    pub description: String,
    pub manufacturer: Option<String>,
}

/// Lists serial ports that look like CNC controllers (USB-serial / USB-ACM
/// / Bluetooth devices, filtering out e.g. Bluetooth RFCOMM noise ports).
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Open {
            device: "(enumeration)".to_string(),
            baud: 0,
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (description, manufacturer) = match &p.port_type {
                serialport::SerialPortType::UsbPort(usb) => (
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                    usb.manufacturer.clone(),
                ),
                _ => ("Serial Port".to_string(), None),
            };
            PortInfo {
                device: p.port_name,
                description,
                manufacturer,
            }
        })
        .collect())
}

pub struct SerialTransport {
    port: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    shutdown: AtomicBool,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    pub fn new() -> Self {
        Self {
            port: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }
}

impl Transport for SerialTransport {
    fn open(&self, device: &str, baud: u32) -> Result<(), TransportError> {
        let opened = serialport::new(device, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Open {
                device: device.to_string(),
                baud,
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        *self.port.lock() = Some(opened);
        self.shutdown.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.port.lock() = None;
        Ok(())
    }

    fn read_line(&self) -> Result<ReadOutcome, TransportError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(ReadOutcome::Sentinel);
            }
            let read_result = {
                let mut guard = self.port.lock();
                match guard.as_mut() {
                    Some(port) => port.read(&mut byte),
                    None => return Err(TransportError::NotOpen),
                }
            };
            match read_result {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        return Ok(ReadOutcome::Line(text));
                    }
                    if byte[0] != b'\r' {
                        line.push(byte[0]);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(TransportError::Read(e)),
            }
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        match guard.as_mut() {
            Some(port) => port.write_all(bytes).map_err(TransportError::Write),
            None => Err(TransportError::NotOpen),
        }
    }

    fn write_realtime(&self, byte: u8) -> Result<(), TransportError> {
        self.write(&[byte])
    }
}
