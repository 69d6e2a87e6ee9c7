//! Access to the attached device over raw USB and over its serial port.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusb::{Direction, GlobalContext, Recipient, RequestType};
use serialport::{SerialPort, SerialPortType, UsbPortInfo};

use pstar_usb_descriptors::control::GET_DESCRIPTOR;
use pstar_usb_descriptors::descriptor::DescriptorType;

/// Parse a hex ID argument such as "1ffb" or "0x1FFB".
pub fn parse_hex_id(arg: &str) -> Result<u16, String> {
    let digits = arg.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid USB ID '{}': {}", arg, e))
}

/// Device opened through libusb for descriptor requests.
pub struct UsbDevice {
    handle: rusb::DeviceHandle<GlobalContext>,
    timeout: Duration,
}

impl UsbDevice {
    /// Open the first device matching vendor and product ID.
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let handle = rusb::open_device_with_vid_pid(vendor_id, product_id).with_context(|| {
            format!(
                "No device {:04x}:{:04x} found - ensure it is connected and accessible",
                vendor_id, product_id
            )
        })?;

        Ok(Self {
            handle,
            timeout: Duration::from_secs(1),
        })
    }

    /// Issue a standard GET_DESCRIPTOR and return what the device sent.
    pub fn get_descriptor(
        &self,
        descriptor_type: DescriptorType,
        index: u8,
        language_id: u16,
        length: u16,
    ) -> Result<Vec<u8>> {
        let request_type = rusb::request_type(Direction::In, RequestType::Standard, Recipient::Device);
        let value = u16::from_be_bytes([descriptor_type as u8, index]);

        let mut buf = vec![0u8; length as usize];
        let n = self
            .handle
            .read_control(request_type, GET_DESCRIPTOR, value, language_id, &mut buf, self.timeout)
            .with_context(|| format!("GET_DESCRIPTOR {:?} index {}", descriptor_type, index))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read a full configuration descriptor: header first, then wTotalLength bytes.
    pub fn get_configuration(&self, index: u8) -> Result<Vec<u8>> {
        let header = self.get_descriptor(DescriptorType::Configuration, index, 0, 9)?;
        if header.len() < 4 {
            anyhow::bail!("Configuration header too short: {:02x?}", header);
        }
        let total = u16::from_le_bytes([header[2], header[3]]);
        self.get_descriptor(DescriptorType::Configuration, index, 0, total)
    }
}

/// Find the serial port enumerated for vendor and product ID.
pub fn find_serial_port(vendor_id: u16, product_id: u16) -> Result<(String, UsbPortInfo)> {
    for port_info in serialport::available_ports()? {
        if let SerialPortType::UsbPort(usb) = port_info.port_type {
            if usb.vid == vendor_id && usb.pid == product_id {
                return Ok((port_info.port_name, usb));
            }
        }
    }

    anyhow::bail!(
        "No serial port for {:04x}:{:04x} found - ensure device is connected",
        vendor_id,
        product_id
    )
}

/// Client for the device's CDC-ACM serial port.
pub struct SerialClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialClient {
    /// Open the port. The baud rate is carried in SET_LINE_CODING only; the
    /// device does not act on it.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
        })
    }

    /// Clear any pending data in the serial buffer.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    /// Write `data` and read back the same number of bytes.
    pub fn echo(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.port.write_all(data)?;
        self.port.flush()?;

        let mut received = Vec::with_capacity(data.len());
        let mut buf = [0u8; 64];
        let start = Instant::now();

        while received.len() < data.len() && start.elapsed() < self.timeout {
            match self.port.read(&mut buf) {
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if received.len() < data.len() {
            anyhow::bail!(
                "Timeout waiting for echo, got {} of {} bytes: {:02x?}",
                received.len(),
                data.len(),
                received
            );
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("1ffb"), Ok(0x1FFB));
        assert_eq!(parse_hex_id("0x2400"), Ok(0x2400));
        assert!(parse_hex_id("xyz").is_err());
    }
}
