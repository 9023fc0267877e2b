//! The byte-device seam between the link layer and the hardware, plus the
//! serial port implementation used in production.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::debug;

/// A bidirectional byte device with a timeout-bounded blocking read.
///
/// The link layer owns its device exclusively for the connection lifetime
/// and drives all protocol timing off `recv_byte` returning `None`.
pub trait Device {
    /// Blocking single-byte read, bounded by the device read timeout.
    /// `Ok(None)` means nothing arrived within the timeout.
    fn recv_byte(&mut self) -> io::Result<Option<u8>>;

    /// Write the whole buffer to the device.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// A serial port configured for raw byte traffic: 8 data bits, no parity,
/// one stop bit, no flow control, reads bounded by `read_timeout`.
pub struct SerialDevice {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialDevice {
    /// Open and configure the port at `path`. The handle is released when
    /// the device is dropped.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        debug!("opened {} at {} baud", path, baud_rate);
        Ok(SerialDevice { port })
    }
}

impl Device for SerialDevice {
    fn recv_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            return match self.port.read(&mut byte) {
                Ok(0) => Ok(None),
                Ok(_) => Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }
}
