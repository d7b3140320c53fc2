use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;

/// The boot ROM autobauds at 9600 and the legacy tooling never renegotiates
/// during the handshake.
pub const BAUD_RATE: u32 = 9600;

/// Granularity of one blocking poll on the wire.
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Stop-bit count for the serial link. Field hardware has been driven with
/// both settings; one is the default, two is selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unable to open serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Byte pipe plus the two control lines the ISP entry circuit is wired to.
/// The session drives this; tests substitute a scripted implementation.
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read whatever arrives within one poll slice. Returns `Ok(0)` when
    /// nothing did.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Discard any pending input.
    fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Drive the target's RESET line (DTR).
    fn set_reset(&mut self, asserted: bool) -> Result<(), TransportError>;

    /// Drive the ISP-entry line P0.14 (RTS). Asserted during reset, the
    /// boot ROM enters the serial bootloader instead of user code.
    fn set_isp_entry(&mut self, asserted: bool) -> Result<(), TransportError>;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError>;
}

/// `serialport`-backed transport: 9600 baud, 8 data bits, no parity,
/// software flow control.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str, stop_bits: StopBits) -> Result<Self, TransportError> {
        let stop_bits = match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };

        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(POLL_SLICE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::Software)
            .open()
            .map_err(|e| TransportError::Open {
                port: port_name.to_string(),
                source: e,
            })?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> Result<(), TransportError> {
        self.port.write_data_terminal_ready(asserted)?;
        Ok(())
    }

    fn set_isp_entry(&mut self, asserted: bool) -> Result<(), TransportError> {
        self.port.write_request_to_send(asserted)?;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.port.set_baud_rate(baud)?;
        Ok(())
    }
}

/// Names of the serial ports present on this machine.
pub fn detect_ports() -> Result<Vec<String>, TransportError> {
    let mut names: Vec<String> = serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect();
    names.sort();
    Ok(names)
}
