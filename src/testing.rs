//! Test doubles: an in-memory transport that behaves like an LPC2000 boot
//! ROM, with RAM/flash models so programming and verification round-trip.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::lpc2000;
use crate::transport::{Transport, TransportError};

const RAM_BASE: u32 = 0x4000_0000;
const RAM_SIZE: usize = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Running user code; not listening.
    Idle,
    /// Reset with ISP entry asserted; waiting for the autobaud `?`.
    AwaitQuery,
    /// Sent `Synchronized`, waiting for the host to repeat it.
    AwaitConfirm,
    Ready,
}

struct DataTransfer {
    addr: u32,
    remaining: usize,
    staged: Vec<u8>,
}

struct Inner {
    part_id: u32,
    boot_major: u32,
    boot_minor: u32,
    blank: bool,

    muted: bool,
    garble_sync: bool,
    refuse_echo: bool,
    garble_part_id: bool,

    state: State,
    echo: bool,
    rx: VecDeque<u8>,
    line_buf: Vec<u8>,
    transfer: Option<DataTransfer>,

    commands: Vec<String>,
    reset_asserted: bool,
    reset_pulses: u32,
    isp_entry: bool,
    host_baud: Option<u32>,

    ram: Vec<u8>,
    flash: Vec<u8>,
}

/// Simulated target. `handle()` yields the `Transport` the session owns;
/// the `SimTarget` itself stays with the test for knobs and inspection.
pub struct SimTarget {
    inner: Rc<RefCell<Inner>>,
}

pub struct SimLink {
    inner: Rc<RefCell<Inner>>,
}

impl SimTarget {
    pub fn new(part_id: u32) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                part_id,
                boot_major: 2,
                boot_minor: 12,
                blank: true,
                muted: false,
                garble_sync: false,
                refuse_echo: false,
                garble_part_id: false,
                state: State::Idle,
                echo: true,
                rx: VecDeque::new(),
                line_buf: Vec::new(),
                transfer: None,
                commands: Vec::new(),
                reset_asserted: false,
                reset_pulses: 0,
                isp_entry: false,
                host_baud: None,
                ram: vec![0; RAM_SIZE],
                flash: vec![0xFF; lpc2000::MAX_IMAGE_SIZE],
            })),
        }
    }

    pub fn handle(&self) -> SimLink {
        SimLink {
            inner: Rc::clone(&self.inner),
        }
    }

    pub fn mute(&self) {
        self.inner.borrow_mut().muted = true;
    }

    pub fn garble_sync(&self) {
        self.inner.borrow_mut().garble_sync = true;
    }

    pub fn refuse_echo(&self) {
        self.inner.borrow_mut().refuse_echo = true;
    }

    pub fn garble_part_id(&self) {
        self.inner.borrow_mut().garble_part_id = true;
    }

    pub fn set_blank(&self, blank: bool) {
        self.inner.borrow_mut().blank = blank;
    }

    pub fn set_boot_version(&self, major: u32, minor: u32) {
        let mut inner = self.inner.borrow_mut();
        inner.boot_major = major;
        inner.boot_minor = minor;
    }

    /// Command lines received in Ready state, transfer data excluded.
    pub fn commands(&self) -> Vec<String> {
        self.inner.borrow().commands.clone()
    }

    pub fn reset_pulses(&self) -> u32 {
        self.inner.borrow().reset_pulses
    }

    pub fn host_baud(&self) -> Option<u32> {
        self.inner.borrow().host_baud
    }

    pub fn flash_range(&self, offset: usize, len: usize) -> Vec<u8> {
        self.inner.borrow().flash[offset..offset + len].to_vec()
    }

    pub fn corrupt_flash(&self, offset: usize) {
        let mut inner = self.inner.borrow_mut();
        inner.flash[offset] ^= 0xFF;
    }
}

impl Transport for SimLink {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.borrow_mut();
        inner.line_buf.extend_from_slice(data);
        inner.process_input();
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            match inner.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.inner.borrow_mut().rx.clear();
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> Result<(), TransportError> {
        let mut inner = self.inner.borrow_mut();
        if inner.reset_asserted && !asserted {
            inner.reset_pulses += 1;
            if inner.isp_entry {
                inner.state = State::AwaitQuery;
                inner.echo = true;
                inner.rx.clear();
                inner.line_buf.clear();
                inner.transfer = None;
            } else {
                inner.state = State::Idle;
            }
        }
        inner.reset_asserted = asserted;
        Ok(())
    }

    fn set_isp_entry(&mut self, asserted: bool) -> Result<(), TransportError> {
        self.inner.borrow_mut().isp_entry = asserted;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.inner.borrow_mut().host_baud = Some(baud);
        Ok(())
    }
}

impl Inner {
    fn process_input(&mut self) {
        if self.state == State::AwaitQuery && self.line_buf == b"?" {
            self.line_buf.clear();
            if self.garble_sync {
                self.reply("Unsynchronized\r\n");
            } else {
                self.reply("Synchronized\r\n");
                self.state = State::AwaitConfirm;
            }
        }

        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.state {
            State::Idle | State::AwaitQuery => {}
            State::AwaitConfirm => {
                if line == "Synchronized" {
                    self.reply("Synchronized\r\nOK\r\n");
                    self.state = State::Ready;
                    self.echo = true;
                } else {
                    self.reply("?\r\n");
                }
            }
            State::Ready => {
                if self.echo {
                    self.reply(line);
                    self.reply("\r\n");
                }
                if self.transfer.is_some() {
                    self.handle_transfer_line(line);
                } else {
                    self.commands.push(line.to_string());
                    self.handle_command(line);
                }
            }
        }
    }

    fn handle_command(&mut self, line: &str) {
        let fields: Vec<&str> = line.split(' ').collect();
        match fields[0] {
            "A" => {
                if self.refuse_echo {
                    self.reply_line("1");
                } else {
                    self.reply_line("0");
                    self.echo = fields.get(1) == Some(&"1");
                }
            }
            "J" => {
                self.reply_line("0");
                if self.garble_part_id {
                    self.reply_line("NaN");
                } else {
                    let id = self.part_id.to_string();
                    self.reply_line(&id);
                }
            }
            "K" => {
                self.reply_line("0");
                let minor = self.boot_minor.to_string();
                let major = self.boot_major.to_string();
                self.reply_line(&minor);
                self.reply_line(&major);
            }
            "U" | "P" | "E" | "B" => self.reply_line("0"),
            "I" => {
                if self.blank {
                    self.reply_line("0");
                } else {
                    self.reply_line("8");
                }
            }
            "W" => {
                let addr: u32 = fields[1].parse().unwrap();
                let len: usize = fields[2].parse().unwrap();
                self.transfer = Some(DataTransfer {
                    addr,
                    remaining: len,
                    staged: Vec::with_capacity(len),
                });
                self.reply_line("0");
            }
            "C" => {
                let dst: usize = fields[1].parse().unwrap();
                let src: u32 = fields[2].parse().unwrap();
                let len: usize = fields[3].parse().unwrap();
                let from = (src - RAM_BASE) as usize;
                let staged = self.ram[from..from + len].to_vec();
                self.flash[dst..dst + len].copy_from_slice(&staged);
                self.reply_line("0");
            }
            "M" => {
                let addr: usize = fields[1].parse().unwrap();
                let src: u32 = fields[2].parse().unwrap();
                let len: usize = fields[3].parse().unwrap();
                let from = (src - RAM_BASE) as usize;
                if self.flash[addr..addr + len] == self.ram[from..from + len] {
                    self.reply_line("0");
                } else {
                    self.reply_line("10");
                }
            }
            _ if !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()) => {
                // Crystal frequency.
                self.reply_line("OK");
            }
            _ => self.reply_line("1"),
        }
    }

    fn handle_transfer_line(&mut self, line: &str) {
        let transfer = self.transfer.as_mut().expect("in transfer");
        if transfer.remaining > 0 {
            let bytes = decode_uu_line(line);
            transfer.remaining = transfer.remaining.saturating_sub(bytes.len());
            transfer.staged.extend_from_slice(&bytes);
            return;
        }

        // All data received; this line is the decimal checksum.
        let claimed: u32 = line.parse().unwrap_or(u32::MAX);
        let transfer = self.transfer.take().expect("in transfer");
        let actual = crate::uucode::checksum(&transfer.staged);
        if claimed == actual {
            let at = (transfer.addr - RAM_BASE) as usize;
            self.ram[at..at + transfer.staged.len()].copy_from_slice(&transfer.staged);
            self.reply_line("OK");
        } else {
            self.reply_line("19");
        }
    }

    fn reply(&mut self, text: &str) {
        if self.muted {
            return;
        }
        self.rx.extend(text.as_bytes());
    }

    fn reply_line(&mut self, text: &str) {
        if self.muted {
            return;
        }
        self.rx.extend(text.as_bytes());
        self.rx.extend(b"\r\n");
    }
}

/// Inverse of the transfer encoding, trusting the declared length prefix.
fn decode_uu_line(line: &str) -> Vec<u8> {
    let bytes = line.as_bytes();
    if bytes.is_empty() {
        return Vec::new();
    }
    let declared = (bytes[0] - 32) as usize;
    let mut out = Vec::with_capacity(declared);
    for quad in bytes[1..].chunks_exact(4) {
        let f: Vec<u8> = quad
            .iter()
            .map(|&c| if c == 0x60 { 0 } else { c.wrapping_sub(0x20) })
            .collect();
        out.push((f[0] << 2) | (f[1] >> 4));
        out.push((f[1] << 4) | (f[2] >> 2));
        out.push((f[2] << 6) | f[3]);
    }
    out.truncate(declared);
    out
}
