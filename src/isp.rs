//! Session layer for the LPC2000 ISP boot ROM.
//!
//! The boot ROM speaks an ASCII line protocol with one awkward property:
//! while echo is enabled (the power-on state) it retransmits every received
//! line, so the shape of every reply depends on the echo flag. All framing
//! goes through [`IspSession::read_reply`], which strips the echo line when
//! present; individual commands never count lines themselves.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

use crate::lpc2000::{self, Part};
use crate::transport::{SerialTransport, StopBits, Transport, TransportError};
use crate::uucode;

const SYNCHRONIZED: &str = "Synchronized\r\n";
const SYNC_CONFIRMED: &str = "Synchronized\r\nOK\r\n";

/// Width of the RESET pulse on either edge.
const RESET_PULSE: Duration = Duration::from_millis(10);

/// Time the boot ROM gets to come up before the autobaud query.
const BOOT_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stop_bits: StopBits,
    /// Budget for any single expected response.
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_bits: StopBits::One,
            response_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Error, Debug)]
pub enum IspError {
    #[error("not synchronized with the target")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no response from target within {0:?}")]
    Timeout(Duration),

    #[error("synchronization failed: got {got:?}")]
    SyncFailed { got: String },

    #[error("unexpected response to {command:?}: {got:?}")]
    UnexpectedResponse { command: String, got: String },

    #[error("part id {0} is not a known LPC2000 device")]
    UnknownPart(u32),

    #[error("block is {len} bytes; the flash block size is {max}", max = lpc2000::BLOCK_SIZE)]
    BlockTooLarge { len: usize },
}

impl IspError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, IspError::Timeout(_))
    }
}

/// One exclusive conversation with a target. Commands must be issued
/// sequentially; the framing depends on exact line counts and a failed
/// exchange leaves the stream in an unknown position, so any error ends
/// the session and the caller has to [`connect`](IspSession::connect)
/// again.
pub struct IspSession {
    transport: Box<dyn Transport>,
    config: SessionConfig,
    connected: bool,
    /// Reset lines have been handed back (or never taken).
    released: bool,
    echo_on: bool,
    last_sector: Option<u32>,
}

impl IspSession {
    pub fn new(transport: Box<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            connected: false,
            released: true,
            // Echo is the boot ROM's power-on state.
            echo_on: true,
            last_sector: None,
        }
    }

    /// Open `port_name` with the protocol's fixed line settings.
    pub fn open(port_name: &str, config: SessionConfig) -> Result<Self, IspError> {
        let transport = SerialTransport::open(port_name, config.stop_bits)?;
        Ok(Self::new(Box::new(transport), config))
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn echo_enabled(&self) -> bool {
        self.echo_on
    }

    /// Reset the target into the boot ROM and run the synchronization
    /// handshake: `?` must come back as `Synchronized`, and confirming it
    /// must come back as `Synchronized` + `OK`.
    pub fn connect(&mut self) -> Result<(), IspError> {
        self.connected = false;
        self.released = false;
        self.echo_on = true;
        self.last_sector = None;

        self.pulse_reset(true)?;
        thread::sleep(BOOT_SETTLE);
        self.transport.clear_input()?;

        self.transport.send(b"?")?;
        self.expect_exact(SYNCHRONIZED)?;

        self.transport.send(SYNCHRONIZED.as_bytes())?;
        self.expect_exact(SYNC_CONFIRMED)?;

        self.connected = true;
        debug!("target synchronized");
        Ok(())
    }

    /// Release the target back to user code: RESET pulsed with the
    /// ISP-entry line deasserted. Runs after failed sessions too, so the
    /// control lines never stay parked. Idempotent.
    pub fn deinit(&mut self) -> Result<(), IspError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.connected = false;
        self.pulse_reset(false)?;
        debug!("target released");
        Ok(())
    }

    /// Tell the target its crystal frequency in kHz. Required once after
    /// synchronization before any other command.
    pub fn set_crystal(&mut self, khz: u32) -> Result<(), IspError> {
        self.expect(&format!("{khz}\r\n"), "OK")
    }

    /// Switch command echo on or off. The confirmation is still framed
    /// under the old state, and the local flag only follows once the
    /// target has acknowledged.
    pub fn set_echo(&mut self, enabled: bool) -> Result<(), IspError> {
        if enabled == self.echo_on {
            return Ok(());
        }
        let cmd = if enabled { "A 1\r\n" } else { "A 0\r\n" };
        self.expect(cmd, "0")?;
        self.echo_on = enabled;
        Ok(())
    }

    /// Read the part identification word (`J`), masked to the documented
    /// low 20 bits.
    pub fn read_part_id(&mut self) -> Result<u32, IspError> {
        let lines = self.command("J\r\n", 2)?;
        // A garbled identifier line is reported like an absent one.
        let id: i64 = lines[1]
            .parse()
            .map_err(|_| self.drop_session(IspError::Timeout(self.config.response_timeout)))?;
        Ok((id as u32) & lpc2000::PART_ID_MASK)
    }

    /// Read the boot code version (`K`). The wire carries minor before
    /// major; the result is `major.minor`.
    pub fn read_boot_code_version(&mut self) -> Result<String, IspError> {
        let lines = self.command("K\r\n", 3)?;
        Ok(format!("{}.{}", lines[2], lines[1]))
    }

    /// Unlock flash write/erase (`U`).
    pub fn unlock(&mut self) -> Result<(), IspError> {
        self.expect(&format!("U {}\r\n", lpc2000::UNLOCK_CODE), "0")
    }

    /// Change the link baud rate (`B`), retuning the host side once the
    /// target has acknowledged.
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<(), IspError> {
        self.expect(&format!("B {baud} 1\r\n"), "0")?;
        self.transport.set_baud_rate(baud)?;
        Ok(())
    }

    /// Erase every flash sector of the identified part.
    pub fn chip_erase(&mut self) -> Result<(), IspError> {
        let n = self.resolve_last_sector()?;
        self.unlock()?;
        self.expect(&format!("P 0 {n}\r\n"), "0")?;
        self.expect(&format!("E 0 {n}\r\n"), "0")?;
        debug!(sectors = n + 1, "chip erased");
        Ok(())
    }

    /// Blank-check sectors 1..=last (`I`). Sector 0 holds the vector table
    /// and is never blank once anything has been programmed.
    pub fn blank_check(&mut self) -> Result<bool, IspError> {
        let n = self.resolve_last_sector()?;
        let cmd = format!("I 1 {n}\r\n");
        let lines = self.command(&cmd, 1)?;
        match lines[0].as_str() {
            "0" => Ok(true),
            "8" => Ok(false),
            other => {
                let got = other.to_string();
                Err(self.drop_session(IspError::UnexpectedResponse { command: cmd.trim_end().to_string(), got }))
            }
        }
    }

    /// Program one block at `offset` in flash: stage it in RAM as two
    /// UU-encoded 512-byte transfers, prepare the part's sectors, then
    /// copy RAM to flash (`C`). Short blocks pad with 0xFF.
    pub fn program_block(&mut self, chunk: &[u8], offset: u32) -> Result<(), IspError> {
        self.stage_block(chunk)?;
        let n = self.resolve_last_sector()?;
        self.expect(&format!("P 0 {n}\r\n"), "0")?;
        self.expect(
            &format!(
                "C {offset} {} {}\r\n",
                lpc2000::RAM_STAGE_FIRST,
                lpc2000::BLOCK_SIZE
            ),
            "0",
        )
    }

    /// Compare one block against flash at `offset` (`M`) after staging it
    /// in RAM the same way programming does. A mismatch is an error, not a
    /// result.
    pub fn verify_block(&mut self, chunk: &[u8], offset: u32) -> Result<(), IspError> {
        self.stage_block(chunk)?;
        self.expect(
            &format!(
                "M {offset} {} {}\r\n",
                lpc2000::RAM_STAGE_FIRST,
                chunk.len()
            ),
            "0",
        )
    }

    fn resolve_last_sector(&mut self) -> Result<u32, IspError> {
        if let Some(n) = self.last_sector {
            return Ok(n);
        }
        let id = self.read_part_id()?;
        let part =
            Part::from_part_id(id).ok_or_else(|| self.drop_session(IspError::UnknownPart(id)))?;
        debug!(part = part.name(), "identified target");
        self.last_sector = Some(part.last_sector());
        Ok(part.last_sector())
    }

    fn stage_block(&mut self, chunk: &[u8]) -> Result<(), IspError> {
        if chunk.len() > lpc2000::BLOCK_SIZE {
            return Err(IspError::BlockTooLarge { len: chunk.len() });
        }
        let mut block = chunk.to_vec();
        block.resize(lpc2000::BLOCK_SIZE, 0xFF);

        let (first, second) = block.split_at(lpc2000::HALF_BLOCK_SIZE);
        self.stage_half(first, lpc2000::RAM_STAGE_FIRST)?;
        self.stage_half(second, lpc2000::RAM_STAGE_SECOND)
    }

    fn stage_half(&mut self, half: &[u8], ram_addr: u32) -> Result<(), IspError> {
        self.expect(&format!("W {ram_addr} {}\r\n", half.len()), "0")?;

        let lines = uucode::encode(half);
        let count = lines.len();
        for line in lines {
            self.transport.send(line.as_bytes())?;
            self.transport.send(b"\r\n")?;
        }
        if self.echo_on {
            // The transfer lines come back as echo; discard them so only
            // the checksum acknowledgement is framed.
            self.read_until(|bytes| count_lines(bytes) >= count)?;
        }

        let cmd = format!("{}\r\n", uucode::checksum(half));
        let lines = self.command(&cmd, 1)?;
        if lines[0] != "OK" && lines[0] != "0" {
            let got = lines[0].clone();
            return Err(self.drop_session(IspError::UnexpectedResponse {
                command: cmd.trim_end().to_string(),
                got,
            }));
        }
        Ok(())
    }

    /// Send a command line and read its reply, expecting `values` lines
    /// beyond the echo.
    fn command(&mut self, cmd: &str, values: usize) -> Result<Vec<String>, IspError> {
        if !self.connected {
            return Err(IspError::NotConnected);
        }
        trace!(command = cmd.trim_end(), "send");
        self.transport.send(cmd.as_bytes())?;
        self.read_reply(values)
    }

    fn expect(&mut self, cmd: &str, want: &str) -> Result<(), IspError> {
        let lines = self.command(cmd, 1)?;
        if lines[0] != want {
            let got = lines[0].clone();
            return Err(self.drop_session(IspError::UnexpectedResponse {
                command: cmd.trim_end().to_string(),
                got,
            }));
        }
        Ok(())
    }

    /// Read `values` CRLF lines, plus a leading echo of the command when
    /// echo is on. The echo line is discarded before slotting.
    fn read_reply(&mut self, values: usize) -> Result<Vec<String>, IspError> {
        let total = values + usize::from(self.echo_on);
        let raw = self.read_until(|bytes| count_lines(bytes) >= total)?;

        let text = String::from_utf8_lossy(&raw);
        let mut lines: Vec<String> = text
            .split('\n')
            .take(total)
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        if self.echo_on {
            lines.remove(0);
        }
        trace!(?lines, "reply");
        Ok(lines)
    }

    /// Byte-exact read used by the handshake, where the reply includes its
    /// own echo and is matched as a whole.
    fn expect_exact(&mut self, expected: &str) -> Result<(), IspError> {
        let raw = self.read_until(|bytes| bytes.len() >= expected.len())?;
        if raw != expected.as_bytes() {
            return Err(IspError::SyncFailed {
                got: String::from_utf8_lossy(&raw).into_owned(),
            });
        }
        Ok(())
    }

    /// Poll the transport until `done` or the response budget runs out.
    fn read_until<F>(&mut self, mut done: F) -> Result<Vec<u8>, IspError>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + self.config.response_timeout;
        let mut received: Vec<u8> = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let n = self.transport.recv(&mut buf)?;
            if n > 0 {
                received.extend_from_slice(&buf[..n]);
                if done(&received) {
                    return Ok(received);
                }
            }
            if Instant::now() >= deadline {
                return Err(self.drop_session(IspError::Timeout(self.config.response_timeout)));
            }
        }
    }

    fn pulse_reset(&mut self, isp_entry: bool) -> Result<(), IspError> {
        self.transport.set_reset(true)?;
        self.transport.set_isp_entry(isp_entry)?;
        thread::sleep(RESET_PULSE);
        self.transport.set_reset(false)?;
        thread::sleep(RESET_PULSE);
        Ok(())
    }

    /// A failed exchange leaves the line position unknown; the session is
    /// unusable until the caller reconnects.
    fn drop_session(&mut self, e: IspError) -> IspError {
        self.connected = false;
        e
    }
}

impl Drop for IspSession {
    fn drop(&mut self) {
        let _ = self.deinit();
    }
}

fn count_lines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::lpc2000::PART_ID_LPC2148;
    use crate::testing::SimTarget;

    fn session(sim: &SimTarget) -> IspSession {
        let config = SessionConfig {
            response_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        IspSession::new(Box::new(sim.handle()), config)
    }

    fn connected_session(sim: &SimTarget) -> IspSession {
        let mut s = session(sim);
        s.connect().unwrap();
        s
    }

    #[test]
    fn test_connect_handshake() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = session(&sim);

        s.connect().unwrap();

        assert!(s.is_connected());
        assert!(s.echo_enabled());
        assert_eq!(sim.reset_pulses(), 1);
    }

    #[test]
    fn test_connect_rejects_wrong_sync_text() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        sim.garble_sync();
        let mut s = session(&sim);

        let err = s.connect().unwrap_err();
        assert!(matches!(err, IspError::SyncFailed { .. }));
        assert!(!s.is_connected());
    }

    #[test]
    fn test_connect_times_out_on_silence() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        sim.mute();
        let mut s = session(&sim);

        let err = s.connect().unwrap_err();
        assert!(err.is_timeout());
        assert!(!s.is_connected());
    }

    #[test]
    fn test_commands_require_connection() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = session(&sim);

        assert!(matches!(s.unlock(), Err(IspError::NotConnected)));
    }

    #[test]
    fn test_set_crystal_with_echo_on() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        s.set_crystal(12000).unwrap();
        assert_eq!(sim.commands(), vec!["12000"]);
    }

    #[test]
    fn test_set_echo_flips_flag_only_on_success() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        s.set_echo(false).unwrap();
        assert!(!s.echo_enabled());

        // Already off: no traffic.
        s.set_echo(false).unwrap();
        assert_eq!(sim.commands(), vec!["A 0"]);
    }

    #[test]
    fn test_set_echo_failure_leaves_flag() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        sim.refuse_echo();
        let mut s = connected_session(&sim);

        assert!(s.set_echo(false).is_err());
        assert!(s.echo_enabled());
    }

    #[test]
    fn test_read_part_id_masks_high_bits() {
        let sim = SimTarget::new(PART_ID_LPC2148 | 0x0010_0000 << 4);
        let mut s = connected_session(&sim);

        assert_eq!(s.read_part_id().unwrap(), PART_ID_LPC2148);
    }

    #[test]
    fn test_read_part_id_works_after_echo_off() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        s.set_echo(false).unwrap();
        assert_eq!(s.read_part_id().unwrap(), PART_ID_LPC2148);
    }

    #[test]
    fn test_garbled_part_id_reads_as_timeout() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        sim.garble_part_id();
        let mut s = connected_session(&sim);

        let err = s.read_part_id().unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_boot_version_orders_major_before_minor() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        sim.set_boot_version(2, 12);
        let mut s = connected_session(&sim);

        assert_eq!(s.read_boot_code_version().unwrap(), "2.12");
    }

    #[test]
    fn test_chip_erase_sequence() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        s.chip_erase().unwrap();
        assert_eq!(sim.commands(), vec!["J", "U 23130", "P 0 26", "E 0 26"]);
    }

    #[test]
    fn test_chip_erase_scopes_to_part_sectors() {
        let sim = SimTarget::new(crate::lpc2000::PART_ID_LPC2141);
        let mut s = connected_session(&sim);

        s.chip_erase().unwrap();
        assert_eq!(sim.commands(), vec!["J", "U 23130", "P 0 7", "E 0 7"]);
    }

    #[test]
    fn test_chip_erase_rejects_unknown_part() {
        let sim = SimTarget::new(12345);
        let mut s = connected_session(&sim);

        let err = s.chip_erase().unwrap_err();
        assert!(matches!(err, IspError::UnknownPart(12345)));
        // Nothing destructive went out.
        assert_eq!(sim.commands(), vec!["J"]);
    }

    #[test]
    fn test_blank_check() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);
        assert!(s.blank_check().unwrap());
        assert_eq!(sim.commands(), vec!["J", "I 1 26"]);

        let sim = SimTarget::new(PART_ID_LPC2148);
        sim.set_blank(false);
        let mut s = connected_session(&sim);
        assert!(!s.blank_check().unwrap());
    }

    #[test]
    fn test_program_block_stages_two_halves() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);
        s.set_echo(false).unwrap();

        let chunk: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        s.program_block(&chunk, 4096).unwrap();

        let commands = sim.commands();
        let tail = commands[commands.len() - 5..].to_vec();
        assert_eq!(
            tail,
            [
                "W 1073742336 512",
                "W 1073742848 512",
                "J",
                "P 0 26",
                "C 4096 1073742336 1024"
            ]
        );
        assert_eq!(sim.flash_range(4096, 1024), chunk);
    }

    #[test]
    fn test_program_block_pads_short_chunk() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);
        s.set_echo(false).unwrap();

        s.program_block(&[0x11, 0x22], 0).unwrap();

        let mut expected = vec![0x11, 0x22];
        expected.resize(1024, 0xFF);
        assert_eq!(sim.flash_range(0, 1024), expected);
    }

    #[test]
    fn test_program_block_rejects_oversize_chunk() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        let err = s.program_block(&[0u8; 1025], 0).unwrap_err();
        assert!(matches!(err, IspError::BlockTooLarge { len: 1025 }));
    }

    #[test]
    fn test_program_block_with_echo_on() {
        // The echoed transfer lines must not desynchronize the framing.
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        let chunk = vec![0xA5u8; 1024];
        s.program_block(&chunk, 1024).unwrap();
        assert_eq!(sim.flash_range(1024, 1024), chunk);
    }

    #[test]
    fn test_verify_block_compares_staged_bytes() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);
        s.set_echo(false).unwrap();

        let chunk: Vec<u8> = (0..1024u32).map(|i| (i % 13) as u8).collect();
        s.program_block(&chunk, 0).unwrap();
        s.verify_block(&chunk, 0).unwrap();
        assert!(sim.commands().contains(&"M 0 1073742336 1024".to_string()));
    }

    #[test]
    fn test_verify_block_mismatch_is_an_error() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);
        s.set_echo(false).unwrap();

        s.program_block(&[0x55u8; 1024], 0).unwrap();
        let err = s.verify_block(&[0xAAu8; 1024], 0).unwrap_err();
        assert!(matches!(err, IspError::UnexpectedResponse { .. }));
        assert!(!s.is_connected());
    }

    #[test]
    fn test_verify_block_short_chunk_compares_declared_length() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);
        s.set_echo(false).unwrap();

        let image = vec![0x5Au8; 1024];
        s.program_block(&image, 0).unwrap();
        s.verify_block(&image[64..], 64).unwrap();
        assert!(sim.commands().contains(&"M 64 1073742336 960".to_string()));
    }

    #[test]
    fn test_set_baud_rate_retunes_host() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        s.set_baud_rate(19200).unwrap();
        assert_eq!(sim.commands(), vec!["B 19200 1"]);
        assert_eq!(sim.host_baud(), Some(19200));
    }

    #[test]
    fn test_deinit_releases_reset_once() {
        let sim = SimTarget::new(PART_ID_LPC2148);
        let mut s = connected_session(&sim);

        s.deinit().unwrap();
        s.deinit().unwrap();
        assert_eq!(sim.reset_pulses(), 2); // connect + one release
        assert!(!s.is_connected());
    }
}
