use std::io::{self, BufRead, Write};
use std::time::Duration;

use lpc2000_loader::api::{self, FlashError, FlashErrorKind};
use lpc2000_loader::isp::{IspSession, SessionConfig};
use lpc2000_loader::transport::StopBits;

use crate::cli;
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub mod blank_check;
pub mod boot_version;
pub mod erase;
pub mod identify;
pub mod list;
pub mod program;
pub mod verify;

pub(crate) fn map_flash_error(e: &FlashError) -> i32 {
    match e.kind() {
        FlashErrorKind::NoPort => exit_codes::EXIT_NO_PORT,
        FlashErrorKind::AmbiguousPort => exit_codes::EXIT_AMBIGUOUS,
        FlashErrorKind::InvalidHex => exit_codes::EXIT_INVALID_HEX,
        FlashErrorKind::BadImage => exit_codes::EXIT_BAD_IMAGE,
        FlashErrorKind::Aborted => exit_codes::EXIT_ABORTED,
        FlashErrorKind::TimeOut => exit_codes::EXIT_TIMEOUT,
        FlashErrorKind::Protocol => exit_codes::EXIT_PROTOCOL,
        FlashErrorKind::Unexpected => exit_codes::EXIT_UNEXPECTED,
    }
}

pub(crate) fn fail(out: &mut dyn Reporter, e: &FlashError) -> i32 {
    let code = map_flash_error(e);
    out.emit(Event::Error {
        code,
        message: e.to_string(),
    });
    if code == exit_codes::EXIT_AMBIGUOUS {
        out.emit(Event::HintAmbiguousPorts);
    }
    code
}

/// Pick the port and open an (unsynchronized) session on it.
pub(crate) fn open_session(
    conn: &cli::ConnectionArgs,
    out: &mut dyn Reporter,
) -> Result<IspSession, i32> {
    let port = api::discover_port(conn.port.as_deref(), &mut |ev| {
        out.emit(Event::Operation(ev))
    })
    .map_err(|e| fail(out, &e))?;

    let config = SessionConfig {
        stop_bits: match conn.stop_bits {
            cli::StopBitsArg::One => StopBits::One,
            cli::StopBitsArg::Two => StopBits::Two,
        },
        response_timeout: Duration::from_millis(conn.response_timeout_ms),
    };

    IspSession::open(&port, config).map_err(|e| {
        let e = FlashError::Isp {
            step: "open serial port",
            source: e,
        };
        fail(out, &e)
    })
}

/// Interactive yes/no gate in front of destructive operations.
pub(crate) fn ask_confirmation(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    let _ = io::stderr().flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}
