//! User-facing workflows: each one opens with the same preamble the legacy
//! tool used (synchronize, set crystal, disable echo), runs its steps, and
//! releases the target. Any failed step aborts the remaining ones; a
//! partially programmed chip is a possible outcome and destructive
//! workflows go through a confirmation callback first.

use thiserror::Error;

use crate::hex::HexError;
use crate::isp::{IspError, IspSession};
use crate::lpc2000::{self, Part};
use crate::operation::OperationEvent;
use crate::transport::{self, TransportError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlashErrorKind {
    NoPort,
    AmbiguousPort,
    InvalidHex,
    BadImage,
    Aborted,
    TimeOut,
    Protocol,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("no serial ports detected")]
    NoPorts,

    #[error("multiple serial ports detected ({count}); pass --port")]
    AmbiguousPort { count: usize },

    #[error("port discovery failed: {source}")]
    DiscoveryFailed {
        #[source]
        source: TransportError,
    },

    #[error("invalid HEX: {source}")]
    InvalidHex {
        #[source]
        source: HexError,
    },

    #[error("firmware image is empty")]
    EmptyImage,

    #[error("firmware image is only {len} bytes")]
    ImageTooSmall { len: usize },

    #[error("aborted")]
    Aborted,

    #[error("{step} failed: {source}")]
    Isp {
        step: &'static str,
        #[source]
        source: IspError,
    },
}

impl FlashError {
    pub fn kind(&self) -> FlashErrorKind {
        match self {
            FlashError::NoPorts => FlashErrorKind::NoPort,
            FlashError::AmbiguousPort { .. } => FlashErrorKind::AmbiguousPort,
            FlashError::DiscoveryFailed { .. } => FlashErrorKind::Unexpected,
            FlashError::InvalidHex { .. } => FlashErrorKind::InvalidHex,
            FlashError::EmptyImage | FlashError::ImageTooSmall { .. } => FlashErrorKind::BadImage,
            FlashError::Aborted => FlashErrorKind::Aborted,
            FlashError::Isp { source, .. } => match source {
                IspError::Timeout(_) => FlashErrorKind::TimeOut,
                IspError::Transport(TransportError::Open { .. }) => FlashErrorKind::NoPort,
                _ => FlashErrorKind::Protocol,
            },
        }
    }
}

fn step(step: &'static str, source: IspError) -> FlashError {
    FlashError::Isp { step, source }
}

/// Enumerate serial ports and settle on one, emitting discovery events.
/// An explicit `preferred` name always wins; otherwise a single detected
/// port is selected automatically.
pub fn discover_port<E>(preferred: Option<&str>, on_event: &mut E) -> Result<String, FlashError>
where
    E: FnMut(OperationEvent),
{
    if let Some(name) = preferred {
        on_event(OperationEvent::PortSelected {
            name: name.to_string(),
        });
        return Ok(name.to_string());
    }

    on_event(OperationEvent::DiscoverStart);
    let ports = transport::detect_ports().map_err(|e| FlashError::DiscoveryFailed { source: e })?;
    for (index, name) in ports.iter().enumerate() {
        on_event(OperationEvent::PortDetected {
            index,
            name: name.clone(),
        });
    }
    on_event(OperationEvent::DiscoverDone { count: ports.len() });

    let name = select_port(&ports)?;
    on_event(OperationEvent::PortSelected { name: name.clone() });
    Ok(name)
}

fn select_port(ports: &[String]) -> Result<String, FlashError> {
    match ports {
        [] => Err(FlashError::NoPorts),
        [only] => Ok(only.clone()),
        many => Err(FlashError::AmbiguousPort { count: many.len() }),
    }
}

/// Overwrite vector-table word 5 with the two's complement of the sum of
/// the other seven words, so all eight sum to zero modulo 2^32. The boot
/// ROM validates this before it will run the image. The image must cover
/// the vector table.
pub fn patch_vector_checksum(image: &mut [u8]) {
    let mut signature: u32 = 0;
    let table = &image[..lpc2000::VECTOR_TABLE_SIZE];
    for (w, word) in table.chunks_exact(4).enumerate() {
        if w != lpc2000::VECTOR_CHECKSUM_WORD {
            signature =
                signature.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }
    }
    let at = lpc2000::VECTOR_CHECKSUM_WORD * 4;
    image[at..at + 4].copy_from_slice(&signature.wrapping_neg().to_le_bytes());
}

/// Erase the chip and program `image` into it, last block first. The
/// vector checksum is patched into the image in place before programming.
pub fn program_image<C, E>(
    session: &mut IspSession,
    image: &mut [u8],
    crystal_khz: u32,
    confirm: C,
    mut on_event: E,
) -> Result<(), FlashError>
where
    C: FnOnce() -> bool,
    E: FnMut(OperationEvent),
{
    check_image(image, lpc2000::VECTOR_TABLE_SIZE)?;
    if !confirm() {
        return Err(FlashError::Aborted);
    }

    setup(session, crystal_khz, &mut on_event)?;

    on_event(OperationEvent::EraseStart);
    session.chip_erase().map_err(|e| step("chip erase", e))?;
    on_event(OperationEvent::EraseDone);

    patch_vector_checksum(image);

    let total = image.len().div_ceil(lpc2000::BLOCK_SIZE);
    for (index, block) in (0..total).rev().enumerate() {
        let start = block * lpc2000::BLOCK_SIZE;
        let end = (start + lpc2000::BLOCK_SIZE).min(image.len());
        on_event(OperationEvent::ProgramBlock {
            index,
            total,
            offset: start,
        });
        session
            .program_block(&image[start..end], start as u32)
            .map_err(|e| step("program block", e))?;
    }

    session.deinit().map_err(|e| step("release target", e))?;
    on_event(OperationEvent::Done);
    Ok(())
}

/// Compare `image` against flash, first block first. The image gets the
/// same checksum patch programming applies, and the first block skips the
/// vector-table region: bytes `[64, 1024)` are compared against flash
/// offset 64.
pub fn verify_image<E>(
    session: &mut IspSession,
    image: &mut [u8],
    crystal_khz: u32,
    mut on_event: E,
) -> Result<(), FlashError>
where
    E: FnMut(OperationEvent),
{
    check_image(image, lpc2000::VERIFY_SKIP + 1)?;

    setup(session, crystal_khz, &mut on_event)?;
    session.unlock().map_err(|e| step("unlock", e))?;

    patch_vector_checksum(image);

    let total = image.len().div_ceil(lpc2000::BLOCK_SIZE);
    for block in 0..total {
        let start = block * lpc2000::BLOCK_SIZE;
        let end = (start + lpc2000::BLOCK_SIZE).min(image.len());
        let (chunk, offset) = if block == 0 {
            (&image[lpc2000::VERIFY_SKIP..end], lpc2000::VERIFY_SKIP)
        } else {
            (&image[start..end], start)
        };
        on_event(OperationEvent::VerifyBlock {
            index: block,
            total,
            offset,
        });
        session
            .verify_block(chunk, offset as u32)
            .map_err(|e| step("verify block", e))?;
    }

    session.deinit().map_err(|e| step("release target", e))?;
    on_event(OperationEvent::Done);
    Ok(())
}

/// Read the part ID and map it to a chip label.
pub fn read_identity<E>(
    session: &mut IspSession,
    crystal_khz: u32,
    mut on_event: E,
) -> Result<String, FlashError>
where
    E: FnMut(OperationEvent),
{
    setup(session, crystal_khz, &mut on_event)?;
    let id = session.read_part_id().map_err(|e| step("read part id", e))?;
    session.deinit().map_err(|e| step("release target", e))?;

    Ok(match Part::from_part_id(id) {
        Some(part) => part.name().to_string(),
        None => format!("unknown chip({id})"),
    })
}

/// Read the boot code version string.
pub fn read_boot_version<E>(
    session: &mut IspSession,
    crystal_khz: u32,
    mut on_event: E,
) -> Result<String, FlashError>
where
    E: FnMut(OperationEvent),
{
    setup(session, crystal_khz, &mut on_event)?;
    let version = session
        .read_boot_code_version()
        .map_err(|e| step("read boot code version", e))?;
    session.deinit().map_err(|e| step("release target", e))?;
    Ok(version)
}

/// Erase the whole chip.
pub fn erase_chip<C, E>(
    session: &mut IspSession,
    crystal_khz: u32,
    confirm: C,
    mut on_event: E,
) -> Result<(), FlashError>
where
    C: FnOnce() -> bool,
    E: FnMut(OperationEvent),
{
    if !confirm() {
        return Err(FlashError::Aborted);
    }

    setup(session, crystal_khz, &mut on_event)?;
    on_event(OperationEvent::EraseStart);
    session.chip_erase().map_err(|e| step("chip erase", e))?;
    on_event(OperationEvent::EraseDone);
    session.deinit().map_err(|e| step("release target", e))?;
    on_event(OperationEvent::Done);
    Ok(())
}

/// Blank-check the chip (sector 0 excluded).
pub fn blank_check<E>(
    session: &mut IspSession,
    crystal_khz: u32,
    mut on_event: E,
) -> Result<bool, FlashError>
where
    E: FnMut(OperationEvent),
{
    setup(session, crystal_khz, &mut on_event)?;
    let blank = session.blank_check().map_err(|e| step("blank check", e))?;
    session.deinit().map_err(|e| step("release target", e))?;
    Ok(blank)
}

fn check_image(image: &[u8], min: usize) -> Result<(), FlashError> {
    if image.is_empty() {
        return Err(FlashError::EmptyImage);
    }
    if image.len() < min {
        return Err(FlashError::ImageTooSmall { len: image.len() });
    }
    Ok(())
}

fn setup<E>(
    session: &mut IspSession,
    crystal_khz: u32,
    on_event: &mut E,
) -> Result<(), FlashError>
where
    E: FnMut(OperationEvent),
{
    session.connect().map_err(|e| step("synchronize", e))?;
    on_event(OperationEvent::Connected);

    session
        .set_crystal(crystal_khz)
        .map_err(|e| step("set crystal value", e))?;
    on_event(OperationEvent::CrystalSet { khz: crystal_khz });

    session.set_echo(false).map_err(|e| step("disable echo", e))?;
    on_event(OperationEvent::EchoDisabled);
    Ok(())
}
