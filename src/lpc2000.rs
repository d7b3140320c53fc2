//! Target description for the LPC2000 ISP boot ROM.

/// Part identification codes as reported by the `J` command, after masking.
pub const PART_ID_LPC2141: u32 = 196353;
pub const PART_ID_LPC2142: u32 = 196369;
pub const PART_ID_LPC2144: u32 = 196370;
pub const PART_ID_LPC2146: u32 = 196387;
pub const PART_ID_LPC2148: u32 = 196389;

/// The boot ROM pads the `J` reply with bits the datasheet does not
/// document; only the low 20 bits identify the part.
pub const PART_ID_MASK: u32 = 0x000F_FFFF;

/// Code word for the `U` command that enables flash write/erase.
pub const UNLOCK_CODE: u32 = 23130;

/// Flash is written in 1024-byte blocks, staged through RAM as two
/// 512-byte halves.
pub const BLOCK_SIZE: usize = 1024;
pub const HALF_BLOCK_SIZE: usize = 512;

/// On-chip RAM windows used to stage the two halves of a block. The first
/// window doubles as the source address of the `C` (copy-to-flash) and `M`
/// (compare) commands.
pub const RAM_STAGE_FIRST: u32 = 0x4000_0200;
pub const RAM_STAGE_SECOND: u32 = 0x4000_0400;

/// The interrupt vector table occupies the first 8 words; word 5 holds the
/// checksum the boot ROM validates before running user code.
pub const VECTOR_TABLE_WORDS: usize = 8;
pub const VECTOR_CHECKSUM_WORD: usize = 5;
pub const VECTOR_TABLE_SIZE: usize = VECTOR_TABLE_WORDS * 4;

/// Bytes excluded from comparison in the first verify block. The region
/// covers the patched vector table and is checked separately.
pub const VERIFY_SKIP: usize = 64;

/// Largest image any supported part can hold (512 KiB flash).
pub const MAX_IMAGE_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Lpc2141,
    Lpc2142,
    Lpc2144,
    Lpc2146,
    Lpc2148,
}

impl Part {
    pub fn from_part_id(id: u32) -> Option<Self> {
        match id {
            PART_ID_LPC2141 => Some(Part::Lpc2141),
            PART_ID_LPC2142 => Some(Part::Lpc2142),
            PART_ID_LPC2144 => Some(Part::Lpc2144),
            PART_ID_LPC2146 => Some(Part::Lpc2146),
            PART_ID_LPC2148 => Some(Part::Lpc2148),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Part::Lpc2141 => "LPC2141",
            Part::Lpc2142 => "LPC2142",
            Part::Lpc2144 => "LPC2144",
            Part::Lpc2146 => "LPC2146",
            Part::Lpc2148 => "LPC2148",
        }
    }

    /// Index of the last flash sector, as used by the `P`, `E` and `I`
    /// commands (`P 0 <n>` touches sectors 0..=n).
    pub fn last_sector(self) -> u32 {
        match self {
            Part::Lpc2141 => 7,
            Part::Lpc2142 => 8,
            Part::Lpc2144 => 10,
            Part::Lpc2146 => 14,
            Part::Lpc2148 => 26,
        }
    }
}
