use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::lpc2000;

/// One record of an Intel HEX file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexRecord {
    address: u16,
    rec_type: u8,
    data: Vec<u8>,
}

/// A validated Intel HEX file, kept as records until an image is assembled.
pub struct HexFile {
    records: Vec<HexRecord>,
}

#[derive(Error, Debug)]
pub enum HexError {
    #[error("io: {0}")]
    Io(io::Error),

    #[error("input is not a text Intel HEX file (invalid UTF-8 at line {line_no})")]
    NotText { line_no: usize },

    #[error("invalid hex line {line_no}: {msg}")]
    InvalidLine { line_no: usize, msg: String },

    #[error("invalid checksum at line {line_no}")]
    InvalidChecksum { line_no: usize },

    #[error("file contains no records")]
    NoRecords,

    #[error("file does not end with an end-of-file record")]
    MissingTerminator,

    #[error("extended linear address record with a {len}-byte payload")]
    BadExtendedAddress { len: usize },

    #[error("unsupported record type 0x{rec_type:02X}")]
    UnsupportedRecordType { rec_type: u8 },

    #[error("image extends to 0x{end:X}, beyond the {max}-byte flash", max = lpc2000::MAX_IMAGE_SIZE)]
    ImageTooLarge { end: usize },
}

impl HexFile {
    /// Parse and validate `path`. Any malformed line rejects the whole file.
    pub fn load(path: &Path) -> Result<Self, HexError> {
        let f = File::open(path).map_err(HexError::Io)?;
        let r = BufReader::new(f);

        let mut records: Vec<HexRecord> = Vec::new();

        for (line_no, line) in r.lines().enumerate() {
            let line_no = line_no + 1;
            let line = match line {
                Ok(s) => s,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(HexError::NotText { line_no });
                }
                Err(e) => return Err(HexError::Io(e)),
            };
            let line = line.trim_end_matches('\r');

            records.push(parse_record(line, line_no)?);
        }

        let last = records.last().ok_or(HexError::NoRecords)?;
        if last.rec_type != 0x01 || last.address != 0 || !last.data.is_empty() {
            return Err(HexError::MissingTerminator);
        }

        Ok(Self { records })
    }

    /// Replay the records into a flat image. Type-0 data lands at the
    /// record address plus the running high page set by type-4 records;
    /// unwritten gaps read as erased flash (0xFF).
    pub fn image(&self) -> Result<Vec<u8>, HexError> {
        let mut image: Vec<u8> = Vec::new();
        let mut page: u16 = 0;

        for rec in &self.records {
            match rec.rec_type {
                0x00 => {
                    let pos = ((page as usize) << 16) + rec.address as usize;
                    let end = pos + rec.data.len();
                    if end > lpc2000::MAX_IMAGE_SIZE {
                        return Err(HexError::ImageTooLarge { end });
                    }
                    if end > image.len() {
                        image.resize(end, 0xFF);
                    }
                    image[pos..end].copy_from_slice(&rec.data);
                }
                0x01 => {}
                0x04 => {
                    if rec.data.len() != 2 {
                        return Err(HexError::BadExtendedAddress {
                            len: rec.data.len(),
                        });
                    }
                    page = u16::from_be_bytes([rec.data[0], rec.data[1]]);
                }
                0x05 => {
                    // Start linear address; carries no data for flashing.
                }
                other => {
                    return Err(HexError::UnsupportedRecordType { rec_type: other });
                }
            }
        }

        Ok(image)
    }
}

/// Load `path` and assemble its image in one step.
pub fn load_image(path: &Path) -> Result<Vec<u8>, HexError> {
    HexFile::load(path)?.image()
}

fn parse_record(line: &str, line_no: usize) -> Result<HexRecord, HexError> {
    let invalid = |msg: &str| HexError::InvalidLine {
        line_no,
        msg: msg.to_string(),
    };

    if !line.is_ascii() {
        return Err(invalid("non-ASCII character"));
    }
    if !line.starts_with(':') {
        return Err(invalid("missing ':' prefix"));
    }
    if line.len() < 11 {
        return Err(invalid("record too short"));
    }
    if line.len() % 2 == 0 {
        return Err(invalid("odd number of hex digits"));
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32, HexError> {
        u32::from_str_radix(&line[range], 16).map_err(|_| invalid("invalid hex digit"))
    };

    let size = field(1..3)? as usize;
    if line.len() != 11 + 2 * size {
        return Err(invalid(&format!(
            "declared {size} data bytes but line holds {}",
            (line.len() - 11) / 2
        )));
    }

    let address = field(3..7)? as u16;
    let rec_type = field(7..9)? as u8;

    let mut data = Vec::with_capacity(size);
    for c in 0..size {
        data.push(field(9 + 2 * c..11 + 2 * c)? as u8);
    }

    // Two's complement of everything between ':' and the checksum field
    // must equal the transmitted checksum byte.
    let mut sum: u8 = 0;
    for c in 0..(line.len() - 3) / 2 {
        sum = sum.wrapping_add(field(1 + 2 * c..3 + 2 * c)? as u8);
    }
    let checksum = field(line.len() - 2..line.len())? as u8;
    if sum.wrapping_neg() != checksum {
        return Err(HexError::InvalidChecksum { line_no });
    }

    Ok(HexRecord {
        address,
        rec_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::NamedTempFile;

    fn ihex_record(addr: u16, rec_type: u8, payload: &[u8]) -> String {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(&addr.to_be_bytes());
        bytes.push(rec_type);
        bytes.extend_from_slice(payload);
        let sum: u8 = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        bytes.push(sum.wrapping_neg());

        let mut s = String::from(":");
        for b in bytes {
            s.push_str(&format!("{b:02X}"));
        }
        s
    }

    fn write_file(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    fn eof() -> String {
        ihex_record(0, 0x01, &[])
    }

    #[test]
    fn test_two_byte_image() {
        let content = format!("{}\r\n{}\r\n", ihex_record(0, 0x00, &[0xDE, 0xAD]), eof());
        let f = write_file(&content);

        let image = load_image(f.path()).unwrap();
        assert_eq!(image, vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_terminator_alone_is_an_empty_image() {
        let f = write_file(&format!("{}\n", eof()));

        let hex = HexFile::load(f.path()).unwrap();
        assert!(hex.image().unwrap().is_empty());
    }

    #[test]
    fn test_gap_between_records_reads_as_erased_flash() {
        let content = format!(
            "{}\n{}\n{}\n",
            ihex_record(0, 0x00, &[0x01]),
            ihex_record(4, 0x00, &[0x02]),
            eof()
        );
        let f = write_file(&content);

        assert_eq!(
            load_image(f.path()).unwrap(),
            vec![0x01, 0xFF, 0xFF, 0xFF, 0x02]
        );
    }

    #[test]
    fn test_extended_linear_address_offsets_data() {
        let content = format!(
            "{}\n{}\n{}\n",
            ihex_record(0, 0x04, &[0x00, 0x01]),
            ihex_record(0x0010, 0x00, &[0xAA]),
            eof()
        );
        let f = write_file(&content);

        let image = load_image(f.path()).unwrap();
        assert_eq!(image.len(), 0x10011);
        assert_eq!(image[0x10010], 0xAA);
        assert_eq!(image[0x0FFFF], 0xFF);
    }

    #[test]
    fn test_start_address_record_is_ignored() {
        let content = format!(
            "{}\n{}\n{}\n",
            ihex_record(0, 0x05, &[0x00, 0x00, 0x01, 0x04]),
            ihex_record(0, 0x00, &[0x7B]),
            eof()
        );
        let f = write_file(&content);

        assert_eq!(load_image(f.path()).unwrap(), vec![0x7B]);
    }

    #[test]
    fn test_rejects_missing_colon() {
        let f = write_file(&format!("00000001FF\n{}\n", eof()));
        assert!(matches!(
            HexFile::load(f.path()),
            Err(HexError::InvalidLine { line_no: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        // Declares 4 data bytes, carries 2.
        let f = write_file(&format!(":040000001234BE\n{}\n", eof()));
        assert!(matches!(
            HexFile::load(f.path()),
            Err(HexError::InvalidLine { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let f = write_file(&format!(":02000000DEAD00\n{}\n", eof()));
        assert!(matches!(
            HexFile::load(f.path()),
            Err(HexError::InvalidChecksum { line_no: 1 })
        ));
    }

    #[test]
    fn test_rejects_odd_digit_count() {
        let f = write_file(&format!(":020000001234B\n{}\n", eof()));
        assert!(matches!(
            HexFile::load(f.path()),
            Err(HexError::InvalidLine { .. })
        ));
    }

    #[test]
    fn test_rejects_non_hex_field() {
        let f = write_file(&format!(":01000000XXFF\n{}\n", eof()));
        assert!(matches!(
            HexFile::load(f.path()),
            Err(HexError::InvalidLine { .. })
        ));
    }

    #[test]
    fn test_rejects_file_without_terminator() {
        let f = write_file(&format!("{}\n", ihex_record(0, 0x00, &[0x01])));
        assert!(matches!(
            HexFile::load(f.path()),
            Err(HexError::MissingTerminator)
        ));
    }

    #[test]
    fn test_rejects_empty_file() {
        let f = write_file("");
        assert!(matches!(HexFile::load(f.path()), Err(HexError::NoRecords)));
    }

    #[test]
    fn test_bad_extended_address_payload() {
        let content = format!("{}\n{}\n", ihex_record(0, 0x04, &[0x01]), eof());
        let f = write_file(&content);

        let hex = HexFile::load(f.path()).unwrap();
        assert!(matches!(
            hex.image(),
            Err(HexError::BadExtendedAddress { len: 1 })
        ));
    }

    #[test]
    fn test_unsupported_record_type() {
        let content = format!("{}\n{}\n", ihex_record(0, 0x03, &[0, 0, 0, 0]), eof());
        let f = write_file(&content);

        let hex = HexFile::load(f.path()).unwrap();
        assert!(matches!(
            hex.image(),
            Err(HexError::UnsupportedRecordType { rec_type: 0x03 })
        ));
    }
}
