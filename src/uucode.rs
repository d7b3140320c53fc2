//! UU-style transfer encoding used by the `W` (write-to-RAM) command.
//!
//! The boot ROM accepts binary data over the ASCII channel as uuencode-style
//! lines: up to 45 raw bytes per line, a `32 + length` prefix character, and
//! each 3-byte group expanded into four 6-bit fields. A zero field is sent
//! as 0x60 (backtick) instead of space. After a transfer the host sends the
//! plain sum of the raw bytes in decimal; the target rejects the block if
//! its own sum differs.

/// Raw bytes carried per encoded line.
const LINE_PAYLOAD: usize = 45;

/// Encode `data` into transfer lines (without CRLF terminators).
pub fn encode(data: &[u8]) -> Vec<String> {
    let mut lines = Vec::with_capacity(data.len().div_ceil(LINE_PAYLOAD));

    for group in data.chunks(LINE_PAYLOAD) {
        let mut bytes = group.to_vec();

        // Pad to a 3-byte boundary. A full 45-byte line pads with zeros,
        // a short tail line pads with 0xFF (erased-flash filler).
        while bytes.len() % 3 != 0 {
            if group.len() == LINE_PAYLOAD {
                bytes.push(0x00);
            } else {
                bytes.push(0xFF);
            }
        }

        let mut line = String::with_capacity(1 + bytes.len() / 3 * 4);
        line.push((32 + group.len() as u8) as char);

        for triple in bytes.chunks_exact(3) {
            let fields = [
                (triple[0] >> 2) & 0x3F,
                ((triple[0] << 4) & 0x30) | ((triple[1] >> 4) & 0x0F),
                ((triple[1] << 2) & 0x3C) | ((triple[2] >> 6) & 0x03),
                triple[2] & 0x3F,
            ];
            for f in fields {
                line.push(if f == 0 { '`' } else { (f + 0x20) as char });
            }
        }

        lines.push(line);
    }

    lines
}

/// Plain unsigned sum of the raw bytes, transmitted in decimal after the
/// encoded lines. No modulus is applied.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().map(|b| u32::from(*b)).sum()
}
