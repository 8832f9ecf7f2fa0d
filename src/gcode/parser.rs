//! Word-level tokenizer for one normalized G-code line.
//!
//! Input is assumed already framed: trimmed, uppercased, comment-free. The
//! grammar is `LINE := WORD*`, `WORD := LETTER NUMBER`, with whitespace
//! permitted between words and between a letter and its number. G and M
//! take integers; the coordinate and parameter words take signed decimal
//! floats. Letters outside the supported set are skipped up to the next
//! whitespace, matching the tolerant behavior hosts expect.

use super::{GcodeBlock, GcodeError};

/// Parse a line into a block. An empty line yields an empty block.
pub fn parse_line(line: &str) -> Result<GcodeBlock, GcodeError> {
    let mut block = GcodeBlock::default();
    let bytes = line.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let letter = bytes[pos].to_ascii_uppercase();
        pos += 1;

        match letter {
            b'G' => block.g = Some(scan_int(bytes, &mut pos, "G number")?),
            b'M' => block.m = Some(scan_int(bytes, &mut pos, "M number")?),
            b'X' => block.x = Some(scan_float(bytes, &mut pos, "X value")?),
            b'Y' => block.y = Some(scan_float(bytes, &mut pos, "Y value")?),
            b'I' => block.i = Some(scan_float(bytes, &mut pos, "I value")?),
            b'J' => block.j = Some(scan_float(bytes, &mut pos, "J value")?),
            b'R' => block.r = Some(scan_float(bytes, &mut pos, "R value")?),
            b'F' => block.f = Some(scan_float(bytes, &mut pos, "F value")?),
            b'S' => block.s = Some(scan_float(bytes, &mut pos, "S value")?),
            b'P' => block.p = Some(scan_float(bytes, &mut pos, "P value")?),
            _ => {
                // Unrecognized word: skip its remainder.
                while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
                    pos += 1;
                }
            }
        }
    }

    Ok(block)
}

fn scan_int(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<i32, GcodeError> {
    while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    let start = *pos;
    if *pos < bytes.len() && (bytes[*pos] == b'-' || bytes[*pos] == b'+') {
        *pos += 1;
    }
    let digits_start = *pos;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
    }
    if *pos == digits_start {
        return Err(GcodeError::InvalidParam(what));
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(GcodeError::InvalidParam(what))
}

fn scan_float(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<f64, GcodeError> {
    while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    let start = *pos;
    if *pos < bytes.len() && (bytes[*pos] == b'-' || bytes[*pos] == b'+') {
        *pos += 1;
    }
    let mut digits = 0;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
        *pos += 1;
        digits += 1;
    }
    if *pos < bytes.len() && bytes[*pos] == b'.' {
        *pos += 1;
        while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
            *pos += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return Err(GcodeError::InvalidParam(what));
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(GcodeError::InvalidParam(what))
}
