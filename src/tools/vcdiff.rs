//! Zero-delta recognition over `xdelta3 printdelta` output.
//!
//! When the decoded flac matches the source wav byte for byte, the delta
//! consists of a single window that copies the whole source: no data
//! section, zero copy-window offset, window lengths equal to the file size,
//! and exactly one `CPY_0 <size> @0` instruction. Anything else means the
//! two reads of the medium disagreed.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZeroDeltaError {
    #[error("source filesize {expected} != target filesize {target}")]
    SizeMismatch { expected: u64, target: u64 },

    #[error("VCDIFF field '{field}' is '{got}', expected '{expected}'")]
    FieldMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("missing VCDIFF field '{0}'")]
    MissingField(String),

    #[error("missing instruction table header")]
    MissingInstructionHeader,

    #[error("expected a single 'CPY_0 {expected} @0' instruction, got '{got}'")]
    BadInstruction { expected: u64, got: String },

    #[error("unexpected trailing output: '{0}'")]
    TrailingOutput(String),
}

const INSTRUCTION_HEADER: &str = "Offset Code Type1 Size1 @Addr1 + Type2 Size2 @Addr2";

/// Check that sizes agree before even looking at the delta.
///
/// xdelta happily encodes a full copy of a truncated target, so a matching
/// delta over a short target would otherwise pass.
pub fn precheck_sizes(expected: u64, target: u64) -> Result<(), ZeroDeltaError> {
    if expected != target {
        return Err(ZeroDeltaError::SizeMismatch { expected, target });
    }
    Ok(())
}

/// Verify that `printdelta` output describes a zero-delta copy of
/// `size` bytes.
pub fn verify_zero_delta(output: &str, size: u64) -> Result<(), ZeroDeltaError> {
    let size_str = size.to_string();
    let mut required: Vec<(&str, String, bool)> = vec![
        ("VCDIFF header indicator", "VCD_APPHEADER".to_string(), false),
        ("VCDIFF copy window length", size_str.clone(), false),
        ("VCDIFF copy window offset", "0".to_string(), false),
        ("VCDIFF target window length", size_str.clone(), false),
        ("VCDIFF data section length", "0".to_string(), false),
    ];

    let mut lines = output.lines();

    // Header section: "key: value" lines until the instruction table.
    let mut header_line = None;
    for line in lines.by_ref() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            header_line = Some(line.to_string());
            break;
        };
        let (key, value) = (key.trim(), value.trim());
        if let Some(entry) = required.iter_mut().find(|(k, _, _)| *k == key) {
            if entry.2 || entry.1 != value {
                return Err(ZeroDeltaError::FieldMismatch {
                    field: key.to_string(),
                    expected: entry.1.clone(),
                    got: value.to_string(),
                });
            }
            entry.2 = true;
        }
    }

    if let Some((key, _, _)) = required.iter().find(|(_, _, seen)| !seen) {
        return Err(ZeroDeltaError::MissingField(key.to_string()));
    }

    match header_line.as_deref() {
        Some(line) if line.split_whitespace().eq(INSTRUCTION_HEADER.split_whitespace()) => {}
        _ => return Err(ZeroDeltaError::MissingInstructionHeader),
    }

    // The single copy instruction covering the full size.
    let expected_instr = format!("000000 019 CPY_0 {size} @0");
    match lines.next() {
        Some(line)
            if line.split_whitespace().eq(expected_instr.split_whitespace()) => {}
        other => {
            return Err(ZeroDeltaError::BadInstruction {
                expected: size,
                got: other.unwrap_or("").trim().to_string(),
            })
        }
    }

    // Nothing but blank lines may follow.
    for line in lines {
        if !line.trim().is_empty() {
            return Err(ZeroDeltaError::TrailingOutput(line.trim().to_string()));
        }
    }

    Ok(())
}
