//! The socket filename grammar (spec.md §4.6.1):
//! `<name>.<slot>.<suffix>`, name and slot both non-empty, slot all digits.

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub name: String,
    pub slot: u32,
}

pub fn parse(filename: &str, suffix: &str) -> Result<ParsedFilename, ProtocolError> {
    let parts: Vec<&str> = filename.split('.').collect();
    let [name, slot_str, suf] = parts[..] else {
        return Err(ProtocolError::MalformedFilename);
    };
    if name.is_empty() {
        return Err(ProtocolError::EmptyName);
    }
    if suf != suffix {
        return Err(ProtocolError::WrongSuffix);
    }
    if slot_str.is_empty() || !slot_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidSlot);
    }
    let slot: u32 = slot_str.parse().map_err(|_| ProtocolError::InvalidSlot)?;
    Ok(ParsedFilename { name: name.to_string(), slot })
}

pub fn format(name: &str, slot: u32, suffix: &str) -> String {
    format!("{name}.{slot}.{suffix}")
}
