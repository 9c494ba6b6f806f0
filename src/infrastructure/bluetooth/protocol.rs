//! Peripheral addressing helpers
//!
//! Parsing for the textual identifiers kept in settings.

use crate::infrastructure::bluetooth::link::LinkError;

/// Parse a colon separated MAC address ("8D:3E:BD:BE:13:3E") into the
/// 48-bit integer form used by the Bluetooth stack
pub fn parse_address(address: &str) -> Result<u64, LinkError> {
    let invalid = || LinkError::InvalidAddress(address.to_string());

    let octets: Vec<&str> = address.trim().split(':').collect();
    if octets.len() != 6 {
        return Err(invalid());
    }

    octets.iter().try_fold(0u64, |acc, octet| {
        if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let value = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
        Ok((acc << 8) | value as u64)
    })
}

/// Inverse of [`parse_address`], for log output
pub fn format_address(address: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02X}", (address >> (i * 8)) & 0xFF))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a UUID string into a Windows GUID
#[cfg(windows)]
pub fn parse_uuid(uuid_str: &str) -> Result<windows::core::GUID, LinkError> {
    let invalid = || LinkError::InvalidUuid(uuid_str.to_string());
    let hex = uuid_str.replace('-', "");

    if hex.len() != 32 || !hex.is_ascii() {
        return Err(invalid());
    }

    let d1 = u32::from_str_radix(&hex[0..8], 16).map_err(|_| invalid())?;
    let d2 = u16::from_str_radix(&hex[8..12], 16).map_err(|_| invalid())?;
    let d3 = u16::from_str_radix(&hex[12..16], 16).map_err(|_| invalid())?;

    let mut d4 = [0u8; 8];
    for (i, byte) in d4.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[16 + i * 2..18 + i * 2], 16).map_err(|_| invalid())?;
    }

    Ok(windows::core::GUID {
        data1: d1,
        data2: d2,
        data3: d3,
        data4: d4,
    })
}

/// Copy a notification value out of a WinRT buffer
#[cfg(windows)]
pub fn read_buffer(
    buffer: &windows::Storage::Streams::IBuffer,
) -> windows::core::Result<Vec<u8>> {
    let reader = windows::Storage::Streams::DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}
