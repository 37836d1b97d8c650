use anyhow::{anyhow, Result};
use std::io::Read;

use super::parse_modbus_header;

/// Read one complete Modbus/TCP response frame (MBAP header included).
pub fn read_modbus_frame(stream: &mut impl Read) -> Result<Vec<u8>> {
    let mut header_buf = [0u8; 6];
    stream.read_exact(&mut header_buf)?;

    let len = parse_modbus_header(header_buf)?;
    if len <= header_buf.len() {
        return Err(anyhow!("Malformed Modbus header: {:02x?}", header_buf));
    }

    let mut full_buf = vec![0u8; len];
    full_buf[..6].copy_from_slice(&header_buf);
    stream.read_exact(&mut full_buf[6..])?;
    log::trace!(
        "Received Modbus frame: {}",
        full_buf
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    );
    Ok(full_buf)
}
