use anyhow::Result;

use rmodbus::{guess_response_frame_len, ModbusProto};

/// Total frame length announced by a Modbus/TCP MBAP header.
pub fn parse_modbus_header(buf: [u8; 6]) -> Result<usize> {
    Ok(guess_response_frame_len(&buf, ModbusProto::TcpUdp)? as usize)
}
