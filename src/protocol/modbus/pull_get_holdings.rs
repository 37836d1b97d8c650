use anyhow::Result;

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Build a frame reading `count` holding registers (function 0x03)
pub fn generate_pull_get_holdings_request(
    unit_id: u8,
    start_address: u16,
    count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    let mut raw = Vec::new();
    request.generate_get_holdings(start_address, count, &mut raw)?;
    Ok((request, raw))
}

pub fn parse_pull_get_holdings(request: &ModbusRequest, response: &[u8]) -> Result<Vec<u16>> {
    let mut values = Vec::new();
    request.parse_u16(response, &mut values)?;
    Ok(values)
}
