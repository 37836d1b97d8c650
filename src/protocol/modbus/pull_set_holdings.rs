use anyhow::Result;

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Build a frame writing a block of holding registers (function 0x10)
pub fn generate_pull_set_holdings_request(
    unit_id: u8,
    start_address: u16,
    values: &[u16],
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    let mut raw = Vec::new();
    request.generate_set_holdings_bulk(start_address, values, &mut raw)?;
    Ok((request, raw))
}

pub fn parse_pull_set_holdings(request: &ModbusRequest, response: &[u8]) -> Result<()> {
    request.parse_ok(response)?;
    Ok(())
}
