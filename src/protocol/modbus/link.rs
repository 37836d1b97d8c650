use anyhow::{anyhow, Context, Result};
use std::{
    io::Write,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use super::{
    generate_pull_get_holdings_request, generate_pull_set_holdings_request,
    parse_pull_get_holdings, parse_pull_set_holdings, read_modbus_frame,
};
use crate::core::error::MpsError;

/// Holding-register access to one Modbus device.
///
/// Every failed transfer closes the link; the next call after `connect`
/// starts from a fresh socket.
pub trait RegisterLink: Send {
    fn endpoint(&self) -> String;

    fn connect(&mut self) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn read_holdings(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    fn write_holdings(&mut self, start: u16, values: &[u16]) -> Result<()>;

    fn write_holding(&mut self, address: u16, value: u16) -> Result<()> {
        self.write_holdings(address, &[value])
    }
}

impl<T: RegisterLink + ?Sized> RegisterLink for Box<T> {
    fn endpoint(&self) -> String {
        (**self).endpoint()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read_holdings(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        (**self).read_holdings(start, count)
    }

    fn write_holdings(&mut self, start: u16, values: &[u16]) -> Result<()> {
        (**self).write_holdings(start, values)
    }
}

/// Modbus/TCP link over a blocking `TcpStream`.
pub struct TcpLink {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpLink {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
            stream: None,
        }
    }

    fn transfer(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let endpoint = self.endpoint();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MpsError::connection(&endpoint, "not connected"))?;

        let result = stream
            .write_all(request)
            .and_then(|_| stream.flush())
            .map_err(anyhow::Error::from)
            .and_then(|_| read_modbus_frame(stream));

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                self.close();
                Err(MpsError::connection(&endpoint, format!("{err:#}")).into())
            }
        }
    }
}

impl RegisterLink for TcpLink {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connect(&mut self) -> Result<()> {
        self.close();
        let endpoint = self.endpoint();
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {endpoint}"))?
            .next()
            .ok_or_else(|| anyhow!("No address found for {endpoint}"))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|err| MpsError::connection(&endpoint, err))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        log::info!("Modbus link to {endpoint} opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::debug!("Modbus link to {} closed", self.endpoint());
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read_holdings(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let (request, raw) = generate_pull_get_holdings_request(self.unit_id, start, count)?;
        let response = self.transfer(&raw)?;
        let values = parse_pull_get_holdings(&request, &response)
            .with_context(|| format!("Bad response reading {count} holdings at {start:#06x}"))?;
        if values.len() < count as usize {
            return Err(anyhow!(
                "Expected {count} holdings at {start:#06x}, got {}",
                values.len()
            ));
        }
        Ok(values)
    }

    fn write_holdings(&mut self, start: u16, values: &[u16]) -> Result<()> {
        let (request, raw) = generate_pull_set_holdings_request(self.unit_id, start, values)?;
        let response = self.transfer(&raw)?;
        parse_pull_set_holdings(&request, &response)
            .with_context(|| format!("Bad response writing holdings at {start:#06x}"))
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}
