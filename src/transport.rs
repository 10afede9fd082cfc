//! Request/response channels between a session and a server.

use crate::error::{ClientError, Result};
use crate::protocol::{Envelope, Response};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

/// A blocking request/response channel.
///
/// One request is in flight at a time; `exchange` returns only once the
/// matching response has been read.
pub trait Transport {
    fn exchange(&mut self, envelope: &Envelope) -> Result<Response>;
}

/// JSON lines over a TCP connection.
pub struct TcpTransport {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TcpTransport {
    /// Connect to `address` (host:port) with the given read/write timeout.
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .map_err(|e| ClientError::Transport(format!("failed to connect to {}: {}", address, e)))?;

        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        let reader = BufReader::new(stream.try_clone()?);
        log::debug!("Connected to {}", address);
        Ok(Self { writer: stream, reader })
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, envelope: &Envelope) -> Result<Response> {
        let request_json = serde_json::to_string(envelope)?;
        writeln!(self.writer, "{}", request_json)?;
        self.writer.flush()?;

        let mut response_line = String::new();
        let read = self.reader.read_line(&mut response_line)?;
        if read == 0 {
            return Err(ClientError::Transport("connection closed by server".to_string()));
        }

        let response: Response = serde_json::from_str(&response_line)?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;
    use std::net::TcpListener;
    use std::thread;

    fn ping() -> Envelope {
        Envelope {
            token: None,
            project: None,
            reason: None,
            request: Request::Ping,
        }
    }

    #[test]
    fn test_exchange_reads_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert!(line.contains("Ping"));
            let mut writer = stream;
            writeln!(writer, "{}", serde_json::to_string(&Response::Pong).unwrap()).unwrap();
        });

        let mut transport = TcpTransport::connect(&address, Duration::from_secs(5)).unwrap();
        let response = transport.exchange(&ping()).unwrap();
        assert!(matches!(response, Response::Pong));
        server.join().unwrap();
    }

    #[test]
    fn test_closed_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            drop(reader);
            drop(stream);
        });

        let mut transport = TcpTransport::connect(&address, Duration::from_secs(5)).unwrap();
        let err = transport.exchange(&ping()).unwrap_err();
        server.join().unwrap();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::connect(&address, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
