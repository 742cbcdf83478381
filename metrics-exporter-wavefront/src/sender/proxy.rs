use std::{
    io::{self, Write as _},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use metrics_wavefront::{Centroid, Tags};
use tracing::{debug, trace};

use super::{Granularity, SendError, WavefrontSender};
use crate::formatting::LineWriter;

/// Proxy sender configuration.
#[derive(Clone, Debug)]
pub struct ProxyConfiguration {
    /// Resolved addresses of the proxy's metrics port.
    pub metrics_addrs: Vec<SocketAddr>,

    /// Resolved addresses of the proxy's distribution port.
    ///
    /// When equal to `metrics_addrs`, a single connection carries both.
    pub distribution_addrs: Vec<SocketAddr>,

    /// Timeout applied to connecting and to every write.
    pub write_timeout: Duration,
}

enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Not connected; the next send connects first.
    Disconnected,

    // Connected and ready to write lines.
    Ready(TcpStream),
}

struct Connection {
    addrs: Vec<SocketAddr>,
    write_timeout: Duration,
    state: ClientState,
}

impl Connection {
    fn new(addrs: Vec<SocketAddr>, write_timeout: Duration) -> Self {
        Self { addrs, write_timeout, state: ClientState::Disconnected }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in &self.addrs {
            match TcpStream::connect_timeout(addr, self.write_timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "Connected to Wavefront proxy.");
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no proxy address to connect to")
        }))
    }

    fn try_send(&mut self, payload: &[u8]) -> io::Result<()> {
        loop {
            let old_state = std::mem::replace(&mut self.state, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected => {
                    let stream = match self.connect() {
                        Ok(stream) => stream,
                        Err(e) => {
                            self.state = ClientState::Disconnected;
                            return Err(e);
                        }
                    };
                    self.state = ClientState::Ready(stream);
                }
                ClientState::Ready(mut stream) => {
                    let result = stream.write_all(payload);
                    if result.is_ok() {
                        self.state = ClientState::Ready(stream);
                    } else {
                        self.state = ClientState::Disconnected;
                    }

                    return result;
                }
            }
        }
    }

    fn disconnect(&mut self) {
        self.state = ClientState::Disconnected;
    }
}

/// Sends points to a Wavefront proxy over TCP.
///
/// Every point is written as soon as it is sent. When a write fails, the connection is dropped and
/// the next send reconnects.
pub struct ProxySender {
    metrics: Connection,

    // `None` when distributions share the metrics connection.
    distributions: Option<Connection>,

    writer: LineWriter,
    failures: u64,
    closed: bool,
}

impl ProxySender {
    /// Creates a new `ProxySender`.
    ///
    /// No connection is made until the first point is sent.
    pub fn new(config: ProxyConfiguration) -> Self {
        let distributions = (config.distribution_addrs != config.metrics_addrs)
            .then(|| Connection::new(config.distribution_addrs, config.write_timeout));

        Self {
            metrics: Connection::new(config.metrics_addrs, config.write_timeout),
            distributions,
            writer: LineWriter::new(),
            failures: 0,
            closed: false,
        }
    }

    fn write_buffered(&mut self, distribution: bool) -> Result<(), SendError> {
        let connection = match &mut self.distributions {
            Some(connection) if distribution => connection,
            _ => &mut self.metrics,
        };

        trace!(lines = self.writer.lines(), "Writing to Wavefront proxy.");
        let result = connection.try_send(self.writer.as_str().as_bytes());
        self.writer.clear();
        result.map_err(|e| {
            self.failures += 1;
            SendError::Io(e)
        })
    }
}

impl WavefrontSender for ProxySender {
    fn send_metric(
        &mut self,
        name: &str,
        value: f64,
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        self.writer.write_metric(name, value, timestamp, source, tags)?;
        self.write_buffered(false)
    }

    fn send_delta_counter(
        &mut self,
        name: &str,
        value: f64,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        self.send_metric(name, value, None, source, tags)
    }

    fn send_distribution(
        &mut self,
        name: &str,
        centroids: &[Centroid],
        granularities: &[Granularity],
        timestamp: Option<u64>,
        source: &str,
        tags: &Tags,
    ) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        self.writer.write_distribution(name, centroids, granularities, timestamp, source, tags)?;
        if self.writer.is_empty() {
            return Ok(());
        }
        self.write_buffered(true)
    }

    fn flush_now(&mut self) -> Result<(), SendError> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.metrics.disconnect();
        if let Some(distributions) = &mut self.distributions {
            distributions.disconnect();
        }
    }

    fn failure_count(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead as _, BufReader},
        net::{SocketAddr, TcpListener},
        time::Duration,
    };

    use metrics_wavefront::{Centroid, Tags};

    use super::{ProxyConfiguration, ProxySender};
    use crate::{Granularity, SendError, WavefrontSender};

    fn config(metrics: SocketAddr, distributions: SocketAddr) -> ProxyConfiguration {
        ProxyConfiguration {
            metrics_addrs: vec![metrics],
            distribution_addrs: vec![distributions],
            write_timeout: Duration::from_secs(1),
        }
    }

    fn read_lines(listener: &TcpListener, count: usize) -> Vec<String> {
        let (stream, _) = listener.accept().unwrap();
        BufReader::new(stream).lines().take(count).map(Result::unwrap).collect()
    }

    #[test]
    fn writes_lines_to_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut sender = ProxySender::new(config(addr, addr));

        sender.send_metric("proxy.foo.count", 3.0, Some(100), "host", &Tags::new()).unwrap();
        sender.send_delta_counter("∆proxy.bar.count", 1.0, "host", &Tags::new()).unwrap();
        sender
            .send_distribution(
                "proxy.h",
                &[Centroid { value: 2.0, count: 1 }],
                &[Granularity::Hour],
                Some(60),
                "host",
                &Tags::new(),
            )
            .unwrap();

        assert_eq!(
            read_lines(&listener, 3),
            vec![
                "\"proxy.foo.count\" 3 100 source=\"host\"",
                "\"∆proxy.bar.count\" 1 source=\"host\"",
                "!H 60 #1 2 \"proxy.h\" source=\"host\"",
            ]
        );
        assert_eq!(sender.failure_count(), 0);
    }

    #[test]
    fn distributions_use_their_own_port() {
        let metrics = TcpListener::bind("127.0.0.1:0").unwrap();
        let distributions = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut sender = ProxySender::new(config(
            metrics.local_addr().unwrap(),
            distributions.local_addr().unwrap(),
        ));

        sender
            .send_distribution(
                "h",
                &[Centroid { value: 1.0, count: 2 }],
                &[Granularity::Minute],
                None,
                "host",
                &Tags::new(),
            )
            .unwrap();

        assert_eq!(read_lines(&distributions, 1), vec!["!M #2 1 \"h\" source=\"host\""]);
    }

    #[test]
    fn unreachable_proxy_counts_failures() {
        // Bind then drop, so nothing listens on the port.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut sender = ProxySender::new(config(addr, addr));

        let result = sender.send_metric("foo", 1.0, None, "host", &Tags::new());
        assert!(matches!(result, Err(SendError::Io(_))));
        assert_eq!(sender.failure_count(), 1);
    }

    #[test]
    fn closed_sender_rejects_points() {
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut sender = ProxySender::new(config(addr, addr));
        sender.close();

        let result = sender.send_metric("foo", 1.0, None, "host", &Tags::new());
        assert!(matches!(result, Err(SendError::Closed)));
        assert_eq!(sender.failure_count(), 0);
    }
}
