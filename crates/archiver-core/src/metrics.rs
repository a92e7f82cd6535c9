//! Best-effort metrics over the graphite plaintext protocol.
//!
//! A metric that cannot be delivered is logged and forgotten; metrics never
//! fail the pipeline.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::MetricsConfig;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct MetricsClient {
    enabled: bool,
    host: String,
    port: u16,
    prefix: String,
}

impl MetricsClient {
    pub fn from_config(config: &MetricsConfig) -> MetricsClient {
        let (enabled, host, prefix) = match (config.enabled, &config.host, &config.prefix) {
            (true, Some(host), Some(prefix)) => (true, host.clone(), prefix.clone()),
            (true, _, _) => {
                warn!("Metrics enabled but host/prefix missing; disabling");
                (false, String::new(), String::new())
            }
            _ => (false, String::new(), String::new()),
        };
        MetricsClient {
            enabled,
            host,
            port: config.port,
            prefix,
        }
    }

    pub fn disabled() -> MetricsClient {
        MetricsClient {
            enabled: false,
            host: String::new(),
            port: 0,
            prefix: String::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn post_metric(&self, metric_path: &str, value: f64) {
        if !self.enabled {
            return;
        }
        let timestamp = chrono::Utc::now().timestamp();
        let line = format!("{}.{metric_path} {value} {timestamp}\n", self.prefix);
        if let Err(e) = self.send(line.as_bytes()) {
            warn!(
                "Could not post metric '{}.{metric_path}' to {}:{}: {e}",
                self.prefix, self.host, self.port
            );
        } else {
            debug!("Posted metric: {}", line.trim_end());
        }
    }

    fn send(&self, line: &[u8]) -> std::io::Result<()> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::other("no address resolved"))?;
        let mut stream = TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT)?;
        stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        stream.write_all(line)?;
        Ok(())
    }
}
