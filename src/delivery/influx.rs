//! InfluxDB 1.x sink over the HTTP line protocol.

use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::SinkConfig;
use crate::delivery::{Sink, SinkError};
use crate::measurement::{Batch, FieldValue};

/// Writes batches to `POST {url}/write?db={database}&precision=s`.
pub struct InfluxSink {
    write_url: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    // Built on first write, i.e. on the writer thread.
    client: Option<Client>,
}

impl std::fmt::Debug for InfluxSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxSink")
            .field("write_url", &self.write_url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl InfluxSink {
    pub fn new(url: &str, database: impl Into<String>) -> Self {
        Self {
            write_url: format!("{}/write", url.trim_end_matches('/')),
            database: database.into(),
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
            client: None,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        let mut sink = Self::new(&config.url, &config.database).with_timeout(config.timeout);
        if let Some(username) = &config.username {
            sink = sink.with_credentials(username, config.password.clone());
        }
        sink
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Sink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    fn write(&mut self, batch: &Batch) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let client = match self.client.take() {
            Some(client) => client,
            None => Client::builder().timeout(self.timeout).build()?,
        };
        let client = self.client.insert(client);

        let mut request = client
            .post(&self.write_url)
            .query(&[("db", self.database.as_str()), ("precision", "s")])
            .body(line_protocol(batch));
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Line protocol
// =============================================================================

/// Encode a batch, one line per measurement, stamped in unix seconds.
pub fn line_protocol(batch: &Batch) -> String {
    let timestamp = batch.target_time.timestamp();
    let mut out = String::new();

    for m in &batch.measurements {
        escape_into(&mut out, &m.measurement, &[',', ' ']);
        for (key, value) in &m.tags {
            if value.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(&mut out, key, &[',', '=', ' ']);
            out.push('=');
            escape_into(&mut out, value, &[',', '=', ' ']);
        }

        for (i, (key, value)) in m.fields.iter().enumerate() {
            out.push(if i == 0 { ' ' } else { ',' });
            escape_into(&mut out, key, &[',', '=', ' ']);
            out.push('=');
            match value {
                FieldValue::Int(n) => out.push_str(&format!("{n}i")),
                FieldValue::Float(f) => out.push_str(&f.to_string()),
                FieldValue::Bool(b) => out.push_str(&b.to_string()),
            }
        }

        out.push_str(&format!(" {timestamp}\n"));
    }
    out
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use chrono::{TimeZone, Utc};
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn batch() -> Batch {
        let mut batch = Batch::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        batch.measurements.push(
            Measurement::new("disk")
                .with_tag("path", "/mnt/my data")
                .with_field("used", 10i64)
                .with_field("percent", 12.5),
        );
        batch
            .measurements
            .push(Measurement::new("cpu load").with_field("throttled", true));
        batch
    }

    #[test]
    fn test_line_protocol_encoding() {
        let body = line_protocol(&batch());
        assert_eq!(
            body,
            "disk,path=/mnt/my\\ data percent=12.5,used=10i 1704067200\n\
             cpu\\ load throttled=true 1704067200\n"
        );
    }

    #[test]
    fn test_field_value_formatting() {
        let mut batch = Batch::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        batch.measurements.push(
            Measurement::new("m")
                .with_field("a", -3i64)
                .with_field("b", 2.0)
                .with_field("c", false),
        );
        assert_eq!(line_protocol(&batch), "m a=-3i,b=2,c=false 1704067200\n");
    }

    #[test]
    fn test_escape_special_characters() {
        let mut out = String::new();
        escape_into(&mut out, "a,b=c d", &[',', '=', ' ']);
        assert_eq!(out, "a\\,b\\=c\\ d");
    }

    #[test]
    fn test_empty_batch_sends_nothing() {
        // unroutable address; a request would fail
        let mut sink = InfluxSink::new("http://127.0.0.1:1", "telemetry");
        let empty = Batch::new(Utc::now());
        assert!(sink.write(&empty).is_ok());
        assert!(sink.client.is_none());
    }

    /// Accept one request, return it as text, and answer with `status_line`.
    fn serve_once(status_line: &'static str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while buf.len() < header_end + length {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        });
        (url, handle)
    }

    #[test]
    fn test_write_posts_line_protocol() {
        let (url, server) = serve_once("HTTP/1.1 204 No Content");
        let mut sink = InfluxSink::new(&url, "telemetry").with_credentials("agent", None);
        sink.write(&batch()).unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /write?db=telemetry&precision=s "));
        assert!(request.to_lowercase().contains("authorization: basic"));
        assert!(request.ends_with(&line_protocol(&batch())));
    }

    #[test]
    fn test_non_success_status_is_error() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error");
        let mut sink = InfluxSink::new(&url, "telemetry");
        let err = sink.write(&batch()).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, SinkError::Status { status: 500, .. }));
    }
}
