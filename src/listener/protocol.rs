// Event listener protocol spoken with the supervisor over stdin/stdout

use crate::error::{MemmonError, Result};
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Prefix shared by the supervisor's periodic tick events
pub const TICK_PREFIX: &str = "TICK";

/// Sent before waiting for each event
pub const READY: &[u8] = b"READY\n";

/// Result sent back after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The event was handled
    Ok,
    /// The event should be buffered and sent again
    Fail,
}

impl Ack {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Ack::Ok => b"RESULT 2\nOK",
            Ack::Fail => b"RESULT 4\nFAIL",
        }
    }
}

/// One event notification: header tokens plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    headers: HashMap<String, String>,
    payload: String,
}

impl Event {
    /// Parse a header line of space separated `key:value` tokens
    pub fn parse_headers(line: &str) -> Result<HashMap<String, String>> {
        line.split_whitespace()
            .map(|token| {
                token
                    .split_once(':')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .ok_or_else(|| {
                        MemmonError::ProtocolError(format!("Malformed header token: {:?}", token))
                    })
            })
            .collect()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// The `eventname` header
    pub fn name(&self) -> &str {
        self.header("eventname").unwrap_or_default()
    }

    pub fn is_tick(&self) -> bool {
        self.name().starts_with(TICK_PREFIX)
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Read the next event
///
/// Returns `Ok(None)` if the input ends before a header line.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }

    let headers = Event::parse_headers(&line)?;

    if !headers.contains_key("eventname") {
        return Err(MemmonError::ProtocolError(format!(
            "Header line without eventname: {:?}",
            line.trim_end()
        )));
    }

    let len: usize = headers
        .get("len")
        .ok_or_else(|| {
            MemmonError::ProtocolError(format!("Header line without len: {:?}", line.trim_end()))
        })?
        .parse()
        .map_err(|_| MemmonError::ProtocolError(format!("Invalid len in {:?}", line.trim_end())))?;

    // The buffer grows with the bytes actually received, never with `len`
    let mut payload = Vec::new();
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut payload)
        .await?;
    if payload.len() != len {
        return Err(MemmonError::ProtocolError(format!(
            "Payload shorter than {} bytes: got {}",
            len,
            payload.len()
        )));
    }

    Ok(Some(Event {
        headers,
        payload: String::from_utf8_lossy(&payload).into_owned(),
    }))
}

/// Tell the supervisor we are ready for the next event
pub async fn send_ready<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(READY).await?;
    writer.flush().await?;
    Ok(())
}

/// Acknowledge the current event
pub async fn send_result<W>(writer: &mut W, ack: Ack) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(ack.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_tick_event() {
        let input = b"ver:3.0 server:supervisor serial:21 pool:memmon poolserial:10 \
                      eventname:TICK_60 len:15\nwhen:1700000000";
        let mut reader = &input[..];

        let event = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(event.name(), "TICK_60");
        assert!(event.is_tick());
        assert_eq!(event.header("serial"), Some("21"));
        assert_eq!(event.payload(), "when:1700000000");

        assert!(read_event(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_two_events_back_to_back() {
        let input = b"eventname:PROCESS_STATE_RUNNING len:3\nabceventname:TICK_5 len:0\n";
        let mut reader = &input[..];

        let first = read_event(&mut reader).await.unwrap().unwrap();
        assert!(!first.is_tick());
        assert_eq!(first.payload(), "abc");

        let second = read_event(&mut reader).await.unwrap().unwrap();
        assert!(second.is_tick());
        assert_eq!(second.payload(), "");
    }

    #[tokio::test]
    async fn test_missing_len() {
        let mut reader = &b"eventname:TICK_5\n"[..];
        assert!(matches!(
            read_event(&mut reader).await,
            Err(MemmonError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_eventname() {
        let mut reader = &b"len:0\n"[..];
        assert!(matches!(
            read_event(&mut reader).await,
            Err(MemmonError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_short_payload() {
        let mut reader = &b"eventname:TICK_5 len:10\nshort"[..];
        assert!(matches!(
            read_event(&mut reader).await,
            Err(MemmonError::ProtocolError(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_len() {
        let mut reader = &b"eventname:TICK_5 len:18446744073709551615\nwhen:1"[..];
        assert!(matches!(
            read_event(&mut reader).await,
            Err(MemmonError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_malformed_token() {
        assert!(Event::parse_headers("eventname:TICK_5 garbage").is_err());
    }

    #[tokio::test]
    async fn test_responses() {
        let mut output: Vec<u8> = Vec::new();
        send_ready(&mut output).await.unwrap();
        send_result(&mut output, Ack::Ok).await.unwrap();
        send_ready(&mut output).await.unwrap();
        send_result(&mut output, Ack::Fail).await.unwrap();
        assert_eq!(output, b"READY\nRESULT 2\nOKREADY\nRESULT 4\nFAIL".to_vec());
    }
}
