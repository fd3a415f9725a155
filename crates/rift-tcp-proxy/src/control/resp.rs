//! Minimal RESP request reader and reply encoder.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on the number of arguments in one command.
const MAX_ARGS: usize = 1024;
/// Upper bound on a single bulk argument or inline line.
const MAX_ARG_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protocol error: {0}")]
    Invalid(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn invalid(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::Invalid(msg.into())
}

/// A reply written back to a control client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Bulk(String),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// Error reply with the conventional `ERR` prefix.
    pub fn err(msg: impl std::fmt::Display) -> Self {
        Reply::Error(format!("ERR {msg}"))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                push_line(out, s);
            }
            Reply::Error(s) => {
                out.push(b'-');
                push_line(out, s);
            }
            Reply::Bulk(s) => {
                out.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Simple strings and errors cannot carry line breaks.
fn push_line(out: &mut Vec<u8>, s: &str) {
    out.extend(s.bytes().map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }));
    out.extend_from_slice(b"\r\n");
}

/// Read one line, without its terminator. `None` on a clean EOF.
async fn read_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(MAX_ARG_LEN as u64 + 2)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(invalid("too big inline request"));
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn parse_len(digits: &[u8], what: &str) -> Result<usize, ProtocolError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| invalid(format!("invalid {what} length")))
}

/// Read the next command.
///
/// Accepts a RESP array of bulk strings or an inline command. Returns
/// `Ok(None)` when the peer closed the connection between commands and an
/// empty vector for a blank inline line.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<Vec<String>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_line(reader).await? else {
        return Ok(None);
    };

    let Some(count) = line.strip_prefix(b"*") else {
        let text = String::from_utf8_lossy(&line);
        return Ok(Some(text.split_whitespace().map(str::to_string).collect()));
    };

    let count = parse_len(count, "multibulk")?;
    if count > MAX_ARGS {
        return Err(invalid("invalid multibulk length"));
    }

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let header = read_line(reader)
            .await?
            .ok_or_else(|| invalid("unexpected end of stream"))?;
        let len = header
            .strip_prefix(b"$")
            .ok_or_else(|| invalid("expected '$'"))?;
        let len = parse_len(len, "bulk")?;
        if len > MAX_ARG_LEN {
            return Err(invalid("invalid bulk length"));
        }

        let mut arg = vec![0u8; len + 2];
        reader.read_exact(&mut arg).await?;
        if !arg.ends_with(b"\r\n") {
            return Err(invalid("expected CRLF after bulk string"));
        }
        arg.truncate(len);
        args.push(String::from_utf8_lossy(&arg).into_owned());
    }
    Ok(Some(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_all(input: &[u8]) -> Vec<Result<Option<Vec<String>>, String>> {
        let mut reader = BufReader::new(input);
        let mut out = Vec::new();
        loop {
            match read_command(&mut reader).await {
                Ok(None) => break,
                Ok(cmd) => out.push(Ok(cmd)),
                Err(e) => {
                    out.push(Err(e.to_string()));
                    break;
                }
            }
        }
        out
    }

    fn args(list: &[&str]) -> Result<Option<Vec<String>>, String> {
        Ok(Some(list.iter().map(|s| s.to_string()).collect()))
    }

    #[tokio::test]
    async fn test_reads_resp_array() {
        let cmds = read_all(b"*3\r\n$7\r\nRULEADD\r\n$4\r\nslow\r\n$9\r\ndelay=200\r\n").await;
        assert_eq!(cmds, vec![args(&["RULEADD", "slow", "delay=200"])]);
    }

    #[tokio::test]
    async fn test_reads_inline_commands() {
        let cmds = read_all(b"RULEDEL slow\r\n\r\nrulelist\n").await;
        assert_eq!(
            cmds,
            vec![args(&["RULEDEL", "slow"]), args(&[]), args(&["rulelist"])]
        );
    }

    #[tokio::test]
    async fn test_bulk_may_contain_spaces_and_crlf() {
        let cmds = read_all(b"*2\r\n$7\r\nRULEGET\r\n$5\r\na\r\nb \r\n").await;
        assert_eq!(cmds, vec![args(&["RULEGET", "a\r\nb "])]);
    }

    #[tokio::test]
    async fn test_rejects_malformed_arrays() {
        let cases: [&[u8]; 4] = [
            b"*x\r\n",
            b"*1\r\n:5\r\n",
            b"*1\r\n$3\r\nabcde\r\n",
            b"*1\r\n$abc\r\n",
        ];
        for case in cases {
            let cmds = read_all(case).await;
            assert!(
                matches!(cmds.last(), Some(Err(e)) if e.starts_with("Protocol error")),
                "{:?} -> {:?}",
                String::from_utf8_lossy(case),
                cmds
            );
        }
    }

    #[tokio::test]
    async fn test_truncated_bulk_is_io_error() {
        let cmds = read_all(b"*1\r\n$10\r\nshort").await;
        assert!(matches!(cmds.last(), Some(Err(e)) if e.starts_with("I/O error")));
    }

    #[test]
    fn test_reply_encoding() {
        assert_eq!(Reply::ok().to_bytes(), b"+OK\r\n");
        assert_eq!(
            Reply::err("no matching rule found").to_bytes(),
            b"-ERR no matching rule found\r\n"
        );
        assert_eq!(Reply::Bulk("a b".into()).to_bytes(), b"$3\r\na b\r\n");
        assert_eq!(
            Reply::Array(vec![Reply::Bulk("x".into()), Reply::Bulk("yz".into())]).to_bytes(),
            b"*2\r\n$1\r\nx\r\n$2\r\nyz\r\n"
        );
        assert_eq!(Reply::Array(vec![]).to_bytes(), b"*0\r\n");
    }

    #[test]
    fn test_error_reply_strips_line_breaks() {
        assert_eq!(Reply::err("a\r\nb").to_bytes(), b"-ERR a  b\r\n");
    }
}
