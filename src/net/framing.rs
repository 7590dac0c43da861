use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for one newline-delimited frame.
pub const MAX_FRAME_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    TooLarge,
    #[error("invalid frame: {0}")]
    Decode(String),
}

/// Read one `\n`-terminated line as raw bytes, terminator stripped.
/// `Ok(None)` on clean EOF. Bytes are not checked for UTF-8.
pub async fn read_raw_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.take(MAX_FRAME_BYTES + 1).read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if n as u64 > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge);
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(line))
}

/// Read one `\n`-terminated UTF-8 line. `Ok(None)` on clean EOF.
///
/// Invalid UTF-8 consumes the line and yields [`FrameError::Decode`], so the
/// stream stays aligned on the next frame.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    match read_raw_line(reader).await? {
        Some(raw) => String::from_utf8(raw)
            .map(Some)
            .map_err(|e| FrameError::Decode(format!("line is not UTF-8: {e}"))),
        None => Ok(None),
    }
}

/// Read and decode one JSON frame, skipping blank lines.
pub async fn read_json<T, R>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_line(reader).await? {
            None => return Ok(None),
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => {
                return serde_json::from_str(&line)
                    .map(Some)
                    .map_err(|e| FrameError::Decode(e.to_string()))
            }
        }
    }
}

pub async fn write_json<T, W>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    T: Serialize + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut body = serde_json::to_vec(value).map_err(|e| FrameError::Decode(e.to_string()))?;
    body.push(b'\n');
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::BufReader;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (_, mut write_half) = tokio::io::split(client);
        let (read_half, _) = tokio::io::split(server);
        write_json(&mut write_half, &Ping { seq: 7 }).await.unwrap();
        write_half.write_all(b"\r\n").await.unwrap();
        write_json(&mut write_half, &Ping { seq: 8 }).await.unwrap();
        drop(write_half);

        let mut reader = BufReader::new(read_half);
        let first: Option<Ping> = read_json(&mut reader).await.unwrap();
        let second: Option<Ping> = read_json(&mut reader).await.unwrap();
        assert_eq!(first, Some(Ping { seq: 7 }));
        assert_eq!(second, Some(Ping { seq: 8 }));
    }

    #[tokio::test]
    async fn garbage_is_a_decode_error() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        let result: Result<Option<Ping>, _> = read_json(&mut reader).await;
        assert!(matches!(result, Err(FrameError::Decode(_))));
        let mut empty = BufReader::new(&b""[..]);
        assert!(read_line(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_costs_only_its_own_line() {
        let mut reader = BufReader::new(&b"camara \xff\xfe\r\nnext\n"[..]);
        assert!(matches!(read_line(&mut reader).await, Err(FrameError::Decode(_))));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("next"));

        let mut raw = BufReader::new(&b"gps \xff\n"[..]);
        assert_eq!(read_raw_line(&mut raw).await.unwrap(), Some(b"gps \xff".to_vec()));
        assert!(read_raw_line(&mut raw).await.unwrap().is_none());
    }
}
