use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// Line-framed reader used on both ends of the socket.
pub type LineReader<R> = Lines<BufReader<R>>;

pub fn line_reader<R>(reader: R) -> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    BufReader::new(reader).lines()
}

/// Reads the next line with its `\n` or `\r\n` terminator removed.
///
/// Returns `Ok(None)` once the peer has closed its side. Empty lines are
/// returned as empty strings; they are valid chat lines.
pub async fn read_line<R>(lines: &mut Lines<R>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // `next_line` keeps partial reads inside `Lines`, so it is safe to race in `select!`.
    lines.next_line().await
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One buffer per line so a line is never interleaved with a partial write.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
