use anyhow::bail;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tags are a small fixed vocabulary; anything longer is not a valid message.
pub const MAX_TAG_LEN: usize = 64;

/// The unit exchanged over the transport: a short textual tag carrying all
///  protocol metadata, plus a binary payload bounded by the configured chunk
///  size. The correlation id is echoed verbatim in the response so the
///  single-outstanding client can pair request and response.
///
/// Frame layout, all numbers in network byte order (BE):
/// ```ascii
/// 0:  correlation id (u64)
/// 8:  tag length (u16)
/// 10: tag bytes (UTF-8)
/// *:  payload length (u32)
/// *:  payload bytes
/// ```
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Frame {
    pub correlation: u64,
    pub tag: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(correlation: u64, tag: impl Into<String>, payload: Bytes) -> Frame {
        Frame {
            correlation,
            tag: tag.into(),
            payload,
        }
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(write: &mut W, frame: &Frame) -> anyhow::Result<()> {
    if frame.tag.len() > MAX_TAG_LEN {
        bail!("tag longer than {} bytes: {:?}", MAX_TAG_LEN, frame.tag);
    }
    if frame.payload.len() > u32::MAX as usize {
        bail!(
            "payload of {} bytes does not fit the length field",
            frame.payload.len()
        );
    }

    write.write_all(&frame.correlation.to_be_bytes()).await?;
    write.write_all(&(frame.tag.len() as u16).to_be_bytes()).await?;
    write.write_all(frame.tag.as_bytes()).await?;
    write.write_all(&(frame.payload.len() as u32).to_be_bytes()).await?;
    write.write_all(&frame.payload).await?;
    write.flush().await?;
    Ok(())
}

/// Reads the next frame, or `None` if the peer closed the connection at a frame
///  boundary. `max_payload_len` guards against running away on corrupt input.
pub async fn read_frame<R: AsyncRead + Unpin>(
    read: &mut R,
    max_payload_len: usize,
) -> anyhow::Result<Option<Frame>> {
    let mut correlation_buf = [0u8; 8];
    match read.read_exact(&mut correlation_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let correlation = u64::from_be_bytes(correlation_buf);

    let mut tag_len_buf = [0u8; 2];
    read.read_exact(&mut tag_len_buf).await?;
    let tag_len = u16::from_be_bytes(tag_len_buf) as usize;
    if tag_len > MAX_TAG_LEN {
        bail!("tag length {} exceeds maximum of {}", tag_len, MAX_TAG_LEN);
    }

    let mut tag_buf = vec![0u8; tag_len];
    read.read_exact(&mut tag_buf).await?;
    let tag = String::from_utf8(tag_buf)?;

    let mut payload_len_buf = [0u8; 4];
    read.read_exact(&mut payload_len_buf).await?;
    let payload_len = u32::from_be_bytes(payload_len_buf) as usize;
    if payload_len > max_payload_len {
        bail!(
            "payload length {} exceeds maximum of {}",
            payload_len,
            max_payload_len
        );
    }

    let mut payload = vec![0u8; payload_len];
    read.read_exact(&mut payload).await?;

    Ok(Some(Frame {
        correlation,
        tag,
        payload: Bytes::from(payload),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use std::io::Cursor;

    #[rstest]
    #[case::with_payload(Frame::new(7, "beacon request header", Bytes::from_static(b"beacon request body")))]
    #[case::empty_payload(Frame::new(u64::MAX, "queue data step 1 start sending final", Bytes::new()))]
    #[tokio::test]
    async fn test_frame_round_trip(#[case] frame: Frame) {
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut read = Cursor::new(buf);
        let actual = read_frame(&mut read, 10_000).await.unwrap();
        assert_eq!(actual, Some(frame));

        // the stream is exhausted at a frame boundary
        assert_eq!(read_frame(&mut read, 10_000).await.unwrap(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_consecutive_frames() {
        let first = Frame::new(1, "beacon request header", Bytes::from_static(b"a"));
        let second = Frame::new(2, "queue data step 1 sending", Bytes::from_static(b"bc"));

        let mut buf = Vec::new();
        write_frame(&mut buf, &first).await.unwrap();
        write_frame(&mut buf, &second).await.unwrap();

        let mut read = Cursor::new(buf);
        assert_eq!(read_frame(&mut read, 16).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut read, 16).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut read, 16).await.unwrap(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let frame = Frame::new(3, "queue data step 2 sending", Bytes::from_static(&[0; 32]));
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut read = Cursor::new(buf);
        assert!(read_frame(&mut read, 16).await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn test_oversized_tag_rejected() {
        let frame = Frame::new(4, "x".repeat(MAX_TAG_LEN + 1), Bytes::new());
        let mut buf = Vec::new();
        assert!(write_frame(&mut buf, &frame).await.is_err());

        // a forged length field is rejected on the read side as well
        let mut forged = Vec::new();
        forged.extend_from_slice(&4u64.to_be_bytes());
        forged.extend_from_slice(&(MAX_TAG_LEN as u16 + 1).to_be_bytes());
        forged.extend_from_slice(&[b'x'; MAX_TAG_LEN + 1]);
        let mut read = Cursor::new(forged);
        assert!(read_frame(&mut read, 16).await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let frame = Frame::new(5, "beacon request header", Bytes::from_static(b"body"));
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();
        buf.truncate(buf.len() - 2);

        let mut read = Cursor::new(buf);
        assert!(read_frame(&mut read, 16).await.is_err());
    }
}
