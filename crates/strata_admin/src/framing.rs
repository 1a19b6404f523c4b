//! Admin wire framing.
//!
//! Two framings share each connection. Requests, one-shot responses, and
//! upload records are varint length-delimited protobuf frames. Download
//! streams instead prefix every record with a fixed big-endian `i32`, so
//! the `-1` terminator is recognizable without varint peeking. Upload
//! streams end with the same four-byte `-1`.

use bytes::BytesMut;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sentinel length closing a stream in either direction.
pub const END_OF_STREAM: i32 = -1;

/// Upper bound on a single frame. Also what keeps the end-of-stream marker
/// unambiguous in upload streams: four `0xff` bytes can only start a
/// varint for a length of at least 2^28, which this cap forbids.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Failures raised by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("frame decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("frame encode failed: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte cap")]
    Oversized(u64),
}

/// Write one varint length-delimited message. Does not flush.
pub async fn write_message<M, W>(writer: &mut W, message: &M) -> Result<(), FrameError>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(message.encoded_len() + 10);
    message.encode_length_delimited(&mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read one varint length-delimited message.
pub async fn read_message<M, R>(reader: &mut R) -> Result<M, FrameError>
where
    M: Message + Default,
    R: AsyncRead + Unpin,
{
    let len = read_varint(reader, 0, 0).await?;
    read_sized_message(reader, len).await
}

/// Write the four-byte end-of-stream marker. Does not flush.
pub async fn write_end_of_stream<W>(writer: &mut W) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(END_OF_STREAM).await?;
    Ok(())
}

/// Read a download-stream length prefix: a big-endian `i32`, where
/// [`END_OF_STREAM`] terminates the stream.
pub async fn read_frame_len<R>(reader: &mut R) -> Result<i32, FrameError>
where
    R: AsyncRead + Unpin,
{
    Ok(reader.read_i32().await?)
}

/// Write one download-stream record: big-endian `i32` length, then the
/// bare message bytes. Does not flush.
pub async fn write_sized_message<M, W>(writer: &mut W, message: &M) -> Result<(), FrameError>
where
    M: Message,
    W: AsyncWrite + Unpin,
{
    let len = message.encoded_len();
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(len as u64));
    }
    let mut buf = BytesMut::with_capacity(len);
    message.encode(&mut buf)?;
    writer.write_i32(len as i32).await?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read exactly `len` bytes and parse them as one message.
pub async fn read_sized_message<M, R>(reader: &mut R, len: u64) -> Result<M, FrameError>
where
    M: Message + Default,
    R: AsyncRead + Unpin,
{
    if len > MAX_FRAME_LEN as u64 {
        return Err(FrameError::Oversized(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(M::decode(buf.as_slice())?)
}

/// Upload-direction reader: the next varint-framed record, or `None` on
/// the end-of-stream marker.
///
/// Every `0xff` carries a varint continuation bit, so leading `0xff` bytes
/// could open either a record length or the marker. Under [`MAX_FRAME_LEN`]
/// a legal length never needs four of them, which makes the fourth
/// consecutive `0xff` a definitive end of stream.
pub async fn read_record_or_end_of_stream<M, R>(reader: &mut R) -> Result<Option<M>, FrameError>
where
    M: Message + Default,
    R: AsyncRead + Unpin,
{
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut sentinel_run = 0usize;
    loop {
        let byte = reader.read_u8().await?;
        if byte == 0xff {
            sentinel_run += 1;
            if sentinel_run == 4 {
                return Ok(None);
            }
            value |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            continue;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            let record = read_sized_message(reader, value).await?;
            return Ok(Some(record));
        }
        let len = read_varint(reader, value, shift + 7).await?;
        let record = read_sized_message(reader, len).await?;
        return Ok(Some(record));
    }
}

/// Continue reading a base-128 varint with `value`/`shift` already
/// consumed.
async fn read_varint<R>(reader: &mut R, mut value: u64, mut shift: u32) -> Result<u64, FrameError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if shift >= 64 {
            return Err(FrameError::Decode(prost::DecodeError::new(
                "length varint overflows u64",
            )));
        }
        let byte = reader.read_u8().await?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}
