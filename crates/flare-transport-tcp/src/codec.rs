//! 长度前缀二进制帧。
//!
//! ```text
//! +----------------+------+---------------------------------------------+
//! | len: u32 (BE)  | kind | body                                        |
//! +----------------+------+---------------------------------------------+
//! kind = 1 request : method_len: u16 | method (UTF-8) | payload
//! kind = 2 response: payload
//! kind = 3 error   : error_kind: u8 | code_len: u16 | code | message
//! ```
//!
//! `len` 计入 `kind` 字节，不计入自身的 4 字节。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flare_core::{CoreError, ErrorKind, Request, Response, error::codes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{self, map_io_error};

/// 单帧允许的最大长度（16 MiB）。
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const KIND_REQUEST: u8 = 1;
const KIND_RESPONSE: u8 = 2;
const KIND_ERROR: u8 = 3;

/// 线上帧。
#[derive(Debug)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Error(CoreError),
}

/// 编码为带长度前缀的完整帧。
pub fn encode(frame: &Frame) -> Result<Bytes, CoreError> {
    let mut buf = BytesMut::new();
    buf.put_u32(0);
    match frame {
        Frame::Request(request) => {
            buf.put_u8(KIND_REQUEST);
            put_short_str(&mut buf, request.method())?;
            buf.put_slice(request.payload());
        }
        Frame::Response(response) => {
            buf.put_u8(KIND_RESPONSE);
            buf.put_slice(response.payload());
        }
        Frame::Error(err) => {
            buf.put_u8(KIND_ERROR);
            buf.put_u8(err.kind().as_u8());
            put_short_str(&mut buf, err.code())?;
            buf.put_slice(err.message().as_bytes());
        }
    }

    let body_len = buf.len() - 4;
    if body_len > MAX_FRAME_LEN {
        return Err(frame_too_large(body_len));
    }
    let len = u32::try_from(body_len).map_err(|_| frame_too_large(body_len))?;
    buf[..4].copy_from_slice(&len.to_be_bytes());
    Ok(buf.freeze())
}

/// 解码去掉长度前缀后的帧体。
pub fn decode(mut body: Bytes) -> Result<Frame, CoreError> {
    if !body.has_remaining() {
        return Err(malformed("empty frame"));
    }
    match body.get_u8() {
        KIND_REQUEST => {
            let method = take_short_str(&mut body)?;
            Ok(Frame::Request(Request::new(method, body)))
        }
        KIND_RESPONSE => Ok(Frame::Response(Response::new(body))),
        KIND_ERROR => {
            if !body.has_remaining() {
                return Err(malformed("error frame is missing its kind"));
            }
            let kind = ErrorKind::from_u8(body.get_u8()).unwrap_or(ErrorKind::Internal);
            let code = take_short_str(&mut body)?;
            let message = String::from_utf8(body.to_vec())
                .map_err(|_| malformed("error message is not UTF-8"))?;
            Ok(Frame::Error(CoreError::new(kind, code, message)))
        }
        other => Err(malformed(&format!("unknown frame kind {other}"))),
    }
}

/// 读取一帧；对端在帧边界上正常关闭时返回 `Ok(None)`。
///
/// 长度前缀只读到一部分就遇到 EOF 属于截断帧，返回协议错误。
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, CoreError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let read = reader
            .read(&mut prefix[filled..])
            .await
            .map_err(|err| map_io_error(error::READ, err))?;
        match (read, filled) {
            (0, 0) => return Ok(None),
            (0, _) => {
                return Err(malformed(&format!(
                    "connection closed after {filled} of 4 length prefix bytes"
                )));
            }
            _ => filled += read,
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(frame_too_large(len));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|err| map_io_error(error::READ, err))?;
    decode(Bytes::from(body)).map(Some)
}

/// 写出一帧并刷新。
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), CoreError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(frame)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|err| map_io_error(error::WRITE, err))?;
    writer
        .flush()
        .await
        .map_err(|err| map_io_error(error::WRITE, err))
}

fn put_short_str(buf: &mut BytesMut, value: &str) -> Result<(), CoreError> {
    let len = u16::try_from(value.len()).map_err(|_| {
        CoreError::new(
            ErrorKind::Protocol,
            codes::PROTOCOL_ENCODE,
            format!("string of {} bytes does not fit a u16 length", value.len()),
        )
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn take_short_str(body: &mut Bytes) -> Result<String, CoreError> {
    if body.remaining() < 2 {
        return Err(malformed("truncated string length"));
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(malformed("truncated string"));
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| malformed("string is not UTF-8"))
}

fn malformed(detail: &str) -> CoreError {
    CoreError::new(
        ErrorKind::Protocol,
        codes::PROTOCOL_DECODE,
        format!("malformed frame: {detail}"),
    )
}

fn frame_too_large(len: usize) -> CoreError {
    CoreError::new(
        ErrorKind::Protocol,
        codes::PROTOCOL_FRAME_TOO_LARGE,
        format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_keeps_kind_and_code() {
        let original = CoreError::new(ErrorKind::Timeout, "backend.slow", "took too long");
        let bytes = encode(&Frame::Error(original)).expect("encode");

        let err = match decode(bytes.slice(4..)).expect("decode") {
            Frame::Error(err) => err,
            other => panic!("expected error frame, got {other:?}"),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.code(), "backend.slow");
        assert_eq!(err.message(), "took too long");
    }

    #[test]
    fn request_frame_has_big_endian_length_prefix() {
        let request = Request::new("metadata", Bytes::from_static(b"{}"));
        let bytes = encode(&Frame::Request(request)).expect("encode");

        // kind + u16 + "metadata" + "{}"
        assert_eq!(&bytes[..4], &(1u32 + 2 + 8 + 2).to_be_bytes());
        assert_eq!(bytes[4], KIND_REQUEST);
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        for body in [&b""[..], &b"\x09"[..], &b"\x01\x00\x10abc"[..], &b"\x03\x02\x00"[..]] {
            let err = decode(Bytes::copy_from_slice(body)).expect_err("malformed");
            assert_eq!(err.kind(), ErrorKind::Protocol);
        }
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_reading() {
        let prefix = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut reader = &prefix[..];
        let err = read_frame(&mut reader).await.expect_err("too large");
        assert_eq!(err.code(), codes::PROTOCOL_FRAME_TOO_LARGE);
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_none() {
        let mut reader = &b""[..];
        assert!(read_frame(&mut reader).await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn eof_inside_length_prefix_is_malformed() {
        for partial in [&b"\x00"[..], &b"\x00\x00"[..], &b"\x00\x00\x00"[..]] {
            let mut reader = partial;
            let err = read_frame(&mut reader).await.expect_err("truncated prefix");
            assert_eq!(err.kind(), ErrorKind::Protocol);
            assert_eq!(err.code(), codes::PROTOCOL_DECODE);
        }
    }

    #[tokio::test]
    async fn frame_after_split_prefix_reads_back() {
        let bytes = encode(&Frame::Response(Response::new(Bytes::from_static(b"ok"))))
            .expect("encode");
        let (head, tail) = bytes.split_at(2);
        let mut reader = AsyncReadExt::chain(head, tail);
        match read_frame(&mut reader).await.expect("frame") {
            Some(Frame::Response(response)) => assert_eq!(&response.payload()[..], b"ok"),
            other => panic!("expected response frame, got {other:?}"),
        }
    }
}
