//! Native-messaging frame codec.
//!
//! A frame is a 4-byte native-endian length followed by that many bytes of
//! UTF-8 JSON.

use crate::error::FrameError;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Read, Write};

/// Largest frame accepted from the browser.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Largest frame the browser accepts from the host.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

/// Read one frame. Returns `Ok(None)` on end of input.
///
/// An oversized frame is skipped before `TooLarge` is returned, so the
/// stream stays aligned on the next frame. The same holds for invalid JSON.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Value>, FrameError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INBOUND_FRAME {
        io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        return Err(FrameError::TooLarge {
            len,
            limit: MAX_INBOUND_FRAME,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Write one frame and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), FrameError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTBOUND_FRAME {
        return Err(FrameError::TooLarge {
            len: body.len(),
            limit: MAX_OUTBOUND_FRAME,
        });
    }

    writer.write_all(&(body.len() as u32).to_ne_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_frames_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!({"action": "GET_STATUS"})).unwrap();
        write_frame(&mut buf, &json!({"type": "TAB_REMOVED", "tabId": 1, "windowId": 2})).unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(
            read_frame(&mut reader).unwrap(),
            Some(json!({"action": "GET_STATUS"}))
        );
        assert_eq!(
            read_frame(&mut reader).unwrap().unwrap()["type"],
            json!("TAB_REMOVED")
        );
        assert_eq!(read_frame(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_length_prefix_is_native_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!(1)).unwrap();
        assert_eq!(&buf[..4], &1u32.to_ne_bytes());
        assert_eq!(&buf[4..], b"1");
    }

    #[test]
    fn test_invalid_json_keeps_stream_aligned() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_ne_bytes());
        buf.extend_from_slice(b"{{{");
        write_frame(&mut buf, &json!({"ok": true})).unwrap();

        let mut reader = Cursor::new(buf);
        assert!(matches!(read_frame(&mut reader), Err(FrameError::Json(_))));
        assert_eq!(read_frame(&mut reader).unwrap(), Some(json!({"ok": true})));
    }

    #[test]
    fn test_oversized_outbound_frame_is_rejected() {
        let big = "x".repeat(MAX_OUTBOUND_FRAME + 1);
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &big),
            Err(FrameError::TooLarge { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_ne_bytes());
        buf.extend_from_slice(b"{}");
        let mut reader = Cursor::new(buf);
        assert!(matches!(read_frame(&mut reader), Err(FrameError::Io(_))));
    }
}
