use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::LinkError;
use crate::message::{
    Encoding, Hello, Message, MessageKind, PeerId, QueryId, QueryTarget, ReplyBody, ResourceId,
    ResourceRef, SampleKind, Timestamp, WhatAmIMatcher,
};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default cap on a frame body, applied by both encoder and decoder.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

const LEN_PREFIX: usize = 4;

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), LinkError> {
    let len = u16::try_from(s.len()).map_err(|_| LinkError::Oversize(s.len()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_bytes(buf: &mut BytesMut, payload: &Bytes) -> Result<(), LinkError> {
    let len = u32::try_from(payload.len()).map_err(|_| LinkError::Oversize(payload.len()))?;
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

fn put_resource(buf: &mut BytesMut, resource: &ResourceRef) -> Result<(), LinkError> {
    match resource {
        ResourceRef::Expr(expr) => {
            buf.put_u8(0x00);
            put_str(buf, expr)
        }
        ResourceRef::Id(id) => {
            buf.put_u8(0x01);
            buf.put_u32(id.0);
            Ok(())
        }
    }
}

fn put_encoding(buf: &mut BytesMut, encoding: &Encoding) -> Result<(), LinkError> {
    buf.put_u8(encoding.prefix());
    if let Encoding::Custom(schema) = encoding {
        put_str(buf, schema)?;
    }
    Ok(())
}

fn take_u8(buf: &mut Bytes) -> Result<u8, LinkError> {
    if buf.remaining() < 1 {
        return Err(LinkError::Malformed);
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut Bytes) -> Result<u16, LinkError> {
    if buf.remaining() < 2 {
        return Err(LinkError::Malformed);
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut Bytes) -> Result<u32, LinkError> {
    if buf.remaining() < 4 {
        return Err(LinkError::Malformed);
    }
    Ok(buf.get_u32())
}

fn take_u64(buf: &mut Bytes) -> Result<u64, LinkError> {
    if buf.remaining() < 8 {
        return Err(LinkError::Malformed);
    }
    Ok(buf.get_u64())
}

fn take_str(buf: &mut Bytes) -> Result<String, LinkError> {
    let len = take_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(LinkError::Malformed);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| LinkError::Malformed)
}

fn take_bytes(buf: &mut Bytes) -> Result<Bytes, LinkError> {
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(LinkError::Malformed);
    }
    Ok(buf.split_to(len))
}

fn take_resource(buf: &mut Bytes) -> Result<ResourceRef, LinkError> {
    match take_u8(buf)? {
        0x00 => Ok(ResourceRef::Expr(take_str(buf)?)),
        0x01 => Ok(ResourceRef::Id(ResourceId(take_u32(buf)?))),
        _ => Err(LinkError::Malformed),
    }
}

fn take_encoding(buf: &mut Bytes) -> Result<Encoding, LinkError> {
    match take_u8(buf)? {
        0x00 => Ok(Encoding::Empty),
        0x01 => Ok(Encoding::TextPlain),
        0x02 => Ok(Encoding::AppOctetStream),
        0x03 => Ok(Encoding::AppJson),
        0xff => Ok(Encoding::Custom(take_str(buf)?)),
        _ => Err(LinkError::Malformed),
    }
}

fn take_peer_id(buf: &mut Bytes) -> Result<PeerId, LinkError> {
    if buf.remaining() < 16 {
        return Err(LinkError::Malformed);
    }
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(PeerId::from_bytes(raw))
}

fn encode_body(msg: &Message, buf: &mut BytesMut) -> Result<(), LinkError> {
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(msg.kind() as u8);
    match msg {
        Message::DeclareResource { id, expr } => {
            buf.put_u32(id.0);
            put_str(buf, expr)?;
        }
        Message::ForgetResource { id } => {
            buf.put_u32(id.0);
        }
        Message::Sample {
            resource,
            kind,
            encoding,
            timestamp,
            payload,
        } => {
            put_resource(buf, resource)?;
            buf.put_u8(*kind as u8);
            put_encoding(buf, encoding)?;
            buf.put_u64(timestamp.0);
            put_bytes(buf, payload)?;
        }
        Message::Query {
            id,
            resource,
            parameters,
            target,
        } => {
            buf.put_u32(id.0);
            put_resource(buf, resource)?;
            put_str(buf, parameters)?;
            buf.put_u8(*target as u8);
        }
        Message::Reply { id, body } => {
            buf.put_u32(id.0);
            match body {
                ReplyBody::Ok {
                    keyexpr,
                    encoding,
                    timestamp,
                    payload,
                } => {
                    buf.put_u8(0x00);
                    put_str(buf, keyexpr)?;
                    put_encoding(buf, encoding)?;
                    buf.put_u64(timestamp.0);
                    put_bytes(buf, payload)?;
                }
                ReplyBody::Err { payload } => {
                    buf.put_u8(0x01);
                    put_bytes(buf, payload)?;
                }
            }
        }
        Message::KeepAlive => {}
        Message::Hello(hello) => {
            buf.put_slice(hello.zid.as_bytes());
            buf.put_u8(hello.whatami as u8);
            let count = u8::try_from(hello.locators.len())
                .map_err(|_| LinkError::Oversize(hello.locators.len()))?;
            buf.put_u8(count);
            for locator in &hello.locators {
                put_str(buf, locator)?;
            }
        }
        Message::Scout { what } => {
            buf.put_u8(what.bits());
        }
    }
    Ok(())
}

fn decode_body(buf: &mut Bytes) -> Result<Message, LinkError> {
    let version = take_u8(buf)?;
    if version != PROTOCOL_VERSION {
        return Err(LinkError::Version(version));
    }
    let kind = MessageKind::try_from(take_u8(buf)?)?;
    let msg = match kind {
        MessageKind::DeclareResource => Message::DeclareResource {
            id: ResourceId(take_u32(buf)?),
            expr: take_str(buf)?,
        },
        MessageKind::ForgetResource => Message::ForgetResource {
            id: ResourceId(take_u32(buf)?),
        },
        MessageKind::Sample => Message::Sample {
            resource: take_resource(buf)?,
            kind: SampleKind::try_from(take_u8(buf)?)?,
            encoding: take_encoding(buf)?,
            timestamp: Timestamp(take_u64(buf)?),
            payload: take_bytes(buf)?,
        },
        MessageKind::Query => Message::Query {
            id: QueryId(take_u32(buf)?),
            resource: take_resource(buf)?,
            parameters: take_str(buf)?,
            target: QueryTarget::try_from(take_u8(buf)?)?,
        },
        MessageKind::Reply => {
            let id = QueryId(take_u32(buf)?);
            let body = match take_u8(buf)? {
                0x00 => ReplyBody::Ok {
                    keyexpr: take_str(buf)?,
                    encoding: take_encoding(buf)?,
                    timestamp: Timestamp(take_u64(buf)?),
                    payload: take_bytes(buf)?,
                },
                0x01 => ReplyBody::Err {
                    payload: take_bytes(buf)?,
                },
                _ => return Err(LinkError::Malformed),
            };
            Message::Reply { id, body }
        }
        MessageKind::KeepAlive => Message::KeepAlive,
        MessageKind::Hello => {
            let zid = take_peer_id(buf)?;
            let whatami = take_u8(buf)?.try_into()?;
            let count = take_u8(buf)? as usize;
            let mut locators = Vec::with_capacity(count);
            for _ in 0..count {
                locators.push(take_str(buf)?);
            }
            Message::Hello(Hello {
                zid,
                whatami,
                locators,
            })
        }
        MessageKind::Scout => Message::Scout {
            what: WhatAmIMatcher::from_bits(take_u8(buf)?).ok_or(LinkError::Malformed)?,
        },
    };
    Ok(msg)
}

/// Encodes `msg` as a length-prefixed frame for stream links.
pub fn encode_frame(msg: &Message) -> Result<Bytes, LinkError> {
    let mut body = BytesMut::with_capacity(64);
    encode_body(msg, &mut body)?;
    if body.len() > DEFAULT_MAX_FRAME {
        return Err(LinkError::Oversize(body.len()));
    }
    let mut out = BytesMut::with_capacity(LEN_PREFIX + body.len());
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
    Ok(out.freeze())
}

/// Encodes `msg` as a self-delimited datagram (no length prefix).
pub fn encode_datagram(msg: &Message) -> Result<Bytes, LinkError> {
    let mut body = BytesMut::with_capacity(64);
    encode_body(msg, &mut body)?;
    Ok(body.freeze())
}

/// Decodes a whole datagram into one message.
pub fn decode_datagram(datagram: Bytes) -> Result<Message, LinkError> {
    let mut buf = datagram;
    let msg = decode_body(&mut buf)?;
    if buf.has_remaining() {
        return Err(LinkError::Malformed);
    }
    Ok(msg)
}

/// Incremental frame decoder over a stream fill buffer.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame: usize,
}

impl FrameDecoder {
    /// Decoder with the default frame cap.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME)
    }

    /// Decoder with an explicit frame cap.
    pub fn with_limit(max_frame: usize) -> Self {
        FrameDecoder { max_frame }
    }

    /// Extracts one message from `buf`, or `None` when more bytes are needed.
    ///
    /// Consumed bytes are removed from `buf`; partial frames stay in place
    /// for the next call.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, LinkError> {
        if buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if body_len > self.max_frame {
            return Err(LinkError::Oversize(body_len));
        }
        if buf.len() < LEN_PREFIX + body_len {
            return Ok(None);
        }
        buf.advance(LEN_PREFIX);
        let mut body = buf.split_to(body_len).freeze();
        let msg = decode_body(&mut body)?;
        if body.has_remaining() {
            return Err(LinkError::Malformed);
        }
        Ok(Some(msg))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WhatAmI;

    fn roundtrip(msg: Message) {
        let frame = encode_frame(&msg).unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        let decoded = FrameDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        roundtrip(Message::DeclareResource {
            id: ResourceId(7),
            expr: "demo/example/**".to_string(),
        });
        roundtrip(Message::ForgetResource { id: ResourceId(7) });
        roundtrip(Message::Sample {
            resource: ResourceRef::Expr("demo/example/a".to_string()),
            kind: SampleKind::Put,
            encoding: Encoding::TextPlain,
            timestamp: Timestamp(42),
            payload: Bytes::from_static(b"value"),
        });
        roundtrip(Message::Sample {
            resource: ResourceRef::Id(ResourceId(3)),
            kind: SampleKind::Delete,
            encoding: Encoding::Custom("app/cbor".to_string()),
            timestamp: Timestamp(43),
            payload: Bytes::new(),
        });
        roundtrip(Message::Query {
            id: QueryId(9),
            resource: ResourceRef::Expr("demo/**".to_string()),
            parameters: "arg=1".to_string(),
            target: QueryTarget::AllComplete,
        });
        roundtrip(Message::Reply {
            id: QueryId(9),
            body: ReplyBody::Ok {
                keyexpr: "demo/example/a".to_string(),
                encoding: Encoding::AppJson,
                timestamp: Timestamp(44),
                payload: Bytes::from_static(b"{}"),
            },
        });
        roundtrip(Message::Reply {
            id: QueryId(10),
            body: ReplyBody::Err {
                payload: Bytes::from_static(b"boom"),
            },
        });
        roundtrip(Message::KeepAlive);
        roundtrip(Message::Hello(Hello {
            zid: PeerId::random(),
            whatami: WhatAmI::Router,
            locators: vec!["tcp/10.0.0.1:7447".to_string(), "tcp/[::1]:7447".to_string()],
        }));
        roundtrip(Message::Scout {
            what: WhatAmIMatcher::default(),
        });
    }

    #[test]
    fn test_incremental_decode() {
        let frame = encode_frame(&Message::Query {
            id: QueryId(1),
            resource: ResourceRef::Expr("a/b".to_string()),
            parameters: String::new(),
            target: QueryTarget::default(),
        })
        .unwrap();

        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        // Drip-feed the frame a few bytes at a time; nothing decodes until
        // the last chunk lands.
        for chunk in frame.chunks(3) {
            assert!(decoder.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(chunk);
        }
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((DEFAULT_MAX_FRAME + 1) as u32);
        buf.put_u8(PROTOCOL_VERSION);
        assert!(matches!(
            FrameDecoder::new().decode(&mut buf),
            Err(LinkError::Oversize(_))
        ));
    }

    #[test]
    fn test_small_limit_applies() {
        let frame = encode_frame(&Message::KeepAlive).unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        let strict = FrameDecoder::with_limit(1);
        assert!(matches!(strict.decode(&mut buf), Err(LinkError::Oversize(_))));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let datagram = Bytes::from_static(&[PROTOCOL_VERSION, 0x99]);
        assert!(matches!(
            decode_datagram(datagram),
            Err(LinkError::UnknownKind(0x99))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let datagram = Bytes::from_static(&[0x09, 0x06]);
        assert!(matches!(decode_datagram(datagram), Err(LinkError::Version(0x09))));
    }

    #[test]
    fn test_truncated_body_rejected() {
        // A declare whose announced string length exceeds the body.
        let mut body = BytesMut::new();
        body.put_u8(PROTOCOL_VERSION);
        body.put_u8(MessageKind::DeclareResource as u8);
        body.put_u32(1);
        body.put_u16(50);
        body.put_slice(b"short");
        assert!(matches!(
            decode_datagram(body.freeze()),
            Err(LinkError::Malformed)
        ));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut datagram = BytesMut::from(&encode_datagram(&Message::KeepAlive).unwrap()[..]);
        datagram.put_u8(0xaa);
        assert!(matches!(
            decode_datagram(datagram.freeze()),
            Err(LinkError::Malformed)
        ));
    }

    #[test]
    fn test_datagram_roundtrip() {
        let msg = Message::Scout {
            what: WhatAmIMatcher::all(),
        };
        let datagram = encode_datagram(&msg).unwrap();
        assert_eq!(decode_datagram(datagram).unwrap(), msg);
    }
}
