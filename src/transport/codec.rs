//! MQTT 3.1.1 packet codec
//!
//! Packet format: [TYPE|FLAGS] [REMAINING LENGTH] [VARIABLE HEADER] [PAYLOAD]
//!
//! - TYPE: high nibble of the first byte, FLAGS: low nibble
//! - REMAINING LENGTH: 1-4 byte varint, 7 bits per byte, LSB group first
//! - Strings: u16 big-endian length + UTF-8 bytes
//!
//! Only the packets a device client needs are supported. CONNECT and
//! SUBSCRIBE decode as well, so tests can stand up a broker on a socket.

use super::QoS;
use crate::error::{Error, Result};

/// Protocol name in CONNECT
pub const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;
/// Largest encodable remaining length
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;
/// SUBACK return code for a refused subscription
pub const SUBACK_FAILURE: u8 = 0x80;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const PUBREC: u8 = 5;
const PUBREL: u8 = 6;
const PUBCOMP: u8 = 7;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

// CONNECT flag bits
const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_CLEAN_SESSION: u8 = 0x02;

/// CONNECT packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// PUBLISH packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present iff `qos` is above at-most-once
    pub packet_id: Option<u16>,
    pub payload: Vec<u8>,
}

/// MQTT control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck {
        session_present: bool,
        return_code: u8,
    },
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe {
        packet_id: u16,
        topics: Vec<(String, QoS)>,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Fixed header first byte
    fn header(&self) -> u8 {
        match self {
            Packet::Connect(_) => CONNECT << 4,
            Packet::ConnAck { .. } => CONNACK << 4,
            Packet::Publish(p) => {
                let mut flags = p.qos.as_u8() << 1;
                if p.dup {
                    flags |= 0x08;
                }
                if p.retain {
                    flags |= 0x01;
                }
                (PUBLISH << 4) | flags
            }
            Packet::PubAck(_) => PUBACK << 4,
            Packet::PubRec(_) => PUBREC << 4,
            // PUBREL and SUBSCRIBE carry reserved flags 0b0010
            Packet::PubRel(_) => (PUBREL << 4) | 0x02,
            Packet::PubComp(_) => PUBCOMP << 4,
            Packet::Subscribe { .. } => (SUBSCRIBE << 4) | 0x02,
            Packet::SubAck { .. } => SUBACK << 4,
            Packet::PingReq => PINGREQ << 4,
            Packet::PingResp => PINGRESP << 4,
            Packet::Disconnect => DISCONNECT << 4,
        }
    }

    /// Variable header and payload
    fn body(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        match self {
            Packet::Connect(c) => {
                put_str(&mut body, PROTOCOL_NAME)?;
                body.push(PROTOCOL_LEVEL);

                let mut flags = 0;
                if c.clean_session {
                    flags |= FLAG_CLEAN_SESSION;
                }
                if c.username.is_some() {
                    flags |= FLAG_USERNAME;
                }
                if c.password.is_some() {
                    flags |= FLAG_PASSWORD;
                }
                body.push(flags);
                body.extend_from_slice(&c.keep_alive_secs.to_be_bytes());

                put_str(&mut body, &c.client_id)?;
                if let Some(username) = &c.username {
                    put_str(&mut body, username)?;
                }
                if let Some(password) = &c.password {
                    put_str(&mut body, password)?;
                }
            }
            Packet::ConnAck {
                session_present,
                return_code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*return_code);
            }
            Packet::Publish(p) => {
                put_str(&mut body, &p.topic)?;
                if let Some(id) = p.packet_id {
                    body.extend_from_slice(&id.to_be_bytes());
                }
                body.extend_from_slice(&p.payload);
            }
            Packet::PubAck(id) | Packet::PubRec(id) | Packet::PubRel(id) | Packet::PubComp(id) => {
                body.extend_from_slice(&id.to_be_bytes());
            }
            Packet::Subscribe { packet_id, topics } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                for (topic, qos) in topics {
                    put_str(&mut body, topic)?;
                    body.push(qos.as_u8());
                }
            }
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                body.extend_from_slice(return_codes);
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }
        Ok(body)
    }

    /// Encode packet into wire bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = self.body()?;
        if body.len() > MAX_REMAINING_LENGTH {
            return Err(Error::Protocol(format!(
                "packet body of {} bytes exceeds MQTT limit",
                body.len()
            )));
        }

        let mut packet = Vec::with_capacity(5 + body.len());
        packet.push(self.header());
        encode_remaining_length(body.len(), &mut packet);
        packet.extend_from_slice(&body);
        Ok(packet)
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` until a complete packet is buffered, otherwise the
    /// packet and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>> {
        let Some(&header) = buf.first() else {
            return Ok(None);
        };
        let Some((remaining, length_bytes)) = decode_remaining_length(&buf[1..])? else {
            return Ok(None);
        };

        let total = 1 + length_bytes + remaining;
        if buf.len() < total {
            return Ok(None);
        }

        let body = &buf[1 + length_bytes..total];
        let packet = Self::parse(header, body)?;
        Ok(Some((packet, total)))
    }

    fn parse(header: u8, body: &[u8]) -> Result<Packet> {
        let mut r = Reader::new(body);
        let packet = match header >> 4 {
            CONNECT => {
                let name = r.string()?;
                let level = r.u8()?;
                if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                    return Err(Error::Protocol(format!(
                        "unsupported protocol {} level {}",
                        name, level
                    )));
                }
                let flags = r.u8()?;
                let keep_alive_secs = r.u16()?;
                let client_id = r.string()?;
                let username = if flags & FLAG_USERNAME != 0 {
                    Some(r.string()?)
                } else {
                    None
                };
                let password = if flags & FLAG_PASSWORD != 0 {
                    Some(r.string()?)
                } else {
                    None
                };
                Packet::Connect(Connect {
                    client_id,
                    keep_alive_secs,
                    clean_session: flags & FLAG_CLEAN_SESSION != 0,
                    username,
                    password,
                })
            }
            CONNACK => Packet::ConnAck {
                session_present: r.u8()? & 0x01 != 0,
                return_code: r.u8()?,
            },
            PUBLISH => {
                let qos = QoS::try_from((header >> 1) & 0x03)?;
                let topic = r.string()?;
                let packet_id = if qos == QoS::AtMostOnce {
                    None
                } else {
                    Some(r.u16()?)
                };
                Packet::Publish(Publish {
                    topic,
                    qos,
                    retain: header & 0x01 != 0,
                    dup: header & 0x08 != 0,
                    packet_id,
                    payload: r.rest().to_vec(),
                })
            }
            PUBACK => Packet::PubAck(r.u16()?),
            PUBREC => Packet::PubRec(r.u16()?),
            PUBREL => Packet::PubRel(r.u16()?),
            PUBCOMP => Packet::PubComp(r.u16()?),
            SUBSCRIBE => {
                let packet_id = r.u16()?;
                let mut topics = Vec::new();
                while !r.is_empty() {
                    let topic = r.string()?;
                    let qos = QoS::try_from(r.u8()?)?;
                    topics.push((topic, qos));
                }
                Packet::Subscribe { packet_id, topics }
            }
            SUBACK => Packet::SubAck {
                packet_id: r.u16()?,
                return_codes: r.rest().to_vec(),
            },
            PINGREQ => Packet::PingReq,
            PINGRESP => Packet::PingResp,
            DISCONNECT => Packet::Disconnect,
            other => {
                return Err(Error::Protocol(format!(
                    "unsupported packet type {}",
                    other
                )));
            }
        };
        Ok(packet)
    }
}

/// Human-readable CONNACK return code
pub fn connack_reason(return_code: u8) -> &'static str {
    match return_code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// Length-prefixed UTF-8 string; MQTT caps these at 65535 bytes.
fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| {
        Error::Protocol(format!(
            "string of {} bytes exceeds MQTT limit of {}",
            s.len(),
            u16::MAX
        ))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn encode_remaining_length(mut len: usize, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Returns the length and the number of bytes it used, or `None` if the
/// varint is not complete yet.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    for (i, &byte) in buf.iter().enumerate().take(4) {
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 4 {
        return Err(Error::Protocol("malformed remaining length".to_string()));
    }
    Ok(None)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Protocol("truncated packet".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Protocol("invalid UTF-8 string".to_string()))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(qos: QoS, retain: bool, packet_id: Option<u16>) -> Packet {
        Packet::Publish(Publish {
            topic: "a/b".to_string(),
            qos,
            retain,
            dup: false,
            packet_id,
            payload: b"hi".to_vec(),
        })
    }

    #[test]
    fn test_connect_encoding() {
        let packet = Packet::Connect(Connect {
            client_id: "abc".to_string(),
            keep_alive_secs: 60,
            clean_session: true,
            username: None,
            password: None,
        });
        let expected = [
            0x10, 0x0F, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x03,
            b'a', b'b', b'c',
        ];
        assert_eq!(packet.encode().unwrap(), expected);
    }

    #[test]
    fn test_connect_with_credentials() {
        let packet = Packet::Connect(Connect {
            client_id: "abc".to_string(),
            keep_alive_secs: 60,
            clean_session: true,
            username: Some("u".to_string()),
            password: Some("p".to_string()),
        });
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[1], 21);
        assert_eq!(bytes[9], 0xC2);
        assert_eq!(&bytes[bytes.len() - 6..], &[0x00, 0x01, b'u', 0x00, 0x01, b'p']);

        let (decoded, used) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_publish_qos0() {
        let bytes = publish(QoS::AtMostOnce, false, None).encode().unwrap();
        assert_eq!(bytes, [0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_publish_qos1_retained() {
        let bytes = publish(QoS::AtLeastOnce, true, Some(10)).encode().unwrap();
        assert_eq!(
            bytes,
            [0x33, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x0A, b'h', b'i']
        );
    }

    #[test]
    fn test_oversized_strings_rejected() {
        let mut packet = publish(QoS::AtMostOnce, false, None);
        if let Packet::Publish(p) = &mut packet {
            p.topic = "t".repeat(usize::from(u16::MAX) + 4);
        }
        assert!(matches!(packet.encode(), Err(Error::Protocol(_))));

        let connect = Packet::Connect(Connect {
            client_id: "abc".to_string(),
            keep_alive_secs: 60,
            clean_session: true,
            username: None,
            password: Some("p".repeat(70_000)),
        });
        assert!(matches!(connect.encode(), Err(Error::Protocol(_))));

        // Exactly at the limit still encodes and decodes intact
        let mut packet = publish(QoS::AtMostOnce, false, None);
        if let Packet::Publish(p) = &mut packet {
            p.topic = "t".repeat(usize::from(u16::MAX));
        }
        let bytes = packet.encode().unwrap();
        let (decoded, used) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_subscribe_encoding() {
        let packet = Packet::Subscribe {
            packet_id: 1,
            topics: vec![("a/b".to_string(), QoS::AtLeastOnce)],
        };
        assert_eq!(
            packet.encode().unwrap(),
            [0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'b', 0x01]
        );
    }

    #[test]
    fn test_short_packets() {
        assert_eq!(Packet::PingReq.encode().unwrap(), [0xC0, 0x00]);
        assert_eq!(Packet::Disconnect.encode().unwrap(), [0xE0, 0x00]);
        assert_eq!(Packet::PubRel(7).encode().unwrap(), [0x62, 0x02, 0x00, 0x07]);
    }

    #[test]
    fn test_remaining_length_boundaries() {
        let cases: [(usize, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
        ];
        for (len, expected) in cases {
            let mut buf = Vec::new();
            encode_remaining_length(len, &mut buf);
            assert_eq!(buf, expected, "length {}", len);
            assert_eq!(
                decode_remaining_length(&buf).unwrap(),
                Some((len, expected.len()))
            );
        }
    }

    #[test]
    fn test_malformed_remaining_length() {
        let bytes = [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(Packet::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_waits_for_complete_packet() {
        let bytes = publish(QoS::AtLeastOnce, false, Some(3)).encode().unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(Packet::decode(&bytes[..cut]).unwrap(), None, "cut at {}", cut);
        }
        assert!(Packet::decode(&bytes).unwrap().is_some());
    }

    #[test]
    fn test_decode_back_to_back_packets() {
        let mut stream = Packet::ConnAck {
            session_present: false,
            return_code: 0,
        }
        .encode()
        .unwrap();
        stream.extend(Packet::PingResp.encode().unwrap());

        let (first, used) = Packet::decode(&stream).unwrap().unwrap();
        assert_eq!(
            first,
            Packet::ConnAck {
                session_present: false,
                return_code: 0
            }
        );
        let (second, _) = Packet::decode(&stream[used..]).unwrap().unwrap();
        assert_eq!(second, Packet::PingResp);
    }

    #[test]
    fn test_decode_suback_failure() {
        let bytes = [0x90, 0x03, 0x00, 0x01, SUBACK_FAILURE];
        let (packet, _) = Packet::decode(&bytes).unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::SubAck {
                packet_id: 1,
                return_codes: vec![SUBACK_FAILURE]
            }
        );
    }

    #[test]
    fn test_decode_inbound_qos2_publish() {
        let bytes = [0x34, 0x07, 0x00, 0x01, b't', 0x12, 0x34, 0xDE, 0xAD];
        let (packet, _) = Packet::decode(&bytes).unwrap().unwrap();
        let Packet::Publish(p) = packet else {
            panic!("expected publish");
        };
        assert_eq!(p.qos, QoS::ExactlyOnce);
        assert_eq!(p.packet_id, Some(0x1234));
        assert_eq!(p.payload, [0xDE, 0xAD]);
    }

    #[test]
    fn test_truncated_body_is_error() {
        // PUBACK with a one-byte body
        let bytes = [0x40, 0x01, 0x00];
        assert!(matches!(Packet::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unknown_packet_type() {
        let bytes = [0xF0, 0x00];
        assert!(Packet::decode(&bytes).is_err());
    }

    #[test]
    fn test_connack_reason() {
        assert_eq!(connack_reason(0), "accepted");
        assert_eq!(connack_reason(5), "not authorized");
        assert_eq!(connack_reason(42), "unknown return code");
    }
}
