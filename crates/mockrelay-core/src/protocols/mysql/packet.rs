//! MySQL packet framing: `{payload_len: u24 LE, sequence_id: u8, payload}`.

use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One framed MySQL packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Sequence number, alternating per round-trip within a command.
    pub sequence_id: u8,
    /// The packet payload (header stripped).
    pub payload: Vec<u8>,
}

fn u24_le(data: &[u8]) -> u32 {
    (data[0] as u32) | ((data[1] as u32) << 8) | ((data[2] as u32) << 16)
}

/// Read one packet's header + payload from `stream`, returning it along
/// with the raw framed bytes (header included) for mock storage.
pub async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> Result<(Packet, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = u24_le(&header[..3]) as usize;
    let sequence_id = header[3];

    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await?;
    }

    let mut raw = Vec::with_capacity(4 + len);
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&payload);

    Ok((Packet { sequence_id, payload }, raw))
}

/// Frame and write a packet.
pub async fn write_packet<W: AsyncWrite + Unpin>(stream: &mut W, sequence_id: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > 0x00FF_FFFF {
        return Err(Error::malformed("mysql", "packet payload exceeds 16MiB framing limit"));
    }
    let len = payload.len() as u32;
    let mut header = [0u8; 4];
    header[0] = (len & 0xFF) as u8;
    header[1] = ((len >> 8) & 0xFF) as u8;
    header[2] = ((len >> 16) & 0xFF) as u8;
    header[3] = sequence_id;
    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    Ok(())
}

/// Split every complete packet out of `buf`, for the compound-packet case
/// where a single network write contains more than one MySQL packet (e.g.
/// `CLOSE+PREPARE`, `CLOSE+QUERY`). Ignores a trailing partial packet.
pub fn split_packets(buf: &[u8]) -> Vec<Packet> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while offset + 4 <= buf.len() {
        let len = u24_le(&buf[offset..offset + 3]) as usize;
        let sequence_id = buf[offset + 3];
        let payload_start = offset + 4;
        let payload_end = payload_start + len;
        if payload_end > buf.len() {
            break;
        }
        packets.push(Packet {
            sequence_id,
            payload: buf[payload_start..payload_end].to_vec(),
        });
        offset = payload_end;
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_packet() {
        let (mut a, mut b) = duplex(128);
        tokio::spawn(async move {
            write_packet(&mut b, 3, b"hello").await.unwrap();
        });
        let (packet, raw) = read_packet(&mut a).await.unwrap();
        assert_eq!(packet.sequence_id, 3);
        assert_eq!(packet.payload, b"hello");
        assert_eq!(raw.len(), 9);
    }

    #[test]
    fn splits_a_compound_close_prepare_write() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[5, 0, 0, 0]); // len=5
        buf.extend_from_slice(b"close");
        buf.extend_from_slice(&[7, 0, 0, 1]); // len=7
        buf.extend_from_slice(b"prepare");
        let packets = split_packets(&buf);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload, b"close");
        assert_eq!(packets[1].payload, b"prepare");
        assert_eq!(packets[1].sequence_id, 1);
    }

    #[test]
    fn ignores_a_trailing_partial_packet() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[5, 0, 0, 0]);
        buf.extend_from_slice(b"close");
        buf.extend_from_slice(&[9, 0, 0, 1]); // claims len=9 but only 2 bytes follow
        buf.extend_from_slice(b"pr");
        let packets = split_packets(&buf);
        assert_eq!(packets.len(), 1);
    }
}
