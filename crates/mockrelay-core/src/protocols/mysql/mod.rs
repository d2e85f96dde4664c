//! MySQL engine: connection handshake, capability negotiation, and the
//! command phase (`COM_QUERY`, `COM_STMT_PREPARE/EXECUTE/CLOSE`), with
//! prepared-statement lifecycle tracking across the connection's life.
//!
//! Result-set decoding stops at packet-group boundaries (param defs,
//! column defs, rows, terminator) rather than decoding individual column
//! values — full fidelity of every MySQL type in a result row is out of
//! scope; bodies are stored verbatim per packet.

pub mod decode;
pub mod handshake;
pub mod packet;
pub mod prepared;

use super::{Engine, RecordContext, ReplayContext};
use crate::error::{Error, Result};
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use async_trait::async_trait;
use chrono::Utc;
use handshake::{parse_client_capability_flags, parse_handshake_v10};
use packet::{read_packet, split_packets, write_packet as write_packet_to, Packet};
use prepared::DecodeContext;
use std::collections::HashMap;
use crate::store::MockStore;
use tokio::io::{AsyncRead, AsyncWriteExt};

const COM_QUIT: u8 = 0x01;
const COM_QUERY: u8 = 0x03;
const COM_STMT_PREPARE: u8 = 0x16;
const COM_STMT_EXECUTE: u8 = 0x17;
const COM_STMT_CLOSE: u8 = 0x19;

/// Whether `initial_bytes` looks like a MySQL server greeting: a plausible
/// packet header (small length, sequence_id 0) whose payload starts with
/// `protocol_version == 10`.
pub fn sniff(initial_bytes: &[u8]) -> bool {
    if initial_bytes.len() < 5 {
        return false;
    }
    let len = (initial_bytes[0] as u32) | ((initial_bytes[1] as u32) << 8) | ((initial_bytes[2] as u32) << 16);
    let sequence_id = initial_bytes[3];
    if sequence_id != 0 || len == 0 || len > 1024 {
        return false;
    }
    initial_bytes[4] == 10
}

fn normalize_query(query: &str) -> String {
    query.trim().to_ascii_lowercase()
}

/// Raw bytes of every packet belonging to one logical response group, for
/// storage as a single `Chunk`.
fn concat_raw(packets: &[Vec<u8>]) -> Vec<u8> {
    packets.concat()
}

/// Read one or more complete packets from `stream` into `seed`, returning
/// every packet a single read yielded. This is how a compound write
/// (`CLOSE+PREPARE`, `CLOSE+QUERY`) surfaces as more than one `Packet` from
/// one `read_client_command` call, via `split_packets` over the buffer.
async fn read_client_command<R: AsyncRead + Unpin>(stream: &mut R, seed: &mut Vec<u8>) -> Result<Vec<Packet>> {
    use tokio::io::AsyncReadExt;
    loop {
        let packets = split_packets(seed);
        if !packets.is_empty() {
            let consumed: usize = packets.iter().map(|p| 4 + p.payload.len()).sum();
            seed.drain(..consumed);
            return Ok(packets);
        }
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::malformed("mysql", "eof before a complete command packet"));
        }
        seed.extend_from_slice(&buf[..n]);
    }
}

fn is_ok_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0x00) || payload.first() == Some(&0xfe)
}

fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xff)
}

fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xfe) && payload.len() < 9
}

/// Read a length-prefixed group of "definition" packets (parameters or
/// columns), optionally followed by an EOF terminator when the connection
/// hasn't negotiated `CLIENT_DEPRECATE_EOF`.
async fn read_definition_group<R: AsyncRead + Unpin>(
    stream: &mut R,
    count: u16,
    deprecate_eof: bool,
) -> Result<Vec<u8>> {
    let mut raw_packets = Vec::new();
    for _ in 0..count {
        let (_packet, raw) = read_packet(stream).await?;
        raw_packets.push(raw);
    }
    if !deprecate_eof && count > 0 {
        let (_packet, raw) = read_packet(stream).await?;
        raw_packets.push(raw);
    }
    Ok(concat_raw(&raw_packets))
}

/// Read result-set rows until a terminal packet (OK/ERR/EOF, whichever
/// shape this connection's deprecate-EOF negotiation implies).
async fn read_rows_until_terminal<R: AsyncRead + Unpin>(stream: &mut R, deprecate_eof: bool) -> Result<Vec<u8>> {
    let mut raw_packets = Vec::new();
    loop {
        let (packet, raw) = read_packet(stream).await?;
        let terminal = if deprecate_eof {
            is_ok_packet(&packet.payload) || is_err_packet(&packet.payload)
        } else {
            is_eof_packet(&packet.payload) || is_err_packet(&packet.payload)
        };
        raw_packets.push(raw);
        if terminal {
            break;
        }
    }
    Ok(concat_raw(&raw_packets))
}

fn build_mock(request: Vec<u8>, response: Vec<u8>, connection_id: &str, session_id: &str) -> Result<Mock> {
    let now = Utc::now();
    Mock::new(
        Kind::MySql,
        Spec {
            requests: vec![Chunk::from_bytes(&request)],
            responses: vec![Chunk::from_bytes(&response)],
            req_ts: now,
            res_ts: now,
            metadata: HashMap::new(),
        },
        connection_id,
        session_id,
        false,
    )
}

fn config_mock(response: Vec<u8>, connection_id: &str, session_id: &str) -> Result<Mock> {
    let now = Utc::now();
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), "greeting".to_string());
    Mock::new(
        Kind::MySql,
        Spec {
            requests: vec![],
            responses: vec![Chunk::from_bytes(&response)],
            req_ts: now,
            res_ts: now,
            metadata,
        },
        connection_id,
        session_id,
        true,
    )
}

/// Look up a recorded server-greeting config mock. Moves it from filtered
/// to unfiltered on first use (best-effort; a lost CAS race just means
/// another connection got there first) so later replay connections keep
/// finding it via `unfiltered()`.
fn recorded_greeting(store: &MockStore) -> Option<Vec<u8>> {
    let is_greeting = |m: &Mock| {
        m.kind == Kind::MySql && m.config_mock && m.spec.metadata.get("type").map(String::as_str) == Some("greeting")
    };
    let filtered = store.filtered();
    if let Some(m) = filtered.iter().find(|m| is_greeting(m)) {
        let bytes = m.spec.responses.first()?.to_bytes();
        store.update_unfiltered(&m.id);
        return Some(bytes);
    }
    let unfiltered = store.unfiltered();
    unfiltered
        .iter()
        .find(|m| is_greeting(m))
        .and_then(|m| m.spec.responses.first())
        .map(Chunk::to_bytes)
}

/// A minimal, protocol-valid greeting used when no connection was ever
/// recorded to source one from.
fn synthetic_greeting() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(10);
    payload.extend_from_slice(b"8.0.0\0");
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&[0u8; 8]);
    payload.push(0);
    payload.extend_from_slice(&0xA68Du16.to_le_bytes());
    payload.push(45);
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.push(21);
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&[0u8; 13]);
    payload.extend_from_slice(b"mysql_native_password\0");

    let mut raw = Vec::new();
    raw.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    raw.push(0);
    raw.extend_from_slice(&payload);
    raw
}

/// The MySQL client/server protocol engine.
#[derive(Default)]
pub struct MySqlEngine;

#[async_trait]
impl Engine for MySqlEngine {
    fn kind(&self) -> Kind {
        Kind::MySql
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let max_history = ctx.config.prepared_stmt_history_max;

        // The server speaks first for MySQL, so the intake layer's initial
        // sniff read targets the destination stream rather than the
        // client's; `initial_bytes` therefore already holds the greeting
        // when non-empty, and must not be re-read from the wire.
        let greeting_raw = if ctx.initial_bytes.is_empty() {
            let (_packet, raw) = read_packet(&mut ctx.destination).await?;
            raw
        } else {
            std::mem::take(&mut ctx.initial_bytes)
        };
        ctx.client.write_all(&greeting_raw).await?;
        let greeting_packet = split_packets(&greeting_raw)
            .into_iter()
            .next()
            .ok_or_else(|| Error::malformed("mysql", "greeting bytes did not frame a packet"))?;
        let greeting = parse_handshake_v10(&greeting_packet.payload)?;
        if let Ok(mock) = config_mock(greeting_raw, &ctx.context.client_conn_id, &ctx.context.session_id) {
            ctx.mock_sink.emit(mock).await;
        }

        let mut decode = DecodeContext::new(greeting.capability_flags, max_history);

        // HandshakeResponse41 from the client, forwarded verbatim.
        let (handshake_resp, handshake_raw) = match read_packet(&mut ctx.client).await {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        if let Ok(caps) = parse_client_capability_flags(&handshake_resp.payload) {
            decode.client_caps = Some(caps);
        }
        ctx.destination.write_all(&handshake_raw).await?;

        // Auth result (OK/ERR/auth-switch), forwarded verbatim.
        let (_auth_packet, auth_raw) = match read_packet(&mut ctx.destination).await {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        ctx.client.write_all(&auth_raw).await?;

        let mut client_seed = Vec::new();
        loop {
            let command_packets = match read_client_command(&mut ctx.client, &mut client_seed).await {
                Ok(p) => p,
                Err(_) => break,
            };

            for packet in command_packets {
                if packet.payload.is_empty() {
                    continue;
                }
                let op = packet.payload[0];
                let mut raw = Vec::new();
                raw.extend_from_slice(&(packet.payload.len() as u32).to_le_bytes()[..3]);
                raw.push(packet.sequence_id);
                raw.extend_from_slice(&packet.payload);

                if op == COM_QUIT {
                    ctx.destination.write_all(&raw).await?;
                    return Ok(());
                }

                ctx.destination.write_all(&raw).await?;
                decode.last_op = Some(op);

                match op {
                    COM_STMT_CLOSE if packet.payload.len() >= 5 => {
                        let stmt_id = u32::from_le_bytes(packet.payload[1..5].try_into().unwrap());
                        decode.stmt_history.close(stmt_id);
                        decode.prepared_statements.remove(&stmt_id);
                        continue; // COM_STMT_CLOSE has no response
                    }
                    COM_STMT_PREPARE => {
                        let query = String::from_utf8_lossy(&packet.payload[1..]).into_owned();
                        let response = match read_prepare_response(&mut ctx.destination).await {
                            Ok(r) => r,
                            Err(_) => break,
                        };
                        if let Some((stmt_id, num_params, num_columns)) = parse_prepare_ok(&response) {
                            decode.prepared_statements.insert(stmt_id, (num_params, num_columns));
                            decode.stmt_history.prepare(stmt_id, normalize_query(&query));
                        }
                        ctx.client.write_all(&response).await?;
                        if let Ok(mock) =
                            build_mock(raw, response, &ctx.context.client_conn_id, &ctx.context.session_id)
                        {
                            ctx.mock_sink.emit(mock).await;
                        }
                    }
                    COM_STMT_EXECUTE if packet.payload.len() >= 5 => {
                        let stmt_id = u32::from_le_bytes(packet.payload[1..5].try_into().unwrap());
                        if !decode.prepared_statements.contains_key(&stmt_id) {
                            tracing::warn!(stmt_id, "unknown prepared statement, aborting this command");
                            continue;
                        }
                        let response = match read_result_set(&mut ctx.destination, &decode).await {
                            Ok(r) => r,
                            Err(_) => break,
                        };
                        ctx.client.write_all(&response).await?;
                        if let Ok(mock) =
                            build_mock(raw, response, &ctx.context.client_conn_id, &ctx.context.session_id)
                        {
                            ctx.mock_sink.emit(mock).await;
                        }
                    }
                    COM_QUERY => {
                        let response = match read_result_set(&mut ctx.destination, &decode).await {
                            Ok(r) => r,
                            Err(_) => break,
                        };
                        ctx.client.write_all(&response).await?;
                        if let Ok(mock) =
                            build_mock(raw, response, &ctx.context.client_conn_id, &ctx.context.session_id)
                        {
                            ctx.mock_sink.emit(mock).await;
                        }
                    }
                    _ => {
                        let (_resp_packet, resp_raw) = match read_packet(&mut ctx.destination).await {
                            Ok(v) => v,
                            Err(_) => break,
                        };
                        ctx.client.write_all(&resp_raw).await?;
                        if let Ok(mock) =
                            build_mock(raw, resp_raw, &ctx.context.client_conn_id, &ctx.context.session_id)
                        {
                            ctx.mock_sink.emit(mock).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn replay(&self, mut ctx: ReplayContext) -> Result<()> {
        // MySQL clients wait for the server's greeting before sending
        // anything; replay must speak first even without a real server.
        let greeting_raw = recorded_greeting(&ctx.mock_store).unwrap_or_else(synthetic_greeting);
        ctx.client.write_all(&greeting_raw).await?;

        // Consume the client's HandshakeResponse41 and answer with a bare
        // OK packet so the client considers itself authenticated. Auth
        // plugin negotiation detail isn't replayed; only the command
        // phase is observed by the matcher.
        if let Ok((_resp_packet, _resp_raw)) = read_packet(&mut ctx.client).await {
            let ok_payload = [0x00u8, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
            write_packet_to(&mut ctx.client, 2, &ok_payload).await?;
        } else {
            return Ok(());
        }

        let mut decode = DecodeContext::new(0, ctx.config.prepared_stmt_history_max);
        let mut client_seed = ctx.initial_bytes.clone();
        loop {
            let command_packets = match read_client_command(&mut ctx.client, &mut client_seed).await {
                Ok(p) => p,
                Err(_) => break,
            };

            for packet in command_packets {
                if packet.payload.is_empty() || packet.payload[0] == COM_QUIT {
                    return Ok(());
                }
                let op = packet.payload[0];
                let mut raw = Vec::new();
                raw.extend_from_slice(&(packet.payload.len() as u32).to_le_bytes()[..3]);
                raw.push(packet.sequence_id);
                raw.extend_from_slice(&packet.payload);

                // COM_STMT_CLOSE carries a runtime ID we minted ourselves
                // when the statement was prepared; it has no recorded
                // counterpart to match against and no response either.
                if op == COM_STMT_CLOSE && packet.payload.len() >= 5 {
                    let runtime_id = u32::from_le_bytes(packet.payload[1..5].try_into().unwrap());
                    decode.forget_runtime_stmt_id(runtime_id);
                    continue;
                }

                // COM_STMT_EXECUTE carries the runtime ID the client
                // learned from our replayed COM_STMT_PREPARE response.
                // The recorded mock still has the *originally recorded*
                // statement ID embedded in its request bytes, so rewrite
                // the runtime ID back to that before matching.
                let lookup = if op == COM_STMT_EXECUTE && packet.payload.len() >= 5 {
                    let runtime_id = u32::from_le_bytes(packet.payload[1..5].try_into().unwrap());
                    let mut rewritten = raw.clone();
                    if let Some(recorded_id) = decode.recorded_stmt_id(runtime_id) {
                        rewrite_command_stmt_id(&mut rewritten, recorded_id);
                    }
                    rewritten
                } else {
                    raw.clone()
                };

                match matcher::match_request(&ctx.mock_store, &[lookup]) {
                    Some(mut responses) => {
                        // A successful COM_STMT_PREPARE response embeds
                        // the recorded statement ID; replace it with a
                        // fresh runtime ID before it reaches the client,
                        // and remember the mapping for the EXECUTE/CLOSE
                        // that will reference it.
                        if op == COM_STMT_PREPARE {
                            if let Some(first) = responses.first_mut() {
                                let bytes = first.to_bytes();
                                if let Some((recorded_id, _, _)) = parse_prepare_ok(&bytes) {
                                    let runtime_id = decode.allocate_runtime_stmt_id(recorded_id);
                                    let mut rewritten = bytes;
                                    rewrite_command_stmt_id(&mut rewritten, runtime_id);
                                    *first = Chunk::from_bytes(&rewritten);
                                }
                            }
                        }
                        for chunk in responses {
                            ctx.client.write_all(&chunk.to_bytes()).await?;
                        }
                    }
                    None if ctx.config.fallback_on_miss => {
                        if let Some(dest) = ctx.destination.as_mut() {
                            dest.write_all(&raw).await?;
                            if let Ok((_p, resp_raw)) = read_packet(dest).await {
                                ctx.client.write_all(&resp_raw).await?;
                            }
                        }
                    }
                    None => {
                        tracing::warn!("mysql mock miss with no fallback configured");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Read a `COM_STMT_PREPARE` response: `{stmt_ok}` followed by parameter
/// definitions and column definitions, each optionally EOF-terminated.
async fn read_prepare_response<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let (ok_packet, ok_raw) = read_packet(stream).await?;
    if is_err_packet(&ok_packet.payload) {
        return Ok(ok_raw);
    }
    let (num_params, num_columns) =
        parse_prepare_ok(&ok_raw).map(|(_, p, c)| (p, c)).unwrap_or((0, 0));

    let mut raw = ok_raw;
    // CLIENT_DEPRECATE_EOF has no bearing on the prepare response itself;
    // it always brackets with EOF unless the group is empty.
    if num_params > 0 {
        raw.extend(read_definition_group(stream, num_params, false).await?);
    }
    if num_columns > 0 {
        raw.extend(read_definition_group(stream, num_columns, false).await?);
    }
    Ok(raw)
}

fn parse_prepare_ok(response: &[u8]) -> Option<(u32, u16, u16)> {
    // response is the raw framed COM_STMT_PREPARE_OK packet (header + 12
    // byte payload): status(1) stmt_id(4) num_columns(2) num_params(2) ...
    if response.len() < 4 + 12 {
        return None;
    }
    let payload = &response[4..];
    if payload[0] != 0x00 {
        return None;
    }
    let stmt_id = u32::from_le_bytes(payload[1..5].try_into().unwrap());
    let num_columns = u16::from_le_bytes(payload[5..7].try_into().unwrap());
    let num_params = u16::from_le_bytes(payload[7..9].try_into().unwrap());
    Some((stmt_id, num_params, num_columns))
}

/// Overwrite the statement ID embedded in a `COM_STMT_EXECUTE`/
/// `COM_STMT_CLOSE` command packet (`raw[5..9]`, same offset convention
/// as `parse_prepare_ok`'s response payload).
fn rewrite_command_stmt_id(raw: &mut [u8], stmt_id: u32) {
    if raw.len() >= 9 {
        raw[5..9].copy_from_slice(&stmt_id.to_le_bytes());
    }
}

/// Read a `COM_QUERY`/`COM_STMT_EXECUTE` response: either a direct OK/ERR
/// packet, or `{column_count, columns..., rows...}`.
async fn read_result_set<R: AsyncRead + Unpin>(stream: &mut R, decode: &DecodeContext) -> Result<Vec<u8>> {
    let (first_packet, first_raw) = read_packet(stream).await?;
    if is_ok_packet(&first_packet.payload) || is_err_packet(&first_packet.payload) {
        return Ok(first_raw);
    }
    let (num_columns, _) = decode::read_lenenc_int(&first_packet.payload, 0)?;

    let mut raw = first_raw;
    raw.extend(read_definition_group(stream, num_columns as u16, decode.deprecate_eof()).await?);
    raw.extend(read_rows_until_terminal(stream, decode.deprecate_eof()).await?);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting_bytes() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.push(10);
        payload.extend_from_slice(b"8.0.34\0");
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        payload.push(0);
        payload.extend_from_slice(&0xA68Du16.to_le_bytes());
        payload.push(45);
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.push(21);
        payload.extend_from_slice(&[0u8; 10]);
        payload.extend_from_slice(&[0u8; 13]);
        payload.extend_from_slice(b"caching_sha2_password\0");

        let mut raw = Vec::new();
        raw.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        raw.push(0);
        raw.extend_from_slice(&payload);
        raw
    }

    #[test]
    fn sniffs_the_server_greeting() {
        assert!(sniff(&greeting_bytes()));
    }

    #[test]
    fn rejects_bytes_that_are_not_a_greeting() {
        assert!(!sniff(b"GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn s2_execute_with_all_null_params() {
        // stmt 945, 3 params, all NULL, fresh bind (types present) so the
        // decoder doesn't need prior-type state for this scenario.
        let mut payload = vec![COM_STMT_EXECUTE];
        payload.extend_from_slice(&945u32.to_le_bytes());
        payload.push(0); // flags
        payload.extend_from_slice(&1u32.to_le_bytes()); // iteration_count
        payload.push(0x07); // null_bitmap: all 3 set
        payload.push(0x01); // new_params_bind_flag
        payload.extend_from_slice(&[3, 0, 3, 0, 3, 0]); // 3x LONG

        // strip command(1)+stmt_id(4)+flags(1)+iteration_count(4) to match decode's contract
        let body = &payload[10..];
        let values = decode::decode_execute_params(body, 3, None).unwrap();
        assert_eq!(
            values,
            vec![decode::MySqlValue::Null, decode::MySqlValue::Null, decode::MySqlValue::Null]
        );
    }

    #[test]
    fn parse_prepare_ok_reads_stmt_metadata() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&945u32.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes()); // num_columns
        payload.extend_from_slice(&3u16.to_le_bytes()); // num_params
        payload.extend_from_slice(&[0, 0]); // reserved + warning_count filler

        let mut raw = Vec::new();
        raw.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        raw.push(1);
        raw.extend_from_slice(&payload);

        let (stmt_id, num_params, num_columns) = parse_prepare_ok(&raw).unwrap();
        assert_eq!(stmt_id, 945);
        assert_eq!(num_params, 3);
        assert_eq!(num_columns, 0);
    }

    #[test]
    fn rewrite_command_stmt_id_overwrites_in_place() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&945u32.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(&[0, 0]);

        let mut raw = Vec::new();
        raw.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        raw.push(1);
        raw.extend_from_slice(&payload);

        rewrite_command_stmt_id(&mut raw, 7);
        let (stmt_id, num_params, num_columns) = parse_prepare_ok(&raw).unwrap();
        assert_eq!(stmt_id, 7);
        assert_eq!(num_params, 3);
        assert_eq!(num_columns, 0);
    }

    #[test]
    fn replay_prepare_response_gets_a_fresh_runtime_id_mapped_back_to_the_recorded_one() {
        // Simulates what the replay loop does with a matched PREPARE_OK:
        // mint a runtime id, rewrite it into the response, and remember
        // the mapping so a later EXECUTE can be rewritten back.
        let mut payload = vec![0x00];
        payload.extend_from_slice(&945u32.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(&[0, 0]);
        let mut recorded_response = Vec::new();
        recorded_response.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        recorded_response.push(1);
        recorded_response.extend_from_slice(&payload);

        let mut decode = DecodeContext::new(0, 1000);
        let (recorded_id, _, _) = parse_prepare_ok(&recorded_response).unwrap();
        let runtime_id = decode.allocate_runtime_stmt_id(recorded_id);
        rewrite_command_stmt_id(&mut recorded_response, runtime_id);

        let (seen_by_client, _, _) = parse_prepare_ok(&recorded_response).unwrap();
        assert_eq!(seen_by_client, runtime_id);
        assert_ne!(runtime_id, recorded_id);
        assert_eq!(decode.recorded_stmt_id(runtime_id), Some(recorded_id));

        // The client now sends COM_STMT_EXECUTE against the runtime id;
        // rewriting it back recovers the id the mock was recorded under.
        let mut execute_payload = vec![COM_STMT_EXECUTE];
        execute_payload.extend_from_slice(&runtime_id.to_le_bytes());
        let mut execute_raw = Vec::new();
        execute_raw.extend_from_slice(&(execute_payload.len() as u32).to_le_bytes()[..3]);
        execute_raw.push(2);
        execute_raw.extend_from_slice(&execute_payload);

        rewrite_command_stmt_id(&mut execute_raw, decode.recorded_stmt_id(runtime_id).unwrap());
        let rewritten_id = u32::from_le_bytes(execute_raw[5..9].try_into().unwrap());
        assert_eq!(rewritten_id, recorded_id);
    }
}
