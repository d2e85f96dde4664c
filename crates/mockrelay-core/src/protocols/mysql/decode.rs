//! Length-encoded integer/string helpers and `COM_STMT_EXECUTE` binary
//! parameter decoding.

use crate::error::{Error, Result};

/// A single bound parameter value, downgraded to an opaque representation
/// when its wire type isn't one worth interpreting.
#[derive(Debug, Clone, PartialEq)]
pub enum MySqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

const TINY: u8 = 1;
const SHORT: u8 = 2;
const LONG: u8 = 3;
const FLOAT: u8 = 4;
const DOUBLE: u8 = 5;
const NULL_TYPE: u8 = 6;
const TIMESTAMP: u8 = 7;
const LONGLONG: u8 = 8;
const INT24: u8 = 9;
const DATE: u8 = 10;
const TIME: u8 = 11;
const DATETIME: u8 = 12;
const YEAR: u8 = 13;
const VARCHAR: u8 = 15;
const BIT: u8 = 16;
const NEWDECIMAL: u8 = 246;
const ENUM: u8 = 247;
const SET: u8 = 248;
const TINY_BLOB: u8 = 249;
const MEDIUM_BLOB: u8 = 250;
const LONG_BLOB: u8 = 251;
const BLOB: u8 = 252;
const VAR_STRING: u8 = 253;
const STRING: u8 = 254;
const GEOMETRY: u8 = 255;

/// Read a length-encoded integer, returning `(value, bytes_consumed)`.
pub fn read_lenenc_int(data: &[u8], offset: usize) -> Result<(u64, usize)> {
    if offset >= data.len() {
        return Err(Error::malformed("mysql", "lenenc int truncated"));
    }
    let first = data[offset];
    match first {
        0..=250 => Ok((first as u64, 1)),
        0xfc => {
            let end = offset + 3;
            if end > data.len() {
                return Err(Error::malformed("mysql", "lenenc int (2 byte) truncated"));
            }
            Ok((u16::from_le_bytes([data[offset + 1], data[offset + 2]]) as u64, 3))
        }
        0xfd => {
            let end = offset + 4;
            if end > data.len() {
                return Err(Error::malformed("mysql", "lenenc int (3 byte) truncated"));
            }
            let v = (data[offset + 1] as u64) | ((data[offset + 2] as u64) << 8) | ((data[offset + 3] as u64) << 16);
            Ok((v, 4))
        }
        0xfe => {
            let end = offset + 9;
            if end > data.len() {
                return Err(Error::malformed("mysql", "lenenc int (8 byte) truncated"));
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[offset + 1..end]);
            Ok((u64::from_le_bytes(bytes), 9))
        }
        0xfb => Err(Error::malformed("mysql", "unexpected NULL marker where lenenc int expected")),
        0xff => Err(Error::malformed("mysql", "unexpected error marker where lenenc int expected")),
    }
}

/// Read a length-encoded string, returning `(bytes, total_consumed)`.
pub fn read_lenenc_bytes(data: &[u8], offset: usize) -> Result<(Vec<u8>, usize)> {
    let (len, header_len) = read_lenenc_int(data, offset)?;
    let start = offset + header_len;
    let end = start + len as usize;
    if end > data.len() {
        return Err(Error::malformed("mysql", "lenenc string body truncated"));
    }
    Ok((data[start..end].to_vec(), header_len + len as usize))
}

fn read_date_or_time(data: &[u8], offset: usize) -> Result<(String, usize)> {
    if offset >= data.len() {
        return Err(Error::malformed("mysql", "date/time value truncated"));
    }
    let len = data[offset] as usize;
    let body = &data[offset + 1..];
    if body.len() < len {
        return Err(Error::malformed("mysql", "date/time value body truncated"));
    }
    let s = match len {
        0 => String::new(),
        4 => {
            let year = u16::from_le_bytes([body[0], body[1]]);
            format!("{:04}-{:02}-{:02}", year, body[2], body[3])
        }
        7 | 11 => {
            let year = u16::from_le_bytes([body[0], body[1]]);
            let mut s = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, body[2], body[3], body[4], body[5], body[6]
            );
            if len == 11 {
                let micro = u32::from_le_bytes([body[7], body[8], body[9], body[10]]);
                s.push_str(&format!(".{micro:06}"));
            }
            s
        }
        _ => return Err(Error::malformed("mysql", "unsupported date/time length")),
    };
    Ok((s, 1 + len))
}

/// Decode the bound parameters of a `COM_STMT_EXECUTE` payload.
///
/// `payload` is the command body *after* the leading `0x17` command byte.
/// `param_types` carries the type for each parameter, resolved either from
/// a fresh type array in this execution (when `new_params_bind_flag` is
/// set) or from the prepared statement's remembered types otherwise.
pub fn decode_execute_params(
    payload: &[u8],
    num_params: u16,
    prior_types: Option<&[(u8, u8)]>,
) -> Result<Vec<MySqlValue>> {
    let num_params = num_params as usize;
    if num_params == 0 {
        return Ok(Vec::new());
    }
    // stmt_id(4) + flags(1) + iteration_count(4) already stripped by the caller.
    let null_bitmap_len = (num_params + 7) / 8;
    if payload.len() < null_bitmap_len + 1 {
        return Err(Error::malformed("mysql", "execute payload truncated before bind flag"));
    }
    let null_bitmap = &payload[..null_bitmap_len];
    let mut pos = null_bitmap_len;
    let new_params_bind_flag = payload[pos];
    pos += 1;

    let is_null = |i: usize| -> bool { (null_bitmap[i / 8] >> (i % 8)) & 1 == 1 };

    let types: Vec<(u8, u8)> = if new_params_bind_flag == 1 {
        let mut types = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            if pos + 2 > payload.len() {
                return Err(Error::malformed("mysql", "execute payload truncated in type array"));
            }
            types.push((payload[pos], payload[pos + 1]));
            pos += 2;
        }
        types
    } else {
        match prior_types {
            Some(t) if t.len() == num_params => t.to_vec(),
            _ => {
                return Err(Error::malformed(
                    "mysql",
                    "execute payload omits new parameter types and no prior binding is tracked",
                ))
            }
        }
    };

    let mut values = Vec::with_capacity(num_params);
    for (i, &(type_code, _unsigned)) in types.iter().enumerate() {
        if is_null(i) {
            values.push(MySqlValue::Null);
            continue;
        }
        let value = match type_code {
            TINY => {
                let v = *payload.get(pos).ok_or_else(|| Error::malformed("mysql", "tiny value truncated"))?;
                pos += 1;
                MySqlValue::Int(v as i64)
            }
            SHORT | YEAR => {
                let bytes: [u8; 2] = payload
                    .get(pos..pos + 2)
                    .ok_or_else(|| Error::malformed("mysql", "short value truncated"))?
                    .try_into()
                    .unwrap();
                pos += 2;
                MySqlValue::Int(i16::from_le_bytes(bytes) as i64)
            }
            LONG | INT24 => {
                let bytes: [u8; 4] = payload
                    .get(pos..pos + 4)
                    .ok_or_else(|| Error::malformed("mysql", "long value truncated"))?
                    .try_into()
                    .unwrap();
                pos += 4;
                MySqlValue::Int(i32::from_le_bytes(bytes) as i64)
            }
            LONGLONG => {
                let bytes: [u8; 8] = payload
                    .get(pos..pos + 8)
                    .ok_or_else(|| Error::malformed("mysql", "longlong value truncated"))?
                    .try_into()
                    .unwrap();
                pos += 8;
                MySqlValue::Int(i64::from_le_bytes(bytes))
            }
            FLOAT => {
                let bytes: [u8; 4] = payload
                    .get(pos..pos + 4)
                    .ok_or_else(|| Error::malformed("mysql", "float value truncated"))?
                    .try_into()
                    .unwrap();
                pos += 4;
                MySqlValue::Float(f32::from_le_bytes(bytes) as f64)
            }
            DOUBLE => {
                let bytes: [u8; 8] = payload
                    .get(pos..pos + 8)
                    .ok_or_else(|| Error::malformed("mysql", "double value truncated"))?
                    .try_into()
                    .unwrap();
                pos += 8;
                MySqlValue::Float(f64::from_le_bytes(bytes))
            }
            DATE | DATETIME | TIMESTAMP | TIME => {
                let (s, consumed) = read_date_or_time(payload, pos)?;
                pos += consumed;
                MySqlValue::Text(s)
            }
            NULL_TYPE => MySqlValue::Null,
            VARCHAR | VAR_STRING | STRING | NEWDECIMAL | ENUM | SET | TINY_BLOB | MEDIUM_BLOB | LONG_BLOB
            | BLOB | BIT | GEOMETRY => {
                let (bytes, consumed) = read_lenenc_bytes(payload, pos)?;
                pos += consumed;
                match String::from_utf8(bytes.clone()) {
                    Ok(s) => MySqlValue::Text(s),
                    Err(_) => MySqlValue::Bytes(bytes),
                }
            }
            other => {
                // Unrecognized type: treat the rest of the payload as an
                // opaque blob rather than fail the whole connection.
                tracing::debug!(type_code = other, "downgrading unsupported mysql param type to opaque blob");
                let (bytes, consumed) = read_lenenc_bytes(payload, pos).unwrap_or((Vec::new(), 0));
                pos += consumed.max(1);
                MySqlValue::Bytes(bytes)
            }
        };
        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Statement 945, three NULL parameters, with a fresh type bind.
    #[test]
    fn s2_all_null_params_need_no_values() {
        let mut payload = vec![0x07u8, 0x01]; // null_bitmap=all set, bind_flag=1
        payload.extend_from_slice(&[LONG, 0, LONG, 0, LONG, 0]); // 3 dummy types
        let values = decode_execute_params(&payload, 3, None).unwrap();
        assert_eq!(values, vec![MySqlValue::Null, MySqlValue::Null, MySqlValue::Null]);
    }

    #[test]
    fn s3_datetime_and_varstring_params_decode() {
        let mut payload = Vec::new();
        payload.push(0x00); // null_bitmap: no nulls (1 byte for 2 params)
        payload.push(0x01); // new_params_bind_flag
        payload.extend_from_slice(&[DATETIME, 0x00, VAR_STRING, 0x00]);
        // datetime value: len=7, year=2026 LE, month=1, day=26, hour=18, min=50, sec=45
        payload.extend_from_slice(&[0x07, 0xEA, 0x07, 0x01, 0x1A, 0x12, 0x32, 0x2D]);
        // varstring value: lenenc length=13, "Updated Title"
        payload.push(13);
        payload.extend_from_slice(b"Updated Title");

        let values = decode_execute_params(&payload, 2, None).unwrap();
        assert_eq!(values[0], MySqlValue::Text("2026-01-26 18:50:45".to_string()));
        assert_eq!(values[1], MySqlValue::Text("Updated Title".to_string()));
    }

    #[test]
    fn lenenc_int_two_byte_form() {
        let data = [0xfc, 0x01, 0x02];
        let (value, consumed) = read_lenenc_int(&data, 0).unwrap();
        assert_eq!(value, 0x0201);
        assert_eq!(consumed, 3);
    }
}
