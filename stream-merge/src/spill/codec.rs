//! Binary framing for spilled rows.
//!
//! Each spill record is `[u32 source][u16 field count][tagged cells]`,
//! little-endian, preceded on disk by a `u32` frame length written by the
//! buffer. The encoding is private to a single engine run; no cross-process
//! or cross-version compatibility is promised.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate};

use crate::error::{MergeError, MergeResult};
use crate::types::{Cell, Row};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I32: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_F64: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_DATE: u8 = 7;
const TAG_TIMESTAMP: u8 = 8;
const TAG_TIMESTAMPTZ: u8 = 9;
const TAG_UUID: u8 = 10;
const TAG_JSON: u8 = 11;

/// Encodes one spill record body for the given source.
pub fn encode_record(source: u32, row: &Row) -> MergeResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(16 + row.len() * 8);
    buf.write_u32::<LittleEndian>(source)?;
    buf.write_u16::<LittleEndian>(row.len() as u16)?;
    for cell in row.values() {
        encode_cell(&mut buf, cell)?;
    }

    Ok(buf)
}

/// Decodes one spill record body, returning the source it was captured from
/// and the row values in their original order.
pub fn decode_record(frame: &[u8]) -> MergeResult<(u32, Row)> {
    let mut cursor = Cursor::new(frame);
    let source = read_or_corrupt(cursor.read_u32::<LittleEndian>())?;
    let field_count = read_or_corrupt(cursor.read_u16::<LittleEndian>())?;

    let mut values = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        values.push(decode_cell(&mut cursor)?);
    }

    Ok((source, Row::new(values)))
}

fn encode_cell(buf: &mut Vec<u8>, cell: &Cell) -> MergeResult<()> {
    match cell {
        Cell::Null => buf.write_u8(TAG_NULL)?,
        Cell::Bool(value) => {
            buf.write_u8(TAG_BOOL)?;
            buf.write_u8(*value as u8)?;
        }
        Cell::I32(value) => {
            buf.write_u8(TAG_I32)?;
            buf.write_i32::<LittleEndian>(*value)?;
        }
        Cell::I64(value) => {
            buf.write_u8(TAG_I64)?;
            buf.write_i64::<LittleEndian>(*value)?;
        }
        Cell::F64(value) => {
            buf.write_u8(TAG_F64)?;
            buf.write_f64::<LittleEndian>(*value)?;
        }
        Cell::String(value) => {
            buf.write_u8(TAG_STRING)?;
            write_bytes(buf, value.as_bytes())?;
        }
        Cell::Bytes(value) => {
            buf.write_u8(TAG_BYTES)?;
            write_bytes(buf, value)?;
        }
        Cell::Date(value) => {
            buf.write_u8(TAG_DATE)?;
            buf.write_i32::<LittleEndian>(value.num_days_from_ce())?;
        }
        Cell::Timestamp(value) => {
            buf.write_u8(TAG_TIMESTAMP)?;
            buf.write_i64::<LittleEndian>(value.and_utc().timestamp_micros())?;
        }
        Cell::TimestampTz(value) => {
            buf.write_u8(TAG_TIMESTAMPTZ)?;
            buf.write_i64::<LittleEndian>(value.timestamp_micros())?;
        }
        Cell::Uuid(value) => {
            buf.write_u8(TAG_UUID)?;
            buf.write_all(value.as_bytes())?;
        }
        Cell::Json(value) => {
            buf.write_u8(TAG_JSON)?;
            let encoded = serde_json::to_vec(value)
                .map_err(|err| MergeError::SpillCorrupt(format!("json encode failed: {err}")))?;
            write_bytes(buf, &encoded)?;
        }
    }

    Ok(())
}

fn decode_cell(cursor: &mut Cursor<&[u8]>) -> MergeResult<Cell> {
    let tag = read_or_corrupt(cursor.read_u8())?;
    let cell = match tag {
        TAG_NULL => Cell::Null,
        TAG_BOOL => Cell::Bool(read_or_corrupt(cursor.read_u8())? != 0),
        TAG_I32 => Cell::I32(read_or_corrupt(cursor.read_i32::<LittleEndian>())?),
        TAG_I64 => Cell::I64(read_or_corrupt(cursor.read_i64::<LittleEndian>())?),
        TAG_F64 => Cell::F64(read_or_corrupt(cursor.read_f64::<LittleEndian>())?),
        TAG_STRING => {
            let bytes = read_bytes(cursor)?;
            let text = String::from_utf8(bytes)
                .map_err(|err| MergeError::SpillCorrupt(format!("invalid utf-8: {err}")))?;
            Cell::String(text)
        }
        TAG_BYTES => Cell::Bytes(read_bytes(cursor)?),
        TAG_DATE => {
            let days = read_or_corrupt(cursor.read_i32::<LittleEndian>())?;
            let date = NaiveDate::from_num_days_from_ce_opt(days)
                .ok_or_else(|| MergeError::SpillCorrupt(format!("date out of range: {days}")))?;
            Cell::Date(date)
        }
        TAG_TIMESTAMP => {
            let micros = read_or_corrupt(cursor.read_i64::<LittleEndian>())?;
            let ts = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                MergeError::SpillCorrupt(format!("timestamp out of range: {micros}"))
            })?;
            Cell::Timestamp(ts.naive_utc())
        }
        TAG_TIMESTAMPTZ => {
            let micros = read_or_corrupt(cursor.read_i64::<LittleEndian>())?;
            let ts = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                MergeError::SpillCorrupt(format!("timestamp out of range: {micros}"))
            })?;
            Cell::TimestampTz(ts)
        }
        TAG_UUID => {
            let mut bytes = [0u8; 16];
            read_exact_or_corrupt(cursor, &mut bytes)?;
            Cell::Uuid(uuid::Uuid::from_bytes(bytes))
        }
        TAG_JSON => {
            let bytes = read_bytes(cursor)?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|err| MergeError::SpillCorrupt(format!("invalid json: {err}")))?;
            Cell::Json(value)
        }
        other => {
            return Err(MergeError::SpillCorrupt(format!(
                "unknown cell tag: {other}"
            )));
        }
    };

    Ok(cell)
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> MergeResult<()> {
    buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
    buf.write_all(bytes)?;

    Ok(())
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> MergeResult<Vec<u8>> {
    let len = read_or_corrupt(cursor.read_u32::<LittleEndian>())? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(MergeError::SpillCorrupt(format!(
            "payload length {len} exceeds remaining frame bytes {remaining}"
        )));
    }

    let mut bytes = vec![0u8; len];
    read_exact_or_corrupt(cursor, &mut bytes)?;

    Ok(bytes)
}

fn read_exact_or_corrupt(cursor: &mut Cursor<&[u8]>, bytes: &mut [u8]) -> MergeResult<()> {
    cursor
        .read_exact(bytes)
        .map_err(|_| MergeError::SpillCorrupt("truncated frame".to_string()))
}

fn read_or_corrupt<T>(result: std::io::Result<T>) -> MergeResult<T> {
    result.map_err(|_| MergeError::SpillCorrupt("truncated frame".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_record_roundtrip_preserves_values() {
        let row = Row::new(vec![
            Cell::Null,
            Cell::Bool(true),
            Cell::I32(-7),
            Cell::I64(1 << 40),
            Cell::F64(2.25),
            Cell::String("guava".to_string()),
            Cell::Bytes(vec![0, 1, 255]),
            Cell::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()),
            Cell::Timestamp(
                NaiveDate::from_ymd_opt(2024, 3, 9)
                    .unwrap()
                    .and_hms_micro_opt(1, 2, 3, 4)
                    .unwrap(),
            ),
            Cell::TimestampTz(Utc.with_ymd_and_hms(2024, 3, 9, 1, 2, 3).unwrap()),
            Cell::Uuid(uuid::Uuid::new_v4()),
            Cell::Json(serde_json::json!({"k": [1, 2]})),
        ]);

        let frame = encode_record(3, &row).unwrap();
        let (source, decoded) = decode_record(&frame).unwrap();

        assert_eq!(source, 3);
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_truncated_frame_is_corrupt() {
        let row = Row::new(vec![Cell::String("hov".to_string())]);
        let frame = encode_record(0, &row).unwrap();

        let result = decode_record(&frame[..frame.len() - 1]);

        assert!(matches!(result, Err(MergeError::SpillCorrupt(_))));
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let row = Row::new(vec![Cell::Null]);
        let mut frame = encode_record(0, &row).unwrap();
        // Overwrite the cell tag with an unassigned value.
        let tag_offset = frame.len() - 1;
        frame[tag_offset] = 0x7f;

        let result = decode_record(&frame);

        assert!(matches!(result, Err(MergeError::SpillCorrupt(_))));
    }

    #[test]
    fn test_oversized_payload_length_is_corrupt() {
        let row = Row::new(vec![Cell::String("x".to_string())]);
        let mut frame = encode_record(0, &row).unwrap();
        // The string length prefix sits after source, field count and tag.
        let len_offset = 4 + 2 + 1;
        frame[len_offset..len_offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());

        let result = decode_record(&frame);

        assert!(matches!(result, Err(MergeError::SpillCorrupt(_))));
    }
}
