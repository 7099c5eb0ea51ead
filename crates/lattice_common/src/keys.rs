//! Key codecs for vertex rows, edge rows, and secondary index entries.
//!
//! Every key starts with the owning partition id so partition scans are
//! prefix scans. Signed integers are bias-encoded so lexicographic byte
//! order equals numeric order. Edge keys keep the signed edge type: the
//! positive value is the out-edge in the source partition, its negation the
//! in-edge in the destination partition.

use crate::schema::IndexItem;
use crate::types::{EdgeType, IndexId, PartId, Rank, TagId};
use crate::value::{Date, Value, ValueKind};

const KEY_TYPE_VERTEX: u8 = 1;
const KEY_TYPE_EDGE: u8 = 2;
const KEY_TYPE_INDEX: u8 = 3;

/// Order-preserving encoding of an i64.
pub fn encode_i64(v: i64) -> [u8; 8] {
    ((v ^ i64::MIN) as u64).to_be_bytes()
}

pub fn decode_i64(bytes: &[u8]) -> i64 {
    let raw = u64::from_be_bytes(bytes[..8].try_into().unwrap());
    (raw as i64) ^ i64::MIN
}

/// Order-preserving encoding of an i32.
pub fn encode_i32(v: i32) -> [u8; 4] {
    ((v ^ i32::MIN) as u32).to_be_bytes()
}

pub fn decode_i32(bytes: &[u8]) -> i32 {
    let raw = u32::from_be_bytes(bytes[..4].try_into().unwrap());
    (raw as i32) ^ i32::MIN
}

/// Order-preserving encoding of an f64 (sign-flip for positives, complement
/// for negatives).
pub fn encode_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let mapped = if bits & (1 << 63) == 0 {
        bits | (1 << 63)
    } else {
        !bits
    };
    mapped.to_be_bytes()
}

pub fn decode_f64(bytes: &[u8]) -> f64 {
    let mapped = u64::from_be_bytes(bytes[..8].try_into().unwrap());
    let bits = if mapped & (1 << 63) != 0 {
        mapped & !(1 << 63)
    } else {
        !mapped
    };
    f64::from_bits(bits)
}

fn pad_vid(vid: &[u8], vid_len: usize) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(
        vid.len() <= vid_len,
        "vertex id of {} bytes exceeds space vid_len {vid_len}",
        vid.len()
    );
    let mut out = vid.to_vec();
    out.resize(vid_len, 0);
    Ok(out)
}

/// Strip the zero padding applied by `pad_vid`.
pub fn trim_vid(vid: &[u8]) -> &[u8] {
    let end = vid.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    &vid[..end]
}

/// Row key of a tagged vertex.
pub fn vertex_key(vid_len: usize, part: PartId, vid: &[u8], tag: TagId) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + 1 + vid_len + 4);
    out.extend_from_slice(&part.to_be_bytes());
    out.push(KEY_TYPE_VERTEX);
    out.extend_from_slice(&pad_vid(vid, vid_len)?);
    out.extend_from_slice(&tag.to_be_bytes());
    Ok(out)
}

/// Row key of one side of an edge. The caller picks the sign of `edge_type`
/// and the matching partition.
pub fn edge_key(
    vid_len: usize,
    part: PartId,
    src: &[u8],
    edge_type: EdgeType,
    rank: Rank,
    dst: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + 1 + vid_len * 2 + 4 + 8);
    out.extend_from_slice(&part.to_be_bytes());
    out.push(KEY_TYPE_EDGE);
    out.extend_from_slice(&pad_vid(src, vid_len)?);
    out.extend_from_slice(&encode_i32(edge_type));
    out.extend_from_slice(&encode_i64(rank));
    out.extend_from_slice(&pad_vid(dst, vid_len)?);
    Ok(out)
}

/// Parsed form of an edge row key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeKeyParts {
    pub part: PartId,
    pub src: Vec<u8>,
    pub edge_type: EdgeType,
    pub rank: Rank,
    pub dst: Vec<u8>,
}

pub fn parse_edge_key(vid_len: usize, key: &[u8]) -> anyhow::Result<EdgeKeyParts> {
    let expect = 4 + 1 + vid_len * 2 + 4 + 8;
    anyhow::ensure!(key.len() == expect, "edge key length {} != {expect}", key.len());
    anyhow::ensure!(key[4] == KEY_TYPE_EDGE, "not an edge key");
    let part = PartId::from_be_bytes(key[..4].try_into().unwrap());
    let mut offset = 5;
    let src = trim_vid(&key[offset..offset + vid_len]).to_vec();
    offset += vid_len;
    let edge_type = decode_i32(&key[offset..offset + 4]);
    offset += 4;
    let rank = decode_i64(&key[offset..offset + 8]);
    offset += 8;
    let dst = trim_vid(&key[offset..offset + vid_len]).to_vec();
    Ok(EdgeKeyParts {
        part,
        src,
        edge_type,
        rank,
        dst,
    })
}

/// Prefix covering every row of one partition.
pub fn part_prefix(part: PartId) -> Vec<u8> {
    part.to_be_bytes().to_vec()
}

/// Prefix covering all edge rows of one partition.
pub fn edge_part_prefix(part: PartId) -> Vec<u8> {
    let mut out = part.to_be_bytes().to_vec();
    out.push(KEY_TYPE_EDGE);
    out
}

/// Prefix covering every entry of one index in one partition.
pub fn index_prefix(part: PartId, index_id: IndexId) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 1 + 4);
    out.extend_from_slice(&part.to_be_bytes());
    out.push(KEY_TYPE_INDEX);
    out.extend_from_slice(&index_id.to_be_bytes());
    out
}

/// Primary-row locator carried in the tail of an index entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexKeyTail {
    Vertex {
        vid: Vec<u8>,
    },
    Edge {
        src: Vec<u8>,
        rank: Rank,
        dst: Vec<u8>,
    },
}

/// Build one index entry key.
///
/// Layout after the `index_prefix`: the encoded field values (strings raw,
/// fixed-width columns bias-encoded), then one u16 length per string column,
/// then a u16 null bitmap iff the index has a nullable column, then the
/// primary-row tail. Null values occupy a zero slot and set their bitmap bit.
pub fn index_key(
    vid_len: usize,
    part: PartId,
    index: &IndexItem,
    values: &[Value],
    tail: &IndexKeyTail,
) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(
        values.len() == index.fields.len(),
        "index {} expects {} values, got {}",
        index.index_id,
        index.fields.len(),
        values.len()
    );

    let mut out = index_prefix(part, index.index_id);
    let mut str_lens: Vec<u16> = Vec::with_capacity(index.var_col_num());
    let mut null_bits: u16 = 0;

    for (pos, (col, value)) in index.fields.iter().zip(values.iter()).enumerate() {
        let kind = col.prop_type.value_kind();
        if value.is_null() {
            anyhow::ensure!(col.nullable, "null value for non-nullable index column");
            null_bits |= 1 << pos;
            match kind {
                ValueKind::Str => str_lens.push(0),
                ValueKind::Bool => out.push(0),
                ValueKind::Int | ValueKind::Float | ValueKind::DateTime => {
                    out.extend_from_slice(&[0u8; 8])
                }
                ValueKind::Date => out.extend_from_slice(&[0u8; 4]),
                _ => anyhow::bail!("unsupported index column kind {kind:?}"),
            }
            continue;
        }
        match (kind, value) {
            (ValueKind::Bool, Value::Bool(b)) => out.push(*b as u8),
            (ValueKind::Int, Value::Int(i)) => out.extend_from_slice(&encode_i64(*i)),
            (ValueKind::Float, Value::Float(x)) => out.extend_from_slice(&encode_f64(*x)),
            (ValueKind::DateTime, Value::DateTime(ms)) => {
                out.extend_from_slice(&encode_i64(*ms))
            }
            (ValueKind::Date, Value::Date(d)) => {
                let biased = (d.year as i32 + 0x8000) as u16;
                out.extend_from_slice(&biased.to_be_bytes());
                out.push(d.month);
                out.push(d.day);
            }
            (ValueKind::Str, Value::Str(s)) => {
                anyhow::ensure!(s.len() <= u16::MAX as usize, "index string too long");
                out.extend_from_slice(s.as_bytes());
                str_lens.push(s.len() as u16);
            }
            _ => anyhow::bail!(
                "value {value:?} does not match index column {:?}",
                col.prop_type
            ),
        }
    }

    for len in &str_lens {
        out.extend_from_slice(&len.to_be_bytes());
    }
    if index.has_nullable_col() {
        out.extend_from_slice(&null_bits.to_be_bytes());
    }

    match tail {
        IndexKeyTail::Vertex { vid } => out.extend_from_slice(&pad_vid(vid, vid_len)?),
        IndexKeyTail::Edge { src, rank, dst } => {
            out.extend_from_slice(&pad_vid(src, vid_len)?);
            out.extend_from_slice(&encode_i64(*rank));
            out.extend_from_slice(&pad_vid(dst, vid_len)?);
        }
    }
    Ok(out)
}

fn tail_len(vid_len: usize, is_edge: bool) -> usize {
    if is_edge {
        vid_len * 2 + 8
    } else {
        vid_len
    }
}

/// Recover the primary-row locator from an index entry key.
pub fn parse_index_tail(
    key: &[u8],
    vid_len: usize,
    is_edge: bool,
) -> anyhow::Result<IndexKeyTail> {
    let tail = tail_len(vid_len, is_edge);
    anyhow::ensure!(key.len() >= tail, "index key shorter than its tail");
    let tail_bytes = &key[key.len() - tail..];
    if is_edge {
        let src = trim_vid(&tail_bytes[..vid_len]).to_vec();
        let rank = decode_i64(&tail_bytes[vid_len..vid_len + 8]);
        let dst = trim_vid(&tail_bytes[vid_len + 8..]).to_vec();
        Ok(IndexKeyTail::Edge { src, rank, dst })
    } else {
        Ok(IndexKeyTail::Vertex {
            vid: trim_vid(tail_bytes).to_vec(),
        })
    }
}

/// Decode the indexed column values out of an index entry key.
///
/// `cols` is the planner-recorded `(name, kind)` list; `v_col_num` and
/// `has_nullable` describe the suffix layout exactly as the planner counted
/// them when the plan was built.
pub fn decode_index_values(
    key: &[u8],
    vid_len: usize,
    is_edge: bool,
    cols: &[(String, ValueKind)],
    v_col_num: usize,
    has_nullable: bool,
) -> anyhow::Result<Vec<Value>> {
    let tail = tail_len(vid_len, is_edge);
    let bitmap_len = if has_nullable { 2 } else { 0 };
    let lens_len = v_col_num * 2;
    anyhow::ensure!(
        key.len() >= 4 + 1 + 4 + lens_len + bitmap_len + tail,
        "index key too short for its layout"
    );

    let suffix_start = key.len() - tail - bitmap_len - lens_len;
    let mut str_lens = Vec::with_capacity(v_col_num);
    for i in 0..v_col_num {
        let at = suffix_start + i * 2;
        str_lens.push(u16::from_be_bytes(key[at..at + 2].try_into().unwrap()) as usize);
    }
    let null_bits = if has_nullable {
        let at = key.len() - tail - 2;
        u16::from_be_bytes(key[at..at + 2].try_into().unwrap())
    } else {
        0
    };

    let mut offset = 4 + 1 + 4;
    let mut next_str = 0usize;
    let mut out = Vec::with_capacity(cols.len());
    for (pos, (_, kind)) in cols.iter().enumerate() {
        let is_null = null_bits & (1 << pos) != 0;
        let value = match kind {
            ValueKind::Bool => {
                let v = Value::Bool(key[offset] != 0);
                offset += 1;
                v
            }
            ValueKind::Int => {
                let v = Value::Int(decode_i64(&key[offset..offset + 8]));
                offset += 8;
                v
            }
            ValueKind::Float => {
                let v = Value::Float(decode_f64(&key[offset..offset + 8]));
                offset += 8;
                v
            }
            ValueKind::DateTime => {
                let v = Value::DateTime(decode_i64(&key[offset..offset + 8]));
                offset += 8;
                v
            }
            ValueKind::Date => {
                let biased = u16::from_be_bytes(key[offset..offset + 2].try_into().unwrap());
                let year = (biased as i32 - 0x8000) as i16;
                let v = Value::Date(Date {
                    year,
                    month: key[offset + 2],
                    day: key[offset + 3],
                });
                offset += 4;
                v
            }
            ValueKind::Str => {
                let len = str_lens[next_str];
                next_str += 1;
                anyhow::ensure!(offset + len <= suffix_start, "index string overruns suffix");
                let v = Value::Str(String::from_utf8_lossy(&key[offset..offset + len]).into_owned());
                offset += len;
                v
            }
            other => anyhow::bail!("unsupported index column kind {other:?}"),
        };
        out.push(if is_null { Value::Null } else { value });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::value::PropertyType;

    #[test]
    fn biased_ints_sort_like_numbers() {
        let mut values = vec![-5i64, i64::MIN, 42, 0, i64::MAX, -1];
        let mut encoded: Vec<[u8; 8]> = values.iter().map(|v| encode_i64(*v)).collect();
        values.sort();
        encoded.sort();
        let decoded: Vec<i64> = encoded.iter().map(|b| decode_i64(b)).collect();
        assert_eq!(values, decoded);
    }

    #[test]
    fn floats_sort_like_numbers() {
        let mut values = vec![-3.5f64, 0.0, 1.25, -0.5, 1e300, -1e300];
        let mut encoded: Vec<[u8; 8]> = values.iter().map(|v| encode_f64(*v)).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        encoded.sort();
        let decoded: Vec<f64> = encoded.iter().map(|b| decode_f64(b)).collect();
        assert_eq!(values, decoded);
    }

    #[test]
    fn edge_key_round_trip_keeps_sign() {
        let key = edge_key(8, 3, b"src", -12, -7, b"dst").unwrap();
        let parts = parse_edge_key(8, &key).unwrap();
        assert_eq!(
            parts,
            EdgeKeyParts {
                part: 3,
                src: b"src".to_vec(),
                edge_type: -12,
                rank: -7,
                dst: b"dst".to_vec(),
            }
        );
    }

    #[test]
    fn out_and_in_edge_keys_differ() {
        let out_key = edge_key(8, 1, b"a", 5, 0, b"b").unwrap();
        let in_key = edge_key(8, 2, b"b", -5, 0, b"a").unwrap();
        assert_ne!(out_key, in_key);
        assert!(out_key.starts_with(&edge_part_prefix(1)));
        assert!(in_key.starts_with(&edge_part_prefix(2)));
    }

    fn sample_index() -> IndexItem {
        IndexItem {
            index_id: 11,
            schema_id: 2,
            is_edge: false,
            fields: vec![
                ColumnDef::new("c1", PropertyType::Int),
                ColumnDef::new("c2", PropertyType::String).nullable(),
            ],
        }
    }

    #[test]
    fn index_key_round_trip() {
        let index = sample_index();
        let values = vec![Value::Int(42), Value::Str("hello".into())];
        let tail = IndexKeyTail::Vertex { vid: b"v1".to_vec() };
        let key = index_key(8, 4, &index, &values, &tail).unwrap();
        assert!(key.starts_with(&index_prefix(4, 11)));

        let cols = vec![
            ("c1".to_string(), ValueKind::Int),
            ("c2".to_string(), ValueKind::Str),
        ];
        let decoded = decode_index_values(&key, 8, false, &cols, 1, true).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(parse_index_tail(&key, 8, false).unwrap(), tail);
    }

    #[test]
    fn index_key_null_column() {
        let index = sample_index();
        let values = vec![Value::Int(1), Value::Null];
        let tail = IndexKeyTail::Vertex { vid: b"v2".to_vec() };
        let key = index_key(8, 4, &index, &values, &tail).unwrap();

        let cols = vec![
            ("c1".to_string(), ValueKind::Int),
            ("c2".to_string(), ValueKind::Str),
        ];
        let decoded = decode_index_values(&key, 8, false, &cols, 1, true).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn edge_index_tail_round_trip() {
        let index = IndexItem {
            index_id: 7,
            schema_id: 9,
            is_edge: true,
            fields: vec![ColumnDef::new("w", PropertyType::Int)],
        };
        let tail = IndexKeyTail::Edge {
            src: b"a".to_vec(),
            rank: 3,
            dst: b"b".to_vec(),
        };
        let key = index_key(8, 1, &index, &[Value::Int(10)], &tail).unwrap();
        assert_eq!(parse_index_tail(&key, 8, true).unwrap(), tail);
    }
}
