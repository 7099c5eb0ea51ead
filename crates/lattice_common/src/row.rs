//! Row codec: encodes property values against exactly one schema version.
//!
//! Layout is a fixed-slot region with a trailing var region for strings and
//! lists, preceded by a null bitmap covering the schema's nullable columns:
//!
//! ```text
//! u8 format | u32 schema version | null bitmap | fixed slots | var region
//! ```
//!
//! All integral fields are big-endian. String and list slots hold
//! `(offset, len)` pairs into the var region.

use crate::schema::Schema;
use crate::value::{Date, PropertyType, Value};

const ROW_FORMAT: u8 = 2;

/// Faults surfaced by the row writer. The storage processors translate these
/// into wire error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteFault {
    UnknownField,
    NotNullable,
    TypeMismatch,
    FieldUnset,
    OutOfRange,
    IncorrectValue,
}

fn slot_width(ty: &PropertyType) -> usize {
    match ty {
        PropertyType::Bool => 1,
        PropertyType::Int | PropertyType::Float | PropertyType::DateTime => 8,
        PropertyType::Date => 4,
        PropertyType::String | PropertyType::List => 8,
        PropertyType::FixedString(n) => *n as usize,
    }
}

/// Builder that collects values and emits one encoded row.
pub struct RowWriter<'a> {
    schema: &'a Schema,
    values: Vec<Option<Value>>,
}

impl<'a> RowWriter<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            values: vec![None; schema.columns.len()],
        }
    }

    /// Set a field by name.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), WriteFault> {
        let idx = self
            .schema
            .field_index(name)
            .ok_or(WriteFault::UnknownField)?;
        self.set_at(idx, value)
    }

    /// Set a field by schema position.
    pub fn set_at(&mut self, idx: usize, value: Value) -> Result<(), WriteFault> {
        let col = self.schema.columns.get(idx).ok_or(WriteFault::UnknownField)?;
        if value.is_null() {
            if !col.nullable {
                return Err(WriteFault::NotNullable);
            }
            self.values[idx] = Some(Value::Null);
            return Ok(());
        }
        if !value.matches(&col.prop_type) {
            return Err(WriteFault::TypeMismatch);
        }
        check_range(&col.prop_type, &value)?;
        self.values[idx] = Some(value);
        Ok(())
    }

    /// Finish the row: unset columns fall back to their default, then to
    /// null when nullable, and otherwise fault with `FieldUnset`.
    pub fn finish(mut self) -> Result<Vec<u8>, WriteFault> {
        for (idx, col) in self.schema.columns.iter().enumerate() {
            if self.values[idx].is_some() {
                continue;
            }
            if let Some(default) = &col.default {
                if !default.matches(&col.prop_type) {
                    return Err(WriteFault::TypeMismatch);
                }
                self.values[idx] = Some(default.clone());
            } else if col.nullable {
                self.values[idx] = Some(Value::Null);
            } else {
                return Err(WriteFault::FieldUnset);
            }
        }

        let nullable_count = self.schema.nullable_count();
        let bitmap_len = (nullable_count + 7) / 8;
        let fixed_len: usize = self
            .schema
            .columns
            .iter()
            .map(|c| slot_width(&c.prop_type))
            .sum();

        let mut out = Vec::with_capacity(1 + 4 + bitmap_len + fixed_len);
        out.push(ROW_FORMAT);
        out.extend_from_slice(&self.schema.version.to_be_bytes());
        out.extend_from_slice(&vec![0u8; bitmap_len]);

        let bitmap_start = 1 + 4;
        let mut var = Vec::new();
        let mut nullable_seen = 0usize;

        for (idx, col) in self.schema.columns.iter().enumerate() {
            let value = self.values[idx].as_ref().expect("all values resolved");
            let null_bit = if col.nullable {
                let bit = nullable_seen;
                nullable_seen += 1;
                Some(bit)
            } else {
                None
            };

            if value.is_null() {
                let bit = null_bit.expect("null only reaches nullable columns");
                out[bitmap_start + bit / 8] |= 1 << (bit % 8);
                // The slot still occupies its width, zero-filled.
                out.extend_from_slice(&vec![0u8; slot_width(&col.prop_type)]);
                continue;
            }

            match (&col.prop_type, value) {
                (PropertyType::Bool, Value::Bool(b)) => out.push(*b as u8),
                (PropertyType::Int, Value::Int(i)) => out.extend_from_slice(&i.to_be_bytes()),
                (PropertyType::Float, Value::Float(x)) => {
                    out.extend_from_slice(&x.to_be_bytes())
                }
                (PropertyType::DateTime, Value::DateTime(ms)) => {
                    out.extend_from_slice(&ms.to_be_bytes())
                }
                (PropertyType::Date, Value::Date(d)) => {
                    out.extend_from_slice(&d.year.to_be_bytes());
                    out.push(d.month);
                    out.push(d.day);
                }
                (PropertyType::FixedString(n), Value::Str(s)) => {
                    let mut buf = s.as_bytes().to_vec();
                    buf.resize(*n as usize, 0);
                    out.extend_from_slice(&buf);
                }
                (PropertyType::String, Value::Str(s)) => {
                    let offset = var.len() as u32;
                    var.extend_from_slice(s.as_bytes());
                    out.extend_from_slice(&offset.to_be_bytes());
                    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                }
                (PropertyType::List, Value::List(items)) => {
                    let encoded = encode_list(items)?;
                    let offset = var.len() as u32;
                    var.extend_from_slice(&encoded);
                    out.extend_from_slice(&offset.to_be_bytes());
                    out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
                }
                // `set_at` already rejected mismatched values.
                _ => return Err(WriteFault::TypeMismatch),
            }
        }

        out.extend_from_slice(&var);
        Ok(out)
    }
}

fn check_range(ty: &PropertyType, value: &Value) -> Result<(), WriteFault> {
    match (ty, value) {
        (PropertyType::FixedString(n), Value::Str(s)) => {
            if s.len() > *n as usize {
                return Err(WriteFault::OutOfRange);
            }
        }
        (PropertyType::Date, Value::Date(d)) => {
            if d.month == 0 || d.month > 12 || d.day == 0 || d.day > 31 {
                return Err(WriteFault::IncorrectValue);
            }
        }
        (PropertyType::Float, Value::Float(x)) => {
            if x.is_nan() {
                return Err(WriteFault::IncorrectValue);
            }
        }
        _ => {}
    }
    Ok(())
}

fn encode_list(items: &[Value]) -> Result<Vec<u8>, WriteFault> {
    let mut out = Vec::with_capacity(4 + items.len() * 9);
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        match item {
            Value::Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            Value::Int(i) => {
                out.push(2);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(x) => {
                if x.is_nan() {
                    return Err(WriteFault::IncorrectValue);
                }
                out.push(3);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::Str(s) => {
                out.push(4);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Date(d) => {
                out.push(5);
                out.extend_from_slice(&d.year.to_be_bytes());
                out.push(d.month);
                out.push(d.day);
            }
            Value::DateTime(ms) => {
                out.push(6);
                out.extend_from_slice(&ms.to_be_bytes());
            }
            // Nested lists and nulls are not representable inside a list.
            Value::List(_) | Value::Null => return Err(WriteFault::IncorrectValue),
        }
    }
    Ok(out)
}

/// Decoder over one encoded row and its schema.
pub struct RowReader<'a> {
    schema: &'a Schema,
    data: &'a [u8],
    bitmap_start: usize,
    fixed_start: usize,
    var_start: usize,
}

impl<'a> RowReader<'a> {
    pub fn new(schema: &'a Schema, data: &'a [u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(data.len() >= 5, "short row header");
        anyhow::ensure!(data[0] == ROW_FORMAT, "unknown row format {}", data[0]);
        let version = u32::from_be_bytes(data[1..5].try_into().unwrap());
        anyhow::ensure!(
            version == schema.version,
            "row version {version} does not match schema version {}",
            schema.version
        );
        let bitmap_len = (schema.nullable_count() + 7) / 8;
        let fixed_len: usize = schema
            .columns
            .iter()
            .map(|c| slot_width(&c.prop_type))
            .sum();
        let bitmap_start = 5;
        let fixed_start = bitmap_start + bitmap_len;
        let var_start = fixed_start + fixed_len;
        anyhow::ensure!(data.len() >= var_start, "short row body");
        Ok(Self {
            schema,
            data,
            bitmap_start,
            fixed_start,
            var_start,
        })
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Value> {
        let idx = self
            .schema
            .field_index(name)
            .ok_or_else(|| anyhow::anyhow!("unknown field {name:?}"))?;
        self.get_at(idx)
    }

    pub fn get_at(&self, idx: usize) -> anyhow::Result<Value> {
        let col = self
            .schema
            .columns
            .get(idx)
            .ok_or_else(|| anyhow::anyhow!("field index {idx} out of range"))?;

        if col.nullable {
            let bit = self
                .schema
                .columns
                .iter()
                .take(idx)
                .filter(|c| c.nullable)
                .count();
            let byte = self.data[self.bitmap_start + bit / 8];
            if byte & (1 << (bit % 8)) != 0 {
                return Ok(Value::Null);
            }
        }

        let mut slot = self.fixed_start;
        for col in self.schema.columns.iter().take(idx) {
            slot += slot_width(&col.prop_type);
        }
        let data = self.data;

        let value = match &col.prop_type {
            PropertyType::Bool => Value::Bool(data[slot] != 0),
            PropertyType::Int => {
                Value::Int(i64::from_be_bytes(data[slot..slot + 8].try_into().unwrap()))
            }
            PropertyType::Float => {
                Value::Float(f64::from_be_bytes(data[slot..slot + 8].try_into().unwrap()))
            }
            PropertyType::DateTime => Value::DateTime(i64::from_be_bytes(
                data[slot..slot + 8].try_into().unwrap(),
            )),
            PropertyType::Date => Value::Date(Date {
                year: i16::from_be_bytes(data[slot..slot + 2].try_into().unwrap()),
                month: data[slot + 2],
                day: data[slot + 3],
            }),
            PropertyType::FixedString(n) => {
                let raw = &data[slot..slot + *n as usize];
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            PropertyType::String => {
                let (offset, len) = read_slot_ref(data, slot)?;
                let start = self.var_start + offset;
                anyhow::ensure!(start + len <= data.len(), "string slot out of bounds");
                Value::Str(String::from_utf8_lossy(&data[start..start + len]).into_owned())
            }
            PropertyType::List => {
                let (offset, len) = read_slot_ref(data, slot)?;
                let start = self.var_start + offset;
                anyhow::ensure!(start + len <= data.len(), "list slot out of bounds");
                Value::List(decode_list(&data[start..start + len])?)
            }
        };
        Ok(value)
    }

    /// Decode the whole row in schema order.
    pub fn read_all(&self) -> anyhow::Result<Vec<Value>> {
        (0..self.schema.columns.len())
            .map(|idx| self.get_at(idx))
            .collect()
    }
}

fn read_slot_ref(data: &[u8], slot: usize) -> anyhow::Result<(usize, usize)> {
    anyhow::ensure!(slot + 8 <= data.len(), "short slot");
    let offset = u32::from_be_bytes(data[slot..slot + 4].try_into().unwrap()) as usize;
    let len = u32::from_be_bytes(data[slot + 4..slot + 8].try_into().unwrap()) as usize;
    Ok((offset, len))
}

fn decode_list(data: &[u8]) -> anyhow::Result<Vec<Value>> {
    anyhow::ensure!(data.len() >= 4, "short list header");
    let count = u32::from_be_bytes(data[..4].try_into().unwrap()) as usize;
    let mut offset = 4usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        anyhow::ensure!(offset < data.len(), "short list element");
        let tag = data[offset];
        offset += 1;
        let value = match tag {
            1 => {
                let v = Value::Bool(data[offset] != 0);
                offset += 1;
                v
            }
            2 => {
                anyhow::ensure!(offset + 8 <= data.len(), "short list int");
                let v = Value::Int(i64::from_be_bytes(
                    data[offset..offset + 8].try_into().unwrap(),
                ));
                offset += 8;
                v
            }
            3 => {
                anyhow::ensure!(offset + 8 <= data.len(), "short list float");
                let v = Value::Float(f64::from_be_bytes(
                    data[offset..offset + 8].try_into().unwrap(),
                ));
                offset += 8;
                v
            }
            4 => {
                anyhow::ensure!(offset + 4 <= data.len(), "short list string");
                let len =
                    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
                offset += 4;
                anyhow::ensure!(offset + len <= data.len(), "short list string body");
                let v = Value::Str(
                    String::from_utf8_lossy(&data[offset..offset + len]).into_owned(),
                );
                offset += len;
                v
            }
            5 => {
                anyhow::ensure!(offset + 4 <= data.len(), "short list date");
                let v = Value::Date(Date {
                    year: i16::from_be_bytes(data[offset..offset + 2].try_into().unwrap()),
                    month: data[offset + 2],
                    day: data[offset + 3],
                });
                offset += 4;
                v
            }
            6 => {
                anyhow::ensure!(offset + 8 <= data.len(), "short list datetime");
                let v = Value::DateTime(i64::from_be_bytes(
                    data[offset..offset + 8].try_into().unwrap(),
                ));
                offset += 8;
                v
            }
            other => anyhow::bail!("unknown list element tag {other}"),
        };
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    fn schema() -> Schema {
        Schema::new(
            7,
            3,
            vec![
                ColumnDef::new("name", PropertyType::String),
                ColumnDef::new("age", PropertyType::Int),
                ColumnDef::new("score", PropertyType::Float).nullable(),
                ColumnDef::new("tag", PropertyType::FixedString(8)).nullable(),
                ColumnDef::new("active", PropertyType::Bool).with_default(Value::Bool(true)),
                ColumnDef::new("hobbies", PropertyType::List).nullable(),
            ],
        )
    }

    #[test]
    fn round_trip_preserves_props() {
        let schema = schema();
        let mut writer = RowWriter::new(&schema);
        writer.set("name", Value::Str("ada".into())).unwrap();
        writer.set("age", Value::Int(36)).unwrap();
        writer.set("score", Value::Float(9.5)).unwrap();
        writer.set("tag", Value::Str("pioneer".into())).unwrap();
        writer
            .set(
                "hobbies",
                Value::List(vec![Value::Str("math".into()), Value::Int(1)]),
            )
            .unwrap();
        let bytes = writer.finish().unwrap();

        let reader = RowReader::new(&schema, &bytes).unwrap();
        assert_eq!(reader.get("name").unwrap(), Value::Str("ada".into()));
        assert_eq!(reader.get("age").unwrap(), Value::Int(36));
        assert_eq!(reader.get("score").unwrap(), Value::Float(9.5));
        assert_eq!(reader.get("tag").unwrap(), Value::Str("pioneer".into()));
        assert_eq!(reader.get("active").unwrap(), Value::Bool(true));
        assert_eq!(
            reader.get("hobbies").unwrap(),
            Value::List(vec![Value::Str("math".into()), Value::Int(1)])
        );
    }

    #[test]
    fn nullable_defaults_to_null_and_required_faults() {
        let schema = schema();
        let mut writer = RowWriter::new(&schema);
        writer.set("name", Value::Str("x".into())).unwrap();
        writer.set("age", Value::Int(1)).unwrap();
        let bytes = writer.finish().unwrap();
        let reader = RowReader::new(&schema, &bytes).unwrap();
        assert_eq!(reader.get("score").unwrap(), Value::Null);

        let mut writer = RowWriter::new(&schema);
        writer.set("name", Value::Str("x".into())).unwrap();
        assert_eq!(writer.finish().unwrap_err(), WriteFault::FieldUnset);
    }

    #[test]
    fn writer_faults() {
        let schema = schema();
        let mut writer = RowWriter::new(&schema);
        assert_eq!(
            writer.set("missing", Value::Int(1)).unwrap_err(),
            WriteFault::UnknownField
        );
        assert_eq!(
            writer.set("age", Value::Str("old".into())).unwrap_err(),
            WriteFault::TypeMismatch
        );
        assert_eq!(
            writer.set("name", Value::Null).unwrap_err(),
            WriteFault::NotNullable
        );
        assert_eq!(
            writer
                .set("tag", Value::Str("far-too-long-for-slot".into()))
                .unwrap_err(),
            WriteFault::OutOfRange
        );
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let schema = schema();
        let mut writer = RowWriter::new(&schema);
        writer.set("name", Value::Str("x".into())).unwrap();
        writer.set("age", Value::Int(1)).unwrap();
        let bytes = writer.finish().unwrap();

        let mut other = self::schema();
        other.version = 4;
        assert!(RowReader::new(&other, &bytes).is_err());
    }
}
