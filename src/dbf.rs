// SPDX-License-Identifier: MIT
//! dBASE III attribute codec (`.dbf`)
//!
//! ```text
//! Header (32 bytes)
//!   0  u8      signature (0x03)
//!   1  3x u8   last update, YY MM DD with YY counted from 1900
//!   4  u32 LE  record count
//!   8  u16 LE  header length (32 * fields + 33)
//!  10  u16 LE  record length (1 + sum of field lengths)
//!  12  20x u8  reserved
//! Field descriptors (32 bytes each)
//!   0  11x u8  name, NUL padded
//!  11  u8      type (C, N, F, D, L)
//!  16  u8      length
//!  17  u8      decimal count
//!  20  u8      work area id (1)
//!  31  u8      index flag (1 for the object identifier)
//! 0x0D terminator, then fixed-width ASCII records prefixed with a
//! deletion flag (' ' live, '*' deleted)
//! ```

use std::collections::HashSet;
use std::io::{self, Read, Write};

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use tracing::{debug, trace};

use crate::codec::{ByteCursor, ByteOrder, ByteSink};
use crate::error::{Result, ShapefileError};
use crate::feature::{Feature, Value};
use crate::format::read_full;
use crate::schema::{FieldType, Schema, SimpleField};

const SIGNATURE: u8 = 0x03;
const END_OF_HEADER: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const RECORD_LIVE: u8 = b' ';
const MAX_CHAR_LENGTH: u16 = 254;
const DOUBLE_WIDTH: u8 = 34;
const DOUBLE_DECIMALS: u8 = 16;
const MAX_NAME_LENGTH: usize = 10;

/// Values produced by an attribute file: the schema first, then one row per
/// geometry record
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeItem {
    Schema(Schema),
    Row(Feature),
}

/// A pull-based source of attribute items
pub trait AttributeSource {
    /// The next item, `None` when exhausted
    fn next_item(&mut self) -> Result<Option<AttributeItem>>;
}

/// Streaming dBASE III reader
pub struct DbfReader<R> {
    reader: R,
    schema: Schema,
    schema_emitted: bool,
    record_count: u32,
    record_length: usize,
    current: u32,
}

impl<R: Read> DbfReader<R> {
    /// Parse the header and field descriptors
    pub fn new(mut reader: R) -> Result<Self> {
        let mut head = [0u8; 32];
        read_full(&mut reader, &mut head, "dbf header")?;
        let mut cursor = ByteCursor::new(&head);
        let signature = cursor.read_u8()?;
        if signature != SIGNATURE {
            return Err(ShapefileError::Format(format!(
                "expected dBASE III signature 0x03, found 0x{signature:02x}"
            )));
        }
        cursor.skip(3)?;
        let record_count = cursor.read_i32(ByteOrder::Little)? as u32;
        let header_length = cursor.read_i16(ByteOrder::Little)? as u16 as usize;
        let record_length = cursor.read_i16(ByteOrder::Little)? as u16 as usize;
        if header_length < 33 {
            return Err(ShapefileError::Format(format!(
                "dbf header length {header_length} is too short"
            )));
        }

        // Descriptors run until the 0x0D terminator; `header_length` may
        // reserve more space after it (backlink, padding)
        let mut schema = Schema::generated();
        let mut descriptor = [0u8; 32];
        let mut consumed = 32usize;
        loop {
            read_full(&mut reader, &mut descriptor[..1], "dbf field descriptor")?;
            if descriptor[0] == END_OF_HEADER {
                consumed += 1;
                break;
            }
            consumed += 32;
            if consumed + 1 > header_length {
                return Err(ShapefileError::Format(format!(
                    "dbf field descriptors overrun header length {header_length}"
                )));
            }
            read_full(&mut reader, &mut descriptor[1..], "dbf field descriptor")?;
            schema.put(parse_descriptor(&descriptor)?);
        }

        let padding = (header_length - consumed) as u64;
        if padding > 0 {
            let skipped = io::copy(&mut reader.by_ref().take(padding), &mut io::sink())?;
            if skipped < padding {
                return Err(ShapefileError::Truncated {
                    context: "dbf header",
                    needed: padding as usize,
                    available: skipped as usize,
                });
            }
            trace!(padding, "Skipped dbf header padding");
        }

        let declared: usize = 1 + schema.fields().iter().map(|f| f.length as usize).sum::<usize>();
        if declared != record_length {
            return Err(ShapefileError::Format(format!(
                "dbf record length {record_length} does not match field widths {declared}"
            )));
        }

        debug!(
            fields = schema.len(),
            records = record_count,
            "Opened dbf"
        );
        Ok(Self {
            reader,
            schema,
            schema_emitted: false,
            record_count,
            record_length,
            current: 0,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Read the next row, `None` after the declared record count
    pub fn read_row(&mut self) -> Result<Option<Feature>> {
        if self.current >= self.record_count {
            return Ok(None);
        }
        let mut record = vec![0u8; self.record_length];
        read_full(&mut self.reader, &mut record, "dbf record")?;
        if record[0] != RECORD_LIVE {
            return Err(ShapefileError::Format(format!(
                "dbf record {} has deletion flag 0x{:02x}",
                self.current, record[0]
            )));
        }

        let mut feature = Feature::new().with_schema(self.schema.id.clone());
        let mut start = 1;
        for field in self.schema.fields() {
            let end = start + field.length as usize;
            let raw = String::from_utf8_lossy(&record[start..end]);
            feature.set(field.clone(), parse_value(field, raw.trim())?);
            start = end;
        }
        self.current += 1;
        Ok(Some(feature))
    }
}

impl<R: Read> AttributeSource for DbfReader<R> {
    fn next_item(&mut self) -> Result<Option<AttributeItem>> {
        if !self.schema_emitted {
            self.schema_emitted = true;
            return Ok(Some(AttributeItem::Schema(self.schema.clone())));
        }
        Ok(self.read_row()?.map(AttributeItem::Row))
    }
}

fn parse_descriptor(bytes: &[u8; 32]) -> Result<SimpleField> {
    let name_end = bytes[..11].iter().position(|&b| b == 0).unwrap_or(11);
    let name = String::from_utf8_lossy(&bytes[..name_end]).into_owned();
    let type_char = bytes[11];
    let length = bytes[16];
    let decimals = bytes[17];

    let field_type = match type_char {
        b'C' => FieldType::String,
        b'N' if decimals == 0 => match length {
            0..=4 => FieldType::Short,
            5..=9 => FieldType::Int,
            10..=18 => FieldType::Long,
            _ => FieldType::Double,
        },
        b'N' | b'F' => FieldType::Double,
        b'D' => FieldType::Date,
        b'L' => FieldType::Bool,
        other => {
            return Err(ShapefileError::Format(format!(
                "unsupported dbf field type '{}' for field {name}",
                other as char
            )))
        }
    };
    let scale = if field_type == FieldType::Double { decimals } else { 0 };
    Ok(SimpleField::new(name, field_type)
        .with_length(length as u16)
        .with_scale(scale))
}

fn parse_value(field: &SimpleField, raw: &str) -> Result<Value> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let bad = || {
        ShapefileError::Format(format!(
            "cannot parse '{raw}' as {} for field {}",
            field.field_type, field.name
        ))
    };
    Ok(match field.field_type {
        FieldType::String => Value::Text(raw.to_string()),
        FieldType::Short | FieldType::Int | FieldType::Long | FieldType::Oid => {
            // Overflow markers
            if raw.starts_with('*') {
                return Ok(Value::Null);
            }
            match raw.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Double(raw.parse::<f64>().map_err(|_| bad())?),
            }
        }
        FieldType::Float | FieldType::Double => {
            if raw.starts_with('*') {
                return Ok(Value::Null);
            }
            Value::Double(raw.parse::<f64>().map_err(|_| bad())?)
        }
        FieldType::Date => {
            let date = NaiveDate::parse_from_str(raw, "%Y%m%d").map_err(|_| bad())?;
            let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(bad)?;
            Value::Date(Utc.from_utc_datetime(&midnight))
        }
        FieldType::Bool => match raw.as_bytes()[0] {
            b'?' => Value::Null,
            b'T' | b't' | b'Y' | b'y' => Value::Bool(true),
            _ => Value::Bool(false),
        },
    })
}

/// Shorten a field name to the ten ASCII characters dBASE allows
///
/// Characters outside `[A-Za-z0-9_]` are dropped. Longer names lose
/// lower-case vowels, then doubled letters, then upper-case vowels, and are
/// finally cut at ten characters. Names already in `used` get a numeric
/// suffix; the result is recorded in `used`.
pub fn esri_field_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut candidate: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if candidate.len() > MAX_NAME_LENGTH {
        if candidate == "description" && !used.contains("desc") {
            candidate = "desc".to_string();
        } else {
            if candidate.ends_with("Error") {
                candidate.truncate(candidate.len() - 2);
            }
            let unlimited = candidate.len();
            candidate = drop_letters(&candidate, &['a', 'e', 'i', 'o', 'u'], unlimited);
            if candidate.len() > MAX_NAME_LENGTH {
                candidate = drop_repeats(&candidate);
            }
            if candidate.len() > MAX_NAME_LENGTH {
                candidate = drop_letters(&candidate, &['A', 'E', 'I', 'O', 'U'], MAX_NAME_LENGTH);
            }
        }
    } else if candidate.is_empty() {
        candidate = format!("{:x}", Utc::now().timestamp_millis() & 0xff_ffff_ffff);
    }

    if used.contains(&candidate) {
        let base = candidate.clone();
        let mut counter = 1u32;
        loop {
            let suffix = counter.to_string();
            let keep = base.len().min(MAX_NAME_LENGTH.saturating_sub(suffix.len()));
            candidate = format!("{}{}", &base[..keep], suffix);
            if !used.contains(&candidate) {
                break;
            }
            counter += 1;
        }
    }
    used.insert(candidate.clone());
    candidate
}

/// Drop `letters` after the first character while longer than ten, then cap
/// at `limit`
fn drop_letters(name: &str, letters: &[char], limit: usize) -> String {
    let mut remaining = name.len();
    let mut out = String::with_capacity(limit);
    for (i, ch) in name.chars().enumerate() {
        if remaining > MAX_NAME_LENGTH && i > 0 && letters.contains(&ch) {
            remaining -= 1;
            continue;
        }
        out.push(ch);
        if out.len() == limit {
            break;
        }
    }
    out
}

/// Collapse runs of a repeated character while longer than ten
fn drop_repeats(name: &str) -> String {
    let mut remaining = name.len();
    let mut out = String::with_capacity(name.len());
    let mut last = None;
    for ch in name.chars() {
        if remaining > MAX_NAME_LENGTH && last == Some(ch) {
            remaining -= 1;
        } else {
            out.push(ch);
            last = Some(ch);
        }
    }
    out
}

/// Column layout derived from a schema
#[derive(Debug, Clone)]
struct Column {
    field: SimpleField,
    name: String,
    type_char: u8,
    width: u8,
    decimals: u8,
}

impl Column {
    fn new(field: &SimpleField, name: String) -> Self {
        let (type_char, width, decimals) = match field.field_type {
            FieldType::String => (b'C', field.length.clamp(1, MAX_CHAR_LENGTH) as u8, 0),
            FieldType::Double | FieldType::Float => (b'F', DOUBLE_WIDTH, DOUBLE_DECIMALS),
            FieldType::Int => (b'N', 10, 0),
            FieldType::Short => (b'N', 6, 0),
            FieldType::Long => (b'N', field.length.clamp(15, 20) as u8, 0),
            FieldType::Oid => (b'N', 10, 0),
            FieldType::Date => (b'D', 8, 0),
            FieldType::Bool => (b'L', 1, 0),
        };
        Self {
            field: field.clone(),
            name,
            type_char,
            width,
            decimals,
        }
    }
}

/// dBASE III writer for one schema
pub struct DbfWriter {
    columns: Vec<Column>,
    date: NaiveDate,
}

impl DbfWriter {
    /// Lay out columns for `schema`, shortening names as needed
    pub fn new(schema: &Schema) -> Result<Self> {
        let max_fields = (u16::MAX as usize - 33) / 32;
        if schema.len() > max_fields {
            return Err(ShapefileError::Format(format!(
                "dbf cannot hold {} fields",
                schema.len()
            )));
        }
        let mut used = HashSet::new();
        let columns: Vec<Column> = schema
            .fields()
            .iter()
            .map(|f| Column::new(f, esri_field_name(&f.name, &mut used)))
            .collect();
        let record_length: usize = 1 + columns.iter().map(|c| c.width as usize).sum::<usize>();
        if record_length > u16::MAX as usize {
            return Err(ShapefileError::Format(format!(
                "dbf record length {record_length} exceeds the format limit"
            )));
        }
        Ok(Self {
            columns,
            date: Utc::now().date_naive(),
        })
    }

    /// Override the last-update date stamped in the header
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Column names as written
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn record_length(&self) -> usize {
        1 + self.columns.iter().map(|c| c.width as usize).sum::<usize>()
    }

    fn header(&self, count: u32) -> Vec<u8> {
        let mut sink = ByteSink::with_capacity(33 + 32 * self.columns.len());
        sink.write_u8(SIGNATURE);
        sink.write_u8((self.date.year() - 1900).clamp(0, 255) as u8);
        sink.write_u8(self.date.month() as u8);
        sink.write_u8(self.date.day() as u8);
        sink.write_i32(count as i32, ByteOrder::Little);
        sink.write_i16((self.columns.len() * 32 + 33) as u16 as i16, ByteOrder::Little);
        sink.write_i16(self.record_length() as u16 as i16, ByteOrder::Little);
        sink.write_bytes(&[0u8; 20]);

        for column in &self.columns {
            let mut name = [0u8; 11];
            for (slot, b) in name.iter_mut().zip(column.name.bytes().take(10)) {
                *slot = b;
            }
            sink.write_bytes(&name);
            sink.write_u8(column.type_char);
            sink.write_bytes(&[0u8; 4]);
            sink.write_u8(column.width);
            sink.write_u8(column.decimals);
            sink.write_bytes(&[0u8; 2]);
            // Work area id
            sink.write_u8(1);
            sink.write_bytes(&[0u8; 10]);
            sink.write_u8(u8::from(column.field.field_type == FieldType::Oid));
        }
        sink.write_u8(END_OF_HEADER);
        sink.into_inner()
    }

    fn encode_row(&self, row: &Feature, number: u32, out: &mut Vec<u8>) {
        out.push(RECORD_LIVE);
        for column in &self.columns {
            let width = column.width as usize;
            let value = row.get(&column.field.name).unwrap_or(&Value::Null);
            match column.field.field_type {
                FieldType::String => pad_left_justified(out, &value.to_text(), width),
                FieldType::Double | FieldType::Float => {
                    let text = value.as_f64().map(format_double).unwrap_or_default();
                    pad_right_justified(out, &text, width)
                }
                FieldType::Int => {
                    let text = value.as_i64().map(|i| (i as i32).to_string());
                    pad_right_justified(out, &text.unwrap_or_default(), width)
                }
                FieldType::Short => {
                    let text = value.as_i64().map(|i| (i as i16).to_string());
                    pad_right_justified(out, &text.unwrap_or_default(), width)
                }
                FieldType::Long => {
                    let text = value.as_i64().map(|i| i.to_string());
                    pad_right_justified(out, &text.unwrap_or_default(), width)
                }
                FieldType::Oid => {
                    let oid = value.as_i64().unwrap_or(number as i64);
                    pad_right_justified(out, &oid.to_string(), width)
                }
                FieldType::Date => {
                    let text = match value {
                        Value::Date(d) => d.format("%Y%m%d").to_string(),
                        _ => String::new(),
                    };
                    pad_left_justified(out, &text, width)
                }
                FieldType::Bool => {
                    let flag = match value.as_bool() {
                        Some(true) => "T",
                        Some(false) => "F",
                        None => "?",
                    };
                    pad_left_justified(out, flag, width)
                }
            }
        }
    }

    /// Write the header, `count` rows and the end-of-file marker
    ///
    /// Rows must arrive in geometry record order. Missing object
    /// identifiers take the 1-based record number.
    pub fn write<W, I>(&self, out: &mut W, count: usize, rows: I) -> Result<()>
    where
        W: Write,
        I: IntoIterator<Item = Result<Feature>>,
    {
        let count = u32::try_from(count).map_err(|_| {
            ShapefileError::Format(format!("dbf cannot hold {count} records"))
        })?;
        out.write_all(&self.header(count))?;

        let mut record = Vec::with_capacity(self.record_length());
        let mut written = 0u32;
        for row in rows {
            let row = row?;
            written += 1;
            record.clear();
            self.encode_row(&row, written, &mut record);
            debug_assert_eq!(record.len(), self.record_length());
            out.write_all(&record)?;
        }
        out.write_all(&[END_OF_FILE])?;
        if written != count {
            return Err(ShapefileError::Format(format!(
                "dbf header declares {count} records but {written} were written"
            )));
        }
        Ok(())
    }
}

/// Signed decimal with up to 16 fraction digits, exponent form when too wide
fn format_double(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let fixed = format!("{:+.*}", DOUBLE_DECIMALS as usize, value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.len() <= DOUBLE_WIDTH as usize {
        trimmed.to_string()
    } else {
        format!("{value:e}")
    }
}

/// Non-ASCII characters are replaced so every byte is one column
fn ascii_bytes(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' })
}

fn pad_left_justified(out: &mut Vec<u8>, text: &str, width: usize) {
    let start = out.len();
    out.extend(ascii_bytes(text).take(width));
    out.resize(start + width, b' ');
}

fn pad_right_justified(out: &mut Vec<u8>, text: &str, width: usize) {
    let bytes: Vec<u8> = ascii_bytes(text).collect();
    if bytes.len() > width {
        trace!(value = text, width, "Value truncated to field width");
        out.extend_from_slice(&bytes[..width]);
    } else {
        out.resize(out.len() + width - bytes.len(), b' ');
        out.extend_from_slice(&bytes);
    }
}
