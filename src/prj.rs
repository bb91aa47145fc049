// SPDX-License-Identifier: MIT
//! Projection descriptor (`.prj`) parsing
//!
//! The `.prj` companion holds a well-known-text coordinate system of the form
//! `TAG[value, value, ...]` where a value is a number, a double-quoted string
//! or a nested entry. An entry may also appear as a bare tag without
//! brackets (`AXIS["Lat",NORTH]`).
//!
//! The codec only uses this to confirm the geographic datum is WGS 84.

use std::fmt;

use crate::error::{Result, ShapefileError};

/// Projection text written next to every shapefile
pub const WGS84_PRJ: &str = concat!(
    "GEOGCS[\"GCS_WGS_1984\",",
    "DATUM[\"D_WGS_1984\",",
    "SPHEROID[\"WGS_1984\",6378137.0,298.257223563]],",
    "PRIMEM[\"Greenwich\",0.0],",
    "UNIT[\"Degree\",0.0174532925199433]]"
);

/// Geographic coordinate system names accepted as WGS 84
pub const WGS84_NAMES: [&str; 2] = ["GCS_WGS_1984", "WGS 84"];

/// A value inside an entry's brackets
#[derive(Debug, Clone, PartialEq)]
pub enum PrjValue {
    Number(f64),
    Text(String),
    Entry(PrjEntry),
}

/// A tagged entry and its values
#[derive(Debug, Clone, PartialEq)]
pub struct PrjEntry {
    tag: String,
    values: Vec<PrjValue>,
}

impl PrjEntry {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn values(&self) -> &[PrjValue] {
        &self.values
    }

    /// Nested entries, in order
    pub fn children(&self) -> impl Iterator<Item = &PrjEntry> {
        self.values.iter().filter_map(|v| match v {
            PrjValue::Entry(e) => Some(e),
            _ => None,
        })
    }

    /// Depth-first search for a chain of tags
    ///
    /// Each tag must appear below the previous one, though not necessarily
    /// as a direct child: `find(&["GEOGCS", "DATUM"])` matches the datum of
    /// a geographic system nested inside a `PROJCS`. The first match wins.
    pub fn find(&self, tags: &[&str]) -> Option<&PrjEntry> {
        let (first, rest) = tags.split_first()?;
        if self.tag == *first {
            if rest.is_empty() {
                return Some(self);
            }
            return self.children().find_map(|c| c.find(rest));
        }
        self.children().find_map(|c| c.find(tags))
    }

    /// First value when it is a string
    pub fn name(&self) -> Option<&str> {
        match self.values.first() {
            Some(PrjValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PrjEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)?;
        if self.values.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match value {
                PrjValue::Number(n) => write!(f, "{n}")?,
                PrjValue::Text(s) => write!(f, "\"{s}\"")?,
                PrjValue::Entry(e) => write!(f, "{e}")?,
            }
        }
        f.write_str("]")
    }
}

/// Parse projection text into its root entry
///
/// Content after the root entry is ignored.
pub fn parse(text: &str) -> Result<PrjEntry> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        text,
        pos: 0,
    };
    parser.entry()
}

/// Name of the geographic coordinate system, if the text declares one
pub fn geographic_datum(root: &PrjEntry) -> Option<&str> {
    root.find(&["GEOGCS"]).and_then(PrjEntry::name)
}

pub fn is_wgs84(name: &str) -> bool {
    WGS84_NAMES.contains(&name)
}

struct Parser<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> ShapefileError {
        ShapefileError::Projection(format!("{what} at offset {}", self.pos))
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Consume `c` after optional whitespace
    fn eat(&mut self, c: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn entry(&mut self) -> Result<PrjEntry> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => self.pos += 1,
            _ => return Err(self.error("expected a tag")),
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        let tag = self.text[start..self.pos].to_string();

        let mut values = Vec::new();
        if self.eat(b'[') {
            loop {
                values.push(self.value()?);
                if !self.eat(b',') {
                    break;
                }
            }
            if !self.eat(b']') {
                return Err(self.error("expected ]"));
            }
        }
        Ok(PrjEntry { tag, values })
    }

    fn value(&mut self) -> Result<PrjValue> {
        self.skip_ws();
        match self.peek() {
            Some(b'"') => self.quoted().map(PrjValue::Text),
            Some(c) if c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.') => {
                self.number().map(PrjValue::Number)
            }
            _ => self.entry().map(PrjValue::Entry),
        }
    }

    fn quoted(&mut self) -> Result<String> {
        // Opening quote
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'"' {
                let s = self.text[start..self.pos].to_string();
                self.pos += 1;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        if self.pos == digits_start {
            return Err(self.error("expected a number"));
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'-' | b'+')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        self.text[start..self.pos]
            .parse::<f64>()
            .map_err(|_| self.error("malformed number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wgs84() {
        let root = parse(WGS84_PRJ).unwrap();
        assert_eq!(root.tag(), "GEOGCS");
        assert_eq!(root.name(), Some("GCS_WGS_1984"));
        assert_eq!(geographic_datum(&root), Some("GCS_WGS_1984"));

        let spheroid = root.find(&["DATUM", "SPHEROID"]).unwrap();
        assert_eq!(
            spheroid.values(),
            &[
                PrjValue::Text("WGS_1984".to_string()),
                PrjValue::Number(6378137.0),
                PrjValue::Number(298.257223563),
            ]
        );
    }

    #[test]
    fn test_nested_geogcs_is_found() {
        let text = r#"PROJCS["UTM 33N", GEOGCS["WGS 84", DATUM["WGS_1984"]], UNIT["metre", 1]]"#;
        let root = parse(text).unwrap();
        assert_eq!(geographic_datum(&root), Some("WGS 84"));
        assert!(is_wgs84("WGS 84"));
    }

    #[test]
    fn test_other_datum() {
        let root = parse(r#"GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983"]]"#)
            .unwrap();
        let name = geographic_datum(&root).unwrap();
        assert!(!is_wgs84(name));
    }

    #[test]
    fn test_bare_tags_and_exponents() {
        let root = parse(r#"AXIS["Lat", NORTH, 1.5e-3, -.25]"#).unwrap();
        assert_eq!(root.values().len(), 4);
        assert!(matches!(&root.values()[1], PrjValue::Entry(e) if e.tag() == "NORTH"));
        assert_eq!(root.values()[2], PrjValue::Number(0.0015));
        assert_eq!(root.values()[3], PrjValue::Number(-0.25));
    }

    #[test]
    fn test_display_reparses() {
        let root = parse(WGS84_PRJ).unwrap();
        let again = parse(&root.to_string()).unwrap();
        assert_eq!(again, root);
    }

    #[test]
    fn test_malformed_text() {
        assert!(matches!(parse("GEOGCS[\"x\""), Err(ShapefileError::Projection(_))));
        assert!(matches!(parse("   "), Err(ShapefileError::Projection(_))));
        assert!(matches!(parse("GEOGCS[\"open"), Err(ShapefileError::Projection(_))));
    }
}
