// SPDX-License-Identifier: MIT
//! Point styles and the `.shm` symbology side file

use std::collections::HashMap;
use std::io::{self, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShapefileError};

/// Default marker size in points at an icon scale of 1
pub const DEFAULT_POINT_SIZE: u32 = 15;

/// Marker shape codes understood by the symbology reader
pub mod marker {
    pub const CIRCLE: u16 = 0;
    pub const SQUARE: u16 = 1;
    pub const TRIANGLE: u16 = 2;
    pub const CROSS: u16 = 3;
    pub const STAR: u16 = 4;
}

const MARKER_NAMES: [(&str, u16); 5] = [
    ("circle", marker::CIRCLE),
    ("square", marker::SQUARE),
    ("triangle", marker::TRIANGLE),
    ("cross", marker::CROSS),
    ("star", marker::STAR),
];

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// `0xAABBGGRR`, the byte order symbology readers expect
    pub fn to_abgr_hex(&self) -> String {
        format!("0x{:02x}{:02x}{:02x}{:02x}", self.a, self.b, self.g, self.r)
    }
}

/// Icon style applied to point features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    pub icon_url: Option<String>,
    pub icon_color: Option<Color>,
    pub icon_scale: Option<f64>,
}

impl Style {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_icon_url(mut self, url: impl Into<String>) -> Self {
        self.icon_url = Some(url.into());
        self
    }

    pub fn with_icon_color(mut self, color: Color) -> Self {
        self.icon_color = Some(color);
        self
    }

    pub fn with_icon_scale(mut self, scale: f64) -> Self {
        self.icon_scale = Some(scale);
        self
    }
}

/// Maps icon URLs to marker codes and back
#[derive(Debug, Clone, Default)]
pub struct PointShapeMapper {
    shapes: HashMap<String, u16>,
    urls: HashMap<u16, String>,
    base_url: String,
    suffix: Option<String>,
}

impl PointShapeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base URL and file suffix used by [`url_for`](Self::url_for)
    pub fn with_base_url(mut self, base_url: impl Into<String>, suffix: Option<&str>) -> Self {
        self.base_url = base_url.into();
        self.suffix = suffix.map(str::to_string);
        self
    }

    /// Explicit URL to marker table, consulted before the file name
    pub fn with_shapes(mut self, shapes: HashMap<String, u16>) -> Self {
        self.urls = shapes.iter().map(|(url, m)| (*m, url.clone())).collect();
        self.shapes = shapes;
        self
    }

    /// Marker for an icon URL
    ///
    /// Falls back to the URL's file name (`.../star.png` is a star) and then
    /// to a circle.
    pub fn marker(&self, url: &str) -> u16 {
        if let Some(m) = self.shapes.get(url) {
            return *m;
        }
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let Some((_, file)) = path.rsplit_once('/') else {
            return marker::CIRCLE;
        };
        let Some((stem, _)) = file.split_once('.') else {
            return marker::CIRCLE;
        };
        if !stem.chars().all(|c| c.is_ascii_alphabetic()) {
            return marker::CIRCLE;
        }
        let stem = stem.to_ascii_lowercase();
        MARKER_NAMES
            .iter()
            .find(|(name, _)| *name == stem)
            .map_or(marker::CIRCLE, |(_, m)| *m)
    }

    /// Icon URL for a marker, unknown codes map to the circle
    pub fn url_for(&self, m: u16) -> String {
        if let Some(url) = self.urls.get(&m) {
            return url.clone();
        }
        let name = MARKER_NAMES
            .iter()
            .find(|(_, code)| *code == m)
            .map_or("circle", |(name, _)| *name);
        format!(
            "{}{}{}",
            self.base_url,
            name,
            self.suffix.as_deref().unwrap_or("")
        )
    }
}

const SHM_ROOT: &str = "org.opensextant.forensics.util.BaseLayerMetaData";

/// Marker size in points for a style
fn point_size_for(style: &Style, point_size: u32) -> i64 {
    match style.icon_scale {
        Some(scale) => (scale * point_size as f64) as i64,
        None => point_size as i64,
    }
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Write the `.shm` document; returns false when the style has no icon
pub fn write_shm<W: Write>(
    out: &mut W,
    style: &Style,
    mapper: &PointShapeMapper,
    point_size: u32,
) -> Result<bool> {
    let Some(url) = style.icon_url.as_deref() else {
        return Ok(false);
    };

    let mut writer = Writer::new_with_indent(&mut *out, b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    writer.write_event(Event::Start(BytesStart::new(SHM_ROOT)))?;
    writer.write_event(Event::Start(BytesStart::new("renderer__info")))?;
    text_element(&mut writer, "symbol__class", "point")?;
    text_element(&mut writer, "symbol__type", &mapper.marker(url).to_string())?;
    if let Some(color) = style.icon_color {
        text_element(&mut writer, "symbol__color", &color.to_abgr_hex())?;
    }
    text_element(&mut writer, "has__labelling", "false")?;
    text_element(
        &mut writer,
        "point__size",
        &point_size_for(style, point_size).to_string(),
    )?;
    let mut outer = BytesStart::new("outer-class");
    outer.push_attribute(("reference", "../.."));
    writer.write_event(Event::Empty(outer))?;
    writer.write_event(Event::End(BytesEnd::new("renderer__info")))?;
    writer.write_event(Event::End(BytesEnd::new(SHM_ROOT)))?;
    out.write_all(b"\n")?;
    Ok(true)
}

/// Render the `.shm` document for a style, `None` without an icon URL
pub fn shm_document(
    style: &Style,
    mapper: &PointShapeMapper,
    point_size: u32,
) -> Result<Option<String>> {
    let mut buf = Vec::new();
    if !write_shm(&mut buf, style, mapper, point_size)? {
        return Ok(None);
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| ShapefileError::Format(format!("symbology document is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_from_file_name() {
        let mapper = PointShapeMapper::new();
        assert_eq!(mapper.marker("http://host/icons/star.png"), marker::STAR);
        assert_eq!(mapper.marker("http://host/icons/Triangle.gif?v=2"), marker::TRIANGLE);
        assert_eq!(mapper.marker("file:///tmp/cross.svg"), marker::CROSS);
        assert_eq!(mapper.marker("http://host/icons/star2.png"), marker::CIRCLE);
        assert_eq!(mapper.marker("no-slashes"), marker::CIRCLE);
    }

    #[test]
    fn test_explicit_table_wins() {
        let mut shapes = HashMap::new();
        shapes.insert("http://host/pin.png".to_string(), marker::SQUARE);
        let mapper = PointShapeMapper::new()
            .with_base_url("http://host/icons/", Some(".png"))
            .with_shapes(shapes);
        assert_eq!(mapper.marker("http://host/pin.png"), marker::SQUARE);
        assert_eq!(mapper.url_for(marker::SQUARE), "http://host/pin.png");
        assert_eq!(mapper.url_for(marker::STAR), "http://host/icons/star.png");
        assert_eq!(mapper.url_for(99), "http://host/icons/circle.png");
    }

    #[test]
    fn test_color_byte_order() {
        assert_eq!(Color::new(0x11, 0x22, 0x33, 0xff).to_abgr_hex(), "0xff332211");
    }

    #[test]
    fn test_shm_document() {
        let style = Style::new("s1")
            .with_icon_url("http://host/icons/square.png")
            .with_icon_color(Color::new(255, 0, 0, 128))
            .with_icon_scale(2.0);
        let doc = shm_document(&style, &PointShapeMapper::new(), DEFAULT_POINT_SIZE)
            .unwrap()
            .unwrap();
        assert!(doc.starts_with("<?xml version=\"1.0\"?>"));
        assert!(doc.contains("<symbol__type>1</symbol__type>"));
        assert!(doc.contains("<symbol__color>0x800000ff</symbol__color>"));
        assert!(doc.contains("<point__size>30</point__size>"));
        assert!(doc.contains("<outer-class reference=\"../..\"/>"));
    }

    #[test]
    fn test_shm_document_parses_back() {
        let style = Style::new("s2")
            .with_icon_url("http://host/icons/star.png?a=1&b=<2>")
            .with_icon_scale(0.5);
        let doc = shm_document(&style, &PointShapeMapper::new(), DEFAULT_POINT_SIZE)
            .unwrap()
            .unwrap();

        let mut reader = quick_xml::Reader::from_str(&doc);
        let mut current = String::new();
        let mut values = HashMap::new();
        let mut empty = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) => {
                    current = String::from_utf8(e.name().as_ref().to_vec()).unwrap();
                }
                Event::Text(t) if !current.is_empty() => {
                    values.insert(current.clone(), t.unescape().unwrap().into_owned());
                }
                Event::Empty(e) => {
                    empty.push(String::from_utf8(e.name().as_ref().to_vec()).unwrap());
                }
                Event::End(_) => current.clear(),
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(values["symbol__class"], "point");
        assert_eq!(values["symbol__type"], marker::STAR.to_string());
        assert_eq!(values["has__labelling"], "false");
        assert_eq!(values["point__size"], "7");
        assert!(!values.contains_key("symbol__color"));
        assert_eq!(empty, vec!["outer-class"]);
    }

    #[test]
    fn test_write_shm_reports_io_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let style = Style::new("s").with_icon_url("http://host/icons/circle.png");
        let result = write_shm(&mut Broken, &style, &PointShapeMapper::new(), 15);
        assert!(matches!(result, Err(ShapefileError::Io(_))));
    }

    #[test]
    fn test_no_icon_no_document() {
        let mut out = Vec::new();
        let written = write_shm(&mut out, &Style::new("s"), &PointShapeMapper::new(), 15).unwrap();
        assert!(!written);
        assert!(out.is_empty());
    }
}
