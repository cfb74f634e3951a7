//! SVG post-processing.
//!
//! Scilab writes SVG files with a `viewBox` but no `width`/`height`, so
//! browsers scale them to the container. We stamp explicit pixel dimensions
//! on the root element and optionally force precise rendering of clipped
//! paths.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

const PRECISE: &str = "shape-rendering:geometricPrecision";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvgImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Rewrite `data` so the root `<svg>` carries `width`/`height` in pixels.
///
/// `size` wins when given; otherwise the extent of the `viewBox` is used.
pub fn normalize(
    data: &[u8],
    size: Option<(u32, u32)>,
    antialias: bool,
) -> Result<SvgImage, String> {
    let mut reader = Reader::from_reader(data);
    let mut writer = Writer::new(Vec::with_capacity(data.len() + 64));
    let mut buf = Vec::new();
    let mut dims: Option<(u32, u32)> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| format!("invalid SVG at byte {}: {e}", reader.buffer_position()))?;
        let out = match event {
            Event::Eof => break,
            Event::Start(e) if dims.is_none() => {
                let (root, d) = rewrite_root(&e, size)?;
                dims = Some(d);
                Event::Start(root)
            }
            Event::Empty(e) if dims.is_none() => {
                let (root, d) = rewrite_root(&e, size)?;
                dims = Some(d);
                Event::Empty(root)
            }
            Event::Start(e) if antialias => Event::Start(force_precision(&e)?),
            Event::Empty(e) if antialias => Event::Empty(force_precision(&e)?),
            other => other,
        };
        writer.write_event(out).map_err(|e| e.to_string())?;
        buf.clear();
    }

    let (width, height) = dims.ok_or_else(|| "no root element".to_string())?;
    Ok(SvgImage { data: writer.into_inner(), width, height })
}

fn rewrite_root(
    e: &BytesStart<'_>,
    size: Option<(u32, u32)>,
) -> Result<(BytesStart<'static>, (u32, u32)), String> {
    if e.local_name().as_ref() != b"svg" {
        return Err(format!(
            "root element is <{}>, not <svg>",
            String::from_utf8_lossy(e.name().as_ref())
        ));
    }

    let mut view_box: Option<String> = None;
    let mut kept: Vec<(String, String)> = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        match key.as_str() {
            "width" | "height" => continue,
            "viewBox" => view_box = Some(value.clone()),
            _ => {}
        }
        kept.push((key, value));
    }

    let (width, height) = match size {
        Some(dims) => dims,
        None => view_box
            .as_deref()
            .and_then(view_box_extent)
            .ok_or_else(|| "no size configured and no usable viewBox".to_string())?,
    };

    let mut root = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for (k, v) in &kept {
        root.push_attribute((k.as_str(), v.as_str()));
    }
    root.push_attribute(("width", format!("{width}px").as_str()));
    root.push_attribute(("height", format!("{height}px").as_str()));
    Ok((root, (width, height)))
}

/// `"min-x min-y width height"`, separated by spaces and/or commas.
pub fn view_box_extent(view_box: &str) -> Option<(u32, u32)> {
    let parts: Vec<f64> = view_box
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [_, _, w, h] if *w > 0.0 && *h > 0.0 => Some((w.round() as u32, h.round() as u32)),
        _ => None,
    }
}

fn force_precision(e: &BytesStart<'_>) -> Result<BytesStart<'static>, String> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut clipped_attr = false;
    let mut has_rendering_attr = false;
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let mut value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        match key.as_str() {
            "style" => value = precise_style(&value).into_owned(),
            "clip-path" => clipped_attr = true,
            "shape-rendering" => has_rendering_attr = true,
            _ => {}
        }
        attrs.push((key, value));
    }
    if clipped_attr && !has_rendering_attr {
        attrs.push(("shape-rendering".into(), "geometricPrecision".into()));
    }

    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for (k, v) in &attrs {
        out.push_attribute((k.as_str(), v.as_str()));
    }
    Ok(out)
}

fn precise_style(style: &str) -> Cow<'_, str> {
    if !style.contains("clip-path") || style.contains("shape-rendering") {
        return Cow::Borrowed(style);
    }
    let trimmed = style.trim_end().trim_end_matches(';');
    Cow::Owned(format!("{trimmed};{PRECISE}"))
}
