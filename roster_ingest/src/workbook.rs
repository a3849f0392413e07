//! Workbook model loader.
//!
//! Turns an uploaded byte buffer into a [`RawGrid`] of coerced cell values
//! plus the list of images embedded in the workbook's drawing layer. Only
//! the first sheet is read. Grid parsing goes through calamine; the drawing
//! and media parts are read straight out of the OPC container, since the
//! grid reader does not expose them.

use std::collections::HashMap;
use std::io::{Cursor, Read as IoRead};

use calamine::{DataType, Reader, Xlsx};
use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use snafu::{OptionExt, ResultExt};
use zip::ZipArchive;

use crate::grid::{CellValue, ExtractedImage, RawGrid};
use crate::{BIngestResult, EmptySheetSnafu, NoSheetsSnafu, WorkbookParseSnafu};

/// The loader's output: the grid, the extracted images, and any non-fatal
/// warnings recorded while reading the drawing layer.
#[derive(Debug)]
pub struct LoadedWorkbook {
    pub grid: RawGrid,
    pub images: Vec<ExtractedImage>,
    pub warnings: Vec<String>,
}

pub fn load_workbook(bytes: &[u8]) -> BIngestResult<LoadedWorkbook> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes.to_vec())).context(WorkbookParseSnafu {})?;
    let wrange = workbook
        .worksheet_range_at(0)
        .context(NoSheetsSnafu {})?
        .context(WorkbookParseSnafu {})?;
    let (origin_row, origin_col) = wrange.start().context(EmptySheetSnafu {})?;
    debug!(
        "load_workbook: sheet starts at ({}, {}), {} rows x {} columns",
        origin_row,
        origin_col,
        wrange.height(),
        wrange.width()
    );

    let rows: Vec<Vec<CellValue>> = wrange
        .rows()
        .map(|row| row.iter().map(cell_value).collect())
        .collect();
    let grid = RawGrid::new(rows, origin_row as usize, origin_col as usize);

    let mut warnings = Vec::new();
    let images = extract_images(bytes, &mut warnings);
    debug!(
        "load_workbook: extracted {} embedded images ({} warnings)",
        images.len(),
        warnings.len()
    );

    Ok(LoadedWorkbook {
        grid,
        images,
        warnings,
    })
}

/// Coerces a calamine cell into the pipeline's cell model, once, at the
/// boundary. Whitespace-only strings count as blank.
fn cell_value(cell: &DataType) -> CellValue {
    match cell {
        DataType::Empty => CellValue::Blank,
        DataType::String(s) if s.trim().is_empty() => CellValue::Blank,
        DataType::String(s) => CellValue::Text(s.clone()),
        DataType::Int(i) => CellValue::Number(*i as f64),
        DataType::Float(f) => CellValue::Number(*f),
        DataType::DateTime(f) => CellValue::Number(*f),
        DataType::Bool(b) => CellValue::Text(b.to_string()),
        _ => CellValue::Blank,
    }
}

/// Extracts embedded images with a three-strategy chain, in priority order,
/// never mixing results once a higher strategy has populated the list:
///
/// 1. drawing parts linked from the first sheet's relationships, with
///    anchors;
/// 2. any drawing part present in the container (covers workbooks whose
///    sheet-to-drawing relationship is missing or broken), same anchor
///    semantics;
/// 3. the bare `xl/media/*` listing in file order, as an anchorless pool
///    for the associator's ordered fallback.
fn extract_images(bytes: &[u8], warnings: &mut Vec<String>) -> Vec<ExtractedImage> {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(a) => a,
        Err(e) => {
            warnings.push(format!(
                "could not reopen the workbook container for images: {}",
                e
            ));
            return Vec::new();
        }
    };

    let linked = sheet_drawing_parts(&mut archive);
    if !linked.is_empty() {
        let images = collect_from_drawings(&mut archive, &linked, warnings);
        if !images.is_empty() {
            debug!(
                "extract_images: {} images via the sheet-linked drawing part(s)",
                images.len()
            );
            return images;
        }
    }

    let mut all_parts: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/drawings/") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    all_parts.sort_by_key(|n| (part_ordinal(n), n.clone()));
    if !all_parts.is_empty() {
        let images = collect_from_drawings(&mut archive, &all_parts, warnings);
        if !images.is_empty() {
            debug!(
                "extract_images: {} images via a direct drawing-part scan",
                images.len()
            );
            return images;
        }
    }

    ordered_media_pool(&mut archive, warnings)
}

/// A picture reference inside a drawing part: the relationship id of its
/// media bytes plus the top-left anchor cell, when the anchor element
/// carried one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PicRef {
    rel_id: String,
    row: Option<u32>,
    col: Option<u32>,
}

fn collect_from_drawings(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    parts: &[String],
    warnings: &mut Vec<String>,
) -> Vec<ExtractedImage> {
    let mut images = Vec::new();
    for part in parts {
        let xml = match read_part(archive, part) {
            Some(x) => x,
            None => {
                debug!("collect_from_drawings: part {} is unreadable", part);
                continue;
            }
        };
        let pics = parse_drawing_pictures(&xml);
        if pics.is_empty() {
            continue;
        }
        let rels = match read_part(archive, &rels_path_for(part)) {
            Some(x) => parse_relationships(&x),
            None => {
                warnings.push(format!(
                    "drawing part {} has no relationships; its images were skipped",
                    part
                ));
                continue;
            }
        };
        let base = parent_dir(part);
        for pic in pics {
            let target = match rels.get(&pic.rel_id) {
                Some((_, target)) => target,
                None => {
                    warnings.push(format!(
                        "drawing part {} references unknown media {}",
                        part, pic.rel_id
                    ));
                    continue;
                }
            };
            let media_path = resolve_part(base, target);
            let media = match read_part_bytes(archive, &media_path) {
                Some(b) => b,
                None => {
                    warnings.push(format!("embedded image {} could not be read", media_path));
                    continue;
                }
            };
            match build_image(media, pic.row, pic.col) {
                Ok(img) => images.push(img),
                Err(reason) => {
                    warnings.push(format!("embedded image {} dropped: {}", media_path, reason))
                }
            }
        }
    }
    images
}

fn ordered_media_pool(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    warnings: &mut Vec<String>,
) -> Vec<ExtractedImage> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/media/"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|n| (part_ordinal(n), n.clone()));

    let mut images = Vec::new();
    for name in names {
        let bytes = match read_part_bytes(archive, &name) {
            Some(b) => b,
            None => {
                warnings.push(format!("embedded image {} could not be read", name));
                continue;
            }
        };
        match build_image(bytes, None, None) {
            Ok(img) => images.push(img),
            Err(reason) => warnings.push(format!("embedded image {} dropped: {}", name, reason)),
        }
    }
    if !images.is_empty() {
        debug!(
            "ordered_media_pool: {} images with no anchor metadata",
            images.len()
        );
    }
    images
}

fn build_image(
    bytes: Vec<u8>,
    row: Option<u32>,
    col: Option<u32>,
) -> Result<ExtractedImage, String> {
    if bytes.is_empty() {
        return Err("zero-length image".to_string());
    }
    let format = match image::guess_format(&bytes) {
        Ok(f) => f,
        Err(_) => return Err("unrecognized byte signature".to_string()),
    };
    Ok(ExtractedImage {
        bytes,
        format,
        anchor_row: row,
        anchor_col: col,
    })
}

/// Drawing parts reachable from the first sheet: workbook part -> first
/// sheet relationship -> sheet part -> its drawing relationships.
fn sheet_drawing_parts(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Vec<String> {
    let workbook_xml = match read_part(archive, "xl/workbook.xml") {
        Some(x) => x,
        None => return Vec::new(),
    };
    let rel_id = match first_sheet_rel_id(&workbook_xml) {
        Some(id) => id,
        None => return Vec::new(),
    };
    let workbook_rels = match read_part(archive, "xl/_rels/workbook.xml.rels") {
        Some(x) => parse_relationships(&x),
        None => return Vec::new(),
    };
    let sheet_part = match workbook_rels.get(&rel_id) {
        Some((_, target)) => resolve_part("xl", target),
        None => return Vec::new(),
    };
    let sheet_rels = match read_part(archive, &rels_path_for(&sheet_part)) {
        Some(x) => parse_relationships(&x),
        None => return Vec::new(),
    };
    let base = parent_dir(&sheet_part).to_string();
    let mut parts: Vec<String> = sheet_rels
        .values()
        .filter(|(rel_type, _)| rel_type.ends_with("/drawing"))
        .map(|(_, target)| resolve_part(&base, target))
        .collect();
    parts.sort();
    parts
}

/// The `r:id` of the first `<sheet>` element in the workbook part.
fn first_sheet_rel_id(xml: &str) -> Option<String> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let name = e.name();
                if matches!(name.as_ref(), b"sheet" | b"x:sheet") {
                    let id = attr_value(&e, &reader, b"r:id")
                        .or_else(|| attr_value(&e, &reader, b"id"));
                    if id.is_some() {
                        return id;
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Parses a relationships part into `id -> (type, target)`.
fn parse_relationships(xml: &str) -> HashMap<String, (String, String)> {
    let mut relationships = HashMap::new();
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                if e.name().as_ref() == b"Relationship" {
                    let id = attr_value(&e, &reader, b"Id");
                    let rel_type = attr_value(&e, &reader, b"Type").unwrap_or_default();
                    let target = attr_value(&e, &reader, b"Target");
                    if let (Some(id), Some(target)) = (id, target) {
                        relationships.insert(id, (rel_type, target));
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    relationships
}

/// Walks a drawing part for `pic` elements, recording each picture's
/// `blip` relationship id and the `from` anchor of its enclosing anchor
/// element. Absolute anchors carry no `from` and yield `None` coordinates.
fn parse_drawing_pictures(xml: &str) -> Vec<PicRef> {
    let mut pictures = Vec::new();
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut in_pic = false;
    let mut in_from = false;
    let mut in_from_col = false;
    let mut in_from_row = false;
    let mut current_rel_id: Option<String> = None;
    let mut from_col: Option<u32> = None;
    let mut from_row: Option<u32> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) => match e.name().as_ref() {
                b"xdr:pic" | b"pic" => in_pic = true,
                b"a:blip" | b"blip" if in_pic => {
                    if let Some(id) = attr_value(&e, &reader, b"r:embed")
                        .or_else(|| attr_value(&e, &reader, b"embed"))
                    {
                        current_rel_id = Some(id);
                    }
                }
                b"xdr:from" | b"from" => in_from = true,
                b"xdr:col" | b"col" if in_from => in_from_col = true,
                b"xdr:row" | b"row" if in_from => in_from_row = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Ok(text) = e.unescape() {
                    let text = text.trim();
                    if in_from_col {
                        from_col = text.parse().ok();
                    } else if in_from_row {
                        from_row = text.parse().ok();
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"xdr:pic" | b"pic" => {
                    if let Some(rel_id) = current_rel_id.take() {
                        pictures.push(PicRef {
                            rel_id,
                            row: from_row,
                            col: from_col,
                        });
                    }
                    in_pic = false;
                }
                b"xdr:from" | b"from" => in_from = false,
                b"xdr:col" | b"col" if in_from => in_from_col = false,
                b"xdr:row" | b"row" if in_from => in_from_row = false,
                b"xdr:twoCellAnchor" | b"twoCellAnchor" | b"xdr:oneCellAnchor"
                | b"oneCellAnchor" | b"xdr:absoluteAnchor" | b"absoluteAnchor" => {
                    from_col = None;
                    from_row = None;
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    pictures
}

fn attr_value(e: &BytesStart, reader: &XmlReader<&[u8]>, key: &[u8]) -> Option<String> {
    for attr in e.attributes().filter_map(Result::ok) {
        if attr.key.as_ref() == key {
            if let Ok(value) = attr.decode_and_unescape_value(reader) {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    Some(contents)
}

fn read_part_bytes(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<Vec<u8>> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(e) => {
            warn!("read_part_bytes: {}: {}", name, e);
            return None;
        }
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}

/// Resolves a relationship target against the directory of the referencing
/// part, folding `..` segments: `("xl/drawings", "../media/image1.png")`
/// becomes `xl/media/image1.png`.
fn resolve_part(base_dir: &str, target: &str) -> String {
    let raw = if let Some(stripped) = target.strip_prefix('/') {
        stripped.to_string()
    } else if base_dir.is_empty() {
        target.to_string()
    } else {
        format!("{}/{}", base_dir, target)
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Numeric component of a part name, for stable file ordering
/// (`drawing2.xml` before `drawing10.xml`).
fn part_ordinal(name: &str) -> u32 {
    let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(u32::MAX)
}
