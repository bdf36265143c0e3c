//! The fixed OOXML part table: content types, package/workbook
//! relationships, `workbook.xml`, `sharedStrings.xml`, `styles.xml`, and
//! per-sheet worksheet XML (spec §6, §4.15).
//!
//! Writers build on `crate::xml::writer::XmlNode`. `workbook.xml` and
//! `styles.xml` parsers use the same memchr-driven substring scan as
//! `ooxml/xlsx/parsers/workbook_parser.rs` in the teacher rather than a
//! full DOM parse, since both parts have a flat, predictable shape.
//! Worksheet XML parsing instead drives `crate::xml::reader::scan_worksheet`,
//! which already implements that scan for the hot path.

use std::collections::HashMap;

use crate::cell::{CellFlags, CellRecord, CellStore, CellValue};
use crate::coord::{Coordinate, Range};
use crate::error::{Error, Result};
use crate::grid::{MergeIndex, RowColManager};
use crate::pool::{ExtendedDataPool, StringPool};
use crate::style::{Alignment, Border, BorderSide, BorderStyle, CellStyle, Fill, Font, HorizontalAlign, NumberFormat, VerticalAlign};
use crate::xml::reader::{scan_worksheet, CellNode, RowNode, WorksheetVisitor};
use crate::xml::writer::{to_bytes, XmlNode};

const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PACKAGE_RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const REL_TYPE_OFFICE_DOCUMENT: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_TYPE_WORKSHEET: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const REL_TYPE_SHARED_STRINGS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
const REL_TYPE_STYLES: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

const CT_WORKBOOK: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const CT_WORKSHEET: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
const CT_SHARED_STRINGS: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";

/// `[Content_Types].xml`: MIME types for every part in the package (spec §6).
pub fn content_types_xml(sheet_count: usize) -> Vec<u8> {
    let mut root = XmlNode::new("Types")
        .attr("xmlns", CONTENT_TYPES_NS)
        .child(
            XmlNode::new("Default")
                .attr("Extension", "rels")
                .attr("ContentType", "application/vnd.openxmlformats-package.relationships+xml"),
        )
        .child(XmlNode::new("Default").attr("Extension", "xml").attr("ContentType", "application/xml"))
        .child(
            XmlNode::new("Override")
                .attr("PartName", "/xl/workbook.xml")
                .attr("ContentType", CT_WORKBOOK),
        )
        .child(
            XmlNode::new("Override")
                .attr("PartName", "/xl/styles.xml")
                .attr("ContentType", CT_STYLES),
        )
        .child(
            XmlNode::new("Override")
                .attr("PartName", "/xl/sharedStrings.xml")
                .attr("ContentType", CT_SHARED_STRINGS),
        );
    for i in 1..=sheet_count {
        root.push_child(
            XmlNode::new("Override")
                .attr("PartName", format!("/xl/worksheets/sheet{i}.xml"))
                .attr("ContentType", CT_WORKSHEET),
        );
    }
    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

/// `_rels/.rels`: the package's single relationship to `xl/workbook.xml`
/// (spec §6).
pub fn package_rels_xml() -> Vec<u8> {
    let root = XmlNode::new("Relationships").attr("xmlns", PACKAGE_RELS_NS).child(
        XmlNode::new("Relationship")
            .attr("Id", "rId1")
            .attr("Type", REL_TYPE_OFFICE_DOCUMENT)
            .attr("Target", "xl/workbook.xml"),
    );
    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

/// `xl/workbook.xml`: the sheet list, each referencing a relationship id
/// resolved by `workbook_rels_xml` (spec §6, §4.15).
pub fn workbook_xml(sheet_names: &[String]) -> Vec<u8> {
    let mut sheets = XmlNode::new("sheets");
    for (i, name) in sheet_names.iter().enumerate() {
        sheets.push_child(
            XmlNode::new("sheet")
                .attr("name", name.clone())
                .attr("sheetId", (i + 1).to_string())
                .attr("r:id", format!("rId{}", i + 1)),
        );
    }
    let root = XmlNode::new("workbook")
        .attr("xmlns", SPREADSHEET_NS)
        .attr("xmlns:r", RELATIONSHIPS_NS)
        .child(
            XmlNode::new("bookViews").child(XmlNode::new("workbookView").attr("activeTab", "0")),
        )
        .child(sheets);
    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

/// Parse `workbook.xml`'s sheet list, in document order (spec §4.15 "Load").
/// Grounded on the `<sheets>...</sheets>` / `<sheet name="...">` memchr scan
/// in `ooxml/xlsx/parsers/workbook_parser.rs` in the teacher.
pub fn parse_workbook_xml(xml: &[u8]) -> Result<Vec<String>> {
    let Some(sheets_start) = memchr::memmem::find(xml, b"<sheets") else {
        return Ok(Vec::new());
    };
    let Some(sheets_end_rel) = memchr::memmem::find(&xml[sheets_start..], b"</sheets>") else {
        return Err(Error::Parse {
            part: "xl/workbook.xml".into(),
            message: "unterminated <sheets> element".into(),
        });
    };
    let body = &xml[sheets_start..sheets_start + sheets_end_rel];
    let mut names = Vec::new();
    let mut pos = 0;
    while let Some(tag_start_rel) = memchr::memmem::find(&body[pos..], b"<sheet ") {
        let tag_start = pos + tag_start_rel;
        let Some(tag_end_rel) = memchr::memchr(b'>', &body[tag_start..]) else {
            break;
        };
        let tag = std::str::from_utf8(&body[tag_start..=tag_start + tag_end_rel]).map_err(|e| Error::Parse {
            part: "xl/workbook.xml".into(),
            message: e.to_string(),
        })?;
        if let Some(name) = extract_attr(tag, "name") {
            names.push(unescape_xml_attr(name));
        }
        pos = tag_start + tag_end_rel + 1;
    }
    Ok(names)
}

fn extract_attr<'a>(tag: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{key}=\"");
    let start = tag.find(&needle)? + needle.len();
    let rest = &tag[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn unescape_xml_attr(s: &str) -> String {
    if memchr::memchr(b'&', s.as_bytes()).is_none() {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `xl/_rels/workbook.xml.rels`: resolves each sheet's `r:id` to its
/// worksheet path, plus fixed relationships to the shared-strings and
/// styles parts (spec §6).
pub fn workbook_rels_xml(sheet_count: usize) -> Vec<u8> {
    let mut root = XmlNode::new("Relationships").attr("xmlns", PACKAGE_RELS_NS);
    for i in 1..=sheet_count {
        root.push_child(
            XmlNode::new("Relationship")
                .attr("Id", format!("rId{i}"))
                .attr("Type", REL_TYPE_WORKSHEET)
                .attr("Target", format!("worksheets/sheet{i}.xml")),
        );
    }
    root.push_child(
        XmlNode::new("Relationship")
            .attr("Id", format!("rId{}", sheet_count + 1))
            .attr("Type", REL_TYPE_SHARED_STRINGS)
            .attr("Target", "sharedStrings.xml"),
    );
    root.push_child(
        XmlNode::new("Relationship")
            .attr("Id", format!("rId{}", sheet_count + 2))
            .attr("Type", REL_TYPE_STYLES)
            .attr("Target", "styles.xml"),
    );
    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

/// `xl/sharedStrings.xml`: every distinct string the pool holds, for
/// package conformance (spec §6, SPEC_FULL §11 — our own worksheet writer
/// never references these by index, it always emits `t="inlineStr"`).
pub fn shared_strings_xml(strings: &[String]) -> Vec<u8> {
    let mut root = XmlNode::new("sst")
        .attr("xmlns", SPREADSHEET_NS)
        .attr("count", strings.len().to_string())
        .attr("uniqueCount", strings.len().to_string());
    for s in strings {
        root.push_child(XmlNode::new("si").child(XmlNode::new("t").text(s.clone())));
    }
    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

// ---------------------------------------------------------------------
// styles.xml
// ---------------------------------------------------------------------

/// Deduplicated font/fill/border/number-format sub-tables built while
/// writing `styles.xml`, mirroring `StylesBuilder` in the teacher's
/// `ooxml/xlsx/writer/styles.rs` but keyed off this crate's already
/// structurally-deduplicated `CellStyle` values rather than re-hashing
/// each sub-part itself.
struct StyleTables {
    fonts: Vec<Font>,
    font_index: HashMap<Font, u32>,
    fills: Vec<Fill>,
    fill_index: HashMap<Fill, u32>,
    borders: Vec<Border>,
    border_index: HashMap<Border, u32>,
    number_formats: Vec<NumberFormat>,
    number_format_index: HashMap<String, u32>,
}

impl StyleTables {
    fn new() -> Self {
        let fonts = vec![Font::default()];
        let mut font_index = HashMap::new();
        font_index.insert(Font::default(), 0);

        // Excel expects at least two fill entries (ids 0 and 1); the second
        // is conventionally the built-in "gray125" pattern and is never
        // referenced by any `CellStyle` this catalogue produces.
        let fills = vec![
            Fill::None,
            Fill::Pattern {
                pattern_type: "gray125".into(),
                fg_color_argb: None,
                bg_color_argb: None,
            },
        ];
        let mut fill_index = HashMap::new();
        fill_index.insert(Fill::None, 0);

        let borders = vec![Border::default()];
        let mut border_index = HashMap::new();
        border_index.insert(Border::default(), 0);

        Self {
            fonts,
            font_index,
            fills,
            fill_index,
            borders,
            border_index,
            number_formats: Vec::new(),
            number_format_index: HashMap::new(),
        }
    }

    fn font_id(&mut self, font: &Font) -> u32 {
        if let Some(&id) = self.font_index.get(font) {
            return id;
        }
        let id = self.fonts.len() as u32;
        self.fonts.push(font.clone());
        self.font_index.insert(font.clone(), id);
        id
    }

    fn fill_id(&mut self, fill: &Fill) -> u32 {
        if let Some(&id) = self.fill_index.get(fill) {
            return id;
        }
        let id = self.fills.len() as u32;
        self.fills.push(fill.clone());
        self.fill_index.insert(fill.clone(), id);
        id
    }

    fn border_id(&mut self, border: &Border) -> u32 {
        if let Some(&id) = self.border_index.get(border) {
            return id;
        }
        let id = self.borders.len() as u32;
        self.borders.push(border.clone());
        self.border_index.insert(border.clone(), id);
        id
    }

    /// Custom number-format ids start at 164, below which the built-in
    /// formats live (id 0 "General" needs no table entry).
    fn number_format_id(&mut self, fmt: &NumberFormat) -> u32 {
        if let Some(&id) = self.number_format_index.get(&fmt.format_code) {
            return id;
        }
        let id = 164 + self.number_formats.len() as u32;
        self.number_formats.push(NumberFormat {
            id,
            format_code: fmt.format_code.clone(),
        });
        self.number_format_index.insert(fmt.format_code.clone(), id);
        id
    }
}

fn border_side_xml(name: &str, side: &BorderSide) -> XmlNode {
    let mut node = XmlNode::new(name);
    if side.style != BorderStyle::None {
        node = node.attr("style", border_style_str(side.style));
        if let Some(color) = &side.color_argb {
            node.push_child(XmlNode::new("color").attr("rgb", color.clone()));
        }
    }
    node
}

fn border_style_str(style: BorderStyle) -> &'static str {
    match style {
        BorderStyle::None => "none",
        BorderStyle::Thin => "thin",
        BorderStyle::Medium => "medium",
        BorderStyle::Thick => "thick",
        BorderStyle::Dashed => "dashed",
        BorderStyle::Dotted => "dotted",
        BorderStyle::Double => "double",
    }
}

fn horizontal_align_str(h: HorizontalAlign) -> Option<&'static str> {
    match h {
        HorizontalAlign::General => None,
        HorizontalAlign::Left => Some("left"),
        HorizontalAlign::Center => Some("center"),
        HorizontalAlign::Right => Some("right"),
        HorizontalAlign::Fill => Some("fill"),
        HorizontalAlign::Justify => Some("justify"),
    }
}

fn horizontal_align_from_str(s: &str) -> HorizontalAlign {
    match s {
        "left" => HorizontalAlign::Left,
        "center" => HorizontalAlign::Center,
        "right" => HorizontalAlign::Right,
        "fill" => HorizontalAlign::Fill,
        "justify" => HorizontalAlign::Justify,
        _ => HorizontalAlign::General,
    }
}

fn vertical_align_str(v: VerticalAlign) -> Option<&'static str> {
    match v {
        VerticalAlign::Center => None,
        VerticalAlign::Top => Some("top"),
        VerticalAlign::Bottom => Some("bottom"),
    }
}

fn vertical_align_from_str(s: &str) -> VerticalAlign {
    match s {
        "top" => VerticalAlign::Top,
        "bottom" => VerticalAlign::Bottom,
        _ => VerticalAlign::Center,
    }
}

fn border_style_from_str(s: &str) -> BorderStyle {
    match s {
        "thin" => BorderStyle::Thin,
        "medium" => BorderStyle::Medium,
        "thick" => BorderStyle::Thick,
        "dashed" => BorderStyle::Dashed,
        "dotted" => BorderStyle::Dotted,
        "double" => BorderStyle::Double,
        _ => BorderStyle::None,
    }
}

/// `xl/styles.xml`: `numFmts`, `fonts`, `fills`, `borders`, `cellXfs` (spec
/// §6). `styles` is in catalogue-handle order, so the emitted `cellXfs`
/// index directly equals the `CellStyle` handle — no separate remapping
/// table is needed on the way back in.
pub fn styles_xml(styles: &[CellStyle]) -> Vec<u8> {
    let mut tables = StyleTables::new();
    let mut xfs = Vec::with_capacity(styles.len());
    for style in styles {
        let font_id = tables.font_id(&style.font);
        let fill_id = tables.fill_id(&style.fill);
        let border_id = tables.border_id(&style.border);
        let num_fmt_id = match &style.number_format {
            Some(fmt) => tables.number_format_id(fmt),
            None => 0,
        };
        xfs.push((num_fmt_id, font_id, fill_id, border_id, style.alignment.clone()));
    }

    let mut root = XmlNode::new("styleSheet").attr("xmlns", SPREADSHEET_NS);

    if !tables.number_formats.is_empty() {
        let mut num_fmts = XmlNode::new("numFmts").attr("count", tables.number_formats.len().to_string());
        for fmt in &tables.number_formats {
            num_fmts.push_child(
                XmlNode::new("numFmt")
                    .attr("numFmtId", fmt.id.to_string())
                    .attr("formatCode", fmt.format_code.clone()),
            );
        }
        root.push_child(num_fmts);
    }

    let mut fonts = XmlNode::new("fonts").attr("count", tables.fonts.len().to_string());
    for font in &tables.fonts {
        let mut node = XmlNode::new("font");
        if font.bold {
            node.push_child(XmlNode::new("b"));
        }
        if font.italic {
            node.push_child(XmlNode::new("i"));
        }
        if font.underline {
            node.push_child(XmlNode::new("u"));
        }
        if font.strike {
            node.push_child(XmlNode::new("strike"));
        }
        if let Some(size) = font.size_half_points {
            node.push_child(XmlNode::new("sz").attr("val", (size as f64 / 2.0).to_string()));
        }
        if let Some(color) = &font.color_argb {
            node.push_child(XmlNode::new("color").attr("rgb", color.clone()));
        }
        node.push_child(XmlNode::new("name").attr("val", font.name.clone().unwrap_or_else(|| "Calibri".into())));
        fonts.push_child(node);
    }
    root.push_child(fonts);

    let mut fills = XmlNode::new("fills").attr("count", tables.fills.len().to_string());
    for fill in &tables.fills {
        let pattern = match fill {
            Fill::None => XmlNode::new("patternFill").attr("patternType", "none"),
            Fill::Solid { fg_color_argb } => XmlNode::new("patternFill")
                .attr("patternType", "solid")
                .child(XmlNode::new("fgColor").attr("rgb", fg_color_argb.clone())),
            Fill::Pattern {
                pattern_type,
                fg_color_argb,
                bg_color_argb,
            } => {
                let mut node = XmlNode::new("patternFill").attr("patternType", pattern_type.clone());
                if let Some(fg) = fg_color_argb {
                    node.push_child(XmlNode::new("fgColor").attr("rgb", fg.clone()));
                }
                if let Some(bg) = bg_color_argb {
                    node.push_child(XmlNode::new("bgColor").attr("rgb", bg.clone()));
                }
                node
            }
        };
        fills.push_child(XmlNode::new("fill").child(pattern));
    }
    root.push_child(fills);

    let mut borders = XmlNode::new("borders").attr("count", tables.borders.len().to_string());
    for border in &tables.borders {
        borders.push_child(
            XmlNode::new("border")
                .child(border_side_xml("left", &border.left))
                .child(border_side_xml("right", &border.right))
                .child(border_side_xml("top", &border.top))
                .child(border_side_xml("bottom", &border.bottom))
                .child(border_side_xml("diagonal", &border.diagonal)),
        );
    }
    root.push_child(borders);

    root.push_child(
        XmlNode::new("cellStyleXfs").attr("count", "1").child(
            XmlNode::new("xf")
                .attr("numFmtId", "0")
                .attr("fontId", "0")
                .attr("fillId", "0")
                .attr("borderId", "0"),
        ),
    );

    let mut cell_xfs = XmlNode::new("cellXfs").attr("count", xfs.len().to_string());
    for (num_fmt_id, font_id, fill_id, border_id, alignment) in &xfs {
        let mut xf = XmlNode::new("xf")
            .attr("numFmtId", num_fmt_id.to_string())
            .attr("fontId", font_id.to_string())
            .attr("fillId", fill_id.to_string())
            .attr("borderId", border_id.to_string());
        if *num_fmt_id != 0 {
            xf = xf.attr("applyNumberFormat", "1");
        }
        if *font_id != 0 {
            xf = xf.attr("applyFont", "1");
        }
        if *fill_id != 0 {
            xf = xf.attr("applyFill", "1");
        }
        if *border_id != 0 {
            xf = xf.attr("applyBorder", "1");
        }
        if *alignment != Alignment::default() {
            xf = xf.attr("applyAlignment", "1");
            xf.push_child(
                XmlNode::new("alignment")
                    .maybe_attr("horizontal", horizontal_align_str(alignment.horizontal))
                    .maybe_attr("vertical", vertical_align_str(alignment.vertical))
                    .maybe_attr("wrapText", alignment.wrap_text.then_some("1"))
                    .maybe_attr(
                        "textRotation",
                        (alignment.text_rotation != 0).then(|| alignment.text_rotation.to_string()),
                    ),
            );
        }
        cell_xfs.push_child(xf);
    }
    root.push_child(cell_xfs);

    root.push_child(
        XmlNode::new("cellStyles")
            .attr("count", "1")
            .child(XmlNode::new("cellStyle").attr("name", "Normal").attr("xfId", "0").attr("builtinId", "0")),
    );

    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

/// Parse `styles.xml` back into a dense `cellXfs`-ordered `Vec<CellStyle>`
/// (spec §4.15 "Load"). Sub-table scans follow the same bracketed
/// `content.find("<tag")` idiom as `ooxml/xlsx/parsers/styles_parser.rs`
/// in the teacher.
pub fn parse_styles_xml(xml: &[u8]) -> Result<Vec<CellStyle>> {
    let s = std::str::from_utf8(xml).map_err(|e| Error::Parse {
        part: "xl/styles.xml".into(),
        message: e.to_string(),
    })?;

    let number_formats = parse_number_formats(s);
    let fonts = parse_section(s, "<fonts", "</fonts>", parse_font);
    let fills = parse_section(s, "<fills", "</fills>", parse_fill);
    let borders = parse_section(s, "<borders", "</borders>", parse_border);
    let xfs = parse_cell_xfs(s);

    let mut styles = Vec::with_capacity(xfs.len());
    for (num_fmt_id, font_id, fill_id, border_id, alignment) in xfs {
        styles.push(CellStyle {
            font: fonts.get(font_id as usize).cloned().unwrap_or_default(),
            fill: fills.get(fill_id as usize).cloned().unwrap_or_default(),
            border: borders.get(border_id as usize).cloned().unwrap_or_default(),
            alignment,
            number_format: number_formats.get(&num_fmt_id).cloned(),
        });
    }
    Ok(styles)
}

fn parse_section<T>(content: &str, open: &str, close: &str, mut parse_one: impl FnMut(&str) -> T) -> Vec<T> {
    let mut out = Vec::new();
    let Some(open_start) = content.find(open) else {
        return out;
    };
    // Skip past the wrapping tag's own '>' so the element scan below can't
    // mistake `<fonts count="3">` for a first `<font` child.
    let Some(open_tag_end_rel) = content[open_start..].find('>') else {
        return out;
    };
    let body_start = open_start + open_tag_end_rel + 1;
    let Some(close_rel) = content[body_start..].find(close) else {
        return out;
    };
    let body = &content[body_start..body_start + close_rel];
    // Each top-level child is a self-closing `<font/>`-style element or a
    // `<font>...</font>` pair; both close with the entry's own open tag
    // name, so split on the element boundary generically via `<font` etc.
    let elem = &open[1..]; // "fonts" -> "font"
    let singular = elem.trim_end_matches('s');
    let open_tag = format!("<{singular}");
    let close_tag = format!("</{singular}>");
    let mut pos = 0;
    while let Some(rel) = body[pos..].find(open_tag.as_str()) {
        let elem_start = pos + rel;
        let (elem_end, next_pos) = if let Some(close_rel) = body[elem_start..].find(close_tag.as_str()) {
            (elem_start + close_rel + close_tag.len(), elem_start + close_rel + close_tag.len())
        } else if let Some(selfclose_rel) = body[elem_start..].find("/>") {
            (elem_start + selfclose_rel + 2, elem_start + selfclose_rel + 2)
        } else {
            break;
        };
        out.push(parse_one(&body[elem_start..elem_end]));
        pos = next_pos;
    }
    out
}

fn parse_number_formats(content: &str) -> HashMap<u32, NumberFormat> {
    let mut map = HashMap::new();
    let Some(start) = content.find("<numFmts") else {
        return map;
    };
    let Some(end_rel) = content[start..].find("</numFmts>") else {
        return map;
    };
    let body = &content[start..start + end_rel];
    let mut pos = 0;
    while let Some(rel) = body[pos..].find("<numFmt ") {
        let elem_start = pos + rel;
        let Some(end_rel) = body[elem_start..].find("/>") else {
            break;
        };
        let tag = &body[elem_start..elem_start + end_rel + 2];
        if let (Some(id), Some(code)) = (extract_attr(tag, "numFmtId"), extract_attr(tag, "formatCode")) {
            if let Ok(id) = id.parse::<u32>() {
                map.insert(id, NumberFormat {
                    id,
                    format_code: unescape_xml_attr(code),
                });
            }
        }
        pos = elem_start + end_rel + 2;
    }
    map
}

fn parse_font(xml: &str) -> Font {
    Font {
        name: extract_between_tags(xml, "<name val=\"").map(str::to_string),
        size_half_points: extract_between_tags(xml, "<sz val=\"")
            .and_then(|s| s.parse::<f64>().ok())
            .map(|pt| (pt * 2.0).round() as u32),
        bold: xml.contains("<b/>") || xml.contains("<b>"),
        italic: xml.contains("<i/>") || xml.contains("<i>"),
        underline: xml.contains("<u/>") || xml.contains("<u>"),
        strike: xml.contains("<strike/>") || xml.contains("<strike>"),
        color_argb: extract_color(xml, "color"),
    }
}

fn extract_between_tags<'a>(xml: &'a str, open: &str) -> Option<&'a str> {
    let start = xml.find(open)? + open.len();
    let rest = &xml[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn extract_color(xml: &str, tag: &str) -> Option<String> {
    let needle = format!("<{tag} ");
    let start = xml.find(&needle)?;
    let rest = &xml[start..];
    let end = rest.find('>').unwrap_or(rest.len());
    extract_attr(&rest[..end + 1], "rgb").map(str::to_string)
}

fn parse_fill(xml: &str) -> Fill {
    let Some(pattern_start) = xml.find("<patternFill") else {
        return Fill::None;
    };
    let rest = &xml[pattern_start..];
    let tag_end = rest.find('>').unwrap_or(rest.len());
    let pattern_type = extract_attr(&rest[..tag_end + 1], "patternType").unwrap_or("none");
    if pattern_type == "none" {
        return Fill::None;
    }
    let fg = extract_color(rest, "fgColor");
    let bg = extract_color(rest, "bgColor");
    if pattern_type == "solid" {
        if let Some(fg) = fg {
            return Fill::Solid { fg_color_argb: fg };
        }
    }
    Fill::Pattern {
        pattern_type: pattern_type.to_string(),
        fg_color_argb: fg,
        bg_color_argb: bg,
    }
}

fn parse_border(xml: &str) -> Border {
    Border {
        left: parse_border_side(xml, "left"),
        right: parse_border_side(xml, "right"),
        top: parse_border_side(xml, "top"),
        bottom: parse_border_side(xml, "bottom"),
        diagonal: parse_border_side(xml, "diagonal"),
    }
}

fn parse_border_side(xml: &str, side: &str) -> BorderSide {
    let open = format!("<{side}");
    let Some(start) = xml.find(&open) else {
        return BorderSide::default();
    };
    let rest = &xml[start..];
    let Some(tag_end) = rest.find('>') else {
        return BorderSide::default();
    };
    let tag = &rest[..=tag_end];
    let style = extract_attr(tag, "style").map(border_style_from_str).unwrap_or(BorderStyle::None);
    if tag.ends_with("/>") {
        return BorderSide { style, color_argb: None };
    }
    // Bound the color search to this side's own body so a colorless side
    // can't pick up the next side's color.
    let close_tag = format!("</{side}>");
    let body = &rest[tag_end + 1..];
    let color = match body.find(close_tag.as_str()) {
        Some(close_rel) => extract_color(&body[..close_rel], "color"),
        None => None,
    };
    BorderSide { style, color_argb: color }
}

fn parse_cell_xfs(content: &str) -> Vec<(u32, u32, u32, u32, Alignment)> {
    let Some(cellxfs_start) = content.find("<cellXfs") else {
        return Vec::new();
    };
    let Some(open_tag_end_rel) = content[cellxfs_start..].find('>') else {
        return Vec::new();
    };
    let body_start = cellxfs_start + open_tag_end_rel + 1;
    let Some(end_rel) = content[body_start..].find("</cellXfs>") else {
        return Vec::new();
    };
    let body = &content[body_start..body_start + end_rel];
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = body[pos..].find("<xf ") {
        let elem_start = pos + rel;
        let Some(tag_end) = body[elem_start..].find('>').map(|i| elem_start + i) else {
            break;
        };
        let tag = &body[elem_start..=tag_end];
        let num_fmt_id = extract_attr(tag, "numFmtId").and_then(|s| s.parse().ok()).unwrap_or(0);
        let font_id = extract_attr(tag, "fontId").and_then(|s| s.parse().ok()).unwrap_or(0);
        let fill_id = extract_attr(tag, "fillId").and_then(|s| s.parse().ok()).unwrap_or(0);
        let border_id = extract_attr(tag, "borderId").and_then(|s| s.parse().ok()).unwrap_or(0);

        let (alignment, next_pos) = if tag.ends_with("/>") {
            (Alignment::default(), tag_end + 1)
        } else {
            match body[tag_end + 1..].find("</xf>") {
                Some(close_rel) => {
                    let xf_body = &body[tag_end + 1..tag_end + 1 + close_rel];
                    (parse_alignment(xf_body), tag_end + 1 + close_rel + "</xf>".len())
                }
                None => (Alignment::default(), tag_end + 1),
            }
        };
        out.push((num_fmt_id, font_id, fill_id, border_id, alignment));
        pos = next_pos;
    }
    out
}

fn parse_alignment(xf_body: &str) -> Alignment {
    let Some(start) = xf_body.find("<alignment") else {
        return Alignment::default();
    };
    let rest = &xf_body[start..];
    let Some(tag_end) = rest.find('>') else {
        return Alignment::default();
    };
    let tag = &rest[..=tag_end];
    Alignment {
        horizontal: extract_attr(tag, "horizontal").map(horizontal_align_from_str).unwrap_or_default(),
        vertical: extract_attr(tag, "vertical").map(vertical_align_from_str).unwrap_or_default(),
        wrap_text: extract_attr(tag, "wrapText") == Some("1"),
        text_rotation: extract_attr(tag, "textRotation").and_then(|s| s.parse().ok()).unwrap_or(0),
    }
}

// ---------------------------------------------------------------------
// Worksheet XML
// ---------------------------------------------------------------------

/// Everything `worksheet_xml` needs from one sheet's state (spec §4.13).
pub struct WorksheetXmlInput<'a> {
    pub store: &'a CellStore,
    pub rowcol: &'a RowColManager,
    pub merges: &'a MergeIndex,
    pub strings: &'a StringPool,
    pub ext: &'a ExtendedDataPool,
}

/// Render one worksheet's XML (spec §4.13, SPEC_FULL §11 "always emits
/// `t=\"inlineStr\"`"). Cells are collected and sorted since `CellStore`
/// does not guarantee row-major order internally.
pub fn worksheet_xml(input: &WorksheetXmlInput<'_>) -> Vec<u8> {
    let mut live: Vec<(Coordinate, &CellRecord)> = input
        .store
        .records()
        .iter()
        .filter(|r| !r.is_empty() || r.flags().contains(CellFlags::HAS_STYLE))
        .map(|r| (r.coordinate(), r))
        .collect();
    live.sort_by_key(|(c, _)| *c);

    let used = input.store.used_range();
    let dimension_ref = if used.is_valid() { used.to_a1() } else { "A1:A1".to_string() };

    let mut root = XmlNode::new("worksheet")
        .attr("xmlns", SPREADSHEET_NS)
        .attr("xmlns:r", RELATIONSHIPS_NS)
        .child(XmlNode::new("dimension").attr("ref", dimension_ref));

    if let Some(cols) = cols_node(input.rowcol) {
        root.push_child(cols);
    }

    let mut sheet_data = XmlNode::new("sheetData");
    let mut current_row: Option<u32> = None;
    let mut row_cells: Vec<XmlNode> = Vec::new();
    for (coord, record) in &live {
        if current_row != Some(coord.row) {
            if let Some(row) = current_row {
                sheet_data.push_child(row_node(row, input.rowcol, std::mem::take(&mut row_cells)));
            }
            current_row = Some(coord.row);
        }
        row_cells.push(cell_node(*coord, record, input.store, input.strings, input.ext));
    }
    if let Some(row) = current_row {
        sheet_data.push_child(row_node(row, input.rowcol, row_cells));
    }
    root.push_child(sheet_data);

    if !input.merges.is_empty() {
        let mut merge_cells = XmlNode::new("mergeCells").attr("count", input.merges.len().to_string());
        for region in input.merges.all() {
            merge_cells.push_child(XmlNode::new("mergeCell").attr("ref", region.to_a1()));
        }
        root.push_child(merge_cells);
    }

    to_bytes(&root).expect("writing to an in-memory Vec cannot fail")
}

fn cols_node(rowcol: &RowColManager) -> Option<XmlNode> {
    let mut cols: Vec<u32> = rowcol.custom_column_widths().map(|(c, _)| c).collect();
    for c in rowcol.hidden_columns() {
        if !cols.contains(&c) {
            cols.push(c);
        }
    }
    if cols.is_empty() {
        return None;
    }
    cols.sort_unstable();
    let mut node = XmlNode::new("cols");
    for col in cols {
        let width = rowcol.column_width(col);
        let mut entry = XmlNode::new("col")
            .attr("min", col.to_string())
            .attr("max", col.to_string())
            .attr("width", width.to_string())
            .attr("customWidth", "1");
        if rowcol.is_column_hidden(col) {
            entry = entry.attr("hidden", "1");
        }
        node.push_child(entry);
    }
    Some(node)
}

fn row_node(row: u32, rowcol: &RowColManager, cells: Vec<XmlNode>) -> XmlNode {
    let mut node = XmlNode::new("row").attr("r", row.to_string());
    let height = rowcol.row_height(row);
    if (height - crate::grid::rowcol::DEFAULT_ROW_HEIGHT).abs() > f64::EPSILON {
        node = node.attr("ht", height.to_string()).attr("customHeight", "1");
    }
    if rowcol.is_row_hidden(row) {
        node = node.attr("hidden", "1");
    }
    node.children(cells)
}

fn cell_node(
    coord: Coordinate,
    record: &CellRecord,
    store: &CellStore,
    strings: &StringPool,
    ext: &ExtendedDataPool,
) -> XmlNode {
    let mut node = XmlNode::new("c").attr("r", coord.to_a1());
    if let Some(style) = store.style_handle_at(coord) {
        if style != 0 {
            node = node.attr("s", style.to_string());
        }
    }
    let value = crate::cell::record::resolve_value(record, strings, ext);
    match value {
        CellValue::Empty => node,
        CellValue::Bool(b) => node.attr("t", "b").child(XmlNode::new("v").text(if b { "1" } else { "0" })),
        CellValue::Int(i) => node.child(XmlNode::new("v").text(itoa::Buffer::new().format(i).to_string())),
        CellValue::Float(f) => node.child(XmlNode::new("v").text(ryu::Buffer::new().format(f).to_string())),
        CellValue::String(s) => node
            .attr("t", "inlineStr")
            .child(XmlNode::new("is").child(XmlNode::new("t").text(s))),
        CellValue::Error(e) => node.attr("t", "e").child(XmlNode::new("v").text(e)),
        CellValue::Formula { formula, cached_value } => {
            let mut n = node.child(XmlNode::new("f").text(formula));
            if let Some(cached) = cached_value {
                if let Some(text) = cached_value_text(&cached) {
                    n.push_child(XmlNode::new("v").text(text));
                }
            }
            n
        }
    }
}

fn cached_value_text(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Int(i) => Some(itoa::Buffer::new().format(*i).to_string()),
        CellValue::Float(f) => Some(ryu::Buffer::new().format(*f).to_string()),
        CellValue::Bool(b) => Some(if *b { "1".to_string() } else { "0".to_string() }),
        CellValue::String(s) => Some(s.clone()),
        CellValue::Error(e) => Some(e.to_string()),
        _ => None,
    }
}

/// Parse one worksheet's XML into `store`/`rowcol`/`merges`, accepting both
/// `t="inlineStr"` and `t="s"` string cells on read (SPEC_FULL §11), and
/// `<f>` formula cells with an optional cached `<v>`.
pub fn parse_worksheet_xml(
    xml: &[u8],
    store: &mut CellStore,
    rowcol: &mut RowColManager,
    merges: &mut MergeIndex,
    strings: &StringPool,
    ext: &ExtendedDataPool,
    shared: &[String],
) -> Result<()> {
    let mut builder = WorksheetBuilder {
        store,
        rowcol,
        strings,
        ext,
        shared,
        error: None,
    };
    scan_worksheet(xml, &mut builder)?;
    parse_merge_cells(xml, merges)?;
    match builder.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Scan the (non-nested) `<mergeCells><mergeCell ref="A1:B1"/>...</mergeCells>`
/// block, grounded on the same memchr-scan style as `parse_workbook_xml`.
/// Malformed or overlapping regions are skipped rather than aborting the
/// whole worksheet parse, since merges are secondary to cell data.
fn parse_merge_cells(xml: &[u8], merges: &mut MergeIndex) -> Result<()> {
    let Some(start) = memchr::memmem::find(xml, b"<mergeCells") else {
        return Ok(());
    };
    let Some(end_rel) = memchr::memmem::find(&xml[start..], b"</mergeCells>") else {
        return Err(Error::Parse {
            part: "worksheet".into(),
            message: "unterminated <mergeCells> element".into(),
        });
    };
    let body = &xml[start..start + end_rel];
    let mut pos = 0;
    while let Some(tag_start_rel) = memchr::memmem::find(&body[pos..], b"<mergeCell ") {
        let tag_start = pos + tag_start_rel;
        let Some(tag_end_rel) = memchr::memchr(b'>', &body[tag_start..]) else {
            break;
        };
        let tag = std::str::from_utf8(&body[tag_start..=tag_start + tag_end_rel]).map_err(|e| Error::Parse {
            part: "worksheet".into(),
            message: e.to_string(),
        })?;
        if let Some(r) = extract_attr(tag, "ref") {
            if let Some(range) = Range::parse_a1(&unescape_xml_attr(r)) {
                let _ = merges.merge(range);
            }
        }
        pos = tag_start + tag_end_rel + 1;
    }
    Ok(())
}

struct WorksheetBuilder<'a> {
    store: &'a mut CellStore,
    rowcol: &'a mut RowColManager,
    strings: &'a StringPool,
    ext: &'a ExtendedDataPool,
    shared: &'a [String],
    error: Option<Error>,
}

impl WorksheetVisitor for WorksheetBuilder<'_> {
    fn on_row(&mut self, row: RowNode<'_>) {
        let Some(r) = row.r.parse::<u32>().ok() else { return };
        if let Some(ht) = row.custom_height.and_then(|h| h.parse::<f64>().ok()) {
            self.rowcol.set_row_height(r, ht);
        }
        if row.hidden {
            self.rowcol.set_row_hidden(r, true);
        }
    }

    fn on_cell(&mut self, cell: CellNode<'_>) {
        if self.error.is_some() {
            return;
        }
        let Some(coord) = Coordinate::parse_a1(cell.r) else { return };
        let value = match resolve_cell_value(&cell, self.shared) {
            Ok(v) => v,
            Err(e) => {
                self.error = Some(e);
                return;
            }
        };
        if let Err(e) = self.store.set_value(coord, &value, self.strings, self.ext) {
            self.error = Some(e);
            return;
        }
        if let Some(style) = cell.style.and_then(|s| s.parse::<u32>().ok()) {
            if style < u8::MAX as u32 {
                if let Some(rec) = self.store.get_mut(coord) {
                    rec.set_style_handle(Some(style as u8));
                }
            } else {
                self.store.set_style_overflow(coord, style);
            }
        }
    }
}

fn resolve_cell_value(cell: &CellNode<'_>, shared: &[String]) -> Result<CellValue> {
    if let Some(formula) = &cell.formula {
        return Ok(CellValue::Formula {
            formula: formula.clone(),
            cached_value: None,
        });
    }
    match cell.cell_type {
        Some("s") => {
            let idx: usize = cell.text.as_deref().unwrap_or("0").parse().map_err(|_| Error::Parse {
                part: "worksheet".into(),
                message: "non-numeric shared-string index".into(),
            })?;
            Ok(CellValue::String(shared.get(idx).cloned().unwrap_or_default()))
        }
        Some("inlineStr") => Ok(CellValue::String(cell.text.clone().unwrap_or_default())),
        Some("b") => Ok(CellValue::Bool(cell.text.as_deref() == Some("1"))),
        Some("e") => Ok(CellValue::Error(excel_error_str(cell.text.as_deref().unwrap_or("")))),
        _ => match &cell.text {
            Some(text) => Ok(CellValue::infer_from_str(text)),
            None => Ok(CellValue::Empty),
        },
    }
}

fn excel_error_str(s: &str) -> &'static str {
    match s {
        "#DIV/0!" => "#DIV/0!",
        "#VALUE!" => "#VALUE!",
        "#REF!" => "#REF!",
        "#NAME?" => "#NAME?",
        "#NUM!" => "#NUM!",
        "#N/A" => "#N/A",
        "#CIRCULAR!" => "#CIRCULAR!",
        "#NULL!" => "#NULL!",
        _ => "#VALUE!",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coordinate;
    use crate::style::StyleCatalogue;

    #[test]
    fn workbook_xml_lists_sheets_in_order() {
        let names = vec!["Sheet1".to_string(), "Data".to_string()];
        let xml = workbook_xml(&names);
        let parsed = parse_workbook_xml(&xml).unwrap();
        assert_eq!(parsed, names);
    }

    #[test]
    fn content_types_includes_one_override_per_sheet() {
        let xml = String::from_utf8(content_types_xml(3)).unwrap();
        assert_eq!(xml.matches("worksheet+xml").count(), 3);
    }

    #[test]
    fn styles_xml_round_trips_bold_font() {
        let catalogue = StyleCatalogue::new();
        let bold = catalogue.get_or_insert(CellStyle {
            font: Font {
                bold: true,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_ne!(bold, 0);
        let all = catalogue.all();
        let xml = styles_xml(&all);
        let parsed = parse_styles_xml(&xml).unwrap();
        assert_eq!(parsed[bold as usize].font.bold, true);
        assert_eq!(parsed[0].font.bold, false);
    }

    #[test]
    fn styles_xml_round_trips_alignment_and_border() {
        let catalogue = StyleCatalogue::new();
        let handle = catalogue.get_or_insert(CellStyle {
            alignment: crate::style::Alignment {
                horizontal: crate::style::HorizontalAlign::Center,
                vertical: crate::style::VerticalAlign::Top,
                wrap_text: true,
                text_rotation: 45,
            },
            border: Border {
                left: BorderSide {
                    style: BorderStyle::Thin,
                    color_argb: Some("FF000000".into()),
                },
                ..Default::default()
            },
            ..Default::default()
        });
        let all = catalogue.all();
        let xml = styles_xml(&all);
        let parsed = parse_styles_xml(&xml).unwrap();
        let style = &parsed[handle as usize];
        assert_eq!(style.alignment.horizontal, crate::style::HorizontalAlign::Center);
        assert_eq!(style.alignment.vertical, crate::style::VerticalAlign::Top);
        assert!(style.alignment.wrap_text);
        assert_eq!(style.alignment.text_rotation, 45);
        assert_eq!(style.border.left.style, BorderStyle::Thin);
        assert_eq!(style.border.left.color_argb.as_deref(), Some("FF000000"));
        assert_eq!(style.border.right.style, BorderStyle::None);
    }

    #[test]
    fn worksheet_xml_round_trips_values_and_merge() {
        let strings = StringPool::default();
        let ext = ExtendedDataPool::new();
        let mut store = CellStore::new();
        let mut rowcol = RowColManager::new();
        let mut merges = MergeIndex::new();
        store.set_value(Coordinate::new(1, 1), &CellValue::String("hi".into()), &strings, &ext).unwrap();
        store.set_value(Coordinate::new(1, 2), &CellValue::Int(42), &strings, &ext).unwrap();
        store
            .set_value(
                Coordinate::new(2, 1),
                &CellValue::Formula {
                    formula: "SUM(A1:B1)".into(),
                    cached_value: None,
                },
                &strings,
                &ext,
            )
            .unwrap();
        rowcol.set_row_height(1, 30.0);
        merges.merge(Range::parse_a1("A1:B1").unwrap()).unwrap();

        let xml = worksheet_xml(&WorksheetXmlInput {
            store: &store,
            rowcol: &rowcol,
            merges: &merges,
            strings: &strings,
            ext: &ext,
        });

        let mut new_store = CellStore::new();
        let mut new_rowcol = RowColManager::new();
        let mut new_merges = MergeIndex::new();
        parse_worksheet_xml(&xml, &mut new_store, &mut new_rowcol, &mut new_merges, &strings, &ext, &[]).unwrap();
        assert_eq!(
            new_store.value_at(Coordinate::new(1, 1), &strings, &ext),
            CellValue::String("hi".into())
        );
        assert_eq!(new_store.value_at(Coordinate::new(1, 2), &strings, &ext), CellValue::Int(42));
        assert_eq!(new_rowcol.row_height(1), 30.0);
        assert!(new_merges.is_merged(Coordinate::new(1, 1)));
        match new_store.value_at(Coordinate::new(2, 1), &strings, &ext) {
            CellValue::Formula { formula, .. } => assert_eq!(formula, "SUM(A1:B1)"),
            other => panic!("expected formula, got {other:?}"),
        }
    }

    #[test]
    fn worksheet_xml_accepts_shared_string_cells_on_read() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c></row></sheetData></worksheet>"#;
        let strings = StringPool::default();
        let ext = ExtendedDataPool::new();
        let mut store = CellStore::new();
        let mut rowcol = RowColManager::new();
        let mut merges = MergeIndex::new();
        parse_worksheet_xml(xml, &mut store, &mut rowcol, &mut merges, &strings, &ext, &["shared value".to_string()]).unwrap();
        assert_eq!(
            store.value_at(Coordinate::new(1, 1), &strings, &ext),
            CellValue::String("shared value".into())
        );
    }
}
