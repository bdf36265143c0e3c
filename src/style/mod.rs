//! Style/format catalogue (spec §3.3, §4.8).
//!
//! Field shapes mirror `ooxml::xlsx::styles::{font,fill,border,alignment}`
//! in the teacher; the deduplicating catalogue itself is new (the teacher's
//! `Styles`/`StylesBuilder` accumulate styles without deduplication by
//! structural content — this crate's `StyleCatalogue::get_or_insert`
//! hashes the full tuple, per spec §3.3/§4.8).

use parking_lot::Mutex;
use std::collections::HashMap;

/// Font definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Font {
    pub name: Option<String>,
    /// Size in half-points to keep the struct Hash/Eq without floats.
    pub size_half_points: Option<u32>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub color_argb: Option<String>,
}

/// Fill definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Fill {
    #[default]
    None,
    Solid {
        fg_color_argb: String,
    },
    Pattern {
        pattern_type: String,
        fg_color_argb: Option<String>,
        bg_color_argb: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BorderStyle {
    #[default]
    None,
    Thin,
    Medium,
    Thick,
    Dashed,
    Dotted,
    Double,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BorderSide {
    pub style: BorderStyle,
    pub color_argb: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Border {
    pub left: BorderSide,
    pub right: BorderSide,
    pub top: BorderSide,
    pub bottom: BorderSide,
    pub diagonal: BorderSide,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HorizontalAlign {
    #[default]
    General,
    Left,
    Center,
    Right,
    Fill,
    Justify,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VerticalAlign {
    Top,
    #[default]
    Center,
    Bottom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Alignment {
    pub horizontal: HorizontalAlign,
    pub vertical: VerticalAlign,
    pub wrap_text: bool,
    pub text_rotation: i32,
}

/// A custom number format; built-in formats (e.g. id 0 `"General"`) don't
/// need an entry here, only ids >= 164 with custom format codes do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NumberFormat {
    pub id: u32,
    pub format_code: String,
}

/// A complete, deduplicated cell style: font + fill + border + alignment +
/// number format tuple (spec §3.3, §4.8).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CellStyle {
    pub font: Font,
    pub fill: Fill,
    pub border: Border,
    pub alignment: Alignment,
    pub number_format: Option<NumberFormat>,
}

struct Inner {
    styles: Vec<CellStyle>,
    index: HashMap<CellStyle, u32>,
}

/// Deduplicating style catalogue. Handle 0 is always the default style,
/// present without an explicit insert (spec §4.8).
pub struct StyleCatalogue {
    inner: Mutex<Inner>,
}

impl StyleCatalogue {
    pub fn new() -> Self {
        let default_style = CellStyle::default();
        let mut index = HashMap::new();
        index.insert(default_style.clone(), 0);
        Self {
            inner: Mutex::new(Inner {
                styles: vec![default_style],
                index,
            }),
        }
    }

    /// Look up or insert `style`, returning a dense handle starting at 0.
    pub fn get_or_insert(&self, style: CellStyle) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(&h) = inner.index.get(&style) {
            return h;
        }
        let handle = inner.styles.len() as u32;
        inner.index.insert(style.clone(), handle);
        inner.styles.push(style);
        handle
    }

    pub fn get(&self, handle: u32) -> Option<CellStyle> {
        self.inner.lock().styles.get(handle as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().styles.len()
    }

    pub fn is_empty(&self) -> bool {
        false // handle 0 always present
    }

    pub fn all(&self) -> Vec<CellStyle> {
        self.inner.lock().styles.clone()
    }
}

impl Default for StyleCatalogue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_style_is_handle_zero() {
        let cat = StyleCatalogue::new();
        assert_eq!(cat.get_or_insert(CellStyle::default()), 0);
    }

    #[test]
    fn structural_equality_dedups() {
        let cat = StyleCatalogue::new();
        let s1 = CellStyle {
            font: Font {
                bold: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let s2 = CellStyle {
            font: Font {
                bold: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let h1 = cat.get_or_insert(s1);
        let h2 = cat.get_or_insert(s2);
        assert_eq!(h1, h2);
        assert_ne!(h1, 0);
    }

    #[test]
    fn distinct_styles_get_distinct_handles() {
        let cat = StyleCatalogue::new();
        let bold = cat.get_or_insert(CellStyle {
            font: Font {
                bold: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let italic = cat.get_or_insert(CellStyle {
            font: Font {
                italic: true,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_ne!(bold, italic);
    }
}
