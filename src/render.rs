//! Page layout and PDF serialisation.
//!
//! Blocks are laid out top to bottom in order. Table header rows repeat on
//! continuation pages, a table title never ends a page on its own, and every
//! page carries a footer with the generation timestamp and page number.

use chrono::{Datelike, NaiveDateTime, Timelike};
use pdf_writer::types::{CidFontType, FontFlags, SystemInfo, UnicodeCmap};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_writer::{Content, Date, Filter, Finish, Name, Pdf, Rect, Ref, Str, TextStr};
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

use crate::compose::{
    BandedHeader, Block, Cell, ParagraphPair, SignatureGrid, TitledTable,
};
use crate::style::{accent, EmbeddedFont, FontFace, FontRole, Rgb, StyleBinding, Verdict};

/// A4 in points.
pub const A4_WIDTH: f32 = 595.28;
pub const A4_HEIGHT: f32 = 841.89;
/// 20 mm.
pub const DEFAULT_MARGIN: f32 = 56.69;

const BODY_SIZE: f32 = 8.0;
const HEADER_SIZE: f32 = 7.5;
const TITLE_SIZE: f32 = 10.0;
const FOOTER_SIZE: f32 = 7.0;
const LEADING: f32 = 1.25;
const CELL_PADDING: f32 = 3.0;
const SECTION_GAP: f32 = 8.0;
const FOOTER_HEIGHT: f32 = 16.0;
const SIGNATURE_SPACE: f32 = 28.0;
const PRODUCER: &str = "weld-docs-server";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("Block {position} could not be laid out: {reason}")]
    BlockFailure { position: usize, reason: String },

    #[error("Document has no blocks")]
    EmptyDocument,
}

#[derive(Debug, Clone)]
pub struct PageConfig {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    /// Shown in the footer and stored as the creation date. `None` leaves
    /// both out, which makes output byte-for-byte reproducible.
    pub generated_at: Option<NaiveDateTime>,
    pub title: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            width: A4_WIDTH,
            height: A4_HEIGHT,
            margin: DEFAULT_MARGIN,
            generated_at: None,
            title: String::new(),
        }
    }
}

impl PageConfig {
    fn content_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    fn usable_height(&self) -> f32 {
        self.height - 2.0 * self.margin - FOOTER_HEIGHT
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Center,
}

#[derive(Debug, Clone)]
enum RowItem {
    Fill { dx: f32, width: f32, color: Rgb },
    Border { dx: f32, width: f32 },
    Text {
        dx: f32,
        /// Baseline distance from the row top.
        dy: f32,
        size: f32,
        role: FontRole,
        color: Rgb,
        text: String,
    },
}

#[derive(Debug, Clone, Default)]
struct Row {
    height: f32,
    items: Vec<RowItem>,
    keep_with_next: bool,
}

impl Row {
    fn spacer(height: f32) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    fn keep(mut self) -> Self {
        self.keep_with_next = true;
        self
    }
}

#[derive(Debug, Default)]
struct Section {
    rows: Vec<Row>,
    /// Placed again at the top of every continuation page.
    repeat: Vec<Row>,
}

/// One cell to be placed in a grid row.
struct GridCell<'a> {
    text: &'a str,
    span: usize,
    role: FontRole,
    size: f32,
    color: Rgb,
    fill: Option<Rgb>,
    align: Align,
}

impl<'a> GridCell<'a> {
    fn body(text: &'a str) -> Self {
        Self {
            text,
            span: 1,
            role: FontRole::Body,
            size: BODY_SIZE,
            color: Rgb::BLACK,
            fill: None,
            align: Align::Left,
        }
    }

    fn banner(text: &'a str, fill: Rgb, span: usize) -> Self {
        Self {
            text,
            span,
            role: FontRole::Bold,
            size: TITLE_SIZE,
            color: Rgb::WHITE,
            fill: Some(fill),
            align: Align::Center,
        }
    }

    fn heading(text: &'a str, fill: Rgb) -> Self {
        Self {
            text,
            span: 1,
            role: FontRole::Bold,
            size: HEADER_SIZE,
            color: Rgb::BLACK,
            fill: Some(fill),
            align: Align::Center,
        }
    }
}

/// Absolute coordinates, origin bottom-left.
#[derive(Debug, Clone, PartialEq)]
enum DrawOp {
    Fill { x: f32, y: f32, width: f32, height: f32, color: Rgb },
    Border { x: f32, y: f32, width: f32, height: f32 },
    Text { x: f32, y: f32, size: f32, role: FontRole, color: Rgb, text: String },
}

/// Lays out and serialises `blocks` into a PDF document.
pub fn render(
    blocks: &[Block],
    styles: &StyleBinding,
    page: &PageConfig,
) -> Result<Vec<u8>, RenderError> {
    if blocks.is_empty() {
        return Err(RenderError::EmptyDocument);
    }

    let sections = blocks
        .iter()
        .enumerate()
        .map(|(position, block)| layout_block(position, block, styles, page))
        .collect::<Result<Vec<_>, _>>()?;

    let mut pages = paginate(&sections, page);
    add_footers(&mut pages, styles, page);
    log::debug!(
        "Laid out {} blocks on {} page(s) using {}",
        blocks.len(),
        pages.len(),
        styles.family
    );
    Ok(write_pdf(&pages, styles, page))
}

fn layout_block(
    position: usize,
    block: &Block,
    styles: &StyleBinding,
    page: &PageConfig,
) -> Result<Section, RenderError> {
    let failure = |reason: String| RenderError::BlockFailure { position, reason };

    let section = match block {
        Block::BandedHeader(header) => layout_header(header, styles, page).map_err(failure)?,
        Block::TitledTable(table) => layout_table(table, styles, page).map_err(failure)?,
        Block::ParagraphPair(pair) => layout_paragraphs(pair, styles, page),
        Block::SignatureGrid(grid) => layout_signatures(grid, styles, page).map_err(failure)?,
    };

    let usable = page.usable_height();
    for row in section.rows.iter().chain(section.repeat.iter()) {
        if row.height > usable {
            return Err(failure(format!(
                "row of {:.1}pt does not fit a page of {:.1}pt",
                row.height, usable
            )));
        }
    }
    Ok(section)
}

/// Splits the content width by relative weights.
fn column_widths(weights: &[f32], total: f32) -> Vec<f32> {
    let sum: f32 = weights.iter().sum();
    if sum <= 0.0 {
        return vec![total / weights.len().max(1) as f32; weights.len()];
    }
    weights.iter().map(|w| total * w / sum).collect()
}

fn check_spans(row: usize, spans: usize, columns: usize) -> Result<(), String> {
    if spans != columns {
        return Err(format!("row {row} covers {spans} of {columns} columns"));
    }
    Ok(())
}

fn layout_header(
    header: &BandedHeader,
    styles: &StyleBinding,
    page: &PageConfig,
) -> Result<Section, String> {
    if header.widths.is_empty() {
        return Err("header has no columns".to_string());
    }
    let widths = column_widths(&header.widths, page.content_width());
    let colors = accent(header.document_type);

    let mut rows = Vec::with_capacity(header.rows.len());
    for (index, cells) in header.rows.iter().enumerate() {
        check_spans(index, cells.len(), widths.len())?;
        let grid: Vec<GridCell> = cells
            .iter()
            .enumerate()
            .map(|(col, text)| {
                if index == 0 {
                    GridCell::banner(text, colors.band, 1)
                } else if col == 0 {
                    GridCell {
                        fill: Some(Rgb::LIGHT_GREY),
                        ..GridCell::body(text)
                    }
                } else {
                    GridCell::body(text)
                }
            })
            .collect();
        rows.push(grid_row(styles, &widths, &grid, 0.0).keep());
    }
    if let Some(last) = rows.last_mut() {
        last.keep_with_next = false;
    }

    Ok(Section {
        rows,
        repeat: Vec::new(),
    })
}

fn layout_table(
    table: &TitledTable,
    styles: &StyleBinding,
    page: &PageConfig,
) -> Result<Section, String> {
    if table.columns.is_empty() {
        return Err(format!("table '{}' has no columns", table.title));
    }
    let weights: Vec<f32> = table.columns.iter().map(|c| c.width).collect();
    let widths = column_widths(&weights, page.content_width());
    let colors = accent(table.document_type);

    let title_row = |title: &str| {
        grid_row(
            styles,
            &widths,
            &[GridCell::banner(title, colors.band, widths.len())],
            0.0,
        )
        .keep()
    };
    let header_cells: Vec<GridCell> = table
        .columns
        .iter()
        .map(|c| GridCell::heading(&c.header, colors.header_fill))
        .collect();
    let header_row = grid_row(styles, &widths, &header_cells, 0.0).keep();

    let mut rows = vec![title_row(&table.title), header_row.clone()];
    for (index, cells) in table.rows.iter().enumerate() {
        let spans: usize = cells.iter().map(|c| c.span).sum();
        if cells.iter().any(|c| c.span == 0) {
            return Err(format!("row {index} has a zero-width cell"));
        }
        check_spans(index, spans, widths.len())?;
        let grid: Vec<GridCell> = cells.iter().map(|c| table_cell(c, styles)).collect();
        rows.push(grid_row(styles, &widths, &grid, 0.0));
    }

    let continued = format!("{} (continued)", table.title);
    Ok(Section {
        rows,
        repeat: vec![title_row(&continued), header_row],
    })
}

fn table_cell<'a>(cell: &'a Cell, styles: &StyleBinding) -> GridCell<'a> {
    let base = GridCell {
        span: cell.span,
        ..GridCell::body(&cell.text)
    };
    match &cell.verdict {
        // A spanning verdict is a record-level result and gets a coloured band.
        Some(raw) if cell.span > 1 => GridCell {
            role: FontRole::Bold,
            size: TITLE_SIZE,
            color: Rgb::WHITE,
            fill: Some(styles.verdict_color(raw)),
            align: Align::Center,
            ..base
        },
        Some(raw) => GridCell {
            role: FontRole::Bold,
            color: styles.palette.color(Verdict::parse(raw)),
            align: Align::Center,
            ..base
        },
        None if cell.emphasis => GridCell {
            role: FontRole::Bold,
            ..base
        },
        None => base,
    }
}

fn layout_paragraphs(pair: &ParagraphPair, styles: &StyleBinding, page: &PageConfig) -> Section {
    let width = page.content_width();
    let colors = accent(pair.document_type);
    let body_font = styles.font(FontRole::Body);
    let line_height = BODY_SIZE * LEADING;

    let mut rows = Vec::new();
    for (index, paragraph) in [&pair.first, &pair.second].into_iter().enumerate() {
        if index > 0 {
            rows.push(Row::spacer(SECTION_GAP));
        }
        let heading = GridCell {
            align: Align::Left,
            size: TITLE_SIZE - 1.0,
            ..GridCell::heading(&paragraph.heading, colors.header_fill)
        };
        rows.push(grid_row(styles, &[width], &[heading], 0.0).keep());

        let lines = wrap_text(body_font, &paragraph.body, BODY_SIZE, width - 2.0 * CELL_PADDING);
        for line in lines {
            rows.push(Row {
                height: line_height,
                items: vec![RowItem::Text {
                    dx: CELL_PADDING,
                    dy: BODY_SIZE,
                    size: BODY_SIZE,
                    role: FontRole::Body,
                    color: Rgb::BLACK,
                    text: line,
                }],
                keep_with_next: false,
            });
        }
    }

    Section {
        rows,
        repeat: Vec::new(),
    }
}

fn layout_signatures(
    grid: &SignatureGrid,
    styles: &StyleBinding,
    page: &PageConfig,
) -> Result<Section, String> {
    let width = page.content_width();
    let mut rows = Vec::new();

    if !grid.entries.is_empty() {
        let widths = vec![width / grid.entries.len() as f32; grid.entries.len()];
        let roles: Vec<GridCell> = grid
            .entries
            .iter()
            .map(|e| GridCell::heading(&e.role, Rgb::LIGHT_GREY))
            .collect();
        let names: Vec<GridCell> = grid.entries.iter().map(|e| GridCell::body(&e.name)).collect();
        let dates: Vec<String> = grid.entries.iter().map(|e| format!("Date: {}", e.date)).collect();
        let date_cells: Vec<GridCell> = dates.iter().map(|d| GridCell::body(d)).collect();
        let signature_cells: Vec<GridCell> = grid
            .entries
            .iter()
            .map(|_| GridCell {
                color: Rgb::GREY,
                ..GridCell::body("Signature:")
            })
            .collect();

        rows.push(grid_row(styles, &widths, &roles, 0.0).keep());
        rows.push(grid_row(styles, &widths, &names, 0.0).keep());
        rows.push(grid_row(styles, &widths, &date_cells, 0.0).keep());
        rows.push(grid_row(styles, &widths, &signature_cells, SIGNATURE_SPACE).keep());
    }

    if let Some(status) = &grid.status {
        let text = format!("STATUS: {status}");
        let cell = GridCell {
            role: FontRole::Bold,
            align: Align::Center,
            fill: Some(Rgb::LIGHT_GREY),
            ..GridCell::body(&text)
        };
        rows.push(grid_row(styles, &[width], &[cell], 0.0));
    }

    match rows.last_mut() {
        Some(last) => last.keep_with_next = false,
        None => return Err("signature grid has no entries".to_string()),
    }

    Ok(Section {
        rows,
        repeat: Vec::new(),
    })
}

/// Builds one bordered row. Spans must already be validated.
fn grid_row(styles: &StyleBinding, widths: &[f32], cells: &[GridCell], min_height: f32) -> Row {
    let mut placed = Vec::with_capacity(cells.len());
    let mut column = 0;
    let mut dx = 0.0;
    let mut height = min_height;

    for cell in cells {
        let end = (column + cell.span).min(widths.len());
        let width: f32 = widths[column..end].iter().sum();
        let font = styles.font(cell.role);
        let lines = wrap_text(font, cell.text, cell.size, width - 2.0 * CELL_PADDING);
        let cell_height = lines.len() as f32 * cell.size * LEADING + 2.0 * CELL_PADDING;
        height = f32::max(height, cell_height);
        placed.push((dx, width, lines, cell));
        dx += width;
        column = end;
    }

    let mut items = Vec::new();
    for (dx, width, lines, cell) in placed {
        if let Some(color) = cell.fill {
            items.push(RowItem::Fill { dx, width, color });
        }
        items.push(RowItem::Border { dx, width });
        let font = styles.font(cell.role);
        for (index, line) in lines.into_iter().enumerate() {
            let text_width = font.text_width(&line, cell.size);
            let offset = match cell.align {
                Align::Left => CELL_PADDING,
                Align::Center => ((width - text_width) / 2.0).max(CELL_PADDING),
            };
            items.push(RowItem::Text {
                dx: dx + offset,
                dy: CELL_PADDING + cell.size + index as f32 * cell.size * LEADING,
                size: cell.size,
                role: cell.role,
                color: cell.color,
                text: line,
            });
        }
    }

    Row {
        height,
        items,
        keep_with_next: false,
    }
}

/// Greedy word wrap. Words wider than `max_width` are broken by character.
fn wrap_text(font: &FontFace, text: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if font.text_width(&candidate, size) <= max_width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            for ch in word.chars() {
                line.push(ch);
                if line.chars().count() > 1 && font.text_width(&line, size) > max_width {
                    line.pop();
                    lines.push(std::mem::take(&mut line));
                    line.push(ch);
                }
            }
        }
        lines.push(line);
    }
    lines
}

fn paginate(sections: &[Section], page: &PageConfig) -> Vec<Vec<DrawOp>> {
    let top = page.height - page.margin;
    let bottom = page.margin + FOOTER_HEIGHT;
    let usable = page.usable_height();

    let mut pages: Vec<Vec<DrawOp>> = vec![Vec::new()];
    let mut y = top;

    for section in sections {
        if y < top {
            y -= SECTION_GAP;
        }

        let mut index = 0;
        while index < section.rows.len() {
            let mut last = index;
            while last + 1 < section.rows.len() && section.rows[last].keep_with_next {
                last += 1;
            }
            let group: f32 = section.rows[index..=last].iter().map(|r| r.height).sum();

            if group <= usable && y - group < bottom && y < top {
                y = new_page(&mut pages, top);
                if index > 0 {
                    y = place_rows(&mut pages, &section.repeat, y, page.margin);
                }
            }

            for row in &section.rows[index..=last] {
                if y - row.height < bottom && y < top {
                    y = new_page(&mut pages, top);
                    y = place_rows(&mut pages, &section.repeat, y, page.margin);
                }
                y = place_rows(&mut pages, std::slice::from_ref(row), y, page.margin);
            }
            index = last + 1;
        }
    }

    pages
}

fn new_page(pages: &mut Vec<Vec<DrawOp>>, top: f32) -> f32 {
    pages.push(Vec::new());
    top
}

fn place_rows(pages: &mut [Vec<DrawOp>], rows: &[Row], mut y: f32, left: f32) -> f32 {
    let Some(ops) = pages.last_mut() else {
        return y;
    };
    for row in rows {
        let bottom = y - row.height;
        for item in &row.items {
            ops.push(match item {
                RowItem::Fill { dx, width, color } => DrawOp::Fill {
                    x: left + dx,
                    y: bottom,
                    width: *width,
                    height: row.height,
                    color: *color,
                },
                RowItem::Border { dx, width } => DrawOp::Border {
                    x: left + dx,
                    y: bottom,
                    width: *width,
                    height: row.height,
                },
                RowItem::Text { dx, dy, size, role, color, text } => DrawOp::Text {
                    x: left + dx,
                    y: y - dy,
                    size: *size,
                    role: *role,
                    color: *color,
                    text: text.clone(),
                },
            });
        }
        y = bottom;
    }
    y
}

fn add_footers(pages: &mut [Vec<DrawOp>], styles: &StyleBinding, page: &PageConfig) {
    let total = pages.len();
    let y = page.margin;
    let right_edge = page.width - page.margin;
    let font = styles.font(FontRole::Body);

    for (index, ops) in pages.iter_mut().enumerate() {
        if let Some(at) = page.generated_at {
            ops.push(DrawOp::Text {
                x: page.margin,
                y,
                size: FOOTER_SIZE,
                role: FontRole::Body,
                color: Rgb::GREY,
                text: format!("Generated {}", at.format("%d.%m.%Y %H:%M")),
            });
        }
        let number = format!("Page {} of {}", index + 1, total);
        let width = font.text_width(&number, FOOTER_SIZE);
        ops.push(DrawOp::Text {
            x: right_edge - width,
            y,
            size: FOOTER_SIZE,
            role: FontRole::Body,
            color: Rgb::GREY,
            text: number,
        });
    }
}

/// Glyphs drawn with an embedded font, keyed by glyph id.
type GlyphUsage = BTreeMap<u16, (char, f32)>;

struct FontSlot<'a> {
    resource: &'static [u8],
    face: &'a FontFace,
    used: GlyphUsage,
}

impl FontSlot<'_> {
    fn encode(&mut self, text: &str) -> Vec<u8> {
        match self.face {
            FontFace::Builtin(_) => winansi(text),
            FontFace::Embedded(font) => {
                let mut bytes = Vec::with_capacity(text.len() * 2);
                for (ch, gid, advance) in font.glyphs(text) {
                    self.used.entry(gid).or_insert((ch, advance));
                    bytes.extend_from_slice(&gid.to_be_bytes());
                }
                bytes
            }
        }
    }
}

/// Unicode to WinAnsi; anything outside the code page becomes `?`.
fn winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            ' '..='~' => ch as u8,
            '\u{a0}'..='\u{ff}' => ch as u32 as u8,
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            _ => b'?',
        })
        .collect()
}

struct Refs(i32);

impl Refs {
    fn next(&mut self) -> Ref {
        self.0 += 1;
        Ref::new(self.0)
    }
}

fn write_pdf(pages: &[Vec<DrawOp>], styles: &StyleBinding, config: &PageConfig) -> Vec<u8> {
    let mut refs = Refs(0);
    let catalog_id = refs.next();
    let page_tree_id = refs.next();
    let info_id = refs.next();
    let body_font_id = refs.next();
    let bold_font_id = refs.next();

    let mut slots = [
        FontSlot {
            resource: b"F1",
            face: styles.font(FontRole::Body),
            used: GlyphUsage::new(),
        },
        FontSlot {
            resource: b"F2",
            face: styles.font(FontRole::Bold),
            used: GlyphUsage::new(),
        },
    ];

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(page_tree_id);

    let mut page_ids = Vec::with_capacity(pages.len());
    for ops in pages {
        let page_id = refs.next();
        let content_id = refs.next();
        page_ids.push(page_id);

        let content = page_content(ops, &mut slots);
        pdf.stream(content_id, &content);

        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, config.width, config.height));
        page.parent(page_tree_id);
        page.contents(content_id);
        page.resources()
            .fonts()
            .pair(Name(b"F1"), body_font_id)
            .pair(Name(b"F2"), bold_font_id);
        page.finish();
    }

    pdf.pages(page_tree_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);

    for (slot, font_id) in slots.iter().zip([body_font_id, bold_font_id]) {
        match slot.face {
            FontFace::Builtin(name) => {
                pdf.type1_font(font_id)
                    .base_font(Name(name.as_bytes()))
                    .encoding_predefined(Name(b"WinAnsiEncoding"));
            }
            FontFace::Embedded(font) => {
                write_embedded_font(&mut pdf, &mut refs, font_id, font, &slot.used);
            }
        }
    }

    let mut info = pdf.document_info(info_id);
    info.producer(TextStr(PRODUCER));
    if !config.title.is_empty() {
        info.title(TextStr(&config.title));
    }
    if let Some(at) = config.generated_at {
        info.creation_date(pdf_date(at));
    }
    info.finish();

    pdf.finish()
}

fn page_content(ops: &[DrawOp], slots: &mut [FontSlot<'_>; 2]) -> Vec<u8> {
    let mut content = Content::new();
    content.set_line_width(0.5);
    content.set_stroke_rgb(0.0, 0.0, 0.0);

    for op in ops {
        match op {
            DrawOp::Fill { x, y, width, height, color } => {
                content.set_fill_rgb(color.r, color.g, color.b);
                content.rect(*x, *y, *width, *height);
                content.fill_nonzero();
            }
            DrawOp::Border { x, y, width, height } => {
                content.rect(*x, *y, *width, *height);
                content.stroke();
            }
            DrawOp::Text { x, y, size, role, color, text } => {
                let slot = match role {
                    FontRole::Body => &mut slots[0],
                    FontRole::Bold => &mut slots[1],
                };
                let encoded = slot.encode(text);
                content.set_fill_rgb(color.r, color.g, color.b);
                content.begin_text();
                content.set_font(Name(slot.resource), *size);
                content.next_line(*x, *y);
                content.show(Str(&encoded));
                content.end_text();
            }
        }
    }

    content.finish().to_vec()
}

fn write_embedded_font(
    pdf: &mut Pdf,
    refs: &mut Refs,
    font_id: Ref,
    font: &EmbeddedFont,
    used: &GlyphUsage,
) {
    let cid_id = refs.next();
    let descriptor_id = refs.next();
    let file_id = refs.next();
    let cmap_id = refs.next();
    let base_font = Name(font.name.as_bytes());

    pdf.type0_font(font_id)
        .base_font(base_font)
        .encoding_predefined(Name(b"Identity-H"))
        .descendant_font(cid_id)
        .to_unicode(cmap_id);

    let mut cid = pdf.cid_font(cid_id);
    cid.subtype(CidFontType::Type2);
    cid.base_font(base_font);
    cid.system_info(identity_system_info());
    cid.font_descriptor(descriptor_id);
    cid.default_width(0.0);
    cid.cid_to_gid_map_predefined(Name(b"Identity"));
    {
        let mut widths = cid.widths();
        for (gid, (_, advance)) in used {
            widths.consecutive(*gid, [*advance]);
        }
    }
    cid.finish();

    let [x_min, y_min, x_max, y_max] = font.bbox.map(|v| font.to_glyph_space(f32::from(v)));
    pdf.font_descriptor(descriptor_id)
        .name(base_font)
        .flags(FontFlags::NON_SYMBOLIC)
        .bbox(Rect::new(x_min, y_min, x_max, y_max))
        .italic_angle(0.0)
        .ascent(font.to_glyph_space(f32::from(font.ascender)))
        .descent(font.to_glyph_space(f32::from(font.descender)))
        .cap_height(font.to_glyph_space(f32::from(font.cap_height)))
        .stem_v(80.0)
        .font_file2(file_id);

    let length = font.data().len() as i32;
    match deflate(font.data()) {
        Ok(packed) => {
            pdf.stream(file_id, &packed)
                .filter(Filter::FlateDecode)
                .pair(Name(b"Length1"), length);
        }
        Err(err) => {
            log::warn!("Embedding {} uncompressed: {}", font.name, err);
            pdf.stream(file_id, font.data()).pair(Name(b"Length1"), length);
        }
    }

    let mut cmap = UnicodeCmap::new(Name(b"Custom"), identity_system_info());
    for (gid, (ch, _)) in used {
        cmap.pair(*gid, *ch);
    }
    pdf.cmap(cmap_id, &cmap.finish());
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn identity_system_info() -> SystemInfo<'static> {
    SystemInfo {
        registry: Str(b"Adobe"),
        ordering: Str(b"Identity"),
        supplement: 0,
    }
}

fn pdf_date(at: NaiveDateTime) -> Date {
    Date::new(at.year().clamp(0, 9999) as u16)
        .month(at.month() as u8)
        .day(at.day() as u8)
        .hour(at.hour() as u8)
        .minute(at.minute() as u8)
        .second(at.second() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{compose, Column};
    use crate::normalize::{normalize, DocumentType};
    use crate::record::RawRecord;

    fn page_count(pdf: &[u8]) -> usize {
        let text = String::from_utf8_lossy(pdf);
        text.matches("/Type /Page").count() - text.matches("/Type /Pages").count()
    }

    fn long_table(rows: usize) -> Block {
        Block::TitledTable(TitledTable {
            document_type: DocumentType::QualificationRecord,
            title: "TEST RESULTS".to_string(),
            columns: vec![
                Column { header: "Test".into(), width: 1.0 },
                Column { header: "Result".into(), width: 1.0 },
            ],
            rows: (0..rows)
                .map(|i| vec![Cell::text(format!("Row {i}")), Cell::text("PASS")])
                .collect(),
        })
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let err = render(&[], &StyleBinding::builtin(), &PageConfig::default()).unwrap_err();
        assert_eq!(err, RenderError::EmptyDocument);
    }

    #[test]
    fn test_span_mismatch_reports_block_position() {
        let mut table = long_table(1);
        if let Block::TitledTable(t) = &mut table {
            t.rows.push(vec![Cell::text("only one")]);
        }
        let blocks = vec![long_table(1), table];
        let err = render(&blocks, &StyleBinding::builtin(), &PageConfig::default()).unwrap_err();
        assert!(matches!(err, RenderError::BlockFailure { position: 1, .. }));
    }

    #[test]
    fn test_output_is_a_pdf() {
        let fields = normalize(&RawRecord::new(), DocumentType::Specification);
        let blocks = compose(&fields, DocumentType::Specification);
        let pdf = render(&blocks, &StyleBinding::builtin(), &PageConfig::default()).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert!(String::from_utf8_lossy(&pdf).trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn test_long_table_spans_pages() {
        let styles = StyleBinding::builtin();
        let short = render(&[long_table(3)], &styles, &PageConfig::default()).unwrap();
        let long = render(&[long_table(200)], &styles, &PageConfig::default()).unwrap();
        assert_eq!(page_count(&short), 1);
        assert!(page_count(&long) > 1);
        let text = String::from_utf8_lossy(&long);
        assert!(text.contains("continued"));
    }

    fn page_texts(ops: &[DrawOp]) -> Vec<&str> {
        ops.iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_table_title_and_header_move_with_first_row() {
        let page = PageConfig::default();
        let styles = StyleBinding::builtin();
        let table = layout_block(1, &long_table(3), &styles, &page).unwrap();
        let lead = table.rows[0].height + table.rows[1].height;
        let first = table.rows[2].height;

        // Leave room for the title and header but not for the first data row.
        let filler = Section {
            rows: vec![Row::spacer(page.usable_height() - SECTION_GAP - lead - first / 2.0)],
            repeat: Vec::new(),
        };
        let pages = paginate(&[filler, table], &page);

        assert_eq!(pages.len(), 2);
        let before = page_texts(&pages[0]);
        for text in ["TEST RESULTS", "Test", "Result", "Row 0"] {
            assert!(!before.contains(&text), "{text} left behind");
        }
        let after = page_texts(&pages[1]);
        for text in ["TEST RESULTS", "Test", "Result", "Row 0", "Row 2"] {
            assert!(after.contains(&text), "{text} missing");
        }
        assert!(!after.contains(&"TEST RESULTS (continued)"));
    }

    #[test]
    fn test_font_program_is_deflated() {
        use std::io::Read;

        let data = b"glyf glyf glyf glyf glyf glyf glyf glyf".repeat(64);
        let packed = deflate(&data).unwrap();
        assert!(packed.len() < data.len());

        let mut unpacked = Vec::new();
        flate2::read::ZlibDecoder::new(packed.as_slice())
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn test_wrap_breaks_long_words() {
        let font = FontFace::Builtin("Helvetica");
        let lines = wrap_text(&font, "A-very-long-unbroken-identifier-string", 8.0, 40.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(font.text_width(line, 8.0) <= 40.0 || line.chars().count() == 1);
        }
        assert_eq!(lines.concat(), "A-very-long-unbroken-identifier-string");
    }

    #[test]
    fn test_wrap_keeps_explicit_breaks() {
        let font = FontFace::Builtin("Helvetica");
        let lines = wrap_text(&font, "first\n\nsecond", 8.0, 400.0);
        assert_eq!(lines, vec!["first", "", "second"]);
    }

    #[test]
    fn test_winansi_replaces_unmapped() {
        assert_eq!(winansi("A°Ж"), vec![b'A', 0xB0, b'?']);
    }
}
