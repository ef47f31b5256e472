//! Spreadsheet renderer: normalised tables → styled `.xlsx` workbook.
//!
//! One worksheet per table, named `Data` when there is exactly one table and
//! `Table_1`, `Table_2`, … otherwise. Zero tables still produce a workbook:
//! a single `Data` sheet holding an explanatory row.
//!
//! ## Formatting
//!
//! | Cell | Style index | Look |
//! |------|-------------|------|
//! | header | 1 | bold, grey fill, centred, medium border |
//! | text | 2 | thin border, left |
//! | number | 3 | thin border, right |
//!
//! Empty cells are not written, so they carry no border. The header row is
//! frozen and every column is sized to its longest value.

use crate::pipeline::ooxml::{
    escape_text, PackageWriter, CONTENT_TYPES_PART, CORE_PROPS_PART, XML_DECL,
};
use crate::table::{Cell, NormalizedTable};
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Text of the placeholder row written when no table survived.
pub const PLACEHOLDER_TEXT: &str = "No tabular data found in this PDF";

/// Longest sheet name Excel accepts.
pub const MAX_SHEET_NAME: usize = 31;

const MIN_COLUMN_WIDTH: usize = 8;
const MAX_COLUMN_WIDTH: usize = 50;

const STYLE_HEADER: u32 = 1;
const STYLE_TEXT: u32 = 2;
const STYLE_NUMBER: u32 = 3;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Write `tables` as a workbook at `dest`. Returns the number of sheets.
pub fn render(tables: &[NormalizedTable], dest: &Path) -> io::Result<usize> {
    let sheets: Vec<Sheet<'_>> = if tables.is_empty() {
        vec![Sheet::placeholder()]
    } else {
        tables
            .iter()
            .enumerate()
            .map(|(i, t)| Sheet::table(sheet_name(i, tables.len()), t))
            .collect()
    };

    let mut pkg = PackageWriter::create(dest)?;
    pkg.add_part(CONTENT_TYPES_PART, &content_types(sheets.len()))?;
    pkg.add_package_parts("xl/workbook.xml", "Converted tables")?;
    pkg.add_part("xl/workbook.xml", &workbook_xml(&sheets))?;
    pkg.add_part("xl/_rels/workbook.xml.rels", &workbook_rels(sheets.len()))?;
    pkg.add_part("xl/styles.xml", STYLES_XML)?;
    for (i, sheet) in sheets.iter().enumerate() {
        debug!(sheet = %sheet.name, rows = sheet.row_count(), "Writing worksheet");
        pkg.add_part(&format!("xl/worksheets/sheet{}.xml", i + 1), &sheet.to_xml())?;
    }
    pkg.finish()?;

    info!("Wrote {} sheet(s) to {}", sheets.len(), dest.display());
    Ok(sheets.len())
}

/// Sheet name for table `index` out of `count`.
pub fn sheet_name(index: usize, count: usize) -> String {
    if count == 1 {
        "Data".into()
    } else {
        sanitize_sheet_name(&format!("Table_{}", index + 1))
    }
}

/// Substitute characters Excel forbids and truncate to [`MAX_SHEET_NAME`].
pub fn sanitize_sheet_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '*' | '[' | ']' | ':' => '_',
            c => c,
        })
        .take(MAX_SHEET_NAME)
        .collect()
}

/// Spreadsheet column letters for a 0-based index (`0` → `A`, `26` → `AA`).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

// ── Sheet model ──────────────────────────────────────────────────────────

struct Sheet<'a> {
    name: String,
    header: Option<&'a [String]>,
    rows: SheetRows<'a>,
}

enum SheetRows<'a> {
    Table(&'a [Vec<Cell>]),
    Placeholder,
}

impl<'a> Sheet<'a> {
    fn table(name: String, table: &'a NormalizedTable) -> Self {
        Self {
            name,
            header: Some(table.columns()),
            rows: SheetRows::Table(table.rows()),
        }
    }

    fn placeholder() -> Self {
        Self {
            name: "Data".into(),
            header: None,
            rows: SheetRows::Placeholder,
        }
    }

    fn row_count(&self) -> usize {
        match self.rows {
            SheetRows::Table(rows) => rows.len() + 1,
            SheetRows::Placeholder => 1,
        }
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = match self.header {
            Some(h) => h.iter().map(|s| s.chars().count()).collect(),
            None => vec![PLACEHOLDER_TEXT.chars().count()],
        };
        if let SheetRows::Table(rows) = self.rows {
            for row in rows {
                for (c, cell) in row.iter().enumerate() {
                    widths[c] = widths[c].max(cell.display().chars().count());
                }
            }
        }
        widths
            .into_iter()
            .map(|w| (w + 2).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH))
            .collect()
    }

    fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"{XML_DECL}
<worksheet xmlns="{NS_MAIN}" xmlns:r="{NS_REL}">"#
        );
        if self.header.is_some() {
            xml.push_str(
                r#"<sheetViews><sheetView workbookViewId="0"><pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/><selection pane="bottomLeft"/></sheetView></sheetViews>"#,
            );
        }
        xml.push_str("<cols>");
        for (i, w) in self.column_widths().iter().enumerate() {
            xml.push_str(&format!(
                r#"<col min="{n}" max="{n}" width="{w}" customWidth="1"/>"#,
                n = i + 1
            ));
        }
        xml.push_str("</cols><sheetData>");

        match (self.header, &self.rows) {
            (Some(header), SheetRows::Table(rows)) => {
                xml.push_str(r#"<row r="1">"#);
                for (c, label) in header.iter().enumerate() {
                    push_text_cell(&mut xml, c, 1, label, STYLE_HEADER);
                }
                xml.push_str("</row>");
                for (r, row) in rows.iter().enumerate() {
                    let r = r + 2;
                    xml.push_str(&format!(r#"<row r="{r}">"#));
                    for (c, cell) in row.iter().enumerate() {
                        push_cell(&mut xml, c, r, cell);
                    }
                    xml.push_str("</row>");
                }
            }
            _ => {
                xml.push_str(r#"<row r="1">"#);
                push_text_cell(&mut xml, 0, 1, PLACEHOLDER_TEXT, STYLE_TEXT);
                xml.push_str("</row>");
            }
        }

        xml.push_str("</sheetData></worksheet>");
        xml
    }
}

fn push_cell(xml: &mut String, col: usize, row: usize, cell: &Cell) {
    match cell {
        c if c.is_null() => {}
        Cell::Number(n) => xml.push_str(&format!(
            r#"<c r="{}{row}" s="{STYLE_NUMBER}"><v>{n}</v></c>"#,
            column_letter(col)
        )),
        Cell::Text(s) => {
            let style = if cell.is_numeric() { STYLE_NUMBER } else { STYLE_TEXT };
            push_text_cell(xml, col, row, s, style);
        }
        Cell::Empty => {}
    }
}

fn push_text_cell(xml: &mut String, col: usize, row: usize, text: &str, style: u32) {
    xml.push_str(&format!(
        r#"<c r="{}{row}" s="{style}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
        column_letter(col),
        escape_text(text)
    ));
}

// ── Workbook parts ───────────────────────────────────────────────────────

fn content_types(sheets: usize) -> String {
    let mut xml = format!(
        r#"{XML_DECL}
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/{CORE_PROPS_PART}" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#
    );
    for i in 1..=sheets {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{i}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn workbook_xml(sheets: &[Sheet<'_>]) -> String {
    let mut xml = format!(
        r#"{XML_DECL}
<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_REL}"><sheets>"#
    );
    for (i, sheet) in sheets.iter().enumerate() {
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{id}" r:id="rId{id}"/>"#,
            escape_text(&sheet.name),
            id = i + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels(sheets: usize) -> String {
    let mut xml = format!(
        r#"{XML_DECL}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#
    );
    for i in 1..=sheets {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{i}" Type="{NS_REL}/worksheet" Target="worksheets/sheet{i}.xml"/>"#
        ));
    }
    xml.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="{NS_REL}/styles" Target="styles.xml"/></Relationships>"#,
        sheets + 1
    ));
    xml
}

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font><font><b/><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts><fills count="3"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill><fill><patternFill patternType="solid"><fgColor rgb="FFD9D9D9"/><bgColor indexed="64"/></patternFill></fill></fills><borders count="3"><border><left/><right/><top/><bottom/><diagonal/></border><border><left style="thin"><color auto="1"/></left><right style="thin"><color auto="1"/></right><top style="thin"><color auto="1"/></top><bottom style="thin"><color auto="1"/></bottom><diagonal/></border><border><left style="medium"><color auto="1"/></left><right style="medium"><color auto="1"/></right><top style="medium"><color auto="1"/></top><bottom style="medium"><color auto="1"/></bottom><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="4"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="2" borderId="2" xfId="0" applyFont="1" applyFill="1" applyBorder="1" applyAlignment="1"><alignment horizontal="center" vertical="center"/></xf><xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1" applyAlignment="1"><alignment horizontal="left"/></xf><xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1" applyAlignment="1"><alignment horizontal="right"/></xf></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;
