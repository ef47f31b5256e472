//! Table extraction ladder.
//!
//! Four strategies are tried in a fixed order against the page layouts of
//! one document. The first strategy that yields at least one non-blank
//! table wins; later strategies are never consulted and results are never
//! merged.
//!
//! | Rung | Strategy | Header assumption |
//! |------|----------|-------------------|
//! | 1 | lattice (ruling-line grid) | first grid row |
//! | 2 | lattice | first two grid rows (two-level header) |
//! | 3 | stream (whitespace columns) | first line |
//! | 4 | stream | none; labels are synthetic |
//!
//! An empty ladder is a normal outcome for prose-only or scanned PDFs.

use crate::engine::{BBox, PageLayout, PdfEngine, TextRun};
use crate::error::EngineError;
use crate::pipeline::layout::{cluster_positions, group_lines, merge_intervals};
use crate::table::{Cell, ColumnLabel, ExtractedTable, StrategyId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Geometry tolerances for the extraction strategies, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    /// Ruling edges closer than this are the same grid line. Default: 3.0.
    pub snap_tolerance: f32,
    /// Paths thinner than this count as lines rather than boxes. Default: 2.0.
    pub ruling_thickness: f32,
    /// Vertical slack when grouping runs into lines. Default: 2.0.
    pub line_tolerance: f32,
    /// Minimum whitespace between two stream columns. Default: 12.0.
    pub min_column_gap: f32,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            snap_tolerance: 3.0,
            ruling_thickness: 2.0,
            line_tolerance: 2.0,
            min_column_gap: 12.0,
        }
    }
}

/// One rung of the ladder.
///
/// Strategies are stateless and only read the layouts they are given.
pub trait ExtractionStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// All tables this strategy finds, in page order.
    fn extract(&self, pages: &[PageLayout]) -> Vec<ExtractedTable>;
}

/// Outcome of a ladder run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    /// Winning strategy, `None` if every rung came back empty.
    pub strategy: Option<StrategyId>,
    /// Tables from the winning strategy.
    pub tables: Vec<ExtractedTable>,
    /// Strategies tried, with the number of usable tables each produced.
    pub attempts: Vec<(StrategyId, usize)>,
}

impl ExtractionReport {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// The four strategies in priority order.
pub fn default_ladder(options: ExtractionOptions) -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(LatticeStrategy::new(1, options)),
        Box::new(LatticeStrategy::new(2, options)),
        Box::new(StreamStrategy::new(true, options)),
        Box::new(StreamStrategy::new(false, options)),
    ]
}

/// Run `ladder` against `pages`, stopping at the first strategy with data.
pub fn run_ladder(pages: &[PageLayout], ladder: &[Box<dyn ExtractionStrategy>]) -> ExtractionReport {
    let mut report = ExtractionReport::default();
    for strategy in ladder {
        let tables: Vec<ExtractedTable> = strategy
            .extract(pages)
            .into_iter()
            .filter(|t| !t.rows.is_empty() && !t.is_blank())
            .collect();
        debug!(strategy = %strategy.id(), tables = tables.len(), "Extraction attempt");
        report.attempts.push((strategy.id(), tables.len()));
        if !tables.is_empty() {
            report.strategy = Some(strategy.id());
            report.tables = tables;
            return report;
        }
    }
    report
}

/// Read the layout of `path` once and run the default ladder over it.
pub fn extract_tables(
    engine: &dyn PdfEngine,
    path: &Path,
    options: ExtractionOptions,
) -> Result<ExtractionReport, EngineError> {
    let pages = engine.layout(path)?;
    let report = run_ladder(&pages, &default_ladder(options));
    match report.strategy {
        Some(s) => info!("Extracted {} table(s) with {}", report.tables.len(), s),
        None => info!("No tabular data found in {} page(s)", pages.len()),
    }
    Ok(report)
}

// ── Lattice ──────────────────────────────────────────────────────────────

/// Grid detection from ruling lines and box outlines.
pub struct LatticeStrategy {
    header_rows: usize,
    options: ExtractionOptions,
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Horizontal { y: f32, x0: f32, x1: f32 },
    Vertical { x: f32, top: f32, bottom: f32 },
}

impl Edge {
    fn bbox(&self) -> BBox {
        match *self {
            Edge::Horizontal { y, x0, x1 } => BBox::new(x0, y, x1, y),
            Edge::Vertical { x, top, bottom } => BBox::new(x, top, x, bottom),
        }
    }
}

impl LatticeStrategy {
    pub fn new(header_rows: usize, options: ExtractionOptions) -> Self {
        Self {
            header_rows: header_rows.clamp(1, 2),
            options,
        }
    }

    /// Explode rulings into horizontal and vertical edges.
    fn edges(&self, page: &PageLayout) -> Vec<Edge> {
        let t = self.options.ruling_thickness;
        let mut edges = Vec::new();
        for ruling in &page.rulings {
            let b = ruling.bbox;
            let (cx, cy) = b.center();
            match (b.width() <= t, b.height() <= t) {
                (true, true) => {}
                (false, true) => edges.push(Edge::Horizontal {
                    y: cy,
                    x0: b.x0,
                    x1: b.x1,
                }),
                (true, false) => edges.push(Edge::Vertical {
                    x: cx,
                    top: b.top,
                    bottom: b.bottom,
                }),
                (false, false) => {
                    edges.push(Edge::Horizontal { y: b.top, x0: b.x0, x1: b.x1 });
                    edges.push(Edge::Horizontal { y: b.bottom, x0: b.x0, x1: b.x1 });
                    edges.push(Edge::Vertical { x: b.x0, top: b.top, bottom: b.bottom });
                    edges.push(Edge::Vertical { x: b.x1, top: b.top, bottom: b.bottom });
                }
            }
        }
        edges
    }

    /// Group edges into connected regions; each region is a table candidate.
    fn regions(&self, edges: Vec<Edge>) -> Vec<(BBox, Vec<Edge>)> {
        let pad = self.options.snap_tolerance;
        let mut regions: Vec<(BBox, Vec<Edge>)> = Vec::new();
        for edge in edges {
            let mut bbox = edge.bbox();
            let mut members = vec![edge];
            let mut i = 0;
            while i < regions.len() {
                if regions[i].0.touches(&bbox, pad) {
                    let (other_box, other_edges) = regions.swap_remove(i);
                    bbox = bbox.union(&other_box);
                    members.extend(other_edges);
                    i = 0;
                } else {
                    i += 1;
                }
            }
            regions.push((bbox, members));
        }
        regions.sort_by(|a, b| a.0.top.total_cmp(&b.0.top).then(a.0.x0.total_cmp(&b.0.x0)));
        regions
    }

    /// Fill the grid spanned by `edges` with the runs whose centre falls in it.
    fn grid(&self, edges: &[Edge], runs: &[TextRun]) -> Option<Vec<Vec<String>>> {
        let tol = self.options.snap_tolerance;
        let xs: Vec<f32> = edges
            .iter()
            .filter_map(|e| match *e {
                Edge::Vertical { x, .. } => Some(x),
                _ => None,
            })
            .collect();
        let ys: Vec<f32> = edges
            .iter()
            .filter_map(|e| match *e {
                Edge::Horizontal { y, .. } => Some(y),
                _ => None,
            })
            .collect();
        let xs = cluster_positions(&xs, tol);
        let ys = cluster_positions(&ys, tol);
        // Two columns and two rows at least; a single box is a frame, not a table.
        if xs.len() < 3 || ys.len() < 3 {
            return None;
        }

        let mut cells = vec![vec![String::new(); xs.len() - 1]; ys.len() - 1];
        let mut ordered: Vec<&TextRun> = runs.iter().collect();
        ordered.sort_by(|a, b| a.bbox.top.total_cmp(&b.bbox.top).then(a.bbox.x0.total_cmp(&b.bbox.x0)));
        for run in ordered {
            let (cx, cy) = run.bbox.center();
            let (Some(col), Some(row)) = (slot(&xs, cx), slot(&ys, cy)) else {
                continue;
            };
            let cell = &mut cells[row][col];
            if !cell.is_empty() {
                cell.push(' ');
            }
            cell.push_str(run.text.trim());
        }

        if cells.iter().flatten().all(|c| c.trim().is_empty()) {
            None
        } else {
            Some(cells)
        }
    }

    fn to_table(&self, grid: Vec<Vec<String>>, page_num: usize) -> Option<ExtractedTable> {
        if grid.len() <= self.header_rows {
            return None;
        }
        // A spanning top row belongs to the two-row rung.
        if self.header_rows == 1 && spans_two_header_rows(&grid) {
            return None;
        }
        let width = grid[0].len();
        let labels = if self.header_rows == 1 {
            grid[0].iter().map(ColumnLabel::from_header).collect()
        } else {
            let mut top = String::new();
            (0..width)
                .map(|c| {
                    let cell = grid[0][c].trim();
                    // Blank cells right of a label sit under its span.
                    if !cell.is_empty() || c == 0 {
                        top = cell.to_string();
                    }
                    ColumnLabel::MultiLevel(vec![top.clone(), grid[1][c].trim().to_string()])
                })
                .collect()
        };
        let rows = grid
            .into_iter()
            .skip(self.header_rows)
            .map(|r| r.iter().map(Cell::text).collect())
            .collect();
        Some(ExtractedTable {
            strategy: self.id(),
            pages: (page_num, page_num),
            labels,
            rows,
        })
    }
}

/// True when the top row has a label spanning into a blank cell to its
/// right, and the second row carries sub-labels under both.
fn spans_two_header_rows(grid: &[Vec<String>]) -> bool {
    if grid.len() < 3 {
        return false;
    }
    let (top, sub) = (&grid[0], &grid[1]);
    let filled = |s: &String| !s.trim().is_empty();
    (1..top.len()).any(|c| {
        filled(&top[c - 1]) && !filled(&top[c]) && filled(&sub[c - 1]) && filled(&sub[c])
    })
}

/// Index `i` such that `edges[i] <= v < edges[i + 1]`.
fn slot(edges: &[f32], v: f32) -> Option<usize> {
    edges.windows(2).position(|w| v >= w[0] && v < w[1])
}

impl ExtractionStrategy for LatticeStrategy {
    fn id(&self) -> StrategyId {
        if self.header_rows == 1 {
            StrategyId::LatticeSingleHeader
        } else {
            StrategyId::LatticeTwoRowHeader
        }
    }

    fn extract(&self, pages: &[PageLayout]) -> Vec<ExtractedTable> {
        let mut tables = Vec::new();
        for page in pages {
            for (_, edges) in self.regions(self.edges(page)) {
                if let Some(table) = self
                    .grid(&edges, &page.runs)
                    .and_then(|g| self.to_table(g, page.page_num))
                {
                    tables.push(table);
                }
            }
        }
        tables
    }
}

// ── Stream ───────────────────────────────────────────────────────────────

/// Column detection from whitespace alignment.
pub struct StreamStrategy {
    header: bool,
    options: ExtractionOptions,
}

impl StreamStrategy {
    pub fn new(header: bool, options: ExtractionOptions) -> Self {
        Self { header, options }
    }

    fn min_lines(&self) -> usize {
        if self.header {
            2
        } else {
            1
        }
    }

    /// Tables on one page: maximal blocks of consecutive multi-cell lines.
    fn page_tables(&self, page: &PageLayout) -> Vec<ExtractedTable> {
        let gap = self.options.min_column_gap;
        let lines = group_lines(&page.runs, self.options.line_tolerance);

        let mut blocks: Vec<Vec<Vec<(BBox, String)>>> = Vec::new();
        let mut current: Vec<Vec<(BBox, String)>> = Vec::new();
        for line in &lines {
            let cells: Vec<(BBox, String)> = line
                .cells(gap)
                .into_iter()
                .map(|runs| {
                    let bbox = runs
                        .iter()
                        .skip(1)
                        .fold(runs[0].bbox, |acc, r| acc.union(&r.bbox));
                    let text = runs
                        .iter()
                        .map(|r| r.text.trim())
                        .collect::<Vec<_>>()
                        .join(" ");
                    (bbox, text)
                })
                .collect();
            if cells.len() >= 2 {
                current.push(cells);
            } else if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            blocks.push(current);
        }

        blocks
            .into_iter()
            .filter(|b| b.len() >= self.min_lines())
            .filter_map(|b| self.block_table(b, page.page_num))
            .collect()
    }

    fn block_table(
        &self,
        block: Vec<Vec<(BBox, String)>>,
        page_num: usize,
    ) -> Option<ExtractedTable> {
        let extents: Vec<(f32, f32)> = block
            .iter()
            .flatten()
            .map(|(b, _)| (b.x0, b.x1))
            .collect();
        let columns = merge_intervals(&extents, self.options.min_column_gap);
        if columns.len() < 2 {
            return None;
        }

        let mut grid: Vec<Vec<String>> = block
            .into_iter()
            .map(|line| {
                let mut row = vec![String::new(); columns.len()];
                for (bbox, text) in line {
                    let col = column_for(&columns, bbox.center().0);
                    if !row[col].is_empty() {
                        row[col].push(' ');
                    }
                    row[col].push_str(&text);
                }
                row
            })
            .collect();

        let labels = if self.header {
            grid.remove(0).iter().map(ColumnLabel::from_header).collect()
        } else {
            (0..columns.len()).map(ColumnLabel::Synthetic).collect()
        };
        Some(ExtractedTable {
            strategy: self.id(),
            pages: (page_num, page_num),
            labels,
            rows: grid
                .into_iter()
                .map(|r| r.iter().map(Cell::text).collect())
                .collect(),
        })
    }
}

/// Column whose interval contains `x`, else the nearest one.
fn column_for(columns: &[(f32, f32)], x: f32) -> usize {
    columns
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| distance(**a, x).total_cmp(&distance(**b, x)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn distance((start, end): (f32, f32), x: f32) -> f32 {
    if x < start {
        start - x
    } else if x > end {
        x - end
    } else {
        0.0
    }
}

impl ExtractionStrategy for StreamStrategy {
    fn id(&self) -> StrategyId {
        if self.header {
            StrategyId::StreamHeader
        } else {
            StrategyId::StreamRaw
        }
    }

    fn extract(&self, pages: &[PageLayout]) -> Vec<ExtractedTable> {
        pages.iter().flat_map(|p| self.page_tables(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Ruling;

    fn run(text: &str, x0: f32, top: f32) -> TextRun {
        let w = 6.0 * text.len() as f32;
        TextRun::new(text, BBox::new(x0, top, x0 + w, top + 10.0))
    }

    fn hline(y: f32, x0: f32, x1: f32) -> Ruling {
        Ruling { bbox: BBox::new(x0, y - 0.5, x1, y + 0.5) }
    }

    fn vline(x: f32, top: f32, bottom: f32) -> Ruling {
        Ruling { bbox: BBox::new(x - 0.5, top, x + 0.5, bottom) }
    }

    /// 3×2 ruled grid: header row plus two data rows.
    fn ruled_page() -> PageLayout {
        let mut rulings = Vec::new();
        for y in [100.0, 120.0, 140.0, 160.0] {
            rulings.push(hline(y, 50.0, 250.0));
        }
        for x in [50.0, 150.0, 250.0] {
            rulings.push(vline(x, 100.0, 160.0));
        }
        PageLayout {
            page_num: 1,
            width: 612.0,
            height: 792.0,
            runs: vec![
                run("Name", 60.0, 105.0),
                run("Amount", 160.0, 105.0),
                run("Alice", 60.0, 125.0),
                run("100", 160.0, 125.0),
                run("Bob", 60.0, 145.0),
                run("$250", 160.0, 145.0),
                run("Footer prose outside the grid", 50.0, 300.0),
            ],
            rulings,
        }
    }

    /// 3×4 ruled grid whose "Sales" header spans two sub-labelled columns.
    fn spanning_header_page() -> PageLayout {
        let mut rulings = Vec::new();
        for y in [100.0, 120.0, 140.0, 160.0, 180.0] {
            rulings.push(hline(y, 50.0, 350.0));
        }
        for x in [50.0, 150.0, 250.0, 350.0] {
            rulings.push(vline(x, 100.0, 180.0));
        }
        PageLayout {
            page_num: 1,
            width: 612.0,
            height: 792.0,
            runs: vec![
                run("Region", 60.0, 105.0),
                run("Sales", 160.0, 105.0),
                run("2023", 160.0, 125.0),
                run("2024", 260.0, 125.0),
                run("North", 60.0, 145.0),
                run("100", 160.0, 145.0),
                run("120", 260.0, 145.0),
                run("South", 60.0, 165.0),
                run("90", 160.0, 165.0),
                run("95", 260.0, 165.0),
            ],
            rulings,
        }
    }

    fn whitespace_page() -> PageLayout {
        PageLayout {
            page_num: 2,
            width: 612.0,
            height: 792.0,
            runs: vec![
                run("Quarterly report", 50.0, 40.0),
                run("Region", 50.0, 100.0),
                run("Sales", 250.0, 100.0),
                run("North", 50.0, 115.0),
                run("1,200", 250.0, 115.0),
                run("South", 50.0, 130.0),
                run("980", 250.0, 130.0),
            ],
            rulings: vec![],
        }
    }

    fn prose_page() -> PageLayout {
        PageLayout {
            page_num: 1,
            width: 612.0,
            height: 792.0,
            runs: vec![
                run("It was a dark and stormy night;", 50.0, 100.0),
                run("the rain fell in torrents.", 50.0, 115.0),
            ],
            rulings: vec![],
        }
    }

    #[test]
    fn lattice_reads_ruled_grid_with_header() {
        let tables = LatticeStrategy::new(1, ExtractionOptions::default()).extract(&[ruled_page()]);
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(
            t.labels,
            vec![
                ColumnLabel::Named("Name".into()),
                ColumnLabel::Named("Amount".into())
            ]
        );
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1], vec![Cell::text("Bob"), Cell::text("$250")]);
        assert_eq!(t.pages, (1, 1));
    }

    #[test]
    fn lattice_two_row_header_builds_multilevel_labels() {
        let tables = LatticeStrategy::new(2, ExtractionOptions::default()).extract(&[ruled_page()]);
        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0].labels[0],
            ColumnLabel::MultiLevel(vec!["Name".into(), "Alice".into()])
        );
        assert_eq!(tables[0].rows.len(), 1);
    }

    #[test]
    fn lattice_treats_rectangles_as_cell_outlines() {
        let mut page = ruled_page();
        page.rulings = vec![
            Ruling { bbox: BBox::new(50.0, 100.0, 150.0, 120.0) },
            Ruling { bbox: BBox::new(150.0, 100.0, 250.0, 120.0) },
            Ruling { bbox: BBox::new(50.0, 120.0, 150.0, 140.0) },
            Ruling { bbox: BBox::new(150.0, 120.0, 250.0, 140.0) },
        ];
        let tables = LatticeStrategy::new(1, ExtractionOptions::default()).extract(&[page]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows, vec![vec![Cell::text("Alice"), Cell::text("100")]]);
    }

    #[test]
    fn lattice_ignores_single_frame() {
        let mut page = prose_page();
        page.rulings = vec![Ruling { bbox: BBox::new(40.0, 90.0, 400.0, 140.0) }];
        assert!(LatticeStrategy::new(1, ExtractionOptions::default())
            .extract(&[page])
            .is_empty());
    }

    #[test]
    fn stream_detects_whitespace_columns() {
        let tables = StreamStrategy::new(true, ExtractionOptions::default()).extract(&[whitespace_page()]);
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(
            t.labels,
            vec![
                ColumnLabel::Named("Region".into()),
                ColumnLabel::Named("Sales".into())
            ]
        );
        assert_eq!(t.rows[0], vec![Cell::text("North"), Cell::text("1,200")]);
        assert_eq!(t.pages, (2, 2));
    }

    #[test]
    fn stream_raw_uses_synthetic_labels() {
        let tables = StreamStrategy::new(false, ExtractionOptions::default()).extract(&[whitespace_page()]);
        assert_eq!(tables[0].labels, vec![ColumnLabel::Synthetic(0), ColumnLabel::Synthetic(1)]);
        assert_eq!(tables[0].rows.len(), 3);
    }

    #[test]
    fn ladder_stops_at_first_success() {
        let report = run_ladder(
            &[ruled_page(), whitespace_page()],
            &default_ladder(ExtractionOptions::default()),
        );
        assert_eq!(report.strategy, Some(StrategyId::LatticeSingleHeader));
        assert_eq!(report.attempts.len(), 1);
        assert!(report.tables.iter().all(|t| t.strategy == StrategyId::LatticeSingleHeader));
    }

    #[test]
    fn spanning_header_goes_to_two_row_rung() {
        assert!(LatticeStrategy::new(1, ExtractionOptions::default())
            .extract(&[spanning_header_page()])
            .is_empty());

        let report = run_ladder(
            &[spanning_header_page()],
            &default_ladder(ExtractionOptions::default()),
        );
        assert_eq!(report.strategy, Some(StrategyId::LatticeTwoRowHeader));
        let t = &report.tables[0];
        assert_eq!(
            t.labels,
            vec![
                ColumnLabel::MultiLevel(vec!["Region".into(), "".into()]),
                ColumnLabel::MultiLevel(vec!["Sales".into(), "2023".into()]),
                ColumnLabel::MultiLevel(vec!["Sales".into(), "2024".into()]),
            ]
        );
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1][2], Cell::text("95"));
    }

    #[test]
    fn blank_corner_header_stays_single_row() {
        let mut page = ruled_page();
        page.runs.retain(|r| r.text != "Name");
        let report = run_ladder(&[page], &default_ladder(ExtractionOptions::default()));
        assert_eq!(report.strategy, Some(StrategyId::LatticeSingleHeader));
    }

    #[test]
    fn ladder_falls_through_to_stream() {
        let report = run_ladder(&[whitespace_page()], &default_ladder(ExtractionOptions::default()));
        assert_eq!(report.strategy, Some(StrategyId::StreamHeader));
        assert_eq!(
            report.attempts.iter().map(|a| a.0).collect::<Vec<_>>(),
            vec![
                StrategyId::LatticeSingleHeader,
                StrategyId::LatticeTwoRowHeader,
                StrategyId::StreamHeader
            ]
        );
    }

    #[test]
    fn ladder_reports_prose_as_empty() {
        let report = run_ladder(&[prose_page()], &default_ladder(ExtractionOptions::default()));
        assert!(report.is_empty());
        assert_eq!(report.strategy, None);
        assert_eq!(report.attempts.len(), 4);
    }
}
