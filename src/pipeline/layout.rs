//! Geometry helpers shared by the extraction strategies and the document
//! reconstruction: grouping runs into lines, clustering edge positions and
//! merging horizontal projections.

use crate::engine::{BBox, TextRun};

/// Runs sharing a baseline band, sorted left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub runs: Vec<TextRun>,
    pub bbox: BBox,
}

impl TextLine {
    fn start(run: TextRun) -> Self {
        let bbox = run.bbox;
        Self {
            runs: vec![run],
            bbox,
        }
    }

    fn push(&mut self, run: TextRun) {
        self.bbox = self.bbox.union(&run.bbox);
        self.runs.push(run);
    }

    fn center_y(&self) -> f32 {
        self.bbox.center().1
    }

    /// Horizontal whitespace between consecutive runs.
    pub fn gaps(&self) -> Vec<f32> {
        self.runs
            .windows(2)
            .map(|w| w[1].bbox.x0 - w[0].bbox.x1)
            .collect()
    }

    /// Split the line wherever the gap between runs reaches `min_gap`.
    /// Each returned group is one visual cell.
    pub fn cells(&self, min_gap: f32) -> Vec<Vec<&TextRun>> {
        let mut cells: Vec<Vec<&TextRun>> = Vec::new();
        let mut prev_x1: Option<f32> = None;
        for run in &self.runs {
            match (prev_x1, cells.last_mut()) {
                (Some(x1), Some(current)) if run.bbox.x0 - x1 < min_gap => current.push(run),
                _ => cells.push(vec![run]),
            }
            prev_x1 = Some(prev_x1.map_or(run.bbox.x1, |x| x.max(run.bbox.x1)));
        }
        cells
    }

    /// Plain text, with a tab wherever the gap reaches `tab_gap`.
    pub fn text(&self, tab_gap: f32) -> String {
        let mut out = String::new();
        let mut prev: Option<&TextRun> = None;
        for run in &self.runs {
            if let Some(p) = prev {
                let gap = run.bbox.x0 - p.bbox.x1;
                if gap >= tab_gap {
                    out.push('\t');
                } else if !p.text.ends_with(' ') && !run.text.starts_with(' ') {
                    out.push(' ');
                }
            }
            out.push_str(run.text.trim_end_matches(['\r', '\n']));
            prev = Some(run);
        }
        out.trim().to_string()
    }
}

/// Group runs into lines, top to bottom.
///
/// A run joins the current line when its vertical centre lies within
/// `tolerance` (or half its own height, whichever is larger) of the line's
/// centre.
pub fn group_lines(runs: &[TextRun], tolerance: f32) -> Vec<TextLine> {
    let mut sorted: Vec<TextRun> = runs.to_vec();
    sorted.sort_by(|a, b| {
        a.bbox
            .center()
            .1
            .total_cmp(&b.bbox.center().1)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let mut lines: Vec<TextLine> = Vec::new();
    for run in sorted {
        let cy = run.bbox.center().1;
        let reach = tolerance.max(run.bbox.height() / 2.0);
        match lines.last_mut() {
            Some(line) if (cy - line.center_y()).abs() <= reach => line.push(run),
            _ => lines.push(TextLine::start(run)),
        }
    }
    for line in &mut lines {
        line.runs.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
    }
    lines
}

/// Collapse positions closer than `tolerance` into their mean, ascending.
pub fn cluster_positions(values: &[f32], tolerance: f32) -> Vec<f32> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);

    let mut clusters: Vec<Vec<f32>> = Vec::new();
    for v in sorted {
        match clusters.last_mut() {
            Some(c) if v - c[c.len() - 1] <= tolerance => c.push(v),
            _ => clusters.push(vec![v]),
        }
    }
    clusters
        .into_iter()
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect()
}

/// Merge horizontal intervals that are closer than `min_gap`, ascending.
pub fn merge_intervals(intervals: &[(f32, f32)], min_gap: f32) -> Vec<(f32, f32)> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut merged: Vec<(f32, f32)> = Vec::new();
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start - last.1 < min_gap => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, x0: f32, top: f32, x1: f32) -> TextRun {
        TextRun::new(text, BBox::new(x0, top, x1, top + 10.0))
    }

    #[test]
    fn groups_runs_by_baseline() {
        let runs = vec![
            run("b", 100.0, 11.0, 120.0),
            run("a", 10.0, 10.0, 30.0),
            run("c", 10.0, 40.0, 30.0),
        ];
        let lines = group_lines(&runs, 2.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].runs[0].text, "a");
        assert_eq!(lines[0].runs[1].text, "b");
        assert_eq!(lines[1].runs[0].text, "c");
    }

    #[test]
    fn cells_split_on_wide_gaps() {
        let lines = group_lines(
            &[
                run("Total", 10.0, 0.0, 40.0),
                run("due", 42.0, 0.0, 60.0),
                run("100", 200.0, 0.0, 220.0),
            ],
            2.0,
        );
        let cells = lines[0].cells(12.0);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].len(), 2);
        assert_eq!(lines[0].gaps(), vec![2.0, 140.0]);
    }

    #[test]
    fn line_text_uses_tabs_for_wide_gaps() {
        let lines = group_lines(
            &[run("Name", 10.0, 0.0, 40.0), run("Amount", 200.0, 0.0, 240.0)],
            2.0,
        );
        assert_eq!(lines[0].text(20.0), "Name\tAmount");
        assert_eq!(lines[0].text(500.0), "Name Amount");
    }

    #[test]
    fn clusters_nearby_positions() {
        let c = cluster_positions(&[100.0, 10.0, 10.5, 99.0, 50.0], 2.0);
        assert_eq!(c.len(), 3);
        assert!((c[0] - 10.25).abs() < 1e-4);
        assert!((c[2] - 99.5).abs() < 1e-4);
    }

    #[test]
    fn merges_close_intervals() {
        let m = merge_intervals(&[(50.0, 60.0), (0.0, 10.0), (12.0, 20.0)], 5.0);
        assert_eq!(m, vec![(0.0, 20.0), (50.0, 60.0)]);
    }
}
