//! Image-row associator.
//!
//! Assigns each extracted image to at most one data row. Anchored matching
//! comes first, a column-restricted override pass corrects anchors that are
//! column-exact but were claimed loosely, and an ordered fallback covers
//! workbooks whose encoding carries no anchor metadata at all. Every
//! decision is recorded in a structured trace so tests (and callers) can see
//! which strategy matched which row without scraping log output.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::columns::ColumnMap;
use crate::grid::{ExtractedImage, RawGrid};

/// Anchor columns within this distance of the resolved image column are
/// accepted by the anchored tier.
const COLUMN_TOLERANCE: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Anchor agreed with the row; deltas record how exact the match was.
    Anchored { row_delta: i64, col_delta: i64 },
    /// Second-pass reassignment for an anchor exactly on the image column.
    ColumnOverride,
    /// Positional pairing of the anchorless media pool with the data rows.
    OrderedFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    pub image_index: usize,
    pub image_digest: String,
    pub sheet_row: usize,
    pub strategy: MatchStrategy,
}

/// The associator's result: row-to-image assignment plus the match trace.
#[derive(Debug, Default)]
pub struct ImageAssignment {
    by_row: HashMap<usize, usize>,
    pub trace: Vec<MatchEvent>,
    /// True when the ordered fallback ran; assignments are then positional
    /// guesses and the caller should flag them for review.
    pub ordered_fallback: bool,
}

impl ImageAssignment {
    pub fn image_for_row(&self, sheet_row: usize) -> Option<usize> {
        self.by_row.get(&sheet_row).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.by_row.iter().map(|(row, idx)| (*row, *idx))
    }

    pub fn len(&self) -> usize {
        self.by_row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }
}

pub fn associate_images(
    grid: &RawGrid,
    columns: &ColumnMap,
    images: &[ExtractedImage],
) -> ImageAssignment {
    let mut assignment = ImageAssignment::default();
    if images.is_empty() {
        return assignment;
    }

    let mut used: HashSet<usize> = HashSet::new();
    // Deltas of the accepted anchored match per row, so the override pass
    // can tell loose matches from exact ones.
    let mut match_quality: HashMap<usize, (i64, i64)> = HashMap::new();

    let header_row = grid.origin_row();
    let image_col = columns.image.map(|c| (c + grid.origin_col()) as i64);

    // Tier 1: anchored exact/near matching, row by row, first success wins.
    for (ordinal, (sheet_row, _)) in grid.data_rows().enumerate() {
        for (idx, img) in images.iter().enumerate() {
            if used.contains(&idx) {
                continue;
            }
            let anchor_row = match img.anchor_row {
                Some(r) => r as i64,
                None => continue,
            };
            let row = sheet_row as i64;
            // Anchor row semantics differ across producers: absolute
            // 0-based, absolute 1-based, or counted from the first data row.
            let row_matches = anchor_row == row
                || anchor_row == row + 1
                || anchor_row == ordinal as i64;
            if !row_matches {
                continue;
            }
            let col_delta = match (img.anchor_col, image_col) {
                (Some(ac), Some(ic)) => {
                    let delta = ac as i64 - ic;
                    if delta.abs() > COLUMN_TOLERANCE {
                        continue;
                    }
                    delta
                }
                // No image column resolved (or no anchor column recorded):
                // row agreement is all we can check.
                _ => 0,
            };
            let row_delta = anchor_row - row;
            assignment.by_row.insert(sheet_row, idx);
            match_quality.insert(sheet_row, (row_delta, col_delta));
            used.insert(idx);
            assignment.trace.push(MatchEvent {
                image_index: idx,
                image_digest: img.digest(),
                sheet_row,
                strategy: MatchStrategy::Anchored {
                    row_delta,
                    col_delta,
                },
            });
            break;
        }
    }

    // Tier 2: re-scan all anchored images. One anchored exactly on the
    // image column, strictly below the header, claims its anchor row even
    // when the first pass placed it (or a rival) loosely.
    if let Some(ic) = image_col {
        let last_row = grid.last_sheet_row();
        for (idx, img) in images.iter().enumerate() {
            let (anchor_row, anchor_col) = match (img.anchor_row, img.anchor_col) {
                (Some(r), Some(c)) => (r as usize, c as i64),
                _ => continue,
            };
            if anchor_col != ic || anchor_row <= header_row || anchor_row > last_row {
                continue;
            }
            if assignment.by_row.get(&anchor_row) == Some(&idx) {
                continue;
            }
            // An exact occupant keeps its claim.
            let occupant_exact = match_quality
                .get(&anchor_row)
                .map(|q| *q == (0, 0))
                .unwrap_or(false);
            if occupant_exact {
                continue;
            }
            // Release this image's looser placement, if the first pass made
            // one, and displace the looser occupant of the anchor row.
            let old_row = assignment
                .iter()
                .find(|(_, i)| *i == idx)
                .map(|(row, _)| row);
            if let Some(row) = old_row {
                assignment.by_row.remove(&row);
                match_quality.remove(&row);
            }
            if let Some(prev) = assignment.by_row.insert(anchor_row, idx) {
                used.remove(&prev);
                debug!(
                    "associate_images: row {} reassigned from image {} to column-exact image {}",
                    anchor_row, prev, idx
                );
            }
            match_quality.insert(anchor_row, (0, 0));
            used.insert(idx);
            assignment.trace.push(MatchEvent {
                image_index: idx,
                image_digest: img.digest(),
                sheet_row: anchor_row,
                strategy: MatchStrategy::ColumnOverride,
            });
        }
    }

    // Tier 3: no anchor metadata anywhere in the workbook. Pair the pool
    // with the data rows positionally. Heuristic only; the caller flags it.
    if !images.iter().any(|img| img.is_anchored()) {
        assignment.ordered_fallback = true;
        let mut next = 0usize;
        for (sheet_row, _) in grid.data_rows() {
            while next < images.len() && used.contains(&next) {
                next += 1;
            }
            if next >= images.len() {
                break;
            }
            assignment.by_row.insert(sheet_row, next);
            used.insert(next);
            assignment.trace.push(MatchEvent {
                image_index: next,
                image_digest: images[next].digest(),
                sheet_row,
                strategy: MatchStrategy::OrderedFallback,
            });
            next += 1;
        }
    }

    debug!(
        "associate_images: {} of {} images assigned across {} data rows",
        assignment.len(),
        images.len(),
        grid.row_count().saturating_sub(1)
    );
    assignment
}
