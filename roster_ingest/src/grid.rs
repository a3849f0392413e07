use image::ImageFormat;

/// A cell after coercion at the loader boundary.
///
/// Empty cells become an explicit [`CellValue::Blank`] marker rather than an
/// empty string, so "row has any content" checks are unambiguous downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Blank,
}

impl CellValue {
    /// The display text of the cell, or `None` for a blank cell.
    ///
    /// Numbers never render in scientific notation and integral values drop
    /// the trailing `.0`, so identifier and phone columns survive being
    /// typed as numbers by the spreadsheet author.
    pub fn display(&self) -> Option<String> {
        match self {
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) if n.fract() == 0.0 => Some(format!("{:.0}", n)),
            CellValue::Number(n) => Some(format!("{}", n)),
            CellValue::Blank => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Blank)
    }
}

/// The first sheet of an uploaded workbook as a rectangular grid.
///
/// Row 0 is the header row. The grid keeps the absolute sheet coordinates of
/// its top-left cell so drawing anchors (which are absolute) can be compared
/// against grid-relative column indices.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGrid {
    rows: Vec<Vec<CellValue>>,
    origin_row: usize,
    origin_col: usize,
}

impl RawGrid {
    /// Builds a grid, padding every row to the widest observed row.
    pub fn new(mut rows: Vec<Vec<CellValue>>, origin_row: usize, origin_col: usize) -> RawGrid {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        for row in rows.iter_mut() {
            row.resize(width, CellValue::Blank);
        }
        RawGrid {
            rows,
            origin_row,
            origin_col,
        }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Absolute 0-based sheet row of the header.
    pub fn origin_row(&self) -> usize {
        self.origin_row
    }

    /// Absolute 0-based sheet column of the leftmost grid column.
    pub fn origin_col(&self) -> usize {
        self.origin_col
    }

    pub fn header(&self) -> Option<&[CellValue]> {
        self.rows.first().map(|r| r.as_slice())
    }

    /// Data rows with their absolute 0-based sheet row numbers.
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[CellValue])> + '_ {
        let origin = self.origin_row;
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(move |(idx, row)| (origin + idx, row.as_slice()))
    }

    /// Absolute 0-based sheet row of the last grid row.
    pub fn last_sheet_row(&self) -> usize {
        self.origin_row + self.rows.len().saturating_sub(1)
    }
}

/// One image pulled out of the workbook's drawing layer.
///
/// Owned by the loader until the associator consumes it; never mutated after
/// creation. Anchors are absolute 0-based sheet coordinates when the source
/// encoding provided them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub anchor_row: Option<u32>,
    pub anchor_col: Option<u32>,
}

impl ExtractedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }

    /// Stable identity of the image contents, used by the association trace.
    pub fn digest(&self) -> String {
        sha256::digest(self.bytes.as_slice())
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor_row.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keeps_integral_numbers_plain() {
        assert_eq!(
            CellValue::Number(241234567.0).display(),
            Some("241234567".to_string())
        );
        assert_eq!(CellValue::Number(2.5).display(), Some("2.5".to_string()));
    }

    #[test]
    fn blank_cells_have_no_display() {
        assert_eq!(CellValue::Blank.display(), None);
        assert!(CellValue::Blank.is_blank());
    }

    #[test]
    fn rows_are_padded_to_the_widest_row() {
        let grid = RawGrid::new(
            vec![
                vec![CellValue::Text("A".into()), CellValue::Text("B".into())],
                vec![CellValue::Text("x".into())],
            ],
            0,
            0,
        );
        assert_eq!(grid.width(), 2);
        let (_, row) = grid.data_rows().next().unwrap();
        assert_eq!(row[1], CellValue::Blank);
    }

    #[test]
    fn data_rows_carry_absolute_sheet_rows() {
        let grid = RawGrid::new(
            vec![
                vec![CellValue::Text("H".into())],
                vec![CellValue::Text("a".into())],
                vec![CellValue::Text("b".into())],
            ],
            3,
            1,
        );
        let rows: Vec<usize> = grid.data_rows().map(|(r, _)| r).collect();
        assert_eq!(rows, vec![4, 5]);
        assert_eq!(grid.last_sheet_row(), 5);
    }
}
