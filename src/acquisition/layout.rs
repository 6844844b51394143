//! Substrate holder layout.
//!
//! The holder is an R×C grid of substrate slots. Each slot carries an optional
//! label and an active flag, and every substrate holds the same number of
//! sub-devices. Slots are numbered physically from the bottom row up:
//!
//! ```text
//!   row 0:  13 14 15 16
//!   row 1:   9 10 11 12
//!   row 2:   5  6  7  8
//!   row 3:   1  2  3  4
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// Largest number of substrate slots a holder may have.
pub const MAX_SLOTS: u32 = 4096;

/// Order in which grid cells are visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitOrder {
    /// Left to right, then top to bottom
    #[default]
    RowMajor,
    /// Top to bottom, then left to right
    ColumnMajor,
}

/// One substrate slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    /// Substrate label; empty means no substrate loaded
    pub label: String,
    /// Inactive cells are skipped even when labelled
    pub active: bool,
}

/// An active cell resolved for measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPosition {
    /// Grid row (0 = top)
    pub row: u32,
    /// Grid column (0 = left)
    pub col: u32,
    /// Physical substrate number on the holder
    pub substrate: u32,
    /// Substrate label
    pub label: String,
}

/// The substrate grid a run walks through.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstrateGrid {
    rows: u32,
    cols: u32,
    devices_per_substrate: u32,
    order: VisitOrder,
    cells: Vec<GridCell>,
}

impl SubstrateGrid {
    /// Empty grid: every cell unlabelled.
    pub fn new(rows: u32, cols: u32, devices_per_substrate: u32) -> AppResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(DaqError::Validation(format!(
                "grid must have at least one row and column, got {rows}x{cols}"
            )));
        }
        if devices_per_substrate == 0 {
            return Err(DaqError::Validation(
                "devices per substrate must be at least 1".to_string(),
            ));
        }
        let slots = rows
            .checked_mul(cols)
            .filter(|n| *n <= MAX_SLOTS)
            .ok_or_else(|| {
                DaqError::Validation(format!(
                    "a {rows}x{cols} holder exceeds the {MAX_SLOTS} slot limit"
                ))
            })?;
        Ok(Self {
            rows,
            cols,
            devices_per_substrate,
            order: VisitOrder::default(),
            cells: vec![GridCell::default(); slots as usize],
        })
    }

    /// A plain device list: one row, one device per substrate, in list order.
    pub fn single_row<S: AsRef<str>>(labels: &[S]) -> AppResult<Self> {
        let cols = u32::try_from(labels.len())
            .map_err(|_| DaqError::Validation("too many devices".to_string()))?;
        let mut grid = Self::new(1, cols, 1)?;
        for (col, label) in (0..cols).zip(labels) {
            grid.set_label(0, col, label.as_ref())?;
        }
        Ok(grid)
    }

    /// Change the visit order.
    pub fn with_visit_order(mut self, order: VisitOrder) -> Self {
        self.order = order;
        self
    }

    /// Label the cells in visit order, activating each labelled one.
    pub fn fill_in_order<S: AsRef<str>>(mut self, labels: &[S]) -> AppResult<Self> {
        let slots = self.visit_positions();
        if labels.len() > slots.len() {
            return Err(DaqError::Validation(format!(
                "{} labels do not fit a {}x{} holder",
                labels.len(),
                self.rows,
                self.cols
            )));
        }
        for ((row, col), label) in slots.into_iter().zip(labels) {
            self.set_label(row, col, label.as_ref())?;
        }
        Ok(self)
    }

    /// Label a cell. A non-empty label activates it.
    pub fn set_label(&mut self, row: u32, col: u32, label: &str) -> AppResult<()> {
        let cell = self.cell_mut(row, col)?;
        cell.label = label.trim().to_string();
        cell.active = !cell.label.is_empty();
        Ok(())
    }

    /// Enable or disable a cell without touching its label.
    pub fn set_active(&mut self, row: u32, col: u32, active: bool) -> AppResult<()> {
        self.cell_mut(row, col)?.active = active;
        Ok(())
    }

    /// Number of rows
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Sub-devices on each substrate
    pub fn devices_per_substrate(&self) -> u32 {
        self.devices_per_substrate
    }

    /// Configured visit order
    pub fn visit_order(&self) -> VisitOrder {
        self.order
    }

    /// Physical substrate number of a cell, `(R - row)·C - (C - 1 - col)`.
    pub fn substrate_number(&self, row: u32, col: u32) -> u32 {
        (self.rows - row) * self.cols - (self.cols - 1 - col)
    }

    /// Identifier of one sub-device: the label, suffixed with the device index
    /// when substrates carry more than one device.
    pub fn device_id(&self, label: &str, device: u32) -> String {
        if self.devices_per_substrate > 1 {
            format!("{label}{device}")
        } else {
            label.to_string()
        }
    }

    /// Labelled, active cells in visit order.
    pub fn active_cells(&self) -> Vec<CellPosition> {
        self.visit_positions()
            .into_iter()
            .filter_map(|(row, col)| {
                let cell = &self.cells[self.index(row, col)];
                (cell.active && !cell.label.is_empty()).then(|| CellPosition {
                    row,
                    col,
                    substrate: self.substrate_number(row, col),
                    label: cell.label.clone(),
                })
            })
            .collect()
    }

    fn visit_positions(&self) -> Vec<(u32, u32)> {
        match self.order {
            VisitOrder::RowMajor => (0..self.rows)
                .flat_map(|r| (0..self.cols).map(move |c| (r, c)))
                .collect(),
            VisitOrder::ColumnMajor => (0..self.cols)
                .flat_map(|c| (0..self.rows).map(move |r| (r, c)))
                .collect(),
        }
    }

    fn index(&self, row: u32, col: u32) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    fn cell_mut(&mut self, row: u32, col: u32) -> AppResult<&mut GridCell> {
        if row >= self.rows || col >= self.cols {
            return Err(DaqError::Validation(format!(
                "cell ({row}, {col}) is outside the {}x{} holder",
                self.rows, self.cols
            )));
        }
        let index = self.index(row, col);
        Ok(&mut self.cells[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_matches_holder() {
        let grid = SubstrateGrid::new(4, 4, 6).unwrap();
        assert_eq!(grid.substrate_number(0, 0), 13);
        assert_eq!(grid.substrate_number(0, 3), 16);
        assert_eq!(grid.substrate_number(3, 0), 1);
        assert_eq!(grid.substrate_number(3, 3), 4);
        assert_eq!(grid.substrate_number(1, 2), 11);

        let wide = SubstrateGrid::new(2, 3, 1).unwrap();
        assert_eq!(wide.substrate_number(0, 0), 4);
        assert_eq!(wide.substrate_number(1, 2), 3);
    }

    #[test]
    fn skips_unlabelled_and_inactive_cells() {
        let mut grid = SubstrateGrid::new(2, 2, 6).unwrap();
        grid.set_label(0, 1, "A").unwrap();
        grid.set_label(1, 0, "B").unwrap();
        grid.set_label(1, 1, "C").unwrap();
        grid.set_active(1, 0, false).unwrap();

        let labels: Vec<_> = grid.active_cells().into_iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["A", "C"]);
        assert!(grid.set_label(2, 0, "X").is_err());
    }

    #[test]
    fn column_major_order() {
        let grid = SubstrateGrid::new(2, 2, 1)
            .unwrap()
            .with_visit_order(VisitOrder::ColumnMajor)
            .fill_in_order(&["a", "b", "c", "d"])
            .unwrap();
        let cells: Vec<_> = grid
            .active_cells()
            .into_iter()
            .map(|c| (c.row, c.col, c.label))
            .collect();
        assert_eq!(
            cells,
            vec![
                (0, 0, "a".to_string()),
                (1, 0, "b".to_string()),
                (0, 1, "c".to_string()),
                (1, 1, "d".to_string()),
            ]
        );
    }

    #[test]
    fn device_list_is_single_row() {
        let grid = SubstrateGrid::single_row(&["cellA", "cellB"]).unwrap();
        let cells = grid.active_cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].substrate, 2);
        assert_eq!(grid.device_id("cellA", 1), "cellA");

        let multi = SubstrateGrid::new(1, 1, 6).unwrap();
        assert_eq!(multi.device_id("S07", 4), "S074");
    }

    #[test]
    fn rejects_degenerate_grids() {
        assert!(SubstrateGrid::new(0, 4, 6).is_err());
        assert!(SubstrateGrid::new(4, 4, 0).is_err());
        assert!(SubstrateGrid::single_row::<&str>(&[]).is_err());
        assert!(SubstrateGrid::new(1, 1, 1)
            .unwrap()
            .fill_in_order(&["a", "b"])
            .is_err());
    }

    #[test]
    fn oversized_holder_is_a_validation_error() {
        assert!(matches!(
            SubstrateGrid::new(70_000, 70_000, 1),
            Err(DaqError::Validation(_))
        ));
        assert!(matches!(
            SubstrateGrid::new(1, MAX_SLOTS + 1, 1),
            Err(DaqError::Validation(_))
        ));
        assert!(SubstrateGrid::new(1, MAX_SLOTS, 1).is_ok());
    }
}
