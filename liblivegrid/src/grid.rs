use ndarray::Array2;

/// The 2-D intensity accumulator for one run.
///
/// Counter values map to cells row-major and one-based: counter 1 is the
/// top-left cell, counter `cols` ends the first row, counter `rows * cols`
/// is the last cell. The grid never resizes during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    cells: Array2<f64>,
}

impl Grid {
    /// Allocate a zero-initialized grid
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: Array2::zeros((rows, cols)),
        }
    }

    pub fn rows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn cols(&self) -> usize {
        self.cells.ncols()
    }

    /// Map a counter value to a grid coordinate.
    ///
    /// Returns None when the counter falls outside the grid: values below 1
    /// and values beyond `rows * cols` are both out of range.
    pub fn map_counter(&self, counter: i64) -> Option<(usize, usize)> {
        if counter < 1 {
            return None;
        }
        let index = (counter - 1) as usize;
        if index >= self.rows() * self.cols() {
            return None;
        }
        Some((index / self.cols(), index % self.cols()))
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.cells[[row, col]] = value;
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[[row, col]]
    }

    pub fn cells(&self) -> &Array2<f64> {
        &self.cells
    }

    /// True when no cell has been written
    pub fn is_zero(&self) -> bool {
        self.cells.iter().all(|v| *v == 0.0)
    }
}
