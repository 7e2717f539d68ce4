use std::collections::VecDeque;

/// Which side of an axis an edit applies to: top/left or bottom/right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Start,
    End,
}

/// A rectangular block of cells stored as a deque of rows.
///
/// Every row always has the same length and there is always at least one
/// cell. Rows and columns can be added or removed at either edge in O(height)
/// at most. Misuse (wrong row length, removing the last row) panics; callers
/// are expected to check dimensions first.
#[derive(Debug, Clone)]
pub struct TileRows<T> {
    rows: VecDeque<VecDeque<T>>,
}

/// One cell in row-major order.
#[derive(Debug)]
pub struct RowCell<'a, T> {
    pub row: usize,
    pub column: usize,
    pub item: &'a T,
    /// Last cell of its row.
    pub end_of_line: bool,
}

impl<T> TileRows<T> {
    pub fn single(item: T) -> Self {
        let mut row = VecDeque::with_capacity(1);
        row.push_back(item);
        let mut rows = VecDeque::with_capacity(1);
        rows.push_back(row);
        Self { rows }
    }

    pub fn width(&self) -> usize {
        self.rows.front().map_or(0, VecDeque::len)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn len(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-left cell.
    pub fn first(&self) -> &T {
        self.rows
            .front()
            .and_then(VecDeque::front)
            .expect("tile rows are never empty")
    }

    /// Bottom-right cell.
    pub fn last(&self) -> &T {
        self.rows
            .back()
            .and_then(VecDeque::back)
            .expect("tile rows are never empty")
    }

    pub fn get(&self, row: usize, column: usize) -> Option<&T> {
        self.rows.get(row).and_then(|cells| cells.get(column))
    }

    pub fn push_row(&mut self, edge: Edge, row: Vec<T>) {
        assert_eq!(
            row.len(),
            self.width(),
            "new row length must match the window width"
        );
        let row = VecDeque::from(row);
        match edge {
            Edge::Start => self.rows.push_front(row),
            Edge::End => self.rows.push_back(row),
        }
    }

    pub fn pop_row(&mut self, edge: Edge) -> Vec<T> {
        assert!(self.height() > 1, "cannot remove the last row");
        let row = match edge {
            Edge::Start => self.rows.pop_front(),
            Edge::End => self.rows.pop_back(),
        };
        row.expect("height checked above").into()
    }

    /// Adds one cell to every row; `column[i]` goes into row `i`.
    pub fn push_column(&mut self, edge: Edge, column: Vec<T>) {
        assert_eq!(
            column.len(),
            self.height(),
            "new column length must match the window height"
        );
        for (row, item) in self.rows.iter_mut().zip(column) {
            match edge {
                Edge::Start => row.push_front(item),
                Edge::End => row.push_back(item),
            }
        }
    }

    pub fn pop_column(&mut self, edge: Edge) -> Vec<T> {
        assert!(self.width() > 1, "cannot remove the last column");
        self.rows
            .iter_mut()
            .map(|row| {
                let item = match edge {
                    Edge::Start => row.pop_front(),
                    Edge::End => row.pop_back(),
                };
                item.expect("width checked above")
            })
            .collect()
    }

    /// Collapses to a single cell holding `item` and returns the old cells in
    /// row-major order.
    pub fn replace_all(&mut self, item: T) -> Vec<T> {
        let previous = std::mem::replace(self, Self::single(item));
        previous.rows.into_iter().flatten().collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = &VecDeque<T>> + '_ {
        self.rows.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowCell<'_, T>> + '_ {
        self.rows.iter().enumerate().flat_map(|(row_index, row)| {
            let last_column = row.len() - 1;
            row.iter()
                .enumerate()
                .map(move |(column, item)| RowCell {
                    row: row_index,
                    column,
                    item,
                    end_of_line: column == last_column,
                })
        })
    }
}
