//! Mesh topology and neighbor routing.
//!
//! The PE grid is a 2D torus: every edge wraps to the opposite edge, so
//! each PE has exactly four neighbors. Two routing flavors exist and both
//! are part of the instruction set:
//!
//! - **torus** gets wrap around — the whole-field rotation primitive used
//!   by the multiply engine;
//! - **edge** gets do not wrap — a PE on the boundary reads zero from
//!   outside the mesh, which is what makes coordinate derivation work.
//!
//! Dimensions are runtime data, not compile-time constants: all loops in
//! the stack are bounded by a [`MeshTopology`] value.

/// Transfer direction for a neighbor read, named from the reader's side:
/// `North` means "read the value held by the PE above me".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    /// Read from the PE one row up.
    North,
    /// Read from the PE one row down.
    South,
    /// Read from the PE one column right.
    East,
    /// Read from the PE one column left.
    West,
}

/// PE mesh dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshTopology {
    /// PE rows.
    pub rows: usize,
    /// PE columns.
    pub cols: usize,
}

impl MeshTopology {
    /// Create a topology with explicit dimensions.
    #[must_use]
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Square N×N mesh — the shape required by the matrix engine.
    #[must_use]
    pub const fn square(n: usize) -> Self {
        Self { rows: n, cols: n }
    }

    /// Total PE count.
    #[must_use]
    pub const fn cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major cell index of PE (row, col).
    #[must_use]
    pub const fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Inverse of [`MeshTopology::index`].
    #[must_use]
    pub const fn coords(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    /// Torus neighbor of (row, col) in direction `dir`, with wraparound.
    ///
    /// On a 1×1 mesh the sole PE is its own neighbor in every direction.
    #[must_use]
    pub const fn torus_neighbor(&self, row: usize, col: usize, dir: Dir) -> (usize, usize) {
        match dir {
            Dir::North => ((row + self.rows - 1) % self.rows, col),
            Dir::South => ((row + 1) % self.rows, col),
            Dir::East => (row, (col + 1) % self.cols),
            Dir::West => (row, (col + self.cols - 1) % self.cols),
        }
    }

    /// Non-wrapping neighbor of (row, col), or `None` when the read
    /// crosses the mesh boundary. Boundary reads observe zero.
    #[must_use]
    pub const fn edge_neighbor(&self, row: usize, col: usize, dir: Dir) -> Option<(usize, usize)> {
        match dir {
            Dir::North => {
                if row == 0 {
                    None
                } else {
                    Some((row - 1, col))
                }
            }
            Dir::South => {
                if row + 1 == self.rows {
                    None
                } else {
                    Some((row + 1, col))
                }
            }
            Dir::East => {
                if col + 1 == self.cols {
                    None
                } else {
                    Some((row, col + 1))
                }
            }
            Dir::West => {
                if col == 0 {
                    None
                } else {
                    Some((row, col - 1))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_indexing() {
        let mesh = MeshTopology::new(4, 8);
        assert_eq!(mesh.cells(), 32);
        assert_eq!(mesh.index(0, 0), 0);
        assert_eq!(mesh.index(1, 0), 8);
        assert_eq!(mesh.index(3, 7), 31);
        assert_eq!(mesh.coords(17), (2, 1));
    }

    #[test]
    fn torus_wraps_every_edge() {
        let mesh = MeshTopology::square(8);
        assert_eq!(mesh.torus_neighbor(0, 3, Dir::North), (7, 3));
        assert_eq!(mesh.torus_neighbor(7, 3, Dir::South), (0, 3));
        assert_eq!(mesh.torus_neighbor(3, 7, Dir::East), (3, 0));
        assert_eq!(mesh.torus_neighbor(3, 0, Dir::West), (3, 7));
        // interior PEs route normally
        assert_eq!(mesh.torus_neighbor(4, 4, Dir::East), (4, 5));
    }

    #[test]
    fn edge_reads_stop_at_boundary() {
        let mesh = MeshTopology::square(8);
        assert_eq!(mesh.edge_neighbor(0, 3, Dir::North), None);
        assert_eq!(mesh.edge_neighbor(7, 3, Dir::South), None);
        assert_eq!(mesh.edge_neighbor(3, 7, Dir::East), None);
        assert_eq!(mesh.edge_neighbor(3, 0, Dir::West), None);
        assert_eq!(mesh.edge_neighbor(1, 1, Dir::North), Some((0, 1)));
    }

    #[test]
    fn degenerate_mesh_is_its_own_neighbor() {
        let mesh = MeshTopology::square(1);
        for dir in [Dir::North, Dir::South, Dir::East, Dir::West] {
            assert_eq!(mesh.torus_neighbor(0, 0, dir), (0, 0));
            assert_eq!(mesh.edge_neighbor(0, 0, dir), None);
        }
    }
}
