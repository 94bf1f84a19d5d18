//! Provides the [`BinGrid`] struct.

use super::convert;
use crate::error::{Error, Result};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Componentwise tolerance for deciding that two anchor points are the same.
const REFERENCE_EPS: f64 = 1e-5;

/// Cap on the number of out-of-range warnings emitted while painting.
const MAX_PAINT_WARNINGS: u32 = 10;

/// Dense 3-D boolean voxel field anchored at a reference point.
///
/// A world-space position `p` maps to the cell
/// `floor((p - reference) / cell_size) + offset` on each axis, where
/// `offset = bin_max + 1` and `bin_max = ceil(max_distance / cell_size)`.
/// Valid cells lie in `[1, 2 * bin_max]` per axis, so the grid covers a cube
/// of edge length `2 * max_distance` centered on the reference point.
///
/// Occupancy is one bit per voxel; at the default geometry (55 A at 0.1 A
/// resolution) the field holds 1.3e9 voxels, so a byte per voxel would not
/// fit in memory.
#[derive(Clone, Deserialize, Serialize)]
pub struct BinGrid {
    reference: [f64; 3],
    max_distance: f64,
    cell_size: f64,
    bin_max: i64,
    offset: i64,
    bits: Vec<u64>,
    painted_out_of_range: u64,
    #[serde(skip)]
    paint_warnings: u32,
}

impl BinGrid {
    /// Constructs an empty grid anchored at `reference`.
    ///
    /// # Panics
    ///
    /// Panics if `cell_size` is not positive or if `max_distance` is smaller
    /// than one cell.
    #[must_use]
    pub fn new(reference: [f64; 3], max_distance: f64, cell_size: f64) -> Self {
        assert!(cell_size > 0.0);
        assert!(max_distance >= cell_size);

        let bin_max = convert::i64_from_f64((max_distance / cell_size).ceil());
        let edge = usize::try_from(2 * bin_max).unwrap();
        let total = edge * edge * edge;

        Self {
            reference,
            max_distance,
            cell_size,
            bin_max,
            offset: bin_max + 1,
            bits: vec![0; total.div_ceil(64)],
            painted_out_of_range: 0,
            paint_warnings: 0,
        }
    }

    /// Checks that `reference` agrees with the anchor this grid was built
    /// with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReferenceMismatch`] if any component differs by more
    /// than the tolerance.
    pub fn check_reference(&self, reference: [f64; 3]) -> Result<()> {
        let agrees = self
            .reference
            .iter()
            .zip(&reference)
            .all(|(a, b)| (a - b).abs() <= REFERENCE_EPS);

        if agrees {
            Ok(())
        } else {
            Err(Error::ReferenceMismatch {
                got: reference,
                expected: self.reference,
            })
        }
    }

    /// Returns the anchor point of this grid.
    #[must_use]
    pub const fn reference(&self) -> [f64; 3] {
        self.reference
    }

    /// Returns the half-extent of the cube this grid covers.
    #[must_use]
    pub const fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Returns the edge length of one voxel.
    #[must_use]
    pub const fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Returns the largest 1-based cell index on each axis.
    #[must_use]
    pub const fn edge_cells(&self) -> i64 {
        2 * self.bin_max
    }

    /// Maps a world-space position to its (possibly out-of-range) cell.
    #[must_use]
    pub fn cell_of(&self, position: [f64; 3]) -> [i64; 3] {
        let mut cell = [0_i64; 3];
        for axis in 0..3 {
            let relative = position[axis] - self.reference[axis];
            let mut index = convert::i64_from_f64(relative / self.cell_size);
            if relative < 0.0 {
                index -= 1;
            }
            cell[axis] = index + self.offset;
        }
        cell
    }

    /// Returns the world-space center of `cell`.
    #[must_use]
    pub fn cell_center(&self, cell: [i64; 3]) -> [f64; 3] {
        let mut center = [0.0; 3];
        for axis in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let steps = (cell[axis] - self.offset) as f64;
            center[axis] = (steps + 0.5).mul_add(self.cell_size, self.reference[axis]);
        }
        center
    }

    /// Returns `true` if `cell` lies inside the grid.
    #[must_use]
    pub fn in_range(&self, cell: [i64; 3]) -> bool {
        cell.iter().all(|&c| c >= 1 && c <= 2 * self.bin_max)
    }

    /// Returns `true` if the in-range `cell` is occupied.
    ///
    /// # Panics
    ///
    /// Panics if `cell` is out of range.
    #[must_use]
    pub fn occupied(&self, cell: [i64; 3]) -> bool {
        assert!(
            self.in_range(cell),
            "cell {cell:?} is out of range for a grid of {} cells per edge",
            self.edge_cells()
        );
        let index = self.ravel(cell);
        self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    /// Returns `true` if `position` falls on an occupied voxel. Positions
    /// outside the grid are unoccupied by definition.
    #[must_use]
    pub fn occupied_world(&self, position: [f64; 3]) -> bool {
        let cell = self.cell_of(position);
        self.in_range(cell) && self.occupied(cell)
    }

    /// Marks the in-range `cell` as occupied.
    ///
    /// # Panics
    ///
    /// Panics if `cell` is out of range.
    pub fn mark(&mut self, cell: [i64; 3]) {
        assert!(
            self.in_range(cell),
            "cell {cell:?} is out of range for a grid of {} cells per edge",
            self.edge_cells()
        );
        let index = self.ravel(cell);
        self.bits[index / 64] |= 1 << (index % 64);
    }

    /// Marks every voxel whose center lies within `radius` of `center`.
    /// Voxels falling outside the grid are skipped; the first few skips are
    /// logged.
    pub fn paint_sphere(&mut self, center: [f64; 3], radius: f64) {
        if radius <= 0.0 {
            return;
        }

        let center_cell = self.cell_of(center);
        let span = convert::i64_from_f64((radius + self.cell_size) / self.cell_size);
        let radius_sq = radius * radius;

        for dx in -span..=span {
            for dy in -span..=span {
                for dz in -span..=span {
                    let cell = [center_cell[0] + dx, center_cell[1] + dy, center_cell[2] + dz];

                    if !self.in_range(cell) {
                        self.painted_out_of_range += 1;
                        if self.paint_warnings < MAX_PAINT_WARNINGS {
                            self.paint_warnings += 1;
                            log::warn!(
                                "skipping out-of-range voxel {cell:?} while painting sphere at \
                                 {center:?} (warning {} of {MAX_PAINT_WARNINGS})",
                                self.paint_warnings
                            );
                        }
                        continue;
                    }

                    let voxel_center = self.cell_center(cell);
                    let dist_sq: f64 = voxel_center
                        .iter()
                        .zip(&center)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();

                    if dist_sq < radius_sq {
                        let index = self.ravel(cell);
                        self.bits[index / 64] |= 1 << (index % 64);
                    }
                }
            }
        }
    }

    /// Returns the number of occupied voxels.
    #[must_use]
    pub fn occupied_cell_count(&self) -> usize {
        self.bits
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Returns the total number of voxels.
    #[must_use]
    pub fn total_cell_count(&self) -> usize {
        let edge = usize::try_from(self.edge_cells()).unwrap();
        edge * edge * edge
    }

    /// Returns the number of voxels that fell outside the grid during
    /// painting.
    #[must_use]
    pub const fn painted_out_of_range(&self) -> u64 {
        self.painted_out_of_range
    }

    /// Writes one `x y z` line per occupied voxel center, for external
    /// visualization of the painted volume.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn dump_occupied(&self, mut writer: impl Write) -> Result<()> {
        for index in 0..self.total_cell_count() {
            if self.bits[index / 64] & (1 << (index % 64)) == 0 {
                continue;
            }
            let center = self.cell_center(self.unravel(index));
            writeln!(writer, "{} {} {}", center[0], center[1], center[2])
                .map_err(anyhow::Error::new)?;
        }
        Ok(())
    }

    /// Constructs a grid by deserializing an LZ4-framed snapshot from
    /// `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the stream or deserializing fails.
    pub fn read(reader: impl Read) -> Result<Self> {
        let decoder = FrameDecoder::new(reader);
        bincode::deserialize_from(decoder)
            .map_err(|err| Error::Other(anyhow::Error::new(err)))
    }

    /// Serializes this grid as an LZ4-framed snapshot into `writer`, so an
    /// expensive bake can be reused across runs.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write(&self, writer: impl Write) -> Result<()> {
        let mut encoder = FrameEncoder::new(writer);
        bincode::serialize_into(&mut encoder, self)
            .map_err(|err| Error::Other(anyhow::Error::new(err)))?;
        encoder
            .finish()
            .map(|_| ())
            .map_err(|err| Error::Other(anyhow::Error::new(err)))
    }

    /// Converts an in-range cell into a flat bit index.
    fn ravel(&self, cell: [i64; 3]) -> usize {
        let edge = 2 * self.bin_max;
        let flat = ((cell[0] - 1) * edge + (cell[1] - 1)) * edge + (cell[2] - 1);
        usize::try_from(flat).unwrap()
    }

    /// Converts a flat bit index back into a 1-based cell.
    fn unravel(&self, index: usize) -> [i64; 3] {
        let edge = usize::try_from(2 * self.bin_max).unwrap();
        let z = index % edge;
        let y = (index / edge) % edge;
        let x = index / (edge * edge);
        [
            i64::try_from(x).unwrap() + 1,
            i64::try_from(y).unwrap() + 1,
            i64::try_from(z).unwrap() + 1,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_of_matches_reference_table() {
        // for max_distance = 50 and cell = 0.1: offset = 501 and positions
        // -49.95, -0.05, 0.05, 49.95 land on cells 1, 500, 501, 1000
        let grid = BinGrid::new([0.0; 3], 50.0, 0.1);

        assert_eq!(grid.cell_of([-49.95, 0.0, 0.0])[0], 1);
        assert_eq!(grid.cell_of([-0.05, 0.0, 0.0])[0], 500);
        assert_eq!(grid.cell_of([0.05, 0.0, 0.0])[0], 501);
        assert_eq!(grid.cell_of([49.95, 0.0, 0.0])[0], 1000);
        assert_eq!(grid.edge_cells(), 1000);
    }

    #[test]
    fn cell_center_inverts_cell_of() {
        let grid = BinGrid::new([1.5, -2.0, 0.25], 10.0, 0.1);

        for position in [[3.07, -4.22, 1.11], [-5.0, 2.5, -0.3], [0.0, 0.0, 0.0]] {
            let cell = grid.cell_of(position);
            let center = grid.cell_center(cell);
            for axis in 0..3 {
                assert!((center[axis] - position[axis]).abs() <= grid.cell_size() / 2.0 + 1e-12);
            }
            assert_eq!(grid.cell_of(center), cell);
        }
    }

    #[test]
    fn paint_sphere_marks_voxels_within_radius() {
        let mut grid = BinGrid::new([0.0; 3], 10.0, 0.1);
        grid.paint_sphere([0.0; 3], 1.9);

        assert!(grid.occupied_world([0.0, 0.0, 0.0]));
        assert!(grid.occupied_world([1.5, 0.0, 0.0]));
        assert!(grid.occupied_world([0.0, -1.5, 0.0]));
        assert!(!grid.occupied_world([3.0, 0.0, 0.0]));
        assert!(!grid.occupied_world([1.5, 1.5, 0.0]));
    }

    #[test]
    fn positions_outside_the_grid_are_unoccupied() {
        let mut grid = BinGrid::new([0.0; 3], 10.0, 0.1);
        grid.paint_sphere([0.0; 3], 1.9);

        assert!(!grid.occupied_world([50.0, 0.0, 0.0]));
        assert!(!grid.occupied_world([0.0, -11.0, 0.0]));
    }

    #[test]
    fn painting_near_the_boundary_skips_out_of_range_voxels() {
        let mut grid = BinGrid::new([0.0; 3], 5.0, 0.1);
        grid.paint_sphere([4.9, 0.0, 0.0], 1.0);

        assert!(grid.painted_out_of_range() > 0);
        assert!(grid.occupied_world([4.5, 0.0, 0.0]));
    }

    #[test]
    fn successive_paints_equal_painting_the_union() {
        let spheres = [([1.0, 0.0, 0.0], 1.2), ([-1.0, 0.5, 0.0], 0.9)];

        let mut separate = BinGrid::new([0.0; 3], 5.0, 0.1);
        separate.paint_sphere(spheres[0].0, spheres[0].1);
        separate.paint_sphere(spheres[1].0, spheres[1].1);

        let mut union = BinGrid::new([0.0; 3], 5.0, 0.1);
        for (center, radius) in spheres {
            union.paint_sphere(center, radius);
        }

        assert_eq!(separate.occupied_cell_count(), union.occupied_cell_count());
        for probe in [[1.5, 0.0, 0.0], [-1.2, 0.7, 0.1], [0.0, 0.0, 2.0]] {
            assert_eq!(separate.occupied_world(probe), union.occupied_world(probe));
        }
    }

    #[test]
    fn check_reference_accepts_matching_anchor() {
        let grid = BinGrid::new([1.0, 2.0, 3.0], 5.0, 0.1);

        assert!(grid.check_reference([1.0, 2.0, 3.0]).is_ok());
        assert!(grid.check_reference([1.0 + 1e-6, 2.0, 3.0]).is_ok());
    }

    #[test]
    fn check_reference_rejects_different_anchor() {
        let grid = BinGrid::new([1.0, 2.0, 3.0], 5.0, 0.1);

        let err = grid.check_reference([1.1, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, crate::error::Error::ReferenceMismatch { .. }));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut grid = BinGrid::new([0.5, 0.0, -0.5], 3.0, 0.1);
        grid.paint_sphere([0.0; 3], 1.0);

        let mut buffer = Vec::new();
        grid.write(&mut buffer).unwrap();
        let restored = BinGrid::read(buffer.as_slice()).unwrap();

        assert_eq!(restored.reference(), grid.reference());
        assert_eq!(restored.occupied_cell_count(), grid.occupied_cell_count());
        assert!(restored.occupied_world([0.5, 0.0, 0.0]));
    }
}
