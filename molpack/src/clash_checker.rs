//! Fast van-der-Waals repulsion screening against a static scene.
//!
//! The exclusion volume of every fixed atom is pre-baked into a
//! [`BinGrid`], after which a clash test for a moving fragment is one
//! boolean array load per moving atom, independent of the fixed atom count.

use crate::bin_grid::BinGrid;
use crate::error::Result;
use crate::superimpose;
use std::cell::Cell;

/// Atom names treated as part of a moving phosphate group when painting
/// with the prepend exclusion enabled.
const MOVING_PHOSPHATE_ATOMS: [&str; 6] = ["P", "OP1", "OP2", "O5'", "H5'", "H5''"];

/// Cap on the number of out-of-range query warnings.
const MAX_QUERY_WARNINGS: u32 = 10;

/// One atom of the static scene to be painted into the grid.
#[derive(Clone, Debug)]
pub struct SceneAtom {
    /// 1-based residue index within the scene.
    pub residue: usize,
    /// Atom name; compared with surrounding whitespace stripped.
    pub name: String,
    /// World-space position.
    pub xyz: [f64; 3],
    /// Van-der-Waals radius used for painting.
    pub vdw_radius: f64,
    /// Virtualized atoms neither paint nor clash.
    pub is_virtual: bool,
}

/// One atom of a moving fragment to be screened against the grid.
#[derive(Clone, Copy, Debug)]
pub struct MovingAtom {
    /// World-space position.
    pub xyz: [f64; 3],
    /// Virtualized atoms are skipped by every screen.
    pub is_virtual: bool,
}

/// Tunable parameters of the repulsion screen.
#[derive(Clone, Copy, Debug)]
pub struct ClashParams {
    /// Half-extent of the grid cube around the reference point.
    pub max_distance: f64,
    /// Voxel edge length.
    pub cell_size: f64,
    /// Radius assumed for every moving atom.
    pub moving_atom_radius: f64,
    /// Two atoms may approach to the sum of their radii minus this value
    /// before the pair counts as clashing.
    pub clash_cutoff: f64,
    /// Number of clashing atoms required before a fragment fails the
    /// screen.
    pub num_clash_atom_cutoff: usize,
    /// Atom-atom distance cutoff of the exact (grid-free) screen.
    pub physical_clash_cutoff: f64,
    /// Whether out-of-range moving atoms are tolerated (non-clash) or
    /// fatal.
    pub tolerate_out_of_range: bool,
    /// Retain the painted scene atoms to serve the exact screen.
    pub keep_scene: bool,
}

impl Default for ClashParams {
    fn default() -> Self {
        Self {
            max_distance: 55.0,
            cell_size: 0.1,
            moving_atom_radius: 1.0,
            clash_cutoff: 0.8,
            num_clash_atom_cutoff: 3,
            physical_clash_cutoff: 1.2,
            tolerate_out_of_range: true,
            keep_scene: false,
        }
    }
}

/// Builder and query interface over a baked repulsion grid.
pub struct VdwBinChecker {
    params: ClashParams,
    grid: Option<BinGrid>,
    scene: Vec<SceneAtom>,
    out_of_range_queries: Cell<u64>,
    query_warnings: Cell<u32>,
}

impl VdwBinChecker {
    /// Constructs an un-built checker with the given parameters.
    #[must_use]
    pub const fn new(params: ClashParams) -> Self {
        Self {
            params,
            grid: None,
            scene: Vec::new(),
            out_of_range_queries: Cell::new(0),
            query_warnings: Cell::new(0),
        }
    }

    /// Returns the parameters this checker was built with.
    #[must_use]
    pub const fn params(&self) -> &ClashParams {
        &self.params
    }

    /// Returns the baked grid, once built.
    #[must_use]
    pub const fn grid(&self) -> Option<&BinGrid> {
        self.grid.as_ref()
    }

    /// Paints the exclusion volume of `scene` into the grid, creating the
    /// grid on the first call. Residues listed in `ignore_residues` are
    /// skipped entirely, as are virtualized atoms.
    ///
    /// With `prepend_exclusion` set, the phosphate-group atoms of a residue
    /// directly following an ignored residue are also skipped; they move
    /// with the sampled fragment and must not count as fixed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::ReferenceMismatch`] if a prior paint
    /// used a different `reference` anchor.
    pub fn paint_scene(
        &mut self,
        scene: &[SceneAtom],
        ignore_residues: &[usize],
        prepend_exclusion: bool,
        reference: [f64; 3],
    ) -> Result<()> {
        let params = self.params;
        let grid = self
            .grid
            .get_or_insert_with(|| BinGrid::new(reference, params.max_distance, params.cell_size));
        grid.check_reference(reference)?;

        // distance from the voxel center to its corner, doubled because the
        // binning error applies to both atoms of a pair
        let binning_error = 2.0 * (params.cell_size / 2.0) * 3.0_f64.sqrt();

        for atom in scene {
            if atom.is_virtual || ignore_residues.contains(&atom.residue) {
                continue;
            }

            if prepend_exclusion
                && atom.residue >= 1
                && ignore_residues.contains(&(atom.residue - 1))
                && MOVING_PHOSPHATE_ATOMS.contains(&atom.name.trim())
            {
                continue;
            }

            let paint_radius = atom.vdw_radius + params.moving_atom_radius
                - params.clash_cutoff
                - binning_error;
            grid.paint_sphere(atom.xyz, paint_radius);
        }

        if params.keep_scene {
            self.scene.extend(scene.iter().cloned());
        }

        Ok(())
    }

    /// Counts moving atoms that land on occupied voxels, short-circuiting
    /// once the clash cutoff is reached.
    ///
    /// Out-of-range atoms count as non-clash under the tolerant policy and
    /// abort otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the grid has not been built, or on an out-of-range atom
    /// under the strict policy.
    #[must_use]
    pub fn clash_count(&self, moving: &[MovingAtom]) -> usize {
        let grid = self
            .grid
            .as_ref()
            .expect("clash query before any scene was painted");

        let mut count = 0;
        for atom in moving {
            if atom.is_virtual {
                continue;
            }

            let cell = grid.cell_of(atom.xyz);
            if !grid.in_range(cell) {
                self.note_out_of_range(atom.xyz);
                continue;
            }

            if grid.occupied(cell) {
                count += 1;
                if count >= self.params.num_clash_atom_cutoff {
                    return count;
                }
            }
        }
        count
    }

    /// Returns `true` if the moving fragment fails the repulsion screen.
    ///
    /// # Panics
    ///
    /// Panics if the grid has not been built.
    #[must_use]
    pub fn is_clash(&self, moving: &[MovingAtom]) -> bool {
        self.clash_count(moving) >= self.params.num_clash_atom_cutoff
    }

    /// Exact distance screen against the retained scene atoms, for callers
    /// whose frame may have drifted off the grid anchor (e.g. during
    /// gradient-based minimization).
    ///
    /// # Panics
    ///
    /// Panics if the checker was not configured with `keep_scene`.
    #[must_use]
    pub fn clash_exact(&self, moving: &[MovingAtom]) -> bool {
        assert!(
            self.params.keep_scene,
            "exact screen requires keep_scene at build time"
        );
        self.clash_exact_against(&self.scene, moving)
    }

    /// Exact distance screen of `moving` against an explicit `scene`,
    /// bypassing the grid entirely.
    #[must_use]
    pub fn clash_exact_against(&self, scene: &[SceneAtom], moving: &[MovingAtom]) -> bool {
        let cutoff_sq = self.params.physical_clash_cutoff * self.params.physical_clash_cutoff;

        let mut count = 0;
        for atom in moving {
            if atom.is_virtual {
                continue;
            }

            let contact = scene.iter().any(|fixed| {
                !fixed.is_virtual && distance_squared(fixed.xyz, atom.xyz) < cutoff_sq
            });

            if contact {
                count += 1;
                if count >= self.params.num_clash_atom_cutoff {
                    return true;
                }
            }
        }
        false
    }

    /// Returns how many query atoms have fallen outside the grid so far.
    #[must_use]
    pub fn out_of_range_queries(&self) -> u64 {
        self.out_of_range_queries.get()
    }

    fn note_out_of_range(&self, position: [f64; 3]) {
        self.out_of_range_queries
            .set(self.out_of_range_queries.get() + 1);

        let warned = self.query_warnings.get();
        if warned < MAX_QUERY_WARNINGS {
            self.query_warnings.set(warned + 1);
            log::warn!(
                "moving atom at {position:?} is outside the repulsion grid \
                 (warning {} of {MAX_QUERY_WARNINGS})",
                warned + 1
            );
        }

        assert!(
            self.params.tolerate_out_of_range,
            "moving atom at {position:?} is outside the repulsion grid"
        );
    }
}

/// Superimposes `mobile` onto `fixed` using the atoms of the given
/// `(mobile_residue, fixed_residue)` pairs, matched by stripped atom name,
/// and transforms every mobile atom in place.
///
/// # Errors
///
/// Returns [`crate::error::Error::AlignmentOutOfTolerance`] if any matched
/// landmark pair remains farther apart than the alignment tolerance.
///
/// # Panics
///
/// Panics if no landmark atoms could be matched.
pub fn align_scene(
    fixed: &[SceneAtom],
    mobile: &mut [SceneAtom],
    residue_pairs: &[(usize, usize)],
) -> Result<f64> {
    let mut landmark_pairs = Vec::new();
    for &(mobile_res, fixed_res) in residue_pairs {
        for (m_idx, m_atom) in mobile.iter().enumerate() {
            if m_atom.residue != mobile_res || m_atom.is_virtual {
                continue;
            }
            let matched = fixed.iter().position(|f_atom| {
                f_atom.residue == fixed_res
                    && !f_atom.is_virtual
                    && f_atom.name.trim() == m_atom.name.trim()
            });
            if let Some(f_idx) = matched {
                landmark_pairs.push((m_idx, f_idx));
            }
        }
    }

    let fixed_points: Vec<[f64; 3]> = fixed.iter().map(|a| a.xyz).collect();
    let mut mobile_points: Vec<[f64; 3]> = mobile.iter().map(|a| a.xyz).collect();

    let rmsd = superimpose::align_onto(&fixed_points, &mut mobile_points, &landmark_pairs)?;

    for (atom, point) in mobile.iter_mut().zip(mobile_points) {
        atom.xyz = point;
    }

    Ok(rmsd)
}

fn distance_squared(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_atom(residue: usize, name: &str, xyz: [f64; 3], vdw: f64) -> SceneAtom {
        SceneAtom {
            residue,
            name: name.to_owned(),
            xyz,
            vdw_radius: vdw,
            is_virtual: false,
        }
    }

    fn moving(xyz: [f64; 3]) -> MovingAtom {
        MovingAtom {
            xyz,
            is_virtual: false,
        }
    }

    fn small_params() -> ClashParams {
        ClashParams {
            max_distance: 10.0,
            num_clash_atom_cutoff: 1,
            ..ClashParams::default()
        }
    }

    #[test]
    fn single_sphere_screen() {
        let mut checker = VdwBinChecker::new(small_params());
        checker
            .paint_scene(
                &[scene_atom(1, " C  ", [0.0; 3], 1.7)],
                &[],
                false,
                [0.0; 3],
            )
            .unwrap();

        assert!(checker.is_clash(&[moving([1.5, 0.0, 0.0])]));
        assert!(!checker.is_clash(&[moving([3.0, 0.0, 0.0])]));
        // out of range counts as non-clash under the tolerant policy
        assert!(!checker.is_clash(&[moving([50.0, 0.0, 0.0])]));
        assert_eq!(checker.out_of_range_queries(), 1);
    }

    #[test]
    fn count_cutoff_gates_the_verdict() {
        let params = ClashParams {
            max_distance: 10.0,
            num_clash_atom_cutoff: 3,
            ..ClashParams::default()
        };
        let mut checker = VdwBinChecker::new(params);
        checker
            .paint_scene(
                &[scene_atom(1, " C  ", [0.0; 3], 1.7)],
                &[],
                false,
                [0.0; 3],
            )
            .unwrap();

        let inside = [
            moving([0.5, 0.0, 0.0]),
            moving([0.0, 0.5, 0.0]),
            moving([0.0, 0.0, 0.5]),
        ];

        assert_eq!(checker.clash_count(&inside[..1]), 1);
        assert!(!checker.is_clash(&inside[..1]));
        assert_eq!(checker.clash_count(&inside[..2]), 2);
        assert!(!checker.is_clash(&inside[..2]));
        assert_eq!(checker.clash_count(&inside), 3);
        assert!(checker.is_clash(&inside));
    }

    #[test]
    fn virtual_and_ignored_atoms_do_not_paint() {
        let mut checker = VdwBinChecker::new(small_params());
        let mut ghost = scene_atom(1, " C  ", [0.0; 3], 1.7);
        ghost.is_virtual = true;
        checker
            .paint_scene(
                &[ghost, scene_atom(2, " N  ", [5.0, 0.0, 0.0], 1.55)],
                &[2],
                false,
                [0.0; 3],
            )
            .unwrap();

        assert_eq!(checker.grid().unwrap().occupied_cell_count(), 0);
    }

    #[test]
    fn prepend_exclusion_skips_phosphate_atoms() {
        let mut checker = VdwBinChecker::new(small_params());
        checker
            .paint_scene(
                &[
                    scene_atom(3, " P  ", [0.0; 3], 1.9),
                    scene_atom(3, " C4'", [5.0, 0.0, 0.0], 1.7),
                ],
                &[2],
                true,
                [0.0; 3],
            )
            .unwrap();

        // the phosphate adjacent to the ignored residue was not painted
        assert!(!checker.is_clash(&[moving([0.0; 3])]));
        assert!(checker.is_clash(&[moving([5.0, 0.0, 0.0])]));
    }

    #[test]
    fn second_scene_must_share_the_anchor() {
        let mut checker = VdwBinChecker::new(small_params());
        checker
            .paint_scene(&[scene_atom(1, " C  ", [0.0; 3], 1.7)], &[], false, [0.0; 3])
            .unwrap();

        let err = checker
            .paint_scene(
                &[scene_atom(1, " O  ", [1.0, 0.0, 0.0], 1.5)],
                &[],
                false,
                [1.0, 0.0, 0.0],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::ReferenceMismatch { .. }
        ));

        // painting a second scene with the matching anchor extends the grid
        checker
            .paint_scene(
                &[scene_atom(1, " O  ", [4.0, 0.0, 0.0], 1.5)],
                &[],
                false,
                [0.0; 3],
            )
            .unwrap();
        assert!(checker.is_clash(&[moving([4.0, 0.0, 0.0])]));
    }

    #[test]
    fn exact_screen_uses_the_kept_scene() {
        let params = ClashParams {
            max_distance: 10.0,
            num_clash_atom_cutoff: 1,
            keep_scene: true,
            ..ClashParams::default()
        };
        let mut checker = VdwBinChecker::new(params);
        checker
            .paint_scene(&[scene_atom(1, " C  ", [0.0; 3], 1.7)], &[], false, [0.0; 3])
            .unwrap();

        assert!(checker.clash_exact(&[moving([1.0, 0.0, 0.0])]));
        assert!(!checker.clash_exact(&[moving([1.5, 0.0, 0.0])]));
    }

    #[test]
    fn align_scene_matches_atoms_by_name() {
        let fixed = vec![
            scene_atom(1, " N  ", [0.0, 0.0, 0.0], 1.55),
            scene_atom(1, " CA ", [1.5, 0.0, 0.0], 1.7),
            scene_atom(1, " C  ", [2.0, 1.4, 0.0], 1.7),
        ];
        // same residue, rotated 90 degrees about z and shifted
        let mut mobile = vec![
            scene_atom(1, " CA ", [-0.0, 1.5, 3.0], 1.7),
            scene_atom(1, " C  ", [-1.4, 2.0, 3.0], 1.7),
            scene_atom(1, " N  ", [0.0, 0.0, 3.0], 1.55),
        ];

        let rmsd = align_scene(&fixed, &mut mobile, &[(1, 1)]).unwrap();

        assert!(rmsd < 1e-9);
        for atom in &mobile {
            let matched = fixed
                .iter()
                .find(|f| f.name.trim() == atom.name.trim())
                .unwrap();
            for axis in 0..3 {
                assert!((atom.xyz[axis] - matched.xyz[axis]).abs() < 1e-9);
            }
        }
    }
}
