//! Residue construction: typed residues from grouped PDB records.

use crate::error::{Error, Result};
use crate::file_data::{FileData, ParseOptions, ResidueRecord};
use crate::residue_type::{ResidueType, ResidueTypeSet, VariantFlags};
use rustc_hash::FxHashMap;

/// Chain-gap length above which a polymer continuation is treated as
/// missing density.
const MISSING_DENSITY_GAP: f64 = 3.0;

/// Offset used when placing an atom whose coordinates are absent.
const FILL_OFFSET: f64 = 1.5;

/// What to do with residues whose 3-letter code has no type-set match.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UnrecognizedPolicy {
    /// Skip the residue with a warning.
    #[default]
    Skip,
    /// Collect the residue into [`Pose::unrecognized`] for later
    /// inspection.
    Remember,
    /// Fail the build.
    Fail,
}

/// Options steering the pose build.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOptions {
    /// Options for the residue-grouping pass over the file data.
    pub parse: ParseOptions,
    /// Fail instead of skipping a residue with an unbuildable mainchain.
    pub exit_if_missing_heavy_atoms: bool,
    /// Keep protonation-variant candidates in play.
    pub keep_input_protonation_state: bool,
    /// Treat a long bond gap between consecutive polymer residues as
    /// missing density: connect by jump and mark truncation variants.
    pub missing_dens_as_jump: bool,
    /// Policy for unmatched 3-letter codes.
    pub unrecognized: UnrecognizedPolicy,
}

/// One atom of a constructed residue.
#[derive(Clone, Debug)]
pub struct PoseAtom {
    /// Whitespace-stripped atom name, in residue-type declaration order.
    pub name: String,
    /// World-space position.
    pub xyz: [f64; 3],
    /// True if the input had no coordinates for this atom and the position
    /// was filled by geometry.
    pub missing: bool,
}

/// One constructed residue.
#[derive(Clone, Debug)]
pub struct PoseResidue {
    /// Name of the selected residue type.
    pub type_name: String,
    /// 3-letter code from the input record.
    pub name3: String,
    /// Fixed-width residue key of the input record.
    pub res_id: String,
    /// Chain id of the input record.
    pub chain_id: char,
    /// PDB sequence number of the input record.
    pub pdb_seq: i32,
    /// Insertion code of the input record.
    pub i_code: char,
    /// Atoms in type declaration order.
    pub atoms: Vec<PoseAtom>,
    /// True when this residue continues the previous one by bond.
    pub bonded_to_previous: bool,
    /// Final variant set, including post-pass termini.
    pub variants: VariantFlags,
    /// Whether the selected type is a polymer.
    pub is_polymer: bool,
}

impl PoseResidue {
    /// Returns the position of `atom_name` (whitespace ignored), if the
    /// residue has it.
    #[must_use]
    pub fn atom_xyz(&self, atom_name: &str) -> Option<[f64; 3]> {
        let stripped = atom_name.trim();
        self.atoms
            .iter()
            .find(|atom| atom.name == stripped)
            .map(|atom| atom.xyz)
    }
}

/// A residue the build could not recognize, kept for inspection.
#[derive(Clone, Debug)]
pub struct UnrecognizedRecord {
    /// 1-based residue position in file order.
    pub position: usize,
    /// The unmatched 3-letter code.
    pub code: String,
    /// The atoms of the offending residue.
    pub atoms: Vec<(String, [f64; 3])>,
}

/// A LINK-derived inter-residue connection.
#[derive(Clone, Debug)]
pub struct Connection {
    /// Index of the first residue.
    pub residue1: usize,
    /// Atom name at the first residue.
    pub atom1: String,
    /// Index of the second residue.
    pub residue2: usize,
    /// Atom name at the second residue.
    pub atom2: String,
}

/// A constructed structure: residues, chain breaks, and derived bonds.
#[derive(Clone, Debug, Default)]
pub struct Pose {
    /// Residues in construction order.
    pub residues: Vec<PoseResidue>,
    /// Indices of the last residue of every chain except the final one.
    pub chain_endings: Vec<usize>,
    /// Residues dropped under [`UnrecognizedPolicy::Remember`].
    pub unrecognized: Vec<UnrecognizedRecord>,
    /// LINK-derived connections between built residues.
    pub connections: Vec<Connection>,
    /// Index pairs of disulfide-bonded residues.
    pub disulfide_pairs: Vec<(usize, usize)>,
}

impl Pose {
    /// Returns the residue index ranges of each chain.
    #[must_use]
    pub fn chains(&self) -> Vec<std::ops::Range<usize>> {
        let mut chains = Vec::new();
        let mut start = 0;
        for &ending in &self.chain_endings {
            chains.push(start..ending + 1);
            start = ending + 1;
        }
        if start < self.residues.len() {
            chains.push(start..self.residues.len());
        }
        chains
    }
}

/// Builds a [`Pose`] from parsed file data.
///
/// For every residue record a candidate type list is selected by 3-letter
/// code, filtered by terminus, branch, disulfide, and protonation status,
/// and scored by how well its atom inventory matches the record. The best
/// candidate is instantiated, appended by bond where the chain continues
/// and by jump elsewhere, and a post-pass adds undetected termini, applies
/// LINK-derived bonds, and fills atoms the input had no coordinates for.
///
/// # Errors
///
/// Returns [`Error::UnrecognizedResidue`] for an unmatched or fully
/// filtered code (under [`UnrecognizedPolicy::Fail`] and always,
/// respectively) and [`Error::MissingHeavyAtoms`] when a mainchain cannot
/// be built under `exit_if_missing_heavy_atoms`.
pub fn build_pose(
    fd: &FileData,
    residue_types: &ResidueTypeSet,
    options: &BuildOptions,
) -> Result<Pose> {
    let rinfos = fd.residue_records(&options.parse);
    let mut pose = Pose::default();

    let mut branch_lower_termini: Vec<String> = Vec::new();
    let mut branch_points: Vec<String> = Vec::new();
    let mut built_res_ids: Vec<String> = Vec::new();
    let mut last_residue_was_recognized = true;

    for (index, rinfo) in rinfos.iter().enumerate() {
        let position = index + 1;

        let same_chain_prev = index > 0
            && rinfo.chain_id == rinfos[index - 1].chain_id
            && rinfo.ter_count == rinfos[index - 1].ter_count;
        let same_chain_next = index + 1 < rinfos.len()
            && rinfo.chain_id == rinfos[index + 1].chain_id
            && rinfo.ter_count == rinfos[index + 1].ter_count;

        if let Some(links) = fd.link_map.get(&rinfo.res_id) {
            for link in links {
                branch_lower_termini.push(link.res_id2.clone());
                branch_points.push(link.name1.clone());
            }
        }
        let is_branch_point = fd.link_map.contains_key(&rinfo.res_id);
        let is_branch_lower_terminus = branch_lower_termini.contains(&rinfo.res_id);
        let is_lower_terminus = index == 0 || (!same_chain_prev && !is_branch_lower_terminus);
        let is_upper_terminus = index + 1 == rinfos.len() || !same_chain_next;

        let candidates = residue_types.name3_map(&rinfo.res_name);
        if candidates.is_empty() {
            match options.unrecognized {
                UnrecognizedPolicy::Skip => {
                    log::warn!(
                        "skipping unrecognized residue {} at position {position}",
                        rinfo.res_name
                    );
                }
                UnrecognizedPolicy::Remember => {
                    pose.unrecognized.push(UnrecognizedRecord {
                        position,
                        code: rinfo.res_name.clone(),
                        atoms: rinfo
                            .atoms
                            .iter()
                            .map(|atom| {
                                (atom.name.trim().to_owned(), [atom.x, atom.y, atom.z])
                            })
                            .collect(),
                    });
                }
                UnrecognizedPolicy::Fail => {
                    return Err(Error::UnrecognizedResidue {
                        code: rinfo.res_name.clone(),
                        position,
                    });
                }
            }
            last_residue_was_recognized = false;
            continue;
        }

        let stripped_xyz = stripped_coordinates(rinfo);

        let best = select_candidate(
            &candidates,
            rinfo,
            fd,
            &stripped_xyz,
            is_lower_terminus,
            is_upper_terminus,
            is_branch_point,
            is_branch_lower_terminus,
            options,
        );
        let Some(rsd_type) = best else {
            return Err(Error::UnrecognizedResidue {
                code: rinfo.res_name.clone(),
                position,
            });
        };

        if rsd_type.is_polymer() && rsd_type.mainchain.len() >= 3 {
            if let Some(missing) = missing_mainchain_core(rsd_type, &stripped_xyz) {
                log::warn!(
                    "skipping residue {} {} at position {position}: missing too many \
                     mainchain atoms",
                    rinfo.res_id,
                    rinfo.res_name
                );
                if options.exit_if_missing_heavy_atoms {
                    return Err(Error::MissingHeavyAtoms {
                        position,
                        atoms: missing,
                    });
                }
                continue;
            }
        }

        let atoms: Vec<PoseAtom> = rsd_type
            .atoms
            .iter()
            .map(|name| {
                stripped_xyz.get(name.as_str()).map_or_else(
                    || PoseAtom {
                        name: name.clone(),
                        xyz: [0.0; 3],
                        missing: true,
                    },
                    |&xyz| PoseAtom {
                        name: name.clone(),
                        xyz,
                        missing: false,
                    },
                )
            })
            .collect();

        let mut variants = rsd_type.variants;
        let mut bonded_to_previous = false;

        if pose.residues.is_empty() {
            // first residue starts the first chain
        } else if is_lower_terminus
            || is_branch_lower_terminus
            || !rsd_type.is_polymer()
            || !pose.residues.last().unwrap().is_polymer
            || !last_residue_was_recognized
        {
            pose.chain_endings.push(pose.residues.len() - 1);
        } else if options.missing_dens_as_jump {
            let gap = polymer_gap(pose.residues.last().unwrap(), rsd_type, &atoms);
            if gap > MISSING_DENSITY_GAP {
                log::warn!(
                    "missing density found before residue {} (gap {gap:.2} A)",
                    rinfo.res_id
                );
                pose.chain_endings.push(pose.residues.len() - 1);
                let previous = pose.residues.last_mut().unwrap();
                previous.variants |= VariantFlags::UPPERTERM_TRUNC;
                variants |= VariantFlags::LOWERTERM_TRUNC;
            } else {
                bonded_to_previous = true;
            }
        } else {
            bonded_to_previous = true;
        }

        pose.residues.push(PoseResidue {
            type_name: rsd_type.name.clone(),
            name3: rinfo.res_name.clone(),
            res_id: rinfo.res_id.clone(),
            chain_id: rinfo.chain_id,
            pdb_seq: rinfo.res_seq,
            i_code: rinfo.i_code,
            atoms,
            bonded_to_previous,
            variants,
            is_polymer: rsd_type.is_polymer(),
        });
        built_res_ids.push(rinfo.res_id.clone());
        last_residue_was_recognized = true;
    }

    add_undetected_termini(&mut pose);
    apply_links(&mut pose, fd, &built_res_ids);
    fill_missing_atoms(&mut pose);

    Ok(pose)
}

/// Renumbers the PDB sequence numbers chain by chain: each chain becomes
/// monotone starting from 1, or from its first input number when
/// `start_from_existing_numbering` is set. Insertion codes are cleared.
pub fn renumber_pdbinfo_based_on_conf_chains(
    pose: &mut Pose,
    start_from_existing_numbering: bool,
) {
    for chain in pose.chains() {
        let base = if start_from_existing_numbering {
            pose.residues[chain.start].pdb_seq
        } else {
            1
        };
        for (offset, index) in chain.enumerate() {
            pose.residues[index].pdb_seq = base + i32::try_from(offset).unwrap();
            pose.residues[index].i_code = ' ';
        }
    }
}

fn stripped_coordinates(rinfo: &ResidueRecord) -> FxHashMap<&str, [f64; 3]> {
    let mut map = FxHashMap::default();
    for (name, &xyz) in &rinfo.xyz {
        map.entry(name.trim()).or_insert(xyz);
    }
    map
}

#[allow(clippy::too_many_arguments)]
fn select_candidate<'a>(
    candidates: &[&'a ResidueType],
    rinfo: &ResidueRecord,
    fd: &FileData,
    stripped_xyz: &FxHashMap<&str, [f64; 3]>,
    is_lower_terminus: bool,
    is_upper_terminus: bool,
    is_branch_point: bool,
    is_branch_lower_terminus: bool,
    options: &BuildOptions,
) -> Option<&'a ResidueType> {
    let mut best: Option<&ResidueType> = None;
    let mut best_rsd_missing = usize::MAX;
    let mut best_xyz_missing = usize::MAX;

    for rsd_type in candidates {
        if rsd_type.is_polymer()
            && (is_lower_terminus != rsd_type.variants.is_lower_terminus()
                || is_upper_terminus != rsd_type.variants.is_upper_terminus())
        {
            continue;
        }
        if rsd_type.is_polymer()
            && is_branch_point != rsd_type.variants.contains(VariantFlags::BRANCH_POINT)
        {
            continue;
        }
        if rsd_type.is_polymer()
            && is_branch_lower_terminus
                != rsd_type
                    .variants
                    .contains(VariantFlags::BRANCH_LOWER_TERMINUS)
        {
            continue;
        }
        if rsd_type.variants.contains(VariantFlags::DISULFIDE) && rinfo.res_name != "CYD" {
            continue;
        }
        if !options.keep_input_protonation_state
            && rsd_type
                .variants
                .intersects(VariantFlags::PROTONATED | VariantFlags::DEPROTONATED)
        {
            continue;
        }
        if let Some(base_name) = fd.residue_type_base_names.get(&rinfo.res_id) {
            if !rsd_type.name.starts_with(base_name.as_str()) {
                continue;
            }
        }

        // prefer the type that accounts for the most input atoms, then the
        // type with the fewest atoms the input lacks
        let rsd_missing = stripped_xyz
            .keys()
            .filter(|name| {
                !rsd_type.has_atom(name) && !(**name == "H" && is_lower_terminus)
            })
            .count();
        let xyz_missing = rsd_type
            .atoms
            .iter()
            .filter(|name| !stripped_xyz.contains_key(name.as_str()))
            .count();

        if rsd_missing < best_rsd_missing
            || (rsd_missing == best_rsd_missing && xyz_missing < best_xyz_missing)
        {
            best_rsd_missing = rsd_missing;
            best_xyz_missing = xyz_missing;
            best = Some(rsd_type);
        }
    }

    best
}

/// Returns the missing mainchain atoms if no window of three consecutive
/// mainchain atoms has coordinates, `None` when the core is present.
fn missing_mainchain_core(
    rsd_type: &ResidueType,
    stripped_xyz: &FxHashMap<&str, [f64; 3]>,
) -> Option<Vec<String>> {
    let mainchain = &rsd_type.mainchain;
    let present: Vec<bool> = mainchain
        .iter()
        .map(|name| stripped_xyz.contains_key(name.as_str()))
        .collect();

    let core_present = present.windows(3).any(|window| window.iter().all(|&p| p));
    if core_present {
        return None;
    }

    Some(
        mainchain
            .iter()
            .zip(&present)
            .filter(|&(_, &p)| !p)
            .map(|(name, _)| name.clone())
            .collect(),
    )
}

/// Distance between the previous residue's upper-connect atom and the new
/// residue's lower-connect atom, or 0 when either is absent. The previous
/// residue no longer knows its type's mainchain, so upper-connect
/// resolution goes through the conventional protein/nucleic names with the
/// last placed atom as fallback.
fn polymer_gap(previous: &PoseResidue, rsd_type: &ResidueType, atoms: &[PoseAtom]) -> f64 {
    let upper = ["C", "O3'"]
        .iter()
        .find_map(|name| {
            previous
                .atoms
                .iter()
                .find(|atom| atom.name == *name && !atom.missing)
                .map(|atom| atom.xyz)
        })
        .or_else(|| {
            previous
                .atoms
                .iter()
                .rev()
                .find(|atom| !atom.missing)
                .map(|atom| atom.xyz)
        });

    let lower = rsd_type.mainchain.first().and_then(|name| {
        atoms
            .iter()
            .find(|atom| atom.name == *name && !atom.missing)
            .map(|atom| atom.xyz)
    });

    match (upper, lower) {
        (Some(upper), Some(lower)) => distance(upper, lower),
        _ => 0.0,
    }
}

fn add_undetected_termini(pose: &mut Pose) {
    let chains = pose.chains();
    for chain in chains {
        let first = chain.start;
        let last = chain.end - 1;

        if pose.residues[first].is_polymer
            && !pose.residues[first].variants.is_lower_terminus()
            && !pose.residues[first]
                .variants
                .contains(VariantFlags::BRANCH_LOWER_TERMINUS)
        {
            log::debug!("adding undetected lower terminus to residue {first}");
            pose.residues[first].variants |= VariantFlags::LOWER_TERMINUS;
        }
        if pose.residues[last].is_polymer
            && !pose.residues[last].variants.is_upper_terminus()
        {
            log::debug!("adding undetected upper terminus to residue {last}");
            pose.residues[last].variants |= VariantFlags::UPPER_TERMINUS;
        }
    }
}

fn apply_links(pose: &mut Pose, fd: &FileData, built_res_ids: &[String]) {
    let index_of: FxHashMap<&str, usize> = built_res_ids
        .iter()
        .enumerate()
        .map(|(index, res_id)| (res_id.as_str(), index))
        .collect();

    for links in fd.link_map.values() {
        for link in links {
            let (Some(&residue1), Some(&residue2)) = (
                index_of.get(link.res_id1.as_str()),
                index_of.get(link.res_id2.as_str()),
            ) else {
                continue;
            };

            let atom1 = link.name1.trim().to_owned();
            let atom2 = link.name2.trim().to_owned();
            let is_disulfide = atom1 == "SG" && atom2 == "SG";

            pose.connections.push(Connection {
                residue1,
                atom1,
                residue2,
                atom2,
            });
            if is_disulfide {
                pose.disulfide_pairs.push((residue1, residue2));
                pose.residues[residue1].variants |= VariantFlags::DISULFIDE;
                pose.residues[residue2].variants |= VariantFlags::DISULFIDE;
            }
        }
    }
}

/// Places every missing atom near its residue: at the nearest known atom
/// in declaration order, displaced outward from the residue centroid. The
/// missing mask stays set so that downstream geometry can rebuild the atom
/// from proper internal coordinates.
fn fill_missing_atoms(pose: &mut Pose) {
    for residue in &mut pose.residues {
        let known: Vec<[f64; 3]> = residue
            .atoms
            .iter()
            .filter(|atom| !atom.missing)
            .map(|atom| atom.xyz)
            .collect();
        if known.is_empty() {
            continue;
        }

        let mut centroid = [0.0_f64; 3];
        for xyz in &known {
            for axis in 0..3 {
                centroid[axis] += xyz[axis] / known.len() as f64;
            }
        }

        for index in 0..residue.atoms.len() {
            if !residue.atoms[index].missing {
                continue;
            }

            let anchor = residue.atoms[..index]
                .iter()
                .rev()
                .find(|atom| !atom.missing)
                .map_or(known[0], |atom| atom.xyz);

            let mut direction = [0.0_f64; 3];
            let mut norm = 0.0;
            for axis in 0..3 {
                direction[axis] = anchor[axis] - centroid[axis];
                norm += direction[axis] * direction[axis];
            }
            let norm = norm.sqrt();
            if norm < 1e-9 {
                direction = [1.0, 0.0, 0.0];
            } else {
                for d in &mut direction {
                    *d /= norm;
                }
            }

            for axis in 0..3 {
                residue.atoms[index].xyz[axis] =
                    direction[axis].mul_add(FILL_OFFSET, anchor[axis]);
            }
        }
    }
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(&b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
