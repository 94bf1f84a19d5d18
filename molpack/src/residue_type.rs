//! Residue schemas: atom inventories, variants, and the type set.

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Variant decorations a [`ResidueType`] may carry.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
    pub struct VariantFlags: u16 {
        /// N-terminal (or chain-start) patch.
        const LOWER_TERMINUS = 1 << 0;
        /// C-terminal (or chain-end) patch.
        const UPPER_TERMINUS = 1 << 1;
        /// Chain-start truncation left by missing density.
        const LOWERTERM_TRUNC = 1 << 2;
        /// Chain-end truncation left by missing density.
        const UPPERTERM_TRUNC = 1 << 3;
        /// Residue hosts a branch.
        const BRANCH_POINT = 1 << 4;
        /// First residue of a branch.
        const BRANCH_LOWER_TERMINUS = 1 << 5;
        /// Half of a disulfide bond.
        const DISULFIDE = 1 << 6;
        /// Protonated sidechain form.
        const PROTONATED = 1 << 7;
        /// Deprotonated sidechain form.
        const DEPROTONATED = 1 << 8;
    }
}

impl VariantFlags {
    /// True if this set carries a chain-start terminus in any form.
    #[must_use]
    pub const fn is_lower_terminus(self) -> bool {
        self.intersects(Self::LOWER_TERMINUS.union(Self::LOWERTERM_TRUNC))
    }

    /// True if this set carries a chain-end terminus in any form.
    #[must_use]
    pub const fn is_upper_terminus(self) -> bool {
        self.intersects(Self::UPPER_TERMINUS.union(Self::UPPERTERM_TRUNC))
    }
}

/// Chemical class of a residue type.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ResidueClass {
    /// Part of a polymer chain (protein, nucleic acid, saccharide).
    Polymer,
    /// Free-standing ligand.
    Ligand,
}

/// Schema of one residue type: named atoms, mainchain subset, variants.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResidueType {
    /// Full type name, unique within a set (e.g. `ALA`, `ALA:NtermProteinFull`).
    pub name: String,
    /// 3-letter code shared by all variants of the base type.
    pub name3: String,
    /// Amino-acid identity tag, also used by the interaction-graph masks.
    pub aa: u32,
    /// Atom names in declaration order, whitespace-stripped.
    pub atoms: Vec<String>,
    /// Mainchain atom names in chain order, a subset of `atoms`.
    pub mainchain: Vec<String>,
    /// Chemical class.
    pub class: ResidueClass,
    /// Variant decorations.
    pub variants: VariantFlags,
}

impl ResidueType {
    /// Returns `true` for polymer types.
    #[must_use]
    pub fn is_polymer(&self) -> bool {
        self.class == ResidueClass::Polymer
    }

    /// Returns `true` if this type declares `atom_name` (whitespace
    /// ignored).
    #[must_use]
    pub fn has_atom(&self, atom_name: &str) -> bool {
        let stripped = atom_name.trim();
        self.atoms.iter().any(|name| name == stripped)
    }
}

/// Declaration-ordered collection of residue types with a 3-letter-code
/// index.
///
/// The set is constructed once, passed by reference, and read-only
/// thereafter; nothing in this crate reaches for a process-wide instance.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResidueTypeSet {
    types: Vec<ResidueType>,
    name3_index: FxHashMap<String, Vec<usize>>,
}

impl ResidueTypeSet {
    /// Builds a set from types in declaration order. Order matters: the
    /// pose builder breaks candidate-score ties in favor of earlier
    /// declarations.
    #[must_use]
    pub fn new(types: Vec<ResidueType>) -> Self {
        let mut name3_index: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (index, rtype) in types.iter().enumerate() {
            name3_index
                .entry(rtype.name3.clone())
                .or_default()
                .push(index);
        }
        Self { types, name3_index }
    }

    /// Returns every type whose 3-letter code matches, in declaration
    /// order. Unknown codes yield an empty slice.
    #[must_use]
    pub fn name3_map(&self, name3: &str) -> Vec<&ResidueType> {
        self.name3_index
            .get(name3.trim())
            .map(|indices| indices.iter().map(|&i| &self.types[i]).collect())
            .unwrap_or_default()
    }

    /// Returns all types in declaration order.
    #[must_use]
    pub fn types(&self) -> &[ResidueType] {
        &self.types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(name: &str, name3: &str, atoms: &[&str]) -> ResidueType {
        ResidueType {
            name: name.to_owned(),
            name3: name3.to_owned(),
            aa: 1,
            atoms: atoms.iter().map(|&a| a.to_owned()).collect(),
            mainchain: vec!["N".to_owned(), "CA".to_owned(), "C".to_owned()],
            class: ResidueClass::Polymer,
            variants: VariantFlags::empty(),
        }
    }

    #[test]
    fn name3_lookup_preserves_declaration_order() {
        let mut nterm = plain("ALA:Nterm", "ALA", &["N", "CA", "C", "O", "CB"]);
        nterm.variants = VariantFlags::LOWER_TERMINUS;
        let set = ResidueTypeSet::new(vec![
            plain("ALA", "ALA", &["N", "CA", "C", "O", "CB"]),
            nterm,
            plain("GLY", "GLY", &["N", "CA", "C", "O"]),
        ]);

        let candidates = set.name3_map("ALA");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "ALA");
        assert_eq!(candidates[1].name, "ALA:Nterm");
        assert!(set.name3_map("TRP").is_empty());
    }

    #[test]
    fn truncation_variants_count_as_termini() {
        assert!(VariantFlags::LOWERTERM_TRUNC.is_lower_terminus());
        assert!(VariantFlags::UPPER_TERMINUS.is_upper_terminus());
        assert!(!VariantFlags::DISULFIDE.is_lower_terminus());
    }

    #[test]
    fn has_atom_ignores_column_whitespace() {
        let rtype = plain("ALA", "ALA", &["N", "CA", "C", "O", "CB"]);
        assert!(rtype.has_atom(" CA "));
        assert!(!rtype.has_atom(" CG "));
    }
}
