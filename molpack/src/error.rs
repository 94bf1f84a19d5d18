//! Error types shared across the crate.

use thiserror::Error;

/// The ways a malformed PDB line can fail to parse.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseErrorKind {
    /// A mandatory fixed-width column could not be converted to its type.
    #[error("field `{0}` is not a valid {1}")]
    BadField(&'static str, &'static str),
    /// More models were started than the chain-relabeling alphabet covers.
    #[error("too many MODEL records for chain relabeling")]
    TooManyModels,
}

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A PDB line could not be parsed. `line_no` is 1-based and refers to
    /// the non-empty lines of the input blob.
    #[error("parse error on line {line_no}: {kind}")]
    Parse {
        /// 1-based line number of the offending record.
        line_no: usize,
        /// What went wrong with the record.
        kind: ParseErrorKind,
    },
    /// A 3-letter residue code has no match in the residue type set.
    #[error("unrecognized residue `{code}` at position {position}")]
    UnrecognizedResidue {
        /// The 3-letter code as read from the file.
        code: String,
        /// 1-based residue index in file order.
        position: usize,
    },
    /// A residue is missing too many mainchain atoms to be built.
    #[error("residue at position {position} is missing heavy atoms: {atoms:?}")]
    MissingHeavyAtoms {
        /// 1-based residue index in file order.
        position: usize,
        /// Names of the absent mainchain atoms.
        atoms: Vec<String>,
    },
    /// Landmark atom pairs exceed the alignment tolerance after
    /// superposition.
    #[error("alignment rmsd {rmsd} exceeds cutoff {cutoff}")]
    AlignmentOutOfTolerance {
        /// Root-mean-square deviation over the worst landmark pair.
        rmsd: f64,
        /// The configured tolerance.
        cutoff: f64,
    },
    /// A grid rebuild or additional paint was attempted against a
    /// different anchor point.
    #[error("grid reference mismatch: got {got:?}, expected {expected:?}")]
    ReferenceMismatch {
        /// The reference point supplied by the caller.
        got: [f64; 3],
        /// The reference point the grid was built with.
        expected: [f64; 3],
    },
    /// The periodic energy re-sum found the running total out of step with
    /// the caches by more than the tolerance.
    #[error("interaction graph cache drift of {drift}")]
    CacheDrift {
        /// Absolute difference between running and recomputed totals.
        drift: f64,
    },
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Shorthand result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
