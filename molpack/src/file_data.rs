//! Typed in-memory form of a PDB record stream, with parse and emit.

use crate::error::{Error, ParseErrorKind, Result};
use crate::record::{split_lines, Record, RecordType};
use itertools::Itertools;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Alphabet used to relabel chains of later models under
/// [`ParseOptions::new_chain_order`].
const CHAIN_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Hard cap on MODEL records when relabeling chains.
const MAX_MODELS: usize = 8;

/// One ATOM or HETATM record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AtomRecord {
    /// True for HETATM records.
    pub is_het: bool,
    /// Atom serial number.
    pub serial: i32,
    /// 4-character atom name, column whitespace preserved.
    pub name: String,
    /// Alternate-location indicator, blank if absent.
    pub alt_loc: char,
    /// 3-character residue name.
    pub res_name: String,
    /// Chain identifier; a blank is preserved literally.
    pub chain_id: char,
    /// Residue sequence number.
    pub res_seq: i32,
    /// Insertion code, blank if absent.
    pub i_code: char,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Occupancy; forced to -1 when the coordinates were unreadable so that
    /// downstream passes can randomize the position.
    pub occupancy: f64,
    /// Temperature factor.
    pub temperature: f64,
    /// Right-justified 2-character element symbol.
    pub element: String,
    /// Number of TER/END records seen before this atom.
    pub ter_count: u32,
}

impl AtomRecord {
    /// Returns the residue key of this atom, rendered like the fixed-width
    /// record columns: sequence number (width 4), insertion code, chain id.
    #[must_use]
    pub fn residue_key(&self) -> String {
        let mut key = String::new();
        let _ = write!(key, "{:4}{}{}", self.res_seq, self.i_code, self.chain_id);
        key
    }
}

/// One LINK record: a named atom bound to a named atom.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LinkRecord {
    /// First atom name.
    pub name1: String,
    /// First alternate-location indicator.
    pub alt_loc1: char,
    /// First residue name.
    pub res_name1: String,
    /// First residue key (sequence number, insertion code, chain id).
    pub res_id1: String,
    /// Second atom name.
    pub name2: String,
    /// Second alternate-location indicator.
    pub alt_loc2: char,
    /// Second residue name.
    pub res_name2: String,
    /// Second residue key.
    pub res_id2: String,
    /// Bond length in Angstroms.
    pub length: f64,
}

/// One REMARK record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Remark {
    /// Remark number.
    pub num: i32,
    /// Remark text with trailing whitespace removed.
    pub value: String,
}

/// Metadata accumulated from the Title Section of the file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct HeaderInformation {
    /// HEADER classification text.
    pub classification: String,
    /// HEADER deposition date.
    pub dep_date: String,
    /// HEADER PDB id code.
    pub id_code: String,
    /// Accumulated TITLE text.
    pub title: String,
    /// Accumulated COMPND text.
    pub compound: String,
    /// Accumulated KEYWDS text.
    pub keywords: String,
    /// Accumulated EXPDTA text.
    pub technique: String,
}

/// Crystallographic lattice from the CRYST1 record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CrystalInfo {
    /// Cell edge a.
    pub a: f64,
    /// Cell edge b.
    pub b: f64,
    /// Cell edge c.
    pub c: f64,
    /// Cell angle alpha.
    pub alpha: f64,
    /// Cell angle beta.
    pub beta: f64,
    /// Cell angle gamma.
    pub gamma: f64,
    /// Space group symbol.
    pub space_group: String,
}

/// Atoms grouped into one residue, with a first-wins coordinate index.
#[derive(Clone, Debug)]
pub struct ResidueRecord {
    /// Fixed-width residue key (sequence number, insertion code, chain id).
    pub res_id: String,
    /// 3-character residue name.
    pub res_name: String,
    /// Chain identifier.
    pub chain_id: char,
    /// Residue sequence number.
    pub res_seq: i32,
    /// Insertion code.
    pub i_code: char,
    /// TER count at this residue.
    pub ter_count: u32,
    /// The atoms in record order, first occurrence of each name only.
    pub atoms: Vec<AtomRecord>,
    /// Atom name to coordinates.
    pub xyz: FxHashMap<String, [f64; 3]>,
    /// Atom name to temperature factor.
    pub temps: FxHashMap<String, f64>,
}

impl ResidueRecord {
    fn new(atom: &AtomRecord) -> Self {
        Self {
            res_id: atom.residue_key(),
            res_name: atom.res_name.clone(),
            chain_id: atom.chain_id,
            res_seq: atom.res_seq,
            i_code: atom.i_code,
            ter_count: atom.ter_count,
            atoms: Vec::new(),
            xyz: FxHashMap::default(),
            temps: FxHashMap::default(),
        }
    }

}

/// Options steering the record-stream parse.
#[derive(Clone, Copy, Debug)]
pub struct ParseOptions {
    /// Relabel the chains of later models through a fresh alphabet.
    pub new_chain_order: bool,
    /// Stop reading at the first ENDMDL record.
    pub obey_endmdl: bool,
    /// Collect Title Section records into [`HeaderInformation`].
    pub read_header: bool,
    /// Collect LINK records.
    pub read_link_records: bool,
    /// Drop atoms whose occupancy is exactly zero when building residue
    /// records.
    pub ignore_zero_occupancy: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            new_chain_order: false,
            obey_endmdl: false,
            read_header: true,
            read_link_records: true,
            ignore_zero_occupancy: true,
        }
    }
}

/// A parsed PDB file: residues grouped by chain in first-seen order plus
/// the annotation records the modeling layers consume.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FileData {
    /// Serial of the last MODEL record, empty for single-model files.
    pub model_tag: String,
    /// Chain identifiers in first-seen order, parallel to `chains`.
    pub chain_ids: Vec<char>,
    /// Atom records per chain, parallel to `chain_ids`.
    pub chains: Vec<Vec<AtomRecord>>,
    /// LINK records keyed by the first partner's residue key.
    pub link_map: FxHashMap<String, Vec<LinkRecord>>,
    /// HETNAM free text per 3-letter code, continuations joined.
    pub heterogen_names: FxHashMap<String, String>,
    /// Base residue-type name per residue key, parsed from the sugar-family
    /// HETNAM convention.
    pub residue_type_base_names: FxHashMap<String, String>,
    /// REMARK records in file order.
    pub remarks: Vec<Remark>,
    /// Title Section metadata, when read.
    pub header: Option<HeaderInformation>,
    /// CRYST1 lattice, when present.
    pub crystal: Option<CrystalInfo>,
}

impl FileData {
    /// Parses a PDB blob with default options.
    ///
    /// # Errors
    ///
    /// See [`Self::parse_with_options`].
    pub fn parse(blob: &str) -> Result<Self> {
        Self::parse_with_options(blob, &ParseOptions::default())
    }

    /// Parses a PDB blob.
    ///
    /// Malformed records are skipped with a warning; the running TER count,
    /// model id, and chain bookkeeping are threaded across lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] with [`ParseErrorKind::TooManyModels`] if
    /// chain relabeling runs past the model cap.
    pub fn parse_with_options(blob: &str, options: &ParseOptions) -> Result<Self> {
        let mut fd = Self::default();
        if options.read_header {
            fd.header = Some(HeaderInformation::default());
        }

        let mut accumulator: FxHashMap<char, Vec<AtomRecord>> = FxHashMap::default();
        let mut ter_count: u32 = 0;
        let mut model_index: usize = 1;
        let mut model_tags_present = false;
        let mut chain_order_of: FxHashMap<char, usize> = FxHashMap::default();

        for (line_no, line) in split_lines(blob).iter().enumerate() {
            let line_no = line_no + 1;
            let record = Record::parse_line(line);

            match record.rtype {
                RecordType::Model => {
                    fd.model_tag = record.get("serial").trim().to_owned();
                    if options.new_chain_order {
                        if model_tags_present {
                            model_index += 1;
                            if model_index > MAX_MODELS {
                                return Err(Error::Parse {
                                    line_no,
                                    kind: ParseErrorKind::TooManyModels,
                                });
                            }
                        } else {
                            model_tags_present = true;
                        }
                    }
                }
                RecordType::Header
                | RecordType::Title
                | RecordType::Compnd
                | RecordType::Keywds
                | RecordType::Expdta => {
                    if let Some(header) = &mut fd.header {
                        header.store_record(&record);
                    }
                }
                RecordType::Link => {
                    if options.read_link_records {
                        fd.store_link_record(&record);
                    }
                }
                RecordType::Hetnam => {
                    fd.store_heterogen_name(
                        record.get("hetID").trim(),
                        record.get("text").trim_end(),
                    );
                }
                RecordType::Atom | RecordType::Hetatm => {
                    match parse_atom(&record, line_no, ter_count) {
                        Ok(mut atom) => {
                            if options.new_chain_order {
                                let next_index = chain_order_of.len();
                                let order = *chain_order_of
                                    .entry(atom.chain_id)
                                    .or_insert(next_index);
                                atom.chain_id = relabeled_chain(
                                    model_index,
                                    order,
                                    chain_order_of.len(),
                                    atom.chain_id,
                                );
                            }

                            if !fd.chain_ids.contains(&atom.chain_id) {
                                fd.chain_ids.push(atom.chain_id);
                            }
                            accumulator.entry(atom.chain_id).or_default().push(atom);
                        }
                        Err(err) => log::warn!("skipping record: {err}"),
                    }
                }
                RecordType::Ter | RecordType::End => ter_count += 1,
                RecordType::Endmdl => {
                    if options.obey_endmdl {
                        log::warn!("hit ENDMDL, not reading anything further");
                        break;
                    }
                }
                RecordType::Remark => {
                    fd.remarks.push(Remark {
                        num: record.get("remarkNum").trim().parse().unwrap_or(0),
                        value: record.get("value").trim_end().to_owned(),
                    });
                }
                RecordType::Cryst1 => match parse_crystal(&record, line_no) {
                    Ok(crystal) => fd.crystal = Some(crystal),
                    Err(err) => log::warn!("skipping record: {err}"),
                },
                RecordType::Unknown => {}
            }
        }

        for &chain_id in &fd.chain_ids {
            fd.chains
                .push(accumulator.remove(&chain_id).unwrap_or_default());
        }

        Ok(fd)
    }

    /// Renders this file back into a PDB blob: header records, remarks,
    /// atoms in chain order, and a final TER.
    #[must_use]
    pub fn emit(&self) -> String {
        let mut out = String::new();

        if let Some(header) = &self.header {
            header.emit(&mut out);
        }

        if let Some(crystal) = &self.crystal {
            let mut record = Record::empty(RecordType::Cryst1);
            record.set("a", format!("{:9.3}", crystal.a));
            record.set("b", format!("{:9.3}", crystal.b));
            record.set("c", format!("{:9.3}", crystal.c));
            record.set("alpha", format!("{:7.2}", crystal.alpha));
            record.set("beta", format!("{:7.2}", crystal.beta));
            record.set("gamma", format!("{:7.2}", crystal.gamma));
            record.set("sGroup", crystal.space_group.clone());
            out.push_str(&record.emit());
            out.push('\n');
        }

        for remark in &self.remarks {
            let mut record = Record::empty(RecordType::Remark);
            record.set("remarkNum", format!("{:3}", remark.num));
            record.set("value", remark.value.clone());
            out.push_str(&record.emit());
            out.push('\n');
        }

        for chain in &self.chains {
            for atom in chain {
                out.push_str(&emit_atom(atom));
                out.push('\n');
            }
        }

        out.push_str(&Record::empty(RecordType::Ter).emit());
        out.push('\n');
        out
    }

    /// Groups the atom records into residues, chain by chain: consecutive
    /// atoms sharing the residue key form one [`ResidueRecord`], and the
    /// first occurrence of each atom name wins (alternate conformations are
    /// dropped).
    ///
    /// Atoms with zero occupancy are skipped under
    /// [`ParseOptions::ignore_zero_occupancy`]; negative occupancies (the
    /// missing-density sentinel) are kept so that a randomization pass can
    /// place them.
    #[must_use]
    pub fn residue_records(&self, options: &ParseOptions) -> Vec<ResidueRecord> {
        let kept = self.chains.iter().flatten().filter(|atom| {
            if atom.occupancy == 0.0 && options.ignore_zero_occupancy {
                log::warn!(
                    "ignoring atom {} in residue {} with zero occupancy",
                    atom.name.trim(),
                    atom.residue_key()
                );
                false
            } else {
                true
            }
        });

        let mut residues = Vec::new();
        for (_, group) in &kept.group_by(|atom| {
            (
                atom.chain_id,
                atom.res_seq,
                atom.i_code,
                atom.ter_count,
                atom.res_name.clone(),
            )
        }) {
            let mut residue: Option<ResidueRecord> = None;
            for atom in group {
                let residue = residue.get_or_insert_with(|| ResidueRecord::new(atom));
                if !residue.xyz.contains_key(&atom.name) {
                    residue.atoms.push(atom.clone());
                    residue
                        .xyz
                        .insert(atom.name.clone(), [atom.x, atom.y, atom.z]);
                    residue.temps.insert(atom.name.clone(), atom.temperature);
                }
            }
            residues.push(residue.unwrap());
        }

        residues
    }

    /// Displaces every missing-density atom (all-zero coordinates with
    /// non-positive occupancy) far from the scene so that geometry passes
    /// can detect and rebuild it.
    pub fn randomize_missing_coords(&mut self, rng: &mut impl Rng) {
        for atom in self.chains.iter_mut().flatten() {
            if atom.x == 0.0
                && atom.y == 0.0
                && atom.z == 0.0
                && atom.occupancy <= 0.0
            {
                log::debug!(
                    "randomized missing-density atom {} of residue {}",
                    atom.name.trim(),
                    atom.residue_key()
                );
                atom.x = 900.0 + rng.gen::<f64>() * 100.0;
                atom.y = 900.0 + rng.gen::<f64>() * 100.0;
                atom.z = 900.0 + rng.gen::<f64>() * 100.0;
            }
        }
    }

    fn store_link_record(&mut self, record: &Record) {
        let link = LinkRecord {
            name1: record.get("name1").to_owned(),
            alt_loc1: first_char(record.get("altLoc1")),
            res_name1: record.get("resName1").to_owned(),
            res_id1: format!(
                "{}{}{}",
                record.get("resSeq1"),
                record.get("iCode1"),
                record.get("chainID1")
            ),
            name2: record.get("name2").to_owned(),
            alt_loc2: first_char(record.get("altLoc2")),
            res_name2: record.get("resName2").to_owned(),
            res_id2: format!(
                "{}{}{}",
                record.get("resSeq2"),
                record.get("iCode2"),
                record.get("chainID2")
            ),
            length: record.get("length").trim().parse().unwrap_or(0.0),
        };

        self.link_map
            .entry(link.res_id1.clone())
            .or_default()
            .push(link);
    }

    /// Stores HETNAM text, joining continuation records. Sugar-family codes
    /// written in the sentence-case convention instead populate the residue
    /// key to base-residue-type-name map: their text field carries the
    /// chain id (1 column), sequence number (4), insertion code (1), a
    /// space, then the base name.
    fn store_heterogen_name(&mut self, het_id: &str, text: &str) {
        if het_id.is_empty() {
            log::warn!("HETNAM record is missing the heterogen ID field");
            return;
        }
        if text.is_empty() {
            log::warn!("HETNAM chemical name field is an empty string");
            return;
        }

        if het_id.chars().any(char::is_lowercase) {
            if text.len() > 7 {
                let chain_id = &text[0..1];
                let res_seq = &text[1..5];
                let i_code = &text[5..6];
                let key = format!("{res_seq}{i_code}{chain_id}");
                self.residue_type_base_names
                    .insert(key, text[7..].to_owned());
            } else {
                log::warn!("HETNAM text for `{het_id}` is too short to carry a residue key");
            }
            return;
        }

        self.heterogen_names
            .entry(het_id.to_owned())
            .and_modify(|name| name.push_str(text.trim()))
            .or_insert_with(|| text.trim().to_owned());
    }
}

impl HeaderInformation {
    fn store_record(&mut self, record: &Record) {
        match record.rtype {
            RecordType::Header => {
                self.classification = record.get("classification").trim().to_owned();
                self.dep_date = record.get("depDate").trim().to_owned();
                self.id_code = record.get("idCode").trim().to_owned();
            }
            RecordType::Title => append_text(&mut self.title, record.get("text")),
            RecordType::Compnd => append_text(&mut self.compound, record.get("text")),
            RecordType::Keywds => append_text(&mut self.keywords, record.get("text")),
            RecordType::Expdta => append_text(&mut self.technique, record.get("text")),
            _ => unreachable!("not a header record"),
        }
    }

    fn emit(&self, out: &mut String) {
        if !self.classification.is_empty() || !self.id_code.is_empty() {
            let mut record = Record::empty(RecordType::Header);
            record.set("classification", self.classification.clone());
            record.set("depDate", self.dep_date.clone());
            record.set("idCode", self.id_code.clone());
            out.push_str(&record.emit());
            out.push('\n');
        }

        for (rtype, text) in [
            (RecordType::Title, &self.title),
            (RecordType::Compnd, &self.compound),
            (RecordType::Keywds, &self.keywords),
            (RecordType::Expdta, &self.technique),
        ] {
            if !text.is_empty() {
                let mut record = Record::empty(rtype);
                record.set("text", text.clone());
                out.push_str(&record.emit());
                out.push('\n');
            }
        }
    }
}

/// Relabels a chain of model `model_index` through the shared alphabet:
/// model 1 keeps the original ids, later models walk fresh letters.
fn relabeled_chain(
    model_index: usize,
    chain_order: usize,
    num_chains: usize,
    original: char,
) -> char {
    if model_index <= 1 {
        return original;
    }
    let position = (model_index - 1) * num_chains + chain_order;
    CHAIN_ALPHABET
        .chars()
        .nth(position % CHAIN_ALPHABET.len())
        .unwrap()
}

fn parse_atom(record: &Record, line_no: usize, ter_count: u32) -> Result<AtomRecord> {
    let serial = record
        .get("serial")
        .trim()
        .parse()
        .map_err(|_| Error::Parse {
            line_no,
            kind: ParseErrorKind::BadField("serial", "integer"),
        })?;
    let res_seq = record
        .get("resSeq")
        .trim()
        .parse()
        .map_err(|_| Error::Parse {
            line_no,
            kind: ParseErrorKind::BadField("resSeq", "integer"),
        })?;

    let mut force_no_occupancy = false;
    let mut coordinate = |field: &'static str| -> Result<f64> {
        let raw = record.get(field).trim();
        if raw.eq_ignore_ascii_case("nan") {
            force_no_occupancy = true;
            return Ok(0.0);
        }
        raw.parse().map_err(|_| Error::Parse {
            line_no,
            kind: ParseErrorKind::BadField(field, "real"),
        })
    };
    let x = coordinate("x")?;
    let y = coordinate("y")?;
    let z = coordinate("z")?;

    let occupancy_raw = record.get("occupancy");
    let mut occupancy = if occupancy_raw.trim().is_empty() {
        1.0
    } else {
        occupancy_raw.trim().parse().map_err(|_| Error::Parse {
            line_no,
            kind: ParseErrorKind::BadField("occupancy", "real"),
        })?
    };
    if force_no_occupancy {
        occupancy = -1.0;
    }

    Ok(AtomRecord {
        is_het: record.rtype == RecordType::Hetatm,
        serial,
        name: record.get("name").to_owned(),
        alt_loc: first_char(record.get("altLoc")),
        res_name: record.get("resName").to_owned(),
        chain_id: first_char(record.get("chainID")),
        res_seq,
        i_code: first_char(record.get("iCode")),
        x,
        y,
        z,
        occupancy,
        temperature: record.get("tempFactor").trim().parse().unwrap_or(0.0),
        element: record.get("element").to_owned(),
        ter_count,
    })
}

fn parse_crystal(record: &Record, line_no: usize) -> Result<CrystalInfo> {
    let number = |field: &'static str| -> Result<f64> {
        record.get(field).trim().parse().map_err(|_| Error::Parse {
            line_no,
            kind: ParseErrorKind::BadField(field, "real"),
        })
    };

    Ok(CrystalInfo {
        a: number("a")?,
        b: number("b")?,
        c: number("c")?,
        alpha: number("alpha")?,
        beta: number("beta")?,
        gamma: number("gamma")?,
        space_group: record.get("sGroup").trim().to_owned(),
    })
}

fn emit_atom(atom: &AtomRecord) -> String {
    let rtype = if atom.is_het {
        RecordType::Hetatm
    } else {
        RecordType::Atom
    };
    let mut record = Record::empty(rtype);
    record.set("serial", format!("{:5}", atom.serial));
    record.set("name", atom.name.clone());
    record.set("altLoc", atom.alt_loc.to_string());
    record.set("resName", atom.res_name.clone());
    record.set("chainID", atom.chain_id.to_string());
    record.set("resSeq", format!("{:4}", atom.res_seq));
    record.set("iCode", atom.i_code.to_string());
    record.set("x", format!("{:8.3}", atom.x));
    record.set("y", format!("{:8.3}", atom.y));
    record.set("z", format!("{:8.3}", atom.z));
    record.set("occupancy", format!("{:6.2}", atom.occupancy));
    record.set("tempFactor", format!("{:6.2}", atom.temperature));
    record.set("element", format!("{:>2}", atom.element.trim()));
    record.emit()
}

fn first_char(value: &str) -> char {
    value.chars().next().unwrap_or(' ')
}

fn append_text(target: &mut String, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(trimmed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    const MINIMAL_ATOM: &str =
        "ATOM      1  N   ALA A   1      11.104  13.207  10.000  1.00 20.00           N  ";

    fn two_residue_blob() -> String {
        [
            "HEADER    HYDROLASE                               01-JAN-01   1ABC    ",
            "REMARK   4 GENERATED FOR TESTS",
            MINIMAL_ATOM,
            "ATOM      2  CA  ALA A   1      12.560  13.207  10.000  1.00 20.00           C  ",
            "ATOM      3  N   GLY A   2      13.000  14.600  10.000  1.00 21.50           N  ",
            "TER   ",
        ]
        .join("\n")
    }

    #[test]
    fn parses_a_minimal_atom_record() {
        let fd = FileData::parse(MINIMAL_ATOM).unwrap();

        assert_eq!(fd.chain_ids, vec!['A']);
        let atom = &fd.chains[0][0];
        assert_eq!(atom.name, " N  ");
        assert_eq!(atom.res_name, "ALA");
        assert_eq!(atom.chain_id, 'A');
        assert_eq!(atom.res_seq, 1);
        assert!((atom.x - 11.104).abs() < 1e-9);
        assert!((atom.y - 13.207).abs() < 1e-9);
        assert!((atom.z - 10.0).abs() < 1e-9);
        assert!((atom.occupancy - 1.0).abs() < 1e-9);
        assert!((atom.temperature - 20.0).abs() < 1e-9);
        assert_eq!(atom.element, " N");
    }

    #[test]
    fn emits_the_same_atom_line_back() {
        let fd = FileData::parse(MINIMAL_ATOM).unwrap();
        let blob = fd.emit();
        let first_line = blob.lines().next().unwrap();
        assert_eq!(first_line.trim_end(), MINIMAL_ATOM.trim_end());
    }

    #[test]
    fn parse_emit_round_trip() {
        let fd = FileData::parse(&two_residue_blob()).unwrap();
        let reparsed = FileData::parse(&fd.emit()).unwrap();
        assert_eq!(fd, reparsed);
    }

    #[test]
    fn nan_coordinates_become_zero_with_occupancy_override() {
        let line =
            "ATOM      1  N   ALA A   1           nan  13.207  10.000  1.00 20.00           N  ";
        let fd = FileData::parse(line).unwrap();
        let atom = &fd.chains[0][0];

        assert!((atom.x - 0.0).abs() < 1e-12);
        assert!((atom.occupancy + 1.0).abs() < 1e-12);
    }

    #[test]
    fn blank_occupancy_defaults_to_one() {
        let line =
            "ATOM      1  N   ALA A   1      11.104  13.207  10.000        20.00           N  ";
        let fd = FileData::parse(line).unwrap();
        assert!((fd.chains[0][0].occupancy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let blob = [
            "ATOM      X  N   ALA A   1      11.104  13.207  10.000  1.00 20.00           N  ",
            MINIMAL_ATOM,
        ]
        .join("\n");

        let fd = FileData::parse(&blob).unwrap();
        assert_eq!(fd.chains[0].len(), 1);
        assert_eq!(fd.chains[0][0].serial, 1);
    }

    #[test]
    fn blank_chain_ids_are_preserved_and_joined() {
        let blob = [
            "ATOM      1  N   ALA     1      11.104  13.207  10.000  1.00 20.00           N  ",
            "ATOM      2  CA  ALA     1      12.560  13.207  10.000  1.00 20.00           C  ",
        ]
        .join("\n");

        let fd = FileData::parse(&blob).unwrap();
        assert_eq!(fd.chain_ids, vec![' ']);
        assert_eq!(fd.chains[0].len(), 2);
    }

    #[test]
    fn ter_records_advance_the_ter_count() {
        let blob = [
            MINIMAL_ATOM,
            "TER   ",
            "ATOM      3  N   GLY B   2      13.000  14.600  10.000  1.00 21.50           N  ",
        ]
        .join("\n");

        let fd = FileData::parse(&blob).unwrap();
        assert_eq!(fd.chains[0][0].ter_count, 0);
        assert_eq!(fd.chains[1][0].ter_count, 1);
    }

    #[test]
    fn obey_endmdl_stops_the_parse() {
        let blob = [MINIMAL_ATOM, "ENDMDL", MINIMAL_ATOM].join("\n");

        let lenient = FileData::parse(&blob).unwrap();
        assert_eq!(lenient.chains[0].len(), 2);

        let options = ParseOptions {
            obey_endmdl: true,
            ..ParseOptions::default()
        };
        let strict = FileData::parse_with_options(&blob, &options).unwrap();
        assert_eq!(strict.chains[0].len(), 1);
    }

    #[test]
    fn later_models_are_relabeled_under_new_chain_order() {
        let blob = [
            "MODEL        1",
            MINIMAL_ATOM,
            "ENDMDL",
            "MODEL        2",
            MINIMAL_ATOM,
            "ENDMDL",
        ]
        .join("\n");

        let options = ParseOptions {
            new_chain_order: true,
            ..ParseOptions::default()
        };
        let fd = FileData::parse_with_options(&blob, &options).unwrap();

        assert_eq!(fd.chain_ids, vec!['A', 'B']);
        assert_eq!(fd.model_tag, "2");
    }

    #[test]
    fn residue_records_group_atoms_first_wins() {
        let blob = [
            MINIMAL_ATOM,
            // alternate conformation of the same atom: dropped
            "ATOM      2  N  BALA A   1      99.000  99.000  99.000  0.50 20.00           N  ",
            "ATOM      3  CA  ALA A   1      12.560  13.207  10.000  1.00 20.00           C  ",
            "ATOM      4  N   GLY A   2      13.000  14.600  10.000  1.00 21.50           N  ",
        ]
        .join("\n");

        let fd = FileData::parse(&blob).unwrap();
        let residues = fd.residue_records(&ParseOptions::default());

        assert_eq!(residues.len(), 2);
        assert_eq!(residues[0].res_name, "ALA");
        assert_eq!(residues[0].atoms.len(), 2);
        assert!((residues[0].xyz[" N  "][0] - 11.104).abs() < 1e-9);
        assert_eq!(residues[1].res_name, "GLY");
    }

    #[test]
    fn zero_occupancy_atoms_are_dropped_from_residues() {
        let blob = [
            MINIMAL_ATOM,
            "ATOM      2  CA  ALA A   1      12.560  13.207  10.000  0.00 20.00           C  ",
        ]
        .join("\n");

        let fd = FileData::parse(&blob).unwrap();
        let residues = fd.residue_records(&ParseOptions::default());
        assert_eq!(residues[0].atoms.len(), 1);
    }

    #[test]
    fn missing_density_atoms_are_randomized_far_away() {
        let line =
            "ATOM      1  N   ALA A   1           nan     nan     nan  1.00 20.00           N  ";
        let mut fd = FileData::parse(line).unwrap();
        let mut rng = Pcg64::seed_from_u64(7);

        fd.randomize_missing_coords(&mut rng);

        let atom = &fd.chains[0][0];
        assert!(atom.x >= 900.0 && atom.x < 1000.0);
        assert!(atom.y >= 900.0 && atom.y < 1000.0);
        assert!(atom.z >= 900.0 && atom.z < 1000.0);
    }

    #[test]
    fn link_records_key_on_the_first_partner() {
        let mut record = Record::empty(RecordType::Link);
        record.set("name1", " O1 ");
        record.set("resName1", "GLC");
        record.set("chainID1", "A");
        record.set("resSeq1", " 101");
        record.set("iCode1", " ");
        record.set("name2", " C4 ");
        record.set("resName2", "GLC");
        record.set("chainID2", "A");
        record.set("resSeq2", " 102");
        record.set("iCode2", " ");
        record.set("length", " 1.44");
        let blob = record.emit();

        let fd = FileData::parse(&blob).unwrap();
        let links = &fd.link_map[" 101 A"];
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].res_id2, " 102 A");
        assert!((links[0].length - 1.44).abs() < 1e-9);
    }

    #[test]
    fn hetnam_continuations_join_and_sugar_codes_map_base_names() {
        let mut first = Record::empty(RecordType::Hetnam);
        first.set("hetID", "NAG");
        first.set("text", "N-ACETYL-D-");
        let mut second = Record::empty(RecordType::Hetnam);
        second.set("hetID", "NAG");
        second.set("text", "GLUCOSAMINE");
        let mut sugar = Record::empty(RecordType::Hetnam);
        sugar.set("hetID", "Glc");
        sugar.set("text", "A 101  ->4)-alpha-D-glucopyranosyl");

        let blob = [first.emit(), second.emit(), sugar.emit()].join("\n");
        let fd = FileData::parse(&blob).unwrap();

        assert_eq!(fd.heterogen_names["NAG"], "N-ACETYL-D-GLUCOSAMINE");
        assert_eq!(
            fd.residue_type_base_names[" 101 A"],
            "->4)-alpha-D-glucopyranosyl"
        );
    }

    #[test]
    fn remark_round_trip_keeps_number_and_text() {
        let fd = FileData::parse(&two_residue_blob()).unwrap();
        assert_eq!(fd.remarks.len(), 1);
        assert_eq!(fd.remarks[0].num, 4);
        assert_eq!(fd.remarks[0].value, "GENERATED FOR TESTS");

        let reparsed = FileData::parse(&fd.emit()).unwrap();
        assert_eq!(reparsed.remarks, fd.remarks);
    }

    #[test]
    fn crystal_record_is_parsed() {
        let blob = "CRYST1   52.000   58.000   61.000  90.00  90.00  90.00 P 21 21 21    8   ";
        let fd = FileData::parse(blob).unwrap();
        let crystal = fd.crystal.unwrap();

        assert!((crystal.a - 52.0).abs() < 1e-9);
        assert!((crystal.gamma - 90.0).abs() < 1e-9);
        assert_eq!(crystal.space_group, "P 21 21 21");
    }
}
