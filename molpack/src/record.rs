//! Fixed-width PDB record layer.
//!
//! Every PDB line is classified by its 6-character type prefix and mapped
//! through a per-type column table into a typed [`Record`]: a collection of
//! named fields, each remembering its 1-based inclusive column span and raw
//! value. The mapping is exactly invertible, which is what makes the
//! emitter byte-accurate.

use serde::{Deserialize, Serialize};

/// The PDB record types this crate understands.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[allow(missing_docs)]
pub enum RecordType {
    Header,
    Title,
    Compnd,
    Keywds,
    Expdta,
    Hetnam,
    Link,
    Model,
    Atom,
    Hetatm,
    Ter,
    Endmdl,
    Remark,
    Cryst1,
    End,
    Unknown,
}

impl RecordType {
    /// Classifies a line by its 6-character type prefix.
    #[must_use]
    pub fn classify(prefix: &str) -> Self {
        match prefix {
            "HEADER" => Self::Header,
            "TITLE " => Self::Title,
            "COMPND" => Self::Compnd,
            "KEYWDS" => Self::Keywds,
            "EXPDTA" => Self::Expdta,
            "HETNAM" => Self::Hetnam,
            "LINK  " => Self::Link,
            "MODEL " => Self::Model,
            "ATOM  " => Self::Atom,
            "HETATM" => Self::Hetatm,
            "TER   " => Self::Ter,
            "ENDMDL" => Self::Endmdl,
            "REMARK" => Self::Remark,
            "CRYST1" => Self::Cryst1,
            "END   " => Self::End,
            _ => Self::Unknown,
        }
    }

    /// Returns the canonical 6-character type prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Header => "HEADER",
            Self::Title => "TITLE ",
            Self::Compnd => "COMPND",
            Self::Keywds => "KEYWDS",
            Self::Expdta => "EXPDTA",
            Self::Hetnam => "HETNAM",
            Self::Link => "LINK  ",
            Self::Model => "MODEL ",
            Self::Atom => "ATOM  ",
            Self::Hetatm => "HETATM",
            Self::Ter => "TER   ",
            Self::Endmdl => "ENDMDL",
            Self::Remark => "REMARK",
            Self::Cryst1 => "CRYST1",
            Self::End => "END   ",
            Self::Unknown => "      ",
        }
    }

    /// Returns the `(name, start, end)` column table of this record type,
    /// columns 1-based inclusive. The type prefix itself is not listed.
    #[must_use]
    pub const fn columns(self) -> &'static [(&'static str, usize, usize)] {
        match self {
            Self::Atom | Self::Hetatm => &[
                ("serial", 7, 11),
                ("name", 13, 16),
                ("altLoc", 17, 17),
                ("resName", 18, 20),
                ("chainID", 22, 22),
                ("resSeq", 23, 26),
                ("iCode", 27, 27),
                ("x", 31, 38),
                ("y", 39, 46),
                ("z", 47, 54),
                ("occupancy", 55, 60),
                ("tempFactor", 61, 66),
                ("element", 77, 78),
            ],
            Self::Remark => &[("remarkNum", 8, 10), ("value", 12, 80)],
            Self::Hetnam => &[("hetID", 12, 14), ("text", 16, 70)],
            Self::Link => &[
                ("name1", 13, 16),
                ("altLoc1", 17, 17),
                ("resName1", 18, 20),
                ("chainID1", 22, 22),
                ("resSeq1", 23, 26),
                ("iCode1", 27, 27),
                ("name2", 43, 46),
                ("altLoc2", 47, 47),
                ("resName2", 48, 50),
                ("chainID2", 52, 52),
                ("resSeq2", 53, 56),
                ("iCode2", 57, 57),
                ("length", 74, 78),
            ],
            Self::Header => &[
                ("classification", 11, 40),
                ("depDate", 51, 59),
                ("idCode", 63, 66),
            ],
            Self::Title | Self::Compnd | Self::Keywds | Self::Expdta => &[("text", 11, 80)],
            Self::Model => &[("serial", 11, 14)],
            Self::Cryst1 => &[
                ("a", 7, 15),
                ("b", 16, 24),
                ("c", 25, 33),
                ("alpha", 34, 40),
                ("beta", 41, 47),
                ("gamma", 48, 54),
                ("sGroup", 56, 66),
            ],
            Self::Ter | Self::Endmdl | Self::End | Self::Unknown => &[],
        }
    }
}

/// One named field of a record: its column span and raw value.
#[derive(Clone, Debug, Serialize)]
pub struct Field {
    /// Field name from the column table.
    pub name: &'static str,
    /// 1-based first column.
    pub start: usize,
    /// 1-based last column, inclusive.
    pub end: usize,
    /// Raw column contents, whitespace preserved.
    pub value: String,
}

/// A classified PDB line as a typed field collection.
#[derive(Clone, Debug, Serialize)]
pub struct Record {
    /// The record type decided by the 6-character prefix.
    pub rtype: RecordType,
    /// The fields in column order.
    pub fields: Vec<Field>,
}

impl Record {
    /// Builds an empty record of the given type with all fields blank.
    #[must_use]
    pub fn empty(rtype: RecordType) -> Self {
        let fields = rtype
            .columns()
            .iter()
            .map(|&(name, start, end)| Field {
                name,
                start,
                end,
                value: " ".repeat(end - start + 1),
            })
            .collect();
        Self { rtype, fields }
    }

    /// Classifies `line` and extracts its fields. Lines shorter than 80
    /// columns are padded with spaces first.
    #[must_use]
    pub fn parse_line(line: &str) -> Self {
        let mut padded: String = line.chars().take(80).collect();
        while padded.len() < 80 {
            padded.push(' ');
        }

        let rtype = RecordType::classify(&padded[0..6]);
        let fields = rtype
            .columns()
            .iter()
            .map(|&(name, start, end)| Field {
                name,
                start,
                end,
                value: padded[start - 1..end].to_owned(),
            })
            .collect();

        Self { rtype, fields }
    }

    /// Returns the raw value of `name`.
    ///
    /// # Panics
    ///
    /// Panics if the record type has no such field.
    #[must_use]
    pub fn get(&self, name: &str) -> &str {
        &self
            .fields
            .iter()
            .find(|field| field.name == name)
            .unwrap_or_else(|| panic!("record {:?} has no field `{name}`", self.rtype))
            .value
    }

    /// Overwrites the value of `name`. Values shorter than the column span
    /// are padded on emit; longer values are truncated.
    ///
    /// # Panics
    ///
    /// Panics if the record type has no such field.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let rtype = self.rtype;
        self.fields
            .iter_mut()
            .find(|field| field.name == name)
            .unwrap_or_else(|| panic!("record {rtype:?} has no field `{name}`"))
            .value = value.into();
    }

    /// Renders this record back into an 80-column line.
    #[must_use]
    pub fn emit(&self) -> String {
        let mut line = vec![b' '; 80];
        line[0..6].copy_from_slice(self.rtype.prefix().as_bytes());

        for field in &self.fields {
            let width = field.end - field.start + 1;
            let mut value = field.value.clone();
            value.truncate(width);
            while value.len() < width {
                value.push(' ');
            }
            line[field.start - 1..field.end].copy_from_slice(value.as_bytes());
        }

        String::from_utf8(line).expect("record fields are ascii")
    }
}

/// Splits a blob on LF/CR boundaries, dropping empty lines.
#[must_use]
pub fn split_lines(blob: &str) -> Vec<&str> {
    blob.split(['\n', '\r'])
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM_LINE: &str =
        "ATOM      1  N   ALA A   1      11.104  13.207  10.000  1.00 20.00           N  ";

    #[test]
    fn classifies_by_prefix() {
        assert_eq!(RecordType::classify("ATOM  "), RecordType::Atom);
        assert_eq!(RecordType::classify("HETATM"), RecordType::Hetatm);
        assert_eq!(RecordType::classify("TER   "), RecordType::Ter);
        assert_eq!(RecordType::classify("FOOBAR"), RecordType::Unknown);
    }

    #[test]
    fn extracts_atom_fields_at_their_columns() {
        let record = Record::parse_line(ATOM_LINE);

        assert_eq!(record.rtype, RecordType::Atom);
        assert_eq!(record.get("serial"), "    1");
        assert_eq!(record.get("name"), " N  ");
        assert_eq!(record.get("resName"), "ALA");
        assert_eq!(record.get("chainID"), "A");
        assert_eq!(record.get("resSeq"), "   1");
        assert_eq!(record.get("x"), "  11.104");
        assert_eq!(record.get("occupancy"), "  1.00");
        assert_eq!(record.get("tempFactor"), " 20.00");
        assert_eq!(record.get("element"), " N");
    }

    #[test]
    fn emit_round_trips_an_atom_line() {
        let record = Record::parse_line(ATOM_LINE);
        assert_eq!(record.emit().trim_end(), ATOM_LINE.trim_end());
    }

    #[test]
    fn short_lines_are_padded() {
        let record = Record::parse_line("TER");
        assert_eq!(record.rtype, RecordType::Ter);
        assert_eq!(record.emit().trim_end(), "TER");
    }

    #[test]
    fn link_fields_round_trip_through_their_columns() {
        let mut record = Record::empty(RecordType::Link);
        record.set("name1", " O1 ");
        record.set("resName1", "GLC");
        record.set("chainID1", "A");
        record.set("resSeq1", " 101");
        record.set("name2", " C4 ");
        record.set("resName2", "GLC");
        record.set("chainID2", "A");
        record.set("resSeq2", " 102");
        record.set("length", " 1.44");

        let line = record.emit();
        assert_eq!(&line[12..16], " O1 ");
        assert_eq!(&line[17..20], "GLC");
        assert_eq!(&line[21..22], "A");
        assert_eq!(&line[42..46], " C4 ");
        assert_eq!(&line[73..78], " 1.44");

        let reparsed = Record::parse_line(&line);
        assert_eq!(reparsed.rtype, RecordType::Link);
        assert_eq!(reparsed.get("resSeq1"), " 101");
        assert_eq!(reparsed.get("resSeq2"), " 102");
        assert_eq!(reparsed.get("length"), " 1.44");
    }

    #[test]
    fn split_lines_drops_blank_lines() {
        let blob = "HEADER    X\r\n\r\nEND   \n";
        let lines = split_lines(blob);
        assert_eq!(lines, vec!["HEADER    X", "END   "]);
    }

    #[test]
    fn set_and_emit_respect_field_widths() {
        let mut record = Record::empty(RecordType::Remark);
        record.set("remarkNum", "  4");
        record.set("value", "GENERATED BY TEST");

        let line = record.emit();
        assert!(line.starts_with("REMARK   4 GENERATED BY TEST"));
        assert_eq!(line.len(), 80);
    }
}
