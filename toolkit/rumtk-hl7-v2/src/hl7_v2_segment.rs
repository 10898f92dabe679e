/*
 * rumtk attempts to implement HL7 and medical protocols for interoperability in medicine.
 * This toolkit aims to be reliable, simple, performant, and standards compliant.
 * Copyright (C) 2025  Luis M. Santos, M.D.
 *
 * This library is free software; you can redistribute it and/or
 * modify it under the terms of the GNU Lesser General Public
 * License as published by the Free Software Foundation; either
 * version 2.1 of the License, or (at your option) any later version.
 *
 * This library is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
 * Lesser General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public
 * License along with this library; if not, write to the Free Software
 * Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA  02110-1301  USA
 */

///
/// A single pipe-delimited HL7 v2 segment, e.g. `PID|1||497030||Smith^John||19800101|M`.
/// This module only splits a segment into its raw fields. It does not know which segment
/// type it is looking at, nor does it validate field content — that is for
/// [crate::hl7_v2_message].
///
pub mod hl7_v2_segment {
    pub const FIELD_SEPARATOR: char = '|';

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Segment {
        /// Raw fields, split on `|`. `fields[0]` is the segment id itself (`MSH`, `PID`, ...).
        fields: Vec<String>,
    }

    impl Segment {
        pub fn parse(raw: &str) -> Segment {
            Segment {
                fields: raw.split(FIELD_SEPARATOR).map(String::from).collect(),
            }
        }

        /// Segment id, e.g. `"PID"`. Empty string for a malformed/blank segment.
        pub fn id(&self) -> &str {
            self.fields.first().map(String::as_str).unwrap_or("")
        }

        /// Field at the given 0-indexed position (so field 0 is the segment id itself,
        /// matching the position HL7 text puts it in after a naive `split('|')`).
        pub fn field(&self, index: usize) -> Option<&str> {
            self.fields.get(index).map(String::as_str)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn splits_fields_on_pipe() {
            let segment = Segment::parse("PID|1||497030||Smith^John||19800101|M");
            assert_eq!(segment.id(), "PID");
            assert_eq!(segment.field(3), Some("497030"));
            assert_eq!(segment.field(7), Some("19800101"));
            assert_eq!(segment.field(8), Some("M"));
        }

        #[test]
        fn missing_field_is_none() {
            let segment = Segment::parse("OBX|1|SN|CREATININE");
            assert_eq!(segment.field(10), None);
        }
    }
}
