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

pub mod hl7_v2_segment;
pub mod hl7_v2_message;

pub use hl7_v2_message::hl7_v2_message::*;
pub use hl7_v2_segment::hl7_v2_segment::*;

#[cfg(test)]
mod tests {
    use crate::{parse_message, Hl7Error};

    #[test]
    fn parses_a_blood_test_result_message() {
        let segments = vec![
            "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240129093837||ORU^R01|||2.5".to_string(),
            "PID|1||497030||Smith^Jane||19800101|F".to_string(),
            "OBR|1|||".to_string(),
            "OBX|1|SN|CREATININE||1.3|mg/dL".to_string(),
        ];
        let message = parse_message(segments).expect("valid message should parse");
        assert_eq!(message.message_type().unwrap(), "ORU^R01");
        let observation = message.observation().expect("OBX segment should be present");
        assert_eq!(observation.test_name, "CREATININE");
        assert_eq!(observation.value, 1.3);
        assert_eq!(message.patient_identifier().unwrap().mrn, "497030");
    }

    #[test]
    fn rejects_a_message_with_no_msh_segment() {
        let segments = vec!["PID|1||497030".to_string()];
        assert_eq!(parse_message(segments).unwrap_err(), Hl7Error::MissingSegment("MSH"));
    }
}
