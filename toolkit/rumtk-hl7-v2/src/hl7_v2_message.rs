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
/// Typed field access over the three segments this service ever reads: `MSH`
/// (message type), `PID` (patient demographics), and `OBX` (observation
/// result). This is deliberately not a general HL7 v2 type system — no
/// optionality rules, no base-type catalogue, no FHIR conversion. A field
/// that is absent or malformed is surfaced as [Hl7Error], never guessed at.
///
pub mod hl7_v2_message {
    use chrono::{Datelike, NaiveDate};
    use thiserror::Error;

    use crate::hl7_v2_segment::hl7_v2_segment::Segment;

    const MSH_MESSAGE_TYPE_FIELD: usize = 8;
    const PID_MRN_FIELD: usize = 3;
    const PID_DATE_OF_BIRTH_FIELD: usize = 7;
    const PID_SEX_FIELD: usize = 8;
    const OBX_TEST_NAME_FIELD: usize = 3;
    const OBX_VALUE_FIELD: usize = 5;

    const DATE_OF_BIRTH_FORMAT: &str = "%Y%m%d";

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Hl7Error {
        #[error("message has no {0} segment")]
        MissingSegment(&'static str),
        #[error("{segment} is missing field {field}")]
        MissingField { segment: &'static str, field: usize },
        #[error("{segment} field {field} ({value:?}) is not a valid {expected}")]
        MalformedField {
            segment: &'static str,
            field: usize,
            value: String,
            expected: &'static str,
        },
    }

    /// Sex as carried on a `PID` segment. Anything other than `M`/`F` is a parse error —
    /// the service has no use for unknown/other administrative sex codes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Sex {
        Male,
        Female,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct PatientIdentifier {
        pub mrn: String,
        pub date_of_birth: NaiveDate,
        pub sex: Sex,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Observation {
        pub mrn: String,
        pub test_name: String,
        pub value: f64,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Message {
        segments: Vec<Segment>,
    }

    fn find<'a>(segments: &'a [Segment], id: &'static str) -> Result<&'a Segment, Hl7Error> {
        segments
            .iter()
            .find(|segment| segment.id() == id)
            .ok_or(Hl7Error::MissingSegment(id))
    }

    fn field<'a>(segment: &'a Segment, id: &'static str, index: usize) -> Result<&'a str, Hl7Error> {
        segment
            .field(index)
            .filter(|value| !value.is_empty())
            .ok_or(Hl7Error::MissingField { segment: id, field: index })
    }

    impl Message {
        /// Message type, e.g. `"ORU^R01"` or `"ADT^A01"` (`MSH` field 9).
        pub fn message_type(&self) -> Result<&str, Hl7Error> {
            let msh = find(&self.segments, "MSH")?;
            field(msh, "MSH", MSH_MESSAGE_TYPE_FIELD)
        }

        /// Demographics carried on the `PID` segment (MRN, date of birth, sex).
        pub fn patient_identifier(&self) -> Result<PatientIdentifier, Hl7Error> {
            let pid = find(&self.segments, "PID")?;
            let mrn = validated_mrn(pid, PID_MRN_FIELD)?;

            let dob_raw = field(pid, "PID", PID_DATE_OF_BIRTH_FIELD)?;
            let date_of_birth = NaiveDate::parse_from_str(dob_raw, DATE_OF_BIRTH_FORMAT).map_err(|_| {
                Hl7Error::MalformedField {
                    segment: "PID",
                    field: PID_DATE_OF_BIRTH_FIELD,
                    value: dob_raw.to_string(),
                    expected: "YYYYMMDD date",
                }
            })?;

            let sex_raw = field(pid, "PID", PID_SEX_FIELD)?;
            let sex = match sex_raw {
                "M" => Sex::Male,
                "F" => Sex::Female,
                other => {
                    return Err(Hl7Error::MalformedField {
                        segment: "PID",
                        field: PID_SEX_FIELD,
                        value: other.to_string(),
                        expected: "M or F",
                    })
                }
            };

            Ok(PatientIdentifier { mrn, date_of_birth, sex })
        }

        /// Test name and numeric result carried on the `OBX` segment.
        pub fn observation(&self) -> Result<Observation, Hl7Error> {
            let pid = find(&self.segments, "PID")?;
            let mrn = validated_mrn(pid, PID_MRN_FIELD)?;

            let obx = find(&self.segments, "OBX")?;
            let test_name = field(obx, "OBX", OBX_TEST_NAME_FIELD)?.to_string();
            let value_raw = field(obx, "OBX", OBX_VALUE_FIELD)?;
            let value: f64 = value_raw.parse().map_err(|_| Hl7Error::MalformedField {
                segment: "OBX",
                field: OBX_VALUE_FIELD,
                value: value_raw.to_string(),
                expected: "floating point number",
            })?;
            if !(value > 0.0) {
                return Err(Hl7Error::MalformedField {
                    segment: "OBX",
                    field: OBX_VALUE_FIELD,
                    value: value_raw.to_string(),
                    expected: "positive real number",
                });
            }

            Ok(Observation { mrn, test_name, value })
        }
    }

    /// MRN is required to be an all-digit identifier; anything else is a validation failure.
    fn validated_mrn(pid: &Segment, index: usize) -> Result<String, Hl7Error> {
        let raw = field(pid, "PID", index)?;
        if raw.chars().all(|c| c.is_ascii_digit()) {
            Ok(raw.to_string())
        } else {
            Err(Hl7Error::MalformedField {
                segment: "PID",
                field: index,
                value: raw.to_string(),
                expected: "all-digit MRN",
            })
        }
    }

    ///
    /// Parses a decoded MLLP block (the `Vec<String>` segments
    /// `rumtk_mllp::mllp::mllp_decode` produces) into a [Message]. Parsing only requires
    /// an `MSH` segment to be present; `PID`/`OBX` are resolved lazily by
    /// [Message::patient_identifier]/[Message::observation] since which one is present
    /// depends on the message type.
    ///
    pub fn parse_message(raw_segments: Vec<String>) -> Result<Message, Hl7Error> {
        let segments: Vec<Segment> = raw_segments.iter().map(|s| Segment::parse(s)).collect();
        find(&segments, "MSH")?;
        Ok(Message { segments })
    }

    ///
    /// Age in whole years as of `today`, using the same proleptic comparison the rest of
    /// the clinical stack relies on: a birthday not yet reached this year does not count.
    ///
    pub fn calculate_age(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
        let mut age = today.year() - date_of_birth.year();
        if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
            age -= 1;
        }
        age
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn oru_message(test_name: &str, value: &str) -> Message {
            parse_message(vec![
                "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240129093837||ORU^R01|||2.5".to_string(),
                "PID|1||497030".to_string(),
                format!("OBX|1|SN|{}||{}|mg/dL", test_name, value),
            ])
            .unwrap()
        }

        #[test]
        fn reads_message_type() {
            let message = oru_message("CREATININE", "1.3");
            assert_eq!(message.message_type().unwrap(), "ORU^R01");
        }

        #[test]
        fn reads_observation_fields() {
            let message = oru_message("CREATININE", "1.3");
            let obs = message.observation().unwrap();
            assert_eq!(obs.mrn, "497030");
            assert_eq!(obs.test_name, "CREATININE");
            assert_eq!(obs.value, 1.3);
        }

        #[test]
        fn rejects_non_numeric_observation_value() {
            let message = oru_message("CREATININE", "not-a-number");
            assert!(matches!(message.observation(), Err(Hl7Error::MalformedField { .. })));
        }

        #[test]
        fn reads_patient_demographics() {
            let message = parse_message(vec![
                "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240129093837||ADT^A01|||2.5".to_string(),
                "PID|1||497030||Smith^John||19800101|M".to_string(),
            ])
            .unwrap();
            let pid = message.patient_identifier().unwrap();
            assert_eq!(pid.mrn, "497030");
            assert_eq!(pid.date_of_birth, NaiveDate::from_ymd_opt(1980, 1, 1).unwrap());
            assert_eq!(pid.sex, Sex::Male);
        }

        #[test]
        fn rejects_unknown_sex_code() {
            let message = parse_message(vec![
                "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240129093837||ADT^A01|||2.5".to_string(),
                "PID|1||497030||Smith^John||19800101|U".to_string(),
            ])
            .unwrap();
            assert!(matches!(
                message.patient_identifier(),
                Err(Hl7Error::MalformedField { field: PID_SEX_FIELD, .. })
            ));
        }

        #[test]
        fn rejects_a_non_numeric_mrn() {
            let message = parse_message(vec![
                "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240129093837||ORU^R01|||2.5".to_string(),
                "PID|1||4970A0".to_string(),
                "OBX|1|SN|CREATININE||1.3|mg/dL".to_string(),
            ])
            .unwrap();
            assert!(matches!(message.observation(), Err(Hl7Error::MalformedField { segment: "PID", .. })));
        }

        #[test]
        fn rejects_a_non_positive_creatinine_value() {
            let message = oru_message("CREATININE", "-1.0");
            assert!(matches!(message.observation(), Err(Hl7Error::MalformedField { segment: "OBX", .. })));
        }

        #[test]
        fn calculates_age_before_and_after_birthday() {
            let dob = NaiveDate::from_ymd_opt(1990, 6, 15).unwrap();
            assert_eq!(calculate_age(dob, NaiveDate::from_ymd_opt(2026, 6, 14).unwrap()), 35);
            assert_eq!(calculate_age(dob, NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()), 36);
        }
    }
}
