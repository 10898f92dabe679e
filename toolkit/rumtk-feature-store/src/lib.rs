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
/// Durable per-patient feature store backed by a single SQLite file, plus the
/// in-process set of MRNs awaiting demographics before a prediction can be
/// attempted. Both live behind one mutex so a creatinine result and a
/// demographics update can never interleave on the same patient.
///
pub mod feature_store {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;

    use rusqlite::{params, Connection, OptionalExtension};
    use thiserror::Error;

    pub use rumtk_hl7_v2::Sex;

    pub type Mrn = String;

    #[derive(Error, Debug)]
    pub enum FeatureStoreError {
        #[error("sqlite error: {0}")]
        Sqlite(#[from] rusqlite::Error),
        #[error("io error reading preload file: {0}")]
        Io(#[from] std::io::Error),
        #[error("malformed preload row: {0}")]
        MalformedCsvRow(String),
        #[error("feature store mutex was poisoned by a panicking thread")]
        Poisoned,
    }

    /// Number of most recent creatinine results retained per patient.
    pub const TEST_HISTORY_LENGTH: usize = 5;

    /// A patient's demographics plus up to five most recent creatinine results,
    /// most recent first.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PatientRecord {
        pub mrn: Mrn,
        pub age: Option<i32>,
        pub sex: Option<Sex>,
        pub tests: [Option<f64>; TEST_HISTORY_LENGTH],
    }

    /// The feature vector the predictor consumes: age, sex (1.0 = female, 0.0 =
    /// male), then the five most recent creatinine results, most recent first.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct FeatureVector {
        pub age: f64,
        pub sex: f64,
        pub tests: [f64; TEST_HISTORY_LENGTH],
    }

    impl FeatureVector {
        pub fn as_array(&self) -> [f64; TEST_HISTORY_LENGTH + 2] {
            let mut out = [0.0; TEST_HISTORY_LENGTH + 2];
            out[0] = self.age;
            out[1] = self.sex;
            out[2..].copy_from_slice(&self.tests);
            out
        }
    }

    fn sex_to_code(sex: Sex) -> i32 {
        match sex {
            Sex::Female => 1,
            Sex::Male => 0,
        }
    }

    fn code_to_sex(code: i32) -> Sex {
        if code == 1 {
            Sex::Female
        } else {
            Sex::Male
        }
    }

    /// Outcome of feeding a new creatinine result into the store.
    #[derive(Debug, Clone, PartialEq)]
    pub enum IngestOutcome {
        /// Demographics are present; a prediction was attempted on this vector.
        Ready(FeatureVector),
        /// Demographics are still missing; the MRN has been (re-)marked pending.
        Pending,
    }

    struct Inner {
        conn: Connection,
        pending: HashSet<Mrn>,
    }

    pub struct FeatureStore {
        inner: Mutex<Inner>,
    }

    const SCHEMA: &str = "
        CREATE TABLE IF NOT EXISTS patient_history (
            mrn TEXT PRIMARY KEY,
            age INTEGER,
            sex INTEGER,
            test_1 REAL,
            test_2 REAL,
            test_3 REAL,
            test_4 REAL,
            test_5 REAL
        )";

    impl FeatureStore {
        /// Opens (creating if absent) the SQLite file at `path`, enabling WAL mode so a
        /// snapshot read never blocks behind an in-flight shift transaction.
        pub fn open(path: &Path) -> Result<Self, FeatureStoreError> {
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn.execute(SCHEMA, [])?;
            Ok(FeatureStore {
                inner: Mutex::new(Inner { conn, pending: HashSet::new() }),
            })
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, FeatureStoreError> {
            self.inner.lock().map_err(|_| FeatureStoreError::Poisoned)
        }

        /// Upserts a patient's age/sex, as driven by an `ADT^A01` admit message.
        /// Does not itself touch the pending set — removal only happens on a
        /// subsequent attempted prediction.
        pub fn ingest_demographics(&self, mrn: &str, age: i32, sex: Sex) -> Result<(), FeatureStoreError> {
            let guard = self.lock()?;
            guard.conn.execute(
                "INSERT INTO patient_history (mrn, age, sex) VALUES (?1, ?2, ?3)
                 ON CONFLICT(mrn) DO UPDATE SET age=excluded.age, sex=excluded.sex",
                params![mrn, age, sex_to_code(sex)],
            )?;
            Ok(())
        }

        ///
        /// Shifts in a new creatinine result (`test_1 := value`, the rest shift down,
        /// oldest dropped), applying the "online fan-out" rule the first time a patient
        /// has no recorded tests yet: the first observation fills all five slots rather
        /// than leaving four of them `NULL`. Returns [IngestOutcome::Ready] with the
        /// vector a prediction was attempted against, or [IngestOutcome::Pending] if
        /// demographics have not arrived yet — in which case the MRN is (re-)added to
        /// the pending set. Any outcome removes the MRN from the pending set first, so a
        /// retried prediction attempt never leaves a stale pending entry behind.
        ///
        pub fn ingest_creatinine(&self, mrn: &str, value: f64) -> Result<IngestOutcome, FeatureStoreError> {
            let mut guard = self.lock()?;
            let tx = guard.conn.transaction()?;

            let existing: Option<(Option<i32>, Option<i32>, [Option<f64>; TEST_HISTORY_LENGTH])> = tx
                .query_row(
                    "SELECT age, sex, test_1, test_2, test_3, test_4, test_5 FROM patient_history WHERE mrn = ?1",
                    params![mrn],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?],
                        ))
                    },
                )
                .optional()?;

            let (age, sex, tests) = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO patient_history (mrn, test_1, test_2, test_3, test_4, test_5)
                         VALUES (?1, ?2, ?2, ?2, ?2, ?2)",
                        params![mrn, value],
                    )?;
                    (None, None, [Some(value); TEST_HISTORY_LENGTH])
                }
                Some((age, sex, existing_tests)) if existing_tests.iter().all(Option::is_none) => {
                    tx.execute(
                        "UPDATE patient_history SET test_1=?1, test_2=?1, test_3=?1, test_4=?1, test_5=?1 WHERE mrn=?2",
                        params![value, mrn],
                    )?;
                    (age, sex, [Some(value); TEST_HISTORY_LENGTH])
                }
                Some((age, sex, existing_tests)) => {
                    tx.execute(
                        "UPDATE patient_history
                         SET test_5=test_4, test_4=test_3, test_3=test_2, test_2=test_1, test_1=?1
                         WHERE mrn=?2",
                        params![value, mrn],
                    )?;
                    let mut tests = [Some(value), existing_tests[0], existing_tests[1], existing_tests[2], existing_tests[3]];
                    for slot in tests.iter_mut() {
                        if slot.is_none() {
                            *slot = Some(value);
                        }
                    }
                    (age, sex, tests)
                }
            };

            tx.commit()?;
            guard.pending.remove(mrn);

            match (age, sex) {
                (Some(age), Some(sex_code)) => {
                    let resolved_tests: [f64; TEST_HISTORY_LENGTH] = {
                        let mut out = [0.0; TEST_HISTORY_LENGTH];
                        for (dst, src) in out.iter_mut().zip(tests.iter()) {
                            *dst = src.unwrap_or(value);
                        }
                        out
                    };
                    Ok(IngestOutcome::Ready(FeatureVector {
                        age: age as f64,
                        sex: sex_code as f64,
                        tests: resolved_tests,
                    }))
                }
                _ => {
                    guard.pending.insert(mrn.to_string());
                    Ok(IngestOutcome::Pending)
                }
            }
        }

        /// Read-only snapshot of everything stored for `mrn`.
        pub fn snapshot_features(&self, mrn: &str) -> Result<Option<PatientRecord>, FeatureStoreError> {
            let guard = self.lock()?;
            guard
                .conn
                .query_row(
                    "SELECT age, sex, test_1, test_2, test_3, test_4, test_5 FROM patient_history WHERE mrn = ?1",
                    params![mrn],
                    |row| {
                        let age: Option<i32> = row.get(0)?;
                        let sex: Option<i32> = row.get(1)?;
                        Ok(PatientRecord {
                            mrn: mrn.to_string(),
                            age,
                            sex: sex.map(code_to_sex),
                            tests: [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?],
                        })
                    },
                )
                .optional()
                .map_err(FeatureStoreError::from)
        }

        /// MRNs currently awaiting demographics before a prediction can complete.
        pub fn pending_mrns(&self) -> Result<Vec<Mrn>, FeatureStoreError> {
            let guard = self.lock()?;
            Ok(guard.pending.iter().cloned().collect())
        }

        ///
        /// Called after demographics arrive for an MRN that is in the pending set.
        /// If the record is now fully populated, removes `mrn` from pending and returns
        /// the feature vector a prediction should be attempted against. Returns `None`
        /// without touching the pending set if `mrn` was not pending, or if it still
        /// lacks a creatinine history (admission arrived but no lab result yet).
        ///
        pub fn resolve_pending(&self, mrn: &str) -> Result<Option<FeatureVector>, FeatureStoreError> {
            let mut guard = self.lock()?;
            if !guard.pending.contains(mrn) {
                return Ok(None);
            }

            let row: Option<(Option<i32>, Option<i32>, [Option<f64>; TEST_HISTORY_LENGTH])> = guard
                .conn
                .query_row(
                    "SELECT age, sex, test_1, test_2, test_3, test_4, test_5 FROM patient_history WHERE mrn = ?1",
                    params![mrn],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            [row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?],
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((Some(age), Some(sex_code), tests)) if tests.iter().all(Option::is_some) => {
                    guard.pending.remove(mrn);
                    let mut resolved = [0.0; TEST_HISTORY_LENGTH];
                    for (dst, src) in resolved.iter_mut().zip(tests.iter()) {
                        *dst = src.unwrap();
                    }
                    Ok(Some(FeatureVector { age: age as f64, sex: sex_code as f64, tests: resolved }))
                }
                _ => Ok(None),
            }
        }

        ///
        /// Bootstraps the store from a historical CSV export: header row, MRN in
        /// column 0, optional age/sex in columns that may be blank, then an
        /// alternating test-name/test-value sequence from column 2 onward (most
        /// recent last). Only meant to run once against an empty database file at
        /// startup. Unlike the legacy preload this fills any test slot beyond what
        /// the CSV provides using the online fan-out rule (repeat the most recent
        /// value) rather than the historical mean, per the uniform online policy
        /// the rest of the store follows.
        ///
        pub fn preload_from_csv(&self, path: &Path) -> Result<usize, FeatureStoreError> {
            let contents = std::fs::read_to_string(path)?;
            let mut rows = contents.lines();
            rows.next(); // header

            let mut loaded = 0usize;
            for line in rows {
                if line.trim().is_empty() {
                    continue;
                }
                let fields: Vec<&str> = line.split(',').filter(|f| !f.is_empty()).collect();
                if fields.is_empty() {
                    continue;
                }
                let mrn = fields[0];

                let mut values: Vec<f64> = Vec::new();
                let mut i = 2;
                while i < fields.len() {
                    let value: f64 = fields[i]
                        .parse()
                        .map_err(|_| FeatureStoreError::MalformedCsvRow(line.to_string()))?;
                    values.push(value);
                    i += 2;
                }
                values.reverse(); // most recent first

                let mut tests = [None; TEST_HISTORY_LENGTH];
                let most_recent = values.first().copied().unwrap_or(0.0);
                for (i, slot) in tests.iter_mut().enumerate() {
                    *slot = Some(values.get(i).copied().unwrap_or(most_recent));
                }

                let guard = self.lock()?;
                guard.conn.execute(
                    "INSERT INTO patient_history (mrn, age, sex, test_1, test_2, test_3, test_4, test_5)
                     VALUES (?1, NULL, NULL, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(mrn) DO UPDATE SET
                        test_1=excluded.test_1, test_2=excluded.test_2, test_3=excluded.test_3,
                        test_4=excluded.test_4, test_5=excluded.test_5",
                    params![mrn, tests[0], tests[1], tests[2], tests[3], tests[4]],
                )?;
                loaded += 1;
            }

            Ok(loaded)
        }
    }

}
