pub mod atomic;

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, params};

use crate::panel::classify::{LinkOutcome, LinkedPerson, MatchClass};
use crate::record::InterviewRecord;
use crate::wave::Wave;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Json(serde_json::Error),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::Corrupt(reason) => write!(f, "panel store is corrupt: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkRun {
    pub window_start: String,
    pub linked_at: String,
    pub household_count: u64,
    pub group_count: u64,
    pub person_count: u64,
}

pub struct PanelStore {
    conn: Connection,
}

impl PanelStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            self.create_schema()?;
            self.conn.execute_batch("PRAGMA user_version = 2;")?;
        } else if version == 1 {
            self.conn.execute_batch(
                "
                ALTER TABLE person_records ADD COLUMN income_class TEXT;
                PRAGMA user_version = 2;
                ",
            )?;
        } else if version == 2 {
            self.create_schema()?;
        } else {
            return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        Ok(())
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS link_runs (
                window_start TEXT NOT NULL UNIQUE,
                linked_at TEXT NOT NULL,
                household_count INTEGER NOT NULL,
                group_count INTEGER NOT NULL,
                person_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS persons (
                window_start TEXT NOT NULL,
                person_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                match_class INTEGER NOT NULL CHECK (match_class BETWEEN 1 AND 5),
                sex TEXT NOT NULL,
                birth_date TEXT NOT NULL,
                presence INTEGER NOT NULL,
                group_slots INTEGER NOT NULL,
                UNIQUE(window_start, person_id)
            );

            CREATE INDEX IF NOT EXISTS idx_persons_window ON persons(window_start);

            CREATE TABLE IF NOT EXISTS person_records (
                window_start TEXT NOT NULL,
                person_id TEXT NOT NULL,
                period TEXT NOT NULL,
                record TEXT NOT NULL,
                log_habitual_total REAL,
                income_class TEXT,
                UNIQUE(window_start, person_id, period)
            );

            CREATE INDEX IF NOT EXISTS idx_person_records_window
                ON person_records(window_start, period);
            ",
        )?;
        Ok(())
    }

    pub fn has_window(&self, window_start: Wave) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM link_runs WHERE window_start = ?1",
            params![window_start.label()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn replace_window(
        &mut self,
        window_start: Wave,
        linked_at: &str,
        outcome: &LinkOutcome,
    ) -> Result<(), StoreError> {
        let window = window_start.label();
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM persons WHERE window_start = ?1", params![window])?;
        tx.execute(
            "DELETE FROM person_records WHERE window_start = ?1",
            params![window],
        )?;
        tx.execute(
            "DELETE FROM link_runs WHERE window_start = ?1",
            params![window],
        )?;

        for person in &outcome.persons {
            tx.execute(
                "INSERT INTO persons (
                    window_start, person_id, group_id, match_class,
                    sex, birth_date, presence, group_slots
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    window,
                    person.person_id,
                    person.group_id,
                    person.match_class.as_u8(),
                    person.sex,
                    person.birth_date,
                    person.presence(),
                    person.group_slot_count
                ],
            )?;
            for record in &person.records {
                tx.execute(
                    "INSERT INTO person_records (
                        window_start, person_id, period, record,
                        log_habitual_total, income_class
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        window,
                        person.person_id,
                        record.wave().label(),
                        serde_json::to_string(record).map_err(StoreError::Json)?,
                        log_habitual_total(record),
                        income_class(record)
                    ],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO link_runs (
                window_start, linked_at, household_count, group_count, person_count
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                window,
                linked_at,
                outcome.household_count,
                outcome.group_count,
                outcome.persons.len() as u64
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn link_runs(&self) -> Result<Vec<LinkRun>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT window_start, linked_at, household_count, group_count, person_count
             FROM link_runs
             ORDER BY window_start ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(LinkRun {
                window_start: row.get(0)?,
                linked_at: row.get(1)?,
                household_count: row.get::<_, i64>(2)? as u64,
                group_count: row.get::<_, i64>(3)? as u64,
                person_count: row.get::<_, i64>(4)? as u64,
            });
        }
        Ok(out)
    }

    pub fn class_counts(&self, window_start: Wave) -> Result<BTreeMap<u8, u64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT match_class, COUNT(*)
             FROM persons
             WHERE window_start = ?1
             GROUP BY match_class
             ORDER BY match_class ASC",
        )?;
        let mut rows = stmt.query(params![window_start.label()])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let class: i64 = row.get(0)?;
            let count: i64 = row.get(1)?;
            out.insert(class as u8, count as u64);
        }
        Ok(out)
    }

    pub fn linked_persons(&self, window_start: Wave) -> Result<Vec<LinkedPerson>, StoreError> {
        let window = window_start.label();
        let mut stmt = self.conn.prepare(
            "SELECT person_id, group_id, match_class, sex, birth_date, group_slots
             FROM persons
             WHERE window_start = ?1
             ORDER BY person_id ASC",
        )?;
        let mut records_stmt = self.conn.prepare(
            "SELECT record FROM person_records
             WHERE window_start = ?1 AND person_id = ?2
             ORDER BY period ASC",
        )?;

        let mut rows = stmt.query(params![window])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let person_id: String = row.get(0)?;
            let class_code: i64 = row.get(2)?;
            let match_class = MatchClass::from_u8(class_code as u8).ok_or_else(|| {
                StoreError::Corrupt(format!("unknown match class {class_code}"))
            })?;

            let mut record_rows = records_stmt.query(params![window, person_id])?;
            let mut records: Vec<InterviewRecord> = Vec::new();
            while let Some(record_row) = record_rows.next()? {
                let raw: String = record_row.get(0)?;
                records.push(serde_json::from_str(&raw)?);
            }

            out.push(LinkedPerson {
                person_id,
                group_id: row.get(1)?,
                match_class,
                sex: row.get(3)?,
                birth_date: row.get(4)?,
                records,
                group_slot_count: row.get::<_, i64>(5)? as usize,
            });
        }
        Ok(out)
    }

    /// Records of complete-panel persons (linkable class, all five interviews)
    /// observed in one period of a window.
    pub fn panel_records(
        &self,
        window_start: Wave,
        period: Wave,
    ) -> Result<Vec<InterviewRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.record
             FROM person_records r
             JOIN persons p
               ON p.window_start = r.window_start AND p.person_id = r.person_id
             WHERE r.window_start = ?1
               AND r.period = ?2
               AND p.match_class <= ?3
               AND p.presence = ?4
             ORDER BY r.person_id ASC",
        )?;
        let mut rows = stmt.query(params![
            window_start.label(),
            period.label(),
            MatchClass::Recomposed.as_u8(),
            crate::wave::PANEL_WINDOW_LEN
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            out.push(serde_json::from_str(&raw)?);
        }
        Ok(out)
    }

    pub fn income_class_counts(
        &self,
        window_start: Wave,
    ) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT income_class, COUNT(*)
             FROM person_records
             WHERE window_start = ?1 AND income_class IS NOT NULL
             GROUP BY income_class
             ORDER BY income_class ASC",
        )?;
        let mut rows = stmt.query(params![window_start.label()])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let class: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            out.insert(class, count as u64);
        }
        Ok(out)
    }
}

pub fn log_habitual_total(record: &InterviewRecord) -> Option<f64> {
    record
        .habitual_total
        .filter(|value| *value > 0.0)
        .map(f64::ln)
}

// Ranked E up to A; a band per minimum-wage multiple, open-ended above five.
const INCOME_CLASS_LABELS: [&str; 5] = ["E", "D", "C", "B", "A"];

/// Economic class of a record's habitual income, in minimum-wage multiples
/// for the record's year. Incomes at or below one wage, and years without a
/// known wage, stay unlabelled.
pub fn income_class(record: &InterviewRecord) -> Option<&'static str> {
    let income = record.habitual_total?;
    let wage = minimum_wage(record.year, record.quarter)?;
    let multiple = income / wage;
    let rank = [1.0, 2.0, 3.0, 4.0, 5.0]
        .iter()
        .filter(|threshold| multiple > **threshold)
        .count();
    if rank == 0 {
        None
    } else {
        Some(INCOME_CLASS_LABELS[rank - 1])
    }
}

// The 2023 raise landed in May, so 2023T1 keeps the January value.
fn minimum_wage(year: u16, quarter: u8) -> Option<f64> {
    let wage = match (year, quarter) {
        (2012, _) => 622.0,
        (2013, _) => 678.0,
        (2014, _) => 724.0,
        (2015, _) => 788.0,
        (2016, _) => 880.0,
        (2017, _) => 937.0,
        (2018, _) => 954.0,
        (2019, _) => 998.0,
        (2020, _) => 1045.0,
        (2021, _) => 1100.0,
        (2022, _) => 1212.0,
        (2023, 1) => 1302.0,
        (2023, _) => 1320.0,
        (2024, _) => 1412.0,
        (2025, _) => 1518.0,
        _ => return None,
    };
    Some(wage)
}
