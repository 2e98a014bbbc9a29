//! SQLite store
//!
//! One connection per server process. Every tool invocation borrows it through
//! [`Store::with_transaction`], which commits on success and rolls back on any
//! error or unwind; the lock is released on every exit path.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    species TEXT NOT NULL,
    breed TEXT,
    gender TEXT,
    birth_date TEXT,
    microchip_number TEXT
);

CREATE TABLE IF NOT EXISTS appointments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id TEXT NOT NULL REFERENCES patients (id),
    date TEXT NOT NULL,
    status TEXT NOT NULL,
    notes TEXT,
    appointment_type TEXT
);

CREATE TABLE IF NOT EXISTS weight_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id TEXT NOT NULL REFERENCES patients (id),
    weight REAL NOT NULL CHECK (weight > 0),
    date TEXT NOT NULL,
    note TEXT
);

CREATE TABLE IF NOT EXISTS vaccinations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id TEXT NOT NULL REFERENCES patients (id),
    type TEXT NOT NULL,
    date TEXT NOT NULL,
    expiration_date TEXT
);
";

const SEED: &str = "
INSERT INTO patients (id, name, species, breed, gender, birth_date, microchip_number) VALUES
    ('P001', 'Max', 'Dog', 'Labrador Retriever', 'Male', '2018-05-10', 'MC123456'),
    ('P002', 'Luna', 'Cat', 'Maine Coon', 'Female', '2019-03-15', 'MC789012'),
    ('P003', 'Charlie', 'Dog', 'Golden Retriever', 'Male', '2020-11-20', 'MC345678');

INSERT INTO appointments (patient_id, date, status, notes, appointment_type) VALUES
    ('P001', '2023-11-15 10:00', 'Completed', 'Annual checkup', 'Checkup'),
    ('P002', '2023-12-05 14:30', 'Scheduled', 'Vaccination due', 'Vaccination'),
    ('P003', '2023-11-28 11:15', 'Completed', 'Limping on left hind leg', 'Examination');

INSERT INTO weight_records (patient_id, weight, date, note) VALUES
    ('P001', 32.5, '2023-11-15', 'Healthy weight'),
    ('P002', 12.2, '2023-10-20', 'Slightly overweight'),
    ('P003', 28.7, '2023-11-28', 'Weight stable');

INSERT INTO vaccinations (patient_id, type, date, expiration_date) VALUES
    ('P001', 'Rabies', '2023-01-15', '2024-01-15'),
    ('P002', 'FVRCP', '2023-08-10', '2024-08-10'),
    ('P003', 'DHPP', '2023-04-22', '2024-04-22');
";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`; `:memory:` gives a private in-memory database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        debug!(path = %path.display(), "opened clinic database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert the sample patients if the database holds none
    pub fn seed_if_empty(&self) -> Result<bool> {
        self.with_transaction(|tx| {
            let count: i64 = tx.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
            if count > 0 {
                return Ok(false);
            }
            tx.execute_batch(SEED)?;
            info!("seeded clinic database with sample patients");
            Ok(true)
        })
    }

    /// Run `f` inside one transaction
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClinicError;

    fn patient_count(store: &Store) -> i64 {
        store
            .with_transaction(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_seeds_once() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.seed_if_empty().unwrap());
        assert!(!store.seed_if_empty().unwrap());
        assert_eq!(patient_count(&store), 3);
    }

    #[test]
    fn test_error_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.with_transaction(|tx| {
            tx.execute("INSERT INTO patients (id, name, species) VALUES ('P100', 'Rex', 'Dog')", [])?;
            Err(ClinicError::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(patient_count(&store), 0);
    }

    #[test]
    fn test_lock_is_released_after_panic() {
        let store = Store::open_in_memory().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = store.with_transaction(|tx| {
                tx.execute("INSERT INTO patients (id, name, species) VALUES ('P100', 'Rex', 'Dog')", [])?;
                panic!("tool blew up");
            });
        }));
        assert!(outcome.is_err());
        assert_eq!(patient_count(&store), 0);
    }

    #[test]
    fn test_rejects_orphan_records() {
        let store = Store::open_in_memory().unwrap();
        let result = store.with_transaction(|tx| {
            Ok(tx.execute(
                "INSERT INTO weight_records (patient_id, weight, date) VALUES ('P999', 3.0, '2024-01-01')",
                [],
            )?)
        });
        assert!(matches!(result, Err(ClinicError::Database(_))));
    }
}
