//! SQL data access for patients and their records.
//!
//! Stateless functions over a `&Connection`; callers own the transaction.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{ClinicError, Result};
use crate::model::{Appointment, Patient, PatientChanges, PatientHistory, Vaccination, WeightRecord};

pub struct PatientRepository;

impl PatientRepository {
    // ─────────────────────────────────────────────────────────────────────
    // Patients
    // ─────────────────────────────────────────────────────────────────────

    pub fn list(conn: &Connection) -> Result<Vec<Patient>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, species, breed, gender, birth_date, microchip_number
             FROM patients ORDER BY id",
        )?;
        let rows = stmt.query_map([], patient_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<Patient>> {
        Ok(conn
            .query_row(
                "SELECT id, name, species, breed, gender, birth_date, microchip_number
                 FROM patients WHERE id = ?1",
                params![id],
                patient_from_row,
            )
            .optional()?)
    }

    /// Look up by exact id, then by case-insensitive name
    pub fn find(conn: &Connection, identifier: &str) -> Result<Option<Patient>> {
        if let Some(patient) = Self::get(conn, identifier)? {
            return Ok(Some(patient));
        }
        Ok(conn
            .query_row(
                "SELECT id, name, species, breed, gender, birth_date, microchip_number
                 FROM patients WHERE lower(name) = lower(?1) ORDER BY id LIMIT 1",
                params![identifier],
                patient_from_row,
            )
            .optional()?)
    }

    pub fn require(conn: &Connection, id: &str) -> Result<Patient> {
        Self::get(conn, id)?.ok_or_else(|| ClinicError::PatientNotFound(id.to_string()))
    }

    pub fn create(conn: &Connection, patient: &Patient) -> Result<Patient> {
        if Self::get(conn, &patient.id)?.is_some() {
            return Err(ClinicError::DuplicatePatient(patient.id.clone()));
        }
        conn.execute(
            "INSERT INTO patients (id, name, species, breed, gender, birth_date, microchip_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                patient.id,
                patient.name,
                patient.species,
                patient.breed,
                patient.gender,
                patient.birth_date,
                patient.microchip_number,
            ],
        )?;
        Self::require(conn, &patient.id)
    }

    pub fn update(conn: &Connection, id: &str, changes: &PatientChanges) -> Result<Patient> {
        Self::require(conn, id)?;
        if changes.is_empty() {
            return Err(ClinicError::InvalidArgument("no fields to update".into()));
        }
        conn.execute(
            "UPDATE patients SET
                name = COALESCE(?2, name),
                species = COALESCE(?3, species),
                breed = COALESCE(?4, breed),
                gender = COALESCE(?5, gender),
                birth_date = COALESCE(?6, birth_date),
                microchip_number = COALESCE(?7, microchip_number)
             WHERE id = ?1",
            params![
                id,
                changes.name,
                changes.species,
                changes.breed,
                changes.gender,
                changes.birth_date,
                changes.microchip_number,
            ],
        )?;
        Self::require(conn, id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_appointment(
        conn: &Connection,
        patient_id: &str,
        date: &str,
        status: &str,
        appointment_type: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Appointment> {
        Self::require(conn, patient_id)?;
        conn.execute(
            "INSERT INTO appointments (patient_id, date, status, notes, appointment_type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![patient_id, date, status, notes, appointment_type],
        )?;
        Ok(Appointment {
            id: conn.last_insert_rowid(),
            patient_id: patient_id.to_string(),
            date: date.to_string(),
            status: status.to_string(),
            appointment_type: appointment_type.map(str::to_string),
            notes: notes.map(str::to_string),
        })
    }

    pub fn record_weight(
        conn: &Connection,
        patient_id: &str,
        weight: f64,
        date: &str,
        note: Option<&str>,
    ) -> Result<WeightRecord> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(ClinicError::InvalidArgument(format!("weight must be > 0, got {weight}")));
        }
        Self::require(conn, patient_id)?;
        conn.execute(
            "INSERT INTO weight_records (patient_id, weight, date, note) VALUES (?1, ?2, ?3, ?4)",
            params![patient_id, weight, date, note],
        )?;
        Ok(WeightRecord {
            id: conn.last_insert_rowid(),
            patient_id: patient_id.to_string(),
            weight,
            date: date.to_string(),
            note: note.map(str::to_string),
        })
    }

    pub fn record_vaccination(
        conn: &Connection,
        patient_id: &str,
        vaccine_type: &str,
        date: &str,
        expiration_date: Option<&str>,
    ) -> Result<Vaccination> {
        Self::require(conn, patient_id)?;
        conn.execute(
            "INSERT INTO vaccinations (patient_id, type, date, expiration_date) VALUES (?1, ?2, ?3, ?4)",
            params![patient_id, vaccine_type, date, expiration_date],
        )?;
        Ok(Vaccination {
            id: conn.last_insert_rowid(),
            patient_id: patient_id.to_string(),
            vaccine_type: vaccine_type.to_string(),
            date: date.to_string(),
            expiration_date: expiration_date.map(str::to_string),
        })
    }

    pub fn history(conn: &Connection, patient_id: &str) -> Result<PatientHistory> {
        let patient = Self::require(conn, patient_id)?;

        let mut stmt = conn.prepare(
            "SELECT id, patient_id, date, status, appointment_type, notes
             FROM appointments WHERE patient_id = ?1 ORDER BY date, id",
        )?;
        let appointments = stmt
            .query_map(params![patient_id], |row| {
                Ok(Appointment {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    date: row.get(2)?,
                    status: row.get(3)?,
                    appointment_type: row.get(4)?,
                    notes: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, patient_id, weight, date, note
             FROM weight_records WHERE patient_id = ?1 ORDER BY date, id",
        )?;
        let weights = stmt
            .query_map(params![patient_id], |row| {
                Ok(WeightRecord {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    weight: row.get(2)?,
                    date: row.get(3)?,
                    note: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, patient_id, type, date, expiration_date
             FROM vaccinations WHERE patient_id = ?1 ORDER BY date, id",
        )?;
        let vaccinations = stmt
            .query_map(params![patient_id], |row| {
                Ok(Vaccination {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    vaccine_type: row.get(2)?,
                    date: row.get(3)?,
                    expiration_date: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(PatientHistory {
            patient,
            appointments,
            weights,
            vaccinations,
        })
    }
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        species: row.get(2)?,
        breed: row.get(3)?,
        gender: row.get(4)?,
        birth_date: row.get(5)?,
        microchip_number: row.get(6)?,
    })
}
