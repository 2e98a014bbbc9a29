//! Domain Models
//!
//! Rows of the clinic database as they are exchanged with tool callers.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub species: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    /// ISO date (`YYYY-MM-DD`)
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub microchip_number: Option<String>,
}

/// Fields of an update; `None` leaves the column unchanged
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PatientChanges {
    pub name: Option<String>,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub microchip_number: Option<String>,
}

impl PatientChanges {
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.species.is_none()
            && self.breed.is_none()
            && self.gender.is_none()
            && self.birth_date.is_none()
            && self.microchip_number.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: String,
    pub date: String,
    pub status: String,
    pub appointment_type: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub id: i64,
    pub patient_id: String,
    /// Kilograms
    pub weight: f64,
    pub date: String,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vaccination {
    pub id: i64,
    pub patient_id: String,
    pub vaccine_type: String,
    pub date: String,
    pub expiration_date: Option<String>,
}

/// A patient with everything recorded against it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatientHistory {
    pub patient: Patient,
    pub appointments: Vec<Appointment>,
    pub weights: Vec<WeightRecord>,
    pub vaccinations: Vec<Vaccination>,
}
