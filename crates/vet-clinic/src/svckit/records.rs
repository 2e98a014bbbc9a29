//! Record Tools
//!
//! Appointments, weights, vaccinations and the combined patient history.

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{Value, json};

use agent_core::tool::ToolDescriptor;

use super::{ClinicTool, ToolOutput, check_date, check_date_time, parse_args, today};
use crate::error::Result;
use crate::repository::PatientRepository;

fn patient_id_field() -> Value {
    json!({"type": "string", "minLength": 1, "description": "Patient ID, e.g. P001"})
}

/// Book (or log) an appointment
pub struct AddAppointmentTool;

#[derive(Deserialize)]
struct AppointmentArgs {
    patient_id: String,
    date: String,
    #[serde(default = "default_status")]
    status: String,
    appointment_type: Option<String>,
    notes: Option<String>,
}

fn default_status() -> String {
    "Scheduled".into()
}

impl ClinicTool for AddAppointmentTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "add_appointment",
            "Add an appointment for a patient.",
            json!({
                "type": "object",
                "properties": {
                    "patient_id": patient_id_field(),
                    "date": {"type": "string", "description": "YYYY-MM-DD HH:MM or YYYY-MM-DD"},
                    "status": {"type": "string", "enum": ["Scheduled", "Completed", "Cancelled"]},
                    "appointment_type": {"type": "string", "description": "e.g. Checkup, Vaccination, Examination"},
                    "notes": {"type": "string"}
                },
                "required": ["patient_id", "date"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let args: AppointmentArgs = parse_args(arguments)?;
        check_date_time("date", &args.date)?;
        let appointment = PatientRepository::add_appointment(
            conn,
            &args.patient_id,
            &args.date,
            &args.status,
            args.appointment_type.as_deref(),
            args.notes.as_deref(),
        )?;
        Ok(ToolOutput::new(
            format!("{} appointment for {} on {}", appointment.status, appointment.patient_id, appointment.date),
            json!({"created": true, "appointment": appointment}),
        ))
    }
}

/// Log a weight measurement
pub struct RecordWeightTool;

#[derive(Deserialize)]
struct WeightArgs {
    patient_id: String,
    weight: f64,
    date: Option<String>,
    note: Option<String>,
}

impl ClinicTool for RecordWeightTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "record_weight",
            "Record a patient's weight in kilograms. The date defaults to today.",
            json!({
                "type": "object",
                "properties": {
                    "patient_id": patient_id_field(),
                    "weight": {"type": "number", "exclusiveMinimum": 0, "description": "Weight in kg"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"},
                    "note": {"type": "string"}
                },
                "required": ["patient_id", "weight"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let args: WeightArgs = parse_args(arguments)?;
        let date = args.date.unwrap_or_else(today);
        check_date("date", &date)?;
        let record = PatientRepository::record_weight(conn, &args.patient_id, args.weight, &date, args.note.as_deref())?;
        Ok(ToolOutput::new(
            format!("Recorded {} kg for {} on {}", record.weight, record.patient_id, record.date),
            json!({"created": true, "weight_record": record}),
        ))
    }
}

/// Log a vaccination
pub struct RecordVaccinationTool;

#[derive(Deserialize)]
struct VaccinationArgs {
    patient_id: String,
    vaccine_type: String,
    date: Option<String>,
    expiration_date: Option<String>,
}

impl ClinicTool for RecordVaccinationTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "record_vaccination",
            "Record a vaccination given to a patient. The date defaults to today.",
            json!({
                "type": "object",
                "properties": {
                    "patient_id": patient_id_field(),
                    "vaccine_type": {"type": "string", "minLength": 1, "description": "e.g. Rabies, DHPP, FVRCP"},
                    "date": {"type": "string", "description": "YYYY-MM-DD"},
                    "expiration_date": {"type": "string", "description": "YYYY-MM-DD"}
                },
                "required": ["patient_id", "vaccine_type"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let args: VaccinationArgs = parse_args(arguments)?;
        let date = args.date.unwrap_or_else(today);
        check_date("date", &date)?;
        if let Some(expires) = &args.expiration_date {
            check_date("expiration_date", expires)?;
        }
        let vaccination = PatientRepository::record_vaccination(
            conn,
            &args.patient_id,
            &args.vaccine_type,
            &date,
            args.expiration_date.as_deref(),
        )?;
        Ok(ToolOutput::new(
            format!("{} vaccination recorded for {}", vaccination.vaccine_type, vaccination.patient_id),
            json!({"created": true, "vaccination": vaccination}),
        ))
    }
}

/// Everything on file for one patient
pub struct PatientHistoryTool;

#[derive(Deserialize)]
struct HistoryArgs {
    patient_id: String,
}

impl ClinicTool for PatientHistoryTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "get_patient_history",
            "Get a patient's appointments, weight history and vaccinations.",
            json!({
                "type": "object",
                "properties": {"patient_id": patient_id_field()},
                "required": ["patient_id"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let args: HistoryArgs = parse_args(arguments)?;
        let history = PatientRepository::history(conn, &args.patient_id)?;
        Ok(ToolOutput::new(
            format!(
                "{}: {} appointments, {} weights, {} vaccinations",
                history.patient.name,
                history.appointments.len(),
                history.weights.len(),
                history.vaccinations.len()
            ),
            serde_json::to_value(history)?,
        ))
    }
}
