//! Patient Tools
//!
//! Listing, lookup, registration and updates of patient records.

use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{Value, json};

use agent_core::tool::ToolDescriptor;

use super::{ClinicTool, ToolOutput, check_date, parse_args};
use crate::error::Result;
use crate::model::{Patient, PatientChanges};
use crate::repository::PatientRepository;

fn patient_fields() -> Value {
    json!({
        "name": {"type": "string", "minLength": 1, "description": "Patient name"},
        "species": {"type": "string", "minLength": 1, "description": "Species, e.g. Dog or Cat"},
        "breed": {"type": "string"},
        "gender": {"type": "string", "enum": ["Male", "Female", "Unknown"]},
        "birth_date": {"type": "string", "description": "Birth date as YYYY-MM-DD"},
        "microchip_number": {"type": "string"}
    })
}

/// List every patient
pub struct ListPatientsTool;

impl ClinicTool for ListPatientsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "list_patients",
            "List all patients in the clinic database with their basic details.",
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
        )
    }

    fn execute(&self, conn: &Connection, _arguments: &Value) -> Result<ToolOutput> {
        let patients = PatientRepository::list(conn)?;
        Ok(ToolOutput::new(
            format!("{} patients on record", patients.len()),
            json!({"count": patients.len(), "patients": patients}),
        ))
    }
}

/// Look a patient up by id or name
pub struct GetPatientTool;

#[derive(Deserialize)]
struct GetPatientArgs {
    identifier: String,
}

impl ClinicTool for GetPatientTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "get_patient",
            "Get information about a patient by ID (e.g. P001) or by name.",
            json!({
                "type": "object",
                "properties": {
                    "identifier": {"type": "string", "minLength": 1, "description": "Patient ID or name"}
                },
                "required": ["identifier"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let args: GetPatientArgs = parse_args(arguments)?;
        Ok(match PatientRepository::find(conn, &args.identifier)? {
            Some(patient) => ToolOutput::new(
                format!("Found {} ({})", patient.name, patient.id),
                json!({"found": true, "patient": patient}),
            ),
            None => {
                let message = format!("No patient found with identifier: {}", args.identifier);
                ToolOutput::new(message.clone(), json!({"found": false, "message": message}))
            }
        })
    }
}

/// Register a new patient
pub struct CreatePatientTool;

impl ClinicTool for CreatePatientTool {
    fn descriptor(&self) -> ToolDescriptor {
        let mut properties = patient_fields();
        properties["id"] = json!({"type": "string", "minLength": 1, "description": "New patient ID, e.g. P010"});
        ToolDescriptor::new(
            "create_patient",
            "Register a new patient. Requires a unique ID, the name and the species.",
            json!({
                "type": "object",
                "properties": properties,
                "required": ["id", "name", "species"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let patient: Patient = parse_args(arguments)?;
        if let Some(date) = &patient.birth_date {
            check_date("birth_date", date)?;
        }
        let patient = PatientRepository::create(conn, &patient)?;
        Ok(ToolOutput::new(
            format!("Patient {} ({}) created", patient.id, patient.name),
            json!({"created": true, "patient": patient}),
        ))
    }
}

/// Change fields of an existing patient
pub struct UpdatePatientTool;

#[derive(Deserialize)]
struct UpdatePatientArgs {
    id: String,
    #[serde(flatten)]
    changes: PatientChanges,
}

impl ClinicTool for UpdatePatientTool {
    fn descriptor(&self) -> ToolDescriptor {
        let mut properties = patient_fields();
        properties["id"] = json!({"type": "string", "minLength": 1, "description": "ID of the patient to update"});
        ToolDescriptor::new(
            "update_patient",
            "Update an existing patient's record. Only the fields given are changed.",
            json!({
                "type": "object",
                "properties": properties,
                "required": ["id"],
                "additionalProperties": false
            }),
        )
    }

    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput> {
        let args: UpdatePatientArgs = parse_args(arguments)?;
        if let Some(date) = &args.changes.birth_date {
            check_date("birth_date", date)?;
        }
        let patient = PatientRepository::update(conn, &args.id, &args.changes)?;
        Ok(ToolOutput::new(
            format!("Patient {} updated", patient.id),
            json!({"updated": true, "patient": patient}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClinicError;
    use crate::store::Store;

    fn run(tool: &dyn ClinicTool, arguments: Value) -> Result<ToolOutput> {
        let store = Store::open_in_memory()?;
        store.seed_if_empty()?;
        store.with_transaction(|tx| tool.execute(tx, &arguments))
    }

    #[test]
    fn test_list_patients() {
        let output = run(&ListPatientsTool, json!({})).unwrap();
        assert_eq!(output.data["count"], 3);
        assert_eq!(output.data["patients"][0]["name"], "Max");
    }

    #[test]
    fn test_get_patient_not_found_is_not_an_error() {
        let output = run(&GetPatientTool, json!({"identifier": "Garfield"})).unwrap();
        assert_eq!(output.data["found"], false);

        let output = run(&GetPatientTool, json!({"identifier": "luna"})).unwrap();
        assert_eq!(output.data["patient"]["id"], "P002");
    }

    #[test]
    fn test_create_patient() {
        let output = run(&CreatePatientTool, json!({"id": "P010", "name": "Rex", "species": "Dog"})).unwrap();
        assert_eq!(output.summary, "Patient P010 (Rex) created");
        assert_eq!(output.data["patient"]["breed"], Value::Null);

        let err = run(&CreatePatientTool, json!({"id": "P001", "name": "Max", "species": "Dog"})).unwrap_err();
        assert!(matches!(err, ClinicError::DuplicatePatient(_)));

        let err = run(
            &CreatePatientTool,
            json!({"id": "P011", "name": "Tom", "species": "Cat", "birth_date": "last spring"}),
        )
        .unwrap_err();
        assert!(matches!(err, ClinicError::InvalidArgument(_)));
    }

    #[test]
    fn test_update_patient() {
        let output = run(&UpdatePatientTool, json!({"id": "P003", "microchip_number": "MC000001"})).unwrap();
        assert_eq!(output.data["patient"]["microchip_number"], "MC000001");
        assert_eq!(output.data["patient"]["name"], "Charlie");

        let err = run(&UpdatePatientTool, json!({"id": "P404", "name": "Ghost"})).unwrap_err();
        assert!(matches!(err, ClinicError::PatientNotFound(_)));
    }
}
