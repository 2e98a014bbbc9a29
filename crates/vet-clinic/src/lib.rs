//! # vet-clinic
//!
//! Tool provider for a veterinary practice. Runs as a child process and speaks
//! line-delimited JSON-RPC over stdin/stdout.
//!
//! ## Surface
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  tools/call                                              │
//! ├──────────────────────────────────────────────────────────┤
//! │  list_patients        get_patient        create_patient  │
//! │  update_patient       add_appointment    record_weight   │
//! │  record_vaccination   get_patient_history                │
//! ├──────────────────────────────────────────────────────────┤
//! │  resources/read                                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  patients://all       patients://{id}                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every tool call runs inside one SQLite transaction, so a failing call
//! leaves no partial writes behind.

pub mod error;
pub mod model;
pub mod repository;
pub mod server;
pub mod store;
pub mod svckit;

pub use error::{ClinicError, Result};
pub use model::{Appointment, Patient, PatientChanges, PatientHistory, Vaccination, WeightRecord};
pub use repository::PatientRepository;
pub use server::ClinicServer;
pub use store::Store;
pub use svckit::{ClinicTool, ToolKit, ToolOutput};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        AddAppointmentTool,
        CreatePatientTool,
        GetPatientTool,
        ListPatientsTool,
        PatientHistoryTool,
        RecordVaccinationTool,
        RecordWeightTool,
        UpdatePatientTool,
    };
}

/// System prompt for the clinic assistant
pub const VET_ASSISTANT_PROMPT: &str = "You are a veterinary assistant AI helping with a Veterinary Practice \
Management System. You have access to patient data and can perform operations like creating and updating \
patient records, adding appointments, and recording weight and vaccination information. Provide succinct \
answers to the information requested by the user.";
