//! Service Kit - Clinic Tools
//!
//! Each tool declares its JSON input schema and runs against a connection that
//! the server scopes to a single transaction.

mod patients;
mod records;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;

use agent_core::tool::ToolDescriptor;

use crate::error::{ClinicError, Result};

pub use patients::{CreatePatientTool, GetPatientTool, ListPatientsTool, UpdatePatientTool};
pub use records::{AddAppointmentTool, PatientHistoryTool, RecordVaccinationTool, RecordWeightTool};

/// What a tool hands back: a one-line summary and the structured result
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Value,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
        }
    }
}

/// A clinic operation exposed to the model
pub trait ClinicTool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Run with schema-checked arguments
    fn execute(&self, conn: &Connection, arguments: &Value) -> Result<ToolOutput>;
}

/// The tool set served by one server
pub struct ToolKit {
    tools: Vec<Box<dyn ClinicTool>>,
}

impl ToolKit {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Every clinic tool
    pub fn standard() -> Self {
        Self::new()
            .with(ListPatientsTool)
            .with(GetPatientTool)
            .with(CreatePatientTool)
            .with(UpdatePatientTool)
            .with(AddAppointmentTool)
            .with(RecordWeightTool)
            .with(RecordVaccinationTool)
            .with(PatientHistoryTool)
    }

    #[must_use]
    pub fn with(mut self, tool: impl ClinicTool + 'static) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn ClinicTool> {
        self.tools
            .iter()
            .find(|t| t.descriptor().name == name)
            .map(|t| &**t)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolKit {
    fn default() -> Self {
        Self::standard()
    }
}

fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone()).map_err(|e| ClinicError::InvalidArgument(e.to_string()))
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Accept `YYYY-MM-DD`
fn check_date(field: &str, value: &str) -> Result<()> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ClinicError::InvalidArgument(format!("{field} must be YYYY-MM-DD, got '{value}'")))
}

/// Accept `YYYY-MM-DD` or `YYYY-MM-DD HH:MM`
fn check_date_time(field: &str, value: &str) -> Result<()> {
    if NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").is_ok() {
        return Ok(());
    }
    check_date(field, value).map_err(|_| {
        ClinicError::InvalidArgument(format!("{field} must be YYYY-MM-DD or YYYY-MM-DD HH:MM, got '{value}'"))
    })
}
