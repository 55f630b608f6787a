//! Role-specific profile records.
//!
//! Input arrives as loosely shaped JSON ("drafts" where every field is
//! optional). A draft is converted once into the typed variant for its role;
//! past that point required fields are plain `String`s and never rechecked.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};

use crate::auth::repo_types::Role;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("{field} is required for {role} profile")]
    Missing { field: &'static str, role: Role },

    #[error("{field} must be a date in YYYY-MM-DD format")]
    InvalidDate { field: &'static str },

    #[error("profile for {role} is malformed: {reason}")]
    Malformed { role: Role, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub first_name: String,
    pub last_name: String,
    #[serde(with = "iso_date")]
    pub date_of_birth: Date,
    pub member_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(default, with = "iso_date::option", skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deductible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_of_pocket_max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub first_name: String,
    pub last_name: String,
    pub specialty: String,
    pub license_number: String,
    pub npi_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fax: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years_experience: Option<u32>,
    #[serde(default)]
    pub board_certified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayorProfile {
    pub first_name: String,
    pub last_name: String,
    pub title: String,
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

/// Profile tagged by role. Serialized as `{"role": ..., "profile": {...}}`
/// so it can be flattened into the user object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "profile", rename_all = "lowercase")]
pub enum Profile {
    Patient(PatientProfile),
    Provider(ProviderProfile),
    Payor(PayorProfile),
}

impl Profile {
    pub fn role(&self) -> Role {
        match self {
            Profile::Patient(_) => Role::Patient,
            Profile::Provider(_) => Role::Provider,
            Profile::Payor(_) => Role::Payor,
        }
    }

    /// Identifiers that must be unique among users of the same role.
    pub fn unique_keys(&self) -> Vec<(&'static str, &str)> {
        match self {
            Profile::Patient(p) => vec![("memberId", p.member_id.as_str())],
            Profile::Provider(p) => vec![
                ("licenseNumber", p.license_number.as_str()),
                ("npiNumber", p.npi_number.as_str()),
            ],
            Profile::Payor(p) => vec![("employeeId", p.employee_id.as_str())],
        }
    }

    /// Builds the typed profile for `role` out of raw JSON input.
    pub fn from_input(role: Role, input: Value) -> Result<Self, ProfileError> {
        let input = match input {
            Value::Null => Value::Object(Map::new()),
            obj @ Value::Object(_) => obj,
            _ => {
                return Err(ProfileError::Malformed {
                    role,
                    reason: "expected an object".into(),
                })
            }
        };
        let malformed = |e: serde_json::Error| ProfileError::Malformed {
            role,
            reason: e.to_string(),
        };

        match role {
            Role::Patient => {
                let draft: PatientDraft = serde_json::from_value(input).map_err(malformed)?;
                draft.validate().map(Profile::Patient)
            }
            Role::Provider => {
                let draft: ProviderDraft = serde_json::from_value(input).map_err(malformed)?;
                draft.validate().map(Profile::Provider)
            }
            Role::Payor => {
                let draft: PayorDraft = serde_json::from_value(input).map_err(malformed)?;
                draft.validate().map(Profile::Payor)
            }
        }
    }

    /// The variant's fields as a JSON object, without the role tag.
    pub fn to_value(&self) -> Value {
        let value = match self {
            Profile::Patient(p) => serde_json::to_value(p),
            Profile::Provider(p) => serde_json::to_value(p),
            Profile::Payor(p) => serde_json::to_value(p),
        };
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Key-wise merge of `patch` over the current fields, revalidated as a
    /// whole. The role never changes.
    pub fn merged(&self, patch: Map<String, Value>) -> Result<Self, ProfileError> {
        let mut current = match self.to_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        current.extend(patch);
        Profile::from_input(self.role(), Value::Object(current))
    }
}

fn required(
    value: Option<String>,
    field: &'static str,
    role: Role,
) -> Result<String, ProfileError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProfileError::Missing { field, role }),
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp, whose date part is kept.
fn parse_date(raw: &str, field: &'static str) -> Result<Date, ProfileError> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(raw, format)
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339).map(|t| t.date()))
        .map_err(|_| ProfileError::InvalidDate { field })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PatientDraft {
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<String>,
    member_id: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    group_number: Option<String>,
    insurance_provider: Option<String>,
    plan_type: Option<String>,
    effective_date: Option<String>,
    copay: Option<String>,
    deductible: Option<String>,
    out_of_pocket_max: Option<String>,
}

impl PatientDraft {
    fn validate(self) -> Result<PatientProfile, ProfileError> {
        let role = Role::Patient;
        let first_name = required(self.first_name, "firstName", role)?;
        let last_name = required(self.last_name, "lastName", role)?;
        let dob = required(self.date_of_birth, "dateOfBirth", role)?;
        let date_of_birth = parse_date(&dob, "dateOfBirth")?;
        let member_id = required(self.member_id, "memberId", role)?;
        let effective_date = optional(self.effective_date)
            .map(|d| parse_date(&d, "effectiveDate"))
            .transpose()?;

        Ok(PatientProfile {
            first_name,
            last_name,
            date_of_birth,
            member_id,
            phone: optional(self.phone),
            address: optional(self.address),
            group_number: optional(self.group_number),
            insurance_provider: optional(self.insurance_provider),
            plan_type: optional(self.plan_type),
            effective_date,
            copay: optional(self.copay),
            deductible: optional(self.deductible),
            out_of_pocket_max: optional(self.out_of_pocket_max),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProviderDraft {
    first_name: Option<String>,
    last_name: Option<String>,
    specialty: Option<String>,
    license_number: Option<String>,
    npi_number: Option<String>,
    clinic: Option<String>,
    address: Option<String>,
    phone: Option<String>,
    fax: Option<String>,
    years_experience: Option<u32>,
    board_certified: Option<bool>,
}

impl ProviderDraft {
    fn validate(self) -> Result<ProviderProfile, ProfileError> {
        let role = Role::Provider;
        Ok(ProviderProfile {
            first_name: required(self.first_name, "firstName", role)?,
            last_name: required(self.last_name, "lastName", role)?,
            specialty: required(self.specialty, "specialty", role)?,
            license_number: required(self.license_number, "licenseNumber", role)?,
            npi_number: required(self.npi_number, "npiNumber", role)?,
            clinic: optional(self.clinic),
            address: optional(self.address),
            phone: optional(self.phone),
            fax: optional(self.fax),
            years_experience: self.years_experience,
            board_certified: self.board_certified.unwrap_or(false),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PayorDraft {
    first_name: Option<String>,
    last_name: Option<String>,
    title: Option<String>,
    employee_id: Option<String>,
    department: Option<String>,
    company: Option<String>,
    phone: Option<String>,
    extension: Option<String>,
    address: Option<String>,
    region: Option<String>,
    authority: Option<String>,
}

impl PayorDraft {
    fn validate(self) -> Result<PayorProfile, ProfileError> {
        let role = Role::Payor;
        Ok(PayorProfile {
            first_name: required(self.first_name, "firstName", role)?,
            last_name: required(self.last_name, "lastName", role)?,
            title: required(self.title, "title", role)?,
            employee_id: required(self.employee_id, "employeeId", role)?,
            department: optional(self.department),
            company: optional(self.company),
            phone: optional(self.phone),
            extension: optional(self.extension),
            address: optional(self.address),
            region: optional(self.region),
            authority: optional(self.authority),
        })
    }
}
