use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned record id. The service may send it as a number or a
/// string; either way it is held as text and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(n) => RecordId::from(n),
            RawId::Text(s) => RecordId(s),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApplicationStatus {
    #[default]
    Applied,
    Interviewed,
    Offered,
    Rejected,
    /// Any status the server knows about that this client does not.
    Other(String),
}

impl ApplicationStatus {
    /// Statuses offered when cycling through choices in a form.
    pub const CHOICES: [ApplicationStatus; 4] = [
        ApplicationStatus::Applied,
        ApplicationStatus::Interviewed,
        ApplicationStatus::Offered,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Interviewed => "interviewed",
            ApplicationStatus::Offered => "offered",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Other(s) => s,
        }
    }

    pub fn next(&self) -> Self {
        let pos = Self::CHOICES.iter().position(|s| s == self);
        match pos {
            Some(i) => Self::CHOICES[(i + 1) % Self::CHOICES.len()].clone(),
            None => ApplicationStatus::Applied,
        }
    }

    pub fn prev(&self) -> Self {
        let pos = Self::CHOICES.iter().position(|s| s == self);
        match pos {
            Some(i) => Self::CHOICES[(i + Self::CHOICES.len() - 1) % Self::CHOICES.len()].clone(),
            None => ApplicationStatus::Applied,
        }
    }
}

impl From<String> for ApplicationStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "applied" => ApplicationStatus::Applied,
            "interviewed" => ApplicationStatus::Interviewed,
            "offered" => ApplicationStatus::Offered,
            "rejected" => ApplicationStatus::Rejected,
            _ => ApplicationStatus::Other(value),
        }
    }
}

impl From<ApplicationStatus> for String {
    fn from(value: ApplicationStatus) -> Self {
        match value {
            ApplicationStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ApplicationStatus::from(s.trim().to_lowercase()))
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionSection {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: RecordId,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub stage_notes: Option<String>,
    // only the single-record endpoint is guaranteed to fill this
    #[serde(default, deserialize_with = "null_as_default")]
    pub apply_description: Vec<DescriptionSection>,
}

impl ApplicationRecord {
    /// Description text as the edit form sees it: first section of the
    /// multi-part description, then the flat field, then empty.
    pub fn description_text(&self) -> &str {
        self.apply_description
            .first()
            .and_then(|section| section.text.as_deref())
            .or(self.job_description.as_deref())
            .unwrap_or("")
    }

    pub fn to_fields(&self) -> ApplicationFields {
        ApplicationFields {
            company: self.company.clone().unwrap_or_default(),
            job_title: self.job_title.clone().unwrap_or_default(),
            job_description: self.description_text().to_string(),
            status: self.status.clone(),
            stage_notes: self.stage_notes.clone().unwrap_or_default(),
        }
    }
}

/// Body of create and update requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplicationFields {
    pub company: String,
    pub job_title: String,
    pub job_description: String,
    pub status: ApplicationStatus,
    pub stage_notes: String,
}

impl ApplicationFields {
    pub fn validate(&self) -> Result<(), String> {
        if self.company.trim().is_empty() {
            return Err("company is required".to_string());
        }
        if self.job_title.trim().is_empty() {
            return Err("job title is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub interviewed: u64,
    #[serde(default)]
    pub offered: u64,
    #[serde(default)]
    pub applied: u64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
