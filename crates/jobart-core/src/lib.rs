//! Core domain model for the Job'Arts listing pipeline.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "jobart-core";

/// Stand-in for any text field the source did not supply.
pub const UNKNOWN: &str = "Inconnu";

/// Stand-in for a salary that could not be annualized.
pub const SALARY_NOT_SPECIFIED: &str = "Salaire non indiqué";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    FranceTravail,
    WelcomeToTheJungle,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FranceTravail => "france_travail",
            Self::WelcomeToTheJungle => "wttj",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "france_travail" => Some(Self::FranceTravail),
            "wttj" => Some(Self::WelcomeToTheJungle),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source payload as fetched. The shape of each variant belongs to its source
/// and is only read through the field tables of the adapters crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "payload", rename_all = "snake_case")]
pub enum RawListing {
    FranceTravail(JsonValue),
    WelcomeToTheJungle(JsonValue),
}

impl RawListing {
    pub fn source(&self) -> Source {
        match self {
            Self::FranceTravail(_) => Source::FranceTravail,
            Self::WelcomeToTheJungle(_) => Source::WelcomeToTheJungle,
        }
    }

    pub fn payload(&self) -> &JsonValue {
        match self {
            Self::FranceTravail(payload) | Self::WelcomeToTheJungle(payload) => payload,
        }
    }
}

/// Canonical columns in output order. `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    PublishedAt,
    ContractType,
    Title,
    Description,
    IndustrySector,
    EducationLevel,
    ExperienceLevel,
    SalaryAnnualized,
    CompanyName,
    CompanyDescription,
    City,
    SourceUrl,
    TechSkills,
    SoftSkills,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 14] = [
        Self::PublishedAt,
        Self::ContractType,
        Self::Title,
        Self::Description,
        Self::IndustrySector,
        Self::EducationLevel,
        Self::ExperienceLevel,
        Self::SalaryAnnualized,
        Self::CompanyName,
        Self::CompanyDescription,
        Self::City,
        Self::SourceUrl,
        Self::TechSkills,
        Self::SoftSkills,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::PublishedAt => "published_at",
            Self::ContractType => "contract_type",
            Self::Title => "title",
            Self::Description => "description",
            Self::IndustrySector => "industry_sector",
            Self::EducationLevel => "education_level",
            Self::ExperienceLevel => "experience_level",
            Self::SalaryAnnualized => "salary_annualized",
            Self::CompanyName => "company_name",
            Self::CompanyDescription => "company_description",
            Self::City => "city",
            Self::SourceUrl => "source_url",
            Self::TechSkills => "tech_skills",
            Self::SoftSkills => "soft_skills",
        }
    }

    /// Skill columns are derived by extraction, never mapped from a source.
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::TechSkills | Self::SoftSkills)
    }
}

/// Contract kinds, rendered with their French labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContractType {
    Permanent,
    FixedTerm,
    Temp,
    Internship,
    Apprenticeship,
    Other,
    Unknown,
    /// A source code with no known translation, kept verbatim.
    Unmapped(String),
}

impl ContractType {
    pub fn label(&self) -> &str {
        match self {
            Self::Permanent => "CDI",
            Self::FixedTerm => "CDD",
            Self::Temp => "Interim",
            Self::Internship => "Stage",
            Self::Apprenticeship => "Alternance",
            Self::Other => "Autre",
            Self::Unknown => UNKNOWN,
            Self::Unmapped(code) => code,
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "CDI" => Self::Permanent,
            "CDD" => Self::FixedTerm,
            "Interim" => Self::Temp,
            "Stage" => Self::Internship,
            "Alternance" => Self::Apprenticeship,
            "Autre" => Self::Other,
            UNKNOWN => Self::Unknown,
            other => Self::Unmapped(other.to_string()),
        }
    }
}

impl From<String> for ContractType {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<ContractType> for String {
    fn from(value: ContractType) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EducationLevel {
    Bac2,
    Bac3,
    Bac4,
    Bac5,
    Unknown,
}

impl EducationLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bac2 => "Bac+2",
            Self::Bac3 => "Bac+3",
            Self::Bac4 => "Bac+4",
            Self::Bac5 => "Bac+5",
            Self::Unknown => UNKNOWN,
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "Bac+2" => Self::Bac2,
            "Bac+3" => Self::Bac3,
            "Bac+4" => Self::Bac4,
            "Bac+5" => Self::Bac5,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for EducationLevel {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<EducationLevel> for String {
    fn from(value: EducationLevel) -> Self {
        value.label().to_string()
    }
}

/// Normalized, schema-unified job posting. Every field is always populated;
/// absent source values are carried as sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalListing {
    pub source: Source,
    pub published_at: String,
    pub contract_type: ContractType,
    pub title: String,
    pub description: String,
    pub industry_sector: String,
    pub education_level: EducationLevel,
    pub experience_level: String,
    pub salary_annualized: String,
    pub company_name: String,
    pub company_description: String,
    pub city: String,
    pub source_url: String,
    pub tech_skills: BTreeSet<String>,
    pub soft_skills: BTreeSet<String>,
}

impl CanonicalListing {
    pub fn with_skills(self, tech_skills: BTreeSet<String>, soft_skills: BTreeSet<String>) -> Self {
        Self {
            tech_skills,
            soft_skills,
            ..self
        }
    }

    pub fn has_description(&self) -> bool {
        !self.description.trim().is_empty()
    }
}

/// Lowercase `[a-z0-9_]` identifier derived from a free-text label, used for
/// dataset file names, link files and table names.
pub fn dataset_slug(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
