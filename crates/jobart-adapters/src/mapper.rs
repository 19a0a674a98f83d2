//! Static rename tables from each source schema to the canonical columns.

use std::collections::BTreeMap;

use jobart_core::{CanonicalField, RawListing, Source};
use serde_json::{Map, Value as JsonValue};

/// Where a canonical column is read from. Dotted paths descend into nested
/// objects; numeric segments index into arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceField {
    Path(&'static str),
    /// Several source paths feed one canonical column together.
    Group(&'static [&'static str]),
}

pub type FieldTable = &'static [(CanonicalField, SourceField)];

pub static FRANCE_TRAVAIL_FIELDS: FieldTable = &[
    (CanonicalField::PublishedAt, SourceField::Path("dateCreation")),
    (CanonicalField::ContractType, SourceField::Path("typeContrat")),
    (CanonicalField::Title, SourceField::Path("intitule")),
    (CanonicalField::Description, SourceField::Path("description")),
    (CanonicalField::IndustrySector, SourceField::Path("secteurActiviteLibelle")),
    (CanonicalField::EducationLevel, SourceField::Path("formations.0.niveauLibelle")),
    (CanonicalField::ExperienceLevel, SourceField::Path("experienceLibelle")),
    (CanonicalField::SalaryAnnualized, SourceField::Path("salaire.libelle")),
    (CanonicalField::CompanyName, SourceField::Path("entreprise.nom")),
    (CanonicalField::CompanyDescription, SourceField::Path("entreprise.description")),
    (CanonicalField::City, SourceField::Path("lieuTravail.libelle")),
    (CanonicalField::SourceUrl, SourceField::Path("origineOffre.urlOrigine")),
];

pub const WTTJ_SALARY_PERIOD: &str = "salary_period";
pub const WTTJ_SALARY_MIN: &str = "salary_min";
pub const WTTJ_SALARY_MAX: &str = "salary_max";

pub static WTTJ_FIELDS: FieldTable = &[
    (CanonicalField::PublishedAt, SourceField::Path("published_at")),
    (CanonicalField::ContractType, SourceField::Path("contract_type")),
    (CanonicalField::Title, SourceField::Path("name")),
    (CanonicalField::Description, SourceField::Path("description")),
    (CanonicalField::IndustrySector, SourceField::Path("organization.industry")),
    (CanonicalField::EducationLevel, SourceField::Path("education_level")),
    (CanonicalField::ExperienceLevel, SourceField::Path("experience_level")),
    (
        CanonicalField::SalaryAnnualized,
        SourceField::Group(&[WTTJ_SALARY_PERIOD, WTTJ_SALARY_MIN, WTTJ_SALARY_MAX]),
    ),
    (CanonicalField::CompanyName, SourceField::Path("organization.name")),
    (CanonicalField::CompanyDescription, SourceField::Path("organization.description")),
    (CanonicalField::City, SourceField::Path("office.city")),
    (CanonicalField::SourceUrl, SourceField::Path("link")),
];

pub fn field_table(source: Source) -> FieldTable {
    match source {
        Source::FranceTravail => FRANCE_TRAVAIL_FIELDS,
        Source::WelcomeToTheJungle => WTTJ_FIELDS,
    }
}

/// Resolve a dotted path. JSON `null` counts as absent.
pub fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path.split('.') {
        cur = match cur {
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            other => other.get(segment)?,
        };
    }
    (!cur.is_null()).then_some(cur)
}

/// A raw listing renamed to canonical columns. Only columns whose source
/// field was present are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    fields: BTreeMap<CanonicalField, JsonValue>,
}

impl MappedRecord {
    pub fn get(&self, field: CanonicalField) -> Option<&JsonValue> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: CanonicalField) -> Option<&str> {
        self.get(field).and_then(JsonValue::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&CanonicalField, &JsonValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub fn map_fields(raw: &RawListing) -> MappedRecord {
    let payload = raw.payload();
    let mut fields = BTreeMap::new();

    for (canonical, source_field) in field_table(raw.source()) {
        match source_field {
            SourceField::Path(path) => {
                if let Some(value) = lookup_path(payload, path) {
                    fields.insert(*canonical, value.clone());
                }
            }
            SourceField::Group(paths) => {
                let group = paths
                    .iter()
                    .filter_map(|p| lookup_path(payload, p).map(|v| (p.to_string(), v.clone())))
                    .collect::<Map<String, JsonValue>>();
                if !group.is_empty() {
                    fields.insert(*canonical, JsonValue::Object(group));
                }
            }
        }
    }

    MappedRecord { fields }
}
