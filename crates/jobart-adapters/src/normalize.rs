//! Total, pure cleaners for single field values. A malformed value degrades
//! to its sentinel; nothing here returns an error.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use jobart_core::{
    CanonicalField, CanonicalListing, ContractType, EducationLevel, RawListing, Source,
    SALARY_NOT_SPECIFIED, UNKNOWN,
};
use regex::Regex;
use scraper::Html;
use serde_json::Value as JsonValue;

use crate::mapper::{map_fields, MappedRecord, WTTJ_SALARY_MAX, WTTJ_SALARY_MIN, WTTJ_SALARY_PERIOD};

static DECIMAL_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+[.,]\d+").expect("decimal pattern compiles")
});

const HOURS_PER_WEEK: f64 = 35.0;
const WEEKS_PER_YEAR: f64 = 52.0;

/// Upper bound on decode passes; each pass after the first only shrinks the text.
const MAX_MARKUP_PASSES: usize = 8;

fn markup_pass(text: &str) -> String {
    let plain = if text.contains('<') || text.contains('&') {
        let fragment = Html::parse_fragment(text);
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        text.to_string()
    };

    plain
        .replace(['<', '>'], " ")
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain text from a possibly-HTML fragment, with entities decoded until
/// nothing changes. `None` gives an empty string.
pub fn strip_markup(text: Option<&str>) -> String {
    let Some(text) = text else {
        return String::new();
    };

    let mut current = markup_pass(text);
    for _ in 1..MAX_MARKUP_PASSES {
        let next = markup_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Checked highest level first, so `"bac+3 ou bac+5"` resolves to Bac+5.
pub fn classify_education(text: &str) -> EducationLevel {
    let text = text.trim().to_lowercase();
    let checks = [
        (EducationLevel::Bac5, ["bac+5", "bac_5"]),
        (EducationLevel::Bac4, ["bac+4", "bac_4"]),
        (EducationLevel::Bac3, ["bac+3", "bac_3"]),
        (EducationLevel::Bac2, ["bac+2", "bac_2"]),
    ];
    checks
        .into_iter()
        .find(|(_, needles)| needles.iter().any(|n| text.contains(n)))
        .map(|(level, _)| level)
        .unwrap_or(EducationLevel::Unknown)
}

/// Calendar day of a timestamp as `YYYY-MM-DD`, taken in the timestamp's own
/// offset. Unparseable input is returned unchanged.
pub fn format_date(text: &str) -> String {
    let trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.date_naive().format("%Y-%m-%d").to_string();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return dt.date_naive().format("%Y-%m-%d").to_string();
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return dt.date().format("%Y-%m-%d").to_string();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    text.to_string()
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// `"75 - PARIS 15"` becomes `"Paris"`.
pub fn normalize_city(text: &str) -> String {
    let cleaned = title_case(text)
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .map(|c| if c == '-' { ' ' } else { c })
        .collect::<String>();
    let city = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if city.is_empty() {
        UNKNOWN.to_string()
    } else {
        city
    }
}

/// Source codes and the French labels themselves both resolve to a known kind,
/// so an `Unmapped` code never reads back as a different contract.
pub fn translate_contract_code(code: &str) -> ContractType {
    let trimmed = code.trim();
    match trimmed.to_lowercase().as_str() {
        "" | "inconnu" => ContractType::Unknown,
        "full_time" | "vie" | "cdi" => ContractType::Permanent,
        "temporary" | "cdd" => ContractType::FixedTerm,
        "mis" | "interim" | "intérim" => ContractType::Temp,
        "internship" | "stage" => ContractType::Internship,
        "apprenticeship" | "alternance" => ContractType::Apprenticeship,
        "other" | "fra" | "lib" | "autre" => ContractType::Other,
        _ => ContractType::Unmapped(trimmed.to_string()),
    }
}

fn salary_label(annual: f64, months: u8) -> String {
    format!("{annual:.0} sur {months} mois")
}

/// Salary descriptor of the structured API, e.g.
/// `"Mensuel de 2500,00 Euros à 3000,00 Euros sur 12 mois"`.
pub fn annualize_salary_text(text: &str) -> String {
    let lower = text.to_lowercase();
    let numbers = DECIMAL_NUMBER
        .find_iter(&lower)
        .filter_map(|m| m.as_str().replace(',', ".").parse::<f64>().ok())
        .collect::<Vec<_>>();
    if numbers.is_empty() {
        return SALARY_NOT_SPECIFIED.to_string();
    }
    let average = numbers.iter().sum::<f64>() / numbers.len() as f64;

    let annual = if lower.contains("annuel") || lower.contains("annual") {
        average
    } else if lower.contains("mensuel") || lower.contains("monthly") {
        average * 12.0
    } else if lower.contains("horaire") || lower.contains("hourly") {
        average * HOURS_PER_WEEK * WEEKS_PER_YEAR
    } else {
        return SALARY_NOT_SPECIFIED.to_string();
    };

    let months = if lower.contains("13 mois") { 13 } else { 12 };
    salary_label(annual, months)
}

/// Structured salary band of the link-harvest source. Figures under 100 are
/// read as thousands, after monthly annualization.
pub fn annualize_salary_range(period: Option<&str>, min: Option<f64>, max: Option<f64>) -> String {
    let (Some(period), Some(min), Some(max)) = (period, min, max) else {
        return SALARY_NOT_SPECIFIED.to_string();
    };
    let average = (min + max) / 2.0;
    let mut annual = match period.trim().to_lowercase().as_str() {
        "yearly" => average,
        "monthly" => average * 12.0,
        _ => return SALARY_NOT_SPECIFIED.to_string(),
    };
    if !annual.is_finite() || annual <= 0.0 {
        return SALARY_NOT_SPECIFIED.to_string();
    }
    if annual < 100.0 {
        annual *= 1000.0;
    }
    salary_label(annual, 12)
}

pub fn classify_sector(text: Option<&str>) -> String {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn text_value(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_value(value: Option<&JsonValue>) -> Option<f64> {
    match value? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn text_or_unknown(record: &MappedRecord, field: CanonicalField) -> String {
    text_value(record.get(field))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn salary(source: Source, record: &MappedRecord) -> String {
    let value = record.get(CanonicalField::SalaryAnnualized);
    match source {
        Source::FranceTravail => text_value(value)
            .map(|t| annualize_salary_text(&t))
            .unwrap_or_else(|| SALARY_NOT_SPECIFIED.to_string()),
        Source::WelcomeToTheJungle => {
            let member = |key: &str| value.and_then(|v| v.get(key));
            annualize_salary_range(
                member(WTTJ_SALARY_PERIOD).and_then(JsonValue::as_str),
                number_value(member(WTTJ_SALARY_MIN)),
                number_value(member(WTTJ_SALARY_MAX)),
            )
        }
    }
}

/// Map then clean one raw listing. Skill sets are left empty for the
/// extractor.
pub fn normalize(raw: &RawListing) -> CanonicalListing {
    let source = raw.source();
    let record = map_fields(raw);
    let text = |field| text_value(record.get(field));

    CanonicalListing {
        source,
        published_at: text(CanonicalField::PublishedAt)
            .map(|d| format_date(&d))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        contract_type: text(CanonicalField::ContractType)
            .map(|c| translate_contract_code(&c))
            .unwrap_or(ContractType::Unknown),
        title: text_or_unknown(&record, CanonicalField::Title),
        description: strip_markup(text(CanonicalField::Description).as_deref()),
        industry_sector: classify_sector(text(CanonicalField::IndustrySector).as_deref()),
        education_level: text(CanonicalField::EducationLevel)
            .map(|e| classify_education(&e))
            .unwrap_or(EducationLevel::Unknown),
        experience_level: text_or_unknown(&record, CanonicalField::ExperienceLevel),
        salary_annualized: salary(source, &record),
        company_name: text_or_unknown(&record, CanonicalField::CompanyName),
        company_description: strip_markup(text(CanonicalField::CompanyDescription).as_deref()),
        city: text(CanonicalField::City)
            .map(|c| normalize_city(&c))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        source_url: text_or_unknown(&record, CanonicalField::SourceUrl),
        tech_skills: Default::default(),
        soft_skills: Default::default(),
    }
}
