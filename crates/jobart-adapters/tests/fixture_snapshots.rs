// Normalization of the recorded source payloads under fixtures/.

use std::path::{Path, PathBuf};

use jobart_adapters::normalize::normalize;
use jobart_adapters::wttj::flatten_job_payload;
use jobart_core::{ContractType, EducationLevel, RawListing, Source, SALARY_NOT_SPECIFIED, UNKNOWN};
use serde_json::Value as JsonValue;

fn fixture(rel: &str) -> JsonValue {
    let path: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures").join(rel);
    let text = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    serde_json::from_str(&text).unwrap()
}

#[test]
fn france_travail_search_page_normalizes() {
    let page = fixture("france_travail/search_page.json");
    let listings = page["resultats"]
        .as_array()
        .unwrap()
        .iter()
        .cloned()
        .map(|offer| normalize(&RawListing::FranceTravail(offer)))
        .collect::<Vec<_>>();
    assert_eq!(listings.len(), 2);

    let first = &listings[0];
    assert_eq!(first.source, Source::FranceTravail);
    assert_eq!(first.published_at, "2024-03-01");
    assert_eq!(first.contract_type, ContractType::Permanent);
    assert_eq!(first.education_level, EducationLevel::Bac5);
    assert_eq!(first.salary_annualized, "45000 sur 13 mois");
    assert_eq!(first.city, "Paris");
    assert_eq!(first.company_name, "DATAFLUX");
    assert_eq!(first.experience_level, "2 ans");
    assert!(!first.description.contains('\n'));

    let second = &listings[1];
    assert_eq!(second.contract_type, ContractType::Temp);
    assert_eq!(second.education_level, EducationLevel::Unknown);
    assert_eq!(second.salary_annualized, SALARY_NOT_SPECIFIED);
    assert_eq!(second.industry_sector, UNKNOWN);
    assert_eq!(second.company_description, "");
    assert_eq!(second.city, "Villeurbanne");
}

#[test]
fn wttj_job_payload_normalizes() {
    let job = flatten_job_payload(fixture("wttj/job.json")).unwrap();
    let listing = normalize(&RawListing::WelcomeToTheJungle(job));

    assert_eq!(listing.source, Source::WelcomeToTheJungle);
    assert_eq!(listing.published_at, "2024-02-28");
    assert_eq!(listing.contract_type, ContractType::Permanent);
    assert_eq!(listing.education_level, EducationLevel::Bac5);
    assert_eq!(listing.salary_annualized, "41000 sur 12 mois");
    assert_eq!(listing.industry_sector, "Logiciels");
    assert_eq!(listing.company_name, "Acme Analytics");
    assert_eq!(listing.city, "Lyon");
    assert!(listing.description.starts_with("Au sein de l'équipe Data"));
    assert!(!listing.description.contains('\u{a0}'));
    assert!(listing.source_url.ends_with("data-analyst-h-f_lyon"));
}

#[test]
fn french_contract_labels_survive_a_parquet_round_trip() {
    let listings = ["Stage", "Autre", "SAI"]
        .into_iter()
        .map(|code| {
            normalize(&RawListing::WelcomeToTheJungle(serde_json::json!({
                "name": "Data Analyst",
                "contract_type": code,
                "description": "Python et SQL",
            })))
        })
        .collect::<Vec<_>>();
    assert_eq!(listings[0].contract_type, ContractType::Internship);
    assert_eq!(listings[2].contract_type, ContractType::Unmapped("SAI".into()));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contracts.parquet");
    jobart_storage::write_parquet(&path, &listings).unwrap();
    assert_eq!(jobart_storage::read_parquet(&path).unwrap(), listings);
}
