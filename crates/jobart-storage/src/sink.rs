use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{Array, ArrayRef, ListArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use jobart_core::{
    dataset_slug, CanonicalField, CanonicalListing, ContractType, EducationLevel, Source,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

/// Provenance column appended after the canonical ones.
const SOURCE_COLUMN: &str = "source";

fn text_column(listing: &CanonicalListing, field: CanonicalField) -> &str {
    match field {
        CanonicalField::PublishedAt => &listing.published_at,
        CanonicalField::ContractType => listing.contract_type.label(),
        CanonicalField::Title => &listing.title,
        CanonicalField::Description => &listing.description,
        CanonicalField::IndustrySector => &listing.industry_sector,
        CanonicalField::EducationLevel => listing.education_level.label(),
        CanonicalField::ExperienceLevel => &listing.experience_level,
        CanonicalField::SalaryAnnualized => &listing.salary_annualized,
        CanonicalField::CompanyName => &listing.company_name,
        CanonicalField::CompanyDescription => &listing.company_description,
        CanonicalField::City => &listing.city,
        CanonicalField::SourceUrl => &listing.source_url,
        CanonicalField::TechSkills | CanonicalField::SoftSkills => "",
    }
}

fn skills_of(listing: &CanonicalListing, field: CanonicalField) -> &BTreeSet<String> {
    if field == CanonicalField::TechSkills {
        &listing.tech_skills
    } else {
        &listing.soft_skills
    }
}

/// One row per listing, columns in canonical order. Skill columns are native
/// list-of-string columns.
pub fn listings_record_batch(listings: &[CanonicalListing]) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(CanonicalField::ALL.len() + 1);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(CanonicalField::ALL.len() + 1);

    for field in CanonicalField::ALL {
        let column: ArrayRef = if field.is_derived() {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for listing in listings {
                for skill in skills_of(listing, field) {
                    builder.values().append_value(skill);
                }
                builder.append(true);
            }
            Arc::new(builder.finish())
        } else {
            Arc::new(StringArray::from(
                listings
                    .iter()
                    .map(|l| Some(text_column(l, field)))
                    .collect::<Vec<_>>(),
            ))
        };
        fields.push(ArrowField::new(field.name(), column.data_type().clone(), false));
        columns.push(column);
    }

    fields.push(ArrowField::new(SOURCE_COLUMN, DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from(
        listings
            .iter()
            .map(|l| Some(l.source.as_str()))
            .collect::<Vec<_>>(),
    )));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("building listings record batch")
}

pub fn write_parquet(path: &Path, listings: &[CanonicalListing]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let batch = listings_record_batch(listings)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    info!(path = %path.display(), rows = listings.len(), "wrote parquet dataset");
    Ok(())
}

/// Column values for row-oriented sinks, in canonical order followed by the
/// source. Skill sets become JSON arrays of strings.
fn row_values(listing: &CanonicalListing) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(CanonicalField::ALL.len() + 1);
    for field in CanonicalField::ALL {
        values.push(if field.is_derived() {
            serde_json::to_string(skills_of(listing, field))?
        } else {
            text_column(listing, field).to_string()
        });
    }
    values.push(listing.source.as_str().to_string());
    Ok(values)
}

fn row_columns() -> Vec<&'static str> {
    CanonicalField::ALL
        .iter()
        .map(|f| f.name())
        .chain(std::iter::once(SOURCE_COLUMN))
        .collect()
}

/// Flat-file copy of a dataset, one header row then one row per listing.
pub fn write_csv(path: &Path, listings: &[CanonicalListing]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(row_columns())
        .with_context(|| format!("writing csv header {}", path.display()))?;
    for listing in listings {
        writer
            .write_record(row_values(listing)?)
            .with_context(|| format!("writing csv row {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    info!(path = %path.display(), rows = listings.len(), "wrote csv dataset");
    Ok(())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .with_context(|| format!("missing utf8 column `{name}`"))
}

fn list_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ListArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<ListArray>())
        .with_context(|| format!("missing list column `{name}`"))
}

fn skill_set(list: &ListArray, row: usize) -> Result<BTreeSet<String>> {
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<StringArray>()
        .context("skill list items are not utf8")?;
    Ok(values.iter().flatten().map(ToString::to_string).collect())
}

pub fn read_parquet(path: &Path) -> Result<Vec<CanonicalListing>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata {}", path.display()))?
        .build()
        .with_context(|| format!("building parquet reader {}", path.display()))?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("decoding {}", path.display()))?;
        let text = |field: CanonicalField| string_column(&batch, field.name());
        let published_at = text(CanonicalField::PublishedAt)?;
        let contract_type = text(CanonicalField::ContractType)?;
        let title = text(CanonicalField::Title)?;
        let description = text(CanonicalField::Description)?;
        let industry_sector = text(CanonicalField::IndustrySector)?;
        let education_level = text(CanonicalField::EducationLevel)?;
        let experience_level = text(CanonicalField::ExperienceLevel)?;
        let salary = text(CanonicalField::SalaryAnnualized)?;
        let company_name = text(CanonicalField::CompanyName)?;
        let company_description = text(CanonicalField::CompanyDescription)?;
        let city = text(CanonicalField::City)?;
        let source_url = text(CanonicalField::SourceUrl)?;
        let tech = list_column(&batch, CanonicalField::TechSkills.name())?;
        let soft = list_column(&batch, CanonicalField::SoftSkills.name())?;
        let sources = string_column(&batch, SOURCE_COLUMN)?;

        for row in 0..batch.num_rows() {
            let source = Source::from_id(sources.value(row))
                .with_context(|| format!("unknown source `{}`", sources.value(row)))?;
            out.push(CanonicalListing {
                source,
                published_at: published_at.value(row).to_string(),
                contract_type: ContractType::from_label(contract_type.value(row)),
                title: title.value(row).to_string(),
                description: description.value(row).to_string(),
                industry_sector: industry_sector.value(row).to_string(),
                education_level: EducationLevel::from_label(education_level.value(row)),
                experience_level: experience_level.value(row).to_string(),
                salary_annualized: salary.value(row).to_string(),
                company_name: company_name.value(row).to_string(),
                company_description: company_description.value(row).to_string(),
                city: city.value(row).to_string(),
                source_url: source_url.value(row).to_string(),
                tech_skills: skill_set(tech, row)?,
                soft_skills: skill_set(soft, row)?,
            });
        }
    }
    Ok(out)
}

/// Relational sink. Every write replaces the target table wholesale.
#[derive(Debug, Clone)]
pub struct SqlSink {
    pool: SqlitePool,
}

impl SqlSink {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("parsing database url {database_url}"))?
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {database_url}"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn replace_table(&self, table: &str, listings: &[CanonicalListing]) -> Result<()> {
        let table = checked_table_name(table)?;
        let columns = row_columns();

        let mut tx = self.pool.begin().await.context("opening transaction")?;
        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{table}""#))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("dropping table {table}"))?;

        let ddl = columns
            .iter()
            .map(|c| format!("{c} TEXT NOT NULL"))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(r#"CREATE TABLE "{table}" ({ddl})"#))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("creating table {table}"))?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!(
            r#"INSERT INTO "{table}" ({}) VALUES ({placeholders})"#,
            columns.join(", ")
        );
        for listing in listings {
            let mut query = sqlx::query(&insert);
            for value in row_values(listing)? {
                query = query.bind(value);
            }
            query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting into {table}"))?;
        }

        tx.commit().await.context("committing table replace")?;
        info!(table, rows = listings.len(), "replaced sql table");
        Ok(())
    }

    pub async fn read_table(&self, table: &str) -> Result<Vec<CanonicalListing>> {
        let table = checked_table_name(table)?;
        let rows = sqlx::query(&format!(r#"SELECT * FROM "{table}" ORDER BY rowid"#))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("reading table {table}"))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let skills = |field: CanonicalField| -> Result<BTreeSet<String>> {
                let raw: String = row.try_get(field.name())?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("decoding {} json array", field.name()))
            };
            let source: String = row.try_get(SOURCE_COLUMN)?;
            let contract: String = row.try_get(CanonicalField::ContractType.name())?;
            let education: String = row.try_get(CanonicalField::EducationLevel.name())?;
            out.push(CanonicalListing {
                source: Source::from_id(&source)
                    .with_context(|| format!("unknown source `{source}`"))?,
                published_at: row.try_get(CanonicalField::PublishedAt.name())?,
                contract_type: ContractType::from_label(&contract),
                title: row.try_get(CanonicalField::Title.name())?,
                description: row.try_get(CanonicalField::Description.name())?,
                industry_sector: row.try_get(CanonicalField::IndustrySector.name())?,
                education_level: EducationLevel::from_label(&education),
                experience_level: row.try_get(CanonicalField::ExperienceLevel.name())?,
                salary_annualized: row.try_get(CanonicalField::SalaryAnnualized.name())?,
                company_name: row.try_get(CanonicalField::CompanyName.name())?,
                company_description: row.try_get(CanonicalField::CompanyDescription.name())?,
                city: row.try_get(CanonicalField::City.name())?,
                source_url: row.try_get(CanonicalField::SourceUrl.name())?,
                tech_skills: skills(CanonicalField::TechSkills)?,
                soft_skills: skills(CanonicalField::SoftSkills)?,
            });
        }
        Ok(out)
    }
}

fn checked_table_name(table: &str) -> Result<&str> {
    if table.is_empty() || dataset_slug(table) != table {
        bail!("invalid table name `{table}`");
    }
    Ok(table)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn manifest_entry(name: &str, root: &Path, path: &Path) -> Result<ManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path.strip_prefix(root).unwrap_or(path).display().to_string();
    Ok(ManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

pub async fn write_manifest<T: Serialize>(path: &Path, manifest: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(manifest).context("serializing dataset manifest")?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
