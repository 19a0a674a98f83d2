use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use jobart_core::dataset_slug;
use tracing::{info, warn};

use crate::AdapterError;

/// Produces the job-page URLs of the link-harvest source for one query.
/// Browser-driven harvesting lives outside this crate.
#[async_trait]
pub trait LinkHarvester: Send + Sync {
    async fn harvest(&self, job_title: &str) -> Result<Vec<String>, AdapterError>;
}

/// Reads `<dir>/<query-slug>.txt`, one URL per line.
#[derive(Debug, Clone)]
pub struct LinksFileHarvester {
    dir: PathBuf,
}

impl LinksFileHarvester {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, job_title: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", dataset_slug(job_title)))
    }
}

pub fn parse_links(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

#[async_trait]
impl LinkHarvester for LinksFileHarvester {
    async fn harvest(&self, job_title: &str) -> Result<Vec<String>, AdapterError> {
        let path = self.path_for(job_title);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let links = parse_links(&text);
                info!(path = %path.display(), count = links.len(), "loaded harvested links");
                Ok(links)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "no harvested links for query");
                Ok(Vec::new())
            }
            Err(err) => Err(AdapterError::Harvest(format!("reading {}: {err}", path.display()))),
        }
    }
}
