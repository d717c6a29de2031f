//! FitCatalog (C10): supplies the named ship fits doctrine evaluation runs
//! against.
//!
//! The real system sources fits from an EFT-parsed MySQL table
//! (`parse_fits.py`), which is out of scope here (SPEC_FULL.md). Instead a
//! `JsonFitCatalog` reads a flat JSON document from disk, shaped like the
//! rows that query ultimately produced, keeping DoctrineEvaluator ignorant
//! of where fits come from (mirrors the teacher's `ExchangeConnector` seam
//! in `binance_session.rs`, which hides REST vs. websocket behind a trait).

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::PipelineError;
use crate::models::{Fit, FitComponent};

#[async_trait]
pub trait FitCatalog: Send + Sync {
    /// Every fit that should be evaluated this cycle, excluding any whose
    /// name starts with `zz ` (the archived/ignored-fit convention).
    async fn fits(&self) -> Result<Vec<Fit>, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    type_id: i64,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct RawFit {
    fit_id: i64,
    fit_name: String,
    ship_type_id: i64,
    ship_type_name: String,
    doctrine_id: i64,
    doctrine_name: String,
    components: Vec<RawComponent>,
}

pub struct JsonFitCatalog {
    path: String,
}

impl JsonFitCatalog {
    pub fn new(path: String) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FitCatalog for JsonFitCatalog {
    async fn fits(&self) -> Result<Vec<Fit>, PipelineError> {
        let path = self.path.clone();
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::Store(format!("fit catalog read failed: {e}")))?;

        let fits: Vec<RawFit> = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Store(format!("fit catalog parse failed: {e}")))?;

        Ok(fits
            .into_iter()
            .filter(|f| !f.fit_name.starts_with("zz "))
            .map(|f| Fit {
                fit_id: f.fit_id,
                fit_name: f.fit_name,
                ship_type_id: f.ship_type_id,
                ship_type_name: f.ship_type_name,
                doctrine_id: f.doctrine_id,
                doctrine_name: f.doctrine_name,
                components: f
                    .components
                    .into_iter()
                    .map(|c| FitComponent {
                        type_id: c.type_id,
                        quantity: c.quantity,
                    })
                    .collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn archived_fits_are_filtered_out() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"fit_id": 1, "fit_name": "Rifter Tackle", "ship_type_id": 587, "ship_type_name": "Rifter",
                  "doctrine_id": 1, "doctrine_name": "Frigate Roam", "components": [{{"type_id": 2488, "quantity": 1}}]}},
                {{"fit_id": 2, "fit_name": "zz Old Rifter", "ship_type_id": 587, "ship_type_name": "Rifter",
                  "doctrine_id": 1, "doctrine_name": "Frigate Roam", "components": []}}
            ]"#
        )
        .unwrap();

        let catalog = JsonFitCatalog::new(file.path().to_string_lossy().to_string());
        let fits = catalog.fits().await.unwrap();
        assert_eq!(fits.len(), 1);
        assert_eq!(fits[0].fit_name, "Rifter Tackle");
    }
}
