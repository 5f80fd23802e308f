use async_trait::async_trait;
use pagegauge_core_types::{GatherError, GatherResult};
use pagegauge_driver::AppManifest;
use serde_json::{json, Value};

use crate::gatherer::{Gatherer, LoadData, PassContext};

pub const NAME: &str = "Manifest";

/// The page's web app manifest, `null` when none is linked.
#[derive(Debug, Default)]
pub struct Manifest;

#[async_trait]
impl Gatherer for Manifest {
    fn name(&self) -> &str {
        NAME
    }

    async fn after_pass(
        &self,
        ctx: &PassContext<'_>,
        _load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        let manifest = ctx
            .driver
            .get_app_manifest()
            .await
            .map_err(|err| GatherError::gatherer(err.message).recoverable(true))?;
        Ok(Some(match manifest {
            Some(manifest) => parse_manifest(&manifest),
            None => Value::Null,
        }))
    }
}

/// `{ url, raw, value, debugString }`, with `value` null when `raw` is not JSON.
pub fn parse_manifest(manifest: &AppManifest) -> Value {
    match serde_json::from_str::<Value>(&manifest.data) {
        Ok(value) => json!({
            "url": manifest.url,
            "raw": manifest.data,
            "value": value,
            "errors": manifest.errors,
            "debugString": Value::Null,
        }),
        Err(err) => json!({
            "url": manifest.url,
            "raw": manifest.data,
            "value": Value::Null,
            "errors": manifest.errors,
            "debugString": format!("ERROR: file isn't valid JSON: {err}"),
        }),
    }
}
