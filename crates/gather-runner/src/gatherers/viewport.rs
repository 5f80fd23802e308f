use async_trait::async_trait;
use pagegauge_core_types::{GatherError, GatherResult};
use serde_json::Value;

use crate::gatherer::{Gatherer, LoadData, PassContext};

pub const NAME: &str = "ViewportDimensions";

const FIELDS: &[&str] = &[
    "innerWidth",
    "innerHeight",
    "outerWidth",
    "outerHeight",
    "devicePixelRatio",
];

const EXPRESSION: &str = r#"(function getViewportDimensions() {
  return Promise.resolve({
    innerWidth: window.innerWidth,
    outerWidth: window.outerWidth,
    innerHeight: window.innerHeight,
    outerHeight: window.outerHeight,
    devicePixelRatio: window.devicePixelRatio,
  });
})()"#;

/// Window and device-pixel dimensions of the loaded page.
#[derive(Debug, Default)]
pub struct ViewportDimensions;

#[async_trait]
impl Gatherer for ViewportDimensions {
    fn name(&self) -> &str {
        NAME
    }

    async fn after_pass(
        &self,
        ctx: &PassContext<'_>,
        _load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        let dimensions = ctx.driver.evaluate_async(EXPRESSION).await?;
        check_numeric(&dimensions)?;
        Ok(Some(dimensions))
    }
}

fn check_numeric(dimensions: &Value) -> GatherResult<()> {
    let all_numeric = FIELDS
        .iter()
        .all(|field| dimensions.get(*field).map_or(false, Value::is_number));
    if all_numeric {
        return Ok(());
    }
    Err(
        GatherError::gatherer(format!("ViewportDimensions results were not numeric: {dimensions}"))
            .recoverable(true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_missing_or_non_numeric_fields() {
        let good = json!({
            "innerWidth": 412, "innerHeight": 732, "outerWidth": 412,
            "outerHeight": 732, "devicePixelRatio": 2.625
        });
        assert!(check_numeric(&good).is_ok());

        let mut bad = good.clone();
        bad["innerWidth"] = json!("412");
        let err = check_numeric(&bad).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.message.starts_with("ViewportDimensions results were not numeric"));

        assert!(check_numeric(&Value::Null).is_err());
    }
}
