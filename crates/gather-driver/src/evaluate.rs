//! In-page evaluation helpers.

use pagegauge_core_types::{GatherError, GatherErrorKind};
use serde_json::{json, Value};

/// Wraps `expression` so it always settles through the page's native
/// promise, converting thrown errors into a serializable object.
pub fn wrap_in_native_promise(expression: &str) -> String {
    format!(
        r#"(function wrapInNativePromise() {{
  const __nativePromise = window.__nativePromise || Promise;
  return new __nativePromise(function (resolve) {{
    return __nativePromise.resolve()
      .then(_ => {expression})
      .catch(function wrapRuntimeEvalErrorInBrowser(err) {{
        err = err || new Error();
        const fallbackMessage = typeof err === 'string' ? err : 'unknown error';
        return {{
          __failedInBrowser: true,
          name: err.name || 'Error',
          message: err.message || fallbackMessage,
          stack: err.stack || (new Error()).stack,
        }};
      }})
      .then(resolve);
  }});
}}())"#
    )
}

pub fn evaluate_params(expression: &str) -> Value {
    json!({
        "expression": wrap_in_native_promise(expression),
        "includeCommandLineAPI": true,
        "awaitPromise": true,
        "returnByValue": true
    })
}

/// Turns a `Runtime.evaluate` response into the expression's value.
pub fn interpret_response(response: &Value) -> Result<Value, GatherError> {
    if let Some(details) = response.get("exceptionDetails") {
        let text = details
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("unknown exception");
        return Err(GatherError::new(
            GatherErrorKind::PageEvaluation,
            format!("An unexpected error occurred: {text}"),
        ));
    }

    let value = response
        .get("result")
        .and_then(|result| result.get("value"))
        .cloned()
        .unwrap_or(Value::Null);

    let failed = value
        .get("__failedInBrowser")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if failed {
        let field = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        return Err(GatherError::new(GatherErrorKind::PageEvaluation, field("message"))
            .with_data(json!({
                "name": field("name"),
                "message": field("message"),
                "stack": field("stack"),
            })));
    }
    Ok(value)
}

pub const USER_AGENT_EXPRESSION: &str = "navigator.userAgent";

pub const CACHE_NATIVES_SCRIPT: &str =
    "window.__nativePromise = Promise;\nwindow.__nativeError = Error;";

pub const PERFORMANCE_OBSERVER_SCRIPT: &str = r#"(function registerPerformanceObserverInPage() {
  window.____pgPerformanceObserverRecordedEntries = [];
  const observer = new window.PerformanceObserver(list => {
    const entries = list.getEntries();
    window.____pgPerformanceObserverRecordedEntries.push(...entries);
  });
  observer.observe({entryTypes: ['longtask']});
})()"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_expression_inside_native_promise_chain() {
        let wrapped = wrap_in_native_promise("navigator.userAgent");
        assert!(wrapped.contains(".then(_ => navigator.userAgent)"));
        assert!(wrapped.contains("window.__nativePromise || Promise"));
        let params = evaluate_params("1");
        assert_eq!(params["awaitPromise"], true);
        assert_eq!(params["returnByValue"], true);
    }

    #[test]
    fn failed_in_browser_surfaces_name_message_stack() {
        let err = interpret_response(&json!({
            "result": { "type": "object", "value": {
                "__failedInBrowser": true, "name": "TypeError", "message": "x is undefined", "stack": "at <anon>"
            } }
        }))
        .unwrap_err();
        assert_eq!(err.kind, GatherErrorKind::PageEvaluation);
        assert_eq!(err.message, "x is undefined");
        assert_eq!(err.data.unwrap()["name"], "TypeError");
    }

    #[test]
    fn exception_details_are_page_errors() {
        let err = interpret_response(&json!({
            "result": { "type": "object" },
            "exceptionDetails": { "text": "Uncaught SyntaxError" }
        }))
        .unwrap_err();
        assert_eq!(err.message, "An unexpected error occurred: Uncaught SyntaxError");
    }

    #[test]
    fn plain_values_pass_through() {
        let value = interpret_response(&json!({ "result": { "type": "number", "value": 42 } })).unwrap();
        assert_eq!(value, json!(42));
        let undefined = interpret_response(&json!({ "result": { "type": "undefined" } })).unwrap();
        assert!(undefined.is_null());
    }
}
