pub mod arithmetic;
pub mod catalog;

use crate::registry::ToolRegistry;

/// Tools for the research stage: profile, catalog and weather lookups.
pub fn research_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(catalog::FetchUserProfileTool);
    registry.register(catalog::FetchCatalogTool);
    registry.register(catalog::FetchWeatherTool);
    registry
}

/// Tools for the analysis stage: arithmetic and shipping estimates.
pub fn analysis_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(arithmetic::AddTool);
    registry.register(arithmetic::ProductTool);
    registry.register(catalog::EstimateShippingTool);
    registry
}

/// Registry holding only the arithmetic tools.
pub fn arithmetic_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(arithmetic::AddTool);
    registry.register(arithmetic::ProductTool);
    registry
}

/// JSON number, as an integer when the value is whole.
pub(crate) fn number(value: f64) -> serde_json::Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serde_json::Value::from(value as i64)
    } else {
        serde_json::Value::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_registries() {
        assert_eq!(
            research_registry().list(),
            ["fetch_catalog", "fetch_user_profile", "fetch_weather"]
        );
        assert_eq!(analysis_registry().list(), ["add", "estimate_shipping", "prod"]);
        assert_eq!(arithmetic_registry().list(), ["add", "prod"]);
    }

    #[test]
    fn test_number_prefers_integers() {
        assert_eq!(number(4.0), json!(4));
        assert_eq!(number(2.5), json!(2.5));
    }
}
