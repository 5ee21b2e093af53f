//! Mock data sources for the shopping workflow demo.

use futures::future::BoxFuture;
use serde_json::json;

use arbor_core::error::{ArborError, Result};
use arbor_core::state::ToolResult;
use arbor_core::traits::Tool;
use arbor_core::types::ToolContext;

pub struct FetchUserProfileTool;

impl Tool for FetchUserProfileTool {
    fn name(&self) -> &str {
        "fetch_user_profile"
    }

    fn description(&self) -> &str {
        "Fetch a mock user profile by id."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "userId": { "type": "string", "description": "User identifier" }
            },
            "required": ["userId"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let user_id = input["userId"].as_str().ok_or_else(|| ArborError::ToolValidation {
                tool: "fetch_user_profile".into(),
                message: "'userId' must be a string".into(),
            })?;
            Ok(ToolResult::ok(json!({
                "userId": user_id,
                "name": "Alex",
                "preferences": ["minimalist", "outdoor", "budget-conscious"],
                "budgetUsd": 200
            })))
        })
    }
}

pub struct FetchCatalogTool;

impl Tool for FetchCatalogTool {
    fn name(&self) -> &str {
        "fetch_catalog"
    }

    fn description(&self) -> &str {
        "Return a mock product catalog."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            Ok(ToolResult::ok(json!([
                { "id": "tent-lite", "name": "Lightweight Tent", "priceUsd": 129 },
                { "id": "stove-mini", "name": "Compact Stove", "priceUsd": 49 },
                { "id": "sleep-pad", "name": "Sleeping Pad", "priceUsd": 69 },
                { "id": "lantern", "name": "Rechargeable Lantern", "priceUsd": 29 }
            ])))
        })
    }
}

pub struct FetchWeatherTool;

impl Tool for FetchWeatherTool {
    fn name(&self) -> &str {
        "fetch_weather"
    }

    fn description(&self) -> &str {
        "Mock weather lookup (not needed for the core task)."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" }
            },
            "required": ["city"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let city = input["city"].as_str().unwrap_or_default();
            Ok(ToolResult::ok(json!({
                "city": city,
                "forecast": "Clear skies, 55-70F"
            })))
        })
    }
}

pub struct EstimateShippingTool;

impl Tool for EstimateShippingTool {
    fn name(&self) -> &str {
        "estimate_shipping"
    }

    fn description(&self) -> &str {
        "Estimate mock shipping cost."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "weightKg": { "type": "number" }
            },
            "required": ["weightKg"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let weight = input["weightKg"].as_f64().ok_or_else(|| ArborError::ToolValidation {
                tool: "estimate_shipping".into(),
                message: "'weightKg' must be a number".into(),
            })?;
            Ok(ToolResult::ok(json!({ "shippingUsd": shipping_usd(weight) })))
        })
    }
}

/// Flat $3/kg with a $12 floor.
pub fn shipping_usd(weight_kg: f64) -> i64 {
    ((weight_kg * 3.0).round() as i64).max(12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::types::RunId;

    fn ctx() -> ToolContext {
        ToolContext {
            run_id: RunId::from("r"),
            agent_id: "a".into(),
            call_id: "c".into(),
        }
    }

    #[test]
    fn test_shipping_floor() {
        assert_eq!(shipping_usd(1.0), 12);
        assert_eq!(shipping_usd(4.0), 12);
        assert_eq!(shipping_usd(5.0), 15);
        assert_eq!(shipping_usd(10.2), 31);
    }

    #[tokio::test]
    async fn test_profile_echoes_user_id() {
        let result = FetchUserProfileTool
            .execute(json!({"userId": "u-7"}), ctx())
            .await
            .unwrap();
        let data = result.data().unwrap();
        assert_eq!(data["userId"], "u-7");
        assert_eq!(data["budgetUsd"], 200);
    }

    #[tokio::test]
    async fn test_catalog_has_four_items() {
        let result = FetchCatalogTool.execute(json!({}), ctx()).await.unwrap();
        assert_eq!(result.data().unwrap().as_array().unwrap().len(), 4);
    }
}
