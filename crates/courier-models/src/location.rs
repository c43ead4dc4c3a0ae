use serde::{Deserialize, Serialize};

/// A position ping published by a delivery agent for one context.
/// `timestamp` is the device clock in epoch milliseconds and orders
/// updates within a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub user_id: i64,
    pub context_id: i64,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub timestamp: i64,
}

impl LocationUpdate {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err("lat must be between -90 and 90");
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err("lng must be between -180 and 180");
        }
        if let Some(accuracy) = self.accuracy {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err("accuracy must be a non-negative number");
            }
        }
        if self.timestamp < 0 {
            return Err("timestamp must be a positive epoch in milliseconds");
        }
        Ok(())
    }
}
