//! Per-model token pricing, grounded on `original_source/src/billing_guard.py`'s
//! `MODEL_PRICING` table shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub fn cost(self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.input_per_1k;
        let output_cost = (output_tokens as f64 / 1000.0) * self.output_per_1k;
        input_cost + output_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_by_thousands_of_tokens() {
        let price = ModelPrice {
            input_per_1k: 1.0,
            output_per_1k: 2.0,
        };
        assert_eq!(price.cost(1000, 1000), 3.0);
        assert_eq!(price.cost(500, 0), 0.5);
    }

    #[test]
    fn zero_priced_model_is_free() {
        let price = ModelPrice {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
        };
        assert_eq!(price.cost(1_000_000, 1_000_000), 0.0);
    }
}
