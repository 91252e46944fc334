//! Ordered feature schema shared by the store and model snapshots.

use serde::{Deserialize, Serialize};

use crate::forecast::features::{store_schema, ConstituencyFeatureVector};
use crate::{Error, Result};

/// Ordered list of feature names a model was trained on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub names: Vec<String>,
}

impl FeatureSchema {
    /// The schema the current feature vectors expose.
    pub fn current() -> Self {
        Self::from_names(store_schema())
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fatal if `store_schema` differs in names or order.
    pub fn ensure_matches(&self, store_schema: &[String]) -> Result<()> {
        if self.names.as_slice() != store_schema {
            return Err(Error::schema_mismatch(&self.names, store_schema));
        }
        Ok(())
    }

    /// Pull the model inputs out of a vector in schema order.
    pub fn extract(&self, fv: &ConstituencyFeatureVector) -> Result<Vec<f64>> {
        self.names
            .iter()
            .map(|name| {
                fv.feature_value(name)
                    .ok_or_else(|| Error::schema_mismatch(&self.names, &store_schema()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::features::{BaselineShares, ConstituencyBaseline, FEATURE_NAMES};
    use chrono::Utc;

    fn fv() -> ConstituencyFeatureVector {
        ConstituencyFeatureVector::from_baseline(
            &ConstituencyBaseline {
                constituency_id: "AC_7".to_string(),
                region: "East".to_string(),
                shares: BaselineShares::new(30.0, 50.0, 20.0),
            },
            2.5,
            Utc::now(),
        )
    }

    #[test]
    fn test_current_schema_extracts_in_order() {
        let schema = FeatureSchema::current();
        let values = schema.extract(&fv()).unwrap();
        assert_eq!(values.len(), FEATURE_NAMES.len());
        assert_eq!(values[0], 30.0);
        assert_eq!(values[3], -20.0);
    }

    #[test]
    fn test_unknown_feature_is_schema_mismatch() {
        let schema = FeatureSchema::from_names(vec!["poll_lead".into(), "turnout".into()]);
        assert!(matches!(
            schema.extract(&fv()),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_order_matters() {
        let schema = FeatureSchema::current();
        let mut reordered = schema.names.clone();
        reordered.swap(0, 1);
        assert!(schema.ensure_matches(&schema.names).is_ok());
        assert!(schema.ensure_matches(&reordered).is_err());
    }
}
