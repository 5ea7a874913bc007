//! The topic taxonomy consumed by the optional labeling stage.

use std::collections::BTreeMap;
use std::path::Path;

use textkg_types::KgError;

/// Mapping of taxonomy dimension → allowed category labels.
///
/// Labels proposed by the model that are not present here are dropped.
#[derive(Debug, Clone, Default)]
pub struct TopicTaxonomy {
    dimensions: BTreeMap<String, Vec<String>>,
}

impl TopicTaxonomy {
    pub fn from_dimensions(dimensions: BTreeMap<String, Vec<String>>) -> Self {
        Self { dimensions }
    }

    /// Load the taxonomy from a JSON file: `{"dimension": ["label", ...], ...}`.
    pub fn load(path: &Path) -> Result<Self, KgError> {
        if !path.exists() {
            return Err(KgError::ConfigError(format!(
                "topic taxonomy not found at {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let dimensions: BTreeMap<String, Vec<String>> = serde_json::from_str(&data)
            .map_err(|e| KgError::ConfigError(format!("invalid topic taxonomy: {e}")))?;
        Ok(Self::from_dimensions(dimensions))
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// The dimension a label belongs to, if any.
    pub fn dimension_of(&self, label: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(_, labels)| labels.iter().any(|l| l == label))
            .map(|(dimension, _)| dimension.as_str())
    }

    /// Every label across all dimensions, in dimension order.
    pub fn all_labels(&self) -> Vec<&str> {
        self.dimensions
            .values()
            .flat_map(|labels| labels.iter().map(String::as_str))
            .collect()
    }
}
