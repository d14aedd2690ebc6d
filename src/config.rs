/// Configuration for the residual volumetric network
///
/// The architecture is fixed apart from the depth of the feature stack.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of 64 -> 64 conv + ReLU blocks between the projections
    pub block_count: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { block_count: 2 }
    }
}

impl ModelConfig {
    /// Channel width of the input projection and every feature block
    pub const FEATURE_CHANNELS: usize = 64;

    /// Channels of the input and reconstructed volumes
    pub const IMAGE_CHANNELS: usize = 1;

    /// Number of convolutions in the network (input + blocks + output)
    pub fn conv_count(&self) -> usize {
        self.block_count + 2
    }

    /// Serialize to the JSON string stored in checkpoint metadata
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON string stored in checkpoint metadata
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_two_blocks() {
        let config = ModelConfig::default();
        assert_eq!(config.block_count, 2);
        assert_eq!(config.conv_count(), 4);
    }

    #[test]
    fn test_json_roundtrip() -> crate::Result<()> {
        let config = ModelConfig { block_count: 18 };
        let parsed = ModelConfig::from_json(&config.to_json()?)?;
        assert_eq!(parsed, config);
        Ok(())
    }

    #[test]
    fn test_missing_fields_use_defaults() -> crate::Result<()> {
        let parsed = ModelConfig::from_json("{}")?;
        assert_eq!(parsed, ModelConfig::default());
        Ok(())
    }
}
