use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// format an engine slot is served with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    Awq,
    Fp8,
    GptqMarlin,
    None,
}

impl Quantization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::Awq => "awq",
            Quantization::Fp8 => "fp8",
            Quantization::GptqMarlin => "gptq_marlin",
            Quantization::None => "none",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// process-wide (or per-slot) quantization request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationPolicy {
    Auto,
    Awq,
    Fp8,
    GptqMarlin,
}

impl QuantizationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantizationPolicy::Auto => "auto",
            QuantizationPolicy::Awq => "awq",
            QuantizationPolicy::Fp8 => "fp8",
            QuantizationPolicy::GptqMarlin => "gptq_marlin",
        }
    }

    /// the format this policy pins, `None` for auto
    pub fn explicit(&self) -> Option<Quantization> {
        match self {
            QuantizationPolicy::Auto => None,
            QuantizationPolicy::Awq => Some(Quantization::Awq),
            QuantizationPolicy::Fp8 => Some(Quantization::Fp8),
            QuantizationPolicy::GptqMarlin => Some(Quantization::GptqMarlin),
        }
    }
}

impl fmt::Display for QuantizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(QuantizationPolicy::Auto),
            "awq" => Ok(QuantizationPolicy::Awq),
            "fp8" => Ok(QuantizationPolicy::Fp8),
            "gptq_marlin" => Ok(QuantizationPolicy::GptqMarlin),
            other => Err(format!("unknown quantization '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("AWQ".parse::<QuantizationPolicy>().unwrap(), QuantizationPolicy::Awq);
        assert_eq!(
            "gptq-marlin".parse::<QuantizationPolicy>().unwrap(),
            QuantizationPolicy::GptqMarlin
        );
        assert!("int4".parse::<QuantizationPolicy>().is_err());
        assert!("".parse::<QuantizationPolicy>().is_err());
    }

    #[test]
    fn test_explicit_format() {
        assert_eq!(QuantizationPolicy::Auto.explicit(), None);
        assert_eq!(QuantizationPolicy::Fp8.explicit(), Some(Quantization::Fp8));
    }
}
