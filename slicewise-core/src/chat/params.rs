//! Parameters passed to the generator with each conversation
//!
//! Sampling knobs are clamped into their valid range whenever they are set, built or
//! deserialized; an out of range value is logged and replaced by the nearest bound.
use std::ops::RangeInclusive;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Deserializer, Serialize};

use crate::metadata::Metadata;

use super::tools::ToolSpec;

const TEMPERATURE: RangeInclusive<f64> = 0.0..=2.0;
const TOP_P: RangeInclusive<f64> = 0.0..=1.0;
const PENALTY: RangeInclusive<f64> = -2.0..=2.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Builder)]
#[builder(
    setter(into, strip_option),
    default,
    build_fn(private, name = "build_unclamped")
)]
pub struct GenerationParameters {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_temperature"
    )]
    temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_top_p"
    )]
    top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_penalty"
    )]
    presence_penalty: Option<f64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_penalty"
    )]
    frequency_penalty: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,

    /// Maximum time a single generation may take
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<Duration>,

    /// Tools the generator may call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,

    /// Provider specific parameters, passed through as is
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    extra: Metadata,
}

impl GenerationParameters {
    pub fn builder() -> GenerationParametersBuilder {
        GenerationParametersBuilder::default()
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn set_temperature(&mut self, temperature: Option<f64>) {
        self.temperature = clamp_param("temperature", temperature, &TEMPERATURE);
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn set_max_tokens(&mut self, max_tokens: Option<u32>) {
        self.max_tokens = max_tokens;
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn set_top_p(&mut self, top_p: Option<f64>) {
        self.top_p = clamp_param("top_p", top_p, &TOP_P);
    }

    pub fn stop(&self) -> Option<&[String]> {
        self.stop.as_deref()
    }

    pub fn set_stop(&mut self, stop: Option<Vec<String>>) {
        self.stop = stop;
    }

    pub fn presence_penalty(&self) -> Option<f64> {
        self.presence_penalty
    }

    pub fn set_presence_penalty(&mut self, penalty: Option<f64>) {
        self.presence_penalty = clamp_param("presence_penalty", penalty, &PENALTY);
    }

    pub fn frequency_penalty(&self) -> Option<f64> {
        self.frequency_penalty
    }

    pub fn set_frequency_penalty(&mut self, penalty: Option<f64>) {
        self.frequency_penalty = clamp_param("frequency_penalty", penalty, &PENALTY);
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn tools(&self) -> Option<&[ToolSpec]> {
        self.tools.as_deref()
    }

    pub fn set_tools(&mut self, tools: Option<Vec<ToolSpec>>) {
        self.tools = tools;
    }

    pub fn take_tools(&mut self) -> Option<Vec<ToolSpec>> {
        self.tools.take()
    }

    pub fn tool_choice(&self) -> Option<&str> {
        self.tool_choice.as_deref()
    }

    pub fn set_tool_choice(&mut self, tool_choice: Option<String>) {
        self.tool_choice = tool_choice;
    }

    pub fn extra(&self) -> &Metadata {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut Metadata {
        &mut self.extra
    }

    /// Returns a copy where every parameter set in `overloads` replaces the one in `self`
    ///
    /// Extra parameters are merged key by key.
    #[must_use]
    pub fn merge(&self, overloads: &GenerationParameters) -> GenerationParameters {
        let mut extra = self.extra.clone();
        extra.extend(overloads.extra.clone());

        GenerationParameters {
            temperature: overloads.temperature.or(self.temperature),
            max_tokens: overloads.max_tokens.or(self.max_tokens),
            top_p: overloads.top_p.or(self.top_p),
            stop: overloads.stop.clone().or_else(|| self.stop.clone()),
            presence_penalty: overloads.presence_penalty.or(self.presence_penalty),
            frequency_penalty: overloads.frequency_penalty.or(self.frequency_penalty),
            seed: overloads.seed.or(self.seed),
            timeout: overloads.timeout.or(self.timeout),
            tools: overloads.tools.clone().or_else(|| self.tools.clone()),
            tool_choice: overloads
                .tool_choice
                .clone()
                .or_else(|| self.tool_choice.clone()),
            extra,
        }
    }

    fn clamped(mut self) -> Self {
        self.set_temperature(self.temperature);
        self.set_top_p(self.top_p);
        self.set_presence_penalty(self.presence_penalty);
        self.set_frequency_penalty(self.frequency_penalty);
        self
    }
}

impl GenerationParametersBuilder {
    /// Builds the parameters, clamping sampling knobs into range
    ///
    /// # Errors
    ///
    /// Never errors in practice; every field has a default
    pub fn build(&self) -> Result<GenerationParameters, GenerationParametersBuilderError> {
        self.build_unclamped().map(GenerationParameters::clamped)
    }
}

#[allow(clippy::float_cmp)]
fn clamp_param(name: &str, value: Option<f64>, range: &RangeInclusive<f64>) -> Option<f64> {
    let value = value?;
    if value.is_nan() {
        tracing::warn!(param = name, "Ignoring NaN generation parameter");
        return None;
    }
    let clamped = value.clamp(*range.start(), *range.end());
    if clamped != value {
        tracing::warn!(
            param = name,
            value,
            clamped,
            "Generation parameter out of range, clamping"
        );
    }
    Some(clamped)
}

fn deserialize_clamped<'de, D>(
    deserializer: D,
    name: &str,
    range: &RangeInclusive<f64>,
) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(|value| clamp_param(name, value, range))
}

fn deserialize_temperature<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    deserialize_clamped(d, "temperature", &TEMPERATURE)
}

fn deserialize_top_p<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    deserialize_clamped(d, "top_p", &TOP_P)
}

fn deserialize_penalty<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    deserialize_clamped(d, "penalty", &PENALTY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(3.5, 2.0 ; "above")]
    #[test_case(-1.0, 0.0 ; "below")]
    #[test_case(0.7, 0.7 ; "inside")]
    fn test_builder_clamps_temperature(value: f64, expected: f64) {
        let params = GenerationParameters::builder()
            .temperature(value)
            .build()
            .unwrap();
        assert_eq!(params.temperature(), Some(expected));
    }

    #[test]
    fn test_setters_clamp() {
        let mut params = GenerationParameters::default();
        params.set_top_p(Some(1.5));
        params.set_presence_penalty(Some(-4.0));
        params.set_frequency_penalty(Some(f64::NAN));

        assert_eq!(params.top_p(), Some(1.0));
        assert_eq!(params.presence_penalty(), Some(-2.0));
        assert_eq!(params.frequency_penalty(), None);
    }

    #[test]
    fn test_deserialize_clamps() {
        let params: GenerationParameters = serde_json::from_value(json!({
            "temperature": 9.0,
            "top_p": -0.5,
            "max_tokens": 100
        }))
        .unwrap();

        assert_eq!(params.temperature(), Some(2.0));
        assert_eq!(params.top_p(), Some(0.0));
        assert_eq!(params.max_tokens(), Some(100));
    }

    #[test]
    fn test_merge_prefers_overloads() {
        let base = GenerationParameters::builder()
            .temperature(0.5)
            .max_tokens(10u32)
            .extra(Metadata::from([("a", 1), ("b", 2)]))
            .build()
            .unwrap();
        let overloads = GenerationParameters::builder()
            .max_tokens(20u32)
            .stop(vec!["\n".to_string()])
            .extra(Metadata::from([("b", 3)]))
            .build()
            .unwrap();

        let merged = base.merge(&overloads);

        assert_eq!(merged.temperature(), Some(0.5));
        assert_eq!(merged.max_tokens(), Some(20));
        assert_eq!(merged.stop(), Some(&["\n".to_string()][..]));
        assert_eq!(merged.extra().get("a").unwrap().as_i64(), Some(1));
        assert_eq!(merged.extra().get("b").unwrap().as_i64(), Some(3));
    }
}
