//! Field extraction from Lambda ARNs.
//!
//! The invoked function ARN packs the region, the account id, the resource type
//! and, for qualified invocations, an alias or version:
//!
//! ```text
//! arn:aws:lambda:us-east-1:123456789012:function:my-function:prod
//! ```
//!
//! Parsing never fails. Missing or empty segments simply leave the
//! corresponding field unset.

use crate::constants::fields;

/// Qualifier of an ARN, classified by its resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualifier {
    /// Alias or version of a `function` resource.
    Function(String),
    /// Qualifier of an `event-source-mapping(s)` resource.
    EventSourceMapping(String),
}

impl Qualifier {
    /// Field key the qualifier is reported under.
    pub fn field_key(&self) -> &'static str {
        match self {
            Qualifier::Function(_) => fields::FUNCTION_QUALIFIER,
            Qualifier::EventSourceMapping(_) => fields::EVENT_SOURCE_MAPPINGS,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Qualifier::Function(value) | Qualifier::EventSourceMapping(value) => value,
        }
    }
}

/// Semantic fields decoded from an ARN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArnFields {
    pub region: Option<String>,
    pub account_id: Option<String>,
    pub qualifier: Option<Qualifier>,
}

impl ArnFields {
    /// Flatten into `(key, value)` pairs, skipping absent fields.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = Vec::with_capacity(3);
        if let Some(region) = &self.region {
            entries.push((fields::REGION, region.clone()));
        }
        if let Some(account_id) = &self.account_id {
            entries.push((fields::ACCOUNT_ID, account_id.clone()));
        }
        if let Some(qualifier) = &self.qualifier {
            entries.push((qualifier.field_key(), qualifier.value().to_string()));
        }
        entries
    }
}

/// Parse an ARN into its region, account id and classified qualifier.
pub fn parse_arn(arn: &str) -> ArnFields {
    let segments: Vec<Option<&str>> = arn
        .split(':')
        .map(|segment| (!segment.is_empty()).then_some(segment))
        .collect();
    let segment = |index: usize| segments.get(index).copied().flatten();

    let qualifier = segment(7).and_then(|value| match segment(5) {
        Some("function") => Some(Qualifier::Function(value.to_string())),
        Some("event-source-mapping") | Some("event-source-mappings") => {
            Some(Qualifier::EventSourceMapping(value.to_string()))
        }
        _ => None,
    });

    ArnFields {
        region: segment(3).map(str::to_string),
        account_id: segment(4).map(str::to_string),
        qualifier,
    }
}
