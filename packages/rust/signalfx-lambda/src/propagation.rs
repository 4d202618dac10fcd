//! B3 trace context propagation.
//!
//! Incoming invocations may carry a B3 context in their headers, either with
//! plain lower-case header names (`x-b3-traceid`) or in the upper-cased Rack
//! environment form (`HTTP_X_B3_TRACEID`). [`decode`] reads either variant from
//! any [`B3Carrier`] and [`B3Propagator`] plugs the same codec into the
//! OpenTelemetry propagation API.
//!
//! # Example
//!
//! ```
//! use signalfx_lambda::{decode, B3Variant};
//! use std::collections::HashMap;
//!
//! let carrier = HashMap::from([
//!     ("x-b3-traceid".to_string(), "0000000000000001".to_string()),
//!     ("x-b3-spanid".to_string(), "0000000000000002".to_string()),
//!     ("x-b3-sampled".to_string(), "1".to_string()),
//! ]);
//!
//! let context = decode(&carrier, B3Variant::TextMap).unwrap();
//! assert_eq!(context.trace_id, 1);
//! assert_eq!(context.span_id, 2);
//! assert!(context.sampled);
//! ```

use opentelemetry::{
    propagation::{text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator},
    trace::{
        SpanContext as OtelSpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    },
    Context,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Header naming convention of a B3 carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum B3Variant {
    /// Lower-case HTTP header names, `x-b3-*`.
    TextMap,
    /// Rack/CGI environment names, `HTTP_X_B3_*`.
    Rack,
}

struct B3Keys {
    trace_id: &'static str,
    span_id: &'static str,
    parent_span_id: &'static str,
    flags: &'static str,
    sampled: &'static str,
}

const TEXT_MAP_KEYS: B3Keys = B3Keys {
    trace_id: "x-b3-traceid",
    span_id: "x-b3-spanid",
    parent_span_id: "x-b3-parentspanid",
    flags: "x-b3-flags",
    sampled: "x-b3-sampled",
};

const RACK_KEYS: B3Keys = B3Keys {
    trace_id: "HTTP_X_B3_TRACEID",
    span_id: "HTTP_X_B3_SPANID",
    parent_span_id: "HTTP_X_B3_PARENTSPANID",
    flags: "HTTP_X_B3_FLAGS",
    sampled: "HTTP_X_B3_SAMPLED",
};

impl B3Variant {
    fn keys(self) -> &'static B3Keys {
        match self {
            B3Variant::TextMap => &TEXT_MAP_KEYS,
            B3Variant::Rack => &RACK_KEYS,
        }
    }

    fn field_names(self) -> &'static [String] {
        static TEXT_MAP_FIELDS: OnceLock<Vec<String>> = OnceLock::new();
        static RACK_FIELDS: OnceLock<Vec<String>> = OnceLock::new();

        let cell = match self {
            B3Variant::TextMap => &TEXT_MAP_FIELDS,
            B3Variant::Rack => &RACK_FIELDS,
        };
        cell.get_or_init(|| {
            let keys = self.keys();
            [
                keys.trace_id,
                keys.span_id,
                keys.parent_span_id,
                keys.flags,
                keys.sampled,
            ]
            .iter()
            .map(|key| key.to_string())
            .collect()
        })
    }
}

/// Span context decoded from a B3 carrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: u64,
    pub span_id: u64,
    /// Zero when the carrier has no parent span id.
    pub parent_id: u64,
    pub sampled: bool,
    /// Set by `flags: 1`; a debug context is always sampled.
    pub debug: bool,
}

impl SpanContext {
    /// Convert into a remote OpenTelemetry span context usable as a parent.
    pub fn to_otel(&self) -> OtelSpanContext {
        let flags = if self.sampled || self.debug {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };

        OtelSpanContext::new(
            TraceId::from_bytes(u128::from(self.trace_id).to_be_bytes()),
            SpanId::from_bytes(self.span_id.to_be_bytes()),
            flags,
            true,
            TraceState::default(),
        )
    }

    /// Wrap as the remote parent of a fresh [`Context`].
    pub fn to_parent_context(&self) -> Context {
        Context::new().with_remote_span_context(self.to_otel())
    }
}

/// Parse a hex id. 128-bit ids keep their low 64 bits.
fn parse_id(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || value.len() > 32 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(value, 16).ok().map(|id| id as u64)
}

fn parse_sampled(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || parse_id(value).is_some_and(|flags| flags & 1 == 1)
}

/// Header lookup used by [`decode`].
///
/// Maps match header names case-insensitively, so a Rack carrier keeps its
/// upper-case `HTTP_X_B3_*` keys. Any OpenTelemetry [`Extractor`] is a
/// carrier too and follows its own key rules.
pub trait B3Carrier {
    fn lookup(&self, key: &str) -> Option<&str>;
}

impl B3Carrier for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.get(key)
            .or_else(|| {
                self.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

impl B3Carrier for dyn Extractor + '_ {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.get(key)
    }
}

/// Decode a B3 span context from `carrier` using the key set of `variant`.
///
/// Returns `None` when the trace id or span id is missing, unparsable or zero.
pub fn decode<C: B3Carrier + ?Sized>(carrier: &C, variant: B3Variant) -> Option<SpanContext> {
    let keys = variant.keys();

    let trace_id = carrier.lookup(keys.trace_id).and_then(parse_id)?;
    let span_id = carrier.lookup(keys.span_id).and_then(parse_id)?;
    if trace_id == 0 || span_id == 0 {
        return None;
    }

    let parent_id = carrier
        .lookup(keys.parent_span_id)
        .and_then(parse_id)
        .unwrap_or(0);

    let debug = carrier.lookup(keys.flags).map(str::trim) == Some("1");
    let sampled = debug || carrier.lookup(keys.sampled).is_some_and(parse_sampled);

    Some(SpanContext {
        trace_id,
        span_id,
        parent_id,
        sampled,
        debug,
    })
}

/// Build a carrier from the headers of an HTTP-style event.
///
/// Reads the `headers` object and, for ALB targets with multi-value headers
/// enabled, the first value of each `multiValueHeaders` entry. Single-value
/// headers win when both are present. Header names are lower-cased and
/// non-string values are skipped. Returns `None` when the event has neither
/// object.
pub fn carrier_from_event(event: &Value) -> Option<HashMap<String, String>> {
    let headers = event.get("headers").and_then(Value::as_object);
    let multi_value_headers = event.get("multiValueHeaders").and_then(Value::as_object);
    if headers.is_none() && multi_value_headers.is_none() {
        return None;
    }

    let mut carrier = HashMap::new();
    for (name, values) in multi_value_headers.into_iter().flatten() {
        let first = values
            .as_array()
            .and_then(|values| values.first())
            .and_then(Value::as_str);
        if let Some(value) = first {
            carrier.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }
    for (name, value) in headers.into_iter().flatten() {
        if let Some(value) = value.as_str() {
            carrier.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }
    Some(carrier)
}

/// Decode a B3 context carried by an event, trying the text-map names first.
pub fn decode_event(event: &Value) -> Option<SpanContext> {
    let carrier = carrier_from_event(event)?;
    decode(&carrier, B3Variant::TextMap).or_else(|| decode(&carrier, B3Variant::Rack))
}

/// [`TextMapPropagator`] speaking multi-header B3.
#[derive(Debug, Clone, Copy)]
pub struct B3Propagator {
    variant: B3Variant,
}

impl B3Propagator {
    pub fn new(variant: B3Variant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> B3Variant {
        self.variant
    }
}

impl Default for B3Propagator {
    fn default() -> Self {
        Self::new(B3Variant::TextMap)
    }
}

impl TextMapPropagator for B3Propagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return;
        }

        let keys = self.variant.keys();
        injector.set(keys.trace_id, span_context.trace_id().to_string());
        injector.set(keys.span_id, span_context.span_id().to_string());
        let sampled = if span_context.is_sampled() { "1" } else { "0" };
        injector.set(keys.sampled, sampled.to_string());
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        match decode(extractor, self.variant) {
            Some(decoded) => cx.with_remote_span_context(decoded.to_otel()),
            None => cx.clone(),
        }
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(self.variant.field_names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn carrier(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_decode_text_map() {
        let carrier = carrier(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("x-b3-sampled", "1"),
        ]);

        let decoded = decode(&carrier, B3Variant::TextMap).unwrap();
        assert_eq!(
            decoded,
            SpanContext {
                trace_id: 1,
                span_id: 2,
                parent_id: 0,
                sampled: true,
                debug: false,
            }
        );
    }

    #[test]
    fn test_decode_missing_trace_id() {
        let carrier = carrier(&[("x-b3-spanid", "0000000000000002"), ("x-b3-sampled", "1")]);
        assert!(decode(&carrier, B3Variant::TextMap).is_none());
    }

    #[test]
    fn test_decode_rejects_zero_and_garbage_ids() {
        let zero = carrier(&[("x-b3-traceid", "0"), ("x-b3-spanid", "2")]);
        assert!(decode(&zero, B3Variant::TextMap).is_none());

        let garbage = carrier(&[("x-b3-traceid", "xyz"), ("x-b3-spanid", "2")]);
        assert!(decode(&garbage, B3Variant::TextMap).is_none());

        let signed = carrier(&[("x-b3-traceid", "+1"), ("x-b3-spanid", "2")]);
        assert!(decode(&signed, B3Variant::TextMap).is_none());
    }

    #[test]
    fn test_decode_flags_and_sampled() {
        let debug = carrier(&[
            ("x-b3-traceid", "a"),
            ("x-b3-spanid", "b"),
            ("x-b3-parentspanid", "c"),
            ("x-b3-flags", "1"),
        ]);
        let decoded = decode(&debug, B3Variant::TextMap).unwrap();
        assert!(decoded.debug);
        assert!(decoded.sampled);
        assert_eq!(decoded.parent_id, 0xc);

        let boolean = carrier(&[
            ("x-b3-traceid", "a"),
            ("x-b3-spanid", "b"),
            ("x-b3-sampled", "true"),
        ]);
        assert!(decode(&boolean, B3Variant::TextMap).unwrap().sampled);

        let unsampled = carrier(&[("x-b3-traceid", "a"), ("x-b3-spanid", "b")]);
        let decoded = decode(&unsampled, B3Variant::TextMap).unwrap();
        assert!(!decoded.sampled);
        assert!(!decoded.debug);

        let zero = carrier(&[
            ("x-b3-traceid", "a"),
            ("x-b3-spanid", "b"),
            ("x-b3-sampled", "0"),
        ]);
        assert!(!decode(&zero, B3Variant::TextMap).unwrap().sampled);
    }

    #[test]
    fn test_decode_128_bit_trace_id_keeps_low_bits() {
        let carrier = carrier(&[
            ("x-b3-traceid", "463ac35c9f6413ad48485a3953bb6124"),
            ("x-b3-spanid", "a2fb4a1d1a96d312"),
        ]);
        let decoded = decode(&carrier, B3Variant::TextMap).unwrap();
        assert_eq!(decoded.trace_id, 0x48485a3953bb6124);
        assert_eq!(decoded.span_id, 0xa2fb4a1d1a96d312);
    }

    #[test]
    fn test_decode_event_headers() {
        let event = json!({
            "headers": {
                "X-B3-TraceId": "00000000000000ff",
                "X-B3-SpanId": "0000000000000010",
                "X-B3-Sampled": "1",
                "Content-Length": 12
            }
        });
        let decoded = decode_event(&event).unwrap();
        assert_eq!(decoded.trace_id, 0xff);
        assert_eq!(decoded.span_id, 0x10);

        let rack = json!({
            "headers": {
                "HTTP_X_B3_TRACEID": "0000000000000003",
                "HTTP_X_B3_SPANID": "0000000000000004"
            }
        });
        let decoded = decode_event(&rack).unwrap();
        assert_eq!(decoded.trace_id, 3);
        assert_eq!(decoded.span_id, 4);

        assert!(decode_event(&json!({"body": "{}"})).is_none());
        assert!(decode_event(&json!({"headers": null})).is_none());
    }

    #[test]
    fn test_decode_rack_carrier() {
        let carrier = carrier(&[
            ("HTTP_X_B3_TRACEID", "0000000000000001"),
            ("HTTP_X_B3_SPANID", "0000000000000002"),
            ("HTTP_X_B3_PARENTSPANID", "0000000000000005"),
            ("HTTP_X_B3_SAMPLED", "1"),
        ]);

        let decoded = decode(&carrier, B3Variant::Rack).unwrap();
        assert_eq!(
            decoded,
            SpanContext {
                trace_id: 1,
                span_id: 2,
                parent_id: 5,
                sampled: true,
                debug: false,
            }
        );
        assert!(decode(&carrier, B3Variant::TextMap).is_none());
    }

    #[test]
    fn test_decode_multi_value_headers() {
        let event = json!({
            "multiValueHeaders": {
                "X-B3-TraceId": ["0000000000000007", "0000000000000009"],
                "X-B3-SpanId": ["0000000000000008"],
                "X-B3-Sampled": ["1"],
                "Accept": []
            }
        });
        let decoded = decode_event(&event).unwrap();
        assert_eq!(decoded.trace_id, 7);
        assert_eq!(decoded.span_id, 8);
        assert!(decoded.sampled);

        let both = json!({
            "headers": {"x-b3-traceid": "000000000000000a"},
            "multiValueHeaders": {
                "x-b3-traceid": ["000000000000000b"],
                "x-b3-spanid": ["000000000000000c"]
            }
        });
        let decoded = decode_event(&both).unwrap();
        assert_eq!(decoded.trace_id, 0xa);
        assert_eq!(decoded.span_id, 0xc);
    }

    #[test]
    fn test_propagator_extract_and_inject() {
        let carrier = carrier(&[
            ("x-b3-traceid", "0000000000000001"),
            ("x-b3-spanid", "0000000000000002"),
            ("x-b3-sampled", "1"),
        ]);
        let propagator = B3Propagator::default();
        let context = propagator.extract(&carrier);

        let span = context.span();
        let span_context = span.span_context();
        assert!(span_context.is_valid());
        assert!(span_context.is_remote());
        assert!(span_context.is_sampled());
        assert_eq!(
            span_context.trace_id(),
            TraceId::from_hex("00000000000000000000000000000001").unwrap()
        );

        // HashMap's injector lower-cases header names.
        let mut injected = HashMap::<String, String>::new();
        B3Propagator::new(B3Variant::Rack).inject_context(&context, &mut injected);
        assert_eq!(
            injected.get("http_x_b3_traceid").map(String::as_str),
            Some("00000000000000000000000000000001")
        );
        assert_eq!(
            injected.get("http_x_b3_spanid").map(String::as_str),
            Some("0000000000000002")
        );
        assert_eq!(injected.get("http_x_b3_sampled").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_propagator_without_context() {
        let propagator = B3Propagator::new(B3Variant::Rack);
        let context = propagator.extract(&HashMap::<String, String>::new());
        assert!(!context.span().span_context().is_valid());

        let mut injected = HashMap::<String, String>::new();
        propagator.inject_context(&Context::new(), &mut injected);
        assert!(injected.is_empty());

        assert_eq!(propagator.fields().count(), 5);
    }
}
