//! Conversions between the core data model and the gNMI wire types.

use crate::error::TargetError;
use crate::types::{
    Notification, Operation, Path, PathElem, SchemaId, SetRequest, SetResponse, Update,
    UpdateResult, Value,
};

use super::gnmi::{self, typed_value, update_result, Encoding};
use super::schema;

impl From<&Path> for gnmi::Path {
    fn from(path: &Path) -> Self {
        gnmi::Path {
            elem: path
                .elems
                .iter()
                .map(|e| gnmi::PathElem {
                    name: e.name.clone(),
                    key: e.keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                })
                .collect(),
            ..Default::default()
        }
    }
}

impl From<&gnmi::Path> for Path {
    fn from(path: &gnmi::Path) -> Self {
        Path::new(
            path.elem
                .iter()
                .map(|e| PathElem {
                    name: e.name.clone(),
                    keys: e.key.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                })
                .collect(),
        )
    }
}

/// Join a notification prefix and a relative path into one absolute path.
pub fn join_path(prefix: Option<&gnmi::Path>, path: Option<&gnmi::Path>) -> Path {
    let path = path.map(Path::from).unwrap_or_default();
    match prefix {
        Some(prefix) => path.with_prefix(&Path::from(prefix)),
        None => path,
    }
}

impl TryFrom<&Value> for gnmi::TypedValue {
    type Error = TargetError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let v = match value {
            Value::String(s) | Value::Enum(s) => typed_value::Value::StringVal(s.clone()),
            Value::Int(v) => typed_value::Value::IntVal(*v),
            Value::Uint(v) => typed_value::Value::UintVal(*v),
            Value::Bool(v) => typed_value::Value::BoolVal(*v),
            Value::Bytes(v) => typed_value::Value::BytesVal(v.clone()),
            Value::Double(v) => typed_value::Value::DoubleVal(*v),
            Value::Decimal { digits, precision } => {
                typed_value::Value::DecimalVal(gnmi::Decimal64 {
                    digits: *digits,
                    precision: *precision,
                })
            }
            Value::LeafList(values) => typed_value::Value::LeaflistVal(gnmi::ScalarArray {
                element: values
                    .iter()
                    .map(gnmi::TypedValue::try_from)
                    .collect::<Result<_, _>>()?,
            }),
            Value::Json(v) => typed_value::Value::JsonIetfVal(
                serde_json::to_vec(v).map_err(|e| TargetError::Conversion(e.to_string()))?,
            ),
        };
        Ok(gnmi::TypedValue { value: Some(v) })
    }
}

impl TryFrom<&gnmi::TypedValue> for Value {
    type Error = TargetError;

    fn try_from(value: &gnmi::TypedValue) -> Result<Self, Self::Error> {
        let Some(v) = &value.value else {
            return Err(TargetError::Conversion("empty typed value".to_string()));
        };
        Ok(match v {
            typed_value::Value::StringVal(s) | typed_value::Value::AsciiVal(s) => {
                Value::String(s.clone())
            }
            typed_value::Value::IntVal(v) => Value::Int(*v),
            typed_value::Value::UintVal(v) => Value::Uint(*v),
            typed_value::Value::BoolVal(v) => Value::Bool(*v),
            typed_value::Value::BytesVal(v) => Value::Bytes(v.clone()),
            typed_value::Value::FloatVal(v) => Value::Double(f64::from(*v)),
            typed_value::Value::DoubleVal(v) => Value::Double(*v),
            typed_value::Value::DecimalVal(d) => Value::Decimal {
                digits: d.digits,
                precision: d.precision,
            },
            typed_value::Value::LeaflistVal(array) => Value::LeafList(
                array
                    .element
                    .iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            typed_value::Value::JsonVal(bytes) | typed_value::Value::JsonIetfVal(bytes) => {
                Value::Json(
                    serde_json::from_slice(bytes)
                        .map_err(|e| TargetError::Conversion(format!("invalid json value: {e}")))?,
                )
            }
        })
    }
}

impl TryFrom<&Update> for gnmi::Update {
    type Error = TargetError;

    fn try_from(update: &Update) -> Result<Self, Self::Error> {
        Ok(gnmi::Update {
            path: Some(gnmi::Path::from(&update.path)),
            val: Some(gnmi::TypedValue::try_from(&update.value)?),
            duplicates: 0,
        })
    }
}

/// An update left out of a converted notification.
#[derive(Debug)]
pub struct SkippedUpdate {
    pub path: Path,
    pub error: TargetError,
}

/// Convert a wire notification, resolving every path against its prefix.
///
/// An update whose value cannot be converted is left out and returned in the
/// skipped list; the other updates and all deletes are kept.
pub fn notification_from_gnmi(n: &gnmi::Notification) -> (Notification, Vec<SkippedUpdate>) {
    let prefix = n.prefix.as_ref();
    let mut updates = Vec::with_capacity(n.update.len());
    let mut skipped = Vec::new();
    for upd in &n.update {
        let path = join_path(prefix, upd.path.as_ref());
        let value = match &upd.val {
            Some(val) => Value::try_from(val),
            None => Err(TargetError::Conversion("update has no value".to_string())),
        };
        match value {
            Ok(value) => updates.push(Update::new(path, value)),
            Err(error) => skipped.push(SkippedUpdate { path, error }),
        }
    }
    let notification = Notification {
        timestamp: n.timestamp,
        updates,
        deletes: n
            .delete
            .iter()
            .map(|d| join_path(prefix, Some(d)))
            .collect(),
    };
    (notification, skipped)
}

/// Parse an encoding name (`json_ietf`, `JSON-IETF`, ...) or its numeric value.
pub fn parse_encoding(s: &str) -> Option<Encoding> {
    let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
    Encoding::from_str_name(&normalized).or_else(|| {
        normalized
            .parse::<i32>()
            .ok()
            .and_then(|v| Encoding::try_from(v).ok())
    })
}

impl TryFrom<&SetRequest> for gnmi::SetRequest {
    type Error = TargetError;

    fn try_from(req: &SetRequest) -> Result<Self, Self::Error> {
        Ok(gnmi::SetRequest {
            prefix: None,
            delete: req.deletes.iter().map(gnmi::Path::from).collect(),
            replace: req
                .replaces
                .iter()
                .map(gnmi::Update::try_from)
                .collect::<Result<_, _>>()?,
            update: req
                .updates
                .iter()
                .map(gnmi::Update::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl From<update_result::Operation> for Operation {
    fn from(op: update_result::Operation) -> Self {
        match op {
            update_result::Operation::Invalid => Operation::Invalid,
            update_result::Operation::Delete => Operation::Delete,
            update_result::Operation::Replace => Operation::Replace,
            update_result::Operation::Update => Operation::Update,
            update_result::Operation::UnionReplace => Operation::UnionReplace,
        }
    }
}

impl From<&gnmi::SetResponse> for SetResponse {
    fn from(rsp: &gnmi::SetResponse) -> Self {
        SetResponse {
            timestamp: rsp.timestamp,
            results: rsp
                .response
                .iter()
                .map(|r| UpdateResult {
                    path: join_path(rsp.prefix.as_ref(), r.path.as_ref()),
                    op: update_result::Operation::try_from(r.op)
                        .unwrap_or(update_result::Operation::Invalid)
                        .into(),
                })
                .collect(),
        }
    }
}

impl From<&SchemaId> for schema::Schema {
    fn from(id: &SchemaId) -> Self {
        schema::Schema {
            name: id.name.clone(),
            vendor: id.vendor.clone(),
            version: id.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn path_keeps_keys() {
        let path = p("/interface[name=ethernet-1/1]/mtu");
        let wire = gnmi::Path::from(&path);
        assert_eq!(wire.elem.len(), 2);
        assert_eq!(wire.elem[0].key["name"], "ethernet-1/1");
        assert_eq!(Path::from(&wire), path);
    }

    #[test]
    fn join_path_prepends_prefix() {
        let prefix = gnmi::Path::from(&p("/system"));
        let rel = gnmi::Path::from(&p("/name/host-name"));
        assert_eq!(
            join_path(Some(&prefix), Some(&rel)),
            p("/system/name/host-name")
        );
        assert_eq!(join_path(None, Some(&rel)), p("/name/host-name"));
        assert_eq!(join_path(Some(&prefix), None), p("/system"));
    }

    #[test]
    fn scalar_values_convert_both_ways() {
        let values = vec![
            Value::String("up".into()),
            Value::Int(-3),
            Value::Uint(9000),
            Value::Bool(true),
            Value::Bytes(vec![1, 2]),
            Value::Double(0.5),
            Value::Decimal {
                digits: 1234,
                precision: 2,
            },
            Value::LeafList(vec![Value::Uint(1), Value::Uint(2)]),
            Value::Json(serde_json::json!({"mtu": 1500})),
        ];
        for v in values {
            let wire = gnmi::TypedValue::try_from(&v).unwrap();
            assert_eq!(Value::try_from(&wire).unwrap(), v);
        }
    }

    #[test]
    fn enum_values_go_out_as_strings() {
        let wire = gnmi::TypedValue::try_from(&Value::Enum("ENABLE".into())).unwrap();
        assert_eq!(
            wire.value,
            Some(typed_value::Value::StringVal("ENABLE".into()))
        );
    }

    #[test]
    fn empty_or_bad_values_are_rejected() {
        assert!(Value::try_from(&gnmi::TypedValue { value: None }).is_err());
        let bad_json = gnmi::TypedValue {
            value: Some(typed_value::Value::JsonIetfVal(b"{not json".to_vec())),
        };
        assert!(matches!(
            Value::try_from(&bad_json),
            Err(TargetError::Conversion(_))
        ));
    }

    #[test]
    fn notification_resolves_prefix() {
        let n = gnmi::Notification {
            timestamp: 42,
            prefix: Some(gnmi::Path::from(&p("/interface[name=e1]"))),
            update: vec![gnmi::Update {
                path: Some(gnmi::Path::from(&p("/oper-state"))),
                val: Some(gnmi::TypedValue {
                    value: Some(typed_value::Value::StringVal("up".into())),
                }),
                duplicates: 0,
            }],
            delete: vec![gnmi::Path::from(&p("/description"))],
            atomic: false,
        };
        let (converted, skipped) = notification_from_gnmi(&n);
        assert!(skipped.is_empty());
        assert_eq!(converted.timestamp, 42);
        assert_eq!(converted.updates[0].path, p("/interface[name=e1]/oper-state"));
        assert_eq!(converted.updates[0].value, Value::String("up".into()));
        assert_eq!(converted.deletes, vec![p("/interface[name=e1]/description")]);
    }

    #[test]
    fn bad_update_is_skipped_alone() {
        let n = gnmi::Notification {
            timestamp: 3,
            prefix: None,
            update: vec![
                gnmi::Update {
                    path: Some(gnmi::Path::from(&p("/good"))),
                    val: Some(gnmi::TypedValue {
                        value: Some(typed_value::Value::IntVal(1)),
                    }),
                    duplicates: 0,
                },
                gnmi::Update {
                    path: Some(gnmi::Path::from(&p("/bad"))),
                    val: Some(gnmi::TypedValue {
                        value: Some(typed_value::Value::JsonIetfVal(b"{oops".to_vec())),
                    }),
                    duplicates: 0,
                },
                gnmi::Update {
                    path: Some(gnmi::Path::from(&p("/unknown"))),
                    val: Some(gnmi::TypedValue { value: None }),
                    duplicates: 0,
                },
            ],
            delete: vec![gnmi::Path::from(&p("/gone"))],
            atomic: false,
        };
        let (converted, skipped) = notification_from_gnmi(&n);
        assert_eq!(converted.updates, vec![Update::new(p("/good"), Value::Int(1))]);
        assert_eq!(converted.deletes, vec![p("/gone")]);
        let skipped_paths: Vec<Path> = skipped.into_iter().map(|s| s.path).collect();
        assert_eq!(skipped_paths, vec![p("/bad"), p("/unknown")]);
    }

    #[test]
    fn parse_encoding_names() {
        assert_eq!(parse_encoding("json_ietf"), Some(Encoding::JsonIetf));
        assert_eq!(parse_encoding("JSON-IETF"), Some(Encoding::JsonIetf));
        assert_eq!(parse_encoding("ascii"), Some(Encoding::Ascii));
        assert_eq!(parse_encoding("2"), Some(Encoding::Proto));
        assert_eq!(parse_encoding("bogus"), None);
        assert_eq!(parse_encoding("42"), None);
    }

    #[test]
    fn set_request_keeps_list_order() {
        let req = SetRequest {
            deletes: vec![p("/a"), p("/b")],
            replaces: vec![Update::new(p("/c"), Value::Int(1))],
            updates: vec![
                Update::new(p("/d"), Value::Int(2)),
                Update::new(p("/e"), Value::Int(3)),
            ],
        };
        let wire = gnmi::SetRequest::try_from(&req).unwrap();
        assert_eq!(wire.delete.len(), 2);
        assert_eq!(Path::from(&wire.delete[1]), p("/b"));
        assert_eq!(wire.replace.len(), 1);
        assert_eq!(
            Path::from(wire.update[1].path.as_ref().unwrap()),
            p("/e")
        );
    }

    #[test]
    fn set_response_maps_operations() {
        let rsp = gnmi::SetResponse {
            prefix: None,
            response: vec![
                gnmi::UpdateResult {
                    path: Some(gnmi::Path::from(&p("/a"))),
                    op: update_result::Operation::Delete as i32,
                },
                gnmi::UpdateResult {
                    path: Some(gnmi::Path::from(&p("/b"))),
                    op: 99,
                },
            ],
            timestamp: 7,
        };
        let converted = SetResponse::from(&rsp);
        assert_eq!(converted.timestamp, 7);
        assert_eq!(converted.results[0].op, Operation::Delete);
        assert_eq!(converted.results[1].op, Operation::Invalid);
    }
}
