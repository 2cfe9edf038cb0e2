//! Parameter validation
//!
//! Turns a raw parameter mapping into a typed [`UnitSpec`]. Every field is
//! checked before anything is rendered or written; the first bad field aborts
//! the whole unit.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde_json::{Map, Value};

use super::{Ensure, Sec, ServiceType, UnitSpec};

/// Raw, untyped parameters for one unit
pub type Params = Map<String, Value>;

/// The shape a parameter was expected to have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    UnitName,
    Hash,
    KnownParameter,
    SingleSpelling,
    AbsolutePath,
    OptionalAbsolutePath,
    OptionalString,
    NonEmptyString,
    SingleLine,
    OptionalArray,
    Sec,
    NonNegativeSec,
    Ensure,
    ServiceType,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Shape::UnitName => "a non-empty unit name without '/'",
            Shape::Hash => "a Hash",
            Shape::KnownParameter => "a known unit parameter",
            Shape::SingleSpelling => "either its name or its legacy name, not both",
            Shape::AbsolutePath => "a Stdlib::Absolutepath",
            Shape::OptionalAbsolutePath => "a value of type Undef or Stdlib::Absolutepath",
            Shape::OptionalString => "a value of type Undef or String",
            Shape::NonEmptyString => "a String[1] value",
            Shape::SingleLine => "a single-line String",
            Shape::OptionalArray => "a value of type Undef or Array",
            Shape::Sec => "a Systemd::Sec",
            Shape::NonNegativeSec => "a Systemd::Sec (non-negative duration)",
            Shape::Ensure => "a match for Enum['absent', 'present']",
            Shape::ServiceType => "a Systemd::Service_type",
        };
        f.write_str(text)
    }
}

/// A parameter failed its type/shape rule
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unit '{unit}': parameter '{field}' expects {expected}, got {received}")]
pub struct ValidationError {
    pub unit: String,
    /// Parameter name as supplied by the caller
    pub field: String,
    /// JSON text of the offending value
    pub received: String,
    pub expected: Shape,
}

/// Canonical parameter names and the legacy spelling each one also accepts
const FIELDS: &[(&str, Option<&str>)] = &[
    ("ensure", None),
    ("path", Some("systemd_path")),
    ("description", Some("unit_description")),
    ("after", Some("unit_after")),
    ("before", Some("unit_before")),
    ("requires", Some("unit_requires")),
    ("type", Some("service_type")),
    ("timeoutStartSec", Some("service_timeoutstartsec")),
    ("restart", Some("service_restart")),
    ("restartSec", Some("service_restartsec")),
    ("workingDirectory", Some("workingdirectory")),
    ("environment", None),
    ("user", None),
    ("group", None),
    ("execStartPre", Some("service_execstartpre")),
    ("execStart", Some("service_execstart")),
    ("execStop", Some("service_execstop")),
    ("wantedBy", Some("install_wantedby")),
];

fn canonical(key: &str) -> Option<&'static str> {
    FIELDS
        .iter()
        .find(|(name, legacy)| *name == key || *legacy == Some(key))
        .map(|(name, _)| *name)
}

/// Parameters resolved to their canonical names
struct Resolved<'a> {
    unit: &'a str,
    values: BTreeMap<&'static str, (&'a str, &'a Value)>,
}

impl<'a> Resolved<'a> {
    fn new(unit: &'a str, params: &'a Params) -> Result<Self, ValidationError> {
        let mut values = BTreeMap::new();

        for (key, value) in params {
            let Some(name) = canonical(key) else {
                return Err(error(unit, key, value, Shape::KnownParameter));
            };
            if let Some((first, _)) = values.insert(name, (key.as_str(), value)) {
                let both = Value::from(vec![first, key.as_str()]);
                return Err(error(unit, name, &both, Shape::SingleSpelling));
            }
        }

        Ok(Self { unit, values })
    }

    /// Run a field predicate; `None` if the caller did not supply the field
    fn field<T>(
        &self,
        name: &str,
        check: impl Fn(&Value) -> Result<T, Shape>,
    ) -> Result<Option<T>, ValidationError> {
        let Some(&(key, value)) = self.values.get(name) else {
            return Ok(None);
        };
        check(value)
            .map(Some)
            .map_err(|shape| error(self.unit, key, value, shape))
    }
}

fn error(unit: &str, field: &str, value: &Value, expected: Shape) -> ValidationError {
    ValidationError {
        unit: unit.to_string(),
        field: field.to_string(),
        received: value.to_string(),
        expected,
    }
}

/// Check a unit name; it doubles as file stem and service name
pub fn unit_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.contains('/') || !is_single_line(name) {
        return Err(error(name, "name", &Value::from(name), Shape::UnitName));
    }
    Ok(())
}

fn is_single_line(s: &str) -> bool {
    !s.contains(['\n', '\r'])
}

// Field predicates. Each returns the typed value or the shape it wanted.

fn ensure(value: &Value) -> Result<Ensure, Shape> {
    match value {
        Value::Null => Ok(Ensure::default()),
        Value::String(s) => Ensure::parse(s).ok_or(Shape::Ensure),
        _ => Err(Shape::Ensure),
    }
}

fn service_type(value: &Value) -> Result<ServiceType, Shape> {
    match value {
        Value::Null => Ok(ServiceType::default()),
        Value::String(s) => ServiceType::parse(s).ok_or(Shape::ServiceType),
        _ => Err(Shape::ServiceType),
    }
}

fn absolute_path(value: &Value) -> Result<PathBuf, Shape> {
    match value {
        Value::String(s) if s.starts_with('/') && is_single_line(s) => Ok(PathBuf::from(s)),
        _ => Err(Shape::AbsolutePath),
    }
}

fn optional_absolute_path(value: &Value) -> Result<Option<PathBuf>, Shape> {
    match value {
        Value::Null => Ok(None),
        Value::String(_) => absolute_path(value)
            .map(Some)
            .map_err(|_| Shape::OptionalAbsolutePath),
        _ => Err(Shape::OptionalAbsolutePath),
    }
}

fn optional_string(value: &Value) -> Result<Option<String>, Shape> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => single_line(s).map(Some),
        _ => Err(Shape::OptionalString),
    }
}

fn single_line(s: &str) -> Result<String, Shape> {
    if s.is_empty() {
        Err(Shape::NonEmptyString)
    } else if !is_single_line(s) {
        Err(Shape::SingleLine)
    } else {
        Ok(s.to_string())
    }
}

fn optional_array(value: &Value) -> Result<Vec<String>, Shape> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => single_line(s),
                _ => Err(Shape::OptionalArray),
            })
            .collect(),
        _ => Err(Shape::OptionalArray),
    }
}

fn optional_sec(value: &Value) -> Result<Option<Sec>, Shape> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(secs) = n.as_u64() {
                Ok(Some(Sec::from_secs(secs)))
            } else if n.as_i64().is_some() {
                Err(Shape::NonNegativeSec)
            } else {
                Err(Shape::Sec)
            }
        }
        Value::String(s) if s.trim_start().starts_with('-') => Err(Shape::NonNegativeSec),
        Value::String(s) => Sec::parse(s).map(Some).ok_or(Shape::Sec),
        _ => Err(Shape::Sec),
    }
}

impl UnitSpec {
    /// Validate raw parameters into a spec. Nothing is defaulted silently:
    /// a field that is present but malformed is an error.
    pub fn from_params(name: &str, params: &Params) -> Result<Self, ValidationError> {
        unit_name(name)?;
        let p = Resolved::new(name, params)?;
        let mut spec = UnitSpec::new(name.to_string());

        if let Some(ensure) = p.field("ensure", ensure)? {
            spec.ensure = ensure;
        }
        if let Some(path) = p.field("path", absolute_path)? {
            spec.path = path;
        }

        // [Unit]
        spec.unit.description = p.field("description", optional_string)?.flatten();
        spec.unit.after = p.field("after", optional_string)?.flatten();
        spec.unit.before = p.field("before", optional_string)?.flatten();
        spec.unit.requires = p.field("requires", optional_string)?.flatten();

        // [Service]
        let svc = &mut spec.service;
        if let Some(ty) = p.field("type", service_type)? {
            svc.service_type = ty;
        }
        svc.timeout_start_sec = p.field("timeoutStartSec", optional_sec)?.flatten();
        svc.restart = p.field("restart", optional_string)?.flatten();
        svc.restart_sec = p.field("restartSec", optional_sec)?.flatten();
        svc.working_directory = p
            .field("workingDirectory", optional_absolute_path)?
            .flatten();
        svc.environment = p.field("environment", optional_string)?.flatten();
        svc.user = p.field("user", optional_string)?.flatten();
        svc.group = p.field("group", optional_string)?.flatten();
        svc.exec_start_pre = p.field("execStartPre", optional_array)?.unwrap_or_default();
        svc.exec_start = p.field("execStart", optional_string)?.flatten();
        svc.exec_stop = p.field("execStop", optional_string)?.flatten();

        // [Install]
        spec.install.wanted_by = p.field("wantedBy", optional_string)?.flatten();

        log::debug!("Validated unit {}", name);
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("test params must be an object, got {other}"),
        }
    }

    fn single(field: &str, value: Value) -> Value {
        let mut map = Params::new();
        map.insert(field.to_string(), value);
        Value::Object(map)
    }

    fn validate(value: Value) -> Result<UnitSpec, ValidationError> {
        UnitSpec::from_params("unittest", &params(value))
    }

    fn rejects(field: &str, value: Value, expected: Shape) {
        let err = validate(single(field, value.clone())).unwrap_err();
        assert_eq!(err.field, field, "field for {value}");
        assert_eq!(err.expected, expected, "shape for {field}={value}");
        assert_eq!(err.received, value.to_string());
    }

    #[test]
    fn test_empty_params_use_defaults() {
        let spec = validate(json!({})).unwrap();
        assert_eq!(spec, UnitSpec::new("unittest".to_string()));
    }

    #[test]
    fn test_null_ensure_and_type_use_defaults() {
        let spec = validate(json!({ "ensure": null, "type": null })).unwrap();
        assert_eq!(spec.ensure, Ensure::Present);
        assert_eq!(spec.service.service_type, ServiceType::Simple);

        let spec = validate(json!({ "ensure": null, "service_type": null })).unwrap();
        assert_eq!(spec, UnitSpec::new("unittest".to_string()));
    }

    #[test]
    fn test_all_parameters() {
        let spec = validate(json!({
            "ensure": "present",
            "path": "/tmp/systemd",
            "after": "test",
            "before": "test2",
            "description": "Example unit",
            "requires": "test3",
            "environment": "TEST=test",
            "group": "testgroup",
            "user": "testuser",
            "workingDirectory": "/tmp/workdir",
            "type": "oneshot",
            "timeoutStartSec": "6",
            "restart": "testrestart",
            "restartSec": 6,
            "execStartPre": ["/bin/uname"],
            "execStart": "/bin/echo",
            "execStop": "/bin/true",
            "wantedBy": "multi-user.target",
        }))
        .unwrap();

        assert_eq!(spec.path, PathBuf::from("/tmp/systemd"));
        assert_eq!(spec.unit.description.as_deref(), Some("Example unit"));
        assert_eq!(spec.unit.requires.as_deref(), Some("test3"));
        assert_eq!(spec.service.service_type, ServiceType::Oneshot);
        assert_eq!(spec.service.timeout_start_sec, Sec::parse("6"));
        assert_eq!(spec.service.restart_sec, Some(Sec::from_secs(6)));
        assert_eq!(
            spec.service.working_directory,
            Some(PathBuf::from("/tmp/workdir"))
        );
        assert_eq!(spec.service.exec_start_pre, vec!["/bin/uname"]);
        assert_eq!(spec.install.wanted_by.as_deref(), Some("multi-user.target"));
    }

    #[test]
    fn test_legacy_names() {
        let spec = validate(json!({
            "systemd_path": "/test/ing",
            "unit_description": "testing",
            "service_type": "notify",
            "service_execstartpre": ["test", "ing"],
            "install_wantedby": "default.target",
        }))
        .unwrap();

        assert_eq!(spec.path, PathBuf::from("/test/ing"));
        assert_eq!(spec.unit.description.as_deref(), Some("testing"));
        assert_eq!(spec.service.service_type, ServiceType::Notify);
        assert_eq!(spec.service.exec_start_pre, vec!["test", "ing"]);
        assert_eq!(spec.install.wanted_by.as_deref(), Some("default.target"));
    }

    #[test]
    fn test_both_spellings_rejected() {
        let err = validate(json!({ "path": "/a", "systemd_path": "/b" })).unwrap_err();
        assert_eq!(err.expected, Shape::SingleSpelling);
        assert_eq!(err.field, "path");
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        rejects("ExecStart", json!("/bin/true"), Shape::KnownParameter);
        rejects("memoryMax", json!("1G"), Shape::KnownParameter);
    }

    #[test]
    fn test_path_validation() {
        for valid in ["/absolute/filepath", "/absolute/directory/"] {
            assert!(validate(json!({ "path": valid })).is_ok(), "{valid}");
        }
        for invalid in [
            json!("./relative/path"),
            json!(["array"]),
            json!({ "ha": "sh" }),
            json!(3),
            json!(2.42),
            json!(true),
            json!(null),
        ] {
            rejects("path", invalid, Shape::AbsolutePath);
        }
    }

    #[test]
    fn test_exec_start_pre_validation() {
        assert!(validate(json!({ "execStartPre": ["array"] })).is_ok());
        assert!(validate(json!({ "execStartPre": [] })).is_ok());
        for invalid in [json!("string"), json!({ "ha": "sh" }), json!(3), json!(2.42), json!(true)] {
            rejects("execStartPre", invalid, Shape::OptionalArray);
        }
        rejects("execStartPre", json!(["ok", 3]), Shape::OptionalArray);
    }

    #[test]
    fn test_sec_validation() {
        for field in ["timeoutStartSec", "restartSec"] {
            for valid in [
                json!(242),
                json!("242"),
                json!("1ms"),
                json!("1s"),
                json!("1sec"),
                json!("1m"),
                json!("1min"),
                json!("1h"),
                json!("1hour"),
                json!("1min 10s"),
                json!("1m 10sec"),
            ] {
                assert!(validate(single(field, valid.clone())).is_ok(), "{field}={valid}");
            }
            for invalid in [json!(["array"]), json!({ "ha": "sh" }), json!(true), json!(2.42)] {
                rejects(field, invalid, Shape::Sec);
            }
            rejects(field, json!(-242), Shape::NonNegativeSec);
            rejects(field, json!("-242"), Shape::NonNegativeSec);
        }
    }

    #[test]
    fn test_string_validation() {
        for field in [
            "after",
            "before",
            "description",
            "environment",
            "group",
            "user",
            "restart",
            "execStart",
            "execStop",
            "wantedBy",
        ] {
            assert!(validate(single(field, json!("valid"))).is_ok(), "{field}");
            assert!(validate(single(field, json!(null))).is_ok(), "{field}");
            for invalid in [json!(["array"]), json!({ "ha": "sh" }), json!(3), json!(2.42), json!(true)] {
                rejects(field, invalid, Shape::OptionalString);
            }
            rejects(field, json!(""), Shape::NonEmptyString);
            rejects(field, json!("a\nExecStart=/bin/sh"), Shape::SingleLine);
        }
    }

    #[test]
    fn test_working_directory_must_be_absolute() {
        assert!(validate(json!({ "workingDirectory": "/test/ing" })).is_ok());
        rejects("workingDirectory", json!("relative"), Shape::OptionalAbsolutePath);
        rejects("workingDirectory", json!(3), Shape::OptionalAbsolutePath);
    }

    #[test]
    fn test_ensure_validation() {
        assert_eq!(validate(json!({ "ensure": "absent" })).unwrap().ensure, Ensure::Absent);
        assert_eq!(validate(json!({ "ensure": "present" })).unwrap().ensure, Ensure::Present);
        for invalid in [json!(["array"]), json!({ "ha": "sh" }), json!(3), json!(2.42), json!(true), json!("running")] {
            rejects("ensure", invalid, Shape::Ensure);
        }
    }

    #[test]
    fn test_service_type_validation() {
        for valid in ["simple", "forking", "oneshot", "dbus", "notify", "idle"] {
            let spec = validate(json!({ "type": valid })).unwrap();
            assert_eq!(spec.service.service_type.as_str(), valid);
        }
        for invalid in [json!(["array"]), json!({ "ha": "sh" }), json!(3), json!(2.42), json!(true), json!("exec")] {
            rejects("type", invalid, Shape::ServiceType);
        }
    }

    #[test]
    fn test_error_names_legacy_key_as_supplied() {
        let err = validate(json!({ "service_restartsec": "soon" })).unwrap_err();
        assert_eq!(err.field, "service_restartsec");
        assert_eq!(err.expected, Shape::Sec);
        assert_eq!(
            err.to_string(),
            "unit 'unittest': parameter 'service_restartsec' expects a Systemd::Sec, got \"soon\""
        );
    }

    #[test]
    fn test_unit_name() {
        assert!(unit_name("example_unit").is_ok());
        assert_eq!(unit_name("").unwrap_err().expected, Shape::UnitName);
        assert_eq!(unit_name("../escape").unwrap_err().expected, Shape::UnitName);
        assert!(UnitSpec::from_params("a/b", &Params::new()).is_err());
    }
}
