//! LEVEE - Host Options Parsing
//! Builds the native option structs from host-supplied configuration
//! objects. Keys are snake_case; unknown keys are ignored, a known key with
//! the wrong type is an invalid argument, and `undefined`/`null` (for the
//! whole object or a single key) means "use the default".

use crate::config::{Options, ReadOptions, WriteOptions};
use crate::error::{Error, Result};

use super::{HostObject, HostValue};

fn properties(value: &HostValue) -> Result<Option<&HostObject>> {
    match value {
        HostValue::Undefined | HostValue::Null => Ok(None),
        HostValue::Object(object) => Ok(Some(object)),
        other => Err(Error::invalid(format!(
            "options must be an object, got {}",
            other.type_name()
        ))),
    }
}

fn flag(object: &HostObject, name: &str) -> Result<Option<bool>> {
    match object.get(name) {
        HostValue::Undefined | HostValue::Null => Ok(None),
        HostValue::Bool(b) => Ok(Some(*b)),
        other => Err(Error::invalid(format!(
            "{} must be a boolean, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn size(object: &HostObject, name: &str) -> Result<Option<usize>> {
    match object.get(name) {
        HostValue::Undefined | HostValue::Null => Ok(None),
        HostValue::Number(n) if n.is_finite() && *n >= 0.0 && n.fract() == 0.0 => Ok(Some(*n as usize)),
        other => Err(Error::invalid(format!(
            "{} must be a non-negative integer, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn text(object: &HostObject, name: &str) -> Result<Option<String>> {
    match object.get(name) {
        HostValue::Undefined | HostValue::Null => Ok(None),
        HostValue::Str(s) => Ok(Some(s.clone())),
        other => Err(Error::invalid(format!(
            "{} must be a string, got {}",
            name,
            other.type_name()
        ))),
    }
}

impl Options {
    pub fn from_host(value: &HostValue) -> Result<Self> {
        let mut options = Options::default();
        let Some(object) = properties(value)? else {
            return Ok(options);
        };
        if let Some(v) = flag(object, "create_if_missing")? {
            options.create_if_missing = v;
        }
        if let Some(v) = flag(object, "error_if_exists")? {
            options.error_if_exists = v;
        }
        if let Some(v) = flag(object, "paranoid_checks")? {
            options.paranoid_checks = v;
        }
        if let Some(v) = size(object, "write_buffer_size")? {
            options.write_buffer_size = v;
        }
        if let Some(v) = text(object, "comparator")? {
            options.comparator = v;
        }
        Ok(options)
    }
}

impl ReadOptions {
    pub fn from_host(value: &HostValue) -> Result<Self> {
        let mut options = ReadOptions::default();
        let Some(object) = properties(value)? else {
            return Ok(options);
        };
        if let Some(v) = flag(object, "verify_checksums")? {
            options.verify_checksums = v;
        }
        if let Some(v) = flag(object, "fill_cache")? {
            options.fill_cache = v;
        }
        if let Some(v) = flag(object, "as_buffer")? {
            options.as_buffer = v;
        }
        options.snapshot = match object.get("snapshot") {
            HostValue::Undefined | HostValue::Null => None,
            HostValue::Snapshot(snapshot) => Some(snapshot.clone()),
            other => {
                return Err(Error::invalid(format!(
                    "snapshot must be a snapshot object, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(options)
    }
}

impl WriteOptions {
    pub fn from_host(value: &HostValue) -> Result<Self> {
        let mut options = WriteOptions::default();
        if let Some(object) = properties(value)? {
            if let Some(v) = flag(object, "sync")? {
                options.sync = v;
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_COMPARATOR;

    #[test]
    fn test_nullish_means_defaults() {
        assert_eq!(Options::from_host(&HostValue::Undefined).unwrap(), Options::default());
        assert_eq!(
            WriteOptions::from_host(&HostValue::Null).unwrap(),
            WriteOptions::default()
        );
        assert!(ReadOptions::from_host(&HostValue::Undefined)
            .unwrap()
            .snapshot
            .is_none());
    }

    #[test]
    fn test_known_keys_are_read() {
        let host = HostObject::new()
            .with("create_if_missing", true)
            .with("write_buffer_size", 1024.0)
            .with("comparator", "custom")
            .with("unrelated", "ignored");
        let options = Options::from_host(&host.into()).unwrap();
        assert!(options.create_if_missing);
        assert!(!options.error_if_exists);
        assert_eq!(options.write_buffer_size, 1024);
        assert_eq!(options.comparator, "custom");

        let read = ReadOptions::from_host(&HostObject::new().with("as_buffer", true).into()).unwrap();
        assert!(read.as_buffer);
        let write = WriteOptions::from_host(&HostObject::new().with("sync", true).into()).unwrap();
        assert!(write.sync);
    }

    #[test]
    fn test_wrong_types_are_invalid() {
        let bad_flag = HostObject::new().with("sync", "yes");
        assert!(matches!(
            WriteOptions::from_host(&bad_flag.into()),
            Err(Error::InvalidArgument(_))
        ));

        let bad_size = HostObject::new().with("write_buffer_size", -1.0);
        assert!(Options::from_host(&bad_size.into()).is_err());

        let bad_snapshot = HostObject::new().with("snapshot", "nope");
        assert!(ReadOptions::from_host(&bad_snapshot.into()).is_err());

        assert!(Options::from_host(&HostValue::from("options")).is_err());
        assert_eq!(Options::default().comparator, DEFAULT_COMPARATOR);
    }
}
