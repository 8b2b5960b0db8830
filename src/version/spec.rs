// src/version/spec.rs

//! Dependency and provides specifications
//!
//! A single parser for strings like `glibc>=2.40`, `sh` or `libfoo.so=3-64`
//! shared by reconciliation, scheduling and dependency installation. Specs
//! serialize as their textual form so plan files stay hand-editable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Comparison operator in a dependency spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl DepOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepOp::Lt => "<",
            DepOp::Le => "<=",
            DepOp::Eq => "=",
            DepOp::Ge => ">=",
            DepOp::Gt => ">",
        }
    }
}

/// A parsed `name[op version]` specification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepSpec {
    pub name: String,
    pub op: Option<DepOp>,
    pub version: Option<String>,
}

impl DepSpec {
    /// Parse a dependency string; never fails, unknown shapes become bare names
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let Some(pos) = s.find(['<', '>', '=']) else {
            return Self::named(s);
        };

        let (name, rest) = s.split_at(pos);
        let (op, version) = if let Some(v) = rest.strip_prefix("<=") {
            (DepOp::Le, v)
        } else if let Some(v) = rest.strip_prefix(">=") {
            (DepOp::Ge, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (DepOp::Lt, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (DepOp::Gt, v)
        } else {
            (DepOp::Eq, rest.trim_start_matches('='))
        };

        let version = version.trim();
        if version.is_empty() {
            return Self::named(name);
        }

        Self {
            name: name.trim().to_string(),
            op: Some(op),
            version: Some(version.to_string()),
        }
    }

    /// A spec with no version constraint
    pub fn named(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            op: None,
            version: None,
        }
    }
}

impl fmt::Display for DepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let (Some(op), Some(version)) = (&self.op, &self.version) {
            write!(f, "{}{}", op.as_str(), version)?;
        }
        Ok(())
    }
}

impl From<&str> for DepSpec {
    fn from(s: &str) -> Self {
        DepSpec::parse(s)
    }
}

impl Serialize for DepSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DepSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DepSpec::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare() {
        let spec = DepSpec::parse("bash");
        assert_eq!(spec.name, "bash");
        assert_eq!(spec.op, None);
        assert_eq!(spec.version, None);
    }

    #[test]
    fn test_parse_operators() {
        let cases = [
            ("glibc>=2.40", DepOp::Ge, "2.40"),
            ("gcc-libs<=14.1", DepOp::Le, "14.1"),
            ("python<3.13", DepOp::Lt, "3.13"),
            ("linux>6.0", DepOp::Gt, "6.0"),
            ("libfoo.so=3-64", DepOp::Eq, "3-64"),
        ];
        for (input, op, version) in cases {
            let spec = DepSpec::parse(input);
            assert_eq!(spec.op, Some(op), "{input}");
            assert_eq!(spec.version.as_deref(), Some(version), "{input}");
            assert_eq!(spec.to_string(), input);
        }
    }

    #[test]
    fn test_dangling_operator_is_bare() {
        let spec = DepSpec::parse("zlib>=");
        assert_eq!(spec, DepSpec::named("zlib"));
    }

    #[test]
    fn test_serde_as_string() {
        let specs = vec![DepSpec::parse("glibc>=2.40"), DepSpec::parse("sh")];
        let json = serde_json::to_string(&specs).unwrap();
        assert_eq!(json, r#"["glibc>=2.40","sh"]"#);
        let back: Vec<DepSpec> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, specs);
    }
}
