// Route path naming
//
// A route path is the only identity used for routing. It is a pure function of the
// qualifier, the interface name and the method signature, so independent nodes compute the
// same path without coordination:
//
//     qualifier@fully.qualified.Interface::method(type1,type2)
//
// The `qualifier@` prefix is omitted when the (trimmed) qualifier is empty. The delimiters
// `@ : ( ) ,` may not appear inside any part, otherwise distinct triples could share a path.
// Interface tables and qualifiers are checked before any path is derived from them.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::interface::MethodSignature;
use crate::error::RegistryError;

/// Characters separating the parts of a route path
pub const PATH_DELIMITERS: [char; 5] = ['@', ':', '(', ')', ','];

/// Reject a path part that is empty or contains a delimiter
pub fn check_segment(kind: &str, value: &str) -> Result<(), RegistryError> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains(&PATH_DELIMITERS[..]) {
        "must not contain any of @ : ( ) ,"
    } else {
        return Ok(());
    };
    Err(RegistryError::InvalidName {
        kind: kind.to_string(),
        name: value.to_string(),
        reason: reason.to_string(),
    })
}

/// Deterministic routing key for a (qualifier, interface, method signature) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutePath(String);

impl RoutePath {
    /// Wrap an already derived path, e.g. one received for low-level registration
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Check a qualifier; blank ones are allowed and leave the prefix out
    pub fn check_qualifier(qualifier: &str) -> Result<(), RegistryError> {
        let qualifier = qualifier.trim();
        if qualifier.is_empty() {
            return Ok(());
        }
        check_segment("qualifier", qualifier)
    }

    /// Derive the path for a method of an interface under a qualifier.
    ///
    /// Distinct triples yield distinct paths as long as their parts pass [`check_segment`].
    pub fn derive(qualifier: &str, interface_name: &str, method: &MethodSignature) -> Self {
        let qualifier = qualifier.trim();
        let mut path = String::with_capacity(
            qualifier.len() + interface_name.len() + method.name().len() + 16,
        );
        if !qualifier.is_empty() {
            path.push_str(qualifier);
            path.push('@');
        }
        path.push_str(interface_name);
        path.push_str("::");
        path.push_str(method.name());
        path.push('(');
        path.push_str(&method.params().join(","));
        path.push(')');
        Self(path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutePath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for RoutePath {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl AsRef<str> for RoutePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoutePath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sig(name: &str, params: &[&str]) -> MethodSignature {
        MethodSignature::new(name, params.iter().copied())
    }

    #[test]
    fn test_derive_with_qualifier() {
        let path = RoutePath::derive("calc", "com.example.Calculator", &sig("add", &["int", "int"]));
        assert_eq!(path.as_str(), "calc@com.example.Calculator::add(int,int)");
    }

    #[test]
    fn test_derive_omits_empty_qualifier() {
        let method = sig("reset", &[]);
        assert_eq!(
            RoutePath::derive("", "com.example.Calculator", &method).as_str(),
            "com.example.Calculator::reset()"
        );
        // whitespace-only qualifiers are trimmed away as well
        assert_eq!(
            RoutePath::derive("   ", "com.example.Calculator", &method),
            RoutePath::derive("", "com.example.Calculator", &method)
        );
        assert_eq!(
            RoutePath::derive(" calc ", "com.example.Calculator", &method).as_str(),
            "calc@com.example.Calculator::reset()"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let method = sig("divide", &["long", "long"]);
        let first = RoutePath::derive("q", "a.B", &method);
        let second = RoutePath::derive("q", "a.B", &method.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_signatures_yield_distinct_paths() {
        let triples = [
            ("", "a.B", sig("m", &[])),
            ("q", "a.B", sig("m", &[])),
            ("r", "a.B", sig("m", &[])),
            ("q", "a.C", sig("m", &[])),
            ("q", "a.B", sig("n", &[])),
            ("q", "a.B", sig("m", &["int"])),
            ("q", "a.B", sig("m", &["long"])),
            ("q", "a.B", sig("m", &["int", "int"])),
            ("q", "a.B", sig("m", &["java.lang.String"])),
        ];
        let paths: HashSet<RoutePath> = triples
            .iter()
            .map(|(q, i, m)| RoutePath::derive(q, i, m))
            .collect();
        assert_eq!(paths.len(), triples.len());
    }

    #[test]
    fn test_qualifiers_with_delimiters_are_rejected() {
        assert!(RoutePath::check_qualifier("").is_ok());
        assert!(RoutePath::check_qualifier("  ").is_ok());
        assert!(RoutePath::check_qualifier(" calc ").is_ok());
        assert!(RoutePath::check_qualifier("eu-west.calc_2").is_ok());
        for bad in ["a@b", "a:b", "a(b", "a)b", "a,b"] {
            assert!(
                matches!(
                    RoutePath::check_qualifier(bad),
                    Err(RegistryError::InvalidName { ref kind, .. }) if kind == "qualifier"
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_colliding_triples_fail_the_segment_check() {
        let method = sig("m", &[]);
        // both triples would derive "a@b@c.I::m()"
        assert_eq!(
            RoutePath::derive("a@b", "c.I", &method),
            RoutePath::derive("a", "b@c.I", &method)
        );
        assert!(RoutePath::check_qualifier("a@b").is_err());
        assert!(check_segment("interface name", "b@c.I").is_err());
        assert!(RoutePath::check_qualifier("a").is_ok());
        assert!(check_segment("interface name", "c.I").is_ok());
    }

    #[test]
    fn test_route_path_serializes_as_plain_string() {
        let path = RoutePath::new("q@a.B::m()");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"q@a.B::m()\"");
    }
}
