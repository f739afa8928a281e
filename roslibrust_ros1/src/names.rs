use std::fmt;

/// An already-resolved ROS graph name, e.g. `/robot/scan` or `/listener_rs`.
///
/// This type performs no namespace arithmetic (no relative-name resolution, no remapping): the
/// core treats names as opaque, structurally-equal value types and trusts the caller to have
/// resolved them already. Equality and hashing are purely string-based.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        assert_eq!(Name::new("/foo"), Name::new("/foo".to_string()));
        assert_ne!(Name::new("/foo"), Name::new("/bar"));
    }
}
