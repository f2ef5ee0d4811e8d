#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Change notification: the name of the property that changed.
///
/// Immutable and cheap to clone; every subscriber on every channel receives
/// the same value for one logical change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyChanged {
    name: Arc<str>,
}

impl PropertyChanged {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PropertyChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for PropertyChanged {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PropertyChanged {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<Arc<str>> for PropertyChanged {
    fn from(name: Arc<str>) -> Self {
        Self { name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_name() {
        let a = PropertyChanged::new("Count");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.name(), "Count");
        assert_eq!(b.to_string(), "Count");
        assert_eq!(PropertyChanged::from(String::from("Count")), a);
    }
}
