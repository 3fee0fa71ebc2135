//! Expected version: the optimistic concurrency token a writer supplies

use crate::error::{EventStoreError, Result};
use crate::types::Stream;
use std::fmt;

/// A writer's belief about the last position of the target stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check; safe under arbitrary concurrency
    Any,
    /// The stream must not exist yet
    NoStream,
    /// Expect one past the current last position, looked up at append time
    ///
    /// The lookup is a separate query from the append itself, so two
    /// concurrent writers can both resolve the same position. Only use
    /// `Auto` when the caller serializes writers to the stream; otherwise
    /// use `Any` or an explicit version.
    Auto,
    /// The stream's last position must be exactly this
    Exact(u64),
}

/// Outcome of resolving an [`ExpectedVersion`] against a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVersion {
    /// Skip the check
    Unchecked,
    /// The stream's last position must equal this (`None` = stream absent)
    Last(Option<u64>),
}

impl ExpectedVersion {
    pub fn is_any(&self) -> bool {
        matches!(self, ExpectedVersion::Any)
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, ExpectedVersion::Auto)
    }

    /// Resolve against `stream`
    ///
    /// `last_position` is only consulted for `Auto` and should return the
    /// stream's current last position, or `None` for a new stream.
    pub fn resolve_for<F>(&self, stream: &Stream, last_position: F) -> Result<ResolvedVersion>
    where
        F: FnOnce(&Stream) -> Option<u64>,
    {
        if stream.is_global() && !self.is_any() {
            return Err(EventStoreError::InvalidExpectedVersion(format!(
                "{} is not allowed for the global stream",
                self
            )));
        }

        Ok(match self {
            ExpectedVersion::Any => ResolvedVersion::Unchecked,
            ExpectedVersion::NoStream => ResolvedVersion::Last(None),
            ExpectedVersion::Exact(n) => ResolvedVersion::Last(Some(*n)),
            ExpectedVersion::Auto => ResolvedVersion::Last(last_position(stream)),
        })
    }
}

impl ResolvedVersion {
    /// Whether a stream whose last position is `actual` satisfies this
    pub fn accepts(&self, actual: Option<u64>) -> bool {
        match self {
            ResolvedVersion::Unchecked => true,
            ResolvedVersion::Last(expected) => *expected == actual,
        }
    }

    /// Position of the `ordinal`-th event of a batch appended after `actual`
    pub fn next_position(&self, actual: Option<u64>, ordinal: usize) -> u64 {
        let last = match self {
            ResolvedVersion::Unchecked => actual,
            ResolvedVersion::Last(expected) => *expected,
        };
        last.map_or(0, |p| p + 1) + ordinal as u64
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::NoStream => f.write_str("none"),
            ExpectedVersion::Auto => f.write_str("auto"),
            ExpectedVersion::Exact(n) => write!(f, "{}", n),
        }
    }
}

impl TryFrom<i64> for ExpectedVersion {
    type Error = EventStoreError;

    /// `-1` means the stream must be absent; other negatives are invalid
    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(ExpectedVersion::NoStream),
            n if n >= 0 => Ok(ExpectedVersion::Exact(n as u64)),
            n => Err(EventStoreError::InvalidExpectedVersion(format!(
                "{} is not a valid stream position",
                n
            ))),
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        ExpectedVersion::Exact(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GLOBAL_STREAM;

    fn orders() -> Stream {
        Stream::new("orders-1").unwrap()
    }

    #[test]
    fn test_resolve_any_skips_check() {
        let resolved = ExpectedVersion::Any
            .resolve_for(&orders(), |_| panic!("lookup not expected"))
            .unwrap();
        assert_eq!(resolved, ResolvedVersion::Unchecked);
        assert!(resolved.accepts(None));
        assert!(resolved.accepts(Some(7)));
    }

    #[test]
    fn test_resolve_none_and_exact() {
        let none = ExpectedVersion::NoStream.resolve_for(&orders(), |_| Some(3)).unwrap();
        assert_eq!(none, ResolvedVersion::Last(None));
        assert!(none.accepts(None));
        assert!(!none.accepts(Some(0)));

        let exact = ExpectedVersion::Exact(2).resolve_for(&orders(), |_| Some(9)).unwrap();
        assert_eq!(exact, ResolvedVersion::Last(Some(2)));
        assert!(exact.accepts(Some(2)));
        assert!(!exact.accepts(Some(3)));
    }

    #[test]
    fn test_resolve_auto_uses_lookup() {
        let fresh = ExpectedVersion::Auto.resolve_for(&orders(), |_| None).unwrap();
        assert_eq!(fresh, ResolvedVersion::Last(None));

        let existing = ExpectedVersion::Auto
            .resolve_for(&orders(), |s| {
                assert_eq!(s.name(), "orders-1");
                Some(4)
            })
            .unwrap();
        assert_eq!(existing, ResolvedVersion::Last(Some(4)));
    }

    #[test]
    fn test_global_stream_only_accepts_any() {
        assert!(ExpectedVersion::Any.resolve_for(&GLOBAL_STREAM, |_| None).is_ok());
        for version in [
            ExpectedVersion::NoStream,
            ExpectedVersion::Auto,
            ExpectedVersion::Exact(0),
        ] {
            let result = version.resolve_for(&GLOBAL_STREAM, |_| None);
            assert!(matches!(
                result,
                Err(EventStoreError::InvalidExpectedVersion(_))
            ));
        }
    }

    #[test]
    fn test_next_position() {
        assert_eq!(ResolvedVersion::Last(None).next_position(None, 0), 0);
        assert_eq!(ResolvedVersion::Last(None).next_position(None, 2), 2);
        assert_eq!(ResolvedVersion::Last(Some(1)).next_position(Some(1), 0), 2);
        assert_eq!(ResolvedVersion::Unchecked.next_position(Some(5), 1), 7);
        assert_eq!(ResolvedVersion::Unchecked.next_position(None, 0), 0);
    }

    #[test]
    fn test_try_from_i64() {
        assert_eq!(ExpectedVersion::try_from(-1i64).unwrap(), ExpectedVersion::NoStream);
        assert_eq!(ExpectedVersion::try_from(3i64).unwrap(), ExpectedVersion::Exact(3));
        tokio_test::assert_err!(ExpectedVersion::try_from(-2i64));
    }
}
