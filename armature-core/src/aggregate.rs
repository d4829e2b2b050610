use std::fmt;

use crate::FrameworkError;

const DEFAULT_MESSAGE: &str = "one or more errors occurred";

/// A container for one or more errors raised by a single logical operation.
///
/// Inner errors are preserved in insertion order: for a failed startup the
/// initialization failures come first, followed by any rollback failures.
/// Nested aggregates can be unwrapped into a single flat list with
/// [`flatten`](AggregateError::flatten).
#[derive(Debug, Default)]
pub struct AggregateError {
    message: String,
    inner: Vec<FrameworkError>,
}

impl AggregateError {
    /// Creates an aggregate with a summary message and the inner errors.
    ///
    /// An empty message falls back to a generic default. Callers are expected
    /// to provide at least one inner error; an empty aggregate is only
    /// meaningful as a [`Default`] placeholder.
    pub fn new(message: impl Into<String>, inner: Vec<FrameworkError>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            DEFAULT_MESSAGE.to_string()
        } else {
            message
        };
        Self { message, inner }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn inner(&self) -> &[FrameworkError] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn push(&mut self, error: FrameworkError) {
        self.inner.push(error);
    }

    /// The first inner error, if any.
    pub fn base_error(&self) -> Option<&FrameworkError> {
        self.inner.first()
    }

    /// Recursively unwraps nested aggregates into a single flat aggregate,
    /// keeping the original insertion order and this aggregate's message.
    pub fn flatten(self) -> AggregateError {
        fn collect(errors: Vec<FrameworkError>, out: &mut Vec<FrameworkError>) {
            for error in errors {
                match error {
                    FrameworkError::Aggregate(nested) => collect(nested.inner, out),
                    other => out.push(other),
                }
            }
        }

        let mut flattened = Vec::with_capacity(self.inner.len());
        collect(self.inner, &mut flattened);
        AggregateError {
            message: self.message,
            inner: flattened,
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} inner)", self.message, self.inner.len())?;
        for (index, error) in self.inner.iter().enumerate() {
            write!(f, "; [{index}] {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_message() {
        let agg = AggregateError::new("", vec![FrameworkError::Cancelled]);
        assert_eq!(agg.message(), DEFAULT_MESSAGE);

        let agg = AggregateError::new("custom", vec![FrameworkError::Cancelled]);
        assert_eq!(agg.message(), "custom");
    }

    #[test]
    fn test_insertion_order_preserved() {
        let agg = AggregateError::new(
            "startup failed",
            vec![
                FrameworkError::ServiceInitFailed("a".into(), "boom".into()),
                FrameworkError::ServiceShutdownFailed("b".into(), "bang".into()),
                FrameworkError::Cancelled,
            ],
        );
        assert_eq!(agg.len(), 3);
        assert!(matches!(
            agg.base_error(),
            Some(FrameworkError::ServiceInitFailed(name, _)) if name == "a"
        ));
        assert!(matches!(agg.inner()[1], FrameworkError::ServiceShutdownFailed(..)));
        assert!(matches!(agg.inner()[2], FrameworkError::Cancelled));
    }

    #[test]
    fn test_flatten_unwraps_nested_aggregates() {
        let nested = AggregateError::new(
            "inner",
            vec![
                FrameworkError::Cancelled,
                FrameworkError::Aggregate(AggregateError::new(
                    "deeper",
                    vec![FrameworkError::RegistryExtracted],
                )),
            ],
        );
        let agg = AggregateError::new(
            "outer",
            vec![
                FrameworkError::UnknownService("x"),
                FrameworkError::Aggregate(nested),
            ],
        );

        let flat = agg.flatten();
        assert_eq!(flat.message(), "outer");
        assert_eq!(flat.len(), 3);
        assert!(matches!(flat.inner()[0], FrameworkError::UnknownService(_)));
        assert!(matches!(flat.inner()[1], FrameworkError::Cancelled));
        assert!(matches!(flat.inner()[2], FrameworkError::RegistryExtracted));
    }

    #[test]
    fn test_display_lists_inner_errors() {
        let agg = AggregateError::new("failed", vec![FrameworkError::Cancelled]);
        let rendered = agg.to_string();
        assert!(rendered.contains("failed (1 inner)"));
        assert!(rendered.contains("operation cancelled"));
    }
}
