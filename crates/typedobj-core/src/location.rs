use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Serialize, Serializer};

/// One step of a document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Object member name.
    Field(String),
    /// Zero-based array index.
    Index(u64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Frozen position of a token inside a document.
///
/// Renders as `/a/0/b`; the root renders as `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationPath {
    segments: Vec<PathSegment>,
}

impl LocationPath {
    /// The document root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from segments.
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Path of the enclosing container; the root is its own parent.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// Returns a copy extended by `segment`.
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl Serialize for LocationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Live path maintained during a traversal.
///
/// Entering a container pushes a placeholder that the first member or
/// element replaces; leaving pops it.
#[derive(Debug, Default)]
pub struct LocationTracker {
    frames: Vec<Option<PathSegment>>,
}

impl LocationTracker {
    /// Creates a tracker positioned at the root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a placeholder for a newly opened container.
    pub fn enter(&mut self) {
        self.frames.push(None);
    }

    /// Pops the innermost container.
    pub fn leave(&mut self) {
        self.frames.pop();
    }

    /// Replaces the innermost segment with a field name.
    pub fn set_field(&mut self, name: &str) {
        if let Some(last) = self.frames.last_mut() {
            *last = Some(PathSegment::Field(name.to_string()));
        }
    }

    /// Replaces the innermost segment with an array index.
    pub fn set_index(&mut self, index: u64) {
        if let Some(last) = self.frames.last_mut() {
            *last = Some(PathSegment::Index(index));
        }
    }

    /// Number of open containers.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Takes an independent copy of the current path.
    pub fn snapshot(&self) -> LocationPath {
        LocationPath {
            segments: self.frames.iter().flatten().cloned().collect(),
        }
    }
}

impl fmt::Display for LocationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        for segment in self.frames.iter().flatten() {
            write!(f, "/{segment}")?;
            wrote = true;
        }
        if !wrote {
            f.write_str("/")?;
        }
        Ok(())
    }
}

/// Anything that owns a [`LocationTracker`].
pub trait Tracked {
    /// The tracker to scope.
    fn tracker(&mut self) -> &mut LocationTracker;
}

impl Tracked for LocationTracker {
    fn tracker(&mut self) -> &mut LocationTracker {
        self
    }
}

/// Container scope that pops its path segment when dropped, on every exit path.
pub struct Scope<'a, T: Tracked> {
    inner: &'a mut T,
}

impl<'a, T: Tracked> Scope<'a, T> {
    /// Enters a container on `inner`'s tracker.
    pub fn enter(inner: &'a mut T) -> Self {
        inner.tracker().enter();
        Self { inner }
    }
}

impl<T: Tracked> Deref for Scope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner
    }
}

impl<T: Tracked> DerefMut for Scope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
    }
}

impl<T: Tracked> Drop for Scope<'_, T> {
    fn drop(&mut self) {
        self.inner.tracker().leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_renders_as_slash() {
        assert_eq!(LocationPath::root().to_string(), "/");
        assert_eq!(LocationTracker::new().to_string(), "/");
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut tracker = LocationTracker::new();
        tracker.enter();
        tracker.set_field("a");
        tracker.enter();
        tracker.set_index(3);
        let frozen = tracker.snapshot();
        tracker.set_index(4);
        assert_eq!(frozen.to_string(), "/a/3");
        assert_eq!(tracker.to_string(), "/a/4");
        assert_eq!(frozen.depth(), 2);
    }

    #[test]
    fn test_placeholder_is_hidden() {
        let mut tracker = LocationTracker::new();
        tracker.enter();
        tracker.set_field("a");
        tracker.enter();
        assert_eq!(tracker.snapshot().to_string(), "/a");
    }

    #[test]
    fn test_scope_pops_on_early_exit() {
        fn fails(tracker: &mut LocationTracker) -> Result<(), ()> {
            let mut scope = Scope::enter(tracker);
            scope.set_field("x");
            Err(())
        }
        let mut tracker = LocationTracker::new();
        assert!(fails(&mut tracker).is_err());
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn test_serializes_as_string() {
        let path = LocationPath::root()
            .child(PathSegment::Field("a".into()))
            .child(PathSegment::Index(0));
        assert_eq!(serde_json::to_value(&path).unwrap(), "/a/0");
        assert_eq!(path.parent().to_string(), "/a");
        assert!(LocationPath::root().parent().is_root());
    }
}
