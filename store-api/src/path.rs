/// Slash-joined location in the document tree, e.g. `accounts/100200300400`.
///
/// Segments are non-empty and never contain `/`; constructors assert this
/// because paths are always built from generated identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for segment in segments {
            path.push(segment.into());
        }
        path
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.push(segment.into());
        path
    }

    fn push(&mut self, segment: String) {
        assert!(
            !segment.is_empty() && !segment.contains('/'),
            "store path segments must be non-empty and slash-free"
        );
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True when `self` sits at or below `prefix`.
    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.segments.join("/"))
    }
}
