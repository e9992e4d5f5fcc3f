use std::{fmt, str::FromStr};

use crate::frame::FrameError;

/// Separator used when a path is written as a single string.
pub const PATH_SEPARATOR: char = '/';

/// A non-empty sequence of frame keys. `.` and `..` are ordinary keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn new<I, S>(segments: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(FrameError::EmptyPath);
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FrameError::EmptySegment {
                path: segments.join("/"),
            });
        }
        Ok(Self { segments })
    }

    pub fn parse(path: &str) -> Result<Self, FrameError> {
        if path.is_empty() {
            return Err(FrameError::EmptyPath);
        }
        Self::new(path.split(PATH_SEPARATOR))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Intermediate frame keys and the final slot key.
    pub fn split_last(&self) -> (&[String], &str) {
        match self.segments.split_last() {
            Some((last, parents)) => (parents, last.as_str()),
            None => (&[], ""),
        }
    }
}

impl FromStr for Path {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Path {
    type Error = FrameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
