//! Hierarchical key/value frames.
//!
//! A [`Frame`] maps string keys to [`Value`]s. Values may themselves be frames,
//! so a frame is the root of an arbitrarily deep tree addressed by [`Path`]s.
//! Every value is owned by exactly one frame; writes hand back the displaced
//! value, reads hand out borrows. Iteration and `Display` output follow the
//! lexicographic order of keys. Copying, comparing, printing and dropping
//! walk the tree with an explicit stack, so nesting depth is bounded only by memory.

use std::{cmp::Ordering, collections::BTreeMap, fmt};

use serde::Serialize;
use thiserror::Error;

use crate::{
    path::Path,
    tree,
    value::{Numeric, Value},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("path is empty")]
    EmptyPath,
    #[error("path '{path}' contains an empty segment")]
    EmptySegment { path: String },
    #[error("path '{path}': no frame at '{segment}'")]
    MissingFrame { path: String, segment: String },
    #[error("path '{path}': '{segment}' holds a non-frame value")]
    NotAFrame { path: String, segment: String },
}

#[derive(Default, Serialize)]
#[serde(transparent)]
pub struct Frame {
    pub(crate) slots: BTreeMap<String, Value>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sets `key` in this frame only, returning the displaced value.
    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.slots.insert(key.to_string(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.slots.remove(key)
    }

    /// Sets the slot at `path`. Every intermediate segment must already hold a frame.
    pub fn set_at(&mut self, path: &Path, value: Value) -> Result<Option<Value>, FrameError> {
        let (parents, key) = path.split_last();
        let mut frame = self;
        for segment in parents {
            frame = match frame.slots.get_mut(segment.as_str()) {
                Some(Value::Frame(child)) => child,
                Some(_) => {
                    return Err(FrameError::NotAFrame {
                        path: path.to_string(),
                        segment: segment.clone(),
                    })
                }
                None => {
                    return Err(FrameError::MissingFrame {
                        path: path.to_string(),
                        segment: segment.clone(),
                    })
                }
            };
        }
        Ok(frame.set(key, value))
    }

    /// Sets the slot at `path`, creating empty frames for missing intermediate segments.
    ///
    /// An intermediate segment that holds a non-frame value is not replaced.
    pub fn set_path(&mut self, path: &Path, value: Value) -> Result<Option<Value>, FrameError> {
        let (parents, key) = path.split_last();
        let mut frame = self;
        for segment in parents {
            let slot = frame
                .slots
                .entry(segment.clone())
                .or_insert_with(|| Value::Frame(Frame::new()));
            frame = match slot {
                Value::Frame(child) => child,
                _ => {
                    return Err(FrameError::NotAFrame {
                        path: path.to_string(),
                        segment: segment.clone(),
                    })
                }
            };
        }
        Ok(frame.set(key, value))
    }

    /// [`Frame::set_path`] with a `/`-delimited path.
    pub fn set_path_str(&mut self, path: &str, value: Value) -> Result<Option<Value>, FrameError> {
        let path = Path::parse(path)?;
        self.set_path(&path, value)
    }

    pub fn get_slot(&self, key: &str) -> Option<&Value> {
        self.slots.get(key)
    }

    /// Looks up `path`. A missing segment or a non-frame intermediate yields `None`.
    pub fn get_path(&self, path: &Path) -> Option<&Value> {
        let (parents, key) = path.split_last();
        let mut frame = self;
        for segment in parents {
            frame = frame.slots.get(segment.as_str())?.as_frame()?;
        }
        frame.slots.get(key)
    }

    pub fn get_path_str(&self, path: &str) -> Option<&Value> {
        let path = Path::parse(path).ok()?;
        self.get_path(&path)
    }

    pub fn get_path_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let (parents, key) = path.split_last();
        let mut frame = self;
        for segment in parents {
            frame = frame.slots.get_mut(segment.as_str())?.as_frame_mut()?;
        }
        frame.slots.get_mut(key)
    }

    pub fn remove_path(&mut self, path: &Path) -> Option<Value> {
        let (parents, key) = path.split_last();
        let mut frame = self;
        for segment in parents {
            frame = frame.slots.get_mut(segment.as_str())?.as_frame_mut()?;
        }
        frame.slots.remove(key)
    }

    pub fn get_frame(&self, key: &str) -> Option<&Frame> {
        self.slots.get(key).and_then(Value::as_frame)
    }

    /// Numeric at `path`; unset and non-numeric slots read as zero.
    pub fn get_numeric(&self, path: &Path) -> Numeric {
        self.get_path(path)
            .and_then(Value::as_numeric)
            .unwrap_or(Numeric::ZERO)
    }

    /// Keys of this frame only. Allocates on every call; prefer [`Frame::iter`]
    /// or [`Frame::for_each`] when walking large frames.
    pub fn get_keys(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Calls `visitor` once per immediate slot, in key order.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &Value),
    {
        for (key, value) in &self.slots {
            visitor(key, value);
        }
    }

    /// Copies every top-level slot of `other` into this frame, replacing existing keys.
    pub fn merge(&mut self, other: &Frame) {
        for (key, value) in &other.slots {
            self.slots.insert(key.clone(), value.clone());
        }
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        tree::dismantle(&mut self.slots);
    }
}

/// Total order over frames: sorted key sequences first, then values key by key.
pub fn compare(a: &Frame, b: &Frame) -> Ordering {
    tree::compare_frames(a, b)
}

impl Ord for Frame {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for Frame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frame {}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        tree::write_frame(f, self)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Frame ")?;
        tree::write_frame(f, self)
    }
}

impl FromIterator<(String, Value)> for Frame {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            slots: iter.into_iter().collect(),
        }
    }
}
