//! Walks over nested values that keep their own stack.
//!
//! Frames and lists can nest without limit, so copying, ordering, printing and
//! dropping them never recurse on the call stack.

use std::{
    cmp::Ordering,
    collections::{btree_map, BTreeMap},
    fmt, slice,
};

use time::format_description::well_known::Rfc3339;

use crate::{frame::Frame, value::Value};

/// A container whose children are being copied.
enum Copying<'a> {
    Frame {
        source: btree_map::Iter<'a, String, Value>,
        built: BTreeMap<String, Value>,
        // Key of the child currently being copied.
        pending: Option<String>,
    },
    List {
        source: slice::Iter<'a, Value>,
        built: Vec<Value>,
    },
}

enum Node<'a> {
    Leaf(Value),
    Nested(Copying<'a>),
}

impl<'a> Copying<'a> {
    fn visit(value: &'a Value) -> Node<'a> {
        match value {
            Value::Frame(frame) => Node::Nested(Copying::Frame {
                source: frame.slots.iter(),
                built: BTreeMap::new(),
                pending: None,
            }),
            Value::List(items) => Node::Nested(Copying::List {
                source: items.iter(),
                built: Vec::with_capacity(items.len()),
            }),
            Value::Int64(i) => Node::Leaf(Value::Int64(*i)),
            Value::Double(d) => Node::Leaf(Value::Double(*d)),
            Value::Numeric(n) => Node::Leaf(Value::Numeric(*n)),
            Value::String(s) => Node::Leaf(Value::String(s.clone())),
            Value::Guid(g) => Node::Leaf(Value::Guid(*g)),
            Value::Timestamp(t) => Node::Leaf(Value::Timestamp(*t)),
            Value::Blob(b) => Node::Leaf(Value::Blob(b.clone())),
        }
    }

    fn next_child(&mut self) -> Option<(Option<String>, &'a Value)> {
        match self {
            Copying::Frame { source, .. } => source.next().map(|(key, value)| (Some(key.clone()), value)),
            Copying::List { source, .. } => source.next().map(|value| (None, value)),
        }
    }

    fn hold(&mut self, key: Option<String>) {
        if let Copying::Frame { pending, .. } = self {
            *pending = key;
        }
    }

    fn adopt(&mut self, key: Option<String>, value: Value) {
        match self {
            Copying::Frame { built, .. } => {
                if let Some(key) = key {
                    built.insert(key, value);
                }
            }
            Copying::List { built, .. } => built.push(value),
        }
    }

    fn adopt_held(&mut self, value: Value) {
        let key = match self {
            Copying::Frame { pending, .. } => pending.take(),
            Copying::List { .. } => None,
        };
        self.adopt(key, value);
    }

    fn finish(self) -> Value {
        match self {
            Copying::Frame { built, .. } => Value::Frame(Frame { slots: built }),
            Copying::List { built, .. } => Value::List(built),
        }
    }
}

/// Deep copy of `value`.
pub(crate) fn deep_copy(value: &Value) -> Value {
    let mut current = match Copying::visit(value) {
        Node::Leaf(leaf) => return leaf,
        Node::Nested(copying) => copying,
    };
    let mut ancestors: Vec<Copying<'_>> = Vec::new();
    loop {
        match current.next_child() {
            Some((key, child)) => match Copying::visit(child) {
                Node::Leaf(leaf) => current.adopt(key, leaf),
                Node::Nested(nested) => {
                    current.hold(key);
                    ancestors.push(std::mem::replace(&mut current, nested));
                }
            },
            None => match ancestors.pop() {
                Some(parent) => {
                    let done = std::mem::replace(&mut current, parent);
                    current.adopt_held(done.finish());
                }
                None => return current.finish(),
            },
        }
    }
}

/// Pairs of sibling sequences still being compared.
enum Walk<'a> {
    Frames(btree_map::Values<'a, String, Value>, btree_map::Values<'a, String, Value>),
    Lists(slice::Iter<'a, Value>, slice::Iter<'a, Value>),
}

fn frame_walk<'a>(a: &'a Frame, b: &'a Frame) -> Result<Walk<'a>, Ordering> {
    match a.slots.keys().cmp(b.slots.keys()) {
        Ordering::Equal => Ok(Walk::Frames(a.slots.values(), b.slots.values())),
        ord => Err(ord),
    }
}

/// Orders two values shallowly. Containers that still need their children
/// compared are pushed onto `pending`.
fn step<'a>(a: &'a Value, b: &'a Value, pending: &mut Vec<Walk<'a>>) -> Ordering {
    match (a, b) {
        (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
        (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
        (Value::Numeric(a), Value::Numeric(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Guid(a), Value::Guid(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
        (Value::List(a), Value::List(b)) => {
            pending.push(Walk::Lists(a.iter(), b.iter()));
            Ordering::Equal
        }
        (Value::Frame(a), Value::Frame(b)) => match frame_walk(a, b) {
            Ok(walk) => {
                pending.push(walk);
                Ordering::Equal
            }
            Err(ord) => ord,
        },
        (a, b) => a.tag().cmp(&b.tag()),
    }
}

fn drain(mut pending: Vec<Walk<'_>>) -> Ordering {
    while let Some(top) = pending.last_mut() {
        let pair = match top {
            Walk::Frames(a, b) => (a.next(), b.next()),
            Walk::Lists(a, b) => (a.next(), b.next()),
        };
        match pair {
            (Some(a), Some(b)) => {
                let ord = step(a, b, &mut pending);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (None, None) => {
                pending.pop();
            }
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
        }
    }
    Ordering::Equal
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    let mut pending = Vec::new();
    match step(a, b, &mut pending) {
        Ordering::Equal => drain(pending),
        ord => ord,
    }
}

pub(crate) fn compare_frames(a: &Frame, b: &Frame) -> Ordering {
    match frame_walk(a, b) {
        Ok(walk) => drain(vec![walk]),
        Err(ord) => ord,
    }
}

enum Emit<'a> {
    Value(&'a Value, usize),
    Frame(&'a Frame, usize),
    Slot(&'a str, &'a Value, usize),
    Close(usize),
    Text(&'static str),
}

fn write_leaf(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Int64(i) => write!(f, "{}", i),
        Value::Double(d) => write!(f, "{:?}", d),
        Value::Numeric(n) => write!(f, "{}", n),
        Value::String(s) => write!(f, "{:?}", s),
        Value::Guid(g) => write!(f, "{}", g.hyphenated()),
        Value::Timestamp(t) => match t.format(&Rfc3339) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{}", t),
        },
        Value::Blob(b) => {
            write!(f, "<{} bytes:", b.len())?;
            for byte in b {
                write!(f, " {:02x}", byte)?;
            }
            f.write_str(">")
        }
        Value::List(_) | Value::Frame(_) => Ok(()),
    }
}

fn write_indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    write!(f, "{:width$}", "", width = depth * 4)
}

fn write_tree(f: &mut fmt::Formatter<'_>, start: Emit<'_>) -> fmt::Result {
    let mut pending = vec![start];
    while let Some(item) = pending.pop() {
        match item {
            Emit::Text(text) => f.write_str(text)?,
            Emit::Close(depth) => {
                write_indent(f, depth)?;
                f.write_str("}")?;
            }
            Emit::Slot(key, value, depth) => {
                write_indent(f, depth + 1)?;
                write!(f, "{} => ", key)?;
                pending.push(Emit::Text(",\n"));
                pending.push(Emit::Value(value, depth + 1));
            }
            Emit::Frame(frame, depth) => {
                if frame.slots.is_empty() {
                    f.write_str("{}")?;
                    continue;
                }
                f.write_str("{\n")?;
                pending.push(Emit::Close(depth));
                for (key, value) in frame.slots.iter().rev() {
                    pending.push(Emit::Slot(key.as_str(), value, depth));
                }
            }
            Emit::Value(Value::Frame(frame), depth) => pending.push(Emit::Frame(frame, depth)),
            Emit::Value(Value::List(items), depth) => {
                f.write_str("[")?;
                pending.push(Emit::Text("]"));
                for (i, item) in items.iter().enumerate().rev() {
                    pending.push(Emit::Value(item, depth));
                    if i > 0 {
                        pending.push(Emit::Text(", "));
                    }
                }
            }
            Emit::Value(leaf, _) => write_leaf(f, leaf)?,
        }
    }
    Ok(())
}

pub(crate) fn write_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    write_tree(f, Emit::Value(value, 0))
}

pub(crate) fn write_frame(f: &mut fmt::Formatter<'_>, frame: &Frame) -> fmt::Result {
    write_tree(f, Emit::Frame(frame, 0))
}

fn has_children(value: &Value) -> bool {
    match value {
        Value::Frame(frame) => !frame.slots.is_empty(),
        Value::List(items) => !items.is_empty(),
        _ => false,
    }
}

/// Empties `slots`, tearing down nested frames and lists one level at a time.
pub(crate) fn dismantle(slots: &mut BTreeMap<String, Value>) {
    if !slots.values().any(has_children) {
        return;
    }
    let mut pending: Vec<Value> = std::mem::take(slots).into_values().collect();
    while let Some(value) = pending.pop() {
        match value {
            Value::Frame(mut frame) => pending.extend(std::mem::take(&mut frame.slots).into_values()),
            Value::List(items) => pending.extend(items),
            _ => {}
        }
    }
}
