use std::fmt;

/// A value a destination register should end up holding.
///
/// Whether a `Name` is a register reference or an opaque symbol depends on
/// the register universe it is checked against, so the distinction is made
/// per call rather than stored here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Numeric constant.
    Int(i64),
    /// Register name or symbolic constant (e.g. `SYS_execve`).
    Name(String),
}

impl Value {
    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Int(0))
    }

    /// The register this value refers to, if it names one in `universe`.
    pub fn as_register<'a>(&'a self, universe: &[&str]) -> Option<&'a str> {
        match self {
            Value::Name(name) if universe.contains(&name.as_str()) => Some(name),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Name(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Name(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) if *n < 0 => write!(f, "-{:#x}", n.unsigned_abs()),
            Value::Int(n) => write!(f, "{:#x}", n),
            Value::Name(name) => write!(f, "{}", name),
        }
    }
}

/// One primitive step produced by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `dst <- src`.
    Move { dst: String, src: Value },
    /// Exchange the contents of two registers.
    Swap(String, String),
}

impl Operation {
    pub fn mov(dst: impl Into<String>, src: impl Into<Value>) -> Self {
        Operation::Move { dst: dst.into(), src: src.into() }
    }

    pub fn swap(a: impl Into<String>, b: impl Into<String>) -> Self {
        Operation::Swap(a.into(), b.into())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Move { dst, src } => write!(f, "mov {}, {}", dst, src),
            Operation::Swap(a, b) => write!(f, "xchg {}, {}", a, b),
        }
    }
}

/// Ordered mapping of destination register to desired value.
///
/// Insertion order is kept: it decides which of several equally ready
/// destinations gets written first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    entries: Vec<(String, Value)>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `dst` to `value`, replacing any earlier value for `dst` in place.
    pub fn insert(&mut self, dst: impl Into<String>, value: impl Into<Value>) {
        let dst = dst.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(d, _)| *d == dst) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((dst, value)),
        }
    }

    pub fn get(&self, dst: &str) -> Option<&Value> {
        self.entries.iter().find(|(d, _)| d == dst).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(d, v)| (d.as_str(), v))
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(d, _)| d.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut asn = Assignment::new();
        for (dst, value) in iter {
            asn.insert(dst, value);
        }
        asn
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Assignment {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (dst, value) in iter {
            self.insert(dst, value);
        }
    }
}
