//! Property trees for inspecting emulated state from a debugger or the runner

use std::borrow::Cow;
use std::fmt;

use crate::types::{Long, Word};

#[macro_export]
macro_rules! dbgprop_header {
    ($name:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Header)
    };
}

#[macro_export]
macro_rules! dbgprop_bool {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Boolean($val))
    };
}

#[macro_export]
macro_rules! dbgprop_word {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Word($val))
    };
}

#[macro_export]
macro_rules! dbgprop_long {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Long($val))
    };
}

/// 64-bit registers such as the root pointers
#[macro_export]
macro_rules! dbgprop_quad {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Quad($val))
    };
}

/// Extended precision value as its three memory longs plus an approximation
#[macro_export]
macro_rules! dbgprop_ext {
    ($name:expr, $longs:expr, $approx:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Extended($longs, $approx))
    };
}

#[macro_export]
macro_rules! dbgprop_udec {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new(
            $name,
            DebuggablePropertyValue::UnsignedDecimal(u64::try_from($val).unwrap_or(u64::MAX)),
        )
    };
}

#[macro_export]
macro_rules! dbgprop_enum {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::StaticStr($val.into()))
    };
}

#[macro_export]
macro_rules! dbgprop_string {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::String($val))
    };
}

#[macro_export]
macro_rules! dbgprop_str {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::StaticStr($val))
    };
}

#[macro_export]
macro_rules! dbgprop_group {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Nested($val))
    };
}

pub type DebuggableProperties = Vec<DebuggableProperty>;

#[derive(Debug, Clone, PartialEq)]
pub struct DebuggableProperty {
    name: Cow<'static, str>,
    value: DebuggablePropertyValue,
}

impl DebuggableProperty {
    pub fn new(name: impl Into<Cow<'static, str>>, value: DebuggablePropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &DebuggablePropertyValue {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebuggablePropertyValue {
    Header,
    Nested(DebuggableProperties),
    Boolean(bool),
    Word(Word),
    Long(Long),
    Quad(u64),
    Extended([Long; 3], f64),
    UnsignedDecimal(u64),
    StaticStr(&'static str),
    String(String),
}

impl fmt::Display for DebuggablePropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header | Self::Nested(_) => Ok(()),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Word(v) => write!(f, "{:04X}", v),
            Self::Long(v) => write!(f, "{:08X}", v),
            Self::Quad(v) => write!(f, "{:016X}", v),
            Self::Extended(l, approx) => {
                write!(f, "{:08X} {:08X} {:08X} ({})", l[0], l[1], l[2], approx)
            }
            Self::UnsignedDecimal(v) => write!(f, "{}", v),
            Self::StaticStr(s) => write!(f, "{}", s),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

pub trait Debuggable {
    fn get_debug_properties(&self) -> DebuggableProperties;
}

/// Looks up a property by its path of names, descending into groups
pub fn find_property<'a>(
    props: &'a [DebuggableProperty],
    path: &[&str],
) -> Option<&'a DebuggablePropertyValue> {
    let (first, rest) = path.split_first()?;
    let prop = props.iter().find(|p| p.name() == *first)?;
    match (rest.is_empty(), prop.value()) {
        (true, v) => Some(v),
        (false, DebuggablePropertyValue::Nested(children)) => find_property(children, rest),
        (false, _) => None,
    }
}

/// Renders a property tree as indented text, one property per line
pub fn render_properties(props: &[DebuggableProperty], out: &mut impl fmt::Write) -> fmt::Result {
    fn walk(props: &[DebuggableProperty], depth: usize, out: &mut impl fmt::Write) -> fmt::Result {
        for p in props {
            let indent = depth * 2;
            match p.value() {
                DebuggablePropertyValue::Header => writeln!(out, "{:indent$}[{}]", "", p.name())?,
                DebuggablePropertyValue::Nested(children) => {
                    writeln!(out, "{:indent$}{}:", "", p.name())?;
                    walk(children, depth + 1, out)?;
                }
                v => writeln!(out, "{:indent$}{}: {}", "", p.name(), v)?,
            }
        }
        Ok(())
    }
    walk(props, 0, out)
}
