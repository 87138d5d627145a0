//! Tag definitions
//!
//! Tags are lightweight references to values in a [`SystemState`]
//! snapshot: they carry identity and type metadata but hold no runtime
//! state.
//!
//! [`SystemState`]: crate::state::SystemState

use crate::value::{TagType, Value};

use std::fmt;
use std::sync::Arc;

/// Physical role of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagKind {
    /// Ordinary memory tag.
    #[default]
    Plain,
    /// Physical input; exposes an immediate reference.
    Input,
    /// Physical output; exposes an immediate reference.
    Output,
}

#[derive(Debug, Clone, PartialEq)]
struct TagInner {
    name: String,
    ty: TagType,
    retentive: bool,
    kind: TagKind,
    default: Value,
}

/// A named, typed slot in the tag map.
///
/// Identity is by name: two tags with the same name refer to the same
/// runtime value. Cloning is cheap (shared inner).
#[derive(Clone)]
pub struct Tag {
    inner: Arc<TagInner>,
}

impl Tag {
    /// Create a tag with an explicit type, retention flag, and kind.
    pub fn new(name: impl Into<String>, ty: TagType, retentive: bool, kind: TagKind) -> Self {
        Self {
            inner: Arc::new(TagInner {
                name: name.into(),
                ty,
                retentive,
                kind,
                default: ty.default_value(),
            }),
        }
    }

    /// Boolean tag, non-retentive by default.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Bool, false, TagKind::Plain)
    }

    /// 16-bit signed tag, retentive by default.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Int, true, TagKind::Plain)
    }

    /// 32-bit signed tag, retentive by default.
    pub fn dint(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Dint, true, TagKind::Plain)
    }

    /// 32-bit float tag, retentive by default.
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Real, true, TagKind::Plain)
    }

    /// 16-bit unsigned tag, non-retentive by default.
    pub fn word(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Word, false, TagKind::Plain)
    }

    /// Single-ASCII-character tag, retentive by default.
    pub fn char(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Char, true, TagKind::Plain)
    }

    /// Override the retention flag.
    pub fn retentive(self, retentive: bool) -> Self {
        Self {
            inner: Arc::new(TagInner {
                retentive,
                ..(*self.inner).clone()
            }),
        }
    }

    /// Override the default value. The value must match the tag type.
    pub fn with_default(self, default: Value) -> Self {
        debug_assert_eq!(default.tag_type(), self.inner.ty);
        Self {
            inner: Arc::new(TagInner {
                default,
                ..(*self.inner).clone()
            }),
        }
    }

    /// Unique tag name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Data type.
    pub fn tag_type(&self) -> TagType {
        self.inner.ty
    }

    /// Whether the value survives power cycles (persistence scope).
    pub fn is_retentive(&self) -> bool {
        self.inner.retentive
    }

    /// Physical role.
    pub fn kind(&self) -> TagKind {
        self.inner.kind
    }

    /// Default value used when the tag has never been written.
    pub fn default_value(&self) -> Value {
        self.inner.default
    }

    /// Immediate (physical) reference for input/output tags.
    ///
    /// Semantically identical to the tag itself inside the scan engine;
    /// code generators use it to bypass image tables.
    pub fn immediate(&self) -> Option<ImmediateRef> {
        match self.inner.kind {
            TagKind::Input | TagKind::Output => Some(ImmediateRef { tag: self.clone() }),
            TagKind::Plain => None,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("name", &self.inner.name)
            .field("type", &self.inner.ty)
            .field("retentive", &self.inner.retentive)
            .finish()
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Eq for Tag {}

impl std::hash::Hash for Tag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
    }
}

/// Reference to the physical value of an I/O tag, bypassing image tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmediateRef {
    tag: Tag,
}

impl ImmediateRef {
    /// The wrapped I/O tag.
    pub fn tag(&self) -> &Tag {
        &self.tag
    }
}
