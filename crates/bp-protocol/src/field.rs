//! Item fields, their value types and the field sets used by "get info".

use std::fmt;

use crate::opcode::Opcode;

/// Shape of a field's value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `i32`
    Int,
    /// Probe-prefixed, length-prefixed UTF-8.
    Str,
    /// Blob followed by width and height.
    Image,
    /// Blob without dimensions.
    Bytes,
}

impl ValueType {
    pub const fn is_blob(self) -> bool {
        matches!(self, Self::Image | Self::Bytes)
    }
}

/// A field of a stored item.
///
/// The ordinal (declaration order) is the field's bit in a [`FieldSet`] and
/// the order in which "get info" responses are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    Type,
    Parent,
    Sequence,
    DateCreated,
    DateModified,
    DateVisited,
    Url,
    Title,
    Favicon,
    Thumbnail,
    Snapshot,
    PageData,
}

impl FieldId {
    pub const ALL: [FieldId; 12] = [
        FieldId::Type,
        FieldId::Parent,
        FieldId::Sequence,
        FieldId::DateCreated,
        FieldId::DateModified,
        FieldId::DateVisited,
        FieldId::Url,
        FieldId::Title,
        FieldId::Favicon,
        FieldId::Thumbnail,
        FieldId::Snapshot,
        FieldId::PageData,
    ];

    pub const fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub const fn value_type(self) -> ValueType {
        match self {
            Self::Type
            | Self::Parent
            | Self::Sequence
            | Self::DateCreated
            | Self::DateModified
            | Self::DateVisited => ValueType::Int,
            Self::Url | Self::Title => ValueType::Str,
            Self::Favicon | Self::Thumbnail | Self::Snapshot => ValueType::Image,
            Self::PageData => ValueType::Bytes,
        }
    }

    pub const fn get_opcode(self) -> Opcode {
        match self {
            Self::Type => Opcode::GetType,
            Self::Parent => Opcode::GetParent,
            Self::Sequence => Opcode::GetSequence,
            Self::DateCreated => Opcode::GetDateCreated,
            Self::DateModified => Opcode::GetDateModified,
            Self::DateVisited => Opcode::GetDateVisited,
            Self::Url => Opcode::GetUrl,
            Self::Title => Opcode::GetTitle,
            Self::Favicon => Opcode::GetFavicon,
            Self::Thumbnail => Opcode::GetThumbnail,
            Self::Snapshot => Opcode::GetSnapshot,
            Self::PageData => Opcode::GetPageData,
        }
    }

    pub const fn set_opcode(self) -> Opcode {
        match self {
            Self::Type => Opcode::SetType,
            Self::Parent => Opcode::SetParent,
            Self::Sequence => Opcode::SetSequence,
            Self::DateCreated => Opcode::SetDateCreated,
            Self::DateModified => Opcode::SetDateModified,
            Self::DateVisited => Opcode::SetDateVisited,
            Self::Url => Opcode::SetUrl,
            Self::Title => Opcode::SetTitle,
            Self::Favicon => Opcode::SetFavicon,
            Self::Thumbnail => Opcode::SetThumbnail,
            Self::Snapshot => Opcode::SetSnapshot,
            Self::PageData => Opcode::SetPageData,
        }
    }

    /// Reverse lookup used by the provider side: which field does a get or
    /// set opcode address?
    pub fn from_opcode(opcode: Opcode) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.get_opcode() == opcode || f.set_opcode() == opcode)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Set of requested fields, carried on the wire as a `u32` bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldSet(u32);

impl FieldSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        FieldId::ALL.iter().copied().collect()
    }

    /// Builds a set from a wire mask, dropping bits with no field.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::all().0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn with(self, field: FieldId) -> Self {
        Self(self.0 | field.bit())
    }

    pub fn insert(&mut self, field: FieldId) {
        self.0 |= field.bit();
    }

    pub const fn contains(self, field: FieldId) -> bool {
        self.0 & field.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Requested fields in wire order.
    pub fn iter(self) -> impl Iterator<Item = FieldId> {
        FieldId::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<FieldId> for FieldSet {
    fn from_iter<I: IntoIterator<Item = FieldId>>(iter: I) -> Self {
        let mut set = Self::empty();
        for field in iter {
            set.insert(field);
        }
        set
    }
}

impl From<FieldId> for FieldSet {
    fn from(field: FieldId) -> Self {
        Self::empty().with(field)
    }
}
