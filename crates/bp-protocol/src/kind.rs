//! Data kinds and the client kind sent at handshake.

use std::fmt;

/// One of the parallel stores served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Bookmark,
    History,
    Tab,
    Scrap,
}

impl DataKind {
    /// First public error code of this kind's range.
    pub const fn error_base(self) -> i32 {
        match self {
            Self::Bookmark => 10,
            Self::History => 30,
            Self::Tab => 50,
            Self::Scrap => 70,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Bookmark => "bookmark",
            Self::History => "history",
            Self::Tab => "tab",
            Self::Scrap => "scrap",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Client kind announced in the handshake.
///
/// Selects the store and the protocol variant: plain clients, or
/// sync-capable clients used by the cloud synchronisation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ClientKind {
    Bookmark = 1,
    BookmarkSync = 2,
    History = 3,
    HistorySync = 4,
    Tab = 5,
    TabSync = 6,
    Scrap = 7,
    ScrapSync = 8,
}

impl ClientKind {
    pub const fn new(kind: DataKind, sync: bool) -> Self {
        match (kind, sync) {
            (DataKind::Bookmark, false) => Self::Bookmark,
            (DataKind::Bookmark, true) => Self::BookmarkSync,
            (DataKind::History, false) => Self::History,
            (DataKind::History, true) => Self::HistorySync,
            (DataKind::Tab, false) => Self::Tab,
            (DataKind::Tab, true) => Self::TabSync,
            (DataKind::Scrap, false) => Self::Scrap,
            (DataKind::Scrap, true) => Self::ScrapSync,
        }
    }

    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        let kind = match value {
            1 => Self::Bookmark,
            2 => Self::BookmarkSync,
            3 => Self::History,
            4 => Self::HistorySync,
            5 => Self::Tab,
            6 => Self::TabSync,
            7 => Self::Scrap,
            8 => Self::ScrapSync,
            _ => return None,
        };
        Some(kind)
    }

    pub const fn data_kind(self) -> DataKind {
        match self {
            Self::Bookmark | Self::BookmarkSync => DataKind::Bookmark,
            Self::History | Self::HistorySync => DataKind::History,
            Self::Tab | Self::TabSync => DataKind::Tab,
            Self::Scrap | Self::ScrapSync => DataKind::Scrap,
        }
    }

    pub const fn is_sync(self) -> bool {
        matches!(
            self,
            Self::BookmarkSync | Self::HistorySync | Self::TabSync | Self::ScrapSync
        )
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sync() {
            write!(f, "{}-sync", self.data_kind())
        } else {
            write!(f, "{}", self.data_kind())
        }
    }
}
