//! Windowed loading and paged stream composition over live queries.

mod pager;
mod tiled_loader;

pub use pager::*;
pub use tiled_loader::*;


use serde::{Deserialize, Serialize};

/// Contiguous index range requested from a windowed loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub start_index: usize,
    pub length: usize,
}

/// Requests issued by a windowed-paging consumer. Keys are start indices
/// into the current generation's view of the result set; they lose meaning
/// once the generation invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRequest {
    Refresh { key: Option<usize>, size: usize },
    Append { key: usize, size: usize },
    Prepend { key: usize, size: usize },
}

/// One loaded page.
///
/// The optional fields stay `None` whenever the engine does not cheaply
/// compute them for the request kind: only refresh windows carry the
/// surrounding item counts, and callers may rely on `None` meaning "no
/// definite count".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult<R> {
    pub items: Vec<R>,
    pub previous_key: Option<usize>,
    pub next_key: Option<usize>,
    pub items_before: Option<usize>,
    pub items_after: Option<usize>,
}

impl<R> PageResult<R> {
    pub(crate) fn empty() -> Self {
        Self {
            items: Vec::new(),
            previous_key: None,
            next_key: None,
            items_before: None,
            items_after: None,
        }
    }
}

/// Paging behavior knobs handed to the composer. `page_size` and
/// `initial_load_size` drive the requester and the eager initial window;
/// `prefetch_distance` and `enable_placeholders` are pass-through hints for
/// the UI-side consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PagingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_prefetch_distance")]
    pub prefetch_distance: usize,

    #[serde(default = "default_initial_load_size")]
    pub initial_load_size: usize,

    #[serde(default)]
    pub enable_placeholders: bool,
}

fn default_page_size() -> usize {
    20
}

fn default_prefetch_distance() -> usize {
    60
}

fn default_initial_load_size() -> usize {
    60
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            prefetch_distance: default_prefetch_distance(),
            initial_load_size: default_initial_load_size(),
            enable_placeholders: false,
        }
    }
}
