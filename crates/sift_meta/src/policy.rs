//! Recovery policy for records that cannot be parsed or applied.
//!
//! ```text
//! Normal               -> Surface
//! Loading, skip = yes  -> Skip
//! Loading, skip = no   -> Fatal
//! ```
//!
//! The same two-stage check (operating context first, skip flag second) is
//! used for parse failures and for applier rejections.

/// Whether the node is serving live traffic or replaying its durable log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingContext {
    Normal,
    Loading,
}

impl OperatingContext {
    pub fn from_loading_flag(loading: bool) -> Self {
        if loading {
            OperatingContext::Loading
        } else {
            OperatingContext::Normal
        }
    }

    pub fn is_loading(self) -> bool {
        matches!(self, OperatingContext::Loading)
    }
}

/// What the handler does with a failed record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Return a typed error to the caller.
    Surface,
    /// Count it, reply OK, and neither apply nor replicate.
    Skip,
    /// Stop the node; the durable log cannot be replayed faithfully.
    Fatal,
}

pub fn resolve(context: OperatingContext, skip_corrupted_entries: bool) -> Recovery {
    match context {
        OperatingContext::Normal => Recovery::Surface,
        OperatingContext::Loading if skip_corrupted_entries => Recovery::Skip,
        OperatingContext::Loading => Recovery::Fatal,
    }
}
