#![forbid(unsafe_code)]

//! Observable sequences and the minimal list differ.
//!
//! - [`ObservableList`]: shared ordered storage that publishes a
//!   [`ListChange`] per logical mutation.
//! - [`ChangeRecord`]: add / remove / reorder / replace over a half-open
//!   index range.
//! - [`update_array`]: rewrite a list into a desired sequence with a minimal
//!   edit, published as one change.

pub mod change;
pub mod diff;
pub mod observable;

pub use change::{ChangeKind, ChangeRecord};
pub use diff::{DiffPlan, diff, update_array};
pub use observable::{ListChange, ObservableList, ensure_observable};
