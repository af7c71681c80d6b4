//! Collaborator identity contract.
//!
//! Any object whose reads should become cache dependencies implements
//! [`Observable`]: it declares a stable identity path and the operations it
//! reports. Reads are reported explicitly with [`Observable::observe`]:
//!
//! ```ignore
//! impl Observable for UserRepo {
//!     fn primer_identifier(&self) -> Vec<String> {
//!         vec!["UserRepo".into()]
//!     }
//!
//!     fn tracked_operations(&self) -> &'static [&'static str] {
//!         &["find"]
//!     }
//! }
//!
//! impl UserRepo {
//!     pub fn find(&self, id: i64) -> Option<User> {
//!         let user = self.rows.get(&id).cloned();
//!         self.observe("find", vec![id.into()], user)
//!     }
//! }
//! ```

use serde::Serialize;
use tracing::debug;

use crate::attribute::{Attribute, Token};
use crate::recorder::{self, Call};

/// A collaborator whose calls can be recorded as dependencies.
pub trait Observable {
    /// Identity path prepended to every attribute built from this
    /// collaborator's calls.
    fn primer_identifier(&self) -> Vec<String>;

    /// Operations this collaborator reports. Calls to anything else are
    /// not recorded.
    fn tracked_operations(&self) -> &'static [&'static str];

    /// Report a call to the active recording scope, if any.
    ///
    /// Returns true when the call was recorded.
    fn observe_call(
        &self,
        operation: &str,
        arguments: Vec<Token>,
        returned: Option<serde_json::Value>,
    ) -> bool {
        if !recorder::is_recording() {
            return false;
        }
        if !self.tracked_operations().contains(&operation) {
            debug!(
                receiver = ?self.primer_identifier(),
                operation,
                "Ignoring call to untracked operation"
            );
            return false;
        }
        recorder::record_call(Call {
            receiver: self.primer_identifier(),
            operation: operation.to_string(),
            arguments,
            returned,
        })
    }

    /// Report a call and pass its return value through.
    fn observe<R>(&self, operation: &str, arguments: Vec<Token>, returned: R) -> R
    where
        Self: Sized,
        R: Serialize,
    {
        if recorder::is_recording() {
            let snapshot = serde_json::to_value(&returned).ok();
            self.observe_call(operation, arguments, snapshot);
        }
        returned
    }

    /// The attribute descriptor a call to `operation` with `arguments`
    /// produces. Publishers use this to announce a change.
    fn attribute_for(&self, operation: &str, arguments: &[Token]) -> Attribute {
        Attribute::for_operation(&self.primer_identifier(), operation, arguments)
    }
}
