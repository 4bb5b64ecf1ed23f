//! Shared primitives for the planweave execution kernel.
//!
//! Everything the engine crates exchange lives here: ids, the error
//! taxonomy, the Task/Step/Plan model, and the validation/replan types.

mod errors;
mod model;
mod plan;
mod validation;

pub use errors::{ErrorKind, WeaveError};
pub use model::{ParamMap, Step, StepStatus, StepTemplate, Task, TaskGoal, ToolOutcome};
pub use plan::Plan;
pub use validation::{ReplanRequest, SuggestedAction, ValidationResult};

use std::fmt;

use uuid::Uuid;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from_name(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(TaskId);
string_id!(StepId);
string_id!(RunId);
