pub mod api;
pub mod equality;
pub mod error;
pub mod filter;
pub mod ids;
pub mod metadata;
pub mod notify;
pub mod record;
pub mod rules;
pub mod schema_manifest;
pub mod time;
pub mod validation;
pub mod value;
pub mod versioning;

pub use api::*;
pub use equality::{compare_values, value_hash, values_equal};
pub use error::{AxiaError, AxiaResult, FieldError, ValidationCode};
pub use filter::*;
pub use ids::*;
pub use metadata::*;
pub use notify::*;
pub use record::*;
pub use rules::{RuleSet, ValidationRules};
pub use schema_manifest::*;
pub use self::time::*;
pub use validation::{ValidationMode, ValidationOutcome, check_assignment, validate};
pub use value::{DataType, TypedValue};
pub use versioning::{ChainHead, NewValue, WritePlan, plan_write};
