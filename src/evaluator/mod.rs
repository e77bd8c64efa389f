//! Comparison operators and detection filter expressions.

pub mod condition;
pub mod operators;

pub use condition::{BinaryOperator, FilterExpression};
pub use operators::{compare, Operator};
