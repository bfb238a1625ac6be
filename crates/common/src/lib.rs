pub mod face;
pub mod validation;
