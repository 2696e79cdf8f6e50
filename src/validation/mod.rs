pub mod rules;
pub mod validator;

pub use rules::Finding;
pub use validator::Validator;
