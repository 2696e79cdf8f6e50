// Recipe extraction
//
// Reads build recipes written outside asgipack back into the plan model.

pub mod dockerfile;

pub use dockerfile::parse_dockerfile;
