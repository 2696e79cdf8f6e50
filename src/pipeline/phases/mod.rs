// Build pipeline phases
//
// Phases run strictly in order and share one `BuildSession`. Each one either
// completes or fails the whole run.

#[path = "01_inspect.rs"]
pub mod inspect;
#[path = "02_plan.rs"]
pub mod plan;
#[path = "03_builder.rs"]
pub mod builder;
#[path = "04_runtime.rs"]
pub mod runtime;
#[path = "05_verify.rs"]
pub mod verify;
