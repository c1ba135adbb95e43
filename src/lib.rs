#[macro_use]
pub mod util;

pub mod expr;
pub mod graph;
pub mod hooks;
pub mod oracle;
pub mod value;
