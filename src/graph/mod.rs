//! Incremental dataflow graph over traced EVM instructions.
//!
//! A [`GraphSession`] receives one node per traced instruction and links
//! every operand to the earlier node that produced it. Queries on top of the
//! graph answer where a stored value came from ([`sources`]), which paths a
//! function took and whether they loop ([`paths`]).

pub mod edges;
pub mod fingerprint;
pub mod node;
pub mod opcode;
pub mod paths;
pub mod profiler;
pub mod scope;
pub mod session;
pub mod sources;
pub mod view;

pub use self::{
    fingerprint::*, node::*, opcode::*, paths::*, profiler::*, session::*, sources::*, view::*,
};
