//! Transaction heuristics used to link addresses.
//!
//! [`change`] picks the output most likely returning value to the sender;
//! [`coinjoin`] flags transactions whose inputs should not be assumed to
//! share an owner.

pub mod change;
pub mod coinjoin;

pub use change::{
    AddressReuse, Candidates, ChangeFn, ChangeHeuristic, Difference, FreshAddress, Intersection, Legacy, Locktime,
    NoChange, OptimalChange, PeelingChain, PowerOfTen, ScriptType, Union,
};
pub use coinjoin::{CoinjoinDetector, EqualValueCoinjoin, NeverCoinjoin};
