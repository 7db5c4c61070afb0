//! Thread-confined execution for stores that forbid cross-thread access to
//! their live objects.
//!
//! A [`ConfinedDispatcher`] owns one dedicated worker thread with a FIFO
//! run-loop. Every operation that touches a store handle or a live result set
//! is submitted as a job and executes on that thread; the [`Affinity`] value
//! passed to each job is the capability proving worker-thread residency and
//! the place where `!Send` session state survives between jobs.

mod affinity;
mod confined_dispatcher;

pub use affinity::*;
pub use confined_dispatcher::*;

#[cfg(test)]
mod confined_dispatcher_test;
