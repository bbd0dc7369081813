//! # zbdd-rs: Zero-Suppressed Binary Decision Diagrams in Rust
//!
//! **`zbdd-rs`** is a manager-centric library for **Zero-suppressed Binary
//! Decision Diagrams (ZBDDs)**: DAG-encoded families of sets over an
//! ordered variable universe, canonical under the zero-suppression
//! reduction. ZBDDs shine wherever sparse combinatorial set families
//! appear --- covering problems, cube sets, configuration spaces.
//!
//! ## What is a ZBDD?
//!
//! A ZBDD is a variant of BDDs specifically designed for sparse set
//! families. The key difference is the **zero-suppression rule**: any node
//! whose 1-branch is the EMPTY terminal is eliminated in favor of its
//! 0-branch (unlike BDDs, which eliminate nodes with equal branches).
//! For a fixed variable order every family has exactly one representation,
//! so equality is id comparison.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: all operations go through the
//!   [`Zbdd`][crate::zbdd::Zbdd] engine, which enforces structural sharing
//!   (hash consing) and canonicity.
//! - **Pointer-Free Arena**: nodes are records in a flat arena addressed
//!   by [`NodeId`][crate::types::NodeId]; ids survive garbage collection
//!   and arena growth.
//! - **Explicit Lifetime Management**: `inc_ref`/`dec_ref` with a
//!   fresh/live/dead protocol, plus incremental mark-and-sweep collection
//!   driven by a pluggable [capacity advisor][crate::advisor].
//! - **Rich Set Algebra**: union, intersection, difference, product,
//!   weak division, modulo, atomization and cube enumeration.
//!
//! ## Basic Usage
//!
//! ```rust
//! use zbdd_rs::zbdd::Zbdd;
//!
//! // 1. Initialize the engine
//! let mut zbdd = Zbdd::new();
//!
//! // 2. Create variables (the creation order is the variable order)
//! let a = zbdd.create_var().unwrap();
//! let b = zbdd.create_var().unwrap();
//! let c = zbdd.create_var().unwrap();
//!
//! // 3. Build families of combinations
//! let ab = zbdd.cube([a, b]).unwrap();       // {{a, b}}
//! let c_only = zbdd.cube([c]).unwrap();      // {{c}}
//! let family = zbdd.union(ab, c_only).unwrap();
//!
//! // 4. Query them
//! assert_eq!(zbdd.count(family).unwrap(), 2);
//! assert!(zbdd.contains(family, ab).unwrap());
//!
//! // 5. Protect results that must survive garbage collection
//! zbdd.inc_ref(family).unwrap();
//! ```
//!
//! ## Core Components
//!
//! - **[`zbdd`]**: the engine --- arena, unique table, refcounts, gc and
//!   the algebraic operations.
//! - **[`cache`]**: pluggable operation memoization
//!   ([`NoCache`][crate::cache::NoCache] for the plain engine,
//!   [`DirectMappedCache`][crate::cache::DirectMappedCache] or
//!   [`HashMapCache`][crate::cache::HashMapCache] for the cached one).
//! - **[`advisor`]**: capacity policy deciding when to collect garbage
//!   and how to grow.
//! - **[`concurrent`]**: a mutex wrapper with `run_atomic` for composite
//!   operations.

pub mod advisor;
pub mod cache;
pub mod callback;
pub mod concurrent;
pub mod error;
mod node;
pub mod resolver;
pub mod statistics;
pub mod types;
pub mod utils;
pub mod zbdd;
