//! Thread-safe engine wrapper.
//!
//! The engine itself is strictly single-threaded. [`ZbddConcurrent`]
//! serializes every public call under one mutex and exposes
//! [`run_atomic`][ZbddConcurrent::run_atomic] for composite operations:
//! a sequence of calls that builds unprotected intermediates must hold the
//! lock throughout, or a collection triggered from another thread could
//! reap them between calls.

use std::sync::{Mutex, PoisonError};

use crate::error::{Result, ZbddError};
use crate::statistics::ZbddStatistics;
use crate::types::{NodeId, Var};
use crate::zbdd::Zbdd;

/// A mutex-serialized [`Zbdd`].
pub struct ZbddConcurrent {
    inner: Mutex<Zbdd>,
}

impl ZbddConcurrent {
    /// Wraps an engine. The wrapper takes sole ownership; all access goes
    /// through the lock from here on.
    pub fn new(zbdd: Zbdd) -> Self {
        Self { inner: Mutex::new(zbdd) }
    }

    /// Unwraps the engine again.
    pub fn into_inner(self) -> Zbdd {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a composite operation while holding the lock.
    ///
    /// Use this for any sequence of calls whose intermediate results are
    /// not yet protected by [`inc_ref`][Zbdd::inc_ref].
    pub fn run_atomic<R>(&self, operation: impl FnOnce(&mut Zbdd) -> R) -> R {
        let mut zbdd = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        operation(&mut zbdd)
    }

    /// See [`Zbdd::create_var`].
    pub fn create_var(&self) -> Result<Var> {
        self.run_atomic(|zbdd| zbdd.create_var())
    }

    /// See [`Zbdd::cube`].
    pub fn cube(&self, vars: impl IntoIterator<Item = Var>) -> Result<NodeId> {
        let vars: Vec<Var> = vars.into_iter().collect();
        self.run_atomic(move |zbdd| zbdd.cube(vars))
    }

    /// See [`Zbdd::subset0`].
    pub fn subset0(&self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        self.run_atomic(|engine| engine.subset0(zbdd, var))
    }

    /// See [`Zbdd::subset1`].
    pub fn subset1(&self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        self.run_atomic(|engine| engine.subset1(zbdd, var))
    }

    /// See [`Zbdd::change`].
    pub fn change(&self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        self.run_atomic(|engine| engine.change(zbdd, var))
    }

    /// See [`Zbdd::union`].
    pub fn union(&self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.run_atomic(|zbdd| zbdd.union(p, q))
    }

    /// See [`Zbdd::intersect`].
    pub fn intersect(&self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.run_atomic(|zbdd| zbdd.intersect(p, q))
    }

    /// See [`Zbdd::difference`].
    pub fn difference(&self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.run_atomic(|zbdd| zbdd.difference(p, q))
    }

    /// See [`Zbdd::multiply`].
    pub fn multiply(&self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.run_atomic(|zbdd| zbdd.multiply(p, q))
    }

    /// See [`Zbdd::divide`].
    pub fn divide(&self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.run_atomic(|zbdd| zbdd.divide(p, q))
    }

    /// See [`Zbdd::modulo`].
    pub fn modulo(&self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.run_atomic(|zbdd| zbdd.modulo(p, q))
    }

    /// See [`Zbdd::atomize`].
    pub fn atomize(&self, zbdd: NodeId) -> Result<NodeId> {
        self.run_atomic(|engine| engine.atomize(zbdd))
    }

    /// See [`Zbdd::remove_base`].
    pub fn remove_base(&self, zbdd: NodeId) -> Result<NodeId> {
        self.run_atomic(|engine| engine.remove_base(zbdd))
    }

    /// See [`Zbdd::contains`].
    pub fn contains(&self, p: NodeId, q: NodeId) -> Result<bool> {
        self.run_atomic(|zbdd| zbdd.contains(p, q))
    }

    /// See [`Zbdd::count`].
    pub fn count(&self, zbdd: NodeId) -> Result<u64> {
        self.run_atomic(|engine| engine.count(zbdd))
    }

    /// See [`Zbdd::inc_ref`].
    pub fn inc_ref(&self, zbdd: NodeId) -> Result<NodeId> {
        self.run_atomic(|engine| engine.inc_ref(zbdd))
    }

    /// See [`Zbdd::dec_ref`].
    pub fn dec_ref(&self, zbdd: NodeId) -> Result<NodeId> {
        self.run_atomic(|engine| engine.dec_ref(zbdd))
    }

    /// See [`Zbdd::gc`].
    pub fn gc(&self) -> usize {
        self.run_atomic(|zbdd| zbdd.gc())
    }

    /// See [`Zbdd::clear`].
    pub fn clear(&self) {
        self.run_atomic(|zbdd| zbdd.clear())
    }

    /// See [`Zbdd::statistics`].
    pub fn statistics(&self) -> ZbddStatistics {
        self.run_atomic(|zbdd| zbdd.statistics())
    }

    /// See [`Zbdd::format_family`].
    pub fn format_family(&self, zbdd: NodeId) -> Result<String> {
        self.run_atomic(|engine| engine.format_family(zbdd))
    }

    /// Not available through the wrapper: the payload is a borrow of
    /// engine state and cannot escape the lock. Access it inside
    /// [`run_atomic`][ZbddConcurrent::run_atomic] instead.
    pub fn var_object<T>(&self, _var: Var) -> Result<&T> {
        Err(ZbddError::UnsupportedOperation(
            "var_object borrows engine state; use run_atomic",
        ))
    }
}
