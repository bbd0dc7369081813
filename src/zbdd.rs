//! Zero-suppressed binary decision diagram engine.
//!
//! The [`Zbdd`] manager owns a flat arena of hash-consed nodes and exposes
//! the algebraic set-family operations on top of it. All operations go
//! through the manager; structural sharing and the canonical form are
//! maintained by the unique table embedded in the arena.
//!
//! # Design
//!
//! - **Arena + indices**: nodes are records in a flat `Vec`, identified by
//!   [`NodeId`]. Ids are stable across garbage collection and growth.
//! - **Unique table**: every arena slot doubles as a hash bucket; chains
//!   are intrusive through the records' `next` links. Because the hash
//!   modulus is the arena capacity, any capacity change forces a rehash.
//! - **Explicit refcounts**: operation implementations materialize
//!   transient nodes that a collection triggered by a deeper allocation
//!   could reclaim, so lifetime cannot be inferred from scope. Nodes are
//!   born *fresh* (unacknowledged), become *live* through
//!   [`inc_ref`][Zbdd::inc_ref] and *dead* when the count returns to zero;
//!   dead nodes stay canonical until the next collection.
//! - **Gc + growth**: when the free-list runs dry, the
//!   [`CapacityAdvisor`] decides between a mark-and-sweep collection and
//!   arena growth.
//!
//! # Quick Start
//!
//! ```
//! use zbdd_rs::zbdd::Zbdd;
//!
//! let mut zbdd = Zbdd::new();
//! let a = zbdd.create_var().unwrap();
//! let b = zbdd.create_var().unwrap();
//!
//! // {{a, b}} and {{b}}
//! let ab = zbdd.cube([a, b]).unwrap();
//! let b_only = zbdd.cube([b]).unwrap();
//!
//! let family = zbdd.union(ab, b_only).unwrap();
//! assert_eq!(zbdd.count(family).unwrap(), 2);
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use hashbrown::HashMap;
use log::debug;
use num_bigint::BigUint;
use num_traits::Zero;

use crate::advisor::{CapacityAdvisor, DefaultCapacityAdvisor};
use crate::cache::{BinaryOp, NoCache, OpCache, UnaryOp};
use crate::callback::EngineCallback;
use crate::error::{Result, ZbddError};
use crate::node::{Node, GC_MARK, REF_FRESH, VAR_NONE};
use crate::resolver::{DefaultLiteralResolver, LiteralResolver};
use crate::statistics::ZbddStatistics;
use crate::types::{NodeId, Var};

/// Maximum number of arena slots; node ids must stay in the 31-bit range
/// covered by the unique-table hash.
pub const MAX_NODES: usize = 0x7fff_ffff;

#[derive(Debug, Default)]
struct Counters {
    node_lookups: u64,
    node_lookup_hits: u64,
    gc_count: u32,
    gc_freed_nodes: u64,
    capacity_increases: u32,
}

impl Counters {
    fn clear(&mut self) {
        *self = Counters::default();
    }
}

/// The ZBDD engine: arena, unique table, refcounts, garbage collector and
/// the algebraic set-family operations.
///
/// The engine is strictly single-threaded; wrap it in
/// [`ZbddConcurrent`][crate::concurrent::ZbddConcurrent] when it must be
/// shared.
pub struct Zbdd {
    advisor: Box<dyn CapacityAdvisor>,
    nodes: Vec<Node>,
    /// Head of the free-list (0 = exhausted; slot 0 is never free).
    next_free: u32,
    free_count: usize,
    dead_count: usize,
    last_var: u32,
    counters: Counters,
    cache: Box<dyn OpCache>,
    callbacks: Vec<Box<dyn EngineCallback>>,
    resolver: Box<dyn LiteralResolver>,
    var_objects: HashMap<Var, Box<dyn Any + Send>>,
}

impl Default for Zbdd {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Zbdd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zbdd")
            .field("capacity", &self.capacity())
            .field("free", &self.free_count)
            .field("dead", &self.dead_count)
            .field("vars", &self.last_var)
            .finish()
    }
}

// ============================================================================
// Construction
// ============================================================================

impl Zbdd {
    /// Creates an engine with the [`DefaultCapacityAdvisor`].
    pub fn new() -> Self {
        Self::with_advisor(Box::new(DefaultCapacityAdvisor))
    }

    /// Creates an engine sized and grown by the given advisor.
    pub fn with_advisor(advisor: Box<dyn CapacityAdvisor>) -> Self {
        let capacity = advisor.initial_capacity().max(8).min(MAX_NODES);

        let mut nodes = vec![Node::free(); capacity];
        nodes[NodeId::EMPTY.index()] = Node::terminal(NodeId::EMPTY.raw());
        nodes[NodeId::BASE.index()] = Node::terminal(NodeId::BASE.raw());

        let mut zbdd = Self {
            advisor,
            nodes,
            next_free: 0,
            free_count: 0,
            dead_count: 0,
            last_var: 0,
            counters: Counters::default(),
            cache: Box::new(NoCache),
            callbacks: Vec::new(),
            resolver: Box::new(DefaultLiteralResolver),
            var_objects: HashMap::new(),
        };
        zbdd.clear();
        zbdd
    }

    /// Replaces the operation cache. The new cache starts out empty.
    pub fn set_cache(&mut self, mut cache: Box<dyn OpCache>) {
        cache.clear();
        self.cache = cache;
    }

    /// Registers a lifecycle observer.
    pub fn register_callback(&mut self, callback: Box<dyn EngineCallback>) {
        self.callbacks.push(callback);
    }

    /// Returns the literal resolver used for display names.
    pub fn literal_resolver(&self) -> &dyn LiteralResolver {
        self.resolver.as_ref()
    }

    /// Replaces the literal resolver.
    pub fn set_literal_resolver(&mut self, resolver: Box<dyn LiteralResolver>) {
        self.resolver = resolver;
    }

    /// Resets the engine: all nodes, variables and caches are dropped.
    ///
    /// Arena memory is kept; only the bookkeeping is rebuilt.
    pub fn clear(&mut self) {
        self.fire(|cb| cb.before_clear());

        let capacity = self.capacity();
        self.last_var = 0;
        self.dead_count = 0;
        self.next_free = 2;
        self.free_count = capacity - 2;

        // Chain heads may live in any slot, the terminals included.
        for node in self.nodes.iter_mut() {
            node.chain = 0;
        }
        for index in 2..capacity {
            let node = &mut self.nodes[index];
            node.var = VAR_NONE;
            node.next = if index + 1 == capacity { 0 } else { (index + 1) as u32 };
        }

        self.var_objects.clear();
        self.counters.clear();
        self.cache.clear();

        debug!("clear: capacity = {}", capacity);

        self.fire(|cb| cb.after_clear());
    }
}

// ============================================================================
// Terminals and accessors
// ============================================================================

impl Zbdd {
    /// The empty family: no combinations.
    pub fn empty(&self) -> NodeId {
        NodeId::EMPTY
    }

    /// The unit family: only the empty combination.
    pub fn base(&self) -> NodeId {
        NodeId::BASE
    }

    fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// A point-in-time snapshot of the engine counters.
    pub fn statistics(&self) -> ZbddStatistics {
        ZbddStatistics {
            capacity: self.capacity(),
            free_nodes: self.free_count,
            dead_nodes: self.dead_count,
            node_lookups: self.counters.node_lookups,
            node_lookup_hits: self.counters.node_lookup_hits,
            gc_count: self.counters.gc_count,
            gc_freed_nodes: self.counters.gc_freed_nodes,
            capacity_increases: self.counters.capacity_increases,
            registered_vars: self.last_var,
            memory_usage: self.capacity() * std::mem::size_of::<Node>(),
        }
    }

    /// Variable of a node, or `None` for the terminals.
    pub fn var_of(&self, zbdd: NodeId) -> Result<Option<Var>> {
        self.check_node(zbdd)?;
        let var = self.var_at(zbdd);
        Ok(if var == VAR_NONE { None } else { Some(Var::new(var as u32)) })
    }

    /// 0-branch of a node (combinations without its variable).
    pub fn p0(&self, zbdd: NodeId) -> Result<NodeId> {
        self.check_node(zbdd)?;
        Ok(self.p0_at(zbdd))
    }

    /// 1-branch of a node (combinations with its variable).
    pub fn p1(&self, zbdd: NodeId) -> Result<NodeId> {
        self.check_node(zbdd)?;
        Ok(self.p1_at(zbdd))
    }

    /// True if the id names the terminals or an occupied slot.
    pub fn is_valid_node(&self, zbdd: NodeId) -> bool {
        let index = zbdd.index();
        index < self.capacity() && (zbdd.is_terminal() || self.nodes[index].var != VAR_NONE)
    }

    /// True if the variable has been registered with this engine.
    pub fn is_valid_var(&self, var: Var) -> bool {
        var.get() >= 1 && var.get() <= self.last_var
    }

    fn var_at(&self, zbdd: NodeId) -> i32 {
        if zbdd.raw() < 2 {
            VAR_NONE
        } else {
            self.nodes[zbdd.index()].var
        }
    }

    fn p0_at(&self, zbdd: NodeId) -> NodeId {
        NodeId::new(self.nodes[zbdd.index()].p0)
    }

    fn p1_at(&self, zbdd: NodeId) -> NodeId {
        NodeId::new(self.nodes[zbdd.index()].p1)
    }

    fn check_node(&self, zbdd: NodeId) -> Result<NodeId> {
        let index = zbdd.index();
        if index >= self.capacity() || (index >= 2 && self.nodes[index].var == VAR_NONE) {
            return Err(ZbddError::InvalidNode { node: zbdd.raw(), capacity: self.capacity() });
        }
        Ok(zbdd)
    }

    fn check_var(&self, var: Var) -> Result<Var> {
        if var.get() == 0 || var.get() > self.last_var {
            return Err(ZbddError::InvalidVar { var: var.get(), last_var: self.last_var });
        }
        Ok(var)
    }
}

// ============================================================================
// Variables
// ============================================================================

impl Zbdd {
    /// Registers a new variable.
    ///
    /// Variables are numbered monotonically from 1; the creation order
    /// fixes the variable order of the diagram.
    pub fn create_var(&mut self) -> Result<Var> {
        // the topmost variable number is reserved: together with the gc
        // mark bit it would alias the free-slot sentinel
        if self.last_var >= i32::MAX as u32 - 1 {
            return Err(ZbddError::InvalidVar { var: self.last_var, last_var: self.last_var });
        }
        self.last_var += 1;
        Ok(Var::new(self.last_var))
    }

    /// Registers a new variable carrying a payload object.
    ///
    /// The payload can be recovered with [`var_object`][Zbdd::var_object];
    /// it is typically the domain object a literal resolver renders.
    pub fn create_var_with_object<T: Any + Send>(&mut self, object: T) -> Result<Var> {
        let var = self.create_var()?;
        self.var_objects.insert(var, Box::new(object));
        Ok(var)
    }

    /// Payload object attached to a variable, if any.
    pub fn var_object<T: Any>(&self, var: Var) -> Result<Option<&T>> {
        self.check_var(var)?;
        Ok(self.var_objects.get(&var).and_then(|object| object.downcast_ref()))
    }
}

// ============================================================================
// Unique table
// ============================================================================

impl Zbdd {
    /// Looks up or materializes the node `(var, p0, p1)`.
    ///
    /// Enforces the zero-suppression rule: a node whose 1-branch is EMPTY
    /// is never materialized; `p0` is returned verbatim.
    pub fn get_node(&mut self, var: Var, p0: NodeId, p1: NodeId) -> Result<NodeId> {
        self.check_var(var)?;
        self.check_node(p0)?;
        self.check_node(p1)?;
        self.mk_node(var.get() as i32, p0, p1)
    }

    fn hash(&self, var: i32, p0: u32, p1: u32) -> usize {
        let word = (var as u32)
            .wrapping_mul(12_582_917)
            .wrapping_add(p0.wrapping_mul(4_256_249))
            .wrapping_add(p1.wrapping_mul(741_457));
        (word & 0x7fff_ffff) as usize % self.capacity()
    }

    fn prepend_chain(&mut self, zbdd: u32, hash: usize) {
        self.nodes[zbdd as usize].next = self.nodes[hash].chain;
        self.nodes[hash].chain = zbdd;
    }

    fn mk_node(&mut self, var: i32, p0: NodeId, p1: NodeId) -> Result<NodeId> {
        self.counters.node_lookups += 1;

        // suppress 0's
        if p1 == NodeId::EMPTY {
            self.counters.node_lookup_hits += 1;
            return Ok(p0);
        }

        let mut hash = self.hash(var, p0.raw(), p1.raw());

        // find the node in the hash chain
        let mut r = self.nodes[hash].chain;
        while r != 0 {
            let node = self.nodes[r as usize];
            if node.var == var && node.p0 == p0.raw() && node.p1 == p1.raw() {
                self.counters.node_lookup_hits += 1;
                return Ok(NodeId::new(r));
            }
            r = node.next;
        }

        if self.free_count < 2 {
            // the collection triggered below must not reap the children
            self.inc_ref_raw(p0);
            self.inc_ref_raw(p1);
            self.ensure_capacity();
            self.dec_ref_raw(p1);
            self.dec_ref_raw(p0);

            if self.free_count == 0 {
                return Err(ZbddError::CapacityExhausted { capacity: self.capacity() });
            }

            // may have changed with the capacity
            hash = self.hash(var, p0.raw(), p1.raw());
        }

        let r = self.next_free;
        {
            let node = &mut self.nodes[r as usize];
            self.next_free = node.next;
            node.var = var;
            node.p0 = p0.raw();
            node.p1 = p1.raw();
            node.refcount = REF_FRESH;
        }
        self.free_count -= 1;
        self.prepend_chain(r, hash);

        Ok(NodeId::new(r))
    }
}

// ============================================================================
// Reference counting
// ============================================================================

impl Zbdd {
    /// Acknowledges a node: fresh and dead nodes become live, live nodes
    /// gain a holder. Terminals are unaffected. Returns the node.
    pub fn inc_ref(&mut self, zbdd: NodeId) -> Result<NodeId> {
        self.check_node(zbdd)?;
        Ok(self.inc_ref_raw(zbdd))
    }

    /// Releases a holder; a live node whose count reaches zero becomes
    /// dead (reclaimable, but canonical until the next collection).
    /// Fresh and dead nodes and terminals are unaffected.
    pub fn dec_ref(&mut self, zbdd: NodeId) -> Result<NodeId> {
        self.check_node(zbdd)?;
        Ok(self.dec_ref_raw(zbdd))
    }

    fn inc_ref_raw(&mut self, zbdd: NodeId) -> NodeId {
        if zbdd.raw() >= 2 && self.nodes[zbdd.index()].var != VAR_NONE {
            let node = &mut self.nodes[zbdd.index()];
            if node.refcount == REF_FRESH {
                node.refcount = 1;
            } else {
                if node.refcount == 0 {
                    self.dead_count -= 1;
                }
                node.refcount += 1;
            }
        }
        zbdd
    }

    fn dec_ref_raw(&mut self, zbdd: NodeId) -> NodeId {
        if zbdd.raw() >= 2 && self.nodes[zbdd.index()].var != VAR_NONE {
            let node = &mut self.nodes[zbdd.index()];
            if node.refcount > 0 {
                node.refcount -= 1;
                if node.refcount == 0 {
                    self.dead_count += 1;
                }
            }
        }
        zbdd
    }
}

// ============================================================================
// Garbage collection and growth
// ============================================================================

impl Zbdd {
    /// Runs a mark-and-sweep collection.
    ///
    /// Every node reachable from a live root survives at its id; all other
    /// non-terminal slots return to the free-list. The unique-table chains
    /// are rebuilt and the operation cache is dropped.
    ///
    /// Returns the number of reclaimed slots.
    pub fn gc(&mut self) -> usize {
        self.fire(|cb| cb.before_gc());
        self.cache.clear();

        let old_free = self.free_count;
        let capacity = self.capacity();

        // mark live trees, clearing every hash chain on the way
        for index in 0..capacity {
            let node = self.nodes[index];
            if node.var != VAR_NONE && node.refcount > 0 {
                self.mark_tree(index as u32);
            }
            self.nodes[index].chain = 0;
        }

        // sweep: re-chain survivors, free the rest
        self.next_free = 0;
        self.free_count = 0;

        for index in (2..capacity).rev() {
            let node = self.nodes[index];
            if node.is_marked() {
                let var = node.var & !GC_MARK;
                self.nodes[index].var = var;
                let hash = self.hash(var, node.p0, node.p1);
                self.prepend_chain(index as u32, hash);
            } else {
                let node = &mut self.nodes[index];
                node.var = VAR_NONE;
                node.next = self.next_free;
                self.next_free = index as u32;
                self.free_count += 1;
            }
        }

        self.dead_count = 0;

        let freed = self.free_count - old_free;
        self.counters.gc_count += 1;
        self.counters.gc_freed_nodes += freed as u64;

        debug!("gc: freed {} nodes, {} free of {}", freed, self.free_count, capacity);

        self.fire(|cb| cb.after_gc());
        freed
    }

    fn mark_tree(&mut self, zbdd: u32) {
        if zbdd >= 2 {
            let node = self.nodes[zbdd as usize];
            if (node.var & GC_MARK) == 0 {
                self.nodes[zbdd as usize].var = node.var | GC_MARK;
                self.mark_tree(node.p0);
                self.mark_tree(node.p1);
            }
        }
    }

    fn ensure_capacity(&mut self) {
        if self.dead_count > 0 && self.advisor.is_gc_required(&self.statistics()) {
            self.gc();
            if self.free_count >= self.advisor.min_free_after_gc(&self.statistics()) {
                return;
            }
        }

        let old_capacity = self.capacity();
        let new_capacity = old_capacity
            .saturating_add(self.advisor.growth_increment(&self.statistics()))
            .min(MAX_NODES);
        if new_capacity <= old_capacity {
            return;
        }

        self.counters.capacity_increases += 1;
        self.nodes.resize(new_capacity, Node::free());

        // thread the appended slots onto a rebuilt free-list
        self.next_free = 0;
        self.free_count = new_capacity - old_capacity;
        for index in (old_capacity..new_capacity).rev() {
            self.nodes[index].next = self.next_free;
            self.next_free = index as u32;
        }

        // the hash modulus changed: unchain everything, re-chain survivors
        for index in 0..old_capacity {
            self.nodes[index].chain = 0;
        }
        for index in (2..old_capacity).rev() {
            let node = self.nodes[index];
            if node.var != VAR_NONE {
                let hash = self.hash(node.var, node.p0, node.p1);
                self.prepend_chain(index as u32, hash);
            } else {
                self.nodes[index].next = self.next_free;
                self.next_free = index as u32;
                self.free_count += 1;
            }
        }

        debug!("grow: capacity {} -> {}", old_capacity, new_capacity);
    }

    fn fire<F: Fn(&dyn EngineCallback)>(&self, hook: F) {
        for callback in &self.callbacks {
            if catch_unwind(AssertUnwindSafe(|| hook(callback.as_ref()))).is_err() {
                log::warn!("engine callback panicked; ignoring");
            }
        }
    }
}

// ============================================================================
// Construction of families
// ============================================================================

impl Zbdd {
    /// The family containing exactly one combination: the given variables.
    ///
    /// An empty iterator yields BASE. Duplicate variables collapse.
    pub fn cube(&mut self, vars: impl IntoIterator<Item = Var>) -> Result<NodeId> {
        let mut cube_vars: Vec<Var> = vars.into_iter().collect();
        for &var in &cube_vars {
            self.check_var(var)?;
        }
        cube_vars.sort_unstable();

        let mut r = NodeId::BASE;
        for var in cube_vars {
            if var.get() as i32 != self.var_at(r) {
                r = self.mk_node(var.get() as i32, NodeId::EMPTY, r)?;
            }
        }
        Ok(r)
    }

    /// The single combination containing every registered variable.
    pub fn universe(&mut self) -> Result<NodeId> {
        let mut r = NodeId::BASE;
        for var in 1..=self.last_var {
            self.inc_ref_raw(r);
            let node = self.mk_node(var as i32, NodeId::EMPTY, r);
            self.dec_ref_raw(r);
            r = node?;
        }
        Ok(r)
    }
}

// ============================================================================
// Algebraic operations
// ============================================================================

impl Zbdd {
    /// Combinations of `zbdd` that do not contain `var`.
    pub fn subset0(&mut self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        self.check_node(zbdd)?;
        self.check_var(var)?;
        self.subset0_rec(zbdd, var)
    }

    fn subset0_rec(&mut self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        let v = var.get() as i32;
        let top = self.var_at(zbdd);

        if top < v {
            return Ok(zbdd);
        }
        if top == v {
            return Ok(self.p0_at(zbdd));
        }

        if let Some(r) = self.cache.get2(BinaryOp::Subset0, zbdd.raw(), var.get()) {
            return Ok(r);
        }

        self.inc_ref_raw(zbdd);

        let child0 = self.p0_at(zbdd);
        let child1 = self.p1_at(zbdd);
        let p0 = self.subset0_rec(child0, var)?;
        self.inc_ref_raw(p0);
        let p1 = self.subset0_rec(child1, var)?;
        self.dec_ref_raw(p0);
        let r = self.mk_node(top, p0, p1)?;

        self.dec_ref_raw(zbdd);

        self.cache.put2(BinaryOp::Subset0, zbdd.raw(), var.get(), r);
        Ok(r)
    }

    /// Combinations of `zbdd` that contain `var`, with `var` removed.
    pub fn subset1(&mut self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        self.check_node(zbdd)?;
        self.check_var(var)?;
        self.subset1_rec(zbdd, var)
    }

    fn subset1_rec(&mut self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        let v = var.get() as i32;
        let top = self.var_at(zbdd);

        if top < v {
            return Ok(NodeId::EMPTY);
        }
        if top == v {
            return Ok(self.p1_at(zbdd));
        }

        if let Some(r) = self.cache.get2(BinaryOp::Subset1, zbdd.raw(), var.get()) {
            return Ok(r);
        }

        self.inc_ref_raw(zbdd);

        let child0 = self.p0_at(zbdd);
        let child1 = self.p1_at(zbdd);
        let p0 = self.subset1_rec(child0, var)?;
        self.inc_ref_raw(p0);
        let p1 = self.subset1_rec(child1, var)?;
        self.dec_ref_raw(p0);
        let r = self.mk_node(top, p0, p1)?;

        self.dec_ref_raw(zbdd);

        self.cache.put2(BinaryOp::Subset1, zbdd.raw(), var.get(), r);
        Ok(r)
    }

    /// Toggles the presence of `var` in every combination.
    pub fn change(&mut self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        self.check_node(zbdd)?;
        self.check_var(var)?;
        self.change_rec(zbdd, var)
    }

    fn change_rec(&mut self, zbdd: NodeId, var: Var) -> Result<NodeId> {
        let v = var.get() as i32;
        let top = self.var_at(zbdd);

        if top < v {
            return self.mk_node(v, NodeId::EMPTY, zbdd);
        }
        if top == v {
            self.inc_ref_raw(zbdd);
            let child0 = self.p0_at(zbdd);
            let child1 = self.p1_at(zbdd);
            let r = self.mk_node(v, child1, child0);
            self.dec_ref_raw(zbdd);
            return r;
        }

        if let Some(r) = self.cache.get2(BinaryOp::Change, zbdd.raw(), var.get()) {
            return Ok(r);
        }

        self.inc_ref_raw(zbdd);

        let child0 = self.p0_at(zbdd);
        let child1 = self.p1_at(zbdd);
        let p0 = self.change_rec(child0, var)?;
        self.inc_ref_raw(p0);
        let p1 = self.change_rec(child1, var)?;
        self.dec_ref_raw(p0);
        let r = self.mk_node(top, p0, p1)?;

        self.dec_ref_raw(zbdd);

        self.cache.put2(BinaryOp::Change, zbdd.raw(), var.get(), r);
        Ok(r)
    }

    /// Union of two families.
    pub fn union(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.check_node(p)?;
        self.check_node(q)?;
        self.union_rec(p, q)
    }

    /// Union of any number of families, protecting every operand across
    /// the fold.
    pub fn union_all(&mut self, operands: impl IntoIterator<Item = NodeId>) -> Result<NodeId> {
        let operands: Vec<NodeId> = operands.into_iter().collect();
        for &p in &operands {
            self.check_node(p)?;
        }
        if operands.is_empty() {
            return Ok(NodeId::EMPTY);
        }

        for &p in &operands {
            self.inc_ref_raw(p);
        }

        let mut result: Result<NodeId> = Ok(operands[0]);
        for &q in &operands[1..] {
            let current = match &result {
                Ok(r) => *r,
                Err(_) => break,
            };
            result = self.union_rec(current, q);
        }

        for &p in &operands {
            self.dec_ref_raw(p);
        }
        result
    }

    fn union_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if q == NodeId::EMPTY || p == q {
            return Ok(p);
        }
        if p == NodeId::EMPTY {
            return Ok(q);
        }

        let mut p = p;
        let mut q = q;
        let mut p_var = self.var_at(p);
        let mut q_var = self.var_at(q);

        // canonical argument order: the lower top on the left
        if p_var > q_var {
            std::mem::swap(&mut p, &mut q);
            std::mem::swap(&mut p_var, &mut q_var);
        }

        if let Some(r) = self.cache.get2(BinaryOp::Union, p.raw(), q.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        let r = if p_var < q_var {
            let q0 = self.p0_at(q);
            let q1 = self.p1_at(q);
            let p0 = self.union_rec(p, q0)?;
            self.mk_node(q_var, p0, q1)?
        } else {
            let p_child0 = self.p0_at(p);
            let p_child1 = self.p1_at(p);
            let q_child0 = self.p0_at(q);
            let q_child1 = self.p1_at(q);
            let p0 = self.union_rec(p_child0, q_child0)?;
            self.inc_ref_raw(p0);
            let p1 = self.union_rec(p_child1, q_child1)?;
            self.dec_ref_raw(p0);
            self.mk_node(p_var, p0, p1)?
        };

        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        self.cache.put2(BinaryOp::Union, p.raw(), q.raw(), r);
        Ok(r)
    }

    /// Intersection of two families.
    pub fn intersect(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.check_node(p)?;
        self.check_node(q)?;
        self.intersect_rec(p, q)
    }

    fn intersect_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if p == NodeId::EMPTY || q == NodeId::EMPTY {
            return Ok(NodeId::EMPTY);
        }
        if p == q {
            return Ok(p);
        }

        if let Some(r) = self.cache.get2(BinaryOp::Intersect, p.raw(), q.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        let p_var = self.var_at(p);
        let q_var = self.var_at(q);

        let r = if p_var > q_var {
            let p_child0 = self.p0_at(p);
            self.intersect_rec(p_child0, q)?
        } else if p_var < q_var {
            let q_child0 = self.p0_at(q);
            self.intersect_rec(p, q_child0)?
        } else {
            let p_child0 = self.p0_at(p);
            let p_child1 = self.p1_at(p);
            let q_child0 = self.p0_at(q);
            let q_child1 = self.p1_at(q);
            let p0 = self.intersect_rec(p_child0, q_child0)?;
            self.inc_ref_raw(p0);
            let p1 = self.intersect_rec(p_child1, q_child1)?;
            self.dec_ref_raw(p0);
            self.mk_node(p_var, p0, p1)?
        };

        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        self.cache.put2(BinaryOp::Intersect, p.raw(), q.raw(), r);
        Ok(r)
    }

    /// Combinations of `p` that are not in `q`.
    pub fn difference(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.check_node(p)?;
        self.check_node(q)?;
        self.difference_rec(p, q)
    }

    fn difference_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if p == NodeId::EMPTY || p == q {
            return Ok(NodeId::EMPTY);
        }
        if q == NodeId::EMPTY {
            return Ok(p);
        }

        if let Some(r) = self.cache.get2(BinaryOp::Difference, p.raw(), q.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        let p_var = self.var_at(p);
        let q_var = self.var_at(q);

        let r = if p_var < q_var {
            let q_child0 = self.p0_at(q);
            self.difference_rec(p, q_child0)?
        } else if p_var > q_var {
            let p_child0 = self.p0_at(p);
            let p_child1 = self.p1_at(p);
            let p0 = self.difference_rec(p_child0, q)?;
            self.mk_node(p_var, p0, p_child1)?
        } else {
            let p_child0 = self.p0_at(p);
            let p_child1 = self.p1_at(p);
            let q_child0 = self.p0_at(q);
            let q_child1 = self.p1_at(q);
            let p0 = self.difference_rec(p_child0, q_child0)?;
            self.inc_ref_raw(p0);
            let p1 = self.difference_rec(p_child1, q_child1)?;
            self.dec_ref_raw(p0);
            self.mk_node(p_var, p0, p1)?
        };

        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        self.cache.put2(BinaryOp::Difference, p.raw(), q.raw(), r);
        Ok(r)
    }

    /// Set-family product: all disjoint unions of a combination from `p`
    /// with one from `q`.
    pub fn multiply(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.check_node(p)?;
        self.check_node(q)?;
        self.multiply_rec(p, q)
    }

    fn multiply_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if p == NodeId::EMPTY || q == NodeId::EMPTY {
            return Ok(NodeId::EMPTY);
        }
        if p == NodeId::BASE {
            return Ok(q);
        }
        if q == NodeId::BASE {
            return Ok(p);
        }

        let mut p = p;
        let mut q = q;
        let p_var = self.var_at(p);
        let q_var = self.var_at(q);
        if p_var > q_var {
            std::mem::swap(&mut p, &mut q);
        }
        let v = Var::new(p_var.min(q_var) as u32);

        if let Some(r) = self.cache.get2(BinaryOp::Multiply, p.raw(), q.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        // factor P = p0 + v * p1
        let p0 = self.subset0_rec(p, v)?;
        self.inc_ref_raw(p0);
        let p1 = self.subset1_rec(p, v)?;
        self.inc_ref_raw(p1);

        // factor Q = q0 + v * q1
        let q0 = self.subset0_rec(q, v)?;
        self.inc_ref_raw(q0);
        let q1 = self.subset1_rec(q, v)?;
        self.inc_ref_raw(q1);

        // r = (p0 + v*p1)(q0 + v*q1) = p0q0 + v*(p0q1 + p1q0 + p1q1)
        let p0q0 = self.multiply_rec(p0, q0)?;
        self.inc_ref_raw(p0q0);
        let p0q1 = self.multiply_rec(p0, q1)?;
        self.inc_ref_raw(p0q1);
        let p1q0 = self.multiply_rec(p1, q0)?;
        self.inc_ref_raw(p1q0);
        let p1q1 = self.multiply_rec(p1, q1)?;
        self.inc_ref_raw(p1q1);

        let sum = self.union_rec(p0q1, p1q0)?;
        let sum = self.union_rec(sum, p1q1)?;
        let shifted = self.change_rec(sum, v)?;
        let r = self.union_rec(p0q0, shifted)?;

        self.dec_ref_raw(p1q1);
        self.dec_ref_raw(p1q0);
        self.dec_ref_raw(p0q1);
        self.dec_ref_raw(p0q0);
        self.dec_ref_raw(q1);
        self.dec_ref_raw(q0);
        self.dec_ref_raw(p1);
        self.dec_ref_raw(p0);
        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        self.cache.put2(BinaryOp::Multiply, p.raw(), q.raw(), r);
        Ok(r)
    }

    /// Quotient of weak set-family division (Minato).
    pub fn divide(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.check_node(p)?;
        self.check_node(q)?;
        self.divide_rec(p, q)
    }

    fn divide_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if p.raw() < 2 || q == NodeId::EMPTY {
            return Ok(NodeId::EMPTY);
        }
        if p == q {
            return Ok(NodeId::BASE);
        }
        if q == NodeId::BASE {
            return Ok(p);
        }

        if let Some(r) = self.cache.get2(BinaryOp::Divide, p.raw(), q.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        let v = Var::new(self.var_at(q) as u32);

        // factor P = p0 + v * p1
        let p0 = self.subset0_rec(p, v)?;
        self.inc_ref_raw(p0);
        let p1 = self.subset1_rec(p, v)?;
        self.inc_ref_raw(p1);

        // factor Q = q0 + v * q1; v is the top of q, so the factors are
        // its children
        let q0 = self.p0_at(q);
        let q1 = self.p1_at(q);
        self.inc_ref_raw(q0);

        self.dec_ref_raw(p1);
        let r1 = self.divide_rec(p1, q1)?;

        let r = if r1 != NodeId::EMPTY && q0 != NodeId::EMPTY {
            self.inc_ref_raw(r1);
            let r0 = self.divide_rec(p0, q0)?;
            self.dec_ref_raw(r1);
            self.intersect_rec(r1, r0)?
        } else {
            r1
        };

        self.dec_ref_raw(q0);
        self.dec_ref_raw(p0);
        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        self.cache.put2(BinaryOp::Divide, p.raw(), q.raw(), r);
        Ok(r)
    }

    /// Remainder of weak set-family division:
    /// `p \ (q * (p / q))`, with the quotient computed once.
    pub fn modulo(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        self.check_node(p)?;
        self.check_node(q)?;
        self.modulo_rec(p, q)
    }

    fn modulo_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if let Some(r) = self.cache.get2(BinaryOp::Modulo, p.raw(), q.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        let quotient = self.divide_rec(p, q)?;
        let product = self.multiply_rec(q, quotient)?;
        let r = self.difference_rec(p, product)?;

        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        self.cache.put2(BinaryOp::Modulo, p.raw(), q.raw(), r);
        Ok(r)
    }

    /// The family of single-variable combinations, one per variable
    /// appearing anywhere in `zbdd`.
    pub fn atomize(&mut self, zbdd: NodeId) -> Result<NodeId> {
        self.check_node(zbdd)?;
        self.atomize_rec(zbdd)
    }

    fn atomize_rec(&mut self, zbdd: NodeId) -> Result<NodeId> {
        if zbdd.raw() < 2 {
            return Ok(NodeId::EMPTY);
        }

        if let Some(r) = self.cache.get1(UnaryOp::Atomize, zbdd.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(zbdd);

        let child0 = self.p0_at(zbdd);
        let child1 = self.p1_at(zbdd);
        let a0 = self.atomize_rec(child0)?;
        self.inc_ref_raw(a0);
        let a1 = self.atomize_rec(child1)?;
        self.dec_ref_raw(a0);
        let p0 = self.atomize_union_rec(a0, a1)?;
        let top = self.var_at(zbdd);
        let r = self.mk_node(top, p0, NodeId::BASE)?;

        self.dec_ref_raw(zbdd);

        self.cache.put1(UnaryOp::Atomize, zbdd.raw(), r);
        Ok(r)
    }

    // union specialized for atomization: the 1-branch of every node points
    // to BASE, and BASE leaves are suppressed from the union
    fn atomize_union_rec(&mut self, p: NodeId, q: NodeId) -> Result<NodeId> {
        if p.raw() < 2 {
            return Ok(if q.raw() < 2 { NodeId::EMPTY } else { q });
        }
        if q.raw() < 2 || p == q {
            return Ok(p);
        }

        let mut p = p;
        let mut q = q;
        let mut p_var = self.var_at(p);
        let mut q_var = self.var_at(q);
        if p_var > q_var {
            std::mem::swap(&mut p, &mut q);
            std::mem::swap(&mut p_var, &mut q_var);
        }

        self.inc_ref_raw(p);
        self.inc_ref_raw(q);

        let left = if p_var < q_var { p } else { self.p0_at(p) };
        let q_child0 = self.p0_at(q);
        let p0 = self.atomize_union_rec(left, q_child0)?;
        let r = self.mk_node(q_var, p0, NodeId::BASE)?;

        self.dec_ref_raw(q);
        self.dec_ref_raw(p);

        Ok(r)
    }

    /// Removes the empty combination from the family.
    pub fn remove_base(&mut self, zbdd: NodeId) -> Result<NodeId> {
        self.check_node(zbdd)?;
        self.remove_base_rec(zbdd)
    }

    fn remove_base_rec(&mut self, zbdd: NodeId) -> Result<NodeId> {
        if zbdd.raw() < 2 {
            return Ok(NodeId::EMPTY);
        }

        if let Some(r) = self.cache.get1(UnaryOp::RemoveBase, zbdd.raw()) {
            return Ok(r);
        }

        self.inc_ref_raw(zbdd);

        let child0 = self.p0_at(zbdd);
        let child1 = self.p1_at(zbdd);
        let p0 = self.remove_base_rec(child0)?;
        let top = self.var_at(zbdd);
        let r = self.mk_node(top, p0, child1)?;

        self.dec_ref_raw(zbdd);

        self.cache.put1(UnaryOp::RemoveBase, zbdd.raw(), r);
        Ok(r)
    }

    /// True if `q` is a sub-family of `p` (both non-empty).
    pub fn contains(&mut self, p: NodeId, q: NodeId) -> Result<bool> {
        self.check_node(p)?;
        self.check_node(q)?;
        if p == NodeId::EMPTY || q == NodeId::EMPTY {
            return Ok(false);
        }
        if p == q {
            return Ok(true);
        }
        Ok(self.intersect_rec(p, q)? == q)
    }

    /// True if any combination of `zbdd` contains `var`.
    pub fn has_cube_with_var(&self, zbdd: NodeId, var: Var) -> Result<bool> {
        self.check_node(zbdd)?;
        self.check_var(var)?;
        Ok(self.has_cube_with_var_rec(zbdd, var.get() as i32))
    }

    fn has_cube_with_var_rec(&self, zbdd: NodeId, var: i32) -> bool {
        let top = self.var_at(zbdd);
        if var > top {
            return false;
        }
        top == var
            || self.has_cube_with_var_rec(self.p0_at(zbdd), var)
            || self.has_cube_with_var_rec(self.p1_at(zbdd), var)
    }
}

// ============================================================================
// Counting
// ============================================================================

impl Zbdd {
    /// Number of combinations in the family.
    pub fn count(&self, zbdd: NodeId) -> Result<u64> {
        self.check_node(zbdd)?;
        Ok(self.count_rec(zbdd))
    }

    fn count_rec(&self, zbdd: NodeId) -> u64 {
        if zbdd.raw() < 2 {
            return zbdd.raw() as u64;
        }
        self.count_rec(self.p0_at(zbdd)) + self.count_rec(self.p1_at(zbdd))
    }

    /// Number of combinations as an arbitrary-precision integer.
    pub fn count_big(&self, zbdd: NodeId) -> Result<BigUint> {
        self.check_node(zbdd)?;
        Ok(self.count_big_rec(zbdd))
    }

    fn count_big_rec(&self, zbdd: NodeId) -> BigUint {
        if zbdd == NodeId::EMPTY {
            return BigUint::zero();
        }
        if zbdd == NodeId::BASE {
            return BigUint::from(1u32);
        }
        self.count_big_rec(self.p0_at(zbdd)) + self.count_big_rec(self.p1_at(zbdd))
    }
}

// ============================================================================
// Cube enumeration
// ============================================================================

impl Zbdd {
    /// Walks every combination of the family in depth-first order.
    ///
    /// The visitor receives each cube as a variable slice in descending
    /// variable order and returns whether to continue.
    pub fn visit_cubes<F>(&mut self, zbdd: NodeId, mut visitor: F) -> Result<()>
    where
        F: FnMut(&[Var]) -> bool,
    {
        self.check_node(zbdd)?;
        self.inc_ref_raw(zbdd);

        let top = self.var_at(zbdd).max(0) as usize;
        let mut stack: Vec<Var> = Vec::with_capacity(top.clamp(4, 24));
        self.visit_cubes_rec(zbdd, &mut stack, &mut visitor);

        self.dec_ref_raw(zbdd);
        Ok(())
    }

    fn visit_cubes_rec(
        &self,
        zbdd: NodeId,
        stack: &mut Vec<Var>,
        visitor: &mut dyn FnMut(&[Var]) -> bool,
    ) -> bool {
        if zbdd == NodeId::BASE {
            return visitor(stack);
        }
        if zbdd == NodeId::EMPTY {
            return true;
        }

        let node = self.nodes[zbdd.index()];

        // walk the 1-branch under this node's variable
        stack.push(Var::new(node.var as u32));
        let proceed = self.visit_cubes_rec(NodeId::new(node.p1), stack, visitor);
        stack.pop();
        if !proceed {
            return false;
        }

        // then the 0-branch
        self.visit_cubes_rec(NodeId::new(node.p0), stack, visitor)
    }

    /// Collects every combination of the family.
    pub fn cubes(&mut self, zbdd: NodeId) -> Result<Vec<Vec<Var>>> {
        let mut cubes = Vec::new();
        self.visit_cubes(zbdd, |cube| {
            cubes.push(cube.to_vec());
            true
        })?;
        Ok(cubes)
    }

    /// Renders the family as `{ cube, cube, ... }` using the literal
    /// resolver.
    pub fn format_family(&mut self, zbdd: NodeId) -> Result<String> {
        let cubes = self.cubes(zbdd)?;
        let names: Vec<String> = cubes.iter().map(|cube| self.resolver.cube_name(cube)).collect();
        Ok(format!("{{ {} }}", names.join(", ")))
    }
}

// ============================================================================
// Node dependency order
// ============================================================================

impl Zbdd {
    /// Computes a generation sequence for all occupied nodes: each node
    /// appears after both of its children.
    ///
    /// Freed ids are reused after the first collection, so ids alone no
    /// longer encode creation order; the returned sequence restores a
    /// valid bottom-up order. A collection is always performed first so
    /// the sweep only sees live nodes.
    pub fn calculate_node_dependency(&mut self) -> Vec<NodeId> {
        self.gc();

        let capacity = self.capacity();
        let total = capacity - self.free_count;
        let mut sequence = vec![NodeId::EMPTY; total];
        if total > 1 {
            sequence[1] = NodeId::BASE;
        }

        // ids admitted so far, kept sorted for binary search
        let mut admitted: Vec<u32> = Vec::with_capacity(total);
        let placed = |admitted: &Vec<u32>, zbdd: u32| -> bool {
            zbdd < 2 || admitted.binary_search(&zbdd).is_ok()
        };

        let mut result_index = 2;
        let mut start = 2;

        while result_index < total {
            let mut index = start;
            while index < capacity && result_index < total {
                let node = self.nodes[index];
                let id = index as u32;

                if placed(&admitted, id) || node.var == VAR_NONE {
                    if index == start {
                        start += 1;
                    }
                } else if placed(&admitted, node.p0) && placed(&admitted, node.p1) {
                    if let Err(position) = admitted.binary_search(&id) {
                        admitted.insert(position, id);
                    }
                    sequence[result_index] = NodeId::new(id);
                    result_index += 1;
                    if index == start {
                        start += 1;
                    }
                }

                index += 1;
            }
        }

        sequence
    }
}

// ============================================================================
// Node inspection
// ============================================================================

/// Lifetime phase of a node, decoded from its refcount.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefCount {
    /// Materialized but not yet acknowledged by any holder.
    Fresh,
    /// Previously live; reclaimable by the next collection.
    Dead,
    /// Held by the given number of acknowledged references.
    Live(u32),
}

/// A snapshot of a single node's record.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node: NodeId,
    pub var: Option<Var>,
    pub literal: String,
    pub p0: NodeId,
    pub p1: NodeId,
    pub refcount: RefCount,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}", self.node)?;
        if let Some(var) = self.var {
            write!(f, ", var={}:{}", var.get(), self.literal)?;
        }
        write!(f, ", p0={}, p1={}, refcount=", self.p0, self.p1)?;
        match self.refcount {
            RefCount::Fresh => write!(f, "fresh")?,
            RefCount::Dead => write!(f, "dead")?,
            RefCount::Live(count) => write!(f, "{}", count)?,
        }
        write!(f, ")")
    }
}

impl Zbdd {
    /// Snapshot of a node's variable, branches and refcount.
    pub fn node_info(&self, zbdd: NodeId) -> Result<NodeInfo> {
        self.check_node(zbdd)?;
        let var = self.var_of(zbdd)?;
        let refcount = if zbdd.is_terminal() {
            RefCount::Live(u32::MAX)
        } else {
            match self.nodes[zbdd.index()].refcount {
                REF_FRESH => RefCount::Fresh,
                0 => RefCount::Dead,
                count => RefCount::Live(count as u32),
            }
        };
        Ok(NodeInfo {
            node: zbdd,
            var,
            literal: var.map(|v| self.resolver.literal_name(v)).unwrap_or_default(),
            p0: self.p0_at(zbdd),
            p1: self.p1_at(zbdd),
            refcount,
        })
    }
}
