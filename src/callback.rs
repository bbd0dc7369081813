//! Engine lifecycle observers.

/// Observer hooks fired around `clear` and garbage collection.
///
/// Callbacks must not mutate engine state (they receive no access to it)
/// and should not panic; a panicking callback is caught, logged, and
/// ignored so it cannot corrupt an in-flight collection.
#[allow(unused_variables)]
pub trait EngineCallback: Send {
    /// Fired before the engine resets all nodes and variables.
    fn before_clear(&self) {}

    /// Fired after the engine has been reset.
    fn after_clear(&self) {}

    /// Fired before a mark-and-sweep collection starts.
    fn before_gc(&self) {}

    /// Fired after a collection has rebuilt the unique table.
    fn after_gc(&self) {}
}
