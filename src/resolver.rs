//! Literal and cube display names.

use crate::types::Var;

/// Resolves variables to display names.
///
/// The resolver is pure: it never mutates engine state. A closure
/// `Fn(Var) -> String` can be used directly wherever a resolver is
/// expected.
pub trait LiteralResolver: Send {
    /// Returns the literal name for a variable.
    fn literal_name(&self, var: Var) -> String;

    /// Returns the display string for a cube (a sorted variable slice).
    ///
    /// The default joins the literal names with `.`; the empty cube is
    /// rendered as `{}`.
    fn cube_name(&self, cube: &[Var]) -> String {
        if cube.is_empty() {
            return "{}".to_string();
        }
        let mut sorted = cube.to_vec();
        sorted.sort_unstable();
        sorted
            .iter()
            .map(|&var| self.literal_name(var))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl<F> LiteralResolver for F
where
    F: Fn(Var) -> String + Send,
{
    fn literal_name(&self, var: Var) -> String {
        self(var)
    }
}

/// The default resolver: `v1`, `v2`, ...
#[derive(Debug, Default, Copy, Clone)]
pub struct DefaultLiteralResolver;

impl LiteralResolver for DefaultLiteralResolver {
    fn literal_name(&self, var: Var) -> String {
        format!("v{}", var.get())
    }
}
